//! Command-line codec tools: `flac`, `lame` and `opusenc`.
//!
//! Each tool is located on PATH, or through an environment variable naming
//! the executable (e.g. `HARMONIZE_FLAC_BIN=/opt/flac/bin/flac`).

use super::process::{ChildSink, ChildStream};
use super::{DecodeStream, Decoder, EncodeSink, Encoder};
use crate::error::CodecError;
use std::path::{Path, PathBuf};
use std::process::Command;

/// An external executable with an environment override.
#[derive(Debug, Clone)]
struct Tool {
    name: &'static str,
    env_var: &'static str,
}

impl Tool {
    fn resolve(&self) -> Result<PathBuf, CodecError> {
        if let Some(path) = std::env::var_os(self.env_var) {
            return Ok(PathBuf::from(path));
        }
        which::which(self.name).map_err(|_| CodecError::NotFound {
            tool: self.name.to_string(),
            env_var: self.env_var.to_string(),
        })
    }

    fn command(&self) -> Result<Command, CodecError> {
        Ok(Command::new(self.resolve()?))
    }
}

/// FLAC decoder: `flac -c -s -d <file>` writes WAV to stdout and exits
/// non-zero on corrupt input.
#[derive(Debug, Clone)]
pub struct FlacDecoder {
    tool: Tool,
}

impl FlacDecoder {
    pub fn new() -> Self {
        Self {
            tool: Tool {
                name: "flac",
                env_var: "HARMONIZE_FLAC_BIN",
            },
        }
    }
}

impl Default for FlacDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FlacDecoder {
    fn name(&self) -> &str {
        self.tool.name
    }

    fn extensions(&self) -> &[&str] {
        &["flac"]
    }

    fn open(&self, path: &Path) -> Result<Box<dyn DecodeStream>, CodecError> {
        let mut command = self.tool.command()?;
        command.args(["-c", "-s", "-d"]).arg(path);
        Ok(Box::new(ChildStream::spawn(self.tool.name, command)?))
    }

    fn check_available(&self) -> Result<(), CodecError> {
        self.tool.resolve().map(|_| ())
    }
}

/// MP3 encoder: `lame --quiet -V <quality> - <output>`.
#[derive(Debug, Clone)]
pub struct LameEncoder {
    tool: Tool,
}

impl LameEncoder {
    pub fn new() -> Self {
        Self {
            tool: Tool {
                name: "lame",
                env_var: "HARMONIZE_LAME_BIN",
            },
        }
    }
}

impl Default for LameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for LameEncoder {
    fn name(&self) -> &str {
        self.tool.name
    }

    fn extension(&self) -> &str {
        "mp3"
    }

    fn open(&self, output: &Path, quality: &str) -> Result<Box<dyn EncodeSink>, CodecError> {
        let mut command = self.tool.command()?;
        command
            .args(["--quiet", "-V", quality, "-"])
            .arg(output);
        // lame can report failures on stderr with a zero exit code
        Ok(Box::new(ChildSink::spawn(self.tool.name, command, true)?))
    }

    fn check_available(&self) -> Result<(), CodecError> {
        self.tool.resolve().map(|_| ())
    }
}

/// Opus encoder: `opusenc --quiet --bitrate <quality> - <output>`.
#[derive(Debug, Clone)]
pub struct OpusEncoder {
    tool: Tool,
}

impl OpusEncoder {
    pub fn new() -> Self {
        Self {
            tool: Tool {
                name: "opusenc",
                env_var: "HARMONIZE_OPUSENC_BIN",
            },
        }
    }
}

impl Default for OpusEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder for OpusEncoder {
    fn name(&self) -> &str {
        self.tool.name
    }

    fn extension(&self) -> &str {
        "opus"
    }

    fn open(&self, output: &Path, quality: &str) -> Result<Box<dyn EncodeSink>, CodecError> {
        let mut command = self.tool.command()?;
        command
            .args(["--quiet", "--bitrate", quality, "-"])
            .arg(output);
        Ok(Box::new(ChildSink::spawn(self.tool.name, command, false)?))
    }

    fn check_available(&self) -> Result<(), CodecError> {
        self.tool.resolve().map(|_| ())
    }
}
