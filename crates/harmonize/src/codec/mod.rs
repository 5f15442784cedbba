//! Decoder / encoder seams.
//!
//! The engine treats codecs as black-box byte streams. `DecodeStream` and
//! `EncodeSink` are the two ends the Stream Pipe connects; `finish` reports
//! whether the stream completed cleanly and `abort` tears the side down
//! without producing output.

pub mod process;
pub mod tools;

use crate::config::Codec;
use crate::error::CodecError;
use crate::tags::{LoftyTagCopier, TagCopier};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

pub use tools::{FlacDecoder, LameEncoder, OpusEncoder};

/// Producer side: decoded audio bytes.
pub trait DecodeStream: Read + Send {
    /// Wait for the decoder to exit. Corrupt or truncated input is an error
    /// here even if every read succeeded.
    fn finish(self: Box<Self>) -> Result<(), CodecError>;

    /// Stop decoding and release resources.
    fn abort(self: Box<Self>);
}

/// Consumer side: accepts decoded bytes and writes the encoded file.
pub trait EncodeSink: Write + Send {
    /// Close the input and wait for the encoder to complete the output file.
    fn finish(self: Box<Self>) -> Result<(), CodecError>;

    /// Stop encoding; the partial output is left for the caller to discard.
    fn abort(self: Box<Self>);
}

/// Opens decode streams over lossless source files.
pub trait Decoder: Send + Sync {
    fn name(&self) -> &str;

    /// Lowercase extensions (without dot) this decoder reads.
    fn extensions(&self) -> &[&str];

    fn open(&self, path: &Path) -> Result<Box<dyn DecodeStream>, CodecError>;

    /// Fail fast when the decoder cannot run at all.
    fn check_available(&self) -> Result<(), CodecError> {
        Ok(())
    }

    /// Extension-based classification used by the tree differ. A name that
    /// is only a dot and an extension (`.flac`) counts as extensionless.
    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions().iter().any(|known| *known == ext)
            })
            .unwrap_or(false)
    }
}

/// Opens encode sinks writing lossy files.
pub trait Encoder: Send + Sync {
    fn name(&self) -> &str;

    /// Extension (without dot) of the files this encoder writes.
    fn extension(&self) -> &str;

    fn open(&self, output: &Path, quality: &str) -> Result<Box<dyn EncodeSink>, CodecError>;

    fn check_available(&self) -> Result<(), CodecError> {
        Ok(())
    }
}

/// The decoder, encoder and tag copier used by one run.
#[derive(Clone)]
pub struct CodecSet {
    pub decoder: Arc<dyn Decoder>,
    pub encoder: Arc<dyn Encoder>,
    pub tagger: Arc<dyn TagCopier>,
}

impl CodecSet {
    pub fn new(
        decoder: Arc<dyn Decoder>,
        encoder: Arc<dyn Encoder>,
        tagger: Arc<dyn TagCopier>,
    ) -> Self {
        Self {
            decoder,
            encoder,
            tagger,
        }
    }

    /// External-tool codecs for the given output format.
    pub fn for_codec(codec: Codec) -> Self {
        let encoder: Arc<dyn Encoder> = match codec {
            Codec::Mp3 => Arc::new(LameEncoder::new()),
            Codec::Opus => Arc::new(OpusEncoder::new()),
        };
        Self::new(Arc::new(FlacDecoder::new()), encoder, Arc::new(LoftyTagCopier))
    }

    /// Check both tools before any job is dispatched.
    pub fn check_available(&self) -> Result<(), CodecError> {
        self.decoder.check_available()?;
        self.encoder.check_available()
    }
}

impl std::fmt::Debug for CodecSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecSet")
            .field("decoder", &self.decoder.name())
            .field("encoder", &self.encoder.name())
            .finish()
    }
}
