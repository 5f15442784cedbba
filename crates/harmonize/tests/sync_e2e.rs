//! End-to-end tests for a full sync run
//!
//! The codecs are in-process fakes: the "decoder" streams the source bytes
//! and the "encoder" writes them to the output, so no external tools are
//! needed. A source starting with `CORRUPT` fails at decoder exit; one
//! starting with `CANCEL` fires the run's cancellation token mid-stream.

use filetime::{set_file_mtime, FileTime};
use harmonize::codec::{DecodeStream, Decoder, EncodeSink, Encoder};
use harmonize::error::CodecError;
use harmonize::tags::NoopTagCopier;
use harmonize::{
    ActionKind, CancellationToken, CodecSet, JobStatus, SyncConfig, SyncDriver, SyncError,
    SyncReport, SyncState,
};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

const T1: i64 = 1_600_000_000;
const T2: i64 = 1_700_000_000;

// ============================================================================
// Fake codecs
// ============================================================================

struct FakeDecoder {
    cancel: CancellationToken,
    available: bool,
}

struct FakeStream {
    file: fs::File,
    corrupt: bool,
    cancel_on_read: Option<CancellationToken>,
}

impl Read for FakeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        if let Some(cancel) = self.cancel_on_read.take() {
            cancel.cancel();
        }
        Ok(n)
    }
}

impl DecodeStream for FakeStream {
    fn finish(self: Box<Self>) -> Result<(), CodecError> {
        if self.corrupt {
            return Err(CodecError::Failed {
                tool: "fake-flac".to_string(),
                status: "exit code 1".to_string(),
                stderr: "FLAC__STREAM_DECODER_LOST_SYNC".to_string(),
            });
        }
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}

impl Decoder for FakeDecoder {
    fn name(&self) -> &str {
        "fake-flac"
    }

    fn extensions(&self) -> &[&str] {
        &["flac"]
    }

    fn open(&self, path: &Path) -> Result<Box<dyn DecodeStream>, CodecError> {
        let head = fs::read(path)?;
        Ok(Box::new(FakeStream {
            file: fs::File::open(path)?,
            corrupt: head.starts_with(b"CORRUPT"),
            cancel_on_read: head.starts_with(b"CANCEL").then(|| self.cancel.clone()),
        }))
    }

    fn check_available(&self) -> Result<(), CodecError> {
        if self.available {
            Ok(())
        } else {
            Err(CodecError::NotFound {
                tool: "fake-flac".to_string(),
                env_var: "HARMONIZE_FLAC_BIN".to_string(),
            })
        }
    }
}

struct FakeEncoder;

struct FakeSink(fs::File);

impl Write for FakeSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl EncodeSink for FakeSink {
    fn finish(mut self: Box<Self>) -> Result<(), CodecError> {
        self.0.flush()?;
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}

impl Encoder for FakeEncoder {
    fn name(&self) -> &str {
        "fake-lame"
    }

    fn extension(&self) -> &str {
        "mp3"
    }

    fn open(&self, output: &Path, _quality: &str) -> Result<Box<dyn EncodeSink>, CodecError> {
        Ok(Box::new(FakeSink(fs::File::create(output)?)))
    }
}

// ============================================================================
// Test environment
// ============================================================================

/// Source and target trees in a temp directory
struct TestEnv {
    _temp: TempDir,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
}

impl TestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let source_dir = temp.path().join("music");
        let target_dir = temp.path().join("mirror");
        fs::create_dir_all(&source_dir).expect("Failed to create source dir");

        Self {
            _temp: temp,
            source_dir,
            target_dir,
        }
    }

    fn write(root: &Path, name: &str, content: &str, mtime: i64) -> PathBuf {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        fs::write(&path, content).expect("Failed to write file");
        set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).expect("Failed to set mtime");
        path
    }

    fn write_source(&self, name: &str, content: &str, mtime: i64) -> PathBuf {
        Self::write(&self.source_dir, name, content, mtime)
    }

    fn write_target(&self, name: &str, content: &str, mtime: i64) -> PathBuf {
        Self::write(&self.target_dir, name, content, mtime)
    }

    fn target(&self, name: &str) -> PathBuf {
        self.target_dir.join(name)
    }

    fn codecs(&self, cancel: &CancellationToken) -> CodecSet {
        CodecSet::new(
            Arc::new(FakeDecoder {
                cancel: cancel.clone(),
                available: true,
            }),
            Arc::new(FakeEncoder),
            Arc::new(NoopTagCopier),
        )
    }

    async fn sync_with(&self, config: SyncConfig) -> SyncReport {
        let cancel = CancellationToken::new();
        SyncDriver::new(
            &self.source_dir,
            &self.target_dir,
            config,
            self.codecs(&cancel),
        )
        .with_cancellation(cancel)
        .run()
        .await
        .expect("sync run failed to start")
    }

    async fn sync(&self) -> SyncReport {
        self.sync_with(SyncConfig::default()).await
    }

    /// Every file and directory under the target, relative, '/'-separated.
    fn target_tree(&self) -> Vec<String> {
        let mut paths: Vec<String> = WalkDir::new(&self.target_dir)
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap())
            .map(|e| {
                e.path()
                    .strip_prefix(&self.target_dir)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        paths.sort();
        paths
    }
}

fn mtime(path: &Path) -> FileTime {
    FileTime::from_last_modification_time(&fs::metadata(path).unwrap())
}

fn planned(report: &SyncReport) -> Vec<(ActionKind, String)> {
    report
        .planned
        .iter()
        .map(|(kind, path)| (*kind, path.to_string_lossy().replace('\\', "/")))
        .collect()
}

fn no_temp_files(env: &TestEnv) -> bool {
    env.target_tree()
        .iter()
        .all(|p| !p.ends_with(harmonize::install::TEMP_SUFFIX))
}

// ============================================================================
// Sync Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_transcode_copy_then_update_and_delete() {
    let env = TestEnv::new();
    let source = env.write_source("a.flac", "lossless audio", T1);
    env.write_source("b.txt", "liner notes", T1);

    let first = env.sync().await;
    assert_eq!(
        planned(&first),
        vec![
            (ActionKind::Transcode, "a.flac".to_string()),
            (ActionKind::Copy, "b.txt".to_string()),
        ]
    );
    assert!(first.summary.is_success());
    assert_eq!(first.summary.transcoded, 1);
    assert_eq!(first.summary.copied, 1);
    assert_eq!(fs::read_to_string(env.target("a.mp3")).unwrap(), "lossless audio");
    assert_eq!(fs::read_to_string(env.target("b.txt")).unwrap(), "liner notes");
    assert_eq!(mtime(&env.target("a.mp3")), FileTime::from_unix_time(T1, 0));

    set_file_mtime(&source, FileTime::from_unix_time(T2, 0)).unwrap();
    fs::remove_file(env.source_dir.join("b.txt")).unwrap();

    let second = env.sync().await;
    assert_eq!(
        planned(&second),
        vec![
            (ActionKind::Transcode, "a.flac".to_string()),
            (ActionKind::DeleteExtraneous, "b.txt".to_string()),
        ]
    );
    assert_eq!(second.summary.deleted, 1);
    assert_eq!(env.target_tree(), vec!["a.mp3".to_string()]);
    assert_eq!(mtime(&env.target("a.mp3")), FileTime::from_unix_time(T2, 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_run_only_skips() {
    let env = TestEnv::new();
    env.write_source("Artist/Album/01.flac", "track one", T1);
    env.write_source("Artist/Album/02.flac", "track two", T1);
    env.write_source("Artist/Album/cover.jpg", "jpeg", T1);

    let first = env.sync().await;
    assert!(first.summary.is_success());
    assert_eq!(first.summary.directories_created, 2);

    let second = env.sync().await;
    assert!(planned(&second).is_empty());
    // two directories and three files
    assert_eq!(second.summary.skipped, 5);
    assert_eq!(second.summary.transcoded + second.summary.copied, 0);
    assert!(second
        .results
        .iter()
        .all(|r| r.status == JobStatus::SkippedAlreadyCurrent));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_newer_source_is_redone() {
    let env = TestEnv::new();
    env.write_source("notes.txt", "v2", T2);
    env.write_target("notes.txt", "v1", T1);

    let report = env.sync().await;
    assert_eq!(
        planned(&report),
        vec![(ActionKind::Copy, "notes.txt".to_string())]
    );
    assert_eq!(fs::read_to_string(env.target("notes.txt")).unwrap(), "v2");
    assert_eq!(mtime(&env.target("notes.txt")), FileTime::from_unix_time(T2, 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nested_extraneous_tree_is_removed() {
    let env = TestEnv::new();
    env.write_source("keep/song.flac", "audio", T1);
    env.write_target("keep/song.mp3", "audio", T1);
    env.write_target("keep/old.mp3", "stale", T1);
    env.write_target("gone/deeper/x.mp3", "stale", T1);
    env.write_target("gone/readme.txt", "stale", T1);

    let report = env.sync().await;
    assert!(report.summary.is_success());
    assert_eq!(report.summary.deleted, 5);
    assert_eq!(
        env.target_tree(),
        vec!["keep".to_string(), "keep/song.mp3".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_one_corrupt_file_does_not_stop_the_others() {
    let env = TestEnv::new();
    env.write_source("bad.flac", "CORRUPT frames", T1);
    for i in 0..9 {
        env.write_source(&format!("good{}.flac", i), &format!("track {}", i), T1);
    }

    let report = env
        .sync_with(SyncConfig {
            num_processes: 4,
            ..SyncConfig::default()
        })
        .await;

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.transcoded, 9);
    assert!(!report.summary.is_success());

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].relative_path, PathBuf::from("bad.flac"));
    match &failures[0].status {
        JobStatus::Failed(reason) => assert!(reason.contains("LOST_SYNC"), "{}", reason),
        other => panic!("unexpected status {:?}", other),
    }

    assert!(!env.target("bad.mp3").exists());
    for i in 0..9 {
        assert!(env.target(&format!("good{}.mp3", i)).exists());
    }
    assert!(no_temp_files(&env));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_transcode_keeps_previous_output() {
    let env = TestEnv::new();
    env.write_source("a.flac", "CORRUPT re-rip", T2);
    env.write_target("a.mp3", "old but playable", T1);

    let report = env.sync().await;
    assert_eq!(report.summary.failed, 1);
    assert_eq!(
        fs::read_to_string(env.target("a.mp3")).unwrap(),
        "old but playable"
    );
    assert_eq!(mtime(&env.target("a.mp3")), FileTime::from_unix_time(T1, 0));
    assert!(no_temp_files(&env));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interrupted_run_publishes_nothing_partial() {
    let env = TestEnv::new();
    env.write_source("a.flac", "CANCEL midway through this track", T1);
    env.write_source("b.txt", "later", T1);
    env.write_target("stale.txt", "extraneous", T1);

    let report = env.sync().await;

    assert!(report.summary.cancelled);
    assert!(!report.summary.is_success());
    assert!(!env.target("a.mp3").exists());
    assert!(!env.target("b.txt").exists());
    // Cleaning never runs after an interrupt
    assert!(env.target("stale.txt").exists());
    assert!(!report.transitions.contains(&SyncState::Cleaning));
    assert!(no_temp_files(&env));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_leftover_temp_file_is_cleaned() {
    let env = TestEnv::new();
    env.write_source("a.flac", "audio", T1);
    env.write_target("a.mp3", "audio", T1);
    env.write_target(".a.mp3.k3J9xq.harmonize-tmp", "half", T1);

    let report = env.sync().await;
    assert!(report.summary.is_success());
    assert_eq!(env.target_tree(), vec!["a.mp3".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_excluded_files_are_not_mirrored() {
    let env = TestEnv::new();
    env.write_source("a.flac", "audio", T1);
    env.write_source("a.log", "rip log", T1);
    env.write_source("scans/booklet.png", "png", T1);

    let report = env
        .sync_with(SyncConfig {
            exclude: vec!["*.log".to_string(), "scans".to_string()],
            ..SyncConfig::default()
        })
        .await;

    assert!(report.summary.is_success());
    assert_eq!(env.target_tree(), vec!["a.mp3".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_collision_transcodes_audio_and_reports() {
    let env = TestEnv::new();
    env.write_source("a.flac", "lossless", T1);
    env.write_source("a.mp3", "someone's old mp3", T1);

    let report = env.sync().await;
    assert_eq!(report.summary.discovery_errors, 1);
    assert!(!report.summary.is_success());
    assert_eq!(fs::read_to_string(env.target("a.mp3")).unwrap(), "lossless");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_file_in_place_of_directory_is_replaced() {
    let env = TestEnv::new();
    env.write_source("Album/01.flac", "audio", T1);
    env.write_target("Album", "not a directory", T1);

    let report = env.sync().await;
    assert!(report.summary.is_success());
    assert!(env.target("Album").is_dir());
    assert!(env.target("Album/01.mp3").is_file());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dry_run_writes_nothing() {
    let env = TestEnv::new();
    env.write_source("a.flac", "audio", T1);
    env.write_source("b.txt", "notes", T1);

    let report = env
        .sync_with(SyncConfig {
            dry_run: true,
            ..SyncConfig::default()
        })
        .await;

    assert_eq!(report.planned.len(), 2);
    assert!(report.results.is_empty());
    assert!(!env.target_dir.exists());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_permissions_are_copied() {
    use std::os::unix::fs::PermissionsExt;

    let env = TestEnv::new();
    let path = env.write_source("private.txt", "secret", T1);
    fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

    env.sync().await;
    let mode = fs::metadata(env.target("private.txt"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o640);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_undeletable_extraneous_file_is_a_failure() {
    use std::os::unix::fs::PermissionsExt;

    let env = TestEnv::new();
    env.write_source("a.flac", "audio", T1);
    env.write_source("b.txt", "notes", T1);
    fs::create_dir_all(env.source_dir.join("locked")).unwrap();
    env.write_target("locked/stale.mp3", "stale", T1);

    let locked = env.target("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
    if fs::write(locked.join("writable"), "").is_ok() {
        // permission bits are not enforced for this user (root)
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let report = env.sync().await;
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(report.summary.failed, 1);
    assert!(!report.summary.is_success());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].action, ActionKind::DeleteExtraneous);
    assert_eq!(failures[0].relative_path, PathBuf::from("locked/stale.mp3"));

    assert_eq!(report.summary.transcoded, 1);
    assert_eq!(report.summary.copied, 1);
    assert_eq!(fs::read_to_string(env.target("a.mp3")).unwrap(), "audio");
    assert_eq!(fs::read_to_string(env.target("b.txt")).unwrap(), "notes");
    assert!(env.target("locked/stale.mp3").exists());
    assert_eq!(report.transitions.last(), Some(&SyncState::Done));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_codec_aborts_before_writing() {
    let env = TestEnv::new();
    env.write_source("a.flac", "audio", T1);
    env.write_source("b.txt", "notes", T1);

    let codecs = CodecSet::new(
        Arc::new(FakeDecoder {
            cancel: CancellationToken::new(),
            available: false,
        }),
        Arc::new(FakeEncoder),
        Arc::new(NoopTagCopier),
    );
    let err = SyncDriver::new(
        &env.source_dir,
        &env.target_dir,
        SyncConfig::default(),
        codecs,
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, SyncError::CodecUnavailable(_)));
    assert!(env.target_tree().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_source_is_a_setup_error() {
    let env = TestEnv::new();
    let cancel = CancellationToken::new();
    let err = SyncDriver::new(
        env.source_dir.join("nope"),
        &env.target_dir,
        SyncConfig::default(),
        env.codecs(&cancel),
    )
    .run()
    .await
    .unwrap_err();

    assert!(matches!(err, SyncError::SourceNotFound(_)));
}
