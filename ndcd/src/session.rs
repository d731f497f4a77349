//! Session directory layout and the JSONL sample writer.
//!
//! Each collection run gets one timestamped directory under the configured
//! log root, holding one `.jsonl` stream file per worker plus any rotated
//! backups (`<file>_1`, `<file>_2`, ...). Nothing in here deletes old
//! rotations; retention is left to external tooling.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use ndc_common::Sample;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Upper bound on `_N` suffix probing when a directory name is taken.
const MAX_DIR_ATTEMPTS: u32 = 1000;

/// Directory name for a session started at `stamp`.
///
/// The label is sanitized for path use; an empty label falls back to
/// `session`.
pub fn session_dir_name(label: &str, stamp: &DateTime<Utc>) -> String {
    let cleaned = label.trim().replace([' ', '/'], "_");
    let label = if cleaned.is_empty() {
        "session"
    } else {
        cleaned.as_str()
    };
    format!("{}_{}", label, stamp.format("%Y%m%d-%H%M%S"))
}

/// Create the directory for a session starting now.
pub fn create_session_dir(base: &Path, label: &str) -> Result<PathBuf> {
    create_session_dir_at(base, label, &Utc::now())
}

/// Create a session directory for the given start time.
///
/// Two sessions landing on the same second get distinct directories: the
/// second one is suffixed `_1`, the third `_2`, and so on. `create_dir` is
/// what detects the collision, so concurrent starters cannot both claim the
/// same name.
pub fn create_session_dir_at(base: &Path, label: &str, stamp: &DateTime<Utc>) -> Result<PathBuf> {
    std::fs::create_dir_all(base)
        .with_context(|| format!("creating log root {}", base.display()))?;

    let name = session_dir_name(label, stamp);
    for attempt in 0..MAX_DIR_ATTEMPTS {
        let candidate = if attempt == 0 {
            base.join(&name)
        } else {
            base.join(format!("{}_{}", name, attempt))
        };
        match std::fs::create_dir(&candidate) {
            Ok(()) => {
                debug!("Created session directory {}", candidate.display());
                return Ok(candidate);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("creating session directory {}", candidate.display()))
            }
        }
    }
    bail!(
        "no free session directory name for {} under {}",
        name,
        base.display()
    );
}

/// Writes samples as JSON lines into per-worker stream files.
///
/// The stream file is opened for every append. A rotation renames the live
/// file between appends, so a held-open handle would keep writing into the
/// moved backup; open-per-append guarantees each line lands in the file
/// currently carrying the stream name.
pub struct SessionWriter {
    dir: PathBuf,
}

impl SessionWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The session directory this writer appends into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// On-disk path of the live file for the named stream.
    pub fn stream_path(&self, stream: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", stream))
    }

    /// Append one sample to the named stream; returns the bytes written.
    pub async fn append(&self, stream: &str, sample: &Sample) -> Result<u64> {
        let path = self.stream_path(stream);
        let line = serde_json::to_string(sample).context("serializing sample")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening stream file {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        Ok(line.len() as u64 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndc_common::{CommandResult, WorkerId};
    use tempfile::TempDir;

    fn fixed_stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 22, 10, 30, 0).unwrap()
    }

    #[test]
    fn dir_name_combines_label_and_stamp() {
        let stamp = fixed_stamp();
        assert_eq!(session_dir_name("lab42", &stamp), "lab42_20260822-103000");
        assert_eq!(
            session_dir_name("rack 3/top", &stamp),
            "rack_3_top_20260822-103000"
        );
        assert_eq!(session_dir_name("  ", &stamp), "session_20260822-103000");
    }

    #[test]
    fn same_second_sessions_get_distinct_directories() {
        let base = TempDir::new().unwrap();
        let stamp = fixed_stamp();

        let first = create_session_dir_at(base.path(), "lab", &stamp).unwrap();
        let second = create_session_dir_at(base.path(), "lab", &stamp).unwrap();
        let third = create_session_dir_at(base.path(), "lab", &stamp).unwrap();

        assert_eq!(first, base.path().join("lab_20260822-103000"));
        assert_eq!(second, base.path().join("lab_20260822-103000_1"));
        assert_eq!(third, base.path().join("lab_20260822-103000_2"));
        assert!(first.is_dir() && second.is_dir() && third.is_dir());
    }

    #[tokio::test]
    async fn append_writes_parseable_json_lines() {
        let base = TempDir::new().unwrap();
        let writer = SessionWriter::new(base.path().to_path_buf());

        let sample = Sample::new(
            WorkerId::new("uplink"),
            CommandResult::execution_failure("ip link", "not connected"),
        );
        let first = writer.append("uplink", &sample).await.unwrap();
        let second = writer.append("uplink", &sample).await.unwrap();

        let content = std::fs::read_to_string(writer.stream_path("uplink")).unwrap();
        assert_eq!(content.len() as u64, first + second);

        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: Sample = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.worker_id.as_str(), "uplink");
            assert_eq!(parsed.result.command, "ip link");
        }
    }
}
