//! File-based record store — one JSON document, rewritten whole.
//!
//! Writes go to a uniquely named temp file in the same directory and are
//! renamed over the target, so the file on disk is always the last
//! complete snapshot. Each write carries a generation; a write older than
//! the last one on disk is skipped. A write that times out may still land
//! its temp file later; those are removed on the next write or on drop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use shiftclock_core::config::StateConfig;
use shiftclock_core::{Records, Result, ShiftError};
use tokio::sync::Mutex;
use uuid::Uuid;

/// File-based record store.
pub struct RecordStore {
    path: PathBuf,
    io_timeout: Duration,
    written: Mutex<Written>,
}

#[derive(Default)]
struct Written {
    /// Generation of the last snapshot written to disk.
    generation: u64,
    /// Temp files of timed-out writes.
    orphans: Vec<PathBuf>,
}

impl RecordStore {
    /// Create a store at `path`.
    pub fn new(path: impl Into<PathBuf>, io_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            io_timeout,
            written: Mutex::new(Written::default()),
        }
    }

    pub fn from_config(config: &StateConfig) -> Self {
        Self::new(
            config.resolved_path(),
            Duration::from_secs(config.io_timeout_secs.max(1)),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encode a snapshot for [`write`](Self::write).
    pub fn encode(records: &Records) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(records)?)
    }

    /// Load all records. A missing file is an empty store; an unparsable
    /// one is an error and is left untouched.
    pub async fn load(&self) -> Result<Records> {
        let bytes = match tokio::time::timeout(self.io_timeout, tokio::fs::read(&self.path)).await {
            Err(_) => return Err(ShiftError::Timeout("reading state file")),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("📂 No state file at {}, starting empty", self.path.display());
                return Ok(Records::new());
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(bytes)) => bytes,
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Records::new());
        }
        let records: Records = serde_json::from_slice(&bytes)
            .map_err(|e| ShiftError::CorruptState(format!("{}: {e}", self.path.display())))?;
        tracing::info!("📂 Loaded {} records from {}", records.len(), self.path.display());
        Ok(records)
    }

    /// Write a snapshot tagged with `generation`.
    ///
    /// Returns `false` when a newer generation is already on disk.
    pub async fn write(&self, generation: u64, bytes: Vec<u8>) -> Result<bool> {
        let mut written = self.written.lock().await;
        if generation <= written.generation {
            tracing::debug!(
                "💾 Skipping stale snapshot g{generation} (disk has g{})",
                written.generation
            );
            return Ok(false);
        }
        remove_orphans(&mut written.orphans).await;

        let tmp = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        match tokio::time::timeout(self.io_timeout, self.replace(&tmp, &bytes)).await {
            Err(_) => {
                tokio::fs::remove_file(&tmp).await.ok();
                written.orphans.push(tmp);
                Err(ShiftError::Timeout("writing state file"))
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => {
                written.generation = generation;
                tracing::debug!(
                    "💾 Saved snapshot g{generation} ({} bytes) to {}",
                    bytes.len(),
                    self.path.display()
                );
                Ok(true)
            }
        }
    }

    async fn replace(&self, tmp: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        if let Err(e) = tokio::fs::write(tmp, bytes).await {
            tokio::fs::remove_file(tmp).await.ok();
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(tmp, &self.path).await {
            tokio::fs::remove_file(tmp).await.ok();
            return Err(e.into());
        }
        Ok(())
    }
}

/// Drop temp files that are gone or could be removed; keep the rest.
async fn remove_orphans(orphans: &mut Vec<PathBuf>) {
    let mut kept = Vec::new();
    for tmp in orphans.drain(..) {
        match tokio::fs::remove_file(&tmp).await {
            Ok(()) => tracing::warn!("🧹 Removed temp file of a timed-out write: {}", tmp.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!("could not remove {}: {e}", tmp.display());
                kept.push(tmp);
            }
        }
    }
    *orphans = kept;
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        for tmp in &self.written.get_mut().orphans {
            std::fs::remove_file(tmp).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shiftclock_core::{Initiator, UserId, UserRecord};

    fn store(dir: &Path) -> RecordStore {
        RecordStore::new(dir.join("user_times.json"), Duration::from_secs(5))
    }

    fn sample() -> Records {
        let mut records = Records::new();
        let mut rec = UserRecord::new("Ana");
        rec.total_time = 3723.456789;
        rec.confirmed_credits = 6.67;
        rec.notified_milestones = vec![3600];
        rec.is_active = true;
        rec.last_start = Some(Utc.with_ymd_and_hms(2026, 3, 2, 22, 0, 0).unwrap());
        records.insert(UserId(1430689715761451113), rec);
        let mut pre = UserRecord::new("Bo");
        pre.is_pre_registered = true;
        pre.pre_register_time = Some(Utc.with_ymd_and_hms(2026, 3, 2, 18, 0, 0).unwrap());
        pre.pre_register_initiator = Some(Initiator { id: UserId(9), name: "admin".into() });
        records.insert(UserId(2), pre);
        records
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let records = sample();
        assert!(s.write(1, RecordStore::encode(&records).unwrap()).await.unwrap());
        let back = s.load().await.unwrap();
        assert_eq!(back, records);
        assert_eq!(back[&UserId(1430689715761451113)].total_time.to_bits(), 3723.456789f64.to_bits());
    }

    #[tokio::test]
    async fn test_stale_generation_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let newer = sample();
        assert!(s.write(5, RecordStore::encode(&newer).unwrap()).await.unwrap());
        assert!(!s.write(4, RecordStore::encode(&Records::new()).unwrap()).await.unwrap());
        assert_eq!(s.load().await.unwrap(), newer);
        // No temp files left behind.
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    fn temp_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok()?.file_name().into_string().ok())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }

    #[tokio::test]
    async fn test_timed_out_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = RecordStore::new(dir.path().join("user_times.json"), Duration::ZERO);
        let bytes = RecordStore::encode(&sample()).unwrap();
        assert!(matches!(s.write(1, bytes.clone()).await, Err(ShiftError::Timeout(_))));

        // Let the abandoned blocking write finish, then write again.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = s.write(2, bytes).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(s);
        assert!(temp_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        std::fs::write(s.path(), b"{not json").unwrap();
        assert!(matches!(s.load().await, Err(ShiftError::CorruptState(_))));
        // Left untouched.
        assert_eq!(std::fs::read(s.path()).unwrap(), b"{not json");
    }
}
