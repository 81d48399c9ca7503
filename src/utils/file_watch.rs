//! Polling file modification watch
//!
//! Modification times are kept as two 32-bit halves of a 100ns tick count,
//! the same representation the shader cache header stores on disk.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::{GraphicsError, GraphicsResult};

/// File modification time split into low/high 32-bit halves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileTime {
    pub low: u32,
    pub high: u32,
}

impl FileTime {
    pub fn from_parts(low: u32, high: u32) -> Self {
        Self { low, high }
    }

    /// Convert to 100ns ticks since the unix epoch
    pub fn from_system_time(time: SystemTime) -> Self {
        let ticks = time
            .duration_since(UNIX_EPOCH)
            .map(|d| (d.as_nanos() / 100) as u64)
            .unwrap_or(0);
        Self {
            low: ticks as u32,
            high: (ticks >> 32) as u32,
        }
    }

    pub fn ticks(&self) -> u64 {
        ((self.high as u64) << 32) | self.low as u64
    }
}

/// Query the modification time of `path`
pub fn file_time(path: &Path) -> GraphicsResult<FileTime> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| GraphicsError::io(path, e))?;
    Ok(FileTime::from_system_time(modified))
}

/// Watches one file by polling its modification time.
///
/// `check` hits the filesystem at most once per poll interval.
#[derive(Debug)]
pub struct FileWatch {
    path: PathBuf,
    time: FileTime,
    interval: Duration,
    last_poll: Instant,
}

impl FileWatch {
    /// Start watching `path`, recording its current modification time
    pub fn new(path: impl AsRef<Path>, interval: Duration) -> GraphicsResult<Self> {
        let path = path.as_ref().to_path_buf();
        let time = file_time(&path)?;
        log::debug!("[FileWatch::new] Watching {} (interval {:?})", path.display(), interval);
        Ok(Self {
            path,
            time,
            interval,
            last_poll: Instant::now(),
        })
    }

    /// Returns true when the file changed since the last observed time.
    /// Calls within the poll interval return false without touching the disk.
    pub fn check(&mut self) -> bool {
        if self.last_poll.elapsed() < self.interval {
            return false;
        }
        self.poll()
    }

    /// Query the file immediately, ignoring the poll interval
    pub fn poll(&mut self) -> bool {
        self.last_poll = Instant::now();
        match file_time(&self.path) {
            Ok(time) if time != self.time => {
                log::debug!("[FileWatch::poll] {} changed", self.path.display());
                self.time = time;
                true
            }
            Ok(_) => false,
            Err(e) => {
                // Editors often replace files by rename; the next poll sees the new file
                log::debug!("[FileWatch::poll] {}", e);
                false
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn time(&self) -> FileTime {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn touch(path: &Path, secs: u64) {
        let file = File::options().write(true).open(path).expect("open");
        file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))
            .expect("set mtime");
    }

    #[test]
    fn file_time_halves_round_trip() {
        let t = FileTime::from_system_time(UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        assert_eq!(t.ticks(), 1_700_000_000u64 * 10_000_000);
        assert_eq!(FileTime::from_parts(t.low, t.high), t);
    }

    #[test]
    fn detects_modification() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("shader.wgsl");
        File::create(&path).and_then(|mut f| f.write_all(b"a")).expect("write");
        touch(&path, 1000);

        let mut watch = FileWatch::new(&path, Duration::ZERO).expect("watch");
        assert!(!watch.check());

        touch(&path, 2000);
        assert!(watch.check());
        // The change is reported exactly once
        assert!(!watch.check());
    }

    #[test]
    fn interval_throttles_polling() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("shader.wgsl");
        File::create(&path).expect("create");
        touch(&path, 1000);

        let mut watch = FileWatch::new(&path, Duration::from_secs(3600)).expect("watch");
        touch(&path, 2000);
        assert!(!watch.check());
        assert!(watch.poll());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = TempDir::new().expect("tempdir");
        let err = FileWatch::new(dir.path().join("missing.wgsl"), Duration::ZERO).unwrap_err();
        assert!(matches!(err, GraphicsError::IoError { .. }));
    }
}
