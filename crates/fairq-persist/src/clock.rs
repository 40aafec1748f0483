//! The decay clock file: an 8-byte little-endian epoch timestamp.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{PersistError, PersistResult};

/// File name of the decay clock inside the state directory.
pub const DECAY_CLOCK_FILE: &str = "priority_last_decay_ran";

/// Persists the wall-clock instant of the last successful decay tick.
#[derive(Debug, Clone)]
pub struct DecayClock {
    base: PathBuf,
}

impl DecayClock {
    /// A clock stored under the given state directory.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            base: state_dir.join(DECAY_CLOCK_FILE),
        }
    }

    /// Path of the current clock file.
    pub fn path(&self) -> &Path {
        &self.base
    }

    /// Read the persisted timestamp.
    ///
    /// Returns 0 when the file is absent (first ever tick) or unreadable;
    /// a corrupt clock only costs the catch-up decay, never startup.
    pub fn load(&self) -> u64 {
        let mut file = match File::open(&self.base) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.base, "no decay clock yet");
                return 0;
            }
            Err(e) => {
                warn!(path = ?self.base, error = %e, "failed to open decay clock");
                return 0;
            }
        };

        let mut buf = [0u8; 8];
        match file.read_exact(&mut buf) {
            Ok(()) => {
                let timestamp = u64::from_le_bytes(buf);
                debug!(timestamp, "decay clock loaded");
                timestamp
            }
            Err(e) => {
                warn!(path = ?self.base, error = %e, "decay clock truncated or unreadable");
                0
            }
        }
    }

    /// Persist a timestamp via atomic swap.
    ///
    /// Writes `<base>.new`, fsyncs, promotes the current file to
    /// `<base>.old`, then renames `<base>.new` into place. A failure at
    /// any step leaves the current file untouched.
    pub fn store(&self, timestamp: u64) -> PersistResult<()> {
        let new_path = sibling(&self.base, "new");
        let old_path = sibling(&self.base, "old");

        let mut file =
            File::create(&new_path).map_err(|e| PersistError::Write(e.to_string()))?;
        file.write_all(&timestamp.to_le_bytes())
            .map_err(|e| PersistError::Write(e.to_string()))?;
        file.sync_all()
            .map_err(|e| PersistError::Write(e.to_string()))?;
        drop(file);

        match fs::rename(&self.base, &old_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PersistError::Swap(e.to_string())),
        }
        fs::rename(&new_path, &self.base).map_err(|e| PersistError::Swap(e.to_string()))?;

        debug!(timestamp, path = ?self.base, "decay clock stored");
        Ok(())
    }
}

fn sibling(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_absent_returns_zero() {
        let dir = tempfile::tempdir().unwrap();
        let clock = DecayClock::new(dir.path());
        assert_eq!(clock.load(), 0);
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let clock = DecayClock::new(dir.path());

        clock.store(1_700_000_000).unwrap();
        assert_eq!(clock.load(), 1_700_000_000);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let clock = DecayClock::new(dir.path());
            clock.store(42).unwrap();
        }
        let clock = DecayClock::new(dir.path());
        assert_eq!(clock.load(), 42);
    }

    #[test]
    fn rewrite_promotes_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let clock = DecayClock::new(dir.path());

        clock.store(100).unwrap();
        clock.store(200).unwrap();

        assert_eq!(clock.load(), 200);
        let old = std::fs::read(dir.path().join("priority_last_decay_ran.old")).unwrap();
        assert_eq!(u64::from_le_bytes(old.try_into().unwrap()), 100);
        // The scratch file is gone once the swap completes.
        assert!(!dir.path().join("priority_last_decay_ran.new").exists());
    }

    #[test]
    fn truncated_file_loads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let clock = DecayClock::new(dir.path());
        std::fs::write(clock.path(), [1, 2, 3]).unwrap();

        assert_eq!(clock.load(), 0);
    }

    #[test]
    fn leftover_scratch_file_is_ignored_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let clock = DecayClock::new(dir.path());

        // Simulate a crash after writing `.new` but before the swap.
        std::fs::write(dir.path().join("priority_last_decay_ran.new"), 7u64.to_le_bytes())
            .unwrap();
        assert_eq!(clock.load(), 0);

        clock.store(300).unwrap();
        assert_eq!(clock.load(), 300);
    }
}
