//! Cross-process lock file guarding the summary document

use crate::{FlowError, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive lock file; removed when dropped
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    token: Uuid,
}

impl LockFile {
    /// Create the lock file, polling until `deadline` while another holder owns it
    pub fn acquire(path: &Path, deadline: Instant, timeout: Duration) -> Result<Self> {
        let token = Uuid::new_v4();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    file.write_all(token.to_string().as_bytes())?;
                    debug!("Acquired lock {:?} ({})", path, token);
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(FlowError::LockTimeout(timeout));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Token written into the lock file by this holder
    pub fn token(&self) -> Uuid {
        self.token
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release lock {:?}: {}", self.path, e);
        }
    }
}
