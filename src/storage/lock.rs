// Advisory directory locks.
//
// Each writer directory and each segment directory carries a `_lock` file
// held under an exclusive OS advisory lock for the owner's lifetime.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Result, WalError};

pub const LOCK_FILE_NAME: &str = "_lock";

pub struct DirLock {
    path: PathBuf,
    file: File,
}

impl DirLock {
    /// Creates `<dir>/_lock` and takes an exclusive, non-blocking advisory
    /// lock on it. Fails with `WalError::Lock` when another process (or
    /// another writer in this process) holds the directory.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|source| WalError::Lock {
                path: path.clone(),
                source,
            })?;
        flock_exclusive(&file).map_err(|source| WalError::Lock {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = funlock(&self.file);
    }
}

#[cfg(unix)]
fn flock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn funlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn flock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn funlock(_file: &File) -> io::Result<()> {
    Ok(())
}
