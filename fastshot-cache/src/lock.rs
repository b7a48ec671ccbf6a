use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::error::Error;

/// Advisory lock on `<cache-root>/cache_lock` (I6). Exclusive acquisition
/// serializes writers across processes; readers never block on it.
///
/// Modeled on `peoci::blobcache`'s use of `rustix::fs::flock`, but that
/// crate only ever runs inside a Linux container, so it never needed the
/// non-Unix branch this type carries.
pub struct CacheLock {
    _file: File,
}

impl CacheLock {
    /// Blocks until the exclusive lock is acquired.
    pub fn acquire_exclusive(path: &Path) -> Result<Self, Error> {
        let file = open_lock_file(path)?;
        lock_exclusive(&file)?;
        Ok(Self { _file: file })
    }

    /// Returns `Ok(None)` instead of blocking when another writer holds
    /// the lock, used by callers that want to fail fast (§4.3 "at most one
    /// writer").
    pub fn try_acquire_exclusive(path: &Path) -> Result<Option<Self>, Error> {
        let file = open_lock_file(path)?;
        if try_lock_exclusive(&file)? {
            Ok(Some(Self { _file: file }))
        } else {
            Ok(None)
        }
    }
}

fn open_lock_file(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).write(true).open(path)
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> Result<(), Error> {
    use std::os::fd::AsFd;
    rustix::fs::flock(file.as_fd(), rustix::fs::FlockOperation::LockExclusive)
        .map_err(std::io::Error::from)?;
    Ok(())
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> Result<bool, Error> {
    use std::os::fd::AsFd;
    match rustix::fs::flock(file.as_fd(), rustix::fs::FlockOperation::NonBlockingLockExclusive) {
        Ok(()) => Ok(true),
        Err(rustix::io::Errno::WOULDBLOCK) => Ok(false),
        Err(e) => Err(Error::Io(e.into())),
    }
}

// `rustix::fs::flock` is Unix-only; a desktop build targeting Windows needs
// a `LockFileEx`-based equivalent (via the `fs4` crate, which nothing in
// the pack pulls in yet) before this crate can claim cross-process write
// safety there. Tracked as a follow-up rather than faked -- on a non-Unix
// target this stub grants the lock unconditionally, so only single-process,
// single-writer usage is safe until the Windows path lands.
#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> Result<(), Error> {
    Ok(())
}

#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> Result<bool, Error> {
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_lock_excludes_second_try_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache_lock");
        let first = CacheLock::acquire_exclusive(&path).unwrap();
        #[cfg(unix)]
        {
            let second = CacheLock::try_acquire_exclusive(&path).unwrap();
            assert!(second.is_none());
        }
        drop(first);
        let third = CacheLock::try_acquire_exclusive(&path).unwrap();
        assert!(third.is_some());
    }
}
