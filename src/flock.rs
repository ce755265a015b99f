//! Advisory lock on the database directory.
//!
//! A `LOCK` file guards the directory against a second process opening the
//! same database. The lock is advisory: it is taken with `flock` on unix
//! and `LockFileEx` on windows, and released when the handle drops. The
//! file itself is left behind so takeover checks can read its age.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::error::{Error, Result};

pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquires the lock, failing fast if another process holds it.
    ///
    /// When `stale_after` is nonzero and the lock is held, a lock file
    /// whose mtime is older than that many milliseconds is treated as
    /// abandoned: it is removed and the acquisition retried once.
    pub fn acquire<P: AsRef<Path>>(path: P, stale_after: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        match Self::lock_once(&path) {
            Ok(lock) => Ok(lock),
            Err(err) if stale_after > 0 && Self::is_stale(&path, stale_after) => {
                std::fs::remove_file(&path)?;
                Self::lock_once(&path).map_err(|_| err)
            }
            Err(err) => Err(err),
        }
    }

    fn lock_once(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        Self::try_lock(&file)
            .map_err(|e| Error::LockFailure(format!("{}: {e}", path.display())))?;

        // Record the holder's pid for debugging.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    fn is_stale(path: &Path, stale_after: u64) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        let Ok(mtime) = meta.modified() else {
            return false;
        };
        match SystemTime::now().duration_since(mtime) {
            Ok(age) => age > Duration::from_millis(stale_after),
            Err(_) => false,
        }
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> io::Result<()> {
        use std::os::windows::io::AsRawHandle;
        use winapi::um::fileapi::LockFileEx;
        use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

        let handle = file.as_raw_handle();
        let mut overlapped = unsafe { std::mem::zeroed() };
        let result = unsafe {
            LockFileEx(
                handle as *mut _,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                !0,
                !0,
                &mut overlapped,
            )
        };

        if result == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> io::Result<()> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // The OS releases the lock when the handle closes. The file stays
        // so a later takeover check can inspect its mtime.
    }
}
