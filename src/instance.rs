//! System-wide single instance lock.

use tracing::debug;

use crate::error::{Error, Result};

/// Held for as long as this process is the only running instance.
pub struct InstanceLock {
    _lock: imp::Lock,
}

impl InstanceLock {
    /// Try to become the only running instance.
    ///
    /// Returns `None` if another process already holds the lock called `name`.
    pub fn acquire(name: &str) -> Result<Option<Self>> {
        let lock = imp::acquire(name).map_err(Error::InstanceLock)?;
        debug!("Instance lock `{}` acquired: {}", name, lock.is_some());
        Ok(lock.map(|lock| Self { _lock: lock }))
    }
}

#[cfg(unix)]
mod imp {
    use std::env;
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::unix::io::AsRawFd;

    /// Exclusive `flock` on a file in the temporary directory, released when the file closes.
    pub struct Lock {
        _file: File,
    }

    pub fn acquire(name: &str) -> io::Result<Option<Lock>> {
        let path = env::temp_dir().join(format!("{}.lock", name));
        let file = OpenOptions::new().create(true).write(true).truncate(false).open(path)?;

        // SAFETY: The descriptor is owned by `file` and stays open while the lock is held.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
            return Ok(Some(Lock { _file: file }));
        }

        match io::Error::last_os_error() {
            err if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            err => Err(err),
        }
    }
}

#[cfg(windows)]
mod imp {
    use std::io;
    use std::ptr;

    use windows_sys::Win32::Foundation::{
        CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE, TRUE,
    };
    use windows_sys::Win32::System::Threading::{CreateMutexW, ReleaseMutex};

    /// Owned named mutex.
    pub struct Lock {
        handle: HANDLE,
    }

    pub fn acquire(name: &str) -> io::Result<Option<Lock>> {
        let name: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();

        // SAFETY: `name` is a NUL-terminated wide string.
        let handle = unsafe { CreateMutexW(ptr::null(), TRUE, name.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: Called directly after `CreateMutexW`.
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            // SAFETY: `handle` is a valid handle we no longer use.
            unsafe { CloseHandle(handle) };
            return Ok(None);
        }

        Ok(Some(Lock { handle }))
    }

    impl Drop for Lock {
        fn drop(&mut self) {
            // SAFETY: The mutex was created with initial ownership by this thread.
            unsafe {
                ReleaseMutex(self.handle);
                CloseHandle(self.handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn second_instance_is_rejected() {
        let name = format!("nvdv-test-{}", std::process::id());

        let first = InstanceLock::acquire(&name).unwrap();
        assert!(first.is_some());
        assert!(InstanceLock::acquire(&name).unwrap().is_none());

        drop(first);
        assert!(InstanceLock::acquire(&name).unwrap().is_some());

        let _ = std::fs::remove_file(std::env::temp_dir().join(format!("{}.lock", name)));
    }
}
