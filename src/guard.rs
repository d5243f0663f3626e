use std::{
    fs::{self, File, OpenOptions, TryLockError},
    io::Write,
    path::{Path, PathBuf},
};

use crate::error::Error;

/// Process-level mutual exclusion for one monitoring invocation.
///
/// Takes a non-blocking exclusive advisory lock on a well-known lock file.
/// If another invocation already holds it, `acquire` reports that
/// immediately instead of waiting; the caller must then abort without
/// touching the state store. The lock is released when the guard drops or
/// the process exits.
pub struct RunGuard {
    file: File,
    path: PathBuf,
}

impl RunGuard {
    pub fn acquire<P: Into<PathBuf>>(path: P) -> Result<Option<RunGuard>, Error> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {
                let mut guard = RunGuard { file, path };
                guard.record_pid()?;
                Ok(Some(guard))
            }
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // The pid is informational, for an operator inspecting a stale-looking
    // lock file; the advisory lock is what actually excludes.
    fn record_pid(&mut self) -> Result<(), Error> {
        self.file.set_len(0)?;
        writeln!(self.file, "{}", std::process::id())?;
        self.file.flush()?;
        Ok(())
    }
}
