use std::{
    fs::{File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;

use super::Closable;

/// A file that can be closed to give back its descriptor and reopened by path.
///
/// The file is created if missing when the item is first opened. Reopening never
/// creates or truncates, so a file removed while the item was closed makes the
/// reopen fail instead of silently starting over with an empty file.
#[derive(Debug)]
pub struct FileItem {
    path: PathBuf,
    writable: bool,
    file: RwLock<Option<File>>,
}

impl FileItem {
    /// Open `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            writable: false,
            file: RwLock::new(Some(file)),
        })
    }

    /// Open `path` for reading and writing, creating it if it does not exist.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        Ok(Self {
            path,
            writable: true,
            file: RwLock::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the open file.
    ///
    /// Fails with [`io::ErrorKind::NotConnected`] if the item is closed. Callers that
    /// hold the item through an acquisition always see it open.
    pub fn with_file<R, F>(&self, f: F) -> io::Result<R>
    where
        F: FnOnce(&File) -> io::Result<R>,
    {
        let guard = self.file.read();
        match guard.as_ref() {
            Some(file) => f(file),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "file item is closed",
            )),
        }
    }
}

impl Closable for FileItem {
    fn is_open(&self) -> bool {
        self.file.read().is_some()
    }

    fn close(&self) {
        // Dropping the handle closes the descriptor.
        self.file.write().take();
    }

    fn reopen(&self) -> io::Result<()> {
        let mut guard = self.file.write();
        if guard.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(self.writable)
                .open(&self.path)?;
            *guard = Some(file);
        }
        Ok(())
    }
}
