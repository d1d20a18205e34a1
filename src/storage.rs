use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Block storage the capture files are written to. Every call may fail;
/// closing a file is dropping it.
pub trait Storage {
    type File: Write;

    /// Opens `path` for writing, truncating anything already there.
    fn create(&self, path: &Path) -> io::Result<Self::File>;

    fn append(&self, path: &Path) -> io::Result<Self::File>;

    fn mkdir(&self, path: &Path) -> io::Result<()>;

    /// Cuts an existing file down to `len` bytes.
    fn truncate(&self, path: &Path, len: u64) -> io::Result<()>;
}

/// Storage rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }
}

impl Storage for FsStorage {
    type File = File;

    fn create(&self, path: &Path) -> io::Result<File> {
        File::create(self.resolve(path))
    }

    fn append(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.resolve(path))
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path))
    }

    fn truncate(&self, path: &Path, len: u64) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .open(self.resolve(path))?
            .set_len(len)
    }
}

/// Appends one line of text, opening and closing the file around it.
pub fn append_line<S: Storage>(storage: &S, path: &Path, line: &str) -> io::Result<()> {
    let mut file = storage.append(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_storage_resolves_absolute_paths_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        storage.mkdir(Path::new("/handshake")).unwrap();
        append_line(&storage, Path::new("/handshake/notes.txt"), "one\n").unwrap();
        append_line(&storage, Path::new("handshake/notes.txt"), "two\n").unwrap();

        let text = fs::read_to_string(dir.path().join("handshake/notes.txt")).unwrap();
        assert_eq!(text, "one\ntwo\n");
    }

    #[test]
    fn test_create_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        append_line(&storage, Path::new("f.bin"), "old contents").unwrap();
        let mut f = storage.create(Path::new("f.bin")).unwrap();
        f.write_all(b"new").unwrap();
        drop(f);
        assert_eq!(fs::read(dir.path().join("f.bin")).unwrap(), b"new");
    }

    #[test]
    fn test_truncate_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path());
        append_line(&storage, Path::new("f.txt"), "keep|fragment").unwrap();
        storage.truncate(Path::new("f.txt"), 5).unwrap();
        append_line(&storage, Path::new("f.txt"), "next").unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("f.txt")).unwrap(), "keep|next");
    }
}
