use std::io;
use std::path::{Component, Path, PathBuf};

/// Filesystem capability handed to the workspace allocator and the source
/// fetcher. Paths are relative to the storage root; implementations must
/// refuse anything that would escape it.
pub trait Storage: Send + Sync {
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn exists(&self, path: &Path) -> bool;

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Map a scoped path to an absolute one, for handing to external
    /// processes that work on real directories.
    fn resolve(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Disk-backed storage rooted at a base directory.
pub struct LocalStorage {
    base: PathBuf,
}

impl LocalStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

fn scoped(base: &Path, path: &Path) -> io::Result<PathBuf> {
    let mut out = base.to_path_buf();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("path escapes storage root: {}", path.display()),
                ))
            }
        }
    }
    Ok(out)
}

impl Storage for LocalStorage {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(scoped(&self.base, path)?)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let target = scoped(&self.base, path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, contents)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(scoped(&self.base, path)?)
    }

    fn exists(&self, path: &Path) -> bool {
        scoped(&self.base, path)
            .map(|target| target.exists())
            .unwrap_or(false)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(scoped(&self.base, path)?)? {
            entries.push(entry?.path());
        }
        Ok(entries)
    }

    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        scoped(&self.base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage
            .write(Path::new("a/b/file.txt"), b"contents")
            .unwrap();

        assert!(storage.exists(Path::new("a/b/file.txt")));
        assert_eq!(storage.read(Path::new("a/b/file.txt")).unwrap(), b"contents");
    }

    #[test]
    fn rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let err = storage.write(Path::new("../escape"), b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(!storage.exists(Path::new("../escape")));
    }

    #[test]
    fn rejects_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        assert!(storage.resolve(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn list_dir_sees_created_entries() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.create_dir_all(Path::new("projects/one")).unwrap();
        storage.create_dir_all(Path::new("projects/two")).unwrap();

        let entries = storage.list_dir(Path::new("projects")).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
