use std::path::PathBuf;

use log::debug;
use thiserror::Error;
use uuid::Uuid;

use crate::storage::Storage;

/// Default base directory for per-run workspaces.
pub const PROJECTS_BASE_DIR: &str = "/tmp/projects";

#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to create the workspace directory: {0}")]
    Create(#[from] std::io::Error),
}

/// An isolated storage root for one pipeline run. Caller-owned: nothing
/// cleans it up automatically.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: Uuid,
    /// Absolute path of the working tree.
    pub root: PathBuf,
    /// Absolute path of the object store, nested under the working tree.
    pub git_dir: PathBuf,
}

impl Workspace {
    /// Workspace path relative to the storage root.
    pub fn rel_root(&self) -> PathBuf {
        PathBuf::from(self.id.to_string())
    }
}

/// Allocates uniquely named workspaces under a shared base directory.
pub struct Allocator<'a> {
    storage: &'a dyn Storage,
}

impl<'a> Allocator<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    /// Create a fresh workspace. Two calls never return the same path, so
    /// concurrent runs cannot observe each other's files. The working tree
    /// is created empty; the object store materializes when the clone runs.
    pub fn allocate(&self) -> Result<Workspace, Error> {
        let id = Uuid::new_v4();
        let rel = PathBuf::from(id.to_string());
        self.storage.create_dir_all(&rel)?;

        let root = self.storage.resolve(&rel)?;
        let git_dir = root.join(".git");
        debug!("workspace {} allocated at {}", id, root.display());

        Ok(Workspace { id, root, git_dir })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;

    #[test]
    fn allocations_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let allocator = Allocator::new(&storage);

        let first = allocator.allocate().unwrap();
        let second = allocator.allocate().unwrap();

        assert_ne!(first.id, second.id);
        assert_ne!(first.root, second.root);
    }

    #[test]
    fn runs_do_not_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let allocator = Allocator::new(&storage);

        let first = allocator.allocate().unwrap();
        let second = allocator.allocate().unwrap();

        std::fs::write(first.root.join("marker"), b"one").unwrap();
        assert!(!second.root.join("marker").exists());
    }

    #[test]
    fn git_dir_nests_under_the_working_tree() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let workspace = Allocator::new(&storage).allocate().unwrap();
        assert!(workspace.git_dir.starts_with(&workspace.root));
        assert_eq!(workspace.git_dir.file_name().unwrap(), ".git");
    }
}
