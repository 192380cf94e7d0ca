use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use log::{debug, info};
use thiserror::Error;

use crate::storage::Storage;
use crate::workspace::Workspace;

/// Git clone activity name, as registered with the execution substrate.
pub const CLONE_ACTIVITY_NAME: &str = "GitClone";

#[derive(Error, Debug)]
pub enum Error {
    /// Caller input error: none of branch, tag or raw ref was given.
    /// Must never be retried; the same request cannot resolve differently.
    #[error("no reference specified")]
    NoReferenceSpecified,

    #[error("git {action} failed with exit code {status}")]
    Git {
        action: &'static str,
        status: std::process::ExitStatus,
    },

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

impl Error {
    /// Transport and launch failures are expected to be transient; the
    /// missing-reference case is not.
    pub fn retryable(&self) -> bool {
        !matches!(self, Error::NoReferenceSpecified)
    }
}

/// A resolved pointer into the source control system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceReference {
    Branch(String),
    Tag(String),
    /// A raw ref string, e.g. `refs/changes/04/691202/5`.
    Raw(String),
}

impl SourceReference {
    /// Resolve request fields to a single reference.
    ///
    /// Tie-break when several fields are set: first non-empty wins, in the
    /// order branch, tag, raw ref.
    pub fn resolve(branch: &str, tag: &str, raw: &str) -> Result<Self, Error> {
        if !branch.is_empty() {
            Ok(Self::Branch(branch.to_string()))
        } else if !tag.is_empty() {
            Ok(Self::Tag(tag.to_string()))
        } else if !raw.is_empty() {
            Ok(Self::Raw(raw.to_string()))
        } else {
            Err(Error::NoReferenceSpecified)
        }
    }

    /// Fully qualified ref name.
    pub fn ref_name(&self) -> String {
        match self {
            Self::Branch(name) => format!("refs/heads/{name}"),
            Self::Tag(name) => format!("refs/tags/{name}"),
            Self::Raw(name) => name.clone(),
        }
    }
}

/// Result of the clone activity.
#[derive(Debug, Clone)]
pub struct CloneOutcome {
    pub repository_path: PathBuf,
}

/// Source-control transport. The wire protocol is the collaborator's
/// concern; this crate only needs a shallow single-reference clone.
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync {
    async fn clone_shallow(
        &self,
        url: &str,
        reference: &SourceReference,
        worktree: &Path,
    ) -> Result<(), Error>;
}

/// Transport backed by the `git` command line client.
pub struct GitCli;

impl GitCli {
    async fn run(&self, action: &'static str, args: &[&str]) -> Result<(), Error> {
        debug!("git {}", args.join(" "));
        let status = tokio::process::Command::new("git")
            .args(args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Git { action, status })
        }
    }
}

impl Transport for GitCli {
    async fn clone_shallow(
        &self,
        url: &str,
        reference: &SourceReference,
        worktree: &Path,
    ) -> Result<(), Error> {
        let dest = worktree.to_string_lossy();
        match reference {
            SourceReference::Branch(name) | SourceReference::Tag(name) => {
                self.run(
                    "clone",
                    &[
                        "clone",
                        "--depth",
                        "1",
                        "--single-branch",
                        "--branch",
                        name,
                        url,
                        &dest,
                    ],
                )
                .await
            }
            // `--branch` only accepts branch and tag names; a raw ref is
            // fetched directly and checked out detached. Still depth 1,
            // still one reference.
            SourceReference::Raw(reference) => {
                self.run("init", &["init", &dest]).await?;
                self.run(
                    "fetch",
                    &["-C", &dest, "fetch", "--depth", "1", url, reference],
                )
                .await?;
                self.run("checkout", &["-C", &dest, "checkout", "--detach", "FETCH_HEAD"])
                    .await
            }
        }
    }
}

/// Clones one reference into an allocated workspace.
pub struct Fetcher<'a, T: Transport> {
    storage: &'a dyn Storage,
    transport: &'a T,
}

impl<'a, T: Transport> Fetcher<'a, T> {
    pub fn new(storage: &'a dyn Storage, transport: &'a T) -> Self {
        Self { storage, transport }
    }

    /// Shallow depth-1 clone of `url` at `reference` into the workspace
    /// working tree. The object database lands under the workspace git dir.
    pub async fn fetch(
        &self,
        url: &str,
        reference: &SourceReference,
        workspace: &Workspace,
    ) -> Result<CloneOutcome, Error> {
        info!(
            "{}: cloning {} at {}",
            CLONE_ACTIVITY_NAME,
            url,
            reference.ref_name()
        );

        self.storage.create_dir_all(&workspace.rel_root())?;
        self.transport
            .clone_shallow(url, reference, &workspace.root)
            .await?;

        info!(
            "{}: repository ready at {}",
            CLONE_ACTIVITY_NAME,
            workspace.root.display()
        );

        Ok(CloneOutcome {
            repository_path: workspace.root.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_branch_over_tag_and_ref() {
        let reference = SourceReference::resolve("main", "v1.0.0", "refs/changes/1").unwrap();
        assert_eq!(reference, SourceReference::Branch("main".to_string()));
    }

    #[test]
    fn resolve_prefers_tag_over_ref() {
        let reference = SourceReference::resolve("", "v1.0.0", "refs/changes/1").unwrap();
        assert_eq!(reference, SourceReference::Tag("v1.0.0".to_string()));
    }

    #[test]
    fn resolve_falls_back_to_raw_ref() {
        let reference = SourceReference::resolve("", "", "refs/changes/04/691202/5").unwrap();
        assert_eq!(
            reference,
            SourceReference::Raw("refs/changes/04/691202/5".to_string())
        );
    }

    #[test]
    fn resolve_with_nothing_set_is_an_input_error() {
        let err = SourceReference::resolve("", "", "").unwrap_err();
        assert!(matches!(err, Error::NoReferenceSpecified));
        assert!(!err.retryable());
    }

    #[test]
    fn ref_names_are_fully_qualified() {
        assert_eq!(
            SourceReference::Branch("main".into()).ref_name(),
            "refs/heads/main"
        );
        assert_eq!(
            SourceReference::Tag("v1.0.0".into()).ref_name(),
            "refs/tags/v1.0.0"
        );
        assert_eq!(
            SourceReference::Raw("refs/changes/1".into()).ref_name(),
            "refs/changes/1"
        );
    }

    #[test]
    fn transport_errors_are_retryable() {
        let err = Error::IOError(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(err.retryable());
    }
}
