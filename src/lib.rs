//! OnePaaS deployment worker core.
//!
//! Four units of work, sequenced by [`pipeline::Pipeline`]: clone one
//! reference of an application repository into an isolated workspace, build
//! and publish its container image, materialize a deployment chart, and
//! upgrade or install the release in a target cluster. Each unit is
//! independently invocable so an external execution substrate can schedule
//! and retry them under its own policy.

use thiserror::Error;

pub mod chart;
pub mod config;
pub mod docker;
pub mod engine;
pub mod git;
pub mod helm;
pub mod pipeline;
pub mod shell;
pub mod storage;
pub mod workspace;

/// Errors from the units of work, as surfaced to the execution substrate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("workspace: {0}")]
    Workspace(#[from] workspace::Error),

    #[error("git: {0}")]
    Git(#[from] git::Error),

    #[error("docker: {0}")]
    Docker(#[from] docker::Error),

    #[error("chart: {0}")]
    Chart(#[from] chart::Error),

    #[error("helm: {0}")]
    Helm(#[from] helm::Error),

    /// A single attempt outlived its deadline. The cancelled step counts as
    /// failed, never as succeeded with unknown outcome.
    #[error("{activity} exceeded its attempt deadline")]
    DeadlineExceeded { activity: &'static str },
}

impl Error {
    /// Whether the substrate may re-attempt the operation with the same
    /// inputs. Input errors, chart filesystem errors and a non-zero release
    /// exit code never qualify.
    pub fn retryable(&self) -> bool {
        match self {
            Error::Workspace(_) => false,
            Error::Git(err) => err.retryable(),
            Error::Docker(_) => true,
            Error::Chart(_) => false,
            Error::Helm(err) => err.retryable(),
            Error::DeadlineExceeded { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_matches_the_error_taxonomy() {
        assert!(!Error::Git(git::Error::NoReferenceSpecified).retryable());
        assert!(Error::Git(git::Error::IOError(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )))
        .retryable());

        assert!(Error::Docker(docker::Error::Engine(engine::Error::IOError(
            std::io::Error::new(std::io::ErrorKind::NotFound, "docker not found"),
        )))
        .retryable());

        assert!(!Error::Chart(chart::Error::UnresolvedPlaceholder {
            asset: "chart/Chart.yaml.tpl".to_string(),
            placeholder: "{{x}}".to_string(),
        })
        .retryable());

        assert!(!Error::Helm(helm::Error::UpgradeFailed { exit_code: 1 }).retryable());
        assert!(Error::Helm(helm::Error::Engine(engine::Error::IOError(
            std::io::Error::new(std::io::ErrorKind::NotFound, "docker not found"),
        )))
        .retryable());

        assert!(Error::DeadlineExceeded {
            activity: "GitClone"
        }
        .retryable());
    }
}
