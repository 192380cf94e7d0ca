use std::io::Write;
use std::path::PathBuf;

use log::info;
use thiserror::Error;

use crate::chart::CHART_BASE_DIR;
use crate::engine::{self, ContainerEngine, Mount, RunSpec};
use crate::shell::quote_arg;

/// Helm upgrade or install activity name.
pub const UPGRADE_INSTALL_ACTIVITY_NAME: &str = "HelmUpgradeInstall";

#[derive(Error, Debug)]
pub enum Error {
    /// The helm process ran and exited non-zero. Never retried:
    /// `--cleanup-on-fail` already rolled the release back, and re-running
    /// with the same inputs would only mask a configuration error.
    #[error("the helm command returned non-zero exit code {exit_code}")]
    UpgradeFailed { exit_code: i32 },

    #[error("unable to stage the cluster CA: {0}")]
    CAFile(std::io::Error),

    /// The engine never ran the release process. Infrastructure problem,
    /// distinct from a failed release.
    #[error("container engine: {0}")]
    Engine(#[from] engine::Error),
}

impl Error {
    pub fn retryable(&self) -> bool {
        !matches!(self, Error::UpgradeFailed { .. })
    }
}

/// Parameters of the upgrade-install activity.
#[derive(Debug, Clone, Default)]
pub struct UpgradeInstallParams {
    /// Local path of the cloned repository.
    pub repository_path: PathBuf,
    /// Machine-readable name for the application; also the release name.
    pub application_slug: String,
    /// Certificate authority for the Kubernetes API server connection.
    pub kubernetes_ca: String,
    /// Address and port of the Kubernetes API server.
    pub kubernetes_api_server: String,
    /// Bearer token used for authentication.
    pub kubernetes_token: String,
    /// Namespace scope for upgrading or installing the chart.
    pub kubernetes_namespace: String,
}

/// Runs the containerized release-management process. The process exit code
/// is the sole success signal.
pub struct Installer {
    image: String,
    dependency_repository_name: String,
    dependency_repository_url: String,
}

impl Installer {
    pub fn new(
        image: String,
        dependency_repository_name: String,
        dependency_repository_url: String,
    ) -> Self {
        Self {
            image,
            dependency_repository_name,
            dependency_repository_url,
        }
    }

    /// The in-container command sequence: chart dependencies first, then the
    /// release itself. One container keeps the repo config alive between
    /// the helm invocations.
    fn script(&self, params: &UpgradeInstallParams) -> String {
        [
            format!(
                "helm repo add {} {}",
                quote_arg(&self.dependency_repository_name),
                quote_arg(&self.dependency_repository_url)
            ),
            "helm dependency build".to_string(),
            format!(
                "helm --namespace {} upgrade --install --cleanup-on-fail {} .",
                quote_arg(&params.kubernetes_namespace),
                quote_arg(&params.application_slug)
            ),
        ]
        .join(" && ")
    }

    /// Upgrade the existing release or install a new one if it doesn't
    /// exist. The bearer token rides the engine's secret environment and is
    /// never written to a file or logged.
    pub async fn upgrade_install<E: ContainerEngine>(
        &self,
        engine: &E,
        params: &UpgradeInstallParams,
    ) -> Result<(), Error> {
        info!(
            "{}: releasing {} into namespace {}",
            UPGRADE_INSTALL_ACTIVITY_NAME, params.application_slug, params.kubernetes_namespace
        );

        let chart_path = params.repository_path.join(CHART_BASE_DIR).join("chart");

        // The CA material lives in a temp file for the duration of the run
        // and is mounted read-only into the container.
        let mut ca_file = tempfile::NamedTempFile::new().map_err(Error::CAFile)?;
        ca_file
            .write_all(params.kubernetes_ca.as_bytes())
            .map_err(Error::CAFile)?;
        ca_file.flush().map_err(Error::CAFile)?;

        let spec = RunSpec {
            image: self.image.clone(),
            workdir: "/chart".to_string(),
            mounts: vec![
                Mount {
                    host: chart_path,
                    container: "/chart".to_string(),
                    read_only: false,
                },
                Mount {
                    host: ca_file.path().to_path_buf(),
                    container: "/chart/ca.crt".to_string(),
                    read_only: true,
                },
            ],
            env: vec![
                (
                    "HELM_KUBEAPISERVER".to_string(),
                    params.kubernetes_api_server.clone(),
                ),
                ("HELM_KUBECAFILE".to_string(), "/chart/ca.crt".to_string()),
            ],
            secret_env: vec![(
                "HELM_KUBETOKEN".to_string(),
                params.kubernetes_token.clone(),
            )],
            entrypoint: Some("/bin/sh".to_string()),
            args: vec!["-c".to_string(), self.script(params)],
        };

        let exit_code = engine.run(&spec).await?;
        if exit_code != 0 {
            return Err(Error::UpgradeFailed { exit_code });
        }

        info!(
            "{}: release {} applied",
            UPGRADE_INSTALL_ACTIVITY_NAME, params.application_slug
        );
        Ok(())
    }
}
