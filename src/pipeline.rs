use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Deserialize;
use thiserror::Error;

use crate::chart::{self, ChartValues, Materializer};
use crate::config;
use crate::docker::{self, BuildAndPublishParams};
use crate::engine::ContainerEngine;
use crate::git::{self, Fetcher, SourceReference, Transport};
use crate::helm::{self, Installer, UpgradeInstallParams};
use crate::storage::Storage;
use crate::workspace::Allocator;

/// Deployment workflow name, as registered with the execution substrate.
pub const WORKFLOW_NAME: &str = "DeployApplication";

/// The deployment request driving one pipeline run. Exactly one of branch,
/// tag and ref must be set; empty registry, dockerfile and image tag fields
/// fall back to the build activity's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeployParams {
    pub repository_url: String,
    pub repository_branch: String,
    pub repository_tag: String,
    pub repository_ref: String,
    pub registry_address: String,
    pub registry_username: String,
    pub registry_secret: String,
    pub image_repository: String,
    pub image_tag: String,
    pub dockerfile: String,
    pub application_name: String,
    pub application_slug: String,
    pub application_hostname: String,
    pub kubernetes_ingress_class: String,
    pub kubernetes_ca: String,
    pub kubernetes_token: String,
    pub kubernetes_api_server: String,
    pub kubernetes_namespace: String,
}

impl DeployParams {
    /// Image build/publish parameters, rooted at the cloned repository.
    pub fn build_params(&self, repository_path: PathBuf) -> BuildAndPublishParams {
        BuildAndPublishParams {
            work_directory: repository_path,
            dockerfile: self.dockerfile.clone(),
            registry_address: self.registry_address.clone(),
            registry_username: self.registry_username.clone(),
            registry_secret: self.registry_secret.clone(),
            image_repository: self.image_repository.clone(),
            image_tag: self.image_tag.clone(),
        }
    }

    /// Chart substitution values. Registry and tag are the defaulted values
    /// the image was actually published under.
    pub fn chart_values(&self) -> ChartValues {
        let build = self.build_params(PathBuf::new());
        ChartValues {
            application_name: self.application_name.clone(),
            application_slug: self.application_slug.clone(),
            application_hostname: self.application_hostname.clone(),
            image_registry: build.registry_or_default().to_string(),
            image_repository: self.image_repository.clone(),
            image_tag: build.tag_or_default().to_string(),
            kubernetes_ingress_class: self.kubernetes_ingress_class.clone(),
        }
    }

    /// Release parameters, rooted at the cloned repository.
    pub fn upgrade_install_params(&self, repository_path: PathBuf) -> UpgradeInstallParams {
        UpgradeInstallParams {
            repository_path,
            application_slug: self.application_slug.clone(),
            kubernetes_ca: self.kubernetes_ca.clone(),
            kubernetes_api_server: self.kubernetes_api_server.clone(),
            kubernetes_token: self.kubernetes_token.clone(),
            kubernetes_namespace: self.kubernetes_namespace.clone(),
        }
    }
}

/// Pipeline states, entered in strict linear order. `Failed` is terminal
/// and reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    Cloning,
    Building,
    ChartPending,
    Releasing,
    Done,
    Failed,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            State::Start => "Start",
            State::Cloning => "Cloning",
            State::Building => "Building",
            State::ChartPending => "ChartPending",
            State::Releasing => "Releasing",
            State::Done => "Done",
            State::Failed => "Failed",
        })
    }
}

/// Execution policy supplied to the substrate: one bounded attempt per
/// step. Retries beyond that are the substrate's decision, never this
/// pipeline's.
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    pub schedule_to_close: Duration,
    pub start_to_close: Duration,
    pub maximum_attempts: u32,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            schedule_to_close: Duration::from_secs(60 * 60),
            start_to_close: Duration::from_secs(10 * 60),
            maximum_attempts: 1,
        }
    }
}

impl From<&config::Timeouts> for ActivityOptions {
    fn from(timeouts: &config::Timeouts) -> Self {
        Self {
            schedule_to_close: Duration::from_secs(timeouts.schedule_to_close_minutes * 60),
            start_to_close: Duration::from_secs(timeouts.start_to_close_minutes * 60),
            maximum_attempts: timeouts.maximum_attempts,
        }
    }
}

/// A pipeline failure: the stage that failed and the underlying error.
#[derive(Error, Debug)]
#[error("deployment failed during {stage}: {error}")]
pub struct Failure {
    pub stage: State,
    pub error: crate::Error,
}

/// Terminal result of a successful run.
#[derive(Debug)]
pub struct Outcome {
    pub repository_path: PathBuf,
    pub image_address: String,
    /// States entered, in order, ending with `Done`.
    pub states: Vec<State>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Sequences the four units of work. Strictly linear, no branching, no
/// parallelism; the first failure aborts everything after it. The
/// repository path produced by the clone is threaded unchanged into every
/// later step.
pub struct Pipeline<'a, T: Transport, E: ContainerEngine> {
    storage: &'a dyn Storage,
    transport: &'a T,
    engine: &'a E,
    materializer: Materializer,
    installer: Installer,
    options: ActivityOptions,
}

impl<'a, T: Transport, E: ContainerEngine> Pipeline<'a, T, E> {
    pub fn new(
        storage: &'a dyn Storage,
        transport: &'a T,
        engine: &'a E,
        materializer: Materializer,
        installer: Installer,
        options: ActivityOptions,
    ) -> Self {
        Self {
            storage,
            transport,
            engine,
            materializer,
            installer,
            options,
        }
    }

    pub async fn deploy(&self, params: &DeployParams) -> Result<Outcome, Failure> {
        let started_at = Utc::now();
        let mut states = Vec::new();
        info!(
            "{}: run started for {} ({} attempt per step, {}s per attempt, {}s overall)",
            WORKFLOW_NAME,
            params.application_slug,
            self.options.maximum_attempts,
            self.options.start_to_close.as_secs(),
            self.options.schedule_to_close.as_secs()
        );

        // Cloning. The reference resolves before anything touches disk: an
        // unresolvable request is a caller error and allocates no workspace.
        let reference = match SourceReference::resolve(
            &params.repository_branch,
            &params.repository_tag,
            &params.repository_ref,
        ) {
            Ok(reference) => reference,
            Err(err) => return Err(self.fail(&mut states, State::Cloning, err.into())),
        };
        let workspace = match Allocator::new(self.storage).allocate() {
            Ok(workspace) => workspace,
            Err(err) => return Err(self.fail(&mut states, State::Cloning, err.into())),
        };
        let fetcher = Fetcher::new(self.storage, self.transport);
        let clone = self
            .step(
                &mut states,
                State::Cloning,
                git::CLONE_ACTIVITY_NAME,
                fetcher.fetch(&params.repository_url, &reference, &workspace),
            )
            .await?;
        let repository_path = clone.repository_path;

        // Building. Publishes the image; the only output is the side effect.
        let build_params = params.build_params(repository_path.clone());
        let image_address = build_params.publish_address();
        self.step(
            &mut states,
            State::Building,
            docker::BUILD_AND_PUBLISH_ACTIVITY_NAME,
            docker::build_and_publish(self.engine, &build_params),
        )
        .await?;

        // ChartPending. Records what was actually published.
        let values = params.chart_values();
        self.step(
            &mut states,
            State::ChartPending,
            chart::CREATE_CHART_ACTIVITY_NAME,
            async { self.materializer.materialize(&repository_path, &values) },
        )
        .await?;

        // Releasing.
        let upgrade = params.upgrade_install_params(repository_path.clone());
        self.step(
            &mut states,
            State::Releasing,
            helm::UPGRADE_INSTALL_ACTIVITY_NAME,
            self.installer.upgrade_install(self.engine, &upgrade),
        )
        .await?;

        states.push(State::Done);
        let finished_at = Utc::now();
        info!("{}: run complete, image {}", WORKFLOW_NAME, image_address);

        Ok(Outcome {
            repository_path,
            image_address,
            states,
            started_at,
            finished_at,
        })
    }

    /// Run one unit of work under the single-attempt deadline. A lapsed
    /// deadline cancels the in-flight work and counts as failure, never as
    /// success with unknown outcome.
    async fn step<V, Err, F>(
        &self,
        states: &mut Vec<State>,
        stage: State,
        activity: &'static str,
        work: F,
    ) -> Result<V, Failure>
    where
        Err: Into<crate::Error>,
        F: std::future::Future<Output = Result<V, Err>>,
    {
        if states.last() != Some(&stage) {
            states.push(stage);
        }
        info!("{}: entering {}", WORKFLOW_NAME, stage);

        match tokio::time::timeout(self.options.start_to_close, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(self.fail(states, stage, err.into())),
            Err(_) => Err(self.fail(
                states,
                stage,
                crate::Error::DeadlineExceeded { activity },
            )),
        }
    }

    fn fail(&self, states: &mut Vec<State>, stage: State, error: crate::Error) -> Failure {
        if states.last() != Some(&stage) {
            states.push(stage);
        }
        states.push(State::Failed);
        error!("{}: {} failed: {}", WORKFLOW_NAME, stage, error);
        Failure { stage, error }
    }
}
