use std::path::PathBuf;

use log::info;
use thiserror::Error;

use crate::engine::{self, ContainerEngine};

/// Docker build and publish activity name.
pub const BUILD_AND_PUBLISH_ACTIVITY_NAME: &str = "DockerBuildAndPublish";

pub const DEFAULT_DOCKERFILE_PATH: &str = "./Dockerfile";
pub const DEFAULT_REGISTRY_ADDRESS: &str = "docker.io";
pub const DEFAULT_IMAGE_TAG: &str = "latest";

#[derive(Error, Debug)]
pub enum Error {
    /// Build and push failures are expected to be transient registry or
    /// network trouble; the substrate may retry all of them.
    #[error("container engine: {0}")]
    Engine(#[from] engine::Error),
}

/// Parameters of the build-and-publish activity.
#[derive(Debug, Clone, Default)]
pub struct BuildAndPublishParams {
    /// Directory used as the build context.
    pub work_directory: PathBuf,
    /// Path to the Dockerfile relative to the work directory. Empty means
    /// `./Dockerfile`.
    pub dockerfile: String,
    /// Address of the container image registry. Empty means `docker.io`.
    pub registry_address: String,
    pub registry_username: String,
    pub registry_secret: String,
    /// Storage location holding all versions of the image.
    pub image_repository: String,
    /// Version of the image within the repository. Empty means `latest`.
    pub image_tag: String,
}

impl BuildAndPublishParams {
    pub fn dockerfile_or_default(&self) -> &str {
        if self.dockerfile.is_empty() {
            DEFAULT_DOCKERFILE_PATH
        } else {
            &self.dockerfile
        }
    }

    pub fn registry_or_default(&self) -> &str {
        if self.registry_address.is_empty() {
            DEFAULT_REGISTRY_ADDRESS
        } else {
            &self.registry_address
        }
    }

    pub fn tag_or_default(&self) -> &str {
        if self.image_tag.is_empty() {
            DEFAULT_IMAGE_TAG
        } else {
            &self.image_tag
        }
    }

    /// Full address the image is published under.
    pub fn publish_address(&self) -> String {
        format!(
            "{}/{}:{}",
            self.registry_or_default(),
            self.image_repository,
            self.tag_or_default()
        )
    }
}

/// Build a container image from the work directory and publish it to the
/// registry. The registry secret goes to the engine over stdin and is never
/// logged.
pub async fn build_and_publish<E: ContainerEngine>(
    engine: &E,
    params: &BuildAndPublishParams,
) -> Result<(), Error> {
    let address = params.publish_address();
    info!(
        "{}: building {} from {}",
        BUILD_AND_PUBLISH_ACTIVITY_NAME,
        address,
        params.work_directory.display()
    );

    engine
        .login(
            params.registry_or_default(),
            &params.registry_username,
            &params.registry_secret,
        )
        .await?;
    engine
        .build(
            &params.work_directory,
            params.dockerfile_or_default(),
            &address,
        )
        .await?;
    engine.push(&address).await?;
    engine.logout(params.registry_or_default()).await?;

    info!("{}: published {}", BUILD_AND_PUBLISH_ACTIVITY_NAME, address);
    Ok(())
}
