use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use log::debug;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum Error {
    #[error("image build failed with exit code {0}")]
    Build(ExitStatus),

    #[error("registry login failed with exit code {0}")]
    Login(ExitStatus),

    #[error("registry logout failed with exit code {0}")]
    Logout(ExitStatus),

    #[error("image push failed with exit code {0}")]
    Push(ExitStatus),

    /// The engine process could not be launched or died without an exit
    /// code. Infrastructure problem, not a verdict on the workload.
    #[error(transparent)]
    IOError(#[from] io::Error),
}

/// Bind mount into a containerized process.
#[derive(Debug, Clone)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

/// A containerized process invocation. Its exit code is the only contract.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub image: String,
    pub workdir: String,
    pub mounts: Vec<Mount>,
    /// Plain environment, passed on the engine command line.
    pub env: Vec<(String, String)>,
    /// Secret environment: values travel through the engine process
    /// environment and never appear on a command line.
    pub secret_env: Vec<(String, String)>,
    pub entrypoint: Option<String>,
    pub args: Vec<String>,
}

/// Container-engine collaborator: image build, registry auth, publish, and
/// one-shot containerized process execution.
#[allow(async_fn_in_trait)]
pub trait ContainerEngine: Send + Sync {
    async fn build(&self, context: &Path, dockerfile: &str, tag: &str) -> Result<(), Error>;

    async fn login(&self, registry: &str, username: &str, secret: &str) -> Result<(), Error>;

    async fn logout(&self, registry: &str) -> Result<(), Error>;

    async fn push(&self, image: &str) -> Result<(), Error>;

    /// Run the process to completion and return the observed exit code.
    async fn run(&self, spec: &RunSpec) -> Result<i32, Error>;
}

/// Engine backed by the `docker` command line client.
pub struct DockerCli;

impl ContainerEngine for DockerCli {
    async fn build(&self, context: &Path, dockerfile: &str, tag: &str) -> Result<(), Error> {
        let status = Command::new("docker")
            .current_dir(context)
            .arg("build")
            .arg("--file")
            .arg(dockerfile)
            .arg("--tag")
            .arg(tag)
            .arg(".")
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Build(status))
        }
    }

    async fn login(&self, registry: &str, username: &str, secret: &str) -> Result<(), Error> {
        debug!("logging in to registry {}", registry);
        let mut child = Command::new("docker")
            .arg("login")
            .arg(registry)
            .arg("--username")
            .arg(username)
            .arg("--password-stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(secret.as_bytes()).await?;
        }

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Login(status))
        }
    }

    async fn logout(&self, registry: &str) -> Result<(), Error> {
        let status = Command::new("docker")
            .arg("logout")
            .arg(registry)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Logout(status))
        }
    }

    async fn push(&self, image: &str) -> Result<(), Error> {
        debug!("pushing image {}", image);
        let status = Command::new("docker")
            .arg("push")
            .arg(image)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Push(status))
        }
    }

    async fn run(&self, spec: &RunSpec) -> Result<i32, Error> {
        let mut command = Command::new("docker");
        command.arg("run").arg("--rm");
        command.arg("--workdir").arg(&spec.workdir);

        for mount in &spec.mounts {
            let mut volume = format!("{}:{}", mount.host.display(), mount.container);
            if mount.read_only {
                volume.push_str(":ro");
            }
            command.arg("--volume").arg(volume);
        }
        for (name, value) in &spec.env {
            command.arg("--env").arg(format!("{name}={value}"));
        }
        for (name, value) in &spec.secret_env {
            // Name-only form: the engine reads the value from our
            // environment, keeping it off the command line.
            command.arg("--env").arg(name);
            command.env(name, value);
        }
        if let Some(entrypoint) = &spec.entrypoint {
            command.arg("--entrypoint").arg(entrypoint);
        }
        command.arg(&spec.image);
        command.args(&spec.args);

        let status = command
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await?;

        status.code().ok_or_else(|| {
            Error::IOError(io::Error::new(
                io::ErrorKind::Other,
                "process terminated by signal",
            ))
        })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// One recorded engine invocation.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Build {
            context: PathBuf,
            dockerfile: String,
            tag: String,
        },
        Login {
            registry: String,
            username: String,
            secret: String,
        },
        Logout {
            registry: String,
        },
        Push {
            image: String,
        },
        Run {
            image: String,
            workdir: String,
            mounts: Vec<(PathBuf, String, bool)>,
            env: Vec<(String, String)>,
            secret_env: Vec<(String, String)>,
            entrypoint: Option<String>,
            args: Vec<String>,
        },
    }

    /// Records every call; `run` returns a scripted exit code.
    #[derive(Clone, Default)]
    pub struct MockEngine {
        pub calls: Arc<Mutex<Vec<Call>>>,
        pub run_exit_code: i32,
    }

    impl MockEngine {
        pub fn exiting_with(exit_code: i32) -> Self {
            Self {
                run_exit_code: exit_code,
                ..Default::default()
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ContainerEngine for MockEngine {
        async fn build(&self, context: &Path, dockerfile: &str, tag: &str) -> Result<(), Error> {
            self.calls.lock().unwrap().push(Call::Build {
                context: context.to_path_buf(),
                dockerfile: dockerfile.to_string(),
                tag: tag.to_string(),
            });
            Ok(())
        }

        async fn login(&self, registry: &str, username: &str, secret: &str) -> Result<(), Error> {
            self.calls.lock().unwrap().push(Call::Login {
                registry: registry.to_string(),
                username: username.to_string(),
                secret: secret.to_string(),
            });
            Ok(())
        }

        async fn logout(&self, registry: &str) -> Result<(), Error> {
            self.calls.lock().unwrap().push(Call::Logout {
                registry: registry.to_string(),
            });
            Ok(())
        }

        async fn push(&self, image: &str) -> Result<(), Error> {
            self.calls.lock().unwrap().push(Call::Push {
                image: image.to_string(),
            });
            Ok(())
        }

        async fn run(&self, spec: &RunSpec) -> Result<i32, Error> {
            self.calls.lock().unwrap().push(Call::Run {
                image: spec.image.clone(),
                workdir: spec.workdir.clone(),
                mounts: spec
                    .mounts
                    .iter()
                    .map(|m| (m.host.clone(), m.container.clone(), m.read_only))
                    .collect(),
                env: spec.env.clone(),
                secret_env: spec.secret_env.clone(),
                entrypoint: spec.entrypoint.clone(),
                args: spec.args.clone(),
            });
            Ok(self.run_exit_code)
        }
    }
}
