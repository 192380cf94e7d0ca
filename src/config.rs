use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use thiserror::Error;

const DEFAULT_CONFIG: &str = include_str!("../default.toml");

#[derive(Error, Debug)]
pub enum Error {
    #[error("read configuration: {0}")]
    Read(#[from] std::io::Error),

    #[error("parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A worker.toml file.
#[derive(Deserialize, Debug)]
pub struct File {
    pub description: Option<String>,
    #[serde(default = "Default::default")]
    pub timeouts: Timeouts,
    #[serde(default = "Default::default")]
    pub projects: Projects,
    #[serde(default = "Default::default")]
    pub helm: Helm,
}

impl Default for File {
    fn default() -> Self {
        // The default config is compiled into the program, so
        // make sure to test default() to catch panics compile-time.
        toml::from_str(DEFAULT_CONFIG).unwrap()
    }
}

impl File {
    /// Read a configuration file from disk. Missing fields fall back to the
    /// compiled-in defaults.
    pub fn load(path: &str) -> Result<Self, Error> {
        Ok(toml::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Per-activity execution policy handed to the execution substrate.
#[serde_inline_default]
#[derive(Deserialize, Debug, Clone)]
pub struct Timeouts {
    /// Overall deadline per activity, retries included.
    #[serde_inline_default(60)]
    pub schedule_to_close_minutes: u64,
    /// Deadline for a single attempt.
    #[serde_inline_default(10)]
    pub start_to_close_minutes: u64,
    #[serde_inline_default(1)]
    pub maximum_attempts: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            schedule_to_close_minutes: 60,
            start_to_close_minutes: 10,
            maximum_attempts: 1,
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Clone)]
pub struct Projects {
    /// Base directory under which per-run workspaces are allocated.
    #[serde_inline_default(crate::workspace::PROJECTS_BASE_DIR.to_string())]
    pub base_dir: String,
}

impl Default for Projects {
    fn default() -> Self {
        Self {
            base_dir: crate::workspace::PROJECTS_BASE_DIR.to_string(),
        }
    }
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Clone)]
pub struct Helm {
    /// Image running the release-management process.
    #[serde_inline_default("alpine/helm:3.11.3".to_string())]
    pub image: String,
    #[serde_inline_default("companyinfo".to_string())]
    pub dependency_repository_name: String,
    #[serde_inline_default("https://companyinfo.github.io/helm-charts".to_string())]
    pub dependency_repository_url: String,
}

impl Default for Helm {
    fn default() -> Self {
        Self {
            image: "alpine/helm:3.11.3".to_string(),
            dependency_repository_name: "companyinfo".to_string(),
            dependency_repository_url: "https://companyinfo.github.io/helm-charts".to_string(),
        }
    }
}

#[cfg(test)]
pub mod test {
    #[test]
    pub fn load_default_configuration() {
        let cfg = super::File::default();
        assert_eq!(cfg.description, Some("Default configuration file".into()));
        assert_eq!(cfg.timeouts.schedule_to_close_minutes, 60);
        assert_eq!(cfg.timeouts.start_to_close_minutes, 10);
        assert_eq!(cfg.timeouts.maximum_attempts, 1);
        assert_eq!(cfg.projects.base_dir, "/tmp/projects");
        assert_eq!(cfg.helm.image, "alpine/helm:3.11.3");
    }

    #[test]
    pub fn partial_configuration_keeps_defaults() {
        let cfg: super::File = toml::from_str(
            r#"
            [helm]
            image = "alpine/helm:3.14.0"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.helm.image, "alpine/helm:3.14.0");
        assert_eq!(cfg.helm.dependency_repository_name, "companyinfo");
        assert_eq!(cfg.timeouts.maximum_attempts, 1);
    }
}
