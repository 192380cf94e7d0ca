use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

/// Helm create chart activity name.
pub const CREATE_CHART_ACTIVITY_NAME: &str = "HelmCreateChart";

/// Suffix carried by template assets, stripped from rendered output paths.
pub const TEMPLATE_SUFFIX: &str = ".tpl";

/// Directory created under the repository root to hold rendered assets.
pub const CHART_BASE_DIR: &str = ".onepaas";

#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to create the directory {path}: {err}")]
    CreateDir { path: PathBuf, err: std::io::Error },

    #[error("unable to write the file {path}: {err}")]
    WriteFile { path: PathBuf, err: std::io::Error },

    #[error("template {asset} left an unresolved placeholder {placeholder}")]
    UnresolvedPlaceholder { asset: String, placeholder: String },
}

/// Per-run substitution values for the chart templates.
#[derive(Debug, Clone, Default)]
pub struct ChartValues {
    /// Name of the application in a human-readable format.
    pub application_name: String,
    /// Machine-readable name for the application.
    pub application_slug: String,
    /// Hostname used for the application in the ingress.
    pub application_hostname: String,
    pub image_registry: String,
    pub image_repository: String,
    pub image_tag: String,
    pub kubernetes_ingress_class: String,
}

/// A template asset: logical output path (with suffix) and source text.
#[derive(Debug, Clone)]
pub struct TemplateAsset {
    pub path: String,
    pub source: String,
}

/// Renders the fixed template catalog into a repository, exactly once per
/// workspace. The catalog is injected at construction; the embedded one is
/// compiled into the binary.
pub struct Materializer {
    assets: Vec<TemplateAsset>,
}

impl Materializer {
    pub fn new(assets: Vec<TemplateAsset>) -> Self {
        Self { assets }
    }

    /// The compiled-in chart catalog.
    pub fn embedded() -> Self {
        fn asset(path: &str, source: &str) -> TemplateAsset {
            TemplateAsset {
                path: path.to_string(),
                source: source.to_string(),
            }
        }

        Self::new(vec![
            asset(
                "chart/Chart.yaml.tpl",
                include_str!("../templates/chart/Chart.yaml.tpl"),
            ),
            asset(
                "chart/values.yaml.tpl",
                include_str!("../templates/chart/values.yaml.tpl"),
            ),
            asset(
                "chart/templates/deployment.yaml.tpl",
                include_str!("../templates/chart/templates/deployment.yaml.tpl"),
            ),
            asset(
                "chart/templates/service.yaml.tpl",
                include_str!("../templates/chart/templates/service.yaml.tpl"),
            ),
            asset(
                "chart/templates/ingress.yaml.tpl",
                include_str!("../templates/chart/templates/ingress.yaml.tpl"),
            ),
        ])
    }

    /// Materialize the chart under `<repository_path>/.onepaas/chart`.
    ///
    /// A chart directory that already exists is left untouched and reported
    /// as success; this operation never overwrites an existing chart.
    pub fn materialize(&self, repository_path: &Path, values: &ChartValues) -> Result<(), Error> {
        let base = repository_path.join(CHART_BASE_DIR);
        let chart_path = base.join("chart");

        if chart_path.exists() {
            info!(
                "{}: chart already present at {}, skipping",
                CREATE_CHART_ACTIVITY_NAME,
                chart_path.display()
            );
            return Ok(());
        }

        create_dir(&chart_path)?;
        create_dir(&chart_path.join("templates"))?;

        for asset in &self.assets {
            let stripped = asset
                .path
                .strip_suffix(TEMPLATE_SUFFIX)
                .unwrap_or(&asset.path);
            let target = base.join(stripped);
            if let Some(parent) = target.parent() {
                create_dir(parent)?;
            }

            let rendered = render(asset, values)?;
            std::fs::write(&target, rendered).map_err(|err| Error::WriteFile {
                path: target.clone(),
                err,
            })?;
        }

        info!(
            "{}: chart rendered at {}",
            CREATE_CHART_ACTIVITY_NAME,
            chart_path.display()
        );
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(path).map_err(|err| Error::CreateDir {
        path: path.to_path_buf(),
        err,
    })
}

fn render(asset: &TemplateAsset, values: &ChartValues) -> Result<String, Error> {
    let rendered = asset
        .source
        .replace("{{application_name}}", &values.application_name)
        .replace("{{application_slug}}", &values.application_slug)
        .replace("{{application_hostname}}", &values.application_hostname)
        .replace("{{image_registry}}", &values.image_registry)
        .replace("{{image_repository}}", &values.image_repository)
        .replace("{{image_tag}}", &values.image_tag)
        .replace(
            "{{kubernetes_ingress_class}}",
            &values.kubernetes_ingress_class,
        );

    // A leftover `{{` means a placeholder this renderer does not know.
    if let Some(start) = rendered.find("{{") {
        let end = rendered[start..]
            .find("}}")
            .map(|offset| start + offset + 2)
            .unwrap_or(rendered.len());
        return Err(Error::UnresolvedPlaceholder {
            asset: asset.path.clone(),
            placeholder: rendered[start..end].to_string(),
        });
    }

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> ChartValues {
        ChartValues {
            application_name: "Acme App".to_string(),
            application_slug: "acme-app".to_string(),
            application_hostname: "app.acme.example".to_string(),
            image_registry: "docker.io".to_string(),
            image_repository: "acme/app".to_string(),
            image_tag: "v1".to_string(),
            kubernetes_ingress_class: "nginx".to_string(),
        }
    }

    #[test]
    fn materializes_the_embedded_catalog() {
        let dir = tempfile::tempdir().unwrap();
        Materializer::embedded()
            .materialize(dir.path(), &values())
            .unwrap();

        let chart = dir.path().join(".onepaas/chart");
        assert!(chart.join("Chart.yaml").exists());
        assert!(chart.join("values.yaml").exists());
        assert!(chart.join("templates/deployment.yaml").exists());
        assert!(chart.join("templates/service.yaml").exists());
        assert!(chart.join("templates/ingress.yaml").exists());
        // suffix is stripped, never written
        assert!(!chart.join("Chart.yaml.tpl").exists());
    }

    #[test]
    fn rendered_documents_are_valid_yaml_with_substitutions() {
        let dir = tempfile::tempdir().unwrap();
        Materializer::embedded()
            .materialize(dir.path(), &values())
            .unwrap();

        let chart = dir.path().join(".onepaas/chart");
        let chart_yaml = std::fs::read_to_string(chart.join("Chart.yaml")).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&chart_yaml).unwrap();
        assert_eq!(parsed["name"], "acme-app");

        let deployment =
            std::fs::read_to_string(chart.join("templates/deployment.yaml")).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&deployment).unwrap();
        assert_eq!(
            parsed["spec"]["template"]["spec"]["containers"][0]["image"],
            "docker.io/acme/app:v1"
        );

        let ingress = std::fs::read_to_string(chart.join("templates/ingress.yaml")).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&ingress).unwrap();
        assert_eq!(parsed["spec"]["ingressClassName"], "nginx");
        assert_eq!(parsed["spec"]["rules"][0]["host"], "app.acme.example");
    }

    #[test]
    fn second_materialization_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = Materializer::embedded();

        materializer.materialize(dir.path(), &values()).unwrap();

        // Tamper with a rendered file; a second call must not touch it.
        let chart_yaml = dir.path().join(".onepaas/chart/Chart.yaml");
        std::fs::write(&chart_yaml, "tampered").unwrap();

        materializer.materialize(dir.path(), &values()).unwrap();
        assert_eq!(std::fs::read_to_string(&chart_yaml).unwrap(), "tampered");
    }

    #[test]
    fn unknown_placeholder_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = Materializer::new(vec![TemplateAsset {
            path: "chart/broken.yaml.tpl".to_string(),
            source: "name: {{not_a_field}}\n".to_string(),
        }]);

        let err = materializer.materialize(dir.path(), &values()).unwrap_err();
        match err {
            Error::UnresolvedPlaceholder { asset, placeholder } => {
                assert_eq!(asset, "chart/broken.yaml.tpl");
                assert_eq!(placeholder, "{{not_a_field}}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
