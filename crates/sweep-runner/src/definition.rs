use crate::error::SweepError;
use crate::matrix::ParameterMatrix;
use crate::template::Template;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: &str = "sweep_v1";
/// Reserved placeholder that expands to the rendered config file's path.
pub const CONFIG_PATH_FIELD: &str = "config_path";
pub const DEFAULT_MATRIX: &str = "default";

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSection {
    pub path: PathBuf,
    pub rendered_path: PathBuf,
    #[serde(default)]
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LaunchSection {
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawDefinition {
    schema_version: String,
    results_path: PathBuf,
    template: TemplateSection,
    launch: LaunchSection,
    matrices: BTreeMap<String, ParameterMatrix>,
}

/// A validated `sweep.yaml`: where results live, how each run is
/// materialized and launched, and the named matrices to choose from.
#[derive(Debug, Clone)]
pub struct SweepDefinition {
    pub base_dir: PathBuf,
    pub results_path: PathBuf,
    pub template: TemplateSection,
    pub launch: LaunchSection,
    pub matrices: BTreeMap<String, ParameterMatrix>,
    command: Vec<Template>,
    env: Vec<(String, Template)>,
}

impl SweepDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow!("definition_unreadable: {}: {}", path.display(), e))?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from("."));
        Self::from_yaml_str(&raw, &base_dir)
    }

    pub fn from_yaml_str(raw: &str, base_dir: &Path) -> Result<Self> {
        let parsed: RawDefinition = serde_yaml::from_str(raw)?;
        if parsed.schema_version != SCHEMA_VERSION {
            return Err(SweepError::SchemaVersion {
                found: parsed.schema_version,
                expected: SCHEMA_VERSION.to_string(),
            }
            .into());
        }
        if parsed.matrices.is_empty() {
            return Err(SweepError::EmptyMatrix("no matrices declared".to_string()).into());
        }
        if parsed.launch.command.is_empty() {
            return Err(SweepError::EmptyCommand.into());
        }

        let command = parsed
            .launch
            .command
            .iter()
            .enumerate()
            .map(|(i, arg)| Template::parse(&format!("launch.command[{}]", i), arg))
            .collect::<Result<Vec<_>, _>>()?;
        let env = parsed
            .launch
            .env
            .iter()
            .map(|(key, value)| {
                Template::parse(&format!("launch.env.{}", key), value).map(|t| (key.clone(), t))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let definition = Self {
            base_dir: base_dir.to_path_buf(),
            results_path: parsed.results_path,
            template: parsed.template,
            launch: parsed.launch,
            matrices: parsed.matrices,
            command,
            env,
        };
        for (name, matrix) in &definition.matrices {
            definition.check_matrix(name, matrix)?;
        }
        Ok(definition)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn results_path(&self) -> PathBuf {
        self.resolve(&self.results_path)
    }

    pub fn template_path(&self) -> PathBuf {
        self.resolve(&self.template.path)
    }

    pub fn rendered_path(&self) -> PathBuf {
        self.resolve(&self.template.rendered_path)
    }

    pub fn working_dir(&self) -> PathBuf {
        match &self.launch.working_dir {
            Some(dir) => self.resolve(dir),
            None => self.base_dir.clone(),
        }
    }

    pub(crate) fn command_templates(&self) -> &[Template] {
        &self.command
    }

    pub(crate) fn env_templates(&self) -> &[(String, Template)] {
        &self.env
    }

    pub fn matrix_names(&self) -> impl Iterator<Item = &str> {
        self.matrices.keys().map(|k| k.as_str())
    }

    /// The named matrix, or `default` when no name is given.
    pub fn matrix(&self, name: Option<&str>) -> Result<&ParameterMatrix, SweepError> {
        let name = name.unwrap_or(DEFAULT_MATRIX);
        self.matrices
            .get(name)
            .ok_or_else(|| SweepError::UnknownMatrix(name.to_string()))
    }

    fn launch_placeholders(&self) -> impl Iterator<Item = &str> {
        self.command
            .iter()
            .chain(self.env.iter().map(|(_, t)| t))
            .flat_map(|t| t.placeholders())
    }

    /// Checks that `matrix` supplies every field the template and launch
    /// command reference, and that each of its parameters is used somewhere.
    pub fn check_matrix(&self, name: &str, matrix: &ParameterMatrix) -> Result<(), SweepError> {
        matrix.validate()?;
        if matrix.is_empty() {
            return Err(SweepError::EmptyMatrix(format!(
                "matrix '{}' declares no parameters",
                name
            )));
        }
        for field in &self.template.fields {
            if !matrix.contains(field) {
                return Err(SweepError::MissingTemplateField {
                    matrix: name.to_string(),
                    name: field.clone(),
                });
            }
        }
        for template in self.command.iter().chain(self.env.iter().map(|(_, t)| t)) {
            template.check_placeholders(|p| p == CONFIG_PATH_FIELD || matrix.contains(p))?;
        }
        let launch_fields: Vec<&str> = self.launch_placeholders().collect();
        for param in matrix.names() {
            let used = self.template.fields.iter().any(|f| f == param)
                || launch_fields.contains(&param);
            if !used {
                return Err(SweepError::UnconsumedParameter {
                    matrix: name.to_string(),
                    name: param.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Checks the config template only references declared template fields.
    pub fn check_template(&self, template: &Template) -> Result<(), SweepError> {
        template.check_placeholders(|p| self.template.fields.iter().any(|f| f == p))
    }

    pub fn load_template(&self) -> Result<Template> {
        let template = Template::load(&self.template_path())?;
        self.check_template(&template)?;
        Ok(template)
    }
}

/// Starter definition with a full matrix and a quick smoke-test matrix.
pub const STARTER_DEFINITION: &str = r#"schema_version: sweep_v1
results_path: timing_result.json
template:
  path: profile-template.yml
  rendered_path: profile-config.yml
  fields: [batch_size, loader_workers]
launch:
  command:
    - torchrun
    - "--nproc_per_node={mpi_workers}"
    - main.py
    - --distributed
    - --distributed-backend
    - mpi
    - --cpu
    - --mode
    - train
    - --config
    - "{config_path}"
  env:
    OMP_NUM_THREADS: "{threads}"
matrices:
  default:
    threads: [8, 12, 16, 20]
    mpi_workers: [1, 4, 8, 16]
    batch_size: [32, 64, 128, 256, 512]
    loader_workers: [0, 1]
  test:
    threads: [12, 16]
    mpi_workers: [8]
    batch_size: [32]
    loader_workers: [1]
"#;

pub const STARTER_TEMPLATE: &str = "optim:
  batch_size: {batch_size}
  eval_batch_size: {batch_size}
  num_workers: {loader_workers}
  max_epochs: 1
";
