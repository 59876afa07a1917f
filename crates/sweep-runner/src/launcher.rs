use crate::definition::{SweepDefinition, CONFIG_PATH_FIELD};
use crate::matrix::RunConfig;
use crate::store::RunOutcome;
use crate::template::Template;
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use sweep_core::atomic_write_bytes;
use tracing::debug;

/// Runs one configuration of the sweep.
pub trait Launcher {
    /// Writes whatever the run reads before it starts. An error here aborts
    /// the sweep.
    fn prepare(&mut self, _config: &RunConfig) -> Result<()> {
        Ok(())
    }

    /// Runs the configuration and returns its timing token.
    fn launch(&mut self, config: &RunConfig) -> Result<String>;
}

/// Launches `config`, folding any error into [`RunOutcome::Failed`].
pub fn launch_outcome<L: Launcher + ?Sized>(launcher: &mut L, config: &RunConfig) -> RunOutcome {
    match launcher.launch(config) {
        Ok(timing) => RunOutcome::Timed(timing),
        Err(err) => RunOutcome::Failed(err.to_string()),
    }
}

/// Last whitespace-delimited token of the last non-empty line, which must
/// read as a number.
pub fn parse_timing(stdout: &str) -> Result<String> {
    let token = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.split_whitespace().last())
        .ok_or_else(|| anyhow!("empty_output: process printed nothing"))?;
    token
        .parse::<f64>()
        .map_err(|_| anyhow!("unparseable_timing: '{}' is not a number", token))?;
    Ok(token.to_string())
}

/// A fully rendered process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: PathBuf,
}

/// Renders the config template, then runs the external program with a
/// per-invocation environment overlay.
pub struct ProcessLauncher {
    config_template: Template,
    template_fields: Vec<String>,
    rendered_path: PathBuf,
    command: Vec<Template>,
    env: Vec<(String, Template)>,
    working_dir: PathBuf,
}

impl ProcessLauncher {
    pub fn new(definition: &SweepDefinition, config_template: Template) -> Self {
        Self {
            config_template,
            template_fields: definition.template.fields.clone(),
            rendered_path: definition.rendered_path(),
            command: definition.command_templates().to_vec(),
            env: definition.env_templates().to_vec(),
            working_dir: definition.working_dir(),
        }
    }

    pub fn rendered_path(&self) -> &PathBuf {
        &self.rendered_path
    }

    /// Renders the template from the configuration's template fields only.
    pub fn render_config(&self, config: &RunConfig) -> Result<String> {
        let relevant: Vec<(&str, i64)> = config
            .iter()
            .filter(|(name, _)| self.template_fields.iter().any(|f| f == *name))
            .collect();
        let rendered = self.config_template.render(|name| {
            relevant
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        })?;
        Ok(rendered)
    }

    pub fn invocation(&self, config: &RunConfig) -> Result<Invocation> {
        let config_path = self.rendered_path.to_string_lossy().to_string();
        let lookup = |name: &str| {
            if name == CONFIG_PATH_FIELD {
                Some(config_path.clone())
            } else {
                config.get(name).map(|v| v.to_string())
            }
        };
        let mut rendered = self
            .command
            .iter()
            .map(|t| t.render(lookup))
            .collect::<Result<Vec<_>, _>>()?;
        let env = self
            .env
            .iter()
            .map(|(key, t)| t.render(lookup).map(|v| (key.clone(), v)))
            .collect::<Result<Vec<_>, _>>()?;
        if rendered.is_empty() {
            return Err(anyhow!("empty_command: nothing to launch"));
        }
        let program = rendered.remove(0);
        Ok(Invocation {
            program,
            args: rendered,
            env,
            working_dir: self.working_dir.clone(),
        })
    }
}

impl Launcher for ProcessLauncher {
    fn prepare(&mut self, config: &RunConfig) -> Result<()> {
        let rendered = self.render_config(config)?;
        atomic_write_bytes(&self.rendered_path, rendered.as_bytes())?;
        debug!(path = %self.rendered_path.display(), "run config rendered");
        Ok(())
    }

    fn launch(&mut self, config: &RunConfig) -> Result<String> {
        let invocation = self.invocation(config)?;
        debug!(
            program = %invocation.program,
            args = ?invocation.args,
            env = ?invocation.env,
            "launching"
        );
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| anyhow!("spawn_failed: {}: {}", invocation.program, e))?;

        if !output.status.success() {
            let status = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let stderr_tail = String::from_utf8_lossy(&output.stderr)
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no stderr output")
                .to_string();
            return Err(anyhow!("exit_status: {} ({})", status, stderr_tail));
        }
        parse_timing(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::SweepDefinition;
    use chrono::Utc;
    use std::fs;
    use std::path::Path;
    use sweep_core::ensure_dir;

    struct Failing;

    impl Launcher for Failing {
        fn launch(&mut self, _config: &RunConfig) -> Result<String> {
            Err(anyhow!("spawn_failed: torchrun: No such file or directory"))
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sweep_launcher_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("scratch dir");
        dir
    }

    fn definition(dir: &Path, command: &str) -> SweepDefinition {
        let raw = format!(
            "schema_version: sweep_v1
results_path: results.json
template:
  path: t.yml
  rendered_path: rendered.yml
  fields: [batch_size]
launch:
  command: {}
  env:
    SWEEP_THREADS: \"{{threads}}\"
matrices:
  default:
    threads: [4]
    batch_size: [32]
",
            command
        );
        SweepDefinition::from_yaml_str(&raw, dir).expect("definition")
    }

    fn config() -> RunConfig {
        RunConfig::from_pairs([("threads", 4), ("batch_size", 32)])
    }

    #[test]
    fn parse_timing_takes_last_token_of_last_line() {
        let out = "epoch 1 done\nstep 20 loss 0.3\nTotal time: 12.75\n\n";
        assert_eq!(parse_timing(out).expect("timing"), "12.75");
        assert_eq!(parse_timing("42").expect("timing"), "42");
    }

    #[test]
    fn parse_timing_rejects_empty_and_non_numeric_output() {
        let empty = parse_timing("").expect_err("empty");
        assert!(empty.to_string().contains("empty_output"));
        assert!(parse_timing("   \n \n").is_err());
        let bad = parse_timing("training finished").expect_err("word");
        assert!(bad.to_string().contains("unparseable_timing"));
    }

    #[test]
    fn failed_launch_becomes_failed_outcome() {
        let outcome = launch_outcome(&mut Failing, &config());
        assert_eq!(outcome.timing(), "nan");
        match outcome {
            RunOutcome::Failed(reason) => assert!(reason.contains("spawn_failed")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn render_config_uses_only_template_fields() {
        let dir = scratch_dir("render");
        let def = definition(&dir, "[run, \"{config_path}\"]");
        let template = Template::parse("t.yml", "bs: {batch_size}\n").expect("template");
        let launcher = ProcessLauncher::new(&def, template);
        assert_eq!(launcher.render_config(&config()).expect("render"), "bs: 32\n");

        let leaky = Template::parse("t.yml", "threads: {threads}\n").expect("template");
        let launcher = ProcessLauncher::new(&def, leaky);
        assert!(launcher.render_config(&config()).is_err());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn invocation_expands_arguments_and_env_overlay() {
        let dir = scratch_dir("invocation");
        let def = definition(&dir, "[trainer, \"--threads={threads}\", --config, \"{config_path}\"]");
        let template = Template::parse("t.yml", "bs: {batch_size}").expect("template");
        let launcher = ProcessLauncher::new(&def, template);
        let inv = launcher.invocation(&config()).expect("invocation");
        assert_eq!(inv.program, "trainer");
        assert_eq!(
            inv.args,
            vec![
                "--threads=4".to_string(),
                "--config".to_string(),
                dir.join("rendered.yml").to_string_lossy().to_string(),
            ]
        );
        assert_eq!(inv.env, vec![("SWEEP_THREADS".to_string(), "4".to_string())]);
        assert!(std::env::var("SWEEP_THREADS").is_err());
        let _ = fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[test]
    fn process_launcher_reads_timing_from_stdout() {
        let dir = scratch_dir("process_ok");
        let def = definition(
            &dir,
            "[sh, -c, \"cat {config_path}; echo; echo elapsed $SWEEP_THREADS.5\"]",
        );
        let template = Template::parse("t.yml", "bs: {batch_size}").expect("template");
        let mut launcher = ProcessLauncher::new(&def, template);
        launcher.prepare(&config()).expect("prepare");
        assert_eq!(
            fs::read_to_string(dir.join("rendered.yml")).expect("rendered"),
            "bs: 32"
        );
        assert_eq!(launcher.launch(&config()).expect("timing"), "4.5");
        let _ = fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[test]
    fn process_launcher_failures_yield_nan() {
        let dir = scratch_dir("process_fail");
        let template = Template::parse("t.yml", "bs: {batch_size}").expect("template");

        let exit = definition(&dir, "[sh, -c, \"echo 1.0; echo boom >&2; exit 3\"]");
        let mut launcher = ProcessLauncher::new(&exit, template.clone());
        match launch_outcome(&mut launcher, &config()) {
            RunOutcome::Failed(reason) => {
                assert!(reason.contains("exit_status: 3"), "{}", reason);
                assert!(reason.contains("boom"), "{}", reason);
            }
            other => panic!("expected failure, got {:?}", other),
        }

        let silent = definition(&dir, "[sh, -c, \"true\"]");
        let mut launcher = ProcessLauncher::new(&silent, template.clone());
        assert_eq!(launch_outcome(&mut launcher, &config()).timing(), "nan");

        let missing = definition(&dir, "[/nonexistent/sweep-trainer]");
        let mut launcher = ProcessLauncher::new(&missing, template);
        assert_eq!(launch_outcome(&mut launcher, &config()).timing(), "nan");
        let _ = fs::remove_dir_all(dir);
    }
}
