use crate::matrix::RunConfig;
use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use sweep_core::{atomic_write_json_pretty, ensure_dir};

/// Sweep-level lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Loading,
    Iterating,
    Done,
}

impl SweepPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SweepPhase::Loading => "loading",
            SweepPhase::Iterating => "iterating",
            SweepPhase::Done => "done",
        }
    }
}

fn sidecar_path(results_path: &Path, suffix: &str) -> PathBuf {
    let name = results_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("results");
    results_path.with_file_name(format!("{}.{}", name, suffix))
}

pub fn lock_path(results_path: &Path) -> PathBuf {
    sidecar_path(results_path, "lock")
}

pub fn control_path(results_path: &Path) -> PathBuf {
    sidecar_path(results_path, "control.json")
}

/// Exclusive claim on a results file for the lifetime of one sweep.
#[derive(Debug)]
pub struct SweepLock {
    path: PathBuf,
}

impl Drop for SweepLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub fn acquire_sweep_lock(results_path: &Path) -> Result<SweepLock> {
    let path = lock_path(results_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
    {
        Ok(mut file) => {
            let payload = format!(
                "{{\"pid\":{},\"acquired_at\":\"{}\"}}\n",
                std::process::id(),
                Utc::now().to_rfc3339()
            );
            let _ = file.write_all(payload.as_bytes());
            let _ = file.sync_all();
            Ok(SweepLock { path })
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(anyhow!(
            "operation_in_progress: another sweep holds {}",
            path.display()
        )),
        Err(e) => Err(e.into()),
    }
}

/// Keeps `<results>.control.json` current; marks the sweep interrupted if
/// dropped before reaching [`SweepPhase::Done`].
pub(crate) struct SweepControl {
    path: PathBuf,
    phase: SweepPhase,
    total: usize,
    completed: usize,
    done: bool,
}

impl SweepControl {
    pub(crate) fn new(results_path: &Path) -> Self {
        Self {
            path: control_path(results_path),
            phase: SweepPhase::Loading,
            total: 0,
            completed: 0,
            done: false,
        }
    }

    fn write(&self, status: &str, active: Option<&RunConfig>) -> Result<()> {
        let payload = json!({
            "schema_version": "sweep_control_v1",
            "status": status,
            "phase": self.phase.as_str(),
            "active_config": active,
            "completed": self.completed,
            "total": self.total,
            "updated_at": Utc::now().to_rfc3339(),
        });
        atomic_write_json_pretty(&self.path, &payload)
    }

    pub(crate) fn enter(&mut self, phase: SweepPhase, total: usize) -> Result<()> {
        self.phase = phase;
        self.total = total;
        let status = if phase == SweepPhase::Done {
            "completed"
        } else {
            "running"
        };
        self.write(status, None)?;
        if phase == SweepPhase::Done {
            self.done = true;
        }
        Ok(())
    }

    pub(crate) fn running(&mut self, config: &RunConfig) -> Result<()> {
        self.write("running", Some(config))
    }

    pub(crate) fn recorded(&mut self) {
        self.completed += 1;
    }
}

impl Drop for SweepControl {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.write("interrupted", None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sweep_control_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("scratch dir");
        dir
    }

    fn read(path: &Path) -> Value {
        serde_json::from_slice(&fs::read(path).expect("control file")).expect("json")
    }

    #[test]
    fn sweep_lock_is_exclusive() {
        let dir = scratch_dir("lock");
        let results = dir.join("timing_result.json");
        let lock1 = acquire_sweep_lock(&results).expect("first lock must succeed");
        let err = acquire_sweep_lock(&results).expect_err("second lock must fail");
        assert!(
            err.to_string().contains("operation_in_progress"),
            "unexpected lock error: {}",
            err
        );
        drop(lock1);
        let lock2 = acquire_sweep_lock(&results).expect("lock should be re-acquirable");
        drop(lock2);
        assert!(!lock_path(&results).exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn dropped_control_marks_sweep_interrupted() {
        let dir = scratch_dir("interrupted");
        let results = dir.join("timing_result.json");
        {
            let mut control = SweepControl::new(&results);
            control.enter(SweepPhase::Iterating, 4).expect("iterating");
            control
                .running(&RunConfig::from_pairs([("threads", 8)]))
                .expect("running");
            let state = read(&control_path(&results));
            assert_eq!(state["status"], "running");
            assert_eq!(state["active_config"]["threads"], 8);
        }
        let state = read(&control_path(&results));
        assert_eq!(state["status"], "interrupted");
        assert_eq!(state["phase"], "iterating");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn completed_control_stays_completed_after_drop() {
        let dir = scratch_dir("completed");
        let results = dir.join("timing_result.json");
        {
            let mut control = SweepControl::new(&results);
            control.recorded();
            control.enter(SweepPhase::Done, 1).expect("done");
        }
        let state = read(&control_path(&results));
        assert_eq!(state["status"], "completed");
        assert_eq!(state["completed"], 1);
        let _ = fs::remove_dir_all(dir);
    }
}
