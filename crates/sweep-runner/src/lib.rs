pub mod control;
pub mod definition;
pub mod error;
pub mod launcher;
pub mod matrix;
pub mod resume;
pub mod store;
pub mod template;

use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};

pub use control::{acquire_sweep_lock, SweepLock, SweepPhase};
pub use definition::{SweepDefinition, STARTER_DEFINITION, STARTER_TEMPLATE};
pub use error::SweepError;
pub use launcher::{launch_outcome, parse_timing, Invocation, Launcher, ProcessLauncher};
pub use matrix::{Combinations, ParameterMatrix, RunConfig};
pub use resume::{config_identity, pending_configs, ConfigIdentity};
pub use store::{ResultStore, RunOutcome, RunResult, NAN_SENTINEL};
pub use template::Template;

use control::SweepControl;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub total: usize,
    pub skipped: usize,
    pub launched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepStatus {
    pub total: usize,
    pub recorded: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Runs every configuration of `matrix` not yet recorded in `store`, one at a
/// time, rewriting the store after each run.
///
/// With `resume` the prior results are loaded and their configurations are
/// skipped; without it the sweep starts from an empty result set and the
/// store is overwritten by the first completed run. A failed launch is
/// recorded as [`NAN_SENTINEL`] and the sweep carries on; failing to prepare
/// a run or to persist results aborts it.
pub fn run_sweep<L: Launcher + ?Sized>(
    matrix: &ParameterMatrix,
    store: &ResultStore,
    launcher: &mut L,
    resume: bool,
) -> Result<SweepReport> {
    matrix.validate()?;
    let _lock = acquire_sweep_lock(store.path())?;
    let mut control = SweepControl::new(store.path());

    let candidates: Vec<RunConfig> = matrix.combinations().collect();
    let total = candidates.len();
    control.enter(SweepPhase::Loading, total)?;
    let mut results = if resume { store.load()? } else { Vec::new() };
    let pending = if resume {
        pending_configs(&results, candidates)
    } else {
        candidates
    };
    let skipped = total - pending.len();
    info!(
        results = %store.path().display(),
        total,
        skipped,
        pending = pending.len(),
        resume,
        "sweep loaded"
    );

    control.enter(SweepPhase::Iterating, total)?;
    let mut report = SweepReport {
        total,
        skipped,
        launched: 0,
        succeeded: 0,
        failed: 0,
        results_path: store.path().to_path_buf(),
    };
    let pending_count = pending.len();
    for (idx, config) in pending.into_iter().enumerate() {
        control.running(&config)?;
        info!(run = idx + 1, of = pending_count, config = %config, "running");
        launcher.prepare(&config)?;
        let outcome = launch_outcome(launcher, &config);
        report.launched += 1;
        match &outcome {
            RunOutcome::Timed(timing) => {
                report.succeeded += 1;
                info!(config = %config, time = %timing, "recorded");
            }
            RunOutcome::Failed(reason) => {
                report.failed += 1;
                warn!(config = %config, reason = %reason, "run failed; recording {}", NAN_SENTINEL);
            }
        }
        results.push(RunResult::new(config, &outcome));
        store.save(&results)?;
        control.recorded();
    }

    control.enter(SweepPhase::Done, total)?;
    info!(
        launched = report.launched,
        succeeded = report.succeeded,
        failed = report.failed,
        skipped = report.skipped,
        "sweep done"
    );
    Ok(report)
}

/// Runs the named matrix of a sweep definition with the process launcher.
pub fn run_definition(
    definition: &SweepDefinition,
    matrix_name: Option<&str>,
    resume: bool,
) -> Result<SweepReport> {
    let matrix = definition.matrix(matrix_name)?;
    let template = definition.load_template()?;
    let mut launcher = ProcessLauncher::new(definition, template);
    let store = ResultStore::new(definition.results_path());
    run_sweep(matrix, &store, &mut launcher, resume)
}

/// How much of `matrix` is already recorded in `store`.
pub fn describe_sweep(matrix: &ParameterMatrix, store: &ResultStore) -> Result<SweepStatus> {
    let candidates: Vec<RunConfig> = matrix.combinations().collect();
    let total = candidates.len();
    let recorded = store.load()?;
    let pending = pending_configs(&recorded, candidates).len();
    Ok(SweepStatus {
        total,
        recorded: recorded.len(),
        failed: recorded.iter().filter(|r| r.is_failed()).count(),
        pending,
    })
}
