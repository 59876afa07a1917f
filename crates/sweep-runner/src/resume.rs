use crate::matrix::RunConfig;
use crate::store::RunResult;
use std::collections::HashSet;
use std::fmt;
use sweep_core::canonical_pairs_digest;

/// Order-independent fingerprint of a configuration's parameter values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigIdentity(String);

impl ConfigIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn config_identity(config: &RunConfig) -> ConfigIdentity {
    ConfigIdentity(canonical_pairs_digest(
        config.iter().map(|(name, value)| (name, value.to_string())),
    ))
}

/// Identities of every recorded result, timing excluded.
pub fn recorded_identities(recorded: &[RunResult]) -> HashSet<ConfigIdentity> {
    recorded.iter().map(|r| config_identity(&r.config)).collect()
}

/// Candidates not yet present in `recorded`, in candidate order.
pub fn pending_configs(recorded: &[RunResult], candidates: Vec<RunConfig>) -> Vec<RunConfig> {
    if recorded.is_empty() {
        return candidates;
    }
    let done = recorded_identities(recorded);
    candidates
        .into_iter()
        .filter(|c| !done.contains(&config_identity(c)))
        .collect()
}
