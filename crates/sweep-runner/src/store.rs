use crate::matrix::{RunConfig, TIME_FIELD};
use anyhow::{anyhow, Result};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use sweep_core::atomic_write_bytes;
use tracing::debug;

/// Timing recorded for a run whose timing could not be obtained.
pub const NAN_SENTINEL: &str = "nan";

/// What a single launch produced. `Failed` keeps its reason in memory and is
/// written out as [`NAN_SENTINEL`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Timed(String),
    Failed(String),
}

impl RunOutcome {
    pub fn timing(&self) -> &str {
        match self {
            RunOutcome::Timed(t) => t,
            RunOutcome::Failed(_) => NAN_SENTINEL,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Timed(_))
    }
}

/// A configuration plus its recorded timing; the unit of persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub config: RunConfig,
    pub time: String,
}

impl RunResult {
    pub fn new(config: RunConfig, outcome: &RunOutcome) -> Self {
        Self {
            config,
            time: outcome.timing().to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.time == NAN_SENTINEL
    }
}

impl Serialize for RunResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.config.len() + 1))?;
        for (name, value) in self.config.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.serialize_entry(TIME_FIELD, &self.time)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for RunResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ResultVisitor;

        impl<'de> Visitor<'de> for ResultVisitor {
            type Value = RunResult;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of integer parameters plus a string 'time'")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut config = RunConfig::default();
                let mut time: Option<String> = None;
                while let Some(key) = access.next_key::<String>()? {
                    if key == TIME_FIELD {
                        if time.is_some() {
                            return Err(de::Error::duplicate_field(TIME_FIELD));
                        }
                        time = Some(access.next_value()?);
                    } else {
                        let value: i64 = access.next_value()?;
                        if !config.insert(key.clone(), value) {
                            return Err(de::Error::custom(format!(
                                "duplicate parameter '{}'",
                                key
                            )));
                        }
                    }
                }
                let time = time.ok_or_else(|| de::Error::missing_field(TIME_FIELD))?;
                Ok(RunResult { config, time })
            }
        }

        deserializer.deserialize_map(ResultVisitor)
    }
}

/// The persisted Result Set: one JSON array, rewritten whole on every save.
#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every recorded result. A missing file is a first run and reads
    /// as an empty set.
    pub fn load(&self) -> Result<Vec<RunResult>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no recorded results; treating as first run");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(anyhow!(
                    "results_unreadable: {}: {}",
                    self.path.display(),
                    e
                ))
            }
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| anyhow!("results_malformed: {}: {}", self.path.display(), e))
    }

    pub fn save(&self, results: &[RunResult]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(results)?;
        atomic_write_bytes(&self.path, &bytes)
            .map_err(|e| anyhow!("results_unwritable: {}: {}", self.path.display(), e))?;
        debug!(path = %self.path.display(), records = results.len(), "results checkpointed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sweep_core::ensure_dir;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sweep_store_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("scratch dir");
        dir
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = scratch_dir("missing");
        let store = ResultStore::new(dir.join("timing_result.json"));
        assert!(store.load().expect("first run").is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn saved_results_reload_with_time_last() {
        let dir = scratch_dir("reload");
        let store = ResultStore::new(dir.join("timing_result.json"));
        let results = vec![
            RunResult::new(
                RunConfig::from_pairs([("threads", 12), ("batch_size", 32)]),
                &RunOutcome::Timed("1.23".to_string()),
            ),
            RunResult::new(
                RunConfig::from_pairs([("threads", 16), ("batch_size", 32)]),
                &RunOutcome::Failed("exit_status: 1".to_string()),
            ),
        ];
        store.save(&results).expect("save");
        assert_eq!(store.load().expect("load"), results);

        let raw = fs::read_to_string(store.path()).expect("raw");
        let threads_at = raw.find("\"threads\"").expect("threads key");
        let time_at = raw.find("\"time\"").expect("time key");
        assert!(threads_at < time_at);
        assert!(raw.contains("\"nan\""));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn records_written_by_other_tools_are_accepted() {
        let dir = scratch_dir("foreign");
        let path = dir.join("timing_result.json");
        fs::write(
            &path,
            r#"[{"time": "9.5", "loader_workers": 1, "threads": 8}]"#,
        )
        .expect("seed");
        let loaded = ResultStore::new(&path).load().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].time, "9.5");
        assert_eq!(loaded[0].config.get("threads"), Some(8));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn malformed_records_are_fatal() {
        let dir = scratch_dir("malformed");
        let path = dir.join("timing_result.json");
        let store = ResultStore::new(&path);

        fs::write(&path, r#"[{"threads": 8}]"#).expect("seed");
        let err = store.load().expect_err("missing time");
        assert!(err.to_string().contains("results_malformed"), "{}", err);

        fs::write(&path, r#"[{"threads": 8.5, "time": "1.0"}]"#).expect("seed");
        assert!(store.load().is_err());

        fs::write(&path, "not json").expect("seed");
        assert!(store.load().is_err());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn failed_outcome_collapses_to_sentinel() {
        let outcome = RunOutcome::Failed("empty_output".to_string());
        assert_eq!(outcome.timing(), NAN_SENTINEL);
        assert!(!outcome.is_success());
        let result = RunResult::new(RunConfig::default(), &outcome);
        assert!(result.is_failed());
    }
}
