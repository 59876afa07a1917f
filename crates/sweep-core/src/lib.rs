use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Digest of `name=value` pairs sorted by name, so the result does not depend
/// on the order the pairs were supplied in.
pub fn canonical_pairs_digest<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let mut sorted: Vec<(&str, String)> = pairs.into_iter().collect();
    sorted.sort();
    let canonical = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n");
    sha256_bytes(canonical.as_bytes())
}

/// Replaces `path` with `bytes` via a synced temp file and a rename, so a
/// reader never observes a partially written file.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sweep_core_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("scratch dir");
        dir
    }

    #[test]
    fn pairs_digest_ignores_input_order() {
        let a = canonical_pairs_digest(vec![
            ("threads", "12".to_string()),
            ("batch_size", "32".to_string()),
        ]);
        let b = canonical_pairs_digest(vec![
            ("batch_size", "32".to_string()),
            ("threads", "12".to_string()),
        ]);
        assert_eq!(a, b);
        assert!(a.starts_with("sha256:"));
    }

    #[test]
    fn pairs_digest_distinguishes_values() {
        let a = canonical_pairs_digest(vec![("threads", "12".to_string())]);
        let b = canonical_pairs_digest(vec![("threads", "16".to_string())]);
        assert_ne!(a, b);
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = scratch_dir("atomic");
        let path = dir.join("nested").join("out.json");
        atomic_write_json_pretty(&path, &json!([1, 2])).expect("first write");
        atomic_write_json_pretty(&path, &json!([3])).expect("second write");
        let back: Value = serde_json::from_slice(&fs::read(&path).expect("read")).expect("json");
        assert_eq!(back, json!([3]));
        let leftovers = fs::read_dir(path.parent().expect("parent"))
            .expect("list")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .count();
        assert_eq!(leftovers, 0);
        let _ = fs::remove_dir_all(dir);
    }
}
