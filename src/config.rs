use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::limits::{DEFAULT_LOCK_WAIT_MS, DEFAULT_PENDING_TTL_MINUTES};
use crate::model::AppointmentRules;

/// Runtime configuration for an embedding process, read from the
/// environment. Booking rules themselves live in `AppointmentRules` and come
/// from the shop's settings document.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding one WAL file per unit.
    pub data_dir: PathBuf,
    /// Bounded wait for the per-slot lock before `SlotContended`.
    pub lock_wait: Duration,
    /// Lifetime of an unconfirmed pending booking.
    pub pending_ttl: chrono::Duration,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    /// Prometheus exporter port; None disables the exporter.
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_wait: Duration::from_millis(DEFAULT_LOCK_WAIT_MS),
            pending_ttl: chrono::Duration::minutes(DEFAULT_PENDING_TTL_MINUTES),
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    /// Read configuration from `CHAIRTIME_*` environment variables, falling
    /// back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let data_dir = std::env::var("CHAIRTIME_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let lock_wait = env_u64("CHAIRTIME_LOCK_WAIT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_wait);
        let pending_ttl = env_u64("CHAIRTIME_PENDING_TTL_MINUTES")
            .map(|m| chrono::Duration::minutes(m as i64))
            .unwrap_or(defaults.pending_ttl);
        let compact_threshold =
            env_u64("CHAIRTIME_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold);
        let metrics_port = std::env::var("CHAIRTIME_METRICS_PORT")
            .ok()
            .and_then(|s| s.parse().ok());

        Self {
            data_dir,
            lock_wait,
            pending_ttl,
            compact_threshold,
            metrics_port,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Load booking rules from a JSON settings file. Missing fields fall back to
/// defaults; `slot_duration_minutes` of zero is rejected.
pub fn load_rules(path: &Path) -> io::Result<AppointmentRules> {
    let raw = std::fs::read_to_string(path)?;
    let rules: AppointmentRules = serde_json::from_str(&raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if rules.slot_duration_minutes == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "slot_duration_minutes must be positive",
        ));
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tmp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("chairtime_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn load_rules_partial_document() {
        let path = tmp_file(
            "partial.json",
            r#"{"min_advance_hours": 12, "max_advance_days": 60}"#,
        );
        let rules = load_rules(&path).unwrap();
        assert_eq!(rules.min_advance_hours, 12);
        assert_eq!(rules.max_advance_days, 60);
        assert_eq!(rules.slot_duration_minutes, 30);
    }

    #[test]
    fn load_rules_rejects_zero_slot_duration() {
        let path = tmp_file("zero_slot.json", r#"{"slot_duration_minutes": 0}"#);
        assert!(load_rules(&path).is_err());
    }

    #[test]
    fn load_rules_rejects_garbage() {
        let path = tmp_file("garbage.json", "not json");
        assert!(load_rules(&path).is_err());
    }

    #[test]
    fn default_config_is_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.lock_wait > Duration::ZERO);
        assert!(cfg.pending_ttl > chrono::Duration::zero());
        assert!(cfg.metrics_port.is_none());
    }
}
