use std::sync::Arc;

use dashmap::DashMap;

use crate::config::EngineConfig;
use crate::directory::Directory;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// Manages per-unit engines. Each barbershop unit gets its own Engine + WAL
/// + reaper, keyed by unit name; units never see each other's calendars.
pub struct UnitManager {
    engines: DashMap<String, Arc<Engine>>,
    config: EngineConfig,
    directory: Arc<dyn Directory>,
}

impl UnitManager {
    pub fn new(config: EngineConfig, directory: Arc<dyn Directory>) -> Self {
        Self {
            engines: DashMap::new(),
            config,
            directory,
        }
    }

    /// Get or lazily create an engine for the given unit.
    pub fn get_or_create(&self, unit: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(unit) {
            return Ok(engine.value().clone());
        }
        if unit.len() > MAX_UNIT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "unit name too long",
            ));
        }
        if self.engines.len() >= MAX_UNITS {
            return Err(std::io::Error::other("too many units"));
        }

        // Sanitize unit name to prevent path traversal
        let safe_name: String = unit
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty unit name",
            ));
        }

        // Entry keeps creation atomic: two racing callers for the same name
        // must not each open the WAL and spawn maintenance tasks.
        let engine = self
            .engines
            .entry(unit.to_string())
            .or_try_insert_with(|| {
                let wal_path = self.config.data_dir.join(format!("{safe_name}.wal"));
                let notify = Arc::new(NotifyHub::new());
                let engine = Arc::new(Engine::new(
                    wal_path,
                    notify,
                    self.directory.clone(),
                    self.config.lock_wait,
                    self.config.pending_ttl,
                )?);

                // Spawn reaper + compactor only for the engine that won
                let reaper_engine = engine.clone();
                tokio::spawn(async move {
                    reaper::run_reaper(reaper_engine).await;
                });
                let compactor_engine = engine.clone();
                let threshold = self.config.compact_threshold;
                tokio::spawn(async move {
                    reaper::run_compactor(compactor_engine, threshold).await;
                });

                Ok::<_, std::io::Error>(engine)
            })?
            .clone();

        metrics::gauge!(crate::observability::UNITS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
