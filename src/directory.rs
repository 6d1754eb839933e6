use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::{AppointmentRules, WorkingSchedule};

/// Read-only collaborators owned by the surrounding application: barber
/// schedules and the shop's booking rules. Lookups may suspend awaiting a
/// storage round-trip; the engine never writes through this boundary.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn working_schedule(&self, barber_id: Ulid) -> Option<WorkingSchedule>;
    async fn rules(&self) -> AppointmentRules;
}

/// In-memory directory for tests and single-process embeddings.
pub struct StaticDirectory {
    schedules: DashMap<Ulid, WorkingSchedule>,
    rules: RwLock<AppointmentRules>,
}

impl StaticDirectory {
    pub fn new(rules: AppointmentRules) -> Self {
        Self {
            schedules: DashMap::new(),
            rules: RwLock::new(rules),
        }
    }

    pub fn set_schedule(&self, barber_id: Ulid, schedule: WorkingSchedule) {
        self.schedules.insert(barber_id, schedule);
    }

    pub fn remove_schedule(&self, barber_id: &Ulid) {
        self.schedules.remove(barber_id);
    }

    pub async fn set_rules(&self, rules: AppointmentRules) {
        *self.rules.write().await = rules;
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn working_schedule(&self, barber_id: Ulid) -> Option<WorkingSchedule> {
        self.schedules.get(&barber_id).map(|e| e.value().clone())
    }

    async fn rules(&self) -> AppointmentRules {
        self.rules.read().await.clone()
    }
}
