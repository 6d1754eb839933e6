mod calendar;
mod error;
mod mutations;
mod queries;
mod rules;
mod slots;

pub use calendar::CalendarIndex;
pub use error::EngineError;
pub use rules::{evaluate_booking, evaluate_cancel, evaluate_reschedule, RuleViolation};
pub use slots::{generate_slots, slot_exists};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::directory::Directory;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// The booking transaction manager for one unit. Owns the appointment
/// history (rebuilt from the WAL), the calendar index derived from it, and
/// the per-slot locks serializing check-then-write sequences.
pub struct Engine {
    pub(super) appointments: DashMap<Ulid, Appointment>,
    pub(super) calendar: CalendarIndex,
    pub(super) credits: DashMap<Ulid, ClientCredits>,
    /// One mutex per (barber, date, time); requests for different keys
    /// proceed fully in parallel.
    pub(super) slot_locks: DashMap<SlotKey, Arc<Mutex<()>>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) directory: Arc<dyn Directory>,
    pub(super) lock_wait: Duration,
    pub(super) pending_ttl: chrono::Duration,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        directory: Arc<dyn Directory>,
        lock_wait: Duration,
        pending_ttl: chrono::Duration,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            appointments: DashMap::new(),
            calendar: CalendarIndex::new(),
            credits: DashMap::new(),
            slot_locks: DashMap::new(),
            wal_tx,
            notify,
            directory,
            lock_wait,
            pending_ttl,
        };

        for event in &events {
            engine.apply_event(event);
        }

        Ok(engine)
    }

    /// Apply a committed (or replayed) event to in-memory state. Events are
    /// valid by construction — validation happened before the WAL append.
    pub(super) fn apply_event(&self, event: &Event) {
        match event {
            Event::Booked { appointment } => {
                // Inactive snapshots come from WAL compaction — they hold no
                // slot and their credit debit is already settled.
                if appointment.is_active() {
                    self.calendar.mark_booked(
                        appointment.barber_id,
                        appointment.date,
                        appointment.time,
                    );
                    if appointment.used_plan_credit {
                        let mut c = self.credits.entry(appointment.client_id).or_default();
                        c.plan = c.plan.saturating_sub(1);
                    }
                    if appointment.used_referral_credit {
                        let mut c = self.credits.entry(appointment.client_id).or_default();
                        c.referral = c.referral.saturating_sub(1);
                    }
                }
                self.appointments.insert(appointment.id, appointment.clone());
            }
            Event::PendingConfirmed { id, .. } => {
                if let Some(mut a) = self.appointments.get_mut(id) {
                    a.status = AppointmentStatus::Confirmed;
                    a.expires_at = None;
                }
            }
            Event::Cancelled { id, at, reason, .. } => {
                if let Some(mut a) = self.appointments.get_mut(id) {
                    if a.is_active() {
                        self.calendar.clear(a.barber_id, a.date, a.time);
                        // Credit back exactly what the booking debited. A
                        // no-show keeps the consumed credit.
                        if *reason != CancelReason::NoShow {
                            if a.used_plan_credit {
                                self.credits.entry(a.client_id).or_default().plan += 1;
                            }
                            if a.used_referral_credit {
                                self.credits.entry(a.client_id).or_default().referral += 1;
                            }
                        }
                    }
                    a.status = AppointmentStatus::Cancelled;
                    a.cancelled_at = Some(*at);
                    a.cancel_reason = Some(*reason);
                    a.expires_at = None;
                }
            }
            Event::Rescheduled { id, date, time, .. } => {
                if let Some(mut a) = self.appointments.get_mut(id) {
                    self.calendar.clear(a.barber_id, a.date, a.time);
                    a.date = *date;
                    a.time = *time;
                    self.calendar.mark_booked(a.barber_id, *date, *time);
                }
            }
            Event::Completed { id, .. } => {
                if let Some(mut a) = self.appointments.get_mut(id) {
                    a.status = AppointmentStatus::Completed;
                }
            }
            Event::Rated { id, rating, .. } => {
                if let Some(mut a) = self.appointments.get_mut(id) {
                    a.rating = Some(*rating);
                }
            }
            Event::PlanCreditsGranted { client_id, count } => {
                self.credits.entry(*client_id).or_default().plan += count;
            }
            Event::ReferralCreditGranted { client_id } => {
                self.credits.entry(*client_id).or_default().referral += 1;
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + apply + notify in one call — the commit sequence for
    /// every mutation.
    pub(super) async fn persist_and_apply(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_event(event);
        if let Some(barber_id) = event.barber_id() {
            self.notify.send(barber_id, event);
        }
        Ok(())
    }

    /// Acquire the per-slot mutex within the bounded wait, or reject with
    /// `SlotContended` rather than queueing indefinitely.
    pub(super) async fn lock_slot(&self, key: SlotKey) -> Result<OwnedMutexGuard<()>, EngineError> {
        let lock = self
            .slot_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        match tokio::time::timeout(self.lock_wait, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                metrics::counter!(crate::observability::SLOT_CONTENTION_TOTAL).increment(1);
                tracing::debug!(
                    barber = %key.barber_id,
                    date = %key.date,
                    time = %key.time,
                    "slot lock contended"
                );
                Err(EngineError::SlotContended)
            }
        }
    }

    pub(super) async fn schedule_for(&self, barber_id: Ulid) -> Result<WorkingSchedule, EngineError> {
        self.directory
            .working_schedule(barber_id)
            .await
            .ok_or(EngineError::BarberUnknown(barber_id))
    }

    pub fn get_appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.appointments.get(id).map(|a| a.clone())
    }
}
