use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::rules::{evaluate_booking, evaluate_cancel, evaluate_reschedule};
use super::{now, Engine, EngineError, WalCommand};

/// Record a rejection metric and pass the error through.
fn reject(operation: &'static str, err: EngineError) -> EngineError {
    metrics::counter!(
        observability::REJECTIONS_TOTAL,
        "operation" => operation,
        "reason" => observability::reason_label(&err)
    )
    .increment(1);
    err
}

fn committed(operation: &'static str) {
    metrics::counter!(observability::BOOKINGS_TOTAL, "operation" => operation).increment(1);
}

impl Engine {
    /// Reserve a slot and create a confirmed appointment. The rule and
    /// calendar checks run again under the per-slot lock, so two concurrent
    /// requests for the same slot cannot both succeed.
    pub async fn book(&self, candidate: BookingCandidate) -> Result<Appointment, EngineError> {
        self.commit_booking(candidate, AppointmentStatus::Confirmed, "book")
            .await
    }

    /// Same validation as `book`, but the appointment starts out pending with
    /// an expiry — the client-flow confirmation step. The slot is reserved
    /// until confirmed, cancelled, or reaped.
    pub async fn request(&self, candidate: BookingCandidate) -> Result<Appointment, EngineError> {
        self.commit_booking(candidate, AppointmentStatus::Pending, "request")
            .await
    }

    async fn commit_booking(
        &self,
        candidate: BookingCandidate,
        status: AppointmentStatus,
        operation: &'static str,
    ) -> Result<Appointment, EngineError> {
        if self.appointments.len() >= MAX_APPOINTMENTS_PER_UNIT {
            return Err(reject(operation, EngineError::LimitExceeded("too many appointments")));
        }

        let _guard = self
            .lock_slot(candidate.slot_key())
            .await
            .map_err(|e| reject(operation, e))?;

        let schedule = self
            .schedule_for(candidate.barber_id)
            .await
            .map_err(|e| reject(operation, e))?;
        let rules = self.directory.rules().await;
        let now = now();

        if !self.calendar.is_free(
            candidate.barber_id,
            candidate.date,
            candidate.time,
            &schedule,
            rules.slot_duration_minutes,
        ) {
            return Err(reject(operation, EngineError::SlotUnavailable));
        }

        let counters = self.counters_for(candidate.client_id, candidate.date, now, None);
        evaluate_booking(candidate.start(), &rules, now, &counters)
            .map_err(|v| reject(operation, v.into()))?;

        let balance = self.credit_balance(candidate.client_id);
        if candidate.use_plan_credit && balance.plan == 0 {
            return Err(reject(operation, EngineError::InsufficientCredit("plan")));
        }
        if candidate.use_referral_credit && balance.referral == 0 {
            return Err(reject(operation, EngineError::InsufficientCredit("referral")));
        }

        let expires_at = match status {
            AppointmentStatus::Pending => Some(now + self.pending_ttl),
            _ => None,
        };
        let appointment = Appointment {
            id: Ulid::new(),
            barber_id: candidate.barber_id,
            service_id: candidate.service_id,
            client_id: candidate.client_id,
            date: candidate.date,
            time: candidate.time,
            status,
            price_cents: candidate.price_cents,
            used_plan_credit: candidate.use_plan_credit,
            used_referral_credit: candidate.use_referral_credit,
            rating: None,
            booked_at: now,
            cancelled_at: None,
            cancel_reason: None,
            expires_at,
        };

        let event = Event::Booked { appointment: appointment.clone() };
        self.persist_and_apply(&event).await?;
        committed(operation);
        Ok(appointment)
    }

    /// Promote a pending appointment to confirmed.
    pub async fn confirm_pending(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let _guard = self
            .lock_slot(SlotKey::new(existing.barber_id, existing.date, existing.time))
            .await?;

        // Re-read under the lock
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        match existing.status {
            AppointmentStatus::Pending => {
                // A lapsed request is reaper territory even if the reaper
                // hasn't come around yet
                if existing.expires_at.is_some_and(|e| e <= now()) {
                    return Err(EngineError::InvalidTransition {
                        id,
                        from: AppointmentStatus::Pending,
                    });
                }
            }
            AppointmentStatus::Cancelled => return Err(EngineError::AlreadyCancelled(id)),
            from => return Err(EngineError::InvalidTransition { id, from }),
        }

        let event = Event::PendingConfirmed { id, barber_id: existing.barber_id };
        self.persist_and_apply(&event).await?;
        committed("confirm");
        Ok(self.get_appointment(&id).ok_or(EngineError::NotFound(id))?)
    }

    /// Client-initiated cancellation. Subject to the cancellation cutoff and
    /// the monthly cap; frees the slot and restores any credit the booking
    /// debited. A second cancel is rejected with `AlreadyCancelled` and
    /// changes nothing.
    pub async fn cancel(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let _guard = self
            .lock_slot(SlotKey::new(existing.barber_id, existing.date, existing.time))
            .await
            .map_err(|e| reject("cancel", e))?;

        // Re-read under the lock — a concurrent cancel may have won
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        match existing.status {
            AppointmentStatus::Cancelled => {
                return Err(reject("cancel", EngineError::AlreadyCancelled(id)));
            }
            AppointmentStatus::Completed => {
                return Err(reject(
                    "cancel",
                    EngineError::InvalidTransition { id, from: AppointmentStatus::Completed },
                ));
            }
            AppointmentStatus::Pending | AppointmentStatus::Confirmed => {}
        }

        let rules = self.directory.rules().await;
        let now = now();
        let counters = self.counters_for(existing.client_id, existing.date, now, None);
        evaluate_cancel(existing.start(), &rules, now, &counters)
            .map_err(|v| reject("cancel", v.into()))?;

        let event = Event::Cancelled {
            id,
            barber_id: existing.barber_id,
            at: now,
            reason: CancelReason::Client,
        };
        self.persist_and_apply(&event).await?;
        committed("cancel");
        Ok(self.get_appointment(&id).ok_or(EngineError::NotFound(id))?)
    }

    /// Move an appointment to a new slot as an atomic pair: the cutoff is
    /// checked against the original start, the new slot runs the full booking
    /// validation, and only then is the old slot released and the new one
    /// reserved — never both, never neither.
    pub async fn reschedule(
        &self,
        id: Ulid,
        new_date: NaiveDate,
        new_time: NaiveTime,
    ) -> Result<Appointment, EngineError> {
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let old_key = SlotKey::new(existing.barber_id, existing.date, existing.time);
        let new_key = SlotKey::new(existing.barber_id, new_date, new_time);
        if old_key == new_key {
            return Err(reject("reschedule", EngineError::SlotUnavailable));
        }

        // Acquire both slot locks in sorted key order to prevent deadlocks.
        let (first, second) = if old_key < new_key {
            (old_key, new_key)
        } else {
            (new_key, old_key)
        };
        let _g1 = self.lock_slot(first).await.map_err(|e| reject("reschedule", e))?;
        let _g2 = self.lock_slot(second).await.map_err(|e| reject("reschedule", e))?;

        // Re-read under the locks
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        match existing.status {
            AppointmentStatus::Cancelled => {
                return Err(reject("reschedule", EngineError::AlreadyCancelled(id)));
            }
            AppointmentStatus::Completed => {
                return Err(reject(
                    "reschedule",
                    EngineError::InvalidTransition { id, from: AppointmentStatus::Completed },
                ));
            }
            AppointmentStatus::Pending | AppointmentStatus::Confirmed => {}
        }

        let rules = self.directory.rules().await;
        let now = now();
        evaluate_reschedule(existing.start(), &rules, now)
            .map_err(|v| reject("reschedule", v.into()))?;

        let schedule = self
            .schedule_for(existing.barber_id)
            .await
            .map_err(|e| reject("reschedule", e))?;
        if !self.calendar.is_free(
            existing.barber_id,
            new_date,
            new_time,
            &schedule,
            rules.slot_duration_minutes,
        ) {
            return Err(reject("reschedule", EngineError::SlotUnavailable));
        }

        // The moved appointment must not count against its own daily limit.
        let counters = self.counters_for(existing.client_id, new_date, now, Some(id));
        evaluate_booking(new_date.and_time(new_time), &rules, now, &counters)
            .map_err(|v| reject("reschedule", v.into()))?;

        let event = Event::Rescheduled {
            id,
            barber_id: existing.barber_id,
            date: new_date,
            time: new_time,
        };
        self.persist_and_apply(&event).await?;
        committed("reschedule");
        Ok(self.get_appointment(&id).ok_or(EngineError::NotFound(id))?)
    }

    /// Service delivered. External trigger from the admin flow; serialized
    /// against cancel through the slot lock so only one of them commits.
    pub async fn complete(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let _guard = self
            .lock_slot(SlotKey::new(existing.barber_id, existing.date, existing.time))
            .await?;

        // Re-read under the lock — a concurrent cancel may have won
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        match existing.status {
            AppointmentStatus::Confirmed => {}
            AppointmentStatus::Cancelled => return Err(EngineError::AlreadyCancelled(id)),
            from => return Err(EngineError::InvalidTransition { id, from }),
        }
        let event = Event::Completed { id, barber_id: existing.barber_id };
        self.persist_and_apply(&event).await?;
        Ok(self.get_appointment(&id).ok_or(EngineError::NotFound(id))?)
    }

    /// Rate a completed appointment, once, 1..=5.
    pub async fn rate(&self, id: Ulid, rating: u8) -> Result<Appointment, EngineError> {
        if !(1..=5).contains(&rating) {
            return Err(EngineError::InvalidRating(rating));
        }
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let _guard = self
            .lock_slot(SlotKey::new(existing.barber_id, existing.date, existing.time))
            .await?;

        // Re-read under the lock — two racing ratings must not both land
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        if existing.status != AppointmentStatus::Completed {
            return Err(EngineError::InvalidTransition { id, from: existing.status });
        }
        if existing.rating.is_some() {
            return Err(EngineError::AlreadyRated(id));
        }
        let event = Event::Rated { id, barber_id: existing.barber_id, rating };
        self.persist_and_apply(&event).await?;
        Ok(self.get_appointment(&id).ok_or(EngineError::NotFound(id))?)
    }

    /// Mark a confirmed, past-start appointment as a no-show. Starts the
    /// client's penalty window; the consumed credit is not restored.
    pub async fn record_no_show(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let _guard = self
            .lock_slot(SlotKey::new(existing.barber_id, existing.date, existing.time))
            .await?;

        // Re-read under the lock — a concurrent cancel or complete may have won
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let now = now();
        if existing.status != AppointmentStatus::Confirmed || existing.start() > now {
            return Err(EngineError::InvalidTransition { id, from: existing.status });
        }
        let event = Event::Cancelled {
            id,
            barber_id: existing.barber_id,
            at: now,
            reason: CancelReason::NoShow,
        };
        self.persist_and_apply(&event).await?;
        Ok(self.get_appointment(&id).ok_or(EngineError::NotFound(id))?)
    }

    /// Cancel a lapsed pending appointment. Reaper path — bypasses the
    /// cancellation cutoff and does not count against the client's cap.
    pub async fn expire_pending(&self, id: Ulid) -> Result<(), EngineError> {
        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let _guard = self
            .lock_slot(SlotKey::new(existing.barber_id, existing.date, existing.time))
            .await?;

        let existing = self.get_appointment(&id).ok_or(EngineError::NotFound(id))?;
        let now = now();
        let lapsed = existing.status == AppointmentStatus::Pending
            && existing.expires_at.is_some_and(|e| e <= now);
        if !lapsed {
            return Err(EngineError::InvalidTransition { id, from: existing.status });
        }

        let event = Event::Cancelled {
            id,
            barber_id: existing.barber_id,
            at: now,
            reason: CancelReason::Expired,
        };
        self.persist_and_apply(&event).await?;
        metrics::counter!(observability::PENDING_EXPIRED_TOTAL).increment(1);
        Ok(())
    }

    /// Pending appointments whose expiry has lapsed as of `now`.
    pub fn collect_expired_pending(&self, now: NaiveDateTime) -> Vec<Ulid> {
        self.appointments
            .iter()
            .filter(|a| {
                a.status == AppointmentStatus::Pending
                    && a.expires_at.is_some_and(|e| e <= now)
            })
            .map(|a| a.id)
            .collect()
    }

    // ── Credit grants (from the surrounding app) ─────────────

    pub async fn grant_plan_credits(&self, client_id: Ulid, count: u32) -> Result<(), EngineError> {
        if count == 0 || count > MAX_CREDIT_GRANT {
            return Err(EngineError::LimitExceeded("credit grant out of range"));
        }
        self.persist_and_apply(&Event::PlanCreditsGranted { client_id, count })
            .await
    }

    pub async fn grant_referral_credit(&self, client_id: Ulid) -> Result<(), EngineError> {
        self.persist_and_apply(&Event::ReferralCreditGranted { client_id })
            .await
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Compact the WAL down to the events needed to recreate current state:
    /// credit grants first (sized so that replaying the active bookings'
    /// debits lands on today's balances), then one `Booked` snapshot per
    /// appointment.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut grants: HashMap<Ulid, ClientCredits> = HashMap::new();
        for entry in self.credits.iter() {
            grants.insert(*entry.key(), *entry.value());
        }
        for a in self.appointments.iter() {
            if !a.is_active() {
                continue;
            }
            let g = grants.entry(a.client_id).or_default();
            if a.used_plan_credit {
                g.plan += 1;
            }
            if a.used_referral_credit {
                g.referral += 1;
            }
        }

        let mut events = Vec::new();
        for (client_id, credits) in grants {
            if credits.plan > 0 {
                events.push(Event::PlanCreditsGranted { client_id, count: credits.plan });
            }
            for _ in 0..credits.referral {
                events.push(Event::ReferralCreditGranted { client_id });
            }
        }
        for a in self.appointments.iter() {
            events.push(Event::Booked { appointment: a.value().clone() });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
