use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::conflict::overlapping_pairs;
use super::{Engine, EngineError, Entity, SharedSlotLedger};

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (_, ledger) = self.lock_booking_read(id).await?;
        ledger
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Booking, id))
    }

    /// The single active booking for a coaching session.
    pub async fn booking_for_session(&self, session_id: Ulid) -> Result<Booking, EngineError> {
        let booking_id = self
            .session_index
            .get(&session_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(Entity::Session, session_id))?;
        self.get_booking(booking_id).await
    }

    /// Every booking on a ground for one date, cancelled included,
    /// ordered by slot then start.
    pub async fn bookings_on(&self, ground_id: Ulid, date: NaiveDate) -> Result<Vec<Booking>, EngineError> {
        let ground = self.get_ground(ground_id).await?;
        let mut out = Vec::new();
        for slot in 1..=ground.total_slots {
            if let Some(ledger) = self.existing_ledger(&SlotKey { ground_id, slot, date }) {
                out.extend(ledger.read().await.bookings.iter().cloned());
            }
        }
        Ok(out)
    }

    /// Scan every ledger for overlapping active bookings. Always empty unless
    /// the store was edited behind the engine's back.
    pub async fn audit_overlaps(&self) -> Vec<OverlapReport> {
        let mut ledgers = self.all_ledgers();
        ledgers.sort_by_key(|(k, _)| *k);
        let mut reports = Vec::new();
        for (_, ledger) in ledgers {
            reports.extend(overlapping_pairs(&*ledger.read().await));
        }
        if !reports.is_empty() {
            tracing::error!("audit found {} overlapping booking pairs", reports.len());
        }
        reports
    }

    pub async fn summary(&self) -> EngineSummary {
        let grounds: Vec<_> = self.grounds.iter().map(|e| e.value().clone()).collect();
        let mut active_grounds = 0;
        for g in &grounds {
            if g.read().await.active {
                active_grounds += 1;
            }
        }

        let mut bookings = 0;
        let mut active_bookings = 0;
        for (_, ledger) in self.all_ledgers() {
            let guard = ledger.read().await;
            bookings += guard.bookings.len();
            active_bookings += guard.bookings.iter().filter(|b| !b.status.is_terminal()).count();
        }

        EngineSummary {
            grounds: grounds.len(),
            active_grounds,
            bookings,
            active_bookings,
        }
    }

    fn all_ledgers(&self) -> Vec<(SlotKey, SharedSlotLedger)> {
        self.ledgers.iter().map(|e| (*e.key(), e.value().clone())).collect()
    }
}
