use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::GROUNDS_ACTIVE;

use super::{Engine, EngineError, SharedSlotLedger, ValidationError};

fn validate_ground_fields(ground: &Ground) -> Result<(), ValidationError> {
    if ground.name.trim().is_empty() {
        return Err(ValidationError::Empty("name"));
    }
    if ground.name.len() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong("name"));
    }
    if ground.location.len() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong("location"));
    }
    if !(1..=MAX_SLOTS_PER_GROUND).contains(&ground.total_slots) {
        return Err(ValidationError::InvalidSlotCount {
            got: ground.total_slots,
            max: MAX_SLOTS_PER_GROUND,
        });
    }
    for (field, tags) in [("facilities", &ground.facilities), ("equipment", &ground.equipment)] {
        if tags.len() > MAX_TAGS || tags.iter().any(|t| t.len() > MAX_NAME_LEN) {
            return Err(ValidationError::TooLong(field));
        }
    }
    Ok(())
}

fn compare(a: &Ground, b: &Ground, sort: GroundSort) -> Ordering {
    let primary = match sort {
        GroundSort::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        GroundSort::PricePerSlot => a.price_per_slot.cmp(&b.price_per_slot),
        GroundSort::CreatedAt => a.created_at.cmp(&b.created_at),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

impl Engine {
    pub async fn create_ground(&self, new: NewGround) -> Result<Ground, EngineError> {
        let _gate = self.commit_gate.read().await;
        if self.grounds.len() >= MAX_GROUNDS {
            return Err(EngineError::LimitExceeded("too many grounds"));
        }
        let ground = Ground {
            id: Ulid::new(),
            name: new.name.trim().to_string(),
            location: new.location,
            price_per_slot: new.price_per_slot,
            total_slots: new.total_slots,
            facilities: new.facilities,
            equipment: new.equipment,
            active: true,
            created_at: self.clock.now(),
        };
        validate_ground_fields(&ground)?;

        let event = Event::GroundCreated { ground: ground.clone() };
        self.wal_append(&event).await?;
        self.grounds.insert(ground.id, Arc::new(RwLock::new(ground.clone())));
        self.notify.send(ground.id, &event);
        metrics::gauge!(GROUNDS_ACTIVE).increment(1.0);
        tracing::info!("ground {} created with {} slots", ground.id, ground.total_slots);
        Ok(ground)
    }

    pub async fn get_ground(&self, id: Ulid) -> Result<Ground, EngineError> {
        let state = self.ground_state(&id)?;
        let guard = state.read().await;
        Ok(guard.clone())
    }

    /// Apply a partial update. Shrinking `total_slots` is refused while any
    /// booked or confirmed booking sits on a slot that would disappear.
    pub async fn update_ground(&self, id: Ulid, update: GroundUpdate) -> Result<Ground, EngineError> {
        let _gate = self.commit_gate.read().await;
        let state = self.ground_state(&id)?;
        // Exclusive: no create or reschedule can land on this ground meanwhile.
        let mut guard = state.write().await;

        let mut next = guard.clone();
        if let Some(name) = update.name {
            next.name = name.trim().to_string();
        }
        if let Some(location) = update.location {
            next.location = location;
        }
        if let Some(price) = update.price_per_slot {
            next.price_per_slot = price;
        }
        if let Some(total) = update.total_slots {
            next.total_slots = total;
        }
        if let Some(facilities) = update.facilities {
            next.facilities = facilities;
        }
        if let Some(equipment) = update.equipment {
            next.equipment = equipment;
        }
        validate_ground_fields(&next)?;

        if next.total_slots < guard.total_slots {
            self.check_slots_vacant(id, next.total_slots).await?;
        }

        let event = Event::GroundUpdated { ground: next.clone() };
        self.wal_append(&event).await?;
        *guard = next.clone();
        self.notify.send(id, &event);
        Ok(next)
    }

    /// Soft delete: the ground stays for history but accepts no new bookings.
    pub async fn deactivate_ground(&self, id: Ulid) -> Result<Ground, EngineError> {
        let _gate = self.commit_gate.read().await;
        let state = self.ground_state(&id)?;
        let mut guard = state.write().await;
        if !guard.active {
            return Ok(guard.clone());
        }

        let mut next = guard.clone();
        next.active = false;
        let event = Event::GroundUpdated { ground: next.clone() };
        self.wal_append(&event).await?;
        *guard = next.clone();
        self.notify.send(id, &event);
        metrics::gauge!(GROUNDS_ACTIVE).decrement(1.0);
        tracing::info!("ground {id} deactivated");
        Ok(next)
    }

    pub async fn list_grounds(&self, query: GroundQuery) -> GroundPage {
        let states: Vec<_> = self.grounds.iter().map(|e| e.value().clone()).collect();
        let mut grounds = Vec::with_capacity(states.len());
        for state in states {
            let g = state.read().await;
            if query.include_inactive || g.active {
                grounds.push(g.clone());
            }
        }

        grounds.sort_by(|a, b| {
            let ord = compare(a, b, query.sort);
            if query.descending { ord.reverse() } else { ord }
        });

        let total = grounds.len();
        let items = grounds
            .into_iter()
            .skip(query.offset)
            .take(query.limit.min(MAX_PAGE_SIZE))
            .collect();
        GroundPage { items, total }
    }

    /// Refuses while any active booking, completed ones included, sits on a
    /// slot that would disappear. Caller holds the ground write lock, so no
    /// booking can arrive on these ledgers while they are inspected.
    async fn check_slots_vacant(&self, ground_id: Ulid, total: u8) -> Result<(), EngineError> {
        let doomed: Vec<(SlotKey, SharedSlotLedger)> = self
            .ledgers
            .iter()
            .filter(|e| e.key().ground_id == ground_id && e.key().slot > total)
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        for (key, ledger) in doomed {
            let guard = ledger.read().await;
            if let Some(b) = guard.bookings.iter().find(|b| b.is_active()) {
                return Err(ValidationError::SlotsInUse {
                    total,
                    slot: key.slot,
                    booking: b.id,
                }
                .into());
            }
        }
        Ok(())
    }
}
