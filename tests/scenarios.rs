use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use futures::future::join_all;
use ulid::Ulid;

use wicket::clock::ManualClock;
use wicket::coaching::InMemoryCoaching;
use wicket::config::{AvailabilityPolicy, SchedulingRules};
use wicket::engine::{Engine, EngineError, PolicyError};
use wicket::model::*;
use wicket::recurrence::RecurrencePattern;
use wicket::time::Span;

// ── Test infrastructure ──────────────────────────────────────

struct World {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    coaching: Arc<InMemoryCoaching>,
}

fn open_world(now: NaiveDateTime) -> World {
    let dir = std::env::temp_dir().join(format!("wicket_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path: PathBuf = dir.join("bookings.wal");
    let clock = Arc::new(ManualClock::new(now));
    let coaching = Arc::new(InMemoryCoaching::new());
    let engine = Engine::new(path, SchedulingRules::default(), clock.clone(), coaching.clone()).unwrap();
    World {
        engine: Arc::new(engine),
        clock,
        coaching,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn span(a: &str, b: &str) -> Span {
    Span::parse(a, b).unwrap()
}

async fn ground(engine: &Engine, name: &str, slots: u8) -> Ground {
    engine
        .create_ground(NewGround {
            name: name.into(),
            location: "Oval Road".into(),
            price_per_slot: 1200,
            total_slots: slots,
            facilities: vec!["pavilion".into(), "floodlights".into()],
            equipment: vec!["bowling machine".into()],
        })
        .await
        .unwrap()
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_booking_releases_its_interval() {
    let world = open_world(date(2024, 5, 20).and_hms_opt(9, 0, 0).unwrap());
    let a = ground(&world.engine, "A", 1).await;
    let day = date(2024, 6, 1);

    let first = world
        .engine
        .create_booking(NewBooking::new(a.id, 1, day, span("14:00", "16:00"), BookingType::Match))
        .await
        .unwrap();

    let retry = NewBooking::new(a.id, 1, day, span("15:00", "17:00"), BookingType::Practice);
    let err = world.engine.create_booking(retry.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(id) if id == first.id));

    world.engine.cancel_booking(first.id, "fixture moved").await.unwrap();
    let second = world.engine.create_booking(retry).await.unwrap();
    assert_eq!(second.span, span("15:00", "17:00"));
    assert_eq!(second.price, 2400);
}

#[tokio::test]
async fn reschedule_cannot_leave_the_program_week() {
    // Enrollment starts Monday 2024-06-03; week 2 is 06-10..=06-16.
    let world = open_world(date(2024, 6, 3).and_hms_opt(7, 0, 0).unwrap());
    let g = ground(&world.engine, "Academy", 2).await;
    let enrollment_id = Ulid::new();
    world.coaching.add_enrollment(enrollment_id, date(2024, 6, 3));
    let link = SessionLink {
        session_id: Ulid::new(),
        enrollment_id,
        week_number: 2,
        coach_id: None,
    };

    let monday = world
        .engine
        .create_booking(
            NewBooking::new(g.id, 1, date(2024, 6, 10), span("17:00", "18:00"), BookingType::Session)
                .with_session(link),
        )
        .await
        .unwrap();

    let week_three = RescheduleRequest {
        date: date(2024, 6, 17),
        start: "17:00".parse().unwrap(),
        slot: 1,
    };
    assert!(world
        .engine
        .is_slot_available(g.id, 1, week_three.date, span("17:00", "18:00"), None)
        .await
        .unwrap());
    let err = world.engine.reschedule_booking(monday.id, week_three).await.unwrap_err();
    assert!(matches!(err, EngineError::Policy(PolicyError::OutsideSchedulingWeek { .. })));

    let sunday = RescheduleRequest {
        date: date(2024, 6, 16),
        ..week_three
    };
    let moved = world.engine.reschedule_booking(monday.id, sunday).await.unwrap();
    assert_eq!(moved.date, date(2024, 6, 16));
    assert_eq!(
        world
            .engine
            .booking_for_session(link.session_id)
            .await
            .unwrap()
            .date,
        date(2024, 6, 16)
    );
}

#[tokio::test]
async fn weekly_series_books_every_free_week() {
    let world = open_world(date(2024, 6, 1).and_hms_opt(12, 0, 0).unwrap());
    let g = ground(&world.engine, "Club Nets", 1).await;

    let outcomes = world
        .engine
        .expand_recurring(
            NewBooking::new(g.id, 1, date(2024, 6, 4), span("18:00", "20:00"), BookingType::Training),
            &RecurrencePattern::weekly(4),
        )
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| o.is_committed()));
    assert_eq!(outcomes[3].date, date(2024, 6, 25));

    let again = world
        .engine
        .expand_recurring(
            NewBooking::new(g.id, 1, date(2024, 6, 4), span("19:00", "21:00"), BookingType::Training),
            &RecurrencePattern::weekly(5),
        )
        .await
        .unwrap();
    let committed: Vec<NaiveDate> = again
        .iter()
        .filter(|o| o.is_committed())
        .map(|o| o.date)
        .collect();
    assert_eq!(committed, vec![date(2024, 7, 2)]);
}

#[tokio::test]
async fn every_open_bucket_can_be_booked() {
    let world = open_world(date(2024, 6, 10).and_hms_opt(11, 15, 0).unwrap());
    let g = ground(&world.engine, "Main Oval", 3).await;
    let today = date(2024, 6, 10);
    world
        .engine
        .create_booking(NewBooking::new(g.id, 2, today, span("13:00", "14:30"), BookingType::Match))
        .await
        .unwrap();

    let policy = AvailabilityPolicy::combined();
    let grid = world.engine.availability(g.id, today, &policy).await.unwrap();
    assert_eq!(grid.open_slots_for(&span("13:00", "14:00")), vec![1, 3]);
    assert!(grid.open_slots_for(&span("11:00", "12:00")).is_empty(), "already started");

    let mut attempts = Vec::new();
    for row in &grid.slots {
        for bucket in row.buckets.iter().filter(|b| b.available) {
            attempts.push(world.engine.create_booking(NewBooking::new(
                g.id,
                row.slot,
                today,
                bucket.span,
                BookingType::Practice,
            )));
        }
    }
    let results = join_all(attempts).await;
    assert!(results.iter().all(Result::is_ok));

    let grid = world.engine.availability(g.id, today, &policy).await.unwrap();
    assert!(grid.slots.iter().all(|row| row.buckets.iter().all(|b| !b.available)));
    assert!(world.engine.audit_overlaps().await.is_empty());
}

#[tokio::test]
async fn subscribers_follow_the_lifecycle() {
    let world = open_world(date(2024, 6, 1).and_hms_opt(8, 0, 0).unwrap());
    let g = ground(&world.engine, "Main Oval", 1).await;
    let mut rx = world.engine.notify.subscribe(g.id);

    let b = world
        .engine
        .create_booking(NewBooking::new(g.id, 1, date(2024, 6, 2), span("10:00", "13:00"), BookingType::Match))
        .await
        .unwrap();
    world.engine.confirm_booking(b.id).await.unwrap();
    world.clock.set(date(2024, 6, 2).and_hms_opt(14, 0, 0).unwrap());
    world
        .engine
        .complete_booking(
            b.id,
            GroundReport {
                condition: GroundCondition::Fair,
                notes: Some("square needs rolling".into()),
            },
        )
        .await
        .unwrap();

    let mut kinds = Vec::new();
    for _ in 0..3 {
        kinds.push(match rx.recv().await.unwrap() {
            Event::BookingCreated { .. } => "created",
            Event::BookingConfirmed { .. } => "confirmed",
            Event::BookingCompleted { .. } => "completed",
            _ => "other",
        });
    }
    assert_eq!(kinds, vec!["created", "confirmed", "completed"]);
}
