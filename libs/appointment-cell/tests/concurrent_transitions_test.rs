use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use uuid::Uuid;

use appointment_cell::models::*;
use appointment_cell::services::clock::{ClinicClock, FixedClock};
use appointment_cell::services::ledger::BookingLedger;
use appointment_cell::services::memory::InMemoryClinic;
use appointment_cell::services::scheduler::AppointmentScheduler;

fn friday_at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 7)
        .unwrap()
        .and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
}

struct Fixture {
    store: Arc<InMemoryClinic>,
    doctor_id: Uuid,
    client_id: Uuid,
    pet_id: Uuid,
}

fn fixture() -> Fixture {
    let doctor_id = Uuid::new_v4();
    let client_id = Uuid::new_v4();
    let pet_id = Uuid::new_v4();

    let store = InMemoryClinic::new()
        .with_doctor(Doctor {
            id: doctor_id,
            first_name: "Anna".to_string(),
            last_name: "Nowak".to_string(),
            specialization: None,
            is_active: true,
        })
        .with_client(Client {
            id: client_id,
            first_name: "Jan".to_string(),
            last_name: "Kowalski".to_string(),
            phone: None,
            email: None,
        })
        .with_pet(Pet {
            id: pet_id,
            client_id,
            name: "Burek".to_string(),
            species: "dog".to_string(),
            breed: None,
        })
        .with_working_hours(
            doctor_id,
            DayOfWeek::Friday,
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        );

    Fixture {
        store: Arc::new(store),
        doctor_id,
        client_id,
        pet_id,
    }
}

/// Saturday 2024-06-01 06:00 UTC, so Friday bookings cancel free of charge.
fn clinic_clock() -> ClinicClock {
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap()));
    ClinicClock::new(clock, Tz::UTC)
}

impl Fixture {
    fn scheduler(&self) -> AppointmentScheduler {
        AppointmentScheduler::with_store(self.store.clone(), clinic_clock(), SchedulingRules::default())
            .unwrap()
    }

    /// A scheduler whose next conditional write loses to `rival`, which
    /// lands between the scheduler's read and its write.
    fn scheduler_losing_to(&self, rival: Rival) -> AppointmentScheduler {
        let ledger = Arc::new(InterleavingLedger {
            inner: self.store.clone(),
            rival: Mutex::new(Some(rival)),
        });
        AppointmentScheduler::new(
            ledger,
            self.store.clone(),
            self.store.clone(),
            clinic_clock(),
            SchedulingRules::default(),
        )
        .unwrap()
    }

    async fn book(&self, at: NaiveDateTime) -> Uuid {
        let appointment = self
            .scheduler()
            .create(CreateAppointmentRequest {
                client_id: self.client_id,
                pet_id: self.pet_id,
                doctor_id: self.doctor_id,
                scheduled_at: at,
                duration_minutes: None,
                reason: Some("Check-up".to_string()),
                notes: None,
            })
            .await
            .unwrap();
        appointment.details.appointment.id
    }

    async fn status_of(&self, id: Uuid) -> AppointmentStatus {
        self.store.find(id).await.unwrap().unwrap().appointment.status
    }
}

#[derive(Debug, Clone, Copy)]
enum Rival {
    Cancel,
    Complete,
    Move(NaiveDateTime),
}

/// Delegates to the memory store, but lets another request win once, right
/// before the first conditional write.
struct InterleavingLedger {
    inner: Arc<InMemoryClinic>,
    rival: Mutex<Option<Rival>>,
}

impl InterleavingLedger {
    async fn let_rival_win(&self, id: Uuid) {
        let rival = self.rival.lock().unwrap().take();
        match rival {
            None => {}
            Some(Rival::Cancel) => {
                assert!(self.inner.mark_cancelled(id, friday_at(6, 0), 0.0).await.unwrap());
            }
            Some(Rival::Complete) => {
                assert!(self
                    .inner
                    .mark_completed(id, Some("Seen by a colleague".to_string()))
                    .await
                    .unwrap());
            }
            Some(Rival::Move(to)) => {
                let from = self.inner.find(id).await.unwrap().unwrap().appointment.scheduled_at;
                assert!(self.inner.move_booking(id, from, to, None).await.unwrap());
            }
        }
    }
}

#[async_trait]
impl BookingLedger for InterleavingLedger {
    async fn find(&self, id: Uuid) -> Result<Option<AppointmentDetails>, AppointmentError> {
        self.inner.find(id).await
    }

    async fn list(
        &self,
        filter: &AppointmentFilter,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        self.inner.list(filter).await
    }

    async fn in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        doctor_id: Option<Uuid>,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        self.inner.in_range(start, end, doctor_id).await
    }

    async fn booked_intervals(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<BookedInterval>, AppointmentError> {
        self.inner.booked_intervals(doctor_id, date).await
    }

    async fn count_active_by_day(
        &self,
        doctor_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, usize>, AppointmentError> {
        self.inner.count_active_by_day(doctor_id, start, end).await
    }

    async fn commit_booking(&self, booking: NewAppointment) -> Result<Appointment, AppointmentError> {
        self.inner.commit_booking(booking).await
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        cancelled_at: NaiveDateTime,
        fee: f64,
    ) -> Result<bool, AppointmentError> {
        self.let_rival_win(id).await;
        self.inner.mark_cancelled(id, cancelled_at, fee).await
    }

    async fn move_booking(
        &self,
        id: Uuid,
        from: NaiveDateTime,
        to: NaiveDateTime,
        notes: Option<String>,
    ) -> Result<bool, AppointmentError> {
        self.let_rival_win(id).await;
        self.inner.move_booking(id, from, to, notes).await
    }

    async fn mark_completed(&self, id: Uuid, notes: Option<String>) -> Result<bool, AppointmentError> {
        self.let_rival_win(id).await;
        self.inner.mark_completed(id, notes).await
    }
}

// ==============================================================================
// INTERLEAVED WRITES
// ==============================================================================

#[tokio::test]
async fn cancel_losing_to_a_cancel_reports_already_cancelled() {
    let fixture = fixture();
    let id = fixture.book(friday_at(9, 0)).await;

    let result = fixture.scheduler_losing_to(Rival::Cancel).cancel(id).await;

    assert_matches!(result, Err(AppointmentError::AlreadyCancelled));
    let stored = fixture.store.find(id).await.unwrap().unwrap().appointment;
    assert_eq!(stored.status, AppointmentStatus::Cancelled);
    assert_eq!(stored.cancellation_fee, Some(0.0));
}

#[tokio::test]
async fn cancel_losing_to_a_completion_keeps_it_completed() {
    let fixture = fixture();
    let id = fixture.book(friday_at(9, 0)).await;

    let result = fixture.scheduler_losing_to(Rival::Complete).cancel(id).await;

    assert_matches!(result, Err(AppointmentError::InvalidTransition(msg)) if msg.contains("completed"));
    let stored = fixture.store.find(id).await.unwrap().unwrap().appointment;
    assert_eq!(stored.status, AppointmentStatus::Completed);
    assert_eq!(stored.cancelled_at, None);
    assert_eq!(stored.notes.as_deref(), Some("Seen by a colleague"));
}

#[tokio::test]
async fn complete_losing_to_a_cancel_keeps_it_cancelled() {
    let fixture = fixture();
    let id = fixture.book(friday_at(9, 0)).await;

    let result = fixture
        .scheduler_losing_to(Rival::Cancel)
        .complete(id, Some("Healthy".to_string()))
        .await;

    assert_matches!(result, Err(AppointmentError::InvalidTransition(msg)) if msg.contains("cancelled"));
    assert_eq!(fixture.status_of(id).await, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn reschedule_losing_to_another_move_asks_for_a_reload() {
    let fixture = fixture();
    let id = fixture.book(friday_at(9, 0)).await;

    let result = fixture
        .scheduler_losing_to(Rival::Move(friday_at(12, 0)))
        .reschedule(id, friday_at(14, 0))
        .await;

    assert_matches!(result, Err(AppointmentError::InvalidTransition(msg)) if msg.contains("reload"));
    let stored = fixture.store.find(id).await.unwrap().unwrap().appointment;
    assert_eq!(stored.status, AppointmentStatus::Scheduled);
    assert_eq!(stored.scheduled_at, friday_at(12, 0));
    assert_eq!(stored.notes, None);
}

// ==============================================================================
// PARALLEL REQUESTS
// ==============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_cancels_succeed_exactly_once() {
    let fixture = fixture();
    let id = fixture.book(friday_at(9, 0)).await;
    let scheduler = Arc::new(fixture.scheduler());

    let attempts = (0..8).map(|_| {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.cancel(id).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| matches!(r, Err(AppointmentError::AlreadyCancelled))));
    assert_eq!(fixture.status_of(id).await, AppointmentStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_cancel_and_complete_keep_the_winner() {
    let fixture = fixture();
    let id = fixture.book(friday_at(9, 0)).await;
    let scheduler = Arc::new(fixture.scheduler());

    let cancelling = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.cancel(id).await })
    };
    let completing = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.complete(id, None).await })
    };
    let cancelled = cancelling.await.unwrap();
    let completed = completing.await.unwrap();

    match (cancelled, completed) {
        (Ok(_), Err(err)) => {
            assert_matches!(err, AppointmentError::InvalidTransition(_));
            assert_eq!(fixture.status_of(id).await, AppointmentStatus::Cancelled);
        }
        (Err(err), Ok(_)) => {
            assert_matches!(err, AppointmentError::InvalidTransition(_));
            assert_eq!(fixture.status_of(id).await, AppointmentStatus::Completed);
        }
        other => panic!("exactly one transition should win, got {:?}", other),
    }
}
