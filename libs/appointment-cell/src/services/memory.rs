use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentDetails, AppointmentError, AppointmentFilter, AppointmentStatus,
    BookedInterval, Client, DayOfWeek, Doctor, NewAppointment, Pet, WorkingInterval,
};
use crate::services::ledger::{BookingLedger, SLOT_CONFLICT_MESSAGE};
use crate::services::records::RecordStore;
use crate::services::working_hours::WorkingHoursProvider;

#[derive(Debug, Default)]
struct ClinicData {
    clients: HashMap<Uuid, Client>,
    pets: HashMap<Uuid, Pet>,
    doctors: HashMap<Uuid, Doctor>,
    working_hours: HashMap<(Uuid, DayOfWeek), WorkingInterval>,
    appointments: HashMap<Uuid, Appointment>,
}

impl ClinicData {
    fn details(&self, appointment: &Appointment) -> Option<AppointmentDetails> {
        let pet = self.pets.get(&appointment.pet_id)?;
        let client = self.clients.get(&appointment.client_id)?;
        let doctor = self.doctors.get(&appointment.doctor_id)?;

        Some(AppointmentDetails {
            appointment: appointment.clone(),
            pet_name: pet.name.clone(),
            pet_species: pet.species.clone(),
            pet_breed: pet.breed.clone(),
            client_name: client.full_name(),
            client_phone: client.phone.clone(),
            client_email: client.email.clone(),
            doctor_name: doctor.full_name(),
            doctor_specialization: doctor.specialization.clone(),
        })
    }

    fn sorted_details<'a, I>(&self, appointments: I) -> Vec<AppointmentDetails>
    where
        I: Iterator<Item = &'a Appointment>,
    {
        let mut rows: Vec<AppointmentDetails> =
            appointments.filter_map(|a| self.details(a)).collect();
        rows.sort_by_key(|row| (row.appointment.scheduled_at, row.appointment.created_at));
        rows
    }

    fn slot_taken(&self, doctor_id: Uuid, at: NaiveDateTime, except: Option<Uuid>) -> bool {
        self.appointments.values().any(|a| {
            a.doctor_id == doctor_id
                && a.scheduled_at == at
                && a.status != AppointmentStatus::Cancelled
                && Some(a.id) != except
        })
    }
}

/// Process-local clinic store. Every write runs its uniqueness check and
/// mutation under one write lock.
#[derive(Debug, Default)]
pub struct InMemoryClinic {
    data: RwLock<ClinicData>,
}

impl InMemoryClinic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.data.get_mut().clients.insert(client.id, client);
        self
    }

    pub fn with_pet(mut self, pet: Pet) -> Self {
        self.data.get_mut().pets.insert(pet.id, pet);
        self
    }

    pub fn with_doctor(mut self, doctor: Doctor) -> Self {
        self.data.get_mut().doctors.insert(doctor.id, doctor);
        self
    }

    pub fn with_working_hours(
        mut self,
        doctor_id: Uuid,
        day: DayOfWeek,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Self {
        self.data.get_mut().working_hours.insert(
            (doctor_id, day),
            WorkingInterval {
                start_time,
                end_time,
            },
        );
        self
    }

    /// Two active doctors on weekdays 08:00-16:00, one inactive doctor and
    /// three clients with a pet each. Ids are stable across runs.
    pub fn demo() -> Self {
        let mut clinic = Self::new();

        let doctors = [
            (1, "Anna", "Kowalska", Some("Internal medicine"), true),
            (2, "Piotr", "Nowak", Some("Surgery"), true),
            (3, "Ewa", "Wiśniewska", None, false),
        ];
        for (n, first, last, specialization, is_active) in doctors {
            clinic = clinic.with_doctor(Doctor {
                id: demo_id(0x100 + n),
                first_name: first.to_string(),
                last_name: last.to_string(),
                specialization: specialization.map(str::to_string),
                is_active,
            });
        }

        let open = NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default();
        let close = NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default();
        for n in 1..=2 {
            for day in [
                DayOfWeek::Monday,
                DayOfWeek::Tuesday,
                DayOfWeek::Wednesday,
                DayOfWeek::Thursday,
                DayOfWeek::Friday,
            ] {
                clinic = clinic.with_working_hours(demo_id(0x100 + n), day, open, close);
            }
        }

        let owners = [
            (1, "Jan", "Zieliński", "Burek", "dog", Some("Mixed")),
            (2, "Maria", "Lewandowska", "Mruczek", "cat", Some("European Shorthair")),
            (3, "Tomasz", "Wójcik", "Kropka", "rabbit", None),
        ];
        for (n, first, last, pet_name, species, breed) in owners {
            let client_id = demo_id(0x200 + n);
            clinic = clinic
                .with_client(Client {
                    id: client_id,
                    first_name: first.to_string(),
                    last_name: last.to_string(),
                    phone: Some(format!("+48 600 000 00{}", n)),
                    email: Some(format!("{}@example.com", first.to_lowercase())),
                })
                .with_pet(Pet {
                    id: demo_id(0x300 + n),
                    client_id,
                    name: pet_name.to_string(),
                    species: species.to_string(),
                    breed: breed.map(str::to_string),
                });
        }

        clinic
    }
}

fn demo_id(n: u128) -> Uuid {
    Uuid::from_u128(0x00000000_0000_4000_8000_000000000000 | n)
}

#[async_trait]
impl RecordStore for InMemoryClinic {
    async fn find_pet_owned_by_client(
        &self,
        pet_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<Pet>, AppointmentError> {
        let data = self.data.read().await;
        Ok(data
            .pets
            .get(&pet_id)
            .filter(|pet| pet.client_id == client_id && data.clients.contains_key(&client_id))
            .cloned())
    }

    async fn find_active_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, AppointmentError> {
        let data = self.data.read().await;
        Ok(data.doctors.get(&doctor_id).filter(|d| d.is_active).cloned())
    }

    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, AppointmentError> {
        Ok(self.data.read().await.doctors.get(&doctor_id).cloned())
    }
}

#[async_trait]
impl WorkingHoursProvider for InMemoryClinic {
    async fn get(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<WorkingInterval>, AppointmentError> {
        let day = DayOfWeek::from_date(date);
        Ok(self.data.read().await.working_hours.get(&(doctor_id, day)).copied())
    }

    async fn weekly(
        &self,
        doctor_id: Uuid,
    ) -> Result<Vec<(DayOfWeek, WorkingInterval)>, AppointmentError> {
        let data = self.data.read().await;
        let mut week: Vec<(DayOfWeek, WorkingInterval)> = data
            .working_hours
            .iter()
            .filter(|((doctor, _), _)| *doctor == doctor_id)
            .map(|((_, day), interval)| (*day, *interval))
            .collect();
        week.sort_by_key(|(day, _)| day.index());
        Ok(week)
    }
}

#[async_trait]
impl BookingLedger for InMemoryClinic {
    async fn find(&self, id: Uuid) -> Result<Option<AppointmentDetails>, AppointmentError> {
        let data = self.data.read().await;
        Ok(data.appointments.get(&id).and_then(|a| data.details(a)))
    }

    async fn list(
        &self,
        filter: &AppointmentFilter,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        let data = self.data.read().await;
        let matching = data.appointments.values().filter(|a| {
            filter.doctor_id.map_or(true, |id| a.doctor_id == id)
                && filter.client_id.map_or(true, |id| a.client_id == id)
                && filter.status.map_or(true, |status| a.status == status)
                && filter.date.map_or(true, |date| a.scheduled_at.date() == date)
        });

        Ok(data
            .sorted_details(matching)
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        doctor_id: Option<Uuid>,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        let data = self.data.read().await;
        let matching = data.appointments.values().filter(|a| {
            let date = a.scheduled_at.date();
            date >= start && date <= end && doctor_id.map_or(true, |id| a.doctor_id == id)
        });
        Ok(data.sorted_details(matching))
    }

    async fn booked_intervals(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<BookedInterval>, AppointmentError> {
        let data = self.data.read().await;
        let mut booked: Vec<BookedInterval> = data
            .appointments
            .values()
            .filter(|a| {
                a.doctor_id == doctor_id
                    && a.scheduled_at.date() == date
                    && a.status != AppointmentStatus::Cancelled
            })
            .map(Appointment::booked_interval)
            .collect();
        booked.sort_by_key(|b| b.scheduled_at);
        Ok(booked)
    }

    async fn count_active_by_day(
        &self,
        doctor_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, usize>, AppointmentError> {
        let data = self.data.read().await;
        let mut counts = BTreeMap::new();
        for a in data.appointments.values() {
            let date = a.scheduled_at.date();
            if a.doctor_id == doctor_id
                && a.status != AppointmentStatus::Cancelled
                && date >= start
                && date <= end
            {
                *counts.entry(date).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn commit_booking(&self, booking: NewAppointment) -> Result<Appointment, AppointmentError> {
        let mut data = self.data.write().await;

        if data.slot_taken(booking.doctor_id, booking.scheduled_at, None) {
            warn!(
                "Rejected double booking for doctor {} at {}",
                booking.doctor_id, booking.scheduled_at
            );
            return Err(AppointmentError::SlotConflict(SLOT_CONFLICT_MESSAGE.to_string()));
        }

        let appointment = Appointment {
            id: booking.id,
            client_id: booking.client_id,
            pet_id: booking.pet_id,
            doctor_id: booking.doctor_id,
            scheduled_at: booking.scheduled_at,
            duration_minutes: booking.duration_minutes,
            status: booking.status,
            reason: booking.reason,
            notes: booking.notes,
            cancelled_at: None,
            cancellation_fee: None,
            created_at: booking.created_at,
        };
        data.appointments.insert(appointment.id, appointment.clone());
        debug!("Stored appointment {}", appointment.id);

        Ok(appointment)
    }

    async fn mark_cancelled(
        &self,
        id: Uuid,
        cancelled_at: NaiveDateTime,
        fee: f64,
    ) -> Result<bool, AppointmentError> {
        let mut data = self.data.write().await;
        match data.appointments.get_mut(&id) {
            Some(a) if a.status == AppointmentStatus::Scheduled => {
                a.status = AppointmentStatus::Cancelled;
                a.cancelled_at = Some(cancelled_at);
                a.cancellation_fee = Some(fee);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn move_booking(
        &self,
        id: Uuid,
        from: NaiveDateTime,
        to: NaiveDateTime,
        notes: Option<String>,
    ) -> Result<bool, AppointmentError> {
        let mut data = self.data.write().await;

        let doctor_id = match data.appointments.get(&id) {
            Some(a) if a.status == AppointmentStatus::Scheduled && a.scheduled_at == from => {
                a.doctor_id
            }
            _ => return Ok(false),
        };

        if data.slot_taken(doctor_id, to, Some(id)) {
            warn!("Rejected move of appointment {} onto taken slot {}", id, to);
            return Err(AppointmentError::SlotConflict(SLOT_CONFLICT_MESSAGE.to_string()));
        }

        if let Some(a) = data.appointments.get_mut(&id) {
            a.scheduled_at = to;
            a.notes = notes;
        }
        Ok(true)
    }

    async fn mark_completed(&self, id: Uuid, notes: Option<String>) -> Result<bool, AppointmentError> {
        let mut data = self.data.write().await;
        match data.appointments.get_mut(&id) {
            Some(a) if a.status == AppointmentStatus::Scheduled => {
                a.status = AppointmentStatus::Completed;
                if notes.is_some() {
                    a.notes = notes;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn booking(clinic_doctor: Uuid, scheduled_at: NaiveDateTime) -> NewAppointment {
        NewAppointment {
            id: Uuid::new_v4(),
            client_id: demo_id(0x201),
            pet_id: demo_id(0x301),
            doctor_id: clinic_doctor,
            scheduled_at,
            duration_minutes: 30,
            status: AppointmentStatus::Scheduled,
            reason: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn demo_seed_has_expected_records() {
        let clinic = InMemoryClinic::demo();

        assert!(clinic.find_active_doctor(demo_id(0x101)).await.unwrap().is_some());
        assert!(clinic.find_active_doctor(demo_id(0x103)).await.unwrap().is_none());
        assert!(clinic.find_doctor(demo_id(0x103)).await.unwrap().is_some());
        assert!(clinic
            .find_pet_owned_by_client(demo_id(0x301), demo_id(0x201))
            .await
            .unwrap()
            .is_some());
        assert!(clinic
            .find_pet_owned_by_client(demo_id(0x301), demo_id(0x202))
            .await
            .unwrap()
            .is_none());

        let week = clinic.weekly(demo_id(0x101)).await.unwrap();
        assert_eq!(week.len(), 5);
        assert_eq!(week[0].0, DayOfWeek::Monday);
    }

    #[tokio::test]
    async fn cancelled_rows_release_the_slot() {
        let clinic = InMemoryClinic::demo();
        let doctor = demo_id(0x101);

        let first = clinic.commit_booking(booking(doctor, at(9, 0))).await.unwrap();
        assert_matches!(
            clinic.commit_booking(booking(doctor, at(9, 0))).await,
            Err(AppointmentError::SlotConflict(_))
        );

        assert!(clinic.mark_cancelled(first.id, at(7, 0), 0.0).await.unwrap());
        assert!(clinic.commit_booking(booking(doctor, at(9, 0))).await.is_ok());
        assert!(clinic.commit_booking(booking(demo_id(0x102), at(9, 0))).await.is_ok());
    }

    #[tokio::test]
    async fn conditional_writes_skip_changed_rows() {
        let clinic = InMemoryClinic::demo();
        let doctor = demo_id(0x101);
        let appointment = clinic.commit_booking(booking(doctor, at(9, 0))).await.unwrap();

        assert!(!clinic
            .move_booking(appointment.id, at(8, 0), at(10, 0), None)
            .await
            .unwrap());
        assert!(clinic.mark_completed(appointment.id, None).await.unwrap());
        assert!(!clinic.mark_cancelled(appointment.id, at(7, 0), 0.0).await.unwrap());
        assert!(!clinic.mark_completed(Uuid::new_v4(), None).await.unwrap());
    }
}
