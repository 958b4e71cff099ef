use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{AppointmentError, Doctor, Pet};

/// Lookups into the clinic's client, pet and doctor records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_pet_owned_by_client(
        &self,
        pet_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<Pet>, AppointmentError>;

    async fn find_active_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, AppointmentError>;

    /// Any doctor, active or not.
    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Doctor>, AppointmentError>;
}
