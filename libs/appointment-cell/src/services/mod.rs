pub mod clock;
pub mod ledger;
pub mod memory;
pub mod policy;
pub mod records;
pub mod scheduler;
pub mod slots;
pub mod supabase_store;
pub mod working_hours;
