pub mod activities;
pub mod backup_exchange;
pub mod banks;
pub mod core;
pub mod courses;
pub mod emails;
pub mod expenses;
pub mod payments;
pub mod schools;
pub mod setup;
pub mod students;
pub mod suppliers;
pub mod users;
