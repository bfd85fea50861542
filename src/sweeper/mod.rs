//! Background maintenance over the request store

pub mod expiry;
pub mod reminders;

pub use expiry::{ExpirySweeper, SweepReport};
pub use reminders::ReminderTask;
