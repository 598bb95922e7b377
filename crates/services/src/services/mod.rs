pub mod config;
pub mod current_user;
pub mod notification;
pub mod outbox;
pub mod reminders;
pub mod sync;
