pub mod device;
pub mod note;
pub mod outbox_message;
pub mod task_item;
