#[path = "outbox/dispatcher.rs"]
pub mod dispatcher;
#[path = "outbox/types.rs"]
pub mod types;
#[path = "outbox/worker.rs"]
pub mod worker;

pub use dispatcher::{MessageDispatcher, OutboxDispatcher};
pub use types::{DispatchError, OutboxWorkerError};
pub use worker::{BatchOutcome, OutboxWorker};
