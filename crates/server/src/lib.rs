pub mod error;
pub mod runtime;

pub use error::ServerError;
