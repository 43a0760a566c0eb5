pub mod config;
pub mod error;
pub mod job;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use error::{JobError, Result};
