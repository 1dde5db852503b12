//! Core utilities, configuration, and the entitlement ledger

pub mod config;
pub mod entitlement;
pub mod error;
pub mod logging;
pub mod session;
pub mod sweep;

pub use config::*;
pub use error::{AppError, AppResult};
pub use logging::{init_logger, log_startup_configuration};
