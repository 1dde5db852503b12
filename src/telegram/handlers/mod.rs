//! Dispatcher handlers, split by update kind

pub mod chat;
pub mod commands;
pub mod media;
pub mod payments;
pub mod schema;
pub mod types;
