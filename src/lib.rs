//! Ustozbot - AI English tutor Telegram bot with daily quotas and referrals
//!
//! This library provides all the core functionality for the Ustozbot bot,
//! including the quota and entitlement ledger, the referral program, premium
//! subscriptions paid with Telegram Stars, and the OpenAI-backed tutoring
//! modes (chat, translation, speaking practice).
//!
//! Layout:
//!
//! - `core` - configuration, errors, the entitlement ledger and schedulers
//! - `storage` - SQLite persistence and schema migration
//! - `ai` - OpenAI chat, vision, transcription and speech synthesis
//! - `telegram` - bot wiring, gate, handlers, notifications
//! - `cli` - command line entry points

#![allow(clippy::too_many_arguments)]

pub mod ai;
pub mod cli;
pub mod core;
pub mod storage;
pub mod telegram;

pub use crate::core::{config, AppError, AppResult};
pub use storage::{create_pool, get_connection, DbConnection, DbPool};
