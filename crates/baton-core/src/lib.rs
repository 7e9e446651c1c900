//! Core items, usage accounting, config, errors, and session model for Baton.

pub mod config;
pub mod error;
pub mod items;
pub mod logging;
pub mod session;
pub mod settings;
pub mod usage;
