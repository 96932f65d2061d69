//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the Lexdesk client core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Session event bus
//!
//! ## Overview
//!
//! `core-auth` and the host application both depend on this crate. It owns
//! the configuration every session component reads from, the broadcast
//! channel the "logged in" / "logged out" signals travel on, and the
//! `tracing` setup.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
