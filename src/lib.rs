//! CodePortal - a local HTTP bridge between AI assistants and the filesystem
//!
//! This crate provides the core functionality for CodePortal, including:
//! - Access guard (local-only vs public mode, API key, IP allow-list, payload cap)
//! - Path sanitization confining bundle entries to the project root
//! - Project materialization with archive-backed scaffolding
//! - Idle-shutdown lifecycle governor
//! - Text-generation proxy for OpenAI and Google providers

pub mod cli;
pub mod config;
pub mod guard;
pub mod lifecycle;
pub mod materialize;
pub mod paths;
pub mod providers;
pub mod sanitize;
pub mod scaffold;
pub mod server;

pub use config::Config;
