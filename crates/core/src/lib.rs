//! Core types and traits for machscope
//!
//! This crate provides the foundational types shared by the Mach-O parser
//! and the process-wide symbol lookup.

pub mod error;
pub mod types;
pub mod config;

pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
