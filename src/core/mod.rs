//! Core types: errors, configuration, paths, persisted state.

pub mod config;
pub mod errors;
pub mod paths;
pub mod recent;
