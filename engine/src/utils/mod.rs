//! Utility functions for the engine

pub mod file;
pub mod sql;
