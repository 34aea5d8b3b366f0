// Public API - the boundary handlers plus the core they drive
pub mod runner;

pub mod convert;
pub mod coordination;
pub mod db;
pub mod error;
pub mod formats;
pub mod model;

// Internal modules
mod config;
mod telemetry;
