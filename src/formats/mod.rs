//! Delimited flat-file access

pub mod delimited;
pub mod reader;

pub use reader::{FileSpec, FileSpecBuilder, Record};
