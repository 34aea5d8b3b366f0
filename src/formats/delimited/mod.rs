pub mod reader;
pub mod writer;

pub use reader::{DelimitedRows, read_schema, stream_rows};
pub use writer::write_rows;
