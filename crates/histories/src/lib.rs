//! Chat history implementations for Capstan.

mod window;

pub mod in_memory;
pub mod json_file;

pub use in_memory::InMemoryHistory;
pub use json_file::JsonFileHistory;
