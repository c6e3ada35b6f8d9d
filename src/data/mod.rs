pub mod in_memory;
pub mod source;

pub use in_memory::InMemoryDataSource;
pub use source::{DataSource, StreamSource};
