pub mod file_store;
pub mod memory_store;
pub mod traits;
