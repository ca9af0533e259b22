pub mod memory;
pub mod search;
pub mod store;
pub mod traits;
