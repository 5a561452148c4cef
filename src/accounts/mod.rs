pub mod approval;
pub mod memory;
pub mod store;
