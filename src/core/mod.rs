pub mod amount;
pub mod config;
pub mod error;
pub mod party;
pub mod token;
