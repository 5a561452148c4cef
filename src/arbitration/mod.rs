pub mod arbiter;
pub mod gateway;
