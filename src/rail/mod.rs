pub mod lockup;
pub mod model;
pub mod rate_queue;
