pub mod jwt;
pub mod log_throttle;
pub mod logger;
