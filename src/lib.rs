//! Library exports for cropyield-session, shared between the binary and tests.

pub mod api;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod models;
pub mod navigation;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod utils;
