pub mod cache;
pub mod config;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod response;
pub mod retry;
pub mod telemetry;
