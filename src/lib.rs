pub mod analyzer;
pub mod batch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod limiter;
pub mod parsers;
pub mod repair;
pub mod retry;
