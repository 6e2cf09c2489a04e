//! LeakWatch: host and per-process memory sampling with rolling history
//! and leak-trend detection.

pub mod collector;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod export;
pub mod handler;
pub mod history;
pub mod monitor;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod socket;
pub mod summary;

pub use scheduler::Monitor;
