mod client;
mod config;
mod event_repository;
mod migration;

pub use client::*;
pub use config::*;
pub use event_repository::*;
pub use migration::*;
