mod deduplicator;
mod event_mapper;
mod ingestion_service;
mod topic;
mod transition_event;

pub use deduplicator::*;
pub use event_mapper::*;
pub use ingestion_service::*;
pub use topic::*;
pub use transition_event::*;
