pub mod domain;
pub mod mqtt;
pub mod transition_ingester;

pub use transition_ingester::*;
