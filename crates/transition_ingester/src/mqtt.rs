mod change_notifier;
mod connection;
mod publish_acks;
mod subscriber;

pub use change_notifier::*;
pub use connection::*;
pub use publish_acks::*;
pub use subscriber::*;
