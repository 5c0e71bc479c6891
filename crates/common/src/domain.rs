mod geofence_event;
mod result;

pub use geofence_event::*;
pub use result::*;
