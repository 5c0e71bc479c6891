pub mod domain;
pub mod postgres;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockChangeNotifier;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockGeofenceEventRepository;
