//! Service layer
//!
//! The collaborators the polling engine talks to: settings, the workload
//! catalog, registry credentials and update delivery. Each is a trait so
//! the engine can run against the fleet manager's real services or the
//! in-memory implementations bundled here.

mod credentials;
mod fleet;
mod notify;
mod settings;

// Re-export traits
pub use credentials::CredentialStore;
pub use fleet::WorkloadCatalog;
pub use notify::UpdateSink;
pub use settings::SettingsProvider;

// Re-export implementations
pub use credentials::StaticCredentials;
pub use fleet::{FleetSeed, InMemoryFleet};
pub use notify::{ImageUpdate, LoggingUpdateSink};
pub use settings::{
    InMemorySettings, POLLING_ENABLED_KEY, POLLING_INTERVAL_KEY, SettingsError, SettingsEvent,
};
