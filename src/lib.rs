pub mod capability;
pub mod catalog;
pub mod db;
pub mod error;
pub mod filter;
pub mod negotiate;
pub mod params;
pub mod profile;
pub mod session;
pub mod types;

pub use capability::{CapabilitySet, FeatureFlag};
pub use db::{establish_connection, AdaptedConnection, Transport};
pub use error::{AdapterError, Result};
pub use profile::{BackendProfile, BackendRegistry};
