//! Track and endpoint registries
//!
//! The local and remote registries own disjoint namespaces and never touch
//! each other; the client drives both.

pub mod local;
pub mod remote;

pub use local::{LocalEndpoint, LocalRegistry, LocalTrack, MetadataDelivery, ReplaceKind, Replacement};
pub use remote::{RemoteEndpoint, RemoteRegistry, RemoteTrack};
