//! Session orchestration
//!
//! The [`MediaClient`] ties the command queue, both registries, the outbound
//! queues and the transport together. Its operations live in several files:
//! lifecycle and queries in `manager`, local track commands in `tracks`,
//! inbound handling in `dispatch` and the offer/answer cycle in `negotiation`.

pub mod builder;
pub mod config;
mod dispatch;
pub mod manager;
mod negotiation;
mod tracks;

#[cfg(test)]
mod tests;

pub use builder::ClientBuilder;
pub use config::ClientConfig;
pub use manager::{MediaClient, SessionStats};
