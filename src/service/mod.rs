//! # Engine Services
//!
//! Synthetic message injection and the `ProtocolManager` facade.

pub mod coordinator;
pub mod manager;
