//! # Transport Integration
//!
//! Everything between a connection's transport and the listener dispatcher.
//!
//! ## Components
//! - **Channel**: capability traits a transport implements (`Channel`, `InterceptHook`)
//! - **Connection**: per-connection context, FIFO lanes, synthetic queues
//! - **Injector**: hook attachment, classification and routing
//! - **Memory**: tokio mpsc backed channel for embedding and tests

pub mod channel;
pub mod connection;
pub mod injector;
pub mod memory;
