//! Manages the lifecycle of a single client TCP connection: handshake,
//! command dispatch, and spawning/tracking the three sync workers.

mod handler;

pub use handler::ConnectionHandler;
