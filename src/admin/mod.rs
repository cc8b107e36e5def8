//! The admin endpoint: a small set of read/control commands layered on top of
//! the same frame protocol, answered inline on the client connection that
//! sent them rather than routed through a worker.

pub mod commands;
