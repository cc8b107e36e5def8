//! The cluster wire protocol: frame transport and tagged command dispatch.

pub mod codec;
pub mod command;
pub mod frame;

pub use codec::ClusterFrameCodec;
pub use command::Command;
pub use frame::Frame;
