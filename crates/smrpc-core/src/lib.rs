//! smrpc-core: session-management wire format and configuration.
//! All other smrpc crates depend on this one.

pub mod config;
pub mod wire;

pub use config::SmrpcConfig;
pub use wire::{SessionEndpoint, SmErrType, SmEventType, SmPkt, SmPktType, TransportType};
