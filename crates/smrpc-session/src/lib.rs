//! smrpc-session: the session-management control plane.
//!
//! One `Rpc` per runtime instance owns its session table, dedup token map
//! and admission counters. All packet handling for an instance is
//! serialized; `RpcActor` runs an `Rpc` on a single tokio task.

pub mod actor;
pub mod admission;
pub mod alloc;
pub mod error;
pub mod messenger;
pub mod rpc;
pub mod session;
pub mod table;
pub mod token_map;
pub mod transport;

pub use actor::{ActorOptions, RpcActor, RpcHandle};
pub use alloc::{Allocator, BudgetAllocator, Reservation};
pub use error::{Error, Result};
pub use messenger::{ChannelMessenger, LossyMessenger, Messenger, RecordingMessenger};
pub use rpc::{FaultInjection, Rpc, RpcStats, SmEvent, SmHandler};
pub use session::{Session, SessionRole, SessionState};
pub use table::{SessionTable, Slot};
pub use token_map::TokenMap;
pub use transport::{LoopbackTransport, Transport};
