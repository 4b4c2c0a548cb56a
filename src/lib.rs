pub mod config;
pub mod connection;
pub mod datatree;
pub mod details;
pub mod dispatch;
pub mod error;
pub mod freeze;
pub mod inventory;
pub mod logger;
pub mod migration;
pub mod remote;
pub mod simulator;
pub mod sync;
pub mod tasks;

pub use error::VmToolError;

pub type Result<T> = std::result::Result<T, VmToolError>;

// Convenience re-exports for embedding the core
pub use config::ToolConfig;
pub use connection::{ConnectionManager, SyncHandle};
pub use datatree::{DataTree, Session, SessionState};
pub use dispatch::{Accepted, CommandDispatcher, Operation};
pub use error::{ConnectError, Rejected, SyncError, SyncPartialFailure};
pub use inventory::{InventoryIndex, InventoryKind, InventorySnapshot};
pub use remote::{Credentials, Endpoint, ManagementApi, MoRef};
pub use simulator::SimulatedEndpoint;
pub use tasks::{TaskRecord, TaskReporter};
