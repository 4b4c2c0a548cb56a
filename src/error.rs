use crate::dispatch::Operation;
use crate::inventory::InventoryKind;
use crate::remote::{RemoteError, RemoteErrorKind};

/// Why a connection attempt failed. The inventory store is left cleared.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Connection timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Unknown(String),
}

impl From<RemoteError> for ConnectError {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::InvalidLogin => ConnectError::AuthRejected(err.message),
            RemoteErrorKind::Unreachable => ConnectError::Unreachable(err.message),
            RemoteErrorKind::Timeout => ConnectError::Timeout(err.message),
            _ => ConnectError::Unknown(err.to_string()),
        }
    }
}

/// One inventory kind could not be resolved; its index stays empty
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Inventory kind {kind} skipped: {cause}")]
pub struct SyncPartialFailure {
    pub kind: InventoryKind,
    pub cause: RemoteError,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The container-root query itself failed; nothing was installed
    #[error("Inventory synchronization failed: {0}")]
    Fatal(RemoteError),

    #[error("A connect or refresh is already in progress")]
    AlreadyRunning,

    #[error("Not connected")]
    NotConnected,
}

/// A command the dispatcher refused or the endpoint failed to enqueue
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    #[error("No target selected")]
    NoTargetSelected,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Datastore '{datastore}' is not attached to host '{host}'")]
    InvalidMigrationTarget { datastore: String, host: String },

    #[error("Freeze not started (guest returned {code})")]
    FreezeNotStarted { code: i64 },

    #[error("{operation} failed: {cause}")]
    RemoteOperationFailed {
        operation: Operation,
        cause: String,
    },
}

impl Rejected {
    pub fn remote(operation: Operation, cause: impl ToString) -> Self {
        Rejected::RemoteOperationFailed {
            operation,
            cause: cause.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VmToolError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Rejected(#[from] Rejected),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_classify_into_connect_errors() {
        let auth = RemoteError::new(RemoteErrorKind::InvalidLogin, "bad password");
        assert_eq!(
            ConnectError::from(auth),
            ConnectError::AuthRejected("bad password".to_string())
        );

        let down = RemoteError::new(RemoteErrorKind::Unreachable, "no route");
        assert!(matches!(ConnectError::from(down), ConnectError::Unreachable(_)));

        let slow = RemoteError::new(RemoteErrorKind::Timeout, "deadline");
        assert!(matches!(ConnectError::from(slow), ConnectError::Timeout(_)));

        let other = RemoteError::new(RemoteErrorKind::Transport, "tls");
        assert!(matches!(ConnectError::from(other), ConnectError::Unknown(_)));
    }

    #[test]
    fn rejected_messages_name_the_operation() {
        let err = Rejected::remote(Operation::PowerOn, "permission denied");
        assert_eq!(err.to_string(), "power-on failed: permission denied");
    }
}
