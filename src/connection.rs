use crate::datatree::{DataTree, Session};
use crate::error::{ConnectError, SyncError, VmToolError};
use crate::remote::{Credentials, Endpoint, ManagementApi, RemoteError, RemoteErrorKind};
use crate::sync::{ProgressSink, SyncReport, Synchronizer};
use crate::{Result, log_debug, log_error, log_info, log_warn};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the session lifecycle and the only writes to the [`DataTree`].
///
/// Connect, refresh and disconnect share one gate: a second connect or
/// refresh while a pass is in flight is refused, and disconnect waits for
/// the pass to finish before clearing the store.
pub struct ConnectionManager {
    api: Arc<dyn ManagementApi>,
    tree: Arc<DataTree>,
    gate: Arc<Mutex<()>>,
    connect_timeout: Duration,
    page_size: Option<u32>,
}

/// Completion handle for a connect+synchronize or refresh running on the
/// worker context
pub struct SyncHandle {
    inner: JoinHandle<Result<SyncReport>>,
}

impl SyncHandle {
    pub async fn wait(self) -> Result<SyncReport> {
        self.inner
            .await
            .map_err(|e| VmToolError::Worker(e.to_string()))?
    }
}

impl ConnectionManager {
    pub fn new(api: Arc<dyn ManagementApi>, tree: Arc<DataTree>) -> Self {
        Self {
            api,
            tree,
            gate: Arc::new(Mutex::new(())),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            page_size: None,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: Option<u32>) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn tree(&self) -> &Arc<DataTree> {
        &self.tree
    }

    /// Open a session and fetch its content root. Any session already held
    /// is released first. Waits for an in-flight pass; on failure the store
    /// is left cleared.
    pub async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> std::result::Result<Session, ConnectError> {
        let _guard = self.gate.lock().await;
        self.connect_locked(endpoint, credentials).await
    }

    /// Caller must hold the gate
    async fn connect_locked(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> std::result::Result<Session, ConnectError> {
        self.release().await;
        self.tree.mark_connecting();
        log_info!("Connecting to {} as {}", endpoint, credentials.user);

        let key = match timeout(self.connect_timeout, self.api.login(endpoint, credentials)).await
        {
            Ok(Ok(key)) => key,
            Ok(Err(err)) => {
                self.tree.clear();
                log_error!("Login to {} failed: {}", endpoint, err);
                return Err(err.into());
            }
            Err(_) => {
                self.tree.clear();
                log_error!("Login to {} timed out", endpoint);
                return Err(ConnectError::Timeout(format!(
                    "no answer from {} within {:?}",
                    endpoint, self.connect_timeout
                )));
            }
        };

        let content = match timeout(self.connect_timeout, self.api.retrieve_content(&key)).await {
            Ok(Ok(content)) => content,
            outcome => {
                let err = match outcome {
                    Ok(Err(err)) => err,
                    _ => RemoteError::new(RemoteErrorKind::Timeout, "retrieving content timed out"),
                };
                log_error!("Failed to retrieve content from {}: {}", endpoint, err);
                if let Err(logout_err) = self.api.logout(&key).await {
                    log_debug!("Logout after failed content retrieval: {}", logout_err);
                }
                self.tree.clear();
                return Err(err.into());
            }
        };

        let session = Session {
            key,
            endpoint: endpoint.clone(),
            user: credentials.user.clone(),
            established_at: Utc::now(),
        };
        log_info!("Connected to {} ({})", endpoint, content.about.full_name);
        self.tree.attach(session.clone(), content);
        Ok(session)
    }

    /// Release the session and clear the store. Waits for an in-flight
    /// pass; calling it while disconnected is a no-op.
    pub async fn disconnect(&self) {
        let _guard = self.gate.lock().await;
        self.release().await;
    }

    async fn release(&self) {
        let Some(session) = self.tree.clear() else {
            log_debug!("Disconnect requested while not connected");
            return;
        };

        log_info!("Disconnecting from {}", session.endpoint);
        if let Err(err) = self.api.logout(&session.key).await {
            log_warn!("Logout from {} failed: {}", session.endpoint, err);
        }
    }

    fn acquire_gate(&self) -> std::result::Result<OwnedMutexGuard<()>, SyncError> {
        Arc::clone(&self.gate)
            .try_lock_owned()
            .map_err(|_| SyncError::AlreadyRunning)
    }

    /// Connect and synchronize on a worker task. The returned handle
    /// resolves once the new inventory is installed (or the attempt failed
    /// and the store was cleared).
    pub fn connect_and_synchronize(
        &self,
        endpoint: Endpoint,
        credentials: Credentials,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<SyncHandle> {
        let guard = self.acquire_gate()?;
        let worker = self.worker();

        let inner = tokio::spawn(async move {
            let _guard = guard;
            progress.report("Connecting", 0.0);
            worker.connect_locked(&endpoint, &credentials).await?;
            worker.run_pass(progress.as_ref()).await
        });

        Ok(SyncHandle { inner })
    }

    /// Re-read the inventory over the current session
    pub fn refresh(&self, progress: Arc<dyn ProgressSink>) -> Result<SyncHandle> {
        let guard = self.acquire_gate()?;
        if !self.tree.is_connected() {
            return Err(SyncError::NotConnected.into());
        }
        let worker = self.worker();

        let inner = tokio::spawn(async move {
            let _guard = guard;
            worker.run_pass(progress.as_ref()).await
        });

        Ok(SyncHandle { inner })
    }

    fn worker(&self) -> ConnectionManager {
        ConnectionManager {
            api: Arc::clone(&self.api),
            tree: Arc::clone(&self.tree),
            gate: Arc::clone(&self.gate),
            connect_timeout: self.connect_timeout,
            page_size: self.page_size,
        }
    }

    async fn run_pass(&self, progress: &dyn ProgressSink) -> Result<SyncReport> {
        let content = self.tree.content().ok_or(SyncError::NotConnected)?;
        let synchronizer = Synchronizer::new(Arc::clone(&self.api)).with_page_size(self.page_size);

        match synchronizer.synchronize(&content, progress).await {
            Ok(outcome) => {
                let report = SyncReport::from(&outcome);
                if !self.tree.install(outcome.snapshot) {
                    return Err(SyncError::NotConnected.into());
                }
                Ok(report)
            }
            Err(err) => {
                log_error!("{}", err);
                self.release().await;
                Err(err.into())
            }
        }
    }
}
