//! Idle session expiry.
//!
//! A background sweep retires sessions whose last activity is older than
//! the configured timeout. The gateway supplies the destroy callback,
//! which publishes `session_destroyed` and releases per-session metrics.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::store::{Session, SessionStore};

/// Called once per retired session, after it is removed from the store.
pub type DestroyCallback = Arc<dyn Fn(Arc<Session>) -> BoxFuture<'static, ()> + Send + Sync>;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the periodic expiry sweep. Runs until the returned handle is
/// aborted.
pub fn spawn_expiry_sweep(
    store: Arc<SessionStore>,
    timeout_secs: u64,
    on_destroy: DestroyCallback,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            for session in store.expired(timeout_secs) {
                let session_id = session.session_id.clone();
                if store.remove(&session_id).is_none() {
                    continue;
                }
                tracing::info!(session_id = %session_id, "session expired, retiring");

                if let Some(recognition) = session.take_recognition() {
                    recognition.stop().await;
                }
                on_destroy(session).await;
            }
        }
    })
}
