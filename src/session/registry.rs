//! Session-keyed registry of running trading instances.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::instance::{InstanceHandle, InstanceStatus, InstanceSummary, StopOutcome};

/// The only state shared between instances. Handles are cloned out under
/// the lock, so slow operations such as stopping never hold it.
#[derive(Default)]
pub struct SessionInstanceRegistry {
    sessions: RwLock<HashMap<String, Vec<Arc<InstanceHandle>>>>,
}

impl SessionInstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: &str, handle: InstanceHandle) -> Arc<InstanceHandle> {
        let handle = Arc::new(handle);
        self.sessions
            .write()
            .await
            .entry(session.to_string())
            .or_default()
            .push(handle.clone());
        handle
    }

    /// Instances of a session in creation order.
    pub async fn instances(&self, session: &str) -> Vec<Arc<InstanceHandle>> {
        self.sessions
            .read()
            .await
            .get(session)
            .cloned()
            .unwrap_or_default()
    }

    /// Find an instance by full id or unambiguous id prefix.
    pub async fn get(&self, session: &str, id: &str) -> Option<Arc<InstanceHandle>> {
        let id = id.to_lowercase();
        let mut matches = self
            .instances(session)
            .await
            .into_iter()
            .filter(|h| h.id().to_string().starts_with(&id));

        let found = matches.next()?;
        matches.next().is_none().then_some(found)
    }

    /// Stop one instance (`target`) or every instance of the session.
    pub async fn stop(&self, session: &str, target: Option<&str>) -> Vec<(Uuid, StopOutcome)> {
        let handles = match target {
            Some(id) => self.get(session, id).await.into_iter().collect(),
            None => self.instances(session).await,
        };

        join_all(handles.iter().map(|h| async move {
            let outcome = h.stop().await;
            info!(session = %session, instance = %h.id(), outcome = ?outcome, "Stop requested");
            (h.id(), outcome)
        }))
        .await
    }

    pub async fn status(&self, session: &str) -> Vec<InstanceSummary> {
        join_all(self.instances(session).await.iter().map(|h| h.summary())).await
    }

    pub async fn active_count(&self, session: &str) -> usize {
        let statuses = join_all(self.instances(session).await.iter().map(|h| h.status())).await;
        statuses
            .into_iter()
            .filter(|s| *s != InstanceStatus::Stopped)
            .count()
    }

    /// Stop every instance of the session and forget it.
    pub async fn close_session(&self, session: &str) {
        self.stop(session, None).await;
        self.sessions.write().await.remove(session);
    }
}
