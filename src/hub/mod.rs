//! Connection registry and broadcast fan-out
//!
//! The hub keeps the set of live connections and relays every inbound chat
//! message to all of them, tagged with the origin's ID. Sends run against a
//! snapshot of the registry so a slow recipient never holds the lock.

mod sender;

pub use sender::{ChannelSender, RecordSender, SendError, MAX_QUEUE_CAPACITY};

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::protocol::encode_record;
use crate::types::*;

/// Conditions the hub absorbs and logs instead of returning
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("connection {0} registered twice, replacing previous sender")]
    DuplicateConnectionId(ConnectionId),

    #[error("message from unknown connection {0}, dropping")]
    MessageFromUnknownConnection(ConnectionId),

    #[error("send to connection {id} failed: {source}")]
    Send {
        id: ConnectionId,
        #[source]
        source: SendError,
    },
}

/// Hub settings
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub record_format: RecordFormat,
    /// Budget for a single recipient's send during a broadcast
    pub send_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            record_format: RecordFormat::Tagged,
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of recipients in the snapshot
    pub attempted: usize,
    pub delivered: usize,
    /// Connections dropped from the registry because their send failed
    pub removed: Vec<ConnectionId>,
}

type Registry = HashMap<ConnectionId, Arc<dyn RecordSender>>;

pub struct Hub {
    connections: RwLock<Registry>,
    config: HubConfig,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn record_format(&self) -> RecordFormat {
        self.config.record_format
    }

    /// Register a connection. A reused ID replaces the previous sender.
    pub async fn on_connect(&self, id: ConnectionId, sender: Arc<dyn RecordSender>) {
        let replaced = self
            .connections
            .write()
            .await
            .insert(id.clone(), sender)
            .is_some();

        if replaced {
            tracing::warn!(conn_id = %id, "{}", HubError::DuplicateConnectionId(id.clone()));
        } else {
            tracing::info!(conn_id = %id, "Connection registered");
        }
    }

    /// Relay a message from `id` to every live connection, including `id`.
    ///
    /// Returns `None` when `id` is not registered, which happens when a
    /// message races with its connection's disconnect.
    pub async fn on_message(&self, id: &str, payload: &str) -> Option<BroadcastReport> {
        if !self.contains(id).await {
            tracing::warn!(
                conn_id = %id,
                "{}",
                HubError::MessageFromUnknownConnection(id.to_string())
            );
            return None;
        }

        tracing::debug!(conn_id = %id, len = payload.len(), "Message received");
        tracing::trace!(conn_id = %id, payload, "Message payload");
        let record = encode_record(self.config.record_format, id, payload);
        Some(self.broadcast(record).await)
    }

    /// Send `record` to every connection registered at the time of the call.
    ///
    /// Failed recipients are logged and removed before this returns; they
    /// never stop delivery to the others.
    pub async fn broadcast(&self, record: Record) -> BroadcastReport {
        let snapshot: Vec<(ConnectionId, Arc<dyn RecordSender>)> = {
            let conns = self.connections.read().await;
            conns
                .iter()
                .map(|(id, sender)| (id.clone(), Arc::clone(sender)))
                .collect()
        };

        let mut report = BroadcastReport {
            attempted: snapshot.len(),
            ..Default::default()
        };
        if snapshot.is_empty() {
            tracing::debug!("Broadcast with no connections");
            return report;
        }

        let budget = self.config.send_timeout;
        let results = join_all(snapshot.iter().map(|(_, sender)| {
            let record = Arc::clone(&record);
            async move {
                match tokio::time::timeout(budget, sender.send(record)).await {
                    Ok(result) => result,
                    Err(_) => Err(SendError::Timeout(budget)),
                }
            }
        }))
        .await;

        let mut failed = Vec::new();
        for ((id, sender), result) in snapshot.into_iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(source) => {
                    let err = HubError::Send {
                        id: id.clone(),
                        source,
                    };
                    tracing::warn!(conn_id = %id, "{}", err);
                    failed.push((id, sender));
                }
            }
        }

        if !failed.is_empty() {
            let mut conns = self.connections.write().await;
            for (id, sender) in failed {
                // Keep the entry if the ID was re-registered while we were sending
                let same = conns
                    .get(&id)
                    .is_some_and(|current| Arc::ptr_eq(current, &sender));
                if same {
                    conns.remove(&id);
                    tracing::info!(conn_id = %id, "Removed connection after failed send");
                    report.removed.push(id);
                }
            }
        }

        tracing::debug!(
            attempted = report.attempted,
            delivered = report.delivered,
            removed = report.removed.len(),
            "Broadcast finished"
        );
        report
    }

    /// Unregister a connection. Returns false if it was already gone.
    pub async fn on_disconnect(&self, id: &str) -> bool {
        let removed = self.connections.write().await.remove(id).is_some();
        if removed {
            tracing::info!(conn_id = %id, "Connection unregistered");
        }
        removed
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.connections.read().await.contains_key(id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.read().await.keys().cloned().collect()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
