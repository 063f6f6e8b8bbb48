//! Health Tracker
//!
//! Checks every configured node on a fixed interval and keeps the set of
//! nodes that answered. The set is swapped as a whole once every check of a
//! cycle finished, so readers always see a complete snapshot.

use parking_lot::RwLock;
use shared::admin_service::Readiness;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::http::NodeClient;
use crate::metrics_defs::{ACTIVE_NODES, HEALTH_CHECK_SKIPPED, HEALTH_CHECK_FAILURES};
use crate::registry::{Node, Registry};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum HealthError {
    #[error("Another health check is in progress")]
    RefreshInProgress,
}

/// Nodes considered reachable, in configuration order.
#[derive(Debug, Default)]
pub struct ActiveSet {
    nodes: Vec<Arc<Node>>,
}

impl ActiveSet {
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.nodes.iter().any(|n| n.address() == node.address())
    }

    /// Active nodes bound to one of the given cluster aliases, or every
    /// active node when no filter is given. Unknown aliases match nothing.
    pub fn filter(&self, registry: &Registry, clusters: Option<&[String]>) -> Vec<Arc<Node>> {
        match clusters {
            None => self.nodes.clone(),
            Some(clusters) => self
                .nodes
                .iter()
                .filter(|node| {
                    registry
                        .cluster_for(node.address())
                        .is_some_and(|cluster| clusters.iter().any(|c| c == cluster))
                })
                .cloned()
                .collect(),
        }
    }
}

struct HealthInner {
    registry: Registry,
    client: NodeClient,
    active: RwLock<Arc<ActiveSet>>,
    // Single permit, held for the duration of one refresh cycle
    refresh_lock: Semaphore,
    // Used by the readiness check. Set once the first cycle completed.
    ready: AtomicBool,
}

#[derive(Clone)]
pub struct HealthTracker {
    inner: Arc<HealthInner>,
}

impl HealthTracker {
    /// Every configured node starts out active.
    pub fn new(registry: Registry, client: NodeClient) -> Self {
        let active = ActiveSet {
            nodes: registry.nodes().cloned().collect(),
        };

        Self {
            inner: Arc::new(HealthInner {
                registry,
                client,
                active: RwLock::new(Arc::new(active)),
                refresh_lock: Semaphore::new(1),
                ready: AtomicBool::new(false),
            }),
        }
    }

    /// The current active set. The snapshot never changes once taken.
    pub fn snapshot(&self) -> Arc<ActiveSet> {
        self.inner.active.read().clone()
    }

    pub fn active_nodes(&self, clusters: Option<&[String]>) -> Vec<Arc<Node>> {
        self.snapshot().filter(&self.inner.registry, clusters)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Relaxed)
    }

    /// Runs one health check cycle and returns the number of active nodes.
    ///
    /// Fails without probing anything when another cycle is still running.
    pub async fn refresh(&self) -> Result<usize, HealthError> {
        let _permit = self
            .inner
            .refresh_lock
            .try_acquire()
            .map_err(|_| HealthError::RefreshInProgress)?;

        let nodes: Vec<Arc<Node>> = self.inner.registry.nodes().cloned().collect();
        let mut join_set = JoinSet::new();
        for (index, node) in nodes.iter().enumerate() {
            let client = self.inner.client.clone();
            let node = node.clone();
            join_set.spawn(async move { (index, client.ping(&node).await) });
        }

        let mut alive = vec![false; nodes.len()];
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok((index, is_alive)) => alive[index] = is_alive,
                Err(e) => tracing::error!("Health check task panicked: {}", e),
            }
        }

        let mut active = Vec::with_capacity(nodes.len());
        for (node, is_alive) in nodes.into_iter().zip(alive) {
            if is_alive {
                active.push(node);
            } else {
                let cluster = self.inner.registry.cluster_for(node.address());
                tracing::warn!(node = %node, cluster = ?cluster, "Search node is down");
                shared::counter!(HEALTH_CHECK_FAILURES).increment(1);
            }
        }

        let count = active.len();
        *self.inner.active.write() = Arc::new(ActiveSet { nodes: active });
        self.inner.ready.store(true, Ordering::Relaxed);
        shared::gauge!(ACTIVE_NODES).set(count as f64);

        Ok(count)
    }

    /// Starts the periodic health check loop.
    ///
    /// Each cycle runs in its own task so a slow cycle cannot delay the
    /// schedule; a tick that finds the previous cycle still running is skipped.
    pub fn spawn(&self, interval: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    match tracker.refresh().await {
                        Ok(count) => tracing::debug!(active = count, "Health check finished"),
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping health check cycle");
                            shared::counter!(HEALTH_CHECK_SKIPPED).increment(1);
                        }
                    }
                });
            }
        })
    }
}

impl Readiness for HealthTracker {
    fn is_ready(&self) -> bool {
        HealthTracker::is_ready(self)
    }

    fn describe(&self) -> String {
        if !HealthTracker::is_ready(self) {
            return "waiting for the first health check".to_string();
        }
        format!(
            "{} of {} nodes active",
            self.snapshot().nodes().len(),
            self.inner.registry.len()
        )
    }
}
