//! The broker pool: connection lifecycle, the metadata cache, and broker
//! lookup.
//!
//! All shared mutable state of the coordination core lives here. The snapshot
//! is immutable and swapped wholesale; the registry mirrors the snapshot's
//! broker set; metadata fetches are single-flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex as SyncMutex, RwLock};
use rand::seq::SliceRandom;
use rand::thread_rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broker::BrokerConnection;
use crate::connection::ConnectionBuilder;
use crate::error::{Error, Result};
use crate::metadata::{Metadata, MetadataSnapshot};

/// Owns every live broker endpoint plus the cached cluster metadata.
///
/// Lock discipline: `parking_lot` locks (`brokers`, `snapshot`,
/// `connect_locks`) are never held across a suspension point; the `tokio`
/// mutexes (`seed`, `refresh_lock`, per-node connect locks) exist precisely
/// to serialize work across suspension points.
pub struct BrokerPool {
    builder: Arc<ConnectionBuilder>,

    /// Snapshot age beyond which `refresh_metadata_if_necessary` refreshes.
    metadata_max_age: Duration,

    /// Budget a `find_broker` caller spends waiting on another caller's
    /// in-flight connect to the same broker.
    authentication_timeout: Duration,

    /// Bootstrap endpoint. Connecting it is serialized by this mutex; a
    /// failed connect drops it so the next attempt rotates to the next seed
    /// address.
    seed: Mutex<Option<BrokerConnection>>,

    /// One endpoint per node id in the current snapshot. Entries are created
    /// when a snapshot is installed but only connected lazily by
    /// [`BrokerPool::find_broker`].
    brokers: RwLock<HashMap<i32, BrokerConnection>>,

    /// Current metadata snapshot; replaced atomically on refresh.
    snapshot: RwLock<Option<Arc<MetadataSnapshot>>>,

    /// Bumped on every install. Lets a refresh caller that queued behind an
    /// in-flight fetch detect that the snapshot it wants already landed.
    generation: AtomicU64,

    /// Single-flight guard for metadata fetches.
    refresh_lock: Mutex<()>,

    /// Per-node connect serialization.
    connect_locks: SyncMutex<HashMap<i32, Arc<Mutex<()>>>>,

    /// Rotation cursor for [`BrokerPool::with_broker`].
    rotation: AtomicUsize,
}

impl BrokerPool {
    pub fn new(
        builder: Arc<ConnectionBuilder>,
        metadata_max_age: Duration,
        authentication_timeout: Duration,
    ) -> Self {
        Self {
            builder,
            metadata_max_age,
            authentication_timeout,
            seed: Mutex::new(None),
            brokers: RwLock::new(HashMap::new()),
            snapshot: RwLock::new(None),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
            connect_locks: SyncMutex::new(HashMap::new()),
            rotation: AtomicUsize::new(0),
        }
    }

    /// Ensure at least one broker is connected, bootstrapping through a seed
    /// if necessary.
    pub async fn connect(&self) -> Result<()> {
        if self.has_connected_brokers() {
            return Ok(());
        }
        self.ensure_seed().await.map(|_| ())
    }

    /// Disconnect every live broker and drop the snapshot and registry.
    pub async fn disconnect(&self) {
        let seed = self.seed.lock().await.take();
        if let Some(broker) = seed {
            if broker.is_connected() {
                broker.disconnect().await;
            }
        }

        let brokers: Vec<BrokerConnection> = {
            let mut map = self.brokers.write();
            map.drain().map(|(_, broker)| broker).collect()
        };
        for broker in brokers {
            if broker.is_connected() {
                broker.disconnect().await;
            }
        }

        *self.snapshot.write() = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
        debug!("broker pool disconnected");
    }

    /// Whether any broker currently holds a live connection.
    pub fn has_connected_brokers(&self) -> bool {
        if self.brokers.read().values().any(|b| b.is_connected()) {
            return true;
        }
        match self.seed.try_lock() {
            Ok(seed) => seed.as_ref().is_some_and(|b| b.is_connected()),
            // someone is mid-connect on the seed; nothing is connected yet
            Err(_) => false,
        }
    }

    /// The current snapshot, if one has been installed.
    pub fn current_snapshot(&self) -> Option<Arc<MetadataSnapshot>> {
        self.snapshot.read().clone()
    }

    /// Run `f` against any connected broker.
    ///
    /// Rotates over the connected brokers to spread load; the node id is
    /// `None` when the call lands on a seed whose id is not yet known.
    pub async fn with_broker<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Option<i32>, BrokerConnection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (node_id, broker) = self.any_connected_broker().await?;
        f(node_id, broker).await
    }

    /// Return the broker for `node_id`, connecting it lazily.
    ///
    /// Concurrent callers for the same node serialize on a per-node lock; a
    /// waiter that outlives `authentication_timeout` fails with
    /// [`Error::LockTimeout`].
    pub async fn find_broker(&self, node_id: i32) -> Result<BrokerConnection> {
        let broker = match self.brokers.read().get(&node_id) {
            Some(broker) => Arc::clone(broker),
            None => return Err(Error::BrokerNotFound { node_id }),
        };
        if broker.is_connected() {
            return Ok(broker);
        }

        let lock = {
            let mut locks = self.connect_locks.lock();
            Arc::clone(locks.entry(node_id).or_default())
        };
        let _guard = tokio::time::timeout(self.authentication_timeout, lock.lock())
            .await
            .map_err(|_| Error::LockTimeout { node_id })?;

        // the holder we waited on may have connected this broker, and a
        // concurrent refresh may have replaced or dropped the endpoint
        let broker = match self.brokers.read().get(&node_id) {
            Some(broker) => Arc::clone(broker),
            None => return Err(Error::BrokerNotFound { node_id }),
        };
        if broker.is_connected() {
            return Ok(broker);
        }

        info!(broker = %broker.target(), node_id, "establishing new connection");
        broker.connect().await?;
        Ok(broker)
    }

    /// Fetch metadata for `topics` and install it as the new snapshot.
    ///
    /// Single-flight: callers that queue behind an in-flight fetch resolve
    /// from the snapshot that fetch installs instead of fetching again.
    pub async fn refresh_metadata(&self, topics: &[String]) -> Result<Arc<MetadataSnapshot>> {
        let observed = self.generation.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;

        if self.generation.load(Ordering::SeqCst) != observed {
            if let Some(snapshot) = self.current_snapshot() {
                debug!("sharing snapshot installed by a concurrent refresh");
                return Ok(snapshot);
            }
        }

        let metadata = self.fetch_metadata(topics).await?;
        let snapshot = Arc::new(MetadataSnapshot::new(metadata, Instant::now()));
        self.install(Arc::clone(&snapshot)).await;
        Ok(snapshot)
    }

    /// Refresh when the snapshot is absent, stale, or lacks one of `topics`.
    pub async fn refresh_metadata_if_necessary(
        &self,
        topics: &[String],
    ) -> Result<Arc<MetadataSnapshot>> {
        match self.current_snapshot() {
            Some(snapshot)
                if snapshot.age() <= self.metadata_max_age
                    && topics.iter().all(|t| snapshot.has_topic(t)) =>
            {
                Ok(snapshot)
            }
            _ => self.refresh_metadata(topics).await,
        }
    }

    /// Build (if needed), connect (if needed) and return the seed broker.
    async fn ensure_seed(&self) -> Result<BrokerConnection> {
        let mut seed = self.seed.lock().await;
        let broker = match seed.as_ref() {
            Some(broker) => Arc::clone(broker),
            None => {
                let broker = self.builder.from_seed();
                *seed = Some(Arc::clone(&broker));
                broker
            }
        };
        if broker.is_connected() {
            return Ok(broker);
        }

        info!(broker = %broker.target(), "connecting seed broker");
        match broker.connect().await {
            Ok(()) => Ok(broker),
            Err(e) => {
                // drop it so the next attempt rotates to the next seed address
                seed.take();
                Err(e)
            }
        }
    }

    async fn any_connected_broker(&self) -> Result<(Option<i32>, BrokerConnection)> {
        let mut connected: Vec<(i32, BrokerConnection)> = self
            .brokers
            .read()
            .iter()
            .filter(|(_, broker)| broker.is_connected())
            .map(|(node_id, broker)| (*node_id, Arc::clone(broker)))
            .collect();

        if !connected.is_empty() {
            connected.sort_by_key(|(node_id, _)| *node_id);
            let index = self.rotation.fetch_add(1, Ordering::Relaxed) % connected.len();
            let (node_id, broker) = &connected[index];
            return Ok((Some(*node_id), Arc::clone(broker)));
        }

        let seed = self.seed.lock().await;
        if let Some(broker) = seed.as_ref() {
            if broker.is_connected() {
                return Ok((broker.target().node_id, Arc::clone(broker)));
            }
        }

        Err(Error::BrokerNotConnected)
    }

    /// One physical metadata fetch: any connected broker, falling back to the
    /// seed broker when the chosen one fails at the transport level.
    async fn fetch_metadata(&self, topics: &[String]) -> Result<Metadata> {
        let broker = match self.any_connected_broker().await {
            Ok((_, broker)) => broker,
            // nothing is connected yet: bootstrap through a seed
            Err(Error::BrokerNotConnected) => self.ensure_seed().await?,
            Err(e) => return Err(e),
        };

        match broker.metadata(Some(topics)).await {
            Ok(metadata) => Ok(metadata),
            Err(e @ Error::Transport { .. }) => {
                warn!(e = %e, "metadata fetch failed - falling back to the seed broker");
                let seed = self.ensure_seed().await?;
                if Arc::ptr_eq(&seed, &broker) {
                    return Err(e);
                }
                seed.metadata(Some(topics)).await
            }
            Err(e) => Err(e),
        }
    }

    /// Install a freshly fetched snapshot and reconcile the registry with it.
    ///
    /// Endpoints for brokers still present are kept; brokers that left the
    /// topology are disconnected and discarded; new brokers get endpoints
    /// that stay unconnected until someone asks for them.
    async fn install(&self, snapshot: Arc<MetadataSnapshot>) {
        let mut dropped = Vec::new();

        {
            let seed = self.seed.lock().await;
            let mut brokers = self.brokers.write();
            let mut next = HashMap::with_capacity(snapshot.brokers().len());

            for member in snapshot.brokers() {
                if let Some(existing) = brokers.remove(&member.node_id) {
                    let target = existing.target();
                    if target.host == member.host && i32::from(target.port) == member.port {
                        next.insert(member.node_id, existing);
                        continue;
                    }
                    info!(
                        node_id = member.node_id,
                        old = %target,
                        new_host = member.host.as_str(),
                        new_port = member.port,
                        "broker moved - rebuilding endpoint",
                    );
                    dropped.push(existing);
                }

                // adopt the live seed connection under its discovered node id
                let adopted = seed.as_ref().filter(|broker| {
                    let target = broker.target();
                    broker.is_connected()
                        && target.host == member.host
                        && i32::from(target.port) == member.port
                });
                let endpoint = match adopted {
                    Some(broker) => Arc::clone(broker),
                    None => self.builder.for_node(member),
                };
                next.insert(member.node_id, endpoint);
            }

            // everything left behind vanished from the topology
            dropped.extend(brokers.drain().map(|(_, broker)| broker));
            *brokers = next;
        }

        *self.snapshot.write() = Some(Arc::clone(&snapshot));
        self.generation.fetch_add(1, Ordering::SeqCst);
        debug!(
            brokers = snapshot.brokers().len(),
            topics = snapshot.metadata().topics.len(),
            "installed metadata snapshot",
        );

        for broker in dropped {
            if broker.is_connected() {
                info!(broker = %broker.target(), "broker left the cluster topology - disconnecting");
                broker.disconnect().await;
            }
        }

        self.reconcile_seed(&snapshot).await;
    }

    /// Replace a seed that turned out not to be a cluster member, so later
    /// bootstrap traffic goes to a real one.
    ///
    /// The swap waits until some cluster member holds a live connection;
    /// until then the old seed is the pool's only working endpoint.
    async fn reconcile_seed(&self, snapshot: &MetadataSnapshot) {
        if snapshot.brokers().is_empty() {
            return;
        }

        let mut seed = self.seed.lock().await;
        let current = match seed.as_ref() {
            Some(broker) => Arc::clone(broker),
            None => return,
        };
        let target = current.target().clone();

        let is_member = snapshot
            .brokers()
            .iter()
            .any(|b| b.host == target.host && b.port == i32::from(target.port));
        if is_member {
            return;
        }

        let registry_has_connected = self.brokers.read().values().any(|b| b.is_connected());
        if current.is_connected() && !registry_has_connected {
            return;
        }

        let replacement = match snapshot.brokers().choose(&mut thread_rng()) {
            Some(member) => member,
            None => return,
        };
        info!(
            old = %target,
            new_host = replacement.host.as_str(),
            new_port = replacement.port,
            node_id = replacement.node_id,
            "seed broker is not a cluster member - replacing",
        );
        *seed = Some(self.builder.for_node(replacement));
        drop(seed);

        if current.is_connected() {
            current.disconnect().await;
        }
    }
}

impl std::fmt::Debug for BrokerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerPool")
            .field("builder", &self.builder)
            .field("metadata_max_age", &self.metadata_max_age)
            .field("authentication_timeout", &self.authentication_timeout)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
