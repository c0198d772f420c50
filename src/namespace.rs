//! Provides the cache namespace, the central orchestrator of the read-through algorithm.
//!
//! A [Namespace](Namespace) binds a name, a user supplied [Loader](crate::peers::Loader), a
//! local [LRUStore](crate::lru::LRUStore) and - once registered - a peer transport. A lookup
//! via [Namespace::get](Namespace::get) walks through three stages:
//!
//! 1. A hit in the local store is returned immediately, without any coalescing or peer
//!    contact.
//! 2. On a miss, the request enters the namespace's [CallGroup](crate::coalesce::CallGroup),
//!    therefore all concurrent requests for the same key share one load.
//! 3. The single in-flight load consults the peer transport: if a remote peer owns the key's
//!    shard, the value is fetched from there; otherwise (or if the peer cannot be reached) the
//!    user loader produces the value and the local store is populated.
//!
//! Note that values fetched from a peer are deliberately not cached locally. Each key has
//! exactly one owning peer (as designated by the hash ring) and only the owner keeps the value
//! in memory - otherwise a popular key would eventually be duplicated on every node that ever
//! requested it.
use std::sync::{Arc, Mutex, OnceLock};

use crate::coalesce::CallGroup;
use crate::lru::LRUStore;
use crate::peers::{Loader, PeerPicker};
use crate::view::ByteView;

/// Represents a named cache with its own loader, local store and (optionally) a peer transport.
///
/// Namespaces are created once (most probably during startup), live for the lifetime of the
/// process and are shared freely across tasks via **Arc**.
///
/// # Examples
/// ```
/// # use callisto::namespace::Namespace;
/// # #[tokio::main]
/// # async fn main() {
/// let namespace = Namespace::new("scores", 2 << 10, |key: &str| match key {
///     "Tom" => Ok(b"630".to_vec()),
///     _ => Err(anyhow::anyhow!("{} does not exist", key)),
/// });
///
/// assert_eq!(namespace.get("Tom").await.unwrap().to_string(), "630");
/// assert_eq!(namespace.get("Jerry").await.is_err(), true);
/// # }
/// ```
pub struct Namespace {
    name: String,
    loader: Box<dyn Loader>,
    store: Mutex<LRUStore<ByteView>>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    loads: CallGroup,
}

/// Provides a point-in-time snapshot of the metrics of a namespace.
pub struct NamespaceStats {
    /// Contains the number of locally cached entries.
    pub entries: usize,
    /// Contains the memory in bytes allocated by the locally cached keys and values.
    pub allocated_memory: usize,
    /// Contains the configured memory budget in bytes (0 = unbounded).
    pub max_memory: usize,
    /// Contains the number of reads performed on the local store.
    pub reads: usize,
    /// Contains the number of writes performed on the local store.
    pub writes: usize,
    /// Contains the rate of reads which hit a locally cached entry (in percent).
    pub hit_rate: f32,
}

impl Namespace {
    /// Creates a new namespace with the given name, memory budget and loader.
    ///
    /// The budget limits the bytes allocated by locally cached keys and values, where **0**
    /// disables the limit. Note that creating a namespace doesn't make it known to the
    /// cluster - use [Registry::create](crate::registry::Registry::create) for that.
    pub fn new(name: &str, max_bytes: usize, loader: impl Loader + 'static) -> Arc<Self> {
        let mut store = LRUStore::new(max_bytes);

        let namespace_name = name.to_owned();
        store.on_evict(move |key, _value| {
            log::debug!("Evicting {} from namespace {}...", key, namespace_name);
        });

        Arc::new(Namespace {
            name: name.to_owned(),
            loader: Box::new(loader),
            store: Mutex::new(store),
            peers: OnceLock::new(),
            loads: CallGroup::new(),
        })
    }

    /// Returns the name of this namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers the peer transport used to delegate lookups to the owning peer of a key.
    ///
    /// This is a one time operation performed by the startup wiring (see
    /// [Builder](crate::builder::Builder)).
    ///
    /// # Panics
    /// Registering a transport twice is a programming error and therefore panics.
    pub fn register_peers(&self, peers: Arc<dyn PeerPicker>) {
        if self.peers.set(peers).is_err() {
            panic!(
                "A peer transport has already been registered for namespace {}!",
                self.name
            );
        }
    }

    /// Performs a cache lookup for the given key.
    ///
    /// On a local miss, the value is either fetched from the peer owning the key's shard or
    /// produced by the user loader - see the module documentation for the exact semantics.
    /// Concurrent lookups for the same key are coalesced into a single load.
    ///
    /// # Errors
    /// Fails for an empty key and for keys which the loader cannot produce a value for.
    pub async fn get(&self, key: &str) -> anyhow::Result<ByteView> {
        if key.is_empty() {
            return Err(anyhow::anyhow!("A key is required"));
        }

        if let Some(value) = self.lookup_cached(key) {
            log::debug!("Cache hit for {} in namespace {}...", key, self.name);
            return Ok(value);
        }

        self.load(key).await
    }

    /// Looks up the given key in the local store.
    fn lookup_cached(&self, key: &str) -> Option<ByteView> {
        self.store.lock().unwrap().get(key).cloned()
    }

    /// Loads the given key via the call group, so each key is only fetched once at a time
    /// (either locally or remotely) regardless of the number of concurrent callers.
    async fn load(&self, key: &str) -> anyhow::Result<ByteView> {
        self.loads
            .run(key, || self.perform_load(key))
            .await
            .map_err(|error| anyhow::anyhow!("{:#}", error))
    }

    /// Actually performs a load, preferring the peer which owns the shard of the key.
    ///
    /// A failed peer fetch falls through to the local loader: correctness is preserved even
    /// when peers are briefly unreachable, at the cost of an extra call to the loader.
    async fn perform_load(&self, key: &str) -> anyhow::Result<ByteView> {
        if let Some(peers) = self.peers.get() {
            if let Some(peer) = peers.pick_peer(key) {
                match peer.get(&self.name, key).await {
                    // The fetched buffer is exclusively ours, so it is wrapped without a
                    // defensive copy...
                    Ok(bytes) => return Ok(ByteView::from(bytes)),
                    Err(error) => log::warn!(
                        "Failed to fetch {} from the owning peer of namespace {} ({:#}). \
                         Falling back to the local loader...",
                        key,
                        self.name,
                        error
                    ),
                }
            }
        }

        self.load_locally(key).await
    }

    /// Invokes the user loader and populates the local store.
    async fn load_locally(&self, key: &str) -> anyhow::Result<ByteView> {
        let bytes = self.loader.load(key).await?;
        let value = ByteView::from(bytes);

        self.store
            .lock()
            .unwrap()
            .put(key.to_owned(), value.clone());

        Ok(value)
    }

    /// Returns a snapshot of the metrics of the local store.
    pub fn stats(&self) -> NamespaceStats {
        let store = self.store.lock().unwrap();

        NamespaceStats {
            entries: store.len(),
            allocated_memory: store.allocated_memory(),
            max_memory: store.max_memory(),
            reads: store.reads(),
            writes: store.writes(),
            hit_rate: store.hit_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::namespace::Namespace;
    use crate::peers::{PeerGetter, PeerPicker};
    use crate::testing::test_async;

    /// Provides a loader which serves a fixed score table and counts its invocations.
    fn scores_loader(loads: Arc<AtomicUsize>) -> impl Fn(&str) -> anyhow::Result<Vec<u8>> {
        move |key: &str| {
            let _ = loads.fetch_add(1, Ordering::SeqCst);
            match key {
                "Tom" => Ok(b"630".to_vec()),
                "Jack" => Ok(b"589".to_vec()),
                "Sam" => Ok(b"567".to_vec()),
                _ => Err(anyhow::anyhow!("{} does not exist", key)),
            }
        }
    }

    #[test]
    fn values_are_loaded_once_and_then_served_from_the_cache() {
        test_async(async {
            let loads = Arc::new(AtomicUsize::new(0));
            let namespace = Namespace::new("scores", 2 << 10, scores_loader(loads.clone()));

            // The first lookup has to invoke the loader...
            assert_eq!(namespace.get("Tom").await.unwrap().to_string(), "630");
            assert_eq!(loads.load(Ordering::SeqCst), 1);

            // ...the second one is served from the local store.
            assert_eq!(namespace.get("Tom").await.unwrap().to_string(), "630");
            assert_eq!(loads.load(Ordering::SeqCst), 1);

            let stats = namespace.stats();
            assert_eq!(stats.entries, 1);
            assert_eq!(stats.allocated_memory, "Tom".len() + "630".len());
        });
    }

    #[test]
    fn empty_keys_are_rejected() {
        test_async(async {
            let loads = Arc::new(AtomicUsize::new(0));
            let namespace = Namespace::new("scores", 2 << 10, scores_loader(loads.clone()));

            assert_eq!(namespace.get("").await.is_err(), true);

            // The loader must not even be consulted for an invalid key...
            assert_eq!(loads.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn loader_failures_are_reported_to_the_caller() {
        test_async(async {
            let loads = Arc::new(AtomicUsize::new(0));
            let namespace = Namespace::new("scores", 2 << 10, scores_loader(loads.clone()));

            let result = namespace.get("Unknown").await;
            assert_eq!(result.is_err(), true);
            assert_eq!(
                result.unwrap_err().to_string(),
                "Unknown does not exist"
            );

            // Failures are not cached - the next lookup asks the loader again...
            assert_eq!(namespace.get("Unknown").await.is_err(), true);
            assert_eq!(loads.load(Ordering::SeqCst), 2);
        });
    }

    /// Routes every key to a single fake peer.
    struct SinglePeer {
        getter: Arc<CountingGetter>,
    }

    impl PeerPicker for SinglePeer {
        fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
            Some(self.getter.clone())
        }
    }

    /// Serves a fixed value (or a fixed error) and counts its invocations.
    struct CountingGetter {
        fetches: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PeerGetter for CountingGetter {
        async fn get(&self, _namespace: &str, key: &str) -> anyhow::Result<Bytes> {
            let _ = self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(anyhow::anyhow!("The peer is unreachable"))
            } else {
                Ok(Bytes::from(format!("remote value of {}", key)))
            }
        }
    }

    #[test]
    fn values_fetched_from_a_peer_are_not_cached_locally() {
        test_async(async {
            let loads = Arc::new(AtomicUsize::new(0));
            let namespace = Namespace::new("scores", 2 << 10, scores_loader(loads.clone()));

            let getter = Arc::new(CountingGetter {
                fetches: AtomicUsize::new(0),
                fail: false,
            });
            namespace.register_peers(Arc::new(SinglePeer {
                getter: getter.clone(),
            }));

            // Both lookups are answered by the owning peer - the shard owner is responsible
            // for caching, so the local store stays empty and the second lookup goes over
            // the wire again...
            assert_eq!(
                namespace.get("Tom").await.unwrap().to_string(),
                "remote value of Tom"
            );
            assert_eq!(
                namespace.get("Tom").await.unwrap().to_string(),
                "remote value of Tom"
            );
            assert_eq!(getter.fetches.load(Ordering::SeqCst), 2);
            assert_eq!(namespace.stats().entries, 0);
            assert_eq!(loads.load(Ordering::SeqCst), 0);
        });
    }

    #[test]
    fn peer_failures_fall_back_to_the_local_loader() {
        test_async(async {
            let loads = Arc::new(AtomicUsize::new(0));
            let namespace = Namespace::new("scores", 2 << 10, scores_loader(loads.clone()));

            let getter = Arc::new(CountingGetter {
                fetches: AtomicUsize::new(0),
                fail: true,
            });
            namespace.register_peers(Arc::new(SinglePeer {
                getter: getter.clone(),
            }));

            // The remote fetch fails, but the lookup still succeeds via the local loader...
            assert_eq!(namespace.get("Tom").await.unwrap().to_string(), "630");
            assert_eq!(getter.fetches.load(Ordering::SeqCst), 1);
            assert_eq!(loads.load(Ordering::SeqCst), 1);

            // ...and the locally loaded value is now cached.
            assert_eq!(namespace.get("Tom").await.unwrap().to_string(), "630");
            assert_eq!(getter.fetches.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    #[should_panic]
    fn registering_a_second_transport_is_rejected() {
        let loads = Arc::new(AtomicUsize::new(0));
        let namespace = Namespace::new("scores", 2 << 10, scores_loader(loads));

        let picker = || {
            Arc::new(SinglePeer {
                getter: Arc::new(CountingGetter {
                    fetches: AtomicUsize::new(0),
                    fail: true,
                }),
            })
        };

        namespace.register_peers(picker());
        namespace.register_peers(picker());
    }
}
