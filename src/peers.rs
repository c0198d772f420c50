//! Defines the capabilities connecting a namespace to its data sources.
//!
//! A [Namespace](crate::namespace::Namespace) obtains values from two places: the user supplied
//! [Loader](Loader) producing values from the underlying source of truth, and - in a clustered
//! setup - remote peers which own the shard a key belongs to. The latter are abstracted away
//! behind [PeerPicker](PeerPicker) and [PeerGetter](PeerGetter), so the cache logic itself
//! never knows which wire protocol is used to talk to a peer (see
//! [HttpPool](crate::http::HttpPool) for the HTTP based implementation).
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// Produces the value for a key on a cache miss.
///
/// This is the callback handed in by the user of a namespace. It is only ever invoked for keys
/// which are neither cached locally nor owned by a remote peer (or when fetching from the
/// owning peer failed).
///
/// Note that any plain function or closure of the shape `Fn(&str) -> anyhow::Result<Vec<u8>>`
/// can directly be used as a loader. Types performing actual I/O implement the trait itself
/// and make use of the async signature.
///
/// # Examples
/// ```
/// # use callisto::peers::Loader;
/// # #[tokio::main]
/// # async fn main() {
/// let loader = |key: &str| Ok(format!("value of {}", key).into_bytes());
///
/// assert_eq!(loader.load("Tom").await.unwrap(), b"value of Tom".to_vec());
/// # }
/// ```
#[async_trait]
pub trait Loader: Send + Sync {
    /// Produces the bytes to cache for the given key or reports why this isn't possible.
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// Permits plain functions and closures to act as a [Loader](Loader).
#[async_trait]
impl<F> Loader for F
where
    F: Fn(&str) -> anyhow::Result<Vec<u8>> + Send + Sync,
{
    async fn load(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self(key)
    }
}

/// Locates the remote peer which owns a given key.
pub trait PeerPicker: Send + Sync {
    /// Returns a getter for the remote peer owning the given key.
    ///
    /// Returns **None** if the key should be handled locally. This is notably also the case
    /// if the local node itself is the owner of the key - a request for the own shard must
    /// never be looped back over the wire.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// Fetches values from the cache of one specific remote peer.
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Fetches the value for the given key from the given namespace on the remote peer.
    async fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Bytes>;
}
