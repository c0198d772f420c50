//! Implements the peer transport over HTTP.
//!
//! Peers of a cluster talk to each other using a deliberately tiny wire protocol: fetching a
//! value is a `GET {base_path}{namespace}/{key}` request (both segments percent-encoded) against
//! the owning peer, which responds with status **200** and the raw bytes as an
//! `application/octet-stream` body. A malformed path yields **400**, an unknown namespace
//! **404** and a failing load **500** (with the error text as body).
//!
//! The [HttpPool](HttpPool) covers both roles of this protocol: it serves incoming requests
//! (see [HttpPool::handle](HttpPool::handle), plugged into the accept loop by the
//! [Server](crate::server::Server)) and it acts as the [PeerPicker](crate::peers::PeerPicker)
//! used to route outgoing lookups, owning the hash ring along with one [HttpGetter](HttpGetter)
//! client handle per peer. Ring and client handles are guarded by a single lock, as a peer set
//! change always rebuilds both.
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use fnv::FnvHashMap;
use hyper::client::HttpConnector;
use hyper::header::HeaderValue;
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;

use crate::peers::{PeerGetter, PeerPicker};
use crate::registry::Registry;
use crate::ring::HashRing;

/// Contains the path prefix under which the peer protocol is served.
pub const DEFAULT_BASE_PATH: &str = "/_callisto/";

/// Determines how many virtual nodes represent each peer on the hash ring.
///
/// 50 replicas per peer smooth the key distribution well enough, even for clusters of only a
/// handful of peers.
const DEFAULT_REPLICAS: usize = 50;

/// Routes lookups between the peers of a cluster via HTTP.
///
/// A pool is created once per process with the node's own public address and the
/// [Registry](crate::registry::Registry) used to resolve incoming requests. The peer set is
/// installed via [set](HttpPool::set) (and can be re-applied at any time, e.g. when the
/// config changes - the ring is rebuilt from scratch either way).
pub struct HttpPool {
    self_address: String,
    base_path: String,
    registry: Arc<Registry>,
    state: Mutex<PoolState>,
}

/// Bundles the hash ring and the per-peer client handles.
///
/// Both are always read or rebuilt together, therefore one lock guards them both.
struct PoolState {
    ring: HashRing,
    getters: FnvHashMap<String, Arc<HttpGetter>>,
}

impl HttpPool {
    /// Creates a new pool for the node reachable at the given address.
    ///
    /// The address has to be the base URL under which the other peers can dial this node
    /// (e.g. `http://cache-1:2410`), as it is matched against the ring to detect keys owned
    /// by the local node itself.
    pub fn new(self_address: &str, registry: Arc<Registry>) -> Arc<Self> {
        Arc::new(HttpPool {
            self_address: self_address.to_owned(),
            base_path: DEFAULT_BASE_PATH.to_owned(),
            registry,
            state: Mutex::new(PoolState {
                ring: HashRing::new(DEFAULT_REPLICAS),
                getters: FnvHashMap::default(),
            }),
        })
    }

    /// Installs the given peer set, replacing any previously known peers.
    ///
    /// The ring is rebuilt from scratch and one client handle per peer is created. Note that
    /// the local node's own address should be part of the set, so that the ring can assign
    /// shards to this node as well.
    pub fn set<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let peers: Vec<String> = peers
            .into_iter()
            .map(|peer| peer.as_ref().to_owned())
            .collect();

        let mut state = self.state.lock().unwrap();
        state.ring = HashRing::new(DEFAULT_REPLICAS);
        state.ring.add(&peers);
        state.getters = FnvHashMap::default();
        for peer in &peers {
            let _ = state.getters.insert(
                peer.clone(),
                Arc::new(HttpGetter::new(&format!("{}{}", peer, self.base_path))),
            );
        }

        log::info!(
            "Installed a set of {} peer(s) on {}...",
            peers.len(),
            self.self_address
        );
    }

    /// Handles an incoming peer request.
    ///
    /// This resolves `{base_path}{namespace}/{key}` against the registry and performs a full
    /// cache lookup (which may in turn invoke the namespace's loader). All protocol errors
    /// are mapped to 4xx/5xx responses - this never panics the serving process.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        log::debug!("{} {}", request.method(), request.uri().path());

        let (namespace_name, key) = match self.parse_path(request.uri().path()) {
            Some(parts) => parts,
            None => return error_response(StatusCode::BAD_REQUEST, "bad request"),
        };

        let namespace = match self.registry.find(&namespace_name) {
            Some(namespace) => namespace,
            None => {
                return error_response(
                    StatusCode::NOT_FOUND,
                    &format!("no such namespace: {}", namespace_name),
                )
            }
        };

        match namespace.get(&key).await {
            Ok(value) => {
                let mut response = Response::new(Body::from(value.into_bytes()));
                let _ = response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                );
                response
            }
            Err(error) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("{:#}", error))
            }
        }
    }

    /// Extracts the namespace and key segments from a request path.
    ///
    /// Expects `{base_path}{namespace}/{key}` with percent-encoded segments and yields
    /// **None** for anything else.
    fn parse_path(&self, path: &str) -> Option<(String, String)> {
        let suffix = path.strip_prefix(self.base_path.as_str())?;

        let mut parts = suffix.splitn(2, '/');
        let namespace = parts.next().filter(|namespace| !namespace.is_empty())?;
        let key = parts.next()?;

        let namespace = urlencoding::decode(namespace).ok()?.into_owned();
        let key = urlencoding::decode(key).ok()?.into_owned();

        Some((namespace, key))
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let state = self.state.lock().unwrap();

        match state.ring.get(key) {
            // Keys owned by the local node are served locally and never looped back over
            // the wire...
            Some(peer) if peer != self.self_address => {
                log::debug!("Picked peer {} for {}...", peer, key);
                state
                    .getters
                    .get(peer)
                    .map(|getter| -> Arc<dyn PeerGetter> { getter.clone() })
            }
            _ => None,
        }
    }
}

/// Creates a plain text response with the given status code.
fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_owned()));
    *response.status_mut() = status;
    response
}

/// Fetches values from one specific remote peer.
///
/// A getter is a lightweight client handle bound to the base URL of its peer. Both `http` and
/// `https` peers are supported.
pub struct HttpGetter {
    base_url: String,
    client: Client<HttpsConnector<HttpConnector>>,
}

impl HttpGetter {
    /// Creates a client handle bound to the given base URL (address plus protocol prefix).
    pub fn new(base_url: &str) -> Self {
        HttpGetter {
            base_url: base_url.to_owned(),
            client: Client::builder().build::<_, Body>(HttpsConnector::new()),
        }
    }
}

#[async_trait]
impl PeerGetter for HttpGetter {
    async fn get(&self, namespace: &str, key: &str) -> anyhow::Result<Bytes> {
        let url = format!(
            "{}{}/{}",
            self.base_url,
            urlencoding::encode(namespace),
            urlencoding::encode(key)
        );

        let response = self
            .client
            .get(Uri::from_str(&url).context("Invalid peer url")?)
            .await
            .with_context(|| format!("Failed to fetch {} from the peer", url))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "The peer returned: {}",
                response.status()
            ));
        }

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .context("Failed to read the response body sent by the peer")?;

        Ok(body)
    }
}
