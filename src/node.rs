//! Represents a running cache node and its central components.
//!
//! A [Node](Node) is assembled once at process start by the [Builder](crate::builder::Builder)
//! and bundles everything the rest of the system needs: the namespace
//! [Registry](crate::registry::Registry), the [Config](crate::config::Config) and the
//! [HttpPool](crate::http::HttpPool) connecting this node to its peers. Instead of resolving
//! components through a hidden global, every part of the system receives the **Arc** it needs
//! from here - most importantly, the registry is handed to the pool so that incoming peer
//! requests can be resolved.
//!
//! The node also carries the central **is_running** flag which is toggled to *false* once
//! [Node::terminate](Node::terminate) is invoked (e.g. by the signal handler installed via
//! [signals](crate::signals)). All long running loops (the server, the config monitor, the
//! peer set listener) observe this flag and wind down once it flips.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::http::HttpPool;
use crate::registry::Registry;
use crate::server::Server;

/// Bundles the central components of a cache node.
///
/// # Examples
/// ```no_run
/// # use callisto::builder::Builder;
/// #[tokio::main]
/// async fn main() {
///     // Assemble a node with all features enabled...
///     let node = Builder::new().enable_all().build().await;
///
///     // Register the namespaces served by this node...
///     let scores = node
///         .registry()
///         .create("scores", 2 << 10, |key: &str| {
///             Ok(format!("score of {}", key).into_bytes())
///         })
///         .unwrap();
///     scores.register_peers(node.pool());
///
///     // Run the main event loop of the peer protocol server...
///     node.serve().await;
/// }
/// ```
pub struct Node {
    registry: Arc<Registry>,
    config: Arc<Config>,
    pool: Arc<HttpPool>,
    is_running: AtomicBool,
}

impl Node {
    /// Creates a new node from its components.
    pub(crate) fn new(
        registry: Arc<Registry>,
        config: Arc<Config>,
        pool: Arc<HttpPool>,
    ) -> Arc<Self> {
        Arc::new(Node {
            registry,
            config,
            pool,
            is_running: AtomicBool::new(true),
        })
    }

    /// Provides access to the namespace registry of this node.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Provides access to the system configuration of this node.
    pub fn config(&self) -> Arc<Config> {
        self.config.clone()
    }

    /// Provides access to the peer pool of this node.
    ///
    /// This is what has to be passed to
    /// [Namespace::register_peers](crate::namespace::Namespace::register_peers) for each
    /// namespace which should be distributed across the cluster.
    pub fn pool(&self) -> Arc<HttpPool> {
        self.pool.clone()
    }

    /// Runs the peer protocol server until the node is terminated.
    ///
    /// This is most probably the last call in a **main** function, as it only returns once
    /// [terminate](Node::terminate) has been invoked.
    pub async fn serve(self: &Arc<Self>) {
        Server::new(self.clone()).event_loop().await;
    }

    /// Determines if the node is still running or if [terminate](Node::terminate) has already
    /// been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Terminates the node.
    ///
    /// This will toggle the [is_running()](Node::is_running) flag to **false**, upon which all
    /// background loops (server, config monitor, peer set listener) exit gracefully.
    pub fn terminate(&self) {
        log::info!("Terminating the node...");
        self.is_running.store(false, Ordering::Release);
    }
}
