//! Provides a builder which can be used to set up and initialize a cache node.
//!
//! This can be used to create and wire all central parts of the framework: the config (with
//! its change monitor), the namespace registry, the peer pool and the signal handler. As some
//! of these are optional (especially in test environments), the builder permits to selectively
//! enable or disable them.
//!
//! # Example
//! Setting up a node with all features enabled:
//! ```no_run
//! # use callisto::builder::Builder;
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the node...
//!     let node = Builder::new().enable_all().build().await;
//!
//!     // Register namespaces here...
//!
//!     // Start the main event loop of the server...
//!     node.serve().await;
//! }
//! ```
use std::sync::Arc;

use crate::config::Config;
use crate::http::HttpPool;
use crate::node::Node;
use crate::registry::Registry;
use crate::{init_logging, CALLISTO_REVISION, CALLISTO_VERSION};

/// Initializes the framework by creating and wiring all core components.
///
/// Note that the public address of the node (**cluster.self**) is read once while building,
/// as the peer pool is bound to it. Changing this address therefore requires a restart - in
/// contrast to **cluster.peers** and the server binding, which are re-applied whenever the
/// config changes.
///
/// # Example
/// Setting up a node with all features enabled:
/// ```no_run
/// # use callisto::builder::Builder;
/// #[tokio::main]
/// async fn main() {
///     // Enable all features and build the node...
///     let node = Builder::new().enable_all().build().await;
///
///     // Register namespaces here...
///
///     // Start the main event loop of the server...
///     node.serve().await;
/// }
/// ```
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    enable_signals: bool,
    setup_config: bool,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Builder {
            setup_logging: false,
            enable_signals: false,
            setup_config: false,
        }
    }

    /// Enables all features.
    ///
    /// Note that using this method (and then maybe disabling selected components) is quite
    /// convenient, but be aware that new components which might be added in a library update
    /// will then also be enabled by default. This might or might not be the expected
    /// behaviour.
    pub fn enable_all(mut self) -> Self {
        self.setup_logging = true;
        self.enable_signals = true;
        self.setup_config = true;

        self
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout. As we intend cache
    /// nodes to be run in docker containers, this is all that is needed for proper logging.
    /// The date format being used is digestible by established tools like **greylog**.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system after
    /// [enable_all()](Builder::enable_all) has been used.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Installs a signal listener which terminates the node once **CTRL-C** or **SIGHUP**
    /// is received.
    ///
    /// For more details see: [signals](crate::signals)
    pub fn enable_signals(mut self) -> Self {
        self.enable_signals = true;
        self
    }

    /// Disables installing the signal listener after [enable_all()](Builder::enable_all)
    /// has been used.
    pub fn disable_signals(mut self) -> Self {
        self.enable_signals = false;
        self
    }

    /// Loads the **config/settings.yml** and installs a change monitor for it.
    ///
    /// For more details see: [config](crate::config)
    pub fn enable_config(mut self) -> Self {
        self.setup_config = true;
        self
    }

    /// Disables loading the config file after [enable_all()](Builder::enable_all) has been
    /// used.
    ///
    /// Note that the node still carries a (then empty) **Config** instance, which can be fed
    /// manually via `load_from_string` - this is the common setup for tests.
    pub fn disable_config(mut self) -> Self {
        self.setup_config = false;
        self
    }

    /// Builds the [Node](crate::node::Node) with all the enabled components being wired.
    pub async fn build(self) -> Arc<Node> {
        if self.setup_logging {
            init_logging();
        }

        log::info!(
            "||. CALLISTO (v {} - rev {}) running on {} core(s) in {} CPU(s)",
            CALLISTO_VERSION,
            CALLISTO_REVISION,
            num_cpus::get(),
            num_cpus::get_physical()
        );

        let config = Arc::new(Config::new("config/settings.yml"));
        if self.setup_config {
            // Create the "config" directory in case it doesn't exist...
            if let Err(error) = tokio::fs::create_dir_all("config").await {
                log::warn!("Failed to create the config base directory: {}", error);
            }

            // Actually try to read the file...
            if let Err(error) = config.load().await {
                log::error!("{}", error);
            }
        }

        let registry = Registry::new();

        // The pool is bound to the public address of this node, as announced to the other
        // peers...
        let self_address = config.current().config()["cluster"]["self"]
            .as_str()
            .unwrap_or("")
            .to_owned();
        let pool = HttpPool::new(&self_address, registry.clone());

        let node = Node::new(registry, config.clone(), pool.clone());

        // Apply the initial peer set and re-apply it whenever the config changes...
        apply_peer_set(&config, &pool);
        run_peer_set_listener(node.clone());

        if self.setup_config {
            run_config_change_monitor(node.clone());
        }

        if self.enable_signals {
            crate::signals::install(node.clone());
        }

        node
    }
}

/// Installs the peer set found in **cluster.peers** into the given pool.
///
/// Note that this provides a safety mechanism: if no peer list at all is present, we leave
/// the current peer set untouched. This prevents the node from dropping out of its cluster in
/// the case of an accidental change or an invalid config.
fn apply_peer_set(config: &Arc<Config>, pool: &Arc<HttpPool>) {
    let handle = config.current();
    match handle.config()["cluster"]["peers"].as_vec() {
        Some(peers) => {
            pool.set(peers.iter().filter_map(|peer| peer.as_str()));
        }
        None => log::info!(
            "The config does not contain a 'cluster.peers' list. Keeping the current peer set."
        ),
    }
}

/// Forks a task which re-applies the peer set once the config changes.
fn run_peer_set_listener(node: Arc<Node>) {
    use tokio::sync::broadcast::error::RecvError;

    // Subscribe before forking, so that a config loaded right after building is never
    // missed...
    let config = node.config();
    let mut change_notifier = config.notifier();

    crate::spawn!(async move {
        while node.is_running() {
            match change_notifier.recv().await {
                Ok(()) | Err(RecvError::Lagged(_)) => apply_peer_set(&config, &node.pool()),
                Err(RecvError::Closed) => return,
            }
        }
    });
}

#[cfg(test)]
fn run_config_change_monitor(_node: Arc<Node>) {
    // No automatic updates during testing...
}

/// Forks a task which re-loads the config file once its modified date changes on disk.
#[cfg(not(test))]
fn run_config_change_monitor(node: Arc<Node>) {
    crate::spawn!(async move {
        let config = node.config();

        while node.is_running() {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            // This will contain the last modified date of the file on disk or be None if the
            // file is absent...
            let last_modified = config.last_modified().await;

            // Contains the timestamp when the file was loaded the last time or None if no
            // data has been loaded yet...
            let last_loaded = config.last_loaded();

            // If a file is present and newer than the one previously loaded (or if none has
            // been loaded so far) -> perform a reload and broadcast an update if the file has
            // been successfully loaded...
            if last_modified.is_some() && (last_loaded.is_none() || last_modified > last_loaded) {
                match config.load().await {
                    Ok(_) => {
                        log::info!("System configuration was re-loaded.");
                    }
                    Err(error) => log::error!("Failed to re-load the system config: {}", error),
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::testing::test_async;

    #[test]
    fn a_node_is_wired_and_can_be_terminated() {
        test_async(async {
            let node = Builder::new().build().await;

            assert_eq!(node.is_running(), true);
            let _ = node
                .registry()
                .create("scores", 2 << 10, |_key: &str| Ok(b"630".to_vec()))
                .unwrap();
            assert_eq!(node.registry().find("scores").is_some(), true);

            node.terminate();
            assert_eq!(node.is_running(), false);
        });
    }

    #[test]
    fn the_peer_set_is_applied_once_the_config_changes() {
        test_async(async {
            let node = Builder::new().build().await;

            // Feed a cluster config into the (initially empty) config instance...
            node.config()
                .load_from_string(
                    "
                cluster:
                    peers:
                        - \"http://127.0.0.1:2410\"
                        - \"http://127.0.0.1:2411\"
            ",
                    None,
                )
                .unwrap();

            // Give the listener task a chance to process the change notification...
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;

            // With two peers and no own address configured, some keys have to be routed to
            // a remote peer now...
            use crate::peers::PeerPicker;
            let routed = (0..100)
                .filter(|index| node.pool().pick_peer(&format!("key-{}", index)).is_some())
                .count();
            assert_eq!(routed > 0, true);

            node.terminate();
        });
    }
}
