//! Contains the system configuration.
//!
//! Provides access to the system configuration which is loaded from the **config/settings.yml**
//! file. Note that we observe this file for changes and reload it once a change is detected.
//! Therefore each user of the config should attach itself to the
//! [Config::notifier](Config::notifier) and re-process the config once a change message is
//! received. Being an in-memory cache we want to prevent restarts / downtimes as much as
//! possible - the [Server](crate::server::Server) re-binds its socket and the
//! [Builder](crate::builder::Builder) re-applies the peer set without interrupting operations.
//!
//! The settings relevant for a cache node are:
//!
//! ```yaml
//! server:
//!     # The host and port to bind the peer protocol server to...
//!     host: 0.0.0.0
//!     port: 2410
//! cluster:
//!     # The public base URL under which other peers reach this node...
//!     self: "http://192.168.1.1:2410"
//!     # The full set of peers forming the cluster (including this node)...
//!     peers:
//!         - "http://192.168.1.1:2410"
//!         - "http://192.168.1.2:2410"
//! ```
//!
//! Note that the **Config** struct is kind of constant and can be kept around once obtained.
//! However, when using **Config::current()** to obtain the current config handle, this should
//! not be stored, as it will not be updated once a new config has been loaded.
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use arc_swap::ArcSwap;
use yaml_rust::{Yaml, YamlLoader};

/// Provides access to the system configuration.
///
/// Most probably a config instance is installed by the [Builder](crate::builder::Builder) and
/// obtained from the [Node](crate::node::Node). It is highly recommended to register a change
/// listener by calling `Config::notifier()`, as we expect all components to pick up config
/// changes without restarting the application.
///
/// # Examples
/// ```
/// # use callisto::config::Config;
/// let config = Config::new("somefile.yml");
/// config.load_from_string("
/// server:
///     port: 12345
/// ", None).unwrap();
///
/// assert_eq!(config.current().config()["server"]["port"].as_i64().unwrap(), 12345);
/// ```
pub struct Config {
    filename: String,
    tx: tokio::sync::broadcast::Sender<()>,
    config: ArcSwap<(Yaml, Option<SystemTime>)>,
}

/// Represents the change listener.
///
/// Internally this is simply the receiver of a broadcast. The actual message being broadcast
/// can and should be ignored. All that matters is, once a message has been received, the config
/// was changed and needs to be re-processed.
pub type ChangeNotifier = tokio::sync::broadcast::Receiver<()>;

/// Represents a handle to the currently loaded configuration.
///
/// Note that this handle should not be stored or kept around for long, as it will not be
/// updated if the underlying config changed.
pub struct Handle {
    config: Arc<(Yaml, Option<SystemTime>)>,
}

impl Config {
    /// Creates a new config reading the given file.
    ///
    /// Note that this will not install a change listener. This is only done by the
    /// [Builder](crate::builder::Builder).
    pub fn new(file: &str) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        Config {
            filename: file.to_owned(),
            config: ArcSwap::new(Arc::new((Yaml::BadValue, None))),
            tx,
        }
    }

    /// Obtains a change notifier which receives a message once the config changed.
    pub fn notifier(&self) -> ChangeNotifier {
        self.tx.subscribe()
    }

    /// Obtains a handle to the currently loaded configuration.
    ///
    /// Note that this is a fairly efficient operation but still provides some overhead.
    /// Therefore this shouldn't be placed in an inner loop.
    pub fn current(&self) -> Handle {
        Handle {
            config: self.config.load_full(),
        }
    }

    /// Determines the last modified date of the config file on disk.
    ///
    /// As within docker, the file is presented as volume, we check that it is a file, as an
    /// unmounted docker volume is always presented as directory.
    #[cfg(not(test))]
    pub(crate) async fn last_modified(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .filter(|meta| meta.is_file())
            .and_then(|meta| meta.modified().ok())
    }

    /// Returns the timestamp for which the config was loaded the last time.
    #[cfg(not(test))]
    pub(crate) fn last_loaded(&self) -> Option<SystemTime> {
        self.config.load().1
    }

    /// Forces the config to read the underlying file.
    ///
    /// Note that this is normally called by the framework and should not be invoked manually.
    pub async fn load(&self) -> anyhow::Result<()> {
        log::info!("Loading config file {}...", &self.filename);

        if let Ok(metadata) = tokio::fs::metadata(&self.filename).await {
            if !metadata.is_file() {
                log::info!(
                    "Config file doesn't exist or is an unmounted docker volume - skipping config load."
                );
                return Ok(());
            }
        }

        let config_data = tokio::fs::read_to_string(&self.filename)
            .await
            .with_context(|| format!("Cannot load config file {}", &self.filename))?;

        let last_modified = tokio::fs::metadata(&self.filename)
            .await
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        self.load_from_string(config_data.as_str(), last_modified)
    }

    /// Loads a configuration from the given string instead of a file.
    ///
    /// This is intended to be used in test environments where we cannot / do not want to load
    /// a config file from disk.
    pub fn load_from_string(
        &self,
        data: &str,
        last_modified: Option<SystemTime>,
    ) -> anyhow::Result<()> {
        let docs = match YamlLoader::load_from_str(data) {
            Ok(docs) => docs,
            Err(error) => {
                return Err(anyhow::anyhow!(
                    "Cannot parse config file {}: {}",
                    &self.filename,
                    error
                ));
            }
        };

        let doc = match docs.into_iter().next() {
            Some(doc @ Yaml::Hash(_)) => doc,
            _ => Yaml::BadValue,
        };

        // Store the updated config...
        self.config.store(Arc::new((doc, last_modified)));

        // Notify all listeners - we ignore if there are none...
        let _ = self.tx.clone().send(());

        Ok(())
    }
}

impl Handle {
    /// Provides access to the currently loaded configuration.
    ///
    /// Missing sections or keys simply yield `Yaml::BadValue`, therefore chained index
    /// lookups like `handle.config()["server"]["port"]` are always safe.
    pub fn config(&self) -> &Yaml {
        &self.config.0
    }
}
