//! Provides the registry which keeps track of all namespaces of a cache node.
//!
//! The registry is a simple map from namespace name to [Namespace](crate::namespace::Namespace),
//! guarded by a read/write lock (lookups vastly outnumber registrations, which commonly all
//! happen during startup). It is created once per process by the [Builder](crate::builder::Builder)
//! and explicitly handed to every component which needs to resolve namespaces by name - most
//! notably the [HttpPool](crate::http::HttpPool), which resolves the namespace segment of
//! incoming peer requests against it.
//!
//! Namespaces are never removed: a registration lives until the process terminates.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::namespace::Namespace;
use crate::peers::Loader;

/// Maps namespace names to their [Namespace](crate::namespace::Namespace) instances.
///
/// # Examples
/// ```
/// # use callisto::registry::Registry;
/// # #[tokio::main]
/// # async fn main() {
/// let registry = Registry::new();
///
/// let _ = registry
///     .create("scores", 2 << 10, |_key: &str| Ok(b"630".to_vec()))
///     .unwrap();
///
/// assert_eq!(registry.find("scores").is_some(), true);
/// assert_eq!(registry.find("unknown").is_none(), true);
///
/// // A name can only be claimed once...
/// assert_eq!(
///     registry
///         .create("scores", 2 << 10, |_key: &str| Ok(Vec::new()))
///         .is_err(),
///     true
/// );
/// # }
/// ```
pub struct Registry {
    namespaces: RwLock<HashMap<String, Arc<Namespace>>>,
}

impl Registry {
    /// Creates a new and empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Registry {
            namespaces: RwLock::new(HashMap::new()),
        })
    }

    /// Creates a namespace with the given name, memory budget and loader and registers it.
    ///
    /// # Errors
    /// Fails if a namespace with the given name has already been registered. Replacing a
    /// namespace silently would leave components which already resolved the name pointing at
    /// a stale instance, therefore a duplicate name is treated as a setup error.
    pub fn create(
        &self,
        name: &str,
        max_bytes: usize,
        loader: impl Loader + 'static,
    ) -> anyhow::Result<Arc<Namespace>> {
        let mut namespaces = self.namespaces.write().unwrap();

        if namespaces.contains_key(name) {
            return Err(anyhow::anyhow!(
                "A namespace named {} has already been registered",
                name
            ));
        }

        let namespace = Namespace::new(name, max_bytes, loader);
        let _ = namespaces.insert(name.to_owned(), namespace.clone());

        log::info!("Created namespace {}...", name);

        Ok(namespace)
    }

    /// Resolves the namespace previously created under the given name.
    pub fn find(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.read().unwrap().get(name).cloned()
    }

    /// Lists the names of all registered namespaces.
    pub fn names(&self) -> Vec<String> {
        self.namespaces.read().unwrap().keys().cloned().collect()
    }
}
