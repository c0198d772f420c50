//! Callisto is a library for providing distributed, peer-aware, read-through caches over HTTP.
//!
//! # Introduction
//! **Callisto** turns a set of processes into a cache cluster: each node holds a bounded local
//! cache keyed by string. On a miss, a node either invokes a user supplied loader or forwards
//! the request to whichever peer of the cluster is authoritative for the key, then serves the
//! result. The heavy lifting is performed by four tightly coupled mechanisms:
//!
//! * a size constrained **LRU store** with deterministic eviction and byte accounting
//!   (see [lru](crate::lru)),
//! * a **consistent hash ring** which maps keys to owning peers with minimal reshuffling when
//!   the peer set changes (see [ring](crate::ring)),
//! * per-key **call coalescing**, so concurrently requested identical keys trigger exactly one
//!   load (see [coalesce](crate::coalesce)),
//! * a tiny **peer-to-peer retrieval protocol** over HTTP, so a cache miss on one node can be
//!   satisfied from another node's memory without duplicating the loader's work cluster-wide
//!   (see [http](crate::http)).
//!
//! The result behaves like one large cache spread across the cluster: every key lives on
//! exactly one node (its shard owner), and no matter how many clients ask for it at once,
//! its loader runs at most once.
//!
//! # Features
//! * **100% Async/Await** - the whole server builds upon [tokio](https://tokio.rs/) and
//!   async/await primitives as provided by Rust. Peer requests are served via
//!   [hyper](https://hyper.rs/), the de-facto standard HTTP stack of this ecosystem.
//! * **Reload-aware config facility** which permits to update the configuration during
//!   operation. Therefore, no restart is ever required, even when changing the IP binding,
//!   the port or the peer set. This is kind of important for an in-memory application which
//!   might have an expensive startup time.
//! * **Graceful degradation**. A node whose peers are unreachable falls back to its own
//!   loader - the cluster loses efficiency, never correctness.
//! * **Simple and well documented code base**. Callisto isn't a large framework at all. This
//!   permits every user to browse and understand its source code and what to expect from the
//!   system.
//!
//! # Using Callisto
//! A node is assembled via the [Builder](builder::Builder), which wires the config, the
//! namespace [Registry](registry::Registry) and the [HttpPool](http::HttpPool) into a
//! [Node](node::Node):
//!
//! ```no_run
//! use callisto::builder::Builder;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Enable all features and build the node...
//!     let node = Builder::new().enable_all().build().await;
//!
//!     // Register a namespace along with the loader producing its values...
//!     let scores = node
//!         .registry()
//!         .create("scores", 2 << 10, |key: &str| {
//!             // ...query the slow backing store here...
//!             Ok(format!("score of {}", key).into_bytes())
//!         })
//!         .unwrap();
//!
//!     // Share the namespace with the cluster...
//!     scores.register_peers(node.pool());
//!
//!     // Start the main event loop of the server...
//!     node.serve().await;
//! }
//! ```
#![deny(
    warnings,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod coalesce;
pub mod config;
pub mod http;
pub mod lru;
pub mod namespace;
pub mod node;
pub mod peers;
pub mod registry;
pub mod ring;
pub mod server;
pub mod signals;
pub mod view;

/// Contains the version of the Callisto library.
pub const CALLISTO_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Callisto build being used.
pub const CALLISTO_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up
/// the framework, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // We need to do this as otherwise the integration tests might crash as the logging system
    // is initialized several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned closure to make
/// clippy happy.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate callisto;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}
