//! Contains the server which exposes the peer protocol of a cache node.
//!
//! Opens a server socket on the specified port (**server.port** in the config or 2410 as
//! fallback) and binds it to the selected IP (**server.host** in the config or 0.0.0.0 as
//! fallback). Each incoming connection is served via HTTP, dispatching all requests to the
//! [HttpPool](crate::http::HttpPool) of the node (see [crate::http] for the wire protocol).
//!
//! Note that in order to achieve zero downtime / ultra high availability demands, the server
//! will periodically try to bind the socket to the selected port, therefore a "new" instance
//! can be started and the "old" one can bleed out and the port will be "handed through" with
//! minimal downtime. Also, this will listen to change events of the config and will relocate
//! to another port or host if changed.
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hyper::server::conn::Http;
use hyper::service::service_fn;
use tokio::net::{TcpListener, TcpStream};

use crate::node::Node;
use crate::spawn;

/// Specifies the timeout when waiting for a new incoming connection.
///
/// When waiting for a new connection we need to interrupt this every once in a while so that
/// we can check if the node has been shut down.
const CONNECT_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Represents the server which manages the socket serving the peer protocol.
///
/// A server is commonly not used directly but via [Node::serve](crate::node::Node::serve).
pub struct Server {
    node: Arc<Node>,
    running: AtomicBool,
    current_address: Mutex<Option<String>>,
}

impl Server {
    /// Creates a new server for the given node.
    ///
    /// Note that this will not technically start the server. This has to be done manually
    /// via [event_loop](Server::event_loop) as it is most probably done in the main thread.
    pub fn new(node: Arc<Node>) -> Arc<Self> {
        Arc::new(Server {
            node,
            running: AtomicBool::new(false),
            current_address: Mutex::new(None),
        })
    }

    /// Determines if the server socket should keep listening for incoming connections.
    ///
    /// In contrast to **Node::is_running** this is not used to control the shutdown of the
    /// server. Rather we toggle this flag to false if a config and therefore address change
    /// was detected. This way **server_loop** will exit and a new server socket for the
    /// appropriate address will be set up by the **event_loop**.
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Determines the server address based on the current configuration.
    ///
    /// If no, an invalid or a partial config is present, fallback values are used. By default
    /// we use port 2410 and bind to "0.0.0.0".
    fn address(&self) -> String {
        let handle = self.node.config().current();
        format!(
            "{}:{}",
            handle.config()["server"]["host"].as_str().unwrap_or("0.0.0.0"),
            handle.config()["server"]["port"]
                .as_i64()
                .filter(|port| port > &0 && port <= &(u16::MAX as i64))
                .unwrap_or(2410)
        )
    }

    /// Starts the event loop in a separate thread.
    ///
    /// This is most probably used by test scenarios where the tests itself run in the main
    /// thread.
    pub fn fork(server: &Arc<Server>) {
        let cloned_server = server.clone();
        spawn!(async move {
            cloned_server.event_loop().await;
        });
    }

    /// Starts the event loop in a separate thread and waits until the server is up and running.
    ///
    /// Just like **fork** this is intended to be used in test environments.
    pub async fn fork_and_await(server: &Arc<Server>) {
        Server::fork(server);

        while !server.is_running() {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Tries to open a server socket on the specified address to serve incoming connections.
    ///
    /// The task of this loop is to bind the server socket to the specified address. Once this
    /// was successful, we enter the [server_loop](Server::server_loop) to actually handle
    /// incoming connections. Once this loop returns, either the node is no longer running and
    /// we should exit, or the config has changed and we should try to bind the server to the
    /// new address.
    pub async fn event_loop(&self) {
        let mut address = String::new();
        let mut last_bind_error_reported = Instant::now();

        while self.node.is_running() {
            // If the server is started for the first time or if it has been restarted due to
            // a config change, we need to reload the address...
            if !self.is_running() {
                address = self.address();
                self.running.store(true, Ordering::Release);
            }

            // Bind and hopefully enter the server_loop...
            if let Ok(listener) = TcpListener::bind(&address).await {
                log::info!("Opened server socket on {}...", &address);
                *self.current_address.lock().unwrap() = Some(address.clone());
                self.server_loop(&listener).await;
                log::info!("Closing server socket on {}.", &address);
            } else {
                // If we were unable to bind to the server, we log this every once in a while
                // (every 5s). Otherwise we would jam the log as we retry every 500ms.
                if Instant::now()
                    .duration_since(last_bind_error_reported)
                    .as_secs()
                    > 5
                {
                    log::error!(
                        "Cannot open server address: {}. Retrying every 500ms...",
                        &address
                    );
                    last_bind_error_reported = Instant::now();
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    /// Runs the main server loop which processes incoming connections.
    ///
    /// This also listens on config changes and exits to the event_loop if necessary (server
    /// address changed...).
    async fn server_loop(&self, listener: &TcpListener) {
        let mut config_changed_flag = self.node.config().notifier();

        while self.node.is_running() && self.is_running() {
            tokio::select! {
                // We use a timeout here so that the while condition (esp. node.is_running())
                // is checked every once in a while...
                timeout_stream = tokio::time::timeout(CONNECT_WAIT_TIMEOUT, listener.accept()) => {
                    // We're only interested in a positive result here, as an Err simply
                    // indicates that the timeout was hit - in this case we do nothing as the
                    // while condition is all that needs to be checked...
                    if let Ok(stream) = timeout_stream {
                        // If a stream is present, we treat this as new connection and
                        // eventually serve HTTP requests on it...
                        if let Ok((stream, _)) = stream {
                            self.handle_new_connection(stream);
                        } else {
                            // Otherwise the socket has been closed therefore we exit to the
                            // event_loop which will either completely exit or try to
                            // re-create the socket.
                            return;
                        }
                    }
                }
                _ = config_changed_flag.recv() => {
                    // If the config was changed, we need to check if the address itself
                    // changed...
                    let new_address = self.address();
                    if let Some(current_address) = &*self.current_address.lock().unwrap() {
                       if current_address != &new_address {
                           log::info!("The server address has changed. Restarting the server socket...");

                           // Force the event_loop to re-evaluate the expected server address...
                           self.running.store(false, Ordering::Release);

                           // Return to event_loop so that the server socket is re-created...
                           return;
                       }
                    }
               }
            }
        }
    }

    /// Handles a new incoming connection.
    ///
    /// This forks a "thread" which serves HTTP requests on the connection, dispatching each
    /// request to the pool of the node.
    fn handle_new_connection(&self, stream: TcpStream) {
        let pool = self.node.pool();

        spawn!(async move {
            // Mark the connection as nodelay, as responses are written in one go anyway.
            let _ = stream.set_nodelay(true);

            let peer_address = stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "<unknown>".to_owned());
            log::debug!("Opened connection from {}...", peer_address);

            let service = service_fn(move |request| {
                let pool = pool.clone();
                async move { Ok::<_, Infallible>(pool.handle(request).await) }
            });

            if let Err(error) = Http::new().serve_connection(stream, service).await {
                log::debug!(
                    "An IO error occurred in connection {}: {}",
                    peer_address,
                    error
                );
            }

            log::debug!("Closing connection to {}...", peer_address);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::builder::Builder;
    use crate::http::HttpGetter;
    use crate::peers::PeerGetter;
    use crate::server::Server;
    use crate::testing::test_async;

    #[test]
    fn integration_test() {
        // We want exclusive access to the 1503 port on which we fire up a test server for
        // our integration tests...
        let _guard = crate::testing::SHARED_TEST_RESOURCES.lock().unwrap();

        test_async(async {
            // Setup and create a node...
            let node = Builder::new()
                .enable_all()
                .disable_config()
                .disable_signals()
                .build()
                .await;

            // Specify a minimal config so that we run on a different port than a production
            // instance.
            node.config()
                .load_from_string(
                    "
                server:
                    port: 1503
            ",
                    None,
                )
                .unwrap();

            // Register a namespace which counts the invocations of its loader...
            let loads = Arc::new(AtomicUsize::new(0));
            let counted = loads.clone();
            let _ = node
                .registry()
                .create("scores", 2 << 10, move |key: &str| {
                    let _ = counted.fetch_add(1, Ordering::SeqCst);
                    match key {
                        "Tom" => Ok(b"630".to_vec()),
                        _ => Err(anyhow::anyhow!("{} does not exist", key)),
                    }
                })
                .unwrap();

            // Normally we'd directly run the event loop here via node.serve(). However, as
            // the test itself runs in the main thread, we fork the server instead...
            let server = Server::new(node.clone());
            Server::fork_and_await(&server).await;

            // Fetch a key using the crate's own peer client...
            let getter = HttpGetter::new("http://127.0.0.1:1503/_callisto/");
            let value = getter.get("scores", "Tom").await.unwrap();
            assert_eq!(&value[..], b"630");
            assert_eq!(loads.load(Ordering::SeqCst), 1);

            // The second fetch is served from the cache of the node - the loader must not
            // run again...
            let value = getter.get("scores", "Tom").await.unwrap();
            assert_eq!(&value[..], b"630");
            assert_eq!(loads.load(Ordering::SeqCst), 1);

            // An unknown namespace is reported as 404...
            let result = getter.get("users", "Tom").await;
            assert_eq!(
                result.unwrap_err().to_string(),
                "The peer returned: 404 Not Found"
            );

            // A failing loader is reported as 500...
            let result = getter.get("scores", "Jerry").await;
            assert_eq!(
                result.unwrap_err().to_string(),
                "The peer returned: 500 Internal Server Error"
            );

            node.terminate();
        });
    }
}
