//! Installs a signal handler which terminates the node on CTRL+C or SIGHUP.
//!
//! Forks an async task which waits for either **CTRL+C** or **SIGHUP** and then invokes
//! [Node::terminate](crate::node::Node::terminate) on the given node.
use std::sync::Arc;

use tokio::signal::unix::SignalKind;

use crate::node::Node;

/// Installs a signal handler for the given node which awaits either a **CTRL+C** or **SIGHUP**.
///
/// Note that this is automatically called by the [Builder](crate::builder::Builder) unless it
/// is disabled.
pub fn install(node: Arc<Node>) {
    let _ = tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sig_hup = tokio::signal::unix::signal(SignalKind::hangup()).unwrap();

        tokio::select! {
            _ = ctrl_c => {
                log::info!("Received CTRL-C. Shutting down...");
                node.terminate();
            },
            _ = sig_hup.recv() => {
               log::info!("Received SIGHUP. Shutting down...");
                node.terminate();
            }
        }
    });
}
