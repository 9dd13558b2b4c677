//! Listening sockets
//!
//! A [`Listener`] binds synchronously, so its local address is known as soon
//! as `bind` returns, then hands accepted sockets to an event sink from a
//! background accept task.

use crate::endpoint::Endpoint;
use crate::error::Result;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Event reported by an accept task
#[derive(Debug)]
pub enum ListenerEvent {
    /// A peer connected
    Accepted(TcpStream, SocketAddr),
    /// Accepting failed; the accept task has exited
    Failed(std::io::Error),
}

/// Bound listening socket with its accept task
pub struct Listener {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Listener {
    /// Bind to `endpoint` and start accepting
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Io`](crate::error::LinkError::Io) - Failed to bind
    pub fn bind<F>(endpoint: &Endpoint, mut sink: F) -> Result<Self>
    where
        F: FnMut(ListenerEvent) -> bool + Send + 'static,
    {
        info!(addr = %endpoint, "Binding listener");
        let std_listener = std::net::TcpListener::bind((endpoint.bind_host(), endpoint.port()))?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;
        info!(local_addr = %local_addr, "Listener ready");

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(peer_addr = %peer, "Accepted connection");
                        if !sink(ListenerEvent::Accepted(stream, peer)) {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        sink(ListenerEvent::Failed(e));
                        return;
                    }
                }
            }
        });

        Ok(Self { local_addr, task })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}
