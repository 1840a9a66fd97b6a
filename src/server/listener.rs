//! Stream listener
//!
//! Accept loop servicing one feed connection at a time. A second peer waits
//! in the accept backlog until the current connection closes.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;
use crate::server::config::ListenerConfig;
use crate::server::connection::{Connection, RecordSink};
use crate::stats::ListenerStats;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// TCP listener that turns each connection into records for a sink
pub struct StreamListener<S: RecordSink> {
    listener: TcpListener,
    config: ListenerConfig,
    sink: S,
    stats: Arc<ListenerStats>,
    next_connection_id: AtomicU64,
}

impl<S: RecordSink> StreamListener<S> {
    /// Bind to the configured address
    pub async fn bind(config: ListenerConfig, sink: S) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(Self::from_listener(listener, config, sink))
    }

    /// Wrap an already bound listener
    pub fn from_listener(listener: TcpListener, config: ListenerConfig, sink: S) -> Self {
        Self {
            listener,
            config,
            sink,
            stats: Arc::new(ListenerStats::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Share an existing set of counters
    pub fn with_stats(mut self, stats: Arc<ListenerStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Listener counters
    pub fn stats(&self) -> &Arc<ListenerStats> {
        &self.stats
    }

    /// Run the accept loop forever
    pub async fn run(&self) -> Result<()> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "Stream listener accepting");
        self.accept_loop().await
    }

    /// Run the accept loop until `shutdown` completes
    ///
    /// A connection being drained when the signal arrives is dropped.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "Stream listener accepting");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Stream listener shutting down");
                Ok(())
            }
            result = self.accept_loop() => result,
        }
    }

    async fn accept_loop(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.stats.record_connection();

        tracing::info!(
            connection_id = connection_id,
            peer = %peer_addr,
            "Connection accepted"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let mut connection =
            Connection::new(connection_id, socket, &self.config, Arc::clone(&self.stats));

        if let Err(e) = connection.run(&self.sink).await {
            tracing::warn!(
                connection_id = connection_id,
                error = %e,
                "Connection error"
            );
        }

        tracing::info!(connection_id = connection_id, "Connection closed");
    }
}
