use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::activity::ActivityMonitor;
use crate::config::ServerConfig;
use crate::connection::{self, ConnectionSettings};
use crate::registry::SessionRegistry;

/// Requests a graceful stop of a running [`ChatServer`].
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Stop accepting, let connections drain, then release the listener.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct ChatServer {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    shutdown_tx: watch::Sender<bool>,
}

impl ChatServer {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            listener,
            config,
            registry: Arc::new(SessionRegistry::new()),
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Accept and serve connections until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        let local_addr = self.local_addr()?;
        info!(
            addr = %local_addr,
            max_frame_bytes = self.config.max_frame_bytes,
            inactivity_secs = self.config.inactivity_threshold.as_secs(),
            "chat server listening"
        );

        let monitor = ActivityMonitor::new(
            Arc::clone(&self.registry),
            self.config.inactivity_threshold,
            self.config.sweep_interval,
        )
        .spawn(self.shutdown_tx.subscribe());

        let settings = ConnectionSettings::from(&self.config);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut connections: Vec<JoinHandle<()>> = Vec::new();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("shutdown requested, stopping accept loop");
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    let (stream, origin) = match accepted {
                        Ok(v) => v,
                        Err(err) => {
                            warn!("accept failed: {err}");
                            continue;
                        }
                    };

                    connections.retain(|handle| !handle.is_finished());
                    connections.push(tokio::spawn(connection::handle_connection(
                        stream,
                        origin,
                        Arc::clone(&self.registry),
                        settings,
                        self.shutdown_tx.subscribe(),
                    )));
                }
            }
        }

        drop(self.listener);
        connections.retain(|handle| !handle.is_finished());
        info!(open = connections.len(), "draining connections");

        let drained = tokio::time::timeout(
            self.config.shutdown_grace,
            futures_util::future::join_all(connections.iter_mut()),
        )
        .await;
        if drained.is_err() {
            warn!("grace period elapsed, aborting remaining connections");
            for handle in &connections {
                handle.abort();
            }
        }

        let _ = monitor.await;
        info!(addr = %local_addr, "chat server stopped");
        Ok(())
    }
}

/// Bind `config.bind_address:config.port` and serve until Ctrl-C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let server = ChatServer::bind(config).await?;
    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down...");
            handle.shutdown();
        }
    });
    server.run().await
}
