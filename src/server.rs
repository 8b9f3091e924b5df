// Listener for inbound engine connections
//
// DBGp inverts the usual roles: the IDE listens and the debugging engine
// connects out. Each accepted socket becomes one Connection.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

use crate::connection::Connection;
use crate::error::DbgpResult;
use crate::events::ConnectionEvent;

/// The port engines connect to by convention.
pub const DEFAULT_PORT: u16 = 9000;

/// Accepts engine connections and hands out ready connections.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
}

impl Server {
    /// Bind to an address, e.g. `"0.0.0.0:9000"`.
    pub async fn bind(addr: &str) -> DbgpResult<Server> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening for engines on {}", listener.local_addr()?);
        Ok(Server { listener })
    }

    pub fn local_addr(&self) -> DbgpResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the next engine to connect and run its handshake. Returns
    /// the connection and its event channel.
    pub async fn accept(&self) -> DbgpResult<(Connection, mpsc::Receiver<ConnectionEvent>)> {
        let (stream, peer) = self.listener.accept().await?;
        info!("inbound engine connection from {}", peer);
        Connection::accept(stream).await
    }
}
