//! Connection listener: accepts sockets and spawns one handler task each.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use truss_core::{ChannelOptions, Scheduler, TrussError};

use crate::handler::{ConnectionHandler, HandlerOptions, HandlerSummary};
use crate::role::ConnectionRole;

/// Everything a spawned handler needs besides its socket.
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub psk: String,
    pub role: ConnectionRole,
    pub channel: ChannelOptions,
    pub handler: HandlerOptions,
}

pub struct Listener {
    listener: TcpListener,
    scheduler: Arc<Scheduler>,
    settings: Arc<ListenerSettings>,
    next_seq: u64,
}

impl Listener {
    pub async fn bind(
        address: &str,
        scheduler: Arc<Scheduler>,
        settings: ListenerSettings,
    ) -> Result<Self, TrussError> {
        let listener = TcpListener::bind(address).await?;
        info!(
            address = %listener.local_addr()?,
            role = %settings.role,
            "listening"
        );
        Ok(Self {
            listener,
            scheduler,
            settings: Arc::new(settings),
            next_seq: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TrussError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection and spawn its handler.
    pub async fn accept_one(&mut self) -> Result<JoinHandle<HandlerSummary>, TrussError> {
        let (stream, peer) = self.listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            error!(%peer, "set_nodelay failed: {e}");
        }
        self.next_seq += 1;
        info!(seq = self.next_seq, %peer, "connection accepted");

        let handler = ConnectionHandler::new(
            self.next_seq,
            peer.to_string(),
            stream,
            &self.settings.psk,
            self.settings.channel.clone(),
            Arc::clone(&self.scheduler),
            self.settings.role,
            self.settings.handler.clone(),
        );
        Ok(tokio::spawn(handler.run()))
    }

    /// Accept forever. Accept errors are logged and accepting continues.
    pub async fn run(mut self) {
        loop {
            if let Err(e) = self.accept_one().await {
                error!("accept error: {e}");
            }
        }
    }
}
