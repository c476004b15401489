//! WebSocket front end
//!
//! Every accepted connection becomes one hub subscriber. Its task forwards
//! the subscriber's outbox to the socket and hands incoming text messages to
//! the hub, until either side closes or the hub drops a stalled subscriber.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thrustlink_core::hub::Hub;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};

/// A send that makes no progress for this long closes the connection
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound WebSocket listener
pub struct WebSocketServer {
    listener: TcpListener,
    hub: Arc<Hub>,
}

impl WebSocketServer {
    /// Bind `addr`; failure here is the only fatal startup error
    pub async fn bind(addr: SocketAddr, hub: Arc<Hub>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, hub })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` flips to `true`
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(address = %addr, "websocket server listening");
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let hub = Arc::clone(&self.hub);
                        tokio::spawn(handle_connection(hub, stream, peer));
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("websocket server stopped");
    }

    /// Serve on a background task; the returned handle stops it
    pub fn spawn(self) -> std::io::Result<ServerHandle> {
        let address = self.local_addr()?;
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(self.serve(rx));
        Ok(ServerHandle {
            address,
            shutdown: tx,
            task,
        })
    }
}

/// Handle to a spawned server
pub struct ServerHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound listening address
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Stop accepting and wait for the accept loop to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "websocket server task failed");
        }
    }
}

async fn handle_connection(hub: Arc<Hub>, stream: TcpStream, peer: SocketAddr) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!(peer = %peer, error = %e, "websocket handshake failed");
            return;
        }
    };
    client_loop(hub, socket, peer).await;
}

async fn client_loop(hub: Arc<Hub>, socket: WebSocketStream<TcpStream>, peer: SocketAddr) {
    let (id, mut outbox) = hub.subscribe();
    info!(peer = %peer, subscriber = %id, "websocket client connected");
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            payload = outbox.recv() => {
                let Some(payload) = payload else { break };
                let sent = timeout(SEND_TIMEOUT, write.send(Message::Text(payload.to_string()))).await;
                if !matches!(sent, Ok(Ok(()))) {
                    debug!(subscriber = %id, "send failed or timed out");
                    break;
                }
            }
            message = read.next() => {
                let Some(Ok(message)) = message else { break };
                match message {
                    Message::Text(text) => {
                        hub.handle_inbound(id, &text).await;
                    }
                    Message::Close(_) => break,
                    // tungstenite queues the pong for a ping itself
                    Message::Ping(_)
                    | Message::Pong(_)
                    | Message::Binary(_)
                    | Message::Frame(_) => {}
                }
            }
        }
    }

    hub.unsubscribe(id);
    info!(peer = %peer, subscriber = %id, "websocket client disconnected");
}
