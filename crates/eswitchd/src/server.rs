//! Request server.
//!
//! Newline delimited JSON over TCP: one request per line, one reply line per
//! request, in order. Each peer gets its own task; a peer that sends a frame
//! longer than [`MAX_FRAME_LEN`] is disconnected.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::daemon::EswitchDaemon;

pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Accepts peers until `shutdown` is cancelled, then waits for every peer
/// task to finish.
pub async fn serve(listener: TcpListener, daemon: Arc<EswitchDaemon>, shutdown: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        info!("eswitchd listening on {}", addr);
    }

    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((sock, peer)) => {
                    let daemon = Arc::clone(&daemon);
                    let shutdown = shutdown.child_token();
                    tasks.spawn(handle_peer(sock, peer, daemon, shutdown));
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            },
        }

        // reap finished peers
        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                warn!("peer task join error: {e}");
            }
        }
    }

    info!(peers = tasks.len(), "Shutting down request server");
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("peer task join error: {e}");
        }
    }
}

async fn handle_peer(sock: TcpStream, peer: SocketAddr, daemon: Arc<EswitchDaemon>, shutdown: CancellationToken) {
    if let Err(e) = sock.set_nodelay(true) {
        debug!(%peer, "could not set TCP_NODELAY: {}", e);
    }
    debug!(%peer, "Peer connected");

    let mut framed = Framed::new(sock, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = framed.next() => match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    warn!(%peer, error = %e, "Dropping peer");
                    break;
                }
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = daemon.handle_line(&line);
        let encoded = match serde_json::to_string(&reply) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(%peer, error = %e, "Cannot encode reply");
                break;
            }
        };
        if let Err(e) = framed.send(encoded).await {
            warn!(%peer, error = %e, "Cannot send reply");
            break;
        }
    }
    debug!(%peer, "Peer disconnected");
}
