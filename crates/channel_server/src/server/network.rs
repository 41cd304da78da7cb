//! Client socket handling.
//!
//! The accept loop leases a generic worker for every new connection. Each
//! connection then gets one task that reads frames into messages for that
//! worker and writes whatever the server queues for the client.

use crate::connection::{CloseReason, ConnectionManager, Outbound};
use crate::error::ServerError;
use crate::messaging::FrameDecoder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, info, trace, warn};
use world_core::{least_loaded, ConnectionId, SharedTimeSource, ShutdownState, WorkerHandle};

const READ_BUFFER_SIZE: usize = 4096;
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay after failed accepts, doubling up to a cap and cleared by the next
/// successful accept. Keeps descriptor exhaustion from spinning the loop.
#[derive(Debug, Default)]
pub struct AcceptBackoff {
    current: Option<Duration>,
}

impl AcceptBackoff {
    /// Records a failure and returns how long to wait before retrying.
    pub fn failed(&mut self) -> Duration {
        let next = match self.current {
            Some(current) => (current * 2).min(ACCEPT_BACKOFF_MAX),
            None => ACCEPT_BACKOFF_MIN,
        };
        self.current = Some(next);
        next
    }

    pub fn succeeded(&mut self) {
        self.current = None;
    }
}

/// Accepts clients until shutdown is initiated or the task is aborted.
pub async fn accept_loop(
    listener: TcpListener,
    connections: Arc<ConnectionManager>,
    workers: Vec<WorkerHandle>,
    time: SharedTimeSource,
    shutdown_state: ShutdownState,
) {
    let mut backoff = AcceptBackoff::default();
    loop {
        if shutdown_state.is_shutdown_initiated() {
            info!("🛑 Accept loop stopping - shutdown initiated");
            break;
        }

        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => {
                backoff.succeeded();
                accepted
            }
            Err(e) => {
                let delay = backoff.failed();
                warn!("Failed to accept connection: {} (retrying in {:?})", e, delay);
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        let Some(worker) = least_loaded(&workers) else {
            error!("❌ No generic worker available for {}", addr);
            break;
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY not set for {}: {}", addr, e);
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let connection =
            connections.add_connection(addr, worker.lease(), outbound, time.server_time());

        let connections = connections.clone();
        let time = time.clone();
        tokio::spawn(async move {
            if let Err(e) =
                handle_connection(stream, addr, connection, connections.clone(), time, outbound_rx).await
            {
                debug!("Connection {} ended with error: {}", connection, e);
            }
            connections.close_connection(connection, CloseReason::ClientClosed);
        });
    }
}

/// Pumps one client socket until either side closes it.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection: ConnectionId,
    connections: Arc<ConnectionManager>,
    time: SharedTimeSource,
    mut outbound: UnboundedReceiver<Outbound>,
) -> Result<(), ServerError> {
    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            read = reader.read(&mut buffer) => {
                let read = read.map_err(|e| ServerError::Network(format!("read from {addr} failed: {e}")))?;
                if read == 0 {
                    trace!("Client {} closed the socket", addr);
                    return Ok(());
                }
                decoder.push(&buffer[..read]);
                while let Some((command_code, payload)) = decoder
                    .next_frame()
                    .map_err(|e| ServerError::Network(format!("bad frame from {addr}: {e}")))?
                {
                    if !connections.submit_packet(connection, command_code, payload, time.server_time()) {
                        return Ok(());
                    }
                }
            }
            next = outbound.recv() => match next {
                Some(Outbound::Packet(frame)) => {
                    writer
                        .write_all(&frame)
                        .await
                        .map_err(|e| ServerError::Network(format!("write to {addr} failed: {e}")))?;
                }
                Some(Outbound::Close) | None => {
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_backoff_doubles_to_cap_and_resets() {
        let mut backoff = AcceptBackoff::default();
        assert_eq!(backoff.failed(), Duration::from_millis(10));
        assert_eq!(backoff.failed(), Duration::from_millis(20));
        assert_eq!(backoff.failed(), Duration::from_millis(40));
        for _ in 0..10 {
            backoff.failed();
        }
        assert_eq!(backoff.failed(), Duration::from_secs(1));

        backoff.succeeded();
        assert_eq!(backoff.failed(), Duration::from_millis(10));
    }
}
