//! The DNS server front-end (C9): UDP and TCP listeners on the same bind
//! address, both dispatching into one shared [`Handler`]. Reload recycles
//! these listeners; it never restarts the activation actor.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::dns::DnsMessage;
use crate::error::{Error, Result};
use crate::forwarder::Transport;
use crate::handler::Handler;

/// Maximum UDP datagram the listener will read or send.
const UDP_MAX_PAYLOAD: usize = 65535;

pub struct Server {
    bind_addr: SocketAddr,
    handler: Arc<Handler>,
}

impl Server {
    pub fn new(bind_addr: SocketAddr, handler: Arc<Handler>) -> Self {
        Self { bind_addr, handler }
    }

    /// Runs both listeners until `shutdown_rx` fires. Used both for normal
    /// startup and for the listener recycle a reload performs.
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let udp_shutdown = shutdown_rx.resubscribe();
        let tcp_shutdown = shutdown_rx;

        let udp = run_udp(self.bind_addr, self.handler.clone(), udp_shutdown);
        let tcp = run_tcp(self.bind_addr, self.handler.clone(), tcp_shutdown);

        let (udp_result, tcp_result) = tokio::join!(udp, tcp);
        udp_result?;
        tcp_result?;
        Ok(())
    }
}

async fn run_udp(
    addr: SocketAddr,
    handler: Arc<Handler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let socket = Arc::new(
        UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::ListenBindError {
                addr: addr.to_string(),
                source: Arc::new(e),
            })?,
    );
    info!(%addr, "UDP DNS server listening");

    let mut buf = vec![0u8; UDP_MAX_PAYLOAD];
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("UDP server shutting down");
                return Ok(());
            }
            result = socket.recv_from(&mut buf) => {
                let (len, src) = result?;
                let data = buf[..len].to_vec();
                let handler = handler.clone();
                let socket = socket.clone();
                tokio::spawn(async move {
                    if let Some(wire) = handle_wire(&handler, &data, src.ip(), Transport::Udp).await {
                        if let Err(err) = socket.send_to(&wire, src).await {
                            warn!(%err, %src, "failed to send UDP reply");
                        }
                    }
                });
            }
        }
    }
}

async fn run_tcp(
    addr: SocketAddr,
    handler: Arc<Handler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ListenBindError {
            addr: addr.to_string(),
            source: Arc::new(e),
        })?;
    info!(%addr, "TCP DNS server listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("TCP server shutting down");
                return Ok(());
            }
            result = listener.accept() => {
                let (stream, src) = result?;
                let handler = handler.clone();
                let conn_shutdown = shutdown_rx.resubscribe();
                tokio::spawn(async move {
                    if let Err(err) = handle_tcp_connection(stream, src, handler, conn_shutdown).await {
                        debug!(%err, %src, "TCP connection closed");
                    }
                });
            }
        }
    }
}

async fn handle_tcp_connection(
    mut stream: TcpStream,
    src: SocketAddr,
    handler: Arc<Handler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            result = stream.read_exact(&mut len_buf) => {
                if result.is_err() {
                    return Ok(());
                }
            }
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;

        let Some(wire) = handle_wire(&handler, &body, src.ip(), Transport::Tcp).await else {
            continue;
        };
        let prefix = (wire.len() as u16).to_be_bytes();
        stream.write_all(&prefix).await?;
        stream.write_all(&wire).await?;
    }
}

/// Parses, dispatches, and serializes one query. Returns `None` only when
/// the datagram is too short to even carry a header, in which case no
/// reply can be addressed back to a request id.
async fn handle_wire(
    handler: &Handler,
    data: &[u8],
    client_ip: std::net::IpAddr,
    transport: Transport,
) -> Option<Vec<u8>> {
    let reply = match DnsMessage::parse(data) {
        Ok(request) => handler.handle(&request, client_ip, transport).await,
        Err(_) if data.len() >= 2 => {
            debug!(%client_ip, "malformed DNS message, replying SERVFAIL");
            malformed_servfail(data)
        }
        Err(_) => return None,
    };
    reply.to_bytes().ok()
}

fn malformed_servfail(data: &[u8]) -> DnsMessage {
    let id = u16::from_be_bytes([data[0], data[1]]);
    let mut msg = DnsMessage::default();
    msg.header.id = id;
    msg.header.qr = true;
    msg.header.ra = true;
    msg.set_rcode(crate::dns::RCode::ServFail);
    msg
}
