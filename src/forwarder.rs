//! The upstream forwarder (C6): DoH-first resolution, falling through to a
//! staggered race across plain-DNS nameservers.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tracing::debug;

use crate::dns::{DnsMessage, RCode};
use crate::error::{Error, Result};

const DNS_MESSAGE_MIME: &str = "application/dns-message";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        }
    }
}

pub struct Forwarder {
    http: reqwest::Client,
    doh_url: Option<String>,
    nameservers: Vec<SocketAddr>,
    timeout: Duration,
    interval: Duration,
}

impl Forwarder {
    pub fn new(
        nameservers: Vec<SocketAddr>,
        timeout: Duration,
        interval: Duration,
        doh_url: Option<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            doh_url,
            nameservers,
            timeout,
            interval,
        }
    }

    /// Resolves `query` via DoH if configured, falling through to the
    /// staggered nameserver race on any DoH failure.
    pub async fn resolve(&self, transport: Transport, query: &DnsMessage) -> Result<DnsMessage> {
        if let Some(url) = self.doh_url.clone() {
            match self.resolve_doh(&url, query).await {
                Ok(msg) => return Ok(msg),
                Err(err) => debug!(%err, "DoH path failed, falling back to nameservers"),
            }
        }
        self.race(transport, query).await
    }

    async fn resolve_doh(&self, url: &str, query: &DnsMessage) -> Result<DnsMessage> {
        let wire = query
            .to_bytes()
            .map_err(|e| Error::DohFailed(e.to_string()))?;

        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, DNS_MESSAGE_MIME)
            .header(ACCEPT, DNS_MESSAGE_MIME)
            .body(wire)
            .send()
            .await
            .map_err(|e| Error::DohFailed(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::DohFailed(format!(
                "unexpected status {}",
                response.status()
            )));
        }
        let content_type_ok = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(DNS_MESSAGE_MIME));
        if !content_type_ok {
            return Err(Error::DohFailed("unexpected content-type".to_string()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::DohFailed(e.to_string()))?;
        DnsMessage::parse(&body).map_err(|e| Error::DohFailed(e.to_string()))
    }

    /// Launches one worker per nameserver with an `i * interval` stagger.
    /// The first non-SERVFAIL response wins; SERVFAIL responses are
    /// discarded and contribute nothing; losing workers are left to finish
    /// on their own and their output is dropped.
    async fn race(&self, transport: Transport, query: &DnsMessage) -> Result<DnsMessage> {
        let qname = query
            .first_question()
            .map(|q| q.name())
            .unwrap_or_default();

        if self.nameservers.is_empty() {
            return Err(Error::ResolveFailed {
                qname,
                transport: transport.as_str(),
                nameservers: vec![],
            });
        }

        let wire = query
            .to_bytes()
            .map_err(|e| Error::MalformedMessage(e.to_string()))?;

        let (tx, mut rx) = mpsc::channel(self.nameservers.len());

        for (i, ns) in self.nameservers.iter().copied().enumerate() {
            let delay = self.interval * i as u32;
            let timeout = self.timeout;
            let wire = wire.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let result = match transport {
                    Transport::Udp => exchange_udp(ns, &wire, timeout).await,
                    Transport::Tcp => exchange_tcp(ns, &wire, timeout).await,
                };
                // The receiver may already be gone if an earlier worker won;
                // that's a benign, dropped result.
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        while let Some(result) = rx.recv().await {
            match result {
                Ok(msg) if msg.header.rcode == u8::from(RCode::ServFail) => continue,
                Ok(msg) => return Ok(msg),
                Err(_) => continue,
            }
        }

        Err(Error::ResolveFailed {
            qname,
            transport: transport.as_str(),
            nameservers: self.nameservers.iter().map(|n| n.to_string()).collect(),
        })
    }
}

async fn exchange_udp(ns: SocketAddr, wire: &[u8], timeout: Duration) -> Result<DnsMessage> {
    let local: SocketAddr = if ns.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(ns).await?;

    tokio::time::timeout(timeout, socket.send(wire))
        .await
        .map_err(|_| Error::ResolveFailed {
            qname: String::new(),
            transport: "udp",
            nameservers: vec![ns.to_string()],
        })??;

    let mut buf = vec![0u8; 65535];
    let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| Error::ResolveFailed {
            qname: String::new(),
            transport: "udp",
            nameservers: vec![ns.to_string()],
        })??;

    DnsMessage::parse(&buf[..len]).map_err(|e| Error::MalformedMessage(e.to_string()))
}

async fn exchange_tcp(ns: SocketAddr, wire: &[u8], timeout: Duration) -> Result<DnsMessage> {
    let connect = tokio::time::timeout(timeout, TcpStream::connect(ns)).await;
    let mut stream = connect.map_err(|_| Error::ResolveFailed {
        qname: String::new(),
        transport: "tcp",
        nameservers: vec![ns.to_string()],
    })??;

    let len_prefix = (wire.len() as u16).to_be_bytes();
    let write = async {
        stream.write_all(&len_prefix).await?;
        stream.write_all(wire).await?;
        std::io::Result::Ok(())
    };
    tokio::time::timeout(timeout, write)
        .await
        .map_err(|_| Error::ResolveFailed {
            qname: String::new(),
            transport: "tcp",
            nameservers: vec![ns.to_string()],
        })??;

    let mut len_buf = [0u8; 2];
    let read_len = async {
        stream.read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        std::io::Result::Ok(body)
    };
    let body = tokio::time::timeout(timeout, read_len)
        .await
        .map_err(|_| Error::ResolveFailed {
            qname: String::new(),
            transport: "tcp",
            nameservers: vec![ns.to_string()],
        })??;

    DnsMessage::parse(&body).map_err(|e| Error::MalformedMessage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsHeader, DnsQuestion, RecordClass, RecordType};

    fn query() -> DnsMessage {
        DnsMessage {
            header: DnsHeader {
                id: 42,
                rd: true,
                qdcount: 1,
                ..Default::default()
            },
            questions: vec![DnsQuestion {
                labels: vec!["example".into(), "com".into()],
                qtype: RecordType::A,
                qclass: RecordClass::IN,
            }],
            answers: vec![],
            authorities: vec![],
            additionals: vec![],
        }
    }

    #[tokio::test]
    async fn empty_nameserver_list_resolves_to_failure() {
        let forwarder = Forwarder::new(vec![], Duration::from_millis(50), Duration::from_millis(10), None);
        let result = forwarder.resolve(Transport::Udp, &query()).await;
        assert!(matches!(result, Err(Error::ResolveFailed { .. })));
    }
}
