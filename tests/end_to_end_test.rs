//! Integration tests driving the full C9 → C7 path over real UDP sockets:
//! the server binds an ephemeral port, a client sends wire-format DNS
//! queries, and we assert on the wire-format reply.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use nullrouted::activation::ActivationHandle;
use nullrouted::blocklist::BlockCache;
use nullrouted::cache::{NegativeCache, PositiveCache};
use nullrouted::dns::{DnsHeader, DnsMessage, DnsQuestion, RCode, RecordClass, RecordType};
use nullrouted::forwarder::Forwarder;
use nullrouted::handler::{Handler, HandlerConfig};
use nullrouted::questionlog::QuestionLog;
use nullrouted::server::Server;
use tokio::net::UdpSocket;

fn a_query(id: u16, name: &str) -> DnsMessage {
    DnsMessage {
        header: DnsHeader {
            id,
            rd: true,
            qdcount: 1,
            ..Default::default()
        },
        questions: vec![DnsQuestion {
            labels: name.split('.').map(str::to_string).collect(),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        }],
        answers: vec![],
        authorities: vec![],
        additionals: vec![],
    }
}

async fn spawn_server(handler: Arc<Handler>) -> std::net::SocketAddr {
    // `Server::run` binds lazily on an address we choose up front: claim a
    // free port with a throwaway socket, release it, then hand that address
    // to the real server. Small race, acceptable for a test.
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let server = Server::new(addr, handler);
    let (_tx, rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        let _ = server.run(rx).await;
    });
    // Give the listener a moment to bind before the test sends traffic.
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

#[tokio::test]
async fn blocked_a_query_returns_sinkhole_over_udp() {
    let blockcache = Arc::new(BlockCache::new());
    blockcache.set("ads.example.com");

    let handler = Arc::new(Handler::new(
        HandlerConfig {
            nullroute: Ipv4Addr::new(0, 0, 0, 0),
            nullroutev6: "::".parse().unwrap(),
            nxdomain: false,
            ttl: 10,
            togglename: String::new(),
            reactivation_delay_secs: 300,
            negative_ttl_secs: 600,
        },
        PositiveCache::new(0),
        NegativeCache::new(0),
        blockcache,
        ActivationHandle::spawn(),
        QuestionLog::new(100),
        Forwarder::new(
            vec![],
            Duration::from_millis(50),
            Duration::from_millis(10),
            None,
        ),
    ));

    let addr = spawn_server(handler).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let query = a_query(99, "ads.example.com");
    client.send_to(&query.to_bytes().unwrap(), addr).await.unwrap();

    let mut buf = vec![0u8; 512];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("reply timed out")
        .unwrap();

    let reply = DnsMessage::parse(&buf[..len]).unwrap();
    assert_eq!(reply.header.id, 99);
    assert_eq!(reply.answers.len(), 1);
    assert_eq!(reply.answers[0].ttl, 10);
}

#[tokio::test]
async fn malformed_datagram_gets_servfail() {
    let handler = Arc::new(Handler::new(
        HandlerConfig {
            nullroute: Ipv4Addr::new(0, 0, 0, 0),
            nullroutev6: "::".parse().unwrap(),
            nxdomain: false,
            ttl: 10,
            togglename: String::new(),
            reactivation_delay_secs: 300,
            negative_ttl_secs: 600,
        },
        PositiveCache::new(0),
        NegativeCache::new(0),
        Arc::new(BlockCache::new()),
        ActivationHandle::spawn(),
        QuestionLog::new(100),
        Forwarder::new(
            vec![],
            Duration::from_millis(50),
            Duration::from_millis(10),
            None,
        ),
    ));

    let addr = spawn_server(handler).await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    // Two bytes is enough to carry an id, but nothing else, which is
    // malformed as a DNS message.
    client.send_to(&[0x00, 0x2a], addr).await.unwrap();

    let mut buf = vec![0u8; 512];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("reply timed out")
        .unwrap();

    let reply = DnsMessage::parse(&buf[..len]).unwrap();
    assert_eq!(reply.header.id, 0x002a);
    assert_eq!(reply.header.rcode, u8::from(RCode::ServFail));
}
