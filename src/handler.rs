//! The query handler (C7): orchestrates the key fingerprint, both caches,
//! the blocklist, and the upstream forwarder per incoming request, and
//! enforces the activation state.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::activation::{ActivationHandle, ToggleMode};
use crate::blocklist::BlockCache;
use crate::cache::{GetOutcome, Key, NegativeCache, PositiveCache};
use crate::dns::{DnsMessage, DnsResourceRecord, RCode, RecordClass, RecordType};
use crate::forwarder::{Forwarder, Transport};
use crate::questionlog::{QuestionLog, QuestionLogEntry};

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub nullroute: Ipv4Addr,
    pub nullroutev6: Ipv6Addr,
    pub nxdomain: bool,
    pub ttl: u32,
    pub togglename: String,
    pub reactivation_delay_secs: u64,
    /// Lifetime given to a negative-cache entry, since it carries no answer
    /// record of its own to decay. Sourced from the `expire` config key.
    pub negative_ttl_secs: u32,
}

pub struct Handler {
    config: HandlerConfig,
    positive: PositiveCache,
    negative: NegativeCache,
    blockcache: RwLock<Arc<BlockCache>>,
    activation: ActivationHandle,
    questionlog: QuestionLog,
    forwarder: Forwarder,
}

impl Handler {
    pub fn new(
        config: HandlerConfig,
        positive: PositiveCache,
        negative: NegativeCache,
        blockcache: Arc<BlockCache>,
        activation: ActivationHandle,
        questionlog: QuestionLog,
        forwarder: Forwarder,
    ) -> Self {
        Self {
            config,
            positive,
            negative,
            blockcache: RwLock::new(blockcache),
            activation,
            questionlog,
            forwarder,
        }
    }

    /// Atomically replaces the live blocklist cache. In-flight queries keep
    /// whichever reference they already sampled.
    pub fn swap_blockcache(&self, fresh: Arc<BlockCache>) {
        *self.blockcache.write() = fresh;
    }

    fn sample_blockcache(&self) -> Arc<BlockCache> {
        self.blockcache.read().clone()
    }

    /// Read-only views consumed by the management API.
    pub fn blockcache_exists(&self, name: &str) -> bool {
        self.sample_blockcache().exists(name)
    }

    pub fn blockcache_len(&self) -> usize {
        self.sample_blockcache().len()
    }

    pub fn activation(&self) -> &ActivationHandle {
        &self.activation
    }

    pub fn questionlog(&self) -> &QuestionLog {
        &self.questionlog
    }

    /// Handles one inbound query end to end, always returning exactly one
    /// reply message.
    pub async fn handle(
        &self,
        request: &DnsMessage,
        client_ip: IpAddr,
        transport: Transport,
    ) -> DnsMessage {
        let Some(question) = request.first_question().cloned() else {
            return DnsMessage::servfail(request);
        };

        let mut active = self.activation.query().await;
        if !self.config.togglename.is_empty() && question.name().contains(&self.config.togglename)
        {
            active = self
                .activation
                .toggle(ToggleMode::Flip, self.config.reactivation_delay_secs)
                .await;
        }

        let is_ip_query = question.qclass == RecordClass::IN
            && matches!(question.qtype, RecordType::A | RecordType::AAAA);

        if !is_ip_query {
            return self
                .forward_and_reply(request, &question, transport, None, false)
                .await;
        }

        let key = Key::fingerprint(&question);
        let mut blacklisted_while_inactive = false;

        match self.positive.get(&key) {
            GetOutcome::Found { mut msg, blocked } => {
                if !blocked {
                    msg.set_id(request.header.id);
                    return msg;
                }
                if active {
                    msg.set_id(request.header.id);
                    return msg;
                }
                blacklisted_while_inactive = true;
            }
            GetOutcome::NotFound | GetOutcome::Expired => {
                if let GetOutcome::Found { .. } = self.negative.get(&key) {
                    return DnsMessage::servfail(request);
                }
            }
        }

        if active && !blacklisted_while_inactive {
            let blockcache = self.sample_blockcache();
            if blockcache.exists(&question.name()) {
                let reply = self.synthesize_block_reply(request, &question);
                self.questionlog.record(QuestionLogEntry::new(
                    now_unix(),
                    client_ip,
                    true,
                    &question,
                ));
                let _ = self.positive.set(key, reply.clone(), true);
                return reply;
            }
        }

        self.questionlog.record(QuestionLogEntry::new(
            now_unix(),
            client_ip,
            false,
            &question,
        ));

        self.forward_and_reply(
            request,
            &question,
            transport,
            Some(key),
            blacklisted_while_inactive,
        )
        .await
    }

    async fn forward_and_reply(
        &self,
        request: &DnsMessage,
        question: &crate::dns::DnsQuestion,
        transport: Transport,
        key: Option<Key>,
        blacklisted_while_inactive: bool,
    ) -> DnsMessage {
        let mut result = self.forwarder.resolve(transport, request).await;

        if let Ok(msg) = &result {
            if msg.truncated() && transport == Transport::Udp {
                result = self.forwarder.resolve(Transport::Tcp, request).await;
            }
        }

        match result {
            Ok(mut msg) => {
                msg.set_id(request.header.id);
                if let Some(key) = key {
                    if !blacklisted_while_inactive && !msg.answers.is_empty() {
                        let _ = self.positive.set(key, msg.clone(), false);
                    }
                }
                msg
            }
            Err(err) => {
                warn!(%err, qname = %question.name(), "upstream resolve failed");
                if let Some(key) = key {
                    let empty = DnsMessage::servfail(request);
                    let _ = self
                        .negative
                        .set(key, empty, self.config.negative_ttl_secs);
                }
                DnsMessage::servfail(request)
            }
        }
    }

    fn synthesize_block_reply(
        &self,
        request: &DnsMessage,
        question: &crate::dns::DnsQuestion,
    ) -> DnsMessage {
        let mut reply = DnsMessage::reply_to(request);
        if self.config.nxdomain {
            reply.set_rcode(RCode::NxDomain);
            return reply;
        }
        let record = match question.qtype {
            RecordType::AAAA => {
                DnsResourceRecord::aaaa(question.labels.clone(), self.config.ttl, self.config.nullroutev6)
            }
            _ => DnsResourceRecord::a(question.labels.clone(), self.config.ttl, self.config.nullroute),
        };
        reply.answers.push(record);
        reply
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsHeader, DnsQuestion};
    use std::net::Ipv4Addr as V4;

    fn config() -> HandlerConfig {
        HandlerConfig {
            nullroute: V4::new(0, 0, 0, 0),
            nullroutev6: "::".parse().unwrap(),
            nxdomain: false,
            ttl: 10,
            togglename: "toggle-dns".to_string(),
            reactivation_delay_secs: 300,
            negative_ttl_secs: 600,
        }
    }

    fn a_query(name: &str) -> DnsMessage {
        DnsMessage {
            header: DnsHeader {
                id: 7,
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

    fn handler_with_block(name: &str) -> Handler {
        let blockcache = Arc::new(BlockCache::new());
        blockcache.set(name);
        Handler::new(
            config(),
            PositiveCache::new(0),
            NegativeCache::new(0),
            blockcache,
            ActivationHandle::spawn(),
            QuestionLog::new(100),
            Forwarder::new(vec![], std::time::Duration::from_millis(50), std::time::Duration::from_millis(10), None),
        )
    }

    #[tokio::test]
    async fn blocked_query_returns_sinkhole_and_caches_blocked() {
        let handler = handler_with_block("ads.example.com");
        let request = a_query("ads.example.com");
        let reply = handler
            .handle(&request, IpAddr::V4(V4::LOCALHOST), Transport::Udp)
            .await;

        assert_eq!(reply.answers.len(), 1);
        assert_eq!(reply.answers[0].ttl, 10);
        assert_eq!(reply.header.id, 7);

        let key = Key::fingerprint(&a_query("ads.example.com").questions[0]);
        match handler.positive.get(&key) {
            GetOutcome::Found { blocked, .. } => assert!(blocked),
            other => panic!("expected cached block, got {other:?}"),
        }
        assert_eq!(handler.questionlog.len(), 1);
    }

    #[tokio::test]
    async fn nxdomain_mode_replies_nxdomain_instead_of_sinkhole() {
        let mut handler = handler_with_block("ads.example.com");
        handler.config.nxdomain = true;
        let request = a_query("ads.example.com");
        let reply = handler
            .handle(&request, IpAddr::V4(V4::LOCALHOST), Transport::Udp)
            .await;
        assert_eq!(reply.header.rcode, u8::from(RCode::NxDomain));
        assert!(reply.answers.is_empty());
    }

    #[tokio::test]
    async fn blacklisted_while_inactive_is_never_cached_as_blocked() {
        let handler = handler_with_block("ads.example.com");
        handler.activation.set(false).await;
        let request = a_query("ads.example.com");
        let _ = handler
            .handle(&request, IpAddr::V4(V4::LOCALHOST), Transport::Udp)
            .await;

        let key = Key::fingerprint(&a_query("ads.example.com").questions[0]);
        // No upstream is reachable in this test (empty nameserver list), so
        // the handler falls through to SERVFAIL, but it must not have
        // stored a blocked=true entry.
        match handler.positive.get(&key) {
            GetOutcome::Found { blocked, .. } => assert!(!blocked),
            _ => {}
        }
    }
}
