//! The question-keyed response cache (C1–C3).
//!
//! `Key::fingerprint` derives a stable MD5 fingerprint from a question; `TtlCache`
//! implements both the positive and negative caches, which share the same shape
//! and the same TTL-decay-on-read contract. The negative cache is simply a
//! `TtlCache` whose stored messages carry no answers.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use md5::{Digest, Md5};
use parking_lot::Mutex;

use crate::dns::{DnsMessage, DnsQuestion};

/// A fixed monotonic reference point, established lazily on first use.
/// `Instant` has no wall-clock epoch of its own, so "truncate to whole
/// seconds" is expressed relative to this origin: every stored
/// `last_update` lands exactly on one of `origin + n seconds`.
static EPOCH: OnceLock<Instant> = OnceLock::new();

fn truncate_to_second(instant: Instant) -> Instant {
    let origin = *EPOCH.get_or_init(Instant::now);
    let secs = instant.saturating_duration_since(origin).as_secs();
    origin + Duration::from_secs(secs)
}

/// A cache key: lowercase hex MD5 of the canonical question string. Not a
/// security boundary, just a stable fingerprint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key(String);

impl Key {
    pub fn fingerprint(question: &DnsQuestion) -> Self {
        let name = question.name().trim_end_matches('.').to_lowercase();
        let canonical = format!("{} {} {}", name, question.qclass, question.qtype);
        let mut hasher = Md5::new();
        hasher.update(canonical.as_bytes());
        Key(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` represents corrupted state that should never arise from the
    /// public API; `get` self-heals it as a miss rather than trusting it
    /// can't happen.
    msg: Option<DnsMessage>,
    blocked: bool,
    last_update: Instant,
    /// Drives decay-on-read for entries whose `msg` carries no answer
    /// records (the negative cache's answerless markers, which have
    /// nothing else to decrement). Unused when `msg` has answers.
    neg_ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GetOutcome {
    Found { msg: DnsMessage, blocked: bool },
    NotFound,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

/// Shared implementation behind both the positive and negative caches.
/// `max_count == 0` means unbounded.
#[derive(Debug)]
pub struct TtlCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_count: usize,
}

impl TtlCache {
    pub fn new(max_count: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_count,
        }
    }

    /// TTL-decrement-on-read: every answer record's TTL (or, for an
    /// answerless entry, its tracked `neg_ttl`) is reduced by the whole
    /// seconds elapsed since the last read, mutating the stored entry. If
    /// the TTL would drop below zero the entry is evicted and `Expired` is
    /// reported; otherwise the decremented copy is returned and the decay
    /// clock is advanced by exactly the consumed whole seconds, carrying the
    /// sub-second remainder forward rather than resetting it to `now`.
    pub fn get(&self, key: &Key) -> GetOutcome {
        let mut guard = self.entries.lock();

        match guard.get(key.as_str()) {
            None => return GetOutcome::NotFound,
            Some(entry) if entry.msg.is_none() => {
                guard.remove(key.as_str());
                return GetOutcome::NotFound;
            }
            Some(_) => {}
        }

        let now = Instant::now();
        let elapsed = {
            let entry = guard.get(key.as_str()).expect("checked above");
            now.saturating_duration_since(entry.last_update).as_secs() as i64
        };

        let would_expire = {
            let entry = guard.get(key.as_str()).expect("checked above");
            let msg = entry.msg.as_ref().expect("checked above");
            if msg.answers.is_empty() {
                entry.neg_ttl.is_some_and(|ttl| (ttl as i64) - elapsed < 0)
            } else {
                msg.answers.iter().any(|r| (r.ttl as i64) - elapsed < 0)
            }
        };
        if would_expire {
            guard.remove(key.as_str());
            return GetOutcome::Expired;
        }

        let entry = guard.get_mut(key.as_str()).expect("checked above");
        let msg = entry.msg.as_mut().expect("checked above");
        if msg.answers.is_empty() {
            if let Some(ttl) = entry.neg_ttl.as_mut() {
                *ttl = (*ttl as i64 - elapsed).max(0) as u32;
            }
        } else {
            for r in msg.answers.iter_mut() {
                r.ttl = (r.ttl as i64 - elapsed).max(0) as u32;
            }
        }
        entry.last_update += Duration::from_secs(elapsed as u64);

        GetOutcome::Found {
            msg: msg.clone(),
            blocked: entry.blocked,
        }
    }

    /// Rejects with `Full` only when the cache is at capacity and `key` is
    /// not already present; an existing key is refreshed unconditionally.
    pub fn set(&self, key: Key, msg: DnsMessage, blocked: bool) -> Result<(), Full> {
        self.insert(key, msg, blocked, None)
    }

    /// Inserts an answerless entry (the negative cache's shape) with an
    /// explicit `ttl_secs` driving its own decay-on-read, since there are no
    /// answer records to decrement.
    pub fn set_with_ttl(
        &self,
        key: Key,
        msg: DnsMessage,
        ttl_secs: u32,
    ) -> Result<(), Full> {
        self.insert(key, msg, false, Some(ttl_secs))
    }

    fn insert(
        &self,
        key: Key,
        msg: DnsMessage,
        blocked: bool,
        neg_ttl: Option<u32>,
    ) -> Result<(), Full> {
        let mut guard = self.entries.lock();
        let exists = guard.contains_key(key.as_str());
        if self.max_count > 0 && !exists && guard.len() >= self.max_count {
            return Err(Full);
        }
        guard.insert(
            key.0,
            CacheEntry {
                msg: Some(msg),
                blocked,
                last_update: truncate_to_second(Instant::now()),
                neg_ttl,
            },
        );
        Ok(())
    }

    pub fn remove(&self, key: &Key) {
        self.entries.lock().remove(key.as_str());
    }

    pub fn exists(&self, key: &Key) -> bool {
        self.entries.lock().contains_key(key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn insert_corrupt_for_test(&self, key: &Key) {
        self.entries.lock().insert(
            key.as_str().to_string(),
            CacheEntry {
                msg: None,
                blocked: false,
                last_update: Instant::now(),
                neg_ttl: None,
            },
        );
    }
}

/// The positive response cache (C2): caches full answers, served while they
/// decay toward zero TTL.
pub struct PositiveCache(TtlCache);

impl PositiveCache {
    pub fn new(max_count: usize) -> Self {
        Self(TtlCache::new(max_count))
    }

    pub fn get(&self, key: &Key) -> GetOutcome {
        self.0.get(key)
    }

    pub fn set(&self, key: Key, msg: DnsMessage, blocked: bool) -> Result<(), Full> {
        self.0.set(key, msg, blocked)
    }

    pub fn remove(&self, key: &Key) {
        self.0.remove(key)
    }

    pub fn exists(&self, key: &Key) -> bool {
        self.0.exists(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The negative cache (C3): same shape as the positive cache, storing an
/// answerless message to mean "upstream failed for this key recently". A
/// hit here short-circuits the handler straight to SERVFAIL. Since there is
/// no answer record to decrement, each entry carries its own `ttl_secs` that
/// decays the same way, so a failure is never cached forever.
pub struct NegativeCache(TtlCache);

impl NegativeCache {
    pub fn new(max_count: usize) -> Self {
        Self(TtlCache::new(max_count))
    }

    pub fn get(&self, key: &Key) -> GetOutcome {
        self.0.get(key)
    }

    pub fn set(&self, key: Key, msg: DnsMessage, ttl_secs: u32) -> Result<(), Full> {
        self.0.set_with_ttl(key, msg, ttl_secs)
    }

    pub fn remove(&self, key: &Key) {
        self.0.remove(key)
    }

    pub fn exists(&self, key: &Key) -> bool {
        self.0.exists(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsHeader, DnsResourceRecord, RecordClass, RecordType};
    use std::net::Ipv4Addr;
    use std::thread::sleep;
    use std::time::Duration;

    fn question(name: &str) -> DnsQuestion {
        DnsQuestion {
            labels: name.split('.').map(str::to_string).collect(),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        }
    }

    fn msg_with_ttl(ttl: u32) -> DnsMessage {
        DnsMessage {
            header: DnsHeader::default(),
            questions: vec![question("example.com")],
            answers: vec![DnsResourceRecord::a(
                vec!["example".into(), "com".into()],
                ttl,
                Ipv4Addr::new(1, 2, 3, 4),
            )],
            authorities: vec![],
            additionals: vec![],
        }
    }

    #[test]
    fn fingerprint_is_stable_and_case_insensitive() {
        let a = Key::fingerprint(&question("Example.COM"));
        let b = Key::fingerprint(&question("example.com"));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_qtype() {
        let mut q = question("example.com");
        let a = Key::fingerprint(&q);
        q.qtype = RecordType::AAAA;
        let b = Key::fingerprint(&q);
        assert_ne!(a, b);
    }

    #[test]
    fn set_rejects_full_only_when_key_absent() {
        let cache = PositiveCache::new(1);
        let k1 = Key::fingerprint(&question("a.com"));
        let k2 = Key::fingerprint(&question("b.com"));
        cache.set(k1.clone(), msg_with_ttl(10), false).unwrap();
        assert_eq!(cache.set(k2, msg_with_ttl(10), false), Err(Full));
        // Refreshing the existing key must still succeed at capacity.
        cache.set(k1, msg_with_ttl(20), false).unwrap();
    }

    #[test]
    fn get_decrements_ttl_and_expires_strictly() {
        let cache = PositiveCache::new(0);
        let key = Key::fingerprint(&question("example.com"));
        cache.set(key.clone(), msg_with_ttl(2), false).unwrap();

        sleep(Duration::from_millis(1100));
        match cache.get(&key) {
            GetOutcome::Found { msg, .. } => assert_eq!(msg.answers[0].ttl, 1),
            other => panic!("expected Found, got {other:?}"),
        }

        sleep(Duration::from_millis(1100));
        match cache.get(&key) {
            GetOutcome::Found { msg, .. } => assert_eq!(msg.answers[0].ttl, 0),
            other => panic!("expected Found with ttl=0, got {other:?}"),
        }

        sleep(Duration::from_millis(1100));
        assert_eq!(cache.get(&key), GetOutcome::Expired);
        assert_eq!(cache.get(&key), GetOutcome::NotFound);
    }

    #[test]
    fn null_stored_message_self_heals_as_miss() {
        let cache = PositiveCache::new(0);
        let key = Key::fingerprint(&question("example.com"));
        cache.0.insert_corrupt_for_test(&key);
        assert_eq!(cache.get(&key), GetOutcome::NotFound);
        assert!(!cache.exists(&key));
    }

    #[test]
    fn sub_second_reads_accumulate_across_second_boundaries() {
        // Five reads spaced ~300ms apart never individually cross a whole
        // second since their last read, but together they span >1s. If
        // `last_update` reset to the exact instant of each read (instead of
        // carrying the truncated remainder forward) every `elapsed` would
        // floor to 0 and the TTL would never move.
        let cache = PositiveCache::new(0);
        let key = Key::fingerprint(&question("example.com"));
        cache.set(key.clone(), msg_with_ttl(3), false).unwrap();

        for _ in 0..5 {
            sleep(Duration::from_millis(300));
            cache.get(&key);
        }

        match cache.get(&key) {
            GetOutcome::Found { msg, .. } => assert!(
                msg.answers[0].ttl < 3,
                "ttl should have decayed after >1.5s of sub-second reads, got {}",
                msg.answers[0].ttl
            ),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    fn empty_msg() -> DnsMessage {
        DnsMessage {
            header: DnsHeader::default(),
            questions: vec![question("example.com")],
            answers: vec![],
            authorities: vec![],
            additionals: vec![],
        }
    }

    #[test]
    fn negative_entry_expires_on_its_own_ttl() {
        let cache = NegativeCache::new(0);
        let key = Key::fingerprint(&question("example.com"));
        cache.set(key.clone(), empty_msg(), 1).unwrap();

        assert!(matches!(cache.get(&key), GetOutcome::Found { .. }));

        sleep(Duration::from_millis(1100));
        assert_eq!(cache.get(&key), GetOutcome::Expired);
        assert_eq!(cache.get(&key), GetOutcome::NotFound);
    }
}
