//! Bounded in-memory log of served questions, consumed by the management
//! API's `questioncache` endpoints.
//!
//! Overflow policy is "clear when full and refill", not a true ring buffer:
//! when the bound is hit the whole buffer is dropped and refilling starts
//! from empty. This is surprising but load-bearing for callers that poll
//! with a `highWater` timestamp, since it guarantees entries they haven't
//! seen yet are never silently overwritten mid-buffer.

use std::net::IpAddr;

use parking_lot::Mutex;

use crate::dns::DnsQuestion;

#[derive(Clone, Debug, PartialEq)]
pub struct QuestionLogEntry {
    pub date_unix: i64,
    pub client_ip: IpAddr,
    pub blocked: bool,
    pub name: String,
    pub qtype: String,
    pub qclass: String,
}

impl QuestionLogEntry {
    pub fn new(date_unix: i64, client_ip: IpAddr, blocked: bool, question: &DnsQuestion) -> Self {
        Self {
            date_unix,
            client_ip,
            blocked,
            name: question.name(),
            qtype: question.qtype.to_string(),
            qclass: question.qclass.to_string(),
        }
    }
}

pub struct QuestionLog {
    cap: usize,
    entries: Mutex<Vec<QuestionLogEntry>>,
}

impl QuestionLog {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, entry: QuestionLogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.cap {
            entries.clear();
        }
        entries.push(entry);
    }

    /// Entries with `date_unix >= since`, ascending by date.
    pub fn since(&self, since: i64) -> Vec<QuestionLogEntry> {
        let entries = self.entries.lock();
        let mut out: Vec<QuestionLogEntry> = entries
            .iter()
            .filter(|e| e.date_unix >= since)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.date_unix);
        out
    }

    /// Entries logged for a specific client, ascending by date.
    pub fn for_client(&self, client_ip: IpAddr) -> Vec<QuestionLogEntry> {
        let entries = self.entries.lock();
        let mut out: Vec<QuestionLogEntry> = entries
            .iter()
            .filter(|e| e.client_ip == client_ip)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.date_unix);
        out
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{RecordClass, RecordType};
    use std::net::Ipv4Addr;

    fn q(name: &str) -> DnsQuestion {
        DnsQuestion {
            labels: name.split('.').map(str::to_string).collect(),
            qtype: RecordType::A,
            qclass: RecordClass::IN,
        }
    }

    #[test]
    fn overflow_clears_rather_than_wraps() {
        let log = QuestionLog::new(2);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        log.record(QuestionLogEntry::new(1, ip, false, &q("a.com")));
        log.record(QuestionLogEntry::new(2, ip, false, &q("b.com")));
        assert_eq!(log.len(), 2);
        log.record(QuestionLogEntry::new(3, ip, false, &q("c.com")));
        assert_eq!(log.len(), 1);
        assert_eq!(log.since(0)[0].name, "c.com");
    }

    #[test]
    fn since_filters_and_sorts_ascending() {
        let log = QuestionLog::new(10);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        log.record(QuestionLogEntry::new(5, ip, false, &q("b.com")));
        log.record(QuestionLogEntry::new(1, ip, false, &q("a.com")));
        let results = log.since(2);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "b.com");
    }
}
