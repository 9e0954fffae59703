//! The blocklist cache (C4): a fast membership test over literal names plus
//! an ordered list of glob and regex "specials". Rebuilds never mutate a
//! live cache — the reload coordinator swaps in a freshly built one.

pub mod builder;

use std::collections::HashSet;

use parking_lot::RwLock;
use regex::Regex;
use tracing::warn;

#[derive(Debug)]
enum Special {
    Glob(String),
    Regex(Regex),
}

/// Literal names plus an ordered "specials" list, guarded by a single
/// many-reader/one-writer lock. Lookups take the read lock for the whole
/// scan; writers (the builder) only ever touch a fresh, unshared instance.
#[derive(Debug, Default)]
pub struct BlockCache {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    literals: HashSet<String>,
    specials: Vec<Special>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies and inserts `src` as blocked. Regex entries are signaled
    /// by a leading `~` (stripped before compiling); a compile failure is
    /// logged and the entry dropped rather than failing the whole build.
    pub fn set(&self, src: &str) {
        if let Some(pattern) = src.strip_prefix('~') {
            match Regex::new(pattern) {
                Ok(re) => self.inner.write().specials.push(Special::Regex(re)),
                Err(err) => warn!(pattern, %err, "dropping invalid blocklist regex"),
            }
            return;
        }
        if src.contains('*') || src.contains('?') {
            self.inner.write().specials.push(Special::Glob(src.to_lowercase()));
            return;
        }
        self.inner.write().literals.insert(src.to_lowercase());
    }

    /// Lowercases `name`, checks the literal set first (O(1)), then scans
    /// the specials in insertion order; the first match wins.
    pub fn exists(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        let inner = self.inner.read();
        if inner.literals.contains(&name) {
            return true;
        }
        for special in &inner.specials {
            let hit = match special {
                Special::Glob(pattern) => glob_match(pattern, &name),
                Special::Regex(re) => re.is_match(&name),
            };
            if hit {
                return true;
            }
        }
        false
    }

    pub fn remove_literal(&self, name: &str) {
        self.inner.write().literals.remove(&name.to_lowercase());
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read();
        inner.literals.len() + inner.specials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `*` matches any run of characters (including none), `?` matches exactly
/// one character. Matched with standard glob semantics, no path separators.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    // dp[i][j] = pattern[..i] matches text[..j]
    let mut dp = vec![vec![false; text.len() + 1]; pattern.len() + 1];
    dp[0][0] = true;
    for i in 1..=pattern.len() {
        if pattern[i - 1] == '*' {
            dp[i][0] = dp[i - 1][0];
        }
    }
    for i in 1..=pattern.len() {
        for j in 1..=text.len() {
            dp[i][j] = match pattern[i - 1] {
                '*' => dp[i - 1][j] || dp[i][j - 1],
                '?' => dp[i - 1][j - 1],
                c => dp[i - 1][j - 1] && c == text[j - 1],
            };
        }
    }
    dp[pattern.len()][text.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_and_regex_and_literal() {
        let cache = BlockCache::new();
        cache.set("*.ads.com");
        cache.set("ww?.example.com");
        cache.set(r"~^track[0-9]+\.net$");

        assert!(cache.exists("foo.ads.com"));
        assert!(cache.exists("wwx.example.com"));
        assert!(cache.exists("track42.net"));
        assert!(!cache.exists("tracker.net"));
        assert!(!cache.exists("example.com"));
    }

    #[test]
    fn literal_lookup_is_case_insensitive() {
        let cache = BlockCache::new();
        cache.set("Ads.Example.com");
        assert!(cache.exists("ads.example.com"));
        assert!(cache.exists("ADS.EXAMPLE.COM"));
    }

    #[test]
    fn invalid_regex_is_dropped_not_fatal() {
        let cache = BlockCache::new();
        cache.set("~(unterminated");
        assert!(!cache.exists("anything"));
    }
}
