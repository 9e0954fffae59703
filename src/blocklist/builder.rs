//! The blocklist builder (C5): downloads sources, walks configured source
//! directories, parses host-file syntax, and produces a fully-populated
//! `BlockCache`. A completed build either fully replaces the live cache or
//! leaves it untouched — callers perform the atomic swap, not this module.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::BlockCache;

#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    /// Directory downloaded sources are written into, and also walked for
    /// on-disk copies.
    pub sources_dir: PathBuf,
    /// Remote blocklist URLs.
    pub sources: Vec<String>,
    /// Additional local directories to walk recursively.
    pub source_dirs: Vec<PathBuf>,
    /// Domains that must never be inserted.
    pub whitelist: Vec<String>,
    /// Manual entries applied directly, ahead of any downloaded content.
    pub blocklist: Vec<String>,
}

pub async fn build(config: &BuildConfig) -> Result<BlockCache> {
    ensure_sources_dir(&config.sources_dir)?;

    let whitelist: HashSet<String> = config.whitelist.iter().map(|s| s.to_lowercase()).collect();
    let cache = BlockCache::new();

    for entry in &config.blocklist {
        insert_filtered(&cache, &whitelist, entry);
    }

    download_sources(&config.sources, &config.sources_dir).await;

    walk_dir(&cache, &whitelist, &config.sources_dir).await?;
    for dir in &config.source_dirs {
        walk_dir(&cache, &whitelist, dir).await?;
    }

    info!(entries = cache.len(), "blocklist build complete");
    Ok(cache)
}

fn ensure_sources_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(dir, perms)?;
    }
    Ok(())
}

/// Downloads every source concurrently. Naming is deterministic:
/// `"<host>.<n>.list"`, where `n` increments per repeated host. A failed
/// download is logged and does not abort the rest of the build.
async fn download_sources(sources: &[String], dest_dir: &Path) {
    let client = reqwest::Client::builder()
        .user_agent("nullrouted")
        .build()
        .unwrap_or_default();

    let mut host_counts: HashMap<String, u32> = HashMap::new();
    let mut tasks = Vec::new();

    for url in sources {
        let host = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "source".to_string());
        let n = host_counts.entry(host.clone()).or_insert(0);
        let dest = dest_dir.join(format!("{host}.{n}.list"));
        *n += 1;

        let client = client.clone();
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = fetch_to_file(&client, &url, &dest).await {
                warn!(url, %err, "blocklist source fetch failed");
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }
}

async fn fetch_to_file(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    let response =
        client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::SourceFetchError {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::SourceFetchError {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    tokio::fs::write(dest, &bytes).await?;
    debug!(url, bytes = bytes.len(), "downloaded blocklist source");
    Ok(())
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Recursively walks `dir`; every non-directory file is parsed as a
/// host-file-formatted list. I/O errors here are fatal to the build.
fn walk_dir<'a>(
    cache: &'a BlockCache,
    whitelist: &'a HashSet<String>,
    dir: &'a Path,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                walk_dir(cache, whitelist, &path).await?;
            } else {
                parse_host_file(cache, whitelist, &path).await?;
            }
        }
        Ok(())
    })
}

async fn parse_host_file(cache: &BlockCache, whitelist: &HashSet<String>, path: &Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(path).await?;
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(domain) = fields.get(1).or_else(|| fields.first()) else {
            continue;
        };
        insert_filtered(cache, whitelist, domain);
    }
    Ok(())
}

fn insert_filtered(cache: &BlockCache, whitelist: &HashSet<String>, raw: &str) {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() || whitelist.contains(&lowered) {
        return;
    }
    cache.set(raw.trim());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn whitelisted_domains_are_never_inserted() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("hosts.txt"),
            "0.0.0.0 ads.example.com\nexample.com\ngood.example.com\n",
        )
        .unwrap();

        let config = BuildConfig {
            sources_dir: dir.path().join("sources"),
            sources: vec![],
            source_dirs: vec![dir.path().to_path_buf()],
            whitelist: vec!["example.com".to_string()],
            blocklist: vec![],
        };

        let cache = build(&config).await.unwrap();
        assert!(!cache.exists("example.com"));
        assert!(cache.exists("ads.example.com"));
        assert!(cache.exists("good.example.com"));
    }

    #[tokio::test]
    async fn manual_blocklist_entries_are_applied() {
        let dir = tempdir().unwrap();
        let config = BuildConfig {
            sources_dir: dir.path().join("sources"),
            sources: vec![],
            source_dirs: vec![],
            whitelist: vec![],
            blocklist: vec!["manually-blocked.test".to_string()],
        };
        let cache = build(&config).await.unwrap();
        assert!(cache.exists("manually-blocked.test"));
    }

    #[tokio::test]
    async fn comment_and_hosts_lines_are_parsed() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("hosts.txt"),
            "# comment\n0.0.0.0 blocked.test # trailing comment\n\nplain.test\n",
        )
        .unwrap();
        let config = BuildConfig {
            sources_dir: dir.path().join("sources"),
            sources: vec![],
            source_dirs: vec![dir.path().to_path_buf()],
            whitelist: vec![],
            blocklist: vec![],
        };
        let cache = build(&config).await.unwrap();
        assert!(cache.exists("blocked.test"));
        assert!(cache.exists("plain.test"));
    }
}
