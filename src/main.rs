use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use nullrouted::activation::ActivationHandle;
use nullrouted::api;
use nullrouted::blocklist::builder::{self, BuildConfig};
use nullrouted::blocklist::BlockCache;
use nullrouted::cache::{NegativeCache, PositiveCache};
use nullrouted::config::Config;
use nullrouted::forwarder::Forwarder;
use nullrouted::handler::{Handler, HandlerConfig};
use nullrouted::questionlog::QuestionLog;
use nullrouted::reload::Reloader;
use nullrouted::server::Server;

#[derive(Parser, Debug)]
#[command(name = "nullrouted", about = "A sinkholing, forwarding DNS resolver")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "nullrouted.toml")]
    config: PathBuf,

    /// Overrides the DNS bind address from the config file.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("NULLROUTED_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    config.validate()?;

    let bind_addr = config.bind_addr()?;
    let api_addr = config.api_addr()?;
    let nameservers = config.nameserver_addrs()?;

    tracing::info!(?bind_addr, ?api_addr, "starting nullrouted");

    let build_config = BuildConfig {
        sources_dir: config.sources_dir(),
        sources: config.sources.clone(),
        source_dirs: config.source_dirs(),
        whitelist: config.whitelist.clone(),
        blocklist: config.blocklist.clone(),
    };
    let blockcache = builder::build(&build_config).await.unwrap_or_else(|err| {
        tracing::warn!(%err, "initial blocklist build failed, starting with an empty cache");
        BlockCache::new()
    });
    tracing::info!(entries = blockcache.len(), "initial blocklist loaded");

    let forwarder = Forwarder::new(
        nameservers,
        Duration::from_secs(config.timeout),
        Duration::from_millis(config.interval),
        config.doh_url(),
    );

    let handler = Arc::new(Handler::new(
        HandlerConfig {
            nullroute: config.nullroute,
            nullroutev6: config.nullroutev6,
            nxdomain: config.nxdomain,
            ttl: config.ttl,
            togglename: config.togglename.clone(),
            reactivation_delay_secs: config.reactivationdelay,
            negative_ttl_secs: config.expire,
        },
        PositiveCache::new(config.maxcount),
        NegativeCache::new(config.maxcount),
        Arc::new(blockcache),
        ActivationHandle::spawn(),
        QuestionLog::new(config.questioncachecap),
        forwarder,
    ));

    let reloader = Reloader::new(handler.clone(), &config);
    reloader.watch_sighup();

    let (_shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let server = Server::new(bind_addr, handler.clone());

    let dns_task = tokio::spawn(async move { server.run(shutdown_rx).await });
    let api_task = tokio::spawn(api::serve(api_addr, handler, reloader));

    tokio::select! {
        result = dns_task => {
            result??;
        }
        result = api_task => {
            result??;
        }
    }

    Ok(())
}
