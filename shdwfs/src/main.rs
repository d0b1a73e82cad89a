use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shdwfs::cadapter::http::HttpBackend;
use shdwfs::cadapter::signer::{KeypairSigner, RequestSigner};
use shdwfs::cli::{Cli, Command, MountArgs};
use shdwfs::config::MountConfig;
use shdwfs::daemon::{shutdown_signal, spawn_cache_refresher};
use shdwfs::fuse::BucketFuse;
use shdwfs::fuse::mount::mount_bucket;
use shdwfs::vfs::BucketFs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Mount(args) => mount(args).await,
    }
}

async fn mount(args: MountArgs) -> anyhow::Result<()> {
    let signer: Arc<dyn RequestSigner> = Arc::new(
        KeypairSigner::from_file(&args.keypair)
            .with_context(|| format!("loading keypair {}", args.keypair.display()))?,
    );
    info!(signer = %signer.signer(), bucket = %args.bucket, "keypair loaded");

    let config = MountConfig {
        max_concurrency: args.max_concurrency.max(1),
        allow_other: args.allow_other,
        ..MountConfig::new(&args.bucket).with_endpoint(&args.endpoint)
    };
    let backend = Arc::new(
        HttpBackend::new(&config.endpoint, &config.bucket, signer.clone())
            .context("building http client")?,
    );

    let fs = Arc::new(BucketFs::new(backend, signer, config.clone()));
    let refresher = config
        .refresh_interval
        .map(|every| spawn_cache_refresher(fs.cache(), every));

    let handle = mount_bucket(BucketFuse::new(fs), &args.mountpoint, config.allow_other)
        .await
        .with_context(|| format!("mounting on {}", args.mountpoint.display()))?;
    info!(mountpoint = %args.mountpoint.display(), "bucket mounted");

    shutdown_signal().await;

    if let Some(refresher) = refresher {
        refresher.abort();
    }
    if let Err(e) = handle.unmount().await {
        warn!(error = %e, "unmount failed");
    }
    info!("unmounted");
    Ok(())
}
