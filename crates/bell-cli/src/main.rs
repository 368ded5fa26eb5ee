use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use bell_engine::{HttpApiFactory, Inbox, VerificationStatus};
use bell_types::config::{Credentials, InboxConfig};
use bell_types::error::InboxError;
use bell_types::event::FeedEvent;

#[derive(Parser)]
#[command(name = "bellhop", version, about = "Bellhop — notification inbox client")]
struct Cli {
    /// Base URL of the notification service.
    #[arg(long, default_value = "https://api.bellhop.dev")]
    url: String,
    /// Recipient auth token.
    #[arg(long, env = "BELLHOP_TOKEN")]
    token: String,
    /// Recipient id.
    #[arg(long, env = "BELLHOP_RECIPIENT")]
    recipient: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream the feed: print held notifications and live badge changes
    Watch {
        /// Seconds between push polls.
        #[arg(long, default_value_t = 10)]
        poll: u64,
        /// Notifications per page.
        #[arg(long, default_value_t = 20)]
        size: usize,
    },
    /// Print the current unviewed count and exit
    Count,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let credentials = Credentials::new(&cli.token, &cli.recipient);

    match cli.command {
        Commands::Watch { poll, size } => watch(&cli.url, credentials, poll, size).await,
        Commands::Count => count(&cli.url, credentials).await,
    }
}

async fn watch(url: &str, credentials: Credentials, poll: u64, size: usize) -> Result<()> {
    let factory = Arc::new(
        HttpApiFactory::new(url).with_poll_interval(Duration::from_secs(poll)),
    );
    let mut config = InboxConfig::new(credentials);
    config.fetch_size = size;

    let on_error = Arc::new(|err: &InboxError| {
        eprintln!("error: {err}");
    });
    let inbox = Inbox::new(config, factory, Some(on_error)).await;
    await_verified(&inbox).await?;

    let badge = inbox.mount_badge().await;
    let feed = inbox.mount_feed();

    // Print deliveries as they land on the instance channels.
    let _list = inbox.bus().subscribe(&inbox.session().list_channel(), |event| {
        if let FeedEvent::NewItems { items } = event {
            for n in items {
                println!("[{}] {}: {}", n.created_at, n.message.header, n.message.body);
            }
        }
    });
    let _count = inbox
        .bus()
        .subscribe(&inbox.session().count_channel(), |event| {
            if let FeedEvent::CountUpdate { count } = event {
                println!("badge: {count}");
            }
        });

    feed.load_initial(bell_types::notification::FeedFilter::All).await?;
    for n in feed.state().items {
        println!("[{}] {}: {}", n.created_at, n.message.header, n.message.body);
    }
    println!("badge: {}", badge.display());
    info!("watching for new notifications, ctrl-c to exit");

    tokio::signal::ctrl_c().await?;
    feed.close().await;
    badge.close().await;
    inbox.shutdown().await;
    Ok(())
}

async fn count(url: &str, credentials: Credentials) -> Result<()> {
    let factory = Arc::new(HttpApiFactory::new(url));
    let inbox = Inbox::new(InboxConfig::new(credentials), factory, None).await;
    await_verified(&inbox).await?;

    let badge = inbox.mount_badge().await;
    println!("{}", badge.count());
    inbox.shutdown().await;
    Ok(())
}

async fn await_verified(inbox: &Inbox) -> Result<()> {
    let mut rx = inbox.session().watch_status();
    let status = rx
        .wait_for(|s| *s != VerificationStatus::Pending)
        .await
        .map_err(|_| anyhow::anyhow!("session dropped during verification"))?;
    if *status != VerificationStatus::Success {
        anyhow::bail!("token verification failed");
    }
    Ok(())
}
