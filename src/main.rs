//! Command line interface for querying Nostr relays. Supports profile
//! resolution, contact list and follower queries, relation analysis,
//! friends feeds, and publishing signed notes and ratings.

use std::{fs, path::Path};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use questr::config::Settings;
use questr::event::UnsignedEvent;
use questr::publish::Signer;
use questr::{graph, profile, publish, signer::KeySigner, RelayClient};

/// Command line interface entry point.
#[derive(Parser)]
#[command(name = "questr", author, version, about = "Nostr relay query engine")]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Fetch kind-0 profile metadata for one or more pubkeys.
    Profile {
        /// Hex pubkeys to resolve.
        #[arg(required = true)]
        pubkeys: Vec<String>,
    },
    /// List the pubkeys a subject follows (newest kind-3 contact list).
    Follows { pubkey: String },
    /// List the pubkeys following a subject (kind-3 `#p` scan).
    Followers { pubkey: String },
    /// Partition a subject's graph into mutual / following-only / follower-only.
    Relations { pubkey: String },
    /// Print recent kind-1 notes from the subject's follow set.
    Feed {
        pubkey: String,
        /// Maximum number of notes to print.
        #[arg(long, default_value_t = 20)]
        limit: u32,
        /// Include the subject's own notes.
        #[arg(long)]
        include_self: bool,
    },
    /// Sign and publish a kind-1 text note.
    Publish {
        content: String,
        /// Hex secret key; falls back to `NOSTR_SECRET_KEY`.
        #[arg(long)]
        sec: Option<String>,
    },
    /// Sign and publish a kind-33 trust rating for a pubkey.
    Rate {
        /// Hex pubkey being rated.
        target: String,
        /// Rating value, e.g. 1 through 5.
        rating: f64,
        #[arg(long, default_value = "trust")]
        category: String,
        /// Hex secret key; falls back to `NOSTR_SECRET_KEY`.
        #[arg(long)]
        sec: Option<String>,
    },
    /// Generate a fresh keypair and print it.
    Keygen,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Keygen = cli.command {
        let keys = KeySigner::generate();
        println!("{}", json!({ "pubkey": keys.public_key(), "seckey": keys.secret_hex() }));
        return Ok(());
    }

    ensure_env_file(&cli.env)?;
    dotenvy::from_path(&cli.env).ok();
    let cfg = Settings::from_env();
    let client = RelayClient::with_proxy(cfg.tor_socks.clone());

    match cli.command {
        Commands::Profile { pubkeys } if pubkeys.len() == 1 => {
            let found =
                profile::fetch_profile(&client, &pubkeys[0], &cfg.relays, cfg.profile_timeout)
                    .await?;
            match found {
                Some(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
                None => bail!("no profile found for {}", pubkeys[0]),
            }
        }
        Commands::Profile { pubkeys } => {
            let metas = profile::fetch_profiles(
                &client,
                &pubkeys,
                &cfg.relays,
                cfg.profile_timeout,
                cfg.profile_concurrency,
            )
            .await;
            for (pubkey, meta) in metas {
                println!("{}", json!({ "pubkey": pubkey, "profile": meta }));
            }
        }
        Commands::Follows { pubkey } => {
            let follows = graph::fetch_follows(&client, &pubkey, &cfg.relays, cfg.timeout).await?;
            for pk in follows {
                println!("{pk}");
            }
        }
        Commands::Followers { pubkey } => {
            let followers = graph::fetch_followers(
                &client,
                &pubkey,
                &cfg.relays,
                cfg.timeout,
                cfg.follower_retries,
            )
            .await?;
            for pk in followers {
                println!("{pk}");
            }
        }
        Commands::Relations { pubkey } => {
            let p = graph::compute_relations(
                &client,
                &pubkey,
                &cfg.relays,
                cfg.timeout,
                cfg.follower_retries,
            )
            .await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "mutual": p.mutual,
                    "following_only": p.following_only,
                    "follower_only": p.follower_only,
                }))?
            );
        }
        Commands::Feed {
            pubkey,
            limit,
            include_self,
        } => {
            let include_self = include_self || cfg.include_self;
            let feed = graph::fetch_feed(
                &client,
                &pubkey,
                &cfg.relays,
                cfg.timeout,
                limit,
                include_self,
            )
            .await?;
            for note in feed {
                println!("{}", serde_json::to_string(&note)?);
            }
        }
        Commands::Publish { content, sec } => {
            let keys = load_signer(sec)?;
            let event = UnsignedEvent::note(content);
            publish_and_report(&client, event, &keys, &cfg).await?;
        }
        Commands::Rate {
            target,
            rating,
            category,
            sec,
        } => {
            let keys = load_signer(sec)?;
            let event = UnsignedEvent::rating(&target, rating, &category);
            publish_and_report(&client, event, &keys, &cfg).await?;
        }
        Commands::Keygen => unreachable!(),
    }

    client.shutdown().await;
    Ok(())
}

async fn publish_and_report(
    client: &RelayClient,
    event: UnsignedEvent,
    keys: &KeySigner,
    cfg: &Settings,
) -> anyhow::Result<()> {
    let (signed, report) =
        publish::publish(client, event, keys, &cfg.relays, cfg.timeout).await?;
    println!(
        "{}",
        json!({
            "id": signed.id,
            "accepted": report.accepted,
            "failed": report.failed,
        })
    );
    if !report.success() {
        bail!("no relay accepted event {}", signed.id);
    }
    Ok(())
}

fn load_signer(sec: Option<String>) -> anyhow::Result<KeySigner> {
    let hex_key = match sec {
        Some(k) => k,
        None => std::env::var("NOSTR_SECRET_KEY")
            .context("no secret key: pass --sec or set NOSTR_SECRET_KEY")?,
    };
    Ok(KeySigner::from_hex(&hex_key)?)
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut content = String::new();
    content.push_str(&format!(
        "RELAYS={}\n",
        questr::config::DEFAULT_RELAYS.join(",")
    ));
    content.push_str("TOR_SOCKS=\n");
    content.push_str("TIMEOUT_MS=10000\n");
    content.push_str("PROFILE_TIMEOUT_MS=2000\n");
    content.push_str("PROFILE_CONCURRENCY=8\n");
    content.push_str("FOLLOWER_RETRIES=3\n");
    content.push_str("INCLUDE_SELF=0\n");
    content.push_str("NOSTR_SECRET_KEY=\n");
    fs::write(env_path, content)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    run(cli).await
}
