//! Gemini Keeper CLI
//!
//! Two subcommands share one `.env`-style credential store:
//!
//!   gemini-keeper harvest            # browser login, extract + save cookies
//!   gemini-keeper run                # open a session, keep the token fresh
//!
//! `harvest` opens a visible browser on the Gemini login page, waits for you
//! to finish logging in, then persists `SECURE_1PSID` and `SECURE_1PSIDTS`.
//! `run` loads those values, opens a web session, sends a prompt, and keeps
//! polling for server-side token rotation until you press Enter.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use gemini_keeper::{
    ChromeBrowser, EnvStore, GeminiConfig, GeminiSession, HarvestOutcome, Harvester,
    MonitorConfig, SessionKeeper, UpsertPolicy, IDENTITY_KEY, PARTNER_KEY,
};

#[derive(Parser)]
#[command(name = "gemini-keeper")]
#[command(about = "Harvest Gemini session cookies and keep the rotating token fresh")]
struct Cli {
    /// Path of the persisted credential store
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Proxy endpoint, e.g. http://127.0.0.1:15665 (direct connection when unset)
    #[arg(long, global = true, env = "GEMINI_KEEPER_PROXY")]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a browser through the login flow and persist the cookies
    Harvest {
        /// Always list every cookie name seen, even on success
        #[arg(long)]
        list: bool,

        /// Only replace keys already present in the store; never add new ones
        #[arg(long)]
        require_existing: bool,
    },
    /// Open a session and monitor the partner token for rotation
    Run {
        /// Seconds between rotation checks
        #[arg(long, default_value_t = 5)]
        interval: u64,

        /// Heartbeat dots per output line
        #[arg(long, default_value_t = 50)]
        line_wrap: usize,

        /// Prompt to send once the session is open
        #[arg(long, default_value = "Describe the Tokyo Skytree in one sentence.")]
        prompt: String,

        /// Connection-establishment timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Seconds between keep-alive rotation pings (0 disables them)
        #[arg(long, default_value_t = 540)]
        keep_alive: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Harvest {
            list,
            require_existing,
        } => harvest(cli.env_file, cli.proxy, list, require_existing).await,
        Commands::Run {
            interval,
            line_wrap,
            prompt,
            timeout,
            keep_alive,
        } => {
            run(
                cli.env_file,
                cli.proxy,
                MonitorConfig {
                    interval: Duration::from_secs(interval),
                    heartbeat_line_wrap: line_wrap,
                    heartbeat: true,
                },
                prompt,
                Duration::from_secs(timeout),
                (keep_alive > 0).then(|| Duration::from_secs(keep_alive)),
            )
            .await
        }
    }
}

async fn harvest(
    env_file: PathBuf,
    proxy: Option<String>,
    list: bool,
    require_existing: bool,
) -> Result<()> {
    let policy = if require_existing {
        UpsertPolicy::RequireExisting
    } else {
        UpsertPolicy::CreateIfAbsent
    };
    let harvester = Harvester::new(EnvStore::new(&env_file), policy);

    println!("[+] Opening {} …", gemini_keeper::LOGIN_URL);
    // The browser driver is synchronous, as is the operator's Enter; keep
    // them both off the runtime's worker threads.
    let (outcome, names) = tokio::task::spawn_blocking(move || {
        let browser = ChromeBrowser::launch(proxy.as_deref())?;
        harvester.run(Box::new(browser), || {
            println!("\n>>> Press <Enter> here after completing the login.\n");
            let mut line = String::new();
            let _ = std::io::stdin().lock().read_line(&mut line);
        })
    })
    .await
    .context("harvest task panicked")??;

    match outcome {
        HarvestOutcome::Saved { identity, partner } => {
            if list || partner.is_none() {
                println!("\nAll cookie names in the browser:");
                println!("{}", names.join(", "));
            }
            println!("\n[✓] Found cookies:");
            println!("{IDENTITY_KEY}  = {}…", gemini_keeper::secret_preview(&identity));
            match partner {
                Some(partner) => {
                    println!("{PARTNER_KEY}= {}…", gemini_keeper::secret_preview(&partner))
                }
                None => {
                    println!("[!] No PSIDTS/PSIDCC partner cookie found.");
                    println!("    → Copy it from DevTools › Application › Cookies if the session misbehaves.");
                }
            }
            println!("[+] Saved credentials to {}", env_file.display());
            Ok(())
        }
        HarvestOutcome::NoIdentity => {
            println!("\nAll cookie names in the browser:");
            println!("{}", names.join(", "));
            bail!("no identity cookie found; make sure the login completed before pressing Enter");
        }
    }
}

async fn run(
    env_file: PathBuf,
    proxy: Option<String>,
    monitor: MonitorConfig,
    prompt: String,
    timeout: Duration,
    keep_alive: Option<Duration>,
) -> Result<()> {
    // Populate the process environment from the store, without overriding
    // anything the operator exported by hand.
    let _ = dotenvy::from_path(&env_file);
    let identity = std::env::var(IDENTITY_KEY)
        .with_context(|| format!("{IDENTITY_KEY} is not set; run `gemini-keeper harvest` first"))?;
    let partner = std::env::var(PARTNER_KEY)
        .with_context(|| format!("{PARTNER_KEY} is not set; run `gemini-keeper harvest` first"))?;

    let session = GeminiSession::initialize(
        &identity,
        Some(partner.as_str()),
        GeminiConfig {
            proxy,
            connect_timeout: timeout,
            keep_alive,
        },
    )
    .await
    .context("failed to open the Gemini session")?;

    let keeper = SessionKeeper::start(
        Arc::new(session),
        Arc::new(EnvStore::new(&env_file)),
        Some(partner),
        monitor,
    );
    info!(path = %env_file.display(), "session open, rotation monitor running");

    let reply = keeper.send(&prompt).await?;
    println!("\n{reply}");

    print!("\n[Press Enter to quit]");
    std::io::stdout().flush().ok();
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
    })
    .await
    .context("stdin task panicked")?;

    keeper.request_stop();
    keeper.await_shutdown().await?;
    Ok(())
}
