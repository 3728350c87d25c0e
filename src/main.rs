//! Command line front end: browse boards and threads, post anonymously and
//! manage the posting identity and relay list.

use std::{fs, path::Path, sync::Arc};

use anyhow::{anyhow, bail, Context};
use chanstr::{
    board::{board_by_hashtag, BOARDS},
    client::{ChanClient, ClientOptions},
    compose::{NewReply, NewThread, ParentRef},
    config::{self, Settings},
    content::resolve_content,
    event::Event,
    identity::{IdentityMode, IdentityResolver, LocalKeys},
    media::ImageMeta,
    post_number::{format_post_number, to_display_id, to_quote_token},
    relay::{cancel_pair, CancelSignal, RelayClient},
    session::FileSession,
    thread::Thread,
};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "chanstr",
    author,
    version,
    about = "Anonymous imageboard over Nostr relays"
)]
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
    /// List the boards.
    Boards,
    /// Show a board's threads in bump order.
    Board {
        id: String,
        /// Maximum number of threads to request.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show a thread with its replies.
    Thread { id: String },
    /// Start a new thread. Threads need an image.
    Post {
        board: String,
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long, default_value = "")]
        content: String,
        #[command(flatten)]
        image: ImageArgs,
    },
    /// Reply to a thread.
    Reply {
        /// Event id of the thread's opening post.
        root: String,
        #[arg(long, default_value = "")]
        content: String,
        /// Post number or event id of the post being answered.
        #[arg(long)]
        parent: Option<String>,
        #[command(flatten)]
        image: ImageArgs,
    },
    /// Inspect or change the posting identity.
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },
    /// Manage the relay list in the env file.
    Relay {
        #[command(subcommand)]
        action: RelayAction,
    },
}

/// Operations available under `chanstr identity`.
#[derive(Subcommand)]
enum IdentityAction {
    /// Print the active and ephemeral public keys.
    Show,
    /// Replace the ephemeral key.
    Rotate,
    /// Post with the ephemeral key.
    Anon,
    /// Post with `LOGIN_SECRET_KEY`.
    LoggedIn,
    /// Forget the login and post anonymously.
    Logout,
}

/// Operations available under `chanstr relay`.
#[derive(Subcommand)]
enum RelayAction {
    List,
    /// Add a relay after checking it accepts connections.
    Add { url: String },
    Remove { url: String },
}

/// Image already uploaded elsewhere, described by its upload metadata.
#[derive(Args, Default)]
struct ImageArgs {
    #[arg(long)]
    image_url: Option<String>,
    #[arg(long)]
    image_mime: Option<String>,
    /// Pixel size as `WxH`.
    #[arg(long)]
    image_dim: Option<String>,
    /// SHA-256 of the file, hex.
    #[arg(long)]
    image_hash: Option<String>,
}

impl ImageArgs {
    fn into_meta(self) -> Option<ImageMeta> {
        let pairs: Vec<(&str, String)> = [
            ("url", self.image_url),
            ("m", self.image_mime),
            ("dim", self.image_dim),
            ("x", self.image_hash),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(ImageMeta::from_upload_tags(&pairs))
        }
    }
}

type CliClient = ChanClient<RelayClient, FileSession>;

fn build_client(cfg: &Settings) -> anyhow::Result<CliClient> {
    let resolver = IdentityResolver::new(FileSession::new(&cfg.session_file));
    if let Some(secret) = &cfg.login_secret_key {
        let keys = LocalKeys::from_secret_hex(secret).context("parsing LOGIN_SECRET_KEY")?;
        resolver.login(Arc::new(keys));
    }
    Ok(ChanClient::new(
        RelayClient::from_settings(cfg),
        resolver,
        ClientOptions::from(cfg),
    ))
}

/// Cancel signal fired by Ctrl-C.
fn interrupt_signal() -> CancelSignal {
    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    signal
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    if let Commands::Boards = cli.command {
        for board in BOARDS {
            let nsfw = if board.nsfw { " [nsfw]" } else { "" };
            println!("/{}/ - {}{nsfw}\n    {}", board.id, board.name, board.description);
        }
        return Ok(());
    }
    let mut cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Boards => {}
        Commands::Board { id, limit } => {
            if let Some(limit) = limit {
                cfg.board_limit = limit;
            }
            let client = build_client(&cfg)?;
            let snapshot = client.fetch_board(&id, &interrupt_signal()).await?;
            if snapshot.is_empty() {
                println!("/{id}/ has no threads yet");
            }
            for summary in snapshot {
                println!(
                    "{} [{} replies] {}",
                    format_post_number(&summary.root.id),
                    summary.reply_count,
                    if summary.title.is_empty() { "(no subject)" } else { summary.title.as_str() }
                );
                if let Some(url) = summary.image_url {
                    println!("    {url}");
                }
                println!("    id: {}", summary.root.id);
            }
        }
        Commands::Thread { id } => {
            let client = build_client(&cfg)?;
            let thread = client.fetch_thread(&id, &interrupt_signal()).await?;
            print_thread(&thread, &client.identity().active_public_key());
        }
        Commands::Post {
            board,
            subject,
            content,
            image,
        } => {
            let client = build_client(&cfg)?;
            let event = client
                .create_thread(&NewThread {
                    board,
                    subject,
                    content,
                    image: image.into_meta().unwrap_or_default(),
                })
                .await?;
            println!("{} {}", format_post_number(&event.id), event.id);
        }
        Commands::Reply {
            root,
            content,
            parent,
            image,
        } => {
            let client = build_client(&cfg)?;
            let thread = client.fetch_thread(&root, &interrupt_signal()).await?;
            let board = thread
                .root
                .tags_named("t")
                .filter_map(|t| t.value())
                .find_map(board_by_hashtag)
                .ok_or_else(|| anyhow!("thread {root} is not filed under a known board"))?;
            let parent = parent
                .map(|p| find_post(&thread, &p).ok_or_else(|| anyhow!("no post {p} in this thread")))
                .transpose()?
                .filter(|ev| ev.id != thread.root.id)
                .map(|ev| ParentRef {
                    id: ev.id.clone(),
                    pubkey: ev.pubkey.clone(),
                });
            let event = client
                .create_reply(&NewReply {
                    board: board.id.to_string(),
                    root_id: thread.root.id.clone(),
                    root_pubkey: thread.root.pubkey.clone(),
                    parent,
                    content,
                    image: image.into_meta(),
                })
                .await?;
            println!("{} {}", format_post_number(&event.id), event.id);
        }
        Commands::Identity { action } => {
            let client = build_client(&cfg)?;
            handle_identity(action, client.identity(), cfg.login_secret_key.is_some());
        }
        Commands::Relay { action } => handle_relay(action, &cli.env, &cfg).await?,
    }
    Ok(())
}

/// Look a post up by post number or full event id.
fn find_post<'a>(thread: &'a Thread, key: &str) -> Option<&'a Event> {
    let digits = key.trim_start_matches(">>").trim_start_matches("No.");
    let id = thread
        .reference_map()
        .resolve(digits)
        .map(str::to_string)
        .unwrap_or_else(|| key.to_string());
    thread.all_events().find(|ev| ev.id == id)
}

/// `--- No.<post> ID:<poster>` with a `(You)` marker on our own posts.
fn post_header(ev: &Event, own_pubkey: &str) -> String {
    let you = if ev.pubkey == own_pubkey { " (You)" } else { "" };
    format!(
        "--- {} ID:{}{you}",
        format_post_number(&ev.id),
        to_display_id(&ev.pubkey)
    )
}

fn print_thread(thread: &Thread, own_pubkey: &str) {
    let refs = thread.reference_map();
    if !thread.title.is_empty() {
        println!("{}", thread.title);
    }
    for ev in thread.all_events() {
        println!("{}", post_header(ev, own_pubkey));
        for line in resolve_content(&ev.content, &refs) {
            println!("{line}");
        }
        let backlinks: Vec<String> = thread
            .backlinks(&ev.id)
            .iter()
            .map(|reply| to_quote_token(&reply.id))
            .collect();
        if !backlinks.is_empty() {
            println!("Replies: {}", backlinks.join(" "));
        }
    }
}

fn handle_identity(action: IdentityAction, resolver: &IdentityResolver<FileSession>, has_login: bool) {
    match action {
        IdentityAction::Show => {}
        IdentityAction::Rotate => {
            resolver.rotate();
        }
        IdentityAction::Anon => resolver.set_mode(IdentityMode::Anon),
        IdentityAction::LoggedIn => {
            if !has_login {
                warn!("LOGIN_SECRET_KEY is not set; posts stay anonymous");
            }
            resolver.set_mode(IdentityMode::LoggedIn);
        }
        IdentityAction::Logout => resolver.logout(),
    }
    let active = resolver.active_identity();
    println!("mode: {}", resolver.mode().as_str());
    println!(
        "active: {}{}",
        active.public_key(),
        if active.is_anonymous() { " (anonymous)" } else { "" }
    );
    println!("ephemeral: {}", resolver.ephemeral_public_key());
}

async fn handle_relay(action: RelayAction, env_path: &str, cfg: &Settings) -> anyhow::Result<()> {
    match action {
        RelayAction::List => {
            for relay in &cfg.relays {
                println!("{relay}");
            }
        }
        RelayAction::Add { url } => {
            if cfg.relays.iter().any(|existing| existing == &url) {
                bail!("relay already configured: {url}");
            }
            RelayClient::from_settings(cfg)
                .probe(&url)
                .await
                .with_context(|| format!("relay unreachable: {url}"))?;
            let mut relays = cfg.relays.clone();
            relays.push(url);
            write_relays_to_env(env_path, &relays)?;
        }
        RelayAction::Remove { url } => {
            let mut relays = cfg.relays.clone();
            let before = relays.len();
            relays.retain(|existing| existing != &url);
            if relays.len() == before {
                bail!("relay not configured: {url}");
            }
            if relays.is_empty() {
                bail!("cannot remove the last relay");
            }
            write_relays_to_env(env_path, &relays)?;
        }
    }
    Ok(())
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
    let session_file = config::base_dir(path).join("chanstr-session.json");
    let mut content = String::new();
    content.push_str("RELAYS=wss://relay.damus.io,wss://relay.primal.net\n");
    content.push_str("TOR_SOCKS=\n");
    content.push_str(&format!("SESSION_FILE={}\n", session_file.to_string_lossy()));
    content.push_str("QUERY_TIMEOUT_MS=10000\n");
    content.push_str("PUBLISH_TIMEOUT_MS=5000\n");
    content.push_str("THREAD_RETRIES=3\n");
    content.push_str("THREAD_RETRY_DELAY_MS=1000\n");
    content.push_str("BOARD_LIMIT=50\n");
    content.push_str("LOGIN_SECRET_KEY=\n");
    fs::write(env_path, content).context("writing default env file")?;
    Ok(())
}

fn write_relays_to_env(env_path: &str, relays: &[String]) -> anyhow::Result<()> {
    let content = fs::read_to_string(env_path)?;
    let relays_joined = relays.join(",");
    let mut new_content = String::new();
    let mut replaced = false;
    for line in content.lines() {
        if line.starts_with("RELAYS=") {
            new_content.push_str(&format!("RELAYS={relays_joined}\n"));
            replaced = true;
        } else {
            new_content.push_str(line);
            new_content.push('\n');
        }
    }
    if !replaced {
        new_content.push_str(&format!("RELAYS={relays_joined}\n"));
    }
    fs::write(env_path, new_content)?;
    std::env::set_var("RELAYS", relays_joined);
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "chanstr=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    run(cli).await
}
