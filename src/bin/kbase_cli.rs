//!
//! kbase CLI binary
//! ----------------
//! Terminal front end for the client session layer. The session (tokens, cached
//! user, authenticated flag) is kept in a JSON file between invocations, so
//! `login` followed by `whoami` in a later process works, and an expired access
//! token is refreshed silently.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use kbase::client::{self, ApiError, Availability, ClientSessionManager, SessionEvent};
use kbase::config::ClientConfig;
use kbase::documents::{Document, NewDocument};
use kbase::identity::{ChangePasswordRequest, LoginRequest, ProfileUpdate, RegisterRequest, User};

#[derive(Parser)]
#[command(name = "kbase-cli")]
#[command(about = "kbase session client", long_about = None)]
struct Cli {
    /// API base URL (overrides KBASE_API_URL)
    #[arg(long, global = true)]
    url: Option<String>,
    /// Session file (overrides KBASE_SESSION_FILE)
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,
    /// Request timeout in milliseconds (overrides KBASE_API_TIMEOUT_MS)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// Password (falls back to KBASE_PASSWORD)
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        position: Option<String>,
    },

    /// Sign in
    Login {
        #[arg(long)]
        email: String,
        /// Password (falls back to KBASE_PASSWORD)
        #[arg(long)]
        password: Option<String>,
    },

    /// Show the signed-in user
    Whoami {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-validate the stored session against the server
    Check,

    /// Sign out and forget the stored session
    Logout,

    /// Show local session state without contacting the server
    Status,

    /// Update profile fields
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        position: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        timezone: Option<String>,
    },

    /// Change the account password
    Passwd {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },

    /// Enable multi-factor authentication
    Mfa {
        code: String,
    },

    /// Create a document
    Publish {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        content: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Search documents
    Search {
        query: String,
    },
}

fn password_arg(arg: Option<String>) -> Result<String> {
    arg.or_else(|| std::env::var("KBASE_PASSWORD").ok())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| anyhow!("--password or KBASE_PASSWORD is required"))
}

fn print_user(user: &User, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(user)?);
    } else {
        println!("{} <{}> role={} id={}", user.name, user.email, user.role, user.id);
    }
    Ok(())
}

async fn run(cli: Cli, manager: &ClientSessionManager) -> Result<()> {
    match cli.command {
        Commands::Register { email, name, password, department, position } => {
            let req = RegisterRequest { email, name, password: password_arg(password)?, department, position };
            let user = manager.register(&req).await?;
            print_user(&user, false)?;
        }
        Commands::Login { email, password } => {
            let creds = LoginRequest { email, password: password_arg(password)? };
            let user = manager.login(&creds).await?;
            print_user(&user, false)?;
        }
        Commands::Whoami { json } => match manager.get_current_user().await {
            Some(user) => print_user(&user, json)?,
            None => return Err(anyhow!("not signed in")),
        },
        Commands::Check => {
            if manager.check_auth().await {
                println!("session valid");
            } else {
                return Err(anyhow!("not signed in"));
            }
        }
        Commands::Logout => {
            manager.logout().await;
            println!("signed out");
        }
        Commands::Status => {
            let s = manager.snapshot();
            let data = manager.session().snapshot();
            println!("authenticated: {}", s.is_authenticated);
            println!("phase: {:?}", s.phase);
            println!("user: {}", s.user.as_ref().map(|u| u.email.as_str()).unwrap_or("-"));
            println!("access token: {}", if data.access_token.is_some() { "present" } else { "absent" });
            println!("refresh token: {}", if data.refresh_token.is_some() { "present" } else { "absent" });
        }
        Commands::Profile { name, department, position, bio, phone, timezone } => {
            let patch = ProfileUpdate { name, department, position, bio, phone, avatar: None, timezone };
            let user = manager.update_profile(&patch).await?;
            print_user(&user, false)?;
        }
        Commands::Passwd { current, new } => {
            let req = ChangePasswordRequest { current_password: current, confirm_password: new.clone(), new_password: new };
            manager.change_password(&req).await?;
            println!("password changed");
        }
        Commands::Mfa { code } => match manager.enable_mfa(&code) {
            Availability::Available(()) => println!("mfa enabled"),
            Availability::Unsupported { feature } => println!("{} is not available on this server", feature),
        },
        Commands::Publish { title, content, category, tags } => {
            let doc = NewDocument { title, content, category_id: category, tags };
            let created: Document = manager.api().post("/documents", Some(serde_json::to_value(&doc)?)).await?;
            println!("{} v{} {}", created.id, created.version, created.title);
        }
        Commands::Search { query } => {
            let path = format!("/documents/search?q={}", urlencoding::encode(&query));
            let hits: Vec<Document> = manager.api().get(&path).await?;
            for d in hits {
                println!("{}  {}  [{}]", d.id, d.title, d.tags.join(", "));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("warn"))?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(u) = &cli.url { config.base_url = u.clone(); }
    if let Some(f) = &cli.session_file { config.session_file = f.clone(); }
    if let Some(ms) = cli.timeout_ms { config.timeout = std::time::Duration::from_millis(ms); }
    let base_url = config.base_url.clone();
    let manager = Arc::new(client::connect(&config)?);
    let mut events = manager.session().subscribe();
    let outcome = run(cli, &manager).await;
    while let Ok(ev) = events.try_recv() {
        if ev == SessionEvent::LoginRequired {
            eprintln!("session expired; run `kbase-cli login` again");
        }
    }
    if let Err(e) = &outcome {
        if e.downcast_ref::<ApiError>().is_some_and(ApiError::is_network) {
            eprintln!("could not reach {}; check --url or KBASE_API_URL", base_url);
        }
    }
    outcome
}
