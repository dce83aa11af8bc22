#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::uninlined_format_args, clippy::module_name_repetitions)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use shelfchat::api::ApiClient;
use shelfchat::auth::SessionManager;
use shelfchat::chat::recent::RecentChats;
use shelfchat::chat::{ChatClient, ChatContext, CollectionRef, ContextFile};
use shelfchat::config::Config;
use shelfchat::nav::{NavDecision, NavigationGuard, Route};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "shelfchat")]
#[command(version)]
#[command(about = "Chat with your self-hosted document-chat server.", long_about = None)]
struct Cli {
    /// Server base URL (overrides config and SHELFCHAT_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and persist the session
    Login {
        /// Account email (prompted when omitted)
        #[arg(long)]
        email: Option<String>,
    },

    /// End the session and clear stored credentials
    Logout,

    /// Show session state and what the app would do on startup
    Status,

    /// List recent chats
    Chats {
        /// Filter by name or preview text
        #[arg(long)]
        search: Option<String>,
    },

    /// Create a new chat
    New {
        /// Chat name (server default used when omitted)
        name: Option<String>,
    },

    /// Delete a chat
    Delete { chat_id: String },

    /// Rename a chat
    Rename { chat_id: String, name: String },

    /// Send a prompt and stream the reply (Ctrl-C aborts the stream)
    Ask {
        prompt: String,

        /// Existing chat to continue; a new chat is created when omitted
        #[arg(long)]
        chat: Option<String>,

        /// Attach a local text file (repeatable)
        #[arg(long)]
        file: Vec<PathBuf>,

        /// Search a document collection, as ID:NAME
        #[arg(long)]
        collection: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to WARN
    // so stream output stays clean.
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let mut config = Config::load_or_init()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let api = ApiClient::from_config(&config)?;
    let session = SessionManager::new(api.clone());
    let chats = ChatClient::new(api.clone(), session.clone());

    match cli.command {
        Commands::Login { email } => login(&session, email).await,
        Commands::Logout => {
            session.logout().await;
            println!("Logged out.");
            Ok(())
        }
        Commands::Status => status(&api, &session).await,
        Commands::Chats { search } => list_chats(&chats, search.as_deref()).await,
        Commands::New { name } => {
            let created = chats.create_chat(name.as_deref()).await?;
            println!("{}  {}", created.chat_id, created.name);
            Ok(())
        }
        Commands::Delete { chat_id } => {
            chats.delete_chat(&chat_id).await?;
            println!("Deleted {chat_id}.");
            Ok(())
        }
        Commands::Rename { chat_id, name } => {
            let renamed = chats.rename_chat(&chat_id, &name).await?;
            println!("{}  {}", renamed.chat_id, renamed.name);
            Ok(())
        }
        Commands::Ask {
            prompt,
            chat,
            file,
            collection,
        } => ask(&chats, &prompt, chat, &file, collection.as_deref()).await,
    }
}

async fn login(session: &SessionManager, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => Input::new().with_prompt("Email").interact_text()?,
    };
    let password = Password::new().with_prompt("Password").interact()?;

    let state = session.login(&email, &password).await?;
    if state.is_admin {
        println!("Logged in as {email} (admin).");
    } else {
        println!("Logged in as {email}.");
    }
    Ok(())
}

async fn status(api: &ApiClient, session: &SessionManager) -> Result<()> {
    let guard = NavigationGuard::new(api.clone(), session.clone());
    let decision = guard.before_each(Route::Home).await;
    let state = session.snapshot();

    println!("server:        {}", api.base_url());
    println!("authenticated: {}", state.is_authenticated);
    println!("admin:         {}", state.is_admin);
    match decision {
        NavDecision::Allow => println!("startup view:  home"),
        NavDecision::Redirect(route) => println!("startup view:  {} (redirected)", route.name()),
    }
    Ok(())
}

async fn list_chats(chats: &ChatClient, search: Option<&str>) -> Result<()> {
    let entries = match search {
        Some(query) => chats.search_chats(query).await?,
        None => {
            // Same path the sidebar uses: capped, newest first.
            let recent = RecentChats::new();
            recent.fetch_recent_chats(chats).await;
            if let Some(err) = recent.last_error() {
                bail!("failed to load chats: {err}");
            }
            recent.entries()
        }
    };

    if entries.is_empty() {
        println!("No chats.");
        return Ok(());
    }
    for chat in entries {
        let count = chat
            .message_count
            .map_or_else(String::new, |n| format!(" ({n} messages)"));
        println!("{}  {}{}", chat.chat_id, chat.name, count);
        if let Some(preview) = chat.preview.filter(|p| !p.is_empty()) {
            println!("    {preview}");
        }
    }
    Ok(())
}

async fn ask(
    chats: &ChatClient,
    prompt: &str,
    chat: Option<String>,
    files: &[PathBuf],
    collection: Option<&str>,
) -> Result<()> {
    let context = build_context(files, collection)?;

    let chat_id = match chat {
        Some(id) => id,
        None => {
            let created = chats.create_chat(None).await?;
            eprintln!("(new chat {})", created.chat_id);
            created.chat_id
        }
    };

    // Ctrl-C aborts the stream instead of killing the process mid-write.
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    let result = chats
        .generate_stream_response(
            &chat_id,
            prompt,
            |chunk| {
                print!("{chunk}");
                let _ = stdout.flush();
            },
            || println!(),
            |err| eprintln!("\nstream error: {err}"),
            context,
            cancel,
        )
        .await;

    match result {
        Ok(()) => Ok(()),
        // Not reported through the error callback, so surface it here.
        Err(err @ shelfchat::ClientError::Unauthenticated) => Err(err.into()),
        // Already printed by the callback; just fail the process.
        Err(_) => std::process::exit(1),
    }
}

fn build_context(files: &[PathBuf], collection: Option<&str>) -> Result<Option<ChatContext>> {
    if files.is_empty() && collection.is_none() {
        return Ok(None);
    }

    let mut context = ChatContext::default();
    if !files.is_empty() {
        let mut attached = Vec::with_capacity(files.len());
        for path in files {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
            attached.push(ContextFile { name, content });
        }
        context.files = Some(attached);
    }
    if let Some(raw) = collection {
        let (id, name) = raw
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("--collection expects ID:NAME"))?;
        context.collection = Some(CollectionRef {
            id: id.to_string(),
            name: name.to_string(),
        });
    }
    Ok(Some(context))
}
