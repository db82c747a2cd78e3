//! taskdesk CLI
//!
//! A thin terminal front-end over the client core: sign in, dump the
//! workspace snapshot, and tail the change feed. Rendering stays minimal;
//! the point of the binary is exercising the client end to end.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use taskdesk::backend::{AuthApi, AuthSession, ChangeFeed, http::HttpBackend};
use taskdesk::client::Client;
use taskdesk::config::BackendConfig;
use taskdesk::realtime::{ChangeOp, ChangeTable};
use taskdesk::store::{FileStore, LocalStore};
use taskdesk::types::TaskStatus;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Store key holding the persisted auth session between invocations.
const SESSION_KEY: &str = "auth_session";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the backend configuration without touching the network
    Check,

    /// Create an account and its workspace
    Signup {
        #[arg(long)]
        email: String,
        /// Your display name
        #[arg(long)]
        name: String,
        /// Name for the new workspace
        #[arg(long)]
        workspace: String,
        /// Password (falls back to TASKDESK_PASSWORD)
        #[arg(long)]
        password: Option<String>,
    },

    /// Sign in and persist the session for later commands
    Login {
        #[arg(long)]
        email: String,
        /// Password (falls back to TASKDESK_PASSWORD)
        #[arg(long)]
        password: Option<String>,
    },

    /// Sign out and forget the persisted session
    Logout,

    /// Print the workspace's tasks with badge state
    Tasks,

    /// Tail the change feed, applying each event to the local snapshot
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match BackendConfig::load() {
        Ok(config) => config,
        Err(err) => {
            // Configuration problems block everything; print the remedy and stop.
            eprintln!("{err}");
            eprintln!(
                "Set {} and {}, or create {}.",
                taskdesk::config::ENV_URL,
                taskdesk::config::ENV_API_KEY,
                BackendConfig::default_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "the config file".to_string()),
            );
            std::process::exit(2);
        }
    };

    if matches!(cli.command, Command::Check) {
        println!("configuration OK ({})", config.base_url);
        return Ok(());
    }

    let bucket = config.attachments_bucket.clone();
    let backend = Arc::new(HttpBackend::new(config)?);
    let store: Arc<dyn LocalStore> = Arc::new(FileStore::open_default());
    restore_persisted_session(&backend, store.as_ref());
    let client = Arc::new(Client::new(backend.clone(), store.clone()).with_attachments_bucket(bucket));

    match cli.command {
        Command::Check => unreachable!("handled above"),
        Command::Signup {
            email,
            name,
            workspace,
            password,
        } => {
            let password = resolve_password(password)?;
            match client.sign_up(&email, &password, &name, &workspace).await? {
                Some(user) => {
                    persist_session(&backend, store.as_ref()).await?;
                    println!("workspace ready; signed in as {} ({})", user.name, user.email);
                }
                None => println!("check your inbox: confirm the address, then run `taskdesk login`"),
            }
        }
        Command::Login { email, password } => {
            let password = resolve_password(password)?;
            let user = client.sign_in(&email, &password).await?;
            persist_session(&backend, store.as_ref()).await?;
            println!(
                "signed in as {} ({}), workspace {}",
                user.name,
                user.role.as_str(),
                client
                    .workspace()
                    .map(|w| w.name)
                    .unwrap_or_else(|| user.workspace_id.clone()),
            );
        }
        Command::Logout => {
            client.sign_out().await?;
            store.remove(SESSION_KEY);
            println!("signed out");
        }
        Command::Tasks => {
            client
                .load_session()
                .await
                .context("session expired; run `taskdesk login`")?
                .context("not signed in; run `taskdesk login`")?;
            print_tasks(&client);
        }
        Command::Watch => {
            let user = client
                .load_session()
                .await
                .context("session expired; run `taskdesk login`")?
                .context("not signed in; run `taskdesk login`")?;
            println!("watching workspace {} (ctrl-c to stop)", user.workspace_id);
            let mut rx = backend.subscribe(&user.workspace_id).await?;
            while let Some(event) = rx.recv().await {
                let applied = client.apply_event(&event);
                println!("{} {}", describe_event(&event), if applied { "" } else { "(ignored)" });
            }
        }
    }

    Ok(())
}

fn resolve_password(flag: Option<String>) -> Result<String> {
    if let Some(password) = flag {
        return Ok(password);
    }
    match std::env::var("TASKDESK_PASSWORD") {
        Ok(password) if !password.is_empty() => Ok(password),
        _ => bail!("pass --password or set TASKDESK_PASSWORD"),
    }
}

fn restore_persisted_session(backend: &HttpBackend, store: &dyn LocalStore) {
    if let Some(raw) = store.get(SESSION_KEY) {
        match serde_json::from_str::<AuthSession>(&raw) {
            Ok(session) => backend.restore_session(session),
            Err(err) => tracing::warn!(error = %err, "ignoring unreadable persisted session"),
        }
    }
}

async fn persist_session(backend: &HttpBackend, store: &dyn LocalStore) -> Result<()> {
    if let Some(session) = backend.session().await? {
        store.set(SESSION_KEY, &serde_json::to_string(&session)?);
    }
    Ok(())
}

fn print_tasks(client: &Client) {
    let tasks = client.tasks();
    if tasks.is_empty() {
        println!("no tasks");
        return;
    }
    let now = chrono::Utc::now();
    for task in tasks {
        let mut flags = Vec::new();
        if client.is_task_new(&task.id) {
            flags.push("new".to_string());
        }
        let unread = client.unread_count(&task.id);
        if unread > 0 {
            flags.push(format!("{unread} unread"));
        }
        if task.is_overdue(now) {
            flags.push("overdue".to_string());
        }
        let status = match task.status {
            TaskStatus::NotStarted => " ",
            TaskStatus::InProgress => "~",
            TaskStatus::Completed => "x",
        };
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", flags.join(", "))
        };
        println!(
            "[{status}] {}  {} due {}{}",
            task.title,
            task.priority.as_str(),
            task.due_date.format("%Y-%m-%d"),
            flags
        );
    }
}

fn describe_event(event: &taskdesk::realtime::ChangeEvent) -> String {
    let op = match event.op {
        ChangeOp::Insert => "insert",
        ChangeOp::Update => "update",
        ChangeOp::Delete => "delete",
    };
    let table = match event.table {
        ChangeTable::Tasks => "task",
        ChangeTable::Comments => "comment",
    };
    let id = event
        .new
        .get("id")
        .or_else(|| event.old.get("id"))
        .and_then(|v| v.as_str())
        .unwrap_or("?");
    format!("{table} {op} {id}")
}
