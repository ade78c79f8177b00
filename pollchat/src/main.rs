//! `PollChat`: headless client for a polled two-party chat.
//!
//! Signs in with a backend-issued token, lists contacts, and keeps the
//! selected conversation in sync. Lines typed on stdin are sent; lines
//! starting with `/` are commands. Logs go to a file so stdout carries only
//! the transcript.
//!
//! ```bash
//! cargo run --bin pollchat -- --base-url http://127.0.0.1:8080 \
//!     --token alice-token --user-id 1 --username alice --peer 2
//! ```

use std::collections::HashSet;
use std::io;
use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use pollchat::client::ChatClient;
use pollchat::config::{CliArgs, ClientConfig};
use pollchat::event::SyncEvent;
use pollchat::outbound::SendOutcome;
use pollchat::session::SessionStatus;
use pollchat::transport::http::HttpTransport;
use pollchat_proto::ids::{MessageId, UserId};
use pollchat_proto::message::Message;

const TIMESTAMP_FORMAT: &str = "%H:%M";

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(base_url = %config.base_url, "pollchat starting");

    let Some(session) = config.session() else {
        eprintln!("A session needs --token, --user-id and --username (or their env/config equivalents).");
        return Ok(());
    };

    let transport = match HttpTransport::new(&config.base_url) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Cannot use base URL {}: {e}", config.base_url);
            return Ok(());
        }
    };

    let (client, events) = ChatClient::new(transport, config.sync);
    match client.begin_session(session).await {
        SessionStatus::Expired => {
            eprintln!("The backend rejected the session token.");
            return Ok(());
        }
        SessionStatus::Unverified => println!("* backend unreachable, continuing offline"),
        SessionStatus::Valid | SessionStatus::Missing => {}
    }

    if !config.search.is_empty()
        && let Err(e) = client.search_contacts(&config.search).await
    {
        println!("! contact search failed: {e}");
    }
    print_contacts(&client);

    if let Some(peer) = config.peer {
        open_peer(&client, UserId::new(peer)).await;
    }

    let result = run(&client, events).await;
    client.shutdown().await;
    tracing::info!("pollchat exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("pollchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Read stdin and sync events until EOF, `/quit` or Ctrl-C.
async fn run(
    client: &ChatClient<HttpTransport>,
    mut events: tokio::sync::mpsc::Receiver<SyncEvent>,
) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed: HashSet<MessageId> = HashSet::new();
    print_new_messages(client, &mut printed);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                if !handle_line(client, &line, &mut printed).await {
                    return Ok(());
                }
            }
            Some(event) = events.recv() => {
                handle_event(client, event, &mut printed);
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

/// Returns `false` when the user asked to quit.
async fn handle_line(
    client: &ChatClient<HttpTransport>,
    line: &str,
    printed: &mut HashSet<MessageId>,
) -> bool {
    let trimmed = line.trim();
    let (command, arg) = trimmed.split_once(' ').unwrap_or((trimmed, ""));

    match command {
        "/quit" => return false,
        "/contacts" => print_contacts(client),
        "/search" => match client.search_contacts(arg.trim()).await {
            Ok(_) => print_contacts(client),
            Err(e) => println!("! search failed: {e}"),
        },
        "/more" => match client.load_more_contacts().await {
            Ok(_) => print_contacts(client),
            Err(e) => println!("! loading contacts failed: {e}"),
        },
        "/older" => match client.load_older_messages().await {
            Ok(n) => println!("* loaded {n} older messages"),
            Err(e) => println!("! loading history failed: {e}"),
        },
        "/peer" => match arg.trim().parse::<i64>() {
            Ok(id) => {
                printed.clear();
                open_peer(client, UserId::new(id)).await;
                print_new_messages(client, printed);
            }
            Err(_) => println!("! usage: /peer <user id>"),
        },
        "/whois" => match arg.trim().parse::<i64>() {
            Ok(id) => print_contact(client, UserId::new(id)),
            Err(_) => println!("! usage: /whois <user id>"),
        },
        _ => match client.submit(line).await {
            Ok(SendOutcome::Confirmed { .. }) => print_new_messages(client, printed),
            Ok(SendOutcome::Failed(warning)) => println!("! {warning} (draft kept)"),
            Err(e) => println!("! {e}"),
        },
    }
    true
}

fn handle_event(
    client: &ChatClient<HttpTransport>,
    event: SyncEvent,
    printed: &mut HashSet<MessageId>,
) {
    match event {
        SyncEvent::MessagesMerged { .. } | SyncEvent::ConversationLoaded { .. } => {
            print_new_messages(client, printed);
        }
        SyncEvent::SessionInvalidated => println!("! session expired, sign in again"),
        SyncEvent::PollFailed { error } => tracing::debug!(error = %error, "background poll failed"),
        SyncEvent::MessageConfirmed { .. }
        | SyncEvent::MessageRolledBack { .. }
        | SyncEvent::ContactsUpdated { .. } => {}
    }
}

async fn open_peer(client: &ChatClient<HttpTransport>, peer: UserId) {
    let name = client
        .directory()
        .get(peer)
        .map_or_else(|| format!("user {peer}"), |u| u.username);
    match client.select_peer(peer).await {
        Ok(n) => println!("* chatting with {name} ({n} recent messages)"),
        Err(e) => println!("! could not open conversation with {name}: {e}"),
    }
}

fn print_contacts(client: &ChatClient<HttpTransport>) {
    let contacts = client.contacts();
    if contacts.is_empty() {
        println!("* no contacts");
        return;
    }
    for user in contacts {
        let unread = if user.unread_count > 0 {
            format!(" [{} unread]", user.unread_count)
        } else {
            String::new()
        };
        println!(
            "  {:>5}  {} ({}){unread}",
            user.id.get(),
            user.username,
            user.presence.status()
        );
    }
}

fn print_contact(client: &ChatClient<HttpTransport>, id: UserId) {
    let Some(user) = client.directory().get(id) else {
        println!("! user {id} is not in the contact list");
        return;
    };
    println!("  {} ({})", user.username, user.presence.status());
    let base = client.transport().base_url();
    if let Some(url) = user.avatar_url(base.as_str()) {
        println!("  avatar: {url}");
    }
}

/// Print confirmed messages not shown yet, in display order.
fn print_new_messages(client: &ChatClient<HttpTransport>, printed: &mut HashSet<MessageId>) {
    for message in client.messages() {
        if message.id.is_confirmed() && printed.insert(message.id) {
            println!("{}", format_message(&message));
        }
    }
}

fn format_message(message: &Message) -> String {
    let time = message
        .created_at
        .as_datetime()
        .with_timezone(&chrono::Local)
        .format(TIMESTAMP_FORMAT);
    format!("[{time}] {}: {}", message.sender.username, message.body)
}
