//! Buy assistant - terminal host
//!
//! Runs one conversation against stdin/stdout. Pass a conversation id to
//! resume it, or nothing to start a new one.

use buy_assistant::config::AppConfig;
use buy_assistant::conversation::Sender;
use buy_assistant::db::Database;
use buy_assistant::runtime::{
    ConversationHandle, DatabaseStorage, RuntimeError, RuntimeEvent, RuntimeManager,
};
use buy_assistant::workflow::{purchase_workflow, Event};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "Commands: /revise <step>, /cancel, /list, /help, /quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they don't interleave with the dialogue
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buy_assistant=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = AppConfig::from_env()?;

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let driver = purchase_workflow(config.countries.clone());
    tracing::info!(steps = ?driver.step_keys(), "Workflow ready");

    let manager = RuntimeManager::new(DatabaseStorage::new(db), driver)
        .with_record_rejected(config.record_rejected);

    let handle = match std::env::args().nth(1) {
        Some(id) => manager.get_or_create(&id).await?,
        None => manager.start_conversation().await?,
    };
    println!("Conversation {} ({HELP})", handle.id());

    let printer = tokio::spawn(print_events(handle.subscribe()));
    // Failures are reported through the event stream
    let _ = handle.send(Event::Advance).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !dispatch(&manager, &handle, line).await {
            break;
        }
    }

    manager.shutdown().await;
    printer.abort();
    Ok(())
}

/// Handle one line of input. Returns false when the user is done.
async fn dispatch(
    manager: &RuntimeManager<DatabaseStorage>,
    handle: &ConversationHandle,
    line: &str,
) -> bool {
    let event = match line {
        "/quit" | "/exit" => return false,
        "/help" => {
            println!("{HELP}");
            return true;
        }
        "/list" => {
            match manager.list().await {
                Ok(conversations) => {
                    for c in conversations {
                        println!(
                            "{}  {}  {}  {} messages",
                            c.id, c.status, c.order_status, c.message_count
                        );
                    }
                }
                Err(e) => println!("! {e}"),
            }
            return true;
        }
        "/cancel" => Event::Cancel,
        _ => match line.strip_prefix("/revise") {
            Some(step) => Event::revise(step.trim()),
            None => Event::user_input(line),
        },
    };

    // Rejections and workflow errors are reported through the event stream
    if let Err(RuntimeError::Closed) = handle.send(event).await {
        println!("! {}", RuntimeError::Closed);
        return false;
    }
    true
}

async fn print_events(mut rx: broadcast::Receiver<RuntimeEvent>) {
    loop {
        match rx.recv().await {
            Ok(RuntimeEvent::Message { message }) => match message.sender {
                Sender::Bot => println!("assistant> {}", message.text),
                Sender::System => println!("  [{}]", message.text),
                Sender::User => {}
            },
            Ok(RuntimeEvent::StatusChange {
                status,
                order_status,
            }) => println!("  [status: {status}, order: {order_status}]"),
            Ok(RuntimeEvent::Rejected { reason, prompt, .. }) => {
                println!("assistant> {reason}");
                if let Some(question) = prompt.last() {
                    println!("assistant> {question}");
                }
            }
            Ok(RuntimeEvent::Error { message }) => println!("! {message}"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
