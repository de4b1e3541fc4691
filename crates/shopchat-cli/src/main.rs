use anyhow::Result;
use clap::{Parser, Subcommand};
use shopchat_core::transport::memory::InMemoryBackend;
use shopchat_core::{
    ChatSession, CoreConfig, Draft, Media, Message, MessageType, PeerKey, RealtimeChannel,
    SenderType, StoreInfo,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shopchat")]
#[command(about = "Conversation sync core driven against the in-memory backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted customer/store exchange and print the resulting
    /// conversation list after each step
    Demo,

    /// Print the persisted anonymous visitor id
    VisitorId,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo => run_demo().await,
        Commands::VisitorId => {
            let config = CoreConfig::default();
            let id = shopchat_core::visitor::load_or_create_visitor_id(&config.data_dir);
            println!("{}", id);
            Ok(())
        }
    }
}

fn store_message(store_id: &str, created_at: u64, content: &str) -> Message {
    Message {
        id: format!("{}-{}", store_id, created_at),
        sender_id: store_id.to_string(),
        sender_type: SenderType::Store,
        content: content.to_string(),
        message_type: MessageType::Text,
        media: Media::default(),
        created_at,
        read: false,
    }
}

fn print_list(label: &str, session: &ChatSession) {
    println!("--- {} ---", label);
    for conversation in session.conversations() {
        println!(
            "{:<24} [{}] {:>2} unread  {}",
            conversation.store_name,
            conversation.last_message_time,
            conversation.unread_count,
            conversation.last_message,
        );
    }
    println!();
}

async fn run_demo() -> Result<()> {
    let backend = InMemoryBackend::new();
    backend.register_store(StoreInfo {
        store_id: "store-alpha".into(),
        name: "Alpha Goods".into(),
        avatar_url: None,
    });
    backend.register_store(StoreInfo {
        store_id: "store-beta".into(),
        name: "Beta Wares".into(),
        avatar_url: None,
    });

    let alpha = PeerKey::new("cust-demo", "store-alpha");
    let beta = PeerKey::new("cust-demo", "store-beta");
    backend.seed_messages(&alpha, vec![store_message("store-alpha", 1_000, "Welcome!")]);
    backend.seed_messages(&beta, vec![store_message("store-beta", 2_000, "New stock in.")]);

    let mut session = ChatSession::new(
        "cust-demo",
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
    );

    session.load_conversation_list().await?;
    print_list("after list load", &session);

    session.open_conversation(&alpha).await?;
    *session.draft_mut() = Draft::text("Do you ship overseas?");
    session.send_message().await?;
    print_list("after sending to Alpha Goods", &session);

    // Store replies while Alpha is open: no unread accumulates there
    backend
        .append_message(
            &alpha,
            &store_message("store-alpha", 3_000, "Yes, worldwide."),
        )
        .await?;
    // Beta replies while unselected: one unread
    backend
        .append_message(&beta, &store_message("store-beta", 4_000, "Sale ends today!"))
        .await?;
    print_list("after store replies", &session);

    println!("total unread: {}", session.total_unread());
    session.leave_conversation_list();
    Ok(())
}
