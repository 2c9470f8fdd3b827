use std::sync::Arc;

use anyhow::Result;
use chat_core::{
    load_settings, ChatStore, ConversationTarget, GroupMessenger, HttpMessageApi,
    NewOutgoingMessage, RealtimeConnector, StaticSession,
};
use clap::Parser;
use shared::domain::{GroupId, MessageKind, UserId};
use tracing::info;

#[derive(Parser, Debug)]
struct Args {
    /// Authenticated user id for this session.
    #[arg(long)]
    user: String,
    /// Bearer credential attached to the transport handshake and REST calls.
    #[arg(long)]
    token: String,
    /// Direct recipient for a demo message.
    #[arg(long)]
    recipient: Option<String>,
    /// Group to send the demo message to instead of a direct recipient.
    #[arg(long)]
    group: Option<String>,
    #[arg(long, default_value = "hello from the cli")]
    message: String,
    /// REST endpoint for history and group persistence.
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    api_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();
    let settings = load_settings();

    let store = ChatStore::new(args.user.as_str());
    let session = Arc::new(StaticSession::new(args.user.as_str(), args.token));
    let connector = RealtimeConnector::new(Arc::clone(&store), session.clone(), settings);
    let groups = GroupMessenger::new(
        Arc::clone(&store),
        Arc::new(HttpMessageApi::new(args.api_url)),
        Arc::clone(&connector),
        session,
    );

    connector.connect().await;
    let status = connector.status();
    info!(status = ?*status.borrow(), "connector ready");

    if let Some(recipient) = args.recipient {
        let recipient = UserId::from(recipient.as_str());
        let message = store
            .add_local_message(NewOutgoingMessage {
                target: ConversationTarget::Direct {
                    recipient: recipient.clone(),
                },
                content: args.message.clone(),
                kind: MessageKind::Text,
                metadata: None,
            })
            .await?;
        connector.send_direct(&recipient, &message).await;
        println!("queued {} -> {recipient} ({:?})", message.id, message.status);
    } else if let Some(group) = args.group {
        let group = GroupId::from(group.as_str());
        match groups.send(&group, &args.message, MessageKind::Text).await {
            Ok(message) => println!("queued {} -> group {group}", message.id),
            // the optimistic append survives; only persistence failed
            Err(err) => eprintln!("group send not persisted: {err}"),
        }
    }

    for conversation in store.conversations().await {
        println!(
            "{}  unread={}  last={}",
            conversation.id,
            conversation.unread_count,
            conversation
                .last_message
                .map(|m| m.content)
                .unwrap_or_default()
        );
    }

    connector.disconnect().await;
    Ok(())
}
