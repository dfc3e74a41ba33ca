use anyhow::{anyhow, bail, Context};
use chatline_client::{
    ChatApi, ChatClient, ClientConfig, DeleteScope, HttpChatApi, Identity, MessageId, UserId,
    UserSummary, WsConnector,
};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatline")]
#[command(about = "Terminal direct-messaging client")]
struct Cli {
    /// REST base URL (overrides CHATLINE_API_URL)
    #[arg(long)]
    api: Option<String>,

    /// Socket URL (overrides CHATLINE_WS_URL)
    #[arg(long)]
    ws: Option<String>,

    /// Bearer token; falls back to CHATLINE_TOKEN
    #[arg(short, long)]
    token: Option<String>,

    /// Open the conversation with this user id on start
    #[arg(short, long)]
    peer: Option<u64>,
}

const HELP: &str = "\
/list                     conversations
/search <name>            find users
/open <user-id>           open a conversation
/show                     print the open conversation
/edit <msg-id> <text>     edit one of your messages
/del <msg-id> [all]       delete a message for you (or everyone)
/delchat <user-id> [all]  delete a conversation
/quit                     log out
anything else             send to the open conversation";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(api) = cli.api {
        config.api_base_url = api;
    }
    if let Some(ws) = cli.ws {
        config.ws_url = ws;
    }
    let token = cli
        .token
        .or_else(|| std::env::var("CHATLINE_TOKEN").ok())
        .context("no token: pass --token or set CHATLINE_TOKEN")?;

    let api = Arc::new(HttpChatApi::new(config.clone(), token.clone())?);
    let me = api.me().await.context("could not load profile")?;
    info!("Signed in as {} ({})", me.username, me.id);

    let connector = Arc::new(WsConnector::new(config.outbound_buffer));
    let client = ChatClient::start(api, connector, config, Identity::new(me.clone(), token)).await?;
    println!("signed in as {} - /help for commands", me.username);

    let notices = client.notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            println!("! {}", notice.message);
        }
    });

    let mut state = client.watch_connection();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow();
            println!("* connection: {:?}", current);
        }
    });

    if let Some(peer) = cli.peer {
        open(&client, UserId(peer)).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = run_command(&client, line).await {
            println!("! {}", e);
        }
    }

    client.logout();
    Ok(())
}

async fn run_command(client: &ChatClient, line: &str) -> anyhow::Result<()> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "/help" => println!("{}", HELP),
        "/list" => {
            for c in client.conversations() {
                let preview = c
                    .last_message
                    .as_ref()
                    .map(|m| m.content.as_str())
                    .unwrap_or("");
                let online = if c.user.online { "*" } else { " " };
                println!(
                    "{}{:>6} {:<16} ({}) {}",
                    online, c.user.id, c.user.username, c.unread_count, preview
                );
            }
        }
        "/search" => {
            for user in client.search_users(rest).await? {
                println!("{:>6} {}", user.id, user.username);
            }
        }
        "/open" => open(client, UserId(parse_id(rest)?)).await?,
        "/show" => show(client),
        "/edit" => {
            let (id, text) = rest.split_once(' ').ok_or_else(|| anyhow!("usage: /edit <msg-id> <text>"))?;
            client
                .edit_message(MessageId::Server(parse_id(id)?), text)
                .await?;
            show(client);
        }
        "/del" => {
            let (id, scope) = parse_target(rest)?;
            client.delete_message(MessageId::Server(id), scope).await?;
            show(client);
        }
        "/delchat" => {
            let (peer, scope) = parse_target(rest)?;
            client.delete_conversation(UserId(peer), scope).await?;
        }
        other if other.starts_with('/') => bail!("unknown command {}, try /help", other),
        _ => {
            client.send_message(line, None).await?;
        }
    }
    Ok(())
}

async fn open(client: &ChatClient, peer: UserId) -> anyhow::Result<()> {
    let user = client
        .index()
        .get(peer)
        .map(|c| c.user)
        .unwrap_or_else(|| UserSummary::placeholder(peer));
    client.open_conversation(user).await?;
    show(client);
    Ok(())
}

fn show(client: &ChatClient) {
    let viewer = client.viewer();
    for m in client.visible_messages() {
        let who = if m.sender_id == viewer { "me" } else { "them" };
        let reply = m
            .reply_to
            .as_ref()
            .map(|r| format!(" (re: {})", r.content))
            .unwrap_or_default();
        println!(
            "[{}] {} {}: {}{}",
            m.id,
            m.created_at.format("%H:%M"),
            who,
            m.content,
            reply
        );
    }
}

fn parse_id(text: &str) -> anyhow::Result<u64> {
    text.trim()
        .parse()
        .with_context(|| format!("not an id: {:?}", text))
}

fn parse_target(rest: &str) -> anyhow::Result<(u64, DeleteScope)> {
    let mut parts = rest.split_whitespace();
    let id = parse_id(parts.next().unwrap_or(""))?;
    let scope = match parts.next() {
        Some("all") => DeleteScope::All,
        None | Some("me") => DeleteScope::Me,
        Some(other) => bail!("unknown scope {}", other),
    };
    Ok((id, scope))
}
