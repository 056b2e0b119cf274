use std::fs;
use std::io::Read;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use chatbridge::api::BridgeClient;
use chatbridge::config::Config;
use chatbridge::media::MediaResolver;
use chatbridge::models::{ChatFilter, SessionState};
use chatbridge::outbox::MessageChannel;
use chatbridge::output::{
    ChatListOutput, MessageListOutput, StatusOutput, print_chat_list, print_json, print_messages,
    print_status,
};
use chatbridge::session::{SessionController, SessionEvent};
use chatbridge::sync::ChatSyncEngine;

#[derive(Parser)]
#[command(
    name = "chatbridge",
    version,
    about = "Gateway bridge CLI",
    after_help = "Examples:\n  chatbridge status\n  chatbridge connect\n  chatbridge chats list --no-groups\n  chatbridge chats list --query ana\n  chatbridge messages list --chat-id 5511999990000@c.us\n  chatbridge send --chat-id 5511999990000@c.us --text \"hello\"\n  chatbridge read --chat-id 5511999990000@c.us"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, help = "Output JSON instead of a table")]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Print the resolved configuration")]
    Doctor,
    #[command(about = "Show current session status")]
    Status,
    #[command(about = "Run the session until interrupted, writing QR refreshes to disk")]
    Connect,
    #[command(about = "Stop the remote session")]
    Stop,
    #[command(about = "List chats")]
    Chats {
        #[command(subcommand)]
        command: ChatsCommand,
    },
    #[command(about = "Read message history")]
    Messages {
        #[command(subcommand)]
        command: MessagesCommand,
    },
    #[command(about = "Send a text message")]
    Send(SendArgs),
    #[command(about = "Mark a chat as read")]
    Read(ReadArgs),
}

#[derive(Subcommand)]
enum ChatsCommand {
    #[command(about = "List chats with unread counts")]
    List(ChatsListArgs),
}

#[derive(Args)]
struct ChatsListArgs {
    #[arg(long, help = "Case-insensitive name or id filter")]
    query: Option<String>,

    #[arg(long, help = "Hide group chats")]
    no_groups: bool,
}

#[derive(Subcommand)]
enum MessagesCommand {
    #[command(about = "List messages for a chat, oldest first")]
    List(MessagesListArgs),
}

#[derive(Args)]
struct MessagesListArgs {
    #[arg(long, help = "Chat id")]
    chat_id: String,
}

#[derive(Args)]
struct SendArgs {
    #[arg(long, help = "Chat id")]
    chat_id: String,

    #[arg(long, help = "Message text")]
    text: Option<String>,

    #[arg(long, help = "Read message text from stdin")]
    stdin: bool,
}

#[derive(Args)]
struct ReadArgs {
    #[arg(long, help = "Chat id")]
    chat_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DoctorOutput {
    api_base_url: String,
    session: String,
    api_key_set: bool,
    data_dir: String,
    qr_path: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    if let Err(error) = run().await {
        eprintln!("{error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load();
    let api = BridgeClient::new(
        config.base_url.clone(),
        config.session.clone(),
        config.api_key.clone(),
    );
    let resolver = Arc::new(MediaResolver::new(config.base_url.clone()));
    let sync = ChatSyncEngine::new(api.clone(), resolver);

    match cli.command {
        Command::Doctor => {
            let output = DoctorOutput {
                api_base_url: config.base_url.clone(),
                session: config.session.clone(),
                api_key_set: config.api_key.is_some(),
                data_dir: config.data_dir.display().to_string(),
                qr_path: config.qr_path.display().to_string(),
            };
            print_json(&output)?;
        }
        Command::Status => {
            let state = match api.session_status().await? {
                Some(response) => response.session_state(),
                None => SessionState::Stopped,
            };
            print_status(
                &StatusOutput {
                    session: config.session.clone(),
                    state,
                },
                cli.json,
            )?;
        }
        Command::Connect => {
            handle_connect(api, sync, &config).await?;
        }
        Command::Stop => {
            api.stop_session().await?;
            println!("Session {} stopped.", config.session);
        }
        Command::Chats {
            command: ChatsCommand::List(args),
        } => {
            sync.load_chats().await?;
            let filter = ChatFilter {
                hide_groups: args.no_groups,
                query: args.query,
            };
            print_chat_list(
                &ChatListOutput {
                    items: sync.chats(&filter),
                },
                cli.json,
            )?;
        }
        Command::Messages {
            command: MessagesCommand::List(args),
        } => {
            let items = sync.load_messages(&args.chat_id).await?;
            print_messages(
                &MessageListOutput {
                    chat_id: args.chat_id,
                    items,
                },
                cli.json,
            )?;
        }
        Command::Send(args) => {
            let text = message_text(args.text, args.stdin)?;
            let channel = MessageChannel::new(api, sync);
            let message = channel.send_text(&args.chat_id, &text).await?;
            println!("Sent {} to {}.", message.id, args.chat_id);
        }
        Command::Read(args) => {
            sync.mark_read(&args.chat_id).await;
            println!("Marked {} as read.", args.chat_id);
        }
    }
    Ok(())
}

async fn handle_connect(
    api: BridgeClient,
    sync: ChatSyncEngine,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let controller = SessionController::new(api, sync);
    let mut events = controller.subscribe();
    controller.request_start().await?;
    println!("Monitoring session {} (Ctrl-C to exit).", config.session);

    loop {
        match events.recv().await {
            Ok(SessionEvent::QrRefreshed) => {
                if let Some(image) = controller.qr_image() {
                    if let Some(parent) = config.qr_path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&config.qr_path, &image.bytes)?;
                    println!("Scan the QR code at {}", config.qr_path.display());
                }
            }
            Ok(SessionEvent::Connected { identity }) => match identity {
                Some(identity) => println!("Connected as {identity}."),
                None => println!("Connected."),
            },
            Ok(SessionEvent::Disconnected) => {
                println!("Connection dropped, reconnecting shortly.");
            }
            Ok(SessionEvent::Failed) => {
                println!("Session failed. Run `chatbridge connect` again to retry.");
            }
            Ok(SessionEvent::Stopped) => {
                println!("Session stopped.");
                return Ok(());
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

fn message_text(text: Option<String>, stdin: bool) -> Result<String, Box<dyn std::error::Error>> {
    if stdin {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        let trimmed = buffer.trim().to_string();
        if trimmed.is_empty() {
            return Err("stdin was empty".into());
        }
        return Ok(trimmed);
    }
    match text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err("provide --text or --stdin".into()),
    }
}
