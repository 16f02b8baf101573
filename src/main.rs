use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::time::timeout;

use matchstick::grouping::Grouped;
use matchstick::names::AnonymousNames;
use matchstick::side_channel::ROOM_KEY_ENV;
use matchstick::{
    format_time_remaining, is_urgent, CryptoCodec, EnvKeyTransport, FileKeyTransport, KeyManager,
    KeyTransport, MemoryRoomServer, MessageBody, Opened, OpenedMessage, RoomClient, RoomHandle,
    RoomKey, RoomLink, RoomServer, RoomUpdate, SessionConfig,
};

#[derive(Parser, Debug)]
#[command(name = "matchstick")]
#[command(version)]
#[command(about = "End-to-end encrypted chat rooms that burn down")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh room key
    Keygen,
    /// Seal a message into an `<iv>:<ciphertext>` envelope
    Seal {
        text: String,
        /// Read the key from this file instead of the environment
        #[arg(long)]
        key_file: Option<PathBuf>,
    },
    /// Open an envelope produced by `seal`
    Open {
        envelope: String,
        #[arg(long)]
        key_file: Option<PathBuf>,
    },
    /// Run two participants against an in-process server
    Demo {
        #[arg(long, default_value = "https://matchstick.local")]
        base: String,
        /// Room lifetime in seconds
        #[arg(long, default_value_t = 30)]
        ttl: u64,
        /// JSON file with session timings
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overrides the TTL poll interval
        #[arg(long, env = "MATCHSTICK_POLL_MS")]
        poll_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    match Cli::parse().command {
        Command::Keygen => {
            let key = KeyManager::default().generate()?;
            println!("{key}");
        }
        Command::Seal { text, key_file } => {
            let key = load_key(key_file)?;
            let envelope = CryptoCodec::default().seal(&text, &key)?;
            println!("{envelope}");
        }
        Command::Open { envelope, key_file } => {
            let key = load_key(key_file)?;
            match CryptoCodec::default().open(&envelope, Some(&key)) {
                Opened::Plaintext(text) => println!("{text}"),
                Opened::DecryptionFailed | Opened::KeyAbsent => {
                    return Err("unable to decrypt message".into());
                }
            }
        }
        Command::Demo {
            base,
            ttl,
            config,
            poll_ms,
        } => {
            let mut config = match config {
                Some(path) => SessionConfig::from_json(&std::fs::read_to_string(path)?)?,
                None => SessionConfig::default(),
            };
            if let Some(poll_ms) = poll_ms {
                config.poll_interval_ms = poll_ms;
            }
            demo(&base, ttl, config).await?;
        }
    }

    Ok(())
}

fn load_key(key_file: Option<PathBuf>) -> Result<RoomKey, Box<dyn Error>> {
    let candidate = match key_file {
        Some(path) => FileKeyTransport::new(path).read(),
        None => EnvKeyTransport::default().read(),
    };
    let candidate =
        candidate.ok_or_else(|| format!("no room key: set {ROOM_KEY_ENV} or pass --key-file"))?;
    Ok(KeyManager::validate(&candidate)?)
}

async fn demo(base: &str, ttl: u64, config: SessionConfig) -> Result<(), Box<dyn Error>> {
    let server = Arc::new(MemoryRoomServer::new());
    let room_id = server.create_room(Some(Duration::from_secs(ttl))).await?;
    let key = KeyManager::default().generate()?;
    let link = RoomLink::share(base, &room_id, &key)?;

    println!("Share this link: {}", link.as_str());
    println!("The server only ever sees: {}", link.without_fragment());

    let client = RoomClient::new(Arc::clone(&server)).with_config(config);
    let mut host = client.join(&room_id, &link, &AnonymousNames::new()).await?;

    let received = RoomLink::parse(link.as_str())?;
    let mut guest = client
        .join(received.room_id(), &received, &AnonymousNames::new())
        .await?;
    info!("{} and {} joined {}", host.display_name(), guest.display_name(), room_id);

    host.send("is this thing on?")?;
    wait_for_messages(&mut guest, 1).await;
    guest.send("loud and clear")?;
    if let Some(history) = wait_for_messages(&mut host, 2).await {
        print_history(&history);
    }

    println!("Destroying the room...");
    host.destroy()?;
    while let Ok(Some(update)) = timeout(Duration::from_secs(5), guest.next_update()).await {
        if let RoomUpdate::Redirect(redirect) = update {
            println!("{} was sent to {}", guest.display_name(), redirect.path());
            break;
        }
    }

    host.leave().await;
    guest.leave().await;
    Ok(())
}

async fn wait_for_messages(
    handle: &mut RoomHandle,
    count: usize,
) -> Option<Vec<Grouped<OpenedMessage>>> {
    loop {
        match timeout(Duration::from_secs(5), handle.next_update()).await {
            Ok(Some(RoomUpdate::Messages { messages, .. })) if messages.len() >= count => {
                return Some(messages);
            }
            Ok(Some(RoomUpdate::Ttl(seconds))) => {
                let marker = if is_urgent(seconds) { " (hurry)" } else { "" };
                println!("[{}] {}{}", handle.display_name(), format_time_remaining(seconds), marker);
            }
            Ok(Some(RoomUpdate::Redirect(redirect))) => {
                warn!("{} left early: {}", handle.display_name(), redirect);
                return None;
            }
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return None,
        }
    }
}

fn print_history(history: &[Grouped<OpenedMessage>]) {
    for grouped in history {
        if grouped.is_first_in_group {
            println!("{}:", grouped.message.sender);
        }
        match &grouped.message.body {
            MessageBody::Readable(text) => println!("  {text}"),
            MessageBody::Unreadable => println!("  [unable to decrypt]"),
            MessageBody::Locked => println!("  [locked]"),
        }
    }
}
