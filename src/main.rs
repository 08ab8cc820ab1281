//! Boardlink demo binary.
//!
//! # Usage
//!
//! ```bash
//! # Host a table with the reference rules
//! boardlink host --port 5555 --room ABC123
//!
//! # Join it
//! boardlink join 192.168.1.20 Alice --room ABC123
//! ```
//!
//! Both sides read commands from stdin: `start`, `roll`, `buy`, `decline`,
//! `bid N`, `pass`, `end`, `pause`, `resume`, `say TEXT`. Ctrl-C leaves.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use boardlink::{
    dispatch::{ClientDispatcher, DispatchEvent, HostDispatcher, ReplicaEvent},
    game::{Command, PlayerId, TableEngine},
    NetConfig, TransportManager, VERSION,
};

/// Host-authoritative board game sync
#[derive(Parser, Debug)]
#[command(name = "boardlink")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Host a table
    Host {
        /// Port to listen on (defaults to BOARDLINK_PORT or 5555)
        #[arg(short, long)]
        port: Option<u16>,

        /// Room code peers must present
        #[arg(short, long)]
        room: Option<String>,

        /// Host's display name
        #[arg(short, long, default_value = "Host")]
        name: String,
    },
    /// Join a hosted table
    Join {
        /// Host address
        address: String,

        /// Display name
        name: String,

        /// Host port (defaults to BOARDLINK_PORT or 5555)
        #[arg(short, long)]
        port: Option<u16>,

        /// Room code
        #[arg(short, long)]
        room: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    info!("Boardlink v{}", VERSION);
    let config = NetConfig::from_env();

    match args.mode {
        Mode::Host { port, room, name } => run_host(config, port, room, name).await,
        Mode::Join { address, name, port, room } => run_client(config, address, name, port, room).await,
    }
}

/// Parse one console line into a command.
fn parse_command(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let command = match words.next().unwrap_or_default() {
        "start" => Command::StartGame,
        "pause" => Command::PauseGame,
        "resume" => Command::ResumeGame,
        "roll" => Command::RollDice,
        "buy" => Command::BuyProperty { tile: None },
        "decline" => Command::DeclinePurchase { tile: None },
        "bid" => {
            let amount = words.next().context("usage: bid AMOUNT")?;
            Command::AuctionBid { amount: amount.parse().context("bid must be a number")? }
        }
        "pass" => Command::AuctionPass,
        "accept" => Command::TradeResponse { accepted: true },
        "refuse" => Command::TradeResponse { accepted: false },
        "end" => Command::EndTurn,
        other => bail!("unknown command {:?}", other),
    };
    Ok(command)
}

async fn run_host(config: NetConfig, port: Option<u16>, room: Option<String>, name: String) -> Result<()> {
    let port = port.unwrap_or(config.port);
    let room = room.or_else(|| config.room_code.clone());
    let nack = config.nack_unauthorized;

    let host_id = PlayerId::random();
    let transport = TransportManager::new(config, host_id, name.clone());
    let inbound = transport.subscribe();
    let addr = transport
        .start_host(port, room.clone())
        .await
        .with_context(|| format!("could not host on port {port}"))?;
    info!(%addr, room = room.as_deref().unwrap_or("-"), "hosting");

    let game_id = uuid::Uuid::new_v4();
    info!(%game_id, "new table");
    let engine = TableEngine::for_game(*game_id.as_bytes());
    let dispatcher = HostDispatcher::new(engine, transport.clone(), host_id, &name, nack);
    let handle = dispatcher.handle();
    let mut observed = handle.subscribe();
    tokio::spawn(dispatcher.run(inbound));

    tokio::spawn(async move {
        while let Some(event) = observed.recv().await {
            match event {
                DispatchEvent::Applied { actor, command, version, .. } => {
                    info!(actor = %actor.short(), ?command, version, "applied")
                }
                DispatchEvent::Refused { actor, command, reason, .. } => {
                    info!(actor = %actor.short(), ?command, %reason, "refused")
                }
                DispatchEvent::Chat { line, .. } => info!("<{}> {}", line.from_name, line.text),
                DispatchEvent::Roster(roster) => info!(players = roster.len(), "roster changed"),
                DispatchEvent::SyncSent { .. } => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if let Some(text) = line.strip_prefix("say ") {
                    handle.chat(text);
                    continue;
                }
                if line.is_empty() {
                    continue;
                }
                match parse_command(line) {
                    Ok(command) => {
                        handle.submit(command);
                    }
                    Err(e) => warn!("{:#}", e),
                }
            }
        }
    }

    transport.stop();
    info!("host stopped");
    Ok(())
}

async fn run_client(
    config: NetConfig,
    address: String,
    name: String,
    port: Option<u16>,
    room: Option<String>,
) -> Result<()> {
    let port = port.unwrap_or(config.port);
    let room = room.or_else(|| config.room_code.clone());

    let local_id = PlayerId::random();
    let transport = TransportManager::new(config, local_id, name.clone());
    let inbound = transport.subscribe();
    let delivery = transport.subscribe_delivery();
    transport
        .connect_to_host(&address, port, &name, room)
        .await
        .with_context(|| format!("could not reach {address}:{port}"))?;

    let client = Arc::new(ClientDispatcher::new(transport.clone(), local_id));
    let mut observed = client.subscribe();
    let driver = client.clone();
    tokio::spawn(async move { driver.run(inbound, delivery).await });

    let watcher = client.clone();
    let mut watch = tokio::spawn(async move {
        while let Some(event) = observed.recv().await {
            match event {
                ReplicaEvent::Synced { version, .. } => {
                    let replica = watcher.replica();
                    let view = replica.snapshot();
                    info!(version, round = view.round, my_turn = replica.is_my_turn(), "synced");
                    for p in &view.players {
                        info!("  {:<12} tile {:>2}  ${}", p.name, p.position, p.balance);
                    }
                }
                ReplicaEvent::Joined { host_name, .. } => info!(host = %host_name, "joined"),
                ReplicaEvent::Chat { line, .. } => info!("<{}> {}", line.from_name, line.text),
                ReplicaEvent::Refused { command, reason } => warn!(?command, %reason, "refused"),
                ReplicaEvent::Undelivered { command, .. } => warn!(?command, "no answer from host"),
                ReplicaEvent::HostError(detail) => warn!(%detail, "host error"),
                ReplicaEvent::HostLost(reason) => {
                    warn!(%reason, "disconnected");
                    break;
                }
                _ => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut watch => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if let Some(text) = line.strip_prefix("say ") {
                    client.send_chat(text);
                    continue;
                }
                if line.is_empty() {
                    continue;
                }
                match parse_command(line) {
                    Ok(command) => {
                        client.send_command(&command);
                    }
                    Err(e) => warn!("{:#}", e),
                }
            }
        }
    }

    transport.stop();
    info!("left the table");
    Ok(())
}
