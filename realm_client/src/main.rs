//! Standalone headless client.
//!
//! Usage:
//!   cargo run -p realm_client -- [--addr 127.0.0.1:8080] [--name alice]
//!       [--realm demos/realm.json] [--sprites demos/sprites.json]
//!       [--config client.json] [--room <room id>]
//!
//! Joins a room, opens the realtime channel and runs the frame loop. Lines on
//! stdin drive the avatar:
//!   move <x> <y>   - walk to a tile
//!   key <name>     - tap a movement key (w/a/s/d or Arrow*)
//!   say <message>  - send a chat message
//!   skin <id>      - change the avatar skin
//!   status         - print position, room and peers
//!   leave          - leave the room
//!   quit           - exit

use std::env;
use std::fs;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use realm_client::{
    presentation::{AvatarDespawned, AvatarSpawned, ConnectionChanged, JoinFailed, RoomChanged},
    sync::{NetworkSyncClient, SyncSettings},
    GameplayController,
};
use realm_shared::{config::ClientConfig, realm::RealmData, sprite::SpriteCatalog, tile::TileCoordinate};
use tokio::sync::mpsc;
use tracing::{info, warn};

struct Args {
    config: ClientConfig,
    realm_path: String,
    sprites_path: String,
    room_id: Option<String>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    // The config file is the base layer; explicit flags override it.
    let mut config = ClientConfig::default();
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        if let Some(path) = args.get(pos + 1) {
            let text = fs::read_to_string(path).with_context(|| format!("read config {path}"))?;
            config = ClientConfig::from_json_str(&text).with_context(|| format!("parse config {path}"))?;
        }
    }

    let mut parsed = Args {
        config,
        realm_path: "demos/realm.json".to_string(),
        sprites_path: "demos/sprites.json".to_string(),
        room_id: None,
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                parsed.config.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                parsed.config.player_name = args[i + 1].clone();
                i += 2;
            }
            "--realm" if i + 1 < args.len() => {
                parsed.realm_path = args[i + 1].clone();
                i += 2;
            }
            "--sprites" if i + 1 < args.len() => {
                parsed.sprites_path = args[i + 1].clone();
                i += 2;
            }
            "--room" if i + 1 < args.len() => {
                parsed.room_id = Some(args[i + 1].clone());
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(parsed)
}

/// Returns false when the client should exit.
fn exec_console(game: &mut GameplayController, line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["move", x, y] => match (x.parse::<i32>(), y.parse::<i32>()) {
            (Ok(x), Ok(y)) => {
                game.click_tile(TileCoordinate::new(x, y));
            }
            _ => println!("Usage: move <x> <y>"),
        },
        ["key", name] => {
            if !game.key_down(name) {
                println!("Not a movement key: {name}");
            }
            game.key_up(name);
        }
        ["say", rest @ ..] if !rest.is_empty() => {
            if !game.send_chat(&rest.join(" ")) {
                println!("Not connected");
            }
        }
        ["skin", id] => game.set_skin(id),
        ["status"] => {
            let local = game.local();
            println!("State: {:?}", game.sync().state());
            println!("Room: {} ({:?})", game.world().room_name(), game.room_id());
            println!("Tile: {} ({:?})", local.current_tile(), local.phase());
            println!("Peers: {}", game.remotes().len());
            for avatar in game.remotes().iter() {
                println!(
                    "  {} {:?} at ({:.0}, {:.0})",
                    avatar.id, avatar.display_name, avatar.smoothed.x, avatar.smoothed.y
                );
            }
            println!(
                "Visible: {}/{}",
                game.culler().visible_count(),
                game.culler().len()
            );
        }
        ["leave"] => game.leave(),
        ["quit"] | ["exit"] => return false,
        [] => {}
        _ => println!("Unknown command: {line}"),
    }
    true
}

/// Logs the topics a headless host cares about and drops the rest.
fn drain_presentation(game: &mut GameplayController) {
    let bus = game.events();
    for e in bus.drain::<AvatarSpawned>() {
        info!(avatar = ?e.avatar, name = ?e.display_name, x = e.position.x, y = e.position.y, "Avatar spawned");
    }
    for e in bus.drain::<AvatarDespawned>() {
        info!(avatar = ?e.avatar, "Avatar despawned");
    }
    for e in bus.drain::<RoomChanged>() {
        info!(room = e.room_index, name = %e.room_name, "Entered room");
    }
    for e in bus.drain::<ConnectionChanged>() {
        info!(state = ?e.state, "Connection");
    }
    for e in bus.drain::<JoinFailed>() {
        warn!(error = %e.error, "Join failed");
    }
    bus.clear();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;
    let cfg = args.config;
    info!(server = %cfg.server_addr, name = %cfg.player_name, realm = %args.realm_path, "Starting client");

    let realm_text = fs::read_to_string(&args.realm_path)
        .with_context(|| format!("read realm {}", args.realm_path))?;
    let realm = RealmData::from_json_str(&realm_text).context("parse realm")?;
    let sprites_text = fs::read_to_string(&args.sprites_path)
        .with_context(|| format!("read sprites {}", args.sprites_path))?;
    let sprites = SpriteCatalog::from_json_str(&sprites_text).context("parse sprites")?;

    let sync = NetworkSyncClient::tcp(
        &cfg.server_addr,
        SyncSettings {
            position_interval: Duration::from_millis(cfg.position_interval_ms),
            leave_grace: Duration::from_millis(cfg.leave_grace_ms),
        },
    );
    let frame = Duration::from_secs_f32(1.0 / cfg.frame_hz.max(1) as f32);
    let mut game = GameplayController::new(cfg, &realm, Arc::new(sprites), sync).context("load spawn room")?;
    game.join(args.room_id.as_deref()).context("join")?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("> ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let mut ticker = tokio::time::interval(frame);
    'run: loop {
        tokio::select! {
            _ = ticker.tick() => {
                game.frame(frame);
                drain_presentation(&mut game);
            }
            line = console_rx.recv() => {
                let Some(line) = line else { break 'run };
                if !exec_console(&mut game, &line) {
                    break 'run;
                }
            }
            _ = tokio::signal::ctrl_c() => break 'run,
        }
    }

    game.leave();
    // Give the goodbye frame its grace period before the runtime shuts down.
    tokio::time::sleep(Duration::from_millis(150)).await;
    Ok(())
}
