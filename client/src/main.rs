use clap::{Parser, Subcommand};
use client::config::EngineConfig;
use client::input::{Command, CommandReader, HELP};
use client::network::RemoteStore;
use client::session::{ClientSession, Engine};
use client::view::ClickOutcome;
use client::SessionError;
use log::{info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{now_millis, ChessRules, SystemClock};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Store host address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Room identifier (case-insensitive)
    #[arg(short = 'r', long)]
    room: String,

    /// Display name shown to the other participants
    #[arg(short = 'n', long)]
    name: String,

    /// Stable participant id; reuse it to get your seat back after a restart
    #[arg(long)]
    id: Option<String>,

    /// Claim a seat that frees up while spectating
    #[arg(long)]
    promote_spectators: bool,

    /// How long a store request may take before it fails
    #[arg(long, default_value = "3000")]
    request_timeout_ms: u64,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// Create the room and take white
    Create,
    /// Join an existing room
    Join,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let participant_id = args.id.clone().unwrap_or_else(device_id);

    let config = EngineConfig {
        promote_spectators: args.promote_spectators,
        request_timeout: Duration::from_millis(args.request_timeout_ms),
        ..EngineConfig::default()
    };

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    info!("Participant id: {}", participant_id);

    let store = Arc::new(RemoteStore::connect(&args.server, &config).await?);
    let engine = Engine::new(
        store.clone(),
        Arc::new(ChessRules::new()),
        Arc::new(SystemClock),
        config,
    );

    let session = match args.action {
        Action::Create => engine.create(&args.room, &participant_id, &args.name).await,
        Action::Join => engine.join(&args.room, &participant_id, &args.name).await,
    };
    let mut session = session?;

    println!("Room {} as {}", session.room_id(), seat_label(&session));
    println!("{}", HELP);

    let result = run(&mut session).await;
    let _ = store.disconnect().await;
    result
}

async fn run(
    session: &mut ClientSession<RemoteStore, ChessRules>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut pushes = session.subscribe().await?;
    let mut commands = CommandReader::new(tokio::io::stdin());

    loop {
        tokio::select! {
            snapshot = pushes.recv() => {
                let Some(snapshot) = snapshot else {
                    println!("Lost the connection to the store host.");
                    return Ok(());
                };
                match session.apply_snapshot(snapshot).await {
                    Ok(Some(_)) => print_room(session),
                    Ok(None) => {}
                    Err(e) if e.is_terminal() => {
                        println!("{}", e);
                        return Ok(());
                    }
                    Err(e) => {
                        report(&e);
                        print_room(session);
                    }
                }
            },

            command = commands.next_command() => {
                let command = match command {
                    Some(Ok(command)) => command,
                    Some(Err(e)) => {
                        println!("{}", e);
                        continue;
                    }
                    None => return Ok(()),
                };
                if command == Command::Quit {
                    return Ok(());
                }
                if let Err(e) = handle_command(session, command).await {
                    report(&e);
                    if e.is_terminal() {
                        return Ok(());
                    }
                }
            },
        }
    }
}

async fn handle_command(
    session: &mut ClientSession<RemoteStore, ChessRules>,
    command: Command,
) -> Result<(), SessionError> {
    match command {
        Command::Move { from, to } => {
            session.submit_move(&from, &to).await?;
        }
        Command::Click(square) => match session.click(&square).await? {
            ClickOutcome::Selected(destinations) => {
                let list: Vec<&str> = destinations.iter().map(String::as_str).collect();
                println!("{} can go to: {}", square, list.join(" "));
            }
            ClickOutcome::Cleared => println!("Selection cleared."),
            ClickOutcome::Ignored | ClickOutcome::Submit { .. } => {}
        },
        Command::Rematch => {
            let outcome = session.vote_rematch().await?;
            info!("Rematch vote: {:?}", outcome);
        }
        Command::Leave => {
            if session.release_seat().await? {
                println!("You left your seat and are now spectating.");
            }
        }
        Command::Status => print_room(session),
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

fn print_room(session: &ClientSession<RemoteStore, ChessRules>) {
    let room = session.room();
    let name = |seat: Option<&shared::Seat>| seat.map_or("-".to_string(), |s| s.name.clone());

    println!(
        "[{}] White: {}  Black: {}  You: {}",
        session.room_id(),
        name(room.players.white.as_ref()),
        name(room.players.black.as_ref()),
        seat_label(session)
    );
    println!("{}", session.display_game().position);
    if let Some(last) = &session.display_game().last_move {
        println!("Last move: {}-{}", last.from, last.to);
    }
    if !session.display_game().history.is_empty() {
        println!("Moves: {}", session.display_game().history.join(" "));
    }
    let badge = if session.is_my_turn() { "  (your move)" } else { "" };
    println!("{}{}", session.status(), badge);

    for side in shared::Side::BOTH {
        if room.rematch.get(side) && session.seat().side() != Some(side) {
            println!("{} wants a rematch. Type `rematch` to accept.", side);
        }
    }
}

fn seat_label(session: &ClientSession<RemoteStore, ChessRules>) -> String {
    match session.seat().side() {
        Some(side) => side.to_string(),
        None => "spectator".to_string(),
    }
}

fn report(e: &SessionError) {
    if e.is_rejection() || e.is_read_only() {
        warn!("Action refused: {}", e);
    }
    println!("{}", e);
}

fn device_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect::<String>()
        .to_ascii_lowercase();
    format!("{}-{}", now_millis(), suffix)
}
