// Exam Monitor CLI
// Talks to a running coordinator over HTTP and the monitor WebSocket

use clap::{Parser, Subcommand};
use colored::*;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser)]
#[command(name = "exam-monitor-cli")]
#[command(about = "Exam Room Coordinator CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// Get server configuration
    Config,

    /// List rooms open for monitoring right now
    Rooms,

    /// Claim a room
    Claim {
        /// Room ID to claim
        #[arg(short, long)]
        room_id: String,

        /// Proctor ID (random if omitted)
        #[arg(short, long)]
        proctor_id: Option<String>,

        /// Proctor display name
        #[arg(short, long)]
        name: Option<String>,

        /// Proctor role: proctor, program_admin or superadmin
        #[arg(long, default_value = "proctor")]
        role: String,
    },

    /// Release a room
    Release {
        /// Room ID to release
        #[arg(short, long)]
        room_id: String,

        /// Proctor ID holding the room
        #[arg(short, long)]
        proctor_id: String,
    },

    /// Show the participants of a room without claiming it
    Participants {
        /// Room ID
        #[arg(short, long)]
        room_id: String,
    },

    /// Enter a room and follow it live
    Watch {
        /// Room ID to enter
        #[arg(short, long)]
        room_id: String,

        /// Proctor ID (random if omitted)
        #[arg(short, long)]
        proctor_id: Option<String>,

        /// Proctor display name
        #[arg(short, long)]
        name: Option<String>,

        /// Proctor role: proctor, program_admin or superadmin
        #[arg(long, default_value = "proctor")]
        role: String,

        /// Approve every confirmation prompt automatically
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Config => {
            check_config(&cli.server).await;
        }
        Commands::Rooms => {
            list_rooms(&cli.server).await;
        }
        Commands::Claim {
            room_id,
            proctor_id,
            name,
            role,
        } => {
            let proctor_id = proctor_id.clone().unwrap_or_else(generate_proctor_id);
            claim_room(&cli.server, room_id, &proctor_id, name.as_deref(), role).await;
        }
        Commands::Release { room_id, proctor_id } => {
            release_room(&cli.server, room_id, proctor_id).await;
        }
        Commands::Participants { room_id } => {
            show_participants(&cli.server, room_id).await;
        }
        Commands::Watch {
            room_id,
            proctor_id,
            name,
            role,
            yes,
        } => {
            let proctor_id = proctor_id.clone().unwrap_or_else(generate_proctor_id);
            watch_room(&cli.server, room_id, &proctor_id, name.as_deref(), role, *yes).await;
        }
    }
}

fn generate_proctor_id() -> String {
    let mut rng = rand::thread_rng();
    format!("cli-{:06}", rng.gen_range(0..1000000))
}

async fn get_json(url: &str) -> Result<(reqwest::StatusCode, Value), reqwest::Error> {
    let resp = reqwest::Client::new().get(url).send().await?;
    let status = resp.status();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    Ok((status, body))
}

async fn post_json(url: &str, body: &Value) -> Result<(reqwest::StatusCode, Value), reqwest::Error> {
    let resp = reqwest::Client::new().post(url).json(body).send().await?;
    let status = resp.status();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    Ok((status, body))
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    match get_json(&format!("http://{}/monitor/health", server)).await {
        Ok((status, body)) if status.is_success() => {
            println!("{} Health check passed", "✓".green());
            println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
            println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
        }
        Ok((status, _)) => {
            println!("{} Health check failed: {}", "✗".red(), status);
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn check_config(server: &str) {
    println!("{}", "Fetching server configuration...".cyan());

    match get_json(&format!("http://{}/monitor/config", server)).await {
        Ok((status, body)) if status.is_success() => {
            println!("{} Config endpoint accessible", "✓".green());
            println!("\nConfiguration:");
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }
        Ok((status, _)) => {
            println!("{} Config fetch failed: {}", "✗".red(), status);
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn list_rooms(server: &str) {
    println!("{}", "Fetching rooms...".cyan());

    let body = match get_json(&format!("http://{}/monitor/rooms", server)).await {
        Ok((status, body)) if status.is_success() => body,
        Ok((status, _)) => {
            println!("{} Room listing failed: {}", "✗".red(), status);
            return;
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };

    if let Some(error) = body["error"].as_str() {
        println!("{} Schedule unavailable: {}", "⚠".yellow(), error);
    }

    let rooms = body["rooms"].as_array().cloned().unwrap_or_default();
    if rooms.is_empty() {
        println!("No rooms are open for monitoring right now.");
        return;
    }

    println!("\n{}", "═".repeat(60).green());
    for room in &rooms {
        let occupancy = match room["holder_name"].as_str() {
            Some(holder) => format!("occupied by {}", holder).yellow(),
            None => "available".green(),
        };
        println!(
            "{} {}  {}",
            room["id"].as_str().unwrap_or("?").bold(),
            room["display_name"].as_str().unwrap_or(""),
            occupancy
        );
        println!(
            "  {}  {} - {}  ({} participants)",
            room["exam_label"].as_str().unwrap_or(""),
            room["start_time"].as_str().unwrap_or("?"),
            room["end_time"].as_str().unwrap_or("?"),
            room["participant_count"].as_u64().unwrap_or(0)
        );
    }
    println!("{}", "═".repeat(60).green());
}

async fn claim_room(server: &str, room_id: &str, proctor_id: &str, name: Option<&str>, role: &str) {
    println!("{}", "Claiming room...".cyan());
    println!("  Room ID: {}", room_id);
    println!("  Proctor ID: {}", proctor_id);

    let url = format!(
        "http://{}/monitor/rooms/{}/claim",
        server,
        urlencoding::encode(room_id)
    );
    let body = json!({ "id": proctor_id, "name": name.unwrap_or(proctor_id), "role": role });

    match post_json(&url, &body).await {
        Ok((status, body)) if status.is_success() => {
            println!(
                "{} Claim outcome: {}",
                "✓".green(),
                body["outcome"].as_str().unwrap_or("unknown").bold()
            );
        }
        Ok((status, body)) if status == reqwest::StatusCode::CONFLICT => {
            println!(
                "{} Room is being monitored by {}",
                "✗".yellow(),
                body["held_by"].as_str().unwrap_or("another proctor").bold()
            );
        }
        Ok((status, body)) => {
            println!(
                "{} Claim failed ({}): {}",
                "✗".red(),
                status,
                body["error"].as_str().unwrap_or("unknown error")
            );
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn release_room(server: &str, room_id: &str, proctor_id: &str) {
    println!("{}", "Releasing room...".cyan());

    let url = format!(
        "http://{}/monitor/rooms/{}/release",
        server,
        urlencoding::encode(room_id)
    );

    match post_json(&url, &json!({ "proctor_id": proctor_id })).await {
        Ok((status, body)) if status.is_success() => {
            if body["released"].as_bool().unwrap_or(false) {
                println!("{} Room {} released", "✓".green(), room_id);
            } else {
                println!("{} {} was not holding room {}", "⚠".yellow(), proctor_id, room_id);
            }
        }
        Ok((status, _)) => {
            println!("{} Release failed: {}", "✗".red(), status);
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn show_participants(server: &str, room_id: &str) {
    println!("{}", "Fetching participants...".cyan());

    let url = format!(
        "http://{}/monitor/rooms/{}/participants",
        server,
        urlencoding::encode(room_id)
    );

    match get_json(&url).await {
        Ok((status, body)) if status.is_success() => {
            print_participants(body["participants"].as_array().map(Vec::as_slice).unwrap_or(&[]));
        }
        Ok((status, body)) => {
            println!(
                "{} Fetch failed ({}): {}",
                "✗".red(),
                status,
                body["error"].as_str().unwrap_or("unknown error")
            );
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

fn print_participants(participants: &[Value]) {
    if participants.is_empty() {
        println!("No participants.");
        return;
    }

    println!("\n{}", "─".repeat(60));
    for p in participants {
        let status = p["status"].as_str().unwrap_or("unknown");
        let status = match status {
            "Active" => status.green(),
            "Warned" => status.yellow(),
            "Removed" | "Disconnected" => status.red(),
            _ => status.normal(),
        };
        println!(
            "{:<10} {:<28} {:>3}%  {:<14} {}",
            p["id"].as_str().unwrap_or("?"),
            p["display_name"].as_str().unwrap_or(""),
            p["progress_percent"].as_u64().unwrap_or(0),
            status,
            p["last_activity_label"].as_str().unwrap_or("").dimmed()
        );
    }
    println!("{}", "─".repeat(60));
}

async fn watch_room(
    server: &str,
    room_id: &str,
    proctor_id: &str,
    name: Option<&str>,
    role: &str,
    auto_confirm: bool,
) {
    println!("\n{}", "Watch Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    let url = format!(
        "ws://{}/monitor/ws?id={}&name={}&role={}",
        server,
        urlencoding::encode(proctor_id),
        urlencoding::encode(name.unwrap_or(proctor_id)),
        urlencoding::encode(role)
    );

    let ws_stream = match connect_async(&url).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    println!("{} Connected to server", "✓".green());

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(Message::Text(msg.to_string())).await.is_err() {
                break;
            }
        }
    });

    let confirm_tx = tx.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                match serde_json::from_str::<Value>(&text) {
                    Ok(event) => print_event(&event, auto_confirm, &confirm_tx),
                    Err(_) => println!("\n{} {}", "◀".green(), text.bright_white()),
                }
            }
        }
        println!("\n{} Connection closed", "✗".yellow());
    });

    if tx.send(json!({ "type": "EnterRoom", "room_id": room_id })).is_err() {
        println!("{} Failed to send EnterRoom message", "✗".red());
        return;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "►".cyan());
        io::stdout().flush().ok();

        let input = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => break,
        };
        let mut parts = input.split_whitespace();
        let command = parts.next().unwrap_or("");
        let argument = parts.next();

        let message = match (command, argument) {
            ("", _) => continue,
            ("quit" | "exit", _) => {
                println!("Goodbye!");
                break;
            }
            ("help", _) => {
                print_watch_help();
                continue;
            }
            ("refresh", _) => json!({ "type": "Refresh" }),
            ("leave", _) => json!({ "type": "LeaveRoom" }),
            ("warn", Some(id)) => json!({ "type": "SendWarning", "participant_id": id }),
            ("remove", Some(id)) => json!({ "type": "RemoveParticipant", "participant_id": id }),
            ("yes", Some(id)) => json!({ "type": "ConfirmResponse", "request_id": id, "approved": true }),
            ("no", Some(id)) => json!({ "type": "ConfirmResponse", "request_id": id, "approved": false }),
            _ => {
                println!("{} Unknown command. Type 'help' for usage.", "✗".yellow());
                continue;
            }
        };

        if tx.send(message).is_err() {
            println!("{} Failed to send message", "✗".red());
            break;
        }
    }

    receive_task.abort();
    send_task.abort();
}

fn print_event(event: &Value, auto_confirm: bool, tx: &mpsc::UnboundedSender<Value>) {
    match event["type"].as_str().unwrap_or("") {
        "RoomEntered" => {
            println!(
                "\n{} Entered {} ({})",
                "✓".green(),
                event["room"]["display_name"].as_str().unwrap_or("room").bold(),
                event["claim"].as_str().unwrap_or("unknown")
            );
            if let Some(error) = event["load_error"].as_str() {
                println!("{} Participants could not be loaded: {}", "⚠".yellow(), error);
            }
            print_participants(event["participants"].as_array().map(Vec::as_slice).unwrap_or(&[]));
        }
        "RoomLocked" => {
            println!(
                "\n{} Room is being monitored by {}",
                "✗".yellow(),
                event["held_by"].as_str().unwrap_or("another proctor").bold()
            );
        }
        "Participants" => {
            print_participants(event["participants"].as_array().map(Vec::as_slice).unwrap_or(&[]));
        }
        "ConfirmRequest" => {
            let request_id = event["request_id"].as_str().unwrap_or("");
            println!(
                "\n{} {}: {}",
                "?".cyan().bold(),
                event["title"].as_str().unwrap_or("Confirm"),
                event["message"].as_str().unwrap_or("")
            );
            if auto_confirm {
                println!("  Auto-confirming {}", request_id);
                let _ = tx.send(json!({
                    "type": "ConfirmResponse",
                    "request_id": request_id,
                    "approved": true,
                }));
            } else {
                println!("  Answer with {} or {}", format!("yes {}", request_id).cyan(), format!("no {}", request_id).cyan());
            }
        }
        "ActivityLogged" => {
            let entry = &event["entry"];
            let line = format!(
                "{} {}: {}",
                entry["timestamp"].as_str().unwrap_or(""),
                entry["student_name"].as_str().unwrap_or(""),
                entry["action_label"].as_str().unwrap_or("")
            );
            match entry["severity"].as_str() {
                Some("error") => println!("\n{} {}", "●".red(), line),
                Some("warning") => println!("\n{} {}", "●".yellow(), line),
                _ => println!("\n{} {}", "●".normal(), line),
            }
        }
        "RefreshFailed" | "ActionFailed" | "Error" => {
            println!("\n{} {}", "✗".red(), event["message"].as_str().unwrap_or("unknown error"));
        }
        "RoomLeft" => {
            println!("\n{} Left room {}", "✓".green(), event["room_id"].as_str().unwrap_or(""));
        }
        _ => println!("\n{} {}", "◀".green(), event.to_string().bright_white()),
    }
}

fn print_watch_help() {
    println!("\n{}", "Watch Mode Commands".bold());
    println!("{}", "─".repeat(60));
    println!("  {:<16} fetch participants now", "refresh".cyan());
    println!("  {:<16} warn a participant", "warn <id>".cyan());
    println!("  {:<16} remove a participant from the exam", "remove <id>".cyan());
    println!("  {:<16} approve a confirmation prompt", "yes <request>".cyan());
    println!("  {:<16} cancel a confirmation prompt", "no <request>".cyan());
    println!("  {:<16} release the room", "leave".cyan());
    println!("  {:<16} disconnect", "quit".cyan());
    println!();
}
