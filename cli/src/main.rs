mod client;

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use client::DaemonClient;
use shared::events::{EventCategory, EventFilter, EventQuery, EventType};
use shared::ipc::{Axis, Command, DetectorKind, ModeFlag, Response};
use std::path::PathBuf;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Parser)]
#[command(name = "sentry")]
#[command(about = "CLI tool for the sentry camera daemon")]
struct Cli {
    /// Daemon socket (defaults to $XDG_RUNTIME_DIR/sentryd.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show mode flags, actuator position, sensors and voice state
    Status,
    /// Flip a mode flag (face_detection, face_tracking, danger_detection,
    /// face_overlay, voice_wake)
    Toggle { flag: ModeFlag },
    /// Move one step on an axis
    Jog {
        /// h or v
        axis: Axis,
        #[arg(allow_hyphen_values = true)]
        direction: i32,
    },
    /// Set playback volume (0..1)
    Volume { level: f32 },
    /// Latest boxes from a detector
    Detections { detector: DetectorKind },
    /// List logged events
    Events {
        /// Start, "YYYY-MM-DD HH:MM:SS"
        #[arg(long, value_parser = parse_time)]
        from: NaiveDateTime,
        /// End, "YYYY-MM-DD HH:MM:SS"
        #[arg(long, value_parser = parse_time)]
        to: NaiveDateTime,
        /// sound, human or danger
        #[arg(long, conflicts_with = "event_type")]
        category: Option<EventCategory>,
        #[arg(long = "type")]
        event_type: Option<EventType>,
        /// Only events whose detail mentions this (repeatable)
        #[arg(long = "term")]
        terms: Vec<String>,
    },
    /// Print headers of the live frame stream
    Watch {
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,
        #[arg(long)]
        count: Option<usize>,
    },
}

fn parse_time(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT).map_err(|e| format!("{} (expected {})", e, TIME_FORMAT))
}

fn build_query(
    from: NaiveDateTime,
    to: NaiveDateTime,
    category: Option<EventCategory>,
    event_type: Option<EventType>,
    terms: Vec<String>,
) -> Result<EventQuery> {
    if from > to {
        return Err(anyhow!("--from must not be after --to"));
    }
    let mut query = EventQuery::range(from, to).with_terms(terms);
    if let Some(category) = category {
        query = query.with_filter(EventFilter::Category(category));
    } else if let Some(event_type) = event_type {
        query = query.with_filter(EventFilter::Type(event_type));
    }
    Ok(query)
}

fn print_response(response: Response) -> Result<()> {
    match response {
        Response::Ok => println!("Success"),
        Response::Status(info) => {
            println!("Status:");
            println!("  Running: {}", info.is_running);
            println!("  Time: {}", info.time);
            match info.temperature {
                Some(t) => println!("  Temperature: {:.1}", t),
                None => println!("  Temperature: n/a"),
            }
            match info.humidity {
                Some(h) => println!("  Humidity: {:.1}%", h),
                None => println!("  Humidity: n/a"),
            }
            println!("  Face detection: {}", info.modes.face_detection);
            println!("  Face tracking: {}", info.modes.face_tracking);
            println!("  Danger detection: {}", info.modes.danger_detection);
            println!("  Face overlay: {}", info.modes.face_overlay);
            println!("  Voice wake: {}", info.modes.voice_wake);
            println!(
                "  Actuator: h={}° v={}°{}",
                info.actuator.h_angle,
                info.actuator.v_angle,
                if info.actuator.sleeping { " (sleeping)" } else { "" }
            );
            println!("  Volume: {:.2}", info.volume);
            println!(
                "  Voice: {}{}",
                info.voice_state,
                if info.voice_busy { " (busy)" } else { "" }
            );
        }
        Response::Flag { flag, enabled } => {
            println!("{}: {}", flag, if enabled { "on" } else { "off" })
        }
        Response::Jogged {
            axis,
            angle,
            clamped,
        } => println!(
            "{:?} at {}°{}",
            axis,
            angle,
            if clamped { " (limit reached)" } else { "" }
        ),
        Response::Volume(v) => println!("Volume: {:.2}", v),
        Response::Detections(result) => {
            if result.is_empty() {
                println!("No detections");
            }
            for (i, bbox) in result.boxes.iter().enumerate() {
                let label = result.labels.get(i).map(String::as_str).unwrap_or("");
                let confidence = result.confidences.get(i).copied().unwrap_or_default();
                println!(
                    "[{:.0}, {:.0}, {:.0}, {:.0}] {} {:.2}",
                    bbox[0], bbox[1], bbox[2], bbox[3], label, confidence
                );
            }
        }
        Response::Events(records) => {
            if records.is_empty() {
                println!("No events");
            }
            for r in records {
                let detail = r.detail.map(|d| d.to_string()).unwrap_or_default();
                match r.confidence {
                    Some(c) => println!("{} {} {} ({:.2})", r.timestamp.format(TIME_FORMAT), r.event_type, detail, c),
                    None => println!("{} {} {}", r.timestamp.format(TIME_FORMAT), r.event_type, detail),
                }
            }
        }
        Response::Frame(header) => println!("{:?}", header),
        Response::Error(msg) => {
            eprintln!("Error: {}", msg);
            std::process::exit(1);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = match cli.socket {
        Some(path) => DaemonClient::with_socket(path),
        None => DaemonClient::new(),
    };

    let command = match cli.command {
        Commands::Status => Command::Status,
        Commands::Toggle { flag } => Command::Toggle(flag),
        Commands::Jog { axis, direction } => Command::Jog { axis, direction },
        Commands::Volume { level } => Command::SetVolume(level),
        Commands::Detections { detector } => Command::Detections(detector),
        Commands::Events {
            from,
            to,
            category,
            event_type,
            terms,
        } => Command::Events(build_query(from, to, category, event_type, terms)?),
        Commands::Watch { interval_ms, count } => {
            let result = client
                .watch_frames(interval_ms, count, |header, _pixels| {
                    println!(
                        "frame {} {}x{}x{} ({} bytes)",
                        header.sequence, header.width, header.height, header.channels, header.len
                    );
                })
                .await;
            if let Err(e) = result {
                eprintln!("Frame stream ended: {}", e);
                std::process::exit(1);
            }
            return Ok(());
        }
    };

    match client.send_command(command).await {
        Ok(response) => print_response(response)?,
        Err(e) => {
            eprintln!("Failed to talk to sentryd: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
