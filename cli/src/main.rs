mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::DaemonClient;
use shared::ipc::{Command, Response};

#[derive(Parser)]
#[command(name = "atlas")]
#[command(about = "CLI tool for the atlas voice assistant daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start listening for the wake phrase
    Start,
    /// Stop listening (engines stay loaded)
    Stop,
    Toggle,
    /// Stop listening and release the microphone
    Release,
    /// Open a command window without the wake phrase
    Listen,
    /// Close the command window
    Cancel,
    /// Send a typed command to the assistant
    Say {
        #[arg(required = true)]
        text: Vec<String>,
    },
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = DaemonClient::new();

    let command = match cli.command {
        Commands::Start => Command::Start,
        Commands::Stop => Command::Stop,
        Commands::Toggle => Command::Toggle,
        Commands::Release => Command::Release,
        Commands::Listen => Command::Listen,
        Commands::Cancel => Command::Cancel,
        Commands::Say { text } => Command::Say(text.join(" ")),
        Commands::Status => Command::Status,
    };

    match client.send_command(command).await {
        Ok(Response::Ok) => {
            println!("Success");
        }
        Ok(Response::Reply(reply)) => {
            println!("{}", reply);
        }
        Ok(Response::Status(info)) => {
            println!("Status:");
            println!("  Running: {}", info.is_running);
            println!("  Mode: {} ({})", info.mode, info.mode.description());
            println!("  Command window open: {}", info.listening);
            println!(
                "  Engine: {}",
                info.engine.as_deref().unwrap_or("not initialized")
            );
            println!(
                "  Voice activity: {}",
                if !info.vad_available {
                    "unavailable"
                } else if info.speech_detected {
                    "speech"
                } else {
                    "silence"
                }
            );
            if let Some(command) = info.last_command {
                println!("  Last command: {}", command);
            }
            if let Some(reply) = info.last_reply {
                println!("  Last reply: {}", reply);
            }
        }
        Ok(Response::Error(msg)) => {
            eprintln!("Error: {}", msg);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to connect to atlasd: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
