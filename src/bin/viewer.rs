//! Stream Viewer Application
//!
//! Controls a streaming server and plays its stream locally. A terminal
//! front end stands in for the window: commands are read from stdin and the
//! status line is printed as it changes.

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::Receiver;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_control::{
    client::{status_channel, ClientSession, ControlClient, StatusUpdate},
    config::{AppConfig, DriverKind},
    server::{spawn_server, StreamController},
};

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "Video stream viewer")]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control API base URL, e.g. http://127.0.0.1:8079
    #[arg(short, long)]
    server_url: Option<String>,

    /// Use simulated pipeline drivers
    #[arg(long)]
    simulate: bool,

    /// Also run the streaming server in this process
    #[arg(long)]
    embedded_server: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Status,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "start" | "s" => Some(Command::Start),
            "stop" | "x" => Some(Command::Stop),
            "status" | "?" => Some(Command::Status),
            "quit" | "q" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting stream viewer");

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(url) = args.server_url {
        config.client.server_url = url;
        config.validate()?;
    }
    if args.simulate {
        config.pipeline.driver = DriverKind::Simulated;
    }

    // Server in the same process, as in a single-machine setup
    let embedded = if args.embedded_server {
        let controller = Arc::new(StreamController::new(config.pipeline.sender_driver()));
        let watcher = controller.spawn_event_watcher();
        let (addr, server) = spawn_server(config.server.clone(), controller.clone()).await?;
        config.client.server_url = format!("http://{}", addr);
        println!("Server is running. Access the API at http://{}", addr);
        Some((controller, watcher, server))
    } else {
        None
    };

    let client = ControlClient::new(&config.client.server_url, config.client.request_timeout())?;
    tracing::info!("Controlling server at {}", client.base_url());

    let (sink, updates) = status_channel();
    let session = Arc::new(ClientSession::new(client, config.pipeline.receiver_driver(), sink));
    let poller = session.spawn_poller(config.client.poll_interval());
    let listener = session.spawn_event_listener();

    let ui = spawn_status_printer(updates)?;
    let mut commands = spawn_command_reader()?;

    println!("Commands: start, stop, status, quit");

    loop {
        let command = tokio::select! {
            command = commands.recv() => command.unwrap_or(Command::Quit),
            _ = tokio::signal::ctrl_c() => Command::Quit,
        };

        match command {
            Command::Start => {
                session.request_start().await;
            }
            Command::Stop => {
                session.request_stop().await;
            }
            Command::Status => {
                println!("{}", serde_json::to_string_pretty(&session.view())?);
            }
            Command::Quit => break,
        }
    }

    session.close().await;
    let _ = poller.await;
    let _ = listener.await;

    if let Some((controller, watcher, server)) = embedded {
        server.abort();
        watcher.abort();
        tokio::task::spawn_blocking(move || controller.shutdown()).await?;
    }

    // Dropping the session drops the last status sender, ending the UI thread
    drop(session);
    let _ = ui.join();
    Ok(())
}

/// The UI thread: the only place status updates are applied
fn spawn_status_printer(updates: Receiver<StatusUpdate>) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("viewer-ui".into())
        .spawn(move || {
            for update in updates.iter() {
                let start = if update.controls.start_enabled { "on" } else { "off" };
                let stop = if update.controls.stop_enabled { "on" } else { "off" };
                println!("[start:{} stop:{}] {}", start, stop, update.text);
            }
        })?;
    Ok(handle)
}

fn spawn_command_reader() -> Result<mpsc::UnboundedReceiver<Command>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("viewer-input".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Some(command) => {
                        if tx.send(command).is_err() || command == Command::Quit {
                            break;
                        }
                    }
                    None => println!("Unknown command: {}", line.trim()),
                }
            }
        })?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("start"), Some(Command::Start));
        assert_eq!(Command::parse(" STOP "), Some(Command::Stop));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
        assert_eq!(Command::parse("?"), Some(Command::Status));
        assert_eq!(Command::parse("rewind"), None);
    }
}
