//! oscope - Talk to OSC software from the terminal
//!
//! Listen for OSC on a UDP port, type messages at a remote port, or snoop
//! on the traffic between two programs.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use oscope::config::{self, Config};
use oscope::display::{self, Renderer};
use oscope::lexer::{parse_line, Command, Line};
use oscope::network::{Endpoint, Listener, Relay, SocketEvent, Talker};
use oscope::protocol::decode;

/// oscope - OSC over UDP from the terminal
#[derive(Parser)]
#[command(name = "oscope")]
#[command(author = "oscope Contributors")]
#[command(version)]
#[command(about = "Send, receive and snoop OSC messages over UDP", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a UDP port on <ADDRESS> and print received messages
    Listen {
        /// <port>, <host>:<port> or [<ipv6>]:<port>
        address: String,

        /// Print each packet as one JSON line
        #[arg(long)]
        json: bool,

        /// Print a hex dump of each datagram
        #[arg(long)]
        hex: bool,
    },

    /// Open a text prompt for sending messages to software listening on <ADDRESS>
    Talk {
        /// <port>, <host>:<port> or [<ipv6>]:<port>
        address: String,
    },

    /// Relay between <FRONT> and <BACK>, printing traffic in both directions
    Snoop {
        /// Local address clients send to
        front: String,

        /// Address the traffic is forwarded to
        back: String,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Write the configuration here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_else(|e| {
            tracing::warn!("Ignoring configuration file: {}", e);
            Config::default()
        })
    };

    if cli.no_color {
        config.display.color = false;
    }
    if let Commands::Listen { hex: true, .. } = cli.command {
        config.display.hex_dump = true;
    }

    // The local offset lookup must happen before the runtime starts its threads
    let renderer = Renderer::new(config.display.clone(), display::local_offset());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(cli.command, config, renderer))
}

async fn run(command: Commands, config: Config, renderer: Renderer) -> anyhow::Result<()> {
    match command {
        Commands::Listen { address, json, .. } => {
            let endpoint: Endpoint = address.parse()?;
            run_listen(&config, &renderer, &endpoint, json).await?;
        }
        Commands::Talk { address } => {
            let endpoint: Endpoint = address.parse()?;
            run_talk(&config, &renderer, &endpoint).await?;
        }
        Commands::Snoop { front, back } => {
            let front: Endpoint = front.parse()?;
            let back: Endpoint = back.parse()?;
            run_snoop(&config, &renderer, &front, &back).await?;
        }
        Commands::Config { generate, output } => {
            let config = if generate {
                config::sample_config()
            } else {
                config
            };
            if let Some(path) = output {
                config.save(&path)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Print whatever a socket task reported
fn print_event(renderer: &Renderer, event: SocketEvent, json: bool) {
    match event {
        SocketEvent::Datagram(datagram) if json => match decode(&datagram.payload) {
            Ok(packet) => match serde_json::to_string(&packet) {
                Ok(line) => println!("{}", line),
                Err(e) => println!("{}", renderer.error(&format!("JSON error: {}", e))),
            },
            Err(e) => println!(
                "{}",
                renderer.error(&format!("Decode error from {}: {}", datagram.from, e))
            ),
        },
        SocketEvent::Datagram(datagram) => {
            for line in renderer.datagram(&datagram) {
                println!("{}", line);
            }
        }
        SocketEvent::Error { message } => {
            println!("{}", renderer.error(&format!("Error: {}", message)));
        }
    }
}

/// Run the listener until Ctrl+C
async fn run_listen(
    config: &Config,
    renderer: &Renderer,
    endpoint: &Endpoint,
    json: bool,
) -> anyhow::Result<()> {
    let addr = endpoint.resolve(&config.network.listen_host).await?;
    let mut listener = Listener::bind(addr, &config.network).await?;
    let mut events = listener
        .take_event_receiver()
        .context("listener event receiver already taken")?;
    listener.start()?;

    if !json {
        let title = format!("Listening for OSC on {}", listener.local_addr()?);
        println!("{}", renderer.banner(&title));
    }

    loop {
        tokio::select! {
            Some(event) = events.recv() => print_event(renderer, event, json),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    listener.stop().await;
    tracing::info!("Listener stopped");

    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Run an interactive talk session until `:quit`, end of input or Ctrl+C
async fn run_talk(config: &Config, renderer: &Renderer, endpoint: &Endpoint) -> anyhow::Result<()> {
    let remote = endpoint.resolve(&config.network.talk_host).await?;
    let mut talker = Talker::connect(remote, &config.network).await?;
    let mut events = talker
        .take_event_receiver()
        .context("talker event receiver already taken")?;
    talker.start()?;

    println!("{}", renderer.banner(&format!("Sending OSC to {}", remote)));
    prompt();

    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line.transpose()? else {
                    break;
                };
                if !handle_line(&talker, renderer, &line).await {
                    break;
                }
                prompt();
            }
            Some(event) = events.recv() => {
                println!();
                print_event(renderer, event, false);
                prompt();
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!();
    talker.stop().await;
    tracing::info!("Talk session ended");

    Ok(())
}

/// Read lines on a plain thread and hand them to the async side. A read
/// blocked in the terminal is outside the runtime, so Ctrl+C exits at once.
fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<std::io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in reader.lines() {
            let failed = line.is_err();
            if tx.blocking_send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

/// Act on one typed line; returns false when the session should end
async fn handle_line(talker: &Talker, renderer: &Renderer, line: &str) -> bool {
    match parse_line(line) {
        Ok(Line::Empty) => {}
        Ok(Line::Command(Command::Quit)) => return false,
        Ok(Line::Command(Command::Help)) => {
            for help in renderer.talk_help() {
                println!("{}", help);
            }
        }
        Ok(Line::Message(message)) => {
            if let Err(e) = talker.send(&message).await {
                println!("{}", renderer.error(&format!("Error: {}", e)));
            }
        }
        Err(e) => println!("{}", renderer.error(&e.to_string())),
    }
    true
}

/// Relay between two endpoints until Ctrl+C
async fn run_snoop(
    config: &Config,
    renderer: &Renderer,
    front: &Endpoint,
    back: &Endpoint,
) -> anyhow::Result<()> {
    let front_addr = front.resolve(&config.network.listen_host).await?;
    let back_addr = back.resolve(&config.network.talk_host).await?;

    let mut relay = Relay::bind(front_addr, back_addr, &config.network).await?;
    let mut events = relay
        .take_event_receiver()
        .context("relay event receiver already taken")?;
    relay.start()?;

    let title = format!("Snooping between {} and {}", relay.local_addr()?, back_addr);
    println!("{}", renderer.banner(&title));

    loop {
        tokio::select! {
            Some(event) = events.recv() => print_event(renderer, event, false),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    relay.stop().await;
    tracing::info!("Relay stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["oscope", "listen", "9000"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Listen { ref address, json: false, hex: false } if address == "9000"
        ));

        let cli = Cli::try_parse_from(["oscope", "--no-color", "talk", "127.0.0.1:9000"]).unwrap();
        assert!(cli.no_color);
        assert!(matches!(cli.command, Commands::Talk { .. }));

        let cli = Cli::try_parse_from(["oscope", "snoop", "9000", "[::1]:9001"]).unwrap();
        assert!(matches!(cli.command, Commands::Snoop { .. }));
    }

    #[test]
    fn test_cli_requires_address() {
        assert!(Cli::try_parse_from(["oscope", "listen"]).is_err());
        assert!(Cli::try_parse_from(["oscope", "snoop", "9000"]).is_err());
    }

    #[test]
    fn test_line_reader_delivers_lines_then_ends() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let lines = runtime.block_on(async {
            let mut rx = spawn_line_reader(std::io::Cursor::new("/a 1\r\n:quit\n"));
            let mut lines = Vec::new();
            while let Some(line) = rx.recv().await {
                lines.push(line.unwrap());
            }
            lines
        });
        assert_eq!(lines, vec!["/a 1".to_string(), ":quit".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_runtime_shutdown_does_not_wait_for_input() {
        use std::os::unix::net::UnixStream;
        use std::time::{Duration, Instant};

        // The writer half stays open, so the reader thread blocks forever
        let (reader, _writer) = UnixStream::pair().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut rx = spawn_line_reader(std::io::BufReader::new(reader));

        let started = Instant::now();
        runtime.block_on(async {
            let pending = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
            assert!(pending.is_err());
        });
        drop(runtime);

        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_cli_help_subcommand() {
        let err = Cli::try_parse_from(["oscope", "help"]).err().unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
