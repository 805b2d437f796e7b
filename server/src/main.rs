//! Server binary: argument parsing, config loading, and the interactive
//! admin console on stdin.

use clap::Parser;
use log::error;
use server::config::ConfigStore;
use server::network::Server;
use shared::DEFAULT_PORT;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind the listen socket to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Path to the JSON config file (created with defaults if missing)
    #[clap(short, long, default_value = "server_config.json")]
    config: PathBuf,
    /// Override the snapshot broadcast rate in Hz
    #[clap(long)]
    tick_rate: Option<u32>,
    /// Override the maximum number of concurrent clients
    #[clap(long)]
    max_players: Option<usize>,
    /// Enable debug logging regardless of RUST_LOG
    #[clap(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = ConfigStore::open(args.config.clone());
    if let Some(rate) = args.tick_rate {
        if let Err(message) = config.set("tick_rate", &rate.to_string()) {
            eprintln!("{}", message);
        }
    }
    if let Some(max) = args.max_players {
        if let Err(message) = config.set("max_players", &max.to_string()) {
            eprintln!("{}", message);
        }
    }

    let default_filter = if args.debug || config.values().debug {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, config).await?;
    let shutdown = server.shutdown_handle();
    let commands = server.command_processor();

    // Stdin is blocking, so the console gets its own thread and feeds the
    // async side through a channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if console_tx.blocking_send(trimmed.to_string()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    println!("Admin console ready. Type /help for commands.");

    let mut run_handle = tokio::spawn(server.run());
    let mut console_open = true;
    loop {
        tokio::select! {
            result = &mut run_handle => {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!("Server exited with error: {}", err),
                    Err(err) => error!("Server task panicked: {}", err),
                }
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down gracefully...");
                let _ = shutdown.send(true);
            }
            line = console_rx.recv(), if console_open => match line {
                Some(command) => {
                    for output in commands.execute("console", &command).await {
                        println!("{}", output);
                    }
                }
                None => console_open = false,
            },
        }
    }

    Ok(())
}
