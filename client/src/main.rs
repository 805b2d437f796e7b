use clap::Parser;
use client::session::{ClientSession, SessionEvent};
use log::info;
use shared::{Message, CLIENT_SEND_RATE, DEFAULT_PORT, DEFAULT_SPAWN};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// State update rate in Hz
    #[arg(short, long, default_value_t = CLIENT_SEND_RATE)]
    rate: u32,
}

/// Headless demo client: connects, walks the player in a circle around the
/// spawn point, and prints whatever the server tells us about other players.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to {}:{}", args.host, args.port);
    let session = ClientSession::connect(&args.host, args.port)?;

    let frame = Duration::from_secs_f64(1.0 / args.rate.max(1) as f64);
    let center = session.spawn_pos().unwrap_or(DEFAULT_SPAWN);
    let mut angle: f32 = 0.0;

    loop {
        angle = (angle + 4.0) % 360.0;
        let radians = angle.to_radians();
        let pos = [
            center[0] + 3.0 * radians.cos(),
            center[1],
            center[2] + 3.0 * radians.sin(),
        ];
        session.enqueue_state(pos, angle);

        let mut disconnected = false;
        for event in session.poll_events() {
            match event {
                SessionEvent::Connected => {}
                SessionEvent::Disconnected => disconnected = true,
                SessionEvent::Message(Message::Chat { username, message }) => {
                    println!("<{}> {}", username, message);
                }
                SessionEvent::Message(Message::PlayerJoin { player_id }) => {
                    println!("* {} joined", player_id);
                }
                SessionEvent::Message(Message::PlayerLeave { player_id }) => {
                    println!("* {} left", player_id);
                }
                SessionEvent::Message(Message::AdminResponse { lines }) => {
                    for line in lines {
                        println!("[admin] {}", line);
                    }
                }
                SessionEvent::Message(_) => {}
            }
        }

        if disconnected {
            info!("Session ended");
            break;
        }

        std::thread::sleep(frame);
    }

    session.stop();
    Ok(())
}
