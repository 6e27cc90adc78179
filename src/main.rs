mod bridge;
mod error;
mod registry;
mod transport;

use bridge::{Bridge, BridgeConfig, BridgeEvent, LinkState};
use clap::Parser;
use error::BridgeError;
use registry::DeviceInfo;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use transport::{LinkConnector, RfcommConnector, TcpConnector, DEFAULT_SPP_CHANNEL};

/// Serial-over-Bluetooth bridge console
#[derive(Parser, Debug)]
#[command(name = "spp-bridge", about = "RFCOMM/SPP serial bridge with an interactive console")]
struct Args {
    /// RFCOMM channel to dial
    #[arg(long, default_value_t = DEFAULT_SPP_CHANNEL)]
    channel: u8,

    /// Dial a loopback TCP peer instead of RFCOMM (development mode)
    #[arg(long, value_name = "ADDR")]
    tcp_sim: Option<String>,
}

/// One console command, the boundary analog of the host method channel
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Devices,
    Scan,
    Stop,
    Connect(String),
    Send(String),
    Status,
    Disconnect,
    Quit,
    Invalid(&'static str),
    Unknown(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };

    Some(match verb {
        "help" => Command::Help,
        "devices" => Command::Devices,
        "scan" => Command::Scan,
        "stop" => Command::Stop,
        "connect" if rest.is_empty() => Command::Invalid("address"),
        "connect" => Command::Connect(rest.to_string()),
        "send" if rest.is_empty() => Command::Invalid("data"),
        "send" => Command::Send(rest.to_string()),
        "status" => Command::Status,
        "disconnect" => Command::Disconnect,
        "quit" | "exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    })
}

fn print_help() {
    println!("commands:");
    println!("  devices           list paired devices");
    println!("  scan              start classic discovery");
    println!("  stop              stop discovery and show what was found");
    println!("  connect <mac>     open the serial link");
    println!("  send <text>       write text to the link (UTF-8)");
    println!("  status            show link state");
    println!("  disconnect        close the link");
    println!("  quit              disconnect and exit");
}

fn print_error(err: &BridgeError) {
    eprintln!("error {}: {}", err.code(), err);
}

fn print_devices(devices: &[DeviceInfo]) {
    if devices.is_empty() {
        println!("  (none)");
        return;
    }
    for device in devices {
        println!(
            "  {}  {}",
            device.address,
            device.name.as_deref().unwrap_or("-")
        );
    }
}

async fn run_command(bridge: &Bridge, command: Command) -> bool {
    match command {
        Command::Help => print_help(),
        Command::Devices => match bridge.list_paired_devices().await {
            Ok(devices) => {
                println!("paired devices:");
                print_devices(&devices);
            }
            Err(e) => print_error(&e),
        },
        Command::Scan => match bridge.start_scan().await {
            Ok(()) => println!("scanning... type 'stop' to finish"),
            Err(e) => print_error(&e),
        },
        Command::Stop => {
            bridge.stop_scan().await;
            println!("discovered devices:");
            print_devices(&bridge.scanned_devices().await);
        }
        Command::Connect(address) => match bridge.connect(&address).await {
            Ok(()) => println!("connected to {}", address),
            Err(e) => print_error(&e),
        },
        Command::Send(text) => {
            if let Err(e) = bridge.send(&text).await {
                print_error(&e);
            }
        }
        Command::Status => match bridge.state().await {
            LinkState::Connected => match bridge.peer().await {
                Some(peer) => println!("connected to {}", peer),
                None => println!("connected"),
            },
            LinkState::Connecting => println!("connecting..."),
            LinkState::Disconnected => println!("disconnected"),
        },
        Command::Disconnect => match bridge.disconnect().await {
            Ok(()) => println!("disconnected"),
            Err(e) => print_error(&e),
        },
        Command::Quit => return false,
        Command::Invalid(argument) => print_error(&BridgeError::InvalidArgument(argument)),
        Command::Unknown(verb) => println!("unknown command: {} (try 'help')", verb),
    }
    true
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let connector: Box<dyn LinkConnector> = match args.tcp_sim {
        Some(addr) => {
            info!("using TCP simulation peer at {}", addr);
            Box::new(TcpConnector::new(addr))
        }
        None => Box::new(RfcommConnector::new(args.channel)),
    };

    let (bridge, mut events) = Bridge::new(BridgeConfig::default(), connector);

    println!("spp-bridge ready (type 'help' for commands)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(BridgeEvent::Data { text }) => println!("<< {}", text.trim_end_matches(['\r', '\n'])),
                Some(BridgeEvent::Error { code, message }) => {
                    warn!("inbound stream failed: {}", message);
                    eprintln!("!! {}: {}", code, message);
                }
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) => {
                    let Some(command) = parse_command(&line) else { continue };
                    if !run_command(&bridge, command).await {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    bridge.disconnect().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boundary_commands() {
        assert_eq!(parse_command("devices"), Some(Command::Devices));
        assert_eq!(
            parse_command("connect AA:BB:CC:DD:EE:FF"),
            Some(Command::Connect("AA:BB:CC:DD:EE:FF".into()))
        );
        assert_eq!(
            parse_command("send PING over serial"),
            Some(Command::Send("PING over serial".into()))
        );
        assert_eq!(parse_command("disconnect"), Some(Command::Disconnect));
        assert_eq!(parse_command("  "), None);
    }

    #[test]
    fn test_parse_flags_missing_arguments() {
        assert_eq!(parse_command("connect"), Some(Command::Invalid("address")));
        assert_eq!(parse_command("send"), Some(Command::Invalid("data")));
        assert_eq!(
            parse_command("frobnicate"),
            Some(Command::Unknown("frobnicate".into()))
        );
    }
}
