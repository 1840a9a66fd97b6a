//! Feed server example with live subscriptions
//!
//! Run with: cargo run --example feed_server [BIND_ADDR] [KEY...]
//!
//! Examples:
//!   cargo run --example feed_server                          # binds to 0.0.0.0:13000
//!   cargo run --example feed_server localhost price volume   # 127.0.0.1:13000, watch two keys
//!   cargo run --example feed_server 127.0.0.1:13001 price    # custom port
//!
//! ## Feeding data
//!
//! With netcat:
//!   printf '<price|10.5><volume|1200>' | nc localhost 13000
//!
//! Only keys given on the command line (plus the statistics keys) are
//! tracked; records for any other key are dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use tcp_rtd::registry::{Key, UpdateListener, UpdateRegistry, COUNT_KEYS, COUNT_UPDATES};
use tcp_rtd::{ListenerConfig, RegistryConfig};

/// Listener that logs every value it sees
struct PrintListener;

impl UpdateListener for PrintListener {
    fn on_update(&self, key: &Key, value: Option<&str>) {
        match value {
            Some(value) => println!("{} = {}", key, value),
            None => println!("{} = <unset>", key),
        }
    }
}

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:13000
/// - "localhost:13001" -> 127.0.0.1:13001
/// - "127.0.0.1" -> 127.0.0.1:13000
/// - "0.0.0.0:13000" -> 0.0.0.0:13000
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 13000;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: feed_server [BIND_ADDR] [KEY...]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:13000)");
    eprintln!("  KEY          Keys to subscribe to and print");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let (listener_config, keys) = match args.first().map(|a| parse_bind_addr(a)) {
        Some(Ok(addr)) => (ListenerConfig::with_addr(addr), &args[1..]),
        Some(Err(_)) | None => (ListenerConfig::default(), &args[..]),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tcp_rtd=info".parse()?)
                .add_directive("feed_server=debug".parse()?),
        )
        .init();

    let config = RegistryConfig::default().listener(listener_config);
    let registry = UpdateRegistry::with_config(config, tokio::runtime::Handle::current());

    let printer: Arc<dyn UpdateListener> = Arc::new(PrintListener);
    for key in keys {
        registry.lookup_or_subscribe(key, &printer)?;
    }
    registry.lookup_or_subscribe(COUNT_KEYS, &printer)?;
    registry.lookup_or_subscribe(COUNT_UPDATES, &printer)?;

    let control_key = registry.config().control_key.clone();
    match registry.lookup_or_subscribe(&control_key, &printer)? {
        Some(port) => println!("Feed listening on port {}", port),
        None => {
            eprintln!("Failed to start feed listener");
            std::process::exit(1);
        }
    }

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    registry.shutdown_and_wait().await;

    Ok(())
}
