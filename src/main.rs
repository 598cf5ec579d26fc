mod cli;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use lan_messenger::constants::DEFAULT_CONFIG_FILE;
use lan_messenger::{tracing_init, EventSink, Node, NodeConfig, NodeEvent};

#[derive(Parser)]
#[command(name = "lan-messenger", version, about = "LAN Messenger: peer-to-peer chat on the local network")]
struct App {
    /// Config file (created with defaults if missing)
    #[arg(default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// TCP port to try first for incoming messages
    #[arg(long)]
    port: Option<u16>,
    /// UDP port for discovery broadcasts
    #[arg(long)]
    discovery_port: Option<u16>,
    /// Address to bind and announce
    #[arg(long)]
    host: Option<String>,
    /// Log file path
    #[arg(long)]
    log_file: Option<String>,
}

impl App {
    fn apply_overrides(&self, config: &mut NodeConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(port) = self.discovery_port {
            config.discovery_port = port;
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = log_file.clone();
        }
    }
}

/// Print what arrives while the menu waits for input.
fn console_sink() -> EventSink {
    Arc::new(|event: NodeEvent| match event {
        NodeEvent::MessageReceived(entry) => println!("\n{}", entry),
        NodeEvent::PeerDiscovered(peer) => println!("\n+ New peer: {}", peer),
    })
}

fn main() {
    let app = App::parse();

    let mut config = NodeConfig::load(&app.config);
    app.apply_overrides(&mut config);

    tracing_init::init_file_tracing(Path::new(&config.log_file));
    tracing::info!(
        config = %app.config.display(),
        host = %config.host,
        port = config.port,
        discovery_port = config.discovery_port,
        "Starting LAN messenger"
    );

    let node = match Node::start(config, console_sink()) {
        Ok(node) => node,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Ctrl-C / SIGTERM raise the flag; the menu polls it between inputs.
    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, interrupted.clone()).ok();
    #[cfg(unix)]
    signal_hook::flag::register(signal_hook::consts::SIGTERM, interrupted.clone()).ok();

    if let Err(e) = cli::menu::run(&node, &interrupted) {
        tracing::error!(error = %e, "Menu error");
        eprintln!("Error: {}", e);
    }

    println!("\nShutting down...");
    node.shutdown();
    println!("Goodbye.");
}
