//! Tandem peer — a console text editor that replicates its edits to other
//! peers over TCP.
//!
//! Run one side with `listen`, the other with `connect`. A listener started
//! with `--forward` relays every edit it receives to its other peers, so it
//! can act as a hub for several editors.

mod console;

use clap::{Parser, Subcommand};
use log::{info, warn};
use tandem_collab::{DisconnectReason, Replicator, ReplicatorConfig, SessionEvent};
use tandem_core::TextBuffer;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use console::Command;

/// Tandem - replicated console text editor
#[derive(Parser, Debug)]
#[command(name = "tandem-peer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Initial document text (not replicated)
    #[arg(short, long, default_value = "")]
    text: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept peers on an address
    Listen {
        /// Address to bind
        #[arg(short, long, default_value = "127.0.0.1:7878")]
        bind: String,
        /// Relay received edits to every other peer
        #[arg(short, long)]
        forward: bool,
    },

    /// Connect to a listening peer
    Connect {
        /// Address of the listening peer
        #[arg(short, long, default_value = "127.0.0.1:7878")]
        addr: String,
    },
}

async fn accept_loop(listener: TcpListener, replicator: Replicator) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(e) = replicator.connect_tcp(stream).await {
                    warn!("Failed to attach peer {addr}: {e}");
                }
            }
            Err(e) => {
                warn!("Accept failed: {e}");
                return;
            }
        }
    }
}

async fn print_session_events(replicator: Replicator) {
    let Some(mut events) = replicator.take_event_rx() else {
        return;
    };
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Connected { link_id } => println!("* connected ({link_id})"),
            SessionEvent::Disconnected { link_id, reason } => match reason {
                DisconnectReason::Requested => println!("* disconnected ({link_id})"),
                DisconnectReason::ContextClosed => {
                    println!("* disconnected ({link_id}): editor stopped")
                }
                DisconnectReason::Transport(e) | DisconnectReason::Decode(e) => {
                    println!("* disconnected ({link_id}): {e}")
                }
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Listen { forward: true, .. } => ReplicatorConfig::server(),
        _ => ReplicatorConfig::default(),
    };
    let replicator = Replicator::new(config, TextBuffer::with_text(&cli.text));
    tokio::spawn(print_session_events(replicator.clone()));

    match cli.command {
        Commands::Listen { bind, forward } => {
            let listener = TcpListener::bind(&bind).await?;
            info!("Listening on {} (forward: {forward})", listener.local_addr()?);
            tokio::spawn(accept_loop(listener, replicator.clone()));
        }
        Commands::Connect { addr } => {
            let stream = TcpStream::connect(&addr).await?;
            replicator.connect_tcp(stream).await?;
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match console::parse(&line) {
            Ok(Command::Edit(event)) => match replicator.local_edit(event).await {
                Ok(_) => println!("{}", replicator.content().await?),
                Err(e) => println!("! {e}"),
            },
            Ok(Command::Print) => println!("{}", replicator.content().await?),
            Ok(Command::Quit) => break,
            Err(console::ParseError::Empty) => {}
            Err(e) => println!("! {e}"),
        }
    }

    replicator.close().await;
    Ok(())
}
