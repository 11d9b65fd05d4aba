use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use p2p_voice::calls::{CallController, WebRtcMediaEngine, media_event_channel};
use p2p_voice::config::{ClientConfig, DEFAULT_SIGNALING_HOST, SignalingConfig};
use p2p_voice::events::ControllerEvent;
use p2p_voice::logging;
use p2p_voice::reconnect::BackoffStrategy;

// Audio call peer.
//
// Usage:
//   cargo run -- --host 10.0.0.2 --port 8081         # connect, wait for commands
//   cargo run -- --host 10.0.0.2 --call              # connect and call right away
//
// Commands on stdin: call, stop, status, quit

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backoff {
    Fixed,
    Exponential,
}

impl From<Backoff> for BackoffStrategy {
    fn from(value: Backoff) -> Self {
        match value {
            Backoff::Fixed => BackoffStrategy::Fixed,
            Backoff::Exponential => BackoffStrategy::Exponential,
        }
    }
}

#[derive(Debug, Parser)]
#[command(version, about = "Peer-to-peer audio call client")]
struct Args {
    /// Signaling server host.
    #[arg(long, env = "SIGNALING_HOST")]
    host: Option<String>,

    /// Signaling server port. Invalid values fall back to the default.
    #[arg(long, env = "SIGNALING_PORT")]
    port: Option<String>,

    /// Start a call as soon as the client is up.
    #[arg(long)]
    call: bool,

    /// Retry delay growth for sends attempted while disconnected.
    #[arg(long, value_enum, default_value_t = Backoff::Fixed)]
    backoff: Backoff,

    /// STUN server URL. May be repeated.
    #[arg(long = "stun")]
    stun: Vec<String>,
}

fn main() {
    let args = Args::parse();
    logging::init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        if let Err(e) = run(args).await {
            error!("{e:#}");
        }
    });
}

async fn run(args: Args) -> anyhow::Result<()> {
    let (signaling, warnings) = SignalingConfig::from_input(
        args.host.as_deref().unwrap_or(DEFAULT_SIGNALING_HOST),
        args.port.as_deref().unwrap_or(""),
    );
    for warning in warnings {
        println!("! {warning}");
    }

    let mut config = ClientConfig::default()
        .with_signaling(signaling)
        .with_backoff(args.backoff.into());
    if !args.stun.is_empty() {
        config.ice_servers = args.stun;
    }

    let (sink, media_events) = media_event_channel();
    let engine = Arc::new(WebRtcMediaEngine::new(config.ice_servers.clone(), sink)?);
    let controller = CallController::builder(config)
        .with_media_engine(engine, media_events)
        .build()?;

    let mut events = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ControllerEvent::Status(status)) => println!("[{status}]"),
                Ok(ControllerEvent::Log(line)) => println!("  {line}"),
                Err(RecvError::Lagged(n)) => warn!("Dropped {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    controller.connect()?;
    if args.call {
        controller.start_call()?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "call" => controller.start_call()?,
                    "stop" => controller.stop_call(),
                    "status" => {
                        let snapshot = controller.snapshot().await?;
                        println!("{}", serde_json::to_string_pretty(&snapshot)?);
                    }
                    "quit" | "exit" => break,
                    "" => {}
                    other => println!("unknown command '{other}' (call, stop, status, quit)"),
                }
            }
        }
    }

    controller.cleanup().await;
    Ok(())
}
