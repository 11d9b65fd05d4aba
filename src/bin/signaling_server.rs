use clap::Parser;
use log::info;
use std::net::IpAddr;

use p2p_voice::config::DEFAULT_SIGNALING_PORT;
use p2p_voice::logging;
use p2p_voice::relay::RelayServer;

#[derive(Debug, Parser)]
#[command(version, about = "Relay that forwards signaling messages between peers")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_SIGNALING_PORT)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init();

    let server = RelayServer::bind((args.bind, args.port)).await?;
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(target: "Relay", "Interrupted");
        })
        .await;
    Ok(())
}
