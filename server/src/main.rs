use clap::Parser;
use log::{error, info, warn};
use server::config::TrackerConfig;
use server::network::{BoxError, Server, ServerMessage};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address the control channel binds to
    #[arg(long, default_value = "0.0.0.0")]
    tcp_ip: String,

    /// Port of the control channel
    #[arg(long, default_value = "9999")]
    tcp_port: u16,

    /// IP address the log receiver binds to
    #[arg(long, default_value = "0.0.0.0")]
    udp_ip: String,

    /// Port of the log receiver
    #[arg(long, default_value = "9999")]
    udp_port: u16,

    /// Address game servers send their logs to, defaults to --udp-ip
    #[arg(long)]
    udp_log_ip: Option<String>,

    /// Shared secret every control request must carry
    #[arg(long)]
    token: String,

    /// Interval of the tracker loop in milliseconds
    #[arg(long, default_value = "100")]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let log_ip = args.udp_log_ip.clone().unwrap_or_else(|| args.udp_ip.clone());
    if log_ip == "0.0.0.0" {
        warn!("Game servers are told to send logs to 0.0.0.0, set --udp-log-ip to a reachable address");
    }

    let config = TrackerConfig {
        control_address: format!("{}:{}", args.tcp_ip, args.tcp_port),
        log_listen_address: format!("{}:{}", args.udp_ip, args.udp_port),
        log_target: format!("{}:{}", log_ip, args.udp_port),
        token: args.token,
        tick: Duration::from_millis(args.tick_ms.max(1)),
        ..TrackerConfig::default()
    };

    info!("Starting match tracker...");
    info!("Control channel: {}", config.control_address);
    info!("Log receiver: {} (servers log to {})", config.log_listen_address, config.log_target);

    let server = Server::new(config).await?;
    let shutdown = server.shutdown_handle();
    let mut running = tokio::spawn(server.run());

    tokio::select! {
        result = &mut running => {
            match result {
                Ok(Err(e)) => error!("Tracker stopped with error: {}", e),
                Err(e) => error!("Tracker task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(ServerMessage::Shutdown);
            if let Err(e) = running.await {
                error!("Tracker task panicked: {}", e);
            }
        }
    }

    Ok(())
}
