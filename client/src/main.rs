use clap::{Parser, Subcommand};
use client::network::ControlClient;
use log::info;
use shared::MatchConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Control channel of the tracker
    #[arg(short = 's', long, default_value = "127.0.0.1:9999")]
    server: String,

    /// Shared secret of the tracker
    #[arg(short = 't', long)]
    token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a match from a JSON file
    Create { file: PathBuf },
    /// Abort a running match
    Abort { match_id: u64 },
    /// Print the status of all matches
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let client = ControlClient::new(&args.server, &args.token);

    match args.command {
        Command::Create { file } => {
            let config: MatchConfig = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            client.create_match(&config).await?;
            info!("Match {} created", config.match_id);
        }
        Command::Abort { match_id } => {
            client.abort_match(match_id).await?;
            info!("Match {} aborted", match_id);
        }
        Command::Status => {
            let status = client.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
