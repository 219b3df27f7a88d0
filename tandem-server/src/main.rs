//! tandem-server binary: flags, logging, run.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use tandem_server::{server, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "tandem-server", version, about = "Real-time collaborative text editing server")]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Directory for the document store
    #[arg(long, env = "DATA_DIR", default_value = "tandem_data")]
    data_dir: PathBuf,

    /// Disable persistence; documents are lost on restart
    #[arg(long)]
    no_persistence: bool,

    /// Environment tag (dev, prod)
    #[arg(long, env = "TANDEM_ENV", default_value = "dev")]
    env: String,

    /// Seconds between auto-save sweeps
    #[arg(long, default_value_t = 30)]
    autosave_secs: u64,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", cli.host, cli.port),
        data_dir: (!cli.no_persistence).then_some(cli.data_dir),
        environment: cli.env,
        autosave_interval: Duration::from_secs(cli.autosave_secs),
        ..ServerConfig::default()
    };

    if let Err(e) = server::run(config).await {
        log::error!("server error: {e}");
        std::process::exit(1);
    }
}
