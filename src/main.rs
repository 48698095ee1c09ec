// main.rs — opsd entry point: parse CLI, init logging, bootstrap, serve.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use opsd::config::OpsConfig;

#[derive(Parser)]
#[command(
    name = "opsd",
    version,
    about = "Background ops task daemon with SSE progress streaming"
)]
struct Cli {
    /// REST listen port.
    #[arg(long, env = "OPSD_PORT")]
    port: Option<u16>,

    /// Bind address (default 127.0.0.1; use 0.0.0.0 for LAN access).
    #[arg(long)]
    bind: Option<String>,

    /// Data directory (SQLite database + config.toml).
    #[arg(long, env = "OPSD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log filter, e.g. "info" or "debug,sqlx=warn".
    #[arg(long)]
    log: Option<String>,

    /// Emit JSON log lines (for log aggregators).
    #[arg(long)]
    log_json: bool,

    /// Deterministic fake task execution (also: DEV_LOCAL_LLM=1).
    #[arg(long)]
    fake: bool,

    /// Run without SQLite persistence.
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(OpsConfig::new(
        cli.port,
        cli.bind,
        cli.data_dir,
        cli.log,
        cli.log_json,
        cli.fake,
        cli.in_memory,
    ));

    init_logging(&config);

    let ctx = opsd::bootstrap(Arc::clone(&config)).await?;
    opsd::rest::start_rest_server(ctx).await
}

fn init_logging(config: &OpsConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.clone()));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).compact().init();
    }
}
