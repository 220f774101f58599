//! The registry server binary.

use camino::Utf8PathBuf;
use clap::Parser;

use dockyard::config::Config;

#[derive(Debug, Parser)]
#[command(name = "registry-server", about = "A Docker distribution v2 registry")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "registry.toml")]
    config: Utf8PathBuf,

    /// Override the configured listen address.
    #[arg(short, long)]
    listen: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    let listen = args.listen.unwrap_or(config.listen);

    let service = config.build_service()?;

    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(%listen, "registry listening");
    axum::serve(listener, service).await?;
    Ok(())
}
