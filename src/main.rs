use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use envoy_control::store::RedisRepository;
use envoy_control::{api, config, worker};
use tracing::info;
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the HTTP API server
	Api,
	/// Run the configuration worker
	Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();

	let args = Args::parse();
	let config = Arc::new(config::from_env()?);

	match args.command {
		Command::Api => {
			let repo = Arc::new(RedisRepository::connect(&config.redis).await?);
			let app = api::App::new(repo);
			let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
			info!(address = %config.bind_address, "API server started");
			axum::serve(listener, app.router()).await?;
		},
		Command::Worker => {
			let repo = RedisRepository::connect(&config.redis).await?;
			worker::run(config, repo).await?;
		},
	}
	Ok(())
}
