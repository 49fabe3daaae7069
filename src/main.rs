use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use masshealth_sync::store::StoreRole;
use masshealth_sync::{SyncEngine, config, http, observability, state::AppState};
use serde::Serialize;

#[derive(Parser)]
#[command(
	name = "masshealth-sync",
	about = "MassHealth sync - replicate the local database to the remote mirror"
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Push pending and failed records to the mirror in dependency order
	Push {
		/// Push every record regardless of its sync status
		#[arg(long)]
		full: bool,
	},
	/// Copy mirror records into the local database
	Pull {
		/// Overwrite local records even when they are newer
		#[arg(long)]
		full: bool,
		/// Only pull this entity type (e.g. Workout)
		#[arg(long = "type", value_name = "ENTITY_TYPE")]
		entity_type: Option<String>,
	},
	/// Print per-type sync status counts
	Status,
	/// Create or update the schema
	Migrate {
		#[arg(long, value_enum, default_value_t = StoreRole::Local)]
		target: StoreRole,
	},
	/// Run the push job every `sync_interval_minutes` until interrupted
	Schedule,
	/// Serve /health, /metrics and /sync-status
	Serve,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let settings = config::load().context("failed to load configuration")?;
	observability::init_logging(settings.log_level)?;
	settings.validate()?;

	let engine = Arc::new(
		SyncEngine::connect(&settings)
			.await
			.context("failed to connect the stores")?,
	);

	let result = run(cli.command, &engine, &settings).await;
	engine.close().await;
	result
}

async fn run(
	command: Commands,
	engine: &Arc<SyncEngine>,
	settings: &config::Settings,
) -> anyhow::Result<()> {
	match command {
		Commands::Push { full } => {
			let report = engine.push(full).await;
			print_json(&report)?;
			if report.total_failed() > 0 {
				warn!("{} records failed to push", report.total_failed());
			}
		}
		Commands::Pull { full, entity_type } => {
			let report = engine.pull(full, entity_type.as_deref()).await?;
			print_json(&report)?;
		}
		Commands::Status => print_json(&engine.status_report().await)?,
		Commands::Migrate { target } => engine.migrate(target).await?,
		Commands::Schedule => {
			let mut ticker = tokio::time::interval(settings.sync_interval());
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			info!(
				"scheduled push every {} minutes",
				settings.sync_interval_minutes
			);
			loop {
				tokio::select! {
					_ = ticker.tick() => {
						let report = engine.push(false).await;
						if report.total_failed() > 0 {
							warn!(
								"scheduled push: {} succeeded, {} failed",
								report.total_succeeded(),
								report.total_failed()
							);
						} else {
							info!("scheduled push: {} succeeded", report.total_succeeded());
						}
					}
					res = tokio::signal::ctrl_c() => {
						if let Err(e) = res {
							error!("failed to listen for shutdown signal: {}", e);
						}
						info!("stopping scheduler");
						break;
					}
				}
			}
		}
		Commands::Serve => {
			let addr = format!("{}:{}", settings.host, settings.port);
			let listener = tokio::net::TcpListener::bind(&addr)
				.await
				.with_context(|| format!("failed to bind {}", addr))?;
			info!("operator endpoints listening on http://{}", addr);
			axum::serve(listener, http::router(AppState::new(Arc::clone(engine))))
				.with_graceful_shutdown(async {
					if let Err(e) = tokio::signal::ctrl_c().await {
						error!("failed to listen for shutdown signal: {}", e);
					}
				})
				.await?;
		}
	}
	Ok(())
}
