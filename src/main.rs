//! Modelling bus driver
//!
//! Thin command-line front end: loads the agent configuration, connects
//! the bus, and dispatches into the artefact/observation connectors.
//!
//! ```bash
//! # Post a JSON artefact state
//! modelling-bus --config agent.ini post-state --artefact model-1 --file state.json
//!
//! # Propose an update
//! modelling-bus --config agent.ini post-update --artefact model-1 --file updated.json
//!
//! # Listen for postings of an artefact across all agents
//! modelling-bus --config agent.ini listen --artefact model-1
//!
//! # Tear down an environment
//! modelling-bus --config agent.ini delete-environment
//! ```

use clap::{Parser, Subcommand};
use modelling_bus::{
    ArtefactConnector, BusConfig, BusConnector, ObservationConnector, ProgressLevel, Reporter,
    ANY_AGENT,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_JSON_VERSION: &str = "json-1.0";

#[derive(Parser, Debug)]
#[command(name = "modelling-bus")]
#[command(about = "Publish/subscribe modelling bus for collaborating agents")]
struct Args {
    /// Path to the INI configuration file
    #[arg(short, long, env = "MODELLING_BUS_CONFIG", default_value = "modelling-bus.ini")]
    config: PathBuf,

    /// Progress verbosity: 1 = basic, 2 = detailed, 3 = noisy
    #[arg(long, default_value_t = 1)]
    progress_level: u8,

    /// Skip the subscribing surface; this agent only posts
    #[arg(long)]
    posting_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Post a JSON artefact state
    PostState {
        #[arg(long)]
        artefact: String,
        #[arg(long, default_value = DEFAULT_JSON_VERSION)]
        json_version: String,
        /// Local JSON file carrying the state
        #[arg(long)]
        file: PathBuf,
    },
    /// Post a proposed artefact update
    PostUpdate {
        #[arg(long)]
        artefact: String,
        #[arg(long, default_value = DEFAULT_JSON_VERSION)]
        json_version: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Post a considered artefact variation
    PostConsidering {
        #[arg(long)]
        artefact: String,
        #[arg(long, default_value = DEFAULT_JSON_VERSION)]
        json_version: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Post a raw artefact file
    PostRaw {
        #[arg(long)]
        artefact: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Post an observation (JSON file, or inline with --streamed)
    PostObservation {
        #[arg(long)]
        observation: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        streamed: bool,
    },
    /// Listen for postings of an artefact and log every accepted view change
    Listen {
        #[arg(long)]
        artefact: String,
        #[arg(long, default_value = DEFAULT_JSON_VERSION)]
        json_version: String,
        /// Agent to listen to; defaults to every agent in the experiment
        #[arg(long, default_value = ANY_AGENT)]
        agent: String,
    },
    /// Recursively delete an environment from both transports
    DeleteEnvironment {
        /// Environment to delete; defaults to the configured experiment
        #[arg(long)]
        environment: Option<String>,
    },
}

fn read_payload(reporter: &Reporter, file: &PathBuf) -> Vec<u8> {
    match std::fs::read(file) {
        Ok(payload) => payload,
        Err(err) => reporter.fatal(format!("Cannot read {}: {err}.", file.display())),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("modelling_bus=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let reporter = Arc::new(Reporter::new(ProgressLevel::from_number(args.progress_level)));

    let config = match BusConfig::load(&args.config) {
        Ok(config) => config,
        Err(err) => reporter.fatal(format!("{err}.")),
    };
    reporter.progress(
        ProgressLevel::Basic,
        format!("Using config: {}", args.config.display()),
    );

    let bus = match BusConnector::connect(&config, Arc::clone(&reporter), args.posting_only).await {
        Ok(bus) => bus,
        Err(err) => reporter.fatal(format!("{err}.")),
    };

    match args.command {
        Command::PostState {
            artefact,
            json_version,
            file,
        } => {
            let payload = read_payload(&reporter, &file);
            let connector = ArtefactConnector::new(bus, &json_version, &artefact);
            connector.post_state(&payload).await;
        }
        Command::PostUpdate {
            artefact,
            json_version,
            file,
        } => {
            let payload = read_payload(&reporter, &file);
            let connector = ArtefactConnector::new(bus, &json_version, &artefact);
            connector.get_state(&config.agent_id).await;
            connector.post_update(&payload).await;
        }
        Command::PostConsidering {
            artefact,
            json_version,
            file,
        } => {
            let payload = read_payload(&reporter, &file);
            let connector = ArtefactConnector::new(bus, &json_version, &artefact);
            connector.get_update(&config.agent_id).await;
            connector.post_considering(&payload).await;
        }
        Command::PostRaw { artefact, file } => {
            let connector = ArtefactConnector::new(bus, DEFAULT_JSON_VERSION, &artefact);
            connector.post_raw_state(&file).await;
        }
        Command::PostObservation {
            observation,
            file,
            streamed,
        } => {
            let payload = read_payload(&reporter, &file);
            let connector = ObservationConnector::new(bus, &observation);
            if streamed {
                connector.post_streamed(&payload).await;
            } else {
                connector.post_json(&payload).await;
            }
        }
        Command::Listen {
            artefact,
            json_version,
            agent,
        } => {
            let connector = ArtefactConnector::new(bus, &json_version, &artefact);

            connector
                .listen_for_state_postings(
                    &agent,
                    Arc::new(|artefact: &ArtefactConnector| {
                        info!(
                            artefact = artefact.artefact_id(),
                            anchor = %artefact.current_timestamp(),
                            "state: {}",
                            artefact.current_content()
                        );
                    }),
                )
                .await;
            connector
                .listen_for_update_postings(
                    &agent,
                    Arc::new(|artefact: &ArtefactConnector| {
                        info!(
                            artefact = artefact.artefact_id(),
                            "update: {}",
                            artefact.updated_content()
                        );
                    }),
                )
                .await;
            connector
                .listen_for_considering_postings(
                    &agent,
                    Arc::new(|artefact: &ArtefactConnector| {
                        info!(
                            artefact = artefact.artefact_id(),
                            "considering: {}",
                            artefact.considered_content()
                        );
                    }),
                )
                .await;

            reporter.progress(ProgressLevel::Basic, "Listening; press Ctrl+C to stop.");
            let _ = tokio::signal::ctrl_c().await;
        }
        Command::DeleteEnvironment { environment } => {
            bus.delete_environment(environment.as_deref()).await;
        }
    }

    Ok(())
}
