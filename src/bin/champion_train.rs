//! `champion-train`: train candidates, promote the champion, and recover
//! degraded promotions by hand.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trueno_champion::config::PipelineConfig;
use trueno_champion::pipeline::TrainingPipeline;
use trueno_champion::registry::{
    assign_champion, known_model_names, list_models, load_champion, promote_flagged, KvModelRegistry,
    Predictor, CHAMPION_ALIAS,
};

/// Heart-disease champion training and registry promotion
#[derive(Parser, Debug)]
#[command(name = "champion-train", version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train every configured algorithm and promote the best one (default)
    Train {
        /// Raw table to train on, overriding `data.raw_path`
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
    /// Point the champion alias at a registered version
    Promote {
        /// Registered model name, e.g. heart-disease-random_forest
        #[arg(required_unless_present = "auto")]
        model_name: Option<String>,
        /// Version to promote (latest when omitted)
        #[arg(requires = "model_name")]
        version: Option<u64>,
        /// Promote the version tagged best_model with the highest roc_auc
        #[arg(long, conflicts_with = "model_name")]
        auto: bool,
    },
    /// Show every registered model with its versions and tags
    List,
    /// Score one patient with the current champion
    Predict {
        /// Registered model name
        model_name: String,
        /// Feature values as a JSON object
        #[arg(short, long)]
        features: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    match cli.command.unwrap_or(Command::Train { data: None }) {
        Command::Train { data } => {
            if let Some(path) = data {
                config.data.raw_path = path;
            }
            let report = TrainingPipeline::from_config(config)?.run().await?;
            let winner = report.winner();
            println!(
                "champion: {} (run {}, roc_auc {:.4})",
                winner.algorithm_id(),
                winner.run_id(),
                winner.metrics().roc_auc()
            );
            for excluded in &report.excluded {
                println!("excluded: {} ({})", excluded.algorithm_id, excluded.reason);
            }
            if let Some(promotion) = &report.promotion {
                println!(
                    "registered: {} v{}",
                    promotion.entry.model_name(),
                    promotion.entry.version()
                );
            }
            for warning in &report.warnings {
                println!("warning: {warning}");
            }
            println!("artifacts: {}", report.models_dir.display());
        }
        Command::Promote {
            model_name,
            version,
            auto,
        } => {
            let registry = KvModelRegistry::open(&config.registry.root);
            let entry = match model_name {
                Some(model_name) if !auto => assign_champion(&registry, &model_name, version)
                    .await
                    .with_context(|| format!("promoting {model_name}"))?,
                _ => promote_flagged(&registry, &known_model_names())
                    .await
                    .context("promoting the flagged best model")?,
            };
            println!("{} v{} is now champion", entry.model_name(), entry.version());
        }
        Command::List => {
            let registry = KvModelRegistry::open(&config.registry.root);
            let listings = list_models(&registry, &known_model_names()).await?;
            if listings.is_empty() {
                println!("no models registered under {}", config.registry.root.display());
            }
            for listing in &listings {
                println!("{}", listing.model_name);
                for entry in listing.versions.iter().rev() {
                    let marker = if listing.champion == Some(entry.version()) {
                        format!(" [{CHAMPION_ALIAS}]")
                    } else {
                        String::new()
                    };
                    println!("  v{}{marker}  registered {}", entry.version(), entry.created_at());
                    for (key, value) in entry.tags() {
                        println!("    {key} = {value}");
                    }
                }
            }
        }
        Command::Predict {
            model_name,
            features,
        } => {
            let features: HashMap<String, f64> =
                serde_json::from_str(&features).context("features must be a JSON object of numbers")?;
            let registry = KvModelRegistry::open(&config.registry.root);
            let Some(champion) = load_champion(&registry, &model_name).await? else {
                bail!("{model_name} has no champion");
            };
            let prediction = Predictor::new(champion.package).predict(&features)?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promote_arguments() {
        let cli = Cli::try_parse_from(["champion-train", "promote", "--auto"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Promote { model_name: None, version: None, auto: true })
        ));

        let cli = Cli::try_parse_from(["champion-train", "promote", "heart-disease-random_forest", "2"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Promote { version: Some(2), auto: false, .. })
        ));

        assert!(Cli::try_parse_from(["champion-train", "promote"]).is_err());
        assert!(Cli::try_parse_from(["champion-train", "promote", "m", "--auto"]).is_err());
    }

    #[test]
    fn test_list_and_default_command() {
        let cli = Cli::try_parse_from(["champion-train", "--config", "c.toml", "list"]).unwrap();
        assert!(matches!(cli.command, Some(Command::List)));
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("c.toml")));
        assert!(Cli::try_parse_from(["champion-train"]).unwrap().command.is_none());
    }
}
