use hazard_atlas::types::Crs;
use hazard_atlas::{config, departments, pipeline, processing, server};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve hazard and transaction charts over HTTP
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print per-category totals of one dataset for one department
    Summary {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Dataset name from the config file
        #[arg(short, long)]
        dataset: String,
        /// Department code, e.g. 33 or 2A; omitted for regional layers
        #[arg(short = 'D', long)]
        department: Option<String>,
    },
    /// List department codes
    Departments,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { config } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            // The blocking HTTP reader has to be built outside the async runtime.
            let reader = app_config.reader()?;
            let service = pipeline::HazardService::new(reader, app_config.cache_ttl());
            let state = Arc::new(server::AppState {
                config: app_config,
                service,
            });

            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(server::start_server(state))?;
        }
        Commands::Summary {
            config,
            dataset,
            department,
        } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let dataset_config = app_config
                .dataset(dataset)
                .ok_or_else(|| anyhow!("No dataset named '{}' in {:?}", dataset, config))?;
            let path = departments::resolve_path(&dataset_config.path_template, department.as_deref())?;

            let service = pipeline::HazardService::new(app_config.reader()?, app_config.cache_ttl());
            let hazard = service.dataset(&path, dataset_config.crs, dataset_config.variant)?;
            let report = hazard.report();
            println!(
                "{}: {} rows, {} dropped geometries, {} coercion failures",
                path, report.rows_read, report.dropped_geometries, report.coercion_failures
            );

            let aggregated = processing::aggregate_in(&hazard, Crs::Lambert93)?;
            for bucket in &aggregated.buckets {
                let share = if aggregated.total > 0.0 {
                    bucket.value / aggregated.total * 100.0
                } else {
                    0.0
                };
                println!(
                    "  {:>2}  {:<18} {:>16.1}  {:>5.1}%",
                    bucket.category.rank, bucket.category.canonical_label, bucket.value, share
                );
            }
            println!("  total ({:?}): {:.1}", aggregated.measure, aggregated.total);
        }
        Commands::Departments => {
            for code in departments::department_codes() {
                println!("{}", code);
            }
        }
    }

    Ok(())
}
