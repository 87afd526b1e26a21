//! propmap - inspect and bind device property mappings
//!
//! Devices and products come from a YAML fixture file. Rules come from the
//! same fixtures, or from the SQLite store when `store.database_url` is set.

mod fixtures;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use colored::*;
use propmap_calc::TransformEngine;
use propmap_core::{
    init_logging, load_config, DataTransformer, MappingCache, MappingService, PropmapConfig,
};
use propmap_model::PropertyMap;
use propmap_store::{ChangeFeed, DeviceRegistry, InMemoryRuleStore, RuleStore, SqliteRuleStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::fixtures::{load_rules, Fixtures};

#[derive(Parser)]
#[command(name = "propmap")]
#[command(about = "Device property mapping tool")]
#[command(long_about = "Device property mapping tool

Examples:
  propmap -f fixtures.yaml resolve --device t-1
  propmap -f fixtures.yaml transform --device t-1 --payload '{\"temp_f\": 212}'
  propmap -f fixtures.yaml bind-product --product thermostat --rules rules.yaml")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (toml, yaml or json)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Fixture file with products, devices and rules
    #[arg(short = 'f', long = "fixtures", global = true, env = "PROPMAP_FIXTURES")]
    fixtures: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved mapping of a device
    Resolve {
        #[arg(long)]
        device: String,
    },

    /// Show the product-level mapping, ignoring device rules
    ResolveProduct {
        #[arg(long)]
        product: String,
    },

    /// Transform a property payload as if reported by a device
    Transform {
        #[arg(long)]
        device: String,
        /// Inline JSON object, or @path to a JSON file
        #[arg(long)]
        payload: String,
    },

    /// Bind or unbind device-scoped rules
    BindDevice {
        #[arg(long)]
        device: String,
        /// YAML or JSON list of rules
        #[arg(long)]
        rules: PathBuf,
    },

    /// Bind or unbind product-scoped rules
    BindProduct {
        #[arg(long)]
        product: String,
        #[arg(long)]
        rules: PathBuf,
    },
}

struct Context {
    config: PropmapConfig,
    rules: Arc<dyn RuleStore>,
    registry: Arc<dyn DeviceRegistry>,
    persistent: bool,
}

impl Context {
    async fn build(config: PropmapConfig, fixtures: Option<&Path>) -> Result<Self> {
        let fixtures = match fixtures {
            Some(path) => Fixtures::load(path)?,
            None => {
                warn!("No fixtures given, registry is empty");
                Fixtures::default()
            }
        };
        let registry: Arc<dyn DeviceRegistry> = Arc::new(fixtures.registry());

        let feed = ChangeFeed::default();
        let (rules, persistent): (Arc<dyn RuleStore>, bool) = match &config.store.database_url {
            Some(url) => {
                info!("Using rule store {}", url);
                let store = SqliteRuleStore::connect(url, feed)
                    .await
                    .with_context(|| format!("Failed to open rule store {}", url))?;
                (Arc::new(store), true)
            }
            None => {
                let store = InMemoryRuleStore::new(feed);
                store.save(fixtures.rules.clone()).await?;
                debug!("Loaded {} fixture rules", store.len());
                (Arc::new(store), false)
            }
        };

        Ok(Self {
            config,
            rules,
            registry,
            persistent,
        })
    }

    fn service(&self) -> MappingService {
        MappingService::new(Arc::clone(&self.rules), Arc::clone(&self.registry))
    }
}

fn read_payload(payload: &str) -> Result<PropertyMap> {
    let text = match payload.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload {}", path))?,
        None => payload.to_string(),
    };
    serde_json::from_str(&text).context("Payload must be a JSON object")
}

fn print_json<T: serde::Serialize>(title: &str, value: &T) -> Result<()> {
    println!("{}", title.bright_cyan());
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging)?;

    let ctx = Context::build(config, cli.fixtures.as_deref()).await?;

    match cli.command {
        Commands::Resolve { device } => {
            let details = ctx.service().device_mapping_detail(&device).await?;
            print_json(&format!("Mapping of device {}", device), &details)?;
        },
        Commands::ResolveProduct { product } => {
            let details = ctx.service().product_mapping_detail(&product).await?;
            print_json(&format!("Mapping of product {}", product), &details)?;
        },
        Commands::Transform { device, payload } => {
            let raw = read_payload(&payload)?;
            let service = ctx.service();
            let cache = MappingCache::new(service.resolver().clone(), ctx.config.cache.clone());
            let transformer = DataTransformer::new(cache, Arc::new(TransformEngine::new()));

            let output = transformer.transform(&device, &raw).await;
            print_json(&format!("Properties of device {}", device), &output)?;

            let failures = transformer.engine().failure_count();
            if failures > 0 {
                println!(
                    "{} {} transformation(s) fell back to the raw value",
                    "WARN".yellow(),
                    failures
                );
            }
            debug!("Cache stats: {:?}", transformer.cache().stats());
        },
        Commands::BindDevice { device, rules } => {
            let rules = load_rules(&rules)?;
            let summary = ctx.service().save_device_mapping(&device, rules).await?;
            print_json(&format!("Saved mapping of device {}", device), &summary)?;
            if !ctx.persistent {
                println!("{} No database configured, changes were not persisted", "NOTE".yellow());
            }
        },
        Commands::BindProduct { product, rules } => {
            let rules = load_rules(&rules)?;
            let summary = ctx.service().save_product_mapping(&product, rules).await?;
            print_json(&format!("Saved mapping of product {}", product), &summary)?;
            if !ctx.persistent {
                println!("{} No database configured, changes were not persisted", "NOTE".yellow());
            }
        },
    }

    Ok(())
}
