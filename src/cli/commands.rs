use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::ArtifactCache;
use crate::config::AnnotationConfig;
use crate::introspect::ManifestProvider;
use crate::lock::MemoryStore;
use crate::logging::init_logging;

/// Command-line interface for annoroute
#[derive(Parser)]
#[command(name = "annoroute")]
#[command(about = "Compile routes, lock policies and input rules from doc-comment annotations", long_about = None)]
pub struct Cli {
    /// Log level: trace, debug, info, warn, error
    #[arg(long, global = true, default_value = "warn", env = "ANNOROUTE_LOG_LEVEL")]
    pub log_level: String,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Compile modules and write their artifacts
    Compile {
        /// Configuration file (YAML or JSON); defaults plus environment when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Type manifest describing controllers and their doc comments
        #[arg(short, long)]
        manifest: PathBuf,

        /// Compile only this module instead of every configured one
        #[arg(long)]
        module: Option<String>,

        /// Rebuild even when the persisted artifact is fresh
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Resolve a request path to its handler
    Lookup {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        manifest: PathBuf,

        /// Request path, e.g. `admin/users/42`
        #[arg(short, long)]
        path: String,

        /// Search only this module
        #[arg(long)]
        module: Option<String>,
    },
    /// Print the compiled lock annotation map
    Locks {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        manifest: PathBuf,

        #[arg(long)]
        module: Option<String>,
    },
    /// Print the compiled input validation rules
    Rules {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long)]
        manifest: PathBuf,

        #[arg(long)]
        module: Option<String>,
    },
}

/// Parse arguments, set up logging and run the selected command.
pub fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    run(&cli)
}

/// Run an already parsed command line.
pub fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Compile {
            config,
            manifest,
            module,
            force,
        } => {
            let cache = open_cache(config.as_deref(), manifest)?;
            for module in selected_modules(&cache, module.as_deref())? {
                let compiled = cache
                    .ensure(&module, *force)
                    .with_context(|| format!("Failed to compile module {module}"))?;
                println!(
                    "{module}: {} routes, {} locks, {} validations -> {}",
                    compiled.routes.routes.len(),
                    compiled.locks.len(),
                    compiled.validations.len(),
                    cache.config().module_dir(&module).display()
                );
            }
            Ok(())
        }
        Commands::Lookup {
            config,
            manifest,
            path,
            module,
        } => {
            let cache = open_cache(config.as_deref(), manifest)?;
            let found = match module {
                Some(module) => cache.resolve(module, path)?,
                None => cache.resolve_any(path)?,
            };
            match found {
                Some(route) => {
                    let out = json!({
                        "module": route.module,
                        "handler": route.handler,
                        "template": route.template,
                        "arity": route.arity,
                        "params": route.params,
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
                None => println!("no route for {path}"),
            }
            Ok(())
        }
        Commands::Locks {
            config,
            manifest,
            module,
        } => {
            let cache = open_cache(config.as_deref(), manifest)?;
            for module in selected_modules(&cache, module.as_deref())? {
                let compiled = cache.ensure(&module, false)?;
                println!("{}", serde_json::to_string_pretty(&json!({ module: compiled.locks }))?);
            }
            Ok(())
        }
        Commands::Rules {
            config,
            manifest,
            module,
        } => {
            let cache = open_cache(config.as_deref(), manifest)?;
            for module in selected_modules(&cache, module.as_deref())? {
                let compiled = cache.ensure(&module, false)?;
                let rules = json!({ module: compiled.validations });
                println!("{}", serde_json::to_string_pretty(&rules)?);
            }
            Ok(())
        }
    }
}

fn open_cache(config: Option<&Path>, manifest: &Path) -> anyhow::Result<ArtifactCache> {
    let config = match config {
        Some(path) => AnnotationConfig::load(path)?,
        None => AnnotationConfig::from_env(),
    };
    let provider = ManifestProvider::load(manifest)?;
    let cache = ArtifactCache::new(Arc::new(provider), config, Arc::new(MemoryStore::new()))?;
    cache.warm()?;
    Ok(cache)
}

fn selected_modules(cache: &ArtifactCache, module: Option<&str>) -> anyhow::Result<Vec<String>> {
    match module {
        Some(module) => Ok(vec![module.to_string()]),
        None if cache.config().modules.is_empty() => {
            anyhow::bail!("No module given and none configured; pass --module or set ANNOROUTE_MODULES")
        }
        None => Ok(cache.config().modules.clone()),
    }
}
