//! Versioned objects CLI
//!
//! Inspects a directory of schema definitions: fingerprints, version
//! resolution, backporting envelopes and consistency checks.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use familiar_objects::{
    load_definitions, register_definitions, ObjectRegistry, ObjectVersion, ObjectsConfig,
    VersionChecker, VersionedObject,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "familiar-objects")]
#[command(about = "Inspect and backport versioned object definitions")]
struct Cli {
    /// Config file (defaults to objects.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    /// Definitions directory (overrides registry.definitions)
    #[arg(short, long)]
    definitions: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fingerprint of every object
    Fingerprint {
        /// Emit a JSON object instead of one line per object
        #[arg(long)]
        json: bool,
    },

    /// Show which schema version would hydrate an envelope
    Resolve {
        /// Object name
        name: String,
        /// Requested version
        version: String,
    },

    /// Backport an envelope to an older version
    Backport {
        /// Envelope JSON file
        #[arg(short, long)]
        input: PathBuf,
        /// Target version
        #[arg(short, long)]
        target: String,
    },

    /// Verify fingerprints and run every compatibility routine
    Check {
        /// JSON file of expected fingerprints
        #[arg(short, long)]
        expected: Option<PathBuf>,
    },

    /// Print the object dependency tree
    Deps,
}

fn main() {
    let cli = Cli::parse();

    let config = match ObjectsConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli, config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli, config: ObjectsConfig) -> anyhow::Result<()> {
    let Some(dir) = cli.definitions.or_else(|| config.definitions_path()) else {
        bail!("no definitions directory: pass --definitions or set registry.definitions");
    };

    let registry = ObjectRegistry::from_config(&config.registry);
    let definitions = load_definitions(&dir)
        .with_context(|| format!("loading definitions from {}", dir.display()))?;
    register_definitions(&registry, &definitions)?;
    tracing::info!(count = definitions.len(), "registered definitions");

    let checker = VersionChecker::new(&registry);

    match cli.command {
        Commands::Fingerprint { json } => {
            let hashes = checker.hashes();
            if json {
                println!("{}", serde_json::to_string_pretty(&hashes)?);
            } else {
                for (name, fingerprint) in hashes {
                    println!("{:<32} {}", name, fingerprint);
                }
            }
        }

        Commands::Resolve { name, version } => {
            let requested = ObjectVersion::parse(&version)?;
            let schema = registry.resolve(&name, &requested)?;
            println!("{} {} -> {}", name, requested, schema.version());
        }

        Commands::Backport { input, target } => {
            let target = ObjectVersion::parse(&target)?;
            let content = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let primitive: serde_json::Value = serde_json::from_str(&content)?;
            let obj = VersionedObject::from_primitive(&registry, &primitive, None)?;
            let backported = obj.to_primitive(Some(&target))?;
            println!("{}", serde_json::to_string_pretty(&backported)?);
        }

        Commands::Check { expected } => {
            if let Some(path) = expected {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let expected: BTreeMap<String, String> = serde_json::from_str(&content)?;
                for (name, (want, have)) in checker.diff_hashes(&expected) {
                    println!(
                        "  ❌ {}: expected {}, got {}",
                        name,
                        want.as_deref().unwrap_or("<missing>"),
                        have.as_deref().unwrap_or("<missing>")
                    );
                }
                checker.verify_hashes(&expected)?;
                println!("✅ Fingerprints match");
            }
            checker.check_compatibility_routines()?;
            println!("✅ Compatibility routines pass for {} objects", registry.names().len());
        }

        Commands::Deps => {
            let tree = checker.dependency_tree()?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
    }

    Ok(())
}
