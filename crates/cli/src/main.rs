use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use cli::commands::{self, PolicyOverrides};
use cli::report;
use regroup_core::config::{self, AppConfig};
use regroup_core::models::UnresolvedPolicy;
use regroup_core::pipeline;
use regroup_core::resolver::ConsoleResolver;
use regroup_core::transport::AdbTransport;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.backup_dir {
        cfg.workspace.backup_dir = dir;
    }
    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::Extract { json } => {
            let (_, apps) = commands::extract(&cfg).await?;
            if json {
                report::print_json(&apps)
            } else {
                println!("{}", report::apps(&apps));
                Ok(())
            }
        }
        Commands::Classify {
            ai,
            skip_failed,
            json,
        } => {
            cfg.classification.retry_failed &= !skip_failed;
            let result = commands::classify(&cfg, ai, cancel).await?;
            if json {
                report::print_json(&result)
            } else {
                println!("{}", report::classification(&result));
                Ok(())
            }
        }
        Commands::Resolve => {
            let mut resolver = ConsoleResolver::new();
            let result = commands::resolve(&cfg, &mut resolver).await?;
            println!("{}", report::manual(&result));
            Ok(())
        }
        Commands::EnrichNames => {
            let result = commands::enrich_names(&cfg, cancel).await?;
            println!("{}", report::names(&result));
            Ok(())
        }
        Commands::Stats { json } => {
            let stats = commands::stats(&cfg)?;
            if json {
                report::print_json(&stats)
            } else {
                println!("{}", report::stats(&stats));
                Ok(())
            }
        }
        Commands::Reset { identifiers } => {
            let result = commands::reset(&cfg, &identifiers)?;
            println!("{}", report::reset(&result));
            Ok(())
        }
        Commands::Import { file } => {
            let result = commands::import(&cfg, &file)?;
            println!("{}", report::import(&result));
            Ok(())
        }
        Commands::Layout { policy, dry_run, json } => {
            let policy = policy.overrides().apply(cfg.layout.policy());
            let outcome = commands::layout(&cfg, &policy, dry_run).await?;
            if json {
                report::print_json(&outcome)
            } else {
                println!("{}", report::layout(&outcome, dry_run));
                Ok(())
            }
        }
        Commands::Restore { discard } => {
            let outcome = commands::restore(&cfg, discard)?;
            println!("{}", report::restore(&outcome));
            Ok(())
        }
        Commands::Pull => {
            let local = commands::pull(&cfg, &transport(&cfg)).await?;
            println!("backup pulled to {}", local.display());
            Ok(())
        }
        Commands::Push => {
            let files = commands::push(&cfg, &transport(&cfg)).await?;
            println!("{files} files pushed");
            Ok(())
        }
        Commands::All { ai, policy, json } => {
            let chain = pipeline::build_sources(&cfg, ai)?;
            let policy = policy.overrides().apply(cfg.layout.policy());
            let mut resolver = ConsoleResolver::new();
            let summary = commands::all(&cfg, &chain, &mut resolver, &policy, cancel).await?;
            if json {
                report::print_json(&summary)
            } else {
                println!("{}", report::run(&summary));
                Ok(())
            }
        }
    }
}

/// The flag is checked between lookups; in-flight calls finish first.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let set = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight lookups");
            set.store(true, Ordering::SeqCst);
        }
    });
    flag
}

fn transport(cfg: &AppConfig) -> AdbTransport {
    AdbTransport::new(&cfg.device.adb_path)
        .with_serial(cfg.device.serial.clone())
        .with_remote_roots(cfg.device.remote_roots.clone())
}

#[derive(Parser)]
#[command(name = "regroup")]
#[command(about = "Regroup ColorOS launcher apps into category folders", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Local Backup directory (holds Data/<timestamp>)
    #[arg(long, global = true)]
    backup_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unpack the newest backup and list its apps
    Extract {
        #[arg(long)]
        json: bool,
    },
    /// Look up categories for apps without a cached answer
    Classify {
        /// Also ask the AI source
        #[arg(long)]
        ai: bool,
        /// Leave apps whose earlier lookups all failed to manual resolution
        #[arg(long)]
        skip_failed: bool,
        #[arg(long)]
        json: bool,
    },
    /// Assign categories by hand for what is still unresolved
    Resolve,
    /// Fill in missing display names
    EnrichNames,
    /// Cache counts by status and category
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Mark cached records pending so they are looked up again
    Reset {
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
    /// Seed the cache from a legacy identifier -> category JSON mapping
    Import { file: PathBuf },
    /// Plan folders and rewrite the backup
    Layout {
        #[command(flatten)]
        policy: PolicyArgs,
        /// Print the plan without touching the backup
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Put the backup back the way it was before the first layout write
    Restore {
        /// Delete the restore point instead
        #[arg(long)]
        discard: bool,
    },
    /// Copy the newest backup from the device
    Pull,
    /// Send the rewritten layout back to the device
    Push,
    /// classify, resolve, enrich-names and layout in one go
    All {
        #[arg(long)]
        ai: bool,
        #[command(flatten)]
        policy: PolicyArgs,
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct PolicyArgs {
    #[arg(long)]
    max_apps_per_folder: Option<usize>,
    #[arg(long)]
    max_folders_per_screen: Option<usize>,
    #[arg(long)]
    start_screen: Option<i64>,
    /// What happens to apps without a category
    #[arg(long, value_enum)]
    unresolved: Option<UnresolvedArg>,
}

impl PolicyArgs {
    fn overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            max_apps_per_folder: self.max_apps_per_folder,
            max_folders_per_screen: self.max_folders_per_screen,
            start_screen: self.start_screen,
            unresolved: self.unresolved.map(|u| match u {
                UnresolvedArg::LeaveInPlace => UnresolvedPolicy::LeaveInPlace,
                UnresolvedArg::DefaultBucket => UnresolvedPolicy::DefaultBucket,
            }),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum UnresolvedArg {
    LeaveInPlace,
    DefaultBucket,
}
