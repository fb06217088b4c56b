use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "tsp")]
#[command(about = "Trading challenge engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Replay a JSON-lines script against an in-memory store
    Replay {
        /// Script file, one JSON op per line
        #[arg(long)]
        script: PathBuf,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Fail instead of warning when config has keys nothing reads
        #[arg(long, default_value_t = false)]
        strict_config: bool,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations. Refuses while ACTIVE challenges exist unless --yes is given.
    Migrate {
        /// Acknowledge you are migrating a DB with live challenges.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = tsp_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = tsp_db::status(&pool).await?;
                    println!("db_ok={} has_challenges_table={}", s.ok, s.has_challenges_table);
                }
                DbCmd::Migrate { yes } => {
                    let n = tsp_db::count_active_challenges(&pool).await?;
                    if n > 0 && !yes {
                        anyhow::bail!(
                            "REFUSING MIGRATE: detected {} active challenge(s). Re-run with: `tsp db migrate --yes`",
                            n
                        );
                    }
                    tsp_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let loaded = commands::load_config(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Replay {
            script,
            config_paths,
            strict_config,
        } => {
            commands::replay::replay_file(&script, &config_paths, strict_config).await?;
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
