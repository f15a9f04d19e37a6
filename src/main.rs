use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use podrunner::activity::actions;
use podrunner::config::{LoggingConfig, PodrunnerConfig};
use podrunner::execution::NewExecution;
use podrunner::teardown::StopOutcome;
use podrunner::vault::VaultClient;

#[derive(Parser)]
#[command(
    name = "podrunner",
    about = "Dispatch test executions to container hosts",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to PODRUNNER_CONFIG, then /etc/podrunner/podrunner.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + dispatch loop)
    Serve {
        /// Bind address, overriding the configured one
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run a single dispatch pass and exit
    Dispatch,

    /// Stop an execution's containers on every host
    Stop {
        /// Execution id
        execution_id: String,

        /// User requesting the stop
        #[arg(long)]
        user: String,
    },

    /// Show health and container load of every configured host
    Hosts {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Submit a new execution
    Submit {
        /// Unique execution name
        #[arg(long)]
        name: String,

        /// Requesting user
        #[arg(long)]
        user: String,

        /// Target environment
        #[arg(long)]
        env: String,

        /// Browser to run with
        #[arg(long, default_value = "Chrome")]
        browser: String,

        /// Comma-separated test cases (.tc) and test packs (.tp)
        #[arg(long)]
        tests: String,

        /// Screen capture flag passed to the runner
        #[arg(long, default_value = "N")]
        screen_capture: String,

        /// Frequency label passed to the runner
        #[arg(long, default_value = "Once")]
        frequency: String,

        /// Earliest dispatch time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Look up a secret in Vault
    Secret {
        /// Key within the secret document
        key: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<PodrunnerConfig> {
    match path {
        Some(path) => {
            let mut config = PodrunnerConfig::load(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Ok(PodrunnerConfig::load_or_default()),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            tracing::info!(bind = %config.api.bind, "Starting podrunner daemon");
            podrunner::serve(config).await?;
        }
        Commands::Dispatch => {
            config.validate()?;
            let state = podrunner::open(&config)?;
            let summary = state.orchestrator.run_once().await;
            println!("Dispatched {} execution(s).", summary.fetched);
        }
        Commands::Stop { execution_id, user } => {
            let user = user.trim();
            if user.is_empty() {
                anyhow::bail!("--user must not be blank");
            }
            let state = podrunner::open(&config)?;
            match state.teardown.request_stop(&execution_id, user).await? {
                StopOutcome::Stopped => println!("Execution {execution_id} stopped."),
                StopOutcome::AlreadyCompleted => {
                    println!("Execution {execution_id} already completed.")
                }
            }
        }
        Commands::Hosts { json } => {
            let state = podrunner::open(&config)?;
            let report = state.balancer.host_report().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{:<40} | {:<8} | {:<10} | Environments", "Host", "Healthy", "Containers");
                println!("{:-<40}-|-{:-<8}-|-{:-<10}-|-{:-<20}", "", "", "", "");
                for host in report {
                    let containers = host
                        .containers
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    let envs = if host.environments.is_empty() {
                        "(unmapped)".to_string()
                    } else {
                        host.environments.join(", ")
                    };
                    println!("{:<40} | {:<8} | {:<10} | {}", host.url, host.healthy, containers, envs);
                }
            }
        }
        Commands::Submit {
            name,
            user,
            env,
            browser,
            tests,
            screen_capture,
            frequency,
            at,
        } => {
            let state = podrunner::open(&config)?;
            let new = NewExecution {
                execution_name: name,
                requested_by: user,
                environment: env,
                browser,
                screen_capture,
                scheduled_at: at,
                frequency,
                test_list: tests.split(',').map(str::to_string).collect(),
            };
            let record = state.store.submit(new).await.context("failed to submit execution")?;
            state
                .activity
                .record(
                    &record.requested_by,
                    actions::EXECUTION_SUBMITTED,
                    &format!("Execution: {}", record.execution_name),
                )
                .await;
            println!("Submitted execution {} ({}).", record.id, record.execution_name);
        }
        Commands::Secret { key } => {
            let client = VaultClient::new(config.vault.clone())?;
            match client.get_secret(&key).await {
                Some(secret) => println!("{secret}"),
                None => anyhow::bail!("secret '{key}' not available"),
            }
        }
    }

    Ok(())
}
