//! XJP Fleet - 依赖有序的部署/销毁编排器
//!
//! Usage:
//! - Deploy everything: `xjp-fleet deploy`
//! - Destroy some packages: `xjp-fleet destroy api worker/eu`
//! - Limit concurrency: `xjp-fleet deploy --max-processing 2`
//! - Drift report only: `xjp-fleet status`

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use xjp_fleet::config::env::constants::{EXIT_CONFIG_ERROR, EXIT_RUN_FAILED, VERSION};
use xjp_fleet::domain::RunMode;
use xjp_fleet::infra::Remotes;
use xjp_fleet::{EnvConfig, Fleet, FleetError, FleetManifest, RunOptions};

/// 子命令
#[derive(Debug, PartialEq)]
enum Command {
    Run(RunMode),
    Status,
}

/// 命令行参数
#[derive(Debug)]
struct CliArgs {
    command: Command,
    packages: Vec<String>,
    options: RunOptions,
}

/// 解析命令行参数
fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut command = None;
    let mut packages = Vec::new();
    let mut options = RunOptions::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--max-processing" if i + 1 < args.len() => {
                let value: usize = args[i + 1]
                    .parse()
                    .map_err(|_| format!("--max-processing expects a number, got {}", args[i + 1]))?;
                options.max_processing = Some((value > 0).then_some(value));
                i += 2;
            }
            "--force" => {
                options.force = true;
                i += 1;
            }
            "--no-deps" => {
                options.track_dependencies = false;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("xjp-fleet {}", VERSION);
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => return Err(format!("Unknown option: {}", flag)),
            word if command.is_none() => {
                command = Some(match word {
                    "deploy" => Command::Run(RunMode::Deploy),
                    "destroy" => Command::Run(RunMode::Destroy),
                    "status" => Command::Status,
                    other => return Err(format!("Unknown command: {}", other)),
                });
                i += 1;
            }
            package => {
                packages.push(package.to_string());
                i += 1;
            }
        }
    }

    Ok(CliArgs {
        command: command.ok_or("Missing command")?,
        packages,
        options,
    })
}

fn print_help() {
    println!("XJP Fleet - dependency-ordered deploy/destroy orchestrator");
    println!();
    println!("USAGE:");
    println!("    xjp-fleet <deploy|destroy|status> [PACKAGE...] [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --max-processing <N>   Process at most N packages at once (0 = unbounded)");
    println!("    --force                Run packages that are already at their target status");
    println!("    --no-deps              Ignore deploy/destroy ordering");
    println!("    -V, --version          Print version");
    println!("    -h, --help             Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    FLEET_ENVIRONMENT, FLEET_IDENTITY (required)");
    println!("    FLEET_MANIFEST, FLEET_WORK_DIR, FLEET_MAX_PROCESSING");
    println!("    FLEET_PARAM_STORE_URL, FLEET_KMS_URL, FLEET_KMS_KEY_ID, FLEET_REGISTRY_URL");
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("Error: {}", message);
            eprintln!();
            print_help();
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("xjp_fleet=info")),
        )
        .with_target(false)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            std::process::exit(EXIT_RUN_FAILED);
        }
    };
    let code = rt.block_on(async {
        match execute(cli).await {
            Ok(code) => code,
            Err(e) => {
                error!("{:#}", e);
                e.downcast_ref::<FleetError>()
                    .map_or(EXIT_RUN_FAILED, FleetError::exit_code)
            }
        }
    });
    std::process::exit(code);
}

async fn execute(cli: CliArgs) -> anyhow::Result<i32> {
    let config = EnvConfig::from_env()?;
    info!(
        version = VERSION,
        environment = %config.environment,
        manifest = %config.manifest_path.display(),
        "Starting xjp-fleet"
    );

    let manifest = FleetManifest::load(&config.manifest_path)?;
    let remotes = Remotes::from_config(&config.remote)
        .map_err(|e| FleetError::Config(e.to_string()))?;
    let mut fleet = Fleet::new(config, &manifest, remotes)?;

    match cli.command {
        Command::Status => {
            let reports = fleet.status_report(&cli.packages).await?;
            for report in &reports {
                println!(
                    "{:<32} {:<14} {:<14} {}",
                    report.package.to_string(),
                    report.environment.as_str(),
                    report.real.as_str(),
                    report.process
                );
                for line in &report.details {
                    println!("    {}", line);
                }
            }
            Ok(0)
        }
        Command::Run(mode) => {
            let cancel = CancellationToken::new();
            spawn_interrupt_handler(&fleet, cancel.clone());
            spawn_status_logger(&fleet);

            let summary = fleet
                .run(mode, &cli.packages, cli.options, cancel)
                .await
                .with_context(|| format!("{} run failed", mode))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(if summary.success() { 0 } else { EXIT_RUN_FAILED })
        }
    }
}

/// Ctrl-C：停止派发并终止所有子进程
fn spawn_interrupt_handler(fleet: &Fleet, cancel: CancellationToken) {
    let processes = fleet.processes();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
            processes.cancel_all().await;
        }
    });
}

fn spawn_status_logger(fleet: &Fleet) {
    let mut events = fleet.hub().subscribe_status();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(
                    package = %event.package,
                    status = %event.process,
                    environment = ?event.environment,
                    "Status changed"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Status logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
