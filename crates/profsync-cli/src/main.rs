//! profsync command line
//!
//! Prints the effective configuration and replays save and upload flows
//! against an in-process store, printing every event as it happens.

mod sim;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use profsync_core::prelude::*;
use profsync_core::types::MediaType;
use sim::SimulatedGateway;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn cli() -> Command {
    Command::new("profsync")
        .version(profsync_core::VERSION)
        .about("Debounced profile saves and atomic gallery uploads")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Output as JSON"),
        )
        .subcommand(
            Command::new("simulate-save")
                .about("Type into a profile field and watch the writes")
                .arg(
                    Arg::new("edits")
                        .long("edits")
                        .default_value("5")
                        .value_parser(value_parser!(usize))
                        .help("Number of keystrokes"),
                )
                .arg(
                    Arg::new("interval-ms")
                        .long("interval-ms")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Delay between keystrokes"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("150")
                        .value_parser(value_parser!(u64))
                        .help("Simulated store latency"),
                )
                .arg(
                    Arg::new("fail-writes")
                        .long("fail-writes")
                        .default_value("0")
                        .value_parser(value_parser!(usize))
                        .help("Number of leading writes that fail"),
                ),
        )
        .subcommand(
            Command::new("simulate-upload")
                .about("Replace a gallery and watch progress and rollback")
                .arg(
                    Arg::new("count")
                        .long("count")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Number of images"),
                )
                .arg(
                    Arg::new("size")
                        .long("size")
                        .default_value("1024")
                        .value_parser(value_parser!(usize))
                        .help("Bytes per image"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("50")
                        .value_parser(value_parser!(u64))
                        .help("Simulated store latency"),
                )
                .arg(
                    Arg::new("fail-at")
                        .long("fail-at")
                        .value_parser(value_parser!(usize))
                        .help("Zero-based index of the upload that fails"),
                )
                .arg(
                    Arg::new("fail-deletes")
                        .long("fail-deletes")
                        .action(ArgAction::SetTrue)
                        .help("Rollback deletes fail, leaving orphans"),
                ),
        )
        .subcommand(Command::new("config").about("Print the effective configuration"))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ProfsyncConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProfsyncConfig::default(),
    };
    let json = matches.get_flag("json");

    match matches.subcommand() {
        Some(("simulate-save", args)) => simulate_save(config, args, json).await,
        Some(("simulate-upload", args)) => simulate_upload(config, args, json).await,
        Some(("config", _)) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", config.to_toml_string()?);
            }
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}

async fn simulate_save(config: ProfsyncConfig, args: &ArgMatches, json: bool) -> Result<ExitCode> {
    let edits = arg::<usize>(args, "edits")?;
    let interval = Duration::from_millis(arg::<u64>(args, "interval-ms")?);
    let latency = Duration::from_millis(arg::<u64>(args, "latency-ms")?);
    let gateway = Arc::new(
        SimulatedGateway::new(latency)
            .with_failing_writes(arg::<usize>(args, "fail-writes")?),
    );

    let registry = SessionRegistry::new(config, Some(gateway.clone() as Arc<dyn StorageGateway>))?;
    let printer = spawn_printer(registry.subscribe(), json);
    let entity = EntityId::new("simulated-profile");
    let session = registry.session(&entity);

    let text = "Hello, profsync!";
    for n in 1..=edits {
        let typed: String = text.chars().cycle().take(n).collect();
        session.edit("bio", FieldValue::String(typed))?;
        tokio::time::sleep(interval).await;
    }

    let settle = registry.config().debounce() + latency * 2;
    tokio::time::sleep(settle).await;

    let failures = registry.shutdown_all().await;
    drop(session);
    drop(registry);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    let stored = gateway.store().profile(&entity).unwrap_or_default();
    if json {
        println!("{}", serde_json::json!({ "profile": stored, "failed": !failures.is_empty() }));
    } else {
        println!("stored profile: {}", stored.to_json());
        for (entity, err) in &failures {
            println!("final save for {entity} failed: {err}");
        }
    }
    Ok(if failures.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn simulate_upload(config: ProfsyncConfig, args: &ArgMatches, json: bool) -> Result<ExitCode> {
    let count = arg::<usize>(args, "count")?;
    let size = arg::<usize>(args, "size")?;
    let gateway = Arc::new(
        SimulatedGateway::new(Duration::from_millis(arg::<u64>(args, "latency-ms")?))
            .with_failing_upload(args.get_one::<usize>("fail-at").copied())
            .with_failing_deletes(args.get_flag("fail-deletes")),
    );

    let registry = SessionRegistry::new(config, Some(gateway.clone() as Arc<dyn StorageGateway>))?;
    let printer = spawn_printer(registry.subscribe(), json);
    let session = registry.session(&EntityId::new("simulated-profile"));

    let assets: Vec<Asset> = (0..count)
        .map(|i| Asset::new(format!("image-{i}.png"), MediaType::PNG, vec![0x89; size]))
        .collect();
    let result = session.replace_gallery(assets).await;

    let _ = registry.shutdown_all().await;
    drop(session);
    drop(registry);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    let remaining = gateway.store().asset_count();
    match result {
        Ok(gallery) => {
            if json {
                println!("{}", serde_json::json!({ "gallery": gallery, "stored_assets": remaining }));
            } else {
                for entry in &gallery {
                    println!("committed {} -> {}", entry.remote_id, entry.url);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "error": err.to_string(), "stored_assets": remaining })
                );
            } else {
                println!("batch failed: {err}");
                println!("assets left in store: {remaining}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn spawn_printer(
    mut events: broadcast::Receiver<SyncEvent>,
    json: bool,
) -> tokio::task::JoinHandle<()> {
    let start = Instant::now();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let at = start.elapsed().as_millis();
                    if json {
                        if let Ok(line) = serde_json::to_string(&event) {
                            println!("{line}");
                        }
                    } else {
                        println!("[{at:>6} ms] {}", describe(&event));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn describe(event: &SyncEvent) -> String {
    match event {
        SyncEvent::Dirty { entity } => format!("{entity}: unsaved changes"),
        SyncEvent::Saving { entity } => format!("{entity}: saving"),
        SyncEvent::Saved { entity } => format!("{entity}: saved"),
        SyncEvent::SaveFailed { entity, reason } => format!("{entity}: save failed ({reason})"),
        SyncEvent::UploadProgress {
            entity,
            completed,
            total,
            fraction,
            ..
        } => format!("{entity}: uploaded {completed}/{total} ({:.0}%)", fraction * 100.0),
        SyncEvent::BatchFailed {
            entity,
            reason,
            orphans,
            ..
        } => {
            if orphans.is_empty() {
                format!("{entity}: batch failed, rolled back ({reason})")
            } else {
                format!("{entity}: batch failed ({reason}), {} orphaned", orphans.len())
            }
        }
    }
}

fn arg<T: Clone + Send + Sync + 'static>(args: &ArgMatches, name: &str) -> Result<T> {
    args.get_one::<T>(name)
        .cloned()
        .with_context(|| format!("missing --{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let matches = cli()
            .try_get_matches_from(["profsync", "simulate-upload", "--fail-at", "2", "--json"])
            .unwrap();
        assert!(matches.get_flag("json"));
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "simulate-upload");
        assert_eq!(args.get_one::<usize>("fail-at"), Some(&2));
        assert_eq!(arg::<usize>(args, "count").unwrap(), 3);
    }

    #[test]
    fn describe_progress() {
        let event = SyncEvent::UploadProgress {
            entity: EntityId::new("p1"),
            batch: profsync_core::types::BatchId::new(),
            completed: 1,
            total: 4,
            fraction: 0.25,
        };
        assert_eq!(describe(&event), "p1: uploaded 1/4 (25%)");
    }
}
