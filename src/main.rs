use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use notebert::{
    Controller,
    SemanticService,
    cli::{Cli, Command, ConfigAction, IndexArgs, SearchArgs},
    config_db::{self, ConfigDb, EngineSettings},
    data_dir::DataDir,
    error::{Error, Result},
    events::Notification,
    search,
    watcher::WatchConfig,
};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

const TUNABLE_KEYS: &[&str] = &[
    config_db::CHUNK_SIZE,
    config_db::CHUNK_OVERLAP,
    config_db::SIMILARITY_CEILING,
    config_db::OVERFETCH_FACTOR,
];

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("NOTEBERT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    match cli.command {
        Command::Config { action } => {
            let config_db = ConfigDb::open(&data_dir.config_db())?;
            cmd_config(&config_db, action)?;
        }
        Command::Index(args) => {
            let service = SemanticService::open(data_dir)?;
            cmd_index(&service, cli.model.as_deref(), &args).await?;
        }
        Command::Search(args) => {
            let service = SemanticService::open(data_dir)?;
            cmd_search(&service, cli.model.as_deref(), &args).await?;
        }
        Command::Watch => {
            let service = Arc::new(SemanticService::open(data_dir)?);
            cmd_watch(service, cli.model.as_deref()).await?;
        }
        Command::Status(args) => {
            let service = SemanticService::open(data_dir)?;
            cmd_status(&service, args.json).await?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

/// The model given on the command line, else the stored one.
fn resolve_model(
    service: &SemanticService,
    overridden: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(path) = overridden {
        return Ok(path.to_path_buf());
    }
    service.config_db().model_path()?.ok_or_else(|| {
        Error::Config(
            "no model configured; pass --model or run `notebert config set-model <path>`"
                .into(),
        )
    })
}

fn cmd_config(config_db: &ConfigDb, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let settings = config_db.list_settings()?;
            if json {
                let map: serde_json::Map<String, serde_json::Value> = settings
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                println!("{}", serde_json::Value::Object(map));
            } else if settings.is_empty() {
                println!("No settings stored.");
            } else {
                for (key, value) in settings {
                    println!("{key} = {value}");
                }
            }
        }
        ConfigAction::SetRoot { path } => {
            if !path.is_dir() {
                return Err(Error::NotFound {
                    kind: "directory",
                    name: path.display().to_string(),
                });
            }
            let root = path.canonicalize()?;
            config_db.set_notes_root(&root)?;
            eprintln!("Notes root set to {}", root.display());
        }
        ConfigAction::SetModel { path } => {
            config_db
                .set_setting(config_db::MODEL_PATH, &path.to_string_lossy())?;
            eprintln!("Model set to {}", path.display());
        }
        ConfigAction::Set { key, value } => {
            if !TUNABLE_KEYS.contains(&key.as_str()) {
                return Err(Error::Config(format!(
                    "unknown setting {key:?}; expected one of {}",
                    TUNABLE_KEYS.join(", ")
                )));
            }

            let previous = config_db.get_setting(&key)?;
            config_db.set_setting(&key, &value)?;
            if let Err(e) = EngineSettings::load(config_db) {
                match previous {
                    Some(old) => config_db.set_setting(&key, &old)?,
                    None => {
                        config_db.remove_setting(&key)?;
                    }
                }
                return Err(e);
            }
            eprintln!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            if !config_db.remove_setting(&key)? {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
        }
    }
    Ok(())
}

async fn cmd_index(
    service: &SemanticService,
    model: Option<&Path>,
    args: &IndexArgs,
) -> Result<()> {
    let model_path = resolve_model(service, model)?;
    service.initialize(&model_path).await?;

    let report = service.reindex_all().await;
    service.shutdown().await;
    let report = report?;

    if args.json {
        println!(
            "{}",
            serde_json::json!({
                "processed": report.processed,
                "failed": report.failed,
                "chunks": report.chunks,
                "purged": report.purged,
            })
        );
    } else {
        eprintln!(
            "Indexed {} note(s) into {} chunk(s); {} failed, {} removed.",
            report.processed, report.chunks, report.failed, report.purged
        );
    }
    Ok(())
}

async fn cmd_search(
    service: &SemanticService,
    model: Option<&Path>,
    args: &SearchArgs,
) -> Result<()> {
    let model_path = resolve_model(service, model)?;
    service.initialize(&model_path).await?;

    let results = service
        .search_similar_notes(&args.query, args.exclude.as_deref(), args.count)
        .await;
    // Let ghost cleanup finish before the process exits.
    service.shutdown().await;
    let results = results?;

    if args.json {
        search::format_json(&results, &args.query)?;
    } else {
        search::format_human(&results);
    }
    Ok(())
}

async fn cmd_watch(
    service: Arc<SemanticService>,
    model: Option<&Path>,
) -> Result<()> {
    let model_path = resolve_model(&service, model)?;
    let controller = Controller::new(Arc::clone(&service), WatchConfig::default());

    let mut notifications = service.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            let notification = match notifications.recv().await {
                Ok(notification) => notification,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "notification reporter fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match notification {
                Notification::NoteIndexed { note_id } => {
                    tracing::info!(%note_id, "reindexed");
                }
                Notification::NoteIndexFailed { note_id, error } => {
                    tracing::warn!(%note_id, %error, "could not reindex");
                }
                Notification::NoteRemoved { note_id } => {
                    tracing::info!(%note_id, "removed from index");
                }
                Notification::GhostIndexDetected { note_ids } => {
                    tracing::info!(count = note_ids.len(), "stale rows found");
                }
            }
        }
    });

    let report = controller.start(&model_path).await;
    match report {
        Ok(report) => {
            eprintln!(
                "Indexed {} note(s); watching {} (Ctrl-C to stop)",
                report.processed,
                service.notes_root()?.display()
            );
            tokio::signal::ctrl_c().await?;
        }
        Err(e) => {
            controller.stop().await;
            reporter.abort();
            return Err(e);
        }
    }

    eprintln!("Stopping...");
    controller.stop().await;
    reporter.abort();
    Ok(())
}

async fn cmd_status(service: &SemanticService, json: bool) -> Result<()> {
    service.open_existing_index().await?;
    let status = service.status().await?;
    let model = service.config_db().model_path()?;
    let settings = service.settings();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "data_dir": service.data_dir().root(),
                "notes_root": status.notes_root,
                "model": model,
                "notes": status.indexed_notes,
                "chunks": status.indexed_chunks,
                "chunk_size": settings.chunking.chunk_size,
                "chunk_overlap": settings.chunking.overlap,
                "similarity_ceiling": settings.retrieval.similarity_ceiling,
                "overfetch_factor": settings.retrieval.overfetch_factor,
            })
        );
    } else {
        let show = |path: Option<PathBuf>| {
            path.map(|p| p.display().to_string())
                .unwrap_or_else(|| "(not set)".to_string())
        };
        println!("Data directory: {}", service.data_dir().root().display());
        println!("Notes root: {}", show(status.notes_root));
        println!("Model: {}", show(model));
        println!(
            "Indexed: {} note(s), {} chunk(s)",
            status.indexed_notes, status.indexed_chunks
        );
        println!(
            "Chunking: {} chars, {} overlap",
            settings.chunking.chunk_size, settings.chunking.overlap
        );
    }
    Ok(())
}
