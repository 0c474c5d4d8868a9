use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use fotodex::config::Config;
use fotodex::db::Database;
use fotodex::models::InitializationMode;
use fotodex::pipeline::{Pipeline, ProcessingMode, WorkerEvent};

struct Args {
    config_path: Option<PathBuf>,
    lrcat_path: Option<PathBuf>,
    directory: Option<PathBuf>,
    mode: ProcessingMode,
    init_mode: InitializationMode,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config_path: None,
        lrcat_path: None,
        directory: None,
        mode: ProcessingMode::NewOnly,
        init_mode: InitializationMode::Full,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("fotodex {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--lrcat" => {
                if i + 1 < args.len() {
                    parsed.lrcat_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --lrcat requires a path argument");
                    std::process::exit(1);
                }
            }
            "--mode" | "-m" => {
                if i + 1 < args.len() {
                    match ProcessingMode::parse(&args[i + 1]) {
                        Some(mode) => parsed.mode = mode,
                        None => {
                            eprintln!("Error: unknown mode '{}'", args[i + 1]);
                            std::process::exit(1);
                        }
                    }
                    i += 1;
                } else {
                    eprintln!("Error: --mode requires an argument");
                    std::process::exit(1);
                }
            }
            "--init" => {
                if i + 1 < args.len() {
                    parsed.init_mode = match args[i + 1].as_str() {
                        "full" => InitializationMode::Full,
                        "llm_only" => InitializationMode::LlmOnly,
                        "bioclip_only" => InitializationMode::BioclipOnly,
                        other => {
                            eprintln!("Error: unknown init mode '{other}'");
                            std::process::exit(1);
                        }
                    };
                    i += 1;
                } else {
                    eprintln!("Error: --init requires an argument");
                    std::process::exit(1);
                }
            }
            arg if !arg.starts_with('-') => {
                parsed.directory = Some(PathBuf::from(arg));
            }
            arg => {
                eprintln!("Error: unknown argument '{arg}'");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!("fotodex - offline photo-catalog enrichment pipeline");
    println!();
    println!("Usage: fotodex [OPTIONS] [DIRECTORY]");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>  Config file (default: ~/.config/fotodex/config.toml)");
    println!("      --lrcat <PATH>   Read inputs from a Lightroom catalog instead of a directory");
    println!("  -m, --mode <MODE>    new_only | new_plus_errors | reprocess_all (default: new_only)");
    println!("      --init <MODE>    full | llm_only | bioclip_only (default: full)");
    println!("  -h, --help           Show this help");
    println!("  -V, --version        Show version");
}

fn main() -> Result<()> {
    let args = parse_args();

    fotodex::logging::init(None)?;

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.paths.database)?;

    let inputs = if let Some(lrcat) = &args.lrcat_path {
        let scan = fotodex::catalog::read_catalog(
            lrcat,
            &config.image_processing.supported_formats,
        )?;
        if !scan.missing.is_empty() {
            tracing::warn!(missing = scan.missing.len(), "Catalog references offline files");
        }
        scan.files
    } else {
        let directory = args
            .directory
            .clone()
            .ok_or_else(|| anyhow!("No input: pass a directory or --lrcat <catalog>"))?;
        fotodex::discovery::discover_images(&directory, &config.image_processing.supported_formats)?
    };

    if inputs.is_empty() {
        println!("No supported images found.");
        return Ok(());
    }

    let pipeline = Pipeline::new(config, args.init_mode)?;

    let (tx, rx) = mpsc::channel();
    let cancel = Arc::new(AtomicBool::new(false));
    let pause = Arc::new(AtomicBool::new(false));

    let progress = std::thread::spawn(move || {
        for event in rx {
            match event {
                WorkerEvent::Started { total } => {
                    println!("Processing {total} images...");
                }
                WorkerEvent::Progress { current, total, filename } => {
                    println!("[{current}/{total}] {filename}");
                }
                WorkerEvent::Completed(_) | WorkerEvent::Cancelled(_) => break,
            }
        }
    });

    let stats = pipeline.run(&db, &inputs, args.mode, Some(tx), cancel, pause);
    let _ = progress.join();

    println!();
    println!("Done in {:.1}s", stats.processing_time);
    println!("  total:            {}", stats.total);
    println!("  processed:        {}", stats.processed);
    println!("  success:          {}", stats.success);
    println!("  errors:           {}", stats.errors);
    println!("  with embedding:   {}", stats.with_embedding);
    println!("  with tags:        {}", stats.with_tags);
    println!("  skipped existing: {}", stats.skipped_existing);

    Ok(())
}
