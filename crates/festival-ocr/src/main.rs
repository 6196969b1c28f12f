use std::sync::atomic::Ordering;

use festival_ocr::logging::{init_logging, LogFormat};
use festival_ocr::store::CLAIM_COLUMNS_SQL;
use festival_ocr::{build_poll_loop, load_default_config, WorkerError};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        None => {}
        Some("--print-supabase-sql") => {
            print!("{}", CLAIM_COLUMNS_SQL);
            return;
        }
        Some(other) => {
            eprintln!("Unknown argument: {}", other);
            eprintln!("Usage: {} [--print-supabase-sql]", args[0]);
            std::process::exit(1);
        }
    }

    init_logging(LogFormat::from_env());

    if let Err(e) = run() {
        log::error!("OCR worker failed to start: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), WorkerError> {
    log::info!("Starting festival-ocr {}", env!("CARGO_PKG_VERSION"));

    let config = load_default_config()?;
    let poll_loop = build_poll_loop(&config)?;

    let shutdown = poll_loop.shutdown_handle();
    ctrlc::set_handler(move || {
        log::info!("Shutdown requested, finishing current cycle");
        shutdown.store(true, Ordering::Release);
    })?;

    poll_loop.run();
    Ok(())
}
