//! Batch front end: read a JSON payload, solve, print the JSON result.

use std::path::Path;
use std::process::ExitCode;

use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rig_model::SimulationPayload;
use rig_solver::simulate;

fn usage() {
    eprintln!("usage:");
    eprintln!("  rig-cli solve <payload.json>");
    eprintln!("  rig-cli check <payload.json>");
}

fn read_payload(path: &Path) -> Result<SimulationPayload, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| format!("{}: {}", path.display(), err))?;
    serde_json::from_str(&text).map_err(|err| format!("{}: {}", path.display(), err))
}

fn solve_file(path: &Path) -> Result<(), String> {
    let payload = read_payload(path)?;
    let started = Utc::now();
    let result = simulate(&payload);
    let elapsed = Utc::now() - started;
    info!(
        ok = result.ok,
        converged = result.converged,
        iterations = result.iterations,
        elapsed_ms = elapsed.num_milliseconds(),
        "solve finished"
    );
    let text = serde_json::to_string_pretty(&result)
        .map_err(|err| format!("result serialization failed: {err}"))?;
    println!("{text}");
    if result.ok { Ok(()) } else { Err(result.reason.unwrap_or_else(|| "solve failed".to_string())) }
}

fn check_file(path: &Path) -> Result<(), String> {
    let payload = read_payload(path)?;
    rig_model::validate(&payload).map_err(|err| err.to_string())?;
    println!("payload_ok: {}", path.display());
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let outcome = match args.get(1).map(String::as_str) {
        Some("solve") if args.len() == 3 => solve_file(Path::new(&args[2])),
        Some("check") if args.len() == 3 => check_file(Path::new(&args[2])),
        _ => {
            usage();
            return ExitCode::from(2);
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
