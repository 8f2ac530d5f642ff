use super::{json_pretty, load_config, shutdown_requested, EXIT_SUCCESS};
use rune_enclave::signal::SIGTERM;
use rune_enclave::{EnclaveRuntime, PayloadStdio, BROADCAST_PID};
use rune_schema::LogLevel;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::warn;

const INTERRUPTED: &str = "interrupted before the payload was started";

pub struct RunOptions {
    pub log_level: Option<LogLevel>,
    pub attest: bool,
    pub stop_after: Option<Duration>,
}

/// Start the enclave, launch one payload, and keep the enclave up until
/// Ctrl-C (or `stop_after`). Payloads get SIGTERM before the enclave is
/// destroyed.
pub fn run(
    config_path: &Path,
    command: &[String],
    options: &RunOptions,
    json_output: bool,
) -> Result<u8, String> {
    let mut config = load_config(config_path)?;
    if let Some(level) = options.log_level {
        config.enclave.log_level = level;
    }

    let runtime = EnclaveRuntime::start(&config).map_err(|e| e.to_string())?;
    if shutdown_requested() {
        return Err(abort(runtime, INTERRUPTED));
    }

    if options.attest {
        if let Err(e) = runtime.attest() {
            return Err(abort(runtime, &e.to_string()));
        }
        if shutdown_requested() {
            return Err(abort(runtime, INTERRUPTED));
        }
    }

    let envp: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();
    let pid = match runtime.execute_payload(command.to_vec(), &envp, PayloadStdio::inherit()) {
        Ok(pid) => pid,
        Err(e) => return Err(abort(runtime, &e.to_string())),
    };

    if json_output {
        let out = serde_json::json!({
            "backend": runtime.name(),
            "kind": runtime.kind().to_string(),
            "pid": pid,
        });
        match json_pretty(&out) {
            Ok(json) => println!("{json}"),
            Err(e) => return Err(abort(runtime, &e)),
        }
    } else {
        println!("payload {pid} started in enclave runtime {}", runtime.name());
    }

    let started = Instant::now();
    while !shutdown_requested() && options.stop_after.map_or(true, |d| started.elapsed() < d) {
        std::thread::sleep(Duration::from_millis(100));
    }

    if let Err(e) = runtime.kill_payload(SIGTERM, BROADCAST_PID) {
        warn!("failed to stop payloads: {e}");
    }
    runtime.destroy().map_err(|e| e.to_string())?;
    Ok(EXIT_SUCCESS)
}

/// Destroy the runtime after a failed step and return the step's error.
fn abort(runtime: EnclaveRuntime, msg: &str) -> String {
    if let Err(e) = runtime.destroy() {
        warn!("{e}");
    }
    msg.to_owned()
}
