mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::run::RunOptions;
use commands::{install_signal_handler, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_NO_BACKEND};
use rune_schema::LogLevel;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "rune-enclave",
    version,
    about = "Run container payloads inside a secure enclave"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse and validate an enclave config file.
    Check {
        /// Path to enclave config TOML file.
        #[arg(default_value = "enclave.toml")]
        config: PathBuf,
    },
    /// Show which backend would be selected for a config.
    Probe {
        /// Path to enclave config TOML file.
        #[arg(default_value = "enclave.toml")]
        config: PathBuf,
    },
    /// Start an enclave and run a payload in it until interrupted.
    Run {
        /// Path to enclave config TOML file.
        config: PathBuf,
        /// Override the log level passed to the backend.
        #[arg(long)]
        log_level: Option<LogLevel>,
        /// Attest the enclave before launching the payload.
        #[arg(long, default_value_t = false)]
        attest: bool,
        /// Stop the payload and destroy the enclave after this many seconds.
        #[arg(long)]
        stop_after: Option<u64>,
        /// Payload command and arguments (after --).
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUNE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let json_output = cli.json;

    let result = match cli.command {
        Commands::Check { config } => commands::check::run(&config, json_output),
        Commands::Probe { config } => commands::probe::run(&config, json_output),
        Commands::Run {
            config,
            log_level,
            attest,
            stop_after,
            command,
        } => commands::run::run(
            &config,
            &command,
            &RunOptions {
                log_level,
                attest,
                stop_after: stop_after.map(Duration::from_secs),
            },
            json_output,
        ),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("failed to read enclave config")
                || msg.starts_with("failed to parse enclave config")
                || msg.starts_with("enclave.path")
                || msg.starts_with("native.")
            {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("no enclave backend accepted") {
                EXIT_NO_BACKEND
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
