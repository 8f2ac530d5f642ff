//! In-process enclave manager backend.
//!
//! Accepts signed SGX enclave images on hosts exposing an SGX device node.
//! The manager measures the image at load time and supervises payloads as
//! child processes; memory isolation is left to the hardware driver.

use crate::backend::{EnclaveBackend, KillTarget, PayloadPid, PayloadStdio};
use crate::lifecycle::{require_state, validate_transition, LifecycleState};
use crate::payload::{split_env, PayloadTable};
use crate::BackendError;
use rune_schema::{EnclaveConfig, EnclaveType, LogLevel};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
const SIGNED_SUFFIXES: &[&str] = &[".signed.so", ".signed"];

pub struct NativeBackend {
    device: PathBuf,
    expected_measurement: Option<String>,
    state: LifecycleState,
    image: Option<PathBuf>,
    measurement: Option<String>,
    args: Vec<String>,
    log_level: LogLevel,
    payloads: PayloadTable,
}

impl NativeBackend {
    /// Probe the host and the configured image. Fails when either does not
    /// match what the native manager can host.
    pub fn new(config: &EnclaveConfig) -> Result<Self, BackendError> {
        if config.enclave.kind != EnclaveType::IntelSgx {
            return Err(BackendError::Declined(format!(
                "enclave type {} is not handled natively",
                config.enclave.kind
            )));
        }

        probe_image(Path::new(config.path())).map_err(BackendError::Declined)?;

        let device = config
            .native
            .devices
            .iter()
            .map(PathBuf::from)
            .find(|d| d.exists())
            .ok_or_else(|| {
                BackendError::Declined(format!(
                    "no enclave device node found (tried {})",
                    config.native.devices.join(", ")
                ))
            })?;

        debug!("native enclave manager using device {}", device.display());

        Ok(Self {
            device,
            expected_measurement: config.native.measurement.clone(),
            state: LifecycleState::Created,
            image: None,
            measurement: None,
            args: Vec::new(),
            log_level: LogLevel::default(),
            payloads: PayloadTable::default(),
        })
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// BLAKE3 digest of the loaded image, hex encoded.
    pub fn measurement(&self) -> Option<&str> {
        self.measurement.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Pids of payloads that are still running.
    pub fn payload_pids(&self) -> Vec<PayloadPid> {
        self.payloads.live_pids()
    }
}

/// Check that `path` looks like a signed enclave image.
fn probe_image(path: &Path) -> Result<(), String> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if !SIGNED_SUFFIXES.iter().any(|s| file_name.ends_with(s)) {
        return Err(format!(
            "{} is not a signed enclave image (expected *.signed.so)",
            path.display()
        ));
    }

    let mut magic = [0u8; 4];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    if &magic != ELF_MAGIC {
        return Err(format!("{} is not an ELF image", path.display()));
    }
    Ok(())
}

impl EnclaveBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn load(&mut self, path: &str) -> Result<(), BackendError> {
        validate_transition(self.state, LifecycleState::Loaded)?;

        let image = std::fs::read(path)?;
        if !image.starts_with(ELF_MAGIC) {
            return Err(BackendError::ImageFormat {
                path: path.to_owned(),
                reason: "missing ELF header".to_owned(),
            });
        }
        let measurement = blake3::hash(&image).to_hex().to_string();
        debug!("enclave image {path} measured as {measurement}");

        self.image = Some(PathBuf::from(path));
        self.measurement = Some(measurement);
        self.state = LifecycleState::Loaded;
        Ok(())
    }

    fn init(&mut self, args: &str, log_level: LogLevel) -> Result<(), BackendError> {
        validate_transition(self.state, LifecycleState::Initialized)?;
        self.args = args.split_whitespace().map(str::to_owned).collect();
        self.log_level = log_level;
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    fn attest(&self) -> Result<(), BackendError> {
        require_state(self.state, LifecycleState::Initialized)?;
        let Some(expected) = &self.expected_measurement else {
            return Ok(());
        };
        let actual = self.measurement.as_deref().unwrap_or_default();
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(BackendError::AttestationFailed(format!(
                "measurement mismatch: expected {expected}, got {actual}"
            )))
        }
    }

    fn exec(
        &self,
        cmd: &[String],
        envp: &[String],
        stdio: PayloadStdio,
    ) -> Result<PayloadPid, BackendError> {
        require_state(self.state, LifecycleState::Initialized)?;
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| BackendError::ExecFailed("empty command line".to_owned()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(split_env(envp))
            .stdin(stdio.stdin)
            .stdout(stdio.stdout)
            .stderr(stdio.stderr);
        self.payloads.spawn(command)
    }

    fn kill(&self, signal: i32, target: KillTarget) -> Result<(), BackendError> {
        require_state(self.state, LifecycleState::Initialized)?;
        self.payloads.signal(signal, target)
    }

    fn destroy(&mut self) -> Result<(), BackendError> {
        validate_transition(self.state, LifecycleState::Destroyed)?;
        self.payloads.terminate_all();
        self.state = LifecycleState::Destroyed;
        Ok(())
    }
}
