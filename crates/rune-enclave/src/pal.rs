//! Backend bridging to an external enclave platform through a PAL shim.
//!
//! The shim is an executable named by the enclave path. Each lifecycle call
//! maps to one shim subcommand (`version`, `init`, `attest`, `exec`, `kill`,
//! `destroy`); everything the shim does beyond that is its own business.
//! A payload is the `<shim> exec -- <cmd>` process itself.

use crate::backend::{EnclaveBackend, KillTarget, PayloadPid, PayloadStdio};
use crate::lifecycle::{require_state, validate_transition, LifecycleState};
use crate::payload::{split_env, PayloadTable};
use crate::BackendError;
use rune_schema::{EnclaveConfig, LogLevel};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Oldest shim API this backend speaks.
pub const MIN_PAL_API_VERSION: u32 = 1;

pub struct PalBackend {
    shim: PathBuf,
    api_version: u32,
    name: String,
    state: LifecycleState,
    payloads: PayloadTable,
}

impl PalBackend {
    /// Probe the shim named by the config path and negotiate its API version.
    pub fn new(config: &EnclaveConfig) -> Result<Self, BackendError> {
        let shim = PathBuf::from(config.path());
        let meta = std::fs::metadata(&shim).map_err(|e| {
            BackendError::Declined(format!("PAL shim {} unavailable: {e}", shim.display()))
        })?;
        if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
            return Err(BackendError::Declined(format!(
                "PAL shim {} is not an executable file",
                shim.display()
            )));
        }

        let api_version = probe_version(&shim).map_err(BackendError::Declined)?;
        if api_version < MIN_PAL_API_VERSION {
            return Err(BackendError::Declined(format!(
                "PAL API version {api_version} is older than {MIN_PAL_API_VERSION}"
            )));
        }
        if let Some(max) = config.pal.max_api_version {
            if api_version > max {
                return Err(BackendError::Declined(format!(
                    "PAL API version {api_version} is newer than the configured maximum {max}"
                )));
            }
        }

        let stem = shim
            .file_name()
            .map_or_else(|| "shim".to_owned(), |n| n.to_string_lossy().to_string());
        debug!("PAL shim {} speaks API v{api_version}", shim.display());

        Ok(Self {
            name: format!("pal/{stem}"),
            shim,
            api_version,
            state: LifecycleState::Created,
            payloads: PayloadTable::default(),
        })
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn shim(&self) -> &Path {
        &self.shim
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn run_shim(&self, args: &[&str]) -> Result<(), BackendError> {
        let command = format!("{} {}", self.shim.display(), args.join(" "));
        debug!("running {command}");
        let output = Command::new(&self.shim)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BackendError::Shim {
                command: command.clone(),
                stderr: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            Err(BackendError::Shim {
                command,
                stderr: if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            })
        }
    }
}

fn probe_version(shim: &Path) -> Result<u32, String> {
    let output = Command::new(shim)
        .arg("version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("cannot run {} version: {e}", shim.display()))?;
    if !output.status.success() {
        return Err(format!(
            "{} version exited with {}",
            shim.display(),
            output.status
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("unrecognized PAL version output '{}'", stdout.trim()))
}

impl EnclaveBackend for PalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&mut self, path: &str) -> Result<(), BackendError> {
        validate_transition(self.state, LifecycleState::Loaded)?;
        let requested = std::fs::canonicalize(path)?;
        let probed = std::fs::canonicalize(&self.shim)?;
        if requested != probed {
            return Err(BackendError::ImageFormat {
                path: path.to_owned(),
                reason: format!("not the probed PAL shim {}", self.shim.display()),
            });
        }
        self.state = LifecycleState::Loaded;
        Ok(())
    }

    fn init(&mut self, args: &str, log_level: LogLevel) -> Result<(), BackendError> {
        validate_transition(self.state, LifecycleState::Initialized)?;
        self.run_shim(&["init", "--args", args, "--log-level", log_level.as_str()])?;
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    fn attest(&self) -> Result<(), BackendError> {
        require_state(self.state, LifecycleState::Initialized)?;
        self.run_shim(&["attest"]).map_err(|e| match e {
            BackendError::Shim { stderr, .. } => BackendError::AttestationFailed(stderr),
            other => other,
        })
    }

    fn exec(
        &self,
        cmd: &[String],
        envp: &[String],
        stdio: PayloadStdio,
    ) -> Result<PayloadPid, BackendError> {
        require_state(self.state, LifecycleState::Initialized)?;
        if cmd.is_empty() {
            return Err(BackendError::ExecFailed("empty command line".to_owned()));
        }

        let mut command = Command::new(&self.shim);
        command
            .arg("exec")
            .arg("--")
            .args(cmd)
            .env_clear()
            .envs(split_env(envp))
            .stdin(stdio.stdin)
            .stdout(stdio.stdout)
            .stderr(stdio.stderr);
        self.payloads.spawn(command)
    }

    fn kill(&self, signal: i32, target: KillTarget) -> Result<(), BackendError> {
        require_state(self.state, LifecycleState::Initialized)?;
        let sig = signal.to_string();
        match target {
            KillTarget::All => self.run_shim(&["kill", "--all", &sig]),
            KillTarget::Payload(pid) => self.run_shim(&["kill", &sig, &pid.to_string()]),
        }
    }

    fn destroy(&mut self) -> Result<(), BackendError> {
        validate_transition(self.state, LifecycleState::Destroyed)?;
        let result = self.run_shim(&["destroy"]);
        if let Err(e) = &result {
            warn!("{}: {e}", self.name);
        }
        self.payloads.terminate_all();
        self.state = LifecycleState::Destroyed;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Shim that logs every invocation to `calls.log` next to itself.
    fn write_shim(dir: &Path, version: &str, fail: &str) -> PathBuf {
        let shim = dir.join("liberpal-test");
        let log = dir.join("calls.log");
        let script = format!(
            r#"#!/bin/sh
echo "$*" >> '{log}'
case "$1" in
  {fail}) echo "{fail} refused" >&2; exit 1 ;;
  version) echo '{version}' ;;
  exec) shift; shift; exec "$@" ;;
esac
exit 0
"#,
            log = log.display()
        );
        fs::write(&shim, script).unwrap();
        fs::set_permissions(&shim, fs::Permissions::from_mode(0o755)).unwrap();
        shim
    }

    fn calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn config_for(shim: &Path) -> EnclaveConfig {
        EnclaveConfig::new(shim.to_string_lossy())
    }

    fn ready(shim: &Path) -> PalBackend {
        let config = config_for(shim);
        let mut backend = PalBackend::new(&config).unwrap();
        backend.load(config.path()).unwrap();
        backend.init("instance=/run/x", LogLevel::Warn).unwrap();
        backend
    }

    #[test]
    fn probes_version_and_names_itself() {
        let dir = tempfile::tempdir().unwrap();
        let shim = write_shim(dir.path(), "2", "none");
        let backend = PalBackend::new(&config_for(&shim)).unwrap();
        assert_eq!(backend.api_version(), 2);
        assert_eq!(backend.name(), "pal/liberpal-test");
        assert_eq!(calls(dir.path()), vec!["version"]);
    }

    #[test]
    fn declines_missing_shim() {
        let config = EnclaveConfig::new("/nonexistent/liberpal-none");
        assert!(matches!(
            PalBackend::new(&config),
            Err(BackendError::Declined(_))
        ));
    }

    #[test]
    fn declines_non_executable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.signed.so");
        fs::write(&path, b"\x7fELF").unwrap();
        let err = PalBackend::new(&config_for(&path)).err().unwrap();
        assert!(err.to_string().contains("not an executable"));
    }

    #[test]
    fn declines_garbage_version() {
        let dir = tempfile::tempdir().unwrap();
        let shim = write_shim(dir.path(), "banana", "none");
        let err = PalBackend::new(&config_for(&shim)).err().unwrap();
        assert!(err.to_string().contains("unrecognized PAL version"));
    }

    #[test]
    fn declines_version_outside_range() {
        let dir = tempfile::tempdir().unwrap();
        let shim = write_shim(dir.path(), "0", "none");
        assert!(PalBackend::new(&config_for(&shim)).is_err());

        let shim = write_shim(dir.path(), "4", "none");
        let mut config = config_for(&shim);
        config.pal.max_api_version = Some(3);
        let err = PalBackend::new(&config).err().unwrap();
        assert!(err.to_string().contains("newer than the configured maximum 3"));
    }

    #[test]
    fn declines_when_version_fails() {
        let dir = tempfile::tempdir().unwrap();
        let shim = write_shim(dir.path(), "1", "version");
        assert!(matches!(
            PalBackend::new(&config_for(&shim)),
            Err(BackendError::Declined(_))
        ));
    }

    #[test]
    fn load_rejects_other_path() {
        let dir = tempfile::tempdir().unwrap();
        let shim = write_shim(dir.path(), "1", "none");
        let other = dir.path().join("other");
        fs::write(&other, b"").unwrap();

        let mut backend = PalBackend::new(&config_for(&shim)).unwrap();
        let err = backend.load(&other.to_string_lossy()).unwrap_err();
        assert!(matches!(err, BackendError::ImageFormat { .. }));
        assert_eq!(backend.state(), LifecycleState::Created);
    }

    #[test]
    fn lifecycle_maps_to_shim_subcommands() {
        let dir = tempfile::tempdir().unwrap();
        let shim = write_shim(dir.path(), "1", "none");
        let mut backend = ready(&shim);

        backend.attest().unwrap();
        let pid = backend
            .exec(
                &["sleep".to_owned(), "30".to_owned()],
                &["PATH=/usr/bin:/bin".to_owned()],
                PayloadStdio::null(),
            )
            .unwrap();
        backend.kill(15, KillTarget::Payload(pid)).unwrap();
        backend.kill(9, KillTarget::All).unwrap();
        backend.destroy().unwrap();

        let log = calls(dir.path());
        assert_eq!(log[0], "version");
        assert_eq!(log[1], "init --args instance=/run/x --log-level warn");
        assert_eq!(log[2], "attest");
        assert!(log.contains(&"exec -- sleep 30".to_owned()));
        assert!(log.contains(&format!("kill 15 {pid}")));
        assert!(log.contains(&"kill --all 9".to_owned()));
        assert!(log.contains(&"destroy".to_owned()));
        assert_eq!(backend.state(), LifecycleState::Destroyed);
    }

    #[test]
    fn init_failure_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let shim = write_shim(dir.path(), "1", "init");
        let config = config_for(&shim);
        let mut backend = PalBackend::new(&config).unwrap();
        backend.load(config.path()).unwrap();

        let err = backend.init("", LogLevel::Info).unwrap_err();
        assert!(err.to_string().contains("init refused"));
        assert_eq!(backend.state(), LifecycleState::Loaded);
    }

    #[test]
    fn attest_failure_is_attestation_error() {
        let dir = tempfile::tempdir().unwrap();
        let shim = write_shim(dir.path(), "1", "attest");
        let backend = ready(&shim);
        match backend.attest() {
            Err(BackendError::AttestationFailed(msg)) => assert_eq!(msg, "attest refused"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn destroy_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let shim = write_shim(dir.path(), "1", "destroy");
        let mut backend = ready(&shim);
        assert!(matches!(
            backend.destroy(),
            Err(BackendError::Shim { .. })
        ));
        assert_eq!(backend.state(), LifecycleState::Destroyed);
    }

    #[test]
    fn calls_before_init_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let shim = write_shim(dir.path(), "1", "none");
        let backend = PalBackend::new(&config_for(&shim)).unwrap();
        assert!(backend.attest().is_err());
        assert!(backend.kill(15, KillTarget::All).is_err());
        assert_eq!(calls(dir.path()), vec!["version"]);
    }
}
