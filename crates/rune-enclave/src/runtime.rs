use crate::backend::{BackendKind, EnclaveBackend, KillTarget, PayloadPid, PayloadStdio};
use crate::lookup::resolve_or_passthrough;
use crate::selector::{default_candidates, select_backend_from, BoundBackend, Candidate};
use crate::{BackendError, EnclaveError, Operation};
use rune_schema::EnclaveConfig;
use std::ffi::OsString;
use std::fmt;
use tracing::{debug, info};

/// A loaded and initialized enclave, bound to exactly one backend.
///
/// Calls are forwarded in the order the caller makes them. `destroy`
/// consumes the runtime, so nothing can be forwarded after it.
pub struct EnclaveRuntime {
    kind: BackendKind,
    backend: Box<dyn EnclaveBackend>,
    search_path: Option<OsString>,
}

impl fmt::Debug for EnclaveRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnclaveRuntime")
            .field("kind", &self.kind)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl EnclaveRuntime {
    /// Select a backend for `config`, then load and initialize it.
    pub fn start(config: &EnclaveConfig) -> Result<Self, EnclaveError> {
        Self::start_with(&default_candidates(), config)
    }

    pub fn start_with(
        candidates: &[Candidate<'_>],
        config: &EnclaveConfig,
    ) -> Result<Self, EnclaveError> {
        debug!("enclave init config retrieved: {config:?}");
        let bound = select_backend_from(candidates, config)?;
        Self::bootstrap(bound, config)
    }

    /// Load then initialize an already selected backend. On failure the
    /// backend is dropped; no other backend is tried.
    pub fn bootstrap(bound: BoundBackend, config: &EnclaveConfig) -> Result<Self, EnclaveError> {
        let BoundBackend { kind, mut backend } = bound;

        info!("loading enclave runtime {}", config.path());
        backend
            .load(config.path())
            .map_err(|e| lifecycle_error(backend.as_ref(), Operation::Load, e))?;

        info!("initializing enclave runtime {}", backend.name());
        backend
            .init(config.args(), config.log_level())
            .map_err(|e| lifecycle_error(backend.as_ref(), Operation::Init, e))?;

        Ok(Self {
            kind,
            backend,
            search_path: None,
        })
    }

    /// Resolve payload commands against `path` instead of the process `PATH`.
    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn attest(&self) -> Result<(), EnclaveError> {
        debug!("attesting enclave runtime {}", self.name());
        self.backend
            .attest()
            .map_err(|e| self.error(Operation::Attest, e))
    }

    /// Launch a payload. `cmd[0]` is replaced by its full path when it can
    /// be found on the search path, and passed through untouched otherwise:
    /// the executable may only exist inside the enclave's own filesystem.
    pub fn execute_payload(
        &self,
        mut cmd: Vec<String>,
        envp: &[String],
        stdio: PayloadStdio,
    ) -> Result<PayloadPid, EnclaveError> {
        debug!(
            "enclave runtime {} executing payload with commandline {cmd:?}",
            self.name()
        );
        let program = cmd.first_mut().ok_or(EnclaveError::EmptyCommand)?;

        let search_path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"));
        *program = resolve_or_passthrough(program, search_path.as_deref());

        self.backend
            .exec(&cmd, envp, stdio)
            .map_err(|e| self.error(Operation::Exec, e))
    }

    /// Signal one payload, or all of them when `pid` is [`crate::BROADCAST_PID`].
    pub fn kill_payload(&self, signal: i32, pid: PayloadPid) -> Result<(), EnclaveError> {
        let target = KillTarget::from_raw(pid);
        match target {
            KillTarget::Payload(pid) => debug!(
                "enclave runtime {} killing payload {pid} with signal {signal}",
                self.name()
            ),
            KillTarget::All => debug!(
                "enclave runtime {} killing all payloads with signal {signal}",
                self.name()
            ),
        }
        self.backend
            .kill(signal, target)
            .map_err(|e| self.error(Operation::Kill, e))
    }

    pub fn destroy(mut self) -> Result<(), EnclaveError> {
        debug!("destroying enclave runtime {}", self.name());
        self.backend
            .destroy()
            .map_err(|e| lifecycle_error(self.backend.as_ref(), Operation::Destroy, e))
    }

    fn error(&self, op: Operation, source: BackendError) -> EnclaveError {
        lifecycle_error(self.backend.as_ref(), op, source)
    }
}

fn lifecycle_error(
    backend: &dyn EnclaveBackend,
    op: Operation,
    source: BackendError,
) -> EnclaveError {
    EnclaveError::Lifecycle {
        backend: backend.name().to_owned(),
        op,
        source,
    }
}
