//! Enclave runtime layer for Rune.
//!
//! This crate implements the dispatch-and-lifecycle core that sits between a
//! container runtime's process-launch path and a secure-enclave backend: the
//! `EnclaveBackend` capability contract, the native (in-process manager) and
//! PAL (external platform shim) backends, the fixed-priority backend selector,
//! and the `EnclaveRuntime` wrapper that bootstraps the selected backend and
//! forwards payload launches and signals to it.

pub mod backend;
pub mod lifecycle;
pub mod lookup;
pub mod mock;
pub mod native;
pub mod pal;
mod payload;
pub mod runtime;
pub mod selector;
pub mod signal;

pub use backend::{
    BackendKind, EnclaveBackend, KillTarget, PayloadPid, PayloadStdio, BROADCAST_PID,
};
pub use lifecycle::{validate_transition, LifecycleState};
pub use lookup::{lookup_executable, resolve_or_passthrough};
pub use mock::{MockBackend, MockCall, MockRecorder};
pub use native::NativeBackend;
pub use pal::PalBackend;
pub use runtime::EnclaveRuntime;
pub use selector::{
    default_candidates, select_backend, select_backend_from, BoundBackend, Candidate, Declined,
};

use std::fmt;
use thiserror::Error;

/// Errors reported by a backend through the capability contract.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Declined(String),
    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("enclave is {state}, expected {expected}")]
    WrongState {
        state: LifecycleState,
        expected: LifecycleState,
    },
    #[error("enclave image {path}: {reason}")]
    ImageFormat { path: String, reason: String },
    #[error("attestation failed: {0}")]
    AttestationFailed(String),
    #[error("payload launch failed: {0}")]
    ExecFailed(String),
    #[error("no payload with pid {0} in this enclave")]
    UnknownPayload(PayloadPid),
    #[error("delivering signal {signal} to pid {pid} failed: {source}")]
    Signal {
        signal: i32,
        pid: PayloadPid,
        source: std::io::Error,
    },
    #[error("{op} rejected by backend: {reason}")]
    Rejected { op: Operation, reason: String },
    #[error("PAL shim `{command}` failed: {stderr}")]
    Shim { command: String, stderr: String },
}

/// Lifecycle operation, used to label errors and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Load,
    Init,
    Attest,
    Exec,
    Kill,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Load => write!(f, "load"),
            Operation::Init => write!(f, "init"),
            Operation::Attest => write!(f, "attest"),
            Operation::Exec => write!(f, "exec"),
            Operation::Kill => write!(f, "kill"),
            Operation::Destroy => write!(f, "destroy"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EnclaveError {
    #[error("no enclave backend accepted the configuration: {}", selector::format_declines(.0))]
    NoBackend(Vec<Declined>),
    #[error("enclave runtime {backend}: {op} failed: {source}")]
    Lifecycle {
        backend: String,
        op: Operation,
        #[source]
        source: BackendError,
    },
    #[error("payload command line is empty")]
    EmptyCommand,
}

impl EnclaveError {
    /// The backend error underneath a lifecycle failure, if any.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            EnclaveError::Lifecycle { source, .. } => Some(source),
            _ => None,
        }
    }
}
