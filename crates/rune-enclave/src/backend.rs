use crate::BackendError;
use rune_schema::LogLevel;
use std::fmt;
use std::fs::File;
use std::process::Stdio;

/// Process identifier assigned to a payload by its backend.
pub type PayloadPid = i32;

/// Raw pid value meaning "every payload running in this enclave".
pub const BROADCAST_PID: PayloadPid = -1;

/// Candidate backend variants, in no particular order. Selection priority is
/// fixed by [`crate::selector::default_candidates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process enclave manager.
    Native,
    /// Bridge to an external enclave platform through a PAL shim.
    Pal,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Native => write!(f, "native"),
            BackendKind::Pal => write!(f, "pal"),
        }
    }
}

/// Target of a signal delivery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KillTarget {
    All,
    Payload(PayloadPid),
}

impl KillTarget {
    /// Map a raw pid, where [`BROADCAST_PID`] means all payloads.
    pub fn from_raw(pid: PayloadPid) -> Self {
        if pid == BROADCAST_PID {
            KillTarget::All
        } else {
            KillTarget::Payload(pid)
        }
    }
}

impl fmt::Display for KillTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KillTarget::All => write!(f, "all payloads"),
            KillTarget::Payload(pid) => write!(f, "payload {pid}"),
        }
    }
}

/// Standard I/O handles for a payload. Passed through to the backend as-is.
#[derive(Debug)]
pub struct PayloadStdio {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

impl PayloadStdio {
    pub fn inherit() -> Self {
        Self {
            stdin: Stdio::inherit(),
            stdout: Stdio::inherit(),
            stderr: Stdio::inherit(),
        }
    }

    pub fn null() -> Self {
        Self {
            stdin: Stdio::null(),
            stdout: Stdio::null(),
            stderr: Stdio::null(),
        }
    }

    pub fn from_files(stdin: File, stdout: File, stderr: File) -> Self {
        Self {
            stdin: stdin.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// The operations every enclave backend supports.
///
/// `load`, `init` and `destroy` take `&mut self`: they run before the backend
/// is shared or after the last use. `attest`, `exec` and `kill` take `&self`
/// and may be called concurrently; implementations guard their own state.
///
/// Backends may reject out-of-order calls, but nothing above them reorders
/// calls on their behalf.
pub trait EnclaveBackend: Send + Sync {
    fn name(&self) -> &str;

    fn load(&mut self, path: &str) -> Result<(), BackendError>;

    /// `args` is the backend-interpreted argument string from the config.
    fn init(&mut self, args: &str, log_level: LogLevel) -> Result<(), BackendError>;

    fn attest(&self) -> Result<(), BackendError>;

    /// Launch a payload. `envp` holds `KEY=VALUE` entries and replaces the
    /// inherited environment entirely.
    fn exec(
        &self,
        cmd: &[String],
        envp: &[String],
        stdio: PayloadStdio,
    ) -> Result<PayloadPid, BackendError>;

    fn kill(&self, signal: i32, target: KillTarget) -> Result<(), BackendError>;

    fn destroy(&mut self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_sentinel_maps_to_all() {
        assert_eq!(KillTarget::from_raw(BROADCAST_PID), KillTarget::All);
        assert_eq!(KillTarget::from_raw(4242), KillTarget::Payload(4242));
        assert_eq!(KillTarget::from_raw(0), KillTarget::Payload(0));
    }

    #[test]
    fn backend_kind_display() {
        assert_eq!(BackendKind::Native.to_string(), "native");
        assert_eq!(BackendKind::Pal.to_string(), "pal");
    }

    #[test]
    fn kill_target_display() {
        assert_eq!(KillTarget::All.to_string(), "all payloads");
        assert_eq!(KillTarget::Payload(7).to_string(), "payload 7");
    }
}
