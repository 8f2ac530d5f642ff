use crate::backend::{EnclaveBackend, KillTarget, PayloadPid, PayloadStdio};
use crate::{BackendError, Operation};
use rune_schema::LogLevel;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

/// One call received by a [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Load(String),
    Init { args: String, log_level: LogLevel },
    Attest,
    Exec { cmd: Vec<String>, envp: Vec<String> },
    Kill { signal: i32, target: KillTarget },
    Destroy,
}

/// Shared view of the calls a mock received, usable after the mock itself
/// has been moved into a runtime or dropped.
#[derive(Debug, Clone, Default)]
pub struct MockRecorder {
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockRecorder {
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn push(&self, call: MockCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

/// Recording backend that accepts every call in any order, unless told to
/// fail one operation.
pub struct MockBackend {
    name: String,
    recorder: MockRecorder,
    fail_at: Option<Operation>,
    next_pid: AtomicI32,
}

impl MockBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            recorder: MockRecorder::default(),
            fail_at: None,
            next_pid: AtomicI32::new(1000),
        }
    }

    /// Make `op` fail with an error naming it.
    #[must_use]
    pub fn failing_at(mut self, op: Operation) -> Self {
        self.fail_at = Some(op);
        self
    }

    /// Record into an existing recorder instead of a fresh one.
    #[must_use]
    pub fn with_recorder(mut self, recorder: MockRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn recorder(&self) -> MockRecorder {
        self.recorder.clone()
    }

    fn record(&self, op: Operation, call: MockCall) -> Result<(), BackendError> {
        self.recorder.push(call);
        if self.fail_at == Some(op) {
            return Err(BackendError::Rejected {
                op,
                reason: "injected mock failure".to_owned(),
            });
        }
        Ok(())
    }
}

impl EnclaveBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&mut self, path: &str) -> Result<(), BackendError> {
        self.record(Operation::Load, MockCall::Load(path.to_owned()))
    }

    fn init(&mut self, args: &str, log_level: LogLevel) -> Result<(), BackendError> {
        self.record(
            Operation::Init,
            MockCall::Init {
                args: args.to_owned(),
                log_level,
            },
        )
    }

    fn attest(&self) -> Result<(), BackendError> {
        self.record(Operation::Attest, MockCall::Attest)
    }

    fn exec(
        &self,
        cmd: &[String],
        envp: &[String],
        _stdio: PayloadStdio,
    ) -> Result<PayloadPid, BackendError> {
        self.record(
            Operation::Exec,
            MockCall::Exec {
                cmd: cmd.to_vec(),
                envp: envp.to_vec(),
            },
        )?;
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    fn kill(&self, signal: i32, target: KillTarget) -> Result<(), BackendError> {
        self.record(Operation::Kill, MockCall::Kill { signal, target })
    }

    fn destroy(&mut self) -> Result<(), BackendError> {
        self.record(Operation::Destroy, MockCall::Destroy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_records_calls_in_order() {
        let mut backend = MockBackend::new("mock");
        let recorder = backend.recorder();

        backend.load("/img").unwrap();
        backend.init("a b", LogLevel::Debug).unwrap();
        let pid = backend
            .exec(&["x".to_owned()], &[], PayloadStdio::null())
            .unwrap();
        backend.kill(9, KillTarget::All).unwrap();
        backend.destroy().unwrap();

        assert_eq!(pid, 1000);
        assert_eq!(
            recorder.calls(),
            vec![
                MockCall::Load("/img".to_owned()),
                MockCall::Init {
                    args: "a b".to_owned(),
                    log_level: LogLevel::Debug
                },
                MockCall::Exec {
                    cmd: vec!["x".to_owned()],
                    envp: vec![]
                },
                MockCall::Kill {
                    signal: 9,
                    target: KillTarget::All
                },
                MockCall::Destroy,
            ]
        );
    }

    #[test]
    fn mock_pids_are_unique() {
        let backend = MockBackend::new("mock");
        let a = backend.exec(&["a".to_owned()], &[], PayloadStdio::null()).unwrap();
        let b = backend.exec(&["b".to_owned()], &[], PayloadStdio::null()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn mock_fails_requested_operation_only() {
        let mut backend = MockBackend::new("mock").failing_at(Operation::Init);
        assert!(backend.load("/img").is_ok());
        let err = backend.init("", LogLevel::Info).unwrap_err();
        assert!(matches!(
            err,
            BackendError::Rejected {
                op: Operation::Init,
                ..
            }
        ));
        assert_eq!(err.to_string(), "init rejected by backend: injected mock failure");
        assert!(backend.attest().is_ok());
    }

    #[test]
    fn shared_recorder_sees_both_backends() {
        let recorder = MockRecorder::default();
        let mut a = MockBackend::new("a").with_recorder(recorder.clone());
        let mut b = MockBackend::new("b").with_recorder(recorder.clone());
        a.load("/1").unwrap();
        b.load("/2").unwrap();
        assert_eq!(recorder.count(|c| matches!(c, MockCall::Load(_))), 2);
    }
}
