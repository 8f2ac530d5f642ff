//! Bookkeeping for payload processes spawned by a backend.

use crate::backend::KillTarget;
use crate::signal::send_signal;
use crate::{BackendError, PayloadPid};
use std::collections::HashMap;
use std::process::{Child, Command};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub(crate) struct PayloadTable {
    children: Mutex<HashMap<PayloadPid, Child>>,
}

impl PayloadTable {
    // The map is only mutated by whole insert/retain/drain calls, so a
    // poisoned lock still guards a consistent table.
    fn lock(&self) -> MutexGuard<'_, HashMap<PayloadPid, Child>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `command` and start tracking it.
    pub(crate) fn spawn(&self, mut command: Command) -> Result<PayloadPid, BackendError> {
        let mut children = self.lock();
        let child = command
            .spawn()
            .map_err(|e| BackendError::ExecFailed(format!("{:?}: {e}", command.get_program())))?;
        let pid = PayloadPid::try_from(child.id())
            .map_err(|_| BackendError::ExecFailed(format!("pid {} out of range", child.id())))?;
        children.insert(pid, child);
        Ok(pid)
    }

    /// Drop exited payloads and return the pids still running.
    pub(crate) fn live_pids(&self) -> Vec<PayloadPid> {
        let mut children = self.lock();
        reap(&mut children);
        let mut pids: Vec<PayloadPid> = children.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Deliver `signal` to tracked payloads.
    ///
    /// The lock is held from reaping until the last delivery: a pid in the
    /// table has not been waited on, so it cannot have been reused.
    pub(crate) fn signal(&self, signal: i32, target: KillTarget) -> Result<(), BackendError> {
        let mut children = self.lock();
        reap(&mut children);
        let pids: Vec<PayloadPid> = match target {
            KillTarget::All => children.keys().copied().collect(),
            KillTarget::Payload(pid) if children.contains_key(&pid) => vec![pid],
            KillTarget::Payload(pid) => return Err(BackendError::UnknownPayload(pid)),
        };
        for pid in pids {
            send_signal(pid, signal).map_err(|source| BackendError::Signal {
                signal,
                pid,
                source,
            })?;
        }
        Ok(())
    }

    /// Kill and wait for every tracked payload.
    pub(crate) fn terminate_all(&mut self) {
        let children = self
            .children
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (pid, mut child) in children.drain() {
            if matches!(child.try_wait(), Ok(None)) {
                if let Err(e) = child.kill() {
                    warn!("failed to kill payload {pid}: {e}");
                }
            }
            match child.wait() {
                Ok(status) => debug!("payload {pid} reaped: {status}"),
                Err(e) => warn!("failed to reap payload {pid}: {e}"),
            }
        }
    }
}

fn reap(children: &mut HashMap<PayloadPid, Child>) {
    children.retain(|pid, child| match child.try_wait() {
        Ok(Some(status)) => {
            debug!("payload {pid} exited: {status}");
            false
        }
        Ok(None) => true,
        Err(e) => {
            warn!("failed to poll payload {pid}: {e}");
            true
        }
    });
}

/// Split `KEY=VALUE` entries. Entries without `=` are skipped.
pub(crate) fn split_env(envp: &[String]) -> Vec<(&str, &str)> {
    envp.iter()
        .filter_map(|entry| {
            let pair = entry.split_once('=');
            if pair.is_none() {
                warn!("ignoring malformed environment entry '{entry}'");
            }
            pair
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{SIGKILL, SIGTERM};
    use std::process::Stdio;
    use std::sync::Arc;

    fn quiet(program: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }

    fn wait_until_empty(table: &PayloadTable) {
        for _ in 0..100 {
            if table.live_pids().is_empty() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        panic!("payloads still running: {:?}", table.live_pids());
    }

    #[test]
    fn tracks_running_payload() {
        let mut table = PayloadTable::default();
        let pid = table.spawn(quiet("sleep", &["30"])).unwrap();
        assert!(pid > 0);
        assert_eq!(table.live_pids(), vec![pid]);

        table.terminate_all();
        assert!(table.live_pids().is_empty());
    }

    #[test]
    fn exited_payloads_are_reaped() {
        let table = PayloadTable::default();
        let pid = table.spawn(quiet("true", &[])).unwrap();
        wait_until_empty(&table);
        assert!(matches!(
            table.signal(SIGTERM, KillTarget::Payload(pid)),
            Err(BackendError::UnknownPayload(p)) if p == pid
        ));
    }

    #[test]
    fn signal_reaches_single_payload() {
        let mut table = PayloadTable::default();
        let target = table.spawn(quiet("sleep", &["30"])).unwrap();
        let bystander = table.spawn(quiet("sleep", &["30"])).unwrap();

        table.signal(SIGKILL, KillTarget::Payload(target)).unwrap();
        for _ in 0..100 {
            if table.live_pids() == vec![bystander] {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(table.live_pids(), vec![bystander]);
        table.terminate_all();
    }

    #[test]
    fn signal_all_reaches_every_payload() {
        let table = PayloadTable::default();
        table.spawn(quiet("sleep", &["30"])).unwrap();
        table.spawn(quiet("sleep", &["30"])).unwrap();
        assert_eq!(table.live_pids().len(), 2);

        table.signal(SIGKILL, KillTarget::All).unwrap();
        wait_until_empty(&table);
    }

    #[test]
    fn signal_all_without_payloads_is_ok() {
        let table = PayloadTable::default();
        assert!(table.signal(SIGTERM, KillTarget::All).is_ok());
    }

    #[test]
    fn signal_untracked_pid_is_rejected() {
        let table = PayloadTable::default();
        let me = std::process::id() as PayloadPid;
        assert!(matches!(
            table.signal(0, KillTarget::Payload(me)),
            Err(BackendError::UnknownPayload(p)) if p == me
        ));
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let table = Arc::new(PayloadTable::default());
        let poisoner = Arc::clone(&table);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.children.lock().unwrap();
            panic!("poison the payload table");
        })
        .join();
        assert!(table.children.is_poisoned());

        assert!(table.live_pids().is_empty());
        let pid = table.spawn(quiet("sleep", &["30"])).unwrap();
        table.signal(SIGKILL, KillTarget::Payload(pid)).unwrap();
        wait_until_empty(&table);
    }

    #[test]
    fn spawn_failure_is_exec_error() {
        let table = PayloadTable::default();
        let err = table
            .spawn(quiet("/nonexistent/rune-payload", &[]))
            .unwrap_err();
        assert!(matches!(err, BackendError::ExecFailed(_)));
    }

    #[test]
    fn split_env_skips_malformed_entries() {
        let envp = vec![
            "PATH=/usr/bin".to_owned(),
            "EMPTY=".to_owned(),
            "garbage".to_owned(),
            "EQ=a=b".to_owned(),
        ];
        assert_eq!(
            split_env(&envp),
            vec![("PATH", "/usr/bin"), ("EMPTY", ""), ("EQ", "a=b")]
        );
    }
}
