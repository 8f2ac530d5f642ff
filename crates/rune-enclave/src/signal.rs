use crate::PayloadPid;
use std::io;

pub const SIGTERM: i32 = libc::SIGTERM;
pub const SIGKILL: i32 = libc::SIGKILL;

/// Send `signal` to a single process.
///
/// Non-positive pids are rejected: `kill(2)` would read them as process
/// groups or "every process we may signal".
#[allow(unsafe_code)]
pub fn send_signal(pid: PayloadPid, signal: i32) -> io::Result<()> {
    if pid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        ));
    }
    // SAFETY: kill() takes two integers and does not touch our memory.
    let ret = unsafe { libc::kill(pid, signal) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_group_and_broadcast_pids() {
        for pid in [0, -1, -42] {
            let err = send_signal(pid, 0).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn signal_zero_probes_own_process() {
        let me = std::process::id() as PayloadPid;
        assert!(send_signal(me, 0).is_ok());
    }

    #[test]
    fn delivers_to_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        send_signal(child.id() as PayloadPid, SIGTERM).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
