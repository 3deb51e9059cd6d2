//! Signal delivery and process state helpers

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use sysinfo::System;
use tracing::{debug, info};

pub use sysinfo::ProcessStatus;

use crate::error::{FaultError, FaultResult};

/// Send `signal` to `pid`
pub fn send_signal(pid: i32, signal: Signal) -> FaultResult<()> {
    info!("Sending {} to pid {}", signal, pid);
    kill(Pid::from_raw(pid), signal).map_err(|errno| FaultError::Signal {
        pid,
        signal: signal.to_string(),
        errno,
    })
}

/// Whether a process with this pid currently exists
pub fn process_exists(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// SIGKILL every pid. A pid that vanished in the meantime counts as killed;
/// any other failure aborts and fails the whole operation.
pub fn kill_all(pids: &[u32]) -> FaultResult<usize> {
    let mut killed = 0;
    for &pid in pids {
        let pid = i32::try_from(pid).map_err(|_| FaultError::InvalidArgument {
            reason: format!("pid {pid} out of range"),
        })?;
        match send_signal(pid, Signal::SIGKILL) {
            Ok(()) => killed += 1,
            Err(FaultError::Signal { errno: Errno::ESRCH, .. }) => {
                debug!("pid {} already exited", pid);
                killed += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(killed)
}

/// Scheduler status of `pid` as reported by the process table
pub fn process_status(pid: i32) -> FaultResult<ProcessStatus> {
    let target = u32::try_from(pid)
        .map(sysinfo::Pid::from_u32)
        .map_err(|_| FaultError::InvalidArgument {
            reason: format!("pid {pid} out of range"),
        })?;

    let mut system = System::new();
    system.refresh_process(target);
    system
        .process(target)
        .map(|process| process.status())
        .ok_or_else(|| FaultError::target_absent(format!("process {pid}")))
}

/// Whether `pid` is stopped by a signal (`T` in `ps`)
pub fn is_stopped(pid: i32) -> FaultResult<bool> {
    Ok(process_status(pid)? == ProcessStatus::Stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_exists() {
        let pid = std::process::id() as i32;
        assert!(process_exists(pid));
        assert!(!is_stopped(pid).unwrap());
    }

    #[test]
    fn test_stopped_child_is_reported() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as i32;
        send_signal(pid, Signal::SIGSTOP).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while !is_stopped(pid).unwrap() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(process_status(pid).unwrap(), ProcessStatus::Stop);

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_status_of_vanished_pid_is_target_absent() {
        assert!(matches!(
            process_status(i32::MAX),
            Err(FaultError::TargetAbsent { .. })
        ));
    }

    #[test]
    fn test_kill_all_tolerates_vanished_pid() {
        // Above any configurable pid_max
        let pid = i32::MAX as u32;
        assert!(!process_exists(pid as i32));
        assert_eq!(kill_all(&[pid]).unwrap(), 1);
    }
}
