use core::fmt;

use hashbrown::HashMap;
use log::debug;
use system_error::SystemError;

use crate::{
    ipc::signal::{Signal, SignalDelivery},
    libs::spinlock::SpinLock,
};

/// 进程号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(u32);

impl Pid {
    pub const fn new(pid: u32) -> Self {
        Self(pid)
    }

    pub const fn data(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
struct ProcessInfo {
    alive: bool,
    /// 已经投递、尚未被取走的信号
    pending: Vec<Signal>,
}

/// 宿主环境下的进程表：记录进程存活状态以及投递给它们的信号
///
/// 信号投递只把信号放进进程的待处理队列；进程退出后再投递返回 `ESRCH`。
#[derive(Debug, Default)]
pub struct ProcessTable {
    inner: SpinLock<HashMap<Pid, ProcessInfo>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个存活的进程
    pub fn spawn(&self, pid: Pid) {
        let mut guard = self.inner.lock();
        let info = guard.entry(pid).or_default();
        info.alive = true;
        info.pending.clear();
    }

    /// 进程退出，之后向它投递信号都会失败
    pub fn exit(&self, pid: Pid) {
        if let Some(info) = self.inner.lock().get_mut(&pid) {
            info.alive = false;
            info.pending.clear();
        }
    }

    pub fn is_alive(&self, pid: Pid) -> bool {
        self.inner
            .lock()
            .get(&pid)
            .map(|info| info.alive)
            .unwrap_or(false)
    }

    /// 取走进程的待处理信号
    pub fn take_signals(&self, pid: Pid) -> Vec<Signal> {
        self.inner
            .lock()
            .get_mut(&pid)
            .map(|info| core::mem::take(&mut info.pending))
            .unwrap_or_default()
    }
}

impl SignalDelivery for ProcessTable {
    fn send_signal(&self, pid: Pid, sig: Signal) -> Result<(), SystemError> {
        let mut guard = self.inner.lock();
        match guard.get_mut(&pid) {
            Some(info) if info.alive => {
                debug!("send signal {:?} to pid {}", sig, pid);
                info.pending.push(sig);
                Ok(())
            }
            _ => Err(SystemError::ESRCH),
        }
    }

    fn probe(&self, pid: Pid) -> Result<(), SystemError> {
        if self.is_alive(pid) {
            Ok(())
        } else {
            Err(SystemError::ESRCH)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_to_live_process() {
        let table = ProcessTable::new();
        let pid = Pid::new(1234);
        table.spawn(pid);
        assert!(table.send_signal(pid, Signal::SIGUSR1).is_ok());
        assert_eq!(table.take_signals(pid), vec![Signal::SIGUSR1]);
        assert!(table.take_signals(pid).is_empty());
    }

    #[test]
    fn test_signal_to_dead_process() {
        let table = ProcessTable::new();
        let pid = Pid::new(7);
        assert_eq!(
            table.send_signal(pid, Signal::SIGUSR1),
            Err(SystemError::ESRCH)
        );
        table.spawn(pid);
        table.exit(pid);
        assert!(!table.is_alive(pid));
        assert_eq!(
            table.send_signal(pid, Signal::SIGUSR2),
            Err(SystemError::ESRCH)
        );
    }

    #[test]
    fn test_signal_from_user() {
        assert_eq!(Signal::from_user(0), Ok(None));
        assert_eq!(Signal::from_user(10), Ok(Some(Signal::SIGUSR1)));
        assert_eq!(Signal::from_user(99), Err(SystemError::EINVAL));
    }
}
