use core::fmt::Debug;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use system_error::SystemError;

use crate::process::Pid;

/// 控制台会用到的信号编号，和linux x86保持一致
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(i32)]
#[allow(non_camel_case_types)]
pub enum Signal {
    SIGHUP = 1,
    SIGINT,
    SIGQUIT,
    SIGILL,
    SIGTRAP,
    /// SIGABRT和SIGIOT共用这个号码
    SIGABRT_OR_IOT,
    SIGBUS,
    SIGFPE,
    SIGKILL,
    SIGUSR1,

    SIGSEGV = 11,
    SIGUSR2,
    SIGPIPE,
    SIGALRM,
    SIGTERM,
    SIGSTKFLT,
    SIGCHLD,
    SIGCONT,
    SIGSTOP,
    SIGTSTP,

    SIGTTIN = 21,
    SIGTTOU,
    SIGURG,
    SIGXCPU,
    SIGXFSZ,
    SIGVTALRM,
    SIGPROF,
    SIGWINCH,
    /// SIGIO和SIGPOLL共用这个号码
    SIGIO_OR_POLL,
    SIGPWR,

    SIGSYS = 31,
}

impl Signal {
    /// 把用户传入的信号编号转为Signal，0表示“不发送信号”
    pub fn from_user(value: i32) -> Result<Option<Signal>, SystemError> {
        if value == 0 {
            return Ok(None);
        }
        match <Signal as FromPrimitive>::from_i32(value) {
            Some(sig) => Ok(Some(sig)),
            None => Err(SystemError::EINVAL),
        }
    }

    pub fn number(&self) -> i32 {
        *self as i32
    }
}

/// 向进程投递信号的能力
///
/// 返回 `ESRCH` 表示目标进程已经不存在，vt切换协议据此把控制台恢复为自动模式。
pub trait SignalDelivery: Send + Sync + Debug {
    fn send_signal(&self, pid: Pid, sig: Signal) -> Result<(), SystemError>;

    /// 只检查进程是否存在，相当于发送0号信号
    fn probe(&self, pid: Pid) -> Result<(), SystemError>;
}
