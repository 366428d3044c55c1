#![allow(clippy::needless_return)]
#![allow(clippy::upper_case_acronyms)]

use core::fmt;

use num_derive::{FromPrimitive, ToPrimitive};

/// 控制台子系统使用的错误码，数值与posix errno一致，
/// ioctl 返回时通过 [`SystemError::to_posix_errno`] 转为负数。
#[repr(i32)]
#[derive(Debug, FromPrimitive, ToPrimitive, PartialEq, Eq, Clone, Copy, Hash)]
#[allow(dead_code, non_camel_case_types)]
pub enum SystemError {
    /// 操作不被允许 Operation not permitted.
    EPERM = 1,
    /// 没有指定的文件或目录 No such file or directory.
    ENOENT = 2,
    /// 没有这样的进程 No such process.
    ESRCH = 3,
    /// 被中断的函数 Interrupted function.
    EINTR = 4,
    /// I/O错误 I/O error.
    EIO = 5,
    /// 没有这样的设备或地址 No such device or address.
    ENXIO = 6,
    /// 参数列表过长，或者在输出buffer中缺少空间 Argument list too long.
    E2BIG = 7,
    /// 资源不可用，请重试。 Resource unavailable, try again.
    ///
    /// 操作将被禁止 Operation would block.
    EAGAIN_OR_EWOULDBLOCK = 11,
    /// 没有足够的空间 Not enough space.
    ENOMEM = 12,
    /// 错误的地址 Bad address
    EFAULT = 14,
    /// 设备或资源忙 Device or resource busy.
    EBUSY = 16,
    /// 没有指定的设备 No such device.
    ENODEV = 19,
    /// 不可用的参数 Invalid argument.
    EINVAL = 22,
    /// 不是一个tty Inappropriate I/O control operation.
    ENOTTY = 25,
    /// 设备上没有空间 No space left on device.
    ENOSPC = 28,
    /// 结果过大 Result too large.
    ERANGE = 34,
    /// 功能不支持 Function not supported.
    ENOSYS = 38,
    /// 不支持的操作 Operation not supported.
    EOPNOTSUPP_OR_ENOTSUP = 95,

    // === 以下错误码不应该被用户态程序使用 ===
    /// 系统调用被信号打断，需要重新执行
    ERESTARTSYS = 512,
    /// 没有对应的ioctlcmd
    ENOIOCTLCMD = 515,
}

/// 错误的大类，调用者根据大类决定重试、回退还是上报
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 参数非法（例如越界的控制台编号）
    InvalidArgument,
    /// 调用者不是该tty的所有者，也没有配置权限
    PermissionDenied,
    /// 资源耗尽（没有空闲的控制台，字体过大）
    ResourceExhausted,
    /// 显示后端或者命令不支持
    NotSupported,
    /// 硬件暂时不可用，调用者可以重试
    TransientHardware,
    /// 阻塞等待被取消
    Interrupted,
    Other,
}

impl SystemError {
    /// @brief 把posix错误码转换为系统错误枚举类型。
    pub fn from_posix_errno(errno: i32) -> Option<SystemError> {
        // posix 错误码是小于0的
        if errno >= 0 {
            return None;
        }
        return <Self as num_traits::FromPrimitive>::from_i32(-errno);
    }

    /// @brief 把系统错误枚举类型转换为负数posix错误码。
    pub fn to_posix_errno(&self) -> i32 {
        return -(*self as i32);
    }

    /// 返回错误所属的大类
    pub fn class(&self) -> ErrorClass {
        match self {
            SystemError::EINVAL
            | SystemError::ENXIO
            | SystemError::EFAULT
            | SystemError::ERANGE
            | SystemError::ENOTTY
            | SystemError::ENODEV => ErrorClass::InvalidArgument,
            SystemError::EPERM => ErrorClass::PermissionDenied,
            SystemError::ENOMEM | SystemError::ENOSPC | SystemError::E2BIG => {
                ErrorClass::ResourceExhausted
            }
            SystemError::ENOSYS
            | SystemError::ENOIOCTLCMD
            | SystemError::EOPNOTSUPP_OR_ENOTSUP => ErrorClass::NotSupported,
            SystemError::EAGAIN_OR_EWOULDBLOCK | SystemError::EBUSY | SystemError::EIO => {
                ErrorClass::TransientHardware
            }
            SystemError::EINTR | SystemError::ERESTARTSYS => ErrorClass::Interrupted,
            _ => ErrorClass::Other,
        }
    }
}

impl fmt::Display for SystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.to_posix_errno())
    }
}

impl std::error::Error for SystemError {}
