//! 虚拟终端与控制台子系统
//!
//! 多个虚拟控制台共享一组显示设备和键盘。前台控制台的输出经由
//! [`ConsoleSwitch`](driver::tty::console::ConsoleSwitch) 后端显示，
//! 后台控制台只更新自己的屏幕缓冲区。

#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod libs;
pub mod driver; // 如果driver依赖了libs，应该在libs后面导出
pub mod init;
pub mod ipc;
pub mod process;

pub use driver::tty::virtual_terminal::{vty_init, VirtualTerminal, VtManager};
pub use system_error::SystemError;
