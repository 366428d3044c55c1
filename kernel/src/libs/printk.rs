use core::fmt::{self, Write};
use core::sync::atomic::{AtomicBool, Ordering};

use log::{LevelFilter, Log, Metadata, Record};

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        ::log::debug!("({}:{})\t {}", file!(), line!(), format_args!($($arg)*))
    }
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {
        ::log::info!("({}:{})\t {}", file!(), line!(), format_args!($($arg)*))
    }
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {
        ::log::warn!("({}:{})\t {}", file!(), line!(), format_args!($($arg)*))
    }
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {
        ::log::error!("({}:{})\t {}", file!(), line!(), format_args!($($arg)*))
    }
}

pub struct PrintkWriter;

impl PrintkWriter {
    #[inline]
    pub fn __write_fmt(&mut self, args: fmt::Arguments) {
        self.write_fmt(args).ok();
    }
}

/// 为Printk Writer实现core::fmt::Write, 使得能够借助Rust自带的格式化组件，格式化字符并输出
impl fmt::Write for PrintkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        use std::io::Write as _;
        std::io::stderr()
            .write_all(s.as_bytes())
            .map_err(|_| fmt::Error)
    }
}

/// 内核日志器，把 `log` 门面的记录按 printk 的格式输出
pub struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;
static LOGGER_INSTALLED: AtomicBool = AtomicBool::new(false);

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let prefix = match record.level() {
            log::Level::Error => "\x1B[41m[ ERROR ] \x1B[0m",
            log::Level::Warn => "\x1B[1;33m[ WARN ] \x1B[0m",
            log::Level::Info => "[ INFO ] ",
            log::Level::Debug => "[ DEBUG ] ",
            log::Level::Trace => "[ TRACE ] ",
        };
        PrintkWriter.__write_fmt(format_args!("{}{}\n", prefix, record.args()));
    }

    fn flush(&self) {}
}

/// 把linux的console loglevel(0~7)转为 `LevelFilter`
pub fn loglevel_to_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::Off,
        1..=3 => LevelFilter::Error,
        4 => LevelFilter::Warn,
        5 | 6 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// 安装内核日志器。重复调用只会更新日志级别
pub fn printk_init(level: LevelFilter) {
    if !LOGGER_INSTALLED.swap(true, Ordering::SeqCst) {
        // 别的日志器已经安装时（例如测试中的env_logger），保留它
        let _ = log::set_logger(&LOGGER);
    }
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loglevel_to_filter() {
        assert_eq!(loglevel_to_filter(0), LevelFilter::Off);
        assert_eq!(loglevel_to_filter(3), LevelFilter::Error);
        assert_eq!(loglevel_to_filter(4), LevelFilter::Warn);
        assert_eq!(loglevel_to_filter(7), LevelFilter::Debug);
    }
}
