use std::collections::VecDeque;

use log::warn;

const TTY_PORT_BUFSIZE: usize = 4096;

#[allow(dead_code)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TtyPortState {
    Initialized,
    Active,
}

/// 虚拟控制台的tty端口：键盘输入以及终端应答都进入这里，等待读者取走
#[derive(Debug)]
pub struct TtyPort {
    state: TtyPortState,
    open_count: usize,
    /// 本地回显是否打开（对应termios的ECHO）
    echo: bool,
    /// 被 ScrollLock/hold 停止输出
    stopped: bool,
    /// 收到的break数量
    breaks: usize,
    input: VecDeque<u8>,
    /// 窗口大小 (行，列)
    winsize: (u16, u16),
}

impl Default for TtyPort {
    fn default() -> Self {
        Self::new()
    }
}

impl TtyPort {
    pub fn new() -> Self {
        Self {
            state: TtyPortState::Initialized,
            open_count: 0,
            echo: true,
            stopped: false,
            breaks: 0,
            input: VecDeque::with_capacity(TTY_PORT_BUFSIZE),
            winsize: (0, 0),
        }
    }

    pub fn state(&self) -> TtyPortState {
        self.state
    }

    pub fn open(&mut self) {
        self.open_count += 1;
        self.state = TtyPortState::Active;
    }

    pub fn close(&mut self) {
        self.open_count = self.open_count.saturating_sub(1);
        if self.open_count == 0 {
            self.state = TtyPortState::Initialized;
            self.input.clear();
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open_count > 0
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// 接收数据，缓冲区满时丢弃多出的字节，返回实际接收的数量
    pub fn receive_buf(&mut self, buf: &[u8]) -> usize {
        let room = TTY_PORT_BUFSIZE - self.input.len();
        let n = buf.len().min(room);
        if n < buf.len() {
            warn!("tty port: input overrun, dropped {} bytes", buf.len() - n);
        }
        self.input.extend(&buf[..n]);
        n
    }

    #[inline]
    pub fn receive_char(&mut self, ch: u8) {
        self.receive_buf(&[ch]);
    }

    /// 尚未被读走的字节数
    #[inline]
    pub fn chars_in_buffer(&self) -> usize {
        self.input.len()
    }

    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.input.len());
        for (dst, src) in buf.iter_mut().zip(self.input.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// 取走全部输入
    pub fn take_input(&mut self) -> Vec<u8> {
        self.input.drain(..).collect()
    }

    pub fn send_break(&mut self) {
        self.breaks += 1;
    }

    pub fn breaks(&self) -> usize {
        self.breaks
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn set_stopped(&mut self, stopped: bool) {
        self.stopped = stopped;
    }

    pub fn winsize(&self) -> (u16, u16) {
        self.winsize
    }

    pub fn set_winsize(&mut self, rows: u16, cols: u16) {
        self.winsize = (rows, cols);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_and_read() {
        let mut port = TtyPort::new();
        port.receive_buf(b"abc");
        assert_eq!(port.chars_in_buffer(), 3);
        let mut buf = [0u8; 2];
        assert_eq!(port.read(&mut buf), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(port.take_input(), b"c".to_vec());
    }

    #[test]
    fn test_overrun_drops() {
        let mut port = TtyPort::new();
        let data = vec![b'x'; TTY_PORT_BUFSIZE + 10];
        assert_eq!(port.receive_buf(&data), TTY_PORT_BUFSIZE);
        assert_eq!(port.chars_in_buffer(), TTY_PORT_BUFSIZE);
    }

    #[test]
    fn test_open_close() {
        let mut port = TtyPort::new();
        port.open();
        port.open();
        port.receive_char(b'q');
        port.close();
        assert!(port.is_open());
        port.close();
        assert!(!port.is_open());
        assert_eq!(port.state(), TtyPortState::Initialized);
        assert_eq!(port.chars_in_buffer(), 0);
    }
}
