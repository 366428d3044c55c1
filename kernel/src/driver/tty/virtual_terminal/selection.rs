//! 屏幕选区：TIOCLINUX 设置选区、粘贴

use log::debug;
use system_error::SystemError;

use crate::driver::tty::tty_port::TtyPort;

use super::{console_map, virtual_console::VirtualConsoleData};

pub const TIOCL_SELCHAR: u16 = 0;
pub const TIOCL_SELWORD: u16 = 1;
pub const TIOCL_SELLINE: u16 = 2;
pub const TIOCL_SELPOINTER: u16 = 3;
pub const TIOCL_SELCLEAR: u16 = 4;
pub const TIOCL_SELMOUSEREPORT: u16 = 16;
pub const TIOCL_SELBUTTONMASK: u16 = 15;

/// TIOCLINUX 子命令2的参数，坐标从1开始
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionArg {
    pub xs: u16,
    pub ys: u16,
    pub xe: u16,
    pub ye: u16,
    pub sel_mode: u16,
}

/// 当前选区。整个终端只有一个选区
#[derive(Debug, Default)]
pub struct Selection {
    console: Option<usize>,
    /// 起止单元（含）
    start: usize,
    end: usize,
    buffer: Vec<u8>,
}

fn is_space(c: char) -> bool {
    c == ' '
}

fn in_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl Selection {
    /// 持有选区的控制台
    pub fn console(&self) -> Option<usize> {
        self.console
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    fn sel_pos(vc: &VirtualConsoleData, pos: usize) -> char {
        console_map::glyph_to_char(vc.screen_buf[pos] & 0xff)
    }

    fn highlight(&self, vc: &mut VirtualConsoleData) {
        vc.invert_screen(self.start, self.end - self.start + 1);
    }

    /// ## 取消选区的高亮
    /// 选中的文本保留，仍然可以粘贴
    pub fn clear(&mut self, vc: Option<&mut VirtualConsoleData>) {
        if self.console.take().is_none() {
            return;
        }
        if let Some(vc) = vc {
            self.highlight(vc);
        }
    }

    /// ## 在vc上设置选区
    /// vc必须是前台控制台。其它控制台上的旧选区需要调用者先清除
    pub fn set(&mut self, vc: &mut VirtualConsoleData, arg: &SelectionArg) -> Result<(), SystemError> {
        let cols = vc.cols;
        let clamp = |v: u16, max: usize| (v as usize).saturating_sub(1).min(max - 1);
        let xs = clamp(arg.xs, cols);
        let ys = clamp(arg.ys, vc.rows);
        let xe = clamp(arg.xe, cols);
        let ye = clamp(arg.ye, vc.rows);
        let mut ps = ys * cols + xs;
        let mut pe = ye * cols + xe;

        if arg.sel_mode == TIOCL_SELCLEAR {
            if self.console == Some(vc.index) {
                self.clear(Some(vc));
            }
            return Ok(());
        }

        if arg.sel_mode & TIOCL_SELMOUSEREPORT != 0 {
            if vc.report_mouse != 0 {
                let button = (arg.sel_mode & TIOCL_SELBUTTONMASK) as u8 & 3;
                let report = [
                    0x1b,
                    b'[',
                    b'M',
                    b' ' + button,
                    b'!' + xs.min(222) as u8,
                    b'!' + ys.min(222) as u8,
                ];
                vc.respond_string(&report);
            }
            return Ok(());
        }

        if ps > pe {
            core::mem::swap(&mut ps, &mut pe);
        }

        let (mut new_start, mut new_end) = match arg.sel_mode {
            TIOCL_SELCHAR => (ps, pe),
            TIOCL_SELWORD => {
                let spc = is_space(Self::sel_pos(vc, ps));
                let mut start = ps;
                loop {
                    let c = Self::sel_pos(vc, ps);
                    if (spc && !is_space(c)) || (!spc && !in_word(c)) {
                        break;
                    }
                    start = ps;
                    if ps % cols == 0 {
                        break;
                    }
                    ps -= 1;
                }
                let spc = is_space(Self::sel_pos(vc, pe));
                let mut end = pe;
                loop {
                    let c = Self::sel_pos(vc, pe);
                    if (spc && !is_space(c)) || (!spc && !in_word(c)) {
                        break;
                    }
                    end = pe;
                    if (pe + 1) % cols == 0 {
                        break;
                    }
                    pe += 1;
                }
                (start, end)
            }
            TIOCL_SELLINE => (ps - ps % cols, pe + cols - pe % cols - 1),
            TIOCL_SELPOINTER => return Ok(()),
            _ => return Err(SystemError::EINVAL),
        };

        // 选区结束在行尾空白上时延伸到行尾
        if new_end > new_start && (new_end + 1) % cols != 0 && is_space(Self::sel_pos(vc, new_end)) {
            let mut p = new_end + 1;
            loop {
                if !is_space(Self::sel_pos(vc, p)) || (p + 1) % cols == 0 {
                    break;
                }
                p += 1;
            }
            if is_space(Self::sel_pos(vc, p)) {
                new_end = p;
            }
        }
        if new_start > new_end {
            core::mem::swap(&mut new_start, &mut new_end);
        }

        if self.console == Some(vc.index) {
            self.highlight(vc);
        }
        self.console = Some(vc.index);
        self.start = new_start;
        self.end = new_end;
        self.highlight(vc);

        // 行尾的空白替换为回车
        let mut buffer = Vec::with_capacity(new_end - new_start + 1);
        let mut last_non_space = 0;
        let mut utf8 = [0u8; 4];
        for i in new_start..=new_end {
            let c = Self::sel_pos(vc, i);
            if vc.utf {
                buffer.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            } else {
                let code = c as u32;
                buffer.push(if code < 0x100 { code as u8 } else { b'?' });
            }
            if !is_space(c) {
                last_non_space = buffer.len();
            }
            if (i + 1) % cols == 0 {
                if last_non_space != buffer.len() {
                    buffer.truncate(last_non_space);
                    buffer.push(b'\r');
                }
                last_non_space = buffer.len();
            }
        }
        debug!(
            "vc {}: selection {}..={} ({} bytes)",
            vc.index,
            new_start,
            new_end,
            buffer.len()
        );
        self.buffer = buffer;
        Ok(())
    }

    /// 把选中的文本送入输入队列
    pub fn paste(&self, port: &mut TtyPort) -> usize {
        port.receive_buf(&self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::tty::virtual_terminal::{
        console_map::new_user_translation, vt_config::VtConfig,
    };

    fn new_vc() -> VirtualConsoleData {
        let config = VtConfig {
            cols: 20,
            rows: 4,
            ..VtConfig::default()
        };
        let mut vc = VirtualConsoleData::new(0, &config, new_user_translation());
        vc.init(None, None, true);
        vc.do_write(b"hello world_1 x\r\nsecond line");
        vc
    }

    fn arg(xs: u16, ys: u16, xe: u16, ye: u16, sel_mode: u16) -> SelectionArg {
        SelectionArg {
            xs,
            ys,
            xe,
            ye,
            sel_mode,
        }
    }

    #[test]
    fn test_char_selection_and_paste() {
        let mut vc = new_vc();
        let mut sel = Selection::default();
        sel.set(&mut vc, &arg(1, 1, 5, 1, TIOCL_SELCHAR)).unwrap();
        assert_eq!(sel.buffer(), b"hello");
        assert_eq!(sel.console(), Some(0));
        // 选区被反色显示
        assert_ne!(vc.cell(0, 0) & 0xff00, vc.cell(6, 0) & 0xff00);
        let mut port = TtyPort::new();
        assert_eq!(sel.paste(&mut port), 5);
        assert_eq!(port.take_input(), b"hello".to_vec());
    }

    #[test]
    fn test_word_selection() {
        let mut vc = new_vc();
        let mut sel = Selection::default();
        sel.set(&mut vc, &arg(9, 1, 9, 1, TIOCL_SELWORD)).unwrap();
        assert_eq!(sel.buffer(), b"world_1");
    }

    #[test]
    fn test_line_selection_strips_trailing_blanks() {
        let mut vc = new_vc();
        let mut sel = Selection::default();
        sel.set(&mut vc, &arg(3, 1, 3, 2, TIOCL_SELLINE)).unwrap();
        assert_eq!(sel.buffer(), b"hello world_1 x\rsecond line\r");
    }

    #[test]
    fn test_clear_restores_attributes() {
        let mut vc = new_vc();
        let before = vc.screen_buf.clone();
        let mut sel = Selection::default();
        sel.set(&mut vc, &arg(1, 1, 20, 2, TIOCL_SELCHAR)).unwrap();
        sel.clear(Some(&mut vc));
        assert_eq!(vc.screen_buf, before);
        assert_eq!(sel.console(), None);
        // 清除之后仍然可以粘贴
        assert!(!sel.buffer().is_empty());
    }

    #[test]
    fn test_invalid_mode() {
        let mut vc = new_vc();
        let mut sel = Selection::default();
        assert_eq!(
            sel.set(&mut vc, &arg(1, 1, 2, 1, 9)),
            Err(SystemError::EINVAL)
        );
    }

    #[test]
    fn test_mouse_report() {
        let mut vc = new_vc();
        vc.report_mouse = 2;
        let mut sel = Selection::default();
        sel.set(&mut vc, &arg(3, 2, 3, 2, TIOCL_SELMOUSEREPORT | 1))
            .unwrap();
        assert_eq!(vc.port.take_input(), b"\x1b[M!#\"".to_vec());
    }
}
