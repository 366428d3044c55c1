//! 控制字符与转义序列的处理

use log::{debug, warn};

use crate::driver::keyboard::kbd::VcKbdMode;

use super::{
    console_map::TranslationMapType,
    virtual_console::{
        ConsoleRequest, VirtualConsoleData, VirtualConsoleIntensity, VirtualConsoleState,
        Vt102Private, DEFAULT_BELL_DURATION, DEFAULT_BELL_PITCH, NPAR,
    },
    Color, COLOR_TABLE,
};

/// DA/DECID的应答，表示VT102
const VT102ID: &[u8] = b"\x1b[?6c";

impl VirtualConsoleData {
    /// ## 处理一个控制字符或者转义序列中的字节
    pub fn do_control(&mut self, ch: u32) {
        // OSC内部只认BEL和ESC
        if self.vc_state == VirtualConsoleState::ESosc {
            match ch {
                7 => self.vc_state = VirtualConsoleState::ESnormal,
                27 => self.vc_state = VirtualConsoleState::ESesc,
                _ => {}
            }
            return;
        }

        // 控制字符可以出现在转义序列中间
        match ch {
            0 => {
                return;
            }
            7 => {
                if self.bell_duration != 0 {
                    self.requests.push(ConsoleRequest::Bell {
                        pitch: self.bell_pitch,
                        duration: self.bell_duration,
                    });
                }
                return;
            }
            8 => {
                self.backspace();
                return;
            }
            9 => {
                self.horizontal_tab();
                return;
            }
            10..=12 => {
                self.line_feed();
                if !self.kbd.is_mode(VcKbdMode::CRLF) {
                    return;
                }
                self.carriage_return();
                return;
            }
            13 => {
                self.carriage_return();
                return;
            }
            14 => {
                self.state.charset = true;
                self.translate = self.state.g1_charset;
                self.disp_ctrl = true;
                return;
            }
            15 => {
                self.state.charset = false;
                self.translate = self.state.g0_charset;
                self.disp_ctrl = false;
                return;
            }
            24 | 26 => {
                self.vc_state = VirtualConsoleState::ESnormal;
                return;
            }
            27 => {
                self.vc_state = VirtualConsoleState::ESesc;
                return;
            }
            127 => {
                return;
            }
            155 => {
                self.vc_state = VirtualConsoleState::ESsquare;
                return;
            }
            _ => {}
        }

        match self.vc_state {
            VirtualConsoleState::ESesc => {
                self.vc_state = VirtualConsoleState::ESnormal;
                self.do_escape(ch as u8);
            }
            VirtualConsoleState::ESnonstd => {
                if ch == b'P' as u32 {
                    self.clear_pars();
                    self.vc_state = VirtualConsoleState::ESpalette;
                } else if ch == b'R' as u32 {
                    self.reset_palette();
                    self.vc_state = VirtualConsoleState::ESnormal;
                } else {
                    self.vc_state = VirtualConsoleState::ESosc;
                }
            }
            VirtualConsoleState::ESpalette => {
                let c = ch as u8;
                if c.is_ascii_hexdigit() {
                    self.par[self.npar] = (c as char).to_digit(16).unwrap_or(0);
                    self.npar += 1;
                    if self.npar == 7 {
                        self.set_palette_entry();
                        self.vc_state = VirtualConsoleState::ESnormal;
                    }
                } else {
                    self.vc_state = VirtualConsoleState::ESnormal;
                }
            }
            VirtualConsoleState::ESsquare => {
                self.clear_pars();
                self.vc_state = VirtualConsoleState::ESgetpars;
                match ch as u8 {
                    b'[' => {
                        // 功能键 ESC [ [ x
                        self.vc_state = VirtualConsoleState::ESfunckey;
                        return;
                    }
                    b'?' => {
                        self.private = Vt102Private::Question;
                        return;
                    }
                    b'>' => {
                        self.private = Vt102Private::Greater;
                        return;
                    }
                    b'=' => {
                        self.private = Vt102Private::Equal;
                        return;
                    }
                    _ => {
                        self.private = Vt102Private::None;
                    }
                }
                self.get_pars(ch as u8);
            }
            VirtualConsoleState::ESgetpars => {
                self.get_pars(ch as u8);
            }
            VirtualConsoleState::ESfunckey => {
                self.vc_state = VirtualConsoleState::ESnormal;
            }
            VirtualConsoleState::EShash => {
                self.vc_state = VirtualConsoleState::ESnormal;
                if ch == b'8' as u32 {
                    // DEC屏幕对齐测试，用E填满屏幕
                    self.erase_char = (self.erase_char & 0xff00) | b'E' as u16;
                    self.csi_j(2);
                    self.erase_char = (self.erase_char & 0xff00) | b' ' as u16;
                }
            }
            VirtualConsoleState::ESsetG0 => {
                if let Some(map) = TranslationMapType::from_designator(ch as u8) {
                    self.state.g0_charset = map;
                }
                if !self.state.charset {
                    self.translate = self.state.g0_charset;
                }
                self.vc_state = VirtualConsoleState::ESnormal;
            }
            VirtualConsoleState::ESsetG1 => {
                if let Some(map) = TranslationMapType::from_designator(ch as u8) {
                    self.state.g1_charset = map;
                }
                if self.state.charset {
                    self.translate = self.state.g1_charset;
                }
                self.vc_state = VirtualConsoleState::ESnormal;
            }
            VirtualConsoleState::ESpercent => {
                self.vc_state = VirtualConsoleState::ESnormal;
                match ch as u8 {
                    // ISO 2022 默认字符集
                    b'@' => self.utf = false,
                    b'G' | b'8' => self.utf = true,
                    _ => {}
                }
            }
            VirtualConsoleState::ESgotpars => {
                self.vc_state = VirtualConsoleState::ESnormal;
                self.do_csi(ch as u8);
            }
            VirtualConsoleState::ESignore => {
                self.vc_state = VirtualConsoleState::ESnormal;
            }
            VirtualConsoleState::ESnormal | VirtualConsoleState::ESosc => {}
        }
    }

    fn clear_pars(&mut self) {
        self.par = [0; NPAR];
        self.npar = 0;
        self.par_overflow = false;
    }

    fn get_pars(&mut self, c: u8) {
        match c {
            b';' => {
                if self.npar < NPAR - 1 {
                    self.npar += 1;
                } else {
                    self.par_overflow = true;
                }
            }
            b'0'..=b'9' => {
                if self.par_overflow {
                    return;
                }
                let p = &mut self.par[self.npar];
                *p = p.saturating_mul(10).saturating_add((c - b'0') as u32);
            }
            _ => {
                self.vc_state = VirtualConsoleState::ESgotpars;
                self.do_control(c as u32);
            }
        }
    }

    /// ESC 之后的单个字符
    fn do_escape(&mut self, c: u8) {
        match c {
            b'[' => self.vc_state = VirtualConsoleState::ESsquare,
            b']' => self.vc_state = VirtualConsoleState::ESnonstd,
            b'%' => self.vc_state = VirtualConsoleState::ESpercent,
            b'E' => {
                self.carriage_return();
                self.line_feed();
            }
            b'M' => self.reverse_line_feed(),
            b'D' => self.line_feed(),
            b'H' => self.tab_stop.set(self.state.x),
            b'Z' => self.respond_string(VT102ID),
            b'7' => self.save_cursor(),
            b'8' => self.restore_cursor(),
            b'(' => self.vc_state = VirtualConsoleState::ESsetG0,
            b')' => self.vc_state = VirtualConsoleState::ESsetG1,
            b'#' => self.vc_state = VirtualConsoleState::EShash,
            b'c' => self.reset_terminal(true),
            // 数字小键盘
            b'>' => self.kbd.clear_mode(VcKbdMode::APPLIC),
            // 应用小键盘
            b'=' => self.kbd.set_mode(VcKbdMode::APPLIC),
            // ST，结束一个已经被忽略的字符串
            b'\\' => {}
            _ => {
                debug!("vc {}: unknown escape ESC {:?}", self.index, c as char);
            }
        }
    }

    /// CSI 序列的结束字符
    fn do_csi(&mut self, c: u8) {
        let question = self.private == Vt102Private::Question;
        match c {
            b'h' => {
                self.set_mode(true);
                return;
            }
            b'l' => {
                self.set_mode(false);
                return;
            }
            b'c' => {
                if question {
                    self.cursor_type = if self.par[0] != 0 {
                        self.par[0] | (self.par[1] << 8) | (self.par[2] << 16)
                    } else {
                        self.cur_default
                    };
                    self.set_cursor();
                    return;
                }
            }
            b'm' => {
                if question {
                    self.complement_mask = if self.par[0] != 0 {
                        ((self.par[0] << 8) | self.par[1]) as u16
                    } else {
                        self.s_complement_mask
                    };
                    return;
                }
            }
            b'n' => {
                if self.private == Vt102Private::None {
                    match self.par[0] {
                        5 => self.respond_string(b"\x1b[0n"),
                        6 => self.cursor_report(),
                        _ => {}
                    }
                }
                return;
            }
            _ => {}
        }

        if self.private != Vt102Private::None {
            self.private = Vt102Private::None;
            return;
        }

        let x = self.state.x as i32;
        let y = self.state.y as i32;
        match c {
            b'G' | b'`' => {
                if self.par[0] != 0 {
                    self.par[0] -= 1;
                }
                self.gotoxy(self.par_i32(0), y);
            }
            b'A' => {
                let n = self.par_i32(0).max(1);
                self.gotoxy(x, y.saturating_sub(n));
            }
            b'B' | b'e' => {
                let n = self.par_i32(0).max(1);
                self.gotoxy(x, y.saturating_add(n));
            }
            b'C' | b'a' => {
                let n = self.par_i32(0).max(1);
                self.gotoxy(x.saturating_add(n), y);
            }
            b'D' => {
                let n = self.par_i32(0).max(1);
                self.gotoxy(x.saturating_sub(n), y);
            }
            b'E' => {
                let n = self.par_i32(0).max(1);
                self.gotoxy(0, y.saturating_add(n));
            }
            b'F' => {
                let n = self.par_i32(0).max(1);
                self.gotoxy(0, y.saturating_sub(n));
            }
            b'd' => {
                if self.par[0] != 0 {
                    self.par[0] -= 1;
                }
                self.gotoxay(x, self.par[0].min(i32::MAX as u32) as i32);
            }
            b'H' | b'f' => {
                if self.par[0] != 0 {
                    self.par[0] -= 1;
                }
                if self.par[1] != 0 {
                    self.par[1] -= 1;
                }
                self.gotoxay(
                    self.par[1].min(i32::MAX as u32) as i32,
                    self.par[0].min(i32::MAX as u32) as i32,
                );
            }
            b'J' => self.csi_j(self.par[0]),
            b'K' => self.csi_k(self.par[0]),
            b'L' => self.csi_l(self.par[0]),
            b'M' => self.csi_m_delete_line(self.par[0]),
            b'P' => self.csi_p(self.par[0]),
            b'S' => {
                let n = self.par[0].max(1) as usize;
                self.scroll_up(self.top, self.bottom, n);
            }
            b'T' => {
                let n = self.par[0].max(1) as usize;
                self.scroll_down(self.top, self.bottom, n);
            }
            b'c' => {
                if self.par[0] == 0 {
                    self.respond_string(VT102ID);
                }
            }
            b'g' => {
                if self.par[0] == 0 {
                    self.tab_stop.clear(self.state.x);
                } else if self.par[0] == 3 {
                    self.tab_stop.clear_all();
                }
            }
            b'm' => self.csi_m(),
            b'q' => {
                // DECLL，只有3个灯：0,1,2,3 映射到 0,1,2,4
                if self.par[0] < 4 {
                    let led = if self.par[0] < 3 { self.par[0] } else { 4 };
                    self.kbd.set_led_state(led as u8);
                }
            }
            b'r' => {
                if self.par[0] == 0 {
                    self.par[0] = 1;
                }
                if self.par[1] == 0 {
                    self.par[1] = self.rows as u32;
                }
                // 滚动区域至少两行
                if self.par[0] < self.par[1] && self.par[1] as usize <= self.rows {
                    self.top = (self.par[0] - 1) as usize;
                    self.bottom = self.par[1] as usize;
                    self.gotoxay(0, 0);
                }
            }
            b's' => self.save_cursor(),
            b'u' => self.restore_cursor(),
            b'X' => self.csi_x(self.par[0]),
            b'@' => self.csi_at(self.par[0]),
            b']' => self.setterm_command(),
            _ => {
                debug!("vc {}: unknown csi final {:?}", self.index, c as char);
            }
        }
    }

    fn cursor_report(&mut self) {
        let row = if self.origin_mode {
            self.state.y - self.top + 1
        } else {
            self.state.y + 1
        };
        let report = format!("\x1b[{};{}R", row, self.state.x + 1);
        self.respond_string(report.as_bytes());
    }

    /// ESC ] P nrrggbb
    fn set_palette_entry(&mut self) {
        let idx = self.par[0] as usize;
        let component = |hi: u32, lo: u32| (16 * hi + lo) as u16;
        self.palette[idx] = Color {
            red: component(self.par[1], self.par[2]),
            green: component(self.par[3], self.par[4]),
            blue: component(self.par[5], self.par[6]),
            transp: 0,
        };
        self.set_palette();
    }

    /// ## 设置或清除模式（h/l）
    fn set_mode(&mut self, on: bool) {
        let question = self.private == Vt102Private::Question;
        self.private = Vt102Private::None;
        for i in 0..=self.npar {
            if question {
                match self.par[i] {
                    // 光标键发送 ESC O x 或 ESC [ x
                    1 => {
                        if on {
                            self.kbd.set_mode(VcKbdMode::CKMODE);
                        } else {
                            self.kbd.clear_mode(VcKbdMode::CKMODE);
                        }
                    }
                    // 80/132列切换
                    3 => {
                        let cols = if on { 132 } else { 80 };
                        let rows = self.rows;
                        if let Err(e) = self.vc_resize(cols, rows) {
                            warn!("vc {}: DECCOLM resize failed: {:?}", self.index, e);
                        }
                    }
                    5 => {
                        if self.screen_mode != on {
                            self.screen_mode = on;
                            let len = self.screen_buf.len();
                            self.invert_screen(0, len);
                            self.update_attr();
                        }
                    }
                    6 => {
                        self.origin_mode = on;
                        self.gotoxay(0, 0);
                    }
                    7 => self.autowrap = on,
                    8 => {
                        if on {
                            self.kbd.set_mode(VcKbdMode::REPEAT);
                        } else {
                            self.kbd.clear_mode(VcKbdMode::REPEAT);
                        }
                    }
                    9 => self.report_mouse = if on { 1 } else { 0 },
                    25 => self.cursor_visible = on,
                    1000 => self.report_mouse = if on { 2 } else { 0 },
                    _ => {}
                }
            } else {
                match self.par[i] {
                    // 显示控制字符
                    3 => self.disp_ctrl = on,
                    4 => self.insert_mode = on,
                    20 => {
                        if on {
                            self.kbd.set_mode(VcKbdMode::CRLF);
                        } else {
                            self.kbd.clear_mode(VcKbdMode::CRLF);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// ## SGR
    fn csi_m(&mut self) {
        let mut i = 0;
        while i <= self.npar {
            let foreground = self.state.color & 0x0f;
            let background = self.state.color & 0xf0;
            match self.par[i] {
                0 => self.default_attr(),
                1 => self.state.intensity = VirtualConsoleIntensity::Bold,
                2 => self.state.intensity = VirtualConsoleIntensity::HalfBright,
                3 => self.state.italic = true,
                4 => self.state.underline = true,
                5 => self.state.blink = true,
                7 => self.state.reverse = true,
                10 => {
                    self.translate = if self.state.charset {
                        self.state.g1_charset
                    } else {
                        self.state.g0_charset
                    };
                    self.disp_ctrl = false;
                    self.toggle_meta = false;
                }
                11 => {
                    self.translate = TranslationMapType::IbmPc;
                    self.disp_ctrl = true;
                    self.toggle_meta = false;
                }
                12 => {
                    self.translate = TranslationMapType::IbmPc;
                    self.disp_ctrl = true;
                    self.toggle_meta = true;
                }
                21 | 22 => self.state.intensity = VirtualConsoleIntensity::Normal,
                23 => self.state.italic = false,
                24 => self.state.underline = false,
                25 => self.state.blink = false,
                27 => self.state.reverse = false,
                38 => {
                    i = self.t416_color(i, true);
                }
                48 => {
                    i = self.t416_color(i, false);
                }
                39 => self.state.color = (self.def_color & 0x0f) | background,
                49 => self.state.color = (self.def_color & 0xf0) | foreground,
                n @ 30..=37 => self.state.color = COLOR_TABLE[(n - 30) as usize] | background,
                n @ 40..=47 => {
                    self.state.color = (COLOR_TABLE[(n - 40) as usize] << 4) | foreground
                }
                n @ 90..=97 => {
                    self.state.intensity = VirtualConsoleIntensity::Bold;
                    self.state.color = COLOR_TABLE[(n - 90) as usize] | background;
                }
                n @ 100..=107 => {
                    self.state.color = (COLOR_TABLE[(n - 100) as usize] << 4) | foreground
                }
                _ => {}
            }
            i += 1;
        }
        self.update_attr();
    }

    /// 参数转为坐标运算用的i32，超出部分饱和
    #[inline]
    fn par_i32(&self, i: usize) -> i32 {
        self.par[i].min(i32::MAX as u32) as i32
    }

    /// ## 38/48 扩展颜色，返回最后一个被消耗的参数下标
    fn t416_color(&mut self, i: usize, foreground: bool) -> usize {
        let mut i = i + 1;
        if i > self.npar {
            return i;
        }

        let color = if self.par[i] == 5 && i < self.npar {
            i += 1;
            // 超出256色的下标被忽略
            if self.par[i] > 255 {
                return i;
            }
            Color::from_256(self.par[i])
        } else if self.par[i] == 2 && i + 3 <= self.npar {
            let c = Color {
                red: self.par[i + 1].min(0xff) as u16,
                green: self.par[i + 2].min(0xff) as u16,
                blue: self.par[i + 3].min(0xff) as u16,
                transp: 0,
            };
            i += 3;
            c
        } else {
            return i;
        };

        if foreground {
            self.rgb_foreground(&color);
        } else {
            self.rgb_background(&color);
        }
        i
    }

    fn rgb_foreground(&mut self, c: &Color) {
        let max = c.red.max(c.green).max(c.blue);
        let mut hue = 0u8;
        if c.red > max / 2 {
            hue |= 4;
        }
        if c.green > max / 2 {
            hue |= 2;
        }
        if c.blue > max / 2 {
            hue |= 1;
        }

        if hue == 7 && max <= 0x55 {
            hue = 0;
            self.state.intensity = VirtualConsoleIntensity::Bold;
        } else if max > 0xaa {
            self.state.intensity = VirtualConsoleIntensity::Bold;
        } else {
            self.state.intensity = VirtualConsoleIntensity::Normal;
        }

        self.state.color = (self.state.color & 0xf0) | hue;
    }

    fn rgb_background(&mut self, c: &Color) {
        // 背景没有高亮，只取每个分量的最高位
        let bits = ((c.red & 0x80) >> 1) | ((c.green & 0x80) >> 2) | ((c.blue & 0x80) >> 3);
        self.state.color = (self.state.color & 0x0f) | bits as u8;
    }

    /// ## CSI n ] 终端设置命令
    fn setterm_command(&mut self) {
        let arg = self.par[1];
        match self.par[0] {
            // 下划线颜色
            1 => {
                if self.color_mode && arg < 16 {
                    self.ulcolor = COLOR_TABLE[arg as usize];
                    if self.state.underline {
                        self.update_attr();
                    }
                }
            }
            // 暗淡颜色
            2 => {
                if self.color_mode && arg < 16 {
                    self.halfcolor = COLOR_TABLE[arg as usize];
                    if self.state.intensity == VirtualConsoleIntensity::HalfBright {
                        self.update_attr();
                    }
                }
            }
            // 把当前颜色设为默认
            8 => {
                self.def_color = self.attr;
                if self.hi_font_mask == 0x100 {
                    self.def_color >>= 1;
                }
                self.default_attr();
                self.update_attr();
            }
            9 => {
                self.requests
                    .push(ConsoleRequest::SetBlankInterval(arg.min(60)));
            }
            10 => {
                self.bell_pitch = if self.npar >= 1 { arg } else { DEFAULT_BELL_PITCH };
            }
            11 => {
                self.bell_duration = if self.npar >= 1 {
                    if arg < 2000 {
                        arg
                    } else {
                        0
                    }
                } else {
                    DEFAULT_BELL_DURATION
                };
            }
            12 => {
                if arg >= 1 {
                    self.requests
                        .push(ConsoleRequest::SetConsole(arg as usize - 1));
                }
            }
            13 => self.requests.push(ConsoleRequest::Poke),
            14 => {
                self.requests
                    .push(ConsoleRequest::SetVesaOffInterval(arg.min(60)));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::tty::virtual_terminal::{
        console_map::new_user_translation, vt_config::VtConfig,
    };

    use super::*;

    fn new_vc(cols: usize, rows: usize) -> VirtualConsoleData {
        let config = VtConfig {
            cols,
            rows,
            ..VtConfig::default()
        };
        let mut vc = VirtualConsoleData::new(1, &config, new_user_translation());
        vc.init(None, None, true);
        vc
    }

    #[test]
    fn test_cup() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b[10;5H");
        assert_eq!((vc.state.x, vc.state.y), (4, 9));
        // 越界的坐标被限制在屏幕内
        vc.do_write(b"\x1b[999;999H");
        assert_eq!((vc.state.x, vc.state.y), (79, 23));
        vc.do_write(b"\x1b[H");
        assert_eq!((vc.state.x, vc.state.y), (0, 0));
    }

    #[test]
    fn test_relative_moves() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b[5;5H\x1b[2A\x1b[3C");
        assert_eq!((vc.state.x, vc.state.y), (7, 2));
        vc.do_write(b"\x1b[B\x1b[D");
        assert_eq!((vc.state.x, vc.state.y), (6, 3));
        vc.do_write(b"\x1b[100D\x1b[100A");
        assert_eq!((vc.state.x, vc.state.y), (0, 0));
    }

    #[test]
    fn test_erase_display_idempotent() {
        let mut vc = new_vc(20, 5);
        vc.do_write(b"hello\r\nworld");
        vc.do_write(b"\x1b[2J");
        let first = vc.screen_buf.clone();
        vc.do_write(b"\x1b[2J");
        assert_eq!(vc.screen_buf, first);
        assert!(first.iter().all(|c| *c == vc.erase_char));
    }

    #[test]
    fn test_erase_line_parts() {
        let mut vc = new_vc(10, 2);
        vc.do_write(b"abcdefghij\x1b[1;5H\x1b[K");
        assert_eq!(vc.row_text(0), "abcd");
        vc.do_write(b"\x1b[1;2H\x1b[1K");
        assert_eq!(vc.row_text(0), "  cd");
    }

    #[test]
    fn test_save_restore_cursor() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b[3;7H\x1b[1;31m\x1b7");
        let saved_attr = vc.attr;
        vc.do_write(b"\x1b[H\x1b[0m");
        assert_ne!(vc.attr, saved_attr);
        vc.do_write(b"\x1b8");
        assert_eq!((vc.state.x, vc.state.y), (6, 2));
        assert_eq!(vc.attr, saved_attr);
    }

    #[test]
    fn test_huge_moves_clamp_in_direction() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b[5;5H\x1b[3000000000G");
        assert_eq!((vc.state.x, vc.state.y), (79, 4));
        vc.do_write(b"\x1b[5;5H\x1b[3000000000A");
        assert_eq!((vc.state.x, vc.state.y), (4, 0));
        vc.do_write(b"\x1b[5;5H\x1b[3000000000B");
        assert_eq!((vc.state.x, vc.state.y), (4, 23));
        vc.do_write(b"\x1b[5;5H\x1b[3000000000C");
        assert_eq!((vc.state.x, vc.state.y), (79, 4));
        vc.do_write(b"\x1b[5;5H\x1b[3000000000D");
        assert_eq!((vc.state.x, vc.state.y), (0, 4));
        vc.do_write(b"\x1b[5;5H\x1b[3000000000E");
        assert_eq!((vc.state.x, vc.state.y), (0, 23));
        vc.do_write(b"\x1b[5;5H\x1b[3000000000F");
        assert_eq!((vc.state.x, vc.state.y), (0, 0));
        // 参数本身溢出u32
        vc.do_write(b"\x1b[5;5H\x1b[99999999999999999999D");
        assert_eq!((vc.state.x, vc.state.y), (0, 4));
    }

    #[test]
    fn test_out_of_range_256_color_ignored() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b[31m");
        let color = vc.state.color;
        vc.do_write(b"\x1b[38;5;256m");
        assert_eq!(vc.state.color, color);
        vc.do_write(b"\x1b[38;5;500000000m\x1b[48;5;4294967295m");
        assert_eq!(vc.state.color, color);
        vc.do_write(b"\x1b[38;5;99999999999999999999m");
        assert_eq!(vc.state.color, color);
        // 后面的参数继续生效
        vc.do_write(b"\x1b[38;5;1000;44m");
        assert_eq!(vc.state.color & 0xf0, 0x10);
        vc.do_write(b"\x1b[38;5;255m");
        assert_ne!(vc.state.color & 0x0f, color & 0x0f);
    }

    #[test]
    fn test_sgr_colors() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b[31;44m");
        // ANSI红色是vga的4，ANSI蓝色是vga的1
        assert_eq!(vc.state.color, 0x14);
        vc.do_write(b"\x1b[39m");
        assert_eq!(vc.state.color, 0x17);
        vc.do_write(b"\x1b[0m");
        assert_eq!(vc.state.color, 0x07);
        vc.do_write(b"\x1b[38;5;9m");
        assert_eq!(vc.state.color & 0x0f, 4);
        assert_eq!(vc.state.intensity, VirtualConsoleIntensity::Bold);
        vc.do_write(b"\x1b[48;2;0;0;255m");
        assert_eq!(vc.state.color & 0xf0, 0x10);
    }

    #[test]
    fn test_reverse_attr() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b[7m");
        assert_eq!(vc.attr, 0x70);
    }

    #[test]
    fn test_scroll_region() {
        let mut vc = new_vc(10, 5);
        vc.do_write(b"\x1b[2;4r");
        assert_eq!((vc.top, vc.bottom), (1, 4));
        assert_eq!((vc.state.x, vc.state.y), (0, 0));
        vc.do_write(b"\x1b[2;1Ha\r\nb\r\nc\r\nd");
        // 区域内滚动，第0行和第4行不受影响
        assert_eq!(vc.row_text(1), "b");
        assert_eq!(vc.row_text(3), "d");
        assert_eq!(vc.scrollback.len(), 0);
        // 非法区域被忽略
        vc.do_write(b"\x1b[4;2r");
        assert_eq!((vc.top, vc.bottom), (1, 4));
    }

    #[test]
    fn test_device_reports() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b[5;10H\x1b[6n");
        assert_eq!(vc.port.take_input(), b"\x1b[5;10R".to_vec());
        vc.do_write(b"\x1b[c");
        assert_eq!(vc.port.take_input(), VT102ID.to_vec());
        vc.do_write(b"\x1b[5n");
        assert_eq!(vc.port.take_input(), b"\x1b[0n".to_vec());
    }

    #[test]
    fn test_control_inside_sequence() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"ab\x1b[\x08C");
        // 退格在序列中执行，然后序列照常结束
        assert_eq!(vc.state.x, 2);
        // CAN 取消序列
        vc.do_write(b"\x1b[5\x18A");
        assert_eq!(vc.row_text(0), "abA");
    }

    #[test]
    fn test_excess_params_ignored() {
        let mut vc = new_vc(80, 24);
        let mut seq = b"\x1b[".to_vec();
        for _ in 0..20 {
            seq.extend_from_slice(b"1;");
        }
        seq.extend_from_slice(b"31m");
        vc.do_write(&seq);
        assert_eq!(vc.state.intensity, VirtualConsoleIntensity::Bold);
        assert_eq!(vc.vc_state, VirtualConsoleState::ESnormal);
    }

    #[test]
    fn test_private_modes() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b[?25l\x1b[?7l");
        assert!(!vc.cursor_visible);
        assert!(!vc.autowrap);
        vc.do_write(b"\x1b[?1h");
        assert!(vc.kbd.is_mode(VcKbdMode::CKMODE));
        vc.do_write(b"\x1b[4h");
        assert!(vc.insert_mode);
        vc.do_write(b"\x1b[20h");
        assert!(vc.kbd.is_mode(VcKbdMode::CRLF));
    }

    #[test]
    fn test_charset_switch() {
        let mut vc = new_vc(80, 24);
        vc.utf = false;
        vc.do_write(b"\x1b(0q\x1b(Bq");
        assert_eq!(vc.cell(0, 0) & 0xff, 0xc4);
        assert_eq!(vc.cell(1, 0) & 0xff, b'q' as u16);
        // SO切换到G1（默认是线框字符集）
        vc.do_write(b"\x0eq\x0f");
        assert_eq!(vc.cell(2, 0) & 0xff, 0xc4);
    }

    #[test]
    fn test_utf_switch_sequence() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b%@");
        assert!(!vc.utf);
        vc.do_write(b"\x1b%G");
        assert!(vc.utf);
    }

    #[test]
    fn test_osc_swallowed() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b]0;title\x07ok");
        assert_eq!(vc.row_text(0), "ok");
        vc.do_write(b"\x1b]2;x\x1b\\!");
        assert_eq!(vc.row_text(0), "ok!");
    }

    #[test]
    fn test_palette_sequence() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b]P1ff8000");
        assert_eq!(vc.palette[1].red, 0xff);
        assert_eq!(vc.palette[1].green, 0x80);
        assert_eq!(vc.palette[1].blue, 0);
        vc.do_write(b"\x1b]R");
        assert_eq!(vc.palette[1].red, 0xaa);
    }

    #[test]
    fn test_reset_terminal() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"text\x1b[2;3r\x1b[?7l\x1b[1m");
        vc.do_write(b"\x1bc");
        assert!(vc.autowrap);
        assert_eq!((vc.top, vc.bottom), (0, 24));
        assert_eq!(vc.state.intensity, VirtualConsoleIntensity::Normal);
        assert_eq!(vc.row_text(0), "");
    }

    #[test]
    fn test_setterm_requests() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"\x1b[9;5]\x1b[12;3]\x07");
        assert_eq!(
            vc.take_requests(),
            vec![
                ConsoleRequest::SetBlankInterval(5),
                ConsoleRequest::SetConsole(2),
                ConsoleRequest::Bell {
                    pitch: DEFAULT_BELL_PITCH,
                    duration: DEFAULT_BELL_DURATION
                },
            ]
        );
    }

    #[test]
    fn test_tab_stops() {
        let mut vc = new_vc(40, 2);
        vc.do_write(b"\t");
        assert_eq!(vc.state.x, 8);
        vc.do_write(b"\x1b[3g\r\t");
        assert_eq!(vc.state.x, 39);
        vc.do_write(b"\x1b[1;5H\x1bH\r\t");
        assert_eq!(vc.state.x, 4);
    }
}
