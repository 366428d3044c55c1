use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
};

use log::{debug, warn};
use system_error::SystemError;

use crate::{
    driver::{
        keyboard::kbd::{KbdStruct, VcKbdMode},
        tty::{console::ConsoleSwitch, tty_port::TtyPort, ConsoleFont, KDMode},
    },
    process::Pid,
};

use super::{
    console_map::{self, TranslationMapType, UserTranslation, UNI_REPLACEMENT},
    vt_config::VtConfig,
    Color, DrawRegion, VtModeData, COLOR_TABLE, VC_MAXCOL, VC_MAXROW,
};

/// 转义序列最多的参数个数
pub const NPAR: usize = 16;

pub const DEFAULT_BELL_PITCH: u32 = 750;
/// 毫秒
pub const DEFAULT_BELL_DURATION: u32 = 125;

/// 直接执行（而不是当作字形显示）的控制字符
const CTRL_ACTION: u32 = 0x0d00ff81;
/// disp_ctrl 打开时仍然执行的控制字符
const CTRL_ALWAYS: u32 = 0x0800f501;

/// 光标的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOperation {
    Draw,
    Erase,
    Move,
    /// 光标形状改变
    Change,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDir {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VirtualConsoleIntensity {
    /// 暗淡
    HalfBright,
    /// 正常
    #[default]
    Normal,
    /// 粗体
    Bold,
}

/// 转义序列解析器的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VirtualConsoleState {
    #[default]
    ESnormal,
    ESesc,
    ESsquare,
    ESgetpars,
    ESgotpars,
    ESfunckey,
    EShash,
    ESsetG0,
    ESsetG1,
    ESpercent,
    ESignore,
    ESnonstd,
    ESpalette,
    /// 不支持的OSC，吞掉直到BEL或ST
    ESosc,
}

/// CSI 之后的私有前缀
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Vt102Private {
    #[default]
    None,
    /// '?'
    Question,
    /// '>'
    Greater,
    /// '='
    Equal,
}

/// 光标位置以及ESC 7会保存的全部属性
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VirtualConsoleInfo {
    pub x: usize,
    pub y: usize,
    pub color: u8,
    pub intensity: VirtualConsoleIntensity,
    pub italic: bool,
    pub underline: bool,
    pub blink: bool,
    pub reverse: bool,
    /// false: G0, true: G1
    pub charset: bool,
    pub g0_charset: TranslationMapType,
    pub g1_charset: TranslationMapType,
}

/// 写入控制台时产生的、需要虚拟终端处理的请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleRequest {
    /// 响铃：频率(Hz)，时长(ms)
    Bell { pitch: u32, duration: u32 },
    /// 设置消隐时间（分钟）
    SetBlankInterval(u32),
    /// 设置vesa断电时间（分钟）
    SetVesaOffInterval(u32),
    /// 取消消隐并重置计时
    Poke,
    /// 把指定控制台切到前台
    SetConsole(usize),
}

/// 按列保存的制表位
#[derive(Debug, Clone, Default)]
pub struct TabStops {
    bits: Vec<u64>,
}

impl TabStops {
    /// 每8列一个制表位
    pub fn new(cols: usize) -> Self {
        let mut ret = Self {
            bits: vec![0; cols.div_ceil(64)],
        };
        for x in (8..cols).step_by(8) {
            ret.set(x);
        }
        ret
    }

    pub fn set(&mut self, x: usize) {
        if let Some(word) = self.bits.get_mut(x / 64) {
            *word |= 1 << (x % 64);
        }
    }

    pub fn clear(&mut self, x: usize) {
        if let Some(word) = self.bits.get_mut(x / 64) {
            *word &= !(1 << (x % 64));
        }
    }

    pub fn clear_all(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
    }

    pub fn is_set(&self, x: usize) -> bool {
        self.bits
            .get(x / 64)
            .map(|w| w & (1 << (x % 64)) != 0)
            .unwrap_or(false)
    }

    /// 列数变化时保留已有的制表位，新增的列按默认设置
    pub fn resize(&mut self, old_cols: usize, new_cols: usize) {
        self.bits.resize(new_cols.div_ceil(64), 0);
        for x in old_cols..new_cols {
            if x % 8 == 0 {
                self.set(x);
            }
        }
    }
}

/// 滚出屏幕顶部的历史行
#[derive(Debug, Default)]
pub struct ScrollbackBuffer {
    lines: VecDeque<Vec<u16>>,
    capacity: usize,
}

impl ScrollbackBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
        }
    }

    pub fn push_line(&mut self, line: &[u16]) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_vec());
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// 倒数第n行，n从1开始
    pub fn line_from_end(&self, n: usize) -> Option<&[u16]> {
        if n == 0 || n > self.lines.len() {
            return None;
        }
        self.lines.get(self.lines.len() - n).map(|l| l.as_slice())
    }
}

/// 一个虚拟控制台的全部状态
#[derive(Debug)]
pub struct VirtualConsoleData {
    /// 全局的控制台编号
    pub index: usize,
    pub state: VirtualConsoleInfo,
    pub saved_state: VirtualConsoleInfo,

    pub cols: usize,
    pub rows: usize,
    /// 屏幕内容，每个单元低8位是字形，高8位是属性
    pub screen_buf: Vec<u16>,

    /// 滚动区域 [top, bottom)
    pub top: usize,
    pub bottom: usize,

    pub def_color: u8,
    pub ulcolor: u8,
    pub itcolor: u8,
    pub halfcolor: u8,
    /// 当前用于写入的属性
    pub attr: u8,
    pub erase_char: u16,
    pub complement_mask: u16,
    pub s_complement_mask: u16,
    /// 512字形字体时表示第9位的属性位
    pub hi_font_mask: u16,
    pub color_mode: bool,

    pub vc_state: VirtualConsoleState,
    pub npar: usize,
    pub par: [u32; NPAR],
    /// 参数超过NPAR之后的数字被丢弃
    pub par_overflow: bool,
    pub private: Vt102Private,

    /// DECOM
    pub origin_mode: bool,
    /// DECAWM
    pub autowrap: bool,
    /// IRM
    pub insert_mode: bool,
    /// DECTCEM
    pub cursor_visible: bool,
    /// DECSCNM
    pub screen_mode: bool,
    pub need_wrap: bool,
    pub disp_ctrl: bool,
    pub toggle_meta: bool,
    pub report_mouse: u8,

    pub utf: bool,
    pub utf_count: u8,
    pub utf_char: u32,
    /// utf-8序列允许的最小码点，用于识别过长编码
    utf_min: u32,
    pub translate: TranslationMapType,
    pub user_map: UserTranslation,

    pub tab_stop: TabStops,
    pub palette: [Color; 16],
    pub default_palette: [Color; 16],
    pub cursor_type: u32,
    pub(super) cur_default: u32,
    global_cursor_default: i32,
    default_utf8: bool,
    pub bell_pitch: u32,
    pub bell_duration: u32,

    pub kbd: KbdStruct,
    pub port: TtyPort,
    pub vc_mode: KDMode,
    pub vt_mode: VtModeData,
    /// VT_SETMODE 的调用者
    pub vt_pid: Option<Pid>,
    /// 等待释放确认的切换目标，-1表示没有
    pub vt_newvt: i32,
    /// 已经向控制进程发送了acqsig，等待VT_ACKACQ
    pub acquire_pending: bool,

    pub font: ConsoleFont,
    pub scrollback: ScrollbackBuffer,
    pub requests: Vec<ConsoleRequest>,

    visible: bool,
    blanked: bool,
    driver_funcs: Option<Weak<dyn ConsoleSwitch>>,
}

impl VirtualConsoleData {
    pub fn new(index: usize, config: &VtConfig, user_map: UserTranslation) -> Self {
        let mut default_palette = [Color::default(); 16];
        for (i, c) in default_palette.iter_mut().enumerate() {
            c.red = config.default_red[i] as u16;
            c.green = config.default_green[i] as u16;
            c.blue = config.default_blue[i] as u16;
        }
        Self {
            index,
            state: VirtualConsoleInfo::default(),
            saved_state: VirtualConsoleInfo::default(),
            cols: config.cols,
            rows: config.rows,
            screen_buf: Vec::new(),
            top: 0,
            bottom: config.rows,
            def_color: config.default_color,
            ulcolor: config.underline_color,
            itcolor: config.italic_color,
            halfcolor: 0x08,
            attr: 0x07,
            erase_char: 0x0720,
            complement_mask: 0,
            s_complement_mask: 0,
            hi_font_mask: 0,
            color_mode: true,
            vc_state: VirtualConsoleState::ESnormal,
            npar: 0,
            par: [0; NPAR],
            par_overflow: false,
            private: Vt102Private::None,
            origin_mode: false,
            autowrap: true,
            insert_mode: false,
            cursor_visible: true,
            screen_mode: false,
            need_wrap: false,
            disp_ctrl: false,
            toggle_meta: false,
            report_mouse: 0,
            utf: config.default_utf8,
            utf_count: 0,
            utf_char: 0,
            utf_min: 0,
            translate: TranslationMapType::Lat1,
            user_map,
            tab_stop: TabStops::new(config.cols),
            palette: default_palette,
            default_palette,
            cursor_type: config.cur_default,
            cur_default: config.cur_default,
            global_cursor_default: config.global_cursor_default,
            default_utf8: config.default_utf8,
            bell_pitch: DEFAULT_BELL_PITCH,
            bell_duration: DEFAULT_BELL_DURATION,
            kbd: KbdStruct::default(),
            port: TtyPort::new(),
            vc_mode: KDMode::KdText,
            vt_mode: VtModeData::default(),
            vt_pid: None,
            vt_newvt: -1,
            acquire_pending: false,
            font: ConsoleFont::default(),
            scrollback: ScrollbackBuffer::new(config.scrollback_lines),
            requests: Vec::new(),
            visible: false,
            blanked: false,
            driver_funcs: None,
        }
    }

    /// ## 初始化控制台
    /// 后端的con_init之后调用，会按后端给出的尺寸分配缓冲区
    pub fn init(&mut self, rows: Option<usize>, cols: Option<usize>, clear: bool) {
        if let Some(rows) = rows {
            self.rows = rows;
        }
        if let Some(cols) = cols {
            self.cols = cols;
        }
        if self.complement_mask == 0 {
            self.complement_mask = if self.color_mode { 0x7700 } else { 0x0800 };
        }
        self.s_complement_mask = self.complement_mask;
        self.screen_buf = vec![self.erase_char; self.rows * self.cols];
        self.tab_stop = TabStops::new(self.cols);
        self.port.set_winsize(self.rows as u16, self.cols as u16);
        self.palette = self.default_palette;
        self.reset_terminal(clear);
    }

    pub fn driver_funcs(&self) -> Option<Arc<dyn ConsoleSwitch>> {
        self.driver_funcs.as_ref().and_then(|d| d.upgrade())
    }

    pub fn set_driver_funcs(&mut self, driver: Weak<dyn ConsoleSwitch>) {
        self.driver_funcs = Some(driver);
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    #[inline]
    pub fn is_blanked(&self) -> bool {
        self.blanked
    }

    pub fn set_blanked(&mut self, blanked: bool) {
        self.blanked = blanked;
    }

    /// 改动是否需要同步到显示后端
    #[inline]
    pub fn do_update(&self) -> bool {
        self.visible && !self.blanked && self.vc_mode.is_text()
    }

    /// 光标在缓冲区中的下标
    #[inline]
    pub fn pos(&self) -> usize {
        self.state.y * self.cols + self.state.x
    }

    /// ## 重置终端，对应RIS
    pub fn reset_terminal(&mut self, do_clear: bool) {
        self.top = 0;
        self.bottom = self.rows;
        self.vc_state = VirtualConsoleState::ESnormal;
        self.private = Vt102Private::None;
        self.translate = TranslationMapType::Lat1;
        self.state.g0_charset = TranslationMapType::Lat1;
        self.state.g1_charset = TranslationMapType::Graf;
        self.state.charset = false;
        self.need_wrap = false;
        self.report_mouse = 0;
        self.utf = self.default_utf8;
        self.utf_count = 0;

        self.disp_ctrl = false;
        self.toggle_meta = false;

        self.screen_mode = false;
        self.origin_mode = false;
        self.autowrap = true;
        self.cursor_visible = self.global_cursor_default != 0;
        self.insert_mode = false;

        self.kbd.set_mode(VcKbdMode::REPEAT);
        self.kbd.clear_mode(VcKbdMode::CKMODE);
        self.kbd.clear_mode(VcKbdMode::APPLIC);
        self.kbd.clear_mode(VcKbdMode::CRLF);
        self.kbd.reset_leds();

        self.cursor_type = self.cur_default;
        self.complement_mask = self.s_complement_mask;

        self.default_attr();
        self.update_attr();

        self.tab_stop = TabStops::new(self.cols);

        self.bell_pitch = DEFAULT_BELL_PITCH;
        self.bell_duration = DEFAULT_BELL_DURATION;

        self.gotoxy(0, 0);
        self.save_cursor();

        if do_clear {
            self.csi_j(2);
        }
    }

    pub fn default_attr(&mut self) {
        self.state.intensity = VirtualConsoleIntensity::Normal;
        self.state.italic = false;
        self.state.underline = false;
        self.state.reverse = false;
        self.state.blink = false;
        self.state.color = self.def_color;
    }

    /// ## 根据当前状态更新attr与erase_char
    pub fn update_attr(&mut self) {
        let state = self.state;
        self.attr = self.build_attr(
            state.color,
            state.intensity,
            state.blink,
            state.underline,
            state.reverse ^ self.screen_mode,
            state.italic,
        );
        let erase_attr = self.build_attr(
            state.color,
            VirtualConsoleIntensity::Normal,
            state.blink,
            false,
            self.screen_mode,
            false,
        );
        self.erase_char = ((erase_attr as u16) << 8) | b' ' as u16;
    }

    /// 后端不支持时用软件方式计算属性
    fn build_attr(
        &self,
        color: u8,
        intensity: VirtualConsoleIntensity,
        blink: bool,
        underline: bool,
        reverse: bool,
        italic: bool,
    ) -> u8 {
        if let Some(driver) = self.driver_funcs() {
            if let Ok(attr) =
                driver.con_build_attr(self, color, intensity, blink, underline, reverse, italic)
            {
                return attr;
            }
        }

        if !self.color_mode {
            let mut ret = match intensity {
                VirtualConsoleIntensity::HalfBright => 0,
                VirtualConsoleIntensity::Normal => 1,
                VirtualConsoleIntensity::Bold => 2,
            };
            if italic {
                ret |= 2;
            }
            if underline {
                ret |= 4;
            }
            if reverse {
                ret |= 8;
            }
            if blink {
                ret |= 0x80;
            }
            return ret;
        }

        let mut ret = color;
        if italic {
            ret = (ret & 0xf0) | self.itcolor;
        } else if underline {
            ret = (ret & 0xf0) | self.ulcolor;
        } else if intensity == VirtualConsoleIntensity::HalfBright {
            ret = (ret & 0xf0) | self.halfcolor;
        }

        if reverse {
            ret = (ret & 0x88) | (((ret >> 4) | (ret << 4)) & 0x77);
        }

        if blink {
            ret ^= 0x80;
        }

        if intensity == VirtualConsoleIntensity::Bold {
            ret ^= 0x08;
        }

        if self.hi_font_mask == 0x100 {
            ret <<= 1;
        }
        ret
    }

    /// ## 移动光标
    /// 目标越界时被限制在屏幕内，DECOM下被限制在滚动区域内
    pub fn gotoxy(&mut self, x: i32, y: i32) {
        self.state.x = x.clamp(0, self.cols as i32 - 1) as usize;

        let (min_y, max_y) = if self.origin_mode {
            (self.top as i32, self.bottom as i32)
        } else {
            (0, self.rows as i32)
        };
        self.state.y = y.clamp(min_y, max_y - 1) as usize;
        self.need_wrap = false;
    }

    /// y坐标相对于滚动区域（DECOM打开时）
    pub fn gotoxay(&mut self, x: i32, y: i32) {
        if self.origin_mode {
            self.gotoxy(x, self.top as i32 + y);
        } else {
            self.gotoxy(x, y);
        }
    }

    pub fn hide_cursor(&self) {
        if !self.do_update() {
            return;
        }
        if let Some(driver) = self.driver_funcs() {
            driver.con_cursor(self, CursorOperation::Erase);
        }
    }

    pub fn set_cursor(&self) {
        if !self.do_update() {
            return;
        }
        if self.cursor_visible {
            if let Some(driver) = self.driver_funcs() {
                driver.con_cursor(self, CursorOperation::Draw);
            }
        } else {
            self.hide_cursor();
        }
    }

    /// ## 向上滚动 [top, bottom) 区域nr行
    pub fn scroll_up(&mut self, top: usize, bottom: usize, nr: usize) {
        let mut nr = nr;
        if top + nr >= bottom {
            nr = bottom.saturating_sub(top + 1);
        }
        if bottom > self.rows || top >= bottom || nr < 1 {
            return;
        }

        let cols = self.cols;
        // 整屏上滚时，滚出去的行进入回滚缓冲
        if top == 0 && bottom == self.rows {
            for row in 0..nr {
                let line = &self.screen_buf[row * cols..(row + 1) * cols];
                self.scrollback.push_line(line);
            }
        }
        self.screen_buf
            .copy_within((top + nr) * cols..bottom * cols, top * cols);
        self.screen_buf[(bottom - nr) * cols..bottom * cols].fill(self.erase_char);

        self.scroll_display(top, bottom, ScrollDir::Up, nr);
    }

    /// ## 向下滚动 [top, bottom) 区域nr行
    pub fn scroll_down(&mut self, top: usize, bottom: usize, nr: usize) {
        let mut nr = nr;
        if top + nr >= bottom {
            nr = bottom.saturating_sub(top + 1);
        }
        if bottom > self.rows || top >= bottom || nr < 1 {
            return;
        }

        let cols = self.cols;
        self.screen_buf
            .copy_within(top * cols..(bottom - nr) * cols, (top + nr) * cols);
        self.screen_buf[top * cols..(top + nr) * cols].fill(self.erase_char);

        self.scroll_display(top, bottom, ScrollDir::Down, nr);
    }

    fn scroll_display(&self, top: usize, bottom: usize, dir: ScrollDir, nr: usize) {
        if !self.do_update() {
            return;
        }
        let driver = match self.driver_funcs() {
            Some(d) => d,
            None => return,
        };
        if !driver.con_scroll(self, top, bottom, dir, nr) {
            self.do_update_region(top * self.cols, (bottom - top) * self.cols);
        }
    }

    /// 换行
    pub fn line_feed(&mut self) {
        if self.state.y + 1 == self.bottom {
            self.scroll_up(self.top, self.bottom, 1);
        } else if self.state.y < self.rows - 1 {
            self.state.y += 1;
        }
        self.need_wrap = false;
    }

    /// 反向换行
    pub fn reverse_line_feed(&mut self) {
        if self.state.y == self.top {
            self.scroll_down(self.top, self.bottom, 1);
        } else if self.state.y > 0 {
            self.state.y -= 1;
        }
        self.need_wrap = false;
    }

    /// 回车
    pub fn carriage_return(&mut self) {
        self.state.x = 0;
        self.need_wrap = false;
    }

    /// 退格
    pub fn backspace(&mut self) {
        if self.state.x > 0 {
            self.state.x -= 1;
            self.need_wrap = false;
        }
    }

    /// 水平制表，移动到下一个制表位或者最后一列
    pub fn horizontal_tab(&mut self) {
        while self.state.x < self.cols - 1 {
            self.state.x += 1;
            if self.tab_stop.is_set(self.state.x) {
                break;
            }
        }
    }

    /// ## 擦除 [start, start+count) 并同步到后端
    fn erase_region(&mut self, start: usize, count: usize) {
        if count == 0 {
            return;
        }
        self.screen_buf[start..start + count].fill(self.erase_char);
        if !self.do_update() {
            return;
        }
        let driver = match self.driver_funcs() {
            Some(d) => d,
            None => return,
        };
        let cols = self.cols;
        let end = start + count;
        let mut offset = start;
        while offset < end {
            let sy = offset / cols;
            let sx = offset % cols;
            if sx == 0 && end - offset >= cols {
                // 整行的部分一次清除
                let height = (end - offset) / cols;
                let _ = driver.con_clear(self, sy, 0, height, cols);
                offset += height * cols;
            } else {
                let width = (cols - sx).min(end - offset);
                let _ = driver.con_clear(self, sy, sx, 1, width);
                offset += width;
            }
        }
    }

    /// ## ED: 擦除显示
    pub fn csi_j(&mut self, vpar: u32) {
        let pos = self.pos();
        let total = self.cols * self.rows;
        let (start, count) = match vpar {
            // 从光标到屏幕结尾
            0 => (pos, total - pos),
            // 从屏幕开头到光标
            1 => (0, pos + 1),
            // 整个屏幕
            2 => (0, total),
            // 整个屏幕以及回滚缓冲
            3 => {
                self.scrollback.clear();
                (0, total)
            }
            _ => return,
        };
        self.erase_region(start, count);
        self.need_wrap = false;
    }

    /// ## EL: 擦除行
    pub fn csi_k(&mut self, vpar: u32) {
        let pos = self.pos();
        let x = self.state.x;
        let (start, count) = match vpar {
            0 => (pos, self.cols - x),
            1 => (pos - x, x + 1),
            2 => (pos - x, self.cols),
            _ => return,
        };
        self.erase_region(start, count);
        self.need_wrap = false;
    }

    /// ## ECH: 擦除光标开始的若干字符
    pub fn csi_x(&mut self, vpar: u32) {
        let vpar = vpar.max(1) as usize;
        let count = vpar.min(self.cols - self.state.x);
        self.erase_region(self.pos(), count);
        self.need_wrap = false;
    }

    /// ## ICH: 插入空白字符
    pub fn insert_char(&mut self, nr: usize) {
        let pos = self.pos();
        let line_end = self.state.y * self.cols + self.cols;
        let nr = nr.min(line_end - pos);
        self.screen_buf.copy_within(pos..line_end - nr, pos + nr);
        self.screen_buf[pos..pos + nr].fill(self.erase_char);
        self.need_wrap = false;
        if self.do_update() {
            self.do_update_region(pos, line_end - pos);
        }
    }

    /// ## DCH: 删除字符
    pub fn delete_char(&mut self, nr: usize) {
        let pos = self.pos();
        let line_end = self.state.y * self.cols + self.cols;
        let nr = nr.min(line_end - pos);
        self.screen_buf.copy_within(pos + nr..line_end, pos);
        self.screen_buf[line_end - nr..line_end].fill(self.erase_char);
        self.need_wrap = false;
        if self.do_update() {
            self.do_update_region(pos, line_end - pos);
        }
    }

    pub fn csi_at(&mut self, nr: u32) {
        let room = self.cols - self.state.x;
        let nr = if nr as usize > room {
            room
        } else {
            nr.max(1) as usize
        };
        self.insert_char(nr);
    }

    pub fn csi_p(&mut self, nr: u32) {
        let room = self.cols - self.state.x;
        let nr = if nr as usize > room {
            room
        } else {
            nr.max(1) as usize
        };
        self.delete_char(nr);
    }

    /// ## IL: 插入行
    pub fn csi_l(&mut self, nr: u32) {
        let room = self.rows - self.state.y;
        let nr = if nr as usize > room {
            room
        } else {
            nr.max(1) as usize
        };
        self.scroll_down(self.state.y, self.bottom, nr);
        self.need_wrap = false;
    }

    /// ## DL: 删除行
    pub fn csi_m_delete_line(&mut self, nr: u32) {
        let room = self.rows - self.state.y;
        let nr = if nr as usize > room {
            room
        } else {
            nr.max(1) as usize
        };
        self.scroll_up(self.state.y, self.bottom, nr);
        self.need_wrap = false;
    }

    pub fn save_cursor(&mut self) {
        self.saved_state = self.state;
    }

    pub fn restore_cursor(&mut self) {
        let saved = self.saved_state;
        self.state = saved;
        self.gotoxy(saved.x as i32, saved.y as i32);
        self.translate = if saved.charset {
            saved.g1_charset
        } else {
            saved.g0_charset
        };
        self.update_attr();
        self.need_wrap = false;
    }

    /// ## 把一段缓冲区内容重新画到后端
    pub fn do_update_region(&self, start: usize, count: usize) {
        if !self.do_update() {
            return;
        }
        let driver = match self.driver_funcs() {
            Some(d) => d,
            None => return,
        };
        let end = (start + count).min(self.screen_buf.len());
        let mut offset = start;
        while offset < end {
            let y = offset / self.cols;
            let x = offset % self.cols;
            let len = (self.cols - x).min(end - offset);
            let _ = driver.con_putcs(
                self,
                &self.screen_buf[offset..offset + len],
                len,
                y as u32,
                x as u32,
            );
            offset += len;
        }
    }

    /// ## 重绘整个屏幕
    pub fn update_screen(&self) {
        self.do_update_region(0, self.cols * self.rows);
        self.set_cursor();
    }

    /// ## 显示回滚历史
    /// offset为向上回滚的行数，0表示显示当前屏幕
    pub fn redraw_view(&self, offset: usize) {
        if !self.do_update() {
            return;
        }
        let driver = match self.driver_funcs() {
            Some(d) => d,
            None => return,
        };
        let offset = offset.min(self.scrollback.len());
        for row in 0..self.rows {
            let line: &[u16] = if row < offset {
                match self.scrollback.line_from_end(offset - row) {
                    Some(l) => l,
                    None => continue,
                }
            } else {
                let y = row - offset;
                &self.screen_buf[y * self.cols..(y + 1) * self.cols]
            };
            let len = line.len().min(self.cols);
            let _ = driver.con_putcs(self, &line[..len], len, row as u32, 0);
        }
        if offset == 0 {
            self.set_cursor();
        } else {
            driver.con_cursor(self, CursorOperation::Erase);
        }
    }

    /// ## 反色一段区域
    pub fn invert_screen(&mut self, offset: usize, count: usize) {
        let end = (offset + count).min(self.screen_buf.len());
        let color_mode = self.color_mode;
        for cell in &mut self.screen_buf[offset..end] {
            let a = *cell;
            *cell = if color_mode {
                (a & 0x88ff) | ((a & 0x7000) >> 4) | ((a & 0x0700) << 4)
            } else if (a & 0x0700) == 0x0100 {
                a ^ 0x7000
            } else {
                a ^ 0x7700
            };
        }
        if !self.do_update() {
            return;
        }
        if let Some(driver) = self.driver_funcs() {
            if driver
                .con_invert_region(self, offset, end - offset)
                .is_err()
            {
                self.do_update_region(offset, end - offset);
            }
        }
    }

    /// ## 调色板恢复为默认值
    pub fn reset_palette(&mut self) {
        self.palette = self.default_palette;
        self.set_palette();
    }

    /// 调色板同步到后端
    pub fn set_palette(&self) {
        if !self.do_update() {
            return;
        }
        if let Some(driver) = self.driver_funcs() {
            let _ = driver.con_set_palette(self, COLOR_TABLE);
        }
    }

    /// 把应答写入自己的输入队列（DA、DSR等）
    pub fn respond_string(&mut self, s: &[u8]) {
        self.port.receive_buf(s);
    }

    /// ## 检查能否调整为新尺寸
    pub fn resize_check(&self, cols: usize, rows: usize) -> Result<(), SystemError> {
        if cols == 0 || rows == 0 || cols > VC_MAXCOL || rows > VC_MAXROW {
            return Err(SystemError::EINVAL);
        }
        if cols == self.cols && rows == self.rows {
            return Ok(());
        }
        if let Some(driver) = self.driver_funcs() {
            driver.con_resize(self, cols, rows)?;
        }
        Ok(())
    }

    /// ## 调整尺寸
    /// 调用前需要先通过resize_check。保留光标所在行及其上方的内容
    pub fn resize_apply(&mut self, cols: usize, rows: usize) {
        if cols == self.cols && rows == self.rows {
            return;
        }
        let old_cols = self.cols;
        let old_rows = self.rows;
        let shift = if self.state.y >= rows {
            self.state.y + 1 - rows
        } else {
            0
        };

        let mut new_buf = vec![self.erase_char; cols * rows];
        let copy_rows = (old_rows - shift).min(rows);
        let copy_cols = old_cols.min(cols);
        for row in 0..copy_rows {
            let src = (row + shift) * old_cols;
            new_buf[row * cols..row * cols + copy_cols]
                .copy_from_slice(&self.screen_buf[src..src + copy_cols]);
        }

        self.screen_buf = new_buf;
        self.cols = cols;
        self.rows = rows;
        self.top = 0;
        self.bottom = rows;
        self.tab_stop.resize(old_cols, cols);

        let x = self.state.x as i32;
        let y = self.state.y as i32 - shift as i32;
        self.gotoxy(x, y);
        self.saved_state.x = self.saved_state.x.min(cols - 1);
        self.saved_state.y = self.saved_state.y.min(rows - 1);
        self.port.set_winsize(rows as u16, cols as u16);

        debug!(
            "vc {}: resized {}x{} -> {}x{}",
            self.index, old_cols, old_rows, cols, rows
        );
        if self.do_update() {
            self.update_screen();
        }
    }

    pub fn vc_resize(&mut self, cols: usize, rows: usize) -> Result<(), SystemError> {
        self.resize_check(cols, rows)?;
        self.resize_apply(cols, rows);
        Ok(())
    }

    /// ## 把输入的字节翻译为unicode
    /// 返回 (Some((tc, c)), rescan)：tc是用于显示的unicode，c是用于判断控制字符的值。
    /// rescan为true时当前字节需要再处理一次
    pub fn translate(&mut self, ch: u32) -> (Option<(u32, u32)>, bool) {
        // 转义序列按原始字节处理
        if self.vc_state != VirtualConsoleState::ESnormal {
            return (Some((ch, ch)), false);
        }

        if self.utf && !self.disp_ctrl {
            return self.translate_utf8(ch);
        }

        let c = if self.toggle_meta { ch | 0x80 } else { ch };
        let tc = self.translate.translate(&self.user_map, c as u8);
        (Some((tc, ch)), false)
    }

    fn translate_utf8(&mut self, ch: u32) -> (Option<(u32, u32)>, bool) {
        if ch < 0x80 {
            if self.utf_count > 0 {
                // 多字节序列被打断
                self.utf_count = 0;
                return (Some((UNI_REPLACEMENT, UNI_REPLACEMENT)), true);
            }
            return (Some((ch, ch)), false);
        }

        if ch & 0xc0 == 0x80 {
            if self.utf_count == 0 {
                return (Some((UNI_REPLACEMENT, UNI_REPLACEMENT)), false);
            }
            self.utf_char = (self.utf_char << 6) | (ch & 0x3f);
            self.utf_count -= 1;
            if self.utf_count > 0 {
                return (None, false);
            }
            let c = self.utf_char;
            // 过长编码、代理区以及超出范围的码点都是非法的
            if c < self.utf_min || (0xd800..=0xdfff).contains(&c) || c > 0x10ffff {
                return (Some((UNI_REPLACEMENT, UNI_REPLACEMENT)), false);
            }
            return (Some((c, c)), false);
        }

        let rescan = self.utf_count > 0;
        if rescan {
            self.utf_count = 0;
            return (Some((UNI_REPLACEMENT, UNI_REPLACEMENT)), true);
        }

        let (count, init, min) = match ch {
            0xc2..=0xdf => (1, ch & 0x1f, 0x80),
            0xe0..=0xef => (2, ch & 0x0f, 0x800),
            0xf0..=0xf4 => (3, ch & 0x07, 0x10000),
            _ => return (Some((UNI_REPLACEMENT, UNI_REPLACEMENT)), false),
        };
        self.utf_count = count;
        self.utf_char = init;
        self.utf_min = min;
        (None, false)
    }

    /// ## 判断是否按控制字符处理
    pub fn is_control(&self, tc: u32, c: u32) -> bool {
        if self.vc_state != VirtualConsoleState::ESnormal {
            return true;
        }

        if tc == 0 {
            return true;
        }

        let ctrl_mask = if self.disp_ctrl {
            c < 32 && (CTRL_ALWAYS >> c) & 1 != 0
        } else {
            c < 32 && (self.utf || (CTRL_ACTION >> c) & 1 != 0)
        };
        if c < 32 && ctrl_mask {
            return true;
        }

        if c == 127 && !self.disp_ctrl {
            return true;
        }

        if c == 128 + 27 {
            return true;
        }

        false
    }

    /// ## 写入一个可显示的字符
    pub fn console_write_normal(&mut self, tc: u32, draw: &mut DrawRegion) {
        let glyph = match console_map::conv_uni_to_pc(tc) {
            Some(g) => g,
            None => console_map::conv_uni_to_pc(UNI_REPLACEMENT).unwrap_or(b'?' as u16),
        };

        if self.need_wrap || self.insert_mode {
            self.flush(draw);
        }

        if self.need_wrap {
            self.carriage_return();
            self.line_feed();
        }

        if self.insert_mode {
            self.insert_char(1);
        }

        let himask = self.hi_font_mask;
        let cell = if himask != 0 {
            (((self.attr as u16) << 8) & !himask)
                + if glyph & 0x100 != 0 { himask } else { 0 }
                + (glyph & 0xff)
        } else {
            ((self.attr as u16) << 8) | (glyph & 0xff)
        };

        let pos = self.pos();
        self.screen_buf[pos] = cell;

        if self.do_update() && draw.x.is_none() {
            draw.x = Some(self.state.x as u32);
            draw.offset = pos;
        }

        if self.state.x == self.cols - 1 {
            self.need_wrap = self.autowrap;
        } else {
            self.state.x += 1;
        }
        if draw.x.is_some() {
            draw.size = pos + 1 - draw.offset;
        }
    }

    /// ## 把累积的区域交给后端绘制
    pub fn flush(&self, draw: &mut DrawRegion) {
        let x = match draw.x.take() {
            Some(x) => x,
            None => return,
        };
        if draw.size == 0 || !self.do_update() {
            return;
        }
        if let Some(driver) = self.driver_funcs() {
            let end = (draw.offset + draw.size).min(self.screen_buf.len());
            let _ = driver.con_putcs(
                self,
                &self.screen_buf[draw.offset..end],
                end - draw.offset,
                (draw.offset / self.cols) as u32,
                x,
            );
        }
        draw.size = 0;
    }

    /// ## 向控制台写入数据
    /// 返回消耗的字节数
    pub fn do_write(&mut self, buf: &[u8]) -> usize {
        let mut draw = DrawRegion::default();

        // 首先隐藏光标再写
        self.hide_cursor();

        let mut offset = 0;
        let mut rescan = false;
        let mut ch: u32 = 0;

        while offset < buf.len() || rescan {
            if !rescan {
                ch = buf[offset] as u32;
                offset += 1;
            }

            let (translated, rescan_last) = self.translate(ch);
            rescan = rescan_last;
            let (tc, c) = match translated {
                Some(v) => v,
                // 表示未转换完成
                None => continue,
            };

            if self.is_control(tc, c) {
                self.flush(&mut draw);
                self.do_control(c);
                continue;
            }

            self.console_write_normal(tc, &mut draw);
        }

        self.flush(&mut draw);
        self.set_cursor();
        buf.len()
    }

    /// 第y行的文本，字形按cp437转换
    pub fn row_text(&self, y: usize) -> String {
        let line = &self.screen_buf[y * self.cols..(y + 1) * self.cols];
        let s: String = line
            .iter()
            .map(|cell| console_map::glyph_to_char(cell & 0xff))
            .collect();
        s.trim_end().to_string()
    }

    /// (x, y) 处的单元
    pub fn cell(&self, x: usize, y: usize) -> u16 {
        self.screen_buf[y * self.cols + x]
    }

    /// 取走写入过程中产生的请求
    pub fn take_requests(&mut self) -> Vec<ConsoleRequest> {
        core::mem::take(&mut self.requests)
    }

    /// 设置字体之后的尺寸调整
    pub fn set_font_info(&mut self, font: &ConsoleFont) {
        self.font = ConsoleFont {
            width: font.width,
            height: font.height,
            count: font.count,
            data: Vec::new(),
        };
        self.hi_font_mask = if font.count > 256 { 0x800 } else { 0 };
        if font.count > 256 {
            warn!("vc {}: 512 glyph font, bright colors are disabled", self.index);
        }
        self.update_attr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::tty::virtual_terminal::console_map::new_user_translation;

    fn new_vc(cols: usize, rows: usize) -> VirtualConsoleData {
        let config = VtConfig {
            cols,
            rows,
            ..VtConfig::default()
        };
        let mut vc = VirtualConsoleData::new(0, &config, new_user_translation());
        vc.init(None, None, true);
        vc
    }

    #[test]
    fn test_init_state() {
        let vc = new_vc(80, 24);
        assert_eq!(vc.screen_buf.len(), 80 * 24);
        assert_eq!((vc.state.x, vc.state.y), (0, 0));
        assert_eq!((vc.top, vc.bottom), (0, 24));
        assert!(vc.autowrap);
        assert_eq!(vc.erase_char, 0x0720);
        assert!(vc.tab_stop.is_set(8));
        assert!(!vc.tab_stop.is_set(7));
    }

    #[test]
    fn test_gotoxy_clamps() {
        let mut vc = new_vc(80, 24);
        vc.gotoxy(200, 200);
        assert_eq!((vc.state.x, vc.state.y), (79, 23));
        vc.gotoxy(-5, -5);
        assert_eq!((vc.state.x, vc.state.y), (0, 0));
    }

    #[test]
    fn test_gotoxy_origin_mode() {
        let mut vc = new_vc(80, 24);
        vc.top = 5;
        vc.bottom = 10;
        vc.origin_mode = true;
        vc.gotoxay(0, 0);
        assert_eq!(vc.state.y, 5);
        vc.gotoxay(0, 100);
        assert_eq!(vc.state.y, 9);
    }

    #[test]
    fn test_write_plain_text() {
        let mut vc = new_vc(80, 24);
        vc.do_write(b"hello");
        assert_eq!(vc.row_text(0), "hello");
        assert_eq!(vc.state.x, 5);
        assert_eq!(vc.cell(0, 0) >> 8, vc.attr as u16);
    }

    #[test]
    fn test_autowrap_deferred() {
        let mut vc = new_vc(10, 5);
        vc.do_write(b"0123456789");
        // 写满一行后光标停在最后一列，等待下一个字符才换行
        assert_eq!((vc.state.x, vc.state.y), (9, 0));
        assert!(vc.need_wrap);
        vc.do_write(b"X");
        assert_eq!(vc.row_text(0), "0123456789");
        assert_eq!(vc.row_text(1), "X");
        assert_eq!((vc.state.x, vc.state.y), (1, 1));
    }

    #[test]
    fn test_autowrap_disabled_overwrites_last_column() {
        let mut vc = new_vc(10, 5);
        vc.autowrap = false;
        vc.do_write(b"0123456789AB");
        assert_eq!(vc.row_text(0), "012345678B");
        assert_eq!(vc.state.y, 0);
    }

    #[test]
    fn test_scroll_at_bottom_fills_scrollback() {
        let mut vc = new_vc(10, 3);
        vc.do_write(b"a\r\nb\r\nc\r\nd");
        assert_eq!(vc.row_text(0), "b");
        assert_eq!(vc.row_text(2), "d");
        assert_eq!(vc.scrollback.len(), 1);
        let line = vc.scrollback.line_from_end(1).unwrap();
        assert_eq!(console_map::glyph_to_char(line[0] & 0xff), 'a');
    }

    #[test]
    fn test_utf8_decoding() {
        let mut vc = new_vc(20, 3);
        vc.utf = true;
        vc.do_write("é".as_bytes());
        assert_eq!(vc.cell(0, 0) & 0xff, 0x82);
        // 被打断的序列显示为'?'，随后的ascii照常显示
        vc.do_write(&[0xc3, b'a']);
        assert_eq!(vc.cell(1, 0) & 0xff, b'?' as u16);
        assert_eq!(vc.cell(2, 0) & 0xff, b'a' as u16);
        // 过长编码
        vc.do_write(&[0xe0, 0x80, 0xaf]);
        assert_eq!(vc.cell(3, 0) & 0xff, b'?' as u16);
    }

    #[test]
    fn test_latin1_mode() {
        let mut vc = new_vc(20, 3);
        vc.utf = false;
        vc.do_write(&[0xe9]);
        assert_eq!(vc.cell(0, 0) & 0xff, 0x82);
    }

    #[test]
    fn test_insert_and_delete_char() {
        let mut vc = new_vc(10, 2);
        vc.do_write(b"abcdef");
        vc.gotoxy(1, 0);
        vc.insert_char(2);
        assert_eq!(vc.row_text(0), "a  bcdef");
        vc.delete_char(3);
        assert_eq!(vc.row_text(0), "acdef");
    }

    #[test]
    fn test_resize_keeps_cursor_line() {
        let mut vc = new_vc(10, 5);
        vc.do_write(b"1\r\n2\r\n3\r\n4\r\n5");
        vc.vc_resize(5, 2).unwrap();
        assert_eq!((vc.cols, vc.rows), (5, 2));
        assert_eq!(vc.row_text(0), "4");
        assert_eq!(vc.row_text(1), "5");
        assert_eq!(vc.state.y, 1);
        assert_eq!(vc.port.winsize(), (2, 5));
        assert_eq!(vc.vc_resize(0, 2), Err(SystemError::EINVAL));
    }

    #[test]
    fn test_invert_screen_twice_restores() {
        let mut vc = new_vc(10, 2);
        vc.do_write(b"abc");
        let before = vc.screen_buf.clone();
        vc.invert_screen(0, 20);
        assert_ne!(vc.screen_buf, before);
        vc.invert_screen(0, 20);
        assert_eq!(vc.screen_buf, before);
    }
}
