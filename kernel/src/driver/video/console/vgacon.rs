//! 以内存模拟的VGA文本模式显示设备
//!
//! 每个字符单元是 (属性 << 8) | 字形，与终端核心的屏幕缓冲区格式一致。
//! 整屏上下滚动通过移动显示起点完成，不需要搬动内存。

use log::debug;
use system_error::SystemError;

use crate::{
    driver::tty::{
        console::{BlankMode, ConsoleSwitch},
        virtual_terminal::{
            console_map,
            virtual_console::{
                CursorOperation, ScrollDir, VirtualConsoleData, VirtualConsoleIntensity,
            },
            Color,
        },
        ConsoleFont,
    },
    libs::spinlock::SpinLock,
};

/// 显示设备支持的最大尺寸
pub const VGA_MAX_COLS: usize = 132;
pub const VGA_MAX_ROWS: usize = 50;

const VGA_FONT_WIDTH: u32 = 8;
const VGA_DEFAULT_FONT_HEIGHT: u32 = 16;
const VGA_DEFAULT_FONT_COUNT: u32 = 256;

fn vga_default_font() -> ConsoleFont {
    let mut font = ConsoleFont {
        width: VGA_FONT_WIDTH,
        height: VGA_DEFAULT_FONT_HEIGHT,
        count: VGA_DEFAULT_FONT_COUNT,
        data: Vec::new(),
    };
    font.data = vec![0; font.expected_len()];
    font
}

#[derive(Debug)]
struct VgaState {
    cols: usize,
    rows: usize,
    cells: Vec<u16>,
    /// 显示起点所在的行，整屏滚动时移动
    origin: usize,
    cursor: Option<(usize, usize)>,
    cursor_type: u32,
    /// DAC调色板，按硬件寄存器的顺序
    dac: [Color; 16],
    font: ConsoleFont,
    blanked: bool,
    powerdown: bool,
    hw_scrolls: usize,
}

impl VgaState {
    /// 第y行在cells中的起始下标
    #[inline]
    fn line(&self, y: usize) -> usize {
        ((self.origin + y) % self.rows) * self.cols
    }

    /// 控制台尺寸变化之后显示设备跟着调整
    fn fit(&mut self, vc_data: &VirtualConsoleData) {
        if vc_data.cols == self.cols && vc_data.rows == self.rows {
            return;
        }
        debug!(
            "vgacon: mode {}x{} -> {}x{}",
            self.cols, self.rows, vc_data.cols, vc_data.rows
        );
        self.cols = vc_data.cols;
        self.rows = vc_data.rows;
        self.cells = vec![vc_data.erase_char; self.cols * self.rows];
        self.origin = 0;
        self.cursor = None;
    }

    fn fill(&mut self, y: usize, x: usize, width: usize, ch: u16) {
        let start = self.line(y) + x;
        self.cells[start..start + width].fill(ch);
    }
}

/// 内存中的VGA文本显示
#[derive(Debug)]
pub struct VgaConsole {
    state: SpinLock<VgaState>,
}

impl VgaConsole {
    pub fn new(cols: usize, rows: usize) -> Self {
        let cols = cols.clamp(1, VGA_MAX_COLS);
        let rows = rows.clamp(1, VGA_MAX_ROWS);
        Self {
            state: SpinLock::new(VgaState {
                cols,
                rows,
                cells: vec![0x0720; cols * rows],
                origin: 0,
                cursor: None,
                cursor_type: 0,
                dac: [Color::default(); 16],
                font: vga_default_font(),
                blanked: false,
                powerdown: false,
                hw_scrolls: 0,
            }),
        }
    }

    /// 第y行显示的文本，去掉行尾空白
    pub fn row_text(&self, y: usize) -> String {
        let state = self.state.lock();
        if y >= state.rows {
            return String::new();
        }
        let start = state.line(y);
        let s: String = state.cells[start..start + state.cols]
            .iter()
            .map(|cell| console_map::glyph_to_char(cell & 0xff))
            .collect();
        s.trim_end().to_string()
    }

    pub fn cell(&self, x: usize, y: usize) -> u16 {
        let state = self.state.lock();
        state.cells[state.line(y) + x]
    }

    pub fn is_blanked(&self) -> bool {
        self.state.lock().blanked
    }

    pub fn is_powered_down(&self) -> bool {
        self.state.lock().powerdown
    }

    pub fn cursor(&self) -> Option<(usize, usize)> {
        self.state.lock().cursor
    }

    /// (cols, rows)
    pub fn size(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.cols, state.rows)
    }

    pub fn dac(&self) -> [Color; 16] {
        self.state.lock().dac
    }

    pub fn font(&self) -> ConsoleFont {
        self.state.lock().font.clone()
    }

    /// 通过移动显示起点完成的滚动次数
    pub fn hw_scrolls(&self) -> usize {
        self.state.lock().hw_scrolls
    }
}

impl ConsoleSwitch for VgaConsole {
    fn con_startup(&self) -> Result<&'static str, SystemError> {
        Ok("VGA+")
    }

    fn con_init(&self, vc_data: &mut VirtualConsoleData, _init: bool) -> Result<(), SystemError> {
        let state = self.state.lock();
        vc_data.color_mode = true;
        vc_data.cols = state.cols;
        vc_data.rows = state.rows;
        let font = state.font.clone();
        drop(state);
        vc_data.set_font_info(&font);
        Ok(())
    }

    fn con_build_attr(
        &self,
        vc_data: &VirtualConsoleData,
        color: u8,
        intensity: VirtualConsoleIntensity,
        blink: bool,
        underline: bool,
        reverse: bool,
        italic: bool,
    ) -> Result<u8, SystemError> {
        let mut attr = color;
        if italic {
            attr = (attr & 0xf0) | vc_data.itcolor;
        } else if underline {
            attr = (attr & 0xf0) | vc_data.ulcolor;
        } else if intensity == VirtualConsoleIntensity::HalfBright {
            attr = (attr & 0xf0) | vc_data.halfcolor;
        }
        if reverse {
            attr = (attr & 0x88) | (((attr >> 4) | (attr << 4)) & 0x77);
        }
        if blink {
            attr ^= 0x80;
        }
        if intensity == VirtualConsoleIntensity::Bold {
            attr ^= 0x08;
        }
        Ok(attr)
    }

    fn con_clear(
        &self,
        vc_data: &VirtualConsoleData,
        sy: usize,
        sx: usize,
        height: usize,
        width: usize,
    ) -> Result<(), SystemError> {
        let mut state = self.state.lock();
        state.fit(vc_data);
        if sy >= state.rows || sx >= state.cols {
            return Ok(());
        }
        let height = height.min(state.rows - sy);
        let width = width.min(state.cols - sx);
        for y in sy..sy + height {
            state.fill(y, sx, width, vc_data.erase_char);
        }
        Ok(())
    }

    fn con_putc(
        &self,
        vc_data: &VirtualConsoleData,
        ch: u16,
        ypos: u32,
        xpos: u32,
    ) -> Result<(), SystemError> {
        self.con_putcs(vc_data, &[ch], 1, ypos, xpos)
    }

    fn con_putcs(
        &self,
        vc_data: &VirtualConsoleData,
        buf: &[u16],
        count: usize,
        ypos: u32,
        xpos: u32,
    ) -> Result<(), SystemError> {
        let mut state = self.state.lock();
        state.fit(vc_data);
        let (y, x) = (ypos as usize, xpos as usize);
        if y >= state.rows || x >= state.cols {
            return Err(SystemError::EINVAL);
        }
        let len = count.min(buf.len()).min(state.cols - x);
        let start = state.line(y) + x;
        state.cells[start..start + len].copy_from_slice(&buf[..len]);
        Ok(())
    }

    fn con_cursor(&self, vc_data: &VirtualConsoleData, op: CursorOperation) {
        let mut state = self.state.lock();
        match op {
            CursorOperation::Erase => state.cursor = None,
            CursorOperation::Draw | CursorOperation::Move => {
                state.cursor = Some((vc_data.state.x, vc_data.state.y));
            }
            CursorOperation::Change => state.cursor_type = vc_data.cursor_type,
        }
    }

    fn con_set_palette(
        &self,
        vc_data: &VirtualConsoleData,
        color_table: &[u8],
    ) -> Result<(), SystemError> {
        if color_table.len() < 16 {
            return Err(SystemError::EINVAL);
        }
        let mut state = self.state.lock();
        for (i, reg) in color_table.iter().take(16).enumerate() {
            state.dac[(*reg & 0x0f) as usize] = vc_data.palette[i];
        }
        Ok(())
    }

    fn con_scroll(
        &self,
        vc_data: &VirtualConsoleData,
        top: usize,
        bottom: usize,
        dir: ScrollDir,
        nr: usize,
    ) -> bool {
        let mut state = self.state.lock();
        state.fit(vc_data);
        // 只有整屏滚动可以移动显示起点
        if top != 0 || bottom != state.rows || nr == 0 || nr >= state.rows {
            return false;
        }
        let rows = state.rows;
        let cols = state.cols;
        match dir {
            ScrollDir::Up => {
                state.origin = (state.origin + nr) % rows;
                for y in rows - nr..rows {
                    state.fill(y, 0, cols, vc_data.erase_char);
                }
            }
            ScrollDir::Down => {
                state.origin = (state.origin + rows - nr) % rows;
                for y in 0..nr {
                    state.fill(y, 0, cols, vc_data.erase_char);
                }
            }
        }
        state.hw_scrolls += 1;
        true
    }

    fn con_switch(&self, vc_data: &VirtualConsoleData) -> bool {
        let mut state = self.state.lock();
        state.fit(vc_data);
        state.cursor_type = vc_data.cursor_type;
        // 显存中是上一个控制台的内容，需要整屏重绘
        true
    }

    fn con_blank(&self, _vc_data: &VirtualConsoleData, blank: BlankMode, mode_switch: bool) -> bool {
        let mut state = self.state.lock();
        match blank {
            BlankMode::Unblank => {
                state.blanked = false;
                state.powerdown = false;
            }
            BlankMode::Normal => state.blanked = true,
            BlankMode::VsyncSuspend | BlankMode::HsyncSuspend | BlankMode::Powerdown => {
                state.blanked = true;
                state.powerdown = true;
            }
        }
        debug!("vgacon: blank {:?} (mode switch: {})", blank, mode_switch);
        true
    }

    fn con_font_set(
        &self,
        _vc_data: &VirtualConsoleData,
        font: &ConsoleFont,
        _flags: u32,
    ) -> Result<(), SystemError> {
        if font.width != VGA_FONT_WIDTH || (font.count != 256 && font.count != 512) {
            return Err(SystemError::EINVAL);
        }
        self.state.lock().font = font.clone();
        Ok(())
    }

    fn con_font_get(&self, _vc_data: &VirtualConsoleData) -> Result<ConsoleFont, SystemError> {
        Ok(self.state.lock().font.clone())
    }

    fn con_font_default(
        &self,
        _vc_data: &VirtualConsoleData,
        _name: Option<&str>,
    ) -> Result<ConsoleFont, SystemError> {
        let font = vga_default_font();
        self.state.lock().font = font.clone();
        Ok(ConsoleFont {
            data: Vec::new(),
            ..font
        })
    }

    fn con_resize(
        &self,
        _vc_data: &VirtualConsoleData,
        cols: usize,
        rows: usize,
    ) -> Result<(), SystemError> {
        if cols > VGA_MAX_COLS || rows > VGA_MAX_ROWS {
            return Err(SystemError::EINVAL);
        }
        Ok(())
    }

    fn con_invert_region(
        &self,
        vc_data: &VirtualConsoleData,
        offset: usize,
        count: usize,
    ) -> Result<(), SystemError> {
        let mut state = self.state.lock();
        state.fit(vc_data);
        let cols = state.cols;
        let end = (offset + count).min(vc_data.screen_buf.len());
        for pos in offset..end {
            let idx = state.line(pos / cols) + pos % cols;
            state.cells[idx] = vc_data.screen_buf[pos];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        driver::tty::virtual_terminal::{vt_config::VtConfig, VtManager, COLOR_TABLE},
        process::ProcessTable,
    };

    fn setup() -> (Arc<VgaConsole>, VtManager) {
        let manager = VtManager::new(VtConfig::default(), Arc::new(ProcessTable::new()));
        let vga = Arc::new(VgaConsole::new(80, 25));
        manager.register_display(vga.clone(), 0, 2).unwrap();
        (vga, manager)
    }

    #[test]
    fn test_output_and_cursor() {
        let (vga, manager) = setup();
        let vt = manager.vt_of(0).unwrap();
        vt.con_write(0, b"hello\r\nworld").unwrap();
        assert_eq!(vga.row_text(0), "hello");
        assert_eq!(vga.row_text(1), "world");
        assert_eq!(vga.cursor(), Some((5, 1)));
        assert_eq!(vga.cell(0, 0) & 0xff, b'h' as u16);
    }

    #[test]
    fn test_full_screen_scroll_moves_origin() {
        let (vga, manager) = setup();
        let vt = manager.vt_of(0).unwrap();
        for i in 0..27 {
            vt.con_write(0, format!("row {}\r\n", i).as_bytes()).unwrap();
        }
        assert_eq!(vga.hw_scrolls(), 3);
        assert_eq!(vga.row_text(0), "row 3");
        assert_eq!(vga.row_text(23), "row 26");
        assert_eq!(vga.row_text(24), "");
    }

    #[test]
    fn test_region_scroll_redrawn_by_core() {
        let (vga, manager) = setup();
        let vt = manager.vt_of(0).unwrap();
        // 滚动区域为第2到第3行
        vt.con_write(0, b"a\r\nb\r\nc\x1b[2;3r\x1b[3;1H\n").unwrap();
        assert_eq!(vga.hw_scrolls(), 0);
        assert_eq!(vga.row_text(0), "a");
        assert_eq!(vga.row_text(1), "c");
        assert_eq!(vga.row_text(2), "");
    }

    #[test]
    fn test_palette_goes_through_color_table() {
        let (vga, _manager) = setup();
        let dac = vga.dac();
        // 控制台的1号颜色（红）写入硬件的4号寄存器
        assert_eq!(COLOR_TABLE[1], 4);
        assert_eq!(dac[4].red, 0xaa);
        assert_eq!(dac[4].blue, 0);
    }

    #[test]
    fn test_resize_limits() {
        let vga = VgaConsole::new(80, 25);
        let config = VtConfig::default();
        let vc = VirtualConsoleData::new(0, &config, console_map::new_user_translation());
        assert!(vga.con_resize(&vc, 132, 50).is_ok());
        assert_eq!(vga.con_resize(&vc, 133, 25), Err(SystemError::EINVAL));
    }

    #[test]
    fn test_font_width_must_be_8() {
        let vga = VgaConsole::new(80, 25);
        let config = VtConfig::default();
        let vc = VirtualConsoleData::new(0, &config, console_map::new_user_translation());
        let font = ConsoleFont {
            width: 9,
            height: 16,
            count: 256,
            data: vec![0; ConsoleFont::glyph_stride(9) * 256],
        };
        assert_eq!(vga.con_font_set(&vc, &font, 0), Err(SystemError::EINVAL));
        assert_eq!(vga.font().width, 8);
    }

    #[test]
    fn test_blank_levels() {
        let vga = VgaConsole::new(80, 25);
        let config = VtConfig::default();
        let vc = VirtualConsoleData::new(0, &config, console_map::new_user_translation());
        assert!(vga.con_blank(&vc, BlankMode::Normal, false));
        assert!(vga.is_blanked());
        assert!(!vga.is_powered_down());
        vga.con_blank(&vc, BlankMode::Powerdown, false);
        assert!(vga.is_powered_down());
        vga.con_blank(&vc, BlankMode::Unblank, false);
        assert!(!vga.is_blanked());
    }
}
