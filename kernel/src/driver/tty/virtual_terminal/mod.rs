use std::sync::Arc;

use atomic_enum::atomic_enum;
use core::sync::atomic::Ordering;
use log::{debug, info, warn};
use system_error::SystemError;

use crate::{
    driver::{
        keyboard::kbd::{KeyboardAction, KeyboardController, VcKbdModeType},
        tty::{
            console::{BlankMode, ConsoleSwitch},
            KDMode,
        },
        video::console::{dummycon::dummy_console, vgacon::VgaConsole},
    },
    init::cmdline::KernelCmdline,
    ipc::signal::{Signal, SignalDelivery},
    libs::{
        printk::{loglevel_to_filter, printk_init},
        spinlock::SpinLock,
        wait_queue::{CancelToken, WaitQueue},
    },
    process::Pid,
};

use self::{
    console_map::{new_user_translation, UserTranslation},
    selection::Selection,
    virtual_console::{ConsoleRequest, VirtualConsoleData},
    vt_config::VtConfig,
};

pub mod console_map;
pub mod escape;
pub mod selection;
pub mod virtual_console;
pub mod vt_config;
pub mod vt_ioctl;

pub const MAX_NR_CONSOLES: usize = 63;
pub const VC_MAXCOL: usize = 32767;
pub const VC_MAXROW: usize = 32767;

pub const DEFAULT_RED: [u8; 16] = [
    0x00, 0xaa, 0x00, 0xaa, 0x00, 0xaa, 0x00, 0xaa, 0x55, 0xff, 0x55, 0xff, 0x55, 0xff, 0x55, 0xff,
];

pub const DEFAULT_GREEN: [u8; 16] = [
    0x00, 0x00, 0xaa, 0x55, 0x00, 0x00, 0xaa, 0xaa, 0x55, 0x55, 0xff, 0xff, 0x55, 0x55, 0xff, 0xff,
];

pub const DEFAULT_BLUE: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0xaa, 0xaa, 0xaa, 0xaa, 0x55, 0x55, 0x55, 0x55, 0xff, 0xff, 0xff, 0xff,
];

pub const COLOR_TABLE: &[u8] = &[0, 4, 2, 6, 1, 5, 3, 7, 8, 12, 10, 14, 9, 13, 11, 15];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Color {
    pub red: u16,
    pub green: u16,
    pub blue: u16,
    pub transp: u16,
}

impl Color {
    pub fn from_256(col: u32) -> Self {
        let col = col.min(255);
        let mut color = Self::default();
        if col < 8 {
            color.red = if col & 1 != 0 { 0xaa } else { 0x00 };
            color.green = if col & 2 != 0 { 0xaa } else { 0x00 };
            color.blue = if col & 4 != 0 { 0xaa } else { 0x00 };
        } else if col < 16 {
            color.red = if col & 1 != 0 { 0xff } else { 0x55 };
            color.green = if col & 2 != 0 { 0xff } else { 0x55 };
            color.blue = if col & 4 != 0 { 0xff } else { 0x55 };
        } else if col < 232 {
            color.red = ((col - 16) / 36 * 85 / 2) as u16;
            color.green = ((col - 16) / 6 % 6 * 85 / 2) as u16;
            color.blue = ((col - 16) % 6 * 85 / 2) as u16;
        } else {
            let col = (col * 10 - 2312) as u16;
            color.red = col;
            color.green = col;
            color.blue = col;
        }

        color
    }
}

/// 用于给vc确定要写入的buf位置
#[derive(Debug, Default)]
pub struct DrawRegion {
    /// 偏移量
    pub offset: usize,
    /// 写入数量
    pub size: usize,
    pub x: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VtMode {
    /// 自动切换模式，切换请求立即生效
    #[default]
    Auto,
    /// 由控制进程通过信号和 VT_RELDISP 确认切换
    Process,
}

impl VtMode {
    pub const VT_AUTO: u8 = 0x00;
    pub const VT_PROCESS: u8 = 0x01;
    /// VT_RELDISP 的参数：确认获得控制台
    pub const VT_ACKACQ: u32 = 0x02;

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            Self::VT_AUTO => Some(Self::Auto),
            Self::VT_PROCESS => Some(Self::Process),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u8 {
        match self {
            Self::Auto => Self::VT_AUTO,
            Self::Process => Self::VT_PROCESS,
        }
    }
}

/// 控制台的切换模式，VT_SETMODE 设置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VtModeData {
    pub mode: VtMode,
    /// 写操作是否等待控制台激活，只做记录
    pub waitv: u8,
    /// 释放请求时触发的信号
    pub relsig: Option<Signal>,
    /// 获取请求时触发的信号
    pub acqsig: Option<Signal>,
    /// 未使用，总是0
    pub frsig: i16,
}

/// 一次切换请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// 没有发生切换
    Ignored,
    /// 已通知控制进程，等待 VT_RELDISP
    PendingRelease,
    Completed,
}

/// 屏幕消隐状态
#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum VtBlankState {
    Unblanked,
    Blanked,
    /// 已经进入vesa省电模式
    Powerdown,
}

/// 向控制进程发送切换信号。没有设置信号时只检查进程是否存在
fn send_vt_signal(
    signals: &dyn SignalDelivery,
    pid: Option<Pid>,
    sig: Option<Signal>,
) -> Result<(), SystemError> {
    let pid = pid.ok_or(SystemError::ESRCH)?;
    match sig {
        Some(sig) => signals.send_signal(pid, sig),
        None => signals.probe(pid),
    }
}

/// 一个显示设备以及共享它的一组虚拟控制台
#[derive(Debug)]
pub struct VirtualTerminal {
    index: usize,
    first_vc: usize,
    vc_count: usize,
    driver_name: &'static str,
    inner: SpinLock<InnerVirtualTerminal>,
    /// VT_WAITACTIVE 的等待者
    activate_wait: WaitQueue,
    blank_state: AtomicVtBlankState,
    signals: Arc<dyn SignalDelivery>,
}

#[derive(Debug)]
pub struct InnerVirtualTerminal {
    first_vc: usize,
    pub(super) consoles: Vec<Option<Box<VirtualConsoleData>>>,
    fg_console: usize,
    last_console: Option<usize>,
    /// 等待处理的切换目标
    want_console: Option<usize>,
    driver: Arc<dyn ConsoleSwitch>,
    pub(super) config: VtConfig,
    user_map: UserTranslation,
    pub(super) keyboard: KeyboardController,
    pub(super) selection: Selection,
    /// 当前向上回滚的行数
    scrollback_delta: usize,
    /// VT_LOCKSWITCH
    dont_switch: bool,
    blank_state: VtBlankState,
    blank_interval_ms: u64,
    vesa_off_interval_ms: u64,
    pub(super) vesa_blank_mode: u32,
    /// 距离下一次消隐（或者进入省电）的毫秒数
    blank_timer_ms: Option<u64>,
    bells: usize,
    /// 需要由系统处理的按键请求（重启、SAK等）
    system_requests: Vec<KeyboardAction>,
}

impl InnerVirtualTerminal {
    fn slot(&self, num: usize) -> Result<usize, SystemError> {
        if num >= MAX_NR_CONSOLES {
            return Err(SystemError::ENXIO);
        }
        if num < self.first_vc || num - self.first_vc >= self.consoles.len() {
            return Err(SystemError::EINVAL);
        }
        return Ok(num - self.first_vc);
    }

    pub(super) fn is_allocated(&self, num: usize) -> bool {
        match self.slot(num) {
            Ok(slot) => self.consoles[slot].is_some(),
            Err(_) => false,
        }
    }

    pub(super) fn vc(&self, num: usize) -> Result<&VirtualConsoleData, SystemError> {
        let slot = self.slot(num)?;
        self.consoles[slot].as_deref().ok_or(SystemError::ENXIO)
    }

    pub(super) fn vc_mut(&mut self, num: usize) -> Result<&mut VirtualConsoleData, SystemError> {
        let slot = self.slot(num)?;
        self.consoles[slot]
            .as_deref_mut()
            .ok_or(SystemError::ENXIO)
    }

    pub(super) fn fg_vc_mut(&mut self) -> Result<&mut VirtualConsoleData, SystemError> {
        let fg = self.fg_console;
        self.vc_mut(fg)
    }

    pub(super) fn driver(&self) -> &Arc<dyn ConsoleSwitch> {
        &self.driver
    }

    pub(super) fn fg_console(&self) -> usize {
        self.fg_console
    }

    pub(super) fn set_dont_switch(&mut self, dont_switch: bool) {
        self.dont_switch = dont_switch;
    }

    /// ## 分配控制台
    /// 已经分配的控制台直接返回
    pub(super) fn vc_allocate(&mut self, num: usize, init: bool) -> Result<(), SystemError> {
        let slot = self.slot(num)?;
        if self.consoles[slot].is_some() {
            return Ok(());
        }

        let mut vc = Box::new(VirtualConsoleData::new(
            num,
            &self.config,
            self.user_map.clone(),
        ));
        vc.set_driver_funcs(Arc::downgrade(&self.driver));
        self.driver.con_init(&mut vc, init)?;
        if vc.cols == 0 || vc.rows == 0 || vc.cols > VC_MAXCOL || vc.rows > VC_MAXROW {
            return Err(SystemError::EINVAL);
        }
        vc.init(None, None, true);
        vc.update_attr();

        debug!("vc {}: allocated {}x{}", num, vc.cols, vc.rows);
        self.consoles[slot] = Some(vc);
        return Ok(());
    }

    /// 控制台是否正在使用：被打开、在前台或者持有选区
    pub(super) fn vt_busy(&self, num: usize) -> bool {
        if num == self.fg_console || self.selection.console() == Some(num) {
            return true;
        }
        match self.vc(num) {
            Ok(vc) => vc.port.is_open(),
            Err(_) => false,
        }
    }

    pub(super) fn vc_disallocate(&mut self, num: usize) -> Result<(), SystemError> {
        let slot = self.slot(num)?;
        if self.vt_busy(num) {
            return Err(SystemError::EBUSY);
        }
        if let Some(vc) = self.consoles[slot].take() {
            let _ = self.driver.con_deinit(&vc);
            if self.last_console == Some(num) {
                self.last_console = None;
            }
            debug!("vc {}: deallocated", num);
        }
        return Ok(());
    }

    /// ## 控制进程不存在时，把控制台恢复为默认状态
    pub(super) fn reset_vc(&mut self, num: usize) {
        let vc = match self.vc_mut(num) {
            Ok(vc) => vc,
            Err(_) => return,
        };
        vc.vc_mode = KDMode::KdText;
        vc.kbd.kbdmode = VcKbdModeType::Xlate;
        vc.vt_mode = VtModeData::default();
        vc.vt_pid = None;
        vc.vt_newvt = -1;
        vc.acquire_pending = false;
        vc.reset_palette();
        info!("vc {}: reset to auto switch mode", num);
    }

    fn switch_screen(&mut self, new: usize) {
        let old = self.fg_console;
        self.clear_selection();
        self.scrollback_delta = 0;
        let blanked = self.blank_state != VtBlankState::Unblanked;

        if let Ok(vc) = self.vc_mut(old) {
            vc.hide_cursor();
            vc.set_visible(false);
            vc.set_blanked(false);
        }

        self.fg_console = new;
        let driver = self.driver.clone();
        if let Ok(vc) = self.vc_mut(new) {
            vc.set_visible(true);
            vc.set_blanked(blanked);
            if !blanked {
                let redraw = driver.con_switch(vc);
                vc.set_palette();
                if redraw && vc.vc_mode.is_text() {
                    vc.update_screen();
                } else {
                    vc.set_cursor();
                }
            }
        }

        self.keyboard.compute_shiftstate();
        if let Ok(vc) = self.vc(new) {
            let kbd = vc.kbd.clone();
            self.keyboard.update_leds(&kbd);
        }
    }

    /// ## 完成切换
    /// 更新前台控制台并通知新控制台的控制进程
    pub(super) fn complete_change_console(
        &mut self,
        new: usize,
        signals: &dyn SignalDelivery,
    ) -> SwitchOutcome {
        if new == self.fg_console || !self.is_allocated(new) {
            return SwitchOutcome::Ignored;
        }

        let old_mode = self.vc(self.fg_console).map(|vc| vc.vc_mode).ok();
        self.last_console = Some(self.fg_console);
        self.switch_screen(new);

        let (mode, pid, acqsig) = match self.vc(new) {
            Ok(vc) => (vc.vt_mode.mode, vc.vt_pid, vc.vt_mode.acqsig),
            Err(_) => return SwitchOutcome::Completed,
        };
        if mode == VtMode::Process {
            match send_vt_signal(signals, pid, acqsig) {
                Ok(()) => {
                    if let Ok(vc) = self.vc_mut(new) {
                        vc.acquire_pending = true;
                    }
                }
                Err(e) => {
                    warn!("vc {}: acquire signal failed: {:?}", new, e);
                    self.reset_vc(new);
                }
            }
        }

        // 文本模式与图形模式之间切换时需要消隐或者恢复屏幕
        let new_mode = self.vc(new).map(|vc| vc.vc_mode).ok();
        if old_mode != new_mode {
            if new_mode == Some(KDMode::KdText) {
                self.unblank_screen();
            } else if let Ok(vc) = self.vc(new) {
                vc.hide_cursor();
            }
        }

        info!("console switched {} -> {}", self.last_console.unwrap_or(0), new);
        return SwitchOutcome::Completed;
    }

    /// ## 请求切换到new
    /// 当前控制台处于进程控制模式时先发送释放信号，进程不存在则恢复为自动模式后立即切换
    pub(super) fn change_console(
        &mut self,
        new: usize,
        signals: &dyn SignalDelivery,
    ) -> SwitchOutcome {
        if new == self.fg_console || self.dont_switch || !self.is_allocated(new) {
            return SwitchOutcome::Ignored;
        }

        let fg = self.fg_console;
        let (mode, pid, relsig) = match self.vc(fg) {
            Ok(vc) => (vc.vt_mode.mode, vc.vt_pid, vc.vt_mode.relsig),
            Err(_) => return self.complete_change_console(new, signals),
        };

        if mode == VtMode::Process {
            match send_vt_signal(signals, pid, relsig) {
                Ok(()) => {
                    if let Ok(vc) = self.vc_mut(fg) {
                        vc.vt_newvt = new as i32;
                    }
                    debug!("vc {}: release requested for switch to {}", fg, new);
                    return SwitchOutcome::PendingRelease;
                }
                Err(e) => {
                    warn!("vc {}: controlling process is gone ({:?})", fg, e);
                    self.reset_vc(fg);
                }
            }
        }

        // 自动模式下的图形控制台不允许切走
        if let Ok(vc) = self.vc(fg) {
            if vc.vc_mode == KDMode::KdGraphics {
                return SwitchOutcome::Ignored;
            }
        }

        return self.complete_change_console(new, signals);
    }

    /// 记下切换目标并立即处理
    pub(super) fn set_console(&mut self, num: usize, signals: &dyn SignalDelivery) -> SwitchOutcome {
        self.want_console = Some(num);
        return self.console_callback(signals);
    }

    fn console_callback(&mut self, signals: &dyn SignalDelivery) -> SwitchOutcome {
        let mut outcome = SwitchOutcome::Ignored;
        if let Some(want) = self.want_console.take() {
            if want != self.fg_console && self.is_allocated(want) {
                outcome = self.change_console(want, signals);
            }
        }
        return outcome;
    }

    /// ## 消隐屏幕
    pub(super) fn blank_screen(&mut self) {
        if self.blank_state != VtBlankState::Unblanked {
            return;
        }
        let driver = self.driver.clone();
        let mode = if self.vesa_off_interval_ms != 0 {
            BlankMode::Normal
        } else {
            BlankMode::from_vesa(self.vesa_blank_mode)
        };
        if let Ok(vc) = self.fg_vc_mut() {
            vc.hide_cursor();
            if vc.vc_mode.is_text() && !driver.con_blank(vc, mode, false) {
                let _ = driver.con_clear(vc, 0, 0, vc.rows, vc.cols);
            }
            vc.set_blanked(true);
        }
        self.blank_state = VtBlankState::Blanked;
        self.blank_timer_ms = if self.vesa_off_interval_ms != 0 {
            Some(self.vesa_off_interval_ms)
        } else {
            None
        };
        debug!("screen blanked");
    }

    /// ## 恢复被消隐的屏幕
    pub(super) fn unblank_screen(&mut self) {
        if self.blank_state == VtBlankState::Unblanked {
            return;
        }
        let driver = self.driver.clone();
        let delta = self.scrollback_delta;
        if let Ok(vc) = self.fg_vc_mut() {
            if !vc.vc_mode.is_text() {
                return;
            }
            vc.set_blanked(false);
            if driver.con_blank(vc, BlankMode::Unblank, false) {
                vc.redraw_view(delta);
            }
            vc.set_cursor();
        }
        self.blank_state = VtBlankState::Unblanked;
        self.reset_blank_timer();
        debug!("screen unblanked");
    }

    fn reset_blank_timer(&mut self) {
        self.blank_timer_ms = if self.blank_interval_ms != 0 {
            Some(self.blank_interval_ms)
        } else {
            None
        };
    }

    /// 有活动时恢复屏幕并重新计时
    pub(super) fn poke_blanked_console(&mut self) {
        if self.blank_state != VtBlankState::Unblanked {
            self.unblank_screen();
        } else {
            self.reset_blank_timer();
        }
    }

    fn timer_tick(&mut self, elapsed_ms: u64) {
        let remaining = match self.blank_timer_ms {
            Some(r) => r,
            None => return,
        };
        if remaining > elapsed_ms {
            self.blank_timer_ms = Some(remaining - elapsed_ms);
            return;
        }
        match self.blank_state {
            VtBlankState::Unblanked => self.blank_screen(),
            VtBlankState::Blanked => {
                let driver = self.driver.clone();
                if let Ok(vc) = self.fg_vc_mut() {
                    driver.con_blank(vc, BlankMode::Powerdown, false);
                }
                self.blank_state = VtBlankState::Powerdown;
                self.blank_timer_ms = None;
                debug!("display powered down");
            }
            VtBlankState::Powerdown => self.blank_timer_ms = None,
        }
    }

    pub(super) fn set_blank_interval(&mut self, minutes: u32) {
        self.blank_interval_ms = minutes as u64 * 60 * 1000;
        self.poke_blanked_console();
    }

    /// ## 回滚显示
    /// lines为0时回滚半屏
    pub(super) fn scrollback(&mut self, lines: usize) {
        let driver = self.driver.clone();
        let delta = self.scrollback_delta;
        let vc = match self.fg_vc_mut() {
            Ok(vc) => vc,
            Err(_) => return,
        };
        let lines = if lines == 0 { vc.rows / 2 } else { lines };
        let new_delta = (delta + lines).min(vc.scrollback.len());
        if new_delta == delta {
            return;
        }
        if !driver.con_scrolldelta(vc, -((new_delta - delta) as isize)) {
            vc.redraw_view(new_delta);
        }
        self.scrollback_delta = new_delta;
    }

    pub(super) fn scrollfront(&mut self, lines: usize) {
        let driver = self.driver.clone();
        let delta = self.scrollback_delta;
        let vc = match self.fg_vc_mut() {
            Ok(vc) => vc,
            Err(_) => return,
        };
        let lines = if lines == 0 { vc.rows / 2 } else { lines };
        let new_delta = delta.saturating_sub(lines);
        if new_delta == delta {
            return;
        }
        if !driver.con_scrolldelta(vc, (delta - new_delta) as isize) {
            vc.redraw_view(new_delta);
        }
        self.scrollback_delta = new_delta;
    }

    /// 输出或者键盘输入时回到当前屏幕
    fn snap_scrollback(&mut self) {
        if self.scrollback_delta != 0 {
            let delta = self.scrollback_delta;
            self.scrollfront(delta);
            self.scrollback_delta = 0;
        }
    }

    pub(super) fn clear_selection(&mut self) {
        if let Some(num) = self.selection.console() {
            let slot = match self.slot(num) {
                Ok(slot) => slot,
                Err(_) => return,
            };
            self.selection.clear(self.consoles[slot].as_deref_mut());
        }
    }

    /// 处理写入控制台时产生的请求
    fn process_requests(&mut self, num: usize, signals: &dyn SignalDelivery) -> SwitchOutcome {
        let requests = match self.vc_mut(num) {
            Ok(vc) => vc.take_requests(),
            Err(_) => return SwitchOutcome::Ignored,
        };
        let mut outcome = SwitchOutcome::Ignored;
        for req in requests {
            match req {
                ConsoleRequest::Bell { pitch, duration } => {
                    // 只有前台控制台会响铃
                    if num == self.fg_console {
                        self.bells += 1;
                        debug!("bell: {} Hz, {} ms", pitch, duration);
                    }
                }
                ConsoleRequest::SetBlankInterval(minutes) => self.set_blank_interval(minutes),
                ConsoleRequest::SetVesaOffInterval(minutes) => {
                    self.vesa_off_interval_ms = minutes as u64 * 60 * 1000;
                }
                ConsoleRequest::Poke => self.poke_blanked_console(),
                ConsoleRequest::SetConsole(target) => {
                    if self.is_allocated(target) {
                        let o = self.set_console(target, signals);
                        if o != SwitchOutcome::Ignored {
                            outcome = o;
                        }
                    }
                }
            }
        }
        return outcome;
    }

    fn run_keyboard_actions(
        &mut self,
        actions: Vec<KeyboardAction>,
        signals: &dyn SignalDelivery,
    ) -> bool {
        let mut switched = false;
        for action in actions {
            let outcome = match action {
                KeyboardAction::SwitchConsole(n) => {
                    let target = self.first_vc + n;
                    if target < self.first_vc + self.consoles.len() {
                        self.set_console(target, signals)
                    } else {
                        SwitchOutcome::Ignored
                    }
                }
                KeyboardAction::LastConsole => match self.last_console {
                    Some(last) => self.set_console(last, signals),
                    None => SwitchOutcome::Ignored,
                },
                KeyboardAction::DecrConsole => match self.neighbour_console(false) {
                    Some(n) => self.set_console(n, signals),
                    None => SwitchOutcome::Ignored,
                },
                KeyboardAction::IncrConsole => match self.neighbour_console(true) {
                    Some(n) => self.set_console(n, signals),
                    None => SwitchOutcome::Ignored,
                },
                KeyboardAction::ScrollBack => {
                    self.scrollback(0);
                    SwitchOutcome::Ignored
                }
                KeyboardAction::ScrollForw => {
                    self.scrollfront(0);
                    SwitchOutcome::Ignored
                }
                KeyboardAction::SpawnConsole(pid, sig) => {
                    if signals.send_signal(pid, sig).is_err() {
                        warn!("spawn console: pid {} is gone", pid);
                        self.keyboard.set_spawn(None);
                    }
                    SwitchOutcome::Ignored
                }
                KeyboardAction::Sak => {
                    warn!("SAK on console {}", self.fg_console);
                    let fg = self.fg_console;
                    self.reset_vc(fg);
                    self.system_requests.push(action);
                    SwitchOutcome::Ignored
                }
                KeyboardAction::Reboot
                | KeyboardAction::ShowRegs
                | KeyboardAction::ShowMem
                | KeyboardAction::ShowState => {
                    info!("keyboard request: {:?}", action);
                    self.system_requests.push(action);
                    SwitchOutcome::Ignored
                }
            };
            if outcome == SwitchOutcome::Completed {
                switched = true;
            }
        }
        return switched;
    }

    /// 前一个或者后一个已分配的控制台
    fn neighbour_console(&self, forward: bool) -> Option<usize> {
        let count = self.consoles.len();
        let cur = self.fg_console - self.first_vc;
        for step in 1..count {
            let slot = if forward {
                (cur + step) % count
            } else {
                (cur + count - step) % count
            };
            if self.consoles[slot].is_some() {
                return Some(self.first_vc + slot);
            }
        }
        return None;
    }
}

impl VirtualTerminal {
    fn new(
        index: usize,
        first_vc: usize,
        vc_count: usize,
        driver: Arc<dyn ConsoleSwitch>,
        driver_name: &'static str,
        config: VtConfig,
        signals: Arc<dyn SignalDelivery>,
    ) -> Result<Arc<Self>, SystemError> {
        let blank_interval_ms = config.blank_timeout_ms();
        let mut inner = InnerVirtualTerminal {
            first_vc,
            consoles: (0..vc_count).map(|_| None).collect(),
            fg_console: first_vc,
            last_console: None,
            want_console: None,
            driver,
            config,
            user_map: new_user_translation(),
            keyboard: KeyboardController::new(),
            selection: Selection::default(),
            scrollback_delta: 0,
            dont_switch: false,
            blank_state: VtBlankState::Unblanked,
            blank_interval_ms,
            vesa_off_interval_ms: 0,
            vesa_blank_mode: 0,
            blank_timer_ms: None,
            bells: 0,
            system_requests: Vec::new(),
        };
        inner.reset_blank_timer();

        // 第一个控制台总是存在，并且在前台
        inner.vc_allocate(first_vc, true)?;
        let vc = inner.fg_vc_mut()?;
        vc.set_visible(true);
        vc.set_palette();
        vc.update_screen();

        Ok(Arc::new(Self {
            index,
            first_vc,
            vc_count,
            driver_name,
            inner: SpinLock::new(inner),
            activate_wait: WaitQueue::default(),
            blank_state: AtomicVtBlankState::new(VtBlankState::Unblanked),
            signals,
        }))
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn first_vc(&self) -> usize {
        self.first_vc
    }

    pub fn vc_count(&self) -> usize {
        self.vc_count
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver_name
    }

    /// 控制台是否属于这个终端
    #[inline]
    pub fn contains(&self, num: usize) -> bool {
        num >= self.first_vc && num < self.first_vc + self.vc_count
    }

    pub fn fg_console(&self) -> usize {
        self.inner.lock().fg_console
    }

    pub fn last_console(&self) -> Option<usize> {
        self.inner.lock().last_console
    }

    pub fn blank_state(&self) -> VtBlankState {
        self.blank_state.load(Ordering::SeqCst)
    }

    pub fn scrollback_delta(&self) -> usize {
        self.inner.lock().scrollback_delta
    }

    /// 前台控制台响铃的次数
    pub fn bells(&self) -> usize {
        self.inner.lock().bells
    }

    pub fn take_system_requests(&self) -> Vec<KeyboardAction> {
        core::mem::take(&mut self.inner.lock().system_requests)
    }

    pub(super) fn lock(&self) -> crate::libs::spinlock::SpinLockGuard<InnerVirtualTerminal> {
        self.inner.lock()
    }

    pub(super) fn signals(&self) -> &dyn SignalDelivery {
        self.signals.as_ref()
    }

    /// 同步消隐状态并唤醒等待者。调用者仍持有控制台锁，等待者被唤醒后重新加锁检查条件
    fn finish(&self, inner: &InnerVirtualTerminal, switched: bool) {
        self.blank_state.store(inner.blank_state, Ordering::SeqCst);
        if switched {
            self.activate_wait.wake_all();
        }
    }

    /// ## 在控制台上执行操作
    /// 控制台未分配时返回ENXIO
    pub fn with_console<R, F>(&self, num: usize, f: F) -> Result<R, SystemError>
    where
        F: FnOnce(&mut VirtualConsoleData) -> R,
    {
        let mut guard = self.inner.lock();
        let vc = guard.vc_mut(num)?;
        Ok(f(vc))
    }

    pub fn vc_is_allocated(&self, num: usize) -> bool {
        self.inner.lock().is_allocated(num)
    }

    pub fn vc_allocate(&self, num: usize) -> Result<(), SystemError> {
        self.inner.lock().vc_allocate(num, false)
    }

    pub fn vc_disallocate(&self, num: usize) -> Result<(), SystemError> {
        self.inner.lock().vc_disallocate(num)
    }

    /// ## 打开控制台，必要时分配
    pub fn open_console(&self, num: usize) -> Result<(), SystemError> {
        let mut guard = self.inner.lock();
        guard.vc_allocate(num, false)?;
        guard.vc_mut(num)?.port.open();
        Ok(())
    }

    pub fn close_console(&self, num: usize) -> Result<(), SystemError> {
        let mut guard = self.inner.lock();
        guard.vc_mut(num)?.port.close();
        Ok(())
    }

    /// ## 向控制台写入
    /// 前台控制台的输出会同步到显示后端
    pub fn con_write(&self, num: usize, buf: &[u8]) -> Result<usize, SystemError> {
        let mut guard = self.inner.lock();
        let inner: &mut InnerVirtualTerminal = &mut guard;
        inner.vc(num)?;

        if inner.selection.console() == Some(num) {
            inner.clear_selection();
        }
        if num == inner.fg_console {
            inner.snap_scrollback();
        }

        let written = inner.vc_mut(num)?.do_write(buf);
        let outcome = inner.process_requests(num, self.signals.as_ref());
        self.finish(inner, outcome == SwitchOutcome::Completed);
        Ok(written)
    }

    /// 读取控制台的输入队列
    pub fn read_input(&self, num: usize, buf: &mut [u8]) -> Result<usize, SystemError> {
        let mut guard = self.inner.lock();
        Ok(guard.vc_mut(num)?.port.read(buf))
    }

    pub fn take_input(&self, num: usize) -> Result<Vec<u8>, SystemError> {
        let mut guard = self.inner.lock();
        Ok(guard.vc_mut(num)?.port.take_input())
    }

    /// ## 处理一个扫描码
    /// 原始键盘模式下扫描码本身也会送给前台控制台
    pub fn handle_scancode(&self, scancode: u8) {
        let event = {
            let mut guard = self.inner.lock();
            let inner: &mut InnerVirtualTerminal = &mut guard;
            if let Ok(vc) = inner.fg_vc_mut() {
                if vc.kbd.kbdmode == VcKbdModeType::Raw {
                    vc.port.receive_char(scancode);
                }
            }
            inner.keyboard.fsm().parse(scancode)
        };
        if let Some(event) = event {
            self.handle_keycode(event.keycode, event.down);
        }
    }

    /// ## 处理一个键码事件
    pub fn handle_keycode(&self, keycode: u8, down: bool) {
        let mut guard = self.inner.lock();
        let inner: &mut InnerVirtualTerminal = &mut guard;
        if down {
            inner.poke_blanked_console();
        }

        let fg = inner.fg_console;
        let slot = fg - inner.first_vc;
        let vc = match inner.consoles[slot].as_deref_mut() {
            Some(vc) => vc,
            None => return,
        };
        let before = vc.port.chars_in_buffer();
        let actions = inner
            .keyboard
            .handle_keycode(keycode, down, &mut vc.kbd, &mut vc.port);
        let produced = vc.port.chars_in_buffer() != before;

        if produced {
            inner.snap_scrollback();
        }
        let switched = inner.run_keyboard_actions(actions, self.signals.as_ref());
        self.finish(inner, switched);
    }

    /// ## 请求切换前台控制台
    /// 进程控制模式下只发送释放信号，切换在 VT_RELDISP 之后完成
    pub fn change_console(&self, num: usize) -> Result<SwitchOutcome, SystemError> {
        let mut guard = self.inner.lock();
        let inner: &mut InnerVirtualTerminal = &mut guard;
        inner.slot(num)?;
        if !inner.is_allocated(num) {
            return Err(SystemError::ENXIO);
        }
        let outcome = inner.set_console(num, self.signals.as_ref());
        self.finish(inner, outcome == SwitchOutcome::Completed);
        Ok(outcome)
    }

    /// ## 等待控制台成为前台
    /// 被取消时返回EINTR
    pub fn wait_active(&self, num: usize, cancel: &CancelToken) -> Result<(), SystemError> {
        self.inner.lock().slot(num)?;
        self.activate_wait
            .wait_event_interruptible(|| self.inner.lock().fg_console == num, cancel)
    }

    /// ## 推进消隐计时器
    pub fn timer_tick(&self, elapsed_ms: u64) {
        let mut guard = self.inner.lock();
        guard.timer_tick(elapsed_ms);
        self.finish(&guard, false);
    }

    pub fn blank_screen(&self) {
        let mut guard = self.inner.lock();
        guard.blank_screen();
        self.finish(&guard, false);
    }

    pub fn unblank_screen(&self) {
        let mut guard = self.inner.lock();
        guard.unblank_screen();
        self.finish(&guard, false);
    }

    pub fn poke_blanked_console(&self) {
        let mut guard = self.inner.lock();
        guard.poke_blanked_console();
        self.finish(&guard, false);
    }

    pub fn scrollback(&self, lines: usize) {
        self.inner.lock().scrollback(lines);
    }

    pub fn scrollfront(&self, lines: usize) {
        self.inner.lock().scrollfront(lines);
    }

    /// 终端被注销时释放所有控制台，并让等待者失败返回
    fn shutdown(&self) {
        let mut guard = self.inner.lock();
        let driver = guard.driver.clone();
        for vc in guard.consoles.iter_mut().filter_map(|c| c.take()) {
            let _ = driver.con_deinit(&vc);
        }
        drop(guard);
        self.activate_wait.mark_dead();
    }
}

/// 所有虚拟终端
#[derive(Debug)]
pub struct VtManager {
    vts: SpinLock<Vec<Arc<VirtualTerminal>>>,
    config: VtConfig,
    signals: Arc<dyn SignalDelivery>,
}

impl VtManager {
    pub fn new(config: VtConfig, signals: Arc<dyn SignalDelivery>) -> Self {
        Self {
            vts: SpinLock::new(Vec::new()),
            config,
            signals,
        }
    }

    pub fn config(&self) -> &VtConfig {
        &self.config
    }

    /// ## 注册显示设备
    /// 后端启动失败时拒绝注册。控制台范围不能与已有终端重叠
    /// ### 参数
    /// - driver: 显示后端
    /// - first_vc: 第一个控制台的编号
    /// - vc_count: 控制台数量
    pub fn register_display(
        &self,
        driver: Arc<dyn ConsoleSwitch>,
        first_vc: usize,
        vc_count: usize,
    ) -> Result<Arc<VirtualTerminal>, SystemError> {
        if vc_count == 0 || first_vc + vc_count > MAX_NR_CONSOLES {
            return Err(SystemError::EINVAL);
        }

        let mut vts = self.vts.lock();
        let last = first_vc + vc_count - 1;
        if vts
            .iter()
            .any(|vt| vt.contains(first_vc) || vt.contains(last) || (first_vc..=last).contains(&vt.first_vc))
        {
            return Err(SystemError::EBUSY);
        }

        let name = match driver.con_startup() {
            Ok(name) => name,
            Err(e) => {
                warn!("display driver refused to start: {:?}", e);
                return Err(e);
            }
        };

        let index = vts.iter().map(|vt| vt.index + 1).max().unwrap_or(0);
        let vt = VirtualTerminal::new(
            index,
            first_vc,
            vc_count,
            driver,
            name,
            self.config.clone(),
            self.signals.clone(),
        )?;
        info!(
            "vt {}: {} with consoles {}-{}",
            index, name, first_vc, last
        );
        vts.push(vt.clone());
        Ok(vt)
    }

    pub fn unregister_display(&self, vt: &Arc<VirtualTerminal>) -> Result<(), SystemError> {
        let mut vts = self.vts.lock();
        let pos = vts
            .iter()
            .position(|v| Arc::ptr_eq(v, vt))
            .ok_or(SystemError::ENODEV)?;
        vts.remove(pos);
        drop(vts);
        vt.shutdown();
        info!("vt {}: {} unregistered", vt.index, vt.driver_name);
        Ok(())
    }

    /// 控制台所属的终端
    pub fn vt_of(&self, num: usize) -> Option<Arc<VirtualTerminal>> {
        self.vts.lock().iter().find(|vt| vt.contains(num)).cloned()
    }

    pub fn vts(&self) -> Vec<Arc<VirtualTerminal>> {
        self.vts.lock().clone()
    }
}

/// ## 根据启动参数创建终端管理器，并注册第一个显示设备
/// `vga=off` 或者VGA后端无法启动时使用dummy后端
#[inline(never)]
pub fn vty_init(
    cmdline: &KernelCmdline,
    signals: Arc<dyn SignalDelivery>,
) -> Result<VtManager, SystemError> {
    let config = VtConfig::from_cmdline(cmdline);
    printk_init(loglevel_to_filter(config.loglevel));
    let consoles = config.consoles;
    let (cols, rows) = (config.cols, config.rows);
    let manager = VtManager::new(config, signals);

    if cmdline.value_bool("vga").unwrap_or(true) {
        match manager.register_display(Arc::new(VgaConsole::new(cols, rows)), 0, consoles) {
            Ok(vt) => {
                kinfo!("vty: {} consoles on {}", consoles, vt.driver_name());
                return Ok(manager);
            }
            Err(e) => kwarn!("vgacon unavailable ({:?}), using dummy console", e),
        }
    }
    manager.register_display(dummy_console(), 0, consoles)?;
    kinfo!("vty: {} consoles on dummy device", consoles);
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        driver::video::console::{dummycon::DummyConsole, vgacon::VgaConsole},
        process::ProcessTable,
    };

    fn setup(count: usize) -> (Arc<ProcessTable>, Arc<VgaConsole>, Arc<VirtualTerminal>) {
        let procs = Arc::new(ProcessTable::new());
        let manager = VtManager::new(VtConfig::default(), procs.clone());
        let vga = Arc::new(VgaConsole::new(80, 25));
        let vt = manager.register_display(vga.clone(), 0, count).unwrap();
        (procs, vga, vt)
    }

    #[test]
    fn test_color_from_256() {
        assert_eq!(Color::from_256(1).red, 0xaa);
        assert_eq!(Color::from_256(9).red, 0xff);
        let grey = Color::from_256(232);
        assert_eq!(grey.red, 8);
        assert_eq!(grey.red, grey.blue);
        // 超出范围的下标按255处理
        assert_eq!(Color::from_256(u32::MAX), Color::from_256(255));
        assert_eq!(Color::from_256(255).red, 238);
    }

    #[test]
    fn test_register_overlap_refused() {
        let procs = Arc::new(ProcessTable::new());
        let manager = VtManager::new(VtConfig::default(), procs);
        manager
            .register_display(Arc::new(DummyConsole::new()), 0, 8)
            .unwrap();
        assert_eq!(
            manager
                .register_display(Arc::new(DummyConsole::new()), 4, 8)
                .err(),
            Some(SystemError::EBUSY)
        );
        assert_eq!(
            manager
                .register_display(Arc::new(DummyConsole::new()), 60, 8)
                .err(),
            Some(SystemError::EINVAL)
        );
        let vt = manager
            .register_display(Arc::new(DummyConsole::new()), 8, 8)
            .unwrap();
        assert_eq!(vt.index(), 1);
        assert!(Arc::ptr_eq(&manager.vt_of(9).unwrap(), &vt));
        manager.unregister_display(&vt).unwrap();
        assert!(manager.vt_of(9).is_none());
    }

    #[test]
    fn test_switch_auto_mode() {
        let (_procs, vga, vt) = setup(4);
        vt.open_console(1).unwrap();
        vt.con_write(1, b"second").unwrap();
        // 后台控制台的输出不会到达后端
        assert_eq!(vga.row_text(0), "");
        assert_eq!(vt.change_console(1).unwrap(), SwitchOutcome::Completed);
        assert_eq!(vt.fg_console(), 1);
        assert_eq!(vt.last_console(), Some(0));
        assert_eq!(vga.row_text(0), "second");
        // 已经在前台
        assert_eq!(vt.change_console(1).unwrap(), SwitchOutcome::Ignored);
        assert_eq!(vt.change_console(2).err(), Some(SystemError::ENXIO));
        assert_eq!(vt.change_console(7).err(), Some(SystemError::EINVAL));
    }

    #[test]
    fn test_graphics_console_blocks_auto_switch() {
        let (_procs, _vga, vt) = setup(4);
        vt.vc_allocate(1).unwrap();
        vt.with_console(0, |vc| vc.vc_mode = KDMode::KdGraphics)
            .unwrap();
        assert_eq!(vt.change_console(1).unwrap(), SwitchOutcome::Ignored);
        assert_eq!(vt.fg_console(), 0);
    }

    #[test]
    fn test_keyboard_switch_and_last_console() {
        let (_procs, _vga, vt) = setup(4);
        vt.vc_allocate(2).unwrap();
        // alt + F3
        vt.handle_keycode(56, true);
        vt.handle_keycode(61, true);
        vt.handle_keycode(61, false);
        vt.handle_keycode(56, false);
        assert_eq!(vt.fg_console(), 2);
        // alt + 左方向键回到上一个已分配的控制台
        vt.handle_keycode(56, true);
        vt.handle_keycode(105, true);
        vt.handle_keycode(105, false);
        vt.handle_keycode(56, false);
        assert_eq!(vt.fg_console(), 0);
    }

    #[test]
    fn test_keyboard_input_reaches_fg_console() {
        let (_procs, _vga, vt) = setup(2);
        // 'a' 的按下和松开扫描码
        vt.handle_scancode(0x1e);
        vt.handle_scancode(0x9e);
        assert_eq!(vt.take_input(0).unwrap(), b"a".to_vec());
    }

    #[test]
    fn test_disallocate_busy() {
        let (_procs, _vga, vt) = setup(4);
        vt.open_console(1).unwrap();
        assert_eq!(vt.vc_disallocate(0).err(), Some(SystemError::EBUSY));
        assert_eq!(vt.vc_disallocate(1).err(), Some(SystemError::EBUSY));
        vt.close_console(1).unwrap();
        vt.vc_disallocate(1).unwrap();
        assert!(!vt.vc_is_allocated(1));
    }

    #[test]
    fn test_blank_timer() {
        let procs = Arc::new(ProcessTable::new());
        let config = VtConfig {
            blank_timeout_secs: 1,
            ..VtConfig::default()
        };
        let manager = VtManager::new(config, procs);
        let vga = Arc::new(VgaConsole::new(80, 25));
        let vt = manager.register_display(vga.clone(), 0, 2).unwrap();
        vt.con_write(0, b"hello").unwrap();
        vt.timer_tick(999);
        assert_eq!(vt.blank_state(), VtBlankState::Unblanked);
        vt.timer_tick(1);
        assert_eq!(vt.blank_state(), VtBlankState::Blanked);
        assert!(vga.is_blanked());
        // 消隐期间的输出只进入缓冲区
        vt.con_write(0, b"\r\nworld").unwrap();
        assert_eq!(vga.row_text(1), "");
        vt.handle_keycode(30, true);
        assert_eq!(vt.blank_state(), VtBlankState::Unblanked);
        assert!(!vga.is_blanked());
        assert_eq!(vga.row_text(1), "world");
    }

    #[test]
    fn test_scrollback_view_snaps_on_output() {
        let (_procs, vga, vt) = setup(2);
        for i in 0..30 {
            vt.con_write(0, format!("line {}\r\n", i).as_bytes())
                .unwrap();
        }
        assert_eq!(vga.row_text(0), "line 6");
        vt.scrollback(2);
        assert_eq!(vt.scrollback_delta(), 2);
        assert_eq!(vga.row_text(0), "line 4");
        vt.scrollfront(1);
        assert_eq!(vga.row_text(0), "line 5");
        vt.con_write(0, b"x").unwrap();
        assert_eq!(vt.scrollback_delta(), 0);
        assert_eq!(vga.row_text(0), "line 6");
    }

    #[test]
    fn test_bell_only_on_fg() {
        let (_procs, _vga, vt) = setup(2);
        vt.vc_allocate(1).unwrap();
        vt.con_write(1, b"\x07").unwrap();
        assert_eq!(vt.bells(), 0);
        vt.con_write(0, b"\x07").unwrap();
        assert_eq!(vt.bells(), 1);
    }

    #[test]
    fn test_vty_init_selects_backend() {
        let procs = Arc::new(ProcessTable::new());
        let cmdline = KernelCmdline::parse("vt.consoles=6 consoleblank=0");
        let manager = vty_init(&cmdline, procs.clone()).unwrap();
        let vt = manager.vt_of(0).unwrap();
        assert_eq!(vt.driver_name(), "VGA+");
        assert_eq!(vt.vc_count(), 6);
        assert!(manager.vt_of(6).is_none());

        let cmdline = KernelCmdline::parse("vga=off");
        let manager = vty_init(&cmdline, procs).unwrap();
        assert_eq!(manager.vt_of(0).unwrap().driver_name(), "dummy device");
    }

    #[test]
    fn test_setterm_brings_console_to_front() {
        let (_procs, _vga, vt) = setup(4);
        vt.vc_allocate(2).unwrap();
        vt.con_write(0, b"\x1b[12;3]").unwrap();
        assert_eq!(vt.fg_console(), 2);
    }
}
