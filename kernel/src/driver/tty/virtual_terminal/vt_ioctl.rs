//! 虚拟终端的ioctl：VT_*、KD*、字体、调色板、翻译表以及 TIOCLINUX

use std::sync::Arc;

use log::{debug, info, warn};
use system_error::SystemError;

use crate::{
    driver::{
        keyboard::{
            kbd::{VcKbdMode, VcKbdModeType},
            keymap::KbDiacr,
        },
        tty::{console::BlankMode, ConsoleFont, KDMode},
    },
    ipc::signal::Signal,
    libs::wait_queue::CancelToken,
    process::Pid,
};

use super::{
    console_map::{self, E_TABSZ},
    selection::SelectionArg,
    Color, InnerVirtualTerminal, SwitchOutcome, VirtualTerminal, VtManager, VtMode, VtModeData,
    MAX_NR_CONSOLES,
};

pub struct VtIoctlCmd;

#[allow(dead_code)]
impl VtIoctlCmd {
    /// 查找第一个空闲的控制台
    pub const VT_OPENQRY: u32 = 0x5600;
    /// 获取切换模式
    pub const VT_GETMODE: u32 = 0x5601;
    /// 设置切换模式
    pub const VT_SETMODE: u32 = 0x5602;
    /// 获取前台控制台以及各控制台的使用情况
    pub const VT_GETSTATE: u32 = 0x5603;
    /// 控制进程确认（或拒绝）切换
    pub const VT_RELDISP: u32 = 0x5605;
    /// 切换到指定控制台
    pub const VT_ACTIVATE: u32 = 0x5606;
    /// 等待指定控制台成为前台
    pub const VT_WAITACTIVE: u32 = 0x5607;
    /// 释放控制台
    pub const VT_DISALLOCATE: u32 = 0x5608;
    /// 调整所有控制台的尺寸
    pub const VT_RESIZE: u32 = 0x5609;
    pub const VT_RESIZEX: u32 = 0x560A;
    /// 禁止切换
    pub const VT_LOCKSWITCH: u32 = 0x560B;
    /// 允许切换
    pub const VT_UNLOCKSWITCH: u32 = 0x560C;

    pub const KDGETLED: u32 = 0x4B31;
    pub const KDSETLED: u32 = 0x4B32;
    pub const KDGKBTYPE: u32 = 0x4B33;
    pub const KDSETMODE: u32 = 0x4B3A;
    pub const KDGETMODE: u32 = 0x4B3B;
    pub const GIO_SCRNMAP: u32 = 0x4B40;
    pub const PIO_SCRNMAP: u32 = 0x4B41;
    pub const KDGKBMODE: u32 = 0x4B44;
    pub const KDSKBMODE: u32 = 0x4B45;
    pub const KDGKBENT: u32 = 0x4B46;
    pub const KDSKBENT: u32 = 0x4B47;
    pub const KDGKBSENT: u32 = 0x4B48;
    pub const KDSKBSENT: u32 = 0x4B49;
    pub const KDGKBDIACR: u32 = 0x4B4A;
    pub const KDSKBDIACR: u32 = 0x4B4B;
    /// 登记 spawn_console 按键的接收进程
    pub const KDSIGACCEPT: u32 = 0x4B4E;
    pub const GIO_FONT: u32 = 0x4B60;
    pub const PIO_FONT: u32 = 0x4B61;
    pub const KDGKBMETA: u32 = 0x4B62;
    pub const KDSKBMETA: u32 = 0x4B63;
    pub const KDGKBLED: u32 = 0x4B64;
    pub const KDSKBLED: u32 = 0x4B65;
    pub const GIO_UNISCRNMAP: u32 = 0x4B69;
    pub const PIO_UNISCRNMAP: u32 = 0x4B6A;
    pub const GIO_CMAP: u32 = 0x4B70;
    pub const PIO_CMAP: u32 = 0x4B71;
    pub const KDFONTOP: u32 = 0x4B72;

    /// Linux 特有命令
    pub const TIOCLINUX: u32 = 0x541C;
}

/// KDGKBTYPE 的返回值
pub const KB_101: i32 = 0x02;
/// KDGKBMETA：置最高位
pub const K_METABIT: u32 = 0x03;
/// KDGKBMETA：先发送ESC
pub const K_ESCPREFIX: u32 = 0x04;

/// KDFONTOP 的操作码
pub const KD_FONT_OP_SET: u32 = 0;
pub const KD_FONT_OP_GET: u32 = 1;
pub const KD_FONT_OP_SET_DEFAULT: u32 = 2;
pub const KD_FONT_OP_COPY: u32 = 3;

/// PIO_FONT/GIO_FONT 使用的旧式字体：256个8位宽的字形
const OLD_FONT_COUNT: u32 = 256;
const MAX_FONT_GLYPHS: u32 = 512;
const MAX_FONT_DIM: u32 = 32;

/// 发起ioctl的进程
#[derive(Debug, Clone)]
pub struct IoctlContext {
    pub pid: Pid,
    /// 该控制台是否是调用者的控制终端
    pub owner: bool,
    pub cap_sys_tty_config: bool,
    pub cap_sys_admin: bool,
    pub cap_kill: bool,
    /// 取消 VT_WAITACTIVE 的等待
    pub cancel: Arc<CancelToken>,
}

impl IoctlContext {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            owner: true,
            cap_sys_tty_config: false,
            cap_sys_admin: false,
            cap_kill: false,
            cancel: CancelToken::new(),
        }
    }

    /// 控制终端的拥有者或者具有 CAP_SYS_TTY_CONFIG 的进程可以修改终端
    #[inline]
    pub fn has_perm(&self) -> bool {
        self.owner || self.cap_sys_tty_config
    }
}

/// VT_GETMODE/VT_SETMODE 在用户空间的表示
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VtModeArg {
    pub mode: u8,
    pub waitv: u8,
    pub relsig: i16,
    pub acqsig: i16,
    pub frsig: i16,
}

impl From<&VtModeData> for VtModeArg {
    fn from(data: &VtModeData) -> Self {
        Self {
            mode: data.mode.to_raw(),
            waitv: data.waitv,
            relsig: data.relsig.map(|s| s.number() as i16).unwrap_or(0),
            acqsig: data.acqsig.map(|s| s.number() as i16).unwrap_or(0),
            frsig: data.frsig,
        }
    }
}

impl VtModeArg {
    fn to_mode_data(self) -> Result<VtModeData, SystemError> {
        let mode = VtMode::from_raw(self.mode).ok_or(SystemError::EINVAL)?;
        Ok(VtModeData {
            mode,
            waitv: self.waitv,
            relsig: Signal::from_user(self.relsig as i32)?,
            acqsig: Signal::from_user(self.acqsig as i32)?,
            // frsig不使用
            frsig: 0,
        })
    }
}

/// VT_GETSTATE
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VtStat {
    /// 前台控制台，从1开始
    pub v_active: u16,
    pub v_signal: u16,
    /// 第n位表示n-1号控制台正在使用
    pub v_state: u16,
}

/// VT_RESIZE
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VtSizes {
    pub v_rows: u16,
    pub v_cols: u16,
    pub v_scrollsize: u16,
}

/// VT_RESIZEX，为0的字段表示不修改
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VtConsize {
    pub v_rows: u16,
    pub v_cols: u16,
    pub v_vlin: u16,
    pub v_clin: u16,
    pub v_vcol: u16,
    pub v_ccol: u16,
}

/// KDGKBENT/KDSKBENT
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KbEntry {
    pub kb_table: u8,
    pub kb_index: u8,
    pub kb_value: u16,
}

/// KDGKBSENT/KDSKBSENT
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KbSentry {
    pub kb_func: u8,
    pub kb_string: Vec<u8>,
}

/// KDFONTOP
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleFontOp {
    pub op: u32,
    pub flags: u32,
    pub width: u32,
    /// 复制字体时是源控制台的编号
    pub height: u32,
    pub charcount: u32,
    /// 设置默认字体时是字体名
    pub data: Vec<u8>,
}

/// TIOCLINUX 的子命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiocLinux {
    SetSelection(SelectionArg),
    PasteSelection,
    UnblankScreen,
    GetShiftState,
    GetMouseReporting,
    SetVesaBlank(u8),
    GetFgConsole,
    /// 正数向前，负数向后回滚
    ScrollConsole(i32),
    Other(u8),
}

impl TiocLinux {
    pub const TIOCL_SETSEL: u8 = 2;
    pub const TIOCL_PASTESEL: u8 = 3;
    pub const TIOCL_UNBLANKSCREEN: u8 = 4;
    pub const TIOCL_GETSHIFTSTATE: u8 = 6;
    pub const TIOCL_GETMOUSEREPORTING: u8 = 7;
    pub const TIOCL_SETVESABLANK: u8 = 10;
    pub const TIOCL_GETFGCONSOLE: u8 = 12;
    pub const TIOCL_SCROLLCONSOLE: u8 = 13;

    pub fn subcode(&self) -> u8 {
        match self {
            TiocLinux::SetSelection(_) => Self::TIOCL_SETSEL,
            TiocLinux::PasteSelection => Self::TIOCL_PASTESEL,
            TiocLinux::UnblankScreen => Self::TIOCL_UNBLANKSCREEN,
            TiocLinux::GetShiftState => Self::TIOCL_GETSHIFTSTATE,
            TiocLinux::GetMouseReporting => Self::TIOCL_GETMOUSEREPORTING,
            TiocLinux::SetVesaBlank(_) => Self::TIOCL_SETVESABLANK,
            TiocLinux::GetFgConsole => Self::TIOCL_GETFGCONSOLE,
            TiocLinux::ScrollConsole(_) => Self::TIOCL_SCROLLCONSOLE,
            TiocLinux::Other(code) => *code,
        }
    }
}

/// ioctl的参数，对应用户空间传入的结构
#[derive(Debug, Clone)]
pub enum IoctlArg {
    None,
    Int(u32),
    Mode(VtModeArg),
    Sizes(VtSizes),
    SizesX(VtConsize),
    KbEntry(KbEntry),
    KbSentry(KbSentry),
    Diacrs(Vec<KbDiacr>),
    /// PIO_FONT：256个字形，每个32字节
    FontData(Vec<u8>),
    FontOp(ConsoleFontOp),
    /// 16种颜色的 r,g,b
    Cmap([u8; 48]),
    ScrnMap(Box<[u8; E_TABSZ]>),
    UniScrnMap(Box<[u16; E_TABSZ]>),
    Linux(TiocLinux),
}

/// ioctl写回给用户的数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoctlRet {
    None,
    Int(i32),
    Mode(VtModeArg),
    State(VtStat),
    Entry(u16),
    Sentry(Vec<u8>),
    Diacrs(Vec<KbDiacr>),
    FontData(Vec<u8>),
    FontOp(ConsoleFontOp),
    Cmap([u8; 48]),
    ScrnMap(Box<[u8; E_TABSZ]>),
    UniScrnMap(Box<[u16; E_TABSZ]>),
}

impl IoctlRet {
    /// ## 转换为系统调用的返回值
    /// 错误返回负的errno
    pub fn to_posix(result: &Result<IoctlRet, SystemError>) -> i32 {
        match result {
            Ok(IoctlRet::Int(v)) => *v,
            Ok(_) => 0,
            Err(e) => e.to_posix_errno(),
        }
    }
}

impl IoctlArg {
    fn int(&self) -> Result<u32, SystemError> {
        match self {
            IoctlArg::Int(v) => Ok(*v),
            _ => Err(SystemError::EFAULT),
        }
    }
}

/// 参数不是期望的结构时返回EFAULT
macro_rules! expect_arg {
    ($arg:expr, $variant:path) => {
        match $arg {
            $variant(v) => v,
            _ => return Err(SystemError::EFAULT),
        }
    };
}

impl VtManager {
    /// ## 在控制台上执行ioctl
    /// ### 参数
    /// - ctx: 调用者
    /// - console: 控制台编号，从0开始
    /// - cmd: 命令号
    /// - arg: 参数
    pub fn vt_ioctl(
        &self,
        ctx: &IoctlContext,
        console: usize,
        cmd: u32,
        arg: IoctlArg,
    ) -> Result<IoctlRet, SystemError> {
        if console >= MAX_NR_CONSOLES {
            return Err(SystemError::ENXIO);
        }
        let vt = self.vt_of(console).ok_or(SystemError::ENXIO)?;
        vt.ioctl(ctx, console, cmd, arg)
    }
}

impl VirtualTerminal {
    pub fn ioctl(
        &self,
        ctx: &IoctlContext,
        console: usize,
        cmd: u32,
        arg: IoctlArg,
    ) -> Result<IoctlRet, SystemError> {
        let perm = ctx.has_perm();

        // 需要在锁外等待
        if cmd == VtIoctlCmd::VT_WAITACTIVE {
            if !perm {
                return Err(SystemError::EPERM);
            }
            let num = arg.int()? as usize;
            if num == 0 || num > MAX_NR_CONSOLES {
                return Err(SystemError::ENXIO);
            }
            self.wait_active(num - 1, &ctx.cancel)?;
            return Ok(IoctlRet::None);
        }

        let mut guard = self.lock();
        let inner: &mut InnerVirtualTerminal = &mut guard;
        inner.vc(console)?;

        let mut switched = false;
        let ret = match cmd {
            VtIoctlCmd::KDGKBTYPE => Ok(IoctlRet::Int(KB_101)),

            VtIoctlCmd::KDSETMODE => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let mode = KDMode::from_raw(arg.int()?).ok_or(SystemError::EINVAL)?;
                // TEXT0/TEXT1 都当作文本模式
                let mode = if mode.is_text() { KDMode::KdText } else { mode };
                Self::kd_set_mode(inner, console, mode)?;
                Ok(IoctlRet::None)
            }
            VtIoctlCmd::KDGETMODE => Ok(IoctlRet::Int(inner.vc(console)?.vc_mode.to_raw() as i32)),

            VtIoctlCmd::KDSKBMODE => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let mode = VcKbdModeType::from_raw(arg.int()?).ok_or(SystemError::EINVAL)?;
                let vc = inner.vc_mut(console)?;
                vc.kbd.kbdmode = mode;
                // 丢弃旧模式下产生的输入
                vc.port.take_input();
                if mode == VcKbdModeType::Xlate || mode == VcKbdModeType::Unicode {
                    inner.keyboard.compute_shiftstate();
                }
                Ok(IoctlRet::None)
            }
            VtIoctlCmd::KDGKBMODE => Ok(IoctlRet::Int(inner.vc(console)?.kbd.kbdmode.to_raw() as i32)),

            VtIoctlCmd::KDSKBMETA => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let vc = inner.vc_mut(console)?;
                match arg.int()? {
                    K_METABIT => vc.kbd.clear_mode(VcKbdMode::META),
                    K_ESCPREFIX => vc.kbd.set_mode(VcKbdMode::META),
                    _ => return Err(SystemError::EINVAL),
                }
                Ok(IoctlRet::None)
            }
            VtIoctlCmd::KDGKBMETA => {
                let meta = inner.vc(console)?.kbd.is_mode(VcKbdMode::META);
                Ok(IoctlRet::Int(if meta { K_ESCPREFIX } else { K_METABIT } as i32))
            }

            VtIoctlCmd::KDGKBENT => {
                let entry = expect_arg!(arg, IoctlArg::KbEntry);
                let kbdmode = inner.vc(console)?.kbd.kbdmode;
                let value = inner.keyboard.get_entry(
                    entry.kb_table as usize,
                    entry.kb_index as usize,
                    kbdmode,
                )?;
                Ok(IoctlRet::Entry(value))
            }
            VtIoctlCmd::KDSKBENT => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let entry = expect_arg!(arg, IoctlArg::KbEntry);
                let kbdmode = inner.vc(console)?.kbd.kbdmode;
                inner.keyboard.set_entry(
                    entry.kb_table as usize,
                    entry.kb_index as usize,
                    entry.kb_value,
                    kbdmode,
                    ctx.cap_sys_admin,
                )?;
                Ok(IoctlRet::None)
            }
            VtIoctlCmd::KDGKBSENT => {
                let sentry = expect_arg!(arg, IoctlArg::KbSentry);
                Ok(IoctlRet::Sentry(
                    inner.keyboard.get_func(sentry.kb_func as usize)?,
                ))
            }
            VtIoctlCmd::KDSKBSENT => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let sentry = expect_arg!(arg, IoctlArg::KbSentry);
                inner
                    .keyboard
                    .set_func(sentry.kb_func as usize, &sentry.kb_string)?;
                Ok(IoctlRet::None)
            }
            VtIoctlCmd::KDGKBDIACR => Ok(IoctlRet::Diacrs(inner.keyboard.get_accent_table())),
            VtIoctlCmd::KDSKBDIACR => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let table = expect_arg!(arg, IoctlArg::Diacrs);
                inner.keyboard.set_accent_table(&table)?;
                Ok(IoctlRet::None)
            }

            VtIoctlCmd::KDGETLED => Ok(IoctlRet::Int(inner.keyboard.ledstate() as i32)),
            VtIoctlCmd::KDSETLED => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let led = arg.int()?.min(0xff) as u8;
                inner.vc_mut(console)?.kbd.set_led_state(led);
                Self::sync_leds(inner, console);
                Ok(IoctlRet::None)
            }
            VtIoctlCmd::KDGKBLED => Ok(IoctlRet::Int(
                inner.vc(console)?.kbd.get_led_flags() as i32,
            )),
            VtIoctlCmd::KDSKBLED => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                inner.vc_mut(console)?.kbd.set_led_flags(arg.int()?)?;
                Self::sync_leds(inner, console);
                Ok(IoctlRet::None)
            }

            VtIoctlCmd::KDSIGACCEPT => {
                if !perm || !ctx.cap_kill {
                    return Err(SystemError::EPERM);
                }
                let sig = arg.int()? as i32;
                match Signal::from_user(sig)? {
                    Some(Signal::SIGKILL) | None => return Err(SystemError::EINVAL),
                    Some(sig) => inner.keyboard.set_spawn(Some((ctx.pid, sig))),
                }
                Ok(IoctlRet::None)
            }

            VtIoctlCmd::VT_SETMODE => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let mode = expect_arg!(arg, IoctlArg::Mode).to_mode_data()?;
                let vc = inner.vc_mut(console)?;
                vc.vt_mode = mode;
                vc.vt_pid = Some(ctx.pid);
                // 不需要切换
                vc.vt_newvt = -1;
                debug!(
                    "vc {}: switch mode {:?} owned by pid {}",
                    console, mode.mode, ctx.pid
                );
                Ok(IoctlRet::None)
            }
            VtIoctlCmd::VT_GETMODE => Ok(IoctlRet::Mode(VtModeArg::from(
                &inner.vc(console)?.vt_mode,
            ))),

            VtIoctlCmd::VT_GETSTATE => {
                let mut state: u16 = 1;
                for num in inner.first_vc..inner.first_vc + inner.consoles.len() {
                    if num + 1 >= 16 {
                        break;
                    }
                    if Self::vt_in_use(inner, num) {
                        state |= 1 << (num + 1);
                    }
                }
                Ok(IoctlRet::State(VtStat {
                    v_active: (inner.fg_console + 1) as u16,
                    v_signal: 0,
                    v_state: state,
                }))
            }

            VtIoctlCmd::VT_OPENQRY => {
                let free = (inner.first_vc..inner.first_vc + inner.consoles.len())
                    .find(|num| !Self::vt_in_use(inner, *num));
                Ok(IoctlRet::Int(match free {
                    Some(num) => (num + 1) as i32,
                    None => -1,
                }))
            }

            VtIoctlCmd::VT_ACTIVATE => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let num = arg.int()? as usize;
                if num == 0 || num > MAX_NR_CONSOLES {
                    return Err(SystemError::ENXIO);
                }
                let num = num - 1;
                inner.vc_allocate(num, false)?;
                let outcome = inner.set_console(num, self.signals());
                switched = outcome == SwitchOutcome::Completed;
                Ok(IoctlRet::None)
            }

            VtIoctlCmd::VT_RELDISP => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let ack = arg.int()?;
                switched = self.reldisp(inner, ctx, console, ack)?;
                Ok(IoctlRet::None)
            }

            VtIoctlCmd::VT_DISALLOCATE => {
                let num = arg.int()? as usize;
                if num > MAX_NR_CONSOLES {
                    return Err(SystemError::ENXIO);
                }
                if num == 0 {
                    // 释放所有空闲的控制台，第一个控制台保留
                    let first = inner.first_vc;
                    for n in first + 1..first + inner.consoles.len() {
                        if inner.is_allocated(n) && !inner.vt_busy(n) {
                            inner.vc_disallocate(n)?;
                        }
                    }
                } else {
                    let num = num - 1;
                    inner.slot(num)?;
                    if inner.vt_busy(num) {
                        return Err(SystemError::EBUSY);
                    }
                    if num != inner.first_vc {
                        inner.vc_disallocate(num)?;
                    }
                }
                Ok(IoctlRet::None)
            }

            VtIoctlCmd::VT_RESIZE => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let sizes = expect_arg!(arg, IoctlArg::Sizes);
                Self::resize_all(inner, sizes.v_cols as usize, sizes.v_rows as usize, None)?;
                Ok(IoctlRet::None)
            }
            VtIoctlCmd::VT_RESIZEX => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let size = expect_arg!(arg, IoctlArg::SizesX);
                let (cols, rows, font_height) = Self::resizex_target(inner, console, &size)?;
                Self::resize_all(inner, cols, rows, font_height)?;
                Ok(IoctlRet::None)
            }

            VtIoctlCmd::VT_LOCKSWITCH => {
                if !ctx.cap_sys_tty_config {
                    return Err(SystemError::EPERM);
                }
                inner.set_dont_switch(true);
                Ok(IoctlRet::None)
            }
            VtIoctlCmd::VT_UNLOCKSWITCH => {
                if !ctx.cap_sys_tty_config {
                    return Err(SystemError::EPERM);
                }
                inner.set_dont_switch(false);
                Ok(IoctlRet::None)
            }

            VtIoctlCmd::PIO_FONT => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let data = expect_arg!(arg, IoctlArg::FontData);
                let font = ConsoleFont {
                    width: 8,
                    height: 0,
                    count: OLD_FONT_COUNT,
                    data,
                };
                Self::font_set(inner, console, font, 0)?;
                Ok(IoctlRet::None)
            }
            VtIoctlCmd::GIO_FONT => {
                let font = Self::font_get(inner, console, 8, MAX_FONT_DIM, OLD_FONT_COUNT)?;
                if font.width != 8 {
                    return Err(SystemError::EINVAL);
                }
                let mut data = font.data;
                data.resize(ConsoleFont::glyph_stride(8) * OLD_FONT_COUNT as usize, 0);
                Ok(IoctlRet::FontData(data))
            }
            VtIoctlCmd::KDFONTOP => {
                let op = expect_arg!(arg, IoctlArg::FontOp);
                if op.op != KD_FONT_OP_GET && !perm {
                    return Err(SystemError::EPERM);
                }
                Self::font_op(inner, console, op)
            }

            VtIoctlCmd::GIO_CMAP => {
                let config = &inner.config;
                let mut cmap = [0u8; 48];
                for i in 0..16 {
                    cmap[i * 3] = config.default_red[i];
                    cmap[i * 3 + 1] = config.default_green[i];
                    cmap[i * 3 + 2] = config.default_blue[i];
                }
                Ok(IoctlRet::Cmap(cmap))
            }
            VtIoctlCmd::PIO_CMAP => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let cmap = expect_arg!(arg, IoctlArg::Cmap);
                Self::set_cmap(inner, &cmap);
                Ok(IoctlRet::None)
            }

            VtIoctlCmd::GIO_SCRNMAP => Ok(IoctlRet::ScrnMap(Box::new(
                console_map::con_get_trans_old(&inner.user_map),
            ))),
            VtIoctlCmd::PIO_SCRNMAP => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let map = expect_arg!(arg, IoctlArg::ScrnMap);
                console_map::con_set_trans_old(&inner.user_map, &map);
                Ok(IoctlRet::None)
            }
            VtIoctlCmd::GIO_UNISCRNMAP => Ok(IoctlRet::UniScrnMap(Box::new(
                console_map::con_get_trans_new(&inner.user_map),
            ))),
            VtIoctlCmd::PIO_UNISCRNMAP => {
                if !perm {
                    return Err(SystemError::EPERM);
                }
                let map = expect_arg!(arg, IoctlArg::UniScrnMap);
                console_map::con_set_trans_new(&inner.user_map, &map);
                Ok(IoctlRet::None)
            }

            VtIoctlCmd::TIOCLINUX => {
                let sub = expect_arg!(arg, IoctlArg::Linux);
                Self::tioclinux(inner, console, sub)
            }

            _ => Err(SystemError::ENOIOCTLCMD),
        };

        self.finish(inner, switched);
        return ret;
    }

    /// ## VT_RELDISP
    /// 释放确认完成切换时返回true
    fn reldisp(
        &self,
        inner: &mut InnerVirtualTerminal,
        ctx: &IoctlContext,
        console: usize,
        ack: u32,
    ) -> Result<bool, SystemError> {
        let vc = inner.vc(console)?;
        if vc.vt_mode.mode != VtMode::Process {
            return Err(SystemError::EINVAL);
        }
        if vc.vt_pid != Some(ctx.pid) {
            return Err(SystemError::EPERM);
        }

        if vc.vt_newvt >= 0 {
            let newvt = vc.vt_newvt as usize;
            if ack == 0 {
                // 控制进程拒绝切换
                inner.vc_mut(console)?.vt_newvt = -1;
                info!("vc {}: switch to {} denied by pid {}", console, newvt, ctx.pid);
                return Ok(false);
            }
            inner.vc_mut(console)?.vt_newvt = -1;
            inner.vc_allocate(newvt, false)?;
            let outcome = inner.complete_change_console(newvt, self.signals());
            return Ok(outcome == SwitchOutcome::Completed);
        }

        if ack != VtMode::VT_ACKACQ {
            return Err(SystemError::EINVAL);
        }
        inner.vc_mut(console)?.acquire_pending = false;
        return Ok(false);
    }

    /// 控制台是否正在被使用（已经打开）
    fn vt_in_use(inner: &InnerVirtualTerminal, num: usize) -> bool {
        match inner.vc(num) {
            Ok(vc) => vc.port.is_open(),
            Err(_) => false,
        }
    }

    fn sync_leds(inner: &mut InnerVirtualTerminal, console: usize) {
        if console != inner.fg_console {
            return;
        }
        if let Ok(vc) = inner.vc(console) {
            let kbd = vc.kbd.clone();
            inner.keyboard.update_leds(&kbd);
        }
    }

    /// ## KDSETMODE
    /// 前台控制台进入图形模式时消隐，回到文本模式时重绘
    fn kd_set_mode(
        inner: &mut InnerVirtualTerminal,
        console: usize,
        mode: KDMode,
    ) -> Result<(), SystemError> {
        let fg = inner.fg_console;
        let blanked = inner.blank_state != super::VtBlankState::Unblanked;
        let driver = inner.driver().clone();
        let vc = inner.vc_mut(console)?;
        if vc.vc_mode == mode {
            return Ok(());
        }
        if console != fg {
            vc.vc_mode = mode;
            return Ok(());
        }

        if mode == KDMode::KdText {
            vc.vc_mode = mode;
            vc.set_blanked(blanked);
            if !blanked {
                driver.con_blank(vc, BlankMode::Unblank, true);
                vc.set_palette();
                vc.update_screen();
            }
        } else {
            vc.hide_cursor();
            vc.vc_mode = mode;
            driver.con_blank(vc, BlankMode::Normal, true);
            vc.set_blanked(true);
        }
        debug!("vc {}: kd mode {:?}", console, mode);
        Ok(())
    }

    /// ## 调整终端上所有控制台的尺寸
    /// 任何一个控制台无法调整时不做任何修改
    fn resize_all(
        inner: &mut InnerVirtualTerminal,
        cols: usize,
        rows: usize,
        font_height: Option<u32>,
    ) -> Result<(), SystemError> {
        for vc in inner.consoles.iter().flatten() {
            vc.resize_check(cols, rows)?;
        }

        inner.clear_selection();
        inner.scrollback_delta = 0;
        for vc in inner.consoles.iter_mut().flatten() {
            if let Some(height) = font_height {
                vc.font.height = height;
            }
            vc.resize_apply(cols, rows);
        }
        inner.config.cols = cols;
        inner.config.rows = rows;
        info!("vt: all consoles resized to {}x{}", cols, rows);
        Ok(())
    }

    /// VT_RESIZEX 的目标尺寸。像素尺寸与字符尺寸同时给出时必须一致
    fn resizex_target(
        inner: &InnerVirtualTerminal,
        console: usize,
        size: &VtConsize,
    ) -> Result<(usize, usize, Option<u32>), SystemError> {
        let vc = inner.vc(console)?;
        let mut rows = size.v_rows as usize;
        let mut cols = size.v_cols as usize;

        if size.v_clin as u32 > MAX_FONT_DIM {
            return Err(SystemError::EINVAL);
        }
        if size.v_vlin != 0 && size.v_clin != 0 {
            let r = (size.v_vlin / size.v_clin) as usize;
            if rows != 0 && rows != r {
                return Err(SystemError::EINVAL);
            }
            rows = r;
        }
        if size.v_vcol != 0 && size.v_ccol != 0 {
            let c = (size.v_vcol / size.v_ccol) as usize;
            if cols != 0 && cols != c {
                return Err(SystemError::EINVAL);
            }
            cols = c;
        }
        if rows == 0 {
            rows = vc.rows;
        }
        if cols == 0 {
            cols = vc.cols;
        }
        let font_height = if size.v_clin != 0 {
            Some(size.v_clin as u32)
        } else {
            None
        };
        Ok((cols, rows, font_height))
    }

    /// 从字形数据推算字体高度：最后一个非空行
    fn guess_font_height(font: &ConsoleFont) -> u32 {
        let stride = ConsoleFont::glyph_stride(font.width);
        let row_bytes = stride / MAX_FONT_DIM as usize;
        for h in (1..=MAX_FONT_DIM as usize).rev() {
            let used = font.data.chunks(stride).any(|glyph| {
                glyph
                    .iter()
                    .skip((h - 1) * row_bytes)
                    .take(row_bytes)
                    .any(|b| *b != 0)
            });
            if used {
                return h as u32;
            }
        }
        return 0;
    }

    /// ## 设置字体
    /// 后端设置失败时恢复默认字体，并返回后端的错误
    fn font_set(
        inner: &mut InnerVirtualTerminal,
        console: usize,
        mut font: ConsoleFont,
        flags: u32,
    ) -> Result<(), SystemError> {
        let driver = inner.driver().clone();
        let vc = inner.vc_mut(console)?;
        if vc.vc_mode != KDMode::KdText {
            return Err(SystemError::EINVAL);
        }
        if font.count == 0
            || font.count > MAX_FONT_GLYPHS
            || font.width == 0
            || font.width > MAX_FONT_DIM
        {
            return Err(SystemError::EINVAL);
        }
        if font.data.len() < font.expected_len() {
            return Err(SystemError::EINVAL);
        }
        font.data.truncate(font.expected_len());
        if font.height == 0 {
            font.height = Self::guess_font_height(&font);
        }
        if font.height == 0 || font.height > MAX_FONT_DIM {
            return Err(SystemError::EINVAL);
        }

        match driver.con_font_set(vc, &font, flags) {
            Ok(()) => {
                vc.set_font_info(&font);
                vc.update_screen();
                debug!(
                    "vc {}: font {}x{} with {} glyphs",
                    console, font.width, font.height, font.count
                );
                Ok(())
            }
            Err(e) => {
                warn!("vc {}: font set failed ({:?}), restoring default", console, e);
                if let Ok(default) = driver.con_font_default(vc, None) {
                    vc.set_font_info(&default);
                }
                Err(e)
            }
        }
    }

    /// 读取字体，字体超出调用者给定的上限时返回ENOSPC
    fn font_get(
        inner: &InnerVirtualTerminal,
        console: usize,
        max_width: u32,
        max_height: u32,
        max_count: u32,
    ) -> Result<ConsoleFont, SystemError> {
        let vc = inner.vc(console)?;
        if vc.vc_mode != KDMode::KdText {
            return Err(SystemError::EINVAL);
        }
        let font = inner.driver().con_font_get(vc)?;
        if font.width > max_width || font.height > max_height || font.count > max_count {
            return Err(SystemError::ENOSPC);
        }
        Ok(font)
    }

    fn font_op(
        inner: &mut InnerVirtualTerminal,
        console: usize,
        op: ConsoleFontOp,
    ) -> Result<IoctlRet, SystemError> {
        match op.op {
            KD_FONT_OP_SET => {
                let font = ConsoleFont {
                    width: op.width,
                    height: op.height,
                    count: op.charcount,
                    data: op.data,
                };
                Self::font_set(inner, console, font, op.flags)?;
                Ok(IoctlRet::None)
            }
            KD_FONT_OP_GET => {
                let max_width = if op.width == 0 { MAX_FONT_DIM } else { op.width };
                let max_height = if op.height == 0 { MAX_FONT_DIM } else { op.height };
                let max_count = if op.charcount == 0 {
                    MAX_FONT_GLYPHS
                } else {
                    op.charcount
                };
                let font = Self::font_get(inner, console, max_width, max_height, max_count)?;
                Ok(IoctlRet::FontOp(ConsoleFontOp {
                    op: op.op,
                    flags: op.flags,
                    width: font.width,
                    height: font.height,
                    charcount: font.count,
                    data: font.data,
                }))
            }
            KD_FONT_OP_SET_DEFAULT => {
                let name = if op.data.is_empty() {
                    None
                } else {
                    Some(core::str::from_utf8(&op.data).map_err(|_| SystemError::EINVAL)?)
                };
                let driver = inner.driver().clone();
                let vc = inner.vc_mut(console)?;
                if vc.vc_mode != KDMode::KdText {
                    return Err(SystemError::EINVAL);
                }
                let font = driver.con_font_default(vc, name)?;
                vc.set_font_info(&font);
                vc.update_screen();
                Ok(IoctlRet::FontOp(ConsoleFontOp {
                    op: op.op,
                    flags: op.flags,
                    width: font.width,
                    height: font.height,
                    charcount: font.count,
                    data: Vec::new(),
                }))
            }
            KD_FONT_OP_COPY => {
                let src = op.height as usize;
                if src >= MAX_NR_CONSOLES || !inner.is_allocated(src) {
                    return Err(SystemError::ENOTTY);
                }
                if src == console {
                    return Ok(IoctlRet::None);
                }
                let src_font = inner.vc(src)?.font.clone();
                let driver = inner.driver().clone();
                let vc = inner.vc_mut(console)?;
                if vc.vc_mode != KDMode::KdText {
                    return Err(SystemError::EINVAL);
                }
                driver.con_font_copy(vc, src)?;
                vc.set_font_info(&src_font);
                vc.update_screen();
                Ok(IoctlRet::None)
            }
            _ => Err(SystemError::ENOSYS),
        }
    }

    /// ## PIO_CMAP
    /// 修改默认调色板，所有控制台立即使用新的颜色
    fn set_cmap(inner: &mut InnerVirtualTerminal, cmap: &[u8; 48]) {
        for i in 0..16 {
            inner.config.default_red[i] = cmap[i * 3];
            inner.config.default_green[i] = cmap[i * 3 + 1];
            inner.config.default_blue[i] = cmap[i * 3 + 2];
        }
        let mut palette = [Color::default(); 16];
        for (i, color) in palette.iter_mut().enumerate() {
            color.red = inner.config.default_red[i] as u16;
            color.green = inner.config.default_green[i] as u16;
            color.blue = inner.config.default_blue[i] as u16;
        }
        for vc in inner.consoles.iter_mut().flatten() {
            vc.default_palette = palette;
            vc.palette = palette;
            vc.set_palette();
        }
    }

    fn tioclinux(
        inner: &mut InnerVirtualTerminal,
        console: usize,
        sub: TiocLinux,
    ) -> Result<IoctlRet, SystemError> {
        match sub {
            TiocLinux::SetSelection(arg) => {
                let fg = inner.fg_console;
                if let Some(owner) = inner.selection.console() {
                    if owner != fg {
                        inner.clear_selection();
                    }
                }
                let slot = inner.slot(fg)?;
                let vc = inner.consoles[slot]
                    .as_deref_mut()
                    .ok_or(SystemError::ENXIO)?;
                inner.selection.set(vc, &arg)?;
                Ok(IoctlRet::None)
            }
            TiocLinux::PasteSelection => {
                let slot = inner.slot(console)?;
                let vc = inner.consoles[slot]
                    .as_deref_mut()
                    .ok_or(SystemError::ENXIO)?;
                let n = inner.selection.paste(&mut vc.port);
                Ok(IoctlRet::Int(n as i32))
            }
            TiocLinux::UnblankScreen => {
                inner.unblank_screen();
                Ok(IoctlRet::None)
            }
            TiocLinux::GetShiftState => Ok(IoctlRet::Int(
                (inner.keyboard.shift_state() & 0xff) as i32,
            )),
            TiocLinux::GetMouseReporting => {
                let fg = inner.fg_console;
                Ok(IoctlRet::Int(inner.vc(fg)?.report_mouse as i32))
            }
            TiocLinux::SetVesaBlank(mode) => {
                inner.vesa_blank_mode = if mode < 4 { mode as u32 } else { 0 };
                Ok(IoctlRet::None)
            }
            TiocLinux::GetFgConsole => Ok(IoctlRet::Int(inner.fg_console as i32)),
            TiocLinux::ScrollConsole(lines) => {
                if lines < 0 {
                    inner.scrollback(lines.unsigned_abs() as usize);
                } else {
                    inner.scrollfront(lines as usize);
                }
                Ok(IoctlRet::None)
            }
            TiocLinux::Other(code) => {
                debug!("TIOCLINUX: unsupported subcode {}", code);
                Err(SystemError::EINVAL)
            }
        }
    }
}
