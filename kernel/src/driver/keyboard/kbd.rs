//! 键盘翻译层：键码 -> keysym -> 送入前台控制台的字节
//!
//! 每个控制台有自己的 [`KbdStruct`]（键盘模式、锁定状态、LED），
//! 而shift状态、死键、映射表等是整个键盘共享的，保存在 [`KeyboardController`] 中。

use bitflags::bitflags;
use log::{debug, warn};
use system_error::SystemError;

use crate::{
    driver::tty::tty_port::TtyPort, ipc::signal::Signal, libs::keyboard_parser::TypeOneFSM,
    process::Pid,
};

use super::keymap::{
    self, default_accent_table, default_func_table, default_keymaps, ktyp, kval, KbDiacr, KeyMap,
    KG_SHIFT, KT_ASCII, KT_CONS, KT_CUR, KT_DEAD, KT_DEAD2, KT_FN, KT_LATIN, KT_LETTER, KT_LOCK,
    KT_META, KT_PAD, KT_SHIFT, KT_SLOCK, KT_SPEC, K_ALLOCATED, K_CAPSSHIFT, K_HOLE, K_NOSUCHMAP,
    K_SAK, MAX_DIACR, MAX_FUNC_LEN, MAX_NR_FUNC, MAX_NR_KEYMAPS, MAX_VALS, NR_KEYS, NR_TYPES,
    RET_DIACR,
};

/// 键盘模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VcKbdModeType {
    /// 直接送出扫描码
    Raw,
    /// 送出键码
    MediumRaw,
    /// 翻译为字符
    #[default]
    Xlate,
    /// 翻译为unicode，以utf-8送出
    Unicode,
}

impl VcKbdModeType {
    pub const K_RAW: u32 = 0x00;
    pub const K_XLATE: u32 = 0x01;
    pub const K_MEDIUMRAW: u32 = 0x02;
    pub const K_UNICODE: u32 = 0x03;

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            Self::K_RAW => Some(Self::Raw),
            Self::K_XLATE => Some(Self::Xlate),
            Self::K_MEDIUMRAW => Some(Self::MediumRaw),
            Self::K_UNICODE => Some(Self::Unicode),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Raw => Self::K_RAW,
            Self::Xlate => Self::K_XLATE,
            Self::MediumRaw => Self::K_MEDIUMRAW,
            Self::Unicode => Self::K_UNICODE,
        }
    }
}

bitflags! {
    /// 键盘的模式标志
    #[derive(Default)]
    pub struct VcKbdMode: u8 {
        /// 应用小键盘
        const APPLIC = 1 << 0;
        /// 光标键模式
        const CKMODE = 1 << 1;
        /// 自动重复
        const REPEAT = 1 << 2;
        /// 回车同时送出换行
        const CRLF = 1 << 3;
        /// meta键送出ESC前缀
        const META = 1 << 4;
    }
}

bitflags! {
    /// 键盘上的三个灯
    #[derive(Default)]
    pub struct VcKbdLed: u8 {
        const SCROLLOCK = 1 << 0;
        const NUMLOCK = 1 << 1;
        const CAPSLOCK = 1 << 2;
    }
}

/// LED显示的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedMode {
    /// 跟随锁定状态
    #[default]
    ShowFlags,
    /// 由KDSETLED指定
    ShowIoctl,
}

/// 每个控制台的键盘状态
#[derive(Debug, Clone)]
pub struct KbdStruct {
    pub kbdmode: VcKbdModeType,
    pub modeflags: VcKbdMode,
    pub ledmode: LedMode,
    pub ledflagstate: VcKbdLed,
    pub default_ledflagstate: VcKbdLed,
    /// KDSETLED 设置的灯
    pub ledioctl: u8,
    /// 锁定的修饰键
    pub lockstate: u8,
    /// 只对下一个按键生效的粘滞修饰键
    pub slockstate: u8,
}

impl Default for KbdStruct {
    fn default() -> Self {
        Self {
            kbdmode: VcKbdModeType::Xlate,
            modeflags: VcKbdMode::REPEAT | VcKbdMode::META,
            ledmode: LedMode::ShowFlags,
            ledflagstate: VcKbdLed::empty(),
            default_ledflagstate: VcKbdLed::empty(),
            ledioctl: 0,
            lockstate: 0,
            slockstate: 0,
        }
    }
}

impl KbdStruct {
    #[inline]
    pub fn is_mode(&self, mode: VcKbdMode) -> bool {
        self.modeflags.contains(mode)
    }

    #[inline]
    pub fn set_mode(&mut self, mode: VcKbdMode) {
        self.modeflags.insert(mode);
    }

    #[inline]
    pub fn clear_mode(&mut self, mode: VcKbdMode) {
        self.modeflags.remove(mode);
    }

    #[inline]
    pub fn is_led(&self, led: VcKbdLed) -> bool {
        self.ledflagstate.contains(led)
    }

    pub fn toggle_led(&mut self, led: VcKbdLed) {
        self.ledflagstate.toggle(led);
    }

    /// 恢复默认的锁定灯
    pub fn reset_leds(&mut self) {
        self.ledflagstate = self.default_ledflagstate;
    }

    /// ## 设置LED显示
    /// 0~7 由调用者指定灯的状态，其它值表示恢复为跟随锁定状态
    pub fn set_led_state(&mut self, led: u8) {
        if led & !7 == 0 {
            self.ledioctl = led;
            self.ledmode = LedMode::ShowIoctl;
        } else {
            self.ledmode = LedMode::ShowFlags;
        }
    }

    /// 实际显示的灯
    pub fn leds(&self) -> u8 {
        match self.ledmode {
            LedMode::ShowIoctl => self.ledioctl,
            LedMode::ShowFlags => self.ledflagstate.bits(),
        }
    }

    /// KDGKBLED
    pub fn get_led_flags(&self) -> u8 {
        (self.default_ledflagstate.bits() << 4) | self.ledflagstate.bits()
    }

    /// KDSKBLED
    pub fn set_led_flags(&mut self, arg: u32) -> Result<(), SystemError> {
        if arg & !0x77 != 0 {
            return Err(SystemError::EINVAL);
        }
        self.ledflagstate = VcKbdLed::from_bits_truncate((arg & 7) as u8);
        self.default_ledflagstate = VcKbdLed::from_bits_truncate(((arg >> 4) & 7) as u8);
        Ok(())
    }
}

/// 键盘产生的、需要由虚拟终端完成的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardAction {
    /// 切换到指定控制台（相对于本终端的编号）
    SwitchConsole(usize),
    LastConsole,
    DecrConsole,
    IncrConsole,
    ScrollBack,
    ScrollForw,
    /// 通知登记的进程创建新的控制台
    SpawnConsole(Pid, Signal),
    /// 安全注意键
    Sak,
    /// ctrl+alt+del
    Reboot,
    ShowRegs,
    ShowMem,
    ShowState,
}

/// 一次按键处理期间需要的上下文
struct KeyContext<'a> {
    kbd: &'a mut KbdStruct,
    port: &'a mut TtyPort,
    actions: Vec<KeyboardAction>,
    /// 是否是自动重复
    rep: bool,
}

impl KeyContext<'_> {
    fn put_queue(&mut self, ch: u8) {
        self.port.receive_char(ch);
    }

    fn puts_queue(&mut self, s: &[u8]) {
        self.port.receive_buf(s);
    }

    /// 以utf-8送出一个unicode字符
    fn to_utf8(&mut self, c: u32) {
        match char::from_u32(c) {
            Some(ch) => {
                let mut buf = [0u8; 4];
                let s = ch.encode_utf8(&mut buf);
                self.port.receive_buf(s.as_bytes());
            }
            None => {
                warn!("keyboard: invalid unicode keysym {:#x}", c);
            }
        }
    }

    /// 送出一个latin-1字符，unicode键盘模式下编码为utf-8
    fn put_char(&mut self, c: u8) {
        if self.kbd.kbdmode == VcKbdModeType::Unicode {
            self.to_utf8(c as u32);
        } else {
            self.put_queue(c);
        }
    }

    fn applkey(&mut self, key: u8, mode: bool) {
        let buf = [0x1b, if mode { b'O' } else { b'[' }, key];
        self.puts_queue(&buf);
    }
}

/// 整个键盘共享的状态
#[derive(Debug)]
pub struct KeyboardController {
    fsm: TypeOneFSM,
    shift_state: u32,
    /// 每种shift键被按下的数量
    k_down: [u8; 9],
    key_down: [u64; NR_KEYS / 64],
    diacr: u8,
    dead_key_next: bool,
    /// alt+小键盘输入的字符编码，-1表示没有
    npadch: i32,
    ledstate: u8,
    keymaps: Vec<Option<Box<KeyMap>>>,
    func_table: Vec<Option<Vec<u8>>>,
    accent_table: Vec<KbDiacr>,
    /// KDSIGACCEPT 登记的进程与信号
    spawn: Option<(Pid, Signal)>,
}

impl Default for KeyboardController {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardController {
    pub fn new() -> Self {
        Self {
            fsm: TypeOneFSM::new(),
            shift_state: 0,
            k_down: [0; 9],
            key_down: [0; NR_KEYS / 64],
            diacr: 0,
            dead_key_next: false,
            npadch: -1,
            ledstate: 0,
            keymaps: default_keymaps(),
            func_table: default_func_table(),
            accent_table: default_accent_table(),
            spawn: None,
        }
    }

    pub fn fsm(&mut self) -> &mut TypeOneFSM {
        &mut self.fsm
    }

    pub fn shift_state(&self) -> u32 {
        self.shift_state
    }

    pub fn ledstate(&self) -> u8 {
        self.ledstate
    }

    pub fn diacr(&self) -> u8 {
        self.diacr
    }

    pub fn spawn(&self) -> Option<(Pid, Signal)> {
        self.spawn
    }

    pub fn set_spawn(&mut self, spawn: Option<(Pid, Signal)>) {
        self.spawn = spawn;
    }

    fn test_and_set_key(&mut self, keycode: u8) -> bool {
        let (idx, bit) = (keycode as usize / 64, keycode as usize % 64);
        let old = self.key_down[idx] & (1 << bit) != 0;
        self.key_down[idx] |= 1 << bit;
        old
    }

    fn clear_key(&mut self, keycode: u8) {
        let (idx, bit) = (keycode as usize / 64, keycode as usize % 64);
        self.key_down[idx] &= !(1 << bit);
    }

    fn is_key_down(&self, keycode: usize) -> bool {
        self.key_down[keycode / 64] & (1 << (keycode % 64)) != 0
    }

    /// ## 处理一个按键事件
    /// ### 参数
    /// - keycode: 键码
    /// - down: 是否按下
    /// - kbd: 前台控制台的键盘状态
    /// - port: 前台控制台的输入队列
    ///
    /// ### 返回值
    /// 需要虚拟终端执行的动作
    pub fn handle_keycode(
        &mut self,
        keycode: u8,
        down: bool,
        kbd: &mut KbdStruct,
        port: &mut TtyPort,
    ) -> Vec<KeyboardAction> {
        let mut ctx = KeyContext {
            kbd,
            port,
            actions: Vec::new(),
            rep: false,
        };

        let mut raw_mode = ctx.kbd.kbdmode == VcKbdModeType::Raw;
        if ctx.kbd.kbdmode == VcKbdModeType::MediumRaw {
            ctx.put_queue(keycode | if down { 0 } else { 0x80 });
            raw_mode = true;
        }

        if (keycode as usize) >= NR_KEYS {
            return ctx.actions;
        }

        if down {
            ctx.rep = self.test_and_set_key(keycode);
        } else {
            self.clear_key(keycode);
        }

        // 输入没有被读走、又没有回显时不重复，避免慢速程序被淹没
        if ctx.rep
            && (!ctx.kbd.is_mode(VcKbdMode::REPEAT)
                || (!ctx.port.echo() && ctx.port.chars_in_buffer() > 0))
        {
            return ctx.actions;
        }

        let shift_final = ((self.shift_state as u8) | ctx.kbd.slockstate) ^ ctx.kbd.lockstate;
        let mut keysym = match &self.keymaps[shift_final as usize] {
            Some(map) => map[keycode as usize],
            None => {
                self.compute_shiftstate();
                ctx.kbd.slockstate = 0;
                return ctx.actions;
            }
        };

        let ty = ktyp(keysym);
        if ty < 0xf0 {
            // unicode keysym
            if down && !raw_mode {
                ctx.to_utf8(keysym as u32);
            }
            return ctx.actions;
        }
        let mut ty = ty - 0xf0;

        if raw_mode && ty != KT_SPEC && ty != KT_SHIFT {
            return ctx.actions;
        }

        if ty == KT_LETTER {
            ty = KT_LATIN;
            if ctx.kbd.is_led(VcKbdLed::CAPSLOCK) {
                let caps = (shift_final ^ (1 << KG_SHIFT)) as usize;
                if let Some(map) = &self.keymaps[caps] {
                    keysym = map[keycode as usize];
                }
            }
        }

        self.dispatch(&mut ctx, ty, kval(keysym), !down);

        if ty != KT_SLOCK {
            ctx.kbd.slockstate = 0;
        }
        self.update_leds(ctx.kbd);
        ctx.actions
    }

    fn dispatch(&mut self, ctx: &mut KeyContext, ty: u8, value: u8, up: bool) {
        match ty {
            KT_LATIN => self.do_self(ctx, value, up),
            KT_FN => self.do_fn(ctx, value, up),
            KT_SPEC => self.do_spec(ctx, value, up),
            KT_PAD => self.do_pad(ctx, value, up),
            KT_DEAD => self.do_dead(ctx, value, up),
            KT_CONS => self.do_cons(ctx, value, up),
            KT_CUR => self.do_cur(ctx, value, up),
            KT_SHIFT => self.do_shift(ctx, value, up),
            KT_META => self.do_meta(ctx, value, up),
            KT_ASCII => self.do_ascii(value, up),
            KT_LOCK => self.do_lock(ctx, value, up),
            KT_LETTER => self.do_lowercase(),
            KT_SLOCK => self.do_slock(ctx, value, up),
            KT_DEAD2 => self.do_dead2(ctx, value, up),
            _ => {}
        }
    }

    /// ## 死键之后的字符
    /// 组合表中有则返回组合结果；空格或同一个重音返回重音本身；否则先送出重音再返回原字符
    fn handle_diacr(&mut self, ctx: &mut KeyContext, ch: u8) -> u8 {
        let d = self.diacr;
        self.diacr = 0;

        if let Some(entry) = self
            .accent_table
            .iter()
            .find(|e| e.diacr == d && e.base == ch)
        {
            return entry.result;
        }

        if ch == b' ' || ch == d {
            return d;
        }

        ctx.put_char(d);
        ch
    }

    fn do_self(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        if up {
            return;
        }

        let mut value = value;
        if self.diacr != 0 {
            value = self.handle_diacr(ctx, value);
        }

        if self.dead_key_next {
            self.dead_key_next = false;
            self.diacr = value;
            return;
        }

        ctx.put_char(value);
    }

    fn do_dead(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        let value = match RET_DIACR.get(value as usize) {
            Some(v) => *v,
            None => return,
        };
        self.do_dead2(ctx, value, up);
    }

    /// 任意字符都可以作为重音
    fn do_dead2(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        if up {
            return;
        }
        self.diacr = if self.diacr != 0 {
            self.handle_diacr(ctx, value)
        } else {
            value
        };
    }

    fn do_fn(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        if up {
            return;
        }
        match self.func_table.get(value as usize) {
            Some(Some(s)) => {
                let s = s.clone();
                ctx.puts_queue(&s);
            }
            _ => {
                debug!("keyboard: function key {} has no string", value);
            }
        }
    }

    fn do_spec(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        if up {
            return;
        }
        let raw = matches!(
            ctx.kbd.kbdmode,
            VcKbdModeType::Raw | VcKbdModeType::MediumRaw
        );
        // 原始模式下只允许SAK
        if raw && value != kval(K_SAK) {
            return;
        }

        match value {
            0 => self.compute_shiftstate(),
            1 => self.fn_enter(ctx),
            2 => ctx.actions.push(KeyboardAction::ShowRegs),
            3 => ctx.actions.push(KeyboardAction::ShowMem),
            4 => ctx.actions.push(KeyboardAction::ShowState),
            // send_intr
            5 => ctx.port.send_break(),
            6 => ctx.actions.push(KeyboardAction::LastConsole),
            // caps_toggle
            7 => {
                if !ctx.rep {
                    ctx.kbd.toggle_led(VcKbdLed::CAPSLOCK);
                }
            }
            8 => {
                if ctx.kbd.is_mode(VcKbdMode::APPLIC) {
                    ctx.applkey(b'P', true);
                } else {
                    Self::bare_num(ctx);
                }
            }
            // hold
            9 => {
                if ctx.rep {
                    return;
                }
                let stopped = !ctx.port.stopped();
                ctx.port.set_stopped(stopped);
                if stopped {
                    ctx.kbd.ledflagstate.insert(VcKbdLed::SCROLLOCK);
                } else {
                    ctx.kbd.ledflagstate.remove(VcKbdLed::SCROLLOCK);
                }
            }
            10 => ctx.actions.push(KeyboardAction::ScrollForw),
            11 => ctx.actions.push(KeyboardAction::ScrollBack),
            12 => ctx.actions.push(KeyboardAction::Reboot),
            // caps_on
            13 => {
                if !ctx.rep {
                    ctx.kbd.ledflagstate.insert(VcKbdLed::CAPSLOCK);
                }
            }
            // compose
            14 => self.dead_key_next = true,
            15 => ctx.actions.push(KeyboardAction::Sak),
            16 => ctx.actions.push(KeyboardAction::DecrConsole),
            17 => ctx.actions.push(KeyboardAction::IncrConsole),
            18 => {
                if let Some((pid, sig)) = self.spawn {
                    ctx.actions.push(KeyboardAction::SpawnConsole(pid, sig));
                }
            }
            19 => Self::bare_num(ctx),
            _ => {}
        }
    }

    fn fn_enter(&mut self, ctx: &mut KeyContext) {
        if self.diacr != 0 {
            let d = self.diacr;
            ctx.put_char(d);
            self.diacr = 0;
        }
        ctx.put_queue(13);
        if ctx.kbd.is_mode(VcKbdMode::CRLF) {
            ctx.put_queue(10);
        }
    }

    fn bare_num(ctx: &mut KeyContext) {
        if !ctx.rep {
            ctx.kbd.toggle_led(VcKbdLed::NUMLOCK);
        }
    }

    fn do_pad(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        const PAD_CHARS: &[u8] = b"0123456789+-*/\r,.?()";
        const APP_MAP: &[u8] = b"pqrstuvwxylSRQMnnmPQ";

        if up {
            return;
        }
        let value = value as usize;
        if value >= PAD_CHARS.len() {
            return;
        }

        // shift强制使用光标/数字键
        if ctx.kbd.is_mode(VcKbdMode::APPLIC) && self.k_down[KG_SHIFT as usize] == 0 {
            ctx.applkey(APP_MAP[value], true);
            return;
        }

        if !ctx.kbd.is_led(VcKbdLed::NUMLOCK) {
            let fn_key = |k: u16| kval(k);
            match value as u8 {
                keymap::K_PCOMMA | keymap::K_PDOT => {
                    return self.do_fn(ctx, fn_key(keymap::K_REMOVE), false)
                }
                keymap::K_P0 => return self.do_fn(ctx, fn_key(keymap::K_INSERT), false),
                keymap::K_P1 => return self.do_fn(ctx, fn_key(keymap::K_SELECT), false),
                keymap::K_P2 => return self.do_cur(ctx, keymap::K_DOWN, false),
                keymap::K_P3 => return self.do_fn(ctx, fn_key(keymap::K_PGDN), false),
                keymap::K_P4 => return self.do_cur(ctx, keymap::K_LEFT, false),
                keymap::K_P6 => return self.do_cur(ctx, keymap::K_RIGHT, false),
                keymap::K_P7 => return self.do_fn(ctx, fn_key(keymap::K_FIND), false),
                keymap::K_P8 => return self.do_cur(ctx, keymap::K_UP, false),
                keymap::K_P9 => return self.do_fn(ctx, fn_key(keymap::K_PGUP), false),
                keymap::K_P5 => {
                    let applic = ctx.kbd.is_mode(VcKbdMode::APPLIC);
                    ctx.applkey(b'G', applic);
                    return;
                }
                _ => {}
            }
        }

        ctx.put_queue(PAD_CHARS[value]);
        if value as u8 == keymap::K_PENTER && ctx.kbd.is_mode(VcKbdMode::CRLF) {
            ctx.put_queue(10);
        }
    }

    fn do_cur(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        const CUR_CHARS: &[u8] = b"BDCA";
        if up {
            return;
        }
        if let Some(c) = CUR_CHARS.get(value as usize) {
            let ckmode = ctx.kbd.is_mode(VcKbdMode::CKMODE);
            ctx.applkey(*c, ckmode);
        }
    }

    fn do_cons(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        if up {
            return;
        }
        ctx.actions.push(KeyboardAction::SwitchConsole(value as usize));
    }

    fn do_shift(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        if ctx.rep {
            return;
        }
        let old_state = self.shift_state;

        let mut value = value;
        // CapsShift 和 Shift 一样，但会取消CapsLock
        if value == kval(K_CAPSSHIFT) {
            value = KG_SHIFT;
            if !up {
                ctx.kbd.ledflagstate.remove(VcKbdLed::CAPSLOCK);
            }
        }
        let idx = value as usize;
        if idx >= self.k_down.len() {
            return;
        }

        if up {
            // 两个相同的修饰键同时被按下
            if self.k_down[idx] > 0 {
                self.k_down[idx] -= 1;
            }
        } else {
            self.k_down[idx] = self.k_down[idx].saturating_add(1);
        }

        if self.k_down[idx] > 0 {
            self.shift_state |= 1 << value;
        } else {
            self.shift_state &= !(1 << value);
        }

        // 修饰键松开时送出alt+小键盘输入的字符
        if up && self.shift_state != old_state && self.npadch != -1 {
            if ctx.kbd.kbdmode == VcKbdModeType::Unicode {
                ctx.to_utf8((self.npadch & 0xffff) as u32);
            } else {
                ctx.put_queue((self.npadch & 0xff) as u8);
            }
            self.npadch = -1;
        }
    }

    fn do_meta(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        if up {
            return;
        }
        if ctx.kbd.is_mode(VcKbdMode::META) {
            ctx.put_queue(0x1b);
            ctx.put_queue(value);
        } else {
            ctx.put_queue(value | 0x80);
        }
    }

    fn do_ascii(&mut self, value: u8, up: bool) {
        if up {
            return;
        }
        // 0~9 十进制输入（alt），10~25 十六进制输入（altgr）
        let (value, base) = if value < 10 {
            (value as i32, 10)
        } else {
            (value as i32 - 10, 16)
        };
        self.npadch = if self.npadch == -1 {
            value
        } else {
            self.npadch.wrapping_mul(base).wrapping_add(value)
        };
    }

    fn do_lock(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        if up || ctx.rep {
            return;
        }
        ctx.kbd.lockstate ^= 1 << (value & 7);
    }

    fn do_slock(&mut self, ctx: &mut KeyContext, value: u8, up: bool) {
        self.do_shift(ctx, value, up);
        if up || ctx.rep {
            return;
        }
        ctx.kbd.slockstate ^= 1 << (value & 7);
        // 没有对应的映射表时撤销
        if self.keymaps[(ctx.kbd.lockstate ^ ctx.kbd.slockstate) as usize].is_none() {
            ctx.kbd.slockstate = 0;
            ctx.kbd.slockstate ^= 1 << (value & 7);
        }
    }

    fn do_lowercase(&mut self) {
        warn!("keyboard: do_lowercase was called");
    }

    /// ## 根据仍然按下的键重新计算shift状态
    pub fn compute_shiftstate(&mut self) {
        self.shift_state = 0;
        self.k_down = [0; 9];
        let plain = match &self.keymaps[0] {
            Some(map) => map.clone(),
            None => return,
        };
        for code in 0..NR_KEYS {
            if !self.is_key_down(code) {
                continue;
            }
            let sym = plain[code];
            let ty = ktyp(sym).wrapping_sub(0xf0);
            if ty == KT_SHIFT || ty == KT_SLOCK {
                let mut val = kval(sym);
                if val == kval(K_CAPSSHIFT) {
                    val = KG_SHIFT;
                }
                if (val as usize) < self.k_down.len() {
                    self.k_down[val as usize] += 1;
                    self.shift_state |= 1 << val;
                }
            }
        }
    }

    /// 同步LED状态
    pub fn update_leds(&mut self, kbd: &KbdStruct) {
        let leds = kbd.leds();
        if leds != self.ledstate {
            debug!("keyboard: leds {:#x} -> {:#x}", self.ledstate, leds);
            self.ledstate = leds;
        }
    }

    /// ## 放弃未完成的死键和alt数字输入
    pub fn reset_pending(&mut self) {
        self.diacr = 0;
        self.dead_key_next = false;
        self.npadch = -1;
    }

    /// ## KDGKBENT
    pub fn get_entry(
        &self,
        table: usize,
        index: usize,
        kbdmode: VcKbdModeType,
    ) -> Result<u16, SystemError> {
        if index >= NR_KEYS || table >= MAX_NR_KEYMAPS {
            return Err(SystemError::EINVAL);
        }
        let val = match &self.keymaps[table] {
            Some(map) => {
                let v = map[index];
                if kbdmode != VcKbdModeType::Unicode && ktyp(v).wrapping_sub(0xf0) >= NR_TYPES {
                    K_HOLE
                } else {
                    v
                }
            }
            None => {
                if index != 0 {
                    K_HOLE
                } else {
                    K_NOSUCHMAP
                }
            }
        };
        Ok(val)
    }

    /// ## KDSKBENT
    /// 修改映射表中的一项，必要时分配新的映射表。对第0项的赋值只做参数校验
    pub fn set_entry(
        &mut self,
        table: usize,
        index: usize,
        value: u16,
        kbdmode: VcKbdModeType,
        cap_sys_admin: bool,
    ) -> Result<(), SystemError> {
        if index >= NR_KEYS || table >= MAX_NR_KEYMAPS {
            return Err(SystemError::EINVAL);
        }

        if index == 0 && value == K_NOSUCHMAP {
            // 释放映射表，0号表不能释放
            if table != 0 {
                self.keymaps[table] = None;
            }
            return Ok(());
        }

        let ty = ktyp(value).wrapping_sub(0xf0);
        if ktyp(value) >= 0xf0 && ty < NR_TYPES {
            if kval(value) > MAX_VALS[ty as usize] {
                return Err(SystemError::EINVAL);
            }
        } else if kbdmode != VcKbdModeType::Unicode {
            return Err(SystemError::EINVAL);
        }

        if index == 0 {
            return Ok(());
        }

        let map = self.keymaps[table].get_or_insert_with(|| {
            let mut map = Box::new([K_HOLE; NR_KEYS]);
            map[0] = K_ALLOCATED;
            map
        });

        let old = map[index];
        if old == value {
            return Ok(());
        }
        if (old == K_SAK || value == K_SAK) && !cap_sys_admin {
            return Err(SystemError::EPERM);
        }
        map[index] = value;

        let shift_type = 0xf0 + KT_SHIFT;
        if table == 0 && (ktyp(old) == shift_type || ktyp(value) == shift_type) {
            self.compute_shiftstate();
        }
        Ok(())
    }

    /// ## KDGKBSENT
    pub fn get_func(&self, index: usize) -> Result<Vec<u8>, SystemError> {
        if index >= MAX_NR_FUNC {
            return Err(SystemError::EINVAL);
        }
        Ok(self.func_table[index].clone().unwrap_or_default())
    }

    /// ## KDSKBSENT
    pub fn set_func(&mut self, index: usize, s: &[u8]) -> Result<(), SystemError> {
        if index >= MAX_NR_FUNC {
            return Err(SystemError::EINVAL);
        }
        if s.len() > MAX_FUNC_LEN {
            return Err(SystemError::ENOSPC);
        }
        self.func_table[index] = Some(s.to_vec());
        Ok(())
    }

    /// ## KDGKBDIACR
    pub fn get_accent_table(&self) -> Vec<KbDiacr> {
        self.accent_table.clone()
    }

    /// ## KDSKBDIACR
    pub fn set_accent_table(&mut self, table: &[KbDiacr]) -> Result<(), SystemError> {
        if table.len() > MAX_DIACR {
            return Err(SystemError::EINVAL);
        }
        self.accent_table = table.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::keyboard::keymap::{k, K_DACUTE, K_F1};

    const KEY_E: u8 = 18;
    const KEY_X: u8 = 45;
    const KEY_A: u8 = 30;
    const KEY_SPACE: u8 = 57;
    const KEY_APOSTROPHE: u8 = 40;
    const KEY_LEFTSHIFT: u8 = 42;
    const KEY_CAPSLOCK: u8 = 58;
    const KEY_F1: u8 = 59;
    const KEY_F2: u8 = 60;
    const KEY_LEFTALT: u8 = 56;
    const KEY_UP: u8 = 103;

    struct Fixture {
        kb: KeyboardController,
        kbd: KbdStruct,
        port: TtyPort,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                kb: KeyboardController::new(),
                kbd: KbdStruct::default(),
                port: TtyPort::new(),
            }
        }

        fn key(&mut self, keycode: u8, down: bool) -> Vec<KeyboardAction> {
            self.kb
                .handle_keycode(keycode, down, &mut self.kbd, &mut self.port)
        }

        fn tap(&mut self, keycode: u8) -> Vec<KeyboardAction> {
            let mut actions = self.key(keycode, true);
            actions.extend(self.key(keycode, false));
            actions
        }

        fn dead_acute(&mut self) {
            self.kb
                .set_entry(0, KEY_APOSTROPHE as usize, K_DACUTE, VcKbdModeType::Xlate, false)
                .unwrap();
        }
    }

    #[test]
    fn test_plain_and_shift() {
        let mut f = Fixture::new();
        f.tap(KEY_A);
        f.key(KEY_LEFTSHIFT, true);
        f.tap(KEY_A);
        f.key(KEY_LEFTSHIFT, false);
        f.tap(KEY_A);
        assert_eq!(f.port.take_input(), b"aAa".to_vec());
        assert_eq!(f.kb.shift_state(), 0);
    }

    #[test]
    fn test_capslock_letters() {
        let mut f = Fixture::new();
        f.tap(KEY_CAPSLOCK);
        assert!(f.kbd.is_led(VcKbdLed::CAPSLOCK));
        f.tap(KEY_A);
        f.key(KEY_LEFTSHIFT, true);
        f.tap(KEY_A);
        f.key(KEY_LEFTSHIFT, false);
        assert_eq!(f.port.take_input(), b"Aa".to_vec());
        assert_eq!(f.kb.ledstate(), VcKbdLed::CAPSLOCK.bits());
    }

    #[test]
    fn test_dead_key_compose() {
        let mut f = Fixture::new();
        f.dead_acute();
        f.tap(KEY_APOSTROPHE);
        assert_eq!(f.kb.diacr(), b'\'');
        f.tap(KEY_E);
        assert_eq!(f.port.take_input(), vec![0xe9]);
    }

    #[test]
    fn test_dead_key_space_and_unknown() {
        let mut f = Fixture::new();
        f.dead_acute();
        f.tap(KEY_APOSTROPHE);
        f.tap(KEY_SPACE);
        assert_eq!(f.port.take_input(), b"'".to_vec());
        f.tap(KEY_APOSTROPHE);
        f.tap(KEY_X);
        assert_eq!(f.port.take_input(), b"'x".to_vec());
        // 同一个重音按两次
        f.tap(KEY_APOSTROPHE);
        f.tap(KEY_APOSTROPHE);
        assert_eq!(f.kb.diacr(), b'\'');
        f.tap(KEY_SPACE);
        assert_eq!(f.port.take_input(), b"'".to_vec());
    }

    #[test]
    fn test_dead_key_unicode_mode() {
        let mut f = Fixture::new();
        f.dead_acute();
        f.kbd.kbdmode = VcKbdModeType::Unicode;
        f.tap(KEY_APOSTROPHE);
        f.tap(KEY_E);
        assert_eq!(f.port.take_input(), "é".as_bytes().to_vec());
    }

    #[test]
    fn test_repeat_backpressure() {
        let mut f = Fixture::new();
        f.key(KEY_A, true);
        f.key(KEY_A, true);
        assert_eq!(f.port.chars_in_buffer(), 2);
        // 关闭回显且有未读数据时，不再重复
        f.port.set_echo(false);
        f.key(KEY_A, true);
        assert_eq!(f.port.chars_in_buffer(), 2);
        f.port.take_input();
        f.key(KEY_A, true);
        assert_eq!(f.port.chars_in_buffer(), 1);
        // 关闭自动重复
        f.kbd.clear_mode(VcKbdMode::REPEAT);
        f.port.take_input();
        f.key(KEY_A, true);
        assert_eq!(f.port.chars_in_buffer(), 0);
        f.key(KEY_A, false);
        f.key(KEY_A, true);
        assert_eq!(f.port.chars_in_buffer(), 1);
    }

    #[test]
    fn test_function_and_cursor_keys() {
        let mut f = Fixture::new();
        f.tap(KEY_F1);
        f.tap(KEY_UP);
        f.kbd.set_mode(VcKbdMode::CKMODE);
        f.tap(KEY_UP);
        assert_eq!(f.port.take_input(), b"\x1b[[A\x1b[A\x1bOA".to_vec());
    }

    #[test]
    fn test_console_switch_key() {
        let mut f = Fixture::new();
        f.key(KEY_LEFTALT, true);
        let actions = f.tap(KEY_F2);
        f.key(KEY_LEFTALT, false);
        assert_eq!(actions, vec![KeyboardAction::SwitchConsole(1)]);
        assert!(f.port.take_input().is_empty());
    }

    #[test]
    fn test_alt_numpad_input() {
        let mut f = Fixture::new();
        f.key(KEY_LEFTALT, true);
        // alt + 小键盘 6 5
        f.tap(77);
        f.tap(76);
        f.key(KEY_LEFTALT, false);
        assert_eq!(f.port.take_input(), b"A".to_vec());
    }

    #[test]
    fn test_medium_raw() {
        let mut f = Fixture::new();
        f.kbd.kbdmode = VcKbdModeType::MediumRaw;
        f.tap(KEY_A);
        assert_eq!(f.port.take_input(), vec![KEY_A, KEY_A | 0x80]);
    }

    #[test]
    fn test_set_entry_validation() {
        let mut kb = KeyboardController::new();
        assert_eq!(
            kb.set_entry(0, NR_KEYS, K_F1, VcKbdModeType::Xlate, false),
            Err(SystemError::EINVAL)
        );
        // 死键的值超出范围
        assert_eq!(
            kb.set_entry(0, 5, k(KT_DEAD, 9), VcKbdModeType::Xlate, false),
            Err(SystemError::EINVAL)
        );
        assert_eq!(
            kb.set_entry(0, 5, K_SAK, VcKbdModeType::Xlate, false),
            Err(SystemError::EPERM)
        );
        // 新分配的映射表
        assert_eq!(kb.get_entry(3, 0, VcKbdModeType::Xlate), Ok(K_NOSUCHMAP));
        kb.set_entry(3, 30, k(KT_LATIN, b'z'), VcKbdModeType::Xlate, false)
            .unwrap();
        assert_eq!(kb.get_entry(3, 0, VcKbdModeType::Xlate), Ok(K_ALLOCATED));
        assert_eq!(kb.get_entry(3, 31, VcKbdModeType::Xlate), Ok(K_HOLE));
        kb.set_entry(3, 0, K_NOSUCHMAP, VcKbdModeType::Xlate, false)
            .unwrap();
        assert_eq!(kb.get_entry(3, 0, VcKbdModeType::Xlate), Ok(K_NOSUCHMAP));
    }

    #[test]
    fn test_led_ioctl_override() {
        let mut kbd = KbdStruct::default();
        kbd.toggle_led(VcKbdLed::NUMLOCK);
        assert_eq!(kbd.leds(), VcKbdLed::NUMLOCK.bits());
        kbd.set_led_state(VcKbdLed::SCROLLOCK.bits());
        assert_eq!(kbd.leds(), VcKbdLed::SCROLLOCK.bits());
        kbd.set_led_state(0xff);
        assert_eq!(kbd.leds(), VcKbdLed::NUMLOCK.bits());
        assert_eq!(kbd.set_led_flags(0x80), Err(SystemError::EINVAL));
        kbd.set_led_flags(0x21).unwrap();
        assert_eq!(kbd.get_led_flags(), 0x21);
    }
}
