use std::{sync::Arc, thread, time::Duration};

use dragonos_vt::{
    driver::{
        keyboard::keymap::K_DACUTE,
        keyboard::kbd::VcKbdModeType,
        tty::virtual_terminal::{
            virtual_console::VirtualConsoleIntensity,
            vt_config::VtConfig,
            vt_ioctl::{IoctlArg, IoctlContext, IoctlRet, KbEntry, VtIoctlCmd, VtModeArg},
            SwitchOutcome, VirtualTerminal, VtMode, VtManager,
        },
        video::console::vgacon::VgaConsole,
    },
    ipc::signal::Signal,
    process::{Pid, ProcessTable},
    SystemError,
};

const KEY_APOSTROPHE: u8 = 40;
const KEY_E: u8 = 18;
const KEY_X: u8 = 45;
const KEY_SPACE: u8 = 57;

struct Rig {
    procs: Arc<ProcessTable>,
    vga: Arc<VgaConsole>,
    manager: Arc<VtManager>,
    vt: Arc<VirtualTerminal>,
}

fn rig(cols: usize, rows: usize, consoles: usize) -> Rig {
    let _ = env_logger::builder().is_test(true).try_init();
    let procs = Arc::new(ProcessTable::new());
    let config = VtConfig {
        cols,
        rows,
        ..VtConfig::default()
    };
    let manager = Arc::new(VtManager::new(config, procs.clone()));
    let vga = Arc::new(VgaConsole::new(cols, rows));
    let vt = manager.register_display(vga.clone(), 0, consoles).unwrap();
    Rig {
        procs,
        vga,
        manager,
        vt,
    }
}

fn cursor(vt: &VirtualTerminal, num: usize) -> (usize, usize) {
    vt.with_console(num, |vc| (vc.state.y, vc.state.x)).unwrap()
}

fn take_process_control(rig: &Rig, pid: Pid, console: usize) -> IoctlContext {
    rig.procs.spawn(pid);
    let ctx = IoctlContext::new(pid);
    let mode = VtModeArg {
        mode: VtMode::VT_PROCESS,
        waitv: 0,
        relsig: Signal::SIGUSR1.number() as i16,
        acqsig: Signal::SIGUSR2.number() as i16,
        frsig: 0,
    };
    rig.manager
        .vt_ioctl(&ctx, console, VtIoctlCmd::VT_SETMODE, IoctlArg::Mode(mode))
        .unwrap();
    ctx
}

#[test]
fn test_cursor_position_is_clamped() {
    let rig = rig(80, 24, 2);
    rig.vt.con_write(0, b"\x1b[10;5H").unwrap();
    assert_eq!(cursor(&rig.vt, 0), (9, 4));
    assert_eq!(rig.vga.cursor(), Some((4, 9)));

    rig.vt.con_write(0, b"\x1b[99;200H").unwrap();
    assert_eq!(cursor(&rig.vt, 0), (23, 79));
    rig.vt.con_write(0, b"\x1b[0;0H").unwrap();
    assert_eq!(cursor(&rig.vt, 0), (0, 0));
}

#[test]
fn test_clear_is_idempotent() {
    let rig = rig(80, 24, 2);
    rig.vt.con_write(0, b"one\r\ntwo\r\nthree\x1b[2;2H").unwrap();
    rig.vt.con_write(0, b"\x1b[J").unwrap();
    let once = rig.vt.with_console(0, |vc| vc.screen_buf.clone()).unwrap();
    rig.vt.con_write(0, b"\x1b[J").unwrap();
    let twice = rig.vt.with_console(0, |vc| vc.screen_buf.clone()).unwrap();
    assert_eq!(once, twice);
    assert_eq!(rig.vga.row_text(0), "one");
    assert_eq!(rig.vga.row_text(1), "t");
    assert_eq!(rig.vga.row_text(2), "");
}

#[test]
fn test_save_restore_cursor() {
    let rig = rig(80, 24, 2);
    rig.vt.con_write(0, b"\x1b[5;7H\x1b[1;4m\x1b7").unwrap();
    // 中间的查询不改变状态
    rig.vt
        .con_write(0, b"\x1b[1;1H\x1b[0m\x1b[6n\x1b[c\x1b8")
        .unwrap();
    assert_eq!(cursor(&rig.vt, 0), (4, 6));
    let (intensity, underline) = rig
        .vt
        .with_console(0, |vc| (vc.state.intensity, vc.state.underline))
        .unwrap();
    assert_eq!(intensity, VirtualConsoleIntensity::Bold);
    assert!(underline);
    // 查询的应答进入输入队列
    let input = rig.vt.take_input(0).unwrap();
    assert!(input.starts_with(b"\x1b[1;1R"));
}

#[test]
fn test_autowrap_without_blank_line() {
    let rig = rig(80, 24, 2);
    let line = vec![b'a'; 80];
    rig.vt.con_write(0, &line).unwrap();
    // 写满一行后光标停在行尾，等待下一个字符
    assert_eq!(cursor(&rig.vt, 0), (0, 79));
    rig.vt.con_write(0, b"b").unwrap();
    assert_eq!(rig.vga.row_text(0), "a".repeat(80));
    assert_eq!(rig.vga.row_text(1), "b");
    assert_eq!(cursor(&rig.vt, 0), (1, 1));
}

#[test]
fn test_switch_vetoed_until_reldisp() {
    let rig = rig(80, 25, 4);
    rig.vt.vc_allocate(2).unwrap();
    let owner = Pid::new(1234);
    let ctx = take_process_control(&rig, owner, 0);

    assert_eq!(
        rig.vt.change_console(2).unwrap(),
        SwitchOutcome::PendingRelease
    );
    assert_eq!(rig.vt.fg_console(), 0);
    assert_eq!(rig.procs.take_signals(owner), vec![Signal::SIGUSR1]);
    assert_eq!(rig.vt.with_console(0, |vc| vc.vt_newvt).unwrap(), 2);

    // 只有控制进程本身可以确认
    let stranger = IoctlContext::new(Pid::new(4321));
    assert_eq!(
        rig.manager
            .vt_ioctl(&stranger, 0, VtIoctlCmd::VT_RELDISP, IoctlArg::Int(1)),
        Err(SystemError::EPERM)
    );
    assert_eq!(rig.vt.fg_console(), 0);

    assert_eq!(
        rig.manager
            .vt_ioctl(&ctx, 0, VtIoctlCmd::VT_RELDISP, IoctlArg::Int(1)),
        Ok(IoctlRet::None)
    );
    assert_eq!(rig.vt.fg_console(), 2);
    assert_eq!(rig.vt.with_console(0, |vc| vc.vt_newvt).unwrap(), -1);
}

#[test]
fn test_dead_controller_is_recovered() {
    let rig = rig(80, 25, 4);
    rig.vt.vc_allocate(1).unwrap();
    let owner = Pid::new(1234);
    take_process_control(&rig, owner, 0);
    rig.procs.exit(owner);

    assert_eq!(rig.vt.change_console(1).unwrap(), SwitchOutcome::Completed);
    assert_eq!(rig.vt.fg_console(), 1);
    let (mode, pid) = rig
        .vt
        .with_console(0, |vc| (vc.vt_mode.mode, vc.vt_pid))
        .unwrap();
    assert_eq!(mode, VtMode::Auto);
    assert_eq!(pid, None);
}

#[test]
fn test_dead_key_composition() {
    let rig = rig(80, 25, 2);
    let ctx = IoctlContext::new(Pid::new(1));
    rig.manager
        .vt_ioctl(
            &ctx,
            0,
            VtIoctlCmd::KDSKBMODE,
            IoctlArg::Int(VcKbdModeType::K_XLATE),
        )
        .unwrap();
    let entry = KbEntry {
        kb_table: 0,
        kb_index: KEY_APOSTROPHE,
        kb_value: K_DACUTE,
    };
    rig.manager
        .vt_ioctl(&ctx, 0, VtIoctlCmd::KDSKBENT, IoctlArg::KbEntry(entry))
        .unwrap();

    let tap = |key: u8| {
        rig.vt.handle_keycode(key, true);
        rig.vt.handle_keycode(key, false);
    };
    tap(KEY_APOSTROPHE);
    tap(KEY_E);
    assert_eq!(rig.vt.take_input(0).unwrap(), vec![0xe9]);
    tap(KEY_APOSTROPHE);
    tap(KEY_SPACE);
    assert_eq!(rig.vt.take_input(0).unwrap(), b"'".to_vec());
    tap(KEY_APOSTROPHE);
    tap(KEY_X);
    assert_eq!(rig.vt.take_input(0).unwrap(), b"'x".to_vec());
}

#[test]
fn test_waitactive_woken_by_switch() {
    let rig = rig(80, 25, 4);
    rig.vt.vc_allocate(3).unwrap();
    let manager = rig.manager.clone();
    let waiter = thread::spawn(move || {
        let ctx = IoctlContext::new(Pid::new(1));
        manager.vt_ioctl(&ctx, 0, VtIoctlCmd::VT_WAITACTIVE, IoctlArg::Int(4))
    });
    thread::sleep(Duration::from_millis(50));
    let ctx = IoctlContext::new(Pid::new(1));
    rig.manager
        .vt_ioctl(&ctx, 0, VtIoctlCmd::VT_ACTIVATE, IoctlArg::Int(4))
        .unwrap();
    assert_eq!(waiter.join().unwrap(), Ok(IoctlRet::None));
    assert_eq!(rig.vt.fg_console(), 3);
}

#[test]
fn test_waitactive_cancelled() {
    let rig = rig(80, 25, 4);
    let ctx = IoctlContext::new(Pid::new(1));
    let cancel = ctx.cancel.clone();
    let manager = rig.manager.clone();
    let waiter = thread::spawn(move || {
        manager.vt_ioctl(&ctx, 0, VtIoctlCmd::VT_WAITACTIVE, IoctlArg::Int(3))
    });
    thread::sleep(Duration::from_millis(50));
    cancel.cancel();
    assert_eq!(waiter.join().unwrap(), Err(SystemError::EINTR));
}

#[test]
fn test_background_output_stays_off_screen() {
    let rig = rig(80, 25, 4);
    rig.vt.con_write(0, b"front").unwrap();
    rig.vt.open_console(1).unwrap();
    rig.vt.con_write(1, b"back\r\nground").unwrap();
    assert_eq!(rig.vga.row_text(0), "front");
    assert_eq!(rig.vga.row_text(1), "");
    assert_eq!(
        rig.vt.with_console(1, |vc| vc.row_text(1)).unwrap(),
        "ground"
    );

    rig.vt.change_console(1).unwrap();
    assert_eq!(rig.vga.row_text(0), "back");
    assert_eq!(rig.vga.row_text(1), "ground");
    rig.vt.change_console(0).unwrap();
    assert_eq!(rig.vga.row_text(0), "front");
}
