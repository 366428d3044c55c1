use std::sync::Arc;

use system_error::SystemError;

use crate::driver::tty::{
    console::{BlankMode, ConsoleSwitch},
    virtual_terminal::virtual_console::{
        CursorOperation, ScrollDir, VirtualConsoleData, VirtualConsoleIntensity,
    },
};

lazy_static! {
    pub static ref DUMMY_CONSOLE: Arc<DummyConsole> = Arc::new(DummyConsole::new());
}

#[inline]
pub fn dummy_console() -> Arc<DummyConsole> {
    DUMMY_CONSOLE.clone()
}

/// 没有显示设备时使用的后端：接受所有操作，什么都不显示
#[derive(Debug)]
pub struct DummyConsole;

impl DummyConsole {
    pub const COLUNMS: usize = 80;
    pub const ROWS: usize = 25;
    pub const fn new() -> Self {
        DummyConsole
    }
}

impl ConsoleSwitch for DummyConsole {
    fn con_startup(&self) -> Result<&'static str, SystemError> {
        Ok("dummy device")
    }

    fn con_init(&self, vc_data: &mut VirtualConsoleData, _init: bool) -> Result<(), SystemError> {
        vc_data.color_mode = true;
        vc_data.cols = Self::COLUNMS;
        vc_data.rows = Self::ROWS;
        Ok(())
    }

    fn con_build_attr(
        &self,
        _vc_data: &VirtualConsoleData,
        color: u8,
        _intensity: VirtualConsoleIntensity,
        _blink: bool,
        _underline: bool,
        _reverse: bool,
        _italic: bool,
    ) -> Result<u8, SystemError> {
        Ok(color)
    }

    fn con_clear(
        &self,
        _vc_data: &VirtualConsoleData,
        _sy: usize,
        _sx: usize,
        _height: usize,
        _width: usize,
    ) -> Result<(), SystemError> {
        Ok(())
    }

    fn con_putc(
        &self,
        _vc_data: &VirtualConsoleData,
        _ch: u16,
        _ypos: u32,
        _xpos: u32,
    ) -> Result<(), SystemError> {
        Ok(())
    }

    fn con_putcs(
        &self,
        _vc_data: &VirtualConsoleData,
        _buf: &[u16],
        _count: usize,
        _ypos: u32,
        _xpos: u32,
    ) -> Result<(), SystemError> {
        Ok(())
    }

    fn con_cursor(&self, _vc_data: &VirtualConsoleData, _op: CursorOperation) {
        // Do nothing
    }

    fn con_set_palette(
        &self,
        _vc_data: &VirtualConsoleData,
        _color_table: &[u8],
    ) -> Result<(), SystemError> {
        Ok(())
    }

    fn con_scroll(
        &self,
        _vc_data: &VirtualConsoleData,
        _top: usize,
        _bottom: usize,
        _dir: ScrollDir,
        _nr: usize,
    ) -> bool {
        false
    }

    fn con_switch(&self, _vc_data: &VirtualConsoleData) -> bool {
        false
    }

    fn con_blank(
        &self,
        _vc_data: &VirtualConsoleData,
        _blank: BlankMode,
        _mode_switch: bool,
    ) -> bool {
        false
    }

    fn con_resize(
        &self,
        _vc_data: &VirtualConsoleData,
        cols: usize,
        rows: usize,
    ) -> Result<(), SystemError> {
        if cols != Self::COLUNMS || rows != Self::ROWS {
            return Err(SystemError::EINVAL);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_accepts_everything() {
        let dummy = dummy_console();
        assert_eq!(dummy.con_startup(), Ok("dummy device"));
        assert!(Arc::ptr_eq(&dummy, &dummy_console()));
    }
}
