use core::fmt::Debug;

use system_error::SystemError;

use super::{
    virtual_terminal::virtual_console::{
        CursorOperation, ScrollDir, VirtualConsoleData, VirtualConsoleIntensity,
    },
    ConsoleFont,
};

/// 控制台消隐的方式，数值与linux的vesa blank级别一致
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankMode {
    /// 取消消隐
    Unblank,
    /// 普通消隐：只清屏，不关闭信号
    Normal,
    VsyncSuspend,
    HsyncSuspend,
    Powerdown,
}

impl BlankMode {
    pub fn from_vesa(mode: u32) -> Self {
        match mode {
            1 => BlankMode::VsyncSuspend,
            2 => BlankMode::HsyncSuspend,
            3 => BlankMode::Powerdown,
            _ => BlankMode::Normal,
        }
    }
}

/// 终端切换相关的回调
///
/// 终端核心自己维护每个控制台的屏幕缓冲区，显示后端只负责把前台控制台画出来，
/// 后台控制台的改动不会到达后端。
pub trait ConsoleSwitch: Sync + Send + Debug {
    /// 探测显示设备，返回设备名。失败的后端不会被注册
    fn con_startup(&self) -> Result<&'static str, SystemError>;

    /// 初始化，会对vc_data进行一系列初始化操作
    fn con_init(&self, vc_data: &mut VirtualConsoleData, init: bool) -> Result<(), SystemError>;

    /// 控制台被释放时调用
    fn con_deinit(&self, _vc_data: &VirtualConsoleData) -> Result<(), SystemError> {
        Ok(())
    }

    /// ## 清空console的一片区域
    /// 该函数的所有参数对应的都是以字符为单位
    /// ### 参数：
    /// - vc_data: 对应的ConsoleData
    /// - sy: 对应区域左上角的y轴
    /// - sx: 对应区域左上角的x轴
    /// - height: 区域高度
    /// - width: 区域宽度
    fn con_clear(
        &self,
        vc_data: &VirtualConsoleData,
        sy: usize,
        sx: usize,
        height: usize,
        width: usize,
    ) -> Result<(), SystemError>;

    /// ## 向console输出一个字符
    /// ### 参数：
    /// - vc_data: 对应的ConsoleData
    /// - ch: 数据
    /// - ypos: 起始y坐标
    /// - xpos: 起始x坐标
    fn con_putc(
        &self,
        vc_data: &VirtualConsoleData,
        ch: u16,
        ypos: u32,
        xpos: u32,
    ) -> Result<(), SystemError>;

    /// ## 向console输出一串字符
    /// ### 参数：
    /// - vc_data: 对应的ConsoleData
    /// - buf: 数据
    /// - count: 输出字符数量
    /// - ypos: 起始y坐标
    /// - xpos: 起始x坐标
    fn con_putcs(
        &self,
        vc_data: &VirtualConsoleData,
        buf: &[u16],
        count: usize,
        ypos: u32,
        xpos: u32,
    ) -> Result<(), SystemError>;

    /// ## 对光标进行操作
    /// ### 参数：
    /// - vc_data: 对应的ConsoleData
    /// - op: 对光标的操作
    fn con_cursor(&self, vc_data: &VirtualConsoleData, op: CursorOperation);

    /// ## 根据参数构建出对应的属性
    /// 返回ENOSYS时由终端核心自己计算属性
    /// ### 参数：
    /// - vc_data: 对应的ConsoleData
    /// - color: 颜色
    /// - intensity: 字符强度
    /// - blink: 是否闪烁
    /// - underline: 下划线
    /// - reverse: 颜色反转
    /// - italic: 斜体
    #[allow(clippy::too_many_arguments)]
    fn con_build_attr(
        &self,
        _vc_data: &VirtualConsoleData,
        _color: u8,
        _intensity: VirtualConsoleIntensity,
        _blink: bool,
        _underline: bool,
        _reverse: bool,
        _italic: bool,
    ) -> Result<u8, SystemError> {
        return Err(SystemError::ENOSYS);
    }

    /// ## 设置调色板
    /// ### 参数：
    /// - vc_data: 对应的ConsoleData
    /// - color_table: 颜色表
    fn con_set_palette(
        &self,
        vc_data: &VirtualConsoleData,
        color_table: &[u8],
    ) -> Result<(), SystemError>;

    /// ## 滚动
    /// 调用时终端核心已经更新了自己的缓冲区。返回false表示后端无法完成，由核心重绘该区域
    /// ### 参数
    /// - top：滚动范围顶部
    /// - bottom： 滚动范围底部
    /// - dir： 滚动方向
    /// - nr： 滚动行数
    fn con_scroll(
        &self,
        vc_data: &VirtualConsoleData,
        top: usize,
        bottom: usize,
        dir: ScrollDir,
        nr: usize,
    ) -> bool;

    /// ## 切换到vc_data
    /// 后端需要同步调色板、光标和字体。返回true表示核心需要重绘整个屏幕
    fn con_switch(&self, vc_data: &VirtualConsoleData) -> bool;

    /// ## 消隐或者恢复屏幕
    /// 消隐时返回false表示后端无法消隐，由核心清屏；
    /// 恢复时返回true表示后端无法恢复内容，由核心重绘
    fn con_blank(&self, vc_data: &VirtualConsoleData, blank: BlankMode, mode_switch: bool)
        -> bool;

    /// ## 设置字体
    /// ### 参数
    /// - font: 字体数据
    /// - flags: KD_FONT_FLAG_*
    fn con_font_set(
        &self,
        _vc_data: &VirtualConsoleData,
        _font: &ConsoleFont,
        _flags: u32,
    ) -> Result<(), SystemError> {
        return Err(SystemError::ENOSYS);
    }

    fn con_font_get(&self, _vc_data: &VirtualConsoleData) -> Result<ConsoleFont, SystemError> {
        return Err(SystemError::ENOSYS);
    }

    /// ## 恢复默认字体，返回新字体的尺寸（data为空）
    fn con_font_default(
        &self,
        _vc_data: &VirtualConsoleData,
        _name: Option<&str>,
    ) -> Result<ConsoleFont, SystemError> {
        return Err(SystemError::ENOSYS);
    }

    /// ## 从另一个控制台复制字体
    fn con_font_copy(&self, _vc_data: &VirtualConsoleData, _con: usize) -> Result<(), SystemError> {
        return Err(SystemError::ENOSYS);
    }

    /// ## 检查后端能否以新的尺寸显示
    fn con_resize(
        &self,
        _vc_data: &VirtualConsoleData,
        _cols: usize,
        _rows: usize,
    ) -> Result<(), SystemError> {
        Ok(())
    }

    /// ## 回滚显示
    /// 返回false表示后端不支持，由核心根据回滚缓冲重绘
    fn con_scrolldelta(&self, _vc_data: &VirtualConsoleData, _lines: isize) -> bool {
        false
    }

    /// ## 反色一段区域
    /// 核心已经反色了自己的缓冲区，返回ENOSYS时核心重绘该区域
    fn con_invert_region(
        &self,
        _vc_data: &VirtualConsoleData,
        _offset: usize,
        _count: usize,
    ) -> Result<(), SystemError> {
        return Err(SystemError::ENOSYS);
    }
}
