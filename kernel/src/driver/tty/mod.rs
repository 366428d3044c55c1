pub mod console;
pub mod tty_port;
pub mod virtual_terminal;

/// 键盘/显示器"（Keyboard/Display）模式
#[allow(dead_code)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum KDMode {
    #[default]
    KdText,
    KdGraphics,
    KdText0,
    KdText1,
}

impl KDMode {
    pub const KD_TEXT: u32 = 0x00;
    pub const KD_GRAPHICS: u32 = 0x01;
    pub const KD_TEXT0: u32 = 0x02;
    pub const KD_TEXT1: u32 = 0x03;

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            Self::KD_TEXT => Some(Self::KdText),
            Self::KD_GRAPHICS => Some(Self::KdGraphics),
            Self::KD_TEXT0 => Some(Self::KdText0),
            Self::KD_TEXT1 => Some(Self::KdText1),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::KdText => Self::KD_TEXT,
            Self::KdGraphics => Self::KD_GRAPHICS,
            Self::KdText0 => Self::KD_TEXT0,
            Self::KdText1 => Self::KD_TEXT1,
        }
    }

    /// 文本类模式都由终端模拟器负责绘制
    #[inline]
    pub fn is_text(&self) -> bool {
        *self != KDMode::KdGraphics
    }
}

/// 控制台字体。每个字形固定占用32行，每行 (width + 7) / 8 字节
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsoleFont {
    pub width: u32,
    pub height: u32,
    pub count: u32,
    pub data: Vec<u8>,
}

impl ConsoleFont {
    /// 一个字形在data中占据的字节数
    pub fn glyph_stride(width: u32) -> usize {
        ((width as usize + 7) / 8) * 32
    }

    pub fn expected_len(&self) -> usize {
        Self::glyph_stride(self.width) * self.count as usize
    }
}
