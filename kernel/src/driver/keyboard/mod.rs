//! 键盘：键码翻译、映射表以及死键

pub mod kbd;
pub mod keymap;
