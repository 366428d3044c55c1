pub mod keyboard;
pub mod tty;
pub mod video;
