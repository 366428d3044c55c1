//! 控制台显示后端

pub mod dummycon;
pub mod vgacon;
