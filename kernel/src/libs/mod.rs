pub mod keyboard_parser;
#[macro_use]
pub mod printk;
pub mod spinlock;
pub mod wait_queue;
