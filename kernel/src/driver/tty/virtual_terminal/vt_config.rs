use log::warn;

use crate::init::cmdline::KernelCmdline;

use super::{
    DEFAULT_BLUE, DEFAULT_GREEN, DEFAULT_RED, MAX_NR_CONSOLES, VC_MAXCOL, VC_MAXROW,
};

/// 光标形状：下划线
pub const CUR_UNDERLINE: u32 = 1;
pub const CUR_DEFAULT: u32 = CUR_UNDERLINE;

/// 虚拟终端的可配置项，来源于启动命令行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VtConfig {
    /// console loglevel，0~7
    pub loglevel: u8,
    /// 无操作多少秒后消隐，0表示不消隐
    pub blank_timeout_secs: u32,
    pub default_utf8: bool,
    pub cur_default: u32,
    /// -1表示由各控制台自行决定是否显示光标
    pub global_cursor_default: i32,
    pub default_color: u8,
    pub underline_color: u8,
    pub italic_color: u8,
    /// 每个控制台保留的回滚行数
    pub scrollback_lines: usize,
    pub cols: usize,
    pub rows: usize,
    /// 每个显示设备拥有的控制台数量
    pub consoles: usize,
    pub default_red: [u8; 16],
    pub default_green: [u8; 16],
    pub default_blue: [u8; 16],
}

impl Default for VtConfig {
    fn default() -> Self {
        Self {
            loglevel: 7,
            blank_timeout_secs: 10 * 60,
            default_utf8: true,
            cur_default: CUR_DEFAULT,
            global_cursor_default: -1,
            default_color: 7,
            underline_color: 0x0f,
            italic_color: 2,
            scrollback_lines: 256,
            cols: 80,
            rows: 25,
            consoles: MAX_NR_CONSOLES,
            default_red: DEFAULT_RED,
            default_green: DEFAULT_GREEN,
            default_blue: DEFAULT_BLUE,
        }
    }
}

impl VtConfig {
    pub fn from_cmdline(cmdline: &KernelCmdline) -> Self {
        let mut config = Self::default();

        if let Some(level) = cmdline.value_parse::<u8>("loglevel") {
            if level <= 7 {
                config.loglevel = level;
            } else {
                warn!("vt: loglevel {} out of range", level);
            }
        }
        if let Some(secs) = cmdline.value_parse::<u32>("consoleblank") {
            config.blank_timeout_secs = secs;
        }
        if let Some(utf8) = cmdline.value_bool("vt.default_utf8") {
            config.default_utf8 = utf8;
        }
        if let Some(cur) = cmdline.value_parse::<u32>("vt.cur_default") {
            config.cur_default = cur;
        }
        if let Some(g) = cmdline.value_parse::<i32>("vt.global_cursor_default") {
            config.global_cursor_default = g;
        }
        if let Some(c) = cmdline.value_parse::<u8>("vt.color") {
            config.default_color = c;
        }
        if let Some(c) = cmdline.value_parse::<u8>("vt.underline") {
            config.underline_color = c;
        }
        if let Some(c) = cmdline.value_parse::<u8>("vt.italic") {
            config.italic_color = c;
        }
        if let Some(lines) = cmdline.value_parse::<usize>("vt.scrollback") {
            config.scrollback_lines = lines;
        }
        if let Some(cols) = cmdline.value_parse::<usize>("vt.cols") {
            if (1..=VC_MAXCOL).contains(&cols) {
                config.cols = cols;
            } else {
                warn!("vt: invalid vt.cols {}", cols);
            }
        }
        if let Some(rows) = cmdline.value_parse::<usize>("vt.rows") {
            if (1..=VC_MAXROW).contains(&rows) {
                config.rows = rows;
            } else {
                warn!("vt: invalid vt.rows {}", rows);
            }
        }
        if let Some(n) = cmdline.value_parse::<usize>("vt.consoles") {
            if (1..=MAX_NR_CONSOLES).contains(&n) {
                config.consoles = n;
            } else {
                warn!("vt: invalid vt.consoles {}", n);
            }
        }
        if let Some(v) = Self::palette_param(cmdline, "vt.default_red") {
            config.default_red = v;
        }
        if let Some(v) = Self::palette_param(cmdline, "vt.default_grn") {
            config.default_green = v;
        }
        if let Some(v) = Self::palette_param(cmdline, "vt.default_blu") {
            config.default_blue = v;
        }

        config
    }

    pub fn blank_timeout_ms(&self) -> u64 {
        self.blank_timeout_secs as u64 * 1000
    }

    /// 调色板参数可以只给出前几项，其余保持默认
    fn palette_param(cmdline: &KernelCmdline, name: &str) -> Option<[u8; 16]> {
        let list = cmdline.value_list::<u8>(name)?;
        if list.len() > 16 {
            warn!("vt: too many entries for {}", name);
            return None;
        }
        let mut ret = match name {
            "vt.default_red" => DEFAULT_RED,
            "vt.default_grn" => DEFAULT_GREEN,
            _ => DEFAULT_BLUE,
        };
        ret[..list.len()].copy_from_slice(&list);
        Some(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cmdline_is_default() {
        let config = VtConfig::from_cmdline(&KernelCmdline::parse(""));
        assert_eq!(config, VtConfig::default());
    }

    #[test]
    fn test_cmdline_overrides() {
        let cmdline = KernelCmdline::parse(
            "consoleblank=0 vt.default_utf8=0 vt.cols=132 vt.rows=43 vt.consoles=4 vt.default_red=1,2",
        );
        let config = VtConfig::from_cmdline(&cmdline);
        assert_eq!(config.blank_timeout_secs, 0);
        assert!(!config.default_utf8);
        assert_eq!((config.cols, config.rows), (132, 43));
        assert_eq!(config.consoles, 4);
        assert_eq!(config.default_red[0], 1);
        assert_eq!(config.default_red[1], 2);
        assert_eq!(config.default_red[2], DEFAULT_RED[2]);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cmdline = KernelCmdline::parse("vt.cols=0 vt.consoles=100 loglevel=9");
        let config = VtConfig::from_cmdline(&cmdline);
        assert_eq!(config.cols, 80);
        assert_eq!(config.consoles, MAX_NR_CONSOLES);
        assert_eq!(config.loglevel, 7);
    }
}
