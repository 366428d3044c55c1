use core::str::FromStr;

use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KCmdlineParamType {
    /// bool类型参数
    Arg,
    /// key-value类型参数
    KV,
}

/// 一个解析后的启动参数，名字形如 `option` 或者 `node.option`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelCmdlineParameter {
    node: Option<String>,
    option: String,
    value: Option<String>,
}

impl KernelCmdlineParameter {
    pub fn name(&self) -> String {
        match &self.node {
            Some(node) => format!("{}.{}", node, self.option),
            None => self.option.clone(),
        }
    }

    pub fn ty(&self) -> KCmdlineParamType {
        if self.value.is_some() {
            KCmdlineParamType::KV
        } else {
            KCmdlineParamType::Arg
        }
    }

    /// 获取key-value类型参数的值
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_deref()
    }

    fn matches(&self, node: Option<&str>, option: &str) -> bool {
        self.node.as_deref() == node && self.option == option
    }
}

/// linux风格的启动命令行：`consoleblank=600 vt.default_utf8=0 quiet`
#[derive(Debug, Clone, Default)]
pub struct KernelCmdline {
    params: Vec<KernelCmdlineParameter>,
}

impl KernelCmdline {
    pub fn parse(cmdline: &str) -> Self {
        let mut params: Vec<KernelCmdlineParameter> = Vec::new();
        for argument in Self::split_args(cmdline) {
            if argument.is_empty() {
                continue;
            }
            // `--`以后的参数都是init进程的参数，控制台不关心
            if argument == "--" {
                break;
            }
            debug!("cmdline: argument: {:?} ", argument);
            let (node, option, value) = match Self::split_arg(argument) {
                Some(v) => v,
                None => continue,
            };
            if params.iter().any(|p| p.matches(node, option)) {
                warn!("cmdline: parameter {} is set twice", argument);
                continue;
            }
            params.push(KernelCmdlineParameter {
                node: node.map(|n| n.to_string()),
                option: option.to_string(),
                value: value.map(|v| v.trim_matches('"').to_string()),
            });
        }
        Self { params }
    }

    pub fn params(&self) -> &[KernelCmdlineParameter] {
        &self.params
    }

    pub fn find_param(&self, name: &str) -> Option<&KernelCmdlineParameter> {
        let (node, option) = match name.split_once('.') {
            Some((n, o)) => (Some(n), o),
            None => (None, name),
        };
        self.params.iter().find(|p| p.matches(node, option))
    }

    /// 获取bool类型参数的值：单独出现视为true，`=0/n/no/off` 视为false
    pub fn value_bool(&self, name: &str) -> Option<bool> {
        let param = self.find_param(name)?;
        match param.value_str() {
            None => Some(true),
            Some(v) => match v {
                "1" | "y" | "Y" | "yes" | "on" => Some(true),
                "0" | "n" | "N" | "no" | "off" => Some(false),
                _ => {
                    warn!("cmdline: invalid bool value for {}: {}", name, v);
                    None
                }
            },
        }
    }

    /// 获取并解析key-value类型参数，解析失败时打印警告并返回None
    pub fn value_parse<T: FromStr>(&self, name: &str) -> Option<T> {
        let raw = self.find_param(name)?.value_str()?;
        match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("cmdline: invalid value for {}: {}", name, raw);
                None
            }
        }
    }

    /// 获取以逗号分隔的列表参数
    pub fn value_list<T: FromStr>(&self, name: &str) -> Option<Vec<T>> {
        let raw = self.find_param(name)?.value_str()?;
        let mut ret = Vec::new();
        for item in raw.split(',') {
            match item.trim().parse::<T>() {
                Ok(v) => ret.push(v),
                Err(_) => {
                    warn!("cmdline: invalid list item for {}: {}", name, item);
                    return None;
                }
            }
        }
        Some(ret)
    }

    fn split_arg(arg: &str) -> Option<(Option<&str>, &str, Option<&str>)> {
        let mut iter = arg.splitn(2, '=');
        let key = iter.next()?;
        let value = iter.next().map(|v| v.trim());

        let mut iter = key.splitn(2, '.');
        let v1 = iter.next().map(|v| v.trim());
        let v2 = iter.next().map(|v| v.trim());

        let (node, option) = match (v1, v2) {
            (Some(option), None) => (None, option),
            (Some(node), Some(option)) if !node.is_empty() && !option.contains('.') => {
                (Some(node), option)
            }
            _ => {
                warn!("cmdline: invalid argument: {}", arg);
                return None;
            }
        };
        if option.is_empty() {
            warn!("cmdline: invalid argument: {}", arg);
            return None;
        }

        Some((node, option, value))
    }

    fn split_args(cmdline: &str) -> impl Iterator<Item = &str> {
        // 是否在引号内
        let mut in_quote = false;
        cmdline.split(move |c: char| {
            if c == '"' {
                in_quote = !in_quote;
            }
            !in_quote && c.is_whitespace()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kv_and_arg() {
        let cmdline = KernelCmdline::parse("quiet consoleblank=600  vt.default_utf8=0");
        assert_eq!(cmdline.params().len(), 3);
        assert_eq!(cmdline.value_bool("quiet"), Some(true));
        assert_eq!(cmdline.value_parse::<u32>("consoleblank"), Some(600));
        assert_eq!(cmdline.value_bool("vt.default_utf8"), Some(false));
        assert_eq!(
            cmdline.find_param("vt.default_utf8").map(|p| p.ty()),
            Some(KCmdlineParamType::KV)
        );
        assert!(cmdline.find_param("default_utf8").is_none());
    }

    #[test]
    fn test_first_value_wins() {
        let cmdline = KernelCmdline::parse("loglevel=3 loglevel=7");
        assert_eq!(cmdline.value_parse::<u8>("loglevel"), Some(3));
    }

    #[test]
    fn test_init_args_ignored() {
        let cmdline = KernelCmdline::parse("loglevel=4 -- consoleblank=1");
        assert!(cmdline.find_param("consoleblank").is_none());
    }

    #[test]
    fn test_list_and_malformed() {
        let cmdline = KernelCmdline::parse("vt.default_red=0,170,0x1 vt.cols=abc");
        // 0x1 不是十进制数字，整个列表作废
        assert_eq!(cmdline.value_list::<u8>("vt.default_red"), None);
        assert_eq!(cmdline.value_parse::<usize>("vt.cols"), None);
        let cmdline = KernelCmdline::parse("vt.default_grn=0,170");
        assert_eq!(cmdline.value_list::<u8>("vt.default_grn"), Some(vec![0, 170]));
    }

    #[test]
    fn test_quoted_value() {
        let cmdline = KernelCmdline::parse("console.name=\"tty 1\" x");
        assert_eq!(
            cmdline.find_param("console.name").and_then(|p| p.value_str()),
            Some("tty 1")
        );
        assert_eq!(cmdline.value_bool("x"), Some(true));
    }
}
