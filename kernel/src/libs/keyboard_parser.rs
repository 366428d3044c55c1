#[allow(dead_code)]
pub const NUM_SCAN_CODES: u8 = 0x80;

pub const TYPE1_KEYCODE_FLAG_BREAK: u8 = 0x80; // 用于判断按键是否被按下

/// Pause键只有按下码，它被翻译成的键码
pub const KEYCODE_PAUSE: u8 = 119;

/// 第一类扫描码翻译得到的按键事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// linux键码，范围 1..128
    pub keycode: u8,
    /// 按键是否被按下
    pub down: bool,
}

impl KeyEvent {
    pub const fn new(keycode: u8, down: bool) -> Self {
        Self { keycode, down }
    }
}

/// @brief A FSM to parse type one keyboard scan code
#[derive(Debug)]
pub struct TypeOneFSM {
    current_state: TypeOneFSMState,
}

impl Default for TypeOneFSM {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeOneFSM {
    pub fn new() -> Self {
        Self {
            current_state: TypeOneFSMState::Start,
        }
    }

    /// @brief 解析扫描码
    ///
    /// 多字节序列的中间字节返回None，序列结束时返回对应的按键事件
    pub fn parse(&mut self, scancode: u8) -> Option<KeyEvent> {
        let (next, event) = self.current_state.parse(scancode);
        self.current_state = next;
        event
    }

    pub fn state(&self) -> TypeOneFSMState {
        self.current_state
    }
}

/// @brief 第一类扫描码状态机的状态
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TypeOneFSMState {
    /// 起始状态
    Start,
    /// PauseBreak 第n个扫描码
    PauseBreak(u8),
    /// 0xe0 前缀之后
    Func0,
}

impl TypeOneFSMState {
    /// @brief 状态机总控程序
    fn parse(&self, scancode: u8) -> (TypeOneFSMState, Option<KeyEvent>) {
        match self {
            TypeOneFSMState::Start => {
                return Self::handle_start(scancode);
            }
            TypeOneFSMState::PauseBreak(n) => {
                return Self::handle_pause_break(*n, scancode);
            }
            TypeOneFSMState::Func0 => {
                return (TypeOneFSMState::Start, Self::handle_func0(scancode));
            }
        }
    }

    /// @brief 处理起始状态
    fn handle_start(scancode: u8) -> (TypeOneFSMState, Option<KeyEvent>) {
        match scancode {
            0xe1 => {
                return (TypeOneFSMState::PauseBreak(1), None);
            }
            0xe0 => {
                return (TypeOneFSMState::Func0, None);
            }
            _ => {
                return (TypeOneFSMState::Start, Self::handle_type3(scancode));
            }
        }
    }

    /// @brief 处理PauseBreak状态
    fn handle_pause_break(i: u8, scancode: u8) -> (TypeOneFSMState, Option<KeyEvent>) {
        static PAUSE_BREAK_SCAN_CODE: [u8; 6] = [0xe1, 0x1d, 0x45, 0xe1, 0x9d, 0xc5];
        if scancode != PAUSE_BREAK_SCAN_CODE[i as usize] {
            // 序列被打断，当作普通扫描码重新解析
            return Self::handle_start(scancode);
        }
        match i {
            // 按下部分结束
            2 => (
                TypeOneFSMState::PauseBreak(3),
                Some(KeyEvent::new(KEYCODE_PAUSE, true)),
            ),
            // 所有Pause Break扫描码都被清除
            5 => (
                TypeOneFSMState::Start,
                Some(KeyEvent::new(KEYCODE_PAUSE, false)),
            ),
            _ => (TypeOneFSMState::PauseBreak(i + 1), None),
        }
    }

    /// 0xe0前缀的扫描码，对应linux的e0_keys表
    fn handle_func0(scancode: u8) -> Option<KeyEvent> {
        let down = scancode & TYPE1_KEYCODE_FLAG_BREAK == 0;
        let keycode = match scancode & 0x7f {
            0x1c => 96,  // KP Enter
            0x1d => 97,  // 右ctrl
            0x35 => 98,  // KP /
            0x37 => 99,  // PrintScreen
            0x38 => 100, // 右alt
            0x46 => 101, // Break
            0x47 => 102, // Home
            0x48 => 103, // Up
            0x49 => 104, // PgUp
            0x4b => 105, // Left
            0x4d => 106, // Right
            0x4f => 107, // End
            0x50 => 108, // Down
            0x51 => 109, // PgDn
            0x52 => 110, // Insert
            0x53 => 111, // Delete
            0x5b => 125, // 左gui
            0x5c => 126, // 右gui
            0x5d => 127, // apps
            // 0x2a/0x36 是PrintScreen等键附带的假shift，丢弃
            _ => return None,
        };
        return Some(KeyEvent::new(keycode, down));
    }

    /// 单字节扫描码，键码与扫描码相同
    fn handle_type3(scancode: u8) -> Option<KeyEvent> {
        let keycode = scancode & 0x7f;
        if keycode == 0 {
            return None;
        }
        return Some(KeyEvent::new(
            keycode,
            scancode & TYPE1_KEYCODE_FLAG_BREAK == 0,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_scancode() {
        let mut fsm = TypeOneFSM::new();
        // 'a' 按下与松开
        assert_eq!(fsm.parse(0x1e), Some(KeyEvent::new(30, true)));
        assert_eq!(fsm.parse(0x9e), Some(KeyEvent::new(30, false)));
    }

    #[test]
    fn test_e0_prefix() {
        let mut fsm = TypeOneFSM::new();
        assert_eq!(fsm.parse(0xe0), None);
        assert_eq!(fsm.state(), TypeOneFSMState::Func0);
        assert_eq!(fsm.parse(0x48), Some(KeyEvent::new(103, true)));
        assert_eq!(fsm.state(), TypeOneFSMState::Start);
        // 假shift被丢弃
        assert_eq!(fsm.parse(0xe0), None);
        assert_eq!(fsm.parse(0x2a), None);
        assert_eq!(fsm.parse(0xe0), None);
        assert_eq!(fsm.parse(0xcb), Some(KeyEvent::new(105, false)));
    }

    #[test]
    fn test_pause_sequence() {
        let mut fsm = TypeOneFSM::new();
        let events: Vec<_> = [0xe1u8, 0x1d, 0x45, 0xe1, 0x9d, 0xc5]
            .iter()
            .filter_map(|sc| fsm.parse(*sc))
            .collect();
        assert_eq!(
            events,
            vec![
                KeyEvent::new(KEYCODE_PAUSE, true),
                KeyEvent::new(KEYCODE_PAUSE, false)
            ]
        );
        assert_eq!(fsm.state(), TypeOneFSMState::Start);
    }
}
