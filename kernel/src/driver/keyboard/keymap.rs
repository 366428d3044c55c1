//! 键码 -> keysym 的映射表、功能键字符串以及死键组合表
//!
//! keysym 的格式与linux相同：`0xf000 | 类型 << 8 | 值`，小于0xf000的keysym是unicode字符。

/// 每个键盘映射表包含的键码数量
pub const NR_KEYS: usize = 128;
/// shift组合的数量，也就是映射表的最大数量
pub const MAX_NR_KEYMAPS: usize = 256;
/// 功能键字符串的数量
pub const MAX_NR_FUNC: usize = 256;
/// 死键组合表最多的条目
pub const MAX_DIACR: usize = 256;
/// 单个功能键字符串的最大长度
pub const MAX_FUNC_LEN: usize = 512;

// keysym的类型
pub const KT_LATIN: u8 = 0;
pub const KT_FN: u8 = 1;
pub const KT_SPEC: u8 = 2;
pub const KT_PAD: u8 = 3;
pub const KT_DEAD: u8 = 4;
pub const KT_CONS: u8 = 5;
pub const KT_CUR: u8 = 6;
pub const KT_SHIFT: u8 = 7;
pub const KT_META: u8 = 8;
pub const KT_ASCII: u8 = 9;
pub const KT_LOCK: u8 = 10;
pub const KT_LETTER: u8 = 11;
pub const KT_SLOCK: u8 = 12;
pub const KT_DEAD2: u8 = 13;
pub const NR_TYPES: u8 = 16;

/// 构造一个keysym
pub const fn k(ty: u8, val: u8) -> u16 {
    0xf000 | ((ty as u16) << 8) | val as u16
}

/// keysym的类型（去掉0xf0前缀之前）
#[inline]
pub const fn ktyp(keysym: u16) -> u8 {
    (keysym >> 8) as u8
}

#[inline]
pub const fn kval(keysym: u16) -> u8 {
    (keysym & 0xff) as u8
}

// shift类按键的编号，同时也是shift_state中的位
pub const KG_SHIFT: u8 = 0;
pub const KG_ALTGR: u8 = 1;
pub const KG_CTRL: u8 = 2;
pub const KG_ALT: u8 = 3;
pub const KG_SHIFTL: u8 = 4;
pub const KG_SHIFTR: u8 = 5;
pub const KG_CTRLL: u8 = 6;
pub const KG_CTRLR: u8 = 7;
pub const KG_CAPSSHIFT: u8 = 8;
pub const NR_SHIFT: u8 = 9;

pub const K_SHIFT: u16 = k(KT_SHIFT, KG_SHIFT);
pub const K_CTRL: u16 = k(KT_SHIFT, KG_CTRL);
pub const K_ALT: u16 = k(KT_SHIFT, KG_ALT);
pub const K_ALTGR: u16 = k(KT_SHIFT, KG_ALTGR);
pub const K_CAPSSHIFT: u16 = k(KT_SHIFT, KG_CAPSSHIFT);

// KT_SPEC
pub const K_HOLE: u16 = k(KT_SPEC, 0);
pub const K_ENTER: u16 = k(KT_SPEC, 1);
pub const K_SH_REGS: u16 = k(KT_SPEC, 2);
pub const K_SH_MEM: u16 = k(KT_SPEC, 3);
pub const K_SH_STAT: u16 = k(KT_SPEC, 4);
pub const K_BREAK: u16 = k(KT_SPEC, 5);
pub const K_CONS: u16 = k(KT_SPEC, 6);
pub const K_CAPS: u16 = k(KT_SPEC, 7);
pub const K_NUM: u16 = k(KT_SPEC, 8);
pub const K_HOLD: u16 = k(KT_SPEC, 9);
pub const K_SCROLLFORW: u16 = k(KT_SPEC, 10);
pub const K_SCROLLBACK: u16 = k(KT_SPEC, 11);
pub const K_BOOT: u16 = k(KT_SPEC, 12);
pub const K_CAPSON: u16 = k(KT_SPEC, 13);
pub const K_COMPOSE: u16 = k(KT_SPEC, 14);
pub const K_SAK: u16 = k(KT_SPEC, 15);
pub const K_DECRCONSOLE: u16 = k(KT_SPEC, 16);
pub const K_INCRCONSOLE: u16 = k(KT_SPEC, 17);
pub const K_SPAWNCONSOLE: u16 = k(KT_SPEC, 18);
pub const K_BARENUMLOCK: u16 = k(KT_SPEC, 19);
/// 映射表第0项为该值表示映射表是动态分配的
pub const K_ALLOCATED: u16 = k(KT_SPEC, 126);
/// KDGKBENT查询不存在的映射表时返回
pub const K_NOSUCHMAP: u16 = k(KT_SPEC, 127);
pub const NR_SPEC: u8 = 20;

// KT_FN
pub const K_F1: u16 = k(KT_FN, 0);
pub const K_FIND: u16 = k(KT_FN, 20);
pub const K_INSERT: u16 = k(KT_FN, 21);
pub const K_REMOVE: u16 = k(KT_FN, 22);
pub const K_SELECT: u16 = k(KT_FN, 23);
pub const K_PGUP: u16 = k(KT_FN, 24);
pub const K_PGDN: u16 = k(KT_FN, 25);
pub const K_MACRO: u16 = k(KT_FN, 26);
pub const K_HELP: u16 = k(KT_FN, 27);
pub const K_DO: u16 = k(KT_FN, 28);
pub const K_PAUSE: u16 = k(KT_FN, 29);

// KT_PAD
pub const K_P0: u8 = 0;
pub const K_P1: u8 = 1;
pub const K_P2: u8 = 2;
pub const K_P3: u8 = 3;
pub const K_P4: u8 = 4;
pub const K_P5: u8 = 5;
pub const K_P6: u8 = 6;
pub const K_P7: u8 = 7;
pub const K_P8: u8 = 8;
pub const K_P9: u8 = 9;
pub const K_PPLUS: u8 = 10;
pub const K_PMINUS: u8 = 11;
pub const K_PSTAR: u8 = 12;
pub const K_PSLASH: u8 = 13;
pub const K_PENTER: u8 = 14;
pub const K_PCOMMA: u8 = 15;
pub const K_PDOT: u8 = 16;
pub const NR_PAD: u8 = 20;

// KT_CUR
pub const K_DOWN: u8 = 0;
pub const K_LEFT: u8 = 1;
pub const K_RIGHT: u8 = 2;
pub const K_UP: u8 = 3;

// KT_DEAD
pub const K_DGRAVE: u16 = k(KT_DEAD, 0);
pub const K_DACUTE: u16 = k(KT_DEAD, 1);
pub const K_DCIRCM: u16 = k(KT_DEAD, 2);
pub const K_DTILDE: u16 = k(KT_DEAD, 3);
pub const K_DDIERE: u16 = k(KT_DEAD, 4);
pub const K_DCEDIL: u16 = k(KT_DEAD, 5);
pub const NR_DEAD: u8 = 6;

/// 死键对应的重音字符
pub const RET_DIACR: [u8; NR_DEAD as usize] = [b'`', b'\'', b'^', b'~', b'"', b','];

pub const NR_ASCII: u8 = 26;
pub const NR_LOCK: u8 = 8;

/// 每种类型允许的最大值，KDSKBENT用来校验
pub const MAX_VALS: [u8; NR_TYPES as usize] = [
    255,
    (MAX_NR_FUNC - 1) as u8,
    NR_SPEC - 1,
    NR_PAD - 1,
    NR_DEAD - 1,
    255,
    3,
    NR_SHIFT - 1,
    255,
    NR_ASCII - 1,
    NR_LOCK - 1,
    255,
    NR_LOCK - 1,
    255,
    255,
    255,
];

/// 死键组合：重音 + 基础字符 -> 结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KbDiacr {
    pub diacr: u8,
    pub base: u8,
    pub result: u8,
}

impl KbDiacr {
    pub const fn new(diacr: u8, base: u8, result: u8) -> Self {
        Self { diacr, base, result }
    }
}

pub type KeyMap = [u16; NR_KEYS];

const fn latin(ch: u8) -> u16 {
    k(KT_LATIN, ch)
}

const fn letter(ch: u8) -> u16 {
    k(KT_LETTER, ch)
}

/// 美式键盘，按键码排列的无修饰字符
const PLAIN_KEYS: &[(usize, u8)] = &[
    (2, b'1'),
    (3, b'2'),
    (4, b'3'),
    (5, b'4'),
    (6, b'5'),
    (7, b'6'),
    (8, b'7'),
    (9, b'8'),
    (10, b'9'),
    (11, b'0'),
    (12, b'-'),
    (13, b'='),
    (26, b'['),
    (27, b']'),
    (39, b';'),
    (40, b'\''),
    (41, b'`'),
    (43, b'\\'),
    (51, b','),
    (52, b'.'),
    (53, b'/'),
    (57, b' '),
    (86, b'<'),
];

/// 同样的位置按下shift之后的字符
const SHIFT_KEYS: &[(usize, u8)] = &[
    (2, b'!'),
    (3, b'@'),
    (4, b'#'),
    (5, b'$'),
    (6, b'%'),
    (7, b'^'),
    (8, b'&'),
    (9, b'*'),
    (10, b'('),
    (11, b')'),
    (12, b'_'),
    (13, b'+'),
    (26, b'{'),
    (27, b'}'),
    (39, b':'),
    (40, b'"'),
    (41, b'~'),
    (43, b'|'),
    (51, b'<'),
    (52, b'>'),
    (53, b'?'),
    (57, b' '),
    (86, b'>'),
];

/// 字母键的键码，按字母顺序
const LETTER_KEYS: [usize; 26] = [
    30, 48, 46, 32, 18, 33, 34, 35, 23, 36, 37, 38, 50, 49, 24, 25, 16, 19, 31, 20, 22, 47, 17,
    45, 21, 44,
];

/// 各映射表共用的按键：修饰键、光标键、小键盘等
fn common_keys(map: &mut KeyMap) {
    map[1] = latin(0x1b);
    map[14] = latin(0x7f);
    map[15] = latin(b'\t');
    map[28] = K_ENTER;
    map[29] = K_CTRL;
    map[42] = K_SHIFT;
    map[54] = K_SHIFT;
    map[55] = k(KT_PAD, K_PSTAR);
    map[56] = K_ALT;
    map[58] = K_CAPS;
    map[69] = K_NUM;
    map[70] = K_HOLD;

    let pad: [(usize, u8); 13] = [
        (71, K_P7),
        (72, K_P8),
        (73, K_P9),
        (74, K_PMINUS),
        (75, K_P4),
        (76, K_P5),
        (77, K_P6),
        (78, K_PPLUS),
        (79, K_P1),
        (80, K_P2),
        (81, K_P3),
        (82, K_P0),
        (83, K_PDOT),
    ];
    for (code, val) in pad {
        map[code] = k(KT_PAD, val);
    }

    map[96] = k(KT_PAD, K_PENTER);
    map[97] = K_CTRL;
    map[98] = k(KT_PAD, K_PSLASH);
    map[99] = latin(0x1c);
    map[100] = K_ALTGR;
    map[101] = K_BREAK;
    map[102] = K_FIND;
    map[103] = k(KT_CUR, K_UP);
    map[104] = K_PGUP;
    map[105] = k(KT_CUR, K_LEFT);
    map[106] = k(KT_CUR, K_RIGHT);
    map[107] = K_SELECT;
    map[108] = k(KT_CUR, K_DOWN);
    map[109] = K_PGDN;
    map[110] = K_INSERT;
    map[111] = K_REMOVE;
    map[119] = K_PAUSE;
}

/// F1~F10, F11, F12 的键码
const FKEY_CODES: [usize; 12] = [59, 60, 61, 62, 63, 64, 65, 66, 67, 68, 87, 88];

fn plain_map() -> KeyMap {
    let mut map = [K_HOLE; NR_KEYS];
    common_keys(&mut map);
    for (code, ch) in PLAIN_KEYS {
        map[*code] = latin(*ch);
    }
    for (i, code) in LETTER_KEYS.iter().enumerate() {
        map[*code] = letter(b'a' + i as u8);
    }
    for (i, code) in FKEY_CODES.iter().enumerate() {
        map[*code] = k(KT_FN, i as u8);
    }
    map[84] = K_CONS;
    map
}

fn shift_map() -> KeyMap {
    let mut map = [K_HOLE; NR_KEYS];
    common_keys(&mut map);
    for (code, ch) in SHIFT_KEYS {
        map[*code] = latin(*ch);
    }
    for (i, code) in LETTER_KEYS.iter().enumerate() {
        map[*code] = letter(b'A' + i as u8);
    }
    // shift+F1 对应 F11
    for (i, code) in FKEY_CODES.iter().enumerate() {
        map[*code] = k(KT_FN, 10 + i as u8);
    }
    map[104] = K_SCROLLBACK;
    map[109] = K_SCROLLFORW;
    map
}

fn altgr_map() -> KeyMap {
    let mut map = [K_HOLE; NR_KEYS];
    common_keys(&mut map);
    map[3] = latin(b'@');
    map[9] = latin(b'{');
    map[10] = latin(b'[');
    map[11] = latin(b']');
    map[12] = latin(b'\\');
    map[40] = K_DACUTE;
    map[41] = K_DGRAVE;
    map[7] = K_DCIRCM;
    for (i, code) in FKEY_CODES.iter().enumerate() {
        map[*code] = k(KT_CONS, 12 + i as u8);
    }
    map
}

fn ctrl_map() -> KeyMap {
    let mut map = [K_HOLE; NR_KEYS];
    common_keys(&mut map);
    map[3] = latin(0x00);
    map[4] = latin(0x1b);
    map[5] = latin(0x1c);
    map[6] = latin(0x1d);
    map[7] = latin(0x1e);
    map[8] = latin(0x1f);
    map[9] = latin(0x7f);
    map[12] = latin(0x1f);
    map[14] = latin(0x08);
    map[26] = latin(0x1b);
    map[27] = latin(0x1d);
    map[43] = latin(0x1c);
    map[57] = latin(0x00);
    for (i, code) in LETTER_KEYS.iter().enumerate() {
        map[*code] = latin(1 + i as u8);
    }
    for (i, code) in FKEY_CODES.iter().enumerate() {
        map[*code] = k(KT_FN, i as u8);
    }
    map
}

fn alt_map() -> KeyMap {
    let mut map = [K_HOLE; NR_KEYS];
    common_keys(&mut map);
    for (code, ch) in PLAIN_KEYS {
        map[*code] = k(KT_META, *ch);
    }
    for (i, code) in LETTER_KEYS.iter().enumerate() {
        map[*code] = k(KT_META, b'a' + i as u8);
    }
    for (i, code) in FKEY_CODES.iter().enumerate() {
        map[*code] = k(KT_CONS, i as u8);
    }
    // alt + 小键盘数字输入字符编码
    let pad_digits: [(usize, u8); 10] = [
        (82, 0),
        (79, 1),
        (80, 2),
        (81, 3),
        (75, 4),
        (76, 5),
        (77, 6),
        (71, 7),
        (72, 8),
        (73, 9),
    ];
    for (code, val) in pad_digits {
        map[code] = k(KT_ASCII, val);
    }
    map[105] = K_DECRCONSOLE;
    map[106] = K_INCRCONSOLE;
    map
}

fn ctrl_alt_map() -> KeyMap {
    let mut map = [K_HOLE; NR_KEYS];
    common_keys(&mut map);
    for (i, code) in LETTER_KEYS.iter().enumerate() {
        map[*code] = k(KT_META, 1 + i as u8);
    }
    for (i, code) in FKEY_CODES.iter().enumerate() {
        map[*code] = k(KT_CONS, i as u8);
    }
    map[111] = K_BOOT;
    map
}

/// ## 默认的映射表
/// 下标是shift_state：0无修饰，1 shift，2 altgr，4 ctrl，5 shift+ctrl，8 alt，12 ctrl+alt
pub fn default_keymaps() -> Vec<Option<Box<KeyMap>>> {
    let mut maps: Vec<Option<Box<KeyMap>>> = (0..MAX_NR_KEYMAPS).map(|_| None).collect();
    maps[0] = Some(Box::new(plain_map()));
    maps[1] = Some(Box::new(shift_map()));
    maps[2] = Some(Box::new(altgr_map()));
    maps[4] = Some(Box::new(ctrl_map()));
    maps[5] = Some(Box::new(ctrl_map()));
    maps[8] = Some(Box::new(alt_map()));
    maps[12] = Some(Box::new(ctrl_alt_map()));
    maps
}

/// ## 默认的功能键字符串
pub fn default_func_table() -> Vec<Option<Vec<u8>>> {
    const FUNCS: [&[u8]; 30] = [
        b"\x1b[[A", b"\x1b[[B", b"\x1b[[C", b"\x1b[[D", b"\x1b[[E", b"\x1b[17~", b"\x1b[18~",
        b"\x1b[19~", b"\x1b[20~", b"\x1b[21~", b"\x1b[23~", b"\x1b[24~", b"\x1b[25~",
        b"\x1b[26~", b"\x1b[28~", b"\x1b[29~", b"\x1b[31~", b"\x1b[32~", b"\x1b[33~",
        b"\x1b[34~", b"\x1b[1~", b"\x1b[2~", b"\x1b[3~", b"\x1b[4~", b"\x1b[5~", b"\x1b[6~",
        b"\x1b[M", b"", b"", b"\x1b[P",
    ];
    let mut table: Vec<Option<Vec<u8>>> = vec![None; MAX_NR_FUNC];
    for (i, s) in FUNCS.iter().enumerate() {
        table[i] = Some(s.to_vec());
    }
    table
}

/// ## 默认的死键组合表（ISO-8859-1）
pub fn default_accent_table() -> Vec<KbDiacr> {
    const GRAVE: [(u8, u8); 10] = [
        (b'A', 0xc0),
        (b'a', 0xe0),
        (b'E', 0xc8),
        (b'e', 0xe8),
        (b'I', 0xcc),
        (b'i', 0xec),
        (b'O', 0xd2),
        (b'o', 0xf2),
        (b'U', 0xd9),
        (b'u', 0xf9),
    ];
    const ACUTE: [(u8, u8); 12] = [
        (b'A', 0xc1),
        (b'a', 0xe1),
        (b'E', 0xc9),
        (b'e', 0xe9),
        (b'I', 0xcd),
        (b'i', 0xed),
        (b'O', 0xd3),
        (b'o', 0xf3),
        (b'U', 0xda),
        (b'u', 0xfa),
        (b'Y', 0xdd),
        (b'y', 0xfd),
    ];
    const CIRCM: [(u8, u8); 10] = [
        (b'A', 0xc2),
        (b'a', 0xe2),
        (b'E', 0xca),
        (b'e', 0xea),
        (b'I', 0xce),
        (b'i', 0xee),
        (b'O', 0xd4),
        (b'o', 0xf4),
        (b'U', 0xdb),
        (b'u', 0xfb),
    ];
    const TILDE: [(u8, u8); 6] = [
        (b'A', 0xc3),
        (b'a', 0xe3),
        (b'N', 0xd1),
        (b'n', 0xf1),
        (b'O', 0xd5),
        (b'o', 0xf5),
    ];
    const DIERE: [(u8, u8); 11] = [
        (b'A', 0xc4),
        (b'a', 0xe4),
        (b'E', 0xcb),
        (b'e', 0xeb),
        (b'I', 0xcf),
        (b'i', 0xef),
        (b'O', 0xd6),
        (b'o', 0xf6),
        (b'U', 0xdc),
        (b'u', 0xfc),
        (b'y', 0xff),
    ];
    const CEDIL: [(u8, u8); 2] = [(b'C', 0xc7), (b'c', 0xe7)];

    let groups: [(u8, &[(u8, u8)]); 6] = [
        (b'`', &GRAVE),
        (b'\'', &ACUTE),
        (b'^', &CIRCM),
        (b'~', &TILDE),
        (b'"', &DIERE),
        (b',', &CEDIL),
    ];
    let mut table = Vec::new();
    for (diacr, entries) in groups {
        for (base, result) in entries {
            table.push(KbDiacr::new(diacr, *base, *result));
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keysym_layout() {
        assert_eq!(K_ENTER, 0xf201);
        assert_eq!(K_SHIFT, 0xf700);
        assert_eq!(ktyp(K_DACUTE), 0xf0 + KT_DEAD);
        assert_eq!(kval(K_DACUTE), 1);
    }

    #[test]
    fn test_default_maps() {
        let maps = default_keymaps();
        let plain = maps[0].as_ref().unwrap();
        assert_eq!(plain[30], letter(b'a'));
        assert_eq!(plain[2], latin(b'1'));
        assert_eq!(plain[59], K_F1);
        assert_eq!(plain[0], K_HOLE);
        let shift = maps[1].as_ref().unwrap();
        assert_eq!(shift[16], letter(b'Q'));
        assert_eq!(shift[2], latin(b'!'));
        let ctrl = maps[4].as_ref().unwrap();
        assert_eq!(ctrl[46], latin(3));
        assert!(maps[3].is_none());
        // alt+F2 切换到第2个控制台
        assert_eq!(maps[8].as_ref().unwrap()[60], k(KT_CONS, 1));
    }

    #[test]
    fn test_accent_table() {
        let table = default_accent_table();
        assert!(table.contains(&KbDiacr::new(b'\'', b'e', 0xe9)));
        assert!(table.len() <= MAX_DIACR);
    }
}
