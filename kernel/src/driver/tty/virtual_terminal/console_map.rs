//! 字符集翻译表以及 unicode -> 字形 的映射
//!
//! 参考 linux-2.4/drivers/char/consolemap.c

use std::sync::Arc;

use hashbrown::HashMap;

use crate::libs::spinlock::SpinLock;

/// 翻译表大小
pub const E_TABSZ: usize = 256;
/// 直接访问字体的unicode区段起点
pub const UNI_DIRECT_BASE: u32 = 0xf000;
pub const UNI_DIRECT_MASK: u32 = 0x01ff;
/// 非法UTF-8序列的替代字符
pub const UNI_REPLACEMENT: u32 = 0xfffd;

/// 用户可以通过 PIO_SCRNMAP 修改的翻译表，同一个显示设备上的控制台共享
pub type UserTranslation = Arc<SpinLock<[u16; E_TABSZ]>>;

pub fn new_user_translation() -> UserTranslation {
    let mut map = [0u16; E_TABSZ];
    for (i, v) in map.iter_mut().enumerate() {
        *v = (UNI_DIRECT_BASE as usize | i) as u16;
    }
    Arc::new(SpinLock::new(map))
}

/// G0/G1可以指定的字符集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranslationMapType {
    /// ISO 8859-1
    #[default]
    Lat1,
    /// VT100 线框字符
    Graf,
    /// IBM PC 代码页 437
    IbmPc,
    /// 用户定义
    User,
}

impl TranslationMapType {
    /// ESC ( x / ESC ) x 中的字符
    pub fn from_designator(ch: u8) -> Option<Self> {
        match ch {
            b'0' => Some(Self::Graf),
            b'B' => Some(Self::Lat1),
            b'U' => Some(Self::IbmPc),
            b'K' => Some(Self::User),
            _ => None,
        }
    }

    /// 把一个8位字节翻译为unicode
    pub fn translate(&self, user: &UserTranslation, ch: u8) -> u32 {
        match self {
            TranslationMapType::Lat1 => ch as u32,
            TranslationMapType::Graf => graf_map(ch),
            TranslationMapType::IbmPc => CP437[ch as usize] as u32,
            TranslationMapType::User => user.lock()[ch as usize] as u32,
        }
    }
}

/// VT100 图形字符集，只有0x5f~0x7e与Latin-1不同
fn graf_map(ch: u8) -> u32 {
    const GRAF_HIGH: [u16; 32] = [
        0x00a0, 0x25c6, 0x2592, 0x2409, 0x240c, 0x240d, 0x240a, 0x00b0, 0x00b1, 0x2424, 0x240b,
        0x2518, 0x2510, 0x250c, 0x2514, 0x253c, 0x23ba, 0x23bb, 0x2500, 0x23bc, 0x23bd, 0x251c,
        0x2524, 0x2534, 0x252c, 0x2502, 0x2264, 0x2265, 0x03c0, 0x2260, 0x00a3, 0x00b7,
    ];
    match ch {
        0x5f..=0x7e => GRAF_HIGH[(ch - 0x5f) as usize] as u32,
        _ => ch as u32,
    }
}

/// 代码页437，下标是字形编号，值是该字形对应的unicode
#[rustfmt::skip]
pub const CP437: [u16; 256] = [
    0x0000, 0x263a, 0x263b, 0x2665, 0x2666, 0x2663, 0x2660, 0x2022,
    0x25d8, 0x25cb, 0x25d9, 0x2642, 0x2640, 0x266a, 0x266b, 0x263c,
    0x25b6, 0x25c0, 0x2195, 0x203c, 0x00b6, 0x00a7, 0x25ac, 0x21a8,
    0x2191, 0x2193, 0x2192, 0x2190, 0x221f, 0x2194, 0x25b2, 0x25bc,
    0x0020, 0x0021, 0x0022, 0x0023, 0x0024, 0x0025, 0x0026, 0x0027,
    0x0028, 0x0029, 0x002a, 0x002b, 0x002c, 0x002d, 0x002e, 0x002f,
    0x0030, 0x0031, 0x0032, 0x0033, 0x0034, 0x0035, 0x0036, 0x0037,
    0x0038, 0x0039, 0x003a, 0x003b, 0x003c, 0x003d, 0x003e, 0x003f,
    0x0040, 0x0041, 0x0042, 0x0043, 0x0044, 0x0045, 0x0046, 0x0047,
    0x0048, 0x0049, 0x004a, 0x004b, 0x004c, 0x004d, 0x004e, 0x004f,
    0x0050, 0x0051, 0x0052, 0x0053, 0x0054, 0x0055, 0x0056, 0x0057,
    0x0058, 0x0059, 0x005a, 0x005b, 0x005c, 0x005d, 0x005e, 0x005f,
    0x0060, 0x0061, 0x0062, 0x0063, 0x0064, 0x0065, 0x0066, 0x0067,
    0x0068, 0x0069, 0x006a, 0x006b, 0x006c, 0x006d, 0x006e, 0x006f,
    0x0070, 0x0071, 0x0072, 0x0073, 0x0074, 0x0075, 0x0076, 0x0077,
    0x0078, 0x0079, 0x007a, 0x007b, 0x007c, 0x007d, 0x007e, 0x2302,
    0x00c7, 0x00fc, 0x00e9, 0x00e2, 0x00e4, 0x00e0, 0x00e5, 0x00e7,
    0x00ea, 0x00eb, 0x00e8, 0x00ef, 0x00ee, 0x00ec, 0x00c4, 0x00c5,
    0x00c9, 0x00e6, 0x00c6, 0x00f4, 0x00f6, 0x00f2, 0x00fb, 0x00f9,
    0x00ff, 0x00d6, 0x00dc, 0x00a2, 0x00a3, 0x00a5, 0x20a7, 0x0192,
    0x00e1, 0x00ed, 0x00f3, 0x00fa, 0x00f1, 0x00d1, 0x00aa, 0x00ba,
    0x00bf, 0x2310, 0x00ac, 0x00bd, 0x00bc, 0x00a1, 0x00ab, 0x00bb,
    0x2591, 0x2592, 0x2593, 0x2502, 0x2524, 0x2561, 0x2562, 0x2556,
    0x2555, 0x2563, 0x2551, 0x2557, 0x255d, 0x255c, 0x255b, 0x2510,
    0x2514, 0x2534, 0x252c, 0x251c, 0x2500, 0x253c, 0x255e, 0x255f,
    0x255a, 0x2554, 0x2569, 0x2566, 0x2560, 0x2550, 0x256c, 0x2567,
    0x2568, 0x2564, 0x2565, 0x2559, 0x2558, 0x2552, 0x2553, 0x256b,
    0x256a, 0x2518, 0x250c, 0x2588, 0x2584, 0x258c, 0x2590, 0x2580,
    0x03b1, 0x00df, 0x0393, 0x03c0, 0x03a3, 0x03c3, 0x00b5, 0x03c4,
    0x03a6, 0x0398, 0x03a9, 0x03b4, 0x221e, 0x03c6, 0x03b5, 0x2229,
    0x2261, 0x00b1, 0x2265, 0x2264, 0x2320, 0x2321, 0x00f7, 0x2248,
    0x00b0, 0x2219, 0x00b7, 0x221a, 0x207f, 0x00b2, 0x25a0, 0x00a0,
];

lazy_static! {
    /// 默认字体(cp437)的 unicode -> 字形 映射
    static ref DEFAULT_UNIMAP: HashMap<u32, u16> = {
        let mut map = HashMap::with_capacity(300);
        for (glyph, uni) in CP437.iter().enumerate() {
            map.entry(*uni as u32).or_insert(glyph as u16);
        }
        // 字体里没有的常见字符，找一个样子相近的字形
        let aliases: [(u32, u8); 8] = [
            (0x00b7, 0xfa), // ·
            (0x2014, 0xc4), // EM DASH
            (0x2013, 0xc4), // –
            (0x00a6, 0xb3), // ¦
            (0x03b2, 0xe1), // β
            (0x2208, 0xee), // ∈
            (0x25c6, 0x04), // ◆
            (0x2126, 0xea), // Ω
        ];
        for (uni, glyph) in aliases {
            map.entry(uni).or_insert(glyph as u16);
        }
        map
    };
}

/// 把unicode转为默认字体中的字形编号，字体中没有该字符时返回None
pub fn conv_uni_to_pc(uni: u32) -> Option<u16> {
    // 直接访问字体的区段
    if uni & !UNI_DIRECT_MASK == UNI_DIRECT_BASE {
        return Some((uni & UNI_DIRECT_MASK) as u16);
    }
    DEFAULT_UNIMAP.get(&uni).copied()
}

/// 字形编号对应的字符，用于选区复制
pub fn glyph_to_char(glyph: u16) -> char {
    let uni = CP437[(glyph & 0xff) as usize] as u32;
    match uni {
        0 => ' ',
        _ => char::from_u32(uni).unwrap_or('?'),
    }
}

/// PIO_SCRNMAP：8位的用户翻译表，值是字体中的位置
pub fn con_set_trans_old(user: &UserTranslation, table: &[u8; E_TABSZ]) {
    let mut map = user.lock();
    for (dst, src) in map.iter_mut().zip(table.iter()) {
        *dst = (UNI_DIRECT_BASE | *src as u32) as u16;
    }
}

/// GIO_SCRNMAP：无法用8位表示的项返回0
pub fn con_get_trans_old(user: &UserTranslation) -> [u8; E_TABSZ] {
    let map = user.lock();
    let mut ret = [0u8; E_TABSZ];
    for (dst, src) in ret.iter_mut().zip(map.iter()) {
        *dst = match conv_uni_to_pc(*src as u32) {
            Some(glyph) if glyph <= 0xff => glyph as u8,
            _ => 0,
        };
    }
    ret
}

/// PIO_UNISCRNMAP
pub fn con_set_trans_new(user: &UserTranslation, table: &[u16; E_TABSZ]) {
    user.lock().copy_from_slice(table);
}

/// GIO_UNISCRNMAP
pub fn con_get_trans_new(user: &UserTranslation) -> [u16; E_TABSZ] {
    *user.lock()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_identity() {
        let user = new_user_translation();
        for ch in 0x20u8..0x7f {
            let uni = TranslationMapType::Lat1.translate(&user, ch);
            assert_eq!(conv_uni_to_pc(uni), Some(ch as u16));
        }
    }

    #[test]
    fn test_latin1_to_cp437() {
        let user = new_user_translation();
        let uni = TranslationMapType::Lat1.translate(&user, 0xe9);
        assert_eq!(uni, 0xe9);
        // é 在cp437中位于0x82
        assert_eq!(conv_uni_to_pc(uni), Some(0x82));
        assert_eq!(glyph_to_char(0x82), 'é');
    }

    #[test]
    fn test_graf_line_drawing() {
        let user = new_user_translation();
        let uni = TranslationMapType::Graf.translate(&user, b'q');
        assert_eq!(uni, 0x2500);
        assert_eq!(conv_uni_to_pc(uni), Some(0xc4));
        // 0x5f以下与Latin-1相同
        assert_eq!(TranslationMapType::Graf.translate(&user, b'A'), b'A' as u32);
    }

    #[test]
    fn test_direct_font_zone() {
        assert_eq!(conv_uni_to_pc(0xf0b3), Some(0xb3));
        assert_eq!(conv_uni_to_pc(0x4e2d), None);
    }

    #[test]
    fn test_user_map() {
        let user = new_user_translation();
        let mut table = [0u8; E_TABSZ];
        for (i, v) in table.iter_mut().enumerate() {
            *v = i as u8;
        }
        table[b'a' as usize] = b'b';
        con_set_trans_old(&user, &table);
        let uni = TranslationMapType::User.translate(&user, b'a');
        assert_eq!(conv_uni_to_pc(uni), Some(b'b' as u16));
        assert_eq!(con_get_trans_old(&user)[b'a' as usize], b'b');
    }
}
