//! Key definitions and raw key transitions
//!
//! Provides macOS virtual keycodes, modifier flag masks, display symbols
//! and the platform-neutral `KeyTransition` record produced by the listener.

/// Modifier flag masks as reported in CGEventFlags
pub mod flags {
    /// Caps Lock toggle state
    pub const CAPS_LOCK: u64 = 0x0001_0000;
    /// Shift key modifier flag
    pub const SHIFT: u64 = 0x0002_0000;
    /// Control key modifier flag
    pub const CONTROL: u64 = 0x0004_0000;
    /// Option/Alt key modifier flag
    pub const OPTION: u64 = 0x0008_0000;
    /// Command key modifier flag
    pub const COMMAND: u64 = 0x0010_0000;
    /// Fn key modifier flag
    pub const FUNCTION: u64 = 0x0080_0000;
}

/// Virtual keycodes for modifier keys
pub mod keycode {
    pub const RIGHT_COMMAND: u16 = 0x36;
    pub const COMMAND: u16 = 0x37;
    pub const SHIFT: u16 = 0x38;
    pub const CAPS_LOCK: u16 = 0x39;
    pub const OPTION: u16 = 0x3A;
    pub const CONTROL: u16 = 0x3B;
    pub const RIGHT_SHIFT: u16 = 0x3C;
    pub const RIGHT_OPTION: u16 = 0x3D;
    pub const RIGHT_CONTROL: u16 = 0x3E;
    pub const FUNCTION: u16 = 0x3F;
}

/// `NSSystemDefined` subtype carrying media and brightness keys
pub const NX_SUBTYPE_AUX_CONTROL_BUTTONS: i16 = 8;

const NX_KEYSTATE_DOWN: i64 = 0x0A;
const NX_KEYSTATE_UP: i64 = 0x0B;

/// Returns true if the keycode belongs to a modifier key
pub fn is_modifier(code: u16) -> bool {
    (keycode::RIGHT_COMMAND..=keycode::FUNCTION).contains(&code)
}

/// The flag mask a modifier keycode sets while it is held
pub fn modifier_flag(code: u16) -> Option<u64> {
    match code {
        keycode::COMMAND | keycode::RIGHT_COMMAND => Some(flags::COMMAND),
        keycode::SHIFT | keycode::RIGHT_SHIFT => Some(flags::SHIFT),
        keycode::OPTION | keycode::RIGHT_OPTION => Some(flags::OPTION),
        keycode::CONTROL | keycode::RIGHT_CONTROL => Some(flags::CONTROL),
        keycode::FUNCTION => Some(flags::FUNCTION),
        keycode::CAPS_LOCK => Some(flags::CAPS_LOCK),
        _ => None,
    }
}

/// Display symbol for a normal keycode
pub fn symbol(code: u16) -> String {
    let s = match code {
        0 => "A",
        1 => "S",
        2 => "D",
        3 => "F",
        4 => "H",
        5 => "G",
        6 => "Z",
        7 => "X",
        8 => "C",
        9 => "V",
        11 => "B",
        12 => "Q",
        13 => "W",
        14 => "E",
        15 => "R",
        16 => "Y",
        17 => "T",
        18 => "1",
        19 => "2",
        20 => "3",
        21 => "4",
        22 => "6",
        23 => "5",
        24 => "=",
        25 => "9",
        26 => "7",
        27 => "-",
        28 => "8",
        29 => "0",
        30 => "]",
        31 => "O",
        32 => "U",
        33 => "[",
        34 => "I",
        35 => "P",
        36 => "↩",
        37 => "L",
        38 => "J",
        39 => "'",
        40 => "K",
        41 => ";",
        42 => "\\",
        43 => ",",
        44 => "/",
        45 => "N",
        46 => "M",
        47 => ".",
        48 => "⇥",
        49 => "Space",
        50 => "`",
        51 => "⌫",
        53 => "⎋",
        keycode::COMMAND | keycode::RIGHT_COMMAND => "⌘",
        keycode::SHIFT | keycode::RIGHT_SHIFT => "⇧",
        keycode::CAPS_LOCK => "⇪",
        keycode::OPTION | keycode::RIGHT_OPTION => "⌥",
        keycode::CONTROL | keycode::RIGHT_CONTROL => "⌃",
        keycode::FUNCTION => "fn",
        96 => "F5",
        97 => "F6",
        98 => "F7",
        99 => "F3",
        100 => "F8",
        101 => "F9",
        103 => "F11",
        109 => "F10",
        111 => "F12",
        118 => "F4",
        120 => "F2",
        122 => "F1",
        123 => "←",
        124 => "→",
        125 => "↓",
        126 => "↑",
        _ => return format!("#{code}"),
    };
    s.to_string()
}

/// Display symbol for a system (media) key
pub fn system_symbol(key: u16) -> String {
    let s = match key {
        0 => "Volume Up",
        1 => "Volume Down",
        2 => "Brightness Up",
        3 => "Brightness Down",
        7 => "Mute",
        16 => "Play",
        17 => "Next",
        18 => "Previous",
        19 => "Fast Forward",
        20 => "Rewind",
        21 => "Illumination Up",
        22 => "Illumination Down",
        _ => return format!("Media #{key}"),
    };
    s.to_string()
}

/// Kind of raw transition reported by the event source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Down,
    Up,
    FlagsChanged,
    SystemDefined,
}

/// Decoded payload of an aux-control-button system event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemKeyEvent {
    /// NX key type (volume, play, brightness, ...)
    pub key: u16,
    /// True for the down half of the pair
    pub pressed: bool,
}

/// One raw key transition from the event tap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    pub keycode: u16,
    pub kind: TransitionKind,
    /// Modifier flags at the time of the event
    pub flags: u64,
    pub system: Option<SystemKeyEvent>,
}

impl KeyTransition {
    pub fn down(keycode: u16) -> Self {
        Self {
            keycode,
            kind: TransitionKind::Down,
            flags: 0,
            system: None,
        }
    }

    pub fn up(keycode: u16) -> Self {
        Self {
            keycode,
            kind: TransitionKind::Up,
            flags: 0,
            system: None,
        }
    }

    pub fn flags_changed(keycode: u16, flags: u64) -> Self {
        Self {
            keycode,
            kind: TransitionKind::FlagsChanged,
            flags,
            system: None,
        }
    }

    pub fn system(key: u16, pressed: bool) -> Self {
        Self {
            keycode: 0,
            kind: TransitionKind::SystemDefined,
            flags: 0,
            system: Some(SystemKeyEvent { key, pressed }),
        }
    }
}

/// Decode the `data1` field of an `NSSystemDefined` event.
///
/// Only aux-control-button events carry keys; every other subtype is ignored.
pub fn decode_system_defined(subtype: i16, data1: i64) -> Option<SystemKeyEvent> {
    if subtype != NX_SUBTYPE_AUX_CONTROL_BUTTONS {
        return None;
    }
    let key = ((data1 & 0xFFFF_0000) >> 16) as u16;
    let state = (data1 & 0xFF00) >> 8;
    match state {
        NX_KEYSTATE_DOWN => Some(SystemKeyEvent { key, pressed: true }),
        NX_KEYSTATE_UP => Some(SystemKeyEvent { key, pressed: false }),
        _ => None,
    }
}
