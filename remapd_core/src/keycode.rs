//! Key name ↔ key code mapping.
//!
//! Codes follow the Linux input-event key codes and are confined to the
//! 0–255 range the keystate vector covers. The table carries the keys a
//! remapping configuration plausibly names; anything else still flows
//! through the daemon untouched as a raw code.

/// Reserved code synthesized into a keyboard when its device scrolls, so
/// oneshot and hold state resolves as if a key had been hit. Never emitted
/// to the virtual device and deliberately above every named code below.
pub const EXTERNAL_MOUSE_BUTTON: u8 = 247;

static NAMES: &[(&str, u8)] = &[
    ("esc", 1),
    ("1", 2),
    ("2", 3),
    ("3", 4),
    ("4", 5),
    ("5", 6),
    ("6", 7),
    ("7", 8),
    ("8", 9),
    ("9", 10),
    ("0", 11),
    ("minus", 12),
    ("equal", 13),
    ("backspace", 14),
    ("tab", 15),
    ("q", 16),
    ("w", 17),
    ("e", 18),
    ("r", 19),
    ("t", 20),
    ("y", 21),
    ("u", 22),
    ("i", 23),
    ("o", 24),
    ("p", 25),
    ("leftbrace", 26),
    ("rightbrace", 27),
    ("enter", 28),
    ("leftctrl", 29),
    ("a", 30),
    ("s", 31),
    ("d", 32),
    ("f", 33),
    ("g", 34),
    ("h", 35),
    ("j", 36),
    ("k", 37),
    ("l", 38),
    ("semicolon", 39),
    ("apostrophe", 40),
    ("grave", 41),
    ("leftshift", 42),
    ("backslash", 43),
    ("z", 44),
    ("x", 45),
    ("c", 46),
    ("v", 47),
    ("b", 48),
    ("n", 49),
    ("m", 50),
    ("comma", 51),
    ("dot", 52),
    ("slash", 53),
    ("rightshift", 54),
    ("leftalt", 56),
    ("space", 57),
    ("capslock", 58),
    ("f1", 59),
    ("f2", 60),
    ("f3", 61),
    ("f4", 62),
    ("f5", 63),
    ("f6", 64),
    ("f7", 65),
    ("f8", 66),
    ("f9", 67),
    ("f10", 68),
    ("numlock", 69),
    ("scrolllock", 70),
    ("f11", 87),
    ("f12", 88),
    ("rightctrl", 97),
    ("rightalt", 100),
    ("home", 102),
    ("up", 103),
    ("pageup", 104),
    ("left", 105),
    ("right", 106),
    ("end", 107),
    ("down", 108),
    ("pagedown", 109),
    ("insert", 110),
    ("delete", 111),
    ("mute", 113),
    ("volumedown", 114),
    ("volumeup", 115),
    ("pause", 119),
    ("leftmeta", 125),
    ("rightmeta", 126),
    ("compose", 127),
];

// Spelling shortcuts accepted on input only.
static ALIASES: &[(&str, u8)] = &[
    ("ctrl", 29),
    ("control", 29),
    ("shift", 42),
    ("alt", 56),
    ("meta", 125),
    ("escape", 1),
    ("return", 28),
];

/// Resolves a key name (case-insensitive) to its code.
pub fn code_for_name(name: &str) -> Option<u8> {
    let name = name.to_ascii_lowercase();
    NAMES
        .iter()
        .chain(ALIASES.iter())
        .find(|(n, _)| *n == name)
        .map(|(_, c)| *c)
}

/// Returns the canonical name for a code, if the table assigns one.
pub fn name_for_code(code: u8) -> Option<&'static str> {
    NAMES.iter().find(|(_, c)| *c == code).map(|(n, _)| *n)
}
