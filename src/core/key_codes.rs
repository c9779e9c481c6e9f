use crate::core::keyboard_layout;
use crate::models::KeyCode;

/// Keys always shown in the statistics view, in keyboard order.
const STANDARD_KEYS: &[KeyCode] = &[
    // digit row
    18, 19, 20, 21, 23, 22, 26, 28, 25, 29,
    // letter rows
    12, 13, 14, 15, 17, 16, 32, 34, 31, 35,
    0, 1, 2, 3, 5, 4, 38, 40, 37,
    6, 7, 8, 9, 11, 45, 46,
    // editing
    53, 48, 36, 49, 51, 117,
    // modifiers
    56, 57, 58, 59, 55,
    // arrows
    123, 124, 125, 126,
    // punctuation
    24, 27, 33, 30, 41, 39, 43, 47, 44, 42,
];

/// Display label for a macOS virtual key code (`kVK_*` in HIToolbox/Events.h).
fn static_label(keycode: KeyCode) -> Option<&'static str> {
    Some(match keycode {
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
        10 => "§",
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
        36 => "Return",
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
        48 => "Tab",
        49 => "Space",
        50 => "`",
        51 => "Delete",
        53 => "Esc",
        54 => "Right Command",
        55 => "Command",
        56 => "Shift",
        57 => "Caps Lock",
        58 => "Option",
        59 => "Control",
        60 => "Right Shift",
        61 => "Right Option",
        62 => "Right Control",
        63 => "Fn",
        64 => "F17",
        65 => "Keypad .",
        67 => "Keypad *",
        69 => "Keypad +",
        71 => "Clear",
        72 => "Volume Up",
        73 => "Volume Down",
        74 => "Mute",
        75 => "Keypad /",
        76 => "Keypad Enter",
        78 => "Keypad -",
        79 => "F18",
        80 => "F19",
        81 => "Keypad =",
        82 => "Keypad 0",
        83 => "Keypad 1",
        84 => "Keypad 2",
        85 => "Keypad 3",
        86 => "Keypad 4",
        87 => "Keypad 5",
        88 => "Keypad 6",
        89 => "Keypad 7",
        90 => "F20",
        91 => "Keypad 8",
        92 => "Keypad 9",
        96 => "F5",
        97 => "F6",
        98 => "F7",
        99 => "F3",
        100 => "F8",
        101 => "F9",
        103 => "F11",
        105 => "F13",
        106 => "F16",
        107 => "F14",
        109 => "F10",
        111 => "F12",
        113 => "F15",
        114 => "Help",
        115 => "Home",
        116 => "Page Up",
        117 => "Delete Forward",
        118 => "F4",
        119 => "End",
        120 => "F2",
        121 => "Page Down",
        122 => "F1",
        123 => "←",
        124 => "→",
        125 => "↓",
        126 => "↑",
        _ => return None,
    })
}

/// Modifier keys arrive as flags-changed signals rather than key-down.
pub fn is_modifier(keycode: KeyCode) -> bool {
    (54..=63).contains(&keycode)
}

/// Human-readable label for `keycode`: the static table first, then the active keyboard
/// layout, then `"Key <code>"`.
pub fn name_for(keycode: KeyCode) -> String {
    if let Some(label) = static_label(keycode) {
        return label.to_string();
    }
    if let Some(label) = keyboard_layout::translate(keycode) {
        return label;
    }
    format!("Key {}", keycode)
}

pub fn all_known_key_codes() -> Vec<KeyCode> {
    STANDARD_KEYS.to_vec()
}

pub fn is_known(keycode: KeyCode) -> bool {
    STANDARD_KEYS.contains(&keycode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn standard_keys_are_unique_and_labelled() {
        let codes = all_known_key_codes();
        let unique: HashSet<_> = codes.iter().copied().collect();
        assert_eq!(unique.len(), codes.len());
        for code in codes {
            assert!(static_label(code).is_some(), "missing label for {}", code);
        }
    }

    #[test]
    fn standard_keys_start_with_the_digit_row() {
        let names: Vec<String> = all_known_key_codes()
            .into_iter()
            .take(10)
            .map(name_for)
            .collect();
        assert_eq!(names, ["1", "2", "3", "4", "5", "6", "7", "8", "9", "0"]);
    }

    #[test]
    fn special_keys_have_fixed_names() {
        assert_eq!(name_for(36), "Return");
        assert_eq!(name_for(53), "Esc");
        assert_eq!(name_for(56), "Shift");
        assert_eq!(name_for(123), "←");
        assert_eq!(name_for(0), "A");
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn unknown_codes_fall_back_to_numeric_label() {
        assert_eq!(name_for(0x7F), "Key 127");
        assert_eq!(name_for(300), "Key 300");
    }

    #[test]
    fn modifier_range_covers_shift_and_command() {
        assert!(is_modifier(56));
        assert!(is_modifier(55));
        assert!(is_modifier(63));
        assert!(!is_modifier(0));
        assert!(!is_modifier(64));
    }
}
