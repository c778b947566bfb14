// key descriptors and chord parsing for Input.dispatchKeyEvent

/// Modifier bits as understood by `Input.dispatchKeyEvent`.
pub const MODIFIER_ALT: i64 = 1;
pub const MODIFIER_CONTROL: i64 = 2;
pub const MODIFIER_META: i64 = 4;
pub const MODIFIER_SHIFT: i64 = 8;

/// Protocol identifiers for a key.
///
/// `code` and `key_code` are `None` for keys outside the table that are not a
/// single letter, digit or space; those are sent with only their symbolic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub key: String,
    pub code: Option<String>,
    pub key_code: Option<i64>,
}

// (key, code, windows virtual key code)
const KEY_TABLE: &[(&str, &str, i64)] = &[
    ("Enter", "Enter", 13),
    ("Tab", "Tab", 9),
    ("Backspace", "Backspace", 8),
    ("Escape", "Escape", 27),
    ("Delete", "Delete", 46),
    ("ArrowLeft", "ArrowLeft", 37),
    ("ArrowUp", "ArrowUp", 38),
    ("ArrowRight", "ArrowRight", 39),
    ("ArrowDown", "ArrowDown", 40),
    ("Home", "Home", 36),
    ("End", "End", 35),
    ("PageUp", "PageUp", 33),
    ("PageDown", "PageDown", 34),
    ("Alt", "AltLeft", 18),
    ("Control", "ControlLeft", 17),
    ("Meta", "MetaLeft", 91),
    ("Shift", "ShiftLeft", 16),
];

impl KeyDescriptor {
    pub fn enter() -> Self {
        describe_key("Enter")
    }

    pub fn tab() -> Self {
        describe_key("Tab")
    }
}

/// Resolve a modifier name or alias to its mask bit.
pub fn modifier_bit(token: &str) -> Option<i64> {
    match token.to_ascii_lowercase().as_str() {
        "alt" | "option" => Some(MODIFIER_ALT),
        "ctrl" | "control" => Some(MODIFIER_CONTROL),
        "meta" | "cmd" | "command" | "win" | "windows" | "super" => Some(MODIFIER_META),
        "shift" => Some(MODIFIER_SHIFT),
        _ => None,
    }
}

/// Canonical name for a non-modifier key token.
///
/// Single characters are kept verbatim so their case survives. Longer names
/// are matched case-insensitively against the table and a few aliases.
pub fn normalize_key_name(token: &str) -> String {
    if token.chars().count() == 1 {
        return token.to_string();
    }

    let alias = match token.to_ascii_lowercase().as_str() {
        "return" => Some("Enter"),
        "esc" => Some("Escape"),
        "space" => Some(" "),
        "up" => Some("ArrowUp"),
        "down" => Some("ArrowDown"),
        "left" => Some("ArrowLeft"),
        "right" => Some("ArrowRight"),
        "pgup" => Some("PageUp"),
        "pgdn" => Some("PageDown"),
        "del" => Some("Delete"),
        _ => None,
    };
    if let Some(name) = alias {
        return name.to_string();
    }

    KEY_TABLE
        .iter()
        .find(|(key, _, _)| key.eq_ignore_ascii_case(token))
        .map_or_else(|| token.to_string(), |(key, _, _)| (*key).to_string())
}

/// Look up the protocol identifiers for a key name.
pub fn describe_key(name: &str) -> KeyDescriptor {
    if let Some((key, code, vk)) = KEY_TABLE.iter().find(|(key, _, _)| *key == name) {
        return KeyDescriptor {
            key: (*key).to_string(),
            code: Some((*code).to_string()),
            key_code: Some(*vk),
        };
    }

    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphabetic() {
            let upper = c.to_ascii_uppercase();
            return KeyDescriptor {
                key: name.to_string(),
                code: Some(format!("Key{upper}")),
                key_code: Some(i64::from(upper as u8)),
            };
        }
        if c.is_ascii_digit() {
            return KeyDescriptor {
                key: name.to_string(),
                code: Some(format!("Digit{c}")),
                key_code: Some(i64::from(c as u8)),
            };
        }
        if c == ' ' {
            return KeyDescriptor {
                key: " ".to_string(),
                code: Some("Space".to_string()),
                key_code: Some(32),
            };
        }
    }

    KeyDescriptor {
        key: name.to_string(),
        code: None,
        key_code: None,
    }
}

/// A parsed key combination such as `Ctrl+Shift+a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    pub modifiers: i64,
    pub main_key: String,
}

impl KeyChord {
    pub fn parse(combo: &str) -> Self {
        let combo = combo.trim();

        // "+" alone, or a trailing "++", names the plus key itself
        let (rest, mut main_key) = if combo == "+" {
            ("", "+".to_string())
        } else if let Some(prefix) = combo.strip_suffix("++") {
            (prefix, "+".to_string())
        } else {
            (combo, String::new())
        };

        let mut modifiers = 0;
        for token in rest.split('+').map(str::trim).filter(|t| !t.is_empty()) {
            if let Some(bit) = modifier_bit(token) {
                modifiers |= bit;
            } else {
                main_key = normalize_key_name(token);
            }
        }

        Self { modifiers, main_key }
    }

    pub fn has_shift(&self) -> bool {
        self.modifiers & MODIFIER_SHIFT != 0
    }

    pub fn has_non_shift_modifier(&self) -> bool {
        self.modifiers & !MODIFIER_SHIFT != 0
    }

    /// Chords that should not insert text are sent as `rawKeyDown`.
    pub fn is_raw(&self) -> bool {
        self.has_non_shift_modifier() || self.main_key.chars().count() > 1
    }
}
