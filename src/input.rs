// input event synthesis: each gesture becomes its ordered list of dispatch payloads

use serde::{Deserialize, Serialize};

use crate::coords::PixelPoint;
use crate::keys::{describe_key, KeyChord, KeyDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MouseEventKind {
    MouseMoved,
    MousePressed,
    MouseReleased,
    MouseWheel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    None,
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Bit for the `buttons` field while this button is held.
    pub fn mask(self) -> i64 {
        match self {
            MouseButton::None => 0,
            MouseButton::Left => 1,
            MouseButton::Right => 2,
            MouseButton::Middle => 4,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "left" => Some(MouseButton::Left),
            "right" => Some(MouseButton::Right),
            "middle" => Some(MouseButton::Middle),
            "none" => Some(MouseButton::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseEvent {
    #[serde(rename = "type")]
    pub kind: MouseEventKind,
    pub x: f64,
    pub y: f64,
    pub button: MouseButton,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buttons: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_y: Option<f64>,
}

impl MouseEvent {
    fn at(kind: MouseEventKind, point: PixelPoint, button: MouseButton) -> Self {
        Self {
            kind,
            x: point.x,
            y: point.y,
            button,
            buttons: None,
            click_count: None,
            delta_x: None,
            delta_y: None,
        }
    }

    /// Hover move with no button held.
    pub fn hover(point: PixelPoint) -> Self {
        Self::at(MouseEventKind::MouseMoved, point, MouseButton::None)
    }

    /// True for events after which a drag pauses when a delay is configured.
    pub fn holds_button(&self) -> bool {
        match self.kind {
            MouseEventKind::MousePressed => true,
            MouseEventKind::MouseMoved => self.button != MouseButton::None,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyEventKind {
    KeyDown,
    KeyUp,
    RawKeyDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEvent {
    #[serde(rename = "type")]
    pub kind: KeyEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modifiers: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows_virtual_key_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmodified_text: Option<String>,
}

impl KeyEvent {
    fn bare(kind: KeyEventKind) -> Self {
        Self {
            kind,
            modifiers: None,
            key: None,
            code: None,
            windows_virtual_key_code: None,
            text: None,
            unmodified_text: None,
        }
    }

    fn described(kind: KeyEventKind, desc: &KeyDescriptor) -> Self {
        Self {
            key: Some(desc.key.clone()),
            code: desc.code.clone(),
            windows_virtual_key_code: desc.key_code,
            ..Self::bare(kind)
        }
    }
}

/// move (no button) -> press -> release, all at the same point.
pub fn click_events(point: PixelPoint, button: MouseButton, click_count: i64) -> Vec<MouseEvent> {
    let press = MouseEvent {
        click_count: Some(click_count),
        ..MouseEvent::at(MouseEventKind::MousePressed, point, button)
    };
    let release = MouseEvent {
        click_count: Some(click_count),
        ..MouseEvent::at(MouseEventKind::MouseReleased, point, button)
    };
    vec![MouseEvent::hover(point), press, release]
}

/// Hover at the anchor, then a wheel event carrying the pixel delta.
pub fn wheel_events(point: PixelPoint, delta_x: f64, delta_y: f64) -> Vec<MouseEvent> {
    let wheel = MouseEvent {
        delta_x: Some(delta_x),
        delta_y: Some(delta_y),
        ..MouseEvent::at(MouseEventKind::MouseWheel, point, MouseButton::None)
    };
    vec![MouseEvent::hover(point), wheel]
}

/// Press at `from`, move through `path` with the button held, release at `to`.
///
/// `to` is resolved independently of `path` so rounding in the intermediate
/// points never shifts the drop target.
pub fn drag_events(
    from: PixelPoint,
    path: &[PixelPoint],
    to: PixelPoint,
    button: MouseButton,
) -> Vec<MouseEvent> {
    let mask = Some(button.mask());
    let mut events = Vec::with_capacity(path.len() + 3);

    events.push(MouseEvent::hover(from));
    events.push(MouseEvent {
        buttons: mask,
        click_count: Some(1),
        ..MouseEvent::at(MouseEventKind::MousePressed, from, button)
    });
    for point in path {
        events.push(MouseEvent {
            buttons: mask,
            ..MouseEvent::at(MouseEventKind::MouseMoved, *point, button)
        });
    }
    events.push(MouseEvent {
        buttons: mask,
        click_count: Some(1),
        ..MouseEvent::at(MouseEventKind::MouseReleased, to, button)
    });
    events
}

/// One keystroke (down + up) for a single character of typed text.
pub fn char_events(ch: char) -> [KeyEvent; 2] {
    let special = match ch {
        '\n' | '\r' => Some(KeyDescriptor::enter()),
        '\t' => Some(KeyDescriptor::tab()),
        _ => None,
    };

    match special {
        Some(desc) => [
            KeyEvent::described(KeyEventKind::KeyDown, &desc),
            KeyEvent::described(KeyEventKind::KeyUp, &desc),
        ],
        None => {
            let text = ch.to_string();
            [
                KeyEvent {
                    text: Some(text.clone()),
                    unmodified_text: Some(text),
                    ..KeyEvent::bare(KeyEventKind::KeyDown)
                },
                KeyEvent::bare(KeyEventKind::KeyUp),
            ]
        }
    }
}

/// Keystrokes for a whole string, in order.
pub fn text_events(text: &str) -> Vec<[KeyEvent; 2]> {
    text.chars().map(char_events).collect()
}

/// Down and up events for a key combination.
pub fn chord_events(chord: &KeyChord) -> [KeyEvent; 2] {
    let desc = describe_key(&chord.main_key);
    let modifiers = Some(chord.modifiers);

    let mut down = KeyEvent {
        modifiers,
        ..KeyEvent::described(KeyEventKind::KeyDown, &desc)
    };
    if chord.is_raw() {
        down.kind = KeyEventKind::RawKeyDown;
    } else {
        let text = if chord.has_shift() {
            chord.main_key.to_uppercase()
        } else {
            chord.main_key.to_lowercase()
        };
        down.text = Some(text);
        down.unmodified_text = Some(chord.main_key.to_lowercase());
    }

    let up = KeyEvent {
        modifiers,
        ..KeyEvent::described(KeyEventKind::KeyUp, &desc)
    };
    [down, up]
}
