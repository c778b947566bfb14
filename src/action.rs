// the closed action vocabulary shared by the translator and the executor

use serde::{Deserialize, Serialize};

use crate::input::MouseButton;

/// Bumped whenever a variant or field of [`Action`] changes.
pub const ACTION_VOCABULARY_VERSION: u32 = 1;

pub const DEFAULT_DRAG_STEPS: u32 = 5;
pub const DEFAULT_WAIT_MS: u64 = 500;

fn default_click_count() -> u32 {
    1
}

fn default_drag_steps() -> u32 {
    DEFAULT_DRAG_STEPS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "up" => Some(ScrollDirection::Up),
            "down" => Some(ScrollDirection::Down),
            "left" => Some(ScrollDirection::Left),
            "right" => Some(ScrollDirection::Right),
            _ => None,
        }
    }

    /// Signed (dx, dy) for a movement of `magnitude` in this direction.
    pub fn delta(self, magnitude: f64) -> (f64, f64) {
        match self {
            ScrollDirection::Up => (0.0, -magnitude),
            ScrollDirection::Down => (0.0, magnitude),
            ScrollDirection::Left => (-magnitude, 0.0),
            ScrollDirection::Right => (magnitude, 0.0),
        }
    }
}

/// A single browser action. Coordinates are virtual (0-999).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum Action {
    GotoUrl {
        url: String,
    },
    ReloadTab {
        #[serde(default)]
        ignore_cache: bool,
    },
    GoBack,
    GoForward,
    Click {
        x: f64,
        y: f64,
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "default_click_count")]
        click_count: u32,
    },
    DoubleClick {
        x: f64,
        y: f64,
    },
    TypeText {
        text: String,
        #[serde(default)]
        delay_ms: u64,
    },
    KeyPress {
        key: String,
        #[serde(default)]
        delay_ms: u64,
    },
    Scroll {
        x: f64,
        y: f64,
        delta_x: f64,
        delta_y: f64,
    },
    ScrollDocument {
        direction: ScrollDirection,
        magnitude: f64,
    },
    DragAndDrop {
        from_x: f64,
        from_y: f64,
        to_x: f64,
        to_y: f64,
        #[serde(default)]
        button: MouseButton,
        #[serde(default = "default_drag_steps")]
        steps: u32,
        #[serde(default)]
        delay_ms: u64,
    },
    CaptureScreenshot,
    Wait {
        #[serde(default)]
        time_ms: Option<u64>,
    },
}

impl Action {
    pub fn click(x: f64, y: f64) -> Self {
        Action::Click {
            x,
            y,
            button: MouseButton::Left,
            click_count: 1,
        }
    }

    pub fn key(key: impl Into<String>) -> Self {
        Action::KeyPress {
            key: key.into(),
            delay_ms: 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Action::GotoUrl { .. } => "GOTO_URL",
            Action::ReloadTab { .. } => "RELOAD_TAB",
            Action::GoBack => "GO_BACK",
            Action::GoForward => "GO_FORWARD",
            Action::Click { .. } => "CLICK",
            Action::DoubleClick { .. } => "DOUBLE_CLICK",
            Action::TypeText { .. } => "TYPE_TEXT",
            Action::KeyPress { .. } => "KEY_PRESS",
            Action::Scroll { .. } => "SCROLL",
            Action::ScrollDocument { .. } => "SCROLL_DOCUMENT",
            Action::DragAndDrop { .. } => "DRAG_AND_DROP",
            Action::CaptureScreenshot => "CAPTURE_SCREENSHOT",
            Action::Wait { .. } => "WAIT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    pub base64: String,
    pub page_url: String,
    pub page_title: String,
}

/// Outcome of one action. Failures are values, never panics or errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub screenshot: Option<Screenshot>,
}

impl ActionResult {
    pub fn ok(info: impl Into<String>) -> Self {
        Self {
            success: true,
            info: Some(info.into()),
            error: None,
            screenshot: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            info: None,
            error: Some(error.into()),
            screenshot: None,
        }
    }

    pub fn with_screenshot(screenshot: Screenshot) -> Self {
        Self {
            screenshot: Some(screenshot),
            ..Self::ok("Captured screenshot")
        }
    }
}
