// the debugging-protocol boundary: everything the core sends to a page

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coords::Viewport;
use crate::input::{KeyEvent, MouseEvent};

#[derive(Error, Debug, Clone)]
pub enum CdpError {
    #[error("Target not found: {0}")]
    TargetNotFound(String),
    #[error("Target not attached: {0}")]
    NotAttached(String),
    #[error("Command failed: {0}")]
    Command(String),
    #[error("Connection failed: {0}")]
    Connect(String),
}

/// Identifier of a single page/tab.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationHistory {
    pub current_index: i64,
    pub entries: Vec<HistoryEntry>,
}

impl NavigationHistory {
    fn entry_at(&self, index: i64) -> Option<&HistoryEntry> {
        usize::try_from(index).ok().and_then(|i| self.entries.get(i))
    }

    pub fn previous(&self) -> Option<&HistoryEntry> {
        self.entry_at(self.current_index - 1)
    }

    pub fn next(&self) -> Option<&HistoryEntry> {
        self.entry_at(self.current_index + 1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

/// Commands sent over the remote debugging protocol.
///
/// Every method except `attach` requires the target to be attached.
#[async_trait]
pub trait DebugProtocol: Send + Sync {
    async fn attach(&self, target: &TargetId) -> Result<(), CdpError>;
    async fn detach(&self, target: &TargetId) -> Result<(), CdpError>;

    /// `Page.getFrameTree` main frame id.
    async fn main_frame_id(&self, target: &TargetId) -> Result<String, CdpError>;
    /// `Page.getLayoutMetrics` css layout viewport client size.
    async fn layout_viewport(&self, target: &TargetId) -> Result<Viewport, CdpError>;

    async fn dispatch_mouse_event(&self, target: &TargetId, event: &MouseEvent) -> Result<(), CdpError>;
    async fn dispatch_key_event(&self, target: &TargetId, event: &KeyEvent) -> Result<(), CdpError>;

    async fn navigate(&self, target: &TargetId, url: &str) -> Result<(), CdpError>;
    async fn reload(&self, target: &TargetId, ignore_cache: bool) -> Result<(), CdpError>;
    async fn navigation_history(&self, target: &TargetId) -> Result<NavigationHistory, CdpError>;
    async fn navigate_to_history_entry(&self, target: &TargetId, entry_id: i64) -> Result<(), CdpError>;

    /// PNG screenshot, base64 encoded.
    async fn capture_screenshot(&self, target: &TargetId) -> Result<String, CdpError>;
}

/// Requests served by the hosted page itself rather than the protocol.
#[async_trait]
pub trait PageChannel: Send + Sync {
    /// Scroll the whole document by a pixel delta.
    async fn scroll_document(&self, target: &TargetId, delta_x: f64, delta_y: f64) -> Result<(), CdpError>;
    async fn page_info(&self, target: &TargetId) -> Result<PageInfo, CdpError>;
}

/// A browser the core can drive: protocol plus side channel.
pub trait BrowserHost: DebugProtocol + PageChannel {}

impl<T: DebugProtocol + PageChannel> BrowserHost for T {}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(current_index: i64, n: i64) -> NavigationHistory {
        NavigationHistory {
            current_index,
            entries: (0..n)
                .map(|i| HistoryEntry {
                    id: i + 100,
                    url: format!("https://example.com/{i}"),
                })
                .collect(),
        }
    }

    #[test]
    fn test_adjacent_entries() {
        let h = history(1, 3);
        assert_eq!(h.previous().map(|e| e.id), Some(100));
        assert_eq!(h.next().map(|e| e.id), Some(102));

        let h = history(0, 1);
        assert!(h.previous().is_none());
        assert!(h.next().is_none());
    }
}
