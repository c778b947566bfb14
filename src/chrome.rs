use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    MouseButton as CdpMouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, GetFrameTreeParams, GetNavigationHistoryParams, NavigateParams,
    NavigateToHistoryEntryParams, ReloadParams,
};
use chromiumoxide::handler::Handler;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::cdp::{
    CdpError, DebugProtocol, HistoryEntry, NavigationHistory, PageChannel, PageInfo, TargetId,
};
use crate::coords::Viewport;
use crate::input::{KeyEvent, KeyEventKind, MouseButton, MouseEvent, MouseEventKind};

// profile dirs (relative to home) that may hold a DevToolsActivePort file
const CHROME_PROFILES: &[&str] = &[
    "Library/Application Support/Google/Chrome",
    "Library/Application Support/Google/Chrome Canary",
    "Library/Application Support/Arc/User Data",
    "Library/Application Support/Chromium",
    ".config/google-chrome",
    ".config/chromium",
];

const DEFAULT_DEBUG_URL: &str = "http://127.0.0.1:9222";
const DEBUG_PROFILE_DIR: &str = ".pagepilot-chrome";

/// An open page as listed by `targets`.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub id: TargetId,
    pub url: String,
    pub title: String,
}

/// A Chrome instance driven over chromiumoxide.
///
/// Pages are addressed by their CDP target id. A page must be attached
/// before any command is sent to it.
pub struct ChromeClient {
    browser: Mutex<Browser>,
    _handler_task: tokio::task::JoinHandle<()>,
    attached: Mutex<HashMap<TargetId, Page>>,
}

fn command_err(e: impl Display) -> CdpError {
    CdpError::Command(e.to_string())
}

impl ChromeClient {
    /// Connect to `url` if given, else to a running Chrome, else launch one.
    pub async fn connect(url: Option<&str>) -> Result<Self> {
        if let Some(url) = url {
            tracing::info!(url, "connecting to configured Chrome");
            let (browser, handler) = Browser::connect(url)
                .await
                .with_context(|| format!("failed to connect to Chrome at {url}"))?;
            return Ok(Self::from_parts(browser, handler));
        }

        // try to connect to existing chrome first
        if let Some(ws_url) = try_find_existing_chrome().await {
            tracing::info!(url = %ws_url, "connecting to existing Chrome");
            match Browser::connect(&ws_url).await {
                Ok((browser, handler)) => return Ok(Self::from_parts(browser, handler)),
                Err(e) => tracing::warn!(error = %e, "failed to connect to existing Chrome"),
            }
        }

        tracing::info!("launching Chrome with debug profile");
        let (browser, handler) = launch_chrome_with_profile().await?;
        Ok(Self::from_parts(browser, handler))
    }

    fn from_parts(browser: Browser, handler: Handler) -> Self {
        let handler_task = tokio::spawn(async move {
            handler_loop(handler).await;
        });
        Self {
            browser: Mutex::new(browser),
            _handler_task: handler_task,
            attached: Mutex::new(HashMap::new()),
        }
    }

    async fn find_page(&self, target: &TargetId) -> Result<Page, CdpError> {
        let pages = self.browser.lock().await.pages().await.map_err(command_err)?;
        pages
            .into_iter()
            .find(|p| p.target_id().inner() == target.as_str())
            .ok_or_else(|| CdpError::TargetNotFound(target.to_string()))
    }

    async fn page(&self, target: &TargetId) -> Result<Page, CdpError> {
        self.attached
            .lock()
            .await
            .get(target)
            .cloned()
            .ok_or_else(|| CdpError::NotAttached(target.to_string()))
    }

    pub async fn list_targets(&self) -> Result<Vec<TargetSummary>, CdpError> {
        let pages = self.browser.lock().await.pages().await.map_err(command_err)?;
        let mut targets = Vec::with_capacity(pages.len());
        for page in pages {
            targets.push(TargetSummary {
                id: TargetId::new(page.target_id().inner().clone()),
                url: page.url().await.map_err(command_err)?.unwrap_or_default(),
                title: page.get_title().await.map_err(command_err)?.unwrap_or_default(),
            });
        }
        Ok(targets)
    }

    /// Open a new page at `url` and return its target id.
    pub async fn new_page(&self, url: &str) -> Result<TargetId, CdpError> {
        let page = self.browser.lock().await.new_page(url).await.map_err(command_err)?;
        Ok(TargetId::new(page.target_id().inner().clone()))
    }
}

fn mouse_params(event: &MouseEvent) -> Result<DispatchMouseEventParams, CdpError> {
    let kind = match event.kind {
        MouseEventKind::MouseMoved => DispatchMouseEventType::MouseMoved,
        MouseEventKind::MousePressed => DispatchMouseEventType::MousePressed,
        MouseEventKind::MouseReleased => DispatchMouseEventType::MouseReleased,
        MouseEventKind::MouseWheel => DispatchMouseEventType::MouseWheel,
    };
    let button = match event.button {
        MouseButton::None => CdpMouseButton::None,
        MouseButton::Left => CdpMouseButton::Left,
        MouseButton::Right => CdpMouseButton::Right,
        MouseButton::Middle => CdpMouseButton::Middle,
    };

    let mut builder = DispatchMouseEventParams::builder()
        .r#type(kind)
        .x(event.x)
        .y(event.y)
        .button(button);
    if let Some(buttons) = event.buttons {
        builder = builder.buttons(buttons);
    }
    if let Some(count) = event.click_count {
        builder = builder.click_count(count);
    }
    if let Some(dx) = event.delta_x {
        builder = builder.delta_x(dx);
    }
    if let Some(dy) = event.delta_y {
        builder = builder.delta_y(dy);
    }
    builder.build().map_err(CdpError::Command)
}

fn key_params(event: &KeyEvent) -> Result<DispatchKeyEventParams, CdpError> {
    let kind = match event.kind {
        KeyEventKind::KeyDown => DispatchKeyEventType::KeyDown,
        KeyEventKind::KeyUp => DispatchKeyEventType::KeyUp,
        KeyEventKind::RawKeyDown => DispatchKeyEventType::RawKeyDown,
    };

    let mut builder = DispatchKeyEventParams::builder().r#type(kind);
    if let Some(modifiers) = event.modifiers {
        builder = builder.modifiers(modifiers);
    }
    if let Some(key) = &event.key {
        builder = builder.key(key.clone());
    }
    if let Some(code) = &event.code {
        builder = builder.code(code.clone());
    }
    if let Some(vk) = event.windows_virtual_key_code {
        builder = builder.windows_virtual_key_code(vk);
    }
    if let Some(text) = &event.text {
        builder = builder.text(text.clone());
    }
    if let Some(text) = &event.unmodified_text {
        builder = builder.unmodified_text(text.clone());
    }
    builder.build().map_err(CdpError::Command)
}

#[async_trait]
impl DebugProtocol for ChromeClient {
    async fn attach(&self, target: &TargetId) -> Result<(), CdpError> {
        let page = self.find_page(target).await?;
        self.attached.lock().await.insert(target.clone(), page);
        Ok(())
    }

    async fn detach(&self, target: &TargetId) -> Result<(), CdpError> {
        self.attached
            .lock()
            .await
            .remove(target)
            .map(|_| ())
            .ok_or_else(|| CdpError::NotAttached(target.to_string()))
    }

    async fn main_frame_id(&self, target: &TargetId) -> Result<String, CdpError> {
        let page = self.page(target).await?;
        let resp = page
            .execute(GetFrameTreeParams::default())
            .await
            .map_err(command_err)?;
        Ok(resp.result.frame_tree.frame.id.inner().clone())
    }

    async fn layout_viewport(&self, target: &TargetId) -> Result<Viewport, CdpError> {
        let page = self.page(target).await?;
        let metrics = page.layout_metrics().await.map_err(command_err)?;
        let css = metrics.css_layout_viewport;
        Ok(Viewport::new(css.client_width as f64, css.client_height as f64))
    }

    async fn dispatch_mouse_event(&self, target: &TargetId, event: &MouseEvent) -> Result<(), CdpError> {
        let page = self.page(target).await?;
        page.execute(mouse_params(event)?).await.map_err(command_err)?;
        Ok(())
    }

    async fn dispatch_key_event(&self, target: &TargetId, event: &KeyEvent) -> Result<(), CdpError> {
        let page = self.page(target).await?;
        page.execute(key_params(event)?).await.map_err(command_err)?;
        Ok(())
    }

    async fn navigate(&self, target: &TargetId, url: &str) -> Result<(), CdpError> {
        let page = self.page(target).await?;
        page.execute(NavigateParams::new(url)).await.map_err(command_err)?;
        Ok(())
    }

    async fn reload(&self, target: &TargetId, ignore_cache: bool) -> Result<(), CdpError> {
        let page = self.page(target).await?;
        page.execute(ReloadParams::builder().ignore_cache(ignore_cache).build())
            .await
            .map_err(command_err)?;
        Ok(())
    }

    async fn navigation_history(&self, target: &TargetId) -> Result<NavigationHistory, CdpError> {
        let page = self.page(target).await?;
        let resp = page
            .execute(GetNavigationHistoryParams::default())
            .await
            .map_err(command_err)?;
        Ok(NavigationHistory {
            current_index: resp.result.current_index,
            entries: resp
                .result
                .entries
                .iter()
                .map(|e| HistoryEntry {
                    id: e.id,
                    url: e.url.clone(),
                })
                .collect(),
        })
    }

    async fn navigate_to_history_entry(&self, target: &TargetId, entry_id: i64) -> Result<(), CdpError> {
        let page = self.page(target).await?;
        page.execute(NavigateToHistoryEntryParams::new(entry_id))
            .await
            .map_err(command_err)?;
        Ok(())
    }

    async fn capture_screenshot(&self, target: &TargetId) -> Result<String, CdpError> {
        let page = self.page(target).await?;
        let png = page
            .screenshot(ScreenshotParams::builder().format(CaptureScreenshotFormat::Png).build())
            .await
            .map_err(command_err)?;
        Ok(BASE64.encode(png))
    }
}

#[async_trait]
impl PageChannel for ChromeClient {
    async fn scroll_document(&self, target: &TargetId, delta_x: f64, delta_y: f64) -> Result<(), CdpError> {
        let page = self.page(target).await?;
        page.evaluate(format!("window.scrollBy({delta_x}, {delta_y})"))
            .await
            .map_err(command_err)?;
        Ok(())
    }

    async fn page_info(&self, target: &TargetId) -> Result<PageInfo, CdpError> {
        let page = self.page(target).await?;
        Ok(PageInfo {
            url: page.url().await.map_err(command_err)?.unwrap_or_default(),
            title: page.get_title().await.map_err(command_err)?.unwrap_or_default(),
        })
    }
}

// handler event loop
async fn handler_loop(mut handler: Handler) {
    while let Some(event) = handler.next().await {
        if let Err(e) = event {
            tracing::debug!(error = %e, "browser handler stopped");
            break;
        }
    }
}

// DevToolsActivePort holds the port on the first line and the ws path on the second
fn parse_devtools_active_port(content: &str) -> Option<String> {
    let mut lines = content.lines();
    let port = lines.next()?.trim();
    let path = lines.next()?.trim();
    if port.is_empty() || path.is_empty() {
        return None;
    }
    Some(format!("ws://127.0.0.1:{port}{path}"))
}

// try to find existing chrome with debugging enabled
async fn try_find_existing_chrome() -> Option<String> {
    let home = dirs::home_dir()?;

    for profile in CHROME_PROFILES {
        let port_file = home.join(profile).join("DevToolsActivePort");
        if let Ok(content) = tokio::fs::read_to_string(&port_file).await {
            if let Some(ws_url) = parse_devtools_active_port(&content) {
                return Some(ws_url);
            }
        }
    }

    // fallback: try localhost:9222
    if reqwest::get(format!("{DEFAULT_DEBUG_URL}/json/version")).await.is_ok() {
        return Some(DEFAULT_DEBUG_URL.to_string());
    }

    None
}

// launch chrome using chromiumoxide with dedicated debug profile
async fn launch_chrome_with_profile() -> Result<(Browser, Handler)> {
    // remote debugging needs a non-default user data dir
    let user_data_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEBUG_PROFILE_DIR);

    tracing::info!(profile = %user_data_dir.display(), "using debug profile");

    let config = BrowserConfig::builder()
        .disable_default_args()
        .with_head()
        .user_data_dir(&user_data_dir)
        .viewport(None)
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {}", e))?;

    Browser::launch(config)
        .await
        .context("failed to launch chrome")
}
