// in-process fakes shared by the unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{
    ApiError, Candidate, Content, FunctionCall, GenerateResponse, Part, ReasoningEngine, FINISH_STOP,
};
use crate::cdp::{
    CdpError, DebugProtocol, HistoryEntry, NavigationHistory, PageChannel, PageInfo, TargetId,
};
use crate::coords::Viewport;
use crate::input::{KeyEvent, MouseEvent};

pub const FAKE_SCREENSHOT: &str = "iVBORw0KGgo=";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Attach,
    Detach,
    MainFrame,
    Viewport,
    Mouse(MouseEvent),
    Key(KeyEvent),
    Navigate(String),
    Reload(bool),
    History,
    HistoryEntry(i64),
    Screenshot,
    ScrollDocument(f64, f64),
    PageInfo,
}

/// Records every call and answers like a single well-behaved page.
pub struct FakeHost {
    calls: Mutex<Vec<Call>>,
    viewport: Mutex<Viewport>,
    url: Mutex<String>,
    history: Mutex<NavigationHistory>,
    attach_delay: Mutex<HashMap<TargetId, Duration>>,
    fail_attach: AtomicBool,
    fail_detach: AtomicBool,
    fail_mouse: AtomicBool,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            viewport: Mutex::new(Viewport::new(1280.0, 720.0)),
            url: Mutex::new("about:blank".to_string()),
            history: Mutex::new(NavigationHistory {
                current_index: 0,
                entries: vec![HistoryEntry {
                    id: 1,
                    url: "about:blank".to_string(),
                }],
            }),
            attach_delay: Mutex::new(HashMap::new()),
            fail_attach: AtomicBool::new(false),
            fail_detach: AtomicBool::new(false),
            fail_mouse: AtomicBool::new(false),
        }
    }

    pub fn set_viewport(&self, width: f64, height: f64) {
        *self.viewport.lock().unwrap() = Viewport::new(width, height);
    }

    pub fn set_history(&self, history: NavigationHistory) {
        *self.history.lock().unwrap() = history;
    }

    /// Make attaching to `target` take `delay`.
    pub fn slow_attach(&self, target: &str, delay: Duration) {
        self.attach_delay.lock().unwrap().insert(TargetId::new(target), delay);
    }

    pub fn fail_attach(&self) {
        self.fail_attach.store(true, Ordering::SeqCst);
    }

    pub fn fail_detach(&self) {
        self.fail_detach.store(true, Ordering::SeqCst);
    }

    pub fn fail_mouse(&self) {
        self.fail_mouse.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn mouse_events(&self) -> Vec<MouseEvent> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Mouse(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn key_events(&self) -> Vec<KeyEvent> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Key(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DebugProtocol for FakeHost {
    async fn attach(&self, target: &TargetId) -> Result<(), CdpError> {
        self.record(Call::Attach);
        let delay = self.attach_delay.lock().unwrap().get(target).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(CdpError::Command("Another debugger is already attached".to_string()));
        }
        Ok(())
    }

    async fn detach(&self, _target: &TargetId) -> Result<(), CdpError> {
        self.record(Call::Detach);
        if self.fail_detach.load(Ordering::SeqCst) {
            return Err(CdpError::Command("Debugger is not attached".to_string()));
        }
        Ok(())
    }

    async fn main_frame_id(&self, _target: &TargetId) -> Result<String, CdpError> {
        self.record(Call::MainFrame);
        Ok("frame-1".to_string())
    }

    async fn layout_viewport(&self, _target: &TargetId) -> Result<Viewport, CdpError> {
        self.record(Call::Viewport);
        Ok(*self.viewport.lock().unwrap())
    }

    async fn dispatch_mouse_event(&self, _target: &TargetId, event: &MouseEvent) -> Result<(), CdpError> {
        if self.fail_mouse.load(Ordering::SeqCst) {
            return Err(CdpError::Command("Input.dispatchMouseEvent rejected".to_string()));
        }
        self.record(Call::Mouse(event.clone()));
        Ok(())
    }

    async fn dispatch_key_event(&self, _target: &TargetId, event: &KeyEvent) -> Result<(), CdpError> {
        self.record(Call::Key(event.clone()));
        Ok(())
    }

    async fn navigate(&self, _target: &TargetId, url: &str) -> Result<(), CdpError> {
        self.record(Call::Navigate(url.to_string()));
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn reload(&self, _target: &TargetId, ignore_cache: bool) -> Result<(), CdpError> {
        self.record(Call::Reload(ignore_cache));
        Ok(())
    }

    async fn navigation_history(&self, _target: &TargetId) -> Result<NavigationHistory, CdpError> {
        self.record(Call::History);
        Ok(self.history.lock().unwrap().clone())
    }

    async fn navigate_to_history_entry(&self, _target: &TargetId, entry_id: i64) -> Result<(), CdpError> {
        self.record(Call::HistoryEntry(entry_id));
        Ok(())
    }

    async fn capture_screenshot(&self, _target: &TargetId) -> Result<String, CdpError> {
        self.record(Call::Screenshot);
        Ok(FAKE_SCREENSHOT.to_string())
    }
}

#[async_trait]
impl PageChannel for FakeHost {
    async fn scroll_document(&self, _target: &TargetId, delta_x: f64, delta_y: f64) -> Result<(), CdpError> {
        self.record(Call::ScrollDocument(delta_x, delta_y));
        Ok(())
    }

    async fn page_info(&self, _target: &TargetId) -> Result<PageInfo, CdpError> {
        self.record(Call::PageInfo);
        Ok(PageInfo {
            url: self.url.lock().unwrap().clone(),
            title: "Fake Page".to_string(),
        })
    }
}

/// Replays canned responses; once the script runs out it repeats `fallback`.
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Result<GenerateResponse, String>>>,
    fallback: GenerateResponse,
    seen: Mutex<Vec<Vec<Content>>>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<GenerateResponse>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            fallback: model_says("Done."),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: GenerateResponse) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: response,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        let engine = Self::new(Vec::new());
        engine.script.lock().unwrap().push_back(Err(message.to_string()));
        engine
    }

    pub fn requests(&self) -> Vec<Vec<Content>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn generate(&self, history: &[Content]) -> Result<GenerateResponse, ApiError> {
        self.seen.lock().unwrap().push(history.to_vec());
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(msg)) => Err(ApiError::Api(msg)),
            None => Ok(self.fallback.clone()),
        }
    }
}

pub fn call(name: &str, args: serde_json::Value) -> FunctionCall {
    FunctionCall {
        name: name.to_string(),
        args: args.as_object().cloned().unwrap_or_default(),
    }
}

pub fn model_turn(text: &str, calls: Vec<FunctionCall>, finish_reason: &str) -> GenerateResponse {
    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(Part::Text { text: text.to_string() });
    }
    parts.extend(calls.into_iter().map(|function_call| Part::FunctionCall { function_call }));
    GenerateResponse {
        candidates: vec![Candidate {
            content: Some(Content {
                role: "model".to_string(),
                parts,
            }),
            finish_reason: Some(finish_reason.to_string()),
        }],
    }
}

pub fn model_calls(calls: Vec<FunctionCall>) -> GenerateResponse {
    model_turn("", calls, FINISH_STOP)
}

pub fn model_says(text: &str) -> GenerateResponse {
    model_turn(text, Vec::new(), FINISH_STOP)
}
