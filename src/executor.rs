// action execution against an attached session; failures come back as a failed ActionResult

use std::time::Duration;

use crate::action::{Action, ActionResult, Screenshot, ScrollDirection, DEFAULT_WAIT_MS};
use crate::cdp::CdpError;
use crate::coords::{interpolate, Viewport, VirtualPoint};
use crate::input::{self, MouseButton, MouseEvent};
use crate::keys::KeyChord;
use crate::session::Session;

/// Pause before a screenshot so the previous action's effects render.
pub const SCREENSHOT_SETTLE: Duration = Duration::from_millis(500);

pub struct ActionExecutor {
    settle: Duration,
}

impl Default for ActionExecutor {
    fn default() -> Self {
        Self::new(SCREENSHOT_SETTLE)
    }
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

fn report(result: Result<ActionResult, CdpError>, kind: &str) -> ActionResult {
    result.unwrap_or_else(|e| {
        tracing::warn!(action = kind, error = %e, "action failed");
        ActionResult::failed(e.to_string())
    })
}

impl ActionExecutor {
    pub fn new(settle: Duration) -> Self {
        Self { settle }
    }

    pub async fn execute(&self, session: &Session, action: &Action) -> ActionResult {
        if !session.is_attached() {
            return ActionResult::failed(CdpError::NotAttached(session.target().to_string()).to_string());
        }
        tracing::debug!(target = %session.target(), action = action.kind(), "executing");

        match action {
            Action::GotoUrl { url } => self.navigate(session, url).await,
            Action::ReloadTab { ignore_cache } => self.reload(session, *ignore_cache).await,
            Action::GoBack => self.go_back(session).await,
            Action::GoForward => self.go_forward(session).await,
            Action::Click {
                x,
                y,
                button,
                click_count,
            } => self.click(session, VirtualPoint::new(*x, *y), *button, *click_count).await,
            Action::DoubleClick { x, y } => self.double_click(session, VirtualPoint::new(*x, *y)).await,
            Action::TypeText { text, delay_ms } => self.type_text(session, text, *delay_ms).await,
            Action::KeyPress { key, delay_ms } => self.key_press(session, key, *delay_ms).await,
            Action::Scroll {
                x,
                y,
                delta_x,
                delta_y,
            } => self.scroll(session, VirtualPoint::new(*x, *y), *delta_x, *delta_y).await,
            Action::ScrollDocument { direction, magnitude } => {
                self.scroll_document(session, *direction, *magnitude).await
            }
            Action::DragAndDrop {
                from_x,
                from_y,
                to_x,
                to_y,
                button,
                steps,
                delay_ms,
            } => {
                self.drag_and_drop(
                    session,
                    VirtualPoint::new(*from_x, *from_y),
                    VirtualPoint::new(*to_x, *to_y),
                    *button,
                    *steps,
                    *delay_ms,
                )
                .await
            }
            Action::CaptureScreenshot => self.capture_screenshot(session).await,
            Action::Wait { time_ms } => self.wait(*time_ms).await,
        }
    }

    // always fetched fresh, the page may have resized or navigated
    async fn viewport(&self, session: &Session) -> Result<Viewport, CdpError> {
        session.host().layout_viewport(session.target()).await
    }

    async fn dispatch_mouse(&self, session: &Session, events: &[MouseEvent], delay_ms: u64) -> Result<(), CdpError> {
        for event in events {
            session.host().dispatch_mouse_event(session.target(), event).await?;
            if event.holds_button() {
                pause(delay_ms).await;
            }
        }
        Ok(())
    }

    pub async fn navigate(&self, session: &Session, url: &str) -> ActionResult {
        let result = session
            .host()
            .navigate(session.target(), url)
            .await
            .map(|()| ActionResult::ok("Sent navigation command"));
        report(result, "GOTO_URL")
    }

    pub async fn reload(&self, session: &Session, ignore_cache: bool) -> ActionResult {
        let result = session
            .host()
            .reload(session.target(), ignore_cache)
            .await
            .map(|()| ActionResult::ok("Sent reload command"));
        report(result, "RELOAD_TAB")
    }

    pub async fn go_back(&self, session: &Session) -> ActionResult {
        let result = async {
            let history = session.host().navigation_history(session.target()).await?;
            if let Some(entry) = history.previous() {
                session
                    .host()
                    .navigate_to_history_entry(session.target(), entry.id)
                    .await?;
            }
            Ok::<_, CdpError>(ActionResult::ok("Sent go back command"))
        };
        report(result.await, "GO_BACK")
    }

    pub async fn go_forward(&self, session: &Session) -> ActionResult {
        let result = async {
            let history = session.host().navigation_history(session.target()).await?;
            if let Some(entry) = history.next() {
                session
                    .host()
                    .navigate_to_history_entry(session.target(), entry.id)
                    .await?;
            }
            Ok::<_, CdpError>(ActionResult::ok("Sent go forward command"))
        };
        report(result.await, "GO_FORWARD")
    }

    pub async fn click(
        &self,
        session: &Session,
        at: VirtualPoint,
        button: MouseButton,
        click_count: u32,
    ) -> ActionResult {
        let result = async {
            let point = self.viewport(session).await?.to_pixels(at);
            let events = input::click_events(point, button, i64::from(click_count));
            self.dispatch_mouse(session, &events, 0).await?;
            Ok::<_, CdpError>(ActionResult::ok("Dispatched click event"))
        };
        report(result.await, "CLICK")
    }

    pub async fn double_click(&self, session: &Session, at: VirtualPoint) -> ActionResult {
        self.click(session, at, MouseButton::Left, 2).await
    }

    pub async fn scroll(&self, session: &Session, at: VirtualPoint, delta_x: f64, delta_y: f64) -> ActionResult {
        let result = async {
            let viewport = self.viewport(session).await?;
            let point = viewport.to_pixels(at);
            let (dx, dy) = viewport.scale_delta(delta_x, delta_y);
            self.dispatch_mouse(session, &input::wheel_events(point, dx, dy), 0)
                .await?;
            Ok::<_, CdpError>(ActionResult::ok("Dispatched scroll event"))
        };
        report(result.await, "SCROLL")
    }

    /// Scrolls the whole document through the page side channel; a single
    /// wheel event cannot express this.
    pub async fn scroll_document(&self, session: &Session, direction: ScrollDirection, magnitude: f64) -> ActionResult {
        let result = async {
            let (dx, dy) = direction.delta(magnitude);
            let (dx, dy) = self.viewport(session).await?.scale_delta(dx, dy);
            session.host().scroll_document(session.target(), dx, dy).await?;
            Ok::<_, CdpError>(ActionResult::ok("Attempted to scroll document"))
        };
        report(result.await, "SCROLL_DOCUMENT")
    }

    pub async fn drag_and_drop(
        &self,
        session: &Session,
        from: VirtualPoint,
        to: VirtualPoint,
        button: MouseButton,
        steps: u32,
        delay_ms: u64,
    ) -> ActionResult {
        let result = async {
            let viewport = self.viewport(session).await?;
            let path: Vec<_> = interpolate(from, to, steps)
                .into_iter()
                .map(|p| viewport.to_pixels(p))
                .collect();
            let events = input::drag_events(viewport.to_pixels(from), &path, viewport.to_pixels(to), button);
            self.dispatch_mouse(session, &events, delay_ms).await?;
            Ok::<_, CdpError>(ActionResult::ok("Dispatched drag and drop event"))
        };
        report(result.await, "DRAG_AND_DROP")
    }

    pub async fn type_text(&self, session: &Session, text: &str, delay_ms: u64) -> ActionResult {
        let result = async {
            for stroke in input::text_events(text) {
                for event in &stroke {
                    session.host().dispatch_key_event(session.target(), event).await?;
                }
                pause(delay_ms).await;
            }
            Ok::<_, CdpError>(ActionResult::ok("Dispatched type text events"))
        };
        report(result.await, "TYPE_TEXT")
    }

    pub async fn key_press(&self, session: &Session, key: &str, delay_ms: u64) -> ActionResult {
        let result = async {
            let [down, up] = input::chord_events(&KeyChord::parse(key));
            session.host().dispatch_key_event(session.target(), &down).await?;
            pause(delay_ms).await;
            session.host().dispatch_key_event(session.target(), &up).await?;
            Ok::<_, CdpError>(ActionResult::ok("Dispatched key press events"))
        };
        report(result.await, "KEY_PRESS")
    }

    pub async fn capture_screenshot(&self, session: &Session) -> ActionResult {
        report(
            self.screenshot(session).await.map(ActionResult::with_screenshot),
            "CAPTURE_SCREENSHOT",
        )
    }

    /// Settle, capture, then read the page's URL and title.
    pub async fn screenshot(&self, session: &Session) -> Result<Screenshot, CdpError> {
        if !session.is_attached() {
            return Err(CdpError::NotAttached(session.target().to_string()));
        }
        tokio::time::sleep(self.settle).await;
        if !session.is_attached() {
            return Err(CdpError::NotAttached(session.target().to_string()));
        }
        let base64 = session.host().capture_screenshot(session.target()).await?;
        let info = session.host().page_info(session.target()).await?;
        Ok(Screenshot {
            base64,
            page_url: info.url,
            page_title: info.title,
        })
    }

    pub async fn wait(&self, time_ms: Option<u64>) -> ActionResult {
        tokio::time::sleep(Duration::from_millis(time_ms.unwrap_or(DEFAULT_WAIT_MS))).await;
        ActionResult::ok("Waited")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cdp::{HistoryEntry, NavigationHistory, TargetId};
    use crate::input::{KeyEventKind, MouseEventKind};
    use crate::session::SessionManager;
    use crate::testing::{Call, FakeHost, FAKE_SCREENSHOT};

    async fn setup() -> (Arc<FakeHost>, SessionManager, Session, ActionExecutor) {
        let host = Arc::new(FakeHost::new());
        let manager = SessionManager::new(host.clone());
        let session = manager.attach(&TargetId::new("tab-1")).await.unwrap();
        (host, manager, session, ActionExecutor::new(Duration::ZERO))
    }

    #[tokio::test]
    async fn test_click_uses_live_viewport() {
        let (host, _manager, session, executor) = setup().await;

        let result = executor.execute(&session, &Action::click(500.0, 200.0)).await;
        assert!(result.success);
        let events = host.mouse_events();
        assert_eq!(events.len(), 3);
        assert_eq!((events[1].x, events[1].y), (640.0, 144.0));

        // resize between actions: the next click must see the new size
        host.set_viewport(1000.0, 1000.0);
        executor.execute(&session, &Action::click(500.0, 200.0)).await;
        let events = host.mouse_events();
        assert_eq!((events[4].x, events[4].y), (500.0, 200.0));
        assert_eq!(host.count(|c| matches!(c, Call::Viewport)), 2);
    }

    #[tokio::test]
    async fn test_double_click_count() {
        let (host, _manager, session, executor) = setup().await;
        executor
            .execute(&session, &Action::DoubleClick { x: 10.0, y: 10.0 })
            .await;
        let events = host.mouse_events();
        assert_eq!(events[1].click_count, Some(2));
        assert_eq!(events[1].button, MouseButton::Left);
    }

    #[tokio::test]
    async fn test_drag_and_drop_event_counts() {
        let (host, _manager, session, executor) = setup().await;
        host.set_viewport(1333.0, 777.0);

        let action = Action::DragAndDrop {
            from_x: 100.0,
            from_y: 100.0,
            to_x: 733.0,
            to_y: 911.0,
            button: MouseButton::Left,
            steps: 5,
            delay_ms: 0,
        };
        assert!(executor.execute(&session, &action).await.success);

        let events = host.mouse_events();
        let pressed = events.iter().filter(|e| e.kind == MouseEventKind::MousePressed).count();
        let moved = events
            .iter()
            .filter(|e| e.kind == MouseEventKind::MouseMoved && e.button == MouseButton::Left)
            .count();
        let released: Vec<_> = events
            .iter()
            .filter(|e| e.kind == MouseEventKind::MouseReleased)
            .collect();
        assert_eq!((pressed, moved, released.len()), (1, 5, 1));

        let expected = Viewport::new(1333.0, 777.0).to_pixels(VirtualPoint::new(733.0, 911.0));
        assert_eq!((released[0].x, released[0].y), (expected.x, expected.y));
    }

    #[tokio::test]
    async fn test_scroll_keeps_negative_delta() {
        let (host, _manager, session, executor) = setup().await;
        host.set_viewport(1000.0, 1000.0);
        let action = Action::Scroll {
            x: 500.0,
            y: 500.0,
            delta_x: 0.0,
            delta_y: -800.0,
        };
        assert!(executor.execute(&session, &action).await.success);
        let wheel = host.mouse_events().pop().unwrap();
        assert_eq!(wheel.kind, MouseEventKind::MouseWheel);
        assert_eq!(wheel.delta_y, Some(-800.0));
        assert_eq!((wheel.x, wheel.y), (500.0, 500.0));
    }

    #[tokio::test]
    async fn test_scroll_document_goes_through_page_channel() {
        let (host, _manager, session, executor) = setup().await;
        host.set_viewport(1000.0, 500.0);
        let action = Action::ScrollDocument {
            direction: ScrollDirection::Up,
            magnitude: 999.0,
        };
        assert!(executor.execute(&session, &action).await.success);
        assert!(host.calls().contains(&Call::ScrollDocument(0.0, -499.0)));
        assert!(host.mouse_events().is_empty());
    }

    #[tokio::test]
    async fn test_type_text_one_pair_per_char() {
        let (host, _manager, session, executor) = setup().await;
        let action = Action::TypeText {
            text: "hi\n".to_string(),
            delay_ms: 0,
        };
        assert!(executor.execute(&session, &action).await.success);
        let keys = host.key_events();
        assert_eq!(keys.len(), 6);
        assert_eq!(keys[0].text.as_deref(), Some("h"));
        assert_eq!(keys[4].key.as_deref(), Some("Enter"));
        assert_eq!(keys[5].kind, KeyEventKind::KeyUp);
    }

    #[tokio::test]
    async fn test_key_press_chord() {
        let (host, _manager, session, executor) = setup().await;
        executor.execute(&session, &Action::key("Ctrl+Shift+a")).await;
        let keys = host.key_events();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].kind, KeyEventKind::RawKeyDown);
        assert_eq!(keys[1].kind, KeyEventKind::KeyUp);
    }

    #[tokio::test]
    async fn test_go_back_without_history_is_noop_success() {
        let (host, _manager, session, executor) = setup().await;
        let result = executor.execute(&session, &Action::GoBack).await;
        assert!(result.success);
        assert_eq!(host.count(|c| matches!(c, Call::HistoryEntry(_))), 0);
    }

    #[tokio::test]
    async fn test_go_forward_uses_next_entry() {
        let (host, _manager, session, executor) = setup().await;
        host.set_history(NavigationHistory {
            current_index: 0,
            entries: vec![
                HistoryEntry {
                    id: 7,
                    url: "https://a.test".to_string(),
                },
                HistoryEntry {
                    id: 9,
                    url: "https://b.test".to_string(),
                },
            ],
        });
        assert!(executor.execute(&session, &Action::GoForward).await.success);
        assert!(host.calls().contains(&Call::HistoryEntry(9)));
    }

    #[tokio::test]
    async fn test_protocol_failure_becomes_result() {
        let (host, _manager, session, executor) = setup().await;
        host.fail_mouse();
        let result = executor.execute(&session, &Action::click(1.0, 1.0)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("dispatchMouseEvent rejected"));
    }

    #[tokio::test]
    async fn test_detached_session_refused() {
        let (host, manager, session, executor) = setup().await;
        manager.release(&session).await;
        let result = executor
            .execute(&session, &Action::GotoUrl {
                url: "https://example.com".to_string(),
            })
            .await;
        assert!(!result.success);
        assert_eq!(host.count(|c| matches!(c, Call::Navigate(_))), 0);
    }

    #[tokio::test]
    async fn test_screenshot_refused_after_release() {
        let (host, manager, session, executor) = setup().await;
        manager.release(&session).await;
        let err = executor.screenshot(&session).await.unwrap_err();
        assert!(matches!(err, CdpError::NotAttached(_)));
        assert_eq!(host.count(|c| matches!(c, Call::Screenshot)), 0);
    }

    #[tokio::test]
    async fn test_capture_screenshot_reports_page() {
        let (_host, _manager, session, executor) = setup().await;
        executor
            .execute(&session, &Action::GotoUrl {
                url: "https://example.com".to_string(),
            })
            .await;
        let result = executor.execute(&session, &Action::CaptureScreenshot).await;
        let shot = result.screenshot.unwrap();
        assert_eq!(shot.base64, FAKE_SCREENSHOT);
        assert_eq!(shot.page_url, "https://example.com");
        assert_eq!(shot.page_title, "Fake Page");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_defaults_to_half_second() {
        let executor = ActionExecutor::default();
        let start = tokio::time::Instant::now();
        assert!(executor.wait(None).await.success);
        assert_eq!(start.elapsed(), Duration::from_millis(DEFAULT_WAIT_MS));
    }
}
