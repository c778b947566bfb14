// reasoning-engine function calls -> ordered browser actions

use serde_json::{Map, Value};
use thiserror::Error;

use crate::action::{Action, ScrollDirection, DEFAULT_DRAG_STEPS};
use crate::api::FunctionCall;
use crate::input::MouseButton;

const SEARCH_HOME: &str = "https://www.google.com/";
const DOCUMENT_SCROLL_MAGNITUDE: f64 = 999.0;
const SCROLL_AT_MAGNITUDE: f64 = 800.0;
const LONG_WAIT_MS: u64 = 5000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslateError {
    #[error("{function}: missing argument `{arg}`")]
    MissingArgument { function: String, arg: &'static str },
    #[error("{function}: argument `{arg}` must be {expected}")]
    InvalidArgument {
        function: String,
        arg: &'static str,
        expected: &'static str,
    },
}

struct Args<'a> {
    function: &'a str,
    args: &'a Map<String, Value>,
}

impl<'a> Args<'a> {
    fn missing(&self, arg: &'static str) -> TranslateError {
        TranslateError::MissingArgument {
            function: self.function.to_string(),
            arg,
        }
    }

    fn invalid(&self, arg: &'static str, expected: &'static str) -> TranslateError {
        TranslateError::InvalidArgument {
            function: self.function.to_string(),
            arg,
            expected,
        }
    }

    fn opt_number(&self, arg: &'static str) -> Result<Option<f64>, TranslateError> {
        match self.args.get(arg) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| self.invalid(arg, "a number")),
        }
    }

    fn number(&self, arg: &'static str) -> Result<f64, TranslateError> {
        self.opt_number(arg)?.ok_or_else(|| self.missing(arg))
    }

    fn opt_str(&self, arg: &'static str) -> Result<Option<&'a str>, TranslateError> {
        match self.args.get(arg) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_str().map(Some).ok_or_else(|| self.invalid(arg, "a string")),
        }
    }

    fn string(&self, arg: &'static str) -> Result<&'a str, TranslateError> {
        self.opt_str(arg)?.ok_or_else(|| self.missing(arg))
    }

    fn opt_bool(&self, arg: &'static str) -> Result<Option<bool>, TranslateError> {
        match self.args.get(arg) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_bool().map(Some).ok_or_else(|| self.invalid(arg, "a boolean")),
        }
    }
}

/// Expand one function call into the actions that carry it out, in order.
///
/// Unknown function names yield no actions. Bad arguments are an error so
/// the caller can report them back to the engine for that call only.
pub fn translate(call: &FunctionCall) -> Result<Vec<Action>, TranslateError> {
    let args = Args {
        function: &call.name,
        args: &call.args,
    };

    let actions = match call.name.as_str() {
        // the browser is already open
        "open_web_browser" => vec![],
        "click_at" => {
            let button = match args.opt_str("button")? {
                Some(name) => MouseButton::parse(name)
                    .filter(|b| *b != MouseButton::None)
                    .ok_or_else(|| args.invalid("button", "left, right or middle"))?,
                None => MouseButton::Left,
            };
            vec![Action::Click {
                x: args.number("x")?,
                y: args.number("y")?,
                button,
                click_count: 1,
            }]
        }
        "type_text_at" => {
            let (x, y) = (args.number("x")?, args.number("y")?);
            let text = args.string("text")?.to_string();
            // clear_before_typing is accepted but has no effect
            args.opt_bool("clear_before_typing")?;
            let mut actions = vec![Action::click(x, y), Action::TypeText { text, delay_ms: 0 }];
            if args.opt_bool("press_enter")?.unwrap_or(false) {
                actions.push(Action::key("Enter"));
            }
            actions
        }
        "key_combination" => {
            let keys = args
                .string("keys")?
                .split('+')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("+");
            vec![Action::key(keys)]
        }
        "scroll_document" => {
            let direction = ScrollDirection::parse(args.string("direction")?)
                .ok_or_else(|| args.invalid("direction", "up, down, left or right"))?;
            vec![Action::ScrollDocument {
                direction,
                magnitude: args.opt_number("magnitude")?.unwrap_or(DOCUMENT_SCROLL_MAGNITUDE),
            }]
        }
        "scroll_at" => {
            let direction = args
                .opt_str("direction")?
                .and_then(ScrollDirection::parse)
                .unwrap_or(ScrollDirection::Down);
            let magnitude = args.opt_number("magnitude")?.unwrap_or(SCROLL_AT_MAGNITUDE);
            let (delta_x, delta_y) = direction.delta(magnitude);
            vec![Action::Scroll {
                x: args.number("x")?,
                y: args.number("y")?,
                delta_x,
                delta_y,
            }]
        }
        "navigate" => vec![Action::GotoUrl {
            url: args.string("url")?.to_string(),
        }],
        "search" => vec![Action::GotoUrl {
            url: SEARCH_HOME.to_string(),
        }],
        "go_back" => vec![Action::GoBack],
        "go_forward" => vec![Action::GoForward],
        "wait_5_seconds" => vec![Action::Wait {
            time_ms: Some(LONG_WAIT_MS),
        }],
        "drag_and_drop" => vec![Action::DragAndDrop {
            from_x: args.number("x")?,
            from_y: args.number("y")?,
            to_x: args.number("destination_x")?,
            to_y: args.number("destination_y")?,
            button: MouseButton::Left,
            steps: DEFAULT_DRAG_STEPS,
            delay_ms: 0,
        }],
        other => {
            tracing::warn!(function = other, "unsupported function call");
            vec![]
        }
    };
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::call;
    use serde_json::json;

    #[test]
    fn test_type_text_at_with_enter() {
        let actions = translate(&call(
            "type_text_at",
            json!({"x": 10, "y": 20, "text": "rust", "press_enter": true}),
        ))
        .unwrap();
        assert_eq!(
            actions,
            vec![
                Action::click(10.0, 20.0),
                Action::TypeText {
                    text: "rust".to_string(),
                    delay_ms: 0
                },
                Action::key("Enter"),
            ]
        );
    }

    #[test]
    fn test_type_text_at_without_enter() {
        let actions = translate(&call(
            "type_text_at",
            json!({"x": 10, "y": 20, "text": "rust", "clear_before_typing": false}),
        ))
        .unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind(), "CLICK");
        assert_eq!(actions[1].kind(), "TYPE_TEXT");
    }

    #[test]
    fn test_unknown_and_noop_calls() {
        assert!(translate(&call("summon_dragon", json!({}))).unwrap().is_empty());
        assert!(translate(&call("open_web_browser", json!({}))).unwrap().is_empty());
    }

    #[test]
    fn test_scroll_at_defaults_and_sign() {
        let actions = translate(&call("scroll_at", json!({"x": 500, "y": 500}))).unwrap();
        assert_eq!(
            actions,
            vec![Action::Scroll {
                x: 500.0,
                y: 500.0,
                delta_x: 0.0,
                delta_y: 800.0
            }]
        );

        let actions = translate(&call(
            "scroll_at",
            json!({"x": 1, "y": 2, "direction": "LEFT", "magnitude": 300}),
        ))
        .unwrap();
        assert_eq!(
            actions[0],
            Action::Scroll {
                x: 1.0,
                y: 2.0,
                delta_x: -300.0,
                delta_y: 0.0
            }
        );
    }

    #[test]
    fn test_scroll_document_default_magnitude() {
        let actions = translate(&call("scroll_document", json!({"direction": "up"}))).unwrap();
        assert_eq!(
            actions,
            vec![Action::ScrollDocument {
                direction: ScrollDirection::Up,
                magnitude: 999.0
            }]
        );
    }

    #[test]
    fn test_key_combination_trims_tokens() {
        let actions = translate(&call("key_combination", json!({"keys": "Control + Shift + t"}))).unwrap();
        assert_eq!(actions, vec![Action::key("Control+Shift+t")]);
    }

    #[test]
    fn test_drag_and_drop_fields() {
        let actions = translate(&call(
            "drag_and_drop",
            json!({"x": 1, "y": 2, "destination_x": 3, "destination_y": 4}),
        ))
        .unwrap();
        assert!(matches!(
            actions[0],
            Action::DragAndDrop {
                from_x,
                to_y,
                steps: 5,
                ..
            } if from_x == 1.0 && to_y == 4.0
        ));
    }

    #[test]
    fn test_wait_and_history() {
        assert_eq!(
            translate(&call("wait_5_seconds", json!({}))).unwrap(),
            vec![Action::Wait { time_ms: Some(5000) }]
        );
        assert_eq!(translate(&call("go_back", json!({}))).unwrap(), vec![Action::GoBack]);
        assert_eq!(
            translate(&call("search", json!({}))).unwrap(),
            vec![Action::GotoUrl {
                url: SEARCH_HOME.to_string()
            }]
        );
    }

    #[test]
    fn test_bad_arguments() {
        assert_eq!(
            translate(&call("navigate", json!({}))),
            Err(TranslateError::MissingArgument {
                function: "navigate".to_string(),
                arg: "url"
            })
        );
        let err = translate(&call("click_at", json!({"x": "left", "y": 3}))).unwrap_err();
        assert!(matches!(err, TranslateError::InvalidArgument { arg: "x", .. }));
    }

    #[test]
    fn test_click_at_buttons() {
        let actions = translate(&call("click_at", json!({"x": 1, "y": 2, "button": "right"}))).unwrap();
        assert!(matches!(actions[0], Action::Click { button: MouseButton::Right, .. }));

        let err = translate(&call("click_at", json!({"x": 1, "y": 2, "button": "none"}))).unwrap_err();
        assert!(matches!(err, TranslateError::InvalidArgument { arg: "button", .. }));
    }
}
