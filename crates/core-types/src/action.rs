//! Closed action vocabulary and argument validation.
//!
//! The model emits `(name, args)` pairs. [`Action::from_call`] turns a pair
//! into a typed variant or rejects it before anything reaches the
//! environment.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

/// Upper bound of the normalized coordinate grid (both axes).
pub const COORDINATE_MAX: u16 = 1000;

const DEFAULT_SCROLL_MAGNITUDE: u32 = 800;

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    OpenWebBrowser,
    Navigate,
    ClickAt,
    HoverAt,
    TypeTextAt,
    ScrollDocument,
    ScrollAt,
    KeyCombination,
    #[cfg_attr(feature = "serde-full", serde(rename = "wait_5_seconds"))]
    Wait5Seconds,
    GoBack,
    GoForward,
    Search,
    DragAndDrop,
}

impl ActionKind {
    pub const ALL: [ActionKind; 13] = [
        ActionKind::OpenWebBrowser,
        ActionKind::Navigate,
        ActionKind::ClickAt,
        ActionKind::HoverAt,
        ActionKind::TypeTextAt,
        ActionKind::ScrollDocument,
        ActionKind::ScrollAt,
        ActionKind::KeyCombination,
        ActionKind::Wait5Seconds,
        ActionKind::GoBack,
        ActionKind::GoForward,
        ActionKind::Search,
        ActionKind::DragAndDrop,
    ];

    /// Wire name used in tool schemas and stored records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::OpenWebBrowser => "open_web_browser",
            ActionKind::Navigate => "navigate",
            ActionKind::ClickAt => "click_at",
            ActionKind::HoverAt => "hover_at",
            ActionKind::TypeTextAt => "type_text_at",
            ActionKind::ScrollDocument => "scroll_document",
            ActionKind::ScrollAt => "scroll_at",
            ActionKind::KeyCombination => "key_combination",
            ActionKind::Wait5Seconds => "wait_5_seconds",
            ActionKind::GoBack => "go_back",
            ActionKind::GoForward => "go_forward",
            ActionKind::Search => "search",
            ActionKind::DragAndDrop => "drag_and_drop",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ActionKind::OpenWebBrowser => "Open the web browser if it is not already open.",
            ActionKind::Navigate => "Navigate directly to a URL.",
            ActionKind::ClickAt => "Click at a normalized (0-1000) x/y position.",
            ActionKind::HoverAt => "Move the pointer to a normalized (0-1000) x/y position.",
            ActionKind::TypeTextAt => {
                "Click a normalized x/y position and type text, optionally pressing Enter."
            }
            ActionKind::ScrollDocument => "Scroll the whole page up, down, left or right.",
            ActionKind::ScrollAt => "Scroll at a normalized x/y position by a magnitude.",
            ActionKind::KeyCombination => "Press a key combination such as 'Control+C'.",
            ActionKind::Wait5Seconds => "Wait five seconds for the page to settle.",
            ActionKind::GoBack => "Go back in browser history.",
            ActionKind::GoForward => "Go forward in browser history.",
            ActionKind::Search => "Open the default search engine.",
            ActionKind::DragAndDrop => "Drag from one normalized x/y position to another.",
        }
    }

    /// Argument names the schema declares as required.
    pub fn required_arguments(&self) -> &'static [&'static str] {
        match self {
            ActionKind::Navigate => &["url"],
            ActionKind::ClickAt | ActionKind::HoverAt => &["x", "y"],
            ActionKind::TypeTextAt => &["x", "y", "text"],
            ActionKind::ScrollAt => &["x", "y", "direction"],
            ActionKind::ScrollDocument => &["direction"],
            ActionKind::KeyCombination => &["keys"],
            ActionKind::DragAndDrop => &["x", "y", "destination_x", "destination_y"],
            ActionKind::OpenWebBrowser
            | ActionKind::Wait5Seconds
            | ActionKind::GoBack
            | ActionKind::GoForward
            | ActionKind::Search => &[],
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ActionValidationError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| ActionValidationError::UnknownAction(name.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionValidationError {
    #[error("Unimplemented action: {0}")]
    UnknownAction(String),

    #[error("{action} requires argument '{argument}'")]
    MissingArgument {
        action: ActionKind,
        argument: &'static str,
    },

    #[error("{action} argument '{argument}' is invalid: {reason}")]
    InvalidArgument {
        action: ActionKind,
        argument: &'static str,
        reason: String,
    },
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Point {
    pub x: u16,
    pub y: u16,
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Left => "left",
            ScrollDirection::Right => "right",
        }
    }
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypeTextArgs {
    pub at: Point,
    pub text: String,
    pub press_enter: bool,
    pub clear_before_typing: bool,
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScrollAtArgs {
    pub at: Point,
    pub direction: ScrollDirection,
    pub magnitude: u32,
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DragArgs {
    pub from: Point,
    pub to: Point,
}

/// A validated action, one variant per [`ActionKind`].
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action {
    OpenWebBrowser,
    Navigate { url: String },
    ClickAt(Point),
    HoverAt(Point),
    TypeTextAt(TypeTextArgs),
    ScrollDocument { direction: ScrollDirection },
    ScrollAt(ScrollAtArgs),
    KeyCombination { keys: String },
    Wait5Seconds,
    GoBack,
    GoForward,
    Search,
    DragAndDrop(DragArgs),
}

impl Action {
    /// Validate a raw tool call against the shape its action kind requires.
    pub fn from_call(name: &str, args: &Map<String, Value>) -> Result<Self, ActionValidationError> {
        let kind: ActionKind = name.parse()?;
        let reader = ArgReader { kind, args };
        let action = match kind {
            ActionKind::OpenWebBrowser => Action::OpenWebBrowser,
            ActionKind::Navigate => Action::Navigate {
                url: reader.non_empty_string("url")?,
            },
            ActionKind::ClickAt => Action::ClickAt(reader.point("x", "y")?),
            ActionKind::HoverAt => Action::HoverAt(reader.point("x", "y")?),
            ActionKind::TypeTextAt => Action::TypeTextAt(TypeTextArgs {
                at: reader.point("x", "y")?,
                text: reader.string("text")?,
                press_enter: reader.flag("press_enter", true)?,
                clear_before_typing: reader.flag("clear_before_typing", true)?,
            }),
            ActionKind::ScrollDocument => Action::ScrollDocument {
                direction: reader.direction()?,
            },
            ActionKind::ScrollAt => Action::ScrollAt(ScrollAtArgs {
                at: reader.point("x", "y")?,
                direction: reader.direction()?,
                magnitude: reader.magnitude()?,
            }),
            ActionKind::KeyCombination => Action::KeyCombination {
                keys: reader.non_empty_string("keys")?,
            },
            ActionKind::Wait5Seconds => Action::Wait5Seconds,
            ActionKind::GoBack => Action::GoBack,
            ActionKind::GoForward => Action::GoForward,
            ActionKind::Search => Action::Search,
            ActionKind::DragAndDrop => Action::DragAndDrop(DragArgs {
                from: reader.point("x", "y")?,
                to: reader.point("destination_x", "destination_y")?,
            }),
        };
        Ok(action)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::OpenWebBrowser => ActionKind::OpenWebBrowser,
            Action::Navigate { .. } => ActionKind::Navigate,
            Action::ClickAt(_) => ActionKind::ClickAt,
            Action::HoverAt(_) => ActionKind::HoverAt,
            Action::TypeTextAt(_) => ActionKind::TypeTextAt,
            Action::ScrollDocument { .. } => ActionKind::ScrollDocument,
            Action::ScrollAt(_) => ActionKind::ScrollAt,
            Action::KeyCombination { .. } => ActionKind::KeyCombination,
            Action::Wait5Seconds => ActionKind::Wait5Seconds,
            Action::GoBack => ActionKind::GoBack,
            Action::GoForward => ActionKind::GoForward,
            Action::Search => ActionKind::Search,
            Action::DragAndDrop(_) => ActionKind::DragAndDrop,
        }
    }

    /// True for a key combination that copies the current selection.
    pub fn is_copy(&self) -> bool {
        match self {
            Action::KeyCombination { keys } => {
                let normalized = keys.to_ascii_lowercase().replace(' ', "");
                let has_modifier = normalized.contains("control")
                    || normalized.contains("ctrl")
                    || normalized.contains("meta")
                    || normalized.contains("cmd");
                has_modifier && normalized.split(['+', '-']).any(|part| part == "c")
            }
            _ => false,
        }
    }
}

struct ArgReader<'a> {
    kind: ActionKind,
    args: &'a Map<String, Value>,
}

impl ArgReader<'_> {
    fn missing(&self, argument: &'static str) -> ActionValidationError {
        ActionValidationError::MissingArgument {
            action: self.kind,
            argument,
        }
    }

    fn invalid(&self, argument: &'static str, reason: impl Into<String>) -> ActionValidationError {
        ActionValidationError::InvalidArgument {
            action: self.kind,
            argument,
            reason: reason.into(),
        }
    }

    fn string(&self, argument: &'static str) -> Result<String, ActionValidationError> {
        match self.args.get(argument) {
            None | Some(Value::Null) => Err(self.missing(argument)),
            Some(Value::String(value)) => Ok(value.clone()),
            Some(Value::Number(value)) => Ok(value.to_string()),
            Some(other) => Err(self.invalid(argument, format!("expected string, got {other}"))),
        }
    }

    fn non_empty_string(&self, argument: &'static str) -> Result<String, ActionValidationError> {
        let value = self.string(argument)?;
        if value.trim().is_empty() {
            return Err(self.invalid(argument, "must not be empty"));
        }
        Ok(value)
    }

    fn flag(&self, argument: &'static str, default: bool) -> Result<bool, ActionValidationError> {
        match self.args.get(argument) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(value)) => Ok(*value),
            Some(Value::String(value)) => match value.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(self.invalid(argument, format!("expected boolean, got '{value}'"))),
            },
            Some(other) => Err(self.invalid(argument, format!("expected boolean, got {other}"))),
        }
    }

    fn coordinate(&self, argument: &'static str) -> Result<u16, ActionValidationError> {
        let value = self.args.get(argument).ok_or_else(|| self.missing(argument))?;
        let number = match value {
            Value::Number(number) => number
                .as_f64()
                .ok_or_else(|| self.invalid(argument, "not a finite number"))?,
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| self.invalid(argument, format!("expected number, got '{text}'")))?,
            Value::Null => return Err(self.missing(argument)),
            other => return Err(self.invalid(argument, format!("expected number, got {other}"))),
        };
        let rounded = number.round();
        if !(0.0..=f64::from(COORDINATE_MAX)).contains(&rounded) {
            return Err(self.invalid(
                argument,
                format!("{number} is outside 0..={COORDINATE_MAX}"),
            ));
        }
        Ok(rounded as u16)
    }

    fn point(
        &self,
        x: &'static str,
        y: &'static str,
    ) -> Result<Point, ActionValidationError> {
        Ok(Point {
            x: self.coordinate(x)?,
            y: self.coordinate(y)?,
        })
    }

    fn direction(&self) -> Result<ScrollDirection, ActionValidationError> {
        match self.args.get("direction") {
            None | Some(Value::Null) => Ok(ScrollDirection::default()),
            Some(Value::String(value)) => match value.to_ascii_lowercase().as_str() {
                "up" => Ok(ScrollDirection::Up),
                "down" => Ok(ScrollDirection::Down),
                "left" => Ok(ScrollDirection::Left),
                "right" => Ok(ScrollDirection::Right),
                _ => Err(self.invalid("direction", format!("unknown direction '{value}'"))),
            },
            Some(other) => Err(self.invalid("direction", format!("expected string, got {other}"))),
        }
    }

    fn magnitude(&self) -> Result<u32, ActionValidationError> {
        match self.args.get("magnitude") {
            None | Some(Value::Null) => Ok(DEFAULT_SCROLL_MAGNITUDE),
            Some(Value::Number(number)) => number
                .as_u64()
                .and_then(|value| u32::try_from(value).ok())
                .ok_or_else(|| self.invalid("magnitude", "expected a non-negative integer")),
            Some(other) => Err(self.invalid("magnitude", format!("expected integer, got {other}"))),
        }
    }
}
