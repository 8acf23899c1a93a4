//! UI Action Contract
//!
//! The vision oracle names the next UI action as text such as `Tap(120,640)`.
//! That text is parsed exactly once into an [`Action`]; everything downstream
//! dispatches on the enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A single UI interaction on the device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Action {
    Tap { x: u32, y: u32 },
    Swipe { x1: u32, y1: u32, x2: u32, y2: u32 },
    Type { text: String },
    Back,
    Home,
    #[default]
    None,
}

/// Errors from parsing action text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionParseError {
    #[error("unknown action: {0}")]
    Unknown(String),

    #[error("{action} expects {expected} coordinates, got {actual}")]
    Coordinates {
        action: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("invalid coordinate in {0}")]
    InvalidCoordinate(String),

    #[error("missing argument list in {0}")]
    MissingArguments(String),
}

impl Action {
    /// Short name used for logging, check ids and device endpoints.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tap { .. } => "tap",
            Self::Swipe { .. } => "swipe",
            Self::Type { .. } => "type",
            Self::Back => "back",
            Self::Home => "home",
            Self::None => "none",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Text between the first `(` and the last `)`.
fn arguments<'a>(raw: &'a str) -> Result<&'a str, ActionParseError> {
    let open = raw
        .find('(')
        .ok_or_else(|| ActionParseError::MissingArguments(raw.to_string()))?;
    let close = raw
        .rfind(')')
        .filter(|close| *close > open)
        .ok_or_else(|| ActionParseError::MissingArguments(raw.to_string()))?;
    Ok(&raw[open + 1..close])
}

fn coordinates(
    action: &'static str,
    raw: &str,
    expected: usize,
) -> Result<Vec<u32>, ActionParseError> {
    let args = arguments(raw)?;
    let values = args
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| ActionParseError::InvalidCoordinate(raw.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if args.contains('-') {
        return Err(ActionParseError::InvalidCoordinate(raw.to_string()));
    }

    if values.len() != expected {
        return Err(ActionParseError::Coordinates {
            action,
            expected,
            actual: values.len(),
        });
    }
    Ok(values)
}

impl FromStr for Action {
    type Err = ActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let lower = raw.to_ascii_lowercase();

        if lower.is_empty() || lower == "none" {
            return Ok(Self::None);
        }
        if lower == "back" || lower == "back()" {
            return Ok(Self::Back);
        }
        if lower == "home" || lower == "home()" {
            return Ok(Self::Home);
        }

        if lower.starts_with("tap") {
            let c = coordinates("Tap", raw, 2)?;
            return Ok(Self::Tap { x: c[0], y: c[1] });
        }

        // Accepts Swipe(x1,y1,x2,y2), Swipe((x1,y1),(x2,y2)) and Swipe(x1,y1),(x2,y2).
        if lower.starts_with("swipe") {
            let c = coordinates("Swipe", raw, 4)?;
            return Ok(Self::Swipe {
                x1: c[0],
                y1: c[1],
                x2: c[2],
                y2: c[3],
            });
        }

        if lower.starts_with("type") {
            let text = arguments(raw)?;
            return Ok(Self::Type {
                text: text.to_string(),
            });
        }

        Err(ActionParseError::Unknown(raw.to_string()))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tap { x, y } => write!(f, "Tap({},{})", x, y),
            Self::Swipe { x1, y1, x2, y2 } => write!(f, "Swipe({},{},{},{})", x1, y1, x2, y2),
            Self::Type { text } => write!(f, "Type({})", text),
            Self::Back => write!(f, "Back"),
            Self::Home => write!(f, "Home"),
            Self::None => write!(f, "None"),
        }
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            Some(text) => text.parse().map_err(serde::de::Error::custom),
            None => Ok(Action::None),
        }
    }
}
