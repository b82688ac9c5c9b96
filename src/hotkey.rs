//! Global hotkey accelerator strings.
//!
//! Registration belongs to the host's key listener; this module only validates
//! and normalizes what the config holds. Two notations are accepted:
//!
//! - accelerator style: `CommandOrControl+Shift+Space`
//! - GTK style: `<Alt>space`, `<Ctrl><Shift>p`

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HotkeyError {
    #[error("Hotkey is empty")]
    Empty,

    #[error("Unknown modifier '{0}'")]
    UnknownModifier(String),

    #[error("Hotkey '{0}' has no key")]
    MissingKey(String),

    #[error("Hotkey needs at least one modifier: '{0}'")]
    MissingModifier(String),
}

/// Supported modifiers, in canonical display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HotkeyModifier {
    /// Command on macOS, Control elsewhere.
    CommandOrControl,
    Command,
    Control,
    Alt,
    Shift,
    Super,
}

impl HotkeyModifier {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "commandorcontrol" | "cmdorctrl" | "primary" => Some(Self::CommandOrControl),
            "command" | "cmd" | "meta" => Some(Self::Command),
            "control" | "ctrl" => Some(Self::Control),
            "alt" | "option" => Some(Self::Alt),
            "shift" => Some(Self::Shift),
            "super" | "win" => Some(Self::Super),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandOrControl => "CommandOrControl",
            Self::Command => "Command",
            Self::Control => "Control",
            Self::Alt => "Alt",
            Self::Shift => "Shift",
            Self::Super => "Super",
        }
    }
}

/// A parsed hotkey: one or more modifiers plus a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hotkey {
    pub modifiers: Vec<HotkeyModifier>,
    pub key: String,
}

impl Hotkey {
    pub fn parse(input: &str) -> Result<Self, HotkeyError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(HotkeyError::Empty);
        }

        let (names, key) = if input.starts_with('<') {
            split_gtk(input)
        } else {
            split_accelerator(input)
        };

        let mut modifiers = names
            .iter()
            .map(|name| {
                HotkeyModifier::parse(name)
                    .ok_or_else(|| HotkeyError::UnknownModifier(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        modifiers.sort();
        modifiers.dedup();

        let key = key.trim();
        if key.is_empty() {
            return Err(HotkeyError::MissingKey(input.to_string()));
        }
        if modifiers.is_empty() {
            return Err(HotkeyError::MissingModifier(input.to_string()));
        }

        Ok(Self {
            modifiers,
            key: normalize_key(key),
        })
    }
}

impl FromStr for Hotkey {
    type Err = HotkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{}+", modifier.as_str())?;
        }
        f.write_str(&self.key)
    }
}

fn split_gtk(input: &str) -> (Vec<&str>, &str) {
    let mut names = Vec::new();
    let mut rest = input;
    while let Some(stripped) = rest.strip_prefix('<') {
        match stripped.find('>') {
            Some(end) => {
                names.push(&stripped[..end]);
                rest = &stripped[end + 1..];
            }
            None => break,
        }
    }
    (names, rest)
}

fn split_accelerator(input: &str) -> (Vec<&str>, &str) {
    // A trailing '+' means the key itself is plus: "Control++".
    if let Some(head) = input.strip_suffix("++") {
        return (head.split('+').collect(), "+");
    }
    let mut parts: Vec<&str> = input.split('+').map(str::trim).collect();
    let key = parts.pop().unwrap_or_default();
    (parts, key)
}

fn normalize_key(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if key.chars().count() == 1 => first.to_ascii_uppercase().to_string(),
        Some(first) => {
            let mut normalized = first.to_ascii_uppercase().to_string();
            normalized.push_str(&chars.as_str().to_ascii_lowercase());
            normalized
        }
        None => String::new(),
    }
}
