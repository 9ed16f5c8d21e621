//! Command definitions: what to send, how to recognize the answer, where it lands.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a validated response is turned into controller bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    /// Decimal number with optional unit suffix, written as a big-endian f32.
    NumericScalar,
    /// Space separated decimal bytes, written as-is.
    ByteList,
    /// Recognized but never written.
    Unsupported,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::NumericScalar => "numeric-scalar",
            CommandKind::ByteList => "byte-list",
            CommandKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command entry as it appears in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Text sent verbatim, terminator included (e.g. `"RT\r"`).
    pub send: String,

    /// Regex the response must match (unanchored).
    pub pattern: String,

    /// Byte offset added to the device start address.
    pub offset: u32,

    /// Encoding applied to the response.
    pub kind: CommandKind,
}

/// One compiled command.
///
/// Immutable after construction; shared between the poller and the
/// matcher as `Arc<CommandSpec>`.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    send_text: String,
    pattern: Regex,
    offset: u32,
    kind: CommandKind,
}

impl CommandSpec {
    pub fn new(
        send_text: impl Into<String>,
        pattern: &str,
        offset: u32,
        kind: CommandKind,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            send_text: send_text.into(),
            pattern: Regex::new(pattern)?,
            offset,
            kind,
        })
    }

    pub fn send_text(&self) -> &str {
        &self.send_text
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// True when the response is a valid answer to this command.
    pub fn accepts(&self, response: &str) -> bool {
        self.pattern.is_match(response)
    }
}

impl TryFrom<&CommandConfig> for CommandSpec {
    type Error = regex::Error;

    fn try_from(config: &CommandConfig) -> Result<Self, Self::Error> {
        Self::new(
            config.send.clone(),
            &config.pattern,
            config.offset,
            config.kind,
        )
    }
}

impl PartialEq for CommandSpec {
    fn eq(&self, other: &Self) -> bool {
        self.send_text == other.send_text
            && self.pattern.as_str() == other.pattern.as_str()
            && self.offset == other.offset
            && self.kind == other.kind
    }
}

impl Eq for CommandSpec {}
