use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How the server renders log events on stderr.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, fields flattened to the top level.
    #[default]
    Json,
    /// Terse single-line text for terminals.
    Compact,
}

/// Returned when `--log-format` or `KINDLING_LOG_FORMAT` names no format.
pub type LogFormatParseError = strum::ParseError;
