use thiserror::Error;

/// Errors reported back to whoever feeds the aggregator or the command path.
///
/// None of these leave partial state behind: a rejected batch writes nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("batch does not cover the channel set: expected {expected} channels, got {actual}")]
    InvalidChannelSet { expected: usize, actual: usize },

    #[error("payload of {len} bytes is not a whole number of {width}-byte frames")]
    MalformedPayload { len: usize, width: usize },

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}
