//! Error taxonomy shared by the codec, filter builder, fan-out engine and
//! tag linker.

use thiserror::Error;

use crate::pool::PublishOutcome;

/// Errors raised while resolving identifiers, linking tags or talking to relays.
#[derive(Error, Debug)]
pub enum Error {
    /// A pointer string could not be decoded.
    #[error("invalid identifier '{input}': {reason}")]
    InvalidIdentifier { input: String, reason: String },

    /// A decoded pointer carries a kind the caller cannot use.
    #[error("invalid kind {got}, expected {expected}")]
    KindMismatch { expected: u32, got: u32 },

    /// A discovery filter would match everything.
    #[error("no search criteria: give an identifier, configure str.id/str.publickey or set a hashtag")]
    NoCriteria,

    /// A single-result lookup found nothing before the deadline.
    #[error("couldn't find {0}")]
    NotFound(String),

    /// A fan-out was attempted with an empty relay set.
    #[error("no relays available, use -r/--relay or git config str.relays")]
    NoRelaysAvailable,

    /// A mention target is neither a profile pointer nor a hex public key.
    #[error("invalid mention '{0}'")]
    InvalidMention(String),

    /// A reply target is neither an event pointer nor a hex event id.
    #[error("invalid target thread '{0}'")]
    InvalidThread(String),

    /// Every relay rejected or failed to receive the message.
    #[error("failed to publish to any of {} relays", outcomes.len())]
    PublishFailure { outcomes: Vec<PublishOutcome> },

    /// A single relay failed. Caught inside fan-outs, never aborts them.
    #[error("relay {relay}: {reason}")]
    Relay { relay: String, reason: String },

    /// The secret key given to the signer is unusable.
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    /// Interactive input was aborted.
    #[error("input aborted: {0}")]
    Input(String),

    /// The local git binary failed.
    #[error("git: {0}")]
    Git(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(input: &str, reason: impl ToString) -> Self {
        Error::InvalidIdentifier {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn relay(relay: &str, reason: impl ToString) -> Self {
        Error::Relay {
            relay: relay.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
