//! Error types produced by the router core.
//!
//! Three families exist: `ParseError` for malformed URL strings (fails the
//! `parse` call, never a navigation), `ConfigError` for invalid route tables
//! (raised when a configuration is installed), and `RouterError` for
//! everything surfaced by a running navigation.

use std::rc::Rc;

use thiserror::Error;

/// An implementation of the single-parameter Result pattern over `RouterError`.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Raised while parsing a URL string against the routable URL grammar.
///
/// Carries the unconsumed remainder of the input for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A fixed token was expected at the current position.
    #[error("expected \"{expected}\" before \"{rest}\"")]
    Expected {
        /// The token the parser required.
        expected: String,
        /// The unconsumed remainder of the input.
        rest: String,
    },

    /// A `;` followed a position where no path has been consumed.
    #[error("empty path url segment cannot have parameters, at \"{rest}\"")]
    EmptyPathWithParams {
        /// The unconsumed remainder of the input.
        rest: String,
    },

    /// A token inside parentheses was not followed by `/`, `)` or `;`.
    #[error("cannot parse url, at \"{rest}\"")]
    Malformed {
        /// The unconsumed remainder of the input.
        rest: String,
    },
}

/// Raised when an installed route configuration violates a structural
/// invariant. The full path of the offending route is always named.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid configuration of route '{path}': {reason}")]
pub struct ConfigError {
    /// Full path of the offending route, joined from the root.
    pub path: String,
    /// Human-readable description of the violated invariant.
    pub reason: String,
}

impl ConfigError {
    pub(crate) fn new(path: impl Into<String>, reason: impl Into<String>) -> ConfigError {
        ConfigError {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// An error surfaced by a navigation, or by one of the public URL helpers.
///
/// `Cancellation` is special: the scheduler converts it into a
/// `NavigationCancel` event and a `false` navigation outcome rather than an
/// error outcome.
#[derive(Clone, Debug, Error)]
pub enum RouterError {
    /// The raw URL string could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The route configuration is structurally invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No route in the configuration matched the URL.
    #[error("cannot match any routes. URL Segment: '{segments}'")]
    NoMatch {
        /// Serialized form of the segment group that failed to match.
        segments: String,
    },

    /// Two sibling snapshots resolved to the same outlet name.
    #[error("two segments cannot have the same outlet name: '{outlet}'")]
    DuplicateOutlet {
        /// The outlet name both snapshots claimed.
        outlet: String,
    },

    /// A navigation command list was malformed.
    #[error("invalid navigation commands: {0}")]
    InvalidCommands(String),

    /// The navigation was cancelled: a guard returned a veto, a lazy load
    /// was refused, or a newer navigation superseded this one.
    #[error("navigation cancelled: {reason}")]
    Cancellation {
        /// Why the navigation was abandoned.
        reason: String,
    },

    /// A guard, resolver, hook or loader failed at runtime.
    #[error("navigation failed: {0}")]
    Runtime(Rc<anyhow::Error>),
}

impl RouterError {
    pub(crate) fn cancellation(reason: impl Into<String>) -> RouterError {
        RouterError::Cancellation {
            reason: reason.into(),
        }
    }

    pub(crate) fn runtime(err: anyhow::Error) -> RouterError {
        RouterError::Runtime(Rc::new(err))
    }

    /// True for the tagged cancellation kind (converted by the scheduler
    /// into a `NavigationCancel` event instead of a navigation error).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RouterError::Cancellation { .. })
    }
}
