//! Flow Errors
//!
//! Error type for the control-flow engine.

use thiserror::Error;

use crate::directive::DirectiveKind;
use crate::tree::{SelectorError, TreeError};

/// Errors from initializing or updating control flow.
///
/// State for a selector is only touched after its payload has been resolved
/// and validated, so an error never leaves a half-applied patch behind.
#[derive(Debug, Error)]
pub enum FlowError {
    /// An update ran before initialization created state for the selector.
    #[error("{kind} directive for selector `{selector}` has not yet been initialized")]
    NotInitialized {
        kind: DirectiveKind,
        selector: String,
    },

    /// A repetition payload was not an array.
    #[error("unsupported payload type for repetition `{selector}`: expected array, found {found}")]
    InvalidPayloadType {
        selector: String,
        found: &'static str,
    },

    /// A projection action returned something other than a boolean or a
    /// selector string.
    #[error("unsupported payload type for projection `{selector}`: found {found}")]
    UnsupportedPayloadType {
        selector: String,
        found: &'static str,
    },

    /// No directive of this kind is declared for the selector.
    #[error("no {kind} directive is declared for selector `{selector}`")]
    UnknownDirective {
        kind: DirectiveKind,
        selector: String,
    },

    /// A projection payload string is not a valid selector.
    #[error("invalid selector: {0}")]
    Selector(#[from] SelectorError),

    /// A primitive tree operation failed.
    #[error("tree operation failed: {0}")]
    Tree(#[from] TreeError),
}

/// Result alias for flow operations.
pub type FlowResult<T> = Result<T, FlowError>;
