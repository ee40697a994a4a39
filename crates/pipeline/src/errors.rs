//! Error types shared across the dispatch domain.
//!
//! Each port trait in [`crate::ports`] reports failures through one of the
//! enums here. Infrastructure adapters translate transport-level failures
//! (HTTP status codes, provider error bodies) into these variants so the
//! orchestrator can branch on a typed category instead of inspecting messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Generative backend errors
// ---------------------------------------------------------------------------

/// Failure reported by a [`crate::ModelClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ModelError {
    /// The backend rejected the configured credentials.
    #[error("generative backend rejected the credentials: {message}")]
    Auth {
        /// Provider-supplied description.
        message: String,
    },

    /// The backend throttled the request.
    #[error("generative backend rate limit reached")]
    RateLimited {
        /// Seconds the provider asked us to wait, when it said.
        retry_after_secs: Option<u64>,
    },

    /// The account behind the credentials has exhausted its provider quota.
    #[error("generative backend quota exhausted: {message}")]
    QuotaExhausted {
        /// Provider-supplied description.
        message: String,
    },

    /// The backend is down, overloaded, or timed out.
    #[error("generative backend unavailable: {message}")]
    Unavailable {
        /// Provider-supplied or transport description.
        message: String,
    },

    /// The backend refused this particular request (bad media reference,
    /// malformed payload, safety block).
    #[error("generative backend rejected the request: {message}")]
    Rejected {
        /// Provider-supplied description.
        message: String,
    },

    /// The backend answered but produced no text.
    #[error("generative backend returned an empty response")]
    EmptyResponse,

    /// The exchange failed below the API layer: the body could not be sent
    /// or the answer could not be decoded.
    #[error("generative backend transport failure: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Persistence errors
// ---------------------------------------------------------------------------

/// Failure reported by [`crate::ExecutionStore`] or [`crate::AccountDirectory`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The datastore could not be reached.
    #[error("datastore unreachable: {0}")]
    Unreachable(String),

    /// The datastore answered with an error.
    #[error("datastore rejected the operation ({status}): {message}")]
    Rejected {
        /// HTTP-style status code reported by the datastore.
        status: u16,
        /// Datastore-supplied description.
        message: String,
    },

    /// A row came back in a shape the adapter could not decode.
    #[error("datastore returned an unexpected payload: {0}")]
    Decode(String),

    /// The referenced reservation does not exist or was already consumed.
    #[error("unknown or consumed quota reservation")]
    UnknownReservation,
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Failure reported by a [`crate::SessionResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No credentials accompanied the request.
    #[error("no session credentials supplied")]
    Missing,

    /// Credentials were supplied but did not resolve to a user.
    #[error("session credentials are invalid or expired")]
    Invalid,

    /// The identity provider could not be consulted.
    #[error("session resolver unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Content fetch errors
// ---------------------------------------------------------------------------

/// Failure reported by a [`crate::ContentFetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The URL was not an absolute http(s) URL.
    #[error("unsupported content URL: {0}")]
    UnsupportedUrl(String),

    /// The URL, or a redirect it led to, points at a non-public address.
    #[error("content URL points at a non-public host: {0}")]
    ForbiddenHost(String),

    /// The remote host answered with a non-success status.
    #[error("content source answered {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Transport failure or timeout.
    #[error("content fetch failed: {0}")]
    Transport(String),
}
