//! Failures of outbound transfers.

use libp2p::PeerId;
use reposwarm_primitives::object::ObjectId;
use reposwarm_primitives::progress::ErrorKind;
use thiserror::Error;

use crate::access::OracleError;
use crate::stream::StreamError;

#[cfg(test)]
#[path = "tests/error.rs"]
mod tests;

/// Why a single transfer attempt or job failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// The peer does not have the object or repository.
    #[error("peer {peer_id} does not have the object")]
    NotFound {
        /// Peer that answered.
        peer_id: PeerId,
    },

    /// The peer refused to serve us.
    #[error("peer {peer_id} refused access")]
    Unauthorized {
        /// Peer that answered.
        peer_id: PeerId,
    },

    /// Fewer bytes or ids arrived than the peer announced.
    #[error("did not receive full object: expected {expected}, received {received}")]
    LengthMismatch {
        /// Announced amount.
        expected: u64,
        /// Received amount.
        received: u64,
    },

    /// The content does not hash to its identifier.
    #[error("content digest {actual} does not match the object id")]
    DigestMismatch {
        /// Digest of the received content.
        actual: ObjectId,
    },

    /// A stream to the peer could not be opened.
    #[error("failed to open stream to {peer_id}: {message}")]
    Dial {
        /// Peer we dialled.
        peer_id: PeerId,
        /// Transport error text.
        message: String,
    },

    /// The stream broke or carried garbage.
    #[error("stream to {peer_id} failed")]
    Stream {
        /// Peer on the other end.
        peer_id: PeerId,
        /// Underlying failure.
        #[source]
        source: StreamError,
    },

    /// The peer sent something outside the protocol.
    #[error("peer {peer_id} violated the protocol: {message}")]
    Protocol {
        /// Offending peer.
        peer_id: PeerId,
        /// What was wrong.
        message: String,
    },

    /// We could not sign the request.
    #[error("failed to sign request")]
    Signing(#[source] OracleError),

    /// The operation was cancelled or its consumer went away.
    #[error("cancelled")]
    Cancelled,

    /// Every attempt failed; `last` is the final cause.
    #[error("gave up after {attempts} attempts")]
    Exhausted {
        /// Attempts made.
        attempts: usize,
        /// Error of the final attempt.
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// The closed error kind reported to consumers and over the wire.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::LengthMismatch { .. } => ErrorKind::LengthMismatch,
            Self::DigestMismatch { .. } => ErrorKind::DigestMismatch,
            Self::Dial { .. } | Self::Stream { .. } | Self::Protocol { .. } | Self::Signing(_) => {
                ErrorKind::Transport
            }
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Exhausted { .. } => ErrorKind::Exhausted,
        }
    }

    /// Whether another peer might succeed where this attempt failed.
    ///
    /// Only meaningful while nothing of the object was handed out yet.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Unauthorized { .. }
                | Self::Dial { .. }
                | Self::Stream { .. }
                | Self::Protocol { .. }
        )
    }

    /// The innermost cause, looking through [`FetchError::Exhausted`].
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Exhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

/// A [`FetchError`] tied to the object it concerns.
#[derive(Debug, Error)]
#[error("failed to fetch {object_id}")]
pub struct ObjectFetchError {
    /// Object whose transfer failed.
    pub object_id: ObjectId,
    /// Why.
    #[source]
    pub source: FetchError,
}

impl ObjectFetchError {
    /// Shorthand for [`FetchError::kind`].
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}
