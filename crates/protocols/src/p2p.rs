//! The four stream protocols, client and server side.
//!
//! Client entry points return channel-backed streams so consumers apply
//! backpressure all the way down to the peer. Server handlers take one
//! accepted stream each and never fail outward: problems are logged and the
//! stream is dropped.

pub mod chunk;
pub mod manifest;
pub mod object;
pub mod replication;

mod pipeline;

use core::time::Duration;

use libp2p::PeerId;
use reposwarm_network_primitives::messages::ResponseStatus;

use crate::error::FetchError;
use crate::stream::StreamError;

/// How long a server keeps an idle, reusable stream open.
const IDLE_STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// Maps a non-`Ok` response status to the matching attempt failure.
fn status_error(status: ResponseStatus, peer_id: PeerId) -> Option<FetchError> {
    match status {
        ResponseStatus::Ok => None,
        ResponseStatus::NotFound => Some(FetchError::NotFound { peer_id }),
        ResponseStatus::Unauthorized => Some(FetchError::Unauthorized { peer_id }),
    }
}

fn stream_error(peer_id: PeerId) -> impl FnOnce(StreamError) -> FetchError {
    move |source| FetchError::Stream { peer_id, source }
}
