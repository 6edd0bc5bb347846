use libp2p::PeerId;

use super::*;

fn not_found() -> FetchError {
    FetchError::NotFound {
        peer_id: PeerId::random(),
    }
}

#[test]
fn kinds_collapse_transport_failures() {
    let peer_id = PeerId::random();

    assert_eq!(not_found().kind(), ErrorKind::NotFound, "not found");
    assert_eq!(
        FetchError::Dial {
            peer_id,
            message: "refused".to_owned(),
        }
        .kind(),
        ErrorKind::Transport,
        "dial"
    );
    assert_eq!(
        FetchError::Protocol {
            peer_id,
            message: "bad header".to_owned(),
        }
        .kind(),
        ErrorKind::Transport,
        "protocol violation"
    );
    assert_eq!(
        FetchError::LengthMismatch {
            expected: 4,
            received: 2,
        }
        .kind(),
        ErrorKind::LengthMismatch,
        "integrity"
    );
    assert_eq!(FetchError::Cancelled.kind(), ErrorKind::Cancelled, "cancelled is its own kind");
}

#[test]
fn only_peer_specific_failures_are_retried() {
    assert!(not_found().is_retryable(), "another peer may have it");
    assert!(
        !FetchError::LengthMismatch {
            expected: 4,
            received: 2,
        }
        .is_retryable(),
        "partial data was already handed out"
    );
    assert!(!FetchError::Cancelled.is_retryable(), "cancellation is final");
}

#[test]
fn exhausted_exposes_the_last_cause() {
    let error = FetchError::Exhausted {
        attempts: 3,
        last: Box::new(not_found()),
    };

    assert_eq!(error.kind(), ErrorKind::Exhausted, "outer kind");
    assert_eq!(error.root().kind(), ErrorKind::NotFound, "inner kind");
    assert!(!error.is_retryable(), "retries are used up");
    assert_eq!(error.to_string(), "gave up after 3 attempts", "message");
}
