use claims::assert_matches;
use libp2p::PeerId;

use super::*;

fn job() -> Job {
    Job::new(ObjectId::chunk_of(b"object"))
}

#[test]
fn new_job_knows_nothing_yet() {
    let job = job();

    assert_eq!(job.declared_size, None, "no provider announced a length");
    assert!(!job.emitted, "nothing reached the consumer");
    assert!(!job.excludes(&PeerId::random()), "every peer is eligible");
}

#[test]
fn failed_peer_is_excluded() {
    let peer_id = PeerId::random();
    let mut job = job();

    let _ = job.failed_peers.insert(peer_id);

    assert!(job.excludes(&peer_id), "failed peer is skipped");
    assert!(!job.excludes(&PeerId::random()), "other peers stay eligible");
}

#[test]
fn exhausted_job_reports_its_last_error() {
    let peer_id = PeerId::random();
    let mut job = job();
    job.attempts = 2;
    job.last_error = Some(FetchError::NotFound { peer_id });

    let object_id = job.object_id;
    let err = job.exhausted();

    assert_eq!(err.object_id, object_id, "error names the object");
    assert_matches!(err.source, FetchError::Exhausted { attempts: 2, .. });
    assert_matches!(err.source.root(), FetchError::NotFound { .. });
}

#[test]
fn job_that_never_ran_is_cancelled() {
    let err = job().exhausted();

    assert_matches!(err.source, FetchError::Cancelled);
}
