use libp2p::PeerId;
use tokio::sync::mpsc;

use super::*;

#[test]
fn offer_stops_at_the_limit() {
    let (sender, mut receiver) = mpsc::channel(8);
    let mut pending = PendingProviders::new(sender, 2);

    let peers: Vec<_> = (0..3).map(|_| PeerId::random()).collect();

    assert!(!pending.offer(peers.clone()), "limit reached, lookup should stop");
    assert_eq!(receiver.try_recv().ok(), Some(peers[0]), "first provider forwarded");
    assert_eq!(receiver.try_recv().ok(), Some(peers[1]), "second provider forwarded");
    assert!(receiver.try_recv().is_err(), "third provider held back");
}

#[test]
fn offer_skips_duplicates() {
    let (sender, mut receiver) = mpsc::channel(8);
    let mut pending = PendingProviders::new(sender, 5);

    let peer_id = PeerId::random();

    assert!(pending.offer([peer_id]), "lookup continues");
    assert!(pending.offer([peer_id]), "lookup continues");

    assert_eq!(receiver.try_recv().ok(), Some(peer_id), "forwarded once");
    assert!(receiver.try_recv().is_err(), "duplicate was dropped");
}

#[test]
fn offer_stops_when_consumer_leaves() {
    let (sender, receiver) = mpsc::channel(8);
    let mut pending = PendingProviders::new(sender, 5);

    drop(receiver);

    assert!(!pending.offer([PeerId::random()]), "nobody is listening");
}
