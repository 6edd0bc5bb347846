//! Tests for the chunk fetch pipeline and the chunk server

mod common;

use core::time::Duration;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::mocks::{MockNetwork, MockOracle};
use common::{collect, test_config, test_repo_id, TestNode, TEST_TIMEOUT};
use futures_util::StreamExt;
use libp2p::PeerId;
use reposwarm_network_primitives::messages::{
    GetChunkRequest, GetChunkResponseHeader, GetChunkResponsePacket, ResponseStatus,
};
use reposwarm_network_primitives::stream::CHUNK_PACKET_SIZE;
use reposwarm_primitives::object::ObjectId;
use reposwarm_primitives::progress::ErrorKind;
use reposwarm_primitives::repo::ContentId;
use reposwarm_protocols::p2p::chunk::{fetch_chunks, MaybeChunk};
use reposwarm_protocols::stream::{expect, send};
use reposwarm_protocols::FetchError;
use reposwarm_store::ObjectStore;
use tokio::time::{sleep, timeout, Instant};

/// Split results into bytes received and terminal outcomes per object
fn tally(items: Vec<MaybeChunk>) -> (HashMap<ObjectId, usize>, HashMap<ObjectId, Vec<Result<(), ErrorKind>>>) {
    let mut bytes = HashMap::new();
    let mut terminals: HashMap<ObjectId, Vec<_>> = HashMap::new();

    for item in items {
        match item {
            Ok(chunk) if chunk.end => terminals.entry(chunk.object_id).or_default().push(Ok(())),
            Ok(chunk) => *bytes.entry(chunk.object_id).or_default() += chunk.data.len(),
            Err(err) => terminals
                .entry(err.object_id)
                .or_default()
                .push(Err(err.kind())),
        }
    }

    (bytes, terminals)
}

/// A provider that answers every request with `header` and `packets`
fn scripted_provider(
    network: &MockNetwork,
    header: GetChunkResponseHeader,
    packets: Vec<GetChunkResponsePacket>,
) -> PeerId {
    let peer_id = PeerId::random();

    network.add_peer(
        peer_id,
        Arc::new(move |_, _, mut stream| {
            let packets = packets.clone();

            Box::pin(async move {
                while let Ok(_request) =
                    expect::<GetChunkRequest>(&mut stream, Duration::from_secs(5)).await
                {
                    send(&mut stream, &header).await.unwrap();

                    for packet in &packets {
                        send(&mut stream, packet).await.unwrap();
                    }
                }
            })
        }),
    );

    network.provide(ContentId::for_repo(&test_repo_id()), peer_id);

    peer_id
}

/// A peer holding `objects`, answering each request after `delay`
///
/// Not announced; tests list it as a provider as often as they need.
fn holding_peer(network: &MockNetwork, objects: Vec<Vec<u8>>, delay: Duration) -> PeerId {
    let peer_id = PeerId::random();
    let objects: Arc<HashMap<Vec<u8>, Vec<u8>>> = Arc::new(
        objects
            .into_iter()
            .map(|data| (ObjectId::chunk_of(&data).to_vec(), data))
            .collect(),
    );

    network.add_peer(
        peer_id,
        Arc::new(move |_, _, mut stream| {
            let objects = Arc::clone(&objects);

            Box::pin(async move {
                while let Ok(request) =
                    expect::<GetChunkRequest>(&mut stream, Duration::from_secs(5)).await
                {
                    sleep(delay).await;

                    let Some(data) = objects.get(&request.chunk_id) else {
                        let header = GetChunkResponseHeader {
                            status: ResponseStatus::NotFound,
                            length: 0,
                        };
                        send(&mut stream, &header).await.unwrap();
                        continue;
                    };

                    let header = GetChunkResponseHeader {
                        status: ResponseStatus::Ok,
                        length: data.len() as u64,
                    };
                    send(&mut stream, &header).await.unwrap();

                    for packet in [
                        GetChunkResponsePacket {
                            data: data.clone(),
                            end: false,
                        },
                        GetChunkResponsePacket {
                            data: Vec::new(),
                            end: true,
                        },
                    ] {
                        send(&mut stream, &packet).await.unwrap();
                    }
                }
            })
        }),
    );

    peer_id
}

#[tokio::test]
async fn fetches_every_object_in_full() {
    let network = MockNetwork::new();
    let repo_id = test_repo_id();

    let provider = TestNode::new(&network, "provider");
    let repo = provider.create_repo(&repo_id).await;
    provider.serve(&network);
    provider.provide_repo(&network, &repo_id);

    let contents = [
        vec![1_u8; 10],
        vec![2_u8; CHUNK_PACKET_SIZE * 2 + 17],
        b"a small text file\n".to_vec(),
    ];

    let mut expected = HashMap::new();

    for content in &contents {
        let id = ObjectId::chunk_of(content);
        repo.put_chunk(&id, content).await.unwrap();
        let _ = expected.insert(id, content.len());
    }

    let config = test_config().with_max_concurrent_peers(1);
    let fetcher = TestNode::with_config(&network, "fetcher", config);

    let items = collect(fetch_chunks(
        &fetcher.client,
        &fetcher.token,
        repo_id,
        expected.keys().copied().collect(),
    ))
    .await;

    let (bytes, terminals) = tally(items);

    assert_eq!(bytes, expected, "byte count per object matches its length");

    for id in expected.keys() {
        assert_eq!(terminals[id], vec![Ok(())], "exactly one end marker per object");
    }

    assert_eq!(
        network.dials_to(provider.peer_id),
        1,
        "all requests share one connection"
    );
}

#[tokio::test]
async fn short_stream_is_length_mismatch() {
    let network = MockNetwork::new();
    let _provider = scripted_provider(
        &network,
        GetChunkResponseHeader {
            status: ResponseStatus::Ok,
            length: 100,
        },
        vec![
            GetChunkResponsePacket {
                data: vec![7; 40],
                end: false,
            },
            GetChunkResponsePacket {
                data: Vec::new(),
                end: true,
            },
        ],
    );

    let fetcher = TestNode::new(&network, "fetcher");
    let id = ObjectId::chunk_of(&[7; 100]);

    let items = collect(fetch_chunks(
        &fetcher.client,
        &fetcher.token,
        test_repo_id(),
        vec![id],
    ))
    .await;

    let (bytes, terminals) = tally(items);

    assert_eq!(bytes.get(&id), Some(&40), "the partial data was passed on");
    assert_eq!(
        terminals[&id],
        vec![Err(ErrorKind::LengthMismatch)],
        "short object never ends successfully"
    );
}

#[tokio::test]
async fn digest_mismatch_is_reported() {
    let network = MockNetwork::new();
    let _provider = scripted_provider(
        &network,
        GetChunkResponseHeader {
            status: ResponseStatus::Ok,
            length: 5,
        },
        vec![
            GetChunkResponsePacket {
                data: b"wrong".to_vec(),
                end: false,
            },
            GetChunkResponsePacket {
                data: Vec::new(),
                end: true,
            },
        ],
    );

    let fetcher = TestNode::new(&network, "fetcher");
    let id = ObjectId::chunk_of(b"right");

    let items = collect(fetch_chunks(
        &fetcher.client,
        &fetcher.token,
        test_repo_id(),
        vec![id],
    ))
    .await;

    let (_, terminals) = tally(items);

    assert_eq!(
        terminals[&id],
        vec![Err(ErrorKind::DigestMismatch)],
        "content must hash to its id"
    );
}

#[tokio::test]
async fn not_found_is_retried_on_another_peer() {
    let network = MockNetwork::new();
    let repo_id = test_repo_id();
    let content = b"only on the second peer".to_vec();
    let id = ObjectId::chunk_of(&content);

    let empty = TestNode::new(&network, "empty");
    empty.serve(&network);
    empty.provide_repo(&network, &repo_id);

    let holder = TestNode::new(&network, "holder");
    let repo = holder.create_repo(&repo_id).await;
    repo.put_chunk(&id, &content).await.unwrap();
    holder.serve(&network);
    holder.provide_repo(&network, &repo_id);

    let config = test_config().with_max_concurrent_peers(1);
    let fetcher = TestNode::with_config(&network, "fetcher", config);

    let items = collect(fetch_chunks(&fetcher.client, &fetcher.token, repo_id, vec![id])).await;

    let (bytes, terminals) = tally(items);

    assert_eq!(bytes.get(&id), Some(&content.len()), "content came from the holder");
    assert_eq!(terminals[&id], vec![Ok(())], "one successful end");
    assert_eq!(network.dials_to(empty.peer_id), 1, "the empty peer was asked once");
}

#[tokio::test]
async fn slow_peer_does_not_hold_up_retries() {
    const SLOW: Duration = Duration::from_secs(2);

    let network = MockNetwork::new();
    let key = ContentId::for_repo(&test_repo_id());

    let slow_content = b"only the slow peer has this".to_vec();
    let fast_content = b"only the fast peer has this".to_vec();
    let slow_id = ObjectId::chunk_of(&slow_content);
    let fast_id = ObjectId::chunk_of(&fast_content);

    let empty = holding_peer(&network, Vec::new(), Duration::ZERO);
    let slow = holding_peer(&network, vec![slow_content], SLOW);
    let fast = holding_peer(&network, vec![fast_content], Duration::ZERO);

    // The empty peer shows up twice, so a second connection to it is drawn
    // while the slow transfer is still running.
    for peer_id in [empty, slow, empty, fast] {
        network.provide(key, peer_id);
    }

    let config = test_config().with_max_concurrent_peers(4);
    let fetcher = TestNode::with_config(&network, "fetcher", config);

    let started = Instant::now();
    let mut chunks = fetch_chunks(
        &fetcher.client,
        &fetcher.token,
        test_repo_id(),
        vec![fast_id, slow_id],
    );

    let mut finished = HashMap::new();

    while let Some(item) = timeout(TEST_TIMEOUT, chunks.next())
        .await
        .expect("transfer did not finish in time")
    {
        let chunk = item.expect("both objects have a holder");

        if chunk.end {
            let _ = finished.insert(chunk.object_id, started.elapsed());
        }
    }

    assert!(
        finished[&fast_id] < SLOW / 2,
        "the fast object must not wait for the slow peer"
    );
    assert!(
        finished[&slow_id] >= SLOW,
        "the slow object came from the slow peer"
    );
}

#[tokio::test]
async fn waits_for_a_provider_that_shows_up_later() {
    let network = MockNetwork::new();
    let repo_id = test_repo_id();
    let content = b"announced late".to_vec();
    let id = ObjectId::chunk_of(&content);

    let empty = TestNode::new(&network, "empty");
    empty.serve(&network);
    empty.provide_repo(&network, &repo_id);

    let holder = TestNode::new(&network, "holder");
    let repo = holder.create_repo(&repo_id).await;
    repo.put_chunk(&id, &content).await.unwrap();
    holder.serve(&network);

    let config = test_config()
        .with_max_concurrent_peers(3)
        .with_dial_backoff(Duration::from_millis(100));
    let fetcher = TestNode::with_config(&network, "fetcher", config);

    let chunks = fetch_chunks(&fetcher.client, &fetcher.token, repo_id.clone(), vec![id]);

    sleep(Duration::from_millis(200)).await;
    holder.provide_repo(&network, &repo_id);

    let (bytes, terminals) = tally(collect(chunks).await);

    assert_eq!(bytes.get(&id), Some(&content.len()), "content came from the late holder");
    assert_eq!(terminals[&id], vec![Ok(())], "one successful end");
    assert!(
        network.dials_to(empty.peer_id) >= 2,
        "the empty peer was replaced while waiting"
    );
}

#[tokio::test]
async fn unauthorized_everywhere_is_exhausted() {
    let network = MockNetwork::new();
    let repo_id = test_repo_id();
    let content = b"private".to_vec();
    let id = ObjectId::chunk_of(&content);

    let provider = TestNode::with_oracle(&network, MockOracle::denying("provider"), test_config());
    let repo = provider.create_repo(&repo_id).await;
    repo.put_chunk(&id, &content).await.unwrap();
    provider.serve(&network);
    provider.provide_repo(&network, &repo_id);

    let config = test_config().with_max_concurrent_peers(1);
    let fetcher = TestNode::with_config(&network, "fetcher", config);

    let mut items = collect(fetch_chunks(&fetcher.client, &fetcher.token, repo_id, vec![id])).await;

    assert_eq!(items.len(), 1, "a single terminal error");

    let err = items.pop().unwrap().unwrap_err();

    assert_eq!(err.object_id, id, "error names the object");
    assert_eq!(err.kind(), ErrorKind::Exhausted, "no other peer could serve it");
    assert!(
        matches!(err.source.root(), FetchError::Unauthorized { .. }),
        "last cause is kept"
    );
}

#[tokio::test]
async fn cancelled_fetch_ends_every_object() {
    let network = MockNetwork::new();
    let repo_id = test_repo_id();

    let unreachable = PeerId::random();
    network.set_unreachable(unreachable);
    network.provide(ContentId::for_repo(&repo_id), unreachable);

    let fetcher = TestNode::new(&network, "fetcher");

    let ids: Vec<_> = [&b"one"[..], &b"two"[..], &b"three"[..]]
        .into_iter()
        .map(ObjectId::chunk_of)
        .collect();

    let chunks = fetch_chunks(&fetcher.client, &fetcher.token, repo_id, ids.clone());

    let cancel = fetcher.token.clone();
    drop(tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    }));

    let items = collect(chunks).await;

    assert_eq!(items.len(), ids.len(), "one terminal per object, then close");

    let cancelled: HashSet<_> = items
        .into_iter()
        .map(|item| {
            let err = item.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Cancelled, "cancellation is not a transport error");
            err.object_id
        })
        .collect();

    assert_eq!(cancelled, ids.into_iter().collect(), "every object is accounted for");
    assert!(network.dials_to(unreachable) >= 1, "no local short-circuit: the network was tried");
}

#[tokio::test]
async fn empty_request_closes_immediately() {
    let network = MockNetwork::new();
    let fetcher = TestNode::new(&network, "fetcher");

    let items = collect(fetch_chunks(
        &fetcher.client,
        &fetcher.token,
        test_repo_id(),
        Vec::new(),
    ))
    .await;

    assert!(items.is_empty(), "nothing requested, nothing emitted");
    assert_eq!(network.lookups(), 0, "no discovery for an empty request");
}
