//! Chunk streams applied to a store, then looked up.

use std::collections::VecDeque;
use std::sync::Mutex;

use gsb_core::chunk::{encode_chunk, parse_chunk_stream, Chunk, ChunkEntry, PrefixEntry};
use gsb_core::clock::ManualClock;
use gsb_core::hash::sha256;
use gsb_core::{
    ChunkKind, ClientConfig, Error, FailPolicy, HostKey, Matcher, MemoryStore, Request, Response, Storage, Transport,
    TransportError, Verdict,
};

const LIST: &str = "goog-malware-shavar";
const LISTED: &str = "evil.example.com/malware.html";

#[derive(Default)]
struct FullHashService {
    responses: Mutex<VecDeque<Response>>,
    requests: Mutex<Vec<Vec<u8>>>,
}

impl FullHashService {
    fn respond(&self, status: u16, body: Vec<u8>) {
        self.responses.lock().unwrap().push_back(Response::new(status, body));
    }

    fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for FullHashService {
    fn send(&self, request: &Request<'_>) -> Result<Response, TransportError> {
        let Request::FullHash { body } = request else {
            return Err(TransportError::Other(format!("unexpected {} request", request.name())));
        };
        self.requests.lock().unwrap().push(body.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Connection("no scripted response".to_string()))
    }
}

fn host_key(expr: &str) -> HostKey {
    HostKey::from_slice(&sha256(expr.as_bytes())[..4]).unwrap()
}

fn prefix(expr: &str) -> Vec<u8> {
    sha256(expr.as_bytes())[..4].to_vec()
}

fn chunk(kind: ChunkKind, number: u32, entries: Vec<ChunkEntry>) -> Chunk {
    Chunk {
        list: LIST.to_string(),
        kind,
        number,
        hash_len: 4,
        byte_length: 0,
        entries,
    }
}

/// Encode chunks to a stream, decode it again and commit the result.
fn apply(store: &MemoryStore, chunks: &[Chunk]) {
    let stream: Vec<u8> = chunks.iter().flat_map(|c| encode_chunk(c).unwrap()).collect();
    store.start_transaction().unwrap();
    for chunk in parse_chunk_stream(LIST, &stream).unwrap() {
        store.save_chunk(&chunk).unwrap();
    }
    store.commit().unwrap();
}

fn listed_chunk() -> Chunk {
    chunk(
        ChunkKind::Add,
        11,
        vec![ChunkEntry::with_prefixes(
            host_key("evil.example.com/"),
            vec![PrefixEntry::add(prefix(LISTED))],
        )],
    )
}

fn full_hash_response(add_chunk: u32, exprs: &[&str]) -> Vec<u8> {
    let mut body = format!("{LIST}:{add_chunk}:{}\n", exprs.len() * 32).into_bytes();
    for expr in exprs {
        body.extend_from_slice(&sha256(expr.as_bytes()));
    }
    body
}

fn config() -> ClientConfig {
    ClientConfig {
        lists: vec![LIST.to_string()],
        ..Default::default()
    }
}

#[test]
fn test_listed_url_confirmed_then_cached() {
    let store = MemoryStore::new();
    apply(&store, &[listed_chunk()]);
    let service = FullHashService::default();
    service.respond(200, full_hash_response(11, &[LISTED]));
    let config = config();
    let clock = ManualClock::new(1_000);
    let matcher = Matcher::new(&store, &service, &config).with_clock(&clock);

    let verdict = matcher.lookup("http://EVIL.example.com/./malware.html#frag").unwrap();
    match verdict {
        Verdict::Listed(hit) => {
            assert_eq!(hit.list, LIST);
            assert_eq!(hit.add_chunk, 11);
            assert_eq!(hit.full_hash, sha256(LISTED.as_bytes()));
        }
        Verdict::NotListed => panic!("expected a listing"),
    }

    let mut expected_request = b"4:4\n".to_vec();
    expected_request.extend_from_slice(&prefix(LISTED));
    assert_eq!(service.requests(), vec![expected_request]);

    // answered from the full-hash cache
    clock.advance(60);
    assert!(matcher.lookup("http://evil.example.com/malware.html").unwrap().is_listed());
    assert_eq!(service.requests().len(), 1);
}

#[test]
fn test_prefix_collision_not_listed() {
    let store = MemoryStore::new();
    apply(&store, &[listed_chunk()]);
    let service = FullHashService::default();
    // same prefix, different full hash
    service.respond(200, full_hash_response(11, &["evil.example.com/other.html"]));
    let config = config();
    let matcher = Matcher::new(&store, &service, &config);

    assert_eq!(matcher.lookup("http://evil.example.com/malware.html").unwrap(), Verdict::NotListed);
}

#[test]
fn test_unrelated_url_needs_no_remote_call() {
    let store = MemoryStore::new();
    apply(&store, &[listed_chunk()]);
    let service = FullHashService::default();
    let config = config();
    let matcher = Matcher::new(&store, &service, &config);

    assert_eq!(matcher.lookup("http://evil.example.com/index.html").unwrap(), Verdict::NotListed);
    assert_eq!(matcher.lookup("http://good.example.org/malware.html").unwrap(), Verdict::NotListed);
    assert!(service.requests().is_empty());
}

#[test]
fn test_uncommitted_chunks_invisible() {
    let store = MemoryStore::new();
    let service = FullHashService::default();
    let config = config();
    let matcher = Matcher::new(&store, &service, &config);

    store.start_transaction().unwrap();
    store.save_chunk(&listed_chunk()).unwrap();
    assert_eq!(matcher.lookup("http://evil.example.com/malware.html").unwrap(), Verdict::NotListed);
    store.rollback().unwrap();
    assert!(service.requests().is_empty());
}

#[test]
fn test_sub_chunk_cancels_listing() {
    let store = MemoryStore::new();
    apply(
        &store,
        &[
            listed_chunk(),
            chunk(
                ChunkKind::Sub,
                3,
                vec![ChunkEntry::with_prefixes(
                    host_key("evil.example.com/"),
                    vec![PrefixEntry::sub(11, prefix(LISTED))],
                )],
            ),
        ],
    );
    let service = FullHashService::default();
    let config = config();
    let matcher = Matcher::new(&store, &service, &config);

    assert_eq!(matcher.lookup("http://evil.example.com/malware.html").unwrap(), Verdict::NotListed);
    assert!(service.requests().is_empty());
}

#[test]
fn test_unreachable_service_follows_fail_policy() {
    let store = MemoryStore::new();
    apply(&store, &[listed_chunk()]);
    let service = FullHashService::default();
    let config = config();
    let clock = ManualClock::new(5_000);
    let matcher = Matcher::new(&store, &service, &config).with_clock(&clock);

    let err = matcher.lookup("http://evil.example.com/malware.html").unwrap_err();
    assert!(err.is_indeterminate(), "{err}");

    // backed off now; no further request goes out
    assert!(!matcher.is_listed("http://evil.example.com/malware.html", FailPolicy::Open).unwrap());
    assert!(matcher.is_listed("http://evil.example.com/malware.html", FailPolicy::Closed).unwrap());
    assert_eq!(service.requests().len(), 1);
    assert_eq!(store.get_config("BackoffCount_lookup").unwrap().as_deref(), Some("1"));

    match matcher.lookup("http://evil.example.com/malware.html").unwrap_err() {
        Error::Indeterminate(inner) => assert!(matches!(*inner, Error::Backoff { remaining: 60 })),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_lookup_backoff_survives_update_rollback() {
    let store = MemoryStore::new();
    apply(&store, &[listed_chunk()]);
    let service = FullHashService::default();
    let config = config();
    let clock = ManualClock::new(5_000);
    let matcher = Matcher::new(&store, &service, &config).with_clock(&clock);

    store.start_transaction().unwrap();
    assert!(matcher.lookup("http://evil.example.com/malware.html").unwrap_err().is_indeterminate());
    store.rollback().unwrap();

    assert_eq!(store.get_config("BackoffCount_lookup").unwrap().as_deref(), Some("1"));
    assert_eq!(store.get_config("Timeout_lookup").unwrap().as_deref(), Some("5060"));
}
