mod common;

use memtls_client::ClientError;
use memtls_common::{CasResponse, StatusCode, WireProtocol};
use memtls_server::ServerConfig;

use common::{plain_client, spawn_node};

fn binary_client() -> memtls_client::CacheClient {
    plain_client(spawn_node(ServerConfig::default()), WireProtocol::Binary)
}

fn text_client() -> memtls_client::CacheClient {
    plain_client(spawn_node(ServerConfig::default()), WireProtocol::Text)
}

#[test]
fn append_requires_matching_cas() {
    let client = binary_client();
    assert!(client.set(b"k", 0, 0, b"test").unwrap().is_success());
    let stored = client.gets(b"k").unwrap().expect("stored value");

    let wrong = client.append(stored.cas + 1, b"k", b"x").unwrap();
    assert!(!wrong.is_success());
    assert_eq!(client.get(b"k").unwrap().unwrap().as_ref(), b"test");

    let right = client.append(stored.cas, b"k", b"x").unwrap();
    assert!(right.is_success());
    assert_eq!(client.get(b"k").unwrap().unwrap().as_ref(), b"testx");
}

#[test]
fn prepend_joins_in_front() {
    let client = binary_client();
    client.set(b"p", 0, 0, b"tail").unwrap();
    assert!(client.prepend(0, b"p", b"head-").unwrap().is_success());
    assert_eq!(client.get(b"p").unwrap().unwrap().as_ref(), b"head-tail");
}

#[test]
fn add_on_existing_key_reports_exists() {
    let client = binary_client();
    client.set(b"a", 0, 0, b"first").unwrap();
    let status = client.add(b"a", 0, 0, b"second").unwrap();
    assert!(!status.is_success());
    assert_eq!(status.code(), StatusCode::ErrExists);
    assert_eq!(client.get(b"a").unwrap().unwrap().as_ref(), b"first");
}

#[test]
fn oversized_set_reports_too_big() {
    let node = spawn_node(ServerConfig {
        max_item_size: 1024,
        ..ServerConfig::default()
    });
    let client = plain_client(node, WireProtocol::Binary);
    let status = client.set(b"big", 0, 0, &vec![b'x'; 1025]).unwrap();
    assert!(!status.is_success());
    assert_eq!(status.code(), StatusCode::Err2Big);
    assert!(client.get(b"big").unwrap().is_none());
}

#[test]
fn delete_honours_cas() {
    let client = binary_client();
    client.set(b"d", 0, 0, b"v").unwrap();
    let cas = client.gets(b"d").unwrap().unwrap().cas;

    assert!(!client.delete(b"d", cas + 1).unwrap().is_success());
    assert!(client.get(b"d").unwrap().is_some());

    assert!(client.delete(b"d", cas).unwrap().is_success());
    assert!(client.get(b"d").unwrap().is_none());
    assert_eq!(
        client.delete(b"d", 0).unwrap().code(),
        StatusCode::ErrNotFound
    );
}

#[test]
fn counter_is_created_at_initial_value() {
    let client = binary_client();
    assert_eq!(client.incr(b"n", 5, Some(10), 0).unwrap(), Some(10));
    assert_eq!(client.incr(b"n", 5, Some(10), 0).unwrap(), Some(15));
    assert_eq!(client.decr(b"n", 20, None, 0).unwrap(), Some(0));
    assert_eq!(client.incr(b"missing", 1, None, 0).unwrap(), None);
}

#[test]
fn compare_and_swap_outcomes() {
    let client = binary_client();
    client.set(b"c", 0, 0, b"one").unwrap();
    let cas = client.gets(b"c").unwrap().unwrap().cas;

    assert_eq!(client.cas(b"c", cas + 7, 0, 0, b"two").unwrap(), CasResponse::Exists);
    assert_eq!(client.cas(b"c", cas, 0, 0, b"two").unwrap(), CasResponse::Ok);
    assert_eq!(client.get(b"c").unwrap().unwrap().as_ref(), b"two");
    assert_eq!(client.cas(b"gone", 1, 0, 0, b"x").unwrap(), CasResponse::NotFound);
}

#[test]
fn replace_needs_existing_key() {
    let client = binary_client();
    assert!(!client.replace(b"r", 0, 0, b"v").unwrap().is_success());
    client.set(b"r", 0, 0, b"v").unwrap();
    assert!(client.replace(b"r", 0, 0, b"w").unwrap().is_success());
}

#[test]
fn version_and_noop() {
    let client = binary_client();
    assert_eq!(client.version().unwrap(), env!("CARGO_PKG_VERSION"));
    assert!(client.noop().unwrap().is_success());
}

#[test]
fn text_store_and_fetch() {
    let client = text_client();
    assert!(client.set(b"t", 3, 0, b"hello").unwrap().is_success());
    let fetched = client.gets(b"t").unwrap().unwrap();
    assert_eq!(fetched.value.as_ref(), b"hello");
    assert!(fetched.cas > 0);
    assert!(client.append(0, b"t", b"!").unwrap().is_success());
    assert_eq!(client.get(b"t").unwrap().unwrap().as_ref(), b"hello!");
    assert!(client.get(b"nope").unwrap().is_none());
}

#[test]
fn text_add_existing_is_not_stored() {
    let client = text_client();
    client.set(b"a", 0, 0, b"first").unwrap();
    let status = client.add(b"a", 0, 0, b"second").unwrap();
    assert!(!status.is_success());
    assert_eq!(client.get(b"a").unwrap().unwrap().as_ref(), b"first");
}

#[test]
fn text_oversized_value_maps_to_too_big() {
    let node = spawn_node(ServerConfig {
        max_item_size: 64,
        ..ServerConfig::default()
    });
    let client = plain_client(node, WireProtocol::Text);
    let status = client.set(b"big", 0, 0, &[b'x'; 65]).unwrap();
    assert_eq!(status.code(), StatusCode::Err2Big);
}

#[test]
fn text_counter_with_initial_value() {
    let client = text_client();
    assert_eq!(client.incr(b"n", 2, Some(40), 0).unwrap(), Some(40));
    assert_eq!(client.incr(b"n", 2, Some(40), 0).unwrap(), Some(42));
    assert_eq!(client.decr(b"absent", 1, None, 0).unwrap(), None);
}

#[test]
fn text_cas_and_delete() {
    let client = text_client();
    client.set(b"c", 0, 0, b"v1").unwrap();
    let cas = client.gets(b"c").unwrap().unwrap().cas;
    assert_eq!(client.cas(b"c", cas + 1, 0, 0, b"v2").unwrap(), CasResponse::Exists);
    assert_eq!(client.cas(b"c", cas, 0, 0, b"v2").unwrap(), CasResponse::Ok);
    assert!(client.delete(b"c", 0).unwrap().is_success());
    assert_eq!(client.delete(b"c", 0).unwrap().code(), StatusCode::ErrNotFound);
}

#[test]
fn text_rejects_what_it_cannot_express() {
    let client = text_client();
    assert!(matches!(
        client.delete(b"k", 5),
        Err(ClientError::Unsupported(_))
    ));
    assert!(matches!(client.noop(), Err(ClientError::Unsupported(_))));
    assert!(matches!(
        client.append(9, b"k", b"x"),
        Err(ClientError::Unsupported(_))
    ));
}

#[test]
fn invalid_key_never_reaches_the_wire() {
    let client = binary_client();
    assert!(matches!(
        client.get(b"has space"),
        Err(ClientError::InvalidKey(_))
    ));
}
