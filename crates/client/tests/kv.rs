mod support;

use std::sync::Arc;
use std::time::Duration;

use client::kv::{Kv, KvError};
use client::{Client, FileContent};

use support::{link, TestServer};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("client=debug")
        .try_init();
}

/// Two devices on one account, ring shared.
async fn linked_pair(server: &TestServer) -> (Arc<Client>, Arc<Client>) {
    let x = server.client();
    let y = server.client();
    let outcome = link(&x, &y, true).await;
    assert!(outcome.generator.is_ok());
    assert!(outcome.requester.is_ok());
    (x, y)
}

#[tokio::test]
async fn test_kv_replicates_between_devices() {
    init_tracing();
    let server = TestServer::start().await;
    let (x, y) = linked_pair(&server).await;

    let kv_x = Kv::open(x.clone(), "notes").await.unwrap();
    assert_eq!(kv_x.local_version().await.unwrap(), 0);
    assert_eq!(kv_x.get(b"a").await.unwrap(), None);

    let version = kv_x.set("password", "hunter22").await.unwrap();
    assert_eq!(version, 2);
    assert_eq!(
        kv_x.get(b"password").await.unwrap(),
        Some(b"hunter22".to_vec())
    );

    let kv_y = Kv::open(y.clone(), "notes").await.unwrap();
    assert_eq!(kv_y.local_version().await.unwrap(), 2);
    assert_eq!(
        kv_y.get(b"password").await.unwrap(),
        Some(b"hunter22".to_vec())
    );

    // the uploaded snapshot is ciphertext
    match y.read_file("notes/2").await.unwrap() {
        FileContent::File(blob) => {
            assert!(!contains(&blob, b"password"));
            assert!(!contains(&blob, b"hunter22"));
        }
        other => panic!("expected a file, got {:?}", other),
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[tokio::test]
async fn test_kv_later_commit_wins() {
    init_tracing();
    let server = TestServer::start().await;
    let (x, y) = linked_pair(&server).await;

    let kv_x = Kv::open(x, "prefs").await.unwrap();
    let kv_y = Kv::open(y, "prefs").await.unwrap();

    kv_x.set("theme", "dark").await.unwrap();
    // y commits without syncing first; the commit replays x's write
    let version = kv_y.set("theme", "light").await.unwrap();
    assert_eq!(version, 3);
    assert_eq!(kv_y.get(b"theme").await.unwrap(), Some(b"light".to_vec()));

    assert_eq!(kv_x.get(b"theme").await.unwrap(), Some(b"dark".to_vec()));
    assert_eq!(kv_x.sync().await.unwrap(), 3);
    assert_eq!(kv_x.get(b"theme").await.unwrap(), Some(b"light".to_vec()));

    let mut txn = kv_x.begin().await.unwrap();
    txn.set("font", "mono");
    txn.delete("theme");
    assert_eq!(txn.get(b"theme").await.unwrap(), None);
    assert_eq!(txn.read_version(), 3);
    assert_eq!(kv_x.commit(txn).await.unwrap(), 4);

    kv_y.sync().await.unwrap();
    assert_eq!(kv_y.keys().await.unwrap(), vec![b"font".to_vec()]);
    assert_eq!(kv_x.keys().await.unwrap(), kv_y.keys().await.unwrap());

    // nothing to write, nothing consumed
    let txn = kv_y.begin().await.unwrap();
    assert_eq!(kv_y.commit(txn).await.unwrap(), 4);
    assert_eq!(kv_y.local_version().await.unwrap(), 4);
}

#[tokio::test]
async fn test_kv_reset_rebuilds_from_server() {
    init_tracing();
    let server = TestServer::start().await;
    let x = server.client();

    let mut kv = Kv::open(x.clone(), "journal").await.unwrap();
    kv.set("day1", "rain").await.unwrap();
    kv.set("day2", "sun").await.unwrap();
    kv.delete("day1").await.unwrap();
    assert_eq!(kv.local_version().await.unwrap(), 4);

    assert_eq!(kv.reset().await.unwrap(), 4);
    assert_eq!(kv.keys().await.unwrap(), vec![b"day2".to_vec()]);
    assert_eq!(kv.get(b"day2").await.unwrap(), Some(b"sun".to_vec()));

    // a fresh handle on the same data dir sees the same state
    drop(kv);
    let reopened = Kv::open(x, "journal").await.unwrap();
    assert_eq!(reopened.local_version().await.unwrap(), 4);
    assert_eq!(reopened.get(b"day1").await.unwrap(), None);
}

#[tokio::test]
async fn test_kv_stalls_on_missing_version() {
    init_tracing();
    let server = TestServer::start().await;
    let (x, y) = linked_pair(&server).await;

    let kv_x = Kv::open(x.clone(), "notes").await.unwrap();
    let kv_y = Kv::open(y.clone(), "notes")
        .await
        .unwrap()
        .with_commit_wait(Duration::from_millis(200));
    kv_x.set("a", "1").await.unwrap();

    // a device that took a version and never uploaded it
    assert_eq!(x.next_seq("notes").await.unwrap(), 3);

    assert_eq!(kv_y.sync().await.unwrap(), 2);
    assert_eq!(kv_y.get(b"a").await.unwrap(), Some(b"1".to_vec()));

    let err = kv_y.set("b", "2").await.unwrap_err();
    assert!(matches!(err, KvError::MissingVersion(3)));
    assert_eq!(kv_y.get(b"b").await.unwrap(), None);

    // the version y took is filled with an empty snapshot, not left as a gap
    assert!(matches!(
        y.read_file("notes/4").await.unwrap(),
        FileContent::File(_)
    ));
    assert_eq!(kv_y.local_version().await.unwrap(), 2);
}

#[tokio::test]
async fn test_kv_concurrent_commits() {
    init_tracing();
    let server = TestServer::start().await;
    let (x, y) = linked_pair(&server).await;

    let kv_x = Kv::open(x, "shared").await.unwrap();
    let kv_y = Kv::open(y, "shared").await.unwrap();

    let mut versions = Vec::new();
    for round in 0..10 {
        let (from_x, from_y) = tokio::join!(
            kv_x.set(format!("x{}", round), "1"),
            kv_y.set(format!("y{}", round), "1"),
        );
        let (from_x, from_y) = (from_x.unwrap(), from_y.unwrap());
        assert_ne!(from_x, from_y);
        versions.push(from_x);
        versions.push(from_y);
    }
    versions.sort_unstable();
    assert_eq!(versions, (2..22).collect::<Vec<u64>>());

    assert_eq!(kv_x.sync().await.unwrap(), 21);
    assert_eq!(kv_y.sync().await.unwrap(), 21);
    let keys = kv_x.keys().await.unwrap();
    assert_eq!(keys.len(), 20);
    assert_eq!(keys, kv_y.keys().await.unwrap());
}

#[tokio::test]
async fn test_kv_rejects_bad_names() {
    let server = TestServer::start().await;
    let client = server.client();

    for name in ["", "..", "a/b"] {
        assert!(matches!(
            Kv::open(client.clone(), name).await,
            Err(KvError::InvalidName(_))
        ));
    }
}
