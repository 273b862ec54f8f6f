mod support;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use client::{ClientError, FileContent};
use common::crypto;

use support::TestServer;

#[tokio::test]
async fn test_ring_bootstrap() {
    let server = TestServer::start().await;
    let client = server.client();

    let auth = client.auth().await.unwrap();
    // the response predates the bootstrap upload
    assert!(auth.encrypt_keys.is_empty());
    let ring = client.encrypt_keys().await.unwrap();
    assert_eq!(ring.len(), 1);

    client.invalidate_auth().await;
    let auth = client.auth().await.unwrap();
    assert_eq!(auth.encrypt_keys.len(), 1);
    let stored = &auth.encrypt_keys[0];
    assert_eq!(stored.global_id, ring[0].global_id);
    assert_eq!(
        stored.public_key.as_deref(),
        Some(client.identity().public_key().to_authorized().as_str())
    );

    let sealed = STANDARD.decode(&stored.encrypted_key).unwrap();
    let opened = crypto::open(client.identity().secret(), &sealed).unwrap();
    assert_eq!(opened, ring[0].key.as_bytes());
    assert_eq!(client.encrypt_keys().await.unwrap(), ring);
}

#[tokio::test]
async fn test_ring_survives_restart() {
    let server = TestServer::start().await;
    let config = server.config();

    let first = server.client_with(config.clone());
    let key = first.default_encrypt_key().await.unwrap();
    let ciphertext = first.encrypt(b"secret notes", None).await.unwrap();

    let second = server.client_with(config);
    assert_eq!(second.default_encrypt_key().await.unwrap(), key);
    assert_eq!(
        second.decrypt(&ciphertext, Some(&key.global_id)).await.unwrap(),
        b"secret notes"
    );
    assert!(matches!(
        second.decrypt(&ciphertext, Some("nope")).await,
        Err(ClientError::Ring(_))
    ));
}

#[tokio::test]
async fn test_profile() {
    let server = TestServer::start().await;
    let alice = server.client();
    let bob = server.client();

    let id = alice.id().await.unwrap();
    assert_eq!(alice.id().await.unwrap(), id);

    let user = alice.set_name("alice").await.unwrap();
    assert_eq!(user.charm_id, id);
    assert_eq!(alice.bio().await.unwrap().name.as_deref(), Some("alice"));
    assert_eq!(bob.user_by_name("alice").await.unwrap().charm_id, id);

    assert!(matches!(bob.set_name("alice").await, Err(ClientError::NameTaken)));
    assert!(matches!(
        bob.set_name("not a name").await,
        Err(ClientError::NameInvalid)
    ));
    assert!(matches!(
        bob.user_by_name("nobody").await,
        Err(ClientError::MissingUser)
    ));
}

#[tokio::test]
async fn test_keys_and_unlink() {
    let server = TestServer::start().await;
    let generator = server.client();
    let requester = server.client();

    let outcome = support::link(&generator, &requester, true).await;
    assert!(outcome.generator.is_ok());

    let keys = generator.authorized_keys().await.unwrap();
    assert_eq!(keys.keys.len(), 2);
    assert_eq!(
        keys.active().unwrap().key,
        generator.identity().public_key().to_authorized()
    );

    let requester_key = requester.identity().public_key().to_authorized();
    generator.unlink_key(&requester_key).await.unwrap();
    assert_eq!(generator.authorized_keys().await.unwrap().keys.len(), 1);
    assert_eq!(server.account_of(&requester).await, None);

    assert!(matches!(
        generator.unlink_key(&requester_key).await,
        Err(ClientError::CouldNotUnlinkKey)
    ));
}

#[tokio::test]
async fn test_jwt() {
    let server = TestServer::start().await;
    let client = server.client();

    let jwt = client.jwt().await.unwrap();
    assert_eq!(client.jwt().await.unwrap(), jwt);

    let other = client.jwt_for(&["charm", "kv"]).await.unwrap();
    let claims = server.state.tokens().validate(&other).unwrap();
    assert_eq!(claims.sub, client.id().await.unwrap());
}

#[tokio::test]
async fn test_files() {
    let server = TestServer::start().await;
    let client = server.client();

    client
        .write_file("notes/today.txt", b"hello".to_vec(), Some(0o600))
        .await
        .unwrap();
    assert_eq!(
        client.read_file("notes/today.txt").await.unwrap(),
        FileContent::File(b"hello".to_vec())
    );

    match client.read_file("notes").await.unwrap() {
        FileContent::Dir(entries) => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].name, "today.txt");
            assert_eq!(entries[0].size, 5);
            assert!(!entries[0].is_dir);
        }
        other => panic!("expected a listing, got {:?}", other),
    }

    client.remove_file("notes").await.unwrap();
    assert!(matches!(
        client.read_file("notes/today.txt").await,
        Err(ClientError::NotFound)
    ));

    // other accounts see their own tree
    let stranger = server.client();
    client.write_file("mine", b"x".to_vec(), None).await.unwrap();
    assert!(matches!(
        stranger.read_file("mine").await,
        Err(ClientError::NotFound)
    ));
}

#[tokio::test]
async fn test_path_traversal_rejected() {
    let server = TestServer::start().await;
    let client = server.client();

    assert!(matches!(
        client.read_file("../../db/charm.sqlite").await,
        Err(ClientError::BadPath(_))
    ));

    let jwt = client.jwt().await.unwrap();
    let url = format!(
        "http://{}/v1/fs/..%2F..%2Fdb%2Fcharm.sqlite",
        server.http_addr
    );
    let response = reqwest::Client::new()
        .get(url)
        .bearer_auth(jwt)
        .send()
        .await
        .unwrap();
    assert!(!response.status().is_success());
}

#[tokio::test]
async fn test_unauthenticated_http_rejected() {
    let server = TestServer::start().await;
    let response = reqwest::get(format!("http://{}/v1/seq/notes", server.http_addr))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}
