//! End-to-end tests for the storage server over real TCP: block reads
//! and writes, command operations, and server-to-server copies.

mod common;

use alder::client::CommandClient;
use alder::client::StorageClient;
use alder_core::DfsError;
use alder_core::DfsPath;

use common::start_naming;
use common::start_storage;

fn p(s: &str) -> DfsPath {
    DfsPath::parse(s).expect("valid path")
}

#[tokio::test]
async fn size_read_write_over_the_wire() {
    let cluster = start_naming().await;
    let fixture = start_storage(&cluster, &[("/data/file.bin", b"0123456789")]).await;
    let (storage_stub, _) = fixture.server.stubs().expect("started");
    let client = StorageClient::for_stub(&storage_stub);

    assert_eq!(client.size(&p("/data/file.bin")).await, Ok(10));
    assert_eq!(client.read(&p("/data/file.bin"), 3, 4).await.unwrap(), b"3456");

    client.write(&p("/data/file.bin"), 10, b"abc".to_vec()).await.unwrap();
    assert_eq!(client.size(&p("/data/file.bin")).await, Ok(13));
    assert_eq!(client.read(&p("/data/file.bin"), 0, 13).await.unwrap(), b"0123456789abc");

    assert!(matches!(
        client.read(&p("/data/file.bin"), 10, 10).await,
        Err(DfsError::OutOfRange { .. })
    ));
    assert!(matches!(
        client.write(&p("/data/file.bin"), 20, b"x".to_vec()).await,
        Err(DfsError::OutOfRange { .. })
    ));
    assert!(matches!(
        client.size(&p("/missing")).await,
        Err(DfsError::NotFound { .. })
    ));
    assert!(matches!(
        client.size(&p("/data")).await,
        Err(DfsError::NotFound { .. })
    ));

    cluster.naming.stop().await;
    fixture.server.stop().await;
}

#[tokio::test]
async fn command_create_and_delete() {
    let cluster = start_naming().await;
    let fixture = start_storage(&cluster, &[]).await;
    let (_, command_stub) = fixture.server.stubs().expect("started");
    let client = CommandClient::for_stub(&command_stub);

    assert_eq!(client.create(&p("/a/b/new.txt")).await, Ok(true));
    assert!(fixture.has_file("/a/b/new.txt"));
    assert_eq!(client.create(&p("/a/b/new.txt")).await, Ok(false));
    assert_eq!(client.create(&DfsPath::root()).await, Ok(false));

    assert_eq!(client.delete(&p("/a")).await, Ok(true));
    assert!(!fixture.root.path().join("a").exists());
    assert_eq!(client.delete(&p("/a")).await, Ok(false));
    assert_eq!(client.delete(&DfsPath::root()).await, Ok(false));

    cluster.naming.stop().await;
    fixture.server.stop().await;
}

#[tokio::test]
async fn copy_streams_a_file_between_servers() {
    let cluster = start_naming().await;
    // A payload larger than one element but well under the chunk size,
    // with recognizable structure for verification.
    let payload: Vec<u8> = (0..100_000u32).flat_map(|n| n.to_le_bytes()).collect();
    let source = start_storage(&cluster, &[("/big/blob", payload.as_slice())]).await;
    let target = start_storage(&cluster, &[]).await;

    let (source_stub, _) = source.server.stubs().expect("source started");
    let (_, target_command) = target.server.stubs().expect("target started");

    let copied = CommandClient::for_stub(&target_command)
        .copy(&p("/big/blob"), &source_stub)
        .await
        .unwrap();
    assert!(copied);
    assert_eq!(std::fs::read(target.local_file("/big/blob")).unwrap(), payload);

    cluster.naming.stop().await;
}

#[tokio::test]
async fn copy_replaces_a_stale_local_copy() {
    let cluster = start_naming().await;
    let source = start_storage(&cluster, &[("/f", b"fresh contents")]).await;
    let target = start_storage(&cluster, &[]).await;

    // Plant a stale local copy on the target, bypassing registration.
    std::fs::write(target.local_file("/f"), b"stale, longer than the fresh copy").unwrap();

    let (source_stub, _) = source.server.stubs().expect("source started");
    let (_, target_command) = target.server.stubs().expect("target started");
    let copied =
        CommandClient::for_stub(&target_command).copy(&p("/f"), &source_stub).await.unwrap();
    assert!(copied);
    assert_eq!(std::fs::read(target.local_file("/f")).unwrap(), b"fresh contents");

    cluster.naming.stop().await;
}

#[tokio::test]
async fn copy_of_a_missing_file_is_not_found() {
    let cluster = start_naming().await;
    let source = start_storage(&cluster, &[]).await;
    let target = start_storage(&cluster, &[]).await;

    let (source_stub, _) = source.server.stubs().expect("source started");
    let (_, target_command) = target.server.stubs().expect("target started");
    assert!(matches!(
        CommandClient::for_stub(&target_command).copy(&p("/ghost"), &source_stub).await,
        Err(DfsError::NotFound { .. })
    ));

    cluster.naming.stop().await;
}

#[tokio::test]
async fn empty_file_copies_cleanly() {
    let cluster = start_naming().await;
    let source = start_storage(&cluster, &[("/empty", b"")]).await;
    let target = start_storage(&cluster, &[]).await;

    let (source_stub, _) = source.server.stubs().expect("source started");
    let (_, target_command) = target.server.stubs().expect("target started");
    let copied =
        CommandClient::for_stub(&target_command).copy(&p("/empty"), &source_stub).await.unwrap();
    assert!(copied);
    assert_eq!(std::fs::read(target.local_file("/empty")).unwrap(), b"");

    cluster.naming.stop().await;
}
