mod common;

use std::fs;
use tokio_keeper::{error, CreateMode, Ensemble, MultiResponse, SnapshotMode};

use common::dump;

async fn populate(zk: &mut Ensemble) {
    let path = zk
        .create("/a", &b"hello"[..], CreateMode::Persistent)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(path, "/a");
    let a = zk.exists("/a").unwrap().unwrap();
    assert_eq!(a.version, 0);
    assert_eq!(a.data_length, 5);

    for i in 0..10 {
        zk.create(&format!("/a/{}", i), &b""[..], CreateMode::Persistent)
            .await
            .unwrap()
            .unwrap();
    }
    let a = zk.exists("/a").unwrap().unwrap();
    assert_eq!(a.cversion, 10);
    assert_eq!(a.num_children, 10);
    for i in 0..10 {
        assert_eq!(zk.exists(&format!("/a/{}", i)).unwrap().unwrap().version, 0);
    }

    zk.create("/x", &b""[..], CreateMode::Persistent)
        .await
        .unwrap()
        .unwrap();
    let before = zk.exists("/x").unwrap().unwrap();
    let results = zk
        .multi()
        .create("/x/q0", &b""[..], CreateMode::Persistent)
        .delete("/x/a0", None)
        .create("/x/x0", &b""[..], CreateMode::Persistent)
        .run()
        .await
        .unwrap();
    assert_eq!(
        results,
        vec![
            Err(error::Multi::RolledBack),
            Err(error::Multi::Delete(error::Delete::NoNode)),
            Err(error::Multi::Skipped),
        ]
    );
    assert_eq!(zk.get_children("/x").unwrap(), Some(vec![]));
    assert_eq!(zk.exists("/x").unwrap(), Some(before));

    let results = zk
        .multi()
        .create("/x/q", &b""[..], CreateMode::PersistentSequential)
        .set_data("/x", Some(0), &b"batch"[..])
        .check("/a", 0)
        .run()
        .await
        .unwrap();
    assert_eq!(results[0], Ok(MultiResponse::Create("/x/q0000000000".into())));
    assert!(results.iter().all(|r| r.is_ok()));

    for i in 0..30 {
        zk.set_data(&format!("/a/{}", i % 10), None, format!("round {}", i))
            .await
            .unwrap()
            .unwrap();
    }
    zk.delete("/a/9", None).await.unwrap().unwrap();
    assert_eq!(
        zk.delete("/a/8", Some(0)).await.unwrap(),
        Err(error::Delete::VersionMismatch { expected: 0 })
    );

    let session = zk.create_session(30_000).await.unwrap();
    for _ in 0..3 {
        zk.create_in_session(session, "/x/lock-", &b""[..], CreateMode::EphemeralSequential)
            .await
            .unwrap()
            .unwrap();
    }
    let keep = zk.create_session(30_000).await.unwrap();
    zk.create_in_session(keep, "/x/owner", &b"me"[..], CreateMode::Ephemeral)
        .await
        .unwrap()
        .unwrap();
    zk.close_session(session).await.unwrap().unwrap();
}

async fn restart_keeps_identical_state(mode: SnapshotMode) {
    let dir = tempfile::tempdir().unwrap();
    let mut zk = common::start(&dir, mode).await;
    populate(&mut zk).await;

    let leader = zk.leader().unwrap();
    let before = dump(zk.replica(leader).unwrap());
    for i in 0..zk.len() {
        assert_eq!(dump(zk.replica(i).unwrap()), before, "replica {} diverged", i);
    }
    let epoch = zk.epoch();

    zk.restart_all().await.unwrap();
    assert!(zk.epoch() > epoch);

    let d1 = dump(zk.replica(0).unwrap());
    let d2 = dump(zk.replica(1).unwrap());
    let d3 = dump(zk.replica(2).unwrap());
    assert_eq!(d1, before);
    assert_eq!(d2, before);
    assert_eq!(d3, before);

    let (data, _) = zk.get_data("/a/5").unwrap().unwrap();
    assert_eq!(data, b"round 25");
    let a = zk.exists("/a").unwrap().unwrap();
    assert_eq!(a.num_children, 9);
    assert_eq!(zk.get_children("/x").unwrap().unwrap(), vec!["owner", "q0000000000"]);

    // writes continue in the new epoch
    zk.create("/after", &b""[..], CreateMode::Persistent)
        .await
        .unwrap()
        .unwrap();
    let czxid = zk.exists("/after").unwrap().unwrap().czxid;
    assert_eq!((czxid as u64 >> 32) as u32, zk.epoch());
    assert_eq!(dump(zk.replica(1).unwrap()), dump(zk.replica(2).unwrap()));

    zk.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_with_sync_snapshots() {
    restart_keeps_identical_state(SnapshotMode::Sync).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_with_async_snapshots() {
    restart_keeps_identical_state(SnapshotMode::Async).await;
}

#[tokio::test]
async fn corrupt_snapshot_falls_back_to_older_one() {
    let dir = tempfile::tempdir().unwrap();
    let mut zk = common::start(&dir, SnapshotMode::Sync).await;
    populate(&mut zk).await;
    let before = dump(zk.replica(0).unwrap());
    zk.stop(1).await.unwrap();

    let snap_dir = dir.path().join("replica-2").join("raft_snapshot");
    let mut snapshots: Vec<_> = fs::read_dir(&snap_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    snapshots.sort();
    assert_eq!(snapshots.len(), 2);
    let newest = snapshots.pop().unwrap();
    let mut bytes = fs::read(&newest).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x40;
    fs::write(&newest, bytes).unwrap();

    zk.restart(1).await.unwrap();
    assert_eq!(dump(zk.replica(1).unwrap()), before);
}

#[tokio::test]
async fn wiped_replica_catches_up_from_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut zk = common::start(&dir, SnapshotMode::Sync).await;
    populate(&mut zk).await;
    assert_eq!(zk.leader(), Some(0));
    assert!(zk.replica(0).unwrap().entries_after(Default::default()).unwrap().is_none());

    zk.stop(2).await.unwrap();
    fs::remove_dir_all(dir.path().join("replica-3")).unwrap();
    zk.set_data("/a", None, &b"while away"[..])
        .await
        .unwrap()
        .unwrap();

    zk.restart(2).await.unwrap();
    let replica = zk.replica(2).unwrap();
    assert_eq!(dump(replica), dump(zk.replica(0).unwrap()));
    assert_eq!(replica.last_zxid(), zk.replica(0).unwrap().last_zxid());

    // and it keeps up from there on
    zk.delete("/a/0", None).await.unwrap().unwrap();
    assert_eq!(dump(zk.replica(2).unwrap()), dump(zk.replica(0).unwrap()));
}
