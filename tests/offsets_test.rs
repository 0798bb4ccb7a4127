// Integration tests for offset storage across process restarts

use buildstream::offsets::{
    OffsetReader, OffsetWriter, Partitions, ReadYourWritesOffsets, SourceOffset,
    SqliteOffsetStore,
};
use buildstream::stop::stop_pair;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn build(number: i64) -> SourceOffset {
    SourceOffset::new("buildNumber", number)
}

#[tokio::test]
async fn test_flushed_offsets_visible_after_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("offsets.db");
    let jobs = Partitions::new("jobName");

    {
        let store = Arc::new(SqliteOffsetStore::new(&db_path, "jenkins").unwrap());
        let writer = OffsetWriter::new(store, Duration::from_secs(5));
        writer.stage(jobs.of("alpha"), build(41));
        writer.stage(jobs.of("alpha"), build(42));
        writer.stage(jobs.of("beta"), build(7));

        assert_eq!(writer.flush().await.unwrap(), 2);
        assert_eq!(writer.staged_len(), 0);
    }

    let store = SqliteOffsetStore::new(&db_path, "jenkins").unwrap();
    let offsets = ReadYourWritesOffsets::load(
        &store,
        &[jobs.of("alpha"), jobs.of("beta"), jobs.of("gamma")],
    )
    .unwrap();

    assert_eq!(offsets.get_offset(&jobs.of("alpha")), Some(&build(42)));
    assert_eq!(offsets.get_offset(&jobs.of("beta")), Some(&build(7)));
    assert_eq!(offsets.get_offset(&jobs.of("gamma")), None);
}

#[tokio::test]
async fn test_unflushed_offsets_lost_on_restart() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("offsets.db");
    let jobs = Partitions::new("jobName");

    {
        let store = Arc::new(SqliteOffsetStore::new(&db_path, "jenkins").unwrap());
        let writer = OffsetWriter::new(store, Duration::from_secs(5));
        writer.stage(jobs.of("alpha"), build(42));
    }

    let store = SqliteOffsetStore::new(&db_path, "jenkins").unwrap();
    assert!(store.offsets(&[jobs.of("alpha")]).unwrap().is_empty());
}

#[tokio::test]
async fn test_connectors_do_not_share_offsets() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("offsets.db");
    let jobs = Partitions::new("jobName");

    let store = Arc::new(SqliteOffsetStore::new(&db_path, "ci-east").unwrap());
    let writer = OffsetWriter::new(Arc::clone(&store), Duration::from_secs(5));
    writer.stage(jobs.of("alpha"), build(42));
    writer.flush().await.unwrap();

    let other = SqliteOffsetStore::new(&db_path, "ci-west").unwrap();
    assert_eq!(other.get(&jobs.of("alpha")).unwrap(), None);
    assert_eq!(store.get(&jobs.of("alpha")).unwrap(), Some(build(42)));
}

#[tokio::test]
async fn test_flush_loop_flushes_on_stop() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("offsets.db");
    let jobs = Partitions::new("jobName");

    let store = Arc::new(SqliteOffsetStore::new(&db_path, "jenkins").unwrap());
    let writer = Arc::new(OffsetWriter::new(Arc::clone(&store), Duration::from_secs(5)));
    let (stop, signal) = stop_pair();

    // Long interval: only the final flush can write the offset
    let handle = tokio::spawn(
        Arc::clone(&writer).run_flush_loop(Duration::from_secs(3600), signal),
    );
    writer.stage(jobs.of("alpha"), build(42));
    stop.stop();
    handle.await.unwrap();

    assert_eq!(store.get(&jobs.of("alpha")).unwrap(), Some(build(42)));
    assert_eq!(store.count().unwrap(), 1);
}

#[tokio::test]
async fn test_cached_offset_wins_until_flushed() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("offsets.db");
    let jobs = Partitions::new("jobName");

    let store = Arc::new(SqliteOffsetStore::new(&db_path, "jenkins").unwrap());
    let writer = OffsetWriter::new(Arc::clone(&store), Duration::from_secs(5));
    writer.stage(jobs.of("alpha"), build(42));
    writer.flush().await.unwrap();

    let mut offsets = ReadYourWritesOffsets::load(store.as_ref(), &[jobs.of("alpha")]).unwrap();
    assert_eq!(offsets.get_offset(&jobs.of("alpha")), Some(&build(42)));

    // Produced but not flushed yet
    offsets.cache(jobs.of("alpha"), build(43));
    writer.stage(jobs.of("alpha"), build(43));
    assert_eq!(offsets.get_offset(&jobs.of("alpha")), Some(&build(43)));
    assert_eq!(store.get(&jobs.of("alpha")).unwrap(), Some(build(42)));

    writer.flush().await.unwrap();
    assert_eq!(store.get(&jobs.of("alpha")).unwrap(), Some(build(43)));
}
