mod common;

use barge::ship::core::{CycleEnd, Shipper};
use barge::spool::bookmark::Bookmark;
use barge::spool::lock::try_lock_exclusive;
use common::MockTransport;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn base_path(dir: &TempDir) -> PathBuf {
    dir.path().join("events")
}

fn write_spool(dir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.path().join(name);
    let mut content = String::new();
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    fs::write(&path, content).unwrap();
    path
}

fn shipper(dir: &TempDir, limit: usize, transport: MockTransport) -> Shipper<MockTransport> {
    Shipper::new(&base_path(dir), limit, transport).unwrap()
}

#[tokio::test]
async fn ships_all_records_in_order_across_files() {
    let dir = TempDir::new().unwrap();
    let older = write_spool(&dir, "events-20260101.json", &["a1", "a2", "a3"]);
    let newer = write_spool(&dir, "events-20260102.json", &["b1", "b2"]);

    let transport = MockTransport::new();
    let shipper = shipper(&dir, 10, transport.clone());

    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::CaughtUp);
    assert_eq!(report.records, 5);
    assert_eq!(report.batches, 2);
    assert_eq!(
        transport.delivered_records(),
        vec!["a1", "a2", "a3", "b1", "b2"]
    );

    // The fully shipped file is gone, the current one stays.
    assert!(!older.exists());
    assert!(newer.exists());

    // The bookmark rests at the end of the newest file.
    let newer_len = fs::metadata(&newer).unwrap().len();
    let bookmark = Bookmark::acquire(shipper.bookmark_path()).unwrap();
    assert_eq!(bookmark.file_name(), Some(newer.as_path()));
    assert_eq!(bookmark.position(), newer_len);
}

#[tokio::test]
async fn repeated_cycles_do_not_replay() {
    let dir = TempDir::new().unwrap();
    let file = write_spool(&dir, "events-20260101.json", &["a1", "a2"]);

    let transport = MockTransport::new();
    let shipper = shipper(&dir, 10, transport.clone());

    shipper.ship_logs().await;
    shipper.ship_logs().await;
    assert_eq!(transport.delivered_records(), vec!["a1", "a2"]);

    // New appends are picked up from the recorded offset.
    let mut handle = fs::OpenOptions::new().append(true).open(&file).unwrap();
    handle.write_all(b"a3\n").unwrap();
    drop(handle);

    shipper.ship_logs().await;
    assert_eq!(transport.delivered_records(), vec!["a1", "a2", "a3"]);
}

#[tokio::test]
async fn bookmark_unchanged_when_endpoint_rejects() {
    let dir = TempDir::new().unwrap();
    write_spool(&dir, "events-20260101.json", &["a1", "a2"]);

    let transport = MockTransport::new();
    transport.reject_next(1);
    let shipper = shipper(&dir, 10, transport.clone());

    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::SendFailed);
    assert!(transport.delivered().is_empty());

    // The cycle claimed the file but shipped nothing past offset 0.
    let bookmark = Bookmark::acquire(shipper.bookmark_path()).unwrap();
    assert_eq!(bookmark.position(), 0);
    drop(bookmark);

    // Next cycle resubmits the identical batch.
    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::CaughtUp);
    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0], attempts[1]);
    assert_eq!(transport.delivered_records(), vec!["a1", "a2"]);
}

#[tokio::test]
async fn bookmark_unchanged_when_transport_errors() {
    let dir = TempDir::new().unwrap();
    write_spool(&dir, "events-20260101.json", &["a1"]);

    let transport = MockTransport::new();
    transport.error_next(1);
    let shipper = shipper(&dir, 10, transport.clone());

    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::SendFailed);

    shipper.ship_logs().await;
    assert_eq!(transport.delivered_records(), vec!["a1"]);
}

#[tokio::test]
async fn batches_are_chunked_by_the_posting_limit() {
    let dir = TempDir::new().unwrap();
    write_spool(
        &dir,
        "events-20260101.json",
        &["r1", "r2", "r3", "r4", "r5", "r6", "r7"],
    );

    let transport = MockTransport::new();
    let shipper = shipper(&dir, 3, transport.clone());

    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::CaughtUp);
    assert_eq!(report.batches, 3);

    let sizes: Vec<usize> = transport.delivered().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert_eq!(
        transport.delivered_records(),
        vec!["r1", "r2", "r3", "r4", "r5", "r6", "r7"]
    );
}

#[tokio::test]
async fn rolls_to_a_growing_file_in_the_same_cycle() {
    let dir = TempDir::new().unwrap();
    let finished = write_spool(&dir, "events-20260101.json", &["a1", "a2"]);
    let growing = dir.path().join("events-20260102.json");
    // One complete line and one the writer has not finished.
    fs::write(&growing, b"b1\nhalf").unwrap();

    let transport = MockTransport::new();
    let shipper = shipper(&dir, 10, transport.clone());

    // Park the bookmark at the end of the finished file.
    let finished_len = fs::metadata(&finished).unwrap().len();
    let mut bookmark = Bookmark::acquire(shipper.bookmark_path()).unwrap();
    bookmark
        .update_file_and_position(&finished, finished_len)
        .unwrap();
    drop(bookmark);

    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::CaughtUp);
    assert_eq!(transport.delivered_records(), vec!["b1"]);

    // Rolled past the finished file and stopped before the partial line.
    let bookmark = Bookmark::acquire(shipper.bookmark_path()).unwrap();
    assert_eq!(bookmark.file_name(), Some(growing.as_path()));
    assert_eq!(bookmark.position(), 3);
    drop(bookmark);

    // The writer finishes the line; the next cycle picks it up whole.
    let mut handle = fs::OpenOptions::new().append(true).open(&growing).unwrap();
    handle.write_all(b"-done\n").unwrap();
    drop(handle);

    shipper.ship_logs().await;
    assert_eq!(transport.delivered_records(), vec!["b1", "half-done"]);
}

#[tokio::test]
#[cfg(unix)]
async fn does_not_roll_past_a_file_another_holder_keeps_open() {
    let dir = TempDir::new().unwrap();
    let current = write_spool(&dir, "events-20260101.json", &["a1"]);
    write_spool(&dir, "events-20260102.json", &["b1"]);

    let transport = MockTransport::new();
    let shipper = shipper(&dir, 10, transport.clone());

    let holder = fs::File::open(&current).unwrap();
    try_lock_exclusive(&holder).unwrap();

    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::CaughtUp);
    // The current file's records ship, but the roll is refused while the
    // writer still holds it.
    assert_eq!(transport.delivered_records(), vec!["a1"]);
    let bookmark = Bookmark::acquire(shipper.bookmark_path()).unwrap();
    assert_eq!(bookmark.file_name(), Some(current.as_path()));
    drop(bookmark);

    drop(holder);
    shipper.ship_logs().await;
    assert_eq!(transport.delivered_records(), vec!["a1", "b1"]);
}

#[tokio::test]
#[cfg(unix)]
async fn deletion_is_deferred_while_a_stale_file_is_held() {
    let dir = TempDir::new().unwrap();
    let stale = write_spool(&dir, "events-20260101.json", &["old"]);
    let current = write_spool(&dir, "events-20260102.json", &["new"]);

    let transport = MockTransport::new();
    let shipper = shipper(&dir, 10, transport.clone());

    // The bookmark has already moved strictly past the stale file.
    let mut bookmark = Bookmark::acquire(shipper.bookmark_path()).unwrap();
    bookmark.update_file_and_position(&current, 0).unwrap();
    drop(bookmark);

    let holder = fs::File::open(&stale).unwrap();
    try_lock_exclusive(&holder).unwrap();

    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::CaughtUp);
    assert_eq!(transport.delivered_records(), vec!["new"]);
    // Deferred, not lost.
    assert!(stale.exists());

    drop(holder);
    shipper.ship_logs().await;
    assert!(!stale.exists());
}

#[tokio::test]
async fn garbage_bookmark_restarts_from_the_oldest_file() {
    let dir = TempDir::new().unwrap();
    write_spool(&dir, "events-20260101.json", &["a1", "a2"]);

    let transport = MockTransport::new();
    let shipper = shipper(&dir, 10, transport.clone());
    fs::write(shipper.bookmark_path(), b"\x00\xFFnot a bookmark").unwrap();

    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::CaughtUp);
    assert_eq!(transport.delivered_records(), vec!["a1", "a2"]);
}

#[tokio::test]
async fn truncated_spool_file_is_restarted_from_zero() {
    let dir = TempDir::new().unwrap();
    let file = write_spool(&dir, "events-20260101.json", &["a1", "a2", "a3"]);

    let transport = MockTransport::new();
    let shipper = shipper(&dir, 10, transport.clone());
    shipper.ship_logs().await;
    assert_eq!(transport.delivered_records(), vec!["a1", "a2", "a3"]);

    // The writer re-created the file with fresh content behind our offset.
    fs::write(&file, b"b1\n").unwrap();

    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::CaughtUp);
    assert_eq!(transport.delivered_records(), vec!["a1", "a2", "a3", "b1"]);
}

#[tokio::test]
async fn bookmarked_file_rotated_away_advances_to_the_next() {
    let dir = TempDir::new().unwrap();
    let gone = dir.path().join("events-20260101.json");
    let newer = write_spool(&dir, "events-20260102.json", &["b1"]);

    let transport = MockTransport::new();
    let shipper = shipper(&dir, 10, transport.clone());

    let mut bookmark = Bookmark::acquire(shipper.bookmark_path()).unwrap();
    bookmark.update_file_and_position(&gone, 57).unwrap();
    drop(bookmark);

    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::CaughtUp);
    assert_eq!(transport.delivered_records(), vec!["b1"]);

    let bookmark = Bookmark::acquire(shipper.bookmark_path()).unwrap();
    assert_eq!(bookmark.file_name(), Some(newer.as_path()));
}

#[tokio::test]
async fn empty_spool_directory_is_an_idle_cycle() {
    let dir = TempDir::new().unwrap();

    let transport = MockTransport::new();
    let shipper = shipper(&dir, 10, transport.clone());

    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::Idle);
    assert_eq!(report.records, 0);
    assert!(transport.attempts().is_empty());
}

#[tokio::test]
#[cfg(unix)]
async fn cycle_is_skipped_while_another_instance_holds_the_bookmark() {
    let dir = TempDir::new().unwrap();
    write_spool(&dir, "events-20260101.json", &["a1"]);

    let transport = MockTransport::new();
    let shipper = shipper(&dir, 10, transport.clone());

    let held = Bookmark::acquire(shipper.bookmark_path()).unwrap();
    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::BookmarkHeld);
    assert!(transport.attempts().is_empty());

    drop(held);
    let report = shipper.ship_logs().await;
    assert_eq!(report.end, CycleEnd::CaughtUp);
    assert_eq!(transport.delivered_records(), vec!["a1"]);
}

#[tokio::test]
async fn error_handler_receives_send_failures() {
    let dir = TempDir::new().unwrap();
    write_spool(&dir, "events-20260101.json", &["a1", "a2"]);

    let messages: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();

    let transport = MockTransport::new();
    transport.reject_next(1);
    let shipper = Shipper::new(&base_path(&dir), 10, transport.clone())
        .unwrap()
        .with_error_handler(Arc::new(move |message, _cause| {
            sink.lock().unwrap().push(message.to_string());
        }));

    shipper.ship_logs().await;
    let seen = messages.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("2 of 2 records failed"));
}
