use agent_switchboard::journal::writer::JsonlJournalWriter;
use agent_switchboard::journal::{record_quietly, JournalEntry, JournalEvent, RoutingJournal};
use chrono::Utc;

fn lines(dir: &std::path::Path) -> Vec<serde_json::Value> {
    let path = JsonlJournalWriter::path_for(dir, Utc::now().date_naive());
    std::fs::read_to_string(path)
        .expect("journal file")
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect()
}

#[test]
fn creates_directory_and_daily_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal_dir = dir.path().join("journal");
    let writer = JsonlJournalWriter::new(journal_dir.clone()).expect("writer");

    writer
        .record(JournalEntry::new(JournalEvent::Dispatched))
        .expect("record");

    let name = format!("routing-{}.jsonl", Utc::now().date_naive());
    assert!(journal_dir.join(name).exists());
}

#[test]
fn entries_append_one_per_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = JsonlJournalWriter::new(dir.path().to_path_buf()).expect("writer");

    writer
        .record(
            JournalEntry::new(JournalEvent::Dispatched)
                .with_task(Some("t-1"))
                .with_source("a.json")
                .with_worker("drafter", "router/type")
                .with_matched(Some("email")),
        )
        .expect("record");
    writer
        .record(
            JournalEntry::new(JournalEvent::Unroutable)
                .with_task(None)
                .with_detail("unroutable: nothing matched"),
        )
        .expect("record");

    let entries = lines(dir.path());
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["event"], "dispatched");
    assert_eq!(entries[0]["worker"], "drafter");
    assert_eq!(entries[0]["strategy"], "router/type");
    assert_eq!(entries[0]["matched"], "email");
    assert_eq!(entries[1]["event"], "unroutable");
    assert!(entries[1].get("task_id").is_none());
    assert!(entries[1].get("worker").is_none());
}

#[test]
fn reopening_appends_to_existing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    for _ in 0..2 {
        let writer = JsonlJournalWriter::new(dir.path().to_path_buf()).expect("writer");
        writer
            .record(JournalEntry::new(JournalEvent::Reconciled).with_workflow("wf-1"))
            .expect("record");
    }
    let entries = lines(dir.path());
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1]["workflow_id"], "wf-1");
}

#[test]
fn record_quietly_tolerates_missing_journal() {
    record_quietly(None, JournalEntry::new(JournalEvent::Unmatched));

    let dir = tempfile::tempdir().expect("tempdir");
    let writer = JsonlJournalWriter::new(dir.path().to_path_buf()).expect("writer");
    record_quietly(Some(&writer), JournalEntry::new(JournalEvent::Unmatched));
    assert_eq!(lines(dir.path()).len(), 1);
}

#[test]
fn reopened_writer_appends_to_todays_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    for _ in 0..2 {
        let writer = JsonlJournalWriter::new(dir.path().to_path_buf()).expect("writer");
        writer
            .record(JournalEntry::new(JournalEvent::Dispatched).with_task(Some("t-1")))
            .expect("record");
    }

    let entries = lines(dir.path());
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e["task_id"] == "t-1"));
}
