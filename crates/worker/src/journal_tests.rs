// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn records_start_and_outcome() {
    let journal = Journal::new(8);
    journal.record_start(TaskId::new("t1"), "render", 1, 1_000);
    assert_eq!(journal.in_flight(), 1);

    journal.record_outcome(&TaskId::new("t1"), JournalOutcome::Completed, 1_500);
    let entries = journal.recent();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, JournalOutcome::Completed);
    assert_eq!(entries[0].finished_at_ms, Some(1_500));
    assert_eq!(journal.in_flight(), 0);
}

#[test]
fn outcome_for_unknown_task_is_ignored() {
    let journal = Journal::new(8);
    journal.record_outcome(&TaskId::new("ghost"), JournalOutcome::Completed, 1_000);
    assert!(journal.recent().is_empty());
}

#[test]
fn finalizes_latest_running_entry_for_retried_task() {
    let journal = Journal::new(8);
    journal.record_start(TaskId::new("t1"), "render", 1, 1_000);
    journal.record_outcome(&TaskId::new("t1"), JournalOutcome::Failed("boom".into()), 1_100);

    // Second attempt of the same task
    journal.record_start(TaskId::new("t1"), "render", 2, 2_000);
    journal.record_outcome(&TaskId::new("t1"), JournalOutcome::Completed, 2_100);

    let entries = journal.recent();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].outcome, JournalOutcome::Failed("boom".into()));
    assert_eq!(entries[1].attempt, 2);
    assert_eq!(entries[1].outcome, JournalOutcome::Completed);
}

#[test]
fn capacity_evicts_oldest() {
    let journal = Journal::new(3);
    for i in 0..5 {
        journal.record_start(TaskId::new(format!("t{}", i)), "render", 1, i);
    }
    let entries = journal.recent();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].task_id, "t2");
    assert_eq!(entries[2].task_id, "t4");
}
