//! Multi-step workflow sequencing.
//!
//! Steps are released only when their dependency is done. A failed step
//! skips everything downstream of it, and the parent task settles once
//! every step is terminal.

use agent_switchboard::models::envelope::{MailboxEnvelope, Provenance};
use agent_switchboard::models::task::{Task, TaskStatus};
use agent_switchboard::models::workflow::{StepStatus, WorkflowSubtask};
use agent_switchboard::orchestrator::reconciler::ReconcileOutcome;
use serde_json::json;

use super::test_helpers::Harness;

fn sub(agent: &str, description: &str, depends_on: Option<usize>) -> WorkflowSubtask {
    WorkflowSubtask {
        agent: agent.into(),
        description: description.into(),
        depends_on,
        parent_task_id: None,
        source_name: None,
    }
}

fn provenance() -> Provenance {
    Provenance::named("decomposer", "store")
}

async fn step_result(
    h: &Harness,
    name: &str,
    parent: Option<&str>,
    workflow_id: &str,
    step_index: usize,
    status: &str,
) -> Option<TaskStatus> {
    let path = h.write_result(
        name,
        &json!({
            "agent": "worker",
            "task_id": parent,
            "workflow_id": workflow_id,
            "step_index": step_index,
            "status": status,
            "result": format!("step {step_index} {status}"),
        }),
    );
    match h.reconciler().reconcile_file(&path).await.expect("reconcile") {
        ReconcileOutcome::Reconciled(report) => report.lifecycle,
        other => panic!("expected reconciled, got {other:?}"),
    }
}

#[tokio::test]
async fn chain_releases_one_step_at_a_time() {
    let h = Harness::new().await;
    let parent = h.stored_task(None, "research then write").await;
    let parent_id = parent.id.clone().expect("id");

    let progress = h
        .dispatcher
        .dispatch_workflow(
            &parent,
            &[sub("researcher", "gather", None), sub("drafter", "write", Some(0))],
            &provenance(),
        )
        .await
        .expect("launch");
    let wf_id = progress.workflow.id.clone();

    assert_eq!(progress.released.len(), 1);
    assert_eq!(h.mailbox.pending_count("researcher").await.expect("count"), 1);
    assert_eq!(h.mailbox.pending_count("drafter").await.expect("count"), 0);
    assert_eq!(h.tasks.status(&parent_id).await.expect("status"), TaskStatus::InProgress);

    let envelope: MailboxEnvelope =
        serde_json::from_slice(&std::fs::read(&progress.released[0].path).expect("read"))
            .expect("envelope");
    assert_eq!(envelope.step_index, Some(0));
    assert_eq!(envelope.parent_task_id.as_deref(), Some(parent_id.as_str()));
    assert_eq!(envelope.task.description.as_deref(), Some("gather"));

    let lifecycle = step_result(&h, "s0.json", Some(&parent_id), &wf_id, 0, "done").await;
    assert!(lifecycle.is_none(), "parent stays open while steps remain");
    assert_eq!(h.mailbox.pending_count("drafter").await.expect("count"), 1);
    assert_eq!(h.tasks.status(&parent_id).await.expect("status"), TaskStatus::InProgress);

    let lifecycle = step_result(&h, "s1.json", Some(&parent_id), &wf_id, 1, "done").await;
    assert_eq!(lifecycle, Some(TaskStatus::Done));

    let task = h.tasks.get(&parent_id).await.expect("task");
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.updates.len(), 2);
    assert_eq!(task.updates[1].step_index, Some(1));
    assert_eq!(task.updates[1].workflow_id.as_deref(), Some(wf_id.as_str()));
}

#[tokio::test]
async fn failed_step_skips_dependents_and_errors_parent() {
    let h = Harness::new().await;
    let parent = h.stored_task(None, "three steps").await;
    let parent_id = parent.id.clone().expect("id");

    let progress = h
        .dispatcher
        .dispatch_workflow(
            &parent,
            &[
                sub("researcher", "gather", None),
                sub("drafter", "write", Some(0)),
                sub("drafter", "notify", None),
            ],
            &provenance(),
        )
        .await
        .expect("launch");
    let wf_id = progress.workflow.id.clone();
    assert_eq!(progress.released.len(), 2);

    let lifecycle = step_result(&h, "s0.json", Some(&parent_id), &wf_id, 0, "error").await;
    assert!(lifecycle.is_none(), "step 2 is still running");

    let wf = h.dispatcher.workflows().get(&wf_id).await.expect("workflow");
    assert_eq!(wf.steps[0].status, StepStatus::Error);
    assert_eq!(wf.steps[1].status, StepStatus::Skipped);
    assert_eq!(wf.steps[2].status, StepStatus::Dispatched);

    let lifecycle = step_result(&h, "s2.json", Some(&parent_id), &wf_id, 2, "done").await;
    assert_eq!(lifecycle, Some(TaskStatus::Error));
    assert_eq!(h.mailbox.pending_count("drafter").await.expect("count"), 1);
}

#[tokio::test]
async fn duplicate_step_result_changes_nothing() {
    let h = Harness::new().await;
    let parent = h.stored_task(None, "two steps").await;
    let parent_id = parent.id.clone().expect("id");
    let progress = h
        .dispatcher
        .dispatch_workflow(
            &parent,
            &[sub("researcher", "gather", None), sub("drafter", "write", Some(0))],
            &provenance(),
        )
        .await
        .expect("launch");
    let wf_id = progress.workflow.id.clone();

    step_result(&h, "a.json", Some(&parent_id), &wf_id, 0, "done").await;
    step_result(&h, "b.json", Some(&parent_id), &wf_id, 0, "error").await;

    let wf = h.dispatcher.workflows().get(&wf_id).await.expect("workflow");
    assert_eq!(wf.steps[0].status, StepStatus::Done);
    assert_eq!(wf.steps[1].status, StepStatus::Dispatched);
    assert_eq!(h.mailbox.pending_count("drafter").await.expect("count"), 1, "not released twice");
    assert_eq!(h.tasks.status(&parent_id).await.expect("status"), TaskStatus::InProgress);
}

#[tokio::test]
async fn advance_reports_duplicates() {
    let h = Harness::new().await;
    let progress = h
        .dispatcher
        .dispatch_workflow(
            &Task::new(None, "no durable parent"),
            &[sub("researcher", "a", None), sub("drafter", "b", None)],
            &provenance(),
        )
        .await
        .expect("launch");
    let wf_id = progress.workflow.id;

    let first = h.dispatcher.advance_workflow(&wf_id, 0, true).await.expect("advance");
    assert!(!first.duplicate);
    assert!(!first.is_complete());

    let again = h.dispatcher.advance_workflow(&wf_id, 0, false).await.expect("advance");
    assert!(again.duplicate);

    let last = h.dispatcher.advance_workflow(&wf_id, 1, true).await.expect("advance");
    assert!(last.is_complete());
    assert!(!last.has_failures());

    assert!(h.dispatcher.advance_workflow(&wf_id, 7, true).await.is_err());
    assert!(h.dispatcher.advance_workflow("nope", 0, true).await.is_err());
}

#[tokio::test]
async fn orphan_step_results_still_drive_the_workflow() {
    let h = Harness::new().await;
    let progress = h
        .dispatcher
        .dispatch_workflow(
            &Task::new(None, "file task"),
            &[sub("researcher", "gather", None), sub("drafter", "write", Some(0))],
            &provenance(),
        )
        .await
        .expect("launch");

    step_result(&h, "s0.json", None, &progress.workflow.id, 0, "done").await;
    assert_eq!(h.mailbox.pending_count("drafter").await.expect("count"), 1);
}

#[tokio::test]
async fn undeliverable_workflow_closes_parent_as_error() {
    let h = Harness::new().await;
    let parent = h.stored_task(None, "doomed").await;
    let parent_id = parent.id.clone().expect("id");

    let progress = h
        .dispatcher
        .dispatch_workflow(
            &parent,
            &[sub("ghost", "a", None), sub("drafter", "b", Some(0))],
            &provenance(),
        )
        .await
        .expect("launch");

    assert!(progress.released.is_empty());
    assert_eq!(progress.skipped, vec![1]);
    assert!(progress.is_complete());
    assert_eq!(h.tasks.status(&parent_id).await.expect("status"), TaskStatus::Error);
}

#[tokio::test]
async fn empty_workflow_is_rejected() {
    let h = Harness::new().await;
    let result = h
        .dispatcher
        .dispatch_workflow(&Task::new(None, "x"), &[], &provenance())
        .await;
    assert!(result.is_err());
}
