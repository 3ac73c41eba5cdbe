//! Operator commands against executions driven through the full pipeline.

mod common;

use common::{flaky_step, ok_step, Harness};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use stepflow_core::config::StepflowConfig;
use stepflow_core::models::{StepDefinition, WorkflowDefinition};
use stepflow_core::orchestration::{typed_step, CommandError, StepFailure};
use stepflow_core::WorkflowStatus;

#[derive(Deserialize)]
struct Order {
    qty: i64,
}

fn orders_workflow(second: StepDefinition) -> WorkflowDefinition {
    WorkflowDefinition::builder("orders")
        .step(StepDefinition::new(1, "reserve", ok_step()))
        .step(second)
        .step(StepDefinition::new(3, "ship", ok_step()))
        .build()
        .expect("valid definition")
}

fn validate_quantity() -> StepDefinition {
    StepDefinition::new(
        2,
        "validate",
        typed_step(|order: Order| async move {
            if order.qty <= 0 {
                return Err(StepFailure::invalid_argument(format!(
                    "quantity must be positive, got {}",
                    order.qty
                )));
            }
            Ok(())
        }),
    )
}

#[tokio::test]
async fn test_fix_payload_and_resume_failed_execution() -> Result<(), Box<dyn std::error::Error>> {
    let mut harness = Harness::new(StepflowConfig::default(), vec![orders_workflow(validate_quantity())]);

    let execution_id = harness.start("orders", json!({"qty": 0})).await;
    harness.drain("orders").await;
    let failed = harness.record(&execution_id).await;
    assert_eq!(failed.status, WorkflowStatus::Failed);
    assert_eq!(failed.current_step, 2);

    let change = harness
        .commands
        .update_payload_field(&execution_id, "qty", json!(3), "ops", Some("customer called".to_string()))
        .await?;
    assert_eq!(change.old_value, Some(json!(0)));

    let resumed = harness.commands.resume(&execution_id, None, "ops").await?;
    assert_eq!(resumed.status, WorkflowStatus::InProgress);
    harness.drain("orders").await;

    let record = harness.record(&execution_id).await;
    assert_eq!(record.status, WorkflowStatus::Completed);
    assert_eq!(record.payload["qty"], 3);
    assert!(record.payload_history.is_empty());
    assert_eq!(record.execution_attempts.len(), 2);

    let first = &record.execution_attempts[0];
    assert_eq!(first.result, Some(WorkflowStatus::Failed));
    assert!(first.resumed_by.is_none());

    let second = &record.execution_attempts[1];
    assert_eq!(second.attempt_number, 2);
    assert_eq!(second.start_step, 2);
    assert_eq!(second.result, Some(WorkflowStatus::Completed));
    assert_eq!(second.resumed_by.as_deref(), Some("ops"));
    assert_eq!(second.payload_changes.len(), 1);
    assert_eq!(
        second.payload_changes[0].reason.as_deref(),
        Some("customer called")
    );

    assert_eq!(harness.messages("orders.completed").await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_resume_retry_pending_moves_pending_changes() -> Result<(), Box<dyn std::error::Error>> {
    let calls = Arc::new(AtomicU32::new(0));
    let mut harness = Harness::new(
        StepflowConfig::default(),
        vec![orders_workflow(StepDefinition::new(2, "charge", flaky_step(1, calls)))],
    );

    let execution_id = harness.start("orders", json!({"card": {"last4": "0000"}})).await;
    harness.drain("orders").await;
    assert_eq!(
        harness.record(&execution_id).await.status,
        WorkflowStatus::RetryPending
    );

    harness
        .commands
        .update_payload_field(&execution_id, "card.last4", json!("4242"), "ops", None)
        .await?;
    harness
        .commands
        .update_payload_field(&execution_id, "card.expiry", json!("12/30"), "ops", None)
        .await?;

    let resumed = harness.commands.resume(&execution_id, None, "ops").await?;
    assert_eq!(resumed.execution_id, execution_id);
    assert_eq!(resumed.topic, "orders");
    assert!(resumed.payload_history.is_empty());
    assert_eq!(resumed.execution_attempts.len(), 2);
    assert_eq!(
        resumed.execution_attempts[0].result,
        Some(WorkflowStatus::RetryPending)
    );
    let attempt = resumed.current_attempt().expect("open attempt");
    assert_eq!(attempt.attempt_number, 2);
    assert_eq!(attempt.payload_changes.len(), 2);
    assert_eq!(attempt.payload_changes[1].old_value, None);

    let sent = harness.messages("orders").await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload["card"]["last4"], "4242");
    assert!(sent[0].retry_info.is_none());
    Ok(())
}

#[tokio::test]
async fn test_cancel_completed_execution_conflicts() -> Result<(), Box<dyn std::error::Error>> {
    let mut harness = Harness::new(
        StepflowConfig::default(),
        vec![orders_workflow(StepDefinition::new(2, "charge", ok_step()))],
    );
    let execution_id = harness.start("orders", json!({})).await;
    harness.drain("orders").await;

    let before = harness.record(&execution_id).await;
    assert_eq!(before.status, WorkflowStatus::Completed);

    let err = harness.commands.cancel(&execution_id).await.unwrap_err();
    assert!(err.is_conflict());
    assert!(matches!(
        err,
        CommandError::InvalidState {
            status: WorkflowStatus::Completed,
            ..
        }
    ));
    assert_eq!(harness.record(&execution_id).await, before);
    Ok(())
}

#[tokio::test]
async fn test_cancel_is_a_state_flag_only() -> Result<(), Box<dyn std::error::Error>> {
    let calls = Arc::new(AtomicU32::new(0));
    let mut harness = Harness::new(
        StepflowConfig::default(),
        vec![orders_workflow(StepDefinition::new(2, "charge", flaky_step(1, calls)))],
    );
    let execution_id = harness.start("orders", json!({})).await;
    harness.drain("orders").await;

    let sends_before = harness.broker.send_call_count();
    let cancelled = harness.commands.cancel(&execution_id).await?;
    assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
    assert_eq!(harness.broker.send_call_count(), sends_before);

    // The pending retry still runs to completion, but the record stays cancelled
    harness.redeliver_retries("orders").await;
    harness.drain("orders").await;
    assert_eq!(harness.messages("orders.completed").await.len(), 1);

    let record = harness.record(&execution_id).await;
    assert_eq!(record.status, WorkflowStatus::Cancelled);

    let err = harness.commands.cancel(&execution_id).await.unwrap_err();
    assert!(err.is_conflict());
    let err = harness.commands.resume(&execution_id, None, "ops").await.unwrap_err();
    assert!(err.is_conflict());
    Ok(())
}
