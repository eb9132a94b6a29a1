mod common;

use common::*;
use serde_json::json;
use tessera::audit::{AuditAction, ExecutionReport, ExecutionStatus, ThreadState};
use tessera::config::RedeployPolicy;
use tessera::entitlement::{PlanStatus, Role};
use tessera::repository::{AuditRepository, WorkflowRepository, WorkflowStatus};
use tessera::workflow::WorkflowSpecification;

async fn create(h: &Harness, spec: WorkflowSpecification) -> String {
    let result = h.orchestrator.create_workflow(&admin(), "Lead intake", spec).await;
    assert!(result.success, "create failed: {:?}", result.error);
    result.data.unwrap().id
}

#[tokio::test]
async fn test_deploy_denied_by_canceled_plan_has_no_side_effects() {
    let h = harness(PlanStatus::Canceled, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;
    let audit_before = h.repository.count_audit_events(ORG).await.unwrap();

    let result = h.orchestrator.deploy(&id, &admin()).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("plan"));
    assert_eq!(h.repository.count_audit_events(ORG).await.unwrap(), audit_before);
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn test_deploy_denied_for_non_admin_role() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;

    for role in [Role::Viewer, Role::Developer, Role::Approver] {
        let result = h.orchestrator.deploy(&id, &user("someone", ORG, role)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("role"));
    }
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn test_past_due_plan_is_still_entitled() {
    let h = harness(PlanStatus::PastDue, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;
    assert!(h.orchestrator.deploy(&id, &admin()).await.success);
}

#[tokio::test]
async fn test_deploy_happy_path() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;

    let result = h.orchestrator.deploy(&id, &admin()).await;
    assert!(result.success, "deploy failed: {:?}", result.error);
    let receipt = result.data.unwrap();

    assert_eq!(
        h.engine.operations(),
        vec!["create", "activate", "get", "deactivate", "activate"]
    );
    assert_eq!(h.engine.calls()[0], "create:TESSERA_Lead_intake");
    assert_eq!(receipt.engine_workflow_id, "eng-1");
    assert_eq!(receipt.version, 2);
    assert_eq!(
        receipt.trigger_url.as_deref(),
        Some("https://hooks.example/webhook/eng-1/in")
    );
    assert!(receipt.previous_engine_workflow_id.is_none());

    let record = h.repository.get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Deployed);
    assert_eq!(record.version, 2);
    assert_eq!(record.engine_workflow_id.as_deref(), Some("eng-1"));

    let graph = h.engine.graph("eng-1").unwrap();
    assert_eq!(graph.nodes.len(), 2);
    for node in &graph.nodes {
        assert_eq!(node.parameters["correlationId"], json!(id));
        assert_eq!(
            node.parameters["callbackUrl"],
            json!(format!("{}/{}", CALLBACK_BASE, id))
        );
    }
    assert_eq!(graph.settings.execution_timeout_seconds, 30);

    let history = h.orchestrator.audit().workflow_history(&id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.action, AuditAction::Deployed);
    assert_eq!(last.payload["previousStatus"], "draft");
    assert_eq!(last.payload["newStatus"], "deployed");
    assert_eq!(last.payload["engineWorkflowId"], "eng-1");
}

#[tokio::test]
async fn test_redeploy_retains_previous_remote_workflow() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;

    assert!(h.orchestrator.deploy(&id, &admin()).await.success);
    let second = h.orchestrator.deploy(&id, &admin()).await.data.unwrap();

    assert_eq!(second.engine_workflow_id, "eng-2");
    assert_eq!(second.previous_engine_workflow_id.as_deref(), Some("eng-1"));
    assert_eq!(second.version, 3);
    assert_eq!(h.engine.count("delete"), 0);
    assert!(h.engine.graph("eng-1").is_some());
}

#[tokio::test]
async fn test_redeploy_can_delete_previous_remote_workflow() {
    let h = harness(PlanStatus::Active, RedeployPolicy::DeletePrevious).await;
    let id = create(&h, webhook_spec()).await;

    assert!(h.orchestrator.deploy(&id, &admin()).await.success);
    let second = h.orchestrator.deploy(&id, &admin()).await.data.unwrap();

    assert_eq!(second.engine_workflow_id, "eng-2");
    assert!(h.engine.calls().contains(&"delete:eng-1".to_string()));
    assert!(h.engine.graph("eng-1").is_none());
}

#[tokio::test]
async fn test_transient_engine_failure_is_retried() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;
    h.engine.fail_next("activate", 2, 503);

    let result = h.orchestrator.deploy(&id, &admin()).await;

    assert!(result.success, "deploy failed: {:?}", result.error);
    // two failed first activations, one success, one reactivation
    assert_eq!(h.engine.count("activate"), 4);
    assert_eq!(h.engine.count("create"), 1);
}

#[tokio::test]
async fn test_exhausted_create_fails_without_orphan_note() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;
    h.engine.fail_next("create", 3, 500);

    let result = h.orchestrator.deploy(&id, &admin()).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("500"));
    assert!(!error.contains("manual cleanup"));
    assert_eq!(h.engine.operations(), vec!["create", "create", "create"]);

    let record = h.repository.get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Draft);
    assert_eq!(record.version, 1);
}

#[tokio::test]
async fn test_failure_after_create_reports_orphan() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;
    h.engine.fail_next("get", 3, 502);

    let result = h.orchestrator.deploy(&id, &admin()).await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("502"));
    assert!(error.contains("eng-1"));
    assert!(error.contains("manual cleanup"));
    // remote side effects are not rolled back
    assert_eq!(h.engine.count("delete"), 0);
    assert_eq!(
        h.repository.get_workflow(&id).await.unwrap().unwrap().status,
        WorkflowStatus::Draft
    );
}

#[tokio::test]
async fn test_undeployable_spec_never_reaches_engine() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let spec: WorkflowSpecification = serde_json::from_value(json!({
        "version": "1",
        "nodes": [{ "id": "a", "name": "Only action", "type": "ACTION",
                    "data": { "type": "HTTP_REQUEST", "url": "https://e.com" } }]
    }))
    .unwrap();
    let id = create(&h, spec).await;

    let result = h.orchestrator.deploy(&id, &admin()).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("E004"));
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn test_structurally_invalid_spec_is_not_stored() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let spec: WorkflowSpecification = serde_json::from_value(json!({
        "version": "1",
        "nodes": [{ "id": "t", "name": "T", "type": "TRIGGER", "data": { "type": "WEBHOOK" } }],
        "edges": [{ "id": "e", "source": "t", "target": "ghost" }]
    }))
    .unwrap();

    let result = h.orchestrator.create_workflow(&admin(), "Broken", spec).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("E002"));
    assert_eq!(h.repository.count_audit_events(ORG).await.unwrap(), 0);
}

#[tokio::test]
async fn test_secret_parameters_are_resolved_into_static_data() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let mut spec = webhook_spec();
    spec.parameters = Some(
        serde_json::from_value(json!([
            { "key": "SLACK_TOKEN", "label": "Slack token", "type": "secret", "required": true },
            { "key": "OPTIONAL_KEY", "label": "Optional", "type": "secret", "required": false }
        ]))
        .unwrap(),
    );
    let id = create(&h, spec).await;

    let missing = h.orchestrator.deploy(&id, &admin()).await;
    assert!(!missing.success);
    assert!(missing.error.unwrap().contains("SLACK_TOKEN"));
    assert!(h.engine.calls().is_empty());

    h.orchestrator
        .secrets()
        .store(ORG, "SLACK_TOKEN", "xoxb-secret")
        .await
        .unwrap();
    let result = h.orchestrator.deploy(&id, &admin()).await;
    assert!(result.success, "deploy failed: {:?}", result.error);

    let graph = h.engine.graph("eng-1").unwrap();
    assert_eq!(
        graph.static_data,
        Some(json!({ "parameters": { "SLACK_TOKEN": "xoxb-secret" } }))
    );
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;
    assert!(h.orchestrator.deploy(&id, &admin()).await.success);

    let first = h.orchestrator.delete(&id, &admin()).await;
    assert!(first.success);
    assert_eq!(first.data, Some(true));
    assert!(h.engine.calls().contains(&"delete:eng-1".to_string()));
    assert!(h.repository.get_workflow(&id).await.unwrap().is_none());
    assert_eq!(h.repository.count_audit_events(ORG).await.unwrap(), 0);

    let second = h.orchestrator.delete(&id, &admin()).await;
    assert!(second.success);
    assert_eq!(second.data, Some(false));
}

#[tokio::test]
async fn test_remote_delete_failure_is_swallowed() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;
    assert!(h.orchestrator.deploy(&id, &admin()).await.success);
    h.engine.fail_next("delete", 1, 500);

    let result = h.orchestrator.delete(&id, &admin()).await;

    assert!(result.success);
    assert!(h.repository.get_workflow(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_four_eyes_approval_and_edit_resets_to_draft() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let developer = user("dev-1", ORG, Role::Developer);
    let created = h
        .orchestrator
        .create_workflow(&developer, "Reviewed flow", webhook_spec())
        .await
        .data
        .unwrap();

    let self_approval = h.orchestrator.approve(&created.id, &developer).await;
    assert!(!self_approval.success);

    let approver = user("approver-1", ORG, Role::Approver);
    let approved = h.orchestrator.approve(&created.id, &approver).await;
    assert!(approved.success, "approve failed: {:?}", approved.error);
    assert_eq!(approved.data.unwrap().status, WorkflowStatus::Approved);

    let again = h.orchestrator.approve(&created.id, &approver).await;
    assert!(!again.success);

    let edited = h
        .orchestrator
        .update_specification(&created.id, &developer, webhook_spec())
        .await;
    assert!(edited.success);
    assert_eq!(edited.data.unwrap().status, WorkflowStatus::Draft);

    let actions: Vec<AuditAction> = h
        .orchestrator
        .audit()
        .workflow_history(&created.id)
        .await
        .unwrap()
        .into_iter()
        .map(|event| event.action)
        .collect();
    assert_eq!(
        actions,
        vec![AuditAction::Created, AuditAction::Approved, AuditAction::Updated]
    );
}

#[tokio::test]
async fn test_creator_admin_cannot_approve_own_workflow() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;

    assert!(!h.orchestrator.approve(&id, &admin()).await.success);
    assert!(h.orchestrator.approve(&id, &user("admin-2", ORG, Role::Admin)).await.success);
}

#[tokio::test]
async fn test_approved_workflow_can_be_deployed() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;
    assert!(h.orchestrator.approve(&id, &user("approver-1", ORG, Role::Approver)).await.success);

    let result = h.orchestrator.deploy(&id, &admin()).await;
    assert!(result.success);

    let history = h.orchestrator.audit().workflow_history(&id).await.unwrap();
    assert_eq!(history.last().unwrap().payload["previousStatus"], "approved");
}

#[tokio::test]
async fn test_pause_and_resume() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;

    let early = h.orchestrator.pause(&id, &admin()).await;
    assert!(!early.success);

    assert!(h.orchestrator.deploy(&id, &admin()).await.success);

    let paused = h.orchestrator.pause(&id, &admin()).await;
    assert!(paused.success, "pause failed: {:?}", paused.error);
    assert_eq!(paused.data.unwrap().status, WorkflowStatus::Paused);
    assert_eq!(h.engine.calls().last().unwrap(), "deactivate:eng-1");

    let viewer = h.orchestrator.resume(&id, &user("viewer-1", ORG, Role::Viewer)).await;
    assert!(!viewer.success);

    let resumed = h.orchestrator.resume(&id, &admin()).await;
    assert!(resumed.success);
    assert_eq!(resumed.data.unwrap().status, WorkflowStatus::Deployed);
    assert_eq!(h.engine.calls().last().unwrap(), "activate:eng-1");

    let actions: Vec<AuditAction> = h
        .orchestrator
        .audit()
        .workflow_history(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|event| event.action)
        .collect();
    assert_eq!(&actions[actions.len() - 2..], &[AuditAction::Paused, AuditAction::Resumed]);
}

#[tokio::test]
async fn test_other_organization_cannot_see_workflow() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;
    let outsider = user("outsider", OTHER_ORG, Role::Admin);

    let read = h.orchestrator.get_workflow(&id, &outsider).await;
    assert!(!read.success);
    assert!(read.error.unwrap().contains("not found"));

    assert!(!h.orchestrator.deploy(&id, &outsider).await.success);
    assert!(!h.orchestrator.delete(&id, &outsider).await.success);
    assert!(h.repository.get_workflow(&id).await.unwrap().is_some());
    assert!(h.orchestrator.list_workflows(&outsider).await.data.unwrap().is_empty());
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn test_create_from_template() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;

    let created = h
        .orchestrator
        .create_from_template(&admin(), "slack-notif", None)
        .await;
    assert!(created.success);
    let record = created.data.unwrap();
    assert_eq!(record.name, "My slack notif");
    assert_eq!(record.status, WorkflowStatus::Draft);

    let unknown = h
        .orchestrator
        .create_from_template(&admin(), "does-not-exist", Some("x"))
        .await;
    assert!(!unknown.success);
}

#[tokio::test]
async fn test_execution_callbacks_thread_under_start() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;

    let start = ExecutionReport {
        status: ExecutionStatus::Running,
        execution_id: "exec-1".to_string(),
        error: None,
    };
    let start_id = h.orchestrator.record_execution(&id, &start).await.unwrap();

    let failed = ExecutionReport {
        status: ExecutionStatus::Failure,
        execution_id: "exec-1".to_string(),
        error: Some("timeout".to_string()),
    };
    let failed_id = h.orchestrator.record_execution(&id, &failed).await.unwrap();
    let duplicate = h.orchestrator.record_execution(&id, &failed).await.unwrap();
    assert_eq!(failed_id, duplicate);

    let thread = h
        .orchestrator
        .audit()
        .execution_thread(&id, "exec-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thread.start.id, start_id);
    assert_eq!(thread.completion.as_ref().unwrap().parent_id.as_deref(), Some(start_id.as_str()));
    assert_eq!(thread.completion.as_ref().unwrap().payload["errorMessage"], "timeout");
    assert_eq!(thread.state(), ThreadState::Failed);
}

#[tokio::test]
async fn test_completion_without_start_synthesizes_start() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;

    let success = ExecutionReport {
        status: ExecutionStatus::Success,
        execution_id: "exec-2".to_string(),
        error: None,
    };
    h.orchestrator.record_execution(&id, &success).await.unwrap();

    let thread = h
        .orchestrator
        .audit()
        .execution_thread(&id, "exec-2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thread.start.payload["synthesized"], true);
    assert_eq!(thread.state(), ThreadState::Succeeded);

    let pending = ExecutionReport {
        status: ExecutionStatus::Running,
        execution_id: "exec-3".to_string(),
        error: None,
    };
    h.orchestrator.record_execution(&id, &pending).await.unwrap();
    let thread = h
        .orchestrator
        .audit()
        .execution_thread(&id, "exec-3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thread.state(), ThreadState::Pending);

    let unknown = h.orchestrator.record_execution("no-such-deployment", &pending).await;
    assert!(unknown.is_err());
}

#[tokio::test]
async fn test_concurrent_start_and_completion_share_one_start() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;

    let start = ExecutionReport {
        status: ExecutionStatus::Running,
        execution_id: "exec-4".to_string(),
        error: None,
    };
    let success = ExecutionReport {
        status: ExecutionStatus::Success,
        execution_id: "exec-4".to_string(),
        error: None,
    };
    let (start_id, success_id) = tokio::join!(
        h.orchestrator.record_execution(&id, &start),
        h.orchestrator.record_execution(&id, &success),
    );
    let (start_id, success_id) = (start_id.unwrap(), success_id.unwrap());

    let history = h.orchestrator.audit().workflow_history(&id).await.unwrap();
    let starts: Vec<_> = history
        .iter()
        .filter(|event| event.action == AuditAction::ExecutionStart)
        .collect();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].id, start_id);

    let completion = history.iter().find(|event| event.id == success_id).unwrap();
    assert_eq!(completion.parent_id.as_deref(), Some(start_id.as_str()));
}

#[tokio::test]
async fn test_execution_ids_are_scoped_per_workflow() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let first = create(&h, webhook_spec()).await;
    let second = create(&h, webhook_spec()).await;

    let report = ExecutionReport {
        status: ExecutionStatus::Running,
        execution_id: "exec-5".to_string(),
        error: None,
    };
    let first_start = h.orchestrator.record_execution(&first, &report).await.unwrap();
    let second_start = h.orchestrator.record_execution(&second, &report).await.unwrap();
    assert_ne!(first_start, second_start);

    let thread = h
        .orchestrator
        .audit()
        .execution_thread(&second, "exec-5")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thread.start.id, second_start);
}

#[tokio::test]
async fn test_edit_during_deploy_waits_for_commit() {
    let mut config = fast_deploy_config(RedeployPolicy::Retain);
    config.settle_delay_ms = 300;
    let h = harness_with(PlanStatus::Active, config).await;
    let id = create(&h, webhook_spec()).await;

    let mut edited = serde_json::to_value(webhook_spec()).unwrap();
    edited["nodes"][1]["data"]["url"] = json!("https://new.example");
    let edited: WorkflowSpecification = serde_json::from_value(edited).unwrap();

    let deployer = admin();
    let (deployed, updated) = tokio::join!(h.orchestrator.deploy(&id, &deployer), async {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        h.orchestrator.update_specification(&id, &admin(), edited).await
    });
    assert!(deployed.success, "deploy failed: {:?}", deployed.error);
    assert!(updated.success, "update failed: {:?}", updated.error);
    assert_eq!(deployed.data.unwrap().version, 2);

    // the edit landed after the deploy committed, on top of its version
    let record = h.repository.get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(record.version, 3);
    let actions: Vec<AuditAction> = h
        .orchestrator
        .audit()
        .workflow_history(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|event| event.action)
        .collect();
    assert_eq!(
        actions,
        vec![AuditAction::Created, AuditAction::Deployed, AuditAction::Updated]
    );

    // the engine still runs the graph compiled from the deployed version
    let graph = h.engine.graph("eng-1").unwrap();
    let notify = graph.nodes.iter().find(|node| node.name == "Notify").unwrap();
    assert_eq!(notify.parameters["url"], "https://e.com");
}

#[tokio::test]
async fn test_edit_bumps_version() {
    let h = harness(PlanStatus::Active, RedeployPolicy::Retain).await;
    let id = create(&h, webhook_spec()).await;

    let updated = h
        .orchestrator
        .update_specification(&id, &admin(), webhook_spec())
        .await;
    assert_eq!(updated.data.unwrap().version, 2);

    let receipt = h.orchestrator.deploy(&id, &admin()).await.data.unwrap();
    assert_eq!(receipt.version, 3);
}
