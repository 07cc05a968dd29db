//! Smoke tests for the HTTP-facing handlers
//!
//! These drive the handlers with raw JSON bodies and check the status codes and
//! response shapes the host application forwards to clients.

use approval_engine::{
    ApprovalService,
    api::{Api, Session},
    directory::{InMemoryDirectory, Role},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::{TempDir, tempdir};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

const ORG: &str = "org_acme";

fn setup() -> (TempDir, Api) {
    let temp_dir = tempdir().unwrap();
    let db = sled::open(temp_dir.path().join("api.db")).unwrap();
    let directory = InMemoryDirectory::new()
        .with_member(ORG, "user_admin", Role::Admin)
        .with_member(ORG, "user_employee", Role::Employee)
        .with_member(ORG, "user_u1", Role::Manager)
        .with_member(ORG, "user_u2", Role::Manager);

    let service = ApprovalService::new(Arc::new(db), Arc::new(directory)).unwrap();
    (temp_dir, Api::new(service))
}

fn session(user_id: &str) -> Session {
    Session {
        user_id: user_id.to_string(),
        active_organization_id: Some(ORG.to_string()),
    }
}

fn create_sequential_rule(api: &Api) -> String {
    let body = json!({
        "userId": "user_employee",
        "ruleName": "Travel",
        "isSequential": true,
        "approvers": [
            { "userId": "user_u1", "sequenceOrder": 1 },
            { "userId": "user_u2", "sequenceOrder": 2 },
        ],
    });
    let res = api.create_rule(Some(&session("user_admin")), &body.to_string());
    assert_eq!(res.status, 201, "{}", res.body);
    res.body["rule"]["id"].as_str().unwrap().to_string()
}

fn create_request(api: &Api, rule_id: &str) -> String {
    let body = json!({ "approvalRuleId": rule_id }).to_string();
    let res = api.create_request(Some(&session("user_employee")), &body);
    assert_eq!(res.status, 201, "{}", res.body);
    res.body["request"]["id"].as_str().unwrap().to_string()
}

#[test]
fn create_request_returns_201_with_pending_actions() {
    let (_dir, api) = setup();
    let rule_id = create_sequential_rule(&api);

    let body = json!({ "approvalRuleId": rule_id }).to_string();
    let res = api.create_request(Some(&session("user_employee")), &body);

    assert_eq!(res.status, 201);
    assert_eq!(res.body["request"]["status"], "pending");
    assert_eq!(res.body["request"]["requestedById"], "user_employee");
    let actions = res.body["request"]["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 2);
    assert!(actions.iter().all(|a| a["action"] == "pending"));
}

#[test]
fn create_request_errors() {
    let (_dir, api) = setup();

    let res = api.create_request(None, r#"{ "approvalRuleId": "rule_x" }"#);
    assert_eq!(res.status, 401);

    let res = api.create_request(Some(&session("user_employee")), "{}");
    assert_eq!(res.status, 400);

    let res = api.create_request(Some(&session("user_employee")), "not json");
    assert_eq!(res.status, 400);

    let res = api.create_request(
        Some(&session("user_employee")),
        r#"{ "approvalRuleId": "rule_missing" }"#,
    );
    assert_eq!(res.status, 404);
    assert_eq!(res.body["kind"], "not_found");
}

#[test]
fn action_endpoint_status_codes() {
    let (_dir, api) = setup();
    let rule_id = create_sequential_rule(&api);
    let request_id = create_request(&api, &rule_id);
    let approve = r#"{ "action": "approved" }"#;

    assert_eq!(api.submit_action(None, &request_id, approve).status, 401);

    let res = api.submit_action(Some(&session("user_u1")), &request_id, r#"{ "action": "maybe" }"#);
    assert_eq!(res.status, 400);
    assert_eq!(res.body["kind"], "invalid_input");

    let res = api.submit_action(Some(&session("user_u1")), "req_missing", approve);
    assert_eq!(res.status, 404);

    let res = api.submit_action(Some(&session("user_employee")), &request_id, approve);
    assert_eq!(res.status, 403);

    let res = api.submit_action(Some(&session("user_u2")), &request_id, approve);
    assert_eq!(res.status, 400);
    assert_eq!(res.body["reason"], "out_of_sequence");

    let res = api.submit_action(
        Some(&session("user_u1")),
        &request_id,
        r#"{ "action": "approved", "notes": "fine by me" }"#,
    );
    assert_eq!(res.status, 200);
    assert_eq!(res.body, json!({ "success": true }));

    let res = api.submit_action(Some(&session("user_u1")), &request_id, approve);
    assert_eq!(res.status, 400);
    assert_eq!(res.body["reason"], "already_acted");

    let res = api.submit_action(Some(&session("user_u2")), &request_id, approve);
    assert_eq!(res.status, 200);

    let res = api.submit_action(Some(&session("user_u2")), &request_id, approve);
    assert_eq!(res.status, 400);
    assert_eq!(res.body["reason"], "already_processed");
}

#[test]
fn list_requests_shows_recorded_actions() {
    let (_dir, api) = setup();
    let rule_id = create_sequential_rule(&api);
    let request_id = create_request(&api, &rule_id);

    api.submit_action(
        Some(&session("user_u1")),
        &request_id,
        r#"{ "action": "rejected", "notes": "too expensive" }"#,
    );

    let res = api.list_requests(Some(&session("user_employee")));
    assert_eq!(res.status, 200);
    let request = &res.body["requests"][0];
    assert_eq!(request["status"], "rejected");
    let first: &Value = &request["actions"][0];
    assert_eq!(first["action"], "rejected");
    assert_eq!(first["notes"], "too expensive");
    assert!(first["actedAt"].is_string());
}

#[test]
fn rule_validation_errors_are_400() {
    let (_dir, api) = setup();
    let admin = session("user_admin");

    let missing_orders = json!({
        "userId": "user_employee",
        "ruleName": "Travel",
        "isSequential": true,
        "approvers": [{ "userId": "user_u1" }],
    });
    let res = api.create_rule(Some(&admin), &missing_orders.to_string());
    assert_eq!(res.status, 400);

    let missing_percentage = json!({
        "userId": "user_employee",
        "ruleName": "Expenses",
        "approvers": [{ "userId": "user_u1" }],
    });
    let res = api.create_rule(Some(&admin), &missing_percentage.to_string());
    assert_eq!(res.status, 400);

    let no_approvers = json!({
        "userId": "user_employee",
        "ruleName": "Expenses",
        "minimumApprovalPercentage": 50,
    });
    let res = api.create_rule(Some(&admin), &no_approvers.to_string());
    assert_eq!(res.status, 400);
}

#[test]
fn rule_crud_roundtrip() {
    let (_dir, api) = setup();
    let admin = session("user_admin");
    let rule_id = create_sequential_rule(&api);

    let res = api.get_rule(Some(&admin), &rule_id);
    assert_eq!(res.status, 200);
    assert_eq!(res.body["rule"]["isSequential"], true);
    assert!(res.body["rule"]["minimumApprovalPercentage"].is_null());
    assert_eq!(res.body["rule"]["approvers"][0]["approverId"], "user_u1");

    let patch = json!({ "isSequential": false, "minimumApprovalPercentage": 60 });
    let res = api.update_rule(Some(&admin), &rule_id, &patch.to_string());
    assert_eq!(res.status, 200, "{}", res.body);
    assert_eq!(res.body["rule"]["minimumApprovalPercentage"], 60);
    assert!(res.body["rule"]["approvers"][0]["sequenceOrder"].is_null());

    let res = api.update_rule(Some(&session("user_employee")), &rule_id, &patch.to_string());
    assert_eq!(res.status, 403);

    let res = api.list_rules(Some(&admin));
    assert_eq!(res.body["rules"].as_array().unwrap().len(), 1);

    let no_org = Session {
        user_id: "user_admin".into(),
        active_organization_id: None,
    };
    assert_eq!(api.list_rules(Some(&no_org)).status, 401);

    assert_eq!(api.delete_rule(Some(&admin), &rule_id).status, 200);
    assert_eq!(api.get_rule(Some(&admin), &rule_id).status, 404);
}

// Counts ERROR-level events so a failure is known to be logged exactly once.
struct ErrorEvents(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for ErrorEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn storage_failure_is_500_and_logged_once() {
    let temp_dir = tempdir().unwrap();
    let db = Arc::new(sled::open(temp_dir.path().join("api.db")).unwrap());
    let directory = InMemoryDirectory::new().with_member(ORG, "user_u1", Role::Manager);
    let api = Api::new(ApprovalService::new(db.clone(), Arc::new(directory)).unwrap());

    db.open_tree("requests")
        .unwrap()
        .insert("req_corrupt", &b"not cbor"[..])
        .unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(ErrorEvents(errors.clone()));
    let res = tracing::subscriber::with_default(subscriber, || {
        api.submit_action(
            Some(&session("user_u1")),
            "req_corrupt",
            r#"{ "action": "approved" }"#,
        )
    });

    assert_eq!(res.status, 500);
    assert_eq!(res.body["kind"], "internal");
    assert_eq!(res.body["error"], "Internal error");
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}
