//! Promotion and snapshot-isolation scenarios.

mod support;

use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use gasport::cache::SessionCache;
use gasport::engine::{ExecOptions, ExecutionEngine};
use gasport::gateway::GasClient;
use gasport::infra::Supervisor;
use gasport::mirror::LocalMirror;
use gasport::promote::PromotionController;
use gasport::report::VecReporter;
use gasport::types::{Environment, FileType, ScriptId};

use support::{FakeGas, State};

fn script_id() -> ScriptId {
    support::SCRIPT_ID.parse().expect("id")
}

#[test]
fn reset_creates_all_three_environments_and_is_idempotent() {
    // P2 + P7.
    let fake = FakeGas::start(State::provisioned());
    // Drop the seeded dev deployment so reset starts from nothing.
    fake.state.lock().expect("state").deployments.clear();

    let client = GasClient::with_base(fake.base.clone()).expect("client");
    let controller = PromotionController::new(&client);
    let mut rep = VecReporter::new();

    let deployments = controller
        .reset(&script_id(), "tok", &mut rep)
        .expect("reset");
    assert_eq!(deployments.len(), 3);
    assert_eq!(fake.deployment_count(), 3);

    let status = controller
        .status(&script_id(), "tok", &mut rep)
        .expect("status");
    for env in ["dev", "staging", "prod"] {
        let slot = status.get(env).expect(env);
        assert!(!slot.deployment_id.is_empty());
        assert_eq!(slot.version_number, None, "{env} starts at HEAD");
    }

    // Idempotence: same deployment count and tags after a second reset.
    let again = controller
        .reset(&script_id(), "tok", &mut rep)
        .expect("reset again");
    assert_eq!(again.len(), 3);
    assert_eq!(fake.deployment_count(), 3);
    let ids_first: Vec<String> = deployments.iter().map(|d| d.deployment_id.clone()).collect();
    let ids_second: Vec<String> = again.iter().map(|d| d.deployment_id.clone()).collect();
    assert_eq!(ids_first, ids_second);
}

#[test]
fn snapshot_isolation_between_dev_and_staging() {
    // S2: staging observes the snapshot from promote time; dev sees HEAD.
    let fake = FakeGas::start(State::provisioned());
    let td = tempdir().expect("tempdir");

    let client = GasClient::with_base(fake.base.clone()).expect("client");
    let controller = PromotionController::new(&client);
    let mut rep = VecReporter::new();
    let id = script_id();

    // Write Ver with v1, promote staging, then write v2.
    client
        .update_file(
            &id,
            "Ver",
            "function v(){return \"v1\";}",
            "tok",
            FileType::ServerJs,
        )
        .expect("write v1");
    controller
        .reset(&id, "tok", &mut rep)
        .expect("reset");
    let outcome = controller
        .promote(&id, Environment::Staging, Some("v1"), "tok", &mut rep)
        .expect("promote");
    assert_eq!(outcome.version_number, Some(1));

    client
        .update_file(
            &id,
            "Ver",
            "function v(){return \"v2\";}",
            "tok",
            FileType::ServerJs,
        )
        .expect("write v2");

    let engine = ExecutionEngine::new(
        client.clone(),
        LocalMirror::new(td.path()),
        Arc::new(SessionCache::new()),
        Arc::new(Supervisor::new()),
    )
    .expect("engine");

    // Mirror the remote Ver so the sync check stays quiet.
    engine
        .mirror()
        .write_source(&id, "Ver", FileType::ServerJs, "function v(){return \"v2\";}")
        .expect("mirror");

    let dev = engine
        .execute(&id, "v()", Some("tok"), &ExecOptions::default(), &mut rep)
        .expect("dev exec");
    assert_eq!(dev.result, json!("v2"));
    assert_eq!(dev.version_number, None);

    let staging = engine
        .execute(
            &id,
            "v()",
            Some("tok"),
            &ExecOptions {
                environment: Environment::Staging,
                ..ExecOptions::default()
            },
            &mut rep,
        )
        .expect("staging exec");
    assert_eq!(staging.result, json!("v1"));
    assert_eq!(staging.version_number, Some(1));
}

#[test]
fn later_promote_supersedes_earlier_snapshot() {
    let fake = FakeGas::start(State::provisioned());
    let client = GasClient::with_base(fake.base.clone()).expect("client");
    let controller = PromotionController::new(&client);
    let mut rep = VecReporter::new();
    let id = script_id();

    client
        .update_file(&id, "Ver", "function v(){return \"a\";}", "tok", FileType::ServerJs)
        .expect("write");
    controller.reset(&id, "tok", &mut rep).expect("reset");
    let first = controller
        .promote(&id, Environment::Prod, None, "tok", &mut rep)
        .expect("promote 1");
    assert_eq!(first.version_number, Some(1));

    client
        .update_file(&id, "Ver", "function v(){return \"b\";}", "tok", FileType::ServerJs)
        .expect("write");
    let second = controller
        .promote(&id, Environment::Prod, None, "tok", &mut rep)
        .expect("promote 2");
    assert_eq!(second.version_number, Some(2));
    assert_eq!(second.deployment_id, first.deployment_id);

    // The prod deployment now pins version 2.
    let status = controller.status(&id, "tok", &mut rep).expect("status");
    assert_eq!(status["prod"].version_number, Some(2));
}
