//! Walk a sequential and a percentage rule through their lifecycles.
//!
//! Run with `RUST_LOG=debug` to see every recorded vote.
use std::sync::Arc;

use approval_engine::{
    ApprovalService, config,
    directory::{Caller, InMemoryDirectory, Role},
    rule::RuleDraft,
    types::Decision,
};
use tracing_subscriber::EnvFilter;

const ORG: &str = "org_demo";

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = config::load()?;

    let directory = InMemoryDirectory::new()
        .with_member(ORG, "user_admin", Role::Admin)
        .with_member(ORG, "user_employee", Role::Employee);
    for approver in ["user_lead", "user_finance", "user_cfo", "user_legal"] {
        directory.add_member(ORG, approver, Role::Manager);
    }
    let service = ApprovalService::from_config(&config, Arc::new(directory))?;

    let admin = Caller::new("user_admin", ORG);
    let employee = Caller::new("user_employee", ORG);

    // sequential: lead, then finance
    let travel = service.create_rule(
        &admin,
        RuleDraft::new()
            .set_user("user_employee")
            .set_name("Travel")
            .set_sequential(true)
            .add_ordered_approver("user_lead", 1)
            .add_ordered_approver("user_finance", 2),
    )?;
    let request = service.create_request(&employee, &travel.id)?;

    if let Err(err) = service.submit(&request.id, "user_finance", Decision::Approved, None) {
        println!("finance tried to go first: {err}");
    }
    service.submit(&request.id, "user_lead", Decision::Approved, None)?;
    let done = service.submit(
        &request.id,
        "user_finance",
        Decision::Approved,
        Some("within budget".into()),
    )?;
    println!("travel request {} is {}", done.request.id, done.request.status);

    // percentage: three of four managers
    let expenses = service.create_rule(
        &admin,
        RuleDraft::new()
            .set_user("user_employee")
            .set_name("Expenses")
            .set_minimum_percentage(75)
            .add_approver("user_lead")
            .add_approver("user_finance")
            .add_approver("user_cfo")
            .add_approver("user_legal"),
    )?;
    let request = service.create_request(&employee, &expenses.id)?;

    service.submit(&request.id, "user_cfo", Decision::Rejected, Some("no receipt".into()))?;
    let done = service.submit(&request.id, "user_legal", Decision::Rejected, None)?;
    println!(
        "expense request {} is {} with {} approvers left unasked",
        done.request.id,
        done.request.status,
        done.request.pending_approvers().count()
    );

    Ok(())
}
