//! BDD step definitions for the provisioning workflow.

use std::sync::atomic::Ordering;

use rstest_bdd_macros::{given, then, when};
use stacksmith::environment::{GENERATED_ROUTING_FILE, TEMPLATE_FILE};
use stacksmith::stack::FLOATING_IP_OUTPUT;
use stacksmith::test_support::{ScriptedProviderError, sample_credentials};
use stacksmith::{
    EnvironmentLayout, ProvisionOrchestrator, ProvisionRequest, StackAction, StackStatus,
};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{
    FailureKind, GATEWAY, GATEWAY_ROUTING, NODE1, NODE2, ProvisionContext, ProvisionResult,
    two_hosts,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn assertion(message: impl Into<String>) -> StepError {
    StepError::Assertion(message.into())
}

#[given("an environment named \"{name}\" with a stack template")]
fn environment_with_template(name: String) -> ProvisionContext {
    let context = ProvisionContext::new(&name);
    std::fs::write(
        context.root.join(TEMPLATE_FILE),
        "heat_template_version: 2015-04-30\n",
    )
    .unwrap_or_else(|err| panic!("write template: {err}"));
    context
}

#[given("an environment named \"{name}\" without a stack template")]
fn environment_without_template(name: String) -> ProvisionContext {
    ProvisionContext::new(&name)
}

#[given("the provider has no such stack")]
fn provider_without_stack(provision_context: &ProvisionContext) {
    provision_context.provider.push_status(StackStatus::Absent);
}

#[given("the stack reports \"{count}\" in-progress polls before completing")]
fn stack_in_progress(provision_context: &ProvisionContext, count: u32) {
    for _ in 0..count {
        provision_context
            .provider
            .push_status(StackStatus::InProgress);
    }
    provision_context.provider.push_complete(two_hosts());
}

#[given("the stack fails to build")]
fn stack_fails(provision_context: &ProvisionContext) {
    provision_context.provider.push_status(StackStatus::Failed);
}

#[given("the next lookup fails permanently with \"{message}\"")]
fn lookup_fails_permanently(provision_context: &ProvisionContext, message: String) {
    provision_context.provider.push_fatal_error(message);
}

#[given("the provider already has a complete stack")]
fn provider_with_stack(provision_context: &ProvisionContext) {
    provision_context.provider.push_complete(two_hosts());
}

#[given("the provider already has a complete stack behind a gateway")]
fn provider_with_gateway(provision_context: &ProvisionContext) {
    let mut outputs = two_hosts();
    outputs.insert(FLOATING_IP_OUTPUT, GATEWAY);
    provision_context.provider.push_complete(outputs);
}

#[given("stack updates are requested")]
fn updates_requested(provision_context: &ProvisionContext) {
    provision_context
        .update_existing
        .store(true, Ordering::SeqCst);
}

#[given("host \"{address}\" refuses \"{count}\" handshakes")]
fn host_refuses(provision_context: &ProvisionContext, address: String, count: u32) {
    provision_context.probe.fail_times(&address, count);
}

#[when("I provision the environment as \"{user}\"")]
fn provision_environment(provision_context: &ProvisionContext, user: String) -> ProvisionResult {
    let runtime = Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap_or_else(|err| panic!("build runtime: {err}"));
    let layout = EnvironmentLayout::open(&provision_context.root)
        .unwrap_or_else(|err| panic!("open environment: {err}"));

    let request = match ProvisionRequest::prepare::<ScriptedProviderError>(
        layout,
        None,
        &[],
        provision_context.update_existing.load(Ordering::SeqCst),
        &user,
    ) {
        Ok(request) => request,
        Err(err) => {
            return ProvisionResult::Failure {
                kind: FailureKind::of(&err),
                message: err.to_string(),
            };
        }
    };
    let orchestrator = ProvisionOrchestrator::new(
        provision_context.provider.clone(),
        provision_context.probe.clone(),
        provision_context.agent.clone(),
    );
    let result = runtime.block_on(orchestrator.execute(
        &sample_credentials(),
        &request,
        &CancellationToken::new(),
    ));
    match result {
        Ok(outcome) => ProvisionResult::Success(Box::new(outcome)),
        Err(err) => ProvisionResult::Failure {
            kind: FailureKind::of(&err),
            message: err.to_string(),
        },
    }
}

fn expect_action(provision_result: &ProvisionResult, expected: StackAction) -> Result<(), StepError> {
    match provision_result {
        ProvisionResult::Success(outcome) if outcome.action == expected => Ok(()),
        ProvisionResult::Success(outcome) => Err(assertion(format!(
            "expected {expected:?}, got {:?}",
            outcome.action
        ))),
        ProvisionResult::Failure { message, .. } => {
            Err(assertion(format!("expected success, got failure: {message}")))
        }
        ProvisionResult::Pending => Err(assertion("provisioning did not run")),
    }
}

#[then("the stack is created")]
fn stack_created(
    provision_context: &ProvisionContext,
    provision_result: &ProvisionResult,
) -> Result<(), StepError> {
    expect_action(provision_result, StackAction::Created)?;
    if provision_context.provider.created() && !provision_context.provider.updated() {
        Ok(())
    } else {
        Err(assertion("expected exactly one create submission"))
    }
}

#[then("the stack is updated")]
fn stack_updated(
    provision_context: &ProvisionContext,
    provision_result: &ProvisionResult,
) -> Result<(), StepError> {
    expect_action(provision_result, StackAction::Updated)?;
    if provision_context.provider.updated() && !provision_context.provider.created() {
        Ok(())
    } else {
        Err(assertion("expected an update submission only"))
    }
}

#[then("the stack is reused")]
fn stack_reused(provision_result: &ProvisionResult) -> Result<(), StepError> {
    expect_action(provision_result, StackAction::Reused)
}

#[then("nothing was submitted to the provider")]
fn nothing_submitted(provision_context: &ProvisionContext) -> Result<(), StepError> {
    if provision_context.provider.created() || provision_context.provider.updated() {
        Err(assertion("no create or update should be submitted"))
    } else {
        Ok(())
    }
}

#[then("the stack was polled \"{count}\" times")]
fn stack_polled(provision_result: &ProvisionResult, count: u32) -> Result<(), StepError> {
    match provision_result {
        ProvisionResult::Success(outcome) if outcome.status_polls == count => Ok(()),
        ProvisionResult::Success(outcome) => Err(assertion(format!(
            "expected {count} polls, got {}",
            outcome.status_polls
        ))),
        _ => Err(assertion("expected a successful run")),
    }
}

#[then("the stack was looked up \"{count}\" times")]
fn stack_looked_up(provision_context: &ProvisionContext, count: usize) -> Result<(), StepError> {
    let lookups = provision_context.provider.lookups();
    if lookups == count {
        Ok(())
    } else {
        Err(assertion(format!("expected {count} lookups, got {lookups}")))
    }
}

#[then("provisioning fails with a \"{kind}\" error")]
fn provisioning_fails(provision_result: &ProvisionResult, kind: String) -> Result<(), StepError> {
    let expected =
        FailureKind::parse(&kind).ok_or_else(|| assertion(format!("unknown kind {kind}")))?;
    match provision_result {
        ProvisionResult::Failure { kind: actual, .. } if *actual == expected => Ok(()),
        ProvisionResult::Failure { kind: actual, message } => Err(assertion(format!(
            "expected {expected:?}, got {actual:?}: {message}"
        ))),
        _ => Err(assertion("expected provisioning to fail")),
    }
}

#[then("the error mentions \"{text}\"")]
fn error_mentions(provision_result: &ProvisionResult, text: String) -> Result<(), StepError> {
    match provision_result {
        ProvisionResult::Failure { message, .. } if message.contains(&text) => Ok(()),
        ProvisionResult::Failure { message, .. } => {
            Err(assertion(format!("{message:?} should mention {text:?}")))
        }
        _ => Err(assertion("expected provisioning to fail")),
    }
}

#[then("no routing file is written")]
fn no_routing_file(provision_context: &ProvisionContext) -> Result<(), StepError> {
    if provision_context.root.join(GENERATED_ROUTING_FILE).exists() {
        Err(assertion("routing file should not exist"))
    } else {
        Ok(())
    }
}

#[then("the routing file proxies both hosts through the gateway")]
fn routing_through_gateway(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let path = provision_context.root.join(GENERATED_ROUTING_FILE);
    let document = std::fs::read_to_string(&path)
        .map_err(|err| assertion(format!("read {path}: {err}")))?;
    if document == GATEWAY_ROUTING {
        Ok(())
    } else {
        Err(assertion(format!("unexpected routing document:\n{document}")))
    }
}

#[then("only the gateway is probed")]
fn only_gateway_probed(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let probed: Vec<String> = provision_context.probe.probed().into_iter().collect();
    if probed == vec![GATEWAY.to_owned()] {
        Ok(())
    } else {
        Err(assertion(format!(
            "expected only {GATEWAY}, probed {probed:?} (not {NODE1} or {NODE2})"
        )))
    }
}

#[then("host \"{address}\" was probed \"{count}\" times")]
fn host_probed(
    provision_context: &ProvisionContext,
    address: String,
    count: u32,
) -> Result<(), StepError> {
    let attempts = provision_context.probe.attempts(&address);
    if attempts == count {
        Ok(())
    } else {
        Err(assertion(format!("expected {count} attempts, got {attempts}")))
    }
}

#[then("the provider was never contacted")]
fn provider_untouched(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let calls = provision_context.provider.calls();
    if calls.is_empty() {
        Ok(())
    } else {
        Err(assertion(format!("unexpected provider calls: {calls:?}")))
    }
}
