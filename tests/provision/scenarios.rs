//! BDD scenarios for the provisioning workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{
    ProvisionContext, ProvisionResult, provision_context, provision_result,
};

#[scenario(
    path = "tests/features/provision.feature",
    name = "Create an absent stack"
)]
fn scenario_create_absent(provision_context: ProvisionContext, provision_result: ProvisionResult) {
    let _ = (provision_context, provision_result);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Update an existing stack when asked"
)]
fn scenario_update_existing(
    provision_context: ProvisionContext,
    provision_result: ProvisionResult,
) {
    let _ = (provision_context, provision_result);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Reuse an existing stack without the update flag"
)]
fn scenario_reuse_existing(provision_context: ProvisionContext, provision_result: ProvisionResult) {
    let _ = (provision_context, provision_result);
}

#[scenario(path = "tests/features/provision.feature", name = "Surface a failed stack")]
fn scenario_failed_stack(provision_context: ProvisionContext, provision_result: ProvisionResult) {
    let _ = (provision_context, provision_result);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Route every host through the gateway"
)]
fn scenario_gateway_routing(
    provision_context: ProvisionContext,
    provision_result: ProvisionResult,
) {
    let _ = (provision_context, provision_result);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Retry a host until it answers"
)]
fn scenario_retry_host(provision_context: ProvisionContext, provision_result: ProvisionResult) {
    let _ = (provision_context, provision_result);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Refuse to provision without a template"
)]
fn scenario_missing_template(
    provision_context: ProvisionContext,
    provision_result: ProvisionResult,
) {
    let _ = (provision_context, provision_result);
}

#[scenario(
    path = "tests/features/provision.feature",
    name = "Stop polling when a lookup can never succeed"
)]
fn scenario_permanent_lookup_failure(
    provision_context: ProvisionContext,
    provision_result: ProvisionResult,
) {
    let _ = (provision_context, provision_result);
}
