//! One-shot reconciliation of the webhook's TLS identity: secret first, then the CRD's CA bundle

use snafu::{ResultExt, Snafu};

use crate::{
    crd::{self, CaBundleInjection},
    secret::{self, SecretConfig, SecretState},
    store::{KubeStore, ObjectStore},
    utils::error_full_message,
    FIELD_MANAGER,
};

pub const SUCCESS_MESSAGE: &str = "success";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient {
        source: stackable_operator::error::Error,
    },

    #[snafu(display("failed to ensure webhook secret"))]
    EnsureSecret { source: secret::Error },

    #[snafu(display("failed to inject CA bundle into conversion webhook"))]
    InjectCaBundle { source: crd::Error },
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// The objects that a reconciliation operates on
#[derive(Debug, Clone)]
pub struct Targets {
    pub secret: SecretConfig,
    /// Name of the CustomResourceDefinition whose conversion webhook should trust the certificate
    pub crd_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Outcome {
    /// A new secret was created and its certificate injected into the CRD
    Created,
    /// The secret's certificate was replaced and the new one injected into the CRD
    Rotated,
    /// Nothing needed to change
    Unchanged,
    /// The secret was fine, but the CRD did not trust its certificate (anymore)
    CaBundleRepaired,
}

/// Ensures that the webhook secret holds a usable certificate, and that the CRD's conversion
/// webhook trusts it.
///
/// The CA bundle is checked on every run, so a bundle that was cleared or replaced by someone
/// else is repaired even when the secret itself did not change. Nothing is rolled back: if the
/// CRD cannot be updated, the new secret stays in place and the next run picks up from there.
pub async fn reconcile(store: &impl ObjectStore, targets: &Targets) -> Result<Outcome> {
    let secret = secret::ensure_secret(store, &targets.secret)
        .await
        .context(EnsureSecretSnafu)?;
    let injection = crd::ensure_ca_bundle(store, &targets.crd_name, &secret.certificate_pem)
        .await
        .context(InjectCaBundleSnafu)?;
    Ok(match (secret.state, injection) {
        (SecretState::Created, _) => Outcome::Created,
        (SecretState::Rotated, _) => Outcome::Rotated,
        (SecretState::Unchanged, CaBundleInjection::Updated) => Outcome::CaBundleRepaired,
        (SecretState::Unchanged, CaBundleInjection::AlreadyCurrent) => Outcome::Unchanged,
    })
}

/// Connects to the cluster configured in the environment and runs [`reconcile`] against it.
pub async fn run(targets: &Targets) -> Result<Outcome> {
    let client = stackable_operator::client::create_client(Some(FIELD_MANAGER.to_string()))
        .await
        .context(CreateClientSnafu)?;
    reconcile(&KubeStore::new(client), targets).await
}

/// Renders the result of a run as a single line: [`SUCCESS_MESSAGE`], or the full error chain.
pub fn outcome_message(result: &Result<Outcome>) -> String {
    match result {
        Ok(_) => SUCCESS_MESSAGE.to_string(),
        Err(err) => error_full_message(err),
    }
}
