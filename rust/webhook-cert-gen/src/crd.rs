//! Injects the webhook's certificate as the trusted CA bundle of a CustomResourceDefinition's
//! conversion webhook

use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::{
        apiextensions_apiserver::pkg::apis::apiextensions::v1::{
            CustomResourceDefinition, WebhookClientConfig,
        },
        ByteString,
    },
    kube,
};
use tracing::{info, warn};

use crate::store::{is_conflict, ObjectStore};

const CONVERSION_STRATEGY_WEBHOOK: &str = "Webhook";

/// The parts of `spec.conversion` that must already exist before a CA bundle can be injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConversionPiece {
    #[strum(serialize = "conversion strategy")]
    ConversionStrategy,
    #[strum(serialize = "webhook")]
    Webhook,
    #[strum(serialize = "client config")]
    ClientConfig,
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read CustomResourceDefinition {crd_name:?}"))]
    ReadCrd {
        source: kube::Error,
        crd_name: String,
    },

    #[snafu(display("CustomResourceDefinition {crd_name:?} does not exist"))]
    CrdNotFound { crd_name: String },

    #[snafu(display(
        "CustomResourceDefinition {crd_name:?} is missing the conversion {missing} that the CA bundle is injected into"
    ))]
    Precondition {
        crd_name: String,
        missing: ConversionPiece,
    },

    #[snafu(display("CustomResourceDefinition {crd_name:?} was modified concurrently"))]
    Conflict {
        source: kube::Error,
        crd_name: String,
    },

    #[snafu(display("failed to update CustomResourceDefinition {crd_name:?}"))]
    UpdateCrd {
        source: kube::Error,
        crd_name: String,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CaBundleInjection {
    /// The CRD carried a different (or no) CA bundle, and has been updated
    Updated,
    /// The CRD already trusted the certificate, nothing was written
    AlreadyCurrent,
}

/// Sets the conversion webhook's `caBundle` of the CRD `crd_name` to `ca_bundle`.
///
/// The CRD must already declare a conversion with a webhook client configuration, it is never
/// created here. The CRD is only written if its current bundle differs. Conflicting writes are
/// reported as [`Error::Conflict`] and not retried.
pub async fn ensure_ca_bundle(
    store: &impl ObjectStore,
    crd_name: &str,
    ca_bundle: &[u8],
) -> Result<CaBundleInjection> {
    let mut crd = store
        .get_crd(crd_name)
        .await
        .context(ReadCrdSnafu { crd_name })?
        .context(CrdNotFoundSnafu { crd_name })?;

    if let Some(conversion) = &crd.spec.conversion {
        if conversion.strategy != CONVERSION_STRATEGY_WEBHOOK {
            warn!(
                crd.name = crd_name,
                crd.conversion.strategy = %conversion.strategy,
                "CustomResourceDefinition does not use webhook conversion, the CA bundle will have no effect"
            );
        }
    }
    let client_config = match webhook_client_config(&mut crd) {
        Ok(client_config) => client_config,
        Err(missing) => return PreconditionSnafu { crd_name, missing }.fail(),
    };

    if client_config.ca_bundle.as_ref().map(|bundle| bundle.0.as_slice()) == Some(ca_bundle) {
        info!(
            crd.name = crd_name,
            "Conversion webhook already trusts the current certificate"
        );
        return Ok(CaBundleInjection::AlreadyCurrent);
    }
    client_config.ca_bundle = Some(ByteString(ca_bundle.to_vec()));

    match store.update_crd(&crd).await {
        Ok(_) => {
            info!(crd.name = crd_name, "Injected CA bundle into conversion webhook");
            Ok(CaBundleInjection::Updated)
        }
        Err(source) if is_conflict(&source) => Err(source).context(ConflictSnafu { crd_name }),
        Err(source) => Err(source).context(UpdateCrdSnafu { crd_name }),
    }
}

fn webhook_client_config(
    crd: &mut CustomResourceDefinition,
) -> Result<&mut WebhookClientConfig, ConversionPiece> {
    crd.spec
        .conversion
        .as_mut()
        .ok_or(ConversionPiece::ConversionStrategy)?
        .webhook
        .as_mut()
        .ok_or(ConversionPiece::Webhook)?
        .client_config
        .as_mut()
        .ok_or(ConversionPiece::ClientConfig)
}

/// A CRD with webhook conversion pointing at the webhook service, but no CA bundle yet
#[cfg(test)]
pub(crate) fn conversion_crd(name: &str) -> CustomResourceDefinition {
    let mut crd: CustomResourceDefinition = serde_yaml::from_str(
        r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: apirules.gateway.kyma-project.io
spec:
  group: gateway.kyma-project.io
  names:
    kind: APIRule
    listKind: APIRuleList
    plural: apirules
    singular: apirule
  scope: Namespaced
  conversion:
    strategy: Webhook
    webhook:
      conversionReviewVersions:
        - v1
      clientConfig:
        service:
          name: api-gateway-webhook-service
          namespace: cert-gen
          path: /convert
          port: 9443
  versions:
    - name: v1beta1
      served: true
      storage: true
      schema:
        openAPIV3Schema:
          type: object
          x-kubernetes-preserve-unknown-fields: true
"#,
    )
    .unwrap();
    crd.metadata.name = Some(name.to_string());
    crd
}
