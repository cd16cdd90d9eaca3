//! Keeps the webhook's TLS [`Secret`] populated with a certificate that stays usable for the
//! rotation lead time

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::Secret,
    kube::{self, api::ObjectMeta, runtime::reflector::ObjectRef},
    time::Duration,
};
use time::OffsetDateTime;
use tracing::info;

use crate::{
    certificate::{
        CertificateMaterial, GenerateError, DEFAULT_CERTIFICATE_LIFETIME,
        DEFAULT_ROTATION_LEAD_TIME,
    },
    identity::IdentitySet,
    store::ObjectStore,
    utils::error_full_message,
};

const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read {secret}"))]
    ReadSecret {
        source: kube::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to generate certificate for {identities}"))]
    GenerateCertificate {
        source: GenerateError,
        identities: IdentitySet,
    },

    #[snafu(display("failed to create {secret}"))]
    CreateSecret {
        source: kube::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to update {secret}"))]
    UpdateSecret {
        source: kube::Error,
        secret: ObjectRef<Secret>,
    },
}
type Result<T, E = Error> = std::result::Result<T, E>;

/// Where the webhook's TLS identity lives, and how long it should last
#[derive(Debug, Clone)]
pub struct SecretConfig {
    pub name: String,
    /// Namespace of both the `Secret` and the webhook `Service`
    pub namespace: String,
    pub service_name: String,
    pub rotation_lead_time: Duration,
    pub certificate_lifetime: Duration,
}

impl SecretConfig {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            service_name: service_name.into(),
            rotation_lead_time: DEFAULT_ROTATION_LEAD_TIME,
            certificate_lifetime: DEFAULT_CERTIFICATE_LIFETIME,
        }
    }

    fn secret_ref(&self) -> ObjectRef<Secret> {
        ObjectRef::new(&self.name).within(&self.namespace)
    }

    fn identities(&self) -> IdentitySet {
        IdentitySet::for_service(&self.service_name, &self.namespace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SecretState {
    /// There was no `Secret`, a new one was created
    Created,
    /// The `Secret`'s certificate was missing, broken, or about to expire, and has been replaced
    Rotated,
    /// The `Secret` already held a usable certificate
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct SecretReconciliation {
    pub state: SecretState,
    /// The certificate now stored in the `Secret`, which doubles as the CA bundle
    pub certificate_pem: Vec<u8>,
}

/// Makes sure that the `Secret` described by `config` holds a certificate and key that will stay
/// valid for at least [`SecretConfig::rotation_lead_time`].
///
/// A missing `Secret` is created. An existing one with missing, malformed, mismatched, or soon to
/// expire contents has its data replaced in full. Usable contents are left untouched.
pub async fn ensure_secret(
    store: &impl ObjectStore,
    config: &SecretConfig,
) -> Result<SecretReconciliation> {
    let secret_ref = || config.secret_ref();
    let existing = store
        .get_secret(&config.name, &config.namespace)
        .await
        .with_context(|_| ReadSecretSnafu {
            secret: secret_ref(),
        })?;

    let Some(mut secret) = existing else {
        info!(
            secret = %secret_ref(),
            "Provisioning a new webhook certificate, because the secret could not be found"
        );
        let material = generate(config)?;
        store
            .create_secret(&build_secret(config, &material))
            .await
            .with_context(|_| CreateSecretSnafu {
                secret: secret_ref(),
            })?;
        return Ok(SecretReconciliation {
            state: SecretState::Created,
            certificate_pem: material.certificate_pem,
        });
    };

    let cutoff = OffsetDateTime::now_utc() + config.rotation_lead_time;
    let current = CertificateMaterial::from_secret_data(secret.data.as_ref())
        .and_then(|material| Ok((material.verify(cutoff)?, material)));
    match current {
        Ok((valid, material)) => {
            info!(
                secret = %secret_ref(),
                %cutoff,
                cutoff.duration = %config.rotation_lead_time,
                certificate.not_after = %valid.not_after,
                "Webhook certificate is not close to expiring, will not rotate"
            );
            Ok(SecretReconciliation {
                state: SecretState::Unchanged,
                certificate_pem: material.certificate_pem,
            })
        }
        Err(err) => {
            info!(
                secret = %secret_ref(),
                %cutoff,
                cutoff.duration = %config.rotation_lead_time,
                reason = %error_full_message(&err),
                "Provisioning a new webhook certificate, because the current one is unusable"
            );
            let material = generate(config)?;
            secret.data = Some(material.to_secret_data());
            store
                .update_secret(&secret)
                .await
                .with_context(|_| UpdateSecretSnafu {
                    secret: secret_ref(),
                })?;
            Ok(SecretReconciliation {
                state: SecretState::Rotated,
                certificate_pem: material.certificate_pem,
            })
        }
    }
}

fn generate(config: &SecretConfig) -> Result<CertificateMaterial> {
    let identities = config.identities();
    CertificateMaterial::generate(&identities, config.certificate_lifetime)
        .context(GenerateCertificateSnafu { identities })
}

fn build_secret(config: &SecretConfig, material: &CertificateMaterial) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(config.name.clone()),
            namespace: Some(config.namespace.clone()),
            ..ObjectMeta::default()
        },
        type_: Some(SECRET_TYPE_TLS.to_string()),
        data: Some(material.to_secret_data()),
        ..Secret::default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use stackable_operator::k8s_openapi::ByteString;
    use time::OffsetDateTime;

    use super::{build_secret, ensure_secret, Error, SecretConfig, SecretState};
    use crate::{
        certificate::{CertificateMaterial, SECRET_KEY_CERT, SECRET_KEY_KEY},
        store::memory::{MemoryStore, Write},
    };

    fn config() -> SecretConfig {
        SecretConfig::new(
            "api-gateway-webhook-service",
            "cert-gen",
            "api-gateway-webhook-service",
        )
    }

    fn generated(config: &SecretConfig) -> CertificateMaterial {
        CertificateMaterial::generate(&config.identities(), config.certificate_lifetime).unwrap()
    }

    fn stored_material(store: &MemoryStore, config: &SecretConfig) -> CertificateMaterial {
        let secret = store.secret(&config.name, &config.namespace).unwrap();
        CertificateMaterial::from_secret_data(secret.data.as_ref()).unwrap()
    }

    fn update_write(config: &SecretConfig) -> Write {
        Write::UpdateSecret {
            namespace: config.namespace.clone(),
            name: config.name.clone(),
        }
    }

    #[tokio::test]
    async fn missing_secret_is_created() {
        let config = config();
        let store = MemoryStore::default();

        let reconciliation = ensure_secret(&store, &config).await.unwrap();

        assert_eq!(reconciliation.state, SecretState::Created);
        assert_eq!(
            store.writes(),
            [Write::CreateSecret {
                namespace: config.namespace.clone(),
                name: config.name.clone(),
            }]
        );
        let secret = store.secret(&config.name, &config.namespace).unwrap();
        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/tls"));
        let data = secret.data.as_ref().unwrap();
        assert!(data.contains_key(SECRET_KEY_CERT));
        assert!(data.contains_key(SECRET_KEY_KEY));
        let material = stored_material(&store, &config);
        assert_eq!(material.certificate_pem, reconciliation.certificate_pem);
        material.verify(OffsetDateTime::now_utc()).unwrap();
    }

    #[tokio::test]
    async fn valid_secret_is_left_alone() {
        let config = config();
        let material = generated(&config);
        let store = MemoryStore::default().with_secret(build_secret(&config, &material));

        let reconciliation = ensure_secret(&store, &config).await.unwrap();

        assert_eq!(reconciliation.state, SecretState::Unchanged);
        assert_eq!(reconciliation.certificate_pem, material.certificate_pem);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn corrupted_key_is_rotated() {
        let config = config();
        let mut secret = build_secret(&config, &generated(&config));
        secret
            .data
            .as_mut()
            .unwrap()
            .insert(SECRET_KEY_KEY.to_string(), ByteString(b"garbage".to_vec()));
        let store = MemoryStore::default().with_secret(secret);

        let reconciliation = ensure_secret(&store, &config).await.unwrap();

        assert_eq!(reconciliation.state, SecretState::Rotated);
        assert_eq!(store.writes(), [update_write(&config)]);
        let material = stored_material(&store, &config);
        assert_eq!(material.certificate_pem, reconciliation.certificate_pem);
        material.verify(OffsetDateTime::now_utc()).unwrap();
    }

    #[tokio::test]
    async fn incomplete_secret_is_rotated_in_full() {
        let config = config();
        let mut secret = build_secret(&config, &generated(&config));
        secret.metadata.labels = Some(BTreeMap::from([(
            "app.kubernetes.io/name".to_string(),
            "api-gateway".to_string(),
        )]));
        secret.data = Some(BTreeMap::from([
            (SECRET_KEY_CERT.to_string(), ByteString(b"cert".to_vec())),
            ("unrelated".to_string(), ByteString(b"data".to_vec())),
        ]));
        let store = MemoryStore::default().with_secret(secret);

        let reconciliation = ensure_secret(&store, &config).await.unwrap();

        assert_eq!(reconciliation.state, SecretState::Rotated);
        assert_eq!(store.writes(), [update_write(&config)]);
        let secret = store.secret(&config.name, &config.namespace).unwrap();
        assert_eq!(
            secret.data.unwrap().into_keys().collect::<Vec<_>>(),
            [SECRET_KEY_CERT, SECRET_KEY_KEY]
        );
        assert!(secret.metadata.labels.is_some());
    }

    #[tokio::test]
    async fn expiring_certificate_is_rotated() {
        let config = config();
        let now = OffsetDateTime::now_utc();
        let expiring = CertificateMaterial::generate_with_validity(
            &config.identities(),
            now - time::Duration::days(355),
            now + time::Duration::days(3),
        )
        .unwrap();
        let store = MemoryStore::default().with_secret(build_secret(&config, &expiring));

        let reconciliation = ensure_secret(&store, &config).await.unwrap();

        assert_eq!(reconciliation.state, SecretState::Rotated);
        assert_ne!(reconciliation.certificate_pem, expiring.certificate_pem);
        assert_eq!(store.writes(), [update_write(&config)]);
    }

    #[tokio::test]
    async fn failed_read_aborts_without_writing() {
        let config = config();
        let store = MemoryStore::default().fail_secret_reads(500);

        let err = ensure_secret(&store, &config).await.unwrap_err();

        assert!(matches!(err, Error::ReadSecret { .. }));
        assert!(store.writes().is_empty());
    }
}
