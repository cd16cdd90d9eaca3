//! Narrow view of the Kubernetes API that the reconciliation needs

use async_trait::async_trait;
use stackable_operator::{
    k8s_openapi::{
        api::core::v1::Secret,
        apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    },
    kube::{
        self,
        api::{Api, PostParams},
        ResourceExt,
    },
};

use crate::FIELD_MANAGER;

/// HTTP status returned by the API server when a write is based on a stale `resourceVersion`
pub const STATUS_CONFLICT: u16 = 409;

/// Typed get/create/update access to the objects that carry the webhook's TLS identity.
///
/// Getters report absent objects as `Ok(None)`, so that "not found" can be told apart from
/// failed requests. Updates replace the whole object and carry its `resourceVersion`, so writes
/// based on a stale read are rejected with [`STATUS_CONFLICT`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, kube::Error>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, kube::Error>;

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, kube::Error>;

    async fn get_crd(&self, name: &str) -> Result<Option<CustomResourceDefinition>, kube::Error>;

    async fn update_crd(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, kube::Error>;
}

/// Returns whether `err` is the API server rejecting a write because of a concurrent modification
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == STATUS_CONFLICT)
}

/// [`ObjectStore`] backed by a live Kubernetes cluster
pub struct KubeStore {
    client: stackable_operator::client::Client,
}

impl KubeStore {
    pub fn new(client: stackable_operator::client::Client) -> Self {
        Self { client }
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.as_kube_client(), namespace)
    }

    fn crds(&self) -> Api<CustomResourceDefinition> {
        Api::all(self.client.as_kube_client())
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, kube::Error> {
        self.secrets(namespace).get_opt(name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, kube::Error> {
        self.secrets(secret.metadata.namespace.as_deref().unwrap_or_default())
            .create(&Self::post_params(), secret)
            .await
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, kube::Error> {
        self.secrets(secret.metadata.namespace.as_deref().unwrap_or_default())
            .replace(&secret.name_any(), &Self::post_params(), secret)
            .await
    }

    async fn get_crd(&self, name: &str) -> Result<Option<CustomResourceDefinition>, kube::Error> {
        self.crds().get_opt(name).await
    }

    async fn update_crd(
        &self,
        crd: &CustomResourceDefinition,
    ) -> Result<CustomResourceDefinition, kube::Error> {
        self.crds()
            .replace(&crd.name_any(), &Self::post_params(), crd)
            .await
    }
}


#[cfg(test)]
mod tests {
    use stackable_operator::{
        k8s_openapi::api::core::v1::Secret,
        kube::api::ObjectMeta,
    };

    use super::{
        is_conflict,
        memory::{api_error, MemoryStore, Write},
        ObjectStore,
    };

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    #[test]
    fn conflicts_are_detected() {
        assert!(is_conflict(&api_error(409, "Conflict", "modified")));
        assert!(!is_conflict(&api_error(404, "NotFound", "gone")));
    }

    #[tokio::test]
    async fn stale_updates_are_rejected() {
        let store = MemoryStore::default();
        let created = store.create_secret(&secret("tls")).await.unwrap();
        let updated = store.update_secret(&created).await.unwrap();
        assert_ne!(
            updated.metadata.resource_version,
            created.metadata.resource_version
        );

        let err = store.update_secret(&created).await.unwrap_err();
        assert!(is_conflict(&err));
        assert_eq!(
            store.writes(),
            [
                Write::CreateSecret {
                    namespace: "default".to_string(),
                    name: "tls".to_string()
                },
                Write::UpdateSecret {
                    namespace: "default".to_string(),
                    name: "tls".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_creates_are_rejected() {
        let store = MemoryStore::default().with_secret(secret("tls"));
        assert!(is_conflict(
            &store.create_secret(&secret("tls")).await.unwrap_err()
        ));
        assert!(store.writes().is_empty());
    }
}
