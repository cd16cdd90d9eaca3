//! Provisions the self-signed TLS identity of a conversion webhook and makes the API server trust
//! it, by storing it in a `Secret` and injecting it as the CA bundle of a CustomResourceDefinition.

pub mod certificate;
pub mod crd;
pub mod identity;
pub mod reconciler;
pub mod secret;
pub mod store;
pub mod utils;

pub const FIELD_MANAGER: &str = "webhook-cert-gen";
