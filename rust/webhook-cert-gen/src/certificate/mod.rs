//! Self-signed TLS identity of the webhook, and the checks that decide whether it is still usable

use std::collections::BTreeMap;

use snafu::OptionExt;
use stackable_operator::{k8s_openapi::ByteString, time::Duration};

use crate::utils::Unloggable;

pub mod generate;
pub mod validate;

pub use generate::GenerateError;
pub use validate::{ValidCertificate, ValidationError};

/// Key of the PEM-encoded certificate in the TLS `Secret`
pub const SECRET_KEY_CERT: &str = "tls.crt";
/// Key of the PEM-encoded private key in the TLS `Secret`
pub const SECRET_KEY_KEY: &str = "tls.key";

/// Certificates are not reused if they expire within this window, giving the webhook time to roll
/// over before the API server starts rejecting it.
pub const DEFAULT_ROTATION_LEAD_TIME: Duration = Duration::from_days_unchecked(10);

pub const DEFAULT_CERTIFICATE_LIFETIME: Duration = Duration::from_days_unchecked(365);

/// A PEM-encoded certificate together with its RSA private key.
///
/// A new pair always replaces the old one as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateMaterial {
    pub certificate_pem: Vec<u8>,
    pub private_key_pem: Unloggable<Vec<u8>>,
}

impl CertificateMaterial {
    /// Loads the pair from the `data` of a TLS `Secret`, failing if either key is missing.
    pub fn from_secret_data(
        data: Option<&BTreeMap<String, ByteString>>,
    ) -> Result<Self, ValidationError> {
        use validate::MissingKeySnafu;
        let get = |key: &'static str| {
            data.and_then(|data| data.get(key))
                .map(|value| value.0.clone())
                .context(MissingKeySnafu { key })
        };
        Ok(Self {
            certificate_pem: get(SECRET_KEY_CERT)?,
            private_key_pem: Unloggable(get(SECRET_KEY_KEY)?),
        })
    }

    /// Renders the pair as the `data` of a TLS `Secret`.
    pub fn to_secret_data(&self) -> BTreeMap<String, ByteString> {
        [
            (
                SECRET_KEY_CERT.to_string(),
                ByteString(self.certificate_pem.clone()),
            ),
            (
                SECRET_KEY_KEY.to_string(),
                ByteString(self.private_key_pem.to_vec()),
            ),
        ]
        .into()
    }
}
