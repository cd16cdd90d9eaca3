use openssl::{
    error::ErrorStack,
    pkey::PKey,
    rsa::Rsa,
    stack::Stack,
    x509::{
        store::X509StoreBuilder, verify::X509VerifyParam, X509StoreContext, X509VerifyResult, X509,
    },
};
use snafu::{ResultExt, Snafu};
use time::OffsetDateTime;

use super::CertificateMaterial;
use crate::utils::{asn1time_to_offsetdatetime, Asn1TimeParseError};

#[derive(Debug, Snafu)]
pub enum ValidationError {
    #[snafu(display("secret is missing required key {key:?}"))]
    #[snafu(visibility(pub(super)))]
    MissingKey { key: &'static str },

    #[snafu(display("failed to parse certificate"))]
    ParseCertificate { source: openssl::error::ErrorStack },

    #[snafu(display("expected exactly one certificate, found {count}"))]
    CertificateCount { count: usize },

    #[snafu(display("failed to prepare certificate verification"))]
    PrepareVerification { source: openssl::error::ErrorStack },

    #[snafu(display("certificate does not verify at {at}"))]
    Expiry {
        source: X509VerifyResult,
        at: OffsetDateTime,
    },

    #[snafu(display("failed to read certificate expiry"))]
    ReadExpiry { source: Asn1TimeParseError },

    #[snafu(display("failed to parse RSA private key"))]
    ParseKey { source: openssl::error::ErrorStack },

    #[snafu(display("RSA private key failed its consistency check"))]
    KeyInvalid { source: openssl::error::ErrorStack },

    #[snafu(display("private key does not match the certificate's public key"))]
    KeyMismatch,
}

/// Summary of a certificate that passed [`CertificateMaterial::verify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidCertificate {
    pub not_after: OffsetDateTime,
}

impl CertificateMaterial {
    /// Checks that the certificate is well-formed and trusted (as its own root) at `at`, and that
    /// the private key is a consistent RSA key belonging to it.
    ///
    /// Pass a point in the future as `at` to reject certificates that are about to expire.
    pub fn verify(&self, at: OffsetDateTime) -> Result<ValidCertificate, ValidationError> {
        let certificate = verify_certificate(&self.certificate_pem, at)?;
        verify_key(&self.private_key_pem, &certificate)?;
        Ok(ValidCertificate {
            not_after: asn1time_to_offsetdatetime(certificate.not_after())
                .context(ReadExpirySnafu)?,
        })
    }
}

fn verify_certificate(pem: &[u8], at: OffsetDateTime) -> Result<X509, ValidationError> {
    let mut certificates = X509::stack_from_pem(pem).context(ParseCertificateSnafu)?;
    if certificates.len() != 1 {
        return CertificateCountSnafu {
            count: certificates.len(),
        }
        .fail();
    }
    let certificate = certificates.remove(0);

    // The certificate is self-signed, so it is its own (and only) trust anchor
    let store = X509StoreBuilder::new()
        .and_then(|mut store| {
            store.add_cert(certificate.clone())?;
            let mut param = X509VerifyParam::new()?;
            param.set_time(at.unix_timestamp() as libc::time_t);
            store.set_param(&param)?;
            Ok(store.build())
        })
        .context(PrepareVerificationSnafu)?;
    let verified = X509StoreContext::new()
        .and_then(|mut ctx| {
            ctx.init(&store, &certificate, &Stack::<X509>::new()?, |ctx| {
                Ok(if ctx.verify_cert()? {
                    Ok(())
                } else {
                    Err(ctx.error())
                })
            })
        })
        .context(PrepareVerificationSnafu)?;
    verified.context(ExpirySnafu { at })?;
    Ok(certificate)
}

fn verify_key(pem: &[u8], certificate: &X509) -> Result<(), ValidationError> {
    let key = Rsa::private_key_from_pem(pem).context(ParseKeySnafu)?;
    // OpenSSL reports inconsistent keys through the error stack rather than as `false`
    key.check_key()
        .and_then(|consistent| {
            if consistent {
                Ok(())
            } else {
                Err(ErrorStack::get())
            }
        })
        .context(KeyInvalidSnafu)?;
    let key = PKey::from_rsa(key).context(ParseKeySnafu)?;
    let public_key = certificate.public_key().context(ParseCertificateSnafu)?;
    if !public_key.public_eq(&key) {
        return KeyMismatchSnafu.fail();
    }
    Ok(())
}
