//! X.509 certificate inspection
//!
//! Reads the first certificate of a PEM file (or a raw DER file) and
//! extracts what the certificate module displays: subject, issuer and the
//! end of the validity period.

use std::path::Path;

use serde::Serialize;
use x509_parser::prelude::*;

use crate::error::{ConfiguratorError, Result};
use crate::fsutil;

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Distinguished name attributes shown for subject and issuer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DistinguishedName {
    pub country: Option<String>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub common_name: Option<String>,
    pub email: Option<String>,
}

impl DistinguishedName {
    fn from_x509(name: &X509Name<'_>) -> Self {
        fn first<'s, 'c: 's>(
            mut iter: impl Iterator<Item = &'s AttributeTypeAndValue<'c>>,
        ) -> Option<String> {
            iter.next()
                .and_then(|attr| attr.as_str().ok())
                .map(str::to_string)
        }

        Self {
            country: first(name.iter_country()),
            state: first(name.iter_state_or_province()),
            locality: first(name.iter_locality()),
            organization: first(name.iter_organization()),
            organizational_unit: first(name.iter_organizational_unit()),
            common_name: first(name.iter_common_name()),
            email: first(name.iter_email()),
        }
    }

    /// `(label, value)` rows in display order
    pub fn rows(&self) -> [(&'static str, Option<&str>); 7] {
        [
            ("C", self.country.as_deref()),
            ("ST", self.state.as_deref()),
            ("L", self.locality.as_deref()),
            ("O", self.organization.as_deref()),
            ("OU", self.organizational_unit.as_deref()),
            ("CN", self.common_name.as_deref()),
            ("EA", self.email.as_deref()),
        ]
    }
}

/// Parsed certificate details
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateInfo {
    pub subject: DistinguishedName,
    pub issuer: DistinguishedName,
    /// End of validity, human readable
    pub not_after: String,
    /// End of validity, seconds since the epoch
    pub not_after_unix: i64,
}

/// Parse the certificate stored at `path`.
///
/// Fails with `NotFound` when the file is missing and `Corrupt` when it
/// holds no parsable certificate.
pub fn parse_certificate(path: &Path) -> Result<CertificateInfo> {
    let bytes = fsutil::read(path)?;
    parse_certificate_bytes(&bytes).map_err(|reason| ConfiguratorError::corrupt(path, reason))
}

/// Parse a PEM or DER encoded certificate.
///
/// PEM input may hold other blocks (a private key in a combined file); the
/// first `CERTIFICATE` block is used.
pub fn parse_certificate_bytes(bytes: &[u8]) -> std::result::Result<CertificateInfo, String> {
    let blocks = ::pem::parse_many(bytes).map_err(|e| format!("invalid PEM encoding: {}", e))?;
    let der = if blocks.is_empty() {
        bytes.to_vec()
    } else {
        blocks
            .into_iter()
            .find(|block| block.tag() == CERTIFICATE_TAG)
            .ok_or_else(|| "no certificate in PEM file".to_string())?
            .into_contents()
    };

    let (_, cert) = parse_x509_certificate(&der).map_err(|e| format!("invalid X509 certificate: {}", e))?;

    let not_after = &cert.validity().not_after;
    Ok(CertificateInfo {
        subject: DistinguishedName::from_x509(cert.subject()),
        issuer: DistinguishedName::from_x509(cert.issuer()),
        not_after: not_after.to_string(),
        not_after_unix: not_after.to_datetime().unix_timestamp(),
    })
}
