//! Custom peer-certificate verifier: accept a chain that verifies for the
//! requested SNI, or — failing that — for any hostname in the allow-list.
//!
//! Grounded on `control/caclient.rs`'s use of
//! `rustls::client::WebPkiServerVerifier` wrapped by a custom
//! `ServerCertVerifier`, and on `lexe-tls/src/attestation/verifier.rs`'s
//! shape of delegating to a `WebPkiServerVerifier` and layering policy on
//! top. This is a documented widening of standard TLS verification scoped to
//! the allow-list — never a skip of chain verification: expired certs and
//! untrusted roots are still rejected for every name tried.

use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};

pub struct AllowListFallbackVerifier {
    inner: Arc<WebPkiServerVerifier>,
    allowed_hostnames: Vec<String>,
}

impl AllowListFallbackVerifier {
    pub fn new(root_store: Arc<RootCertStore>, allowed_hostnames: Vec<String>) -> anyhow::Result<Self> {
        let inner = WebPkiServerVerifier::builder(root_store).build()?;
        Ok(AllowListFallbackVerifier { inner, allowed_hostnames })
    }
}

impl std::fmt::Debug for AllowListFallbackVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllowListFallbackVerifier").finish_non_exhaustive()
    }
}

impl ServerCertVerifier for AllowListFallbackVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let primary = self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);
        if primary.is_ok() {
            return primary;
        }

        for candidate in &self.allowed_hostnames {
            let Ok(name) = ServerName::try_from(candidate.clone()) else {
                continue;
            };
            if self
                .inner
                .verify_server_cert(end_entity, intermediates, &name, ocsp_response, now)
                .is_ok()
            {
                return Ok(ServerCertVerified::assertion());
            }
        }

        tracing::warn!(
            requested = ?server_name,
            leaf_sans = ?leaf_dns_names(end_entity),
            "upstream certificate rejected for SNI and all allow-list fallbacks"
        );
        primary
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        self.inner.root_hint_subjects()
    }
}

/// Extracts the leaf's DNS SANs for the rejection log line, per spec.md
/// §4.4 step 5. Parse failure yields an empty list rather than a second
/// error path here — the verification error itself is already returned to
/// the caller.
fn leaf_dns_names(end_entity: &CertificateDer<'_>) -> Vec<String> {
    let Ok((_, cert)) = x509_parser::parse_x509_certificate(end_entity) else {
        return Vec::new();
    };
    cert.subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    x509_parser::extensions::GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Builds the native-roots trust anchor store, matching the teacher's
/// `rustls-native-certs` dependency use.
pub fn native_root_store() -> anyhow::Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    let result = rustls_native_certs::load_native_certs();
    for err in result.errors {
        tracing::warn!(%err, "error loading a native root certificate, continuing with the rest");
    }
    for cert in result.certs {
        store.add(cert)?;
    }
    Ok(store)
}
