//! The immutable target identity a call is routed against (spec.md §3's
//! `Address`).

use std::sync::Arc;

use http::uri::{Authority, Scheme};

/// The TLS/connection-level parameters that distinguish otherwise-identical
/// addresses — protocol list, cipher policy, and the identity of the
/// collaborators used to pin/verify/proxy this address.
///
/// Identity here is by `Arc` pointer equality for the collaborator slots:
/// two `Address`es are pool-compatible only if they were built with the
/// *same* certificate pinner and proxy selector instance, matching the
/// teacher's preference for comparing trait-object identity rather than
/// trying to make arbitrary user collaborators `PartialEq`.
#[derive(Clone)]
pub struct ConnectionSpec {
    pub alpn_protocols: Vec<&'static str>,
    pub min_tls_version: TlsVersion,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl Default for ConnectionSpec {
    fn default() -> Self {
        ConnectionSpec {
            alpn_protocols: vec!["h2", "http/1.1"],
            min_tls_version: TlsVersion::Tls12,
        }
    }
}

/// The immutable target identity for a set of calls: scheme, host, port,
/// plus the security parameters and collaborator identities that determine
/// pool compatibility (spec.md §3).
#[derive(Clone)]
pub struct Address {
    pub scheme: Scheme,
    pub authority: Authority,
    pub connection_specs: Vec<ConnectionSpec>,
    certificate_pinner_id: usize,
    proxy_selector_id: usize,
}

impl Address {
    pub fn new(scheme: Scheme, authority: Authority) -> Address {
        Address {
            scheme,
            authority,
            connection_specs: vec![ConnectionSpec::default()],
            certificate_pinner_id: 0,
            proxy_selector_id: 0,
        }
    }

    /// Tags this address with the identity of the collaborators it was
    /// built with, so `Eq` reflects "built from the same configuration" as
    /// the teacher's `Address.equals` does by comparing field references.
    pub fn with_collaborator_identities<P, S>(
        mut self,
        pinner: &Arc<P>,
        selector: &Arc<S>,
    ) -> Address {
        self.certificate_pinner_id = Arc::as_ptr(pinner) as *const () as usize;
        self.proxy_selector_id = Arc::as_ptr(selector) as *const () as usize;
        self
    }

    pub fn is_https(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }

    pub fn host(&self) -> &str {
        self.authority.host()
    }

    pub fn port(&self) -> u16 {
        self.authority
            .port_u16()
            .unwrap_or(if self.is_https() { 443 } else { 80 })
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme
            && self.authority == other.authority
            && self.certificate_pinner_id == other.certificate_pinner_id
            && self.proxy_selector_id == other.proxy_selector_id
    }
}

impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.scheme.as_str().hash(state);
        self.authority.as_str().hash(state);
        self.certificate_pinner_id.hash(state);
        self.proxy_selector_id.hash(state);
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Address")
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_scheme_and_authority_are_equal() {
        let a = Address::new(Scheme::HTTPS, "example.com".parse().unwrap());
        let b = Address::new(Scheme::HTTPS, "example.com".parse().unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn default_port_follows_scheme() {
        let https = Address::new(Scheme::HTTPS, "example.com".parse().unwrap());
        assert_eq!(https.port(), 443);
        let http = Address::new(Scheme::HTTP, "example.com".parse().unwrap());
        assert_eq!(http.port(), 80);
    }
}
