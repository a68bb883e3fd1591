//! Certificate target: the requested hostname and the zone that holds its records

use std::fmt;

use thiserror::Error;

use crate::psl::{PslError, SuffixResolver};

/// Label under which DNS-01 challenge records are published
pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

const WILDCARD_PREFIX: &str = "*.";

/// Errors from target construction
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("FQDN \"{0}\" is not a valid hostname")]
    InvalidHostname(String),

    #[error("Domain \"{0}\" is not a valid hostname")]
    InvalidDomain(String),

    #[error("FQDN \"{fqdn}\" is not within the domain \"{domain}\"")]
    FqdnNotInDomain { fqdn: String, domain: String },

    #[error("Could not infer the domain of \"{fqdn}\": {source}")]
    SuffixLookup {
        fqdn: String,
        #[source]
        source: PslError,
    },
}

/// A hostname to certify and the domain its DNS records are managed under
///
/// `name` is the part of `fqdn` below `domain` and keeps a leading wildcard
/// marker; `domain` never carries one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    fqdn: String,
    domain: String,
    name: String,
}

impl Target {
    /// Build a target from a requested hostname and an optional explicit domain
    ///
    /// Without a domain the registrable domain is looked up through `suffixes`.
    pub fn new(
        fqdn: &str,
        domain: Option<&str>,
        suffixes: &dyn SuffixResolver,
    ) -> Result<Self, TargetError> {
        let fqdn = fqdn.to_ascii_lowercase();
        let bare = fqdn.strip_prefix(WILDCARD_PREFIX).unwrap_or(&fqdn);
        if !is_valid_hostname(bare) {
            return Err(TargetError::InvalidHostname(bare.to_string()));
        }

        let explicit = domain
            .map(|d| d.strip_prefix('.').unwrap_or(d).to_ascii_lowercase())
            .filter(|d| !d.is_empty());

        let domain = match explicit {
            Some(domain) => {
                if !is_valid_hostname(&domain) {
                    return Err(TargetError::InvalidDomain(domain));
                }
                domain
            }
            None => suffixes
                .registrable_domain(bare)
                .map_err(|source| TargetError::SuffixLookup {
                    fqdn: bare.to_string(),
                    source,
                })?
                .to_ascii_lowercase(),
        };

        let name = if fqdn == domain {
            String::new()
        } else if fqdn.ends_with(&format!(".{}", domain)) {
            fqdn[..fqdn.len() - domain.len() - 1].to_string()
        } else {
            return Err(TargetError::FqdnNotInDomain { fqdn, domain });
        };

        Ok(Self { fqdn, domain, name })
    }

    /// The requested hostname, including any wildcard marker
    pub fn fqdn(&self) -> &str {
        &self.fqdn
    }

    /// Domain under which DNS records are managed
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Part of the hostname below the domain (empty for the apex)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_wildcard(&self) -> bool {
        self.fqdn.starts_with(WILDCARD_PREFIX)
    }

    /// Challenge record name relative to the domain
    ///
    /// A wildcard target and its apex map to the same record.
    pub fn acme_name(&self) -> String {
        match self.name.as_str() {
            "" | "*" => ACME_CHALLENGE_LABEL.to_string(),
            name => {
                let name = name.strip_prefix(WILDCARD_PREFIX).unwrap_or(name);
                format!("{}.{}", ACME_CHALLENGE_LABEL, name)
            }
        }
    }

    /// Fully-qualified challenge record name
    pub fn acme_fqdn(&self) -> String {
        format!("{}.{}", self.acme_name(), self.domain)
    }

    /// Hostname usable in file names (`*` becomes `_`)
    pub fn file_stem(&self) -> String {
        self.fqdn.replace('*', "_")
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FQDN: {}", self.fqdn)?;
        writeln!(f, "Domain: {}", self.domain)?;
        writeln!(f, "Name: {}", self.name)?;
        writeln!(f, "ACME Name: {}", self.acme_name())?;
        write!(f, "ACME FQDN: {}", self.acme_fqdn())
    }
}

/// Check RFC 1123 hostname syntax (no trailing dot)
pub fn is_valid_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }

    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psl::StaticSuffixResolver;

    fn psl() -> StaticSuffixResolver {
        StaticSuffixResolver::new(["com", "net", "uk", "co.uk"])
    }

    fn target(fqdn: &str) -> Target {
        Target::new(fqdn, None, &psl()).unwrap()
    }

    #[test]
    fn test_apex_target() {
        let t = target("example.com");
        assert_eq!(t.domain(), "example.com");
        assert_eq!(t.name(), "");
        assert_eq!(t.acme_name(), "_acme-challenge");
        assert_eq!(t.acme_fqdn(), "_acme-challenge.example.com");
    }

    #[test]
    fn test_nested_subdomain() {
        let t = target("www.sub.example.com");
        assert_eq!(t.domain(), "example.com");
        assert_eq!(t.name(), "www.sub");
        assert_eq!(t.acme_name(), "_acme-challenge.www.sub");
        assert_eq!(t.acme_fqdn(), "_acme-challenge.www.sub.example.com");
    }

    #[test]
    fn test_wildcard_shares_apex_record() {
        let wild = target("*.example.com");
        assert_eq!(wild.fqdn(), "*.example.com");
        assert_eq!(wild.domain(), "example.com");
        assert_eq!(wild.name(), "*");
        assert_eq!(wild.acme_fqdn(), "_acme-challenge.example.com");
        assert!(wild.is_wildcard());

        for apex in ["example.com", "sub.example.com", "a.b.example.co.uk"] {
            let wild = target(&format!("*.{}", apex));
            assert_eq!(wild.acme_fqdn(), target(apex).acme_fqdn());
        }
    }

    #[test]
    fn test_explicit_domain() {
        let t = Target::new("www.sub.example.com", Some("sub.example.com"), &psl()).unwrap();
        assert_eq!(t.domain(), "sub.example.com");
        assert_eq!(t.name(), "www");
        assert_eq!(t.acme_fqdn(), "_acme-challenge.www.sub.example.com");

        let t = Target::new("www.example.com", Some(".example.com"), &psl()).unwrap();
        assert_eq!(t.domain(), "example.com");

        // Empty domain means "infer it"
        let t = Target::new("www.example.com", Some(""), &psl()).unwrap();
        assert_eq!(t.domain(), "example.com");
    }

    #[test]
    fn test_wildcard_with_explicit_domain() {
        let t = Target::new("*.www.example.com", Some("example.com"), &psl()).unwrap();
        assert_eq!(t.name(), "*.www");
        assert_eq!(t.acme_name(), "_acme-challenge.www");
    }

    #[test]
    fn test_fqdn_not_in_domain() {
        let err = Target::new("www.example.com", Some("example.net"), &psl()).unwrap_err();
        assert!(matches!(err, TargetError::FqdnNotInDomain { .. }));

        // Suffix match must fall on a label boundary
        let err = Target::new("notexample.com", Some("example.com"), &psl()).unwrap_err();
        assert!(matches!(err, TargetError::FqdnNotInDomain { .. }));

        let err = Target::new("example.com", Some("www.example.com"), &psl()).unwrap_err();
        assert!(matches!(err, TargetError::FqdnNotInDomain { .. }));
    }

    #[test]
    fn test_invalid_inputs() {
        for bad in ["", "exa mple.com", "-bad.example.com", "example.com.", "a..b.com"] {
            let err = Target::new(bad, None, &psl()).unwrap_err();
            assert!(matches!(err, TargetError::InvalidHostname(_)), "{:?}", bad);
        }

        let err = Target::new("**.example.com", None, &psl()).unwrap_err();
        assert!(matches!(err, TargetError::InvalidHostname(_)));

        let err = Target::new("www.example.com", Some("*.example.com"), &psl()).unwrap_err();
        assert!(matches!(err, TargetError::InvalidDomain(_)));
    }

    #[test]
    fn test_suffix_lookup_failure() {
        let err = Target::new("co.uk", None, &psl()).unwrap_err();
        assert!(matches!(err, TargetError::SuffixLookup { .. }));
    }

    #[test]
    fn test_construction_is_deterministic() {
        for fqdn in ["example.com", "www.example.co.uk", "*.sub.example.com"] {
            let a = target(fqdn);
            let b = target(fqdn);
            assert_eq!(a, b);
            assert_eq!(a.acme_name(), b.acme_name());
            assert_eq!(a.acme_fqdn(), b.acme_fqdn());
        }
    }

    #[test]
    fn test_case_is_normalized() {
        let t = Target::new("WWW.Example.COM", Some("EXAMPLE.com"), &psl()).unwrap();
        assert_eq!(t.fqdn(), "www.example.com");
        assert_eq!(t.name(), "www");
    }

    #[test]
    fn test_file_stem_and_display() {
        let t = target("*.example.com");
        assert_eq!(t.file_stem(), "_.example.com");

        let shown = t.to_string();
        assert!(shown.contains("FQDN: *.example.com"));
        assert!(shown.contains("ACME FQDN: _acme-challenge.example.com"));
    }

    #[test]
    fn test_hostname_validation() {
        assert!(is_valid_hostname("localhost"));
        assert!(is_valid_hostname("xn--bcher-kva.example"));
        assert!(!is_valid_hostname(&format!("{}.com", "a".repeat(64))));
        assert!(!is_valid_hostname("under_score.com"));
    }
}
