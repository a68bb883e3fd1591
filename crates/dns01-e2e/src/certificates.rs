//! Test certificate chains using rcgen

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
};

/// A CA and a leaf it signed, as the authority would hand them out
#[derive(Clone)]
pub struct TestChain {
    pub leaf_pem: String,
    pub ca_pem: String,
}

impl TestChain {
    /// Leaf for `hostname`, signed by a throwaway CA
    pub fn generate(hostname: &str) -> Self {
        let ca_key = KeyPair::generate().expect("Failed to generate CA key");
        let mut ca_params = CertificateParams::default();
        ca_params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, "dns01 Test CA");
            dn
        };
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_cert = ca_params
            .clone()
            .self_signed(&ca_key)
            .expect("Failed to create CA cert");
        let ca_issuer = Issuer::new(ca_params, ca_key);

        let leaf_key = KeyPair::generate().expect("Failed to generate leaf key");
        let leaf_params = CertificateParams::new(vec![hostname.to_string()])
            .expect("Failed to build leaf params");
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &ca_issuer)
            .expect("Failed to sign leaf cert");

        Self {
            leaf_pem: leaf_cert.pem(),
            ca_pem: ca_cert.pem(),
        }
    }

    /// Leaf followed by the CA, the order an ACME server returns them in
    pub fn chain_pem(&self) -> String {
        format!("{}{}", self.leaf_pem, self.ca_pem)
    }
}
