//! ACME certificate authority
//!
//! Adapts `instant-acme` to [`dns01_core::CertificateAuthority`]. Account
//! credentials are kept in `account.json` (mode 0600) inside the data
//! directory; orders are addressed by URL.

mod authority;

pub use authority::{AcmeAuthority, Directory, ACCOUNT_FILE};
