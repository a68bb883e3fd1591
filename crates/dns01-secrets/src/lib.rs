//! Secret references for provider credentials
//!
//! A stored credential may be the secret itself or a pointer to it:
//!
//! - **Environment variables** (`env://VAR_NAME`): read from the process environment
//! - **Files** (`file:///path`, or a bare `/path`, `./path`, `../path`): file content
//! - **Plain values**: anything else is taken literally
//!
//! ```rust,ignore
//! use dns01_secrets::{SecretRef, SecretResolver};
//!
//! let reference: SecretRef = "env://NFSN_API_KEY".parse()?;
//! let api_key = SecretResolver::new().resolve_trimmed(&reference)?;
//! ```

mod error;
mod reference;
mod resolver;

pub use error::SecretError;
pub use reference::SecretRef;
pub use resolver::SecretResolver;
