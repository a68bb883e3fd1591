//! Secret resolution dispatcher

use std::path::Path;

use crate::error::SecretError;
use crate::reference::SecretRef;

/// Resolves secrets from their backends based on reference kind
#[derive(Debug, Default)]
pub struct SecretResolver {
    _private: (),
}

impl SecretResolver {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Resolve a reference to its actual value
    pub fn resolve(&self, reference: &SecretRef) -> Result<String, SecretError> {
        tracing::debug!(backend = reference.backend_name(), "Resolving secret");

        match reference {
            SecretRef::Plain(value) => Ok(value.clone()),
            SecretRef::Env { var_name } => resolve_env(var_name),
            SecretRef::File { path } => resolve_file(path),
        }
    }

    /// Resolve a reference, trimming whitespace; an empty result is an error
    pub fn resolve_trimmed(&self, reference: &SecretRef) -> Result<String, SecretError> {
        let value = self.resolve(reference)?.trim().to_string();
        if value.is_empty() {
            return Err(SecretError::Empty(reference.backend_name()));
        }
        Ok(value)
    }
}

fn resolve_env(var_name: &str) -> Result<String, SecretError> {
    std::env::var(var_name).map_err(|_| SecretError::EnvNotSet {
        var: var_name.to_string(),
    })
}

fn resolve_file(path: &Path) -> Result<String, SecretError> {
    std::fs::read_to_string(path).map_err(|e| SecretError::FileError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_resolve_plain() {
        let resolver = SecretResolver::new();
        let reference = SecretRef::Plain("my-secret".to_string());
        assert_eq!(resolver.resolve(&reference).unwrap(), "my-secret");
    }

    #[test]
    fn test_resolve_env() {
        std::env::set_var("DNS01_TEST_RESOLVER_SECRET", "env-secret-value");
        let resolver = SecretResolver::new();
        let reference = SecretRef::Env {
            var_name: "DNS01_TEST_RESOLVER_SECRET".to_string(),
        };
        assert_eq!(resolver.resolve(&reference).unwrap(), "env-secret-value");
        std::env::remove_var("DNS01_TEST_RESOLVER_SECRET");
    }

    #[test]
    fn test_resolve_missing_env() {
        let reference = SecretRef::Env {
            var_name: "DNS01_TEST_DEFINITELY_UNSET".to_string(),
        };
        assert!(matches!(
            SecretResolver::new().resolve(&reference),
            Err(SecretError::EnvNotSet { .. })
        ));
    }

    #[test]
    fn test_resolve_file_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "secret-content").unwrap();

        let reference = SecretRef::File {
            path: file.path().to_path_buf(),
        };
        assert_eq!(
            SecretResolver::new().resolve_trimmed(&reference).unwrap(),
            "secret-content"
        );
    }

    #[test]
    fn test_resolve_missing_file() {
        let reference = SecretRef::File {
            path: "/definitely/not/a/real/path/12345".into(),
        };
        assert!(matches!(
            SecretResolver::new().resolve(&reference),
            Err(SecretError::FileError { .. })
        ));
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        let reference = SecretRef::Plain("   ".to_string());
        assert!(matches!(
            SecretResolver::new().resolve_trimmed(&reference),
            Err(SecretError::Empty("plain"))
        ));
    }
}
