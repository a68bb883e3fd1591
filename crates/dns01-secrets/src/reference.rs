use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

use crate::error::SecretError;

const ENV_SCHEME: &str = "env://";
const FILE_SCHEME: &str = "file://";

/// Where a secret lives
///
/// - `env://VAR_NAME` - Environment variable
/// - `file:///path/to/file` - File content (bare absolute or `./` paths too)
/// - Anything else - Literal value
#[derive(Clone, PartialEq, Eq)]
pub enum SecretRef {
    Plain(String),
    Env { var_name: String },
    File { path: PathBuf },
}

impl SecretRef {
    /// Backend name for logging/errors
    pub fn backend_name(&self) -> &'static str {
        match self {
            SecretRef::Plain(_) => "plain",
            SecretRef::Env { .. } => "env",
            SecretRef::File { .. } => "file",
        }
    }
}

// Plain values are secrets themselves and never printed
impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretRef::Plain(_) => f.write_str("Plain(<redacted>)"),
            SecretRef::Env { var_name } => f.debug_struct("Env").field("var_name", var_name).finish(),
            SecretRef::File { path } => f.debug_struct("File").field("path", path).finish(),
        }
    }
}

impl FromStr for SecretRef {
    type Err = SecretError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(var_name) = s.strip_prefix(ENV_SCHEME) {
            if var_name.is_empty() {
                return Err(SecretError::invalid_reference(
                    s,
                    "env reference must name a variable",
                ));
            }
            Ok(SecretRef::Env {
                var_name: var_name.to_string(),
            })
        } else if let Some(path) = s.strip_prefix(FILE_SCHEME) {
            if path.is_empty() {
                return Err(SecretError::invalid_reference(s, "file reference must specify a path"));
            }
            Ok(SecretRef::File {
                path: PathBuf::from(path),
            })
        } else if looks_like_file_path(s) {
            Ok(SecretRef::File {
                path: PathBuf::from(s),
            })
        } else {
            Ok(SecretRef::Plain(s.to_string()))
        }
    }
}

fn looks_like_file_path(s: &str) -> bool {
    s.starts_with('/') || s.starts_with("./") || s.starts_with("../")
}

impl<'de> Deserialize<'de> for SecretRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SecretRef::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_reference() {
        let reference: SecretRef = "env://NFSN_API_KEY".parse().unwrap();
        assert_eq!(
            reference,
            SecretRef::Env {
                var_name: "NFSN_API_KEY".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_file_reference() {
        let reference: SecretRef = "file:///etc/dns01/api-key".parse().unwrap();
        assert_eq!(
            reference,
            SecretRef::File {
                path: PathBuf::from("/etc/dns01/api-key"),
            }
        );
    }

    #[test]
    fn test_parse_bare_paths() {
        for path in ["/etc/dns01/api-key", "./api-key", "../secrets/api-key"] {
            let reference: SecretRef = path.parse().unwrap();
            assert_eq!(reference, SecretRef::File { path: PathBuf::from(path) });
        }
    }

    #[test]
    fn test_parse_plain_value() {
        let reference: SecretRef = "p4ssw0rdKey".parse().unwrap();
        assert_eq!(reference, SecretRef::Plain("p4ssw0rdKey".to_string()));
    }

    #[test]
    fn test_invalid_references() {
        assert!("env://".parse::<SecretRef>().is_err());
        assert!("file://".parse::<SecretRef>().is_err());
    }

    #[test]
    fn test_debug_hides_plain_value() {
        let reference = SecretRef::Plain("hunter2".to_string());
        assert!(!format!("{:?}", reference).contains("hunter2"));
    }

    #[test]
    fn test_deserialize() {
        let reference: SecretRef = serde_json::from_str("\"env://KEY\"").unwrap();
        assert_eq!(reference.backend_name(), "env");
    }
}
