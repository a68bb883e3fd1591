use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dns01_core::{Prompter, StateFile};
use dns01_nfsn::Credentials;
use dns01_secrets::{SecretRef, SecretResolver};

/// Environment variable holding the NFSN member login
pub const LOGIN_ENV: &str = "NFSN_API_USERNAME";
/// Environment variable holding the NFSN API key
pub const API_KEY_ENV: &str = "NFSN_API_KEY";

/// State keys under `api`
pub const LOGIN_KEY: &str = "nfsn_member_login";
pub const API_KEY_KEY: &str = "nfsn_api_key";

pub const STATE_FILE: &str = "state.json";
pub const PSL_CACHE_FILE: &str = "public_suffix_list.dat";

/// Where the tool keeps its files
#[derive(Debug, Clone)]
pub struct Paths {
    /// Account state and ACME credentials
    pub account_dir: PathBuf,
    /// Suffix list cache, shared by staging and production
    pub psl_cache: PathBuf,
}

impl Paths {
    /// Staging accounts live in their own `staging/` subdirectory
    pub fn new(data_dir: &Path, staging: bool) -> Self {
        let account_dir = if staging {
            data_dir.join("staging")
        } else {
            data_dir.to_path_buf()
        };
        Self {
            account_dir,
            psl_cache: data_dir.join(PSL_CACHE_FILE),
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.account_dir.join(STATE_FILE)
    }
}

/// Expand `~` and variables in a user-supplied data directory, or fall back
/// to `<config dir>/dns01`
pub fn data_dir(configured: Option<&str>) -> Result<PathBuf> {
    match configured {
        Some(dir) => {
            let expanded = shellexpand::full(dir)
                .with_context(|| format!("Failed to expand data directory: {}", dir))?;
            Ok(PathBuf::from(expanded.as_ref()))
        }
        None => {
            let base = dirs::config_dir().context("Could not determine config directory")?;
            Ok(base.join("dns01"))
        }
    }
}

/// Look up NFSN credentials: environment, then stored state, then the operator
///
/// A login typed in is always stored; a typed API key only when the operator
/// agrees. Stored values may be secret references (`env://`, `file://`).
pub fn resolve_credentials(
    state: &mut StateFile,
    prompter: &dyn Prompter,
    secrets: &SecretResolver,
) -> Result<Credentials> {
    let login = match lookup(LOGIN_ENV, LOGIN_KEY, state, secrets)? {
        Some(login) => login,
        None => {
            let login = ask(prompter, "NFSN member login: ")?;
            state
                .set_api_value(LOGIN_KEY, &login)
                .context("Failed to save member login")?;
            login
        }
    };

    let api_key = match lookup(API_KEY_ENV, API_KEY_KEY, state, secrets)? {
        Some(key) => key,
        None => {
            let key = ask(prompter, "NFSN API key: ")?;
            let question = format!("Save the API key in {} [y/n]? ", state.path().display());
            if prompter.confirm(&question).unwrap_or(false) {
                state
                    .set_api_value(API_KEY_KEY, &key)
                    .context("Failed to save API key")?;
            }
            key
        }
    };

    Ok(Credentials { login, api_key })
}

fn lookup(
    env: &str,
    key: &str,
    state: &StateFile,
    secrets: &SecretResolver,
) -> Result<Option<String>> {
    if let Ok(value) = std::env::var(env) {
        let value = value.trim();
        if !value.is_empty() {
            tracing::debug!(source = env, "Using credential from environment");
            return Ok(Some(value.to_string()));
        }
    }

    let Some(stored) = state.api_value(key) else {
        return Ok(None);
    };
    let reference: SecretRef = stored
        .parse()
        .with_context(|| format!("Invalid secret reference for {}", key))?;
    let value = secrets
        .resolve_trimmed(&reference)
        .map_err(|e| anyhow::anyhow!("Failed to resolve {}: {}", key, e))?;
    tracing::debug!(key, backend = reference.backend_name(), "Using stored credential");
    Ok(Some(value))
}

fn ask(prompter: &dyn Prompter, question: &str) -> Result<String> {
    let answer = prompter
        .read_line(question)
        .context("Failed to read from terminal")?
        .unwrap_or_default();
    if answer.is_empty() {
        anyhow::bail!("NFSN API credentials are required.");
    }
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dns01_core::PromptError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        answers: Mutex<VecDeque<&'static str>>,
    }

    impl Scripted {
        fn new(answers: &[&'static str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().copied().collect()),
            }
        }
    }

    impl Prompter for Scripted {
        fn say(&self, _message: &str) {}

        fn confirm(&self, _question: &str) -> Result<bool, PromptError> {
            let answer = self.answers.lock().unwrap().pop_front();
            Ok(answer == Some("y"))
        }

        fn read_line(&self, _question: &str) -> Result<Option<String>, PromptError> {
            Ok(self.answers.lock().unwrap().pop_front().map(String::from))
        }
    }

    #[test]
    fn test_paths() {
        let paths = Paths::new(Path::new("/data"), false);
        assert_eq!(paths.state_file(), Path::new("/data/state.json"));
        assert_eq!(paths.psl_cache, Path::new("/data/public_suffix_list.dat"));

        let staging = Paths::new(Path::new("/data"), true);
        assert_eq!(staging.state_file(), Path::new("/data/staging/state.json"));
        assert_eq!(staging.psl_cache, Path::new("/data/public_suffix_list.dat"));
    }

    #[test]
    fn test_data_dir_expands_home() {
        let dir = data_dir(Some("~/certs")).unwrap();
        assert!(!dir.to_string_lossy().starts_with('~'));
        assert!(dir.ends_with("certs"));
    }

    #[test]
    fn test_stored_references_are_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("api.key");
        std::fs::write(&key_file, "s3cret\n").unwrap();

        let mut state = StateFile::open(dir.path().join("state.json")).unwrap();
        state.set_api_value("login_ref", "member").unwrap();
        state
            .set_api_value("key_ref", &format!("file://{}", key_file.display()))
            .unwrap();

        let secrets = SecretResolver::new();
        assert_eq!(
            lookup("DNS01_TEST_UNSET_LOGIN", "login_ref", &state, &secrets)
                .unwrap()
                .as_deref(),
            Some("member")
        );
        assert_eq!(
            lookup("DNS01_TEST_UNSET_KEY", "key_ref", &state, &secrets)
                .unwrap()
                .as_deref(),
            Some("s3cret")
        );
        assert_eq!(
            lookup("DNS01_TEST_UNSET_KEY", "missing", &state, &secrets).unwrap(),
            None
        );
    }

    #[test]
    fn test_ask_requires_answer() {
        let prompter = Scripted::new(&[""]);
        assert!(ask(&prompter, "login: ").is_err());

        let prompter = Scripted::new(&["member"]);
        assert_eq!(ask(&prompter, "login: ").unwrap(), "member");
    }

    #[test]
    fn test_prompted_key_saved_only_on_agreement() {
        if std::env::var(LOGIN_ENV).is_ok() || std::env::var(API_KEY_ENV).is_ok() {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let secrets = SecretResolver::new();

        let mut state = StateFile::open(&path).unwrap();
        let prompter = Scripted::new(&["member", "s3cret", "n"]);
        let credentials = resolve_credentials(&mut state, &prompter, &secrets).unwrap();
        assert_eq!(credentials.login, "member");
        assert_eq!(credentials.api_key, "s3cret");

        let reopened = StateFile::open(&path).unwrap();
        assert_eq!(reopened.api_value(LOGIN_KEY), Some("member"));
        assert_eq!(reopened.api_value(API_KEY_KEY), None);

        let mut state = reopened;
        let prompter = Scripted::new(&["s3cret", "y"]);
        resolve_credentials(&mut state, &prompter, &secrets).unwrap();
        let reopened = StateFile::open(&path).unwrap();
        assert_eq!(reopened.api_value(API_KEY_KEY), Some("s3cret"));
    }
}
