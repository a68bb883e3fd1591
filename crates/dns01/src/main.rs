use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use dns01_acme::{AcmeAuthority, Directory};
use dns01_core::{
    CertificateStore, IssueError, IssueFailure, Issuer, KeyType, ManualProvider, OutputLayout,
    Prompter, Provider, ProviderError, PublicSuffixResolver, StateFile, Target,
};
use dns01_nfsn::NfsnClient;
use dns01_secrets::SecretResolver;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod terminal;

use config::Paths;
use terminal::TerminalPrompter;

/// dns01 - Let's Encrypt certificates through DNS-01 challenges
#[derive(Parser, Debug)]
#[command(name = "dns01", version)]
#[command(about = "Obtain a Let's Encrypt certificate by publishing a DNS TXT record")]
struct Cli {
    /// Hostname to certify (`*.example.com` for a wildcard)
    fqdn: String,

    /// Domain the hostname's DNS is managed under (inferred when omitted)
    domain: Option<String>,

    /// Show the target breakdown, debug logs and authority state on failure
    #[arg(short, long)]
    verbose: bool,

    /// Private key type: ec (P-256), ec384 (P-384) or rsa (2048-bit)
    #[arg(long = "type", value_name = "TYPE", default_value = "ec")]
    key_type: KeyType,

    /// Write leaf, chain and key to separate files instead of one .pem
    #[arg(long)]
    split: bool,

    /// How the challenge record gets published
    #[arg(long, value_enum, default_value_t = ProviderKind::Nfsn)]
    provider: ProviderKind,

    /// Directory for account state and caches (default: <config dir>/dns01)
    #[arg(long, env = "DNS01_DATA_DIR")]
    data_dir: Option<String>,

    /// Use the Let's Encrypt staging directory
    #[arg(long, env = "DNS01_STAGING")]
    staging: bool,

    /// Skip the wait after the record has reached every nameserver
    #[arg(long)]
    no_grace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    /// NearlyFreeSpeech.NET DNS API
    Nfsn,
    /// Print the record and wait for it to be created by hand
    Manual,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    init_logging(verbose);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Interrupted, stopping");
            cancel.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e, verbose);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    for crate_name in ["dns01", "dns01_core", "dns01_acme", "dns01_nfsn"] {
        if let Ok(directive) = format!("{}={}", crate_name, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    let prompter = Arc::new(TerminalPrompter::new());

    let data_dir = config::data_dir(cli.data_dir.as_deref())?;
    let paths = Paths::new(&data_dir, cli.staging);
    tracing::debug!(data_dir = %data_dir.display(), staging = cli.staging, "Using data directory");

    let target = resolve_target(cli.fqdn.clone(), cli.domain.clone(), paths.psl_cache.clone())
        .await?;
    if cli.verbose {
        prompter.say(&target.to_string());
    }

    let mut state = StateFile::open(paths.state_file()).context("Failed to load state")?;

    let provider: Provider = match cli.provider {
        ProviderKind::Manual => ManualProvider::new(prompter.clone()).into(),
        ProviderKind::Nfsn => {
            let credentials =
                config::resolve_credentials(&mut state, prompter.as_ref(), &SecretResolver::new())?;
            let mut settings = dns01_nfsn::default_settings();
            if cli.no_grace {
                settings = settings.with_grace(Duration::ZERO);
            }
            let client = NfsnClient::new(credentials.login, credentials.api_key);
            dns01_nfsn::provider(client, settings).into()
        }
    };
    tracing::debug!(provider = provider.kind(), "Provider selected");

    let directory = if cli.staging {
        Directory::Staging
    } else {
        Directory::Production
    };
    let authority = AcmeAuthority::new(directory, &paths.account_dir);

    let layout = if cli.split {
        OutputLayout::Split
    } else {
        OutputLayout::Combined
    };
    let output_dir = std::env::current_dir().context("Failed to read current directory")?;
    let store = CertificateStore::new(output_dir, layout, cli.key_type);

    let mut issuer = Issuer::new(
        target,
        Arc::new(authority),
        Arc::new(provider),
        prompter.clone(),
        state,
        store,
    )
    .with_cancellation(cancel);

    let issued = issuer.run().await?;

    if issued.reused_order {
        prompter.say("The order was already fulfilled; downloaded its certificate again.");
    }
    for path in &issued.files.written {
        prompter.success(&format!("Wrote {}", path.display()));
    }
    prompter.say("All set!");
    Ok(())
}

/// Build the target, downloading the suffix list if the domain must be inferred
async fn resolve_target(
    fqdn: String,
    domain: Option<String>,
    psl_cache: PathBuf,
) -> Result<Target> {
    let target = tokio::task::spawn_blocking(move || {
        let suffixes = PublicSuffixResolver::new(psl_cache);
        Target::new(&fqdn, domain.as_deref(), &suffixes)
    })
    .await
    .context("Suffix lookup task failed")??;
    Ok(target)
}

/// Issuance failure with a suggestion for the operator
#[derive(Debug, miette::Diagnostic, thiserror::Error)]
#[error("{message}")]
#[diagnostic(code(dns01::issue), severity(error))]
struct IssueDiagnostic {
    message: String,
    #[help]
    help: Option<String>,
}

fn report(error: &anyhow::Error, verbose: bool) {
    let Some(failure) = error.downcast_ref::<IssueFailure>() else {
        eprintln!("Error: {:#}", error);
        return;
    };

    if failure.error.is_cancelled() {
        eprintln!("{}", failure);
        return;
    }

    let diagnostic = IssueDiagnostic {
        message: failure.to_string(),
        help: hint(&failure.error),
    };
    eprintln!("{:?}", miette::Report::new(diagnostic));

    if verbose {
        if let Some(snapshot) = failure.snapshot() {
            eprintln!("Last state reported by the authority:\n{}", snapshot.to_json());
        }
    }
}

fn hint(error: &IssueError) -> Option<String> {
    let text = match error {
        IssueError::TermsDeclined => "Run again and answer 'y' to accept the terms.".to_string(),
        IssueError::ContactRequired => {
            "Let's Encrypt sends expiry notices to this address.".to_string()
        }
        IssueError::Provider(ProviderError::PropagationTimeout { nameserver, .. }) => format!(
            "{} had not picked up the record yet; DNS changes can be slow, try again shortly.",
            nameserver
        ),
        IssueError::Provider(ProviderError::DnsWrite(_) | ProviderError::DnsProvider { .. }) => {
            "Check the NFSN member login and API key.".to_string()
        }
        IssueError::Challenge { .. } => {
            "The TXT record must hold exactly the published value when the authority checks it."
                .to_string()
        }
        IssueError::Authority(_) => "Re-run with --verbose for more detail.".to_string(),
        _ => return None,
    };
    Some(text)
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["dns01", "www.example.com"]).unwrap();
        assert_eq!(cli.fqdn, "www.example.com");
        assert_eq!(cli.domain, None);
        assert_eq!(cli.key_type, KeyType::Ec);
        assert_eq!(cli.provider, ProviderKind::Nfsn);
        assert!(!cli.split);
        assert!(!cli.no_grace);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "dns01",
            "--type",
            "ec384",
            "--split",
            "--provider",
            "manual",
            "--no-grace",
            "-v",
            "*.example.co.uk",
            "example.co.uk",
        ])
        .unwrap();
        assert_eq!(cli.key_type, KeyType::Ec384);
        assert_eq!(cli.provider, ProviderKind::Manual);
        assert_eq!(cli.domain.as_deref(), Some("example.co.uk"));
        assert!(cli.split && cli.no_grace && cli.verbose);
    }

    #[test]
    fn test_cli_key_types() {
        let cli = Cli::try_parse_from(["dns01", "--type", "rsa", "example.com"]).unwrap();
        assert_eq!(cli.key_type, KeyType::Rsa);
        assert!(Cli::try_parse_from(["dns01", "--type", "dsa", "example.com"]).is_err());
    }

    #[test]
    fn test_hints() {
        assert!(hint(&IssueError::TermsDeclined).is_some());
        assert!(hint(&IssueError::Cancelled).is_none());

        let timeout = IssueError::Provider(ProviderError::PropagationTimeout {
            nameserver: "ns.phx3.nearlyfreespeech.net".to_string(),
            attempts: 60,
        });
        assert!(hint(&timeout)
            .unwrap()
            .starts_with("ns.phx3.nearlyfreespeech.net"));
    }
}
