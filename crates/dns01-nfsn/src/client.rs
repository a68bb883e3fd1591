use std::sync::Arc;

use async_trait::async_trait;
use dns01_core::{
    ControlPlaneError, ControlPlaneFactory, DnsControlPlane, DnsRecord, ReplaceOutcome,
};
use rand::distr::Alphanumeric;
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::auth::{sign, AUTH_HEADER};

/// Production API endpoint
pub const API_BASE: &str = "https://api.nearlyfreespeech.net";

const SALT_LEN: usize = 16;

/// Member credentials for the API
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// NearlyFreeSpeech.NET API client
///
/// One client serves every domain of the member; [`NfsnClient::dns`] scopes it
/// to a single domain.
#[derive(Debug, Clone)]
pub struct NfsnClient {
    client: Client,
    credentials: Arc<Credentials>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiRecord {
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    debug: Option<String>,
}

/// Reply from a call that reached the API
struct ApiReply {
    status: StatusCode,
    body: String,
}

impl ApiReply {
    fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Explanation from a failed call, if the API gave one
    fn error_message(&self) -> Option<String> {
        error_message(&self.body)
    }
}

impl NfsnClient {
    pub fn new(login: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_base_url(login, api_key, API_BASE)
    }

    pub fn with_base_url(
        login: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            credentials: Arc::new(Credentials {
                login: login.into(),
                api_key: api_key.into(),
            }),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Record operations on one domain
    pub fn dns(&self, domain: &str) -> NfsnDns {
        NfsnDns {
            client: self.clone(),
            domain: domain.to_string(),
        }
    }

    async fn post(
        &self,
        uri: &str,
        form: &[(&str, &str)],
    ) -> Result<ApiReply, ControlPlaneError> {
        let body = encode_form(form);
        let timestamp = chrono::Utc::now().timestamp();
        let salt: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        let body_hash = hex::encode(Sha1::digest(body.as_bytes()));
        let auth = sign(
            &self.credentials.login,
            &self.credentials.api_key,
            timestamp,
            &salt,
            uri,
            &body_hash,
        );

        tracing::debug!(uri, "NFSN API request");

        let response = self
            .client
            .post(format!("{}{}", self.base_url, uri))
            .header(AUTH_HEADER, auth)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| ControlPlaneError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ControlPlaneError::Request(e.to_string()))?;

        if !status.is_success() {
            tracing::debug!(uri, %status, body = %body, "NFSN API call refused");
        }

        Ok(ApiReply { status, body })
    }
}

impl ControlPlaneFactory for NfsnClient {
    fn for_domain(&self, domain: &str) -> Arc<dyn DnsControlPlane> {
        Arc::new(self.dns(domain))
    }
}

/// DNS API of a single domain
#[derive(Debug, Clone)]
pub struct NfsnDns {
    client: NfsnClient,
    domain: String,
}

impl NfsnDns {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn uri(&self, method: &str) -> String {
        format!("/dns/{}/{}", self.domain, method)
    }
}

#[async_trait]
impl DnsControlPlane for NfsnDns {
    async fn list_records(
        &self,
        name: &str,
        record_type: &str,
    ) -> Result<Option<Vec<DnsRecord>>, ControlPlaneError> {
        let reply = self
            .client
            .post(&self.uri("listRRs"), &[("name", name), ("type", record_type)])
            .await?;

        if !reply.is_success() {
            return Ok(None);
        }

        let records: Vec<ApiRecord> = serde_json::from_str(&reply.body)
            .map_err(|e| ControlPlaneError::Api(format!("Unexpected listRRs response: {}", e)))?;

        Ok(Some(
            records
                .into_iter()
                .map(|r| DnsRecord {
                    name: r.name,
                    record_type: r.record_type,
                    data: r.data,
                })
                .collect(),
        ))
    }

    async fn replace_record(
        &self,
        name: &str,
        record_type: &str,
        value: &str,
        ttl: u32,
    ) -> Result<ReplaceOutcome, ControlPlaneError> {
        let ttl = ttl.to_string();
        let reply = self
            .client
            .post(
                &self.uri("replaceRR"),
                &[
                    ("name", name),
                    ("type", record_type),
                    ("data", value),
                    ("ttl", &ttl),
                ],
            )
            .await?;

        if reply.is_success() {
            tracing::info!(domain = %self.domain, name, "Replaced {} record", record_type);
            Ok(ReplaceOutcome::Replaced)
        } else {
            Ok(ReplaceOutcome::rejected(reply.error_message()))
        }
    }

    async fn remove_record(
        &self,
        name: &str,
        record_type: &str,
        value: &str,
    ) -> Result<bool, ControlPlaneError> {
        let reply = self
            .client
            .post(
                &self.uri("removeRR"),
                &[("name", name), ("type", record_type), ("data", value)],
            )
            .await?;

        if !reply.is_success() {
            tracing::warn!(
                domain = %self.domain,
                name,
                error = reply.error_message().as_deref().unwrap_or("unknown"),
                "Record removal refused"
            );
        }
        Ok(reply.is_success())
    }
}

/// `application/x-www-form-urlencoded` body, in the given order
pub(crate) fn encode_form(form: &[(&str, &str)]) -> String {
    form.iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Message from an error body: `error`, then `debug` in parentheses
pub(crate) fn error_message(body: &str) -> Option<String> {
    let parsed: ApiErrorBody = serde_json::from_str(body).ok()?;
    match (parsed.error, parsed.debug) {
        (Some(error), Some(debug)) if !debug.is_empty() => Some(format!("{} ({})", error, debug)),
        (Some(error), _) => Some(error),
        (None, Some(debug)) => Some(debug),
        (None, None) => None,
    }
}
