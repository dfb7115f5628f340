//! Connection settings read from the `DX_*` environment.

use std::env;

use dias_core::{ContainerId, DiasError, ErrorInfo, JobId};
use serde::Deserialize;

const DEFAULT_HOST: &str = "api.dnanexus.com";
const DEFAULT_PORT: u16 = 443;
const DEFAULT_PROTOCOL: &str = "https";

/// Everything the client needs to reach the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DxSettings {
    /// `http` or `https`, from `DX_APISERVER_PROTOCOL`.
    pub protocol: String,
    /// API server host, from `DX_APISERVER_HOST`.
    pub host: String,
    /// API server port, from `DX_APISERVER_PORT`.
    pub port: u16,
    /// Bearer token taken from `DX_SECURITY_CONTEXT`.
    pub auth_token: String,
    /// Project of the current context, used when a location has none.
    pub project: Option<ContainerId>,
    /// Set when running inside a platform job.
    pub job: Option<JobId>,
    /// Connect timeout, from `DIAS_DX_CONNECT_TIMEOUT_MS`.
    pub connect_timeout_ms: u64,
    /// Read and write timeout per request, from `DIAS_DX_REQUEST_TIMEOUT_MS`.
    pub request_timeout_ms: u64,
    /// Delay between state polls while waiting on a job.
    pub poll_interval_ms: u64,
}

#[derive(Deserialize)]
struct SecurityContext {
    auth_token: String,
}

impl DxSettings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, DiasError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DiasError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let raw_context = get("DX_SECURITY_CONTEXT").ok_or_else(|| {
            DiasError::Platform(
                ErrorInfo::new("dx_security_context", "DX_SECURITY_CONTEXT is not set")
                    .with_hint("log in with `dx login` or export a security context"),
            )
        })?;
        let context: SecurityContext = serde_json::from_str(&raw_context).map_err(|err| {
            DiasError::Platform(
                ErrorInfo::new("dx_security_context", "DX_SECURITY_CONTEXT is not valid JSON")
                    .with_hint(err.to_string()),
            )
        })?;
        let port = match get("DX_APISERVER_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                DiasError::Platform(
                    ErrorInfo::new("dx_apiserver_port", "DX_APISERVER_PORT is not a port")
                        .with_context("value", raw.clone()),
                )
            })?,
            None => DEFAULT_PORT,
        };
        let millis = |key: &str, range: std::ops::RangeInclusive<u64>, default: u64| {
            get(key)
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| range.contains(value))
                .unwrap_or(default)
        };
        Ok(Self {
            protocol: get("DX_APISERVER_PROTOCOL").unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
            host: get("DX_APISERVER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            auth_token: context.auth_token,
            project: get("DX_PROJECT_CONTEXT_ID").map(ContainerId::new),
            job: get("DX_JOB_ID").map(JobId::new),
            connect_timeout_ms: millis("DIAS_DX_CONNECT_TIMEOUT_MS", 100..=60_000, 10_000),
            request_timeout_ms: millis("DIAS_DX_REQUEST_TIMEOUT_MS", 100..=600_000, 120_000),
            poll_interval_ms: millis("DIAS_DX_POLL_INTERVAL_MS", 10..=600_000, 30_000),
        })
    }

    /// `protocol://host:port`, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}
