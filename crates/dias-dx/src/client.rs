//! Blocking API client shared by the store and platform backends.

use std::io::Read;
use std::time::Duration;

use dias_core::{DiasError, ErrorInfo};
use serde_json::Value;
use tracing::debug;

use crate::env::DxSettings;
use crate::wire::api_error;

/// Which error family a failed call is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Family {
    Store,
    Platform,
}

impl Family {
    pub(crate) fn wrap(self, info: ErrorInfo) -> DiasError {
        match self {
            Family::Store => DiasError::Store(info),
            Family::Platform => DiasError::Platform(info),
        }
    }
}

/// Authenticated client for one API server.
#[derive(Debug, Clone)]
pub struct DxClient {
    agent: ureq::Agent,
    settings: DxSettings,
}

impl DxClient {
    /// Builds a client with the timeouts from `settings`.
    pub fn new(settings: DxSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(settings.connect_timeout_ms))
            .timeout_read(Duration::from_millis(settings.request_timeout_ms))
            .timeout_write(Duration::from_millis(settings.request_timeout_ms))
            .build();
        Self { agent, settings }
    }

    /// Builds a client from the `DX_*` environment.
    pub fn from_env() -> Result<Self, DiasError> {
        DxSettings::from_env().map(Self::new)
    }

    /// Settings the client was built with.
    pub fn settings(&self) -> &DxSettings {
        &self.settings
    }

    /// POSTs `body` to `/<route>` and decodes the JSON reply.
    pub(crate) fn call(&self, route: &str, body: &Value, family: Family) -> Result<Value, DiasError> {
        let url = format!("{}/{}", self.settings.base_url(), route.trim_start_matches('/'));
        let payload = serde_json::to_string(body)
            .map_err(|err| DiasError::serde("dx_request_encode", err))?;
        debug!(route, "dx api call");
        let response = self
            .agent
            .post(&url)
            .set("content-type", "application/json")
            .set("authorization", &format!("Bearer {}", self.settings.auth_token))
            .send_string(&payload);
        match response {
            Ok(response) => {
                let text = response.into_string().map_err(|err| {
                    family.wrap(
                        ErrorInfo::new("dx_response_read", err.to_string())
                            .with_context("route", route),
                    )
                })?;
                serde_json::from_str(&text).map_err(|err| {
                    family.wrap(
                        ErrorInfo::new("dx_response_decode", err.to_string())
                            .with_context("route", route),
                    )
                })
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                let mut info = ErrorInfo::new("dx_http_status", "API call was rejected")
                    .with_context("route", route)
                    .with_context("status", status.to_string());
                if let Some((kind, message)) = api_error(&body) {
                    info = info.with_context("error_type", kind).with_hint(message);
                }
                Err(family.wrap(info))
            }
            Err(ureq::Error::Transport(err)) => Err(family.wrap(
                ErrorInfo::new("dx_transport", err.to_string()).with_context("route", route),
            )),
        }
    }

    /// Fetches a pre-signed download URL.
    pub(crate) fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<Vec<u8>, DiasError> {
        let mut request = self.agent.get(url);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        let response = request.call().map_err(|err| transfer_error("dx_download", err))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|err| DiasError::store("dx_download", err))?;
        Ok(bytes)
    }

    /// PUTs `bytes` to a pre-signed upload URL.
    pub(crate) fn put(&self, url: &str, headers: &[(String, String)], bytes: &[u8]) -> Result<(), DiasError> {
        let mut request = self.agent.put(url);
        for (name, value) in headers {
            request = request.set(name, value);
        }
        request
            .send_bytes(bytes)
            .map(|_| ())
            .map_err(|err| transfer_error("dx_upload", err))
    }
}

fn transfer_error(code: &str, err: ureq::Error) -> DiasError {
    match err {
        ureq::Error::Status(status, _) => DiasError::Store(
            ErrorInfo::new(code, "transfer was rejected").with_context("status", status.to_string()),
        ),
        ureq::Error::Transport(err) => DiasError::store(code, err),
    }
}

/// Header pairs from a `download`/`upload` reply.
pub(crate) fn headers(reply: &Value) -> Vec<(String, String)> {
    reply
        .get("headers")
        .and_then(Value::as_object)
        .map(|headers| {
            headers
                .iter()
                .filter_map(|(name, value)| value.as_str().map(|value| (name.clone(), value.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
