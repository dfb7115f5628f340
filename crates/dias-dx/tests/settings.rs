use std::collections::BTreeMap;

use dias_core::DiasError;
use dias_dx::{DxClient, DxSettings};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: BTreeMap<String, String> = vars
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn defaults_point_at_the_public_api_server() {
    let settings = DxSettings::from_lookup(lookup(&[(
        "DX_SECURITY_CONTEXT",
        r#"{"auth_token_type": "Bearer", "auth_token": "secret"}"#,
    )]))
    .expect("settings");
    assert_eq!(settings.base_url(), "https://api.dnanexus.com:443");
    assert_eq!(settings.auth_token, "secret");
    assert_eq!(settings.project, None);
    assert_eq!(settings.job, None);
    assert_eq!(settings.poll_interval_ms, 30_000);
}

#[test]
fn job_context_and_overrides_are_read() {
    let settings = DxSettings::from_lookup(lookup(&[
        ("DX_SECURITY_CONTEXT", r#"{"auth_token": "t"}"#),
        ("DX_APISERVER_HOST", "localhost"),
        ("DX_APISERVER_PORT", "8124"),
        ("DX_APISERVER_PROTOCOL", "http"),
        ("DX_PROJECT_CONTEXT_ID", "project-run"),
        ("DX_JOB_ID", "job-parent"),
        ("DIAS_DX_POLL_INTERVAL_MS", "50"),
        ("DIAS_DX_CONNECT_TIMEOUT_MS", "1"),
    ]))
    .expect("settings");
    assert_eq!(settings.base_url(), "http://localhost:8124");
    assert_eq!(settings.project.as_ref().map(|p| p.as_str()), Some("project-run"));
    assert_eq!(settings.job.as_ref().map(|j| j.as_str()), Some("job-parent"));
    assert_eq!(settings.poll_interval_ms, 50);
    // Out of range values fall back to the default.
    assert_eq!(settings.connect_timeout_ms, 10_000);

    let client = DxClient::new(settings.clone());
    assert_eq!(client.settings(), &settings);
}

#[test]
fn missing_or_broken_credentials_are_rejected() {
    let missing = DxSettings::from_lookup(lookup(&[]));
    assert!(matches!(missing, Err(DiasError::Platform(_))));

    let broken = DxSettings::from_lookup(lookup(&[("DX_SECURITY_CONTEXT", "not json")]));
    assert_eq!(broken.expect_err("broken").info().code, "dx_security_context");

    let port = DxSettings::from_lookup(lookup(&[
        ("DX_SECURITY_CONTEXT", r#"{"auth_token": "t"}"#),
        ("DX_APISERVER_PORT", "http"),
    ]));
    assert_eq!(port.expect_err("port").info().code, "dx_apiserver_port");
}
