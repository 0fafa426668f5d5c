//! Redaction of sensitive environment values.
//!
//! Values are replaced with the fixed placeholder `<redacted>`; keys are
//! always retained so the report still shows which variables were set.

use lazy_static::lazy_static;
use regex::Regex;

/// The placeholder substituted for sensitive values.
pub const REDACTED: &str = "<redacted>";

/// Well-known sensitive variable name fragments, matched
/// case-insensitively against the whole key.
static SENSITIVE_KEY_PATTERNS: &[&str] = &[
    // generic secrets
    "API_KEY",
    "APIKEY",
    "SECRET",
    "PASSWORD",
    "PASSWD",
    "PWD",
    "TOKEN",
    "AUTH",
    "CREDENTIAL",
    "PRIVATE_KEY",
    "PRIVATEKEY",
    "CERT",
    "SIGNING_KEY",
    "ENCRYPTION_KEY",
    "MASTER_KEY",
    "LICENSE_KEY",
    "ACCESS_KEY",
    "SESSION_KEY",
    "CLIENT_SECRET",
    "REFRESH_TOKEN",
    "BEARER",
    "OAUTH",
    "JWT",
    "COOKIE",
    "CSRF",
    "SALT",
    "NONCE",
    "PASSPHRASE",
    // connection strings
    "CONNECTION_STRING",
    "CONNECTIONSTRING",
    "CONN_STR",
    "DATABASE_URL",
    "DB_URL",
    "REDIS_URL",
    "AMQP_URL",
    "MONGO_URI",
    "DSN",
    // cloud providers
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "AZURE_CLIENT_ID",
    "AZURE_CLIENT_SECRET",
    "AZURE_TENANT_ID",
    "GOOGLE_APPLICATION_CREDENTIALS",
    "GCP_KEY",
    "GCLOUD_KEY",
    // services
    "GITHUB_TOKEN",
    "GITLAB_TOKEN",
    "NPM_TOKEN",
    "NUGET_API_KEY",
    "PYPI_TOKEN",
    "DOCKER_PASSWORD",
    "SLACK_TOKEN",
    "SLACK_WEBHOOK",
    "STRIPE_KEY",
    "TWILIO_AUTH",
    "SENDGRID_API_KEY",
    "DD_API_KEY",
    "DD_APP_KEY",
    "DATADOG_API_KEY",
    "NEW_RELIC_LICENSE",
    "SENTRY_DSN",
    "HONEYCOMB_KEY",
    "PAGERDUTY_KEY",
    "VAULT_TOKEN",
    "CONSUL_TOKEN",
    "KUBECONFIG",
    "KUBERNETES_TOKEN",
    "ARTIFACTORY_API_KEY",
    "SONAR_TOKEN",
];

lazy_static! {
    /// Quoted KEY=VALUE pairs inside raw command transcripts.
    static ref QUOTED_PAIR_RE: Regex =
        Regex::new(r#""([A-Za-z_][A-Za-z0-9_]*)=([^"]*)""#).unwrap();
}

/// Returns `true` when a variable name matches one of the well-known
/// sensitive patterns.
pub fn is_sensitive_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SENSITIVE_KEY_PATTERNS
        .iter()
        .any(|pattern| upper.contains(pattern))
}

/// Redacts one `KEY=VALUE` entry, returning the possibly rewritten entry
/// and whether a redaction happened.
///
/// Entries without `=` are returned unchanged.
pub fn redact_env_entry(entry: &str) -> (String, bool) {
    match entry.split_once('=') {
        Some((key, _value)) if is_sensitive_key(key) => (format!("{key}={REDACTED}"), true),
        _ => (entry.to_owned(), false),
    }
}

/// Redacts a list of environment entries in place, sorting the result by
/// code point for stable output. Returns whether anything was redacted.
pub fn redact_env_entries(entries: &mut Vec<String>) -> bool {
    let mut filtered = false;
    for entry in entries.iter_mut() {
        let (rewritten, hit) = redact_env_entry(entry);
        *entry = rewritten;
        filtered |= hit;
    }
    entries.sort_unstable();
    filtered
}

/// Redacts quoted `"KEY=VALUE"` pairs inside raw command output.
///
/// Returns the rewritten text and whether a redaction happened.
pub fn redact_command_output(output: &str) -> (String, bool) {
    let mut filtered = false;
    let rewritten = QUOTED_PAIR_RE.replace_all(output, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        if is_sensitive_key(key) {
            filtered = true;
            format!("\"{key}={REDACTED}\"")
        } else {
            caps[0].to_owned()
        }
    });
    (rewritten.into_owned(), filtered)
}
