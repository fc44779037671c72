//! Output sanitisation
//!
//! Every string in a [`DomainRecord`] that came from a remote source (DNS
//! text records, registry contacts, response headers, operator names) is
//! stripped of control characters and HTML-escaped before it is printed or
//! written to a results file. Degradation notes additionally have
//! filesystem paths redacted.

use html_escape::encode_text;
use regex::Regex;
use std::sync::OnceLock;

use crate::model::{DomainRecord, Field};

/// A sanitised copy of `record`
pub fn sanitize_record(record: &DomainRecord) -> DomainRecord {
    let mut out = record.clone();

    out.domain = sanitize_string(&record.domain);

    let network = &mut out.network;
    network.text = network.text.iter().map(|t| sanitize_string(t)).collect();
    network.name_servers = network.name_servers.iter().map(|n| sanitize_string(n)).collect();
    for mx in &mut network.mail_exchanges {
        mx.target = sanitize_string(&mx.target);
    }

    let registration = &mut out.registration;
    sanitize_field(&mut registration.registrar);
    sanitize_field(&mut registration.registrant_name);
    sanitize_field(&mut registration.registrant_organization);
    sanitize_field(&mut registration.registrant_country);
    registration.status = registration.status.iter().map(|s| sanitize_string(s)).collect();

    let operator = &mut out.operator;
    for value in [
        &mut operator.name,
        &mut operator.country,
        &mut operator.country_code,
        &mut operator.city,
    ] {
        *value = sanitize_string(value);
    }

    let software = &mut out.software;
    for value in [
        &mut software.server,
        &mut software.cms,
        &mut software.framework,
        &mut software.cdn,
        &mut software.language,
        &mut software.hosting_operator,
    ] {
        *value = sanitize_string(value);
    }
    software.analytics = software.analytics.iter().map(|a| sanitize_string(a)).collect();

    out.security.certificate_issuer = sanitize_string(&record.security.certificate_issuer);
    for value in out.security.headers.values_mut() {
        *value = sanitize_string(value);
    }

    out.degraded = record.degraded.iter().map(|d| sanitize_error(d)).collect();
    out
}

fn sanitize_field(field: &mut Field<String>) {
    if let Field::Known(value) | Field::Synthetic(value) = field {
        *value = sanitize_string(value);
    }
}

/// Trims, drops control characters and HTML-escapes
pub fn sanitize_string(value: &str) -> String {
    let filtered = value
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    encode_text(&filtered).to_string()
}

fn path_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(^|[\s'(=])(/[A-Za-z0-9_.\-]+)+").ok())
        .as_ref()
}

/// Like [`sanitize_string`], also replacing absolute paths with a marker
pub fn sanitize_error(error: &str) -> String {
    let sanitized = sanitize_string(error);
    match path_pattern() {
        Some(pattern) => pattern
            .replace_all(&sanitized, "${1}[REDACTED_PATH]")
            .to_string(),
        None => sanitized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_sanitize_string() {
        assert_eq!(sanitize_string("example.cl"), "example.cl");
        assert_eq!(
            sanitize_string("<script>alert(1)</script>"),
            "&lt;script&gt;alert(1)&lt;/script&gt;"
        );
        assert_eq!(sanitize_string("domain.cl\n\rinjection"), "domain.clinjection");
    }

    #[test]
    fn test_sanitize_error_redacts_paths_but_not_urls() {
        assert_eq!(
            sanitize_error("store I/O error at /home/user/.domintel/example.cl.json"),
            "store I/O error at [REDACTED_PATH]"
        );
        assert_eq!(
            sanitize_error("registration: https://rdap.org/domain unavailable"),
            "registration: https://rdap.org/domain unavailable"
        );
    }

    #[test]
    fn test_sanitize_record_escapes_remote_strings() {
        let mut record = DomainRecord::empty("example.cl", Utc::now());
        record.network.text = vec!["v=spf1 <include>\u{7}".to_string()];
        record.registration.registrant_name = Field::Known("Acme <b>SpA</b>".to_string());
        record.security.headers.insert(
            "content-security-policy".to_string(),
            "default-src 'self' <x>".to_string(),
        );

        let clean = sanitize_record(&record);
        assert_eq!(clean.network.text[0], "v=spf1 &lt;include&gt;");
        assert_eq!(
            clean.registration.registrant_name,
            Field::Known("Acme &lt;b&gt;SpA&lt;/b&gt;".to_string())
        );
        assert_eq!(
            clean.security.headers["content-security-policy"],
            "default-src 'self' &lt;x&gt;"
        );
    }
}
