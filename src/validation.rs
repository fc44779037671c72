//! Domain input normalisation and validation
//!
//! User input is reduced to a bare lowercase host name before any query is
//! made: scheme, credentials, path, query, port, a trailing root dot and a
//! leading `www.` label are removed. The result is then checked against the
//! RFC 1035 host-name rules.

/// Why a domain was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("domain is empty")]
    Empty,
    #[error("domain exceeds 253 characters")]
    TooLong,
    #[error("domain needs at least two labels")]
    SingleLabel,
    #[error("label '{0}' is empty or exceeds 63 characters")]
    BadLabelLength(String),
    #[error("label '{0}' contains characters other than a-z, 0-9 and '-'")]
    BadCharacters(String),
    #[error("label '{0}' starts or ends with '-'")]
    BadHyphen(String),
    #[error("top-level label '{0}' must be alphabetic and at least 2 characters")]
    BadTld(String),
}

/// Strips everything around the host name and lowercases it
///
/// ```
/// use domintel::validation::normalize_domain;
///
/// assert_eq!(normalize_domain("HTTPS://www.Example.CL:443/contacto?x=1"), "example.cl");
/// assert_eq!(normalize_domain(" example.cl. "), "example.cl");
/// ```
pub fn normalize_domain(input: &str) -> String {
    let mut host = input.trim();

    if let Some((_, rest)) = host.split_once("://") {
        host = rest;
    }
    if let Some(end) = host.find(['/', '?', '#']) {
        host = &host[..end];
    }
    if let Some((_, rest)) = host.rsplit_once('@') {
        host = rest;
    }
    if let Some((name, port)) = host.rsplit_once(':') {
        if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
            host = name;
        }
    }

    let host = host.trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) if rest.contains('.') => rest.to_string(),
        _ => host,
    }
}

/// Checks a normalised domain against the host-name rules
pub fn validate_domain(domain: &str) -> Result<(), DomainError> {
    if domain.is_empty() {
        return Err(DomainError::Empty);
    }
    if domain.len() > 253 {
        return Err(DomainError::TooLong);
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(DomainError::SingleLabel);
    }

    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return Err(DomainError::BadLabelLength(label.to_string()));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(DomainError::BadCharacters(label.to_string()));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(DomainError::BadHyphen(label.to_string()));
        }
    }

    // punycode TLDs (xn--) are allowed
    let tld = labels[labels.len() - 1];
    let tld_ok = tld.starts_with("xn--") || (tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()));
    if !tld_ok {
        return Err(DomainError::BadTld(tld.to_string()));
    }

    Ok(())
}

/// Normalises then validates, returning the query name
pub fn prepare_domain(input: &str) -> Result<String, DomainError> {
    let domain = normalize_domain(input);
    validate_domain(&domain)?;
    Ok(domain)
}
