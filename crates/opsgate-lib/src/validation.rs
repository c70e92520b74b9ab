//! Input checks applied before any call leaves the process

use crate::error::{Error, Result};

const MAX_LABEL_LEN: usize = 63;
const MAX_OBJECT_NAME_LEN: usize = 253;

/// DNS-1123 label: lowercase alphanumerics and '-', starting and ending alphanumeric
pub fn is_dns_label(value: &str) -> bool {
    if value.is_empty() || value.len() > MAX_LABEL_LEN {
        return false;
    }
    let bytes = value.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes.iter().all(|&b| edge_ok(b) || b == b'-')
}

/// DNS-1123 subdomain: dot-separated labels, at most 253 characters
pub fn is_dns_subdomain(value: &str) -> bool {
    !value.is_empty() && value.len() <= MAX_OBJECT_NAME_LEN && value.split('.').all(is_dns_label)
}

pub fn validate_label(field: &str, value: &str) -> Result<()> {
    if is_dns_label(value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{} '{}' must be a lowercase DNS-1123 label",
            field, value
        )))
    }
}

pub fn validate_object_name(field: &str, value: &str) -> Result<()> {
    if is_dns_subdomain(value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{} '{}' must be a lowercase DNS-1123 subdomain",
            field, value
        )))
    }
}

/// Optional namespace filter; blank means "all namespaces"
pub fn normalize_namespace_filter(filter: Option<&str>) -> Result<Option<String>> {
    match filter.map(str::trim).filter(|ns| !ns.is_empty()) {
        None => Ok(None),
        Some(ns) => {
            validate_label("namespace", ns)?;
            Ok(Some(ns.to_string()))
        }
    }
}

/// Metric names accepted by the raw series lookup
pub fn validate_metric_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid metric name '{}'", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_dns_label() {
        assert!(is_dns_label("default"));
        assert!(is_dns_label("kube-system"));
        assert!(is_dns_label("a1"));
        assert!(!is_dns_label(""));
        assert!(!is_dns_label("-web"));
        assert!(!is_dns_label("web-"));
        assert!(!is_dns_label("Web"));
        assert!(!is_dns_label("prod\"}or vector(1)"));
        assert!(!is_dns_label(&"a".repeat(64)));
    }

    #[test]
    fn test_dns_subdomain() {
        assert!(is_dns_subdomain("web.v2"));
        assert!(!is_dns_subdomain("web..v2"));
        assert!(!is_dns_subdomain("web_v2"));
    }

    #[test]
    fn test_namespace_filter() {
        assert_eq!(normalize_namespace_filter(None).unwrap(), None);
        assert_eq!(normalize_namespace_filter(Some("  ")).unwrap(), None);
        assert_eq!(
            normalize_namespace_filter(Some("prod")).unwrap(),
            Some("prod".to_string())
        );
        assert!(matches!(
            normalize_namespace_filter(Some("a\"b")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_metric_name() {
        assert_ok!(validate_metric_name("node_load1"));
        assert_ok!(validate_metric_name("job:rate5m"));
        assert_err!(validate_metric_name("1abc"));
        assert_err!(validate_metric_name("up{job=\"x\"}"));
    }
}
