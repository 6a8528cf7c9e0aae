//! Value validators attached to schema attributes.
//!
//! Each validator has the [`ValidateFunc`](crate::schema::ValidateFunc)
//! signature and returns one diagnostic per problem found.

use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::schema::Diagnostic;
use crate::timeouts::parse_duration;

static RESOURCE_GROUP_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-\w\.\(\)]+$").expect("constant regex pattern is valid")
});

fn expect_string<'a>(value: &'a Value, path: &str) -> Result<&'a str, Vec<Diagnostic>> {
    value.as_str().ok_or_else(|| {
        vec![Diagnostic::error(format!("expected type of {path:?} to be string")).with_attribute(path)]
    })
}

fn fail(path: &str, summary: String) -> Vec<Diagnostic> {
    vec![Diagnostic::error(summary).with_attribute(path)]
}

/// Resource group names: 1-90 characters of letters, digits, underscores,
/// hyphens, periods and parentheses, not ending in a period.
pub fn resource_group_name(value: &Value, path: &str) -> Vec<Diagnostic> {
    let name = match expect_string(value, path) {
        Ok(s) => s,
        Err(diags) => return diags,
    };

    if name.is_empty() || name.chars().count() > 90 {
        return fail(path, format!("{path} may not exceed 90 characters in length and may not be empty"));
    }
    if name.ends_with('.') {
        return fail(path, format!("{path} cannot end with a period"));
    }
    if !RESOURCE_GROUP_NAME.is_match(name) {
        return fail(
            path,
            format!("{path} may only contain alphanumeric characters, dash, underscores, parentheses and periods"),
        );
    }
    Vec::new()
}

/// A non-empty location.
pub fn location(value: &Value, path: &str) -> Vec<Diagnostic> {
    match expect_string(value, path) {
        Ok(s) if crate::location::normalize(s).is_empty() => {
            fail(path, format!("{path:?} must not be empty"))
        },
        Ok(_) => Vec::new(),
        Err(diags) => diags,
    }
}

/// A string containing something other than whitespace.
pub fn non_empty_string(value: &Value, path: &str) -> Vec<Diagnostic> {
    match expect_string(value, path) {
        Ok(s) if s.trim().is_empty() => {
            fail(path, format!("{path:?} must not be empty or consist only of whitespace"))
        },
        Ok(_) => Vec::new(),
        Err(diags) => diags,
    }
}

/// One of `allowed`, compared exactly.
///
/// Wrap it in a non-capturing closure to attach it to an attribute:
/// `|v, p| string_in(v, p, &["Allow", "Deny"])`.
pub fn string_in(value: &Value, path: &str, allowed: &[&str]) -> Vec<Diagnostic> {
    match expect_string(value, path) {
        Ok(s) if allowed.contains(&s) => Vec::new(),
        Ok(s) => fail(path, format!("expected {path} to be one of {allowed:?}, got {s}")),
        Err(diags) => diags,
    }
}

/// A JSON document encoded as a string.
pub fn string_is_json(value: &Value, path: &str) -> Vec<Diagnostic> {
    match expect_string(value, path) {
        Ok(s) => match serde_json::from_str::<Value>(s) {
            Ok(_) => Vec::new(),
            Err(err) => fail(path, format!("{path:?} contains an invalid JSON: {err}")),
        },
        Err(diags) => diags,
    }
}

fn check_ipv4(value: &Value, path: &str, allow_empty: bool) -> Vec<Diagnostic> {
    let s = match expect_string(value, path) {
        Ok(s) => s,
        Err(diags) => return diags,
    };
    if s.is_empty() && allow_empty {
        return Vec::new();
    }
    match s.parse::<Ipv4Addr>() {
        Ok(_) => Vec::new(),
        Err(_) => fail(path, format!("{path:?} is not a valid IPv4 address: {s:?}")),
    }
}

/// An IPv4 address.
pub fn ipv4_address(value: &Value, path: &str) -> Vec<Diagnostic> {
    check_ipv4(value, path, false)
}

/// An IPv4 address or the empty string.
pub fn ipv4_address_or_empty(value: &Value, path: &str) -> Vec<Diagnostic> {
    check_ipv4(value, path, true)
}

/// A TCP/UDP port in `1..=65535`.
pub fn port_number(value: &Value, path: &str) -> Vec<Diagnostic> {
    let Some(port) = value.as_i64() else {
        return fail(path, format!("expected type of {path:?} to be int"));
    };
    if !(1..=65535).contains(&port) {
        return fail(path, format!("{path:?} is not a valid port number: {port}"));
    }
    Vec::new()
}

/// A duration string such as `"30m"` or `"1h30m"`.
pub fn duration(value: &Value, path: &str) -> Vec<Diagnostic> {
    match expect_string(value, path) {
        Ok(s) => match parse_duration(s) {
            Ok(_) => Vec::new(),
            Err(err) => fail(path, err.message()),
        },
        Err(diags) => diags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_group_name() {
        for ok in ["example-resources", "rg_1", "(rg).v2", "A"] {
            assert!(resource_group_name(&json!(ok), "name").is_empty(), "{ok}");
        }
        for bad in ["", "ends.", "has space", "slash/name", "hash#"] {
            assert_eq!(resource_group_name(&json!(bad), "name").len(), 1, "{bad}");
        }
        assert_eq!(resource_group_name(&json!("a".repeat(91)), "name").len(), 1);
        assert_eq!(resource_group_name(&json!(1), "name").len(), 1);
    }

    #[test]
    fn test_location_and_non_empty() {
        assert!(location(&json!("West Europe"), "location").is_empty());
        assert_eq!(location(&json!("  "), "location").len(), 1);
        assert!(non_empty_string(&json!("x"), "description").is_empty());
        assert_eq!(non_empty_string(&json!(" \t"), "description").len(), 1);
    }

    #[test]
    fn test_string_in() {
        let allowed = ["Allow", "Deny"];
        assert!(string_in(&json!("Allow"), "access", &allowed).is_empty());
        assert_eq!(string_in(&json!("allow"), "access", &allowed).len(), 1);
    }

    #[test]
    fn test_string_is_json() {
        assert!(string_is_json(&json!(r#"{"effect": {"value": "audit"}}"#), "parameters").is_empty());
        assert_eq!(string_is_json(&json!("{not json"), "parameters").len(), 1);
    }

    #[test]
    fn test_ipv4() {
        assert!(ipv4_address(&json!("10.0.0.4"), "ip").is_empty());
        assert_eq!(ipv4_address(&json!("10.0.0.256"), "ip").len(), 1);
        assert_eq!(ipv4_address(&json!("::1"), "ip").len(), 1);
        assert_eq!(ipv4_address(&json!(""), "ip").len(), 1);
        assert!(ipv4_address_or_empty(&json!(""), "ip").is_empty());
    }

    #[test]
    fn test_port_number() {
        assert!(port_number(&json!(443), "port").is_empty());
        assert!(port_number(&json!(65535), "port").is_empty());
        assert_eq!(port_number(&json!(0), "port").len(), 1);
        assert_eq!(port_number(&json!(65536), "port").len(), 1);
        assert_eq!(port_number(&json!("443"), "port").len(), 1);
    }

    #[test]
    fn test_duration() {
        assert!(duration(&json!("90m"), "timeouts.0.create").is_empty());
        let diags = duration(&json!("ninety"), "timeouts.0.create");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].summary.contains("invalid duration"));

        let diags = duration(&json!("9999999999999999h"), "timeouts.0.create");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].attribute.as_deref(), Some("timeouts.0.create"));
    }
}
