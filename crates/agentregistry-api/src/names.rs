//! Name sanitization and resource-identity helpers shared by the
//! discovery plane and the reconcilers.

use std::collections::BTreeMap;

/// Maximum length of a Kubernetes object name.
const MAX_NAME_LEN: usize = 63;

/// Derive a deterministic, store-safe name from free-form input.
///
/// Lowercases, maps `/` and `_` to `-`, drops every other character that is
/// not `[a-z0-9.-]`, trims leading/trailing separators, and truncates to 63.
pub fn sanitize_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        let ch = ch.to_ascii_lowercase();
        match ch {
            '/' | '_' => out.push('-'),
            'a'..='z' | '0'..='9' | '-' | '.' => out.push(ch),
            _ => {}
        }
    }
    let trimmed = out.trim_matches(|c| c == '-' || c == '.');
    let mut name: String = trimmed.chars().take(MAX_NAME_LEN).collect();
    while name.ends_with('-') || name.ends_with('.') {
        name.pop();
    }
    name
}

/// Shadow-record name for a remote object observed in `namespace`.
pub fn shadow_name(namespace: &str, name: &str) -> String {
    sanitize_name(&format!("{namespace}/{name}"))
}

/// Identity string `kind/namespace/name` used by the discovery error
/// tracker and in log lines.
pub fn resource_identity(kind: &str, namespace: &str, name: &str) -> String {
    format!("{}/{}/{}", kind.to_ascii_lowercase(), namespace, name)
}

/// Parse a `kind/namespace/name` identity back into its parts.
pub fn parse_resource_identity(identity: &str) -> Option<(&str, &str, &str)> {
    let mut parts = identity.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(kind), Some(ns), Some(name)) if !kind.is_empty() && !ns.is_empty() && !name.is_empty() => {
            Some((kind, ns, name))
        }
        _ => None,
    }
}

/// Environment a shadowed record was discovered in, if any.
pub fn environment_of(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels.get(crate::labels::ENVIRONMENT).map(String::as_str)
}

/// Substitute `${key}` placeholders from `config`. Unknown keys are left
/// in place so a missing value is visible in the rendered object.
pub fn substitute(template: &str, config: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match config.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_maps_separators() {
        assert_eq!(sanitize_name("Ns1/My_Server"), "ns1-my-server");
        assert_eq!(shadow_name("ns1", "alpha"), "ns1-alpha");
    }

    #[test]
    fn sanitize_truncates_to_63() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_name(&long).len(), 63);
    }

    #[test]
    fn sanitize_drops_invalid_chars_and_trims() {
        assert_eq!(sanitize_name("--weird!!name--"), "weirdname");
        assert_eq!(sanitize_name("a b\tc"), "abc");
    }

    #[test]
    fn identity_round_trip() {
        let id = resource_identity("MCPServer", "ns1", "alpha");
        assert_eq!(id, "mcpserver/ns1/alpha");
        assert_eq!(parse_resource_identity(&id), Some(("mcpserver", "ns1", "alpha")));
        assert_eq!(parse_resource_identity("bad"), None);
    }

    #[test]
    fn substitute_replaces_known_keys() {
        let config = BTreeMap::from([("token".to_string(), "abc".to_string())]);
        assert_eq!(substitute("Bearer ${token}", &config), "Bearer abc");
        assert_eq!(substitute("${missing}", &config), "${missing}");
        assert_eq!(substitute("no placeholders", &config), "no placeholders");
        assert_eq!(substitute("dangling ${", &config), "dangling ${");
    }
}
