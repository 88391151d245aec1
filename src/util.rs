/// Name handling helpers shared by all collectors.
///
/// IMPORTANT:
/// - No source-specific parsing should live here.
/// - Everything here must stay deterministic and side-effect free.
use std::collections::BTreeSet;

use regex::Regex;

/// Normalizes a raw name into the form stored in the graph.
///
/// - Lowercases
/// - Trims whitespace, surrounding dots and a leading "*." wildcard label
///
/// Returns `None` when nothing usable is left.
///
/// Examples:
/// - "*.Dev.Example.com."  -> "dev.example.com"
/// - "  www.example.com "  -> "www.example.com"
pub fn normalize_name(raw: &str) -> Option<String> {
    let mut name = raw.trim().trim_matches('.').to_ascii_lowercase();

    while let Some(rest) = name.strip_prefix("*.") {
        name = rest.to_string();
    }

    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some(name)
}

/// True when `name` is `domain` itself or one of its subdomains.
///
/// Both arguments are expected in normalized form.
pub fn in_scope(name: &str, domain: &str) -> bool {
    if name == domain {
        return true;
    }

    name.len() > domain.len()
        && name.ends_with(domain)
        && name.as_bytes()[name.len() - domain.len() - 1] == b'.'
}

/// Builds a pattern matching any subdomain of `domain` inside free text.
pub fn subdomain_regex(domain: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(&domain.to_ascii_lowercase());
    // Trailing labels are matched too so that "a.example.com.cdn.net"
    // is seen whole and rejected by the scope check.
    Regex::new(&format!(
        r"(?i)\b(?:[a-z0-9_-]+\.)*{}(?:\.[a-z0-9_-]+)*\b",
        escaped
    ))
}

/// Extracts every distinct in-scope name found in `text`.
///
/// Output is sorted and deduplicated.
pub fn extract_names(re: &Regex, text: &str, domain: &str) -> Vec<String> {
    let domain = domain.to_ascii_lowercase();

    re.find_iter(text)
        .filter_map(|m| normalize_name(m.as_str()))
        .filter(|n| in_scope(n, &domain))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_wildcards_and_case() {
        assert_eq!(
            normalize_name("*.Dev.Example.com.").as_deref(),
            Some("dev.example.com")
        );
        assert_eq!(normalize_name("  www.example.com ").as_deref(), Some("www.example.com"));
        assert_eq!(normalize_name(" . "), None);
        assert_eq!(normalize_name("a b.example.com"), None);
    }

    #[test]
    fn scope_requires_label_boundary() {
        assert!(in_scope("example.com", "example.com"));
        assert!(in_scope("a.example.com", "example.com"));
        assert!(!in_scope("badexample.com", "example.com"));
        assert!(!in_scope("example.com.evil.net", "example.com"));
    }

    #[test]
    fn extracts_names_from_html() {
        let re = subdomain_regex("example.com").unwrap();
        let html = r#"<td>api.example.com</td><a href="https://WWW.Example.com/x">x</a>
            <td>notexample.com</td><td>mail.example.com.cdn.net</td><td>api.example.com</td>"#;

        let names = extract_names(&re, html, "example.com");
        assert_eq!(names, vec!["api.example.com", "www.example.com"]);
    }
}
