//! Parsing of the `CNAME` marker file a repository uses to declare custom domains.

/// File name of the custom-domain marker, read from the repository root.
pub const CNAME_FILE: &str = "CNAME";

/// Extract bare hostnames from a marker file body.
///
/// Each line is trimmed, lower-cased and stripped of a leading `http://` or
/// `https://` scheme and of anything after the first `/`. Empty lines and
/// repeated hostnames are dropped; declaration order is preserved.
pub fn parse_custom_domains(body: &str) -> Vec<String> {
    let mut domains: Vec<String> = Vec::new();
    for line in body.lines() {
        let lowered = line.trim().to_ascii_lowercase();
        let without_scheme = lowered
            .strip_prefix("https://")
            .or_else(|| lowered.strip_prefix("http://"))
            .unwrap_or(&lowered);
        let host = without_scheme
            .split('/')
            .next()
            .unwrap_or_default()
            .trim();
        if host.is_empty() || domains.iter().any(|known| known == host) {
            continue;
        }
        domains.push(host.to_string());
    }
    domains
}
