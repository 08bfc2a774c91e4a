//! Remote locator normalization.

/// How a normalized URL reaches its remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `ssh://` URLs and scp-like `user@host:path` shorthands.
    Ssh,
    /// Everything else (https, http, git, file, local paths).
    Other,
}

/// Whether `raw` already names a transport: `scheme://...` or `user@host:path`.
fn has_explicit_transport(raw: &str) -> bool {
    raw.contains("://") || raw.find('@').is_some_and(|at| raw[at + 1..].contains(':'))
}

/// Canonicalize a user supplied repository locator.
///
/// Locators with an explicit scheme or in scp-like form are returned unchanged;
/// anything else gets `https://` prepended. Never fails: malformed input is
/// left for the clone to reject.
pub fn normalize(raw: &str) -> String {
    if has_explicit_transport(raw) {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    }
}

/// Classify the transport of a normalized URL.
pub fn transport(url: &str) -> Transport {
    match url.split_once("://") {
        Some((scheme, _)) => {
            let scheme = scheme.to_ascii_lowercase();
            if matches!(scheme.as_str(), "ssh" | "git+ssh" | "ssh+git") {
                Transport::Ssh
            } else {
                Transport::Other
            }
        }
        None if has_explicit_transport(url) => Transport::Ssh,
        None => Transport::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_paths_get_https() {
        assert_eq!(
            normalize("example.com/repo.git"),
            "https://example.com/repo.git"
        );
        assert_eq!(
            normalize("github.com/domano/gitserve"),
            "https://github.com/domano/gitserve"
        );
    }

    #[test]
    fn explicit_schemes_are_unchanged() {
        for url in [
            "https://example.com/repo.git",
            "http://example.com/repo.git",
            "ssh://git@example.com/repo.git",
            "git://example.com/repo.git",
            "file:///srv/git/repo.git",
        ] {
            assert_eq!(normalize(url), url);
        }
    }

    #[test]
    fn scp_like_shorthand_is_unchanged() {
        assert_eq!(
            normalize("git@github.com:domano/gitserve.git"),
            "git@github.com:domano/gitserve.git"
        );
        assert_eq!(normalize("deploy@10.0.0.5:repo"), "deploy@10.0.0.5:repo");
    }

    #[test]
    fn at_sign_without_later_colon_is_not_ssh() {
        assert_eq!(
            normalize("example.com/user@team/repo"),
            "https://example.com/user@team/repo"
        );
        // A colon before the '@' does not count.
        assert_eq!(normalize("host:8080/a@b"), "https://host:8080/a@b");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "example.com/repo.git",
            "git@github.com:o/r.git",
            "ssh://h/r",
            "",
        ] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn empty_input_is_total() {
        assert_eq!(normalize(""), "https://");
    }

    #[test]
    fn transport_classification() {
        assert_eq!(transport("ssh://git@example.com/r.git"), Transport::Ssh);
        assert_eq!(transport("git+ssh://example.com/r.git"), Transport::Ssh);
        assert_eq!(transport("git@github.com:o/r.git"), Transport::Ssh);
        assert_eq!(transport("https://example.com/r.git"), Transport::Other);
        assert_eq!(transport("https://user@example.com:8443/r.git"), Transport::Other);
        assert_eq!(transport("file:///srv/r.git"), Transport::Other);
        assert_eq!(transport("/srv/git/r.git"), Transport::Other);
    }
}
