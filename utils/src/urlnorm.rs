use url::Url;

/// Normalizes a sub-URL discovered while parsing a page.
///
/// Returns the absolute http(s) form resolved against `base`, or `None`
/// for anything that must never be crawled: non-http(s) schemes,
/// mail/js/anchor links and template fragments. Relative forms are
/// resolved with a directory-stack walk over the base path rather than
/// generic URL joining, so `../..` chains behave like the file system.
pub fn resolve(link: &str, base: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }

    // Fragments and pseudo-links never become tasks.
    if link.starts_with('#') {
        return None;
    }
    let lower = link.to_lowercase();
    for scheme in ["javascript:", "mailto:", "tel:", "data:", "about:"] {
        if lower.starts_with(scheme) {
            return None;
        }
    }
    // Unexpanded template placeholders ({id}, {{page}} and friends).
    if link.contains('{') || link.contains('}') {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let scheme = base_url.scheme();
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let host = base_url.host_str()?;
    let authority = match base_url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let absolute = if let Some(rest) = link.strip_prefix("//") {
        // Protocol-relative: inherit the base scheme.
        format!("{scheme}://{rest}")
    } else if link.contains("://") {
        link.to_string()
    } else if link.starts_with('/') {
        format!("{scheme}://{authority}{}", collapse_slashes(link))
    } else {
        // Relative form: walk the base directory stack.
        let resolved = resolve_relative(link, base_url.path());
        format!("{scheme}://{authority}{resolved}")
    };

    // Anything can come out of string concatenation; re-validate before
    // admitting the result.
    let parsed = Url::parse(&absolute).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    parsed.host_str()?;
    Some(absolute)
}

/// Directory-stack resolution: drop the base filename, pop one trailing
/// segment per leading `../`, then append the remainder.
fn resolve_relative(link: &str, base_path: &str) -> String {
    let mut link = link;
    while let Some(rest) = link.strip_prefix("./") {
        link = rest;
    }

    let mut stack: Vec<&str> = base_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    // The last segment of the base path is a document, not a directory.
    stack.pop();

    while let Some(rest) = link.strip_prefix("../") {
        stack.pop();
        link = rest;
    }
    // A bare ".." means the parent directory itself.
    while link == ".." {
        stack.pop();
        link = "";
    }

    let mut path = String::from("/");
    for segment in &stack {
        path.push_str(segment);
        path.push('/');
    }
    path.push_str(link);
    collapse_slashes(&path)
}

/// Collapses duplicate slashes in a path ("/a//b" -> "/a/b").
fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }
    out
}

/// Applies the crawl-domain allow-list. A `*` entry disables filtering;
/// otherwise the URL host must equal an entry or be a subdomain of one.
pub fn domain_allowed(url: &str, allow_domains: &[String]) -> bool {
    if allow_domains.iter().any(|d| d == "*") {
        return true;
    }
    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) else {
        return false;
    };
    allow_domains
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
}
