//! Link harvesting from decoded email bodies.
//!
//! Scans the plain-text body and the raw HTML markup (not a parsed DOM, so
//! `href` attributes are found too) for `http(s)://` and bare `www.` tokens,
//! cleans them up, and rewrites known file-viewer URLs into direct-download
//! URLs before anything is fetched.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static SCHEME_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s<>"'`|]+"#).expect("URL regex should compile")
});

static BARE_WWW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bwww\.[^\s<>"'`|]+"#).expect("www regex should compile")
});

/// Finds every URL in `text` and `html` and returns their direct-download
/// forms, deduplicated.
pub fn harvest(text: &str, html: &str) -> BTreeSet<String> {
    let combined = format!("{} {}", text, html);
    find_links(&combined)
        .into_iter()
        .map(|link| normalize_download_url(&link))
        .collect()
}

/// Raw URL tokens in `content`, cleaned but not normalized.
pub fn find_links(content: &str) -> Vec<String> {
    let mut found = Vec::new();

    for m in SCHEME_URL.find_iter(content) {
        found.push(clean_link(m.as_str()));
    }

    for m in BARE_WWW.find_iter(content) {
        // Already captured as part of a scheme URL.
        if content[..m.start()].ends_with("://") {
            continue;
        }
        found.push(format!("https://{}", clean_link(m.as_str())));
    }

    found.retain(|link| Url::parse(link).is_ok_and(|u| u.host_str().is_some()));
    found
}

/// Strips markup entities and trailing punctuation picked up by the scan.
fn clean_link(raw: &str) -> String {
    let mut link = raw.replace("&amp;", "&");

    loop {
        let should_pop = match link.chars().last() {
            Some('.') | Some(',') | Some(';') | Some(':') | Some('!') | Some('?') => true,
            Some(')') => link.matches('(').count() < link.matches(')').count(),
            Some(']') => link.matches('[').count() < link.matches(']').count(),
            _ => false,
        };
        if !should_pop {
            break;
        }
        link.pop();
    }

    link
}

/// Rewrites viewer URLs into URLs that return the file bytes.
///
/// | Shape | Rewritten to |
/// |-------|--------------|
/// | `github.com/<owner>/<repo>/blob/<ref>/<path>` | `raw.githubusercontent.com/<owner>/<repo>/<ref>/<path>` |
/// | `drive.google.com/file/d/<id>/view` | `drive.google.com/uc?export=download&id=<id>` |
/// | `dropbox.com/...?dl=0` | same URL with `dl=1` |
///
/// Anything else is returned unchanged.
pub fn normalize_download_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        return raw.to_string();
    };
    let Some(host) = url.host_str().map(|h| h.to_ascii_lowercase()) else {
        return raw.to_string();
    };

    if host == "github.com" || host == "www.github.com" {
        if let Some(rewritten) = github_raw_url(&url) {
            return rewritten;
        }
    }

    if host == "drive.google.com" {
        if let Some(file_id) = drive_file_id(&url) {
            return format!("https://drive.google.com/uc?export=download&id={}", file_id);
        }
    }

    if host == "dropbox.com" || host.ends_with(".dropbox.com") {
        if let Some(rewritten) = dropbox_direct_url(&url) {
            return rewritten;
        }
    }

    raw.to_string()
}

fn github_raw_url(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    if segments.len() < 5 || segments[2] != "blob" {
        return None;
    }
    let mut rest = vec![segments[0], segments[1]];
    rest.extend_from_slice(&segments[3..]);
    Some(format!("https://raw.githubusercontent.com/{}", rest.join("/")))
}

fn drive_file_id(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    match segments.as_slice() {
        ["file", "d", id, "view"] | ["file", "d", id, "view", ""] if !id.is_empty() => {
            Some(id.to_string())
        }
        _ => None,
    }
}

fn dropbox_direct_url(url: &Url) -> Option<String> {
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if !pairs.iter().any(|(k, v)| k == "dl" && v == "0") {
        return None;
    }
    let mut direct = url.clone();
    direct.query_pairs_mut().clear().extend_pairs(pairs.iter().map(|(k, v)| {
        if k == "dl" {
            (k.as_str(), "1")
        } else {
            (k.as_str(), v.as_str())
        }
    }));
    Some(direct.to_string())
}
