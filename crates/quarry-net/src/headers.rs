//! RFC 5988 `Link` and RFC 3230 `Digest` header parsing.
//!
//! Only the subset RFC 6249 (Metalink/HTTP) uses is modeled: `rel`, `type`,
//! `pri` and `geo` parameters on `Link`, and `algo=value` pairs on `Digest`.

/// Relation of a `Link` header entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkRel {
    /// `rel=describedby`: points at a metadata document.
    DescribedBy,
    /// `rel=duplicate`: an alternate source for the same bytes.
    Duplicate,
    /// Anything else.
    Other(String),
}

/// One parsed `Link` header entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkEntry {
    /// The target URI, as sent.
    pub uri: String,
    /// Relation, when present.
    pub rel: Option<LinkRel>,
    /// `type` parameter.
    pub media_type: Option<String>,
    /// `pri` parameter; lower is better.
    pub priority: Option<u32>,
    /// `geo` parameter (two-letter location).
    pub location: Option<String>,
}

/// One parsed `Digest` header entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DigestEntry {
    /// Algorithm name, lower-cased (e.g. `sha-256`).
    pub algo: String,
    /// The digest value, usually base64.
    pub value: String,
}

/// Split a header value on commas that sit outside `<...>` and quotes.
fn split_entries(value: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let (mut depth, mut quoted, mut start) = (0u32, false, 0usize);
    for (i, c) in value.char_indices() {
        match c {
            '<' if !quoted => depth += 1,
            '>' if !quoted => depth = depth.saturating_sub(1),
            '"' => quoted = !quoted,
            ',' if depth == 0 && !quoted => {
                entries.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(value[start..].trim());
    entries.retain(|e| !e.is_empty());
    entries
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('"')
}

/// Parse one `Link` header value into its entries.
///
/// Entries without a `<uri>` part are dropped.
pub fn parse_link(value: &str) -> Vec<LinkEntry> {
    let mut out = Vec::new();
    for entry in split_entries(value) {
        let mut params = entry.split(';');
        let Some(target) = params.next() else {
            continue;
        };
        let target = target.trim();
        if !(target.starts_with('<') && target.ends_with('>')) {
            continue;
        }
        let mut link = LinkEntry {
            uri: target[1..target.len() - 1].to_string(),
            rel: None,
            media_type: None,
            priority: None,
            location: None,
        };
        for param in params {
            let Some((name, val)) = param.split_once('=') else {
                continue;
            };
            let val = unquote(val);
            match name.trim().to_ascii_lowercase().as_str() {
                "rel" => {
                    link.rel = Some(match val.to_ascii_lowercase().as_str() {
                        "describedby" => LinkRel::DescribedBy,
                        "duplicate" => LinkRel::Duplicate,
                        other => LinkRel::Other(other.to_string()),
                    });
                }
                "type" => link.media_type = Some(val.to_ascii_lowercase()),
                "pri" => link.priority = val.parse().ok(),
                "geo" => link.location = Some(val.to_string()),
                _ => {}
            }
        }
        out.push(link);
    }
    out
}

/// Parse one `Digest` header value.
pub fn parse_digest(value: &str) -> Vec<DigestEntry> {
    split_entries(value)
        .into_iter()
        .filter_map(|entry| {
            let (algo, val) = entry.split_once('=')?;
            let algo = algo.trim();
            if algo.is_empty() {
                return None;
            }
            Some(DigestEntry {
                algo: algo.to_ascii_lowercase(),
                value: val.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_describedby_metalink() {
        let links = parse_link(
            r#"<http://example.org/file.meta4>; rel=describedby; type="application/metalink4+xml""#,
        );
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].uri, "http://example.org/file.meta4");
        assert_eq!(links[0].rel, Some(LinkRel::DescribedBy));
        assert_eq!(
            links[0].media_type.as_deref(),
            Some("application/metalink4+xml")
        );
    }

    #[test]
    fn test_parse_duplicates_with_pri_and_geo() {
        let links = parse_link(
            "<http://m1.example/f>; rel=duplicate; pri=1; geo=de, \
             <http://m2.example/f>; rel=duplicate; pri=2; geo=us",
        );
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].priority, Some(1));
        assert_eq!(links[0].location.as_deref(), Some("de"));
        assert_eq!(links[1].uri, "http://m2.example/f");
        assert_eq!(links[1].priority, Some(2));
    }

    #[test]
    fn test_comma_inside_uri_not_split() {
        let links = parse_link("<http://example.org/a,b>; rel=duplicate");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].uri, "http://example.org/a,b");
    }

    #[test]
    fn test_entry_without_uri_dropped() {
        assert!(parse_link("rel=duplicate; pri=1").is_empty());
    }

    #[test]
    fn test_parse_digest_entries() {
        let digests =
            parse_digest("SHA-256=5QgXpvMLXWCi1GpNZI9mtzdhFFdtz6tuNwCKIYbbZfU=, MD5=/sr/WFcZH1MKTyt3JHL2tA==");
        assert_eq!(digests.len(), 2);
        assert_eq!(digests[0].algo, "sha-256");
        assert_eq!(digests[0].value, "5QgXpvMLXWCi1GpNZI9mtzdhFFdtz6tuNwCKIYbbZfU=");
        assert_eq!(digests[1].algo, "md5");
    }
}
