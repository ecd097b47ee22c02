//! The worker⇄controller wire protocol.
//!
//! Newline-terminated ASCII messages, one verb per line. Channels carry the
//! rendered line; both endpoints go through [`Message::parse`] and
//! [`fmt::Display`], which round-trip every verb:
//!
//! ```text
//! sts <free text>
//! ready
//! go
//! check
//! add uri <absolute-uri>
//! redirect <absolute-uri>
//! chunk mirror <LL> <pri> <uri>
//! chunk hash <algo> <hexdigest>
//! chunk piece <len> <algo> <hexdigest>
//! chunk name <filename>
//! chunk size <bytes>
//! ```
//!
//! A mirror without a location code is rendered as `--`.

use std::fmt;

use crate::error::{Error, Result};

/// One protocol line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Free-text status, informational only.
    Sts(String),
    /// The agent finished its assignment.
    Ready,
    /// Begin the assignment in the agent's slot.
    Go,
    /// Validate the assigned job's local file.
    Check,
    /// A newly discovered URI.
    AddUri(String),
    /// A redirect target; subject to the redirect depth limit.
    Redirect(String),
    /// Metalink mirror: location code, priority, URI.
    ChunkMirror {
        /// Two-letter location code, if any.
        location: Option<String>,
        /// Lower is better.
        priority: i32,
        /// Mirror URI, unparsed.
        uri: String,
    },
    /// Whole-file hash.
    ChunkHash {
        /// Algorithm name.
        algo: String,
        /// Hex digest.
        hex: String,
    },
    /// Piece hash; position is implied by arrival order.
    ChunkPiece {
        /// Piece length in bytes.
        length: u64,
        /// Algorithm name.
        algo: String,
        /// Hex digest.
        hex: String,
    },
    /// File name from Metalink metadata.
    ChunkName(String),
    /// Total size from Metalink metadata.
    ChunkSize(u64),
}

impl Message {
    /// Shorthand for a status line.
    pub fn sts(text: impl Into<String>) -> Self {
        Self::Sts(text.into())
    }

    /// Parse one line (without the trailing newline).
    pub fn parse(line: &str) -> Result<Self> {
        if let Some(rest) = line.strip_prefix("sts ") {
            return Ok(Self::Sts(rest.to_string()));
        }
        match line {
            "ready" => return Ok(Self::Ready),
            "go" => return Ok(Self::Go),
            "check" => return Ok(Self::Check),
            _ => {}
        }
        if let Some(rest) = line.strip_prefix("add uri ") {
            return Ok(Self::AddUri(rest.to_string()));
        }
        if let Some(rest) = line.strip_prefix("redirect ") {
            return Ok(Self::Redirect(rest.to_string()));
        }
        if let Some(rest) = line.strip_prefix("chunk ") {
            return Self::parse_chunk(rest, line);
        }
        Err(Error::protocol(format!("unknown message '{line}'")))
    }

    fn parse_chunk(rest: &str, line: &str) -> Result<Self> {
        let bad = || Error::protocol(format!("malformed chunk message '{line}'"));

        if let Some(args) = rest.strip_prefix("mirror ") {
            let mut it = args.splitn(3, ' ');
            let location = it.next().ok_or_else(bad)?;
            let priority = it
                .next()
                .and_then(|p| p.parse::<i32>().ok())
                .ok_or_else(bad)?;
            let uri = it.next().ok_or_else(bad)?;
            if location.len() != 2 || uri.is_empty() {
                return Err(bad());
            }
            let location = (location != "--").then(|| location.to_string());
            return Ok(Self::ChunkMirror {
                location,
                priority,
                uri: uri.to_string(),
            });
        }
        if let Some(args) = rest.strip_prefix("hash ") {
            let mut it = args.split_whitespace();
            match (it.next(), it.next(), it.next()) {
                (Some(algo), Some(hex), None) => {
                    return Ok(Self::ChunkHash {
                        algo: algo.to_string(),
                        hex: hex.to_string(),
                    });
                }
                _ => return Err(bad()),
            }
        }
        if let Some(args) = rest.strip_prefix("piece ") {
            let mut it = args.split_whitespace();
            match (it.next(), it.next(), it.next(), it.next()) {
                (Some(len), Some(algo), Some(hex), None) => {
                    let length = len.parse::<u64>().map_err(|_| bad())?;
                    return Ok(Self::ChunkPiece {
                        length,
                        algo: algo.to_string(),
                        hex: hex.to_string(),
                    });
                }
                _ => return Err(bad()),
            }
        }
        if let Some(name) = rest.strip_prefix("name ") {
            return Ok(Self::ChunkName(name.to_string()));
        }
        if let Some(size) = rest.strip_prefix("size ") {
            let size = size.trim().parse::<u64>().map_err(|_| bad())?;
            return Ok(Self::ChunkSize(size));
        }
        Err(bad())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sts(text) => write!(f, "sts {text}"),
            Self::Ready => write!(f, "ready"),
            Self::Go => write!(f, "go"),
            Self::Check => write!(f, "check"),
            Self::AddUri(uri) => write!(f, "add uri {uri}"),
            Self::Redirect(uri) => write!(f, "redirect {uri}"),
            Self::ChunkMirror {
                location,
                priority,
                uri,
            } => {
                let loc = location.as_deref().unwrap_or("--");
                write!(f, "chunk mirror {loc} {priority} {uri}")
            }
            Self::ChunkHash { algo, hex } => write!(f, "chunk hash {algo} {hex}"),
            Self::ChunkPiece { length, algo, hex } => {
                write!(f, "chunk piece {length} {algo} {hex}")
            }
            Self::ChunkName(name) => write!(f, "chunk name {name}"),
            Self::ChunkSize(size) => write!(f, "chunk size {size}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_verb() {
        let messages = vec![
            Message::sts("304 Not Modified"),
            Message::Ready,
            Message::Go,
            Message::Check,
            Message::AddUri("http://example.org/a".to_string()),
            Message::Redirect("http://example.org/b".to_string()),
            Message::ChunkMirror {
                location: Some("de".to_string()),
                priority: 1,
                uri: "http://m1.example.org/f".to_string(),
            },
            Message::ChunkMirror {
                location: None,
                priority: 999_999,
                uri: "http://m2.example.org/f".to_string(),
            },
            Message::ChunkHash {
                algo: "sha-256".to_string(),
                hex: "ab".repeat(32),
            },
            Message::ChunkPiece {
                length: 262_144,
                algo: "sha-256".to_string(),
                hex: "cd".repeat(32),
            },
            Message::ChunkName("file.bin".to_string()),
            Message::ChunkSize(1_048_576),
        ];

        for msg in messages {
            let line = msg.to_string();
            assert_eq!(Message::parse(&line).unwrap(), msg, "line: {line}");
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for line in [
            "",
            "READY",
            "chunk",
            "chunk mirror de",
            "chunk mirror de abc http://x/",
            "chunk piece ten sha-256 ab",
            "chunk size many",
            "status hello",
        ] {
            assert!(Message::parse(line).is_err(), "accepted: '{line}'");
        }
    }

    #[test]
    fn test_sts_keeps_free_text() {
        let msg = Message::parse("sts 200 OK and then some").unwrap();
        assert_eq!(msg, Message::Sts("200 OK and then some".to_string()));
    }

    #[test]
    fn test_uri_with_spaces_stays_intact_in_mirror() {
        // the URI is the final field; it may contain escaped characters only,
        // but the parser must not split it further
        let line = "chunk mirror us 42 http://example.org/a%20b";
        match Message::parse(line).unwrap() {
            Message::ChunkMirror { uri, .. } => assert_eq!(uri, "http://example.org/a%20b"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
