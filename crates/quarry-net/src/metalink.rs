//! RFC 5854 Metalink/XML parsing.
//!
//! Only the first `<file>` element of a document is used; multi-file
//! metalinks describe archives this downloader treats one file at a time.

use roxmltree::Document;
use url::Url;

use quarry_core::error::{Error, Result};
use quarry_core::job::{Hash, Mirror};
use quarry_core::wire::Message;

/// Mirror priority assumed when the document does not give one.
const DEFAULT_PRIORITY: i32 = 999_999;

/// Everything a Metalink document reports about one file.
#[derive(Clone, Debug, Default)]
pub struct MetalinkFile {
    /// File name from the `name` attribute.
    pub name: Option<String>,
    /// Total size in bytes.
    pub size: Option<u64>,
    /// Whole-file hashes.
    pub hashes: Vec<Hash>,
    /// Nominal piece length; the last piece may be shorter.
    pub piece_length: Option<u64>,
    /// Algorithm of the piece hashes.
    pub piece_algo: Option<String>,
    /// Piece digests in file order.
    pub piece_hashes: Vec<String>,
    /// Alternate sources.
    pub mirrors: Vec<Mirror>,
}

impl MetalinkFile {
    /// Parse a Metalink/XML document.
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml)
            .map_err(|e| Error::protocol(format!("metalink XML: {e}")))?;

        // match on local names; RFC 5854 documents sit in a default namespace
        let file = doc
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "file")
            .ok_or_else(|| Error::protocol("metalink document has no <file> element"))?;

        let mut out = Self {
            name: file.attribute("name").map(str::to_string),
            ..Self::default()
        };

        for child in file.children().filter(|n| n.is_element()) {
            match child.tag_name().name() {
                "size" => {
                    out.size = child.text().and_then(|t| t.trim().parse().ok());
                }
                "hash" => {
                    if let (Some(algo), Some(text)) = (child.attribute("type"), child.text()) {
                        out.hashes.push(Hash::new(algo, text.trim()));
                    }
                }
                "pieces" => {
                    out.piece_length = child.attribute("length").and_then(|l| l.parse().ok());
                    out.piece_algo = child
                        .attribute("type")
                        .map(|t| t.to_ascii_lowercase());
                    for hash in child
                        .children()
                        .filter(|n| n.is_element() && n.tag_name().name() == "hash")
                    {
                        if let Some(text) = hash.text() {
                            out.piece_hashes.push(text.trim().to_string());
                        }
                    }
                }
                "url" => {
                    let Some(text) = child.text() else { continue };
                    match Url::parse(text.trim()) {
                        Ok(uri) => out.mirrors.push(Mirror {
                            location: child.attribute("location").map(str::to_string),
                            priority: child
                                .attribute("priority")
                                .and_then(|p| p.parse().ok())
                                .unwrap_or(DEFAULT_PRIORITY),
                            uri,
                        }),
                        Err(e) => {
                            tracing::warn!("skipping metalink mirror '{}': {e}", text.trim());
                        }
                    }
                }
                _ => {}
            }
        }

        if out.piece_length.is_none() && !out.piece_hashes.is_empty() {
            return Err(Error::protocol("metalink <pieces> without a length"));
        }

        Ok(out)
    }

    /// Render the metadata as `chunk …` wire messages.
    ///
    /// Order: name, size, whole-file hashes, pieces, mirrors. Piece lengths
    /// are the nominal length except for the final piece, which takes the
    /// remainder of the file size.
    #[must_use]
    pub fn chunk_messages(&self) -> Vec<Message> {
        let mut out = Vec::new();

        if let Some(name) = &self.name {
            out.push(Message::ChunkName(name.clone()));
        }
        if let Some(size) = self.size {
            out.push(Message::ChunkSize(size));
        }
        for hash in &self.hashes {
            out.push(Message::ChunkHash {
                algo: hash.algo.clone(),
                hex: hash.hex.clone(),
            });
        }
        if let (Some(piece_length), Some(algo)) = (self.piece_length, &self.piece_algo) {
            let mut remaining = self.size;
            for hex in &self.piece_hashes {
                let length = match remaining {
                    Some(left) => piece_length.min(left),
                    None => piece_length,
                };
                if let Some(left) = remaining.as_mut() {
                    *left = left.saturating_sub(length);
                }
                out.push(Message::ChunkPiece {
                    length,
                    algo: algo.clone(),
                    hex: hex.clone(),
                });
            }
        }
        for mirror in &self.mirrors {
            out.push(Message::ChunkMirror {
                location: mirror.location.clone(),
                priority: mirror.priority,
                uri: mirror.uri.to_string(),
            });
        }

        out
    }
}
