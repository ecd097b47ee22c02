//! The job graph: jobs, parts, pieces, mirrors, hashes.
//!
//! A `Job` is one URI admitted to the queue. When a job turns out to be a
//! Metalink resource it grows pieces (hashed byte ranges), mirrors
//! (alternate sources) and parts (per-piece download bookkeeping). Jobs live
//! in a controller-owned arena; only `JobId` handles cross task boundaries.

use std::fmt;
use std::path::PathBuf;

use url::Url;

/// Handle into the controller's job arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Create a handle from a raw arena index.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw arena index.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A digest: algorithm name (e.g. `sha-256`) and hex digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hash {
    /// Algorithm name, lower-case.
    pub algo: String,
    /// Hex-encoded digest.
    pub hex: String,
}

impl Hash {
    /// Create a hash, normalizing the algorithm name to lower-case.
    pub fn new(algo: impl Into<String>, hex: impl Into<String>) -> Self {
        Self {
            algo: algo.into().to_ascii_lowercase(),
            hex: hex.into(),
        }
    }
}

/// A contiguous hashed byte range of a Metalink file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Piece {
    /// Absolute offset of the first byte.
    pub position: u64,
    /// Number of bytes.
    pub length: u64,
    /// Digest of exactly these bytes.
    pub hash: Hash,
}

/// Download bookkeeping for one piece.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Part {
    /// Absolute offset of the first byte.
    pub position: u64,
    /// Number of bytes.
    pub length: u64,
    /// An agent currently owns this part.
    pub inuse: bool,
    /// The bytes were written successfully.
    pub done: bool,
}

/// An alternate source for the same file content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mirror {
    /// Two-letter location code, when the server supplied one.
    pub location: Option<String>,
    /// Lower value means higher priority.
    pub priority: i32,
    /// Where to fetch from.
    pub uri: Url,
}

/// One unit of work: a URI plus everything learned about it so far.
#[derive(Clone, Debug)]
pub struct Job {
    /// The resource to retrieve.
    pub uri: Url,
    /// Local destination, absent in spider/output-document/delete-after modes.
    pub local_filename: Option<PathBuf>,
    /// How many redirects led to this job.
    pub redirection_level: u32,
    /// Total size reported by Metalink metadata.
    pub size: Option<u64>,
    /// File name reported by Metalink metadata.
    pub name: Option<String>,
    /// Per-piece download bookkeeping, parallel to `pieces`.
    pub parts: Vec<Part>,
    /// Hashed byte ranges from Metalink metadata.
    pub pieces: Vec<Piece>,
    /// Whole-file digests from Metalink metadata.
    pub hashes: Vec<Hash>,
    /// Alternate sources, sorted by priority before part scheduling.
    pub mirrors: Vec<Mirror>,
    /// An agent currently owns the whole job.
    pub inuse: bool,
    /// Whole-file integrity has been verified.
    pub hash_ok: bool,
    /// Whole-file verification failures after all parts completed.
    pub hash_retries: u32,
}

impl Job {
    /// Create a fresh job for a URI.
    #[must_use]
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            local_filename: None,
            redirection_level: 0,
            size: None,
            name: None,
            parts: Vec::new(),
            pieces: Vec::new(),
            hashes: Vec::new(),
            mirrors: Vec::new(),
            inuse: false,
            hash_ok: false,
            hash_retries: 0,
        }
    }

    /// Append a piece; its position continues where the previous one ended.
    pub fn add_piece(&mut self, length: u64, hash: Hash) {
        let position = self
            .pieces
            .last()
            .map_or(0, |prev| prev.position + prev.length);
        self.pieces.push(Piece {
            position,
            length,
            hash,
        });
    }

    /// Append a whole-file hash.
    pub fn add_hash(&mut self, hash: Hash) {
        self.hashes.push(hash);
    }

    /// Append a mirror.
    pub fn add_mirror(&mut self, mirror: Mirror) {
        self.mirrors.push(mirror);
    }

    /// Create one part per piece. Called once when metadata is complete.
    pub fn create_parts(&mut self) {
        if !self.parts.is_empty() {
            return;
        }
        self.parts = self
            .pieces
            .iter()
            .map(|piece| Part {
                position: piece.position,
                length: piece.length,
                inuse: false,
                done: false,
            })
            .collect();
    }

    /// Order mirrors ascending by priority. Stable: ties keep insertion order.
    pub fn sort_mirrors(&mut self) {
        self.mirrors.sort_by_key(|m| m.priority);
    }

    /// Index of the first part neither in use nor done.
    #[must_use]
    pub fn first_free_part(&self) -> Option<usize> {
        self.parts.iter().position(|p| !p.inuse && !p.done)
    }

    /// Whether every part has been written.
    #[must_use]
    pub fn all_parts_done(&self) -> bool {
        !self.parts.is_empty() && self.parts.iter().all(|p| p.done)
    }

    /// Piece layout invariant: contiguous from 0, lengths summing to `size`.
    #[must_use]
    pub fn piece_layout_valid(&self) -> bool {
        if self.pieces.is_empty() {
            return true;
        }
        let mut expect = 0u64;
        for piece in &self.pieces {
            if piece.position != expect {
                return false;
            }
            expect += piece.length;
        }
        self.size == Some(expect)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(Url::parse("http://example.org/file").unwrap())
    }

    #[test]
    fn test_piece_positions_chain() {
        let mut j = job();
        j.add_piece(100, Hash::new("sha-256", "aa"));
        j.add_piece(100, Hash::new("sha-256", "bb"));
        j.add_piece(50, Hash::new("sha-256", "cc"));

        assert_eq!(j.pieces[0].position, 0);
        assert_eq!(j.pieces[1].position, 100);
        assert_eq!(j.pieces[2].position, 200);

        j.size = Some(250);
        assert!(j.piece_layout_valid());
        j.size = Some(999);
        assert!(!j.piece_layout_valid());
    }

    #[test]
    fn test_create_parts_mirrors_pieces() {
        let mut j = job();
        j.add_piece(64, Hash::new("sha-256", "aa"));
        j.add_piece(64, Hash::new("sha-256", "bb"));
        j.create_parts();

        assert_eq!(j.parts.len(), 2);
        assert_eq!(j.parts[1].position, 64);
        assert!(!j.parts[0].done);

        // calling again must not clobber bookkeeping
        j.parts[0].done = true;
        j.create_parts();
        assert!(j.parts[0].done);
    }

    #[test]
    fn test_sort_mirrors_is_stable() {
        let mut j = job();
        for (pri, host) in [(2, "a"), (1, "b"), (2, "c"), (1, "d")] {
            j.add_mirror(Mirror {
                location: None,
                priority: pri,
                uri: Url::parse(&format!("http://{host}.example/f")).unwrap(),
            });
        }
        j.sort_mirrors();

        let hosts: Vec<_> = j
            .mirrors
            .iter()
            .map(|m| m.uri.host_str().unwrap().to_string())
            .collect();
        assert_eq!(hosts, ["b.example", "d.example", "a.example", "c.example"]);
    }

    #[test]
    fn test_first_free_part_skips_inuse_and_done() {
        let mut j = job();
        j.add_piece(10, Hash::new("sha-256", "aa"));
        j.add_piece(10, Hash::new("sha-256", "bb"));
        j.add_piece(10, Hash::new("sha-256", "cc"));
        j.create_parts();

        j.parts[0].done = true;
        j.parts[1].inuse = true;
        assert_eq!(j.first_free_part(), Some(2));

        j.parts[2].inuse = true;
        assert_eq!(j.first_free_part(), None);
    }

    #[test]
    fn test_hash_algo_lowercased() {
        let h = Hash::new("SHA-256", "AB");
        assert_eq!(h.algo, "sha-256");
    }
}
