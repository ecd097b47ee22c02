//! Whole-file and per-piece integrity verification.
//!
//! Validation never mutates the job graph; it produces a report the
//! controller applies. Recognized algorithms are sha-256 and sha-512; other
//! names are skipped with a warning so an exotic Metalink does not fail a
//! good download on its own.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use sha2::{Digest, Sha256, Sha512};

use quarry_core::job::{Hash, Job};

/// One piece to verify: layout, expected digest, current bookkeeping.
#[derive(Clone, Debug)]
pub struct PieceSpec {
    /// Absolute offset of the first byte.
    pub position: u64,
    /// Number of bytes.
    pub length: u64,
    /// Expected digest.
    pub hash: Hash,
    /// Whether the piece has been written.
    pub done: bool,
}

/// Everything needed to verify a job's local file.
#[derive(Clone, Debug)]
pub struct ValidationSpec {
    /// The file to verify.
    pub path: PathBuf,
    /// Whole-file digests.
    pub hashes: Vec<Hash>,
    /// Piece layout and digests.
    pub pieces: Vec<PieceSpec>,
}

impl ValidationSpec {
    /// Build the spec for a job whose file lives at `path`.
    #[must_use]
    pub fn for_job(job: &Job, path: PathBuf) -> Self {
        let pieces = job
            .pieces
            .iter()
            .zip(&job.parts)
            .map(|(piece, part)| PieceSpec {
                position: piece.position,
                length: piece.length,
                hash: piece.hash.clone(),
                done: part.done,
            })
            .collect();
        Self {
            path,
            hashes: job.hashes.clone(),
            pieces,
        }
    }
}

/// Outcome of a validation pass.
#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    /// Every recognized whole-file hash matched (or, lacking any, every
    /// piece verified).
    pub hash_ok: bool,
    /// Per-piece verdicts; `None` means the piece was not checked.
    pub piece_ok: Vec<Option<bool>>,
}

enum Algo {
    Sha256,
    Sha512,
}

fn algo_of(name: &str) -> Option<Algo> {
    match name {
        "sha-256" | "sha256" => Some(Algo::Sha256),
        "sha-512" | "sha512" => Some(Algo::Sha512),
        _ => None,
    }
}

fn digest_reader<R: Read>(reader: &mut R, algo: &Algo) -> std::io::Result<String> {
    let mut buf = [0u8; 64 * 1024];
    match algo {
        Algo::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        Algo::Sha512 => {
            let mut hasher = Sha512::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

/// Verify the file described by `spec` and report what held.
///
/// Whole-file digests are always recomputed. Pieces marked done are
/// additionally verified one by one. A missing file fails everything.
#[must_use]
pub fn validate_file(spec: &ValidationSpec) -> ValidationReport {
    let mut report = ValidationReport {
        hash_ok: false,
        piece_ok: vec![None; spec.pieces.len()],
    };

    let Ok(mut file) = File::open(&spec.path) else {
        for (verdict, piece) in report.piece_ok.iter_mut().zip(&spec.pieces) {
            if piece.done {
                *verdict = Some(false);
            }
        }
        return report;
    };

    let mut recognized = 0usize;
    let mut matched = 0usize;
    for hash in &spec.hashes {
        let Some(algo) = algo_of(&hash.algo) else {
            tracing::warn!("skipping unsupported hash algorithm '{}'", hash.algo);
            continue;
        };
        recognized += 1;
        if file.seek(SeekFrom::Start(0)).is_err() {
            continue;
        }
        match digest_reader(&mut file, &algo) {
            Ok(actual) if actual.eq_ignore_ascii_case(&hash.hex) => matched += 1,
            Ok(actual) => {
                tracing::debug!("# {} mismatch: expected {}, got {actual}", hash.algo, hash.hex);
            }
            Err(e) => tracing::warn!("reading {}: {e}", spec.path.display()),
        }
    }

    let mut pieces_checked = 0usize;
    let mut pieces_good = 0usize;
    for (i, piece) in spec.pieces.iter().enumerate() {
        if !piece.done {
            continue;
        }
        let Some(algo) = algo_of(&piece.hash.algo) else {
            continue;
        };
        pieces_checked += 1;
        let ok = file
            .seek(SeekFrom::Start(piece.position))
            .and_then(|_| digest_reader(&mut file.by_ref().take(piece.length), &algo))
            .map(|actual| actual.eq_ignore_ascii_case(&piece.hash.hex))
            .unwrap_or(false);
        if ok {
            pieces_good += 1;
        }
        report.piece_ok[i] = Some(ok);
    }

    report.hash_ok = if recognized > 0 {
        matched == recognized
    } else if spec.hashes.is_empty() && !spec.pieces.is_empty() {
        // no whole-file digest at all: fall back to full piece coverage
        spec.pieces.iter().all(|p| p.done) && pieces_checked == pieces_good && pieces_checked > 0
    } else {
        false
    };

    report
}

/// Fold a validation report back into the job.
///
/// Failed pieces are reset for rescheduling. A whole-file failure after all
/// parts completed resets every piece and counts a retry.
pub fn apply_report(job: &mut Job, report: &ValidationReport) {
    let was_complete = job.all_parts_done();

    for (part, verdict) in job.parts.iter_mut().zip(&report.piece_ok) {
        match verdict {
            Some(true) => part.done = true,
            Some(false) => {
                part.done = false;
                part.inuse = false;
            }
            None => {}
        }
    }

    if report.hash_ok {
        job.hash_ok = true;
    } else if was_complete {
        job.hash_retries += 1;
        for part in &mut job.parts {
            part.done = false;
            part.inuse = false;
        }
    }
}
