//! Worker agents.
//!
//! An agent executes one task at a time and talks to the controller over its
//! line channel. What to work on rides in the agent's slot, set by the
//! controller before it sends `go` or `check`; the outcome (a written part,
//! a validation verdict) is reported back through the same slot just before
//! `ready`. The slot keeps assignment state next to the channel instead of
//! inside the message text.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use quarry_core::config::Config;
use quarry_core::job::{Mirror, Part};
use quarry_core::wire::Message;
use quarry_net::headers::{LinkEntry, LinkRel};
use quarry_net::metalink::MetalinkFile;
use quarry_net::session::{FetchedResponse, HttpSession};

use crate::extract::{extract_css, extract_html, extract_local_file};
use crate::sink::{write_body, write_part};
use crate::validate::{validate_file, ValidationReport, ValidationSpec};

/// A line from an agent, tagged with its id.
pub type AgentLine = (usize, String);

/// Fetch attempts per task before giving up.
const FETCH_TRIES: usize = 3;

/// Full rotations over the mirror list before a part is abandoned.
const MIRROR_ROTATIONS: usize = 3;

/// What the controller has put an agent to work on.
#[derive(Clone, Debug)]
pub enum Assignment {
    /// Fetch a whole resource.
    Fetch {
        /// The resource URI.
        uri: Url,
        /// Local destination, when one exists.
        local_filename: Option<PathBuf>,
    },
    /// Download one piece from the job's mirrors.
    DownloadPart {
        /// Index of the part in the job.
        index: usize,
        /// Offset and length to request.
        part: Part,
        /// Mirrors, already priority-sorted.
        mirrors: Vec<Mirror>,
        /// The file pieces are written into.
        target: PathBuf,
    },
    /// Verify the job's local file.
    Validate(ValidationSpec),
}

/// What the agent reports back on `ready`.
#[derive(Clone, Debug)]
pub enum Report {
    /// Outcome of a part download.
    PartDone {
        /// Index of the part in the job.
        index: usize,
        /// Whether the bytes were written.
        done: bool,
    },
    /// Outcome of a validation run.
    Validation(ValidationReport),
}

/// Shared per-agent state, mirrored on the controller side.
#[derive(Debug, Default)]
pub struct AgentSlot {
    /// Current assignment, set by the controller.
    pub assignment: Option<Assignment>,
    /// Outcome, set by the agent before `ready`.
    pub report: Option<Report>,
}

/// One worker agent.
pub struct Worker {
    id: usize,
    cfg: Arc<Config>,
    session: HttpSession,
    slot: Arc<Mutex<AgentSlot>>,
    rx: mpsc::Receiver<String>,
    tx: mpsc::Sender<AgentLine>,
    terminate: CancellationToken,
}

impl Worker {
    /// Wire up an agent.
    pub fn new(
        id: usize,
        cfg: Arc<Config>,
        session: HttpSession,
        slot: Arc<Mutex<AgentSlot>>,
        rx: mpsc::Receiver<String>,
        tx: mpsc::Sender<AgentLine>,
        terminate: CancellationToken,
    ) -> Self {
        Self {
            id,
            cfg,
            session,
            slot,
            rx,
            tx,
            terminate,
        }
    }

    /// Run until the control channel closes or termination is requested.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.terminate.cancelled() => break,
                line = self.rx.recv() => {
                    let Some(line) = line else { break };
                    tracing::debug!("+ [{}] {line}", self.id);
                    match Message::parse(&line) {
                        Ok(Message::Go) => self.handle_go().await,
                        Ok(Message::Check) => self.handle_check().await,
                        Ok(other) => tracing::warn!("agent {} ignoring '{other}'", self.id),
                        Err(e) => tracing::warn!("agent {}: {e}", self.id),
                    }
                }
            }
        }
    }

    async fn emit(&self, message: Message) {
        let _ = self.tx.send((self.id, message.to_string())).await;
    }

    async fn handle_go(&mut self) {
        let assignment = self.slot.lock().unwrap().assignment.clone();
        match assignment {
            Some(Assignment::Fetch {
                uri,
                local_filename,
            }) => self.fetch_resource(&uri, local_filename.as_deref()).await,
            Some(Assignment::DownloadPart {
                index,
                part,
                mirrors,
                target,
            }) => self.download_part(index, part, &mirrors, &target).await,
            Some(Assignment::Validate(_)) | None => {
                tracing::warn!("agent {} got go with nothing to do", self.id);
            }
        }
        self.emit(Message::Ready).await;
    }

    async fn handle_check(&mut self) {
        let assignment = self.slot.lock().unwrap().assignment.clone();
        if let Some(Assignment::Validate(spec)) = assignment {
            self.emit(Message::sts(format!("{} checking...", spec.path.display())))
                .await;
            let report = tokio::task::spawn_blocking(move || validate_file(&spec))
                .await
                .unwrap_or_default();
            if report.hash_ok {
                tracing::debug!("# [{}] check ok", self.id);
            } else {
                tracing::debug!("# [{}] check failed", self.id);
            }
            self.slot.lock().unwrap().report = Some(Report::Validation(report));
        } else {
            tracing::warn!("agent {} got check without a validation task", self.id);
        }
        self.emit(Message::Ready).await;
    }

    /// Fetch a whole resource and dispatch on what came back.
    async fn fetch_resource(&mut self, uri: &Url, local_filename: Option<&std::path::Path>) {
        let mut response = None;
        for attempt in 1..=FETCH_TRIES {
            tracing::debug!("# [{}] downloading {uri} (attempt {attempt})", self.id);
            match self.session.fetch(uri, None, local_filename).await {
                Ok(resp) => {
                    response = Some(resp);
                    break;
                }
                Err(e) => tracing::warn!("agent {}: {e}", self.id),
            }
            if self.terminate.is_cancelled() {
                return;
            }
        }
        let Some(resp) = response else { return };

        // RFC 6249 answer: chase the .meta4 description, or failing that the
        // best duplicate link
        if let Some(link) = pick_metalink_link(&resp.links) {
            self.emit(Message::AddUri(link.uri.clone())).await;
            self.emit_status(&resp).await;
            return;
        }

        // plain redirect: the target becomes a new job, this body is noise
        if let Some(target) = &resp.redirect_to {
            self.emit(Message::AddUri(target.to_string())).await;
            self.emit_status(&resp).await;
            return;
        }

        if resp.content_type.as_deref() == Some("application/metalink4+xml") {
            tracing::debug!("# [{}] get metalink info", self.id);
            match MetalinkFile::parse(&String::from_utf8_lossy(&resp.body)) {
                Ok(metalink) => {
                    for message in metalink.chunk_messages() {
                        self.emit(message).await;
                    }
                }
                Err(e) => tracing::error!("agent {}: {e}", self.id),
            }
            self.emit_status(&resp).await;
            return;
        }

        match resp.status {
            200 => {
                if self.cfg.recursive {
                    self.extract_links(&resp, uri).await;
                }
                if let Err(e) =
                    write_body(&self.cfg, local_filename, &resp.body, false, resp.last_modified)
                        .await
                {
                    tracing::error!("agent {}: {e}", self.id);
                }
            }
            206 if self.cfg.continue_download => {
                if let Err(e) =
                    write_body(&self.cfg, local_filename, &resp.body, true, None).await
                {
                    tracing::error!("agent {}: {e}", self.id);
                }
            }
            304 if self.cfg.timestamping && self.cfg.recursive => {
                if let Some(path) = local_filename {
                    match extract_local_file(path, uri) {
                        Ok(uris) => {
                            for found in uris {
                                self.emit(Message::AddUri(found.to_string())).await;
                            }
                        }
                        Err(e) => tracing::error!("agent {}: {e}", self.id),
                    }
                }
            }
            _ => {}
        }

        self.emit_status(&resp).await;
    }

    async fn extract_links(&self, resp: &FetchedResponse, uri: &Url) {
        let uris = match resp.content_type.as_deref() {
            Some("text/html") => extract_html(&String::from_utf8_lossy(&resp.body), uri),
            Some("text/css") => extract_css(&String::from_utf8_lossy(&resp.body), uri),
            _ => return,
        };
        for found in uris {
            self.emit(Message::AddUri(found.to_string())).await;
        }
    }

    /// Download one piece, rotating through the mirrors on failure.
    async fn download_part(
        &mut self,
        index: usize,
        part: Part,
        mirrors: &[Mirror],
        target: &std::path::Path,
    ) {
        self.emit(Message::sts("downloading part...")).await;

        let mut done = false;
        if !mirrors.is_empty() {
            let mut mirror_index = self.id % mirrors.len();
            for _ in 0..mirrors.len() * MIRROR_ROTATIONS {
                if self.terminate.is_cancelled() {
                    break;
                }
                let mirror = &mirrors[mirror_index];
                mirror_index = (mirror_index + 1) % mirrors.len();

                match self.session.fetch(&mirror.uri, Some(&part), None).await {
                    Ok(resp) => {
                        tracing::debug!(
                            "# [{}] body={}/{} bytes",
                            self.id,
                            resp.body.len(),
                            part.length
                        );
                        if resp.body.len() as u64 != part.length {
                            tracing::warn!(
                                "agent {}: short piece from {} ({} of {} bytes)",
                                self.id,
                                mirror.uri,
                                resp.body.len(),
                                part.length
                            );
                            continue;
                        }
                        match write_part(target, part.position, &resp.body).await {
                            Ok(()) => {
                                done = true;
                                break;
                            }
                            Err(e) => tracing::error!("agent {}: {e}", self.id),
                        }
                    }
                    Err(e) => tracing::warn!("agent {}: {e}", self.id),
                }
            }
        }

        self.slot.lock().unwrap().report = Some(Report::PartDone { index, done });
    }

    async fn emit_status(&self, resp: &FetchedResponse) {
        self.emit(Message::sts(format!("{} {}", resp.status, resp.reason)))
            .await;
    }
}

/// Pick the link to follow from a Metalink/HTTP answer.
///
/// A `rel=describedby` link typed `application/metalink4+xml` wins; else the
/// `rel=duplicate` link with the lowest `pri`.
fn pick_metalink_link(links: &[LinkEntry]) -> Option<&LinkEntry> {
    let mut top: Option<&LinkEntry> = None;
    for link in links {
        match &link.rel {
            Some(LinkRel::DescribedBy)
                if link.media_type.as_deref() == Some("application/metalink4+xml") =>
            {
                return Some(link);
            }
            Some(LinkRel::Duplicate) => {
                let better = top.map_or(true, |t| {
                    link.priority.unwrap_or(u32::MAX) < t.priority.unwrap_or(u32::MAX)
                });
                if better {
                    top = Some(link);
                }
            }
            _ => {}
        }
    }
    top
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_net::headers::parse_link;

    #[test]
    fn test_pick_prefers_metalink_description() {
        let links = parse_link(
            "<http://x.example/f.torrent>; rel=describedby; type=\"application/x-bittorrent\", \
             <http://x.example/f.meta4>; rel=describedby; type=\"application/metalink4+xml\", \
             <http://m.example/f>; rel=duplicate; pri=1",
        );
        let picked = pick_metalink_link(&links).unwrap();
        assert_eq!(picked.uri, "http://x.example/f.meta4");
    }

    #[test]
    fn test_pick_falls_back_to_best_duplicate() {
        let links = parse_link(
            "<http://a.example/f>; rel=duplicate; pri=3, \
             <http://b.example/f>; rel=duplicate; pri=1, \
             <http://c.example/f>; rel=duplicate; pri=2",
        );
        let picked = pick_metalink_link(&links).unwrap();
        assert_eq!(picked.uri, "http://b.example/f");
    }

    #[test]
    fn test_pick_none_without_usable_links() {
        let links = parse_link("<http://x.example/next>; rel=next");
        assert!(pick_metalink_link(&links).is_none());
    }
}
