//! The controller: schedules tasks onto agents, interprets their replies,
//! and mutates the job graph.
//!
//! # Concurrency model
//!
//! - One controller, `num_threads` agents, coordination through per-agent
//!   line channels only
//! - The job queue and blacklist are touched exclusively here
//! - Part assignment is exclusive: a part is marked in-use before `go` is
//!   sent and no second agent sees it until the owner reports back
//! - The main loop exits when the queue drains or termination is requested

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use quarry_core::config::Config;
use quarry_core::error::{Error, Result};
use quarry_core::job::{Hash, Job, JobId, Mirror};
use quarry_core::wire::Message;
use quarry_net::cookies::CookieJar;
use quarry_net::session::HttpSession;

use crate::blacklist::Blacklist;
use crate::paths;
use crate::queue::JobQueue;
use crate::validate::{self, validate_file, ValidationSpec};
use crate::worker::{AgentLine, AgentSlot, Assignment, Report, Worker};

/// Channel depth for both directions of an agent channel.
const CHANNEL_DEPTH: usize = 64;

/// Whole-file verification failures tolerated before a job is dropped.
const MAX_HASH_RETRIES: u32 = 2;

/// Controller-side record of one agent.
struct AgentHandle {
    tx: mpsc::Sender<String>,
    slot: Arc<Mutex<AgentSlot>>,
    task: JoinHandle<()>,
    job: Option<JobId>,
    part: Option<usize>,
}

/// The download orchestrator.
pub struct Controller {
    cfg: Arc<Config>,
    queue: JobQueue,
    blacklist: Blacklist,
    hosts: BTreeSet<String>,
    agents: Vec<AgentHandle>,
    rx: mpsc::Receiver<AgentLine>,
    terminate: CancellationToken,
    offset: usize,
}

impl Controller {
    /// Spawn the agent pool.
    pub fn new(
        cfg: Arc<Config>,
        jar: Arc<CookieJar>,
        terminate: CancellationToken,
    ) -> Result<Self> {
        let (agent_tx, agent_rx) = mpsc::channel::<AgentLine>(CHANNEL_DEPTH * cfg.num_threads);

        let mut agents = Vec::with_capacity(cfg.num_threads);
        for id in 0..cfg.num_threads {
            let (tx, rx) = mpsc::channel::<String>(CHANNEL_DEPTH);
            let slot = Arc::new(Mutex::new(AgentSlot::default()));
            let session = HttpSession::new(Arc::clone(&cfg), Arc::clone(&jar))?;
            let worker = Worker::new(
                id,
                Arc::clone(&cfg),
                session,
                Arc::clone(&slot),
                rx,
                agent_tx.clone(),
                terminate.clone(),
            );
            agents.push(AgentHandle {
                tx,
                slot,
                task: tokio::spawn(worker.run()),
                job: None,
                part: None,
            });
        }

        Ok(Self {
            cfg,
            queue: JobQueue::new(),
            blacklist: Blacklist::new(),
            hosts: BTreeSet::new(),
            agents,
            rx: agent_rx,
            terminate,
            offset: 0,
        })
    }

    /// Admit a command-line URI.
    ///
    /// Captures the host for the allow-list; recursion never widens the set
    /// later.
    pub fn add_root_uri(&mut self, raw: &str) -> Result<()> {
        let uri =
            Url::parse(raw).map_err(|e| Error::config(format!("invalid URI '{raw}': {e}")))?;
        if self.cfg.recursive && !self.cfg.span_hosts {
            if let Some(host) = uri.host_str() {
                self.hosts.insert(host.to_string());
            }
        }
        let Some(uri) = self.blacklist.admit(uri) else {
            return Ok(());
        };
        let mut job = Job::new(uri);
        job.local_filename = self.map_local_filename(&job.uri)?;
        self.queue.push(job);
        Ok(())
    }

    /// The blacklist, for the `--debug` dump at exit.
    #[must_use]
    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    /// Drive the pool until the queue drains or termination is requested.
    pub async fn run(&mut self) -> Result<()> {
        for id in 0..self.agents.len() {
            let Some((job_id, part)) = self.queue.next_schedulable() else {
                break;
            };
            self.assign(id, job_id, part).await;
        }

        while self.queue.any() {
            tokio::select! {
                () = self.terminate.cancelled() => {
                    tracing::info!("# terminating with {} jobs pending", self.queue.len());
                    break;
                }
                received = self.rx.recv() => {
                    let Some((id, line)) = received else { break };
                    tracing::debug!("- [{id}] {line}");
                    match Message::parse(&line) {
                        Ok(message) => self.dispatch(id, message).await?,
                        Err(e) => tracing::error!("{e}"),
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn dispatch(&mut self, id: usize, message: Message) -> Result<()> {
        match message {
            Message::Sts(text) => {
                let uri = self.agents[id]
                    .job
                    .and_then(|job_id| self.queue.get(job_id))
                    .map(|job| job.uri.to_string());
                match uri {
                    Some(uri) => tracing::info!("status '{text}' for {uri}"),
                    None => tracing::info!("status '{text}'"),
                }
            }
            Message::Ready => self.handle_ready(id).await,
            Message::AddUri(raw) => self.add_discovered(id, &raw, false).await?,
            Message::Redirect(raw) => self.add_discovered(id, &raw, true).await?,
            chunk @ (Message::ChunkMirror { .. }
            | Message::ChunkHash { .. }
            | Message::ChunkPiece { .. }
            | Message::ChunkName(_)
            | Message::ChunkSize(_)) => self.apply_chunk(id, chunk),
            Message::Go | Message::Check => {
                tracing::warn!("agent {id} sent a controller verb");
            }
        }
        Ok(())
    }

    /// Fold a `chunk …` line into the agent's current job.
    fn apply_chunk(&mut self, id: usize, message: Message) {
        let Some(job_id) = self.agents[id].job else {
            tracing::warn!("chunk from agent {id} with no job");
            return;
        };
        let Some(job) = self.queue.get_mut(job_id) else {
            return;
        };
        match message {
            Message::ChunkMirror {
                location,
                priority,
                uri,
            } => match Url::parse(&uri) {
                Ok(parsed) => job.add_mirror(Mirror {
                    location,
                    priority,
                    uri: parsed,
                }),
                Err(e) => tracing::error!("failed to parse metalink mirror '{uri}': {e}"),
            },
            Message::ChunkHash { algo, hex } => job.add_hash(Hash::new(algo, hex)),
            Message::ChunkPiece { length, algo, hex } => {
                job.add_piece(length, Hash::new(algo, hex));
            }
            Message::ChunkName(name) => job.name = Some(name),
            Message::ChunkSize(size) => job.size = Some(size),
            _ => {}
        }
    }

    /// Handle `add uri` and `redirect` lines.
    async fn add_discovered(&mut self, id: usize, raw: &str, is_redirect: bool) -> Result<()> {
        let mut level = 0;
        if is_redirect {
            let Some(source) = self.agents[id].job.and_then(|job_id| self.queue.get(job_id))
            else {
                return Ok(());
            };
            if source.redirection_level >= self.cfg.max_redirect {
                // dropped without record
                return Ok(());
            }
            level = source.redirection_level + 1;
        }

        let uri = match Url::parse(raw.trim()) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!("failed to parse URI '{raw}': {e}");
                return Ok(());
            }
        };

        if self.cfg.recursive && !self.cfg.span_hosts {
            let allowed = uri
                .host_str()
                .is_some_and(|host| self.hosts.contains(host));
            if !allowed {
                return Ok(());
            }
        }

        let Some(uri) = self.blacklist.admit(uri) else {
            return Ok(());
        };

        let mut job = Job::new(uri);
        job.redirection_level = level;
        job.local_filename = self.map_local_filename(&job.uri)?;
        let job_id = self.queue.push(job);
        self.schedule(job_id, None).await;
        Ok(())
    }

    /// Complete the agent's prior assignment, then hand out new work.
    async fn handle_ready(&mut self, id: usize) {
        let job_id = self.agents[id].job.take();
        let part_index = self.agents[id].part.take();
        let report = {
            let mut slot = self.agents[id].slot.lock().unwrap();
            slot.assignment = None;
            slot.report.take()
        };

        if let Some(job_id) = job_id {
            if let Some(job) = self.queue.get_mut(job_id) {
                job.inuse = false;
                match report {
                    Some(Report::PartDone { index, done }) => {
                        if let Some(part) = job.parts.get_mut(index) {
                            part.inuse = false;
                            part.done = done;
                        }
                    }
                    Some(Report::Validation(validation)) => {
                        validate::apply_report(job, &validation);
                    }
                    None => {}
                }
            }
            self.complete(id, job_id, part_index).await;
        }

        // the completion may have turned this agent into the checker
        if self.agents[id].job.is_none() {
            if let Some((next_job, next_part)) = self.queue.next_schedulable() {
                self.assign(id, next_job, next_part).await;
            }
        }
    }

    /// The post-`ready` housekeeping for one job.
    async fn complete(&mut self, id: usize, job_id: JobId, part_index: Option<usize>) {
        struct Snapshot {
            plain_or_verified: bool,
            part_done: Option<bool>,
            all_parts_done: bool,
            size: Option<u64>,
            mirrorless: bool,
            uri: String,
        }

        let Some(snapshot) = self.queue.get(job_id).map(|job| Snapshot {
            plain_or_verified: job.pieces.is_empty() || job.hash_ok,
            part_done: part_index.and_then(|i| job.parts.get(i)).map(|p| p.done),
            all_parts_done: job.all_parts_done(),
            size: job.size,
            mirrorless: job.mirrors.is_empty(),
            uri: job.uri.to_string(),
        }) else {
            return;
        };

        if snapshot.plain_or_verified {
            tracing::debug!("# '{}' completed", snapshot.uri);
            self.queue.remove(job_id);
            return;
        }

        if part_index.is_some() {
            if snapshot.part_done != Some(true) {
                // the worker rotated through every mirror without success
                tracing::info!("# mirrors exhausted for {} - removing job", snapshot.uri);
                self.queue.remove(job_id);
                return;
            }
            if snapshot.all_parts_done {
                self.send_check(id, job_id).await;
            }
            return;
        }

        // Metalink metadata just arrived (or a failed whole-file check reset
        // the parts and sent the job back through here)
        if snapshot.size.unwrap_or(0) == 0 {
            tracing::debug!(
                "# file length {} - removing job",
                snapshot.size.unwrap_or(0)
            );
            self.queue.remove(job_id);
            return;
        }
        if snapshot.mirrorless {
            tracing::debug!("# no mirrors for {} - removing job", snapshot.uri);
            self.queue.remove(job_id);
            return;
        }
        let Some(target) = self.queue.get(job_id).and_then(|job| self.part_target(job)) else {
            tracing::error!("no destination for metalink job {}", snapshot.uri);
            self.queue.remove(job_id);
            return;
        };

        let (verified, retries) = {
            let job = self
                .queue
                .get_mut(job_id)
                .expect("job checked above");
            job.create_parts();
            let report = validate_file(&ValidationSpec::for_job(job, target));
            validate::apply_report(job, &report);
            if !job.hash_ok {
                job.sort_mirrors();
            }
            (job.hash_ok, job.hash_retries)
        };

        if verified {
            tracing::debug!("# '{}' already valid", snapshot.uri);
            self.queue.remove(job_id);
            return;
        }
        if retries >= MAX_HASH_RETRIES {
            tracing::info!(
                "# integrity retries exhausted for {} - removing job",
                snapshot.uri
            );
            self.queue.remove(job_id);
            return;
        }

        // start or resume: one part per idle agent
        loop {
            let Some(part) = self
                .queue
                .get(job_id)
                .and_then(quarry_core::job::Job::first_free_part)
            else {
                break;
            };
            if !self.schedule(job_id, Some(part)).await {
                break;
            }
        }
    }

    /// Ask the agent that finished the last part to verify the whole file.
    async fn send_check(&mut self, id: usize, job_id: JobId) {
        let Some(target) = self.queue.get(job_id).and_then(|job| self.part_target(job)) else {
            self.queue.remove(job_id);
            return;
        };
        let Some(job) = self.queue.get(job_id) else {
            return;
        };
        let spec = ValidationSpec::for_job(job, target);
        {
            let mut slot = self.agents[id].slot.lock().unwrap();
            slot.assignment = Some(Assignment::Validate(spec));
            slot.report = None;
        }
        self.agents[id].job = Some(job_id);
        let _ = self.agents[id].tx.send(Message::Check.to_string()).await;
    }

    /// Assign (job, part) to a specific agent and send `go`.
    async fn assign(&mut self, id: usize, job_id: JobId, part_index: Option<usize>) {
        let target = part_index
            .and_then(|_| self.queue.get(job_id))
            .and_then(|job| self.part_target(job));

        let assignment = {
            let Some(job) = self.queue.get_mut(job_id) else {
                return;
            };
            match part_index {
                Some(index) => {
                    let Some(target) = target else {
                        tracing::error!("no destination for metalink job {}", job.uri);
                        return;
                    };
                    job.parts[index].inuse = true;
                    Assignment::DownloadPart {
                        index,
                        part: job.parts[index],
                        mirrors: job.mirrors.clone(),
                        target,
                    }
                }
                None => {
                    job.inuse = true;
                    Assignment::Fetch {
                        uri: job.uri.clone(),
                        local_filename: job.local_filename.clone(),
                    }
                }
            }
        };

        {
            let mut slot = self.agents[id].slot.lock().unwrap();
            slot.assignment = Some(assignment);
            slot.report = None;
        }
        self.agents[id].job = Some(job_id);
        self.agents[id].part = part_index;
        let _ = self.agents[id].tx.send(Message::Go.to_string()).await;
    }

    /// Find an idle agent for (job, part), scanning from a rolling offset.
    ///
    /// `false` when every agent is busy; the job stays queued for a later
    /// `ready`.
    async fn schedule(&mut self, job_id: JobId, part_index: Option<usize>) -> bool {
        for _ in 0..self.agents.len() {
            let id = self.offset;
            self.offset = (self.offset + 1) % self.agents.len();
            if self.agents[id].job.is_none() {
                self.assign(id, job_id, part_index).await;
                return true;
            }
        }
        false
    }

    /// Where piece downloads and validation find the job's file.
    fn part_target(&self, job: &Job) -> Option<PathBuf> {
        job.name
            .as_ref()
            .map(|name| match &self.cfg.directory_prefix {
                Some(prefix) => prefix.join(name),
                None => PathBuf::from(name),
            })
            .or_else(|| job.local_filename.clone())
    }

    /// Map a URI to its local path, demoting mkdir failures to a missing
    /// path; only the traversal invariant is fatal.
    fn map_local_filename(&self, uri: &Url) -> Result<Option<PathBuf>> {
        match paths::local_filename(&self.cfg, uri) {
            Ok(path) => Ok(path),
            Err(ref fatal @ Error::Filesystem { ref kind, .. }) if kind == "InvalidPath" => {
                Err(fatal.clone())
            }
            Err(e) => {
                tracing::error!("{e}");
                Ok(None)
            }
        }
    }

    /// Close every agent channel and join the pool.
    ///
    /// Closing the receiver first unblocks any agent mid-send; it sees the
    /// failed send, then the closed control channel, and exits.
    async fn shutdown(&mut self) {
        self.terminate.cancel();
        self.rx.close();
        for agent in self.agents.drain(..) {
            drop(agent.tx);
            if let Err(e) = agent.task.await {
                tracing::error!("failed to join downloader: {e}");
            }
        }
    }
}
