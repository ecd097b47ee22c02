//! The job queue: a FIFO arena of pending jobs.
//!
//! Pure state machine: no I/O, no locking. The controller is the only user
//! and synchronizes by owning it. Jobs stay in the queue while agents work
//! on them; removal happens only when a job completes or is abandoned.

use indexmap::IndexMap;

use quarry_core::job::{Job, JobId};

/// Insertion-ordered arena of jobs keyed by handle.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: IndexMap<u64, Job>,
    next: u64,
}

impl JobQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job, returning its handle.
    pub fn push(&mut self, job: Job) -> JobId {
        let id = self.next;
        self.next += 1;
        self.jobs.insert(id, job);
        JobId::new(id)
    }

    /// Look up a job.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id.raw())
    }

    /// Look up a job mutably.
    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id.raw())
    }

    /// Remove a job; FIFO order of the remainder is preserved.
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        self.jobs.shift_remove(&id.raw())
    }

    /// Whether any jobs remain.
    #[must_use]
    pub fn any(&self) -> bool {
        !self.jobs.is_empty()
    }

    /// Number of jobs in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// The next schedulable (job, part) pair in FIFO order.
    ///
    /// An ordinary job is schedulable while unassigned. A Metalink job with
    /// parts yields its first part that is neither in use nor done, and only
    /// once it has at least one mirror. The pair is not marked in-use here;
    /// assignment does that.
    #[must_use]
    pub fn next_schedulable(&self) -> Option<(JobId, Option<usize>)> {
        for (raw, job) in &self.jobs {
            if job.parts.is_empty() {
                if !job.inuse && job.pieces.is_empty() {
                    return Some((JobId::new(*raw), None));
                }
            } else if !job.mirrors.is_empty() {
                if let Some(part) = job.first_free_part() {
                    return Some((JobId::new(*raw), Some(part)));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::job::{Hash, Mirror};
    use url::Url;

    fn job(path: &str) -> Job {
        Job::new(Url::parse(&format!("http://example.org/{path}")).unwrap())
    }

    #[test]
    fn test_fifo_order() {
        let mut q = JobQueue::new();
        let a = q.push(job("a"));
        let b = q.push(job("b"));

        assert_eq!(q.next_schedulable(), Some((a, None)));
        q.get_mut(a).unwrap().inuse = true;
        assert_eq!(q.next_schedulable(), Some((b, None)));

        q.remove(a);
        assert!(q.any());
        q.remove(b);
        assert!(!q.any());
    }

    #[test]
    fn test_pieced_job_needs_mirror() {
        let mut q = JobQueue::new();
        let id = q.push(job("m"));

        let j = q.get_mut(id).unwrap();
        j.inuse = true;
        j.add_piece(10, Hash::new("sha-256", "aa"));
        j.create_parts();
        // pieces but no mirrors yet: nothing schedulable
        assert_eq!(q.next_schedulable(), None);

        q.get_mut(id).unwrap().add_mirror(Mirror {
            location: None,
            priority: 1,
            uri: Url::parse("http://m.example/f").unwrap(),
        });
        assert_eq!(q.next_schedulable(), Some((id, Some(0))));
    }

    #[test]
    fn test_parts_skip_inuse_and_done() {
        let mut q = JobQueue::new();
        let id = q.push(job("m"));
        let j = q.get_mut(id).unwrap();
        j.add_piece(10, Hash::new("sha-256", "aa"));
        j.add_piece(10, Hash::new("sha-256", "bb"));
        j.create_parts();
        j.add_mirror(Mirror {
            location: None,
            priority: 1,
            uri: Url::parse("http://m.example/f").unwrap(),
        });

        j.parts[0].inuse = true;
        assert_eq!(q.next_schedulable(), Some((id, Some(1))));

        let j = q.get_mut(id).unwrap();
        j.parts[1].done = true;
        assert_eq!(q.next_schedulable(), None);
    }

    #[test]
    fn test_metadata_pending_job_not_rescheduled() {
        // pieces arrived but parts not yet created: the job must not be
        // handed out as an ordinary fetch again
        let mut q = JobQueue::new();
        let id = q.push(job("m"));
        let j = q.get_mut(id).unwrap();
        j.inuse = false;
        j.add_piece(10, Hash::new("sha-256", "aa"));

        assert_eq!(q.next_schedulable(), None);
        let _ = id;
    }
}
