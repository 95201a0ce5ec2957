//! Background mounting of an ordered archive list
//!
//! Mounting a full game folder parses thousands of table records, so it runs
//! on a dedicated worker. The caller gets a [`MountTask`] to poll from its
//! own loop, or awaits [`MountOrchestrator::mount_all_async`] on tokio.
//! The file system is only handed out once every archive has been mounted.

use crate::config::MountRequest;
use crate::crc::CrcHash;
use crate::error::OrchestratorError;
use crate::vfs::VirtualFileSystem;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one mount attempt
pub type MountResult = Result<VirtualFileSystem, OrchestratorError>;

const WORKER_NAME: &str = "cpk-mount";

/// Mount every archive of `request` in order, stopping at the first failure.
pub fn mount_all(crc: &Arc<CrcHash>, request: &MountRequest) -> MountResult {
    let start = Instant::now();
    let vfs = VirtualFileSystem::new(&request.root, request.config.clone(), Arc::clone(crc));

    for archive in &request.archives {
        debug!("Mounting {:?}", request.archive_path(archive));
        vfs.mount(archive)
            .map_err(|source| OrchestratorError::Archive {
                archive: archive.clone(),
                source,
            })?;
    }

    info!(
        "All cpk files mounted under {:?}: {} archives, {} entries in {:.3}s",
        request.root,
        request.archives.len(),
        vfs.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(vfs)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

enum TaskState {
    Running(JoinHandle<MountResult>),
    Ready(MountResult),
    Taken,
}

/// Handle to a mount running on a background thread.
///
/// Dropping the task detaches the worker; it still runs to completion but
/// its result is discarded.
pub struct MountTask {
    root: PathBuf,
    state: TaskState,
}

impl MountTask {
    /// Root folder of the request this task is mounting
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Whether the result is ready (or was already taken)
    pub fn is_finished(&self) -> bool {
        match &self.state {
            TaskState::Running(handle) => handle.is_finished(),
            TaskState::Ready(_) | TaskState::Taken => true,
        }
    }

    /// Non-blocking check. Returns the result exactly once, after the worker
    /// has finished; `None` before that and on every later call.
    pub fn poll(&mut self) -> Option<MountResult> {
        if !self.is_finished() {
            return None;
        }
        self.take()
    }

    /// Block until the worker finishes.
    pub fn wait(mut self) -> MountResult {
        self.take().unwrap_or_else(|| {
            Err(OrchestratorError::Runtime(
                "mount result was already taken".to_string(),
            ))
        })
    }

    fn take(&mut self) -> Option<MountResult> {
        match std::mem::replace(&mut self.state, TaskState::Taken) {
            TaskState::Running(handle) => Some(
                handle
                    .join()
                    .unwrap_or_else(|payload| {
                        Err(OrchestratorError::WorkerPanicked(panic_message(&*payload)))
                    }),
            ),
            TaskState::Ready(result) => Some(result),
            TaskState::Taken => None,
        }
    }
}

impl std::fmt::Debug for MountTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTask")
            .field("root", &self.root)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Runs mount requests on a worker thread, one at a time.
#[derive(Debug)]
pub struct MountOrchestrator {
    crc: Arc<CrcHash>,
    current: Option<MountTask>,
}

impl MountOrchestrator {
    /// Create an orchestrator sharing `crc` with every file system it builds.
    pub fn new(crc: Arc<CrcHash>) -> Self {
        crc.init();
        Self { crc, current: None }
    }

    pub fn crc(&self) -> &Arc<CrcHash> {
        &self.crc
    }

    /// Mount synchronously on the calling thread.
    pub fn mount_all(&self, request: &MountRequest) -> MountResult {
        mount_all(&self.crc, request)
    }

    /// Try each root in turn, returning the first file system that mounts
    /// completely.
    ///
    /// `request_for` builds the request for a candidate root when that root
    /// is tried, so archive lists that depend on the folder contents (such as
    /// [`MountRequest::for_game`]) are read from the right folder. When every
    /// candidate fails, the last failure is returned.
    pub fn mount_first_available<F>(
        &self,
        roots: impl IntoIterator<Item = PathBuf>,
        mut request_for: F,
    ) -> MountResult
    where
        F: FnMut(PathBuf) -> MountRequest,
    {
        let mut last_error = None;
        for root in roots {
            let candidate = request_for(root);
            match mount_all(&self.crc, &candidate) {
                Ok(vfs) => return Ok(vfs),
                Err(e) => {
                    warn!("Game data not usable under {:?}: {}", candidate.root, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(OrchestratorError::NoCandidates))
    }

    /// Start mounting on a background thread.
    pub fn spawn(&self, request: MountRequest) -> MountTask {
        let root = request.root.clone();
        let crc = Arc::clone(&self.crc);

        let state = match thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || mount_all(&crc, &request))
        {
            Ok(handle) => TaskState::Running(handle),
            Err(e) => TaskState::Ready(Err(OrchestratorError::Runtime(format!(
                "failed to start mount worker: {e}"
            )))),
        };

        MountTask { root, state }
    }

    /// Start a new attempt, replacing any attempt still in flight.
    ///
    /// The previous worker is joined and its result discarded, so at most
    /// one worker ever runs per orchestrator.
    pub fn begin(&mut self, request: MountRequest) {
        if let Some(previous) = self.current.take() {
            debug!("Discarding mount attempt under {:?}", previous.root());
            drop(previous.wait());
        }
        self.current = Some(self.spawn(request));
    }

    /// Result of the attempt started with [`begin`](Self::begin), once.
    pub fn poll(&mut self) -> Option<MountResult> {
        let result = self.current.as_mut()?.poll()?;
        self.current = None;
        Some(result)
    }

    /// Whether an attempt started with [`begin`](Self::begin) is pending
    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    /// Mount on tokio's blocking pool.
    pub async fn mount_all_async(&self, request: MountRequest) -> MountResult {
        let crc = Arc::clone(&self.crc);
        tokio::task::spawn_blocking(move || mount_all(&crc, &request))
            .await
            .unwrap_or_else(|e| {
                if e.is_panic() {
                    Err(OrchestratorError::WorkerPanicked(panic_message(
                        &*e.into_panic(),
                    )))
                } else {
                    Err(OrchestratorError::Runtime(e.to_string()))
                }
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::VfsConfig;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let handle = thread::spawn(|| -> MountResult { panic!("worker exploded") });
        while !handle.is_finished() {
            thread::yield_now();
        }
        let mut task = MountTask {
            root: PathBuf::from("/games/pal3"),
            state: TaskState::Running(handle),
        };
        match task.poll() {
            Some(Err(OrchestratorError::WorkerPanicked(msg))) => assert_eq!(msg, "worker exploded"),
            other => panic!("unexpected poll result: {other:?}"),
        }
        assert!(task.poll().is_none());
        assert!(task.is_finished());
    }

    #[test]
    fn test_empty_request_mounts_empty_vfs() {
        let orchestrator = MountOrchestrator::new(Arc::new(CrcHash::new()));
        let request = MountRequest::new("/games/pal3", Vec::<PathBuf>::new(), VfsConfig::default());
        let vfs = orchestrator.mount_all(&request).unwrap();
        assert!(vfs.is_empty());
        assert!(orchestrator.crc().is_initialized());
    }

    #[test]
    fn test_no_candidates() {
        let orchestrator = MountOrchestrator::new(Arc::new(CrcHash::initialized()));
        let err = orchestrator
            .mount_first_available(Vec::new(), |root| {
                MountRequest::new(root, ["basedata/basedata.cpk"], VfsConfig::default())
            })
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoCandidates));
    }
}
