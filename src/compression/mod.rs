mod transcode;

pub use transcode::CompressionOptions;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{Error, Result};
use crate::hashing;

#[derive(Debug, Clone)]
pub struct CompressionRequest {
    pub source_path: PathBuf,
    pub compressed_output_path: PathBuf,
    pub thumbnail_output_path: PathBuf,
    /// If the Pipeline already knows the Image's stored hash, resumability can
    /// short-circuit the whole job without touching the encoder.
    pub known_source_hash: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub compressed_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub active: usize,
    pub worker_count: usize,
}

struct Task {
    request: CompressionRequest,
    options: Arc<CompressionOptions>,
    result_tx: Sender<Result<CompressionResult>>,
}

/// A handle to a submitted job. `wait` enforces the per-task timeout from the
/// caller's side, since the worker itself may be stuck inside a blocking decode/encode call.
pub struct CompressionFuture {
    rx: Receiver<Result<CompressionResult>>,
    source_path: PathBuf,
}

impl CompressionFuture {
    pub fn wait(self, timeout: Duration) -> Result<CompressionResult> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::CompressionTimeout(self.source_path)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::WorkerCrashed),
        }
    }
}

/// Bounded pool of N worker threads. Workers share one task queue;
/// a panicking job is caught per-task (`catch_unwind`) so a single bad input can't take the
/// thread down, but if a worker thread does exit anyway, the pool notices its join handle died
/// and spawns a replacement — `WorkerCrashed` only ever reaches the caller via a dropped sender.
pub struct WorkerPool {
    task_tx: Sender<Task>,
    task_rx: Receiver<Task>,
    active: Arc<AtomicUsize>,
    handles: std::sync::Mutex<Vec<thread::JoinHandle<()>>>,
    worker_count: usize,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        let (task_tx, task_rx) = bounded::<Task>(256);
        let active = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            handles.push(spawn_worker(id, task_rx.clone(), active.clone()));
        }
        Self {
            task_tx,
            task_rx,
            active,
            handles: std::sync::Mutex::new(handles),
            worker_count,
        }
    }

    pub fn submit(&self, request: CompressionRequest, options: Arc<CompressionOptions>) -> CompressionFuture {
        self.respawn_dead_workers();
        let (result_tx, result_rx) = bounded(1);
        let source_path = request.source_path.clone();
        let task = Task {
            request,
            options,
            result_tx,
        };
        // A full queue applies backpressure to the Pipeline's producer loop by blocking here:
        // workers own CPU, submission waits its turn.
        let _ = self.task_tx.send(task);
        CompressionFuture {
            rx: result_rx,
            source_path,
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.active.load(Ordering::SeqCst),
            worker_count: self.worker_count,
        }
    }

    fn respawn_dead_workers(&self) {
        let mut handles = self.handles.lock().expect("worker pool handles mutex poisoned");
        for handle in handles.iter_mut() {
            if handle.is_finished() {
                tracing::warn!("compression worker thread exited, respawning");
                let id = handles.len();
                *handle = spawn_worker(id, self.task_rx.clone(), self.active.clone());
            }
        }
    }

    /// Drop the sending half so every worker's receive loop ends, then join them. Workers
    /// finish whatever task they're mid-flight on; no new task is accepted past this point.
    pub fn shutdown(self) {
        drop(self.task_tx);
        let handles = self.handles.into_inner().expect("worker pool handles mutex poisoned");
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn spawn_worker(id: usize, task_rx: Receiver<Task>, active: Arc<AtomicUsize>) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(format!("compression-worker-{id}"))
        .spawn(move || {
            while let Ok(task) = task_rx.recv() {
                active.fetch_add(1, Ordering::SeqCst);
                let result = run_task(&task.request, &task.options);
                active.fetch_sub(1, Ordering::SeqCst);
                let _ = task.result_tx.send(result);
            }
        })
        .expect("failed to spawn compression worker thread")
}

fn is_resumable(request: &CompressionRequest) -> Result<Option<CompressionResult>> {
    if !request.compressed_output_path.exists() || !request.thumbnail_output_path.exists() {
        return Ok(None);
    }
    let Some(known_hash) = &request.known_source_hash else {
        return Ok(None);
    };
    let current_hash = match hashing::hash_file(&request.source_path) {
        Ok(hash) => hash,
        Err(_) => return Ok(None),
    };
    if &current_hash != known_hash {
        return Ok(None);
    }
    let metadata = std::fs::metadata(&request.compressed_output_path)?;
    let dimensions = image::image_dimensions(&request.compressed_output_path).ok();
    let (width, height) = dimensions.unwrap_or((0, 0));
    Ok(Some(CompressionResult {
        compressed_path: request.compressed_output_path.clone(),
        thumbnail_path: request.thumbnail_output_path.clone(),
        width,
        height,
        file_size: metadata.len(),
        hash: current_hash,
    }))
}

fn run_task(request: &CompressionRequest, options: &CompressionOptions) -> Result<CompressionResult> {
    if let Some(resumed) = is_resumable(request)? {
        tracing::debug!(path = %request.source_path.display(), "compression short-circuited, already resumable");
        return Ok(resumed);
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        transcode::transcode(
            &request.source_path,
            &request.compressed_output_path,
            &request.thumbnail_output_path,
            options,
        )
    }));

    match outcome {
        Ok(Ok(result)) => Ok(CompressionResult {
            compressed_path: result.compressed_path,
            thumbnail_path: result.thumbnail_path,
            width: result.width,
            height: result.height,
            file_size: result.file_size,
            hash: result.source_hash,
        }),
        Ok(Err(err)) => Err(err),
        Err(_) => {
            tracing::warn!(path = %request.source_path.display(), "compression task panicked");
            Err(Error::ScanError(format!(
                "compression panicked for {}",
                request.source_path.display()
            )))
        }
    }
}
