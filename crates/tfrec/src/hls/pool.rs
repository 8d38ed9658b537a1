// Download Pool: a fixed set of workers draining a shared queue of segment
// references. Results are placed by discovery index, not completion order.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::hls::fetcher::SegmentDownloader;
use crate::hls::playlist::SegmentReference;

/// What one worker reports for one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentOutcome {
    pub index: usize,
    pub path: Option<PathBuf>,
}

impl SegmentOutcome {
    pub fn is_success(&self) -> bool {
        self.path.is_some()
    }
}

pub struct DownloadPool {
    workers: usize,
    downloader: Arc<dyn SegmentDownloader>,
}

impl DownloadPool {
    pub fn new(workers: usize, downloader: Arc<dyn SegmentDownloader>) -> Self {
        Self {
            workers: workers.max(1),
            downloader,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Download every reference into `dir`.
    ///
    /// The returned vector always has one slot per reference; a slot is
    /// `None` when that segment could not be fetched. Waits for all workers
    /// before returning.
    pub async fn run(&self, refs: Vec<SegmentReference>, dir: &Path) -> Vec<Option<PathBuf>> {
        let total = refs.len();
        let mut slots: Vec<Option<PathBuf>> = vec![None; total];
        if total == 0 {
            return slots;
        }

        let queue = Arc::new(Mutex::new(VecDeque::from(refs)));
        let (tx, mut rx) = mpsc::unbounded_channel::<SegmentOutcome>();
        let mut tasks = JoinSet::new();

        let worker_count = self.workers.min(total);
        for worker in 0..worker_count {
            let queue = Arc::clone(&queue);
            let downloader = Arc::clone(&self.downloader);
            let dir = dir.to_path_buf();
            let tx = tx.clone();

            tasks.spawn(
                async move {
                    loop {
                        let next = queue.lock().pop_front();
                        let Some(segment) = next else {
                            break;
                        };
                        let path = match downloader.fetch(&segment, &dir).await {
                            Ok(path) => Some(path),
                            Err(e) => {
                                warn!(index = segment.index, url = %segment.url, error = %e, "Segment dropped");
                                None
                            }
                        };
                        if tx
                            .send(SegmentOutcome {
                                index: segment.index,
                                path,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                    debug!("Worker drained the queue");
                }
                .instrument(info_span!("download_worker", worker)),
            );
        }
        drop(tx);

        while let Some(outcome) = rx.recv().await {
            match slots.get_mut(outcome.index) {
                Some(slot) => *slot = outcome.path,
                None => error!(index = outcome.index, total, "Outcome index out of range"),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Download worker terminated abnormally");
            }
        }

        let fetched = slots.iter().filter(|slot| slot.is_some()).count();
        info!(total, fetched, workers = worker_count, "Download pool finished");
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Delays vary per index so completion order differs from discovery order.
    struct FakeDownloader {
        failing: HashSet<usize>,
        panicking: HashSet<usize>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeDownloader {
        fn new(failing: &[usize], panicking: &[usize]) -> Self {
            Self {
                failing: failing.iter().copied().collect(),
                panicking: panicking.iter().copied().collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SegmentDownloader for FakeDownloader {
        async fn fetch(
            &self,
            segment: &SegmentReference,
            dir: &Path,
        ) -> Result<PathBuf, PipelineError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let delay = ((segment.index * 37) % 11) as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panicking.contains(&segment.index) {
                panic!("fake downloader panic");
            }
            if self.failing.contains(&segment.index) {
                return Err(PipelineError::FetchExhausted {
                    url: segment.url.clone(),
                    attempts: 3,
                    last_error: "HTTP 500".into(),
                });
            }
            Ok(dir.join(format!("{:05}.aac", segment.index)))
        }
    }

    fn refs(count: usize) -> Vec<SegmentReference> {
        (0..count)
            .map(|index| SegmentReference {
                index,
                url: format!("https://cdn.example.com/{index}.aac"),
                key: None,
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn results_follow_discovery_order() {
        let dir = Path::new("/work");
        let pool = DownloadPool::new(3, Arc::new(FakeDownloader::new(&[], &[])));

        let slots = pool.run(refs(20), dir).await;

        assert_eq!(slots.len(), 20);
        for (index, slot) in slots.iter().enumerate() {
            assert_eq!(slot.as_deref(), Some(dir.join(format!("{index:05}.aac")).as_path()));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failures_leave_absent_slots_without_cancelling_siblings() {
        let pool = DownloadPool::new(3, Arc::new(FakeDownloader::new(&[1, 7], &[])));

        let slots = pool.run(refs(10), Path::new("/work")).await;

        assert_eq!(slots.len(), 10);
        let missing: Vec<usize> = (0..10).filter(|i| slots[*i].is_none()).collect();
        assert_eq!(missing, vec![1, 7]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_worker_count() {
        let downloader = Arc::new(FakeDownloader::new(&[], &[]));
        let pool = DownloadPool::new(3, downloader.clone());

        pool.run(refs(30), Path::new("/work")).await;

        let peak = downloader.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak concurrency was {peak}");
    }

    #[tokio::test]
    async fn worker_panic_is_contained() {
        let pool = DownloadPool::new(2, Arc::new(FakeDownloader::new(&[], &[4])));

        let slots = pool.run(refs(6), Path::new("/work")).await;

        assert_eq!(slots.len(), 6);
        assert!(slots[4].is_none());
        assert!(slots[0].is_some());
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let pool = DownloadPool::new(3, Arc::new(FakeDownloader::new(&[], &[])));
        assert!(pool.run(Vec::new(), Path::new("/work")).await.is_empty());
    }

    #[test]
    fn zero_workers_is_clamped() {
        let pool = DownloadPool::new(0, Arc::new(FakeDownloader::new(&[], &[])));
        assert_eq!(pool.workers(), 1);
    }
}
