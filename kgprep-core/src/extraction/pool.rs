//! Bounded page worker pool for the OCR path.
//!
//! Pages are queued up front and pulled by `workers` detached threads. The
//! caller's thread collects results and enforces the page and job time
//! limits; it never joins a worker, so a stuck OCR call cannot hang the job.
//!
//! The page timer covers rasterization and inference. Time a page spends
//! waiting for a serialized engine is not charged to it.

use crate::config::ExtractionLimits;
use crate::error::{ExtractError, ExtractResult, PageError};
use crate::extraction::engines::OcrEngine;
use crate::extraction::raster::PageRasterizer;
use crate::types::PageResult;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, warn};

/// Everything a page task needs, shared by all workers of one extraction call.
pub(crate) struct OcrJob {
    pub pdf: Arc<[u8]>,
    pub rasterizer: Arc<dyn PageRasterizer>,
    pub engine: Arc<dyn OcrEngine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Rasterized, waiting for the engine
    Queued,
    /// The engine is working on this page
    Recognizing,
}

impl OcrJob {
    fn process_page(&self, page: u32, phase: &mut dyn FnMut(Phase)) -> Result<String, PageError> {
        let image = self
            .rasterizer
            .rasterize(&self.pdf, page, self.engine.color_mode())?;
        phase(Phase::Queued);
        let text = self
            .engine
            .recognize_queued(&image, &mut || phase(Phase::Recognizing))?;
        Ok(text.trim().to_string())
    }
}

enum Event {
    Started {
        page: u32,
        worker: usize,
        at: Instant,
    },
    Queued {
        page: u32,
    },
    Recognizing {
        page: u32,
        at: Instant,
    },
    Finished {
        page: u32,
        outcome: Result<String, PageError>,
    },
}

struct Pool {
    job: Arc<OcrJob>,
    tasks: Receiver<u32>,
    /// Held only while a timed-out worker may need replacing, so the event
    /// channel disconnects once every worker is gone.
    respawn: Option<Sender<Event>>,
    cancel: Arc<AtomicBool>,
    retired: HashMap<usize, Arc<AtomicBool>>,
    next_id: usize,
}

impl Pool {
    /// Spawn `workers` threads pulling from `tasks`. The returned receiver
    /// disconnects once every worker has exited unless `respawn` keeps a
    /// sender back for replacements.
    fn start(
        job: OcrJob,
        tasks: Receiver<u32>,
        workers: usize,
        respawn: bool,
    ) -> ExtractResult<(Self, Receiver<Event>)> {
        let (event_tx, event_rx) = unbounded();
        let mut pool = Pool {
            job: Arc::new(job),
            tasks,
            respawn: None,
            cancel: Arc::new(AtomicBool::new(false)),
            retired: HashMap::new(),
            next_id: 0,
        };

        for _ in 0..workers {
            if let Err(e) = pool.spawn_worker(event_tx.clone()) {
                pool.shutdown();
                return Err(e);
            }
        }
        if respawn {
            pool.respawn = Some(event_tx);
        }
        Ok((pool, event_rx))
    }

    fn spawn_worker(&mut self, events: Sender<Event>) -> ExtractResult<()> {
        let id = self.next_id;
        self.next_id += 1;

        let retired = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            id,
            job: Arc::clone(&self.job),
            tasks: self.tasks.clone(),
            events,
            cancel: Arc::clone(&self.cancel),
            retired: Arc::clone(&retired),
        };
        thread::Builder::new()
            .name(format!("kgprep-page-{id}"))
            .spawn(move || worker.run())
            .map_err(ExtractError::WorkerSpawn)?;

        self.retired.insert(id, retired);
        Ok(())
    }

    /// Stop handing pages to a worker stuck on a timed-out page and start
    /// a fresh one in its slot.
    fn replace_worker(&mut self, id: usize) -> ExtractResult<()> {
        if let Some(flag) = self.retired.remove(&id) {
            flag.store(true, Ordering::SeqCst);
        }
        match self.respawn.clone() {
            Some(events) => self.spawn_worker(events),
            None => Ok(()),
        }
    }

    fn shutdown(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

struct Worker {
    id: usize,
    job: Arc<OcrJob>,
    tasks: Receiver<u32>,
    events: Sender<Event>,
    cancel: Arc<AtomicBool>,
    retired: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        while !self.cancel.load(Ordering::SeqCst) && !self.retired.load(Ordering::SeqCst) {
            let Ok(page) = self.tasks.try_recv() else {
                break;
            };
            let started = Event::Started {
                page,
                worker: self.id,
                at: Instant::now(),
            };
            if self.events.send(started).is_err() {
                break;
            }

            let events = &self.events;
            let mut report = |phase: Phase| {
                let event = match phase {
                    Phase::Queued => Event::Queued { page },
                    Phase::Recognizing => Event::Recognizing {
                        page,
                        at: Instant::now(),
                    },
                };
                // A closed channel is noticed by the Finished send below
                let _ = events.send(event);
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                self.job.process_page(page, &mut report)
            }))
            .unwrap_or_else(|payload| Err(PageError::Panicked(panic_message(payload))));

            if self.events.send(Event::Finished { page, outcome }).is_err() {
                break;
            }
        }
        debug!(worker = self.id, "page worker exiting");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run OCR over `pages` with at most `workers` pages in flight.
///
/// Failed, panicked and timed-out pages are logged and come back absent.
/// Only the job deadline or a failure to start a thread fails the call.
/// Results are returned sorted by page number.
pub(crate) fn run_pages(
    job: OcrJob,
    pages: &[u32],
    workers: usize,
    limits: &ExtractionLimits,
) -> ExtractResult<Vec<PageResult>> {
    let total = pages.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let started = Instant::now();
    let page_timeout = limits.page_timeout();
    let job_timeout = limits.job_timeout();
    let job_deadline = job_timeout.map(|limit| started + limit);

    let (task_tx, task_rx) = unbounded();
    for &page in pages {
        // Cannot fail: the receiver is alive
        let _ = task_tx.send(page);
    }
    drop(task_tx);

    let (mut pool, event_rx) = Pool::start(
        job,
        task_rx,
        workers.clamp(1, total),
        page_timeout.is_some(),
    )?;

    // Page -> (worker, when its timer started). No timer while queued on the engine.
    let mut running: HashMap<u32, (usize, Option<Instant>)> = HashMap::new();
    let mut finished: HashSet<u32> = HashSet::new();
    let mut results: Vec<PageResult> = Vec::with_capacity(total);

    while results.len() < total {
        let page_deadline = page_timeout.and_then(|limit| {
            running
                .values()
                .filter_map(|&(_, at)| at)
                .map(|at| at + limit)
                .min()
        });
        let deadline = match (job_deadline, page_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let event = match deadline {
            Some(deadline) => match event_rx.recv_deadline(deadline) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match event_rx.recv() {
                Ok(event) => Some(event),
                Err(_) => break,
            },
        };

        match event {
            Some(Event::Started { page, worker, at }) => {
                if !finished.contains(&page) {
                    running.insert(page, (worker, Some(at)));
                }
            }
            Some(Event::Queued { page }) => {
                if let Some(entry) = running.get_mut(&page) {
                    entry.1 = None;
                }
            }
            Some(Event::Recognizing { page, at }) => {
                if let Some(entry) = running.get_mut(&page) {
                    entry.1 = Some(at);
                }
            }
            Some(Event::Finished { page, outcome }) => {
                running.remove(&page);
                // Late result of a page already recorded as timed out
                if !finished.insert(page) {
                    continue;
                }
                let result = match outcome {
                    Ok(text) => PageResult::present(page, text),
                    Err(e) => {
                        warn!(page, error = %e, "page failed, recording it as absent");
                        PageResult::absent(page)
                    }
                };
                results.push(result);
            }
            None => {
                let now = Instant::now();
                if let (Some(deadline), Some(limit)) = (job_deadline, job_timeout) {
                    if now >= deadline {
                        pool.shutdown();
                        warn!(
                            completed = results.len(),
                            total,
                            "extraction deadline passed, cancelling outstanding pages"
                        );
                        return Err(ExtractError::DeadlineExceeded {
                            limit,
                            completed: results.len(),
                            total,
                        });
                    }
                }

                let Some(limit) = page_timeout else { continue };
                let expired: Vec<(u32, usize)> = running
                    .iter()
                    .filter(|(_, (_, at))| at.is_some_and(|at| now.duration_since(at) >= limit))
                    .map(|(&page, &(worker, _))| (page, worker))
                    .collect();
                for (page, worker) in expired {
                    running.remove(&page);
                    finished.insert(page);
                    let error = PageError::TimedOut { page, limit };
                    warn!(page, error = %error, "page failed, recording it as absent");
                    results.push(PageResult::absent(page));

                    if let Err(e) = pool.replace_worker(worker) {
                        pool.shutdown();
                        return Err(e);
                    }
                }
            }
        }
    }

    pool.shutdown();
    // Short of `total` only if every worker exited before reporting its page
    for &page in pages {
        if !finished.contains(&page) {
            warn!(page, "page was never reported by a worker, recording it as absent");
            results.push(PageResult::absent(page));
        }
    }

    results.sort_by_key(|r| r.page_number);
    debug!(
        pages = total,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "page pool finished"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::engines::{Recognizer, SerializedEngine};
    use crate::extraction::raster::ColorMode;
    use crate::types::EngineKind;
    use image::{DynamicImage, GrayImage};
    use std::time::Duration;

    struct BlankRasterizer;

    impl PageRasterizer for BlankRasterizer {
        fn rasterize(
            &self,
            _pdf_bytes: &[u8],
            page: u32,
            _mode: ColorMode,
        ) -> Result<DynamicImage, PageError> {
            Ok(DynamicImage::ImageLuma8(GrayImage::new(page, 1)))
        }

        fn name(&self) -> &str {
            "blank"
        }
    }

    /// Reads the page number back from the image width.
    struct WidthEngine {
        panic_on: Option<u32>,
        stall_on: Option<(u32, Duration)>,
    }

    impl OcrEngine for WidthEngine {
        fn kind(&self) -> EngineKind {
            EngineKind::FastOcr
        }

        fn color_mode(&self) -> ColorMode {
            ColorMode::Grayscale
        }

        fn recognize(&self, image: &DynamicImage) -> Result<String, PageError> {
            let page = image.width();
            if self.panic_on == Some(page) {
                panic!("engine crashed on page {page}");
            }
            if let Some((stall_page, delay)) = self.stall_on {
                if stall_page == page {
                    thread::sleep(delay);
                }
            }
            Ok(format!("  page {page}\n"))
        }
    }

    fn job(engine: WidthEngine) -> OcrJob {
        OcrJob {
            pdf: Arc::from(Vec::new()),
            rasterizer: Arc::new(BlankRasterizer),
            engine: Arc::new(engine),
        }
    }

    #[test]
    fn results_are_trimmed_and_sorted() {
        let engine = WidthEngine { panic_on: None, stall_on: None };
        let results = run_pages(job(engine), &[3, 1, 2], 3, &ExtractionLimits::unlimited()).unwrap();
        assert_eq!(
            results,
            vec![
                PageResult::present(1, "page 1"),
                PageResult::present(2, "page 2"),
                PageResult::present(3, "page 3"),
            ]
        );
    }

    #[test]
    fn events_disconnect_once_workers_exit() {
        let engine = WidthEngine { panic_on: None, stall_on: None };
        let (tasks_tx, tasks) = unbounded::<u32>();
        drop(tasks_tx);
        let (pool, events) = Pool::start(job(engine), tasks, 2, false).unwrap();
        assert!(pool.respawn.is_none());
        assert!(matches!(
            events.recv_timeout(Duration::from_secs(5)),
            Err(RecvTimeoutError::Disconnected)
        ));

        let engine = WidthEngine { panic_on: None, stall_on: None };
        let (tasks_tx, tasks) = unbounded::<u32>();
        drop(tasks_tx);
        let (_pool, events) = Pool::start(job(engine), tasks, 2, true).unwrap();
        assert!(matches!(
            events.recv_timeout(Duration::from_millis(200)),
            Err(RecvTimeoutError::Timeout)
        ));
    }

    #[test]
    fn panicking_page_is_absent() {
        let engine = WidthEngine { panic_on: Some(2), stall_on: None };
        let results = run_pages(job(engine), &[1, 2, 3], 2, &ExtractionLimits::unlimited()).unwrap();
        assert_eq!(results[1], PageResult::absent(2));
        assert_eq!(results[0].text.as_deref(), Some("page 1"));
        assert_eq!(results[2].text.as_deref(), Some("page 3"));
    }

    #[test]
    fn stalled_page_times_out_and_others_finish() {
        let engine = WidthEngine {
            panic_on: None,
            stall_on: Some((1, Duration::from_secs(3))),
        };
        let limits = ExtractionLimits {
            page_timeout_secs: Some(1),
            job_timeout_secs: None,
        };
        // One worker: page 1 stalls, the replacement worker picks up 2 and 3
        let results = run_pages(job(engine), &[1, 2, 3], 1, &limits).unwrap();
        assert_eq!(results[0], PageResult::absent(1));
        assert_eq!(results[1].text.as_deref(), Some("page 2"));
        assert_eq!(results[2].text.as_deref(), Some("page 3"));
    }

    struct SlowRecognizer(Duration);

    impl Recognizer for SlowRecognizer {
        fn recognize(&mut self, image: &DynamicImage) -> Result<String, PageError> {
            thread::sleep(self.0);
            Ok(format!("page {}", image.width()))
        }
    }

    #[test]
    fn waiting_for_a_serialized_engine_does_not_count_as_timeout() {
        let job = OcrJob {
            pdf: Arc::from(Vec::new()),
            rasterizer: Arc::new(BlankRasterizer),
            engine: Arc::new(SerializedEngine::new(
                EngineKind::AccurateOcr,
                ColorMode::Color,
                SlowRecognizer(Duration::from_millis(600)),
            )),
        };
        let limits = ExtractionLimits {
            page_timeout_secs: Some(1),
            job_timeout_secs: Some(30),
        };

        // Four pages queue on one lock: the last one waits ~1.8 s in total
        let results = run_pages(job, &[1, 2, 3, 4], 4, &limits).unwrap();
        let texts: Vec<_> = results.iter().map(|r| r.text.as_deref()).collect();
        assert_eq!(
            texts,
            vec![Some("page 1"), Some("page 2"), Some("page 3"), Some("page 4")]
        );
    }

    #[test]
    fn stuck_inference_times_out_behind_the_lock() {
        let job = OcrJob {
            pdf: Arc::from(Vec::new()),
            rasterizer: Arc::new(BlankRasterizer),
            engine: Arc::new(SerializedEngine::new(
                EngineKind::AccurateOcr,
                ColorMode::Color,
                SlowRecognizer(Duration::from_secs(3)),
            )),
        };
        let limits = ExtractionLimits {
            page_timeout_secs: Some(1),
            job_timeout_secs: Some(2),
        };

        // The first page is timed out; the rest wait on the lock until the job deadline
        let err = run_pages(job, &[1, 2, 3], 3, &limits).unwrap_err();
        match err {
            ExtractError::DeadlineExceeded { completed, total, .. } => {
                assert_eq!(completed, 1);
                assert_eq!(total, 3);
            }
            other => panic!("expected DeadlineExceeded, got {other:?}"),
        }
    }
}
