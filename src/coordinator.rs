use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;

use crate::domain::{FileStatus, FileTarget, TaskStatus};
use crate::error::EnaError;
use crate::fetcher::{FileFetcher, Transport};
use crate::manifest::Manifest;
use crate::resolver::TaskResolver;
use crate::store::Store;
use crate::summary::RunSummary;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Number of tasks processed so far, including this one.
    pub position: usize,
    pub total: usize,
    pub run: Option<String>,
    pub status: Option<TaskStatus>,
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub max_retries: u32,
    pub keep_failed: bool,
    /// Number of runs fetched at the same time.
    pub concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            keep_failed: false,
            concurrency: 1,
        }
    }
}

/// Drives a manifest through the fetcher, persisting it after every task.
pub struct BatchCoordinator<'a, T: Transport> {
    fetcher: &'a FileFetcher<T>,
    store: &'a Store,
    resolver: TaskResolver,
}

impl<'a, T: Transport> BatchCoordinator<'a, T> {
    pub fn new(fetcher: &'a FileFetcher<T>, store: &'a Store) -> Self {
        Self {
            fetcher,
            store,
            resolver: TaskResolver::new(store.raw_reads_dir()),
        }
    }

    /// Per-file failures end up in the returned manifest. Errors are only
    /// returned when the manifest cannot be persisted or the run was
    /// cancelled; in both cases the last persisted manifest stays resumable.
    pub fn run(
        &self,
        mut manifest: Manifest,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<(Manifest, RunSummary), EnaError> {
        let path = self.store.manifest_path();
        for task in manifest.tasks_mut() {
            task.reset();
        }
        manifest.save(&path, &self.resolver)?;

        let started = Instant::now();
        tracing::info!(
            tasks = manifest.len(),
            concurrency = options.concurrency,
            max_retries = options.max_retries,
            keep_failed = options.keep_failed,
            "starting download"
        );
        if options.concurrency > 1 {
            self.run_pooled(&mut manifest, options, sink, &path, started)?;
        } else {
            self.run_sequential(&mut manifest, options, sink, &path, started)?;
        }

        if self.fetcher.cancel_token().is_cancelled() {
            manifest.save(&path, &self.resolver)?;
            tracing::warn!(path = %path, "download cancelled, manifest saved for resume");
            return Err(EnaError::Cancelled);
        }

        let summary = manifest.summary();
        tracing::info!(
            total = summary.total_files,
            successful = summary.successful,
            existed = summary.already_existed,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "download finished"
        );
        Ok((manifest, summary))
    }

    fn run_sequential(
        &self,
        manifest: &mut Manifest,
        options: &RunOptions,
        sink: &dyn ProgressSink,
        path: &Utf8Path,
        started: Instant,
    ) -> Result<(), EnaError> {
        let cancel = self.fetcher.cancel_token();
        let mut processed = 0;
        for index in 0..manifest.len() {
            if cancel.is_cancelled() {
                break;
            }
            let task = &manifest.tasks()[index];
            processed += 1;
            if task.targets.is_empty() {
                self.skip_event(manifest, index, processed, sink);
                continue;
            }
            let outcomes = self.fetch_targets(&task.targets, options);
            if cancel.is_cancelled() {
                break;
            }
            self.record(manifest, index, outcomes, processed, path, sink, started)?;
        }
        Ok(())
    }

    fn run_pooled(
        &self,
        manifest: &mut Manifest,
        options: &RunOptions,
        sink: &dyn ProgressSink,
        path: &Utf8Path,
        started: Instant,
    ) -> Result<(), EnaError> {
        let cancel = self.fetcher.cancel_token();
        let mut processed = 0;
        let mut jobs = Vec::new();
        for (index, task) in manifest.tasks().iter().enumerate() {
            if task.targets.is_empty() {
                processed += 1;
                self.skip_event(manifest, index, processed, sink);
            } else {
                jobs.push((index, task.targets.clone()));
            }
        }
        let workers = options.concurrency.min(jobs.len()).max(1);
        let next = AtomicUsize::new(0);

        thread::scope(|scope| -> Result<(), EnaError> {
            let (tx, rx) = mpsc::channel::<(usize, Vec<FileStatus>)>();
            for _ in 0..workers {
                let tx = tx.clone();
                let jobs = &jobs;
                let next = &next;
                scope.spawn(move || {
                    loop {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let slot = next.fetch_add(1, Ordering::SeqCst);
                        let Some((index, targets)) = jobs.get(slot) else {
                            break;
                        };
                        let outcomes = self.fetch_targets(targets, options);
                        if tx.send((*index, outcomes)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            // This thread is the only manifest writer.
            for (index, outcomes) in rx {
                if cancel.is_cancelled() {
                    continue;
                }
                processed += 1;
                self.record(manifest, index, outcomes, processed, path, sink, started)?;
            }
            Ok(())
        })
    }

    fn fetch_targets(&self, targets: &[FileTarget], options: &RunOptions) -> Vec<FileStatus> {
        targets
            .iter()
            .map(|target| {
                self.fetcher
                    .fetch(target, options.max_retries, options.keep_failed)
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        manifest: &mut Manifest,
        index: usize,
        outcomes: Vec<FileStatus>,
        processed: usize,
        path: &Utf8Path,
        sink: &dyn ProgressSink,
        started: Instant,
    ) -> Result<(), EnaError> {
        let total = manifest.len();
        let task = &mut manifest.tasks_mut()[index];
        task.outcomes = outcomes;
        let status = task.status();
        let run = task.run_id.to_string();
        let tokens = task
            .outcomes
            .iter()
            .map(|status| status.token())
            .collect::<Vec<_>>()
            .join(";");
        manifest.save(path, &self.resolver)?;

        match status {
            TaskStatus::Complete => tracing::info!(run = %run, files = %tokens, "run complete"),
            _ => tracing::warn!(run = %run, files = %tokens, "run {status}"),
        }
        sink.event(ProgressEvent {
            position: processed,
            total,
            run: Some(run),
            status: Some(status),
            message: format!("phase=Fetch; {tokens}"),
            elapsed: Some(started.elapsed()),
        });
        Ok(())
    }

    fn skip_event(
        &self,
        manifest: &Manifest,
        index: usize,
        processed: usize,
        sink: &dyn ProgressSink,
    ) {
        let task = &manifest.tasks()[index];
        tracing::debug!(run = %task.run_id, "no files listed, skipping");
        sink.event(ProgressEvent {
            position: processed,
            total: manifest.len(),
            run: Some(task.run_id.to_string()),
            status: Some(TaskStatus::NotAttempted),
            message: "phase=Resolve; no files listed".to_string(),
            elapsed: None,
        });
    }
}
