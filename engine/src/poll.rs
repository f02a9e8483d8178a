//! The polling consumer.
//!
//! One `poll` call is one cycle:
//!
//! 1. scan and filter the endpoint directory
//! 2. gate on done files and the idempotent repository
//! 3. claim an in-progress key per candidate
//! 4. sort, truncate to `maxMessagesPerPoll`, acquire read locks
//! 5. hand each locked file to the `FileProcessor` (optionally on a worker
//!    pool) and commit or roll back
//!
//! Steps 1 to 4 run under a per-endpoint selection lock. Every in-progress
//! key claimed in a cycle is held by an `InProgressClaim`, so it is released
//! before `poll` returns or unwinds.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::config::EndpointConfig;
use crate::done_file::DoneFileCoordinator;
use crate::error::{EngineError, EngineResult, ProcessError};
use crate::expression::TemplateContext;
use crate::filter::{EntryPredicate, PathFilterChain};
use crate::fs_ops;
use crate::idempotent::{
    IdempotentRepository, IdempotentTracker, InProgressClaim, MemoryIdempotentRepository,
};
use crate::model::{CandidateEntry, FileUnit, InProgressKey, PollBatch, SkipReason, TransferOutcome};
use crate::process_strategy::ProcessStrategy;
use crate::read_lock::{build_strategy, LockAttempt, LockToken, ReadLockStrategy, Release};
use crate::resume::{NoResume, ResumeAction, ResumeStrategy};
use crate::scanner::{compare_candidates, DirectoryScanner};

/// Signal returned by poll-strategy hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    Continue,
    /// Skip the rest of this cycle
    SkipCycle,
    /// Stop the endpoint
    Stop,
}

/// Hooks around a poll cycle that may veto or stop the consumer.
pub trait PollStrategy: Send + Sync {
    /// Before scanning.
    fn begin(&self, _endpoint: &Path) -> PollControl {
        PollControl::Continue
    }

    /// After every file of the cycle was handled.
    fn commit(&self, _endpoint: &Path, _report: &PollReport) -> PollControl {
        PollControl::Continue
    }

    /// For a scan failure, or a file whose processing or commit failed.
    fn rollback(&self, endpoint: &Path, error: &EngineError) -> PollControl;
}

/// Logs failures; stops the endpoint when its directory cannot be scanned.
#[derive(Debug, Default)]
pub struct DefaultPollStrategy;

impl PollStrategy for DefaultPollStrategy {
    fn rollback(&self, endpoint: &Path, error: &EngineError) -> PollControl {
        match error {
            EngineError::StartingDirectoryNotFound { .. }
            | EngineError::StartingDirectoryAccess { .. }
            | EngineError::Scan { .. } => {
                error!(endpoint = %endpoint.display(), error = %error, "endpoint cannot be scanned, stopping");
                PollControl::Stop
            }
            _ => {
                warn!(endpoint = %endpoint.display(), error = %error, "file not processed");
                PollControl::Continue
            }
        }
    }
}

/// The collaborator that consumes file content.
///
/// `begin_processing` creates a per-file token, `process` reads the stream,
/// and `end_processing` always follows a successful `begin_processing` with
/// the final outcome.
pub trait FileProcessor: Send + Sync {
    type Token: Send;

    fn begin_processing(&self, unit: &FileUnit) -> Result<Self::Token, ProcessError>;

    fn process(
        &self,
        token: &mut Self::Token,
        unit: &FileUnit,
        reader: &mut dyn Read,
    ) -> Result<(), ProcessError>;

    fn end_processing(&self, _token: Self::Token, _outcome: &TransferOutcome) {}
}

/// What happened during one poll cycle.
#[derive(Debug, Default, Clone)]
pub struct PollReport {
    /// Outcome per selected file, in batch order
    pub outcomes: Vec<(PathBuf, TransferOutcome)>,
    /// Set when the endpoint was asked to stop during the cycle
    pub stopped: bool,
}

impl PollReport {
    fn count(&self, pred: impl Fn(&TransferOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn committed(&self) -> usize {
        self.count(TransferOutcome::is_committed)
    }

    pub fn rolled_back(&self) -> usize {
        self.count(|o| matches!(o, TransferOutcome::RolledBack))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TransferOutcome::Skipped(_)))
    }

    /// Outcome recorded for `path`, if it was selected.
    pub fn outcome_of(&self, path: &Path) -> Option<TransferOutcome> {
        self.outcomes
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, outcome)| *outcome)
    }
}

/// Object-safe surface the scheduler drives.
pub trait PollLifecycle: Send + Sync {
    fn endpoint(&self) -> &Path;

    /// Validate and prepare the starting directory.
    fn start(&self) -> EngineResult<()>;

    fn poll(&self) -> EngineResult<PollReport>;

    /// Shared stop flag; setting it ends the current batch early.
    fn stop_handle(&self) -> Arc<AtomicBool>;

    fn is_stopped(&self) -> bool {
        self.stop_handle().load(Ordering::SeqCst)
    }
}

struct Selected {
    entry: CandidateEntry,
    claim: InProgressClaim,
    idempotent_key: String,
}

struct Work {
    unit: FileUnit,
    token: LockToken,
    claim: InProgressClaim,
    idempotent_key: String,
}

/// Polling consumer for one endpoint directory.
pub struct FileConsumer<P: FileProcessor> {
    config: EndpointConfig,
    scanner: DirectoryScanner,
    done_files: Option<DoneFileCoordinator>,
    tracker: IdempotentTracker,
    read_lock: Box<dyn ReadLockStrategy>,
    resume: Arc<dyn ResumeStrategy>,
    process_strategy: ProcessStrategy,
    poll_strategy: Arc<dyn PollStrategy>,
    processor: Arc<P>,
    stop: Arc<AtomicBool>,
    selection: Mutex<()>,
}

impl<P: FileProcessor> FileConsumer<P> {
    /// Build a consumer with memory-backed repositories.
    pub fn new(config: EndpointConfig, processor: Arc<P>) -> EngineResult<Self> {
        let filter = PathFilterChain::from_config(&config)?;
        let scanner = DirectoryScanner::new(&config.directory, filter)
            .with_extended_attributes(config.extended_attributes.clone());
        let done_files = config
            .done_file_name
            .clone()
            .map(DoneFileCoordinator::new)
            .transpose()?;
        let repository: Option<Arc<dyn IdempotentRepository>> = if config.idempotent {
            Some(Arc::new(MemoryIdempotentRepository::default()))
        } else {
            None
        };
        let read_lock = build_strategy(
            &config.read_lock,
            Arc::new(MemoryIdempotentRepository::default()),
        )?;
        let process_strategy = ProcessStrategy::from_config(&config, done_files.clone());

        Ok(Self {
            scanner,
            done_files,
            tracker: IdempotentTracker::new(repository),
            read_lock,
            resume: Arc::new(NoResume),
            process_strategy,
            poll_strategy: Arc::new(DefaultPollStrategy),
            processor,
            stop: Arc::new(AtomicBool::new(false)),
            selection: Mutex::new(()),
            config,
        })
    }

    /// Add a custom predicate to the filter chain.
    pub fn with_filter(mut self, predicate: EntryPredicate) -> Self {
        let filter = self.scanner.filter().clone().with_predicate(predicate);
        self.scanner = DirectoryScanner::new(&self.config.directory, filter)
            .with_extended_attributes(self.config.extended_attributes.clone());
        self
    }

    /// Use `repository` for idempotent tracking (only when the endpoint is idempotent).
    pub fn with_idempotent_repository(mut self, repository: Arc<dyn IdempotentRepository>) -> Self {
        if self.config.idempotent {
            self.tracker = IdempotentTracker::new(Some(repository));
        }
        self
    }

    /// Repository backing `readLock=idempotent`; share it between consumers
    /// of the same directory.
    pub fn with_read_lock_repository(
        mut self,
        repository: Arc<dyn IdempotentRepository>,
    ) -> EngineResult<Self> {
        self.read_lock = build_strategy(&self.config.read_lock, repository)?;
        Ok(self)
    }

    pub fn with_resume_strategy(mut self, resume: Arc<dyn ResumeStrategy>) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_poll_strategy(mut self, poll_strategy: Arc<dyn PollStrategy>) -> Self {
        self.poll_strategy = poll_strategy;
        self
    }

    /// Share a stop flag, for example with a scheduler.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn processor(&self) -> &Arc<P> {
        &self.processor
    }

    /// Number of candidates currently claimed by a cycle.
    pub fn in_progress_len(&self) -> usize {
        self.tracker.in_progress_len()
    }

    fn endpoint_path(&self) -> &Path {
        &self.config.directory
    }

    fn check_starting_directory(&self) -> EngineResult<()> {
        let dir = self.endpoint_path();
        if !dir.exists() {
            if self.config.auto_create {
                fs_ops::create_dir_all(dir, None)?;
                info!(endpoint = %dir.display(), "created starting directory");
            } else if self.config.starting_directory_must_exist
                || self.config.starting_directory_must_have_access
            {
                return Err(EngineError::StartingDirectoryNotFound {
                    path: dir.to_path_buf(),
                });
            }
        }
        if self.config.starting_directory_must_have_access {
            check_access(dir)?;
        }
        Ok(())
    }

    fn idempotent_key(&self, entry: &CandidateEntry) -> String {
        match &self.config.idempotent_key {
            Some(template) => template.evaluate(&TemplateContext::from_entry(entry)),
            None => entry.absolute_path.to_string_lossy().into_owned(),
        }
    }

    /// Scan, gate and claim candidates. The returned list is sorted and
    /// truncated; every element holds an in-progress key.
    fn select(&self) -> EngineResult<Vec<Selected>> {
        let limit = self.config.max_messages_per_poll;
        let eager = self.config.eager_max_messages_per_poll;
        let mut selected: Vec<Selected> = Vec::new();

        for result in self.scanner.scan() {
            let entry = result?;

            if let Some(done_files) = &self.done_files {
                if done_files.is_done_file(&entry) || !done_files.is_ready(&entry) {
                    continue;
                }
            }

            let idempotent_key = self.idempotent_key(&entry);
            if self.tracker.is_done(&idempotent_key) {
                debug!(path = %entry.absolute_path.display(), key = %idempotent_key, "already processed");
                continue;
            }

            let in_progress = InProgressKey::derive(&entry, self.config.in_progress_key);
            let Some(claim) = self.tracker.claim(in_progress) else {
                continue;
            };
            // A concurrent cycle may have committed the key between the two checks.
            if self.tracker.is_done(&idempotent_key) {
                continue;
            }

            selected.push(Selected {
                entry,
                claim,
                idempotent_key,
            });
            if eager && limit > 0 && selected.len() >= limit {
                debug!(endpoint = %self.endpoint_path().display(), limit, "eager poll limit reached");
                break;
            }
        }

        let sort_by = self.config.sort_by.as_ref();
        selected.sort_by(|a, b| compare_candidates(sort_by, &a.entry, &b.entry));

        if limit > 0 && selected.len() > limit {
            debug!(
                endpoint = %self.endpoint_path().display(),
                limit,
                dropped = selected.len() - limit,
                "limiting poll to maxMessagesPerPoll"
            );
            selected.truncate(limit);
        }
        Ok(selected)
    }

    /// Take read locks and consult the resume strategy.
    fn lock_selected(
        &self,
        selected: Vec<Selected>,
        outcomes: &mut Vec<(PathBuf, TransferOutcome)>,
    ) -> Vec<(Selected, LockToken, u64)> {
        let mut locked = Vec::with_capacity(selected.len());
        for candidate in selected {
            let path = candidate.entry.absolute_path.clone();
            // Skipped candidates drop their claim at the end of the iteration.
            let skip = |reason: SkipReason, outcomes: &mut Vec<(PathBuf, TransferOutcome)>| {
                outcomes.push((path.clone(), TransferOutcome::Skipped(reason)));
            };

            if self.stop.load(Ordering::SeqCst) {
                skip(SkipReason::Stopped, outcomes);
                continue;
            }
            if !path.exists() {
                skip(SkipReason::Vanished, outcomes);
                continue;
            }

            let token = match self.read_lock.acquire(&candidate.entry) {
                Ok(LockAttempt::Acquired(token)) => token,
                Ok(LockAttempt::Denied) => {
                    debug!(path = %path.display(), "read lock denied, retrying next poll");
                    skip(SkipReason::LockDenied, outcomes);
                    continue;
                }
                Err(err) => {
                    let reason = match err {
                        EngineError::ReadLockTimeout { .. } => SkipReason::LockTimeout,
                        _ => SkipReason::LockDenied,
                    };
                    self.report_failure(&err);
                    skip(reason, outcomes);
                    continue;
                }
            };

            // The file may have been committed by another consumer between
            // the scan and the lock.
            if !token.current_path().exists() {
                self.release(token, Release::Rollback);
                skip(SkipReason::Vanished, outcomes);
                continue;
            }

            match self.resume.resume(&candidate.entry) {
                ResumeAction::Skip => {
                    debug!(path = %path.display(), "resume strategy skipped file");
                    self.release(token, Release::Rollback);
                    skip(SkipReason::Resumed, outcomes);
                }
                ResumeAction::Start { offset } => locked.push((candidate, token, offset)),
            }
        }
        locked
    }

    fn release(&self, token: LockToken, mode: Release) {
        let path = token.original_path().to_path_buf();
        if let Err(err) = token.release(mode) {
            warn!(path = %path.display(), error = %err, "failed to release read lock");
        }
    }

    fn report_failure(&self, err: &EngineError) {
        if self.poll_strategy.rollback(self.endpoint_path(), err) == PollControl::Stop {
            self.stop.store(true, Ordering::SeqCst);
        }
    }

    fn process_one(&self, work: Work) -> (PathBuf, TransferOutcome) {
        let Work {
            mut unit,
            token,
            claim,
            idempotent_key,
        } = work;
        let path = unit.entry.absolute_path.clone();

        let outcome = if self.stop.load(Ordering::SeqCst) {
            self.release(token, Release::Rollback);
            TransferOutcome::Skipped(SkipReason::Stopped)
        } else {
            self.run_unit(&mut unit, token, &idempotent_key)
        };

        drop(claim);
        (path, outcome)
    }

    fn run_unit(&self, unit: &mut FileUnit, token: LockToken, idempotent_key: &str) -> TransferOutcome {
        let current = match self.process_strategy.begin(&unit.entry, &token) {
            Ok(current) => current,
            Err(err) => {
                let current = unit.current_path.clone();
                self.fail(unit, &current, token, err);
                return TransferOutcome::RolledBack;
            }
        };
        unit.current_path = current.clone();

        let mut processing = match self.processor.begin_processing(unit) {
            Ok(processing) => processing,
            Err(source) => {
                let err = EngineError::Processing {
                    path: unit.entry.absolute_path.clone(),
                    source,
                };
                self.fail(unit, &current, token, err);
                return TransferOutcome::RolledBack;
            }
        };

        let outcome = match self.read_into(&mut processing, unit) {
            Ok(()) => match self.process_strategy.commit(&unit.entry, &current, token) {
                Ok(()) => {
                    self.tracker.mark_done(idempotent_key);
                    self.resume.completed(&unit.entry);
                    info!(
                        endpoint = %self.endpoint_path().display(),
                        path = %unit.entry.absolute_path.display(),
                        "committed file"
                    );
                    TransferOutcome::Committed
                }
                Err(err) => {
                    self.report_failure(&err);
                    TransferOutcome::RolledBack
                }
            },
            Err(err) => {
                self.fail(unit, &current, token, err);
                TransferOutcome::RolledBack
            }
        };

        self.processor.end_processing(processing, &outcome);
        outcome
    }

    fn read_into(&self, processing: &mut P::Token, unit: &FileUnit) -> EngineResult<()> {
        let path = &unit.current_path;
        let mut file = File::open(path).map_err(|e| EngineError::io("open", path, e))?;
        if unit.offset > 0 {
            file.seek(SeekFrom::Start(unit.offset))
                .map_err(|e| EngineError::io("seek", path, e))?;
        }
        self.processor
            .process(processing, unit, &mut file)
            .map_err(|source| EngineError::Processing {
                path: unit.entry.absolute_path.clone(),
                source,
            })
    }

    fn fail(&self, unit: &FileUnit, current: &Path, token: LockToken, err: EngineError) {
        if let Err(rollback_err) = self.process_strategy.rollback(&unit.entry, current, token) {
            warn!(path = %current.display(), error = %rollback_err, "rollback action failed");
        }
        self.report_failure(&err);
    }

    fn dispatch(&self, work: Vec<Work>) -> Vec<(usize, (PathBuf, TransferOutcome))> {
        let workers = self.config.workers.min(work.len()).max(1);
        if workers == 1 {
            return work
                .into_iter()
                .map(|w| (w.unit.batch_index, self.process_one(w)))
                .collect();
        }

        let (work_tx, work_rx) = crossbeam_channel::unbounded::<Work>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        for item in work {
            // The receiver is alive in this scope.
            let _ = work_tx.send(item);
        }
        drop(work_tx);

        thread::scope(|scope| {
            for _ in 0..workers {
                let work_rx = work_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for item in work_rx {
                        let index = item.unit.batch_index;
                        let _ = result_tx.send((index, self.process_one(item)));
                    }
                });
            }
        });
        drop(result_tx);
        result_rx.iter().collect()
    }
}

impl<P: FileProcessor> PollLifecycle for FileConsumer<P> {
    fn endpoint(&self) -> &Path {
        self.endpoint_path()
    }

    fn start(&self) -> EngineResult<()> {
        self.check_starting_directory()?;
        if self.endpoint_path().is_dir() {
            let cleaned = self.read_lock.prepare_on_startup(&self.scanner)?;
            if cleaned > 0 {
                info!(endpoint = %self.endpoint_path().display(), cleaned, "cleaned up read lock artifacts");
            }
        }
        info!(
            endpoint = %self.endpoint_path().display(),
            read_lock = %self.config.read_lock.kind,
            "consumer started"
        );
        Ok(())
    }

    fn poll(&self) -> EngineResult<PollReport> {
        let mut report = PollReport::default();
        if self.stop.load(Ordering::SeqCst) {
            report.stopped = true;
            return Ok(report);
        }

        match self.poll_strategy.begin(self.endpoint_path()) {
            PollControl::Continue => {}
            PollControl::SkipCycle => return Ok(report),
            PollControl::Stop => {
                self.stop.store(true, Ordering::SeqCst);
                report.stopped = true;
                return Ok(report);
            }
        }

        let locked = {
            let _guard = self
                .selection
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let selected = match self.select() {
                Ok(selected) => selected,
                Err(err) => {
                    self.report_failure(&err);
                    return Err(err);
                }
            };
            self.lock_selected(selected, &mut report.outcomes)
        };

        let mut entries = Vec::with_capacity(locked.len());
        let mut held = Vec::with_capacity(locked.len());
        for (selected, token, offset) in locked {
            entries.push(selected.entry);
            held.push((selected.claim, selected.idempotent_key, token, offset));
        }
        let batch = PollBatch::new(entries);
        let batch_size = batch.len();
        let placements: Vec<(PathBuf, u64)> = held
            .iter()
            .map(|(_, _, token, offset)| (token.current_path().to_path_buf(), *offset))
            .collect();
        let work: Vec<Work> = batch
            .into_units(placements)
            .into_iter()
            .zip(held)
            .map(|(unit, (claim, idempotent_key, token, _))| Work {
                unit,
                token,
                claim,
                idempotent_key,
            })
            .collect();

        if !work.is_empty() {
            debug!(endpoint = %self.endpoint_path().display(), files = batch_size, "processing batch");
        }
        let mut processed = self.dispatch(work);
        processed.sort_by_key(|(index, _)| *index);
        report
            .outcomes
            .extend(processed.into_iter().map(|(_, outcome)| outcome));

        if self.poll_strategy.commit(self.endpoint_path(), &report) == PollControl::Stop {
            self.stop.store(true, Ordering::SeqCst);
        }
        report.stopped = self.stop.load(Ordering::SeqCst);
        Ok(report)
    }

    fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }
}

#[cfg(unix)]
fn check_access(dir: &Path) -> EngineResult<()> {
    use nix::unistd::{access, AccessFlags};

    access(dir, AccessFlags::R_OK | AccessFlags::W_OK).map_err(|errno| {
        EngineError::StartingDirectoryAccess {
            path: dir.to_path_buf(),
            source: io::Error::from(errno),
        }
    })
}

#[cfg(not(unix))]
fn check_access(dir: &Path) -> EngineResult<()> {
    let metadata = std::fs::metadata(dir).map_err(|source| EngineError::StartingDirectoryAccess {
        path: dir.to_path_buf(),
        source,
    })?;
    if metadata.permissions().readonly() {
        return Err(EngineError::StartingDirectoryAccess {
            path: dir.to_path_buf(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "directory is read-only"),
        });
    }
    Ok(())
}
