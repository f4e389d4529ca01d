use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::supervisor::{ProcessSupervisor, SupervisorEvent};
use super::task_registry::TaskRegistry;
use crate::domain::{AppError, DownloadOptions, HistoryEntry, TaskId, TaskOutcome, UNKNOWN_TITLE};
use crate::tool::ToolConfig;
use crate::utils::{default_download_dir, ensure_writable_dir, parse_urls};

/// Where finished downloads are written down. The session only ever appends.
pub trait HistorySink: Send {
    fn record(&mut self, entry: HistoryEntry) -> Result<(), AppError>;

    /// Remembers the folder and options of the batch being started.
    fn remember_choices(
        &mut self,
        _output_dir: &Path,
        _options: &DownloadOptions,
    ) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub total: usize,
    pub finished: usize,
    pub succeeded: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Idle,
    Running(BatchProgress),
    Finished(BatchProgress),
}

pub type BatchStart = Vec<Result<TaskId, AppError>>;

/// Glue between the presentation layer, the supervisor and the history store.
pub struct SessionCoordinator<H> {
    supervisor: ProcessSupervisor,
    history: H,
    batch: BatchProgress,
    // First id handed out for the current batch; older ids belong to a
    // previous batch and no longer count towards the totals.
    batch_floor: Option<TaskId>,
    // Destination of the current batch, for tasks that never got registered.
    batch_dir: Option<PathBuf>,
    terminal: HashSet<TaskId>,
}

impl<H: HistorySink> SessionCoordinator<H> {
    pub fn new(tool: ToolConfig, history: H) -> Self {
        let registry = Arc::new(TaskRegistry::new());
        Self {
            supervisor: ProcessSupervisor::new(tool, registry),
            history,
            batch: BatchProgress::default(),
            batch_floor: None,
            batch_dir: None,
            terminal: HashSet::new(),
        }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut H {
        &mut self.history
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SupervisorEvent> {
        self.supervisor.subscribe()
    }

    /// Validates the input, resets the supervisor and returns the future that
    /// starts every URL concurrently. Nothing is spawned when validation fails.
    pub fn start_batch(
        &mut self,
        input: &str,
        output_dir: &Path,
        options: &DownloadOptions,
    ) -> Result<impl Future<Output = BatchStart> + Send + 'static, AppError> {
        let urls = parse_urls(input)?;
        ensure_writable_dir(output_dir)?;

        if let Err(e) = self.history.remember_choices(output_dir, options) {
            warn!(error = %e, "could not remember download settings");
        }

        self.supervisor.reset();
        self.batch = BatchProgress {
            total: urls.len(),
            ..BatchProgress::default()
        };
        self.batch_floor = Some(self.supervisor.registry().peek_next_id());
        self.batch_dir = Some(output_dir.to_path_buf());
        info!(count = urls.len(), dir = %output_dir.display(), "starting batch");

        let supervisor = self.supervisor.clone();
        let output_dir = output_dir.to_path_buf();
        let options = options.clone();
        Ok(async move {
            join_all(
                urls.iter()
                    .map(|url| supervisor.start_task(url, &output_dir, &options)),
            )
            .await
        })
    }

    /// Folds one supervisor event into the batch counters and records history
    /// once per finished task.
    pub fn observe(&mut self, event: &SupervisorEvent) -> BatchStatus {
        match event {
            SupervisorEvent::Output { .. } => {}
            SupervisorEvent::StartFailed { task_id, reason } => {
                if self.terminal.insert(*task_id) {
                    warn!(%task_id, %reason, "download could not start");
                    self.count_finished(*task_id, false);
                    let path = self.batch_dir.clone().unwrap_or_else(default_download_dir);
                    self.record(*task_id, UNKNOWN_TITLE.to_string(), path, TaskOutcome::Failed);
                }
            }
            SupervisorEvent::Completed {
                task_id,
                success,
                outcome,
                title,
                ..
            } => {
                if self.terminal.insert(*task_id) {
                    self.count_finished(*task_id, *success);
                    let path = self.supervisor.current_download_path(*task_id);
                    self.record(*task_id, title.clone(), path, *outcome);
                }
            }
        }
        self.status()
    }

    fn record(&mut self, task_id: TaskId, title: String, path: PathBuf, status: TaskOutcome) {
        let entry = HistoryEntry {
            title,
            path,
            timestamp: Local::now(),
            status,
        };
        if let Err(e) = self.history.record(entry) {
            warn!(%task_id, error = %e, "failed to record history");
        }
    }

    fn count_finished(&mut self, task_id: TaskId, success: bool) {
        if self.batch_floor.map_or(true, |floor| task_id < floor) {
            return;
        }
        self.batch.finished += 1;
        if success {
            self.batch.succeeded += 1;
        }
    }

    pub fn status(&self) -> BatchStatus {
        if self.batch.total == 0 {
            BatchStatus::Idle
        } else if self.batch.finished >= self.batch.total {
            BatchStatus::Finished(self.batch)
        } else {
            BatchStatus::Running(self.batch)
        }
    }

    pub fn cancel_all(&self) -> usize {
        self.supervisor.cancel_all()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct MemoryHistory {
        entries: Vec<HistoryEntry>,
        remembered: Option<PathBuf>,
    }

    impl HistorySink for MemoryHistory {
        fn record(&mut self, entry: HistoryEntry) -> Result<(), AppError> {
            self.entries.push(entry);
            Ok(())
        }

        fn remember_choices(
            &mut self,
            output_dir: &Path,
            _options: &DownloadOptions,
        ) -> Result<(), AppError> {
            self.remembered = Some(output_dir.to_path_buf());
            Ok(())
        }
    }

    fn fake_tool(dir: &Path, body: &str) -> ToolConfig {
        let path = dir.join("fake-yt-dlp");
        let script = format!(
            "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo 2024.01.01; exit 0; fi\n{body}\n"
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        ToolConfig::new(path)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>) -> SupervisorEvent {
        timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_input_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = SessionCoordinator::new(ToolConfig::default(), MemoryHistory::default());

        let result = session.start_batch("   ", dir.path(), &DownloadOptions::default());
        assert!(matches!(result, Err(AppError::InvalidInput(_))));

        let result = session.start_batch(
            "https://youtube.com/watch?v=X",
            &dir.path().join("missing"),
            &DownloadOptions::default(),
        );
        assert!(matches!(result, Err(AppError::InvalidOutputDir(_))));

        assert_eq!(session.status(), BatchStatus::Idle);
        assert!(session.history().remembered.is_none());
        assert!(session.supervisor().registry().is_empty());
    }

    #[tokio::test]
    async fn test_batch_records_history_once_per_task() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            "echo '[download] Destination: Clip [id].mp4'\nexit 0",
        );
        let mut session = SessionCoordinator::new(tool, MemoryHistory::default());
        let mut rx = session.subscribe();

        let start = session
            .start_batch(
                "https://youtube.com/watch?v=A\nhttps://youtube.com/watch?v=B",
                dir.path(),
                &DownloadOptions::default(),
            )
            .unwrap();
        let started = start.await;
        assert_eq!(started.len(), 2);
        assert!(started.iter().all(Result::is_ok));

        let mut status = session.status();
        let mut completions = Vec::new();
        while !matches!(status, BatchStatus::Finished(_)) {
            let event = next_event(&mut rx).await;
            if event.is_terminal() {
                completions.push(event.clone());
            }
            status = session.observe(&event);
        }

        assert_eq!(
            status,
            BatchStatus::Finished(BatchProgress {
                total: 2,
                finished: 2,
                succeeded: 2
            })
        );
        // Replaying a terminal event must not duplicate history.
        session.observe(&completions[0]);

        let history = &session.history().entries;
        assert_eq!(history.len(), 2);
        for entry in history {
            assert_eq!(entry.title, "Clip");
            assert_eq!(entry.status, TaskOutcome::Completed);
            assert_eq!(entry.path, dir.path());
        }
        assert_eq!(session.history().remembered.as_deref(), Some(dir.path()));
    }

    #[tokio::test]
    async fn test_cancel_records_single_canceled_entry() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(
            dir.path(),
            "echo '[download] Destination: Slow [id].mp4'\nexec sleep 30",
        );
        let mut session = SessionCoordinator::new(tool, MemoryHistory::default());
        let mut rx = session.subscribe();

        let start = session
            .start_batch(
                "https://youtube.com/watch?v=A",
                dir.path(),
                &DownloadOptions::default(),
            )
            .unwrap();
        start.await;

        let first = next_event(&mut rx).await;
        session.observe(&first);
        assert_eq!(session.cancel_all(), 1);

        let terminal = next_event(&mut rx).await;
        let status = session.observe(&terminal);
        assert!(matches!(
            status,
            BatchStatus::Finished(BatchProgress {
                finished: 1,
                succeeded: 0,
                ..
            })
        ));
        assert!(timeout(Duration::from_millis(500), rx.recv()).await.is_err());

        let history = &session.history().entries;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TaskOutcome::Canceled);
        assert_eq!(history[0].title, "Slow");
    }

    #[tokio::test]
    async fn test_start_failure_records_one_failed_entry() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ToolConfig::new(dir.path().join("missing-yt-dlp"));
        let mut session = SessionCoordinator::new(tool, MemoryHistory::default());
        let mut rx = session.subscribe();

        let start = session
            .start_batch(
                "https://youtube.com/watch?v=A",
                dir.path(),
                &DownloadOptions::default(),
            )
            .unwrap();
        let started = start.await;
        assert!(matches!(started[0], Err(AppError::ToolUnavailable(_))));

        let event = next_event(&mut rx).await;
        let status = session.observe(&event);
        assert!(matches!(
            status,
            BatchStatus::Finished(BatchProgress {
                finished: 1,
                succeeded: 0,
                ..
            })
        ));
        // A replayed failure is not written twice.
        session.observe(&event);

        let history = &session.history().entries;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].title, UNKNOWN_TITLE);
        assert_eq!(history[0].status, TaskOutcome::Failed);
        assert_eq!(history[0].path, dir.path());
    }
}
