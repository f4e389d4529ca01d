use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::task_registry::{lock, RegistryError, Task, TaskRegistry};
use crate::domain::{AppError, DownloadOptions, ItemPosition, TaskId, TaskOutcome, UNKNOWN_TITLE};
use crate::tool::{invocation, parse_line, ToolConfig, ToolEvent};
use crate::utils::default_download_dir;

pub const CANCELED_MESSAGE: &str = "canceled";

#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Output {
        task_id: TaskId,
        event: ToolEvent,
        item: Option<ItemPosition>,
    },
    Completed {
        task_id: TaskId,
        success: bool,
        outcome: TaskOutcome,
        message: String,
        title: String,
    },
    StartFailed {
        task_id: TaskId,
        reason: String,
    },
}

impl SupervisorEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            SupervisorEvent::Output { task_id, .. }
            | SupervisorEvent::Completed { task_id, .. }
            | SupervisorEvent::StartFailed { task_id, .. } => *task_id,
        }
    }

    /// The last event a task will ever produce.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SupervisorEvent::Output { .. })
    }
}

struct LiveProcess {
    kill: oneshot::Sender<()>,
}

struct Inner {
    tool: ToolConfig,
    registry: Arc<TaskRegistry>,
    live: Mutex<HashMap<TaskId, LiveProcess>>,
    // Tasks between id allocation and entering `live`, with their
    // cancel-requested flag.
    starting: Mutex<HashMap<TaskId, bool>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SupervisorEvent>>>,
}

/// Runs one yt-dlp process per task and turns its output into
/// [`SupervisorEvent`]s.
///
/// Lock order is live set, starting set, task, subscribers. Every event of a
/// task is emitted while holding that task's lock, which keeps per-task
/// delivery FIFO and guarantees nothing follows the terminal event.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    pub fn new(tool: ToolConfig, registry: Arc<TaskRegistry>) -> Self {
        Self {
            inner: Arc::new(Inner {
                tool,
                registry,
                live: Mutex::new(HashMap::new()),
                starting: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.inner.registry
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SupervisorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers).push(tx);
        rx
    }

    pub fn live_count(&self) -> usize {
        lock(&self.inner.live).len()
    }

    fn emit(&self, event: SupervisorEvent) {
        lock(&self.inner.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Checks the tool, registers the task and spawns yt-dlp in `output_path`.
    ///
    /// Every failure is also delivered as an event: `StartFailed` when the tool
    /// is unavailable (nothing is registered), `Completed(success = false)`
    /// when the spawn itself fails. A cancel that arrives while the task is
    /// still starting is honored once the task is registered: it finishes as
    /// canceled and any spawned process is killed.
    pub async fn start_task(
        &self,
        url: &str,
        output_path: &Path,
        options: &DownloadOptions,
    ) -> Result<TaskId, AppError> {
        let registry = &self.inner.registry;
        let task_id = registry.allocate_id();
        lock(&self.inner.starting).insert(task_id, false);

        match invocation::check_version(&self.inner.tool).await {
            Ok(version) => debug!(%task_id, %version, "yt-dlp is available"),
            Err(e) => {
                lock(&self.inner.starting).remove(&task_id);
                let err = AppError::ToolUnavailable(e.to_string());
                warn!(%task_id, error = %e, "liveness check failed");
                self.emit(SupervisorEvent::StartFailed {
                    task_id,
                    reason: err.to_string(),
                });
                return Err(err);
            }
        }

        registry.register(Task::new(task_id, url, output_path, options.playlist));
        if self.cancel_if_requested(task_id) {
            return Ok(task_id);
        }

        let args = invocation::build_args(url, options);
        debug!(%task_id, program = %self.inner.tool.display_name(), ?args, "spawning yt-dlp");

        let mut child = match invocation::command(&self.inner.tool, Some(output_path), &args).spawn() {
            Ok(child) => child,
            Err(e) => {
                lock(&self.inner.starting).remove(&task_id);
                let err = AppError::SpawnFailed(e.to_string());
                warn!(%task_id, error = %e, "failed to spawn yt-dlp");
                let _ = registry.update(task_id, |task| {
                    if task.finish(TaskOutcome::Failed) {
                        self.emit(SupervisorEvent::Completed {
                            task_id,
                            success: false,
                            outcome: TaskOutcome::Failed,
                            message: err.to_string(),
                            title: UNKNOWN_TITLE.to_string(),
                        });
                    }
                });
                return Err(err);
            }
        };

        let _ = registry.update(task_id, Task::mark_running);
        let (kill_tx, kill_rx) = oneshot::channel();
        {
            let mut live = lock(&self.inner.live);
            let cancel_requested = lock(&self.inner.starting)
                .remove(&task_id)
                .unwrap_or(false);
            if cancel_requested {
                drop(live);
                self.cancel_registered(task_id);
                terminate(task_id, &mut child);
                return Ok(task_id);
            }
            live.insert(task_id, LiveProcess { kill: kill_tx });
        }

        info!(%task_id, %url, output = %output_path.display(), "download started");
        tokio::spawn(self.clone().drive(task_id, child, kill_rx));
        Ok(task_id)
    }

    async fn drive(self, task_id: TaskId, mut child: Child, mut kill_rx: oneshot::Receiver<()>) {
        let mut stdout = child.stdout.take().map(|s| BufReader::new(s).split(b'\n'));
        let mut stderr = child.stderr.take().map(|s| BufReader::new(s).split(b'\n'));
        let mut killed = false;

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                chunk = next_chunk(&mut stdout) => match chunk {
                    Some(bytes) => self.on_stdout(task_id, &bytes),
                    None => stdout = None,
                },
                chunk = next_chunk(&mut stderr) => match chunk {
                    Some(bytes) => self.on_stderr(task_id, &bytes),
                    None => stderr = None,
                },
                _ = &mut kill_rx, if !killed => {
                    killed = true;
                    terminate(task_id, &mut child);
                    break;
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status,
            _ = &mut kill_rx, if !killed => {
                terminate(task_id, &mut child);
                child.wait().await
            }
        };

        self.on_exit(task_id, status);
    }

    fn on_stdout(&self, task_id: TaskId, bytes: &[u8]) {
        for line in split_lines(bytes) {
            let event = parse_line(&line);
            if let ToolEvent::Warning(text) = &event {
                warn!(%task_id, "{text}");
            }
            let delivered = self.inner.registry.update(task_id, |task| {
                if task.is_terminal() {
                    return false;
                }
                task.observe(&event);
                let item = match event {
                    ToolEvent::Progress(_)
                    | ToolEvent::Destination { .. }
                    | ToolEvent::AlreadyDownloaded { .. }
                    | ToolEvent::PlaylistItem { .. } => task.item_position(),
                    _ => None,
                };
                self.emit(SupervisorEvent::Output {
                    task_id,
                    event,
                    item,
                });
                true
            });
            self.log_undelivered(task_id, delivered);
        }
    }

    fn on_stderr(&self, task_id: TaskId, bytes: &[u8]) {
        for line in split_lines(bytes) {
            let delivered = self.inner.registry.update(task_id, |task| {
                if task.is_terminal() {
                    return false;
                }
                self.emit(SupervisorEvent::Output {
                    task_id,
                    event: ToolEvent::Message(line),
                    item: None,
                });
                true
            });
            self.log_undelivered(task_id, delivered);
        }
    }

    fn log_undelivered(&self, task_id: TaskId, delivered: Result<bool, RegistryError>) {
        match delivered {
            Ok(true) => {}
            Ok(false) => debug!(%task_id, "suppressed output of finished task"),
            Err(RegistryError::UnknownTask(_)) => debug!(%task_id, "ignored output of reset task"),
        }
    }

    fn on_exit(&self, task_id: TaskId, status: std::io::Result<ExitStatus>) {
        lock(&self.inner.live).remove(&task_id);

        let exited_cleanly = matches!(&status, Ok(s) if s.success());
        let reported = self.inner.registry.update(task_id, |task| {
            if task.is_terminal() {
                return None;
            }
            let outcome = classify_exit(task, exited_cleanly);
            task.finish(outcome);
            let event = SupervisorEvent::Completed {
                task_id,
                success: outcome.is_success(),
                outcome,
                message: completion_message(outcome, &status),
                title: task.report_title(),
            };
            self.emit(event);
            Some(outcome)
        });

        match reported {
            Ok(Some(outcome)) => info!(%task_id, ?status, %outcome, "download finished"),
            Ok(None) => debug!(%task_id, ?status, "process exited after task was finished"),
            Err(RegistryError::UnknownTask(_)) => {
                debug!(%task_id, ?status, "process of reset task exited")
            }
        }
    }

    /// Finishes a starting task as canceled if a cancel was requested for it.
    fn cancel_if_requested(&self, task_id: TaskId) -> bool {
        let mut starting = lock(&self.inner.starting);
        if starting.get(&task_id) != Some(&true) {
            return false;
        }
        starting.remove(&task_id);
        drop(starting);
        info!(%task_id, "canceled before the download started");
        self.cancel_registered(task_id);
        true
    }

    /// Marks a registered task canceled and emits its synthetic completion.
    fn cancel_registered(&self, task_id: TaskId) -> bool {
        self.inner
            .registry
            .update(task_id, |task| {
                if !task.cancel() {
                    return false;
                }
                self.emit(SupervisorEvent::Completed {
                    task_id,
                    success: false,
                    outcome: TaskOutcome::Canceled,
                    message: CANCELED_MESSAGE.to_string(),
                    title: task.report_title(),
                });
                true
            })
            .unwrap_or(false)
    }

    /// Cancels every tracked task: mark, report, then kill. Tasks still
    /// starting are flagged and finish as canceled once registered. Returns
    /// how many tasks were canceled.
    pub fn cancel_all(&self) -> usize {
        let mut live = lock(&self.inner.live);
        let mut ids: Vec<TaskId> = live.keys().copied().collect();
        ids.sort();

        let mut canceled = 0;
        for task_id in ids {
            let Some(process) = live.remove(&task_id) else {
                continue;
            };
            if self.cancel_registered(task_id) {
                canceled += 1;
            }
            if process.kill.send(()).is_err() {
                debug!(%task_id, "process already reaped");
            }
        }

        for requested in lock(&self.inner.starting).values_mut() {
            if !*requested {
                *requested = true;
                canceled += 1;
            }
        }
        drop(live);

        if canceled > 0 {
            info!(canceled, "canceled running downloads");
        }
        canceled
    }

    /// Cancels whatever is still running and forgets every task.
    pub fn reset(&self) {
        self.cancel_all();
        let dropped = self.inner.registry.reset();
        debug!(dropped, "task registry reset");
    }

    /// Output of `yt-dlp -F <url>` for display. Not tracked as a task.
    pub async fn analyze_formats(&self, url: &str, browser: &str) -> Result<String, AppError> {
        invocation::list_formats(&self.inner.tool, url, browser)
            .await
            .map(|raw| invocation::clean_format_listing(&raw))
            .map_err(|e| AppError::ToolUnavailable(e.to_string()))
    }

    pub fn current_download_path(&self, task_id: TaskId) -> PathBuf {
        self.inner
            .registry
            .snapshot(task_id)
            .map(|task| task.output_path)
            .unwrap_or_else(|_| default_download_dir())
    }
}

fn classify_exit(task: &Task, exited_cleanly: bool) -> TaskOutcome {
    if task.canceled {
        TaskOutcome::Canceled
    } else if task.is_playlist {
        // Playlists routinely exit non-zero when a single item is unavailable.
        TaskOutcome::Completed
    } else if !exited_cleanly {
        TaskOutcome::Failed
    } else if task.already_existed {
        TaskOutcome::AlreadyExisted
    } else {
        TaskOutcome::Completed
    }
}

fn completion_message(outcome: TaskOutcome, status: &std::io::Result<ExitStatus>) -> String {
    match outcome {
        TaskOutcome::Completed => "download complete".to_string(),
        TaskOutcome::AlreadyExisted => "file already exists".to_string(),
        TaskOutcome::Canceled => CANCELED_MESSAGE.to_string(),
        TaskOutcome::Failed => match status {
            Ok(status) => match status.code() {
                Some(code) => format!("download failed (exit code {code})"),
                None => "download failed (terminated abnormally)".to_string(),
            },
            Err(e) => format!("download failed: {e}"),
        },
    }
}

fn terminate(task_id: TaskId, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(%task_id, error = %e, "kill failed, process already gone");
    }
}

async fn next_chunk<R>(reader: &mut Option<Split<BufReader<R>>>) -> Option<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(segments) => segments.next_segment().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

/// Decodes a chunk lossily and splits carriage-return redraws into lines.
fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .split('\r')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
