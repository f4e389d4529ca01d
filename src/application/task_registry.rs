use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::domain::{ItemPosition, TaskId, TaskOutcome, TaskPhase, UNKNOWN_TITLE};
use crate::tool::ToolEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The id was never registered or was dropped by `reset`. Callers treat
    /// this as "ignored": it is how late output of a reset session surfaces.
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
}

/// Per-download state. Mutated only through [`TaskRegistry::update`].
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub url: String,
    pub output_path: PathBuf,
    pub is_playlist: bool,
    pub title: String,
    pub playlist_name: String,
    pub current_item: u32,
    pub total_items: Option<u32>,
    pub canceled: bool,
    /// Set by "already downloaded" and cleared by a fresh destination.
    pub already_existed: bool,
    phase: TaskPhase,
    // An item line arrived since the last "already downloaded" line.
    item_announced: bool,
}

impl Task {
    pub fn new(id: TaskId, url: &str, output_path: &Path, is_playlist: bool) -> Self {
        Self {
            id,
            url: url.to_string(),
            output_path: output_path.to_path_buf(),
            is_playlist,
            title: UNKNOWN_TITLE.to_string(),
            playlist_name: String::new(),
            current_item: 0,
            total_items: None,
            canceled: false,
            already_existed: false,
            phase: TaskPhase::Created,
            item_announced: false,
        }
    }

    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// `Created -> Running`. Any other starting phase is left alone.
    pub fn mark_running(&mut self) -> bool {
        if self.phase != TaskPhase::Created {
            return false;
        }
        self.phase = TaskPhase::Running;
        true
    }

    /// Moves into a terminal phase. Returns false if the task already was in one.
    pub fn finish(&mut self, outcome: TaskOutcome) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.phase = TaskPhase::Finished(outcome);
        true
    }

    /// Sets the cancellation flag and finishes the task as canceled.
    pub fn cancel(&mut self) -> bool {
        if self.canceled || self.is_terminal() {
            return false;
        }
        self.canceled = true;
        self.finish(TaskOutcome::Canceled)
    }

    /// Only real titles are stored; the placeholder never overwrites one.
    pub fn set_title(&mut self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        if candidate.is_empty() || candidate == UNKNOWN_TITLE || candidate == self.title {
            return false;
        }
        self.title = candidate.to_string();
        true
    }

    /// Folds one parsed output line into the task.
    pub fn observe(&mut self, event: &ToolEvent) {
        match event {
            ToolEvent::PlaylistStarted { name } => {
                self.is_playlist = true;
                if !name.is_empty() {
                    self.playlist_name = name.clone();
                }
            }
            ToolEvent::PlaylistFinished { name } => {
                self.is_playlist = true;
                if self.playlist_name.is_empty() && !name.is_empty() {
                    self.playlist_name = name.clone();
                }
            }
            ToolEvent::PlaylistItem { index, total } => {
                self.is_playlist = true;
                self.total_items = Some(*total);
                self.current_item = (*index).min(*total);
                self.item_announced = true;
            }
            ToolEvent::Destination { title } => {
                self.set_title(title);
                self.already_existed = false;
            }
            ToolEvent::AlreadyDownloaded { title } => {
                self.set_title(title);
                self.already_existed = true;
                if self.is_playlist && !self.item_announced {
                    self.advance_item();
                }
                self.item_announced = false;
            }
            ToolEvent::Progress(_) | ToolEvent::Warning(_) | ToolEvent::Message(_) => {}
        }
    }

    fn advance_item(&mut self) {
        let next = self.current_item.saturating_add(1);
        self.current_item = match self.total_items {
            Some(total) => next.min(total),
            None => next,
        };
    }

    pub fn item_position(&self) -> Option<ItemPosition> {
        if !self.is_playlist || self.current_item == 0 {
            return None;
        }
        Some(ItemPosition {
            current: self.current_item,
            total: self.total_items,
        })
    }

    /// Title for the completion report: the playlist name (with its size when
    /// known) for playlists, the discovered title otherwise.
    pub fn report_title(&self) -> String {
        if self.is_playlist && !self.playlist_name.is_empty() {
            return match self.total_items {
                Some(total) => format!("{} ({} items)", self.playlist_name, total),
                None => self.playlist_name.clone(),
            };
        }
        self.title.clone()
    }
}

/// Owns every task of the session. The map lock is only held for lookups;
/// mutation happens under the task's own lock so different tasks never
/// contend with each other.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskId, Arc<Mutex<Task>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the next id. Ids keep increasing across `reset`.
    pub fn allocate_id(&self) -> TaskId {
        TaskId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// The id `allocate_id` will return next.
    pub fn peek_next_id(&self) -> TaskId {
        TaskId::new(self.next_id.load(Ordering::Relaxed) + 1)
    }

    pub fn register(&self, task: Task) -> TaskId {
        let id = task.id;
        lock(&self.tasks).insert(id, Arc::new(Mutex::new(task)));
        id
    }

    pub fn snapshot(&self, id: TaskId) -> Result<Task, RegistryError> {
        self.update(id, |task| task.clone())
    }

    /// Runs `f` with exclusive access to one task.
    pub fn update<R>(&self, id: TaskId, f: impl FnOnce(&mut Task) -> R) -> Result<R, RegistryError> {
        let entry = lock(&self.tasks)
            .get(&id)
            .cloned()
            .ok_or(RegistryError::UnknownTask(id))?;
        let mut task = lock(&entry);
        Ok(f(&mut *task))
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every task. Returns how many were dropped.
    pub fn reset(&self) -> usize {
        let mut tasks = lock(&self.tasks);
        let dropped = tasks.len();
        tasks.clear();
        dropped
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::parse_line;

    fn create(registry: &TaskRegistry, url: &str) -> TaskId {
        let id = registry.allocate_id();
        registry.register(Task::new(id, url, Path::new("/tmp"), false))
    }

    fn playlist_task() -> Task {
        Task::new(TaskId::new(1), "https://youtube.com/playlist?list=L", Path::new("/tmp"), true)
    }

    #[test]
    fn test_ids_are_monotonic_across_reset() {
        let registry = TaskRegistry::new();
        let first = create(&registry, "https://a");
        let second = create(&registry, "https://b");
        assert!(second > first);

        assert_eq!(registry.reset(), 2);
        assert!(registry.is_empty());

        let third = create(&registry, "https://c");
        assert!(third > second);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot(third).unwrap().url, "https://c");
    }

    #[test]
    fn test_update_unknown_task_is_reported() {
        let registry = TaskRegistry::new();
        let id = create(&registry, "https://a");
        registry.reset();

        let result = registry.update(id, |task| task.set_title("late"));
        assert_eq!(result, Err(RegistryError::UnknownTask(id)));
    }

    #[test]
    fn test_terminal_task_never_runs_again() {
        let mut task = playlist_task();
        assert!(task.mark_running());
        assert!(task.finish(TaskOutcome::Completed));
        assert!(!task.mark_running());
        assert!(!task.finish(TaskOutcome::Failed));
        assert!(!task.cancel());
        assert_eq!(task.phase(), TaskPhase::Finished(TaskOutcome::Completed));
    }

    #[test]
    fn test_cancel_sets_flag_once() {
        let mut task = playlist_task();
        task.mark_running();
        assert!(task.cancel());
        assert!(task.canceled);
        assert!(!task.cancel());
        assert_eq!(task.phase(), TaskPhase::Finished(TaskOutcome::Canceled));
    }

    #[test]
    fn test_title_never_regresses_to_placeholder() {
        let mut task = playlist_task();
        assert!(task.set_title("MyVideo"));
        assert!(!task.set_title(UNKNOWN_TITLE));
        assert!(!task.set_title("MyVideo"));
        assert!(!task.set_title("  "));
        assert_eq!(task.title, "MyVideo");
    }

    #[test]
    fn test_playlist_lines_update_counters() {
        let mut task = Task::new(TaskId::new(1), "https://x", Path::new("/tmp"), false);
        task.observe(&parse_line("[download] Downloading playlist: MyList"));
        task.observe(&parse_line("[download] Downloading item 2 of 5"));

        assert!(task.is_playlist);
        assert_eq!(task.playlist_name, "MyList");
        assert_eq!(task.current_item, 2);
        assert_eq!(task.total_items, Some(5));
        assert_eq!(task.report_title(), "MyList (5 items)");
    }

    #[test]
    fn test_already_downloaded_advances_without_item_line() {
        let mut task = playlist_task();
        let mut seen = Vec::new();
        for line in [
            "[download] a.mp4 has already been downloaded",
            "[download] b.mp4 has already been downloaded",
            "[download] Downloading item 3 of 4",
            "[download] c.mp4 has already been downloaded",
            "[download] d.mp4 has already been downloaded",
            "[download] e.mp4 has already been downloaded",
        ] {
            task.observe(&parse_line(line));
            seen.push(task.current_item);
        }

        assert_eq!(seen, vec![1, 2, 3, 3, 4, 4]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(task.current_item <= task.total_items.unwrap());
    }

    #[test]
    fn test_item_position_only_for_playlists() {
        let mut single = Task::new(TaskId::new(1), "https://x", Path::new("/tmp"), false);
        single.observe(&parse_line("[download] Destination: clip.mp4"));
        assert_eq!(single.item_position(), None);

        let mut list = playlist_task();
        list.observe(&parse_line("[download] Downloading item 1 of 3"));
        assert_eq!(
            list.item_position(),
            Some(ItemPosition {
                current: 1,
                total: Some(3)
            })
        );
    }

    #[test]
    fn test_report_title_falls_back_to_placeholder() {
        let task = Task::new(TaskId::new(1), "https://x", Path::new("/tmp"), false);
        assert_eq!(task.report_title(), UNKNOWN_TITLE);
    }
}
