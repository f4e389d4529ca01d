use std::path::PathBuf;

use iced::{
    widget::{button, column, pick_list, progress_bar, row, scrollable, text, text_input, toggler, Column, Space},
    Element, Length,
};

use crate::application::{BatchStatus, SupervisorEvent};
use crate::domain::{DownloadOptions, HistoryEntry, ItemPosition, QualityTier, TaskId, UNKNOWN_TITLE};
use crate::tool::ToolEvent;

pub const HISTORY_ROWS: usize = 10;

const BROWSERS: [&str; 7] = ["safari", "chrome", "firefox", "edge", "brave", "opera", "chromium"];

/// One line of the task list.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: TaskId,
    pub title: String,
    pub item: Option<ItemPosition>,
    pub percent: f32,
    pub status: String,
    pub finished: bool,
}

impl TaskRow {
    fn new(id: TaskId) -> Self {
        Self {
            id,
            title: UNKNOWN_TITLE.to_string(),
            item: None,
            percent: 0.0,
            status: "starting".to_string(),
            finished: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub title: String,
    pub status: String,
    pub when: String,
}

impl From<&HistoryEntry> for HistoryRow {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            title: entry.title.clone(),
            status: entry.status.to_string(),
            when: entry.timestamp.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

/// Main view state
pub struct DownloadView {
    pub url_input: String,
    pub output_dir: PathBuf,
    pub options: DownloadOptions,
    pub status_message: String,
    pub is_downloading: bool,
    pub tasks: Vec<TaskRow>,
    pub formats_output: String,
    pub history: Vec<HistoryRow>,
}

impl Default for DownloadView {
    fn default() -> Self {
        Self {
            url_input: String::new(),
            output_dir: PathBuf::from("."),
            options: DownloadOptions::default(),
            status_message: "Paste one or more video URLs".to_string(),
            is_downloading: false,
            tasks: Vec::new(),
            formats_output: String::new(),
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DownloadMessage {
    UrlChanged(String),
    BrowsePressed,
    QualitySelected(QualityTier),
    BrowserSelected(String),
    SubtitlesToggled(bool),
    PlaylistToggled(bool),
    VideoCodeChanged(String),
    AudioCodeChanged(String),
    DownloadPressed,
    CancelPressed,
    AnalyzePressed,
    ClearHistoryPressed,
}

impl DownloadView {
    pub fn update(&mut self, message: DownloadMessage) {
        match message {
            DownloadMessage::UrlChanged(url) => self.url_input = url,
            DownloadMessage::QualitySelected(quality) => self.options.quality = quality,
            DownloadMessage::BrowserSelected(browser) => self.options.browser = browser,
            DownloadMessage::SubtitlesToggled(on) => self.options.subtitles = on,
            DownloadMessage::PlaylistToggled(on) => self.options.playlist = on,
            DownloadMessage::VideoCodeChanged(code) => self.options.format_codes.video = code,
            DownloadMessage::AudioCodeChanged(code) => self.options.format_codes.audio = code,
            // Actions are handled by the app
            DownloadMessage::BrowsePressed
            | DownloadMessage::DownloadPressed
            | DownloadMessage::CancelPressed
            | DownloadMessage::AnalyzePressed
            | DownloadMessage::ClearHistoryPressed => {}
        }
    }

    pub fn begin_batch(&mut self) {
        self.tasks.clear();
        self.is_downloading = true;
        self.status_message = "Starting downloads...".to_string();
    }

    fn row_mut(&mut self, id: TaskId) -> &mut TaskRow {
        match self.tasks.iter().position(|row| row.id == id) {
            Some(idx) => &mut self.tasks[idx],
            None => {
                self.tasks.push(TaskRow::new(id));
                let last = self.tasks.len() - 1;
                &mut self.tasks[last]
            }
        }
    }

    pub fn apply_event(&mut self, event: &SupervisorEvent) {
        let row = self.row_mut(event.task_id());
        match event {
            SupervisorEvent::Output { event, item, .. } => {
                if item.is_some() {
                    row.item = *item;
                }
                match event {
                    ToolEvent::Progress(p) => {
                        row.percent = p.percent as f32;
                        row.status = format!("{} at {}, ETA {}", p.size, p.speed, p.eta);
                    }
                    ToolEvent::Destination { title } | ToolEvent::AlreadyDownloaded { title } => {
                        row.title = title.clone();
                        row.status = event.to_string();
                    }
                    ToolEvent::PlaylistStarted { name } => {
                        row.title = name.clone();
                        row.status = event.to_string();
                    }
                    ToolEvent::PlaylistItem { .. }
                    | ToolEvent::PlaylistFinished { .. }
                    | ToolEvent::Warning(_) => row.status = event.to_string(),
                    ToolEvent::Message(_) => {}
                }
            }
            SupervisorEvent::Completed {
                success,
                message,
                title,
                ..
            } => {
                row.title = title.clone();
                row.status = message.clone();
                row.finished = true;
                if *success {
                    row.percent = 100.0;
                }
            }
            SupervisorEvent::StartFailed { reason, .. } => {
                row.status = reason.clone();
                row.finished = true;
            }
        }
    }

    pub fn set_batch_status(&mut self, status: BatchStatus) {
        match status {
            BatchStatus::Idle => {}
            BatchStatus::Running(p) => {
                self.status_message = format!("Downloading: {} of {} finished", p.finished, p.total);
            }
            BatchStatus::Finished(p) => {
                self.is_downloading = false;
                self.status_message = format!("Done: {} of {} succeeded", p.succeeded, p.total);
            }
        }
    }

    pub fn set_history<'a>(&mut self, entries: impl IntoIterator<Item = &'a HistoryEntry>) {
        self.history = entries.into_iter().map(HistoryRow::from).collect();
    }

    pub fn view(&self) -> Element<'_, DownloadMessage> {
        let selected_browser = BROWSERS.iter().copied().find(|b| *b == self.options.browser);

        let action = if self.is_downloading {
            button("Cancel").on_press(DownloadMessage::CancelPressed)
        } else {
            button("Download").on_press(DownloadMessage::DownloadPressed)
        };

        let tasks = Column::with_children(self.tasks.iter().map(task_row)).spacing(8);
        let history = Column::with_children(self.history.iter().map(history_row)).spacing(4);

        column![
            text("YT-DLP Desktop").size(28),
            text("Video URLs:").size(16),
            text_input("https://www.youtube.com/watch?v=...", &self.url_input)
                .on_input(DownloadMessage::UrlChanged)
                .on_submit(DownloadMessage::DownloadPressed)
                .padding(10),
            row![
                text(self.output_dir.display().to_string()).size(14).width(Length::Fill),
                button("Choose folder").on_press(DownloadMessage::BrowsePressed),
            ]
            .spacing(10),
            row![
                pick_list(QualityTier::ALL, Some(self.options.quality), DownloadMessage::QualitySelected),
                pick_list(BROWSERS, selected_browser, |b: &'static str| {
                    DownloadMessage::BrowserSelected(b.to_string())
                }),
                toggler(self.options.subtitles)
                    .label("Subtitles")
                    .on_toggle(DownloadMessage::SubtitlesToggled),
                toggler(self.options.playlist)
                    .label("Playlist")
                    .on_toggle(DownloadMessage::PlaylistToggled),
            ]
            .spacing(15),
            row![
                action.padding([10, 20]),
                button("Analyze formats")
                    .on_press(DownloadMessage::AnalyzePressed)
                    .padding([10, 20]),
                text_input("video id", &self.options.format_codes.video)
                    .on_input(DownloadMessage::VideoCodeChanged)
                    .width(Length::Fixed(90.0)),
                text_input("audio id", &self.options.format_codes.audio)
                    .on_input(DownloadMessage::AudioCodeChanged)
                    .width(Length::Fixed(90.0)),
            ]
            .spacing(10),
            text(&self.status_message).size(14),
            scrollable(tasks).height(Length::FillPortion(2)),
            scrollable(text(&self.formats_output).size(12)).height(Length::FillPortion(1)),
            row![
                text("Recent downloads").size(16).width(Length::Fill),
                button("Clear").on_press(DownloadMessage::ClearHistoryPressed),
            ],
            scrollable(history).height(Length::FillPortion(1)),
            Space::new().height(Length::Fixed(10.0)),
        ]
        .padding(20)
        .spacing(10)
        .into()
    }
}

fn task_row(row: &TaskRow) -> Element<'_, DownloadMessage> {
    let heading = match row.item {
        Some(item) => format!("{} ({})", row.title, item),
        None => row.title.clone(),
    };
    column![
        text(heading).size(14),
        progress_bar(0.0..=100.0, row.percent),
        text(&row.status).size(12),
    ]
    .spacing(4)
    .into()
}

fn history_row(row: &HistoryRow) -> Element<'_, DownloadMessage> {
    row![
        text(&row.when).size(12),
        text(&row.title).size(12).width(Length::Fill),
        text(&row.status).size(12),
    ]
    .spacing(10)
    .into()
}
