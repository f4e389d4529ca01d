use std::path::PathBuf;

use futures::StreamExt;
use iced::Task;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::application::{SessionCoordinator, SupervisorEvent};
use crate::domain::{AppError, TaskId};
use crate::storage::ConfigStore;
use crate::tool::ToolConfig;
use crate::ui::{DownloadMessage, DownloadView, HISTORY_ROWS};
use crate::utils::split_urls;

pub struct DownloadApp {
    view: DownloadView,
    session: SessionCoordinator<ConfigStore>,
}

impl DownloadApp {
    pub fn new() -> (Self, Task<Message>) {
        let store = match ConfigStore::load_default() {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "falling back to default settings");
                let path = ConfigStore::default_path().unwrap_or_else(|| PathBuf::from("config.json"));
                ConfigStore::with_defaults(path)
            }
        };

        let mut view = DownloadView {
            output_dir: store.settings().last_download_path.clone(),
            options: store.download_options(),
            ..DownloadView::default()
        };
        view.set_history(&store.recent_history(HISTORY_ROWS));

        let tool = ToolConfig::from_env();
        info!(tool = %tool.display_name(), "session ready");
        let session = SessionCoordinator::new(tool, store);
        let events = supervisor_events(session.subscribe());

        (Self { view, session }, events)
    }

    fn refresh_history(&mut self) {
        let recent = self.session.history().recent_history(HISTORY_ROWS);
        self.view.set_history(&recent);
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    Ui(DownloadMessage),
    Supervisor(SupervisorEvent),
    /// Result of starting every URL of the batch
    BatchLaunched(Vec<Result<TaskId, AppError>>),
    FolderPicked(Option<PathBuf>),
    FormatsAnalyzed(Result<String, AppError>),
}

/// Pumps supervisor events into the update loop for the lifetime of the app.
fn supervisor_events(rx: mpsc::UnboundedReceiver<SupervisorEvent>) -> Task<Message> {
    Task::stream(
        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .map(Message::Supervisor),
    )
}

pub fn update(app: &mut DownloadApp, message: Message) -> Task<Message> {
    match message {
        Message::Ui(ui_msg) => {
            app.view.update(ui_msg.clone());
            return handle_action(app, ui_msg);
        }
        Message::Supervisor(event) => {
            app.view.apply_event(&event);
            let status = app.session.observe(&event);
            app.view.set_batch_status(status);
            if event.is_terminal() {
                app.refresh_history();
            }
        }
        Message::BatchLaunched(results) => {
            let failed = results.iter().filter(|r| r.is_err()).count();
            if failed > 0 {
                warn!(failed, "some downloads could not be started");
            }
        }
        Message::FolderPicked(Some(dir)) => {
            app.view.output_dir = dir;
        }
        Message::FolderPicked(None) => {}
        Message::FormatsAnalyzed(result) => match result {
            Ok(text) => app.view.formats_output = text,
            Err(e) => app.view.status_message = e.to_string(),
        },
    }
    Task::none()
}

fn handle_action(app: &mut DownloadApp, message: DownloadMessage) -> Task<Message> {
    match message {
        DownloadMessage::DownloadPressed => {
            if app.view.is_downloading {
                return Task::none();
            }
            let started =
                app.session
                    .start_batch(&app.view.url_input, &app.view.output_dir, &app.view.options);
            match started {
                Ok(launch) => {
                    app.view.begin_batch();
                    return Task::perform(launch, Message::BatchLaunched);
                }
                Err(e) => app.view.status_message = e.to_string(),
            }
        }
        DownloadMessage::CancelPressed => {
            let canceled = app.session.cancel_all();
            app.view.status_message = format!("Canceled {canceled} download(s)");
        }
        DownloadMessage::BrowsePressed => {
            let start_dir = app.view.output_dir.clone();
            return Task::perform(
                async move {
                    rfd::AsyncFileDialog::new()
                        .set_directory(&start_dir)
                        .pick_folder()
                        .await
                        .map(|handle| handle.path().to_path_buf())
                },
                Message::FolderPicked,
            );
        }
        DownloadMessage::AnalyzePressed => {
            let Some(url) = split_urls(&app.view.url_input).into_iter().next() else {
                app.view.status_message = "Enter a URL to analyze".to_string();
                return Task::none();
            };
            let supervisor = app.session.supervisor().clone();
            let browser = app.view.options.browser.clone();
            app.view.formats_output = format!("Analyzing {url}...");
            return Task::perform(
                async move { supervisor.analyze_formats(&url, &browser).await },
                Message::FormatsAnalyzed,
            );
        }
        DownloadMessage::ClearHistoryPressed => {
            if let Err(e) = app.session.history_mut().clear_history() {
                app.view.status_message = e.to_string();
            }
            app.refresh_history();
        }
        DownloadMessage::UrlChanged(_)
        | DownloadMessage::QualitySelected(_)
        | DownloadMessage::BrowserSelected(_)
        | DownloadMessage::SubtitlesToggled(_)
        | DownloadMessage::PlaylistToggled(_)
        | DownloadMessage::VideoCodeChanged(_)
        | DownloadMessage::AudioCodeChanged(_) => {}
    }
    Task::none()
}

pub fn view(app: &DownloadApp) -> iced::Element<'_, Message> {
    app.view.view().map(Message::Ui)
}
