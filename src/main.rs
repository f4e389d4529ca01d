mod app;
mod application;
mod domain;
mod logging;
mod storage;
mod tool;
mod ui;
mod utils;

use iced::{window, Size};

fn main() -> iced::Result {
    let _log_guard = logging::init();

    iced::application(app::DownloadApp::new, app::update, app::view)
        .title("YT-DLP Desktop")
        .window(window::Settings {
            size: Size::new(860.0, 760.0),
            min_size: Some(Size::new(640.0, 520.0)),
            ..Default::default()
        })
        .run()
}
