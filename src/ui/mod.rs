use iced::{
    widget::{button, column, row, scrollable, text, text_input, Column, Space},
    Element, Length,
};
use tokio::sync::mpsc;

use tv_downloads::application::DownloadEvent;
use tv_downloads::domain::{ContentType, DownloadItem, DownloadState};
use tv_downloads::storage::LocalVideo;
use tv_downloads::utils::format_speed;

/// One line of the downloads list
#[derive(Debug, Clone)]
pub struct DownloadRow {
    pub key: String,
    pub title: String,
    pub status: String,
    pub speed_mbps: f64,
    pub state: DownloadState,
}

impl DownloadRow {
    pub fn from_item(item: &DownloadItem, state: DownloadState) -> Self {
        Self {
            key: item.key.clone(),
            title: item.title.clone(),
            status: item.status.clone(),
            speed_mbps: item.speed_mbps,
            state,
        }
    }
}

/// Downloads page. Rebuilt every time the user navigates back to it.
pub struct DownloadsView {
    pub content_type: ContentType,
    pub stream_id: String,
    pub title: String,
    pub extension: String,
    pub status_message: String,
    pub rows: Vec<DownloadRow>,
    /// Listener side of this page's event channel.
    pub events: mpsc::UnboundedSender<DownloadEvent>,
    /// Handed to the runtime once, when the page starts listening.
    pub pending_receiver: Option<mpsc::UnboundedReceiver<DownloadEvent>>,
}

impl DownloadsView {
    pub fn new() -> Self {
        let (events, receiver) = mpsc::unbounded_channel();
        Self {
            content_type: ContentType::Series,
            stream_id: String::new(),
            title: String::new(),
            extension: "mp4".to_string(),
            status_message: "Enter a stream ID to download".to_string(),
            rows: Vec::new(),
            events,
            pending_receiver: Some(receiver),
        }
    }

    pub fn row_mut(&mut self, key: &str) -> Option<&mut DownloadRow> {
        self.rows.iter_mut().rev().find(|row| row.key == key)
    }
}

#[derive(Debug, Clone)]
pub enum DownloadsMessage {
    ContentTypeSelected(ContentType),
    StreamIdChanged(String),
    TitleChanged(String),
    ExtensionChanged(String),
    DownloadPressed,
    CancelPressed(String),
    CleanupPressed,
    LibraryPressed,
}

impl DownloadsView {
    pub fn update(&mut self, message: DownloadsMessage) {
        match message {
            DownloadsMessage::ContentTypeSelected(content_type) => {
                self.content_type = content_type;
            }
            DownloadsMessage::StreamIdChanged(id) => {
                self.stream_id = id;
            }
            DownloadsMessage::TitleChanged(title) => {
                self.title = title;
            }
            DownloadsMessage::ExtensionChanged(extension) => {
                self.extension = extension;
            }
            // Handled by the app
            DownloadsMessage::DownloadPressed
            | DownloadsMessage::CancelPressed(_)
            | DownloadsMessage::CleanupPressed
            | DownloadsMessage::LibraryPressed => {}
        }
    }

    pub fn view(&self) -> Element<'_, DownloadsMessage> {
        let type_label = |content_type: ContentType| {
            if content_type == self.content_type {
                format!("[{}]", content_type)
            } else {
                content_type.to_string()
            }
        };

        let rows = Column::with_children(self.rows.iter().map(|row| {
            let speed = if row.state == DownloadState::Downloading {
                format_speed(row.speed_mbps)
            } else {
                String::new()
            };
            let line = row![
                text(format!("{} ({})", row.title, row.key)).width(Length::Fill),
                text(&row.status).width(Length::Fixed(110.0)),
                text(speed).width(Length::Fixed(100.0)),
            ]
            .spacing(10);

            if row.state.is_active() {
                line.push(button("Cancel").on_press(DownloadsMessage::CancelPressed(row.key.clone())))
                    .into()
            } else {
                line.into()
            }
        }))
        .spacing(6);

        column![
            text("Downloads").size(32),
            Space::new().height(Length::Fixed(20.0)),
            row![
                button(text(type_label(ContentType::Series)))
                    .on_press(DownloadsMessage::ContentTypeSelected(ContentType::Series)),
                button(text(type_label(ContentType::Movie)))
                    .on_press(DownloadsMessage::ContentTypeSelected(ContentType::Movie)),
            ]
            .spacing(10),
            text_input("Stream ID or stream URL...", &self.stream_id)
                .on_input(DownloadsMessage::StreamIdChanged)
                .padding(10),
            text_input("Title...", &self.title)
                .on_input(DownloadsMessage::TitleChanged)
                .padding(10),
            text_input("Container extension...", &self.extension)
                .on_input(DownloadsMessage::ExtensionChanged)
                .padding(10),
            row![
                button("Download")
                    .on_press(DownloadsMessage::DownloadPressed)
                    .padding([10, 20]),
                button("Clean up temp files")
                    .on_press(DownloadsMessage::CleanupPressed)
                    .padding([10, 20]),
                button("Local files")
                    .on_press(DownloadsMessage::LibraryPressed)
                    .padding([10, 20]),
            ]
            .spacing(10),
            text(&self.status_message).size(14),
            Space::new().height(Length::Fixed(10.0)),
            scrollable(rows),
        ]
        .padding(20)
        .spacing(10)
        .into()
    }
}

/// Finished files found on disk.
pub struct LibraryView {
    pub videos: Vec<LocalVideo>,
}

#[derive(Debug, Clone)]
pub enum LibraryMessage {
    BackPressed,
}

impl LibraryView {
    pub fn view(&self) -> Element<'_, LibraryMessage> {
        let files = Column::with_children(self.videos.iter().map(|video| {
            row![
                text(&video.name).width(Length::Fill),
                text(video.display_size()).width(Length::Fixed(100.0)),
            ]
            .spacing(10)
            .into()
        }))
        .spacing(6);

        let empty_hint = if self.videos.is_empty() {
            "No downloaded files yet"
        } else {
            ""
        };

        column![
            text("Local files").size(32),
            button("Back")
                .on_press(LibraryMessage::BackPressed)
                .padding([10, 20]),
            text(empty_hint).size(14),
            scrollable(files),
        ]
        .padding(20)
        .spacing(10)
        .into()
    }
}
