use crate::ui::{DownloadRow, DownloadsMessage, DownloadsView, LibraryMessage, LibraryView};
use futures::StreamExt;
use iced::Task;
use std::collections::HashSet;
use tracing::{error, info};
use tv_downloads::api::{extension_from_url, stream_id_from_url};
use tv_downloads::application::{DownloadEvent, Listener};
use tv_downloads::domain::{ContentType, DownloadKey, DownloadState};
use tv_downloads::services::{AppServices, StartOutcome};

pub struct DownloadApp {
    services: AppServices,
    screen: Screen,
    /// Bumped whenever the downloads page is rebuilt; events tagged with an
    /// older value belong to a page that no longer exists.
    generation: u64,
}

enum Screen {
    Downloads(DownloadsView),
    Library(LibraryView),
}

impl DownloadApp {
    pub fn new(services: AppServices) -> Self {
        Self {
            services,
            screen: Screen::Downloads(DownloadsView::new()),
            generation: 0,
        }
    }

    /// Rebuilds the downloads page from the queue's log and re-binds every
    /// job still in flight to the new page.
    fn open_downloads(&mut self) -> Task<Message> {
        self.generation += 1;
        let mut page = DownloadsView::new();
        refresh_rows(&self.services, &mut page);

        let queue = self.services.queue();
        let mut attached = HashSet::new();
        for row in page.rows.iter().filter(|row| queue.registry().is_active(&row.key)) {
            if attached.insert(row.key.clone()) {
                queue.attach_listener(&row.key, Listener::forward_to(&row.key, page.events.clone()));
            }
        }
        if !attached.is_empty() {
            page.status_message = format!("{} download(s) in progress", attached.len());
        }

        let task = listen(&mut page, self.generation);
        self.screen = Screen::Downloads(page);
        task
    }

    fn open_library(&mut self) {
        let videos = self.services.storage().scan_local_videos();
        info!("Found {} local videos", videos.len());
        self.screen = Screen::Library(LibraryView { videos });
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    Downloads(DownloadsMessage),
    Library(LibraryMessage),
    /// Queue notification for the page of the given generation
    Event {
        generation: u64,
        event: DownloadEvent,
    },
}

/// Turns the page's event receiver into a task, once per page.
fn listen(page: &mut DownloadsView, generation: u64) -> Task<Message> {
    match page.pending_receiver.take() {
        Some(receiver) => Task::stream(
            futures::stream::unfold(receiver, |mut receiver| async move {
                receiver.recv().await.map(|event| (event, receiver))
            })
            .map(move |event| Message::Event { generation, event }),
        ),
        None => Task::none(),
    }
}

/// Rows come from the queue's log; state is reconciled against the disk.
fn refresh_rows(services: &AppServices, page: &mut DownloadsView) {
    page.rows = services
        .queue()
        .downloads()
        .iter()
        .map(|item| DownloadRow::from_item(item, services.resolve_item(item)))
        .collect();
}

fn start_download(app: &mut DownloadApp) -> Task<Message> {
    let Screen::Downloads(page) = &mut app.screen else {
        return Task::none();
    };

    // Either a bare id or a full stream URL
    let input = page.stream_id.trim();
    let (stream_id, url_extension) = match input.parse::<u64>() {
        Ok(id) => (id, None),
        Err(_) => match stream_id_from_url(input) {
            Some(id) => (id, Some(extension_from_url(input))),
            None => {
                page.status_message = "Enter a numeric stream ID or a stream URL".to_string();
                return Task::none();
            }
        },
    };
    let key = DownloadKey::new(page.content_type, stream_id);
    let extension = match url_extension {
        Some(ext) => ext,
        None => match page.extension.trim().trim_start_matches('.') {
            "" => "mp4".to_string(),
            ext => ext.to_string(),
        },
    };
    let title = match page.title.trim() {
        "" => key.to_string(),
        title => title.to_string(),
    };

    let listener = Listener::forward_to(key.to_string(), page.events.clone());
    match app.services.start(&title, &key, &extension, listener) {
        Ok(StartOutcome::Queued) => {
            let waiting = app.services.queue().pending_count();
            page.status_message = format!("Queued: {} ({} waiting)", title, waiting);
        }
        Ok(StartOutcome::AlreadyActive) => {
            page.status_message = format!("{} is already downloading", key);
        }
        Ok(StartOutcome::AlreadyCompleted) => {
            page.status_message = format!("{} is already downloaded", key);
        }
        Err(e) => {
            error!("Failed to start {}: {}", key, e);
            page.status_message = format!("Failed to start download: {}", e);
        }
    }

    refresh_rows(&app.services, page);
    listen(page, app.generation)
}

fn handle_event(app: &mut DownloadApp, event: DownloadEvent) {
    let Screen::Downloads(page) = &mut app.screen else {
        return;
    };

    let log = app.services.queue().downloads();
    let (key, state) = match &event {
        DownloadEvent::State { key, state } => (key, Some(*state)),
        DownloadEvent::Progress { key, .. } => (key, None),
    };
    let Some(item) = log.iter().rev().find(|item| &item.key == key) else {
        return;
    };
    let Some(row) = page.row_mut(key) else {
        refresh_rows(&app.services, page);
        return;
    };

    row.status = item.status.clone();
    row.speed_mbps = item.speed_mbps;
    if let Some(state) = state {
        row.state = state;
        match state {
            DownloadState::Completed => {
                page.status_message = format!("Saved: {}", item.local_path.display());
            }
            DownloadState::None if item.status != "Cancelled" => {
                page.status_message = format!("Download failed: {}", item.title);
            }
            _ => {}
        }
    }
}

pub fn update(app: &mut DownloadApp, message: Message) -> Task<Message> {
    match message {
        Message::Downloads(ui_msg) => {
            if let Screen::Downloads(page) = &mut app.screen {
                page.update(ui_msg.clone());
            }

            match ui_msg {
                DownloadsMessage::DownloadPressed => return start_download(app),
                DownloadsMessage::CancelPressed(key) => {
                    if !app.services.queue().cancel_download(&key) {
                        if let Screen::Downloads(page) = &mut app.screen {
                            page.status_message = format!("{} is not downloading", key);
                        }
                    }
                }
                DownloadsMessage::CleanupPressed => {
                    let mut removed = 0;
                    for content_type in [ContentType::Movie, ContentType::Series] {
                        match app.services.cleanup_part_files(content_type) {
                            Ok(count) => removed += count,
                            Err(e) => error!("Cleanup of {} failed: {}", content_type, e),
                        }
                    }
                    if let Screen::Downloads(page) = &mut app.screen {
                        page.status_message = format!("Removed {} temp file(s)", removed);
                    }
                }
                DownloadsMessage::LibraryPressed => app.open_library(),
                _ => {}
            }
        }
        Message::Library(LibraryMessage::BackPressed) => return app.open_downloads(),
        Message::Event { generation, event } => {
            if generation == app.generation {
                handle_event(app, event);
            }
        }
    }
    Task::none()
}

pub fn view(app: &DownloadApp) -> iced::Element<'_, Message> {
    match &app.screen {
        Screen::Downloads(page) => page.view().map(Message::Downloads),
        Screen::Library(page) => page.view().map(Message::Library),
    }
}
