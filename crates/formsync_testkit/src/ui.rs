//! Recording UI effect sink.

use async_trait::async_trait;
use formsync_engine::{Dismissal, Download, UiEffectSink};
use formsync_protocol::{Message, ViewDescriptor};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// A UI effect observed by [`RecordingUi`].
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// Dismissible message.
    Info(Message),
    /// Toast.
    Notify(Message),
    /// Blocking error.
    Error(Message),
    /// Confirmation request.
    Confirm(Message),
    /// Inline field marker.
    FieldInvalid(String, String),
    /// View opened.
    OpenView(ViewDescriptor),
    /// View closed.
    CloseView,
    /// Download started.
    Download(Download),
    /// Application reloaded.
    ReloadApp,
    /// Tab reloaded.
    RefreshTab,
}

/// A [`UiEffectSink`] that records every effect and answers confirmations
/// from a script.
///
/// Messages are dismissed immediately. Confirmations pop the scripted
/// answers in order, then fall back to the default answer.
#[derive(Debug)]
pub struct RecordingUi {
    events: Mutex<Vec<UiEvent>>,
    answers: Mutex<VecDeque<bool>>,
    default_answer: AtomicBool,
}

impl RecordingUi {
    /// Creates a sink confirming everything.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            answers: Mutex::new(VecDeque::new()),
            default_answer: AtomicBool::new(true),
        }
    }

    /// Queues the answer of the next confirmation.
    pub fn answer(&self, confirmed: bool) {
        self.answers.lock().push_back(confirmed);
    }

    /// Sets the answer used once the script is exhausted.
    pub fn set_default_answer(&self, confirmed: bool) {
        self.default_answer.store(confirmed, Ordering::SeqCst);
    }

    /// Returns every recorded effect.
    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().clone()
    }

    /// Returns the recorded blocking errors.
    pub fn errors(&self) -> Vec<Message> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                UiEvent::Error(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the recorded downloads.
    pub fn downloads(&self) -> Vec<Download> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                UiEvent::Download(download) => Some(download.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the recorded field markers.
    pub fn invalid_fields(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                UiEvent::FieldInvalid(field, message) => Some((field.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    /// Returns true if an effect equal to `event` was recorded.
    pub fn saw(&self, event: &UiEvent) -> bool {
        self.events.lock().contains(event)
    }

    /// Forgets every recorded effect.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn push(&self, event: UiEvent) {
        self.events.lock().push(event);
    }
}

impl Default for RecordingUi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UiEffectSink for RecordingUi {
    fn show_info(&self, message: &Message) -> Dismissal {
        self.push(UiEvent::Info(message.clone()));
        Box::pin(futures::future::ready(()))
    }

    fn notify(&self, message: &Message) {
        self.push(UiEvent::Notify(message.clone()));
    }

    async fn show_error(&self, message: &Message) {
        self.push(UiEvent::Error(message.clone()));
    }

    async fn show_confirm(&self, message: &Message) -> bool {
        self.push(UiEvent::Confirm(message.clone()));
        let scripted = self.answers.lock().pop_front();
        scripted.unwrap_or_else(|| self.default_answer.load(Ordering::SeqCst))
    }

    fn mark_field_invalid(&self, field: &str, message: &str) {
        self.push(UiEvent::FieldInvalid(field.to_string(), message.to_string()));
    }

    fn open_view(&self, view: &ViewDescriptor) {
        self.push(UiEvent::OpenView(view.clone()));
    }

    fn close_view(&self) {
        self.push(UiEvent::CloseView);
    }

    fn download(&self, download: &Download) {
        self.push(UiEvent::Download(download.clone()));
    }

    fn reload_app(&self) {
        self.push(UiEvent::ReloadApp);
    }

    fn refresh_tab(&self) {
        self.push(UiEvent::RefreshTab);
    }
}
