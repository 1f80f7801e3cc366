//! Application of action response directives.
//!
//! The categories of one [`DirectiveSet`] are applied in a fixed order. Some
//! categories end the set early: a full application reload halts the chain,
//! an error or a declined alert rejects it, and a pending follow-up runs in
//! place of whatever the set still carries.

use crate::effects::{report_url, Download};
use crate::error::{ChainError, ChainResult};
use crate::executor::ActionExecutor;
use formsync_core::Transport;
use formsync_protocol::{DirectiveSet, Map, Message, ViewDescriptor};
use tracing::{debug, warn};

const ATTACHED_PROMPT: &str = "Report attached to current object. Would you like to download?";

/// What the chain does after a directive set was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Go on with the next set, then the next step.
    Continue,
    /// Stop the chain, resolving it.
    Halt,
}

/// Applies the directive sets of one remote action response.
pub struct ResponseInterpreter<'a, T: Transport + ?Sized> {
    executor: &'a ActionExecutor<T>,
    context: &'a Map,
    generation: u64,
}

impl<'a, T: Transport + ?Sized> ResponseInterpreter<'a, T> {
    pub(crate) fn new(executor: &'a ActionExecutor<T>, context: &'a Map, generation: u64) -> Self {
        Self {
            executor,
            context,
            generation,
        }
    }

    /// Applies one directive set.
    pub async fn apply(&self, set: DirectiveSet) -> ChainResult<Flow> {
        let exec = self.executor;
        let ui = exec.ui();
        let config = exec.config();
        debug!(
            kinds = ?set.kinds_with(&config.refresh_app_signal, &config.refresh_tab_signal),
            "applying directive set"
        );

        if let Some(file) = &set.export_file {
            ui.download(&Download::export(file));
        }

        let signal = set.signal.as_deref();
        if signal == Some(config.refresh_app_signal.as_str()) {
            if let Some(info) = &set.info {
                ui.show_info(info).await;
            }
            ui.reload_app();
            return Ok(Flow::Halt);
        }
        if signal == Some(config.refresh_tab_signal.as_str()) {
            exec.schedule_tab_refresh();
        }

        if let Some(info) = &set.info {
            let dismissed = ui.show_info(info);
            if set.pending.is_some() || set.reload {
                dismissed.await;
            }
            if set.pending.is_some() {
                if set.reload {
                    exec.reload().await?;
                }
                return self.run_pending(&set).await;
            }
        }

        if let Some(notify) = &set.notify {
            for message in notify.messages() {
                ui.notify(message);
            }
            if set.pending.is_some() {
                if set.reload {
                    exec.reload().await?;
                }
                return self.run_pending(&set).await;
            }
        }

        if let Some(error) = &set.error {
            let shown = titled(error, "Error");
            ui.show_error(&shown).await;
            if let Some(action) = &error.action {
                self.run_fallback(action).await;
            }
            return Err(ChainError::rejected(error.message.clone()));
        }

        if let Some(alert) = &set.alert {
            let shown = titled(alert, "Warning");
            if ui.show_confirm(&shown).await {
                return self.run_pending(&set).await;
            }
            if let Some(action) = &alert.action {
                self.run_fallback(action).await;
            }
            return Err(ChainError::rejected(alert.message.clone()));
        }

        if let Some(errors) = &set.errors {
            for (field, message) in errors {
                ui.mark_field_invalid(field, message);
            }
            if set.has_field_errors() {
                let fields = errors
                    .iter()
                    .filter(|(_, message)| !message.trim().is_empty())
                    .map(|(field, _)| field.clone())
                    .collect();
                return Err(ChainError::Validation { fields });
            }
        }

        if let Some(values) = &set.values {
            exec.merge_values(values);
        }

        if set.reload {
            exec.reload().await?;
            if self.run_pending(&set).await? == Flow::Halt {
                return Ok(Flow::Halt);
            }
            if let Some(view) = &set.view {
                exec.open_view(view);
            }
            return Ok(Flow::Continue);
        }

        if set.validate || set.save {
            if let Some(edits) = exec.host().after_grid_edit().await {
                exec.merge_values(&edits);
            }
            exec.save_pipeline(set.validate).await?;
            return self.run_pending(&set).await;
        }

        if set.new {
            exec.new_record().await;
            return self.run_pending(&set).await;
        }

        if let Some(signal) = signal
            .filter(|s| *s != config.refresh_app_signal && *s != config.refresh_tab_signal)
        {
            exec.host().on_signal(signal, set.signal_data.as_ref());
        }

        if let Some(attrs) = &set.attrs {
            for (target, attrs) in attrs {
                exec.apply_attrs(target, attrs).await?;
            }
        }

        if set.report {
            if let Some(attached) = &set.attached {
                exec.bump_attachments();
                let prompt = Message::new(ATTACHED_PROMPT).with_title("Download");
                if ui.show_confirm(&prompt).await {
                    ui.download(&Download::attachment(attached.id, &attached.file_name));
                }
                return Ok(Flow::Continue);
            }
            if let Some(link) = &set.report_link {
                let file = set.report_file.as_deref();
                if set.report_format.is_some() && !exec.host().is_mobile() {
                    let view = ViewDescriptor::html(file.unwrap_or(link), report_url(link, file));
                    exec.open_view(&view);
                } else {
                    ui.download(&Download::report(link, file));
                }
            }
        }

        if let Some(view) = &set.view {
            exec.open_view(view);
        }

        if set.close || set.can_close {
            ui.close_view();
        }

        Ok(Flow::Continue)
    }

    async fn run_pending(&self, set: &DirectiveSet) -> ChainResult<Flow> {
        match &set.pending {
            Some(pending) => {
                self.executor
                    .run_nested(pending, self.context, self.generation)
                    .await
            }
            None => Ok(Flow::Continue),
        }
    }

    async fn run_fallback(&self, action: &str) {
        if let Err(err) = self
            .executor
            .run_nested(action, self.context, self.generation)
            .await
        {
            warn!(action, error = %err, "fallback action failed");
        }
    }
}

fn titled(message: &Message, default: &str) -> Message {
    let mut message = message.clone();
    if message.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
        message.title = Some(default.to_string());
    }
    message
}
