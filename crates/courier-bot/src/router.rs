//! Webhook router: classification, authorization, dispatch.
//!
//! [`WebhookHandler::handle_webhook`] runs the synchronous routing decision
//! and returns a small acknowledgement; everything slow (oracle calls,
//! searches, transport sends) runs in spawned background tasks whose errors
//! are logged, never propagated.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::chat_context::ChatContextStore;
use crate::chat_prompt::{build_chat_messages, coerce_plain_text_reply};
use crate::config::{GroupReplyMode, Settings};
use crate::dedupe::DedupeCache;
use crate::followup::{ContextFragment, build_followup_template_prompt};
use crate::ingest::parse_incoming_webhook;
use crate::message::{IncomingMessage, Target, Transport, dedupe_key, metadata_mentions_bot, strip_mention_spans};
use crate::oracle::{ChatOracle, ImageOracle};
use crate::search_client::SearchMode;
use crate::search_service::SearchService;
use crate::transport::MessengerClient;
use crate::weather::{WeatherApi, format_current, format_forecast};

const CHAT_MAX_REPLY_CHARS: usize = 2000;
const IMAGINE_COMMAND: &str = "/imagine";

const SEARCH_COMMANDS: &[(&str, SearchMode)] = &[
    ("/search", SearchMode::Search),
    ("/news", SearchMode::News),
    ("/wiki", SearchMode::Wiki),
    ("/images", SearchMode::Images),
    ("/videos", SearchMode::Videos),
    ("/jmail", SearchMode::Jmail),
    ("/lc_cyraxx", SearchMode::LolcowCyraxx),
    ("/lc_larson", SearchMode::LolcowLarson),
];

static NUMERIC_SELECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("static regex"));
static SOURCE_REQUEST_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^(?:source|sources|link|links)\s*(?:for|to)?\s*(.*)$")
            .expect("static regex"),
        Regex::new(r"(?i)^where did you get (?:that|this|it|those|these)?\s*(.*)$")
            .expect("static regex"),
        Regex::new(r"(?i)^what(?:'s| is) the source(?: for)?\s*(.*)$").expect("static regex"),
    ]
});

// ---------------------------------------------------------------------------
// Acknowledgement
// ---------------------------------------------------------------------------

/// The JSON body returned to the webhook caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgement {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Acknowledgement {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            reason: None,
        }
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        Self {
            status: "ignored",
            reason: Some(reason.into()),
        }
    }

    pub fn accepted(reason: impl Into<String>) -> Self {
        Self {
            status: "accepted",
            reason: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Root of the orchestration object graph.
pub struct WebhookHandler {
    pub settings: Arc<Settings>,
    pub signal_client: Option<Arc<dyn MessengerClient>>,
    pub whatsapp_client: Option<Arc<dyn MessengerClient>>,
    pub telegram_client: Option<Arc<dyn MessengerClient>>,
    pub chat_oracle: Arc<dyn ChatOracle>,
    pub image_oracle: Option<Arc<dyn ImageOracle>>,
    pub chat_context: Arc<ChatContextStore>,
    pub dedupe: Arc<DedupeCache>,
    pub weather_client: Option<Arc<dyn WeatherApi>>,
    pub search_service: Option<Arc<SearchService>>,
}

impl WebhookHandler {
    /// Route one inbound webhook body.  Returns within one control-flow
    /// decision; all sending happens in background tasks.
    pub async fn handle_webhook(
        self: &Arc<Self>,
        payload: &Value,
        transport_hint: Option<Transport>,
        telegram_secret: Option<&str>,
    ) -> Acknowledgement {
        if transport_hint == Some(Transport::Telegram) {
            if !self.settings.telegram_enabled || self.telegram_client.is_none() {
                return Acknowledgement::ignored("telegram_disabled");
            }
            if !is_valid_telegram_secret(
                telegram_secret,
                self.settings.telegram_webhook_secret.as_deref(),
            ) {
                return Acknowledgement::ignored("invalid_telegram_secret");
            }
        }

        let Some(parsed) = parse_incoming_webhook(
            payload,
            transport_hint,
            self.settings.telegram_bot_username.as_deref(),
        ) else {
            info!(top_level_keys = payload.as_object().map_or(0, |m| m.len()), "unsupported webhook event");
            return Acknowledgement::ignored("unsupported_event");
        };

        match parsed.transport {
            Transport::WhatsApp if !self.settings.whatsapp_enabled || self.whatsapp_client.is_none() => {
                return Acknowledgement::ignored("whatsapp_disabled");
            }
            Transport::Signal if !self.settings.signal_enabled || self.signal_client.is_none() => {
                return Acknowledgement::ignored("signal_disabled");
            }
            Transport::Telegram if !self.settings.telegram_enabled || self.telegram_client.is_none() => {
                return Acknowledgement::ignored("telegram_disabled");
            }
            _ => {}
        }

        if !is_authorized_message(&parsed, &self.settings) {
            info!(
                sender = %parsed.sender,
                group_id = parsed.target.group_id.as_deref().unwrap_or("-"),
                "ignoring unauthorized sender"
            );
            return Acknowledgement::ignored("unauthorized");
        }

        if !self.dedupe.mark_once(&dedupe_key(&parsed)) {
            return Acknowledgement::ignored("duplicate");
        }

        let command_text = normalize_chat_prompt(&parsed, &self.settings);

        // /source — raw text first, then the alias-stripped form.
        if let Some(claim) =
            parse_source_command(&parsed.text).or_else(|| parse_source_command(&command_text))
        {
            self.clear_all_pending_state(&parsed);
            return self.handle_source_command(parsed, claim);
        }

        // Typed search commands.
        if let Some((mode, query)) =
            parse_search_command(&parsed.text).or_else(|| parse_search_command(&command_text))
        {
            self.clear_all_pending_state(&parsed);
            return self.handle_search_command(parsed, mode, query);
        }

        // /imagine.
        if let Some(prompt) =
            parse_imagine_prompt(&parsed.text).or_else(|| parse_imagine_prompt(&command_text))
        {
            self.clear_all_pending_state(&parsed);
            return self.handle_imagine_command(parsed, prompt);
        }

        // Numeric selection against a pending list (jmail wins over video).
        let selection = parse_numeric_selection(&parsed.text).or_else(|| {
            if command_text != parsed.text {
                parse_numeric_selection(&command_text)
            } else {
                None
            }
        });
        if let Some(selection_number) = selection
            && self.settings.search_enabled
            && let Some(search_service) = &self.search_service
        {
            let conversation_key = parsed.conversation_key();
            if search_service
                .get_pending_jmail_selection_state(&conversation_key)
                .is_some()
            {
                let handler = Arc::clone(self);
                tokio::spawn(async move {
                    handler
                        .process_search_jmail_selection(parsed, selection_number)
                        .await;
                });
                return Acknowledgement::accepted("search_jmail_selection_queued");
            }
            if search_service
                .get_pending_video_selection_state(&conversation_key)
                .is_some()
            {
                let handler = Arc::clone(self);
                tokio::spawn(async move {
                    handler
                        .process_search_video_selection(parsed, selection_number)
                        .await;
                });
                return Acknowledgement::accepted("search_video_selection_queued");
            }
        }

        if !should_handle_chat_mention(&parsed, &self.settings) {
            return Acknowledgement::ignored("non_mention");
        }

        // Weather commands.
        if let Some(ack) = self.try_handle_weather(&parsed, &command_text) {
            return ack;
        }

        let chat_prompt = command_text;
        if chat_prompt.is_empty() {
            let usage = chat_usage_message(&parsed);
            self.spawn_safe_send_text(&parsed, usage);
            return Acknowledgement::accepted("chat_usage_sent");
        }

        if chat_prompt.chars().count() > self.settings.max_prompt_chars {
            self.spawn_safe_send_text(
                &parsed,
                format!(
                    "Prompt too long. Maximum is {} characters.",
                    self.settings.max_prompt_chars
                ),
            );
            return Acknowledgement::accepted("prompt_too_long");
        }

        // Free-text source requests ("where did you get that?").
        if let Some(claim) = parse_source_request_text(&chat_prompt) {
            return self.handle_source_command(parsed, claim);
        }

        // Follow-up resolution and auto-search, in context mode only.
        if let Some(search_service) = self.search_service.clone()
            && search_service.auto_search_active()
        {
            return self
                .handle_context_mode(parsed, chat_prompt, search_service)
                .await;
        }

        let handler = Arc::clone(self);
        tokio::spawn(async move {
            handler.handle_chat_mention(parsed, chat_prompt).await;
        });
        Acknowledgement::accepted("chat_queued")
    }

    // -----------------------------------------------------------------------
    // Context-mode routing (follow-ups + auto-search)
    // -----------------------------------------------------------------------

    async fn handle_context_mode(
        self: &Arc<Self>,
        parsed: IncomingMessage,
        chat_prompt: String,
        search_service: Arc<SearchService>,
    ) -> Acknowledgement {
        let conversation_key = parsed.conversation_key();
        let history_context = followup_history_context(&self.chat_context, &conversation_key);
        let source_context = search_service.recent_source_context(&conversation_key, 6);
        let pending_state = search_service.get_pending_followup_state(&conversation_key);

        let mut resolved_prompt = chat_prompt.clone();
        let mut summary_user_request = chat_prompt.clone();

        if let Some(pending) = pending_state {
            if is_pending_followup_reply_candidate(&chat_prompt) {
                let resolution = search_service
                    .resolve_pending_followup_reply(
                        &chat_prompt,
                        &pending,
                        &history_context,
                        &source_context,
                    )
                    .await;
                if resolution.needs_clarification {
                    let attempts =
                        search_service.bump_pending_followup_attempt(&conversation_key);
                    self.log_followup(
                        "followup_pending_retry",
                        &resolution.reason,
                        resolution.confidence,
                    );
                    if attempts >= 1 {
                        search_service.clear_pending_followup_state(&conversation_key);
                        self.spawn_safe_send_text(
                            &parsed,
                            "Please restate your full question, for example: \
                             who is god in islam?"
                                .to_owned(),
                        );
                        return Acknowledgement::accepted("search_followup_rephrase_requested");
                    }

                    let clarification = resolution
                        .clarification_text
                        .unwrap_or_else(|| "Who are you referring to?".to_owned());
                    self.spawn_safe_send_text(&parsed, clarification);
                    return Acknowledgement::accepted("search_followup_clarification");
                }

                search_service.clear_pending_followup_state(&conversation_key);
                resolved_prompt = if resolution.resolved_prompt.is_empty() {
                    chat_prompt.clone()
                } else {
                    resolution.resolved_prompt.clone()
                };
                summary_user_request = resolved_prompt.clone();
                self.log_followup(
                    "followup_pending_applied",
                    &resolution.reason,
                    resolution.confidence,
                );
            } else {
                // A full new prompt displaces the pending question and is
                // processed as-is.
                search_service.clear_pending_followup_state(&conversation_key);
                self.log_followup("followup_pending_cleared", "non_candidate_new_prompt", 0.0);
            }
        } else {
            let resolution = search_service
                .resolve_followup_prompt(&chat_prompt, &history_context, &source_context)
                .await;
            self.log_followup(
                "followup_resolution_detected",
                &resolution.reason,
                resolution.confidence,
            );
            if resolution.needs_clarification {
                return self.emit_followup_clarification(
                    &parsed,
                    &search_service,
                    &conversation_key,
                    &chat_prompt,
                    resolution.clarification_text,
                    &resolution.reason,
                );
            }
            if !resolution.resolved_prompt.is_empty() {
                resolved_prompt = resolution.resolved_prompt;
                summary_user_request = resolved_prompt.clone();
            }
        }

        let decision = search_service.decide_auto_search(&resolved_prompt).await;
        if decision.should_search && is_search_mode_enabled(decision.mode, &self.settings) {
            search_service.clear_pending_followup_state(&conversation_key);
            search_service.clear_pending_video_selection_state(&conversation_key);
            search_service.clear_pending_jmail_selection_state(&conversation_key);

            if decision.mode == SearchMode::Images {
                let handler = Arc::clone(self);
                let query = decision.query;
                tokio::spawn(async move {
                    handler.process_search_image(parsed, query).await;
                });
                return Acknowledgement::accepted("search_image_queued");
            }

            let handler = Arc::clone(self);
            let mode = decision.mode;
            let query = decision.query;
            tokio::spawn(async move {
                handler
                    .process_search_summary(parsed, mode, query, Some(summary_user_request))
                    .await;
            });
            return Acknowledgement::accepted("search_queued");
        }

        let handler = Arc::clone(self);
        tokio::spawn(async move {
            handler.handle_chat_mention(parsed, resolved_prompt).await;
        });
        Acknowledgement::accepted("chat_queued")
    }

    fn emit_followup_clarification(
        self: &Arc<Self>,
        parsed: &IncomingMessage,
        search_service: &Arc<SearchService>,
        conversation_key: &str,
        chat_prompt: &str,
        clarification_text: Option<String>,
        reason: &str,
    ) -> Acknowledgement {
        let template_prompt = build_followup_template_prompt(chat_prompt);
        search_service.set_pending_followup_state(
            conversation_key,
            chat_prompt,
            &template_prompt,
            reason,
        );
        self.log_followup("followup_pending_set", reason, 0.0);
        let clarification =
            clarification_text.unwrap_or_else(|| "Who are you referring to?".to_owned());
        self.spawn_safe_send_text(parsed, clarification);
        Acknowledgement::accepted("search_followup_clarification")
    }

    // -----------------------------------------------------------------------
    // Command acknowledgement paths
    // -----------------------------------------------------------------------

    fn handle_search_command(
        self: &Arc<Self>,
        message: IncomingMessage,
        mode: SearchMode,
        query: String,
    ) -> Acknowledgement {
        if !self.settings.search_enabled || self.search_service.is_none() {
            self.spawn_safe_send_text(&message, "Search is disabled on this bot.".to_owned());
            return Acknowledgement::accepted("search_disabled");
        }

        if !is_search_mode_enabled(mode, &self.settings) {
            self.spawn_safe_send_text(&message, format!("/{mode} is disabled on this bot."));
            return Acknowledgement::accepted("search_mode_disabled");
        }

        if query.is_empty() {
            self.spawn_safe_send_text(&message, format!("Usage: /{mode} <query>"));
            return Acknowledgement::accepted("search_usage_sent");
        }

        if query.chars().count() > self.settings.max_prompt_chars {
            self.spawn_safe_send_text(
                &message,
                format!(
                    "Prompt too long. Maximum is {} characters.",
                    self.settings.max_prompt_chars
                ),
            );
            return Acknowledgement::accepted("search_prompt_too_long");
        }

        let handler = Arc::clone(self);
        match mode {
            SearchMode::Images => {
                tokio::spawn(async move {
                    handler.process_search_image(message, query).await;
                });
                Acknowledgement::accepted("search_image_queued")
            }
            SearchMode::Videos => {
                tokio::spawn(async move {
                    handler.process_search_videos_list(message, query).await;
                });
                Acknowledgement::accepted("search_videos_queued")
            }
            SearchMode::Jmail => {
                tokio::spawn(async move {
                    handler.process_search_jmail_list(message, query).await;
                });
                Acknowledgement::accepted("search_jmail_queued")
            }
            _ => {
                tokio::spawn(async move {
                    handler.process_search_summary(message, mode, query, None).await;
                });
                Acknowledgement::accepted("search_queued")
            }
        }
    }

    fn handle_source_command(self: &Arc<Self>, message: IncomingMessage, claim: String) -> Acknowledgement {
        if !self.settings.search_enabled || self.search_service.is_none() {
            self.spawn_safe_send_text(&message, "Search is disabled on this bot.".to_owned());
            return Acknowledgement::accepted("search_disabled");
        }

        let handler = Arc::clone(self);
        tokio::spawn(async move {
            handler.process_source_lookup(message, claim).await;
        });
        Acknowledgement::accepted("source_queued")
    }

    fn handle_imagine_command(self: &Arc<Self>, message: IncomingMessage, prompt: String) -> Acknowledgement {
        if prompt.is_empty() {
            self.spawn_safe_send_text(&message, "Usage: /imagine <prompt>".to_owned());
            return Acknowledgement::accepted("usage_sent");
        }

        if prompt.chars().count() > self.settings.max_prompt_chars {
            self.spawn_safe_send_text(
                &message,
                format!(
                    "Prompt too long. Maximum is {} characters.",
                    self.settings.max_prompt_chars
                ),
            );
            return Acknowledgement::accepted("prompt_too_long");
        }

        if self.image_oracle.is_none() || self.settings.openrouter_image_model.is_none() {
            self.spawn_safe_send_text(
                &message,
                "Image mode is not configured on this bot.".to_owned(),
            );
            return Acknowledgement::accepted("image_unavailable");
        }

        let handler = Arc::clone(self);
        tokio::spawn(async move {
            handler.process_imagine(message, prompt).await;
        });
        Acknowledgement::accepted("queued")
    }

    fn try_handle_weather(self: &Arc<Self>, parsed: &IncomingMessage, command_text: &str) -> Option<Acknowledgement> {
        for (command, forecast) in [("/weather", false), ("/forecast", true)] {
            let location = if command_text == command {
                Some(String::new())
            } else {
                command_text
                    .strip_prefix(&format!("{command} "))
                    .map(|rest| rest.trim().to_owned())
            };
            let Some(mut location) = location else {
                continue;
            };

            if location.is_empty()
                && let Some(default_location) = &self.settings.weather_default_location
            {
                location = default_location.clone();
            }
            if location.is_empty() {
                self.spawn_safe_send_text(parsed, format!("Usage: {command} <location>"));
                return Some(Acknowledgement::accepted(if forecast {
                    "forecast_usage_sent"
                } else {
                    "weather_usage_sent"
                }));
            }
            if self.weather_client.is_none() {
                self.spawn_safe_send_text(
                    parsed,
                    "Weather is not configured on this bot.".to_owned(),
                );
                return Some(Acknowledgement::accepted("weather_disabled"));
            }

            let handler = Arc::clone(self);
            let message = parsed.clone();
            tokio::spawn(async move {
                handler.process_weather(message, location, forecast).await;
            });
            return Some(Acknowledgement::accepted(if forecast {
                "forecast_queued"
            } else {
                "weather_queued"
            }));
        }
        None
    }

    // -----------------------------------------------------------------------
    // Background task bodies
    // -----------------------------------------------------------------------

    async fn handle_chat_mention(self: &Arc<Self>, message: IncomingMessage, prompt: String) {
        let reply_target = resolve_reply_target(&message, &self.settings);
        let fallback_recipient = fallback_recipient_for(&message, &reply_target);
        let conversation_key = message.conversation_key();
        let history = self.chat_context.get_history(&conversation_key);
        let chat_messages =
            build_chat_messages(&self.settings.chat_system_prompt, &history, &prompt);

        let reply = match self.chat_oracle.generate_reply(&chat_messages).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(
                    sender = %message.sender,
                    group_id = message.target.group_id.as_deref().unwrap_or("-"),
                    error = %err,
                    "chat generation failed"
                );
                self.safe_send_text(&message, &err.user_message, &reply_target)
                    .await;
                return;
            }
        };

        let mut reply = if self.settings.chat_force_plain_text {
            coerce_plain_text_reply(&reply)
        } else {
            reply
        };
        if reply.is_empty() {
            reply = "I could not generate a usable plain-text reply. Try again.".to_owned();
        }
        let normalized_reply = truncate_reply(&reply);

        match self
            .send_text(
                message.transport,
                &reply_target,
                &normalized_reply,
                fallback_recipient.as_deref(),
            )
            .await
        {
            Ok(()) => {
                // History only records turns that were actually delivered.
                self.chat_context
                    .append_turn(&conversation_key, &prompt, &normalized_reply);
            }
            Err(err) => {
                error!(
                    sender = %message.sender,
                    group_id = message.target.group_id.as_deref().unwrap_or("-"),
                    error = %err,
                    "chat reply send failed"
                );
            }
        }
    }

    async fn process_imagine(self: &Arc<Self>, message: IncomingMessage, prompt: String) {
        let reply_target = resolve_reply_target(&message, &self.settings);
        self.safe_send_text(&message, "Generating image, please wait...", &reply_target)
            .await;

        let (Some(image_oracle), Some(model)) = (
            self.image_oracle.clone(),
            self.settings.openrouter_image_model.clone(),
        ) else {
            self.safe_send_text(
                &message,
                "Image mode is not configured on this bot.",
                &reply_target,
            )
            .await;
            return;
        };

        match image_oracle.generate_images(&prompt, &model).await {
            Ok(images) => {
                for (index, (image_bytes, content_type)) in images.iter().enumerate() {
                    let caption = if index == 0 {
                        Some(truncate_caption(&format!("{IMAGINE_COMMAND} {prompt}")))
                    } else {
                        None
                    };
                    if let Err(err) = self
                        .send_image(
                            message.transport,
                            &reply_target,
                            image_bytes,
                            content_type,
                            caption.as_deref(),
                        )
                        .await
                    {
                        error!(sender = %message.sender, error = %err, "image send failed");
                        return;
                    }
                }
            }
            Err(err) => {
                warn!(sender = %message.sender, error = %err, "image generation failed");
                self.safe_send_text(&message, &err.user_message, &reply_target)
                    .await;
            }
        }
    }

    async fn process_search_summary(
        self: &Arc<Self>,
        message: IncomingMessage,
        mode: SearchMode,
        query: String,
        user_request: Option<String>,
    ) {
        let Some(search_service) = self.search_service.clone() else {
            return;
        };
        let reply_target = resolve_reply_target(&message, &self.settings);
        let fallback_recipient = fallback_recipient_for(&message, &reply_target);
        let conversation_key = message.conversation_key();
        let history_context = summary_history_context(
            &self.chat_context,
            &conversation_key,
            self.settings.search_use_history_for_summary,
        );

        let summary = match search_service
            .summarize_search(
                &conversation_key,
                mode,
                &query,
                user_request.as_deref(),
                history_context.as_deref(),
            )
            .await
        {
            Ok(summary) => summary,
            Err(err) => {
                self.safe_send_text(&message, &err.user_message, &reply_target)
                    .await;
                return;
            }
        };

        let summary = if self.settings.chat_force_plain_text {
            coerce_plain_text_reply(&summary)
        } else {
            summary
        };
        let summary = truncate_reply(&summary);

        match self
            .send_text(
                message.transport,
                &reply_target,
                &summary,
                fallback_recipient.as_deref(),
            )
            .await
        {
            Ok(()) => {
                self.chat_context.append_turn(
                    &conversation_key,
                    user_request.as_deref().unwrap_or(&query),
                    &summary,
                );
            }
            Err(err) => {
                error!(sender = %message.sender, error = %err, "search summary send failed");
            }
        }
    }

    async fn process_search_image(self: &Arc<Self>, message: IncomingMessage, query: String) {
        let Some(search_service) = self.search_service.clone() else {
            return;
        };
        let reply_target = resolve_reply_target(&message, &self.settings);
        let conversation_key = message.conversation_key();

        match search_service.search_image(&conversation_key, &query).await {
            Ok((image_bytes, content_type)) => {
                let caption = truncate_caption(&format!("/images {query}"));
                if let Err(err) = self
                    .send_image(
                        message.transport,
                        &reply_target,
                        &image_bytes,
                        &content_type,
                        Some(&caption),
                    )
                    .await
                {
                    error!(sender = %message.sender, error = %err, "search image send failed");
                }
            }
            Err(err) => {
                self.safe_send_text(&message, &err.user_message, &reply_target)
                    .await;
            }
        }
    }

    async fn process_search_videos_list(self: &Arc<Self>, message: IncomingMessage, query: String) {
        let Some(search_service) = self.search_service.clone() else {
            return;
        };
        let reply_target = resolve_reply_target(&message, &self.settings);
        let conversation_key = message.conversation_key();

        match search_service.video_list_reply(&conversation_key, &query).await {
            Ok(text) => {
                if let Err(err) = self
                    .send_text(message.transport, &reply_target, &truncate_reply(&text), None)
                    .await
                {
                    error!(sender = %message.sender, error = %err, "video list send failed");
                }
            }
            Err(err) => {
                self.safe_send_text(&message, &err.user_message, &reply_target)
                    .await;
            }
        }
    }

    async fn process_search_jmail_list(self: &Arc<Self>, message: IncomingMessage, query: String) {
        let Some(search_service) = self.search_service.clone() else {
            return;
        };
        let reply_target = resolve_reply_target(&message, &self.settings);
        let conversation_key = message.conversation_key();

        match search_service.jmail_list_reply(&conversation_key, &query).await {
            Ok(text) => {
                if let Err(err) = self
                    .send_text(message.transport, &reply_target, &truncate_reply(&text), None)
                    .await
                {
                    error!(sender = %message.sender, error = %err, "jmail list send failed");
                }
            }
            Err(err) => {
                self.safe_send_text(&message, &err.user_message, &reply_target)
                    .await;
            }
        }
    }

    async fn process_search_video_selection(
        self: &Arc<Self>,
        message: IncomingMessage,
        selection_number: usize,
    ) {
        let Some(search_service) = self.search_service.clone() else {
            return;
        };
        let reply_target = resolve_reply_target(&message, &self.settings);
        let fallback_recipient = fallback_recipient_for(&message, &reply_target);
        let conversation_key = message.conversation_key();

        match search_service
            .resolve_video_selection(&conversation_key, selection_number)
            .await
        {
            Ok((thumbnail, url, title)) => {
                search_service.clear_pending_video_selection_state(&conversation_key);
                let video_text = truncate_reply(&format!("{title}\n{url}"));
                if let Some((image_bytes, content_type)) = thumbnail {
                    if let Err(err) = self
                        .send_image(
                            message.transport,
                            &reply_target,
                            &image_bytes,
                            &content_type,
                            Some(&truncate_caption(&video_text)),
                        )
                        .await
                    {
                        error!(sender = %message.sender, error = %err, "video selection send failed");
                    }
                    return;
                }

                if let Err(err) = self
                    .send_text(
                        message.transport,
                        &reply_target,
                        &video_text,
                        fallback_recipient.as_deref(),
                    )
                    .await
                {
                    error!(sender = %message.sender, error = %err, "video selection send failed");
                }
            }
            Err(err) => {
                self.safe_send_text(&message, &err.user_message, &reply_target)
                    .await;
            }
        }
    }

    async fn process_search_jmail_selection(
        self: &Arc<Self>,
        message: IncomingMessage,
        selection_number: usize,
    ) {
        let Some(search_service) = self.search_service.clone() else {
            return;
        };
        let reply_target = resolve_reply_target(&message, &self.settings);
        let conversation_key = message.conversation_key();
        let history_context = summary_history_context(
            &self.chat_context,
            &conversation_key,
            self.settings.search_use_history_for_summary,
        );

        match search_service
            .resolve_jmail_selection(&conversation_key, selection_number, history_context.as_deref())
            .await
        {
            Ok(summary) => {
                search_service.clear_pending_jmail_selection_state(&conversation_key);
                if let Err(err) = self
                    .send_text(message.transport, &reply_target, &truncate_reply(&summary), None)
                    .await
                {
                    error!(sender = %message.sender, error = %err, "jmail selection send failed");
                }
            }
            Err(err) => {
                self.safe_send_text(&message, &err.user_message, &reply_target)
                    .await;
            }
        }
    }

    async fn process_source_lookup(self: &Arc<Self>, message: IncomingMessage, claim: String) {
        let Some(search_service) = self.search_service.clone() else {
            return;
        };
        let reply_target = resolve_reply_target(&message, &self.settings);
        let conversation_key = message.conversation_key();

        let text = search_service.source_reply(&conversation_key, &claim);
        if let Err(err) = self
            .send_text(message.transport, &reply_target, &text, None)
            .await
        {
            error!(sender = %message.sender, error = %err, "source reply send failed");
        }
    }

    async fn process_weather(self: &Arc<Self>, message: IncomingMessage, location: String, forecast: bool) {
        let reply_target = resolve_reply_target(&message, &self.settings);
        let Some(weather_client) = self.weather_client.clone() else {
            return;
        };
        let imperial = self.settings.weather_units_imperial;

        let reply = if forecast {
            match weather_client.forecast(&location).await {
                Ok(data) => format_forecast(&data, imperial),
                Err(err) => format!("Unable to retrieve forecast: {}", err.user_message),
            }
        } else {
            match weather_client.current(&location).await {
                Ok(data) => format_current(&data, imperial),
                Err(err) => format!("Unable to retrieve weather: {}", err.user_message),
            }
        };

        self.safe_send_text(&message, &reply, &reply_target).await;
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    fn transport_client(&self, transport: Transport) -> Option<Arc<dyn MessengerClient>> {
        match transport {
            Transport::Signal => self.signal_client.clone(),
            Transport::WhatsApp => self.whatsapp_client.clone(),
            Transport::Telegram => self.telegram_client.clone(),
        }
    }

    async fn send_text(
        &self,
        transport: Transport,
        target: &Target,
        message: &str,
        fallback_recipient: Option<&str>,
    ) -> Result<(), crate::transport::SendError> {
        let client = self.transport_client(transport).ok_or(
            crate::transport::SendError::NotConfigured {
                transport: transport.as_str(),
            },
        )?;
        client.send_text(target, message, fallback_recipient).await
    }

    async fn send_image(
        &self,
        transport: Transport,
        target: &Target,
        image_bytes: &[u8],
        content_type: &str,
        caption: Option<&str>,
    ) -> Result<(), crate::transport::SendError> {
        let client = self.transport_client(transport).ok_or(
            crate::transport::SendError::NotConfigured {
                transport: transport.as_str(),
            },
        )?;
        client
            .send_image(target, image_bytes, content_type, caption, None)
            .await
    }

    /// Send a text reply, logging (never propagating) transport failures.
    async fn safe_send_text(&self, message: &IncomingMessage, text: &str, reply_target: &Target) {
        if let Err(err) = self
            .send_text(message.transport, reply_target, text, None)
            .await
        {
            error!(
                sender = %message.sender,
                group_id = message.target.group_id.as_deref().unwrap_or("-"),
                error = %err,
                "send failed"
            );
        }
    }

    fn spawn_safe_send_text(self: &Arc<Self>, message: &IncomingMessage, text: String) {
        let handler = Arc::clone(self);
        let message = message.clone();
        tokio::spawn(async move {
            let reply_target = resolve_reply_target(&message, &handler.settings);
            handler.safe_send_text(&message, &text, &reply_target).await;
        });
    }

    fn clear_all_pending_state(&self, message: &IncomingMessage) {
        let Some(search_service) = &self.search_service else {
            return;
        };
        let conversation_key = message.conversation_key();
        search_service.clear_pending_followup_state(&conversation_key);
        search_service.clear_pending_video_selection_state(&conversation_key);
        search_service.clear_pending_jmail_selection_state(&conversation_key);
    }

    fn log_followup(&self, event: &str, reason: &str, confidence: f64) {
        if !self.settings.search_debug_logging {
            return;
        }
        info!(
            event,
            reason,
            confidence_bucket = confidence_bucket(confidence),
            "followup resolution"
        );
    }
}

// ---------------------------------------------------------------------------
// Classification helpers
// ---------------------------------------------------------------------------

pub fn parse_imagine_prompt(text: &str) -> Option<String> {
    let stripped = text.trim();
    if stripped == IMAGINE_COMMAND {
        return Some(String::new());
    }
    stripped
        .strip_prefix(&format!("{IMAGINE_COMMAND} "))
        .map(|tail| tail.trim().to_owned())
}

pub fn parse_search_command(text: &str) -> Option<(SearchMode, String)> {
    let stripped = text.trim();
    for (command, mode) in SEARCH_COMMANDS {
        if stripped == *command {
            return Some((*mode, String::new()));
        }
        if let Some(tail) = stripped.strip_prefix(&format!("{command} ")) {
            return Some((*mode, tail.trim().to_owned()));
        }
    }
    None
}

pub fn parse_source_command(text: &str) -> Option<String> {
    let stripped = text.trim();
    if stripped == "/source" {
        return Some(String::new());
    }
    stripped
        .strip_prefix("/source ")
        .map(|tail| tail.trim().to_owned())
}

/// Free-text source requests like "where did you get that?".
pub fn parse_source_request_text(text: &str) -> Option<String> {
    let stripped = text.trim();
    if stripped.is_empty() {
        return None;
    }
    for pattern in SOURCE_REQUEST_RES.iter() {
        if let Some(captures) = pattern.captures(stripped) {
            let claim = captures
                .get(1)
                .map(|m| m.as_str())
                .unwrap_or("")
                .trim_matches(|ch: char| " ?.!,:;".contains(ch))
                .to_owned();
            return Some(claim);
        }
    }
    None
}

pub fn parse_numeric_selection(text: &str) -> Option<usize> {
    let stripped = text.trim();
    if !NUMERIC_SELECTION_RE.is_match(stripped) {
        return None;
    }
    let value: usize = stripped.parse().ok()?;
    if value == 0 { None } else { Some(value) }
}

/// True when the bot is the intended addressee.
pub fn should_handle_chat_mention(message: &IncomingMessage, settings: &Settings) -> bool {
    if message.target.group_id.is_none() {
        return true;
    }

    if message.transport == Transport::Telegram {
        return message.directed_to_bot;
    }

    if message.transport == Transport::Signal
        && metadata_mentions_bot(
            message,
            &settings.signal_sender_number,
            settings.signal_sender_uuid.as_deref(),
        )
    {
        return true;
    }

    text_contains_alias(&message.text, &settings.mention_aliases)
}

/// Strip mention spans and aliases, collapse whitespace, and trim leading
/// punctuation to produce the chat prompt.
pub fn normalize_chat_prompt(message: &IncomingMessage, settings: &Settings) -> String {
    let mut text = message.text.clone();

    if message.transport == Transport::Signal
        && settings.signal_enabled
        && metadata_mentions_bot(
            message,
            &settings.signal_sender_number,
            settings.signal_sender_uuid.as_deref(),
        )
    {
        text = strip_mention_spans(&text, &message.mentions);
    }

    if message.transport == Transport::Telegram
        && let Some(bot_username) = &settings.telegram_bot_username
    {
        text = strip_aliases(&text, &[format!("@{bot_username}")]);
    }

    text = strip_aliases(&text, &settings.mention_aliases);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_start_matches([' ', ',', ':', ';', '-'])
        .to_owned()
}

pub fn text_contains_alias(text: &str, aliases: &[impl AsRef<str>]) -> bool {
    aliases
        .iter()
        .any(|alias| alias_pattern(alias.as_ref()).is_match(text))
}

pub fn strip_aliases(text: &str, aliases: &[impl AsRef<str>]) -> String {
    let mut cleaned = text.to_owned();
    for alias in aliases {
        let pattern = alias_pattern(alias.as_ref());
        // The boundary chars are re-inserted by the replacement, so repeated
        // aliases need repeated passes until the text stabilizes.
        loop {
            let replaced = pattern.replace_all(&cleaned, "$pre $post").into_owned();
            if replaced == cleaned {
                break;
            }
            cleaned = replaced;
        }
    }
    cleaned
}

fn alias_pattern(alias: &str) -> Regex {
    let escaped = regex::escape(alias);
    Regex::new(&format!(
        r"(?i)(?P<pre>^|\s){escaped}(?P<post>$|\s|[,:;.!?])"
    ))
    .expect("alias pattern")
}

pub fn is_authorized_message(message: &IncomingMessage, settings: &Settings) -> bool {
    match message.transport {
        Transport::Telegram => {
            if settings.telegram_disable_auth {
                return true;
            }
            if settings.telegram_allowed_user_ids.contains(&message.sender) {
                return true;
            }
            message
                .target
                .group_id
                .as_ref()
                .is_some_and(|group_id| settings.telegram_allowed_chat_ids.contains(group_id))
        }
        Transport::WhatsApp => {
            settings.whatsapp_disable_auth
                || settings.whatsapp_allowed_numbers.contains(&message.sender)
        }
        Transport::Signal => {
            if settings.signal_disable_auth {
                return true;
            }
            if settings.signal_allowed_numbers.contains(&message.sender) {
                return true;
            }
            message
                .target
                .group_id
                .as_ref()
                .is_some_and(|group_id| settings.signal_allowed_group_ids.contains(group_id))
        }
    }
}

pub fn resolve_reply_target(message: &IncomingMessage, settings: &Settings) -> Target {
    if settings.group_reply_mode == GroupReplyMode::DmFallback && message.target.group_id.is_some()
    {
        return Target::direct(message.sender.clone());
    }
    message.target.clone()
}

fn fallback_recipient_for(message: &IncomingMessage, reply_target: &Target) -> Option<String> {
    if reply_target.group_id.is_some() {
        Some(message.sender.clone())
    } else {
        None
    }
}

pub fn is_search_mode_enabled(mode: SearchMode, settings: &Settings) -> bool {
    match mode {
        SearchMode::Search => settings.search_mode_search_enabled,
        SearchMode::News => settings.search_mode_news_enabled,
        SearchMode::Wiki => settings.search_mode_wiki_enabled,
        SearchMode::Images => settings.search_mode_images_enabled,
        SearchMode::Videos => settings.search_mode_videos_enabled,
        SearchMode::Jmail => settings.search_mode_jmail_enabled,
        SearchMode::LolcowCyraxx => settings.search_mode_lolcow_cyraxx_enabled,
        SearchMode::LolcowLarson => settings.search_mode_lolcow_larson_enabled,
    }
}

pub fn is_pending_followup_reply_candidate(text: &str) -> bool {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() || normalized.starts_with('/') {
        return false;
    }
    if normalized.chars().count() > 80 {
        return false;
    }
    normalized.split(' ').count() <= 6
}

fn followup_history_context(
    chat_context: &ChatContextStore,
    conversation_key: &str,
) -> Vec<ContextFragment> {
    let history = chat_context.get_history(conversation_key);
    history
        .iter()
        .rev()
        .take(4)
        .rev()
        .filter(|turn| !turn.content.trim().is_empty())
        .map(|turn| ContextFragment {
            label: turn.role.to_owned(),
            title: String::new(),
            content: turn.content.clone(),
        })
        .collect()
}

fn summary_history_context(
    chat_context: &ChatContextStore,
    conversation_key: &str,
    enabled: bool,
) -> Option<Vec<ContextFragment>> {
    if !enabled {
        return None;
    }
    Some(followup_history_context(chat_context, conversation_key))
}

fn chat_usage_message(message: &IncomingMessage) -> String {
    if message.target.group_id.is_none() {
        "Send a prompt, for example: summarize today's discussion.".to_owned()
    } else {
        "Tag me with a prompt, for example: @bot summarize today's discussion.".to_owned()
    }
}

fn truncate_reply(text: &str) -> String {
    if text.chars().count() <= CHAT_MAX_REPLY_CHARS {
        return text.to_owned();
    }
    let truncated: String = text.chars().take(CHAT_MAX_REPLY_CHARS).collect();
    format!("{}...", truncated.trim_end())
}

fn truncate_caption(text: &str) -> String {
    text.chars().take(200).collect()
}

fn confidence_bucket(confidence: f64) -> &'static str {
    if confidence >= 0.9 {
        "high"
    } else if confidence >= 0.7 {
        "medium"
    } else {
        "low"
    }
}

pub fn is_valid_telegram_secret(provided: Option<&str>, expected: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) if expected.is_empty() => true,
        Some(expected) => provided == Some(expected),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str, group: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            sender: "+15550002222".into(),
            text: text.into(),
            timestamp: 1,
            target: match group {
                Some(group_id) => Target::group("+15550002222", group_id),
                None => Target::direct("+15550002222"),
            },
            transport: Transport::Signal,
            mentions: Vec::new(),
            directed_to_bot: false,
        }
    }

    #[test]
    fn imagine_prompts_parse() {
        assert_eq!(parse_imagine_prompt("/imagine a cat").as_deref(), Some("a cat"));
        assert_eq!(parse_imagine_prompt("/imagine").as_deref(), Some(""));
        assert_eq!(parse_imagine_prompt("  /imagine  spaced  ").as_deref(), Some("spaced"));
        assert_eq!(parse_imagine_prompt("/imagined"), None);
        assert_eq!(parse_imagine_prompt("draw me"), None);
    }

    #[test]
    fn search_commands_parse_with_modes() {
        assert_eq!(
            parse_search_command("/search latest openrouter news"),
            Some((SearchMode::Search, "latest openrouter news".into()))
        );
        assert_eq!(parse_search_command("/news"), Some((SearchMode::News, String::new())));
        assert_eq!(
            parse_search_command("/lc_larson court"),
            Some((SearchMode::LolcowLarson, "court".into()))
        );
        assert_eq!(parse_search_command("/searching x"), None);
    }

    #[test]
    fn source_commands_parse() {
        assert_eq!(parse_source_command("/source").as_deref(), Some(""));
        assert_eq!(parse_source_command("/source the claim").as_deref(), Some("the claim"));
        assert_eq!(parse_source_command("/sources"), None);
    }

    #[test]
    fn source_request_text_matches_patterns() {
        assert_eq!(
            parse_source_request_text("source for the rust claim?").as_deref(),
            Some("the rust claim")
        );
        assert_eq!(
            parse_source_request_text("where did you get that").as_deref(),
            Some("")
        );
        assert_eq!(
            parse_source_request_text("What is the source for dark matter?").as_deref(),
            Some("dark matter")
        );
        assert_eq!(parse_source_request_text("tell me a joke"), None);
    }

    #[test]
    fn numeric_selection_rules() {
        assert_eq!(parse_numeric_selection("1"), Some(1));
        assert_eq!(parse_numeric_selection(" 42 "), Some(42));
        assert_eq!(parse_numeric_selection("0"), None);
        assert_eq!(parse_numeric_selection("-3"), None);
        assert_eq!(parse_numeric_selection("3.5"), None);
        assert_eq!(parse_numeric_selection("three"), None);
    }

    #[test]
    fn alias_detection_respects_boundaries() {
        let aliases = ["@bot".to_owned()];
        assert!(text_contains_alias("@bot hello", &aliases));
        assert!(text_contains_alias("hey @bot, hello", &aliases));
        assert!(text_contains_alias("ping @BOT!", &aliases));
        assert!(!text_contains_alias("email me@botmail.com", &aliases));
        assert!(!text_contains_alias("robots are fun", &aliases));
    }

    #[test]
    fn alias_stripping_removes_all_occurrences() {
        let aliases = ["@bot".to_owned()];
        assert_eq!(
            strip_aliases("@bot hello @bot world", &aliases)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" "),
            "hello world"
        );
    }

    #[test]
    fn prompt_normalization_strips_aliases_and_punctuation() {
        let settings = Settings::default();
        let msg = message("@bot : what is up", None);
        assert_eq!(normalize_chat_prompt(&msg, &settings), "what is up");
    }

    #[test]
    fn prompt_normalization_strips_signal_mention_spans() {
        let mut settings = Settings::default();
        settings.signal_sender_number = "+15550009999".into();
        let mut msg = message("@courier what is up", None);
        msg.mentions = vec![crate::message::MentionSpan {
            start: 0,
            length: 8,
            number: Some("+15550009999".into()),
            uuid: None,
        }];
        assert_eq!(normalize_chat_prompt(&msg, &settings), "what is up");
    }

    #[test]
    fn dms_are_always_mention_eligible() {
        let settings = Settings::default();
        assert!(should_handle_chat_mention(&message("anything", None), &settings));
    }

    #[test]
    fn group_messages_need_alias_or_mention() {
        let settings = Settings::default();
        assert!(!should_handle_chat_mention(
            &message("just chatting", Some("g")),
            &settings
        ));
        assert!(should_handle_chat_mention(
            &message("@bot summarize", Some("g")),
            &settings
        ));
    }

    #[test]
    fn telegram_groups_use_directed_flag() {
        let settings = Settings::default();
        let mut msg = message("@bot hi", Some("g"));
        msg.transport = Transport::Telegram;
        msg.directed_to_bot = false;
        assert!(!should_handle_chat_mention(&msg, &settings));
        msg.directed_to_bot = true;
        assert!(should_handle_chat_mention(&msg, &settings));
    }

    #[test]
    fn authorization_covers_allowlists_and_groups() {
        let mut settings = Settings::default();
        settings.signal_allowed_numbers.insert("+15550002222".into());
        assert!(is_authorized_message(&message("x", None), &settings));

        let mut other = message("x", None);
        other.sender = "+19990000000".into();
        assert!(!is_authorized_message(&other, &settings));

        // Group allowlist admits unknown senders in that group.
        settings.signal_allowed_group_ids.insert("group-1".into());
        let mut group_msg = message("x", Some("group-1"));
        group_msg.sender = "+19990000000".into();
        assert!(is_authorized_message(&group_msg, &settings));

        settings.signal_disable_auth = true;
        assert!(is_authorized_message(&other, &settings));
    }

    #[test]
    fn reply_target_honors_dm_fallback_mode() {
        let mut settings = Settings::default();
        let group_msg = message("x", Some("group-1"));
        assert_eq!(
            resolve_reply_target(&group_msg, &settings).group_id.as_deref(),
            Some("group-1")
        );

        settings.group_reply_mode = GroupReplyMode::DmFallback;
        let target = resolve_reply_target(&group_msg, &settings);
        assert!(target.group_id.is_none());
        assert_eq!(target.recipient.as_deref(), Some("+15550002222"));
    }

    #[test]
    fn pending_reply_candidates_are_short_non_commands() {
        assert!(is_pending_followup_reply_candidate("god"));
        assert!(is_pending_followup_reply_candidate("the god of islam"));
        assert!(!is_pending_followup_reply_candidate("/search god"));
        assert!(!is_pending_followup_reply_candidate(""));
        assert!(!is_pending_followup_reply_candidate(
            "one two three four five six seven"
        ));
        assert!(!is_pending_followup_reply_candidate(&"x".repeat(81)));
    }

    #[test]
    fn telegram_secret_validation() {
        assert!(is_valid_telegram_secret(None, None));
        assert!(is_valid_telegram_secret(Some("anything"), None));
        assert!(is_valid_telegram_secret(Some("s3cret"), Some("s3cret")));
        assert!(!is_valid_telegram_secret(Some("wrong"), Some("s3cret")));
        assert!(!is_valid_telegram_secret(None, Some("s3cret")));
    }

    #[test]
    fn reply_truncation_at_cap() {
        let short = "x".repeat(CHAT_MAX_REPLY_CHARS);
        assert_eq!(truncate_reply(&short), short);

        let long = "x".repeat(CHAT_MAX_REPLY_CHARS + 1);
        let truncated = truncate_reply(&long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), CHAT_MAX_REPLY_CHARS + 3);
    }

    #[test]
    fn usage_message_depends_on_scope() {
        assert!(chat_usage_message(&message("", None)).starts_with("Send a prompt"));
        assert!(chat_usage_message(&message("", Some("g"))).starts_with("Tag me"));
    }

    #[test]
    fn confidence_buckets() {
        assert_eq!(confidence_bucket(0.95), "high");
        assert_eq!(confidence_bucket(0.7), "medium");
        assert_eq!(confidence_bucket(0.1), "low");
    }
}
