//! The popup session controller.
//!
//! `PopupSession` owns everything the popup shows: position and drag, the
//! draft, the in-flight request, the visible response, and the query history.
//! Front ends dispatch intents to it and render from its accessors; results of
//! background work come back as [`SessionEvent`]s on the channel given at
//! construction and are applied with [`PopupSession::handle_event`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Local;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::QueryExecutor;
use crate::attachment::EncodedImage;
use crate::error::QueryError;
use crate::reveal::RevealEngine;
use crate::speech::{RecognitionEngine, SpeechCapture, SpeechEvent, SpeechSink};
use crate::state::{CursorMove, Draft, Position, Query, RequestState};

/// Response shown after the user stops a request
pub const STOPPED_TEXT: &str = "Generation stopped by user.";

// Tickets are unique across sessions so a result queued for a closed popup
// can never match a request of the next one.
static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub enum SessionEvent {
    Completion {
        ticket: u64,
        result: Result<String, QueryError>,
    },
    Speech(SpeechEvent),
}

pub type SessionSender = mpsc::UnboundedSender<SessionEvent>;

/// A rectangle in screen cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u16,
    pub height: u16,
}

impl Region {
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x
            && y >= self.y
            && x < self.x + i32::from(self.width)
            && y < self.y + i32::from(self.height)
    }
}

struct PendingRequest {
    ticket: u64,
    prompt: String,
    image: Option<EncodedImage>,
    cancelled: bool,
    abort: CancellationToken,
}

pub struct PopupSession {
    // Window
    position: Position,
    placed: bool,
    drag_anchor: Option<(i32, i32)>,
    handle_region: Option<Region>,
    max_position: Option<Position>,

    // Input
    draft: Draft,
    speech: SpeechCapture,

    // Request lifecycle
    request: RequestState,
    pending: Option<PendingRequest>,

    // Output
    response: Option<String>,
    reveal: RevealEngine,
    history: Vec<Query>,
    show_history: bool,
    next_query_id: u64,

    executor: Arc<dyn QueryExecutor>,
    events: SessionSender,
}

impl PopupSession {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        speech_engine: Box<dyn RecognitionEngine>,
        events: SessionSender,
    ) -> Self {
        let speech_events = events.clone();
        let sink = SpeechSink::new(move |event| speech_events.send(SessionEvent::Speech(event)).is_ok());

        Self {
            position: Position::default(),
            placed: false,
            drag_anchor: None,
            handle_region: None,
            max_position: None,

            draft: Draft::default(),
            speech: SpeechCapture::new(speech_engine, sink),

            request: RequestState::Idle,
            pending: None,

            response: None,
            reveal: RevealEngine::new(),
            history: Vec::new(),
            show_history: false,
            next_query_id: 1,

            executor,
            events,
        }
    }

    // Read-only view of the state

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn request_state(&self) -> &RequestState {
        &self.request
    }

    /// The full response the reveal is working toward
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// The part of the response revealed so far
    pub fn visible_response(&self) -> &str {
        self.reveal.visible()
    }

    pub fn is_revealing(&self) -> bool {
        self.reveal.is_revealing()
    }

    pub fn history(&self) -> &[Query] {
        &self.history
    }

    pub fn is_submitting(&self) -> bool {
        matches!(self.request, RequestState::InFlight { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.request, RequestState::Cancelled { .. })
    }

    pub fn is_showing_response(&self) -> bool {
        self.response.is_some()
    }

    pub fn is_showing_history(&self) -> bool {
        self.show_history
    }

    /// Whether the popup needs its body region, not just the input bar
    pub fn is_expanded(&self) -> bool {
        self.is_submitting() || self.is_showing_response() || self.show_history
    }

    pub fn can_submit(&self) -> bool {
        self.draft.is_submittable() && !self.is_submitting()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag_anchor.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.speech.is_listening()
    }

    pub fn speech_supported(&self) -> bool {
        self.speech.is_supported()
    }

    // Draft editing

    pub fn type_char(&mut self, c: char) {
        self.draft.insert_char(c);
    }

    pub fn type_text(&mut self, text: &str) {
        self.draft.insert_str(text);
    }

    pub fn backspace(&mut self) {
        self.draft.backspace();
    }

    pub fn delete(&mut self) {
        self.draft.delete();
    }

    pub fn move_cursor(&mut self, movement: CursorMove) {
        self.draft.move_cursor(movement);
    }

    /// Attach an image, replacing any image already attached
    pub fn attach_image(&mut self, image: EncodedImage) {
        self.draft.image = Some(image);
    }

    pub fn remove_image(&mut self) {
        self.draft.image = None;
    }

    pub fn toggle_listening(&mut self) {
        self.speech.toggle();
    }

    // Request lifecycle

    /// Send the draft to the model. Returns false, changing nothing, when the
    /// prompt is blank or a request is already in flight.
    pub fn submit(&mut self) -> bool {
        if !self.can_submit() {
            return false;
        }

        let ticket = NEXT_TICKET.fetch_add(1, Ordering::Relaxed);

        let prompt = self.draft.prompt.clone();
        let image = self.draft.image.clone();
        let abort = CancellationToken::new();

        self.request = RequestState::InFlight { ticket };
        self.set_response(None);
        self.show_history = false;

        info!("Submitting request {} ({} chars, image: {})", ticket, prompt.len(), image.is_some());

        let executor = Arc::clone(&self.executor);
        let events = self.events.clone();
        let token = abort.clone();
        let task_prompt = prompt.clone();
        let task_image = image.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = executor.execute(&task_prompt, task_image.as_ref()) => result,
            };
            let _ = events.send(SessionEvent::Completion { ticket, result });
        });

        self.pending = Some(PendingRequest {
            ticket,
            prompt,
            image,
            cancelled: false,
            abort,
        });
        true
    }

    /// Abandon the in-flight request. Its result, if it still arrives, is
    /// discarded.
    pub fn stop(&mut self) {
        let RequestState::InFlight { ticket } = self.request else {
            return;
        };
        self.cancel_pending();
        self.request = RequestState::Cancelled { ticket };
        self.set_response(Some(STOPPED_TEXT.to_string()));
        info!("Request {} stopped by user", ticket);
    }

    /// Apply the result of request `ticket`
    pub fn complete(&mut self, ticket: u64, result: Result<String, QueryError>) {
        let pending = match self.pending.take() {
            Some(pending) if pending.ticket == ticket && !pending.cancelled => pending,
            other => {
                self.pending = other;
                debug!("Dropping result of cancelled or superseded request {}", ticket);
                return;
            }
        };

        let text = match result {
            Ok(text) => text,
            Err(e) if e.is_attachment() => {
                // Nothing was sent; keep the user's input so they can fix it.
                self.request = RequestState::Idle;
                self.set_response(Some(e.to_string()));
                return;
            }
            Err(e) => {
                error!("Request {} failed: {}", ticket, e);
                e.to_string()
            }
        };

        let query = Query {
            id: self.next_query_id,
            prompt: pending.prompt,
            image: pending.image,
            response: text.clone(),
            timestamp: Local::now(),
        };
        self.next_query_id += 1;

        self.history.insert(0, query);
        self.set_response(Some(text.clone()));
        self.request = RequestState::Completed(text);
        self.draft.clear();
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Completion { ticket, result } => self.complete(ticket, result),
            SessionEvent::Speech(event) => {
                if self.speech.handle_event(event) {
                    let transcript = self.speech.transcript().to_string();
                    if !transcript.is_empty() {
                        self.draft.set_prompt(transcript);
                    }
                }
            }
        }
    }

    /// Advance the response reveal by one step. Returns true if anything changed.
    pub fn tick(&mut self) -> bool {
        self.reveal.tick().is_some()
    }

    /// Start over with an empty popup. History is kept.
    pub fn new_chat(&mut self) {
        if self.is_submitting() {
            self.cancel_pending();
        }
        self.draft.clear();
        self.set_response(None);
        self.request = RequestState::Idle;
        self.show_history = false;
    }

    // History

    pub fn toggle_history(&mut self) {
        self.show_history = !self.show_history;
    }

    /// Put a stored query back into the popup. Returns false for a bad index.
    pub fn load_from_history(&mut self, index: usize) -> bool {
        let Some(query) = self.history.get(index) else {
            return false;
        };
        let (prompt, image, response) = (query.prompt.clone(), query.image.clone(), query.response.clone());

        self.draft.set_prompt(prompt);
        self.draft.image = image;
        self.set_response(Some(response));
        self.show_history = false;
        true
    }

    // Window placement and dragging

    /// Center horizontally, a quarter of the way down. Only the first call
    /// has an effect.
    pub fn place_initial(&mut self, screen_width: u16, screen_height: u16, popup_width: u16) {
        if self.placed {
            return;
        }
        self.position = Position {
            x: i32::from(screen_width.saturating_sub(popup_width)) / 2,
            y: i32::from(screen_height) / 4,
        };
        self.placed = true;
    }

    /// Where the drag handle currently is on screen
    pub fn set_handle_region(&mut self, region: Region) {
        self.handle_region = Some(region);
    }

    /// Keep the popup fully on a screen of the given size. Call whenever the
    /// screen or the popup changes size.
    pub fn set_bounds(&mut self, screen_width: u16, screen_height: u16, popup_width: u16, popup_height: u16) {
        self.max_position = Some(Position {
            x: i32::from(screen_width.saturating_sub(popup_width)),
            y: i32::from(screen_height.saturating_sub(popup_height)),
        });
        self.position = self.clamped(self.position);
    }

    /// Begin a drag if the pointer went down on the handle
    pub fn pointer_down(&mut self, x: i32, y: i32) -> bool {
        let on_handle = self.handle_region.map(|r| r.contains(x, y)).unwrap_or(false);
        if on_handle {
            self.drag_anchor = Some((x, y));
        }
        on_handle
    }

    pub fn pointer_move(&mut self, x: i32, y: i32) {
        if let Some((last_x, last_y)) = self.drag_anchor {
            let moved = Position {
                x: self.position.x + x - last_x,
                y: self.position.y + y - last_y,
            };
            self.position = self.clamped(moved);
            self.drag_anchor = Some((x, y));
        }
    }

    pub fn pointer_up(&mut self) {
        self.drag_anchor = None;
    }

    // Internals

    fn clamped(&self, position: Position) -> Position {
        match self.max_position {
            Some(max) => Position {
                x: position.x.clamp(0, max.x),
                y: position.y.clamp(0, max.y),
            },
            None => position,
        }
    }

    fn set_response(&mut self, response: Option<String>) {
        match &response {
            Some(text) => self.reveal.start(text.clone()),
            None => self.reveal.clear(),
        }
        self.response = response;
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.as_mut() {
            pending.cancelled = true;
            pending.abort.cancel();
        }
    }
}

impl Drop for PopupSession {
    fn drop(&mut self) {
        self.cancel_pending();
        self.speech.stop();
    }
}
