use std::path::Path;
use std::sync::Arc;

use askpop_core::session::SessionSender;
use askpop_core::speech::NoEngine;
use askpop_core::{CommandEngine, Config, PopupSession, QueryExecutor, RecognitionEngine, SessionEvent};
use log::info;
use ratatui::layout::Rect;
use ratatui::widgets::ListState;

use crate::images::{self, ClipboardContent};
use crate::ui;

/// Thinking animation advances roughly this often
const ANIMATION_PERIOD_MS: u128 = 300;

/// How long the copy confirmation stays up
const COPIED_NOTICE_MS: u128 = 2000;

pub const COPIED_TEXT: &str = "Copied!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Prompt,
    AttachPath, // typing a file path for the image picker
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub session: Option<PopupSession>,
    pub input_mode: InputMode,

    // Image picker input
    pub path_input: String,

    // One-line notice under the input (image errors and the like)
    pub status: Option<String>,

    // History panel selection
    pub history_state: ListState,

    // Response scrolling
    pub response_scroll: u16,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation
    tick_count: u32,
    ticks_per_frame: u32,
    tick_ms: u128,
    status_ticks_left: Option<u32>,

    // Areas for mouse hit-testing (updated during render)
    pub popup_area: Option<Rect>,
    pub history_area: Option<Rect>,

    // Backend
    pub model: String,
    pub api_configured: bool,
    config: Config,
    executor: Arc<dyn QueryExecutor>,
    session_tx: SessionSender,
}

impl App {
    pub fn new(
        config: Config,
        executor: Arc<dyn QueryExecutor>,
        api_configured: bool,
        session_tx: SessionSender,
    ) -> Self {
        let tick_ms = config.reveal_interval().as_millis().max(1);
        let ticks_per_frame = (ANIMATION_PERIOD_MS / tick_ms).max(1) as u32;

        Self {
            should_quit: false,
            session: None,
            input_mode: InputMode::Prompt,

            path_input: String::new(),
            status: None,
            history_state: ListState::default(),
            response_scroll: 0,

            animation_frame: 0,
            tick_count: 0,
            ticks_per_frame,
            tick_ms,
            status_ticks_left: None,

            popup_area: None,
            history_area: None,

            model: config.model().to_string(),
            api_configured,
            config,
            executor,
            session_tx,
        }
    }

    pub fn is_popup_open(&self) -> bool {
        self.session.is_some()
    }

    /// Show the popup with a fresh session
    pub fn open_popup(&mut self) {
        if self.session.is_some() {
            return;
        }
        info!("Opening popup");
        let engine = speech_engine(&self.config);
        self.session = Some(PopupSession::new(
            Arc::clone(&self.executor),
            engine,
            self.session_tx.clone(),
        ));
    }

    /// Hide the popup. The session, its history, and any capture die with it.
    pub fn close_popup(&mut self) {
        if self.session.take().is_some() {
            info!("Closing popup");
        }
        self.input_mode = InputMode::Prompt;
        self.path_input.clear();
        self.set_status(None);
        self.history_state = ListState::default();
        self.response_scroll = 0;
        self.popup_area = None;
        self.history_area = None;
    }

    pub fn toggle_popup(&mut self) {
        if self.is_popup_open() {
            self.close_popup();
        } else {
            self.open_popup();
        }
    }

    /// Advance the reveal and the thinking animation. Returns true if the
    /// screen needs redrawing.
    pub fn tick(&mut self) -> bool {
        let mut changed = false;
        if let Some(left) = self.status_ticks_left.as_mut() {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.set_status(None);
                changed = true;
            }
        }

        let Some(session) = self.session.as_mut() else {
            return changed;
        };

        changed |= session.tick();

        self.tick_count = self.tick_count.wrapping_add(1);
        if session.is_submitting() && self.tick_count % self.ticks_per_frame == 0 {
            self.animation_frame = (self.animation_frame + 1) % 3;
            changed = true;
        }
        changed
    }

    pub fn handle_session_event(&mut self, event: SessionEvent) {
        if let Some(session) = self.session.as_mut() {
            session.handle_event(event);
        }
    }

    pub fn submit(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if session.submit() {
                self.set_status(None);
                self.response_scroll = 0;
                self.animation_frame = 0;
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.stop();
            self.response_scroll = 0;
        }
    }

    pub fn new_chat(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.new_chat();
            self.set_status(None);
            self.response_scroll = 0;
        }
    }

    pub fn toggle_history(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.toggle_history();
            let selected = (!session.history().is_empty()).then_some(0);
            self.history_state = ListState::default();
            self.history_state.select(selected);
        }
    }

    pub fn history_nav_down(&mut self) {
        let len = self.session.as_ref().map(|s| s.history().len()).unwrap_or(0);
        if len > 0 {
            let i = self.history_state.selected().unwrap_or(0);
            self.history_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn history_nav_up(&mut self) {
        let i = self.history_state.selected().unwrap_or(0);
        self.history_state.select(Some(i.saturating_sub(1)));
    }

    pub fn load_history_entry(&mut self, index: usize) {
        if let Some(session) = self.session.as_mut() {
            if session.load_from_history(index) {
                self.response_scroll = 0;
            }
        }
    }

    pub fn load_selected_history(&mut self) {
        if let Some(index) = self.history_state.selected() {
            self.load_history_entry(index);
        }
    }

    /// Open the path prompt used as the image picker
    pub fn begin_attach(&mut self) {
        if self.session.is_some() {
            self.input_mode = InputMode::AttachPath;
            self.path_input.clear();
        }
    }

    pub fn cancel_attach(&mut self) {
        self.input_mode = InputMode::Prompt;
        self.path_input.clear();
    }

    pub fn finish_attach(&mut self) {
        let raw = std::mem::take(&mut self.path_input);
        self.input_mode = InputMode::Prompt;

        let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
        if trimmed.is_empty() {
            return;
        }
        let path = expand_home(trimmed);

        match images::load_image_file(Path::new(&path)) {
            Ok(image) => {
                if let Some(session) = self.session.as_mut() {
                    session.attach_image(image);
                }
                self.set_status(None);
            }
            Err(e) => self.set_status(Some(e.to_string())),
        }
    }

    /// Clipboard paste: attach an image if there is one, otherwise insert text
    pub fn paste_clipboard(&mut self) {
        match images::read_clipboard() {
            Ok(ClipboardContent::Image(image)) => {
                if let Some(session) = self.session.as_mut() {
                    session.attach_image(image);
                }
                self.set_status(None);
            }
            Ok(ClipboardContent::Text(text)) => self.paste_text(&text),
            Ok(ClipboardContent::Empty) => {}
            Err(e) => self.set_status(Some(e.to_string())),
        }
    }

    /// Insert pasted text wherever the user is typing
    pub fn paste_text(&mut self, text: &str) {
        let text = text.replace("\r\n", "\n").replace('\r', "\n");
        match self.input_mode {
            InputMode::AttachPath => self.path_input.push_str(text.trim_end_matches('\n')),
            InputMode::Prompt => {
                if let Some(session) = self.session.as_mut() {
                    if !session.is_showing_history() {
                        session.type_text(&text);
                    }
                }
            }
        }
    }

    fn set_status(&mut self, status: Option<String>) {
        self.status = status;
        self.status_ticks_left = None;
    }

    /// Copy the last code block of the answer, or the whole answer if it has none
    pub fn copy_response(&mut self) {
        let Some(response) = self
            .session
            .as_ref()
            .filter(|s| s.is_showing_response())
            .and_then(|s| s.response())
        else {
            return;
        };
        let text = ui::last_code_block(response).unwrap_or_else(|| response.to_string());

        match images::write_clipboard(&text) {
            Ok(()) => {
                self.status = Some(COPIED_TEXT.to_string());
                self.status_ticks_left = Some((COPIED_NOTICE_MS / self.tick_ms).max(1) as u32);
            }
            Err(e) => self.set_status(Some(e.to_string())),
        }
    }

    pub fn remove_image(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.remove_image();
        }
    }

    pub fn toggle_listening(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.toggle_listening();
        }
    }

    pub fn scroll_response_down(&mut self, lines: u16) {
        self.response_scroll = self.response_scroll.saturating_add(lines);
    }

    pub fn scroll_response_up(&mut self, lines: u16) {
        self.response_scroll = self.response_scroll.saturating_sub(lines);
    }
}

fn speech_engine(config: &Config) -> Box<dyn RecognitionEngine> {
    config
        .speech_command
        .as_deref()
        .and_then(|argv| CommandEngine::new(argv, config.speech_lang()))
        .map(|engine| Box::new(engine) as Box<dyn RecognitionEngine>)
        .unwrap_or_else(|| Box::new(NoEngine))
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use askpop_core::{EncodedImage, QueryError};
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Answers every prompt with "echo: <prompt>"
    pub(crate) struct EchoExecutor;

    #[async_trait]
    impl QueryExecutor for EchoExecutor {
        async fn execute(&self, prompt: &str, _image: Option<&EncodedImage>) -> Result<String, QueryError> {
            Ok(format!("echo: {}", prompt))
        }
    }

    pub(crate) fn test_app() -> (App, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = App::new(Config::new(), Arc::new(EchoExecutor), true, tx);
        (app, rx)
    }

    #[tokio::test]
    async fn test_closing_popup_drops_session() {
        let (mut app, _rx) = test_app();
        app.open_popup();
        app.session.as_mut().unwrap().type_text("hello");
        app.close_popup();
        assert!(!app.is_popup_open());

        app.open_popup();
        assert_eq!(app.session.as_ref().unwrap().draft().prompt, "");
    }

    #[tokio::test]
    async fn test_submit_and_deliver() {
        let (mut app, mut rx) = test_app();
        app.open_popup();
        app.session.as_mut().unwrap().type_text("ping");
        app.submit();
        assert!(app.session.as_ref().unwrap().is_submitting());

        let event = rx.recv().await.unwrap();
        app.handle_session_event(event);
        let session = app.session.as_ref().unwrap();
        assert_eq!(session.response(), Some("echo: ping"));
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_attach_from_path() {
        let (mut app, _rx) = test_app();
        app.open_popup();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pic.png");
        let png = images::encode_png(1, 1, vec![1, 2, 3, 255]).unwrap();
        std::fs::write(&path, png.decode().unwrap().bytes).unwrap();

        app.begin_attach();
        assert_eq!(app.input_mode, InputMode::AttachPath);
        app.paste_text(&format!("\"{}\"\n", path.display()));
        app.finish_attach();

        assert_eq!(app.input_mode, InputMode::Prompt);
        assert_eq!(app.status, None);
        let image = app.session.as_ref().unwrap().draft().image.clone().unwrap();
        assert_eq!(image.mime_type(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_attach_bad_path_reports_status() {
        let (mut app, _rx) = test_app();
        app.open_popup();
        app.session.as_mut().unwrap().type_text("keep");

        app.begin_attach();
        app.paste_text("/definitely/missing/file.png");
        app.finish_attach();

        assert!(app.status.as_deref().unwrap().starts_with("Failed to read"));
        let session = app.session.as_ref().unwrap();
        assert!(session.draft().image.is_none());
        assert_eq!(session.draft().prompt, "keep");
    }

    #[tokio::test]
    async fn test_paste_normalizes_newlines() {
        let (mut app, _rx) = test_app();
        app.open_popup();
        app.paste_text("a\r\nb\rc");
        assert_eq!(app.session.as_ref().unwrap().draft().prompt, "a\nb\nc");
    }

    #[tokio::test]
    async fn test_history_navigation_clamps() {
        let (mut app, mut rx) = test_app();
        app.open_popup();
        for prompt in ["one", "two"] {
            app.session.as_mut().unwrap().type_text(prompt);
            app.submit();
            let event = rx.recv().await.unwrap();
            app.handle_session_event(event);
        }

        app.toggle_history();
        assert_eq!(app.history_state.selected(), Some(0));
        app.history_nav_down();
        app.history_nav_down();
        assert_eq!(app.history_state.selected(), Some(1));

        app.load_selected_history();
        let session = app.session.as_ref().unwrap();
        assert_eq!(session.draft().prompt, "one");
        assert!(!session.is_showing_history());
    }

    #[tokio::test]
    async fn test_copy_without_response_is_noop() {
        let (mut app, _rx) = test_app();
        app.copy_response();
        app.open_popup();
        app.copy_response();
        assert_eq!(app.status, None);
    }

    #[tokio::test]
    async fn test_copied_notice_expires() {
        let (mut app, _rx) = test_app();
        app.status = Some(COPIED_TEXT.to_string());
        app.status_ticks_left = Some(2);

        assert!(!app.tick());
        assert_eq!(app.status.as_deref(), Some(COPIED_TEXT));
        assert!(app.tick());
        assert_eq!(app.status, None);
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/tmp/a.png"), "/tmp/a.png");
        assert_eq!(expand_home("rel/a.png"), "rel/a.png");
    }
}
