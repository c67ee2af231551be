//! Speech capture behind a capability interface.
//!
//! [`SpeechCapture`] owns at most one recognition session at a time and keeps
//! the finalized transcript. Engines report through a [`SpeechSink`]; every
//! event carries the generation of the session that produced it so results
//! from an earlier session are ignored once a new one starts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// One recognized piece of speech
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Segment {
    pub text: String,
    #[serde(default = "default_final")]
    pub is_final: bool,
}

fn default_final() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Results { generation: u64, segments: Vec<Segment> },
    Error { generation: u64, message: String },
    Ended { generation: u64 },
}

impl SpeechEvent {
    pub fn generation(&self) -> u64 {
        match self {
            SpeechEvent::Results { generation, .. }
            | SpeechEvent::Error { generation, .. }
            | SpeechEvent::Ended { generation } => *generation,
        }
    }
}

/// Where an engine delivers its events. Returns false once nobody listens.
#[derive(Clone)]
pub struct SpeechSink(Arc<dyn Fn(SpeechEvent) -> bool + Send + Sync>);

impl SpeechSink {
    pub fn new(deliver: impl Fn(SpeechEvent) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(deliver))
    }

    pub fn send(&self, event: SpeechEvent) -> bool {
        (self.0)(event)
    }
}

/// A platform speech recognizer
pub trait RecognitionEngine: Send {
    /// Whether the capability exists at all on this machine
    fn probe(&self) -> bool;

    /// Begin continuous recognition, tagging every event with `generation`
    fn start(&mut self, generation: u64, sink: SpeechSink) -> Result<()>;

    /// End recognition. Must be safe to call when nothing is running.
    fn stop(&mut self);
}

pub struct SpeechCapture {
    engine: Option<Box<dyn RecognitionEngine>>,
    sink: SpeechSink,
    listening: bool,
    transcript: String,
    generation: u64,
}

impl SpeechCapture {
    pub fn new(engine: Box<dyn RecognitionEngine>, sink: SpeechSink) -> Self {
        let engine = if engine.probe() {
            Some(engine)
        } else {
            warn!("Speech recognition is not supported on this system");
            None
        };

        Self {
            engine,
            sink,
            listening: false,
            transcript: String::new(),
            generation: 0,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Tag of the most recently started recognition session
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn start(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if self.listening {
            return;
        }

        self.transcript.clear();
        self.generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        match engine.start(self.generation, self.sink.clone()) {
            Ok(()) => {
                info!("Speech capture started (session {})", self.generation);
                self.listening = true;
            }
            Err(e) => warn!("Speech capture failed to start: {}", e),
        }
    }

    pub fn stop(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            if self.listening {
                engine.stop();
                self.listening = false;
                info!("Speech capture stopped (session {})", self.generation);
            }
        }
    }

    pub fn toggle(&mut self) {
        if self.listening {
            self.stop();
        } else {
            self.start();
        }
    }

    /// Apply an engine event. Returns true when the transcript changed.
    pub fn handle_event(&mut self, event: SpeechEvent) -> bool {
        if event.generation() != self.generation {
            debug!("Ignoring speech event from session {}", event.generation());
            return false;
        }

        match event {
            SpeechEvent::Results { segments, .. } => {
                let finalized: String = segments
                    .iter()
                    .filter(|s| s.is_final)
                    .map(|s| s.text.as_str())
                    .collect();
                let finalized = finalized.trim();
                if finalized.is_empty() {
                    return false;
                }
                if !self.transcript.is_empty() {
                    self.transcript.push(' ');
                }
                self.transcript.push_str(finalized);
                true
            }
            SpeechEvent::Error { message, .. } => {
                warn!("Speech recognition error: {}", message);
                self.listening = false;
                false
            }
            SpeechEvent::Ended { .. } => {
                self.listening = false;
                false
            }
        }
    }
}

impl Drop for SpeechCapture {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
    }
}

/// Engine that never exists. Used when no recognizer is configured.
pub struct NoEngine;

impl RecognitionEngine for NoEngine {
    fn probe(&self) -> bool {
        false
    }

    fn start(&mut self, _generation: u64, _sink: SpeechSink) -> Result<()> {
        Err(anyhow!("speech recognition unavailable"))
    }

    fn stop(&mut self) {}
}

/// Runs an external recognizer process and reads its transcript from stdout.
///
/// Each stdout line is either JSON (`{"text": "...", "is_final": true}`) or
/// plain text, which counts as a finalized segment. The language is passed in
/// the `ASKPOP_SPEECH_LANG` environment variable. Starting requires a running
/// tokio runtime.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    lang: String,
    cancel: Option<CancellationToken>,
}

impl CommandEngine {
    pub fn new(argv: &[String], lang: &str) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            lang: lang.to_string(),
            cancel: None,
        })
    }
}

impl RecognitionEngine for CommandEngine {
    fn probe(&self) -> bool {
        resolve_program(&self.program).is_some()
    }

    fn start(&mut self, generation: u64, sink: SpeechSink) -> Result<()> {
        self.stop();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("ASKPOP_SPEECH_LANG", &self.lang)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("recognizer stdout unavailable"))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = child.kill().await;
                        return;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if let Some(segment) = parse_line(&line) {
                                let event = SpeechEvent::Results { generation, segments: vec![segment] };
                                if !sink.send(event) {
                                    let _ = child.kill().await;
                                    return;
                                }
                            }
                        }
                        Ok(None) => {
                            let _ = child.wait().await;
                            sink.send(SpeechEvent::Ended { generation });
                            return;
                        }
                        Err(e) => {
                            let _ = child.kill().await;
                            sink.send(SpeechEvent::Error { generation, message: e.to_string() });
                            return;
                        }
                    }
                }
            }
        });

        self.cancel = Some(cancel);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

fn parse_line(line: &str) -> Option<Segment> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with('{') {
        if let Ok(segment) = serde_json::from_str::<Segment>(line) {
            return Some(segment);
        }
    }
    Some(Segment {
        text: line.to_string(),
        is_final: true,
    })
}

fn resolve_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Calls {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    struct FakeEngine {
        supported: bool,
        calls: Arc<Calls>,
    }

    impl RecognitionEngine for FakeEngine {
        fn probe(&self) -> bool {
            self.supported
        }

        fn start(&mut self, _generation: u64, _sink: SpeechSink) -> Result<()> {
            self.calls.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&mut self) {
            self.calls.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn capture(supported: bool) -> (SpeechCapture, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let engine = FakeEngine { supported, calls: calls.clone() };
        (SpeechCapture::new(Box::new(engine), SpeechSink::new(|_| true)), calls)
    }

    fn final_segment(text: &str) -> Segment {
        Segment { text: text.to_string(), is_final: true }
    }

    #[test]
    fn test_start_twice_is_single_session() {
        let (mut speech, calls) = capture(true);
        speech.start();
        speech.start();
        assert!(speech.is_listening());
        assert_eq!(calls.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsupported_is_inert() {
        let (mut speech, calls) = capture(false);
        assert!(!speech.is_supported());
        speech.start();
        speech.toggle();
        speech.stop();
        assert!(!speech.is_listening());
        assert_eq!(calls.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_transcript_joins_final_results_only() {
        let (mut speech, _) = capture(true);
        speech.start();
        let generation = speech.generation();

        let interim = SpeechEvent::Results {
            generation,
            segments: vec![Segment { text: "hel".into(), is_final: false }],
        };
        assert!(!speech.handle_event(interim));
        assert_eq!(speech.transcript(), "");

        speech.handle_event(SpeechEvent::Results { generation, segments: vec![final_segment("hello")] });
        speech.handle_event(SpeechEvent::Results { generation, segments: vec![final_segment(" world")] });
        assert_eq!(speech.transcript(), "hello world");
    }

    #[test]
    fn test_error_and_end_reset_listening() {
        let (mut speech, _) = capture(true);
        speech.start();
        let generation = speech.generation();
        speech.handle_event(SpeechEvent::Error { generation, message: "no-speech".into() });
        assert!(!speech.is_listening());

        speech.start();
        assert!(speech.is_listening());
        speech.handle_event(SpeechEvent::Ended { generation: speech.generation() });
        assert!(!speech.is_listening());
    }

    #[test]
    fn test_stale_session_events_ignored() {
        let (mut speech, _) = capture(true);
        speech.start();
        let old = speech.generation();
        speech.stop();
        speech.start();
        assert_ne!(speech.generation(), old);

        assert!(!speech.handle_event(SpeechEvent::Results { generation: old, segments: vec![final_segment("old")] }));
        speech.handle_event(SpeechEvent::Ended { generation: old });
        assert!(speech.is_listening());
        assert_eq!(speech.transcript(), "");
    }

    #[test]
    fn test_restart_clears_transcript() {
        let (mut speech, _) = capture(true);
        speech.start();
        let generation = speech.generation();
        speech.handle_event(SpeechEvent::Results { generation, segments: vec![final_segment("first")] });
        assert_eq!(speech.transcript(), "first");
        speech.stop();
        speech.start();
        assert_eq!(speech.transcript(), "");
    }

    #[test]
    fn test_drop_releases_engine() {
        let (mut speech, calls) = capture(true);
        speech.start();
        drop(speech);
        assert_eq!(calls.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("plain words"), Some(final_segment("plain words")));
        assert_eq!(
            parse_line(r#"{"text": "partial", "is_final": false}"#),
            Some(Segment { text: "partial".into(), is_final: false })
        );
        assert_eq!(parse_line(r#"{"text": "done"}"#), Some(final_segment("done")));
    }

    #[test]
    fn test_command_engine_probe() {
        let missing = CommandEngine::new(&["definitely-not-a-recognizer-xyz".to_string()], "en-US").unwrap();
        assert!(!missing.probe());
        assert!(CommandEngine::new(&[], "en-US").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_engine_streams_stdout() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"echo '{"text": "hello there", "is_final": true}'"#.to_string(),
        ];
        let mut engine = CommandEngine::new(&argv, "en-US").unwrap();
        assert!(engine.probe());

        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.start(7, SpeechSink::new(move |event| tx.send(event).is_ok())).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            SpeechEvent::Results { generation: 7, segments: vec![final_segment("hello there")] }
        );
        assert_eq!(rx.recv().await.unwrap(), SpeechEvent::Ended { generation: 7 });
    }
}
