pub mod ai;
pub mod attachment;
pub mod config;
pub mod error;
pub mod reveal;
pub mod session;
pub mod speech;
pub mod state;

// Re-export main types for convenience
pub use ai::{GeminiClient, QueryExecutor};
pub use attachment::{DecodedImage, EncodedImage};
pub use config::Config;
pub use error::{AttachmentError, QueryError};
pub use reveal::RevealEngine;
pub use session::{PopupSession, Region, SessionEvent, STOPPED_TEXT};
pub use speech::{CommandEngine, RecognitionEngine, SpeechCapture, SpeechEvent};
pub use state::{CursorMove, Draft, Position, Query, RequestState};
