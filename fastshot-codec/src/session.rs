use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fastshot_types::SessionMetadata;

/// The decoded, in-memory form of a session (§4.2 "Session JSON"). This is
/// what the screen-capture/annotation/OCR plugins (out of scope here)
/// produce and consume; the codec only ever sees this shape and the bytes
/// it (de)serializes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub windows: Vec<WindowCapture>,
    pub metadata: SessionMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// A captured image either inlined as base64 in the session JSON or
/// stored as a sibling `images/*.png` entry in the ZIP container, per
/// §4.2's "base64 image payloads" plus the top-level `images/*.png`
/// layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImagePayload {
    Inline { base64: String },
    File { path: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowCapture {
    pub geometry: Geometry,
    pub scale: f64,
    pub image: ImagePayload,
    #[serde(default)]
    pub draw_history: Vec<serde_json::Value>,
}

impl Session {
    pub fn image_count(&self) -> u32 {
        self.windows.len() as u32
    }
}
