//! Messages carried on the peer data channel once a session is connected.

use serde::{Deserialize, Serialize};

/// One data channel frame: a `type`-tagged body plus a sender timestamp in
/// milliseconds since the Unix epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataMessage {
    #[serde(flatten)]
    pub kind: DataKind,
    pub timestamp: u64,
}

impl DataMessage {
    pub fn new(kind: DataKind, timestamp: u64) -> Self {
        Self { kind, timestamp }
    }

    pub fn decode(text: &str) -> Result<Self, crate::ProtoError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseAction {
    Move,
    Click,
    Dblclick,
    Contextmenu,
    Mousedown,
    Mouseup,
    Wheel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Keydown,
    Keyup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Auto,
    Low,
    Medium,
    High,
}

/// Every message kind the data channel carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DataKind {
    Mouse {
        action: MouseAction,
        /// Normalized to 0..=1.
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        button: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta_x: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta_y: Option<f64>,
    },
    Keyboard {
        action: KeyAction,
        code: String,
        key: String,
        ctrl_key: bool,
        shift_key: bool,
        alt_key: bool,
        meta_key: bool,
    },
    Clipboard {
        text: String,
    },
    Chat {
        text: String,
        sender: String,
    },
    FileMeta {
        file_id: String,
        file_name: String,
        file_size: u64,
        mime_type: String,
        total_chunks: u32,
    },
    FileChunk {
        file_id: String,
        chunk_index: u32,
        /// Base64 chunk body.
        data: String,
    },
    FileComplete {
        file_id: String,
        checksum: String,
    },
    Quality {
        preset: QualityPreset,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_height: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_fps: Option<u32>,
    },
    MonitorSelect {
        monitor_id: String,
    },
    Ping {
        seq: u64,
    },
    Pong {
        seq: u64,
    },
    ControlPermission {
        allowed: bool,
    },
    ReleaseKeys,
    E2eReady,
}

impl DataKind {
    /// Wire name of the kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mouse { .. } => "mouse",
            Self::Keyboard { .. } => "keyboard",
            Self::Clipboard { .. } => "clipboard",
            Self::Chat { .. } => "chat",
            Self::FileMeta { .. } => "file_meta",
            Self::FileChunk { .. } => "file_chunk",
            Self::FileComplete { .. } => "file_complete",
            Self::Quality { .. } => "quality",
            Self::MonitorSelect { .. } => "monitor_select",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::ControlPermission { .. } => "control_permission",
            Self::ReleaseKeys => "release_keys",
            Self::E2eReady => "e2e_ready",
        }
    }
}
