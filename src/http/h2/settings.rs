//! HTTP/2 SETTINGS handling
//!
//! SETTINGS parameters, validation, and the 6-byte-per-entry payload
//! format from RFC 7540 Section 6.5. Both connection endpoints share the
//! same parse/encode path.

use super::error::{Error, Result};

// Parameter identifiers from RFC 7540 Section 6.5.2
const ID_HEADER_TABLE_SIZE: u16 = 0x1;
const ID_ENABLE_PUSH: u16 = 0x2;
const ID_MAX_CONCURRENT_STREAMS: u16 = 0x3;
const ID_INITIAL_WINDOW_SIZE: u16 = 0x4;
const ID_MAX_FRAME_SIZE: u16 = 0x5;
const ID_MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// HTTP/2 settings
///
/// `None` means "not announced"; accessors substitute the RFC defaults.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub header_table_size: Option<u32>,
    pub enable_push: Option<bool>,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Settings::default()
    }

    /// Header table size, defaulting to 4096
    pub fn header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(4096)
    }

    /// Whether server push is allowed, defaulting to true
    pub fn enable_push(&self) -> bool {
        self.enable_push.unwrap_or(true)
    }

    /// Concurrency cap; `None` means unlimited
    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Initial flow-control window, defaulting to 65535
    pub fn initial_window_size(&self) -> u32 {
        self.initial_window_size.unwrap_or(65535)
    }

    /// Largest acceptable frame payload, defaulting to 16384
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(16384)
    }

    /// Validate announced values against the RFC bounds
    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.initial_window_size {
            if size > 0x7FFF_FFFF {
                return Err(Error::InvalidSettings(format!(
                    "Initial window size {} exceeds maximum (2^31-1)",
                    size
                )));
            }
        }

        if let Some(size) = self.max_frame_size {
            if !(16384..=16777215).contains(&size) {
                return Err(Error::InvalidSettings(format!(
                    "Max frame size {} outside valid range (16384-16777215)",
                    size
                )));
            }
        }

        Ok(())
    }

    /// Overlay another `Settings`; announced values win
    pub fn merge(&mut self, other: &Settings) {
        fn overlay<T: Copy>(into: &mut Option<T>, from: Option<T>) {
            if from.is_some() {
                *into = from;
            }
        }

        overlay(&mut self.header_table_size, other.header_table_size);
        overlay(&mut self.enable_push, other.enable_push);
        overlay(
            &mut self.max_concurrent_streams,
            other.max_concurrent_streams,
        );
        overlay(&mut self.initial_window_size, other.initial_window_size);
        overlay(&mut self.max_frame_size, other.max_frame_size);
        overlay(&mut self.max_header_list_size, other.max_header_list_size);
    }

    /// Parse a SETTINGS frame payload (validated)
    pub fn parse_payload(payload: &[u8]) -> Result<Settings> {
        if payload.len() % 6 != 0 {
            return Err(Error::FrameSize(format!(
                "SETTINGS payload length {} not a multiple of 6",
                payload.len()
            )));
        }

        let mut settings = Settings::new();
        for entry in payload.chunks_exact(6) {
            let id = u16::from_be_bytes([entry[0], entry[1]]);
            let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);

            match id {
                ID_HEADER_TABLE_SIZE => settings.header_table_size = Some(value),
                ID_ENABLE_PUSH => settings.enable_push = Some(value != 0),
                ID_MAX_CONCURRENT_STREAMS => settings.max_concurrent_streams = Some(value),
                ID_INITIAL_WINDOW_SIZE => settings.initial_window_size = Some(value),
                ID_MAX_FRAME_SIZE => settings.max_frame_size = Some(value),
                ID_MAX_HEADER_LIST_SIZE => settings.max_header_list_size = Some(value),
                // Unknown parameters are ignored per RFC 7540
                _ => {}
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Encode announced settings as a SETTINGS frame payload
    pub fn encode_payload(&self) -> Vec<u8> {
        let entries = [
            (ID_HEADER_TABLE_SIZE, self.header_table_size),
            (ID_ENABLE_PUSH, self.enable_push.map(u32::from)),
            (ID_MAX_CONCURRENT_STREAMS, self.max_concurrent_streams),
            (ID_INITIAL_WINDOW_SIZE, self.initial_window_size),
            (ID_MAX_FRAME_SIZE, self.max_frame_size),
            (ID_MAX_HEADER_LIST_SIZE, self.max_header_list_size),
        ];

        let mut out = Vec::with_capacity(entries.len() * 6);
        for (id, value) in entries {
            if let Some(value) = value {
                out.extend_from_slice(&id.to_be_bytes());
                out.extend_from_slice(&value.to_be_bytes());
            }
        }
        out
    }
}

/// Builder for HTTP/2 settings
#[derive(Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        SettingsBuilder::default()
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = Some(enable);
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    /// Validate and return the settings
    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}
