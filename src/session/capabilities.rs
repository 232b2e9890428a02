//! Negotiated terminal capability record (SPEC_FULL.md §3, §6). Wraps the wire
//! `ClientCapabilitiesPayload` in typed enums so the rest of the server never has to
//! re-validate a raw `u32` discriminant past the point of admission.

use crate::protocol::ClientCapabilitiesPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorLevel {
    None,
    Ansi16,
    Ansi256,
    TrueColor,
}

impl ColorLevel {
    fn from_u32(value: u32) -> Self {
        match value {
            1 => ColorLevel::Ansi16,
            2 => ColorLevel::Ansi256,
            3 => ColorLevel::TrueColor,
            _ => ColorLevel::None,
        }
    }

    fn to_u32(self) -> u32 {
        match self {
            ColorLevel::None => 0,
            ColorLevel::Ansi16 => 1,
            ColorLevel::Ansi256 => 2,
            ColorLevel::TrueColor => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Foreground,
    Background,
    HalfBlock,
}

impl RenderMode {
    fn from_u32(value: u32) -> Self {
        match value {
            1 => RenderMode::Background,
            2 => RenderMode::HalfBlock,
            _ => RenderMode::Foreground,
        }
    }

    fn to_u32(self) -> u32 {
        match self {
            RenderMode::Foreground => 0,
            RenderMode::Background => 1,
            RenderMode::HalfBlock => 2,
        }
    }
}

/// `palette_type` on the wire is a preset id, except for the reserved value `2`
/// which means "ignore the id, use the `palette_custom` string instead."
const WIRE_PALETTE_CUSTOM: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteType {
    Preset(u32),
    Custom,
}

pub const FLAG_VIDEO: u32 = 0x1;
pub const FLAG_AUDIO: u32 = 0x2;
pub const FLAG_COLOR: u32 = 0x4;
pub const FLAG_STRETCH: u32 = 0x8;
pub const FLAG_DITHER: u32 = 0x10;
/// Client understands the terminal `REP` sequence (`ESC [ n b`, SPEC_FULL.md
/// §4.8) and can have long runs of an identical glyph sent as one escape rather
/// than the glyph repeated literally.
pub const FLAG_REP: u32 = 0x20;

/// The fully-typed negotiated description of one participant's terminal
/// (SPEC_FULL.md §3). Constructed once from a `ClientCapabilitiesPayload` at
/// `ClientJoin` time and held immutably for the session's lifetime; a client that
/// wants to change capabilities reconnects rather than renegotiating mid-session.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub color_level: ColorLevel,
    pub color_count: u32,
    pub render_mode: RenderMode,
    pub utf8_support: bool,
    pub width: u16,
    pub height: u16,
    pub palette_type: PaletteType,
    pub palette_custom: String,
    pub desired_fps: u8,
    pub term_type: String,
    pub colorterm: String,
    pub wants_padding: bool,
    pub detection_reliable: bool,
    pub wants_video: bool,
    pub wants_audio: bool,
    pub wants_color: bool,
    pub stretch: bool,
    pub dither: bool,
    pub supports_rep: bool,
}

impl Capabilities {
    /// Clamps the desired FPS into the [5, 144] range required by the render
    /// scheduler's cadence clamp (SPEC_FULL.md §4.6).
    pub fn clamped_fps(&self) -> u8 {
        self.desired_fps.clamp(5, 144)
    }

    pub fn from_payload(payload: &ClientCapabilitiesPayload) -> Self {
        Self {
            color_level: ColorLevel::from_u32(payload.color_level),
            color_count: payload.color_count,
            render_mode: RenderMode::from_u32(payload.render_mode),
            utf8_support: payload.utf8_support != 0,
            width: payload.width.max(1),
            height: payload.height.max(1),
            palette_type: if payload.palette_type == WIRE_PALETTE_CUSTOM {
                PaletteType::Custom
            } else {
                PaletteType::Preset(payload.palette_type)
            },
            palette_custom: payload.palette_custom.clone(),
            desired_fps: payload.desired_fps,
            term_type: payload.term_type.clone(),
            colorterm: payload.colorterm.clone(),
            wants_padding: payload.wants_padding,
            detection_reliable: payload.detection_reliable,
            wants_video: payload.capabilities & FLAG_VIDEO != 0,
            wants_audio: payload.capabilities & FLAG_AUDIO != 0,
            wants_color: payload.capabilities & FLAG_COLOR != 0,
            stretch: payload.capabilities & FLAG_STRETCH != 0,
            dither: payload.capabilities & FLAG_DITHER != 0,
            supports_rep: payload.capabilities & FLAG_REP != 0,
        }
    }

    pub fn to_payload(&self) -> ClientCapabilitiesPayload {
        let mut capabilities = 0u32;
        if self.wants_video {
            capabilities |= FLAG_VIDEO;
        }
        if self.wants_audio {
            capabilities |= FLAG_AUDIO;
        }
        if self.wants_color {
            capabilities |= FLAG_COLOR;
        }
        if self.stretch {
            capabilities |= FLAG_STRETCH;
        }
        if self.dither {
            capabilities |= FLAG_DITHER;
        }
        if self.supports_rep {
            capabilities |= FLAG_REP;
        }
        let palette_type = match self.palette_type {
            PaletteType::Preset(id) => id,
            PaletteType::Custom => WIRE_PALETTE_CUSTOM,
        };
        ClientCapabilitiesPayload {
            capabilities,
            color_level: self.color_level.to_u32(),
            color_count: self.color_count,
            render_mode: self.render_mode.to_u32(),
            width: self.width,
            height: self.height,
            palette_type,
            utf8_support: self.utf8_support as u32,
            desired_fps: self.desired_fps,
            term_type: self.term_type.clone(),
            colorterm: self.colorterm.clone(),
            palette_custom: self.palette_custom.clone(),
            wants_padding: self.wants_padding,
            detection_reliable: self.detection_reliable,
        }
    }
}

/// A short UTF-8 display name (SPEC_FULL.md §3: `<= 32 bytes`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayName(String);

#[derive(Debug, thiserror::Error)]
#[error("display name exceeds 32 bytes")]
pub struct DisplayNameTooLong;

impl DisplayName {
    pub fn new(name: impl Into<String>) -> Result<Self, DisplayNameTooLong> {
        let name = name.into();
        if name.len() > 32 {
            return Err(DisplayNameTooLong);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> ClientCapabilitiesPayload {
        ClientCapabilitiesPayload {
            capabilities: FLAG_VIDEO | FLAG_AUDIO | FLAG_COLOR | FLAG_REP,
            color_level: 3,
            color_count: 16_777_216,
            render_mode: 2,
            width: 80,
            height: 24,
            palette_type: 0,
            utf8_support: 1,
            desired_fps: 30,
            term_type: "xterm-256color".to_string(),
            colorterm: "truecolor".to_string(),
            palette_custom: String::new(),
            wants_padding: false,
            detection_reliable: true,
        }
    }

    #[test]
    fn payload_round_trips_through_capabilities() {
        let payload = sample_payload();
        let caps = Capabilities::from_payload(&payload);
        assert_eq!(caps.color_level, ColorLevel::TrueColor);
        assert_eq!(caps.render_mode, RenderMode::HalfBlock);
        assert!(caps.wants_video && caps.wants_audio && caps.wants_color);
        assert!(caps.supports_rep);
        assert_eq!(caps.to_payload(), payload);
    }

    #[test]
    fn nonzero_preset_ids_are_distinct_from_custom() {
        let mut payload = sample_payload();
        payload.palette_type = 1;
        let caps = Capabilities::from_payload(&payload);
        assert_eq!(caps.palette_type, PaletteType::Preset(1));

        payload.palette_type = 2;
        payload.palette_custom = "#@".to_string();
        let caps = Capabilities::from_payload(&payload);
        assert_eq!(caps.palette_type, PaletteType::Custom);
        assert_eq!(caps.to_payload(), payload);
    }

    #[test]
    fn fps_is_clamped_into_range() {
        let mut payload = sample_payload();
        payload.desired_fps = 255;
        let caps = Capabilities::from_payload(&payload);
        assert_eq!(caps.clamped_fps(), 144);
    }

    #[test]
    fn display_name_rejects_overlong_names() {
        assert!(DisplayName::new("x".repeat(33)).is_err());
        assert!(DisplayName::new("short").is_ok());
    }
}
