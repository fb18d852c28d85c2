//! TSL tally datagram codec.
//!
//! Each UDP datagram carries exactly one display update:
//!
//! ```text
//! ┌────────┬─────────┬──────────────────────────────┐
//! │ byte 0 │ byte 1  │ bytes 2..=16                 │
//! │ 128+a  │ 00bbssss│ 15-byte ASCII label, padded  │
//! └────────┴─────────┴──────────────────────────────┘
//!   a = address (0..=126), b = brightness level (0..=3), s = state code
//! ```
//!
//! Decoding is pure and bounded: only the first [`PACKET_LEN`] bytes are
//! ever inspected, extra trailing bytes are ignored.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Bytes the format requires. Shorter datagrams never decode.
pub const PACKET_LEN: usize = 17;

/// Fixed width of the display label.
pub const LABEL_LEN: usize = 15;

/// Added to the address on the wire.
pub const ADDRESS_OFFSET: u8 = 128;

/// Highest addressable receiver.
pub const MAX_ADDRESS: u8 = 126;

/// Highest 2-bit brightness level.
pub const MAX_BRIGHTNESS_LEVEL: u8 = 3;

const STATE_MASK: u8 = 0b0000_1111;
const BRIGHTNESS_MASK: u8 = 0b0011_0000;
const BRIGHTNESS_SHIFT: u8 = 4;

// ── TallyState ───────────────────────────────────────────────────────

/// The four discrete display states a receiver can show.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum TallyState {
    #[default]
    Off,
    Program,
    Preview,
    Unselected,
}

impl TallyState {
    pub const ALL: [Self; 4] = [Self::Off, Self::Program, Self::Preview, Self::Unselected];

    /// Map a wire state code. The upstream feed is not strictly validated,
    /// so every code outside `0..=3` is shown as `Off`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Program,
            2 => Self::Preview,
            3 => Self::Unselected,
            _ => Self::Off,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Program => 1,
            Self::Preview => 2,
            Self::Unselected => 3,
        }
    }
}

// ── Label ────────────────────────────────────────────────────────────

/// Fixed-capacity display label (at most [`LABEL_LEN`] ASCII bytes).
///
/// Stored inline so a decoded command never allocates.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    bytes: [u8; LABEL_LEN],
    len: u8,
}

impl Label {
    pub const EMPTY: Self = Self {
        bytes: [b' '; LABEL_LEN],
        len: 0,
    };

    /// Build a label from free text. Non-printable and non-ASCII characters
    /// become `?`, input longer than [`LABEL_LEN`] is truncated.
    pub fn new(text: &str) -> Self {
        let mut bytes = [b' '; LABEL_LEN];
        let mut len = 0;
        for (slot, byte) in bytes.iter_mut().zip(text.bytes()) {
            *slot = sanitize(byte);
            len += 1;
        }
        Self::trimmed(bytes, len)
    }

    fn from_wire(raw: [u8; LABEL_LEN]) -> Self {
        Self::trimmed(raw.map(sanitize_wire), LABEL_LEN)
    }

    /// Strip trailing padding (spaces, and NULs some switchers send).
    fn trimmed(bytes: [u8; LABEL_LEN], mut len: usize) -> Self {
        while len > 0 && matches!(bytes.get(len - 1), Some(&(b' ' | 0))) {
            len -= 1;
        }
        let mut padded = [b' '; LABEL_LEN];
        padded
            .iter_mut()
            .zip(bytes.iter().take(len))
            .for_each(|(dst, src)| *dst = *src);
        Self {
            bytes: padded,
            len: u8::try_from(len).unwrap_or(0),
        }
    }

    pub fn as_str(&self) -> &str {
        let visible = self.bytes.get(..usize::from(self.len)).unwrap_or_default();
        std::str::from_utf8(visible).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The label space-padded to the full wire width.
    pub fn padded(&self) -> [u8; LABEL_LEN] {
        self.bytes
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

fn sanitize(byte: u8) -> u8 {
    if byte == b' ' || byte.is_ascii_graphic() {
        byte
    } else {
        b'?'
    }
}

fn sanitize_wire(byte: u8) -> u8 {
    // NUL is padding on the wire, keep it so trimming can see it.
    if byte == 0 { 0 } else { sanitize(byte) }
}

// ── TallyCommand ─────────────────────────────────────────────────────

/// One decoded display update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TallyCommand {
    /// Receiver address, `0..=126`.
    pub address: u8,
    pub state: TallyState,
    /// Raw 2-bit brightness level, `0..=3`.
    pub brightness_level: u8,
    pub text: Label,
}

impl TallyCommand {
    pub fn new(address: u8, state: TallyState, brightness_level: u8, text: &str) -> Self {
        Self {
            address: address.min(MAX_ADDRESS),
            state,
            brightness_level: brightness_level.min(MAX_BRIGHTNESS_LEVEL),
            text: Label::new(text),
        }
    }

    /// Brightness on the indicator's scale, see [`scale_brightness`].
    pub fn brightness(&self, max_brightness: u8) -> u8 {
        scale_brightness(self.brightness_level, max_brightness)
    }

    /// Serialize to the 17-byte wire form.
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut packet = [b' '; PACKET_LEN];
        let [address, control, label @ ..] = &mut packet;
        *address = ADDRESS_OFFSET + self.address.min(MAX_ADDRESS);
        *control = (self.brightness_level.min(MAX_BRIGHTNESS_LEVEL) << BRIGHTNESS_SHIFT)
            | self.state.code();
        *label = self.text.padded();
        packet
    }
}

/// Linear map of a 2-bit level onto `0..=max_brightness`, floor rounding.
pub fn scale_brightness(level: u8, max_brightness: u8) -> u8 {
    let level = u16::from(level.min(MAX_BRIGHTNESS_LEVEL));
    let scaled = level * u16::from(max_brightness) / u16::from(MAX_BRIGHTNESS_LEVEL);
    u8::try_from(scaled).unwrap_or(max_brightness)
}

// ── Decoding ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("datagram too short: {len} bytes, need {PACKET_LEN}")]
    TooShort { len: usize },

    #[error("invalid address byte {raw:#04x}")]
    InvalidAddress { raw: u8 },
}

/// Decode one tally datagram.
pub fn decode(packet: &[u8]) -> Result<TallyCommand, DecodeError> {
    let frame: &[u8; PACKET_LEN] = packet
        .get(..PACKET_LEN)
        .and_then(|head| head.try_into().ok())
        .ok_or(DecodeError::TooShort { len: packet.len() })?;
    let [raw_address, control, label @ ..] = *frame;

    let address = raw_address
        .checked_sub(ADDRESS_OFFSET)
        .filter(|a| *a <= MAX_ADDRESS)
        .ok_or(DecodeError::InvalidAddress { raw: raw_address })?;

    Ok(TallyCommand {
        address,
        state: TallyState::from_code(control & STATE_MASK),
        brightness_level: (control & BRIGHTNESS_MASK) >> BRIGHTNESS_SHIFT,
        text: Label::from_wire(label),
    })
}
