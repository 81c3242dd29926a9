//! Payload Decoder
//!
//! Turns inbound notification payloads into display-safe text for the
//! session log.
//!
//! # Classification (first match wins)
//!
//! ```text
//! every byte in 0..=9        -> "1 2 3"      (raw sensor/counter values)
//! every byte in '0'..='9'    -> "123"        (ASCII digits)
//! valid UTF-8                -> text as-is   (escaped copy for diagnostics)
//! anything else              -> "[DE][AD]"   (bracketed uppercase hex)
//! ```

use crate::domain::models::SessionLog;
use std::fmt::Write;

/// Shown in the log when a payload decodes to nothing displayable
pub const DEFAULT_PLACEHOLDER: &str = "·";

/// Visible marker substituted for spaces in the escaped rendering
const VISIBLE_SPACE: char = '␣';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    SmallIntegers,
    AsciiDigits,
    Utf8Text,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayload {
    pub kind: PayloadKind,
    /// Text destined for the session log (untrimmed)
    pub text: String,
    /// Escaped rendering of UTF-8 payloads, diagnostics only
    pub escaped: Option<String>,
}

/// Classify and convert a raw payload
pub fn decode(bytes: &[u8]) -> DecodedPayload {
    if !bytes.is_empty() && bytes.iter().all(|b| *b <= 9) {
        let text = bytes
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        return DecodedPayload {
            kind: PayloadKind::SmallIntegers,
            text,
            escaped: None,
        };
    }

    if !bytes.is_empty() && bytes.iter().all(u8::is_ascii_digit) {
        // ASCII digits are always valid UTF-8
        let text = String::from_utf8_lossy(bytes).into_owned();
        return DecodedPayload {
            kind: PayloadKind::AsciiDigits,
            text,
            escaped: None,
        };
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => DecodedPayload {
            kind: PayloadKind::Utf8Text,
            text: text.to_string(),
            escaped: Some(escape_visible(bytes)),
        },
        Err(_) => DecodedPayload {
            kind: PayloadKind::Binary,
            text: hex_tokens(bytes),
            escaped: None,
        },
    }
}

/// Byte-wise rendering with control characters made visible
pub fn escape_visible(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            0x00 => out.push_str("\\0"),
            b'\t' => out.push_str("\\t"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b' ' => out.push(VISIBLE_SPACE),
            33..=126 => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{:02X}", b);
            }
        }
    }
    out
}

/// `[DE][AD]` style rendering
pub fn hex_tokens(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for b in bytes {
        let _ = write!(out, "[{:02X}]", b);
    }
    out
}

impl SessionLog {
    /// Append a decoded fragment, applying the display rules:
    ///
    /// - whitespace-only fragments append `placeholder` and leave `last_value` alone
    /// - a single-character fragment gets a separating space unless the log
    ///   is empty or already ends in whitespace
    /// - the untrimmed fragment goes into the log, the trimmed one into `last_value`
    pub fn append_fragment(&mut self, fragment: &str, placeholder: &str) {
        let trimmed = fragment.trim();
        if trimmed.is_empty() {
            self.received_text.push_str(placeholder);
            return;
        }

        if fragment.chars().count() == 1
            && !self.received_text.is_empty()
            && !self.received_text.ends_with(char::is_whitespace)
        {
            self.received_text.push(' ');
        }

        self.received_text.push_str(fragment);
        self.last_value = Some(trimmed.to_string());
    }
}

/// Parse user-entered hex (`"DE AD"`, `"dead"`, `"0xDE 0xAD"`) into bytes
pub fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    for token in input.split_whitespace() {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.is_empty() || digits.len() % 2 != 0 || !digits.is_ascii() {
            return Err(format!("invalid hex token '{}'", token));
        }
        for pair in digits.as_bytes().chunks(2) {
            // chunks of an ASCII string are valid UTF-8
            let pair = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
            let byte = u8::from_str_radix(pair, 16)
                .map_err(|_| format!("invalid hex token '{}'", token))?;
            bytes.push(byte);
        }
    }
    if bytes.is_empty() {
        return Err("no bytes to send".to_string());
    }
    Ok(bytes)
}
