//! Inbound text cleanup and word wrapping.
//!
//! Telnet clients send more than the typed line: option negotiation,
//! stray control bytes, and whatever line ending the client prefers.
//! [`clean_input`] reduces one received chunk to the text the player
//! meant, wrapped to their terminal width.

/// Telnet "interpret as command" escape.
pub const IAC: u8 = 255;
/// Start of subnegotiation.
const SB: u8 = 250;
/// End of subnegotiation.
const SE: u8 = 240;
/// First of the three-byte option commands (WILL, WONT, DO, DONT).
const WILL: u8 = 251;

/// Removes telnet command sequences from raw input.
///
/// Handles `IAC IAC` (escaped 0xFF, dropped since it is never text),
/// `IAC SB ... IAC SE` subnegotiations, three-byte option negotiation,
/// and two-byte commands. A trailing partial sequence is discarded.
pub fn strip_telnet(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] != IAC {
            out.push(raw[i]);
            i += 1;
            continue;
        }
        match raw.get(i + 1).copied() {
            Some(SB) => {
                // Skip to the matching IAC SE.
                let mut j = i + 2;
                while j + 1 < raw.len() && !(raw[j] == IAC && raw[j + 1] == SE) {
                    j += 1;
                }
                i = j + 2;
            }
            Some(IAC) => i += 2,
            Some(cmd) if cmd >= WILL => i += 3,
            Some(_) => i += 2,
            None => i += 1,
        }
    }
    out
}

/// Turns one received chunk into a clean, wrapped line of text.
///
/// Telnet sequences are removed, bytes are decoded as lossy UTF-8, every
/// control character except `\n` and `\r` is dropped, surrounding
/// whitespace is trimmed, and the result is wrapped at `width` columns.
pub fn clean_input(raw: &[u8], width: usize) -> String {
    let bytes = strip_telnet(raw);
    let decoded = String::from_utf8_lossy(&bytes);
    let printable: String = decoded
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\r')
        .collect();
    wrap(printable.trim(), width)
}

/// Word-wraps every line of `text` at `width` columns.
///
/// Existing line breaks are kept. Words longer than `width` are split.
/// A `width` of zero disables wrapping.
pub fn wrap(text: &str, width: usize) -> String {
    let mut out = String::with_capacity(text.len());
    for (n, line) in text.lines().enumerate() {
        if n > 0 {
            out.push('\n');
        }
        for (m, piece) in wrapped(line, width).enumerate() {
            if m > 0 {
                out.push('\n');
            }
            out.push_str(piece);
        }
    }
    out
}

/// Lazily wraps a single line, yielding one slice per output row.
pub fn wrapped(line: &str, width: usize) -> Wrapped<'_> {
    Wrapped { rest: line, width }
}

/// Iterator returned by [`wrapped`].
#[derive(Debug, Clone)]
pub struct Wrapped<'a> {
    rest: &'a str,
    width: usize,
}

impl<'a> Iterator for Wrapped<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let rest = self.rest.trim_start_matches(' ');
        if rest.is_empty() {
            self.rest = rest;
            return None;
        }
        if self.width == 0 || rest.chars().count() <= self.width {
            self.rest = "";
            return Some(rest.trim_end());
        }

        // Byte offset of the first character past the width.
        let cut = rest
            .char_indices()
            .nth(self.width)
            .map_or(rest.len(), |(i, _)| i);
        let split = if rest[cut..].starts_with(' ') {
            cut
        } else {
            rest[..cut].rfind(' ').filter(|&i| i > 0).unwrap_or(cut)
        };

        let (row, tail) = rest.split_at(split);
        self.rest = tail;
        Some(row.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_option_negotiation() {
        // IAC DO ECHO, then "hi"
        let raw = [IAC, 253, 1, b'h', b'i'];
        assert_eq!(strip_telnet(&raw), b"hi");
    }

    #[test]
    fn test_strip_subnegotiation() {
        // IAC SB NAWS 0 80 0 24 IAC SE "ok"
        let raw = [IAC, SB, 31, 0, 80, 0, 24, IAC, SE, b'o', b'k'];
        assert_eq!(strip_telnet(&raw), b"ok");
    }

    #[test]
    fn test_strip_truncated_sequence() {
        assert_eq!(strip_telnet(&[b'a', IAC]), b"a");
        assert_eq!(strip_telnet(&[b'a', IAC, 251]), b"a");
    }

    #[test]
    fn test_clean_input_trims_line_ending() {
        assert_eq!(clean_input(b"alice\r\n", 80), "alice");
    }

    #[test]
    fn test_clean_input_drops_control_bytes() {
        assert_eq!(clean_input(b"al\x07ic\x1be\r\n", 80), "alice");
    }

    #[test]
    fn test_clean_input_whitespace_only_is_empty() {
        assert_eq!(clean_input(b"  \r\n\t", 80), "");
    }

    #[test]
    fn test_wrap_breaks_on_word_boundary() {
        let out = wrap("the quick brown fox", 10);
        assert_eq!(out, "the quick\nbrown fox");
    }

    #[test]
    fn test_wrap_splits_long_words() {
        let out = wrap("abcdefghij", 4);
        assert_eq!(out, "abcd\nefgh\nij");
    }

    #[test]
    fn test_wrap_keeps_existing_lines() {
        let out = wrap("one\r\ntwo", 80);
        assert_eq!(out, "one\ntwo");
    }

    #[test]
    fn test_wrap_zero_width_disables() {
        let text = "a very long line that would otherwise wrap";
        assert_eq!(wrap(text, 0), text);
    }

    #[test]
    fn test_wrapped_is_lazy_iterator() {
        let mut rows = wrapped("aa bb cc", 5);
        assert_eq!(rows.next(), Some("aa bb"));
        assert_eq!(rows.next(), Some("cc"));
        assert_eq!(rows.next(), None);
    }
}
