//! Color markup translation.
//!
//! Game text carries color tags such as `%^RED%^` or `%^BOLD%^BLUE%^`.
//! A [`Markup`] implementation turns those into whatever the terminal
//! understands. Tags are delimited by `%^`; a lone `%^` that does not form
//! a tag is kept as literal text.

use crate::MarkupError;

const TAG: &str = "%^";

/// SGR foreground codes for the named colors.
const COLORS: &[(&str, u8)] = &[
    ("BLACK", 30),
    ("RED", 31),
    ("GREEN", 32),
    ("YELLOW", 33),
    ("BLUE", 34),
    ("MAGENTA", 35),
    ("CYAN", 36),
    ("WHITE", 37),
];

/// Translates color markup in outbound text.
pub trait Markup: Send + Sync + 'static {
    /// Returns `text` with every tag translated.
    ///
    /// # Errors
    /// Returns [`MarkupError::UnknownTag`] if the text contains a
    /// well-formed tag that is not in the color table.
    fn translate(&self, text: &str) -> Result<String, MarkupError>;
}

/// Translates tags into ANSI SGR escape sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiMarkup;

impl Markup for AnsiMarkup {
    fn translate(&self, text: &str) -> Result<String, MarkupError> {
        render(text, |out, style| match style {
            Style::Reset => out.push_str("\x1b[0m"),
            Style::Bold => out.push_str("\x1b[1m"),
            Style::Color(code) => {
                out.push_str(&format!("\x1b[{code}m"));
            }
            Style::BoldColor(code) => {
                out.push_str(&format!("\x1b[1;{code}m"));
            }
        })
    }
}

/// Removes tags entirely, for clients without color support.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainMarkup;

impl Markup for PlainMarkup {
    fn translate(&self, text: &str) -> Result<String, MarkupError> {
        render(text, |_, _| {})
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
    Reset,
    Bold,
    Color(u8),
    BoldColor(u8),
}

fn color_code(name: &str) -> Option<u8> {
    COLORS
        .iter()
        .find(|(color, _)| *color == name)
        .map(|(_, code)| *code)
}

fn is_tag_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_uppercase())
}

/// Walks `text`, copying literal runs and handing each tag to `emit`.
fn render(
    text: &str,
    mut emit: impl FnMut(&mut String, Style),
) -> Result<String, MarkupError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find(TAG) {
        out.push_str(&rest[..open]);
        let after = &rest[open + TAG.len()..];

        let Some(close) = after.find(TAG) else {
            // Unterminated opener: literal text.
            out.push_str(TAG);
            rest = after;
            continue;
        };

        let name = &after[..close];
        if !is_tag_name(name) {
            out.push_str(TAG);
            rest = after;
            continue;
        }

        let mut consumed = close + TAG.len();
        let style = match name {
            "RESET" => Style::Reset,
            "BOLD" => {
                // `%^BOLD%^BLUE%^` is one tag: bold plus a color.
                let tail = &after[consumed..];
                let color = tail
                    .find(TAG)
                    .and_then(|end| color_code(&tail[..end]).map(|c| (end, c)));
                match color {
                    Some((end, code)) => {
                        consumed += end + TAG.len();
                        Style::BoldColor(code)
                    }
                    None => Style::Bold,
                }
            }
            other => match color_code(other) {
                Some(code) => Style::Color(code),
                None => return Err(MarkupError::UnknownTag(other.to_string())),
            },
        };

        emit(&mut out, style);
        rest = &after[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(AnsiMarkup.translate("hello world").unwrap(), "hello world");
    }

    #[test]
    fn test_color_and_reset() {
        let out = AnsiMarkup.translate("%^RED%^danger%^RESET%^").unwrap();
        assert_eq!(out, "\x1b[31mdanger\x1b[0m");
    }

    #[test]
    fn test_bold_color_is_single_tag() {
        let out = AnsiMarkup.translate("%^BOLD%^BLUE%^sky").unwrap();
        assert_eq!(out, "\x1b[1;34msky");
    }

    #[test]
    fn test_bold_followed_by_text() {
        let out = AnsiMarkup.translate("%^BOLD%^loud%^RESET%^").unwrap();
        assert_eq!(out, "\x1b[1mloud\x1b[0m");
    }

    #[test]
    fn test_unknown_tag_is_error() {
        let err = AnsiMarkup.translate("%^PURPLE%^x").unwrap_err();
        assert_eq!(err, MarkupError::UnknownTag("PURPLE".into()));
    }

    #[test]
    fn test_stray_delimiters_are_literal() {
        assert_eq!(AnsiMarkup.translate("50%^ off").unwrap(), "50%^ off");
        assert_eq!(
            AnsiMarkup.translate("a %^lower%^ b").unwrap(),
            "a %^lower%^ b"
        );
    }

    #[test]
    fn test_unterminated_tag_is_literal() {
        assert_eq!(AnsiMarkup.translate("%^RED").unwrap(), "%^RED");
        assert_eq!(
            AnsiMarkup.translate("ok%^RESET%^ then %^BLUE").unwrap(),
            "ok\x1b[0m then %^BLUE"
        );
    }

    #[test]
    fn test_plain_markup_strips_tags() {
        let out = PlainMarkup
            .translate("%^GREEN%^Welcome%^RESET%^ to %^BOLD%^WHITE%^ORC")
            .unwrap();
        assert_eq!(out, "Welcome to ORC");
    }
}
