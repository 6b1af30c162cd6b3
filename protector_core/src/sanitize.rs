//! ANSI control-sequence sanitization for host-bound text.
//!
//! Terminal escape sequences in tool descriptions or results can repaint,
//! hide, or spoof content in the host's UI. Every text surface flowing
//! toward the host runs through [`sanitize`] first: tool descriptions on
//! `tools/list`, text content of tool results, and server instructions shown
//! in review output.
//!
//! Two modes:
//!
//! - [`AnsiMode::Strip`] (default) removes CSI sequences (`ESC [ … final`),
//!   OSC sequences (`ESC ] … BEL`/`ST`), remaining two-byte escape
//!   sequences, and control characters other than `\t`, `\n`, `\r`.
//! - [`AnsiMode::Visualize`] replaces the escape byte with the literal text
//!   `ESC` and keeps the rest of the sequence, so a reviewer sees exactly
//!   what the server sent.
//!
//! The sanitizer is pure. Hashing always runs on the unsanitized bytes, so
//! a server cannot dodge drift detection by toggling escape sequences.

const ESC: char = '\u{1b}';
const BEL: char = '\u{7}';

/// How host-bound text is cleaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnsiMode {
    #[default]
    Strip,
    Visualize,
}

/// Sanitizes one text surface for the host.
pub fn sanitize(text: &str, mode: AnsiMode) -> String {
    match mode {
        AnsiMode::Strip => strip(text),
        AnsiMode::Visualize => text.replace(ESC, "ESC"),
    }
}

fn strip(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == ESC {
            match chars.peek() {
                // CSI: ESC [ <parameter/intermediate bytes> <final byte>
                Some('[') => {
                    chars.next();
                    for follow in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&follow) {
                            break;
                        }
                    }
                }
                // OSC: ESC ] <payload> terminated by BEL or ST (ESC \)
                Some(']') => {
                    chars.next();
                    while let Some(follow) = chars.next() {
                        if follow == BEL {
                            break;
                        }
                        if follow == ESC {
                            if chars.peek() == Some(&'\\') {
                                chars.next();
                            }
                            break;
                        }
                    }
                }
                // Any other two-byte escape sequence.
                Some(_) => {
                    chars.next();
                }
                // Trailing lone ESC.
                None => {}
            }
            continue;
        }

        let keep = match ch {
            '\t' | '\n' | '\r' => true,
            c if c < ' ' => false,
            '\u{7f}' => false,
            // C1 control range.
            c if ('\u{80}'..='\u{9f}').contains(&c) => false,
            _ => true,
        };
        if keep {
            out.push(ch);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(sanitize("hello world", AnsiMode::Strip), "hello world");
        assert_eq!(sanitize("tabs\tand\nlines\r", AnsiMode::Strip), "tabs\tand\nlines\r");
    }

    #[test]
    fn csi_sequences_are_stripped() {
        assert_eq!(sanitize("\u{1b}[31mred\u{1b}[0m", AnsiMode::Strip), "red");
        assert_eq!(sanitize("a\u{1b}[2J\u{1b}[Hb", AnsiMode::Strip), "ab");
    }

    #[test]
    fn osc_sequences_are_stripped() {
        // BEL-terminated and ST-terminated title changes.
        assert_eq!(sanitize("a\u{1b}]0;evil\u{7}b", AnsiMode::Strip), "ab");
        assert_eq!(sanitize("a\u{1b}]8;;http://x\u{1b}\\b", AnsiMode::Strip), "ab");
    }

    #[test]
    fn two_byte_escapes_and_lone_esc_are_stripped() {
        assert_eq!(sanitize("a\u{1b}Mb", AnsiMode::Strip), "ab");
        assert_eq!(sanitize("trailing\u{1b}", AnsiMode::Strip), "trailing");
    }

    #[test]
    fn control_characters_other_than_whitespace_are_dropped() {
        assert_eq!(sanitize("a\u{8}b\u{0}c", AnsiMode::Strip), "abc");
        assert_eq!(sanitize("a\u{7f}b\u{9b}c", AnsiMode::Strip), "abc");
    }

    #[test]
    fn unterminated_sequences_do_not_leak_payload() {
        assert_eq!(sanitize("a\u{1b}[31", AnsiMode::Strip), "a");
        assert_eq!(sanitize("a\u{1b}]0;title", AnsiMode::Strip), "a");
    }

    #[test]
    fn visualize_exposes_the_escape_byte() {
        assert_eq!(
            sanitize("\u{1b}[31mred\u{1b}[0m", AnsiMode::Visualize),
            "ESC[31mredESC[0m"
        );
    }

    #[test]
    fn visualize_keeps_everything_else() {
        assert_eq!(sanitize("plain", AnsiMode::Visualize), "plain");
        assert_eq!(sanitize("a\u{8}b", AnsiMode::Visualize), "a\u{8}b");
    }
}
