use std::borrow::Cow;

/// Named HTML entities feeds use in practice. The five XML builtins come
/// first; the rest cover typography and Latin-1 letters common in titles.
const NAMED_ENTITIES: &[(&str, char)] = &[
    ("amp", '&'),
    ("lt", '<'),
    ("gt", '>'),
    ("quot", '"'),
    ("apos", '\''),
    ("nbsp", '\u{a0}'),
    ("ndash", '\u{2013}'),
    ("mdash", '\u{2014}'),
    ("lsquo", '\u{2018}'),
    ("rsquo", '\u{2019}'),
    ("sbquo", '\u{201a}'),
    ("ldquo", '\u{201c}'),
    ("rdquo", '\u{201d}'),
    ("bdquo", '\u{201e}'),
    ("hellip", '\u{2026}'),
    ("bull", '\u{2022}'),
    ("middot", '\u{b7}'),
    ("copy", '\u{a9}'),
    ("reg", '\u{ae}'),
    ("trade", '\u{2122}'),
    ("deg", '\u{b0}'),
    ("euro", '\u{20ac}'),
    ("pound", '\u{a3}'),
    ("yen", '\u{a5}'),
    ("cent", '\u{a2}'),
    ("sect", '\u{a7}'),
    ("para", '\u{b6}'),
    ("times", '\u{d7}'),
    ("divide", '\u{f7}'),
    ("laquo", '\u{ab}'),
    ("raquo", '\u{bb}'),
    ("iexcl", '\u{a1}'),
    ("iquest", '\u{bf}'),
    ("agrave", '\u{e0}'),
    ("aacute", '\u{e1}'),
    ("acirc", '\u{e2}'),
    ("auml", '\u{e4}'),
    ("ccedil", '\u{e7}'),
    ("egrave", '\u{e8}'),
    ("eacute", '\u{e9}'),
    ("ecirc", '\u{ea}'),
    ("euml", '\u{eb}'),
    ("iacute", '\u{ed}'),
    ("iuml", '\u{ef}'),
    ("ntilde", '\u{f1}'),
    ("oacute", '\u{f3}'),
    ("ouml", '\u{f6}'),
    ("uacute", '\u{fa}'),
    ("uuml", '\u{fc}'),
    ("szlig", '\u{df}'),
    ("Eacute", '\u{c9}'),
    ("Auml", '\u{c4}'),
    ("Ouml", '\u{d6}'),
    ("Uuml", '\u{dc}'),
];

/// Longest entity body we bother looking up (`&` and `;` excluded).
const MAX_ENTITY_LEN: usize = 10;

/// Decode HTML entities: the named table above plus `&#NNN;` and `&#xHH;`.
///
/// Unknown or malformed references are left as written, so text that merely
/// contains an ampersand survives untouched. Returns `Cow::Borrowed` when
/// there is nothing to decode.
///
/// # Examples
///
/// ```
/// use tidings::util::decode_entities;
///
/// assert_eq!(decode_entities("Tom &amp; Jerry"), "Tom & Jerry");
/// assert_eq!(decode_entities("&#8220;hi&#x201D;"), "\u{201c}hi\u{201d}");
/// assert_eq!(decode_entities("AT&T"), "AT&T");
/// ```
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];

        let decoded = tail
            .find(';')
            .filter(|&end| end > 0 && end <= MAX_ENTITY_LEN)
            .and_then(|end| decode_reference(&tail[..end]).map(|c| (c, end)));

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);

    Cow::Owned(out)
}

fn decode_reference(body: &str) -> Option<char> {
    if let Some(numeric) = body.strip_prefix('#') {
        let code = match numeric.strip_prefix(|c: char| c == 'x' || c == 'X') {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }

    NAMED_ENTITIES
        .iter()
        .find(|(name, _)| *name == body)
        .map(|&(_, c)| c)
}

/// SEC-001: Strip control characters and ANSI escape sequences from feed text.
///
/// Feed titles and folder names are attacker-controlled and end up in
/// terminals and logs. Removes C0 controls except tab/newline/CR, DEL, and
/// whole CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL|ST`) sequences.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| c == '\x7f' || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'));

    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if !is_control(c) {
                out.push(c);
            }
            continue;
        }

        match chars.peek() {
            Some('[') => {
                chars.next();
                // parameter and intermediate bytes run until a final byte in 0x40..=0x7e
                for c in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    Cow::Owned(out)
}

/// Decode entities, strip controls and trim in one go.
///
/// This is the normalisation applied to every human-readable field the
/// parser hands out (titles, authors, summaries).
pub fn clean_text(s: &str) -> String {
    let decoded = decode_entities(s);
    strip_control_chars(&decoded).trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_named_entities() {
        assert_eq!(decode_entities("a &lt;b&gt; &quot;c&quot;"), "a <b> \"c\"");
        assert_eq!(decode_entities("caf&eacute;&nbsp;x"), "caf\u{e9}\u{a0}x");
        assert_eq!(decode_entities("wait&hellip;"), "wait\u{2026}");
    }

    #[test]
    fn test_decode_numeric_entities() {
        assert_eq!(decode_entities("&#39;quoted&#39;"), "'quoted'");
        assert_eq!(decode_entities("&#x2014;"), "\u{2014}");
        assert_eq!(decode_entities("&#X41;"), "A");
    }

    #[test]
    fn test_decode_leaves_unknown_references() {
        assert_eq!(decode_entities("&bogus; &"), "&bogus; &");
        assert_eq!(decode_entities("R&D; stuff"), "R&D; stuff");
        assert_eq!(decode_entities("&#xZZ;"), "&#xZZ;");
        // surrogate code points are not chars
        assert_eq!(decode_entities("&#xD800;"), "&#xD800;");
    }

    #[test]
    fn test_decode_clean_text_is_borrowed() {
        assert!(matches!(decode_entities("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_decode_double_escaped_once() {
        assert_eq!(decode_entities("&amp;amp;"), "&amp;");
    }

    #[test]
    fn test_strip_clean_text_returns_borrowed() {
        assert!(matches!(strip_control_chars("Hello"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_preserves_tabs_newlines_cr() {
        assert_eq!(strip_control_chars("a\tb\nc\rd"), "a\tb\nc\rd");
    }

    #[test]
    fn test_strip_ansi_color_codes() {
        assert_eq!(strip_control_chars("\x1b[31mRed\x1b[0m text"), "Red text");
    }

    #[test]
    fn test_strip_osc_sequences() {
        assert_eq!(strip_control_chars("\x1b]0;title\x07after"), "after");
        assert_eq!(strip_control_chars("\x1b]0;title\x1b\\after"), "after");
    }

    #[test]
    fn test_strip_bare_controls() {
        assert_eq!(strip_control_chars("a\x00b\x7fc\x1bd"), "abcd");
    }

    #[test]
    fn test_clean_text_trims_and_decodes() {
        assert_eq!(clean_text("  Tom &amp; Jerry\x07 "), "Tom & Jerry");
    }

    proptest! {
        #[test]
        fn prop_decode_without_ampersand_is_identity(s in "[^&]*") {
            prop_assert_eq!(decode_entities(&s), s.as_str());
        }

        #[test]
        fn prop_strip_output_has_no_controls(s in "\\PC*|[\\x00-\\x1f]*") {
            let out = strip_control_chars(&s);
            prop_assert!(!out.chars().any(|c| c == '\x1b' || c == '\x7f'
                || (c < ' ' && !matches!(c, '\t' | '\n' | '\r'))));
        }
    }
}
