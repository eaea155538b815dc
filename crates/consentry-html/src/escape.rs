//! Attribute value encoding
//!
//! `lol_html` hands attribute values back as they appear in the markup, with
//! character references intact. Rules compare decoded values; rewritten
//! attributes are written back encoded.

use std::borrow::Cow;

/// Decode character references in an attribute value.
///
/// Handles the common named references and numeric references. Anything
/// that is not a terminated, known reference is kept literally.
pub fn decode_entities(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        match decode_reference(rest) {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Decode one reference at the start of `s` (which begins with `&`)
fn decode_reference(s: &str) -> Option<(char, usize)> {
    // longest reference we recognise is `&#x10FFFF;`
    let window = s.get(1..s.len().min(11)).unwrap_or("");
    let end = window.find(';')? + 1;
    let body = &s[1..end];

    let ch = if let Some(num) = body.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        char::from_u32(code)?
    } else {
        match body {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            "nbsp" => '\u{a0}',
            _ => return None,
        }
    };
    Some((ch, end + 1))
}

/// Encode a plain value for a double-quoted attribute
pub fn attr_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    escape_attr(value, &mut out);
    out
}

/// Escape a value for a double-quoted attribute
pub fn escape_attr(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

/// Carry a value read from markup into a double-quoted attribute.
///
/// References in `raw` are already encoded; only a bare `"` (possible in a
/// single-quoted or unquoted original) needs encoding.
pub fn requote(raw: &str) -> Cow<'_, str> {
    if raw.contains('"') {
        Cow::Owned(raw.replace('"', "&quot;"))
    } else {
        Cow::Borrowed(raw)
    }
}

/// Escape text content
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

/// Escape a value for a single-quoted JavaScript string literal
pub fn escape_js_single(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        assert_eq!(decode_entities("a&amp;b"), "a&b");
        assert_eq!(decode_entities("&lt;&#62;&#x27;"), "<>'");
        assert_eq!(decode_entities("?a=1&b=2"), "?a=1&b=2");
        assert_eq!(decode_entities("&unknown;"), "&unknown;");
        assert_eq!(decode_entities("trailing &"), "trailing &");
        assert_eq!(decode_entities("&#xZZ;"), "&#xZZ;");
        assert_eq!(decode_entities("&é;"), "&é;");
    }

    #[test]
    fn test_decode_borrows_when_possible() {
        assert!(matches!(decode_entities("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_escape_attr() {
        assert_eq!(
            attr_value(r#"alert("x") && 1<2"#),
            "alert(&quot;x&quot;) &amp;&amp; 1&lt;2"
        );
    }

    #[test]
    fn test_requote_keeps_references() {
        assert_eq!(requote("/t?a=1&amp;b=2"), "/t?a=1&amp;b=2");
        assert_eq!(requote(r#"say "hi""#), "say &quot;hi&quot;");
    }

    #[test]
    fn test_escape_js() {
        assert_eq!(escape_js_single("it's"), "it\\'s");
    }
}
