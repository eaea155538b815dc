//! Request cookie parsing

use percent_encoding::percent_decode_str;

/// Cookies sent with a request, in header order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: Vec<(String, String)>,
}

impl CookieJar {
    /// Parse one or more `Cookie` header values.
    ///
    /// Malformed pairs are skipped. Values are percent-decoded; a value that
    /// does not decode to UTF-8 is kept as sent.
    pub fn parse<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        let cookies = headers
            .into_iter()
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                let value = value.trim().trim_matches('"');
                Some((name.to_string(), percent_decode(value)))
            })
            .collect();

        Self { cookies }
    }

    /// First value sent for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Names of all cookies, first occurrence only
    pub fn names(&self) -> impl Iterator<Item = &str> {
        let mut seen = std::collections::HashSet::new();
        self.cookies
            .iter()
            .map(|(n, _)| n.as_str())
            .filter(move |n| seen.insert(*n))
    }

    /// Number of cookie pairs
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Whether no cookies were sent
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// Decode `%XX` escapes, keeping the raw value when the result is not UTF-8
fn percent_decode(value: &str) -> String {
    percent_decode_str(value)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let jar = CookieJar::parse(["a=1; b=two ; wordpress_logged_in=x"]);
        assert_eq!(jar.len(), 3);
        assert_eq!(jar.get("b"), Some("two"));
        assert_eq!(jar.get("missing"), None);
    }

    #[test]
    fn test_multiple_headers_and_duplicates() {
        let jar = CookieJar::parse(["a=1", "a=2; c=3"]);
        assert_eq!(jar.get("a"), Some("1"));
        assert_eq!(jar.names().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn test_percent_decoding() {
        let jar = CookieJar::parse([r#"cookie_consent=%7B%22accepted%22%3A%5B%5D%7D"#]);
        assert_eq!(jar.get("cookie_consent"), Some(r#"{"accepted":[]}"#));

        let jar = CookieJar::parse(["x=100%"]);
        assert_eq!(jar.get("x"), Some("100%"));
    }

    #[test]
    fn test_percent_escape_at_end_and_invalid_utf8() {
        let jar = CookieJar::parse(["dcc_consent_id=abc%2D%41; raw=%FF%FE"]);
        assert_eq!(jar.get("dcc_consent_id"), Some("abc-A"));
        assert_eq!(jar.get("raw"), Some("%FF%FE"));
    }

    #[test]
    fn test_malformed_pairs_skipped() {
        let jar = CookieJar::parse(["novalue; =empty; ok=1"]);
        assert_eq!(jar.len(), 1);
        assert_eq!(jar.get("ok"), Some("1"));
    }
}
