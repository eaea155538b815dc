//! Per-request context

use axum::http::{header, HeaderMap, Uri};
use consentry_consent::{ConsentToken, CookieJar};

use crate::config::{BlockingConfig, ConsentConfig};

/// What the output pipeline knows about one request.
///
/// Flags that only live for the duration of a request are kept here instead of
/// in shared state.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    request_id: String,
    path: String,
    query: Vec<(String, String)>,
    cookies: CookieJar,
    is_admin: bool,
    transformed: bool,
}

impl RequestContext {
    /// Context for a request to `path` without query or cookies
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Build a context from the request URI and headers
    pub fn from_parts(uri: &Uri, headers: &HeaderMap) -> Self {
        let cookie_headers = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok());

        let mut ctx = Self::new(uri.path()).with_cookies(CookieJar::parse(cookie_headers));
        if let Some(query) = uri.query() {
            ctx = ctx.with_query(query);
        }
        if let Some(id) = headers
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .filter(|id| !id.is_empty())
        {
            ctx.request_id = id.to_string();
        }
        ctx
    }

    /// Set the decoded query string
    pub fn with_query(mut self, query: &str) -> Self {
        self.query = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        self
    }

    pub fn with_cookies(mut self, cookies: CookieJar) -> Self {
        self.cookies = cookies;
        self
    }

    /// Mark the request as coming from the site's administration area
    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// First value of query parameter `name`
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    /// Consent token carried by the request cookies
    pub fn token(&self, consent: &ConsentConfig) -> ConsentToken {
        ConsentToken::from_cookies(
            &self.cookies,
            &consent.cookie_name,
            &consent.consent_id_cookie_name,
        )
    }

    /// Whether the request comes from an administration or editing context.
    ///
    /// Editors must always see their own markup, so such requests are never
    /// rewritten.
    pub fn is_editor_context(&self, blocking: &BlockingConfig) -> bool {
        if self.is_admin {
            return true;
        }

        if blocking
            .admin_path_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && self.path.starts_with(prefix.as_str()))
        {
            return true;
        }

        let editor_param = blocking.editor_query_params.iter().any(|param| {
            match param.split_once('=') {
                Some((key, expected)) => self.query_param(key) == Some(expected),
                None => self.query_param(param).is_some(),
            }
        });
        if editor_param {
            return true;
        }

        self.cookies.names().any(|name| {
            blocking
                .editor_cookie_prefixes
                .iter()
                .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
        })
    }

    /// Whether the body of this request has already been rewritten
    pub fn is_transformed(&self) -> bool {
        self.transformed
    }

    pub(crate) fn mark_transformed(&mut self) {
        self.transformed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn blocking() -> BlockingConfig {
        BlockingConfig::default()
    }

    #[test]
    fn test_from_parts() {
        let uri: Uri = "/blog/post?utm_source=x&page=2".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("a=1; b=2"));
        headers.insert("x-request-id", HeaderValue::from_static("req-42"));

        let ctx = RequestContext::from_parts(&uri, &headers);
        assert_eq!(ctx.path(), "/blog/post");
        assert_eq!(ctx.query_param("page"), Some("2"));
        assert_eq!(ctx.cookies().get("b"), Some("2"));
        assert_eq!(ctx.request_id(), "req-42");
        assert!(!ctx.is_transformed());
    }

    #[test]
    fn test_admin_paths_are_editor_context() {
        assert!(RequestContext::new("/wp-admin/post.php").is_editor_context(&blocking()));
        assert!(RequestContext::new("/wp-login.php").is_editor_context(&blocking()));
        assert!(!RequestContext::new("/about").is_editor_context(&blocking()));
        assert!(RequestContext::new("/about")
            .with_admin(true)
            .is_editor_context(&blocking()));
    }

    #[test]
    fn test_builder_query_params() {
        let builder = RequestContext::new("/").with_query("et_fb=1&PageSpeed=off");
        assert!(builder.is_editor_context(&blocking()));

        let other_value = RequestContext::new("/").with_query("et_fb=0");
        assert!(!other_value.is_editor_context(&blocking()));

        let customizer = RequestContext::new("/").with_query("customize_changeset_uuid=abc-123");
        assert!(customizer.is_editor_context(&blocking()));
    }

    #[test]
    fn test_editor_cookie_prefix() {
        let config = BlockingConfig {
            editor_cookie_prefixes: vec!["wordpress_logged_in_".to_string()],
            ..Default::default()
        };
        let ctx = RequestContext::new("/")
            .with_cookies(CookieJar::parse(["wordpress_logged_in_abc=editor%7C123"]));
        assert!(ctx.is_editor_context(&config));
        assert!(!ctx.is_editor_context(&blocking()));
    }

    #[test]
    fn test_token_uses_configured_cookies() {
        let ctx = RequestContext::new("/")
            .with_cookies(CookieJar::parse(["cookie_consent=not-json; dcc_consent_id=abc"]));
        let token = ctx.token(&ConsentConfig::default());
        assert!(token.is_malformed());
        assert_eq!(token.consent_id(), Some("abc"));
    }
}
