//! Turns raw `href`/`src` values into absolute, navigable URLs.

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,
    #[error("could not parse '{value}': {source}")]
    Parse {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme '{scheme}' in '{value}'")]
    UnsupportedScheme { value: String, scheme: String },
}

/// Whether the value starts with `scheme:` (letter, then letters/digits/`+-.`)
pub fn has_scheme(value: &str) -> bool {
    let Some((scheme, _)) = value.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Resolve an article link against the site address
pub fn normalize_link(value: &str, base: &Url) -> Result<Url, UrlError> {
    resolve(value.trim(), base)
}

/// Resolve an image source against the site address.
///
/// Protocol-relative sources (`//cdn.example.com/a.jpg`) are pinned to https first.
pub fn normalize_image(value: &str, base: &Url) -> Result<Url, UrlError> {
    let value = value.trim();
    match value.strip_prefix("//") {
        Some(rest) => resolve(&format!("https://{rest}"), base),
        None => resolve(value, base),
    }
}

fn resolve(value: &str, base: &Url) -> Result<Url, UrlError> {
    if value.is_empty() {
        return Err(UrlError::Empty);
    }

    let parsed = if has_scheme(value) {
        Url::parse(value)
    } else {
        base.join(value)
    }
    .map_err(|source| UrlError::Parse {
        value: value.to_string(),
        source,
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(UrlError::UnsupportedScheme {
            value: value.to_string(),
            scheme: scheme.to_string(),
        }),
    }
}
