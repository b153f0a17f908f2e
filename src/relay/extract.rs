//! Response extractor.
//!
//! JSON shapes (text answers, image sets) are checked field by field. Media
//! links are scraped from HTML by an ordered list of strategies, one per known
//! page layout; the first one that yields an absolute URL wins.

use super::{RawResponse, RelayResult};
use lazy_regex::regex;
use reqwest::Url;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Field carrying the success indicator in text answers.
const SUCCESS_FIELD: &str = "successful";
/// Numeric status field that must be 200 in text answers.
const STATUS_FIELD: &str = "status";
/// Field carrying the answer text.
const ANSWER_FIELD: &str = "response";
/// Field carrying image URLs.
const IMAGES_FIELD: &str = "images";

/// What the caller expects the upstream to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedShape {
    /// JSON with a success flag and an answer string.
    Text,
    /// JSON with an array of image URLs.
    ImageSet,
    /// HTML page exposing a direct media URL.
    MediaLink,
}

/// Why extraction failed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExtractionError {
    /// Body was not valid JSON.
    #[error("upstream payload is not valid JSON: {0}")]
    Malformed(String),
    /// Success indicator missing or negative.
    #[error("upstream reported failure: {0}")]
    Unsuccessful(String),
    /// Success reported but no answer text.
    #[error("no answer")]
    NoAnswer,
    /// Image field absent, wrong type or empty.
    #[error("no images: {0}")]
    NoImages(String),
    /// An entry that should be a URL is not one.
    #[error("invalid media URL: {0}")]
    InvalidUrl(String),
    /// Every scraping strategy came up empty.
    #[error("source page did not expose a media URL")]
    NoMediaUrl,
}

/// A media URL found on a page, with an optional title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapedMedia {
    /// Raw URL as found on the page.
    pub url: String,
    /// Title for the caption.
    pub title: Option<String>,
}

/// A single page-layout strategy.
pub type MediaStrategy = fn(&str) -> Option<ScrapedMedia>;

/// Scraping strategies in priority order.
pub const MEDIA_STRATEGIES: &[(&str, MediaStrategy)] = &[
    ("meta_tag", from_meta_tag),
    ("ld_json", from_ld_json),
    ("legacy_shared_data", from_legacy_script),
];

/// Extracts the semantic answer from `raw`.
///
/// # Errors
///
/// Returns an [`ExtractionError`] when the payload does not have the expected shape.
pub fn extract(raw: &RawResponse, shape: ExpectedShape) -> Result<RelayResult, ExtractionError> {
    match shape {
        ExpectedShape::Text => extract_text(&parse_json(raw)?),
        ExpectedShape::ImageSet => extract_images(&parse_json(raw)?),
        ExpectedShape::MediaLink => extract_media_link(&raw.body),
    }
}

fn parse_json(raw: &RawResponse) -> Result<Value, ExtractionError> {
    serde_json::from_str(&raw.body).map_err(|e| {
        if raw.is_json() {
            ExtractionError::Malformed(e.to_string())
        } else {
            let declared = raw.content_type.as_deref().unwrap_or("no content type");
            ExtractionError::Malformed(format!("{e} (upstream sent {declared})"))
        }
    })
}

fn extract_text(data: &Value) -> Result<RelayResult, ExtractionError> {
    let successful = match data.get(SUCCESS_FIELD) {
        Some(Value::String(s)) => s.eq_ignore_ascii_case("success"),
        Some(Value::Bool(b)) => *b,
        _ => false,
    };
    if !successful {
        return Err(ExtractionError::Unsuccessful(format!(
            "`{SUCCESS_FIELD}` missing or not \"success\""
        )));
    }

    match data.get(STATUS_FIELD) {
        Some(status) if status.as_u64() == Some(200) => {}
        Some(status) => {
            return Err(ExtractionError::Unsuccessful(format!(
                "`{STATUS_FIELD}` is {status}, expected 200"
            )))
        }
        None => {
            return Err(ExtractionError::Unsuccessful(format!(
                "`{STATUS_FIELD}` missing"
            )))
        }
    }

    // Sent as-is; trimming only decides whether there is an answer at all.
    data.get(ANSWER_FIELD)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(|s| RelayResult::TextAnswer(s.to_string()))
        .ok_or(ExtractionError::NoAnswer)
}

fn extract_images(data: &Value) -> Result<RelayResult, ExtractionError> {
    let items = match data.get(IMAGES_FIELD) {
        None => {
            return Err(ExtractionError::NoImages(format!(
                "`{IMAGES_FIELD}` missing"
            )))
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(ExtractionError::NoImages(format!(
                "`{IMAGES_FIELD}` is not a list"
            )))
        }
    };
    if items.is_empty() {
        return Err(ExtractionError::NoImages(format!("`{IMAGES_FIELD}` is empty")));
    }

    let urls = items
        .iter()
        .map(|item| {
            let raw = item
                .as_str()
                .ok_or_else(|| ExtractionError::InvalidUrl(item.to_string()))?;
            parse_media_url(raw)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RelayResult::ImageSet(urls))
}

fn extract_media_link(html: &str) -> Result<RelayResult, ExtractionError> {
    for (name, strategy) in MEDIA_STRATEGIES {
        let Some(found) = strategy(html) else {
            debug!(strategy = name, "Media strategy found nothing");
            continue;
        };
        match parse_media_url(&found.url) {
            Ok(url) => {
                debug!(strategy = name, %url, "Media strategy matched");
                return Ok(RelayResult::MediaLink {
                    url,
                    title: found.title,
                });
            }
            Err(e) => debug!(strategy = name, error = %e, "Media strategy yielded unusable URL"),
        }
    }
    Err(ExtractionError::NoMediaUrl)
}

fn parse_media_url(raw: &str) -> Result<Url, ExtractionError> {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        _ => Err(ExtractionError::InvalidUrl(trimmed.to_string())),
    }
}

/// Strategy (a): `og:video` meta tags.
#[must_use]
pub fn from_meta_tag(html: &str) -> Option<ScrapedMedia> {
    let mut url = None;
    let mut title = None;

    for tag in regex!(r"(?is)<meta\s[^>]*>").find_iter(html) {
        let mut key = None;
        let mut content = None;
        for attr in regex!(r#"(?is)([a-z][a-z:_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .captures_iter(tag.as_str())
        {
            let name = attr[1].to_ascii_lowercase();
            let value = attr.get(2).or_else(|| attr.get(3)).map(|m| m.as_str());
            match name.as_str() {
                "property" | "name" => key = value.map(str::to_ascii_lowercase),
                "content" => content = value,
                _ => {}
            }
        }

        let (Some(key), Some(content)) = (key, content) else {
            continue;
        };
        let decoded = html_escape::decode_html_entities(content).trim().to_string();
        if decoded.is_empty() {
            continue;
        }
        match key.as_str() {
            "og:video" | "og:video:secure_url" | "og:video:url" if url.is_none() => {
                url = Some(decoded);
            }
            "og:title" if title.is_none() => title = Some(decoded),
            _ => {}
        }
    }

    url.map(|url| ScrapedMedia { url, title })
}

/// Strategy (b): `application/ld+json` structured data.
#[must_use]
pub fn from_ld_json(html: &str) -> Option<ScrapedMedia> {
    regex!(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .captures_iter(html)
        .filter_map(|caps| serde_json::from_str::<Value>(caps[1].trim()).ok())
        .find_map(|data| {
            let url = find_string_field(&data, "contentUrl")?.to_string();
            let title = find_string_field(&data, "name")
                .or_else(|| find_string_field(&data, "caption"))
                .map(ToString::to_string);
            Some(ScrapedMedia { url, title })
        })
}

/// Strategy (c): legacy `window._sharedData` / `__additionalDataLoaded` blobs.
#[must_use]
pub fn from_legacy_script(html: &str) -> Option<ScrapedMedia> {
    const MARKERS: &[&str] = &["window._sharedData", "window.__additionalDataLoaded"];

    MARKERS.iter().find_map(|marker| {
        let start = html.find(marker)?;
        let rest = &html[start..];
        let end = rest.find("</script>").unwrap_or(rest.len());
        let json = balanced_json_object(&rest[..end])?;
        let data: Value = serde_json::from_str(json).ok()?;
        let url = find_string_field(&data, "video_url")?.to_string();
        Some(ScrapedMedia { url, title: None })
    })
}

/// Returns the first balanced `{...}` object in `text`, honouring strings.
fn balanced_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Depth-first search for the first non-empty string under `key`.
fn find_string_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key).and_then(Value::as_str) {
                if !found.trim().is_empty() {
                    return Some(found);
                }
            }
            map.values().find_map(|v| find_string_field(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| find_string_field(v, key)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(body: &str) -> RawResponse {
        RawResponse {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: body.to_string(),
        }
    }

    fn html(body: &str) -> RawResponse {
        RawResponse {
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.to_string(),
        }
    }

    const LEGACY_PAGE: &str = r#"<html><head><title>x</title></head><body>
        <script type="text/javascript">window._sharedData = {"entry_data":{"PostPage":[{"graphql":{"shortcode_media":{"is_video":true,"video_url":"https://cdn.example.com/v/clip.mp4?x=1","text":"a } in a string"}}}]}};</script>
        </body></html>"#;

    #[test]
    fn test_text_answer() {
        let raw = json(r#"{"status":200,"successful":"success","response":"Hi there"}"#);
        assert_eq!(
            extract(&raw, ExpectedShape::Text),
            Ok(RelayResult::TextAnswer("Hi there".to_string()))
        );
    }

    #[test]
    fn test_text_requires_success_indicator() {
        let raw = json(r#"{"status":200,"response":"Hi there"}"#);
        assert!(matches!(
            extract(&raw, ExpectedShape::Text),
            Err(ExtractionError::Unsuccessful(_))
        ));

        let raw = json(r#"{"status":200,"successful":"failed","response":"Hi"}"#);
        assert!(matches!(
            extract(&raw, ExpectedShape::Text),
            Err(ExtractionError::Unsuccessful(_))
        ));
    }

    #[test]
    fn test_text_rejects_non_200_status_field() {
        let raw = json(r#"{"status":500,"successful":"success","response":"Hi"}"#);
        assert!(matches!(
            extract(&raw, ExpectedShape::Text),
            Err(ExtractionError::Unsuccessful(_))
        ));
    }

    #[test]
    fn test_text_requires_numeric_200_status() {
        for body in [
            r#"{"successful":"success","response":"Hi"}"#,
            r#"{"status":"200","successful":"success","response":"Hi"}"#,
            r#"{"status":"500","successful":"success","response":"Hi"}"#,
        ] {
            assert!(
                matches!(
                    extract(&json(body), ExpectedShape::Text),
                    Err(ExtractionError::Unsuccessful(_))
                ),
                "{body} should be refused"
            );
        }
    }

    #[test]
    fn test_text_answer_is_not_trimmed() {
        let raw = json(r#"{"status":200,"successful":"success","response":"  indented\n"}"#);
        assert_eq!(
            extract(&raw, ExpectedShape::Text),
            Ok(RelayResult::TextAnswer("  indented\n".to_string()))
        );
    }

    #[test]
    fn test_malformed_json_names_declared_type() {
        let raw = html("<html>oops</html>");
        let Err(ExtractionError::Malformed(msg)) = extract(&raw, ExpectedShape::Text) else {
            panic!("expected malformed");
        };
        assert!(msg.contains("text/html"));
    }

    #[test]
    fn test_text_empty_answer() {
        let raw = json(r#"{"status":200,"successful":true,"response":"   "}"#);
        assert_eq!(
            extract(&raw, ExpectedShape::Text),
            Err(ExtractionError::NoAnswer)
        );
    }

    #[test]
    fn test_malformed_json() {
        let raw = json("<html>oops</html>");
        assert!(matches!(
            extract(&raw, ExpectedShape::Text),
            Err(ExtractionError::Malformed(_))
        ));
    }

    #[test]
    fn test_image_set_keeps_order() {
        let raw = json(r#"{"images":["https://img.example/1.png","https://img.example/2.png"]}"#);
        let Ok(RelayResult::ImageSet(urls)) = extract(&raw, ExpectedShape::ImageSet) else {
            panic!("expected image set");
        };
        assert_eq!(urls.len(), 2);
        assert!(urls[0].as_str().ends_with("1.png"));
        assert!(urls[1].as_str().ends_with("2.png"));
    }

    #[test]
    fn test_image_set_failures() {
        for body in [
            r#"{"other":[]}"#,
            r#"{"images":"https://img.example/1.png"}"#,
            r#"{"images":[]}"#,
        ] {
            assert!(matches!(
                extract(&json(body), ExpectedShape::ImageSet),
                Err(ExtractionError::NoImages(_))
            ));
        }
        assert!(matches!(
            extract(&json(r#"{"images":["not a url"]}"#), ExpectedShape::ImageSet),
            Err(ExtractionError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_meta_tag_strategy_decodes_entities() {
        let page = r#"<meta content="Cat video" property="og:title">
            <meta property='og:video' content='https://cdn.example.com/a.mp4?a=1&amp;b=2'>"#;
        let found = from_meta_tag(page).expect("meta");
        assert_eq!(found.url, "https://cdn.example.com/a.mp4?a=1&b=2");
        assert_eq!(found.title.as_deref(), Some("Cat video"));
    }

    #[test]
    fn test_ld_json_strategy() {
        let page = r#"<script type="application/ld+json">
            {"@type":"VideoObject","name":"Clip","video":[{"contentUrl":"https://cdn.example.com/b.mp4"}]}
            </script>"#;
        let found = from_ld_json(page).expect("ld+json");
        assert_eq!(found.url, "https://cdn.example.com/b.mp4");
        assert_eq!(found.title.as_deref(), Some("Clip"));
    }

    #[test]
    fn test_legacy_strategy_handles_braces_in_strings() {
        let found = from_legacy_script(LEGACY_PAGE).expect("legacy");
        assert_eq!(found.url, "https://cdn.example.com/v/clip.mp4?x=1");
    }

    #[test]
    fn test_chain_falls_through_to_legacy() {
        let page = format!(
            r#"<meta property="og:title" content="only a title">
               <script type="application/ld+json">{{"@type":"ImageObject"}}</script>
               {LEGACY_PAGE}"#
        );
        assert_eq!(from_meta_tag(&page), None);
        assert_eq!(from_ld_json(&page), None);
        let Ok(RelayResult::MediaLink { url, title }) = extract(&html(&page), ExpectedShape::MediaLink)
        else {
            panic!("expected media link");
        };
        assert_eq!(url.path(), "/v/clip.mp4");
        assert_eq!(title, None);
    }

    #[test]
    fn test_chain_prefers_first_strategy() {
        let page = format!(
            r#"<meta property="og:video" content="https://first.example/a.mp4">{LEGACY_PAGE}"#
        );
        let Ok(RelayResult::MediaLink { url, .. }) = extract(&html(&page), ExpectedShape::MediaLink)
        else {
            panic!("expected media link");
        };
        assert_eq!(url.host_str(), Some("first.example"));
    }

    #[test]
    fn test_chain_skips_relative_urls() {
        let page = format!(r#"<meta property="og:video" content="/relative.mp4">{LEGACY_PAGE}"#);
        let Ok(RelayResult::MediaLink { url, .. }) = extract(&html(&page), ExpectedShape::MediaLink)
        else {
            panic!("expected media link");
        };
        assert_eq!(url.host_str(), Some("cdn.example.com"));
    }

    #[test]
    fn test_chain_exhausted() {
        assert_eq!(
            extract(&html("<html><body>login required</body></html>"), ExpectedShape::MediaLink),
            Err(ExtractionError::NoMediaUrl)
        );
    }
}
