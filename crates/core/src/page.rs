//! Snapshot of the page the extractor runs in.
//!
//! Everything here is derived on demand from a [`PageState`]; nothing is
//! cached across navigations.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::types::VideoContext;

static PLAYER_RESPONSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:var\s+)?ytInitialPlayerResponse\s*=\s*").expect("valid regex")
});

pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Raw page state as seen by the extractor at one instant.
#[derive(Debug, Clone, Default)]
pub struct PageState {
    pub url: String,
    /// Structured player state exposed by the page, when the host can read it.
    pub player_response: Option<Value>,
    pub inline_scripts: Vec<String>,
    pub heading_title: Option<String>,
    pub channel_name: Option<String>,
    pub document_title: String,
}

/// Source of fresh page snapshots.
pub trait PageSource: Send + Sync {
    fn snapshot(&self) -> PageState;
}

impl PageSource for PageState {
    fn snapshot(&self) -> PageState {
        self.clone()
    }
}

impl PageState {
    /// Builds a snapshot from server-rendered watch page HTML.
    pub fn from_html(url: impl Into<String>, html: &str) -> Self {
        let document = Html::parse_document(html);

        let inline_scripts = document
            .select(&selector("script"))
            .map(|el| el.text().collect::<String>())
            .filter(|s| !s.trim().is_empty())
            .collect();

        let channel_name = document
            .select(&selector(r#"[itemprop="author"] [itemprop="name"]"#))
            .find_map(|el| el.value().attr("content"))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        Self {
            url: url.into(),
            player_response: None,
            inline_scripts,
            heading_title: first_text(&document, "h1"),
            channel_name,
            document_title: first_text(&document, "head > title").unwrap_or_default(),
        }
    }

    /// The `v` query parameter of the page URL.
    pub fn video_id(&self) -> Option<String> {
        let url = Url::parse(&self.url).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.into_owned())
            .filter(|id| !id.is_empty())
    }

    /// The player state object: the exposed global first, then the
    /// `ytInitialPlayerResponse` assignment inside inline scripts.
    pub fn player_response(&self) -> Option<Value> {
        if let Some(value) = &self.player_response {
            return Some(value.clone());
        }

        self.inline_scripts
            .iter()
            .filter(|script| script.contains("ytInitialPlayerResponse"))
            .find_map(|script| {
                PLAYER_RESPONSE_RE.find_iter(script).find_map(|m| {
                    parse_json_prefix(&script[m.end()..]).filter(Value::is_object)
                })
            })
    }

    pub fn video_context(&self) -> VideoContext {
        let video_id = self.video_id().unwrap_or_default();
        let details = self
            .player_response()
            .map(|pr| pr["videoDetails"].clone())
            .filter(Value::is_object);

        if let Some(details) = details {
            return VideoContext {
                video_id,
                title: details["title"].as_str().map(str::to_string),
                author: details["author"].as_str().map(str::to_string),
                duration_seconds: parse_seconds(&details["lengthSeconds"]),
            };
        }

        let title = self
            .heading_title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.document_title.clone());
        let author = self
            .channel_name
            .clone()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());

        VideoContext {
            video_id,
            title: Some(title.trim().to_string()),
            author: Some(author.trim().to_string()),
            duration_seconds: None,
        }
    }
}

/// Parses the first JSON value at the start of `input`, ignoring the rest.
pub(crate) fn parse_json_prefix(input: &str) -> Option<Value> {
    serde_json::Deserializer::from_str(input.trim_start())
        .into_iter::<Value>()
        .next()
        .and_then(|r| r.ok())
}

fn parse_seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// Whitespace-collapsed text of the first element matching `css`.
fn first_text(document: &Html, css: &str) -> Option<String> {
    document
        .select(&selector(css))
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|text| !text.is_empty())
}
