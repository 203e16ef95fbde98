use reqwest::Url;
use scraper::{ElementRef, Html};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    error::{KratkoError, Result},
    page::selector,
    tracks::SelectedTrack,
    types::{SubtitleSegment, Transcript},
};

#[derive(Deserialize)]
struct Json3Response {
    events: Vec<Json3Event>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Json3Event {
    #[serde(default)]
    t_start_ms: f64,
    #[serde(default)]
    d_duration_ms: f64,
    segs: Option<Vec<Json3Seg>>,
}

#[derive(Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Downloads and parses the selected track.
///
/// The structured `json3` rendition is tried first; the markup rendition of
/// the unmodified URL is only fetched when that attempt fails.
pub async fn fetch(client: &reqwest::Client, selected: &SelectedTrack) -> Result<Transcript> {
    let track = &selected.track;
    let language = selected.language.label();

    let segments = match fetch_json3(client, &track.source_url).await {
        Ok(segments) => segments,
        Err(e) => {
            warn!(language = track.language_code.as_str(), "json3 subtitles unusable, trying markup: {e}");
            fetch_markup(client, &track.source_url)
                .await
                .map_err(|e| KratkoError::FetchFailed {
                    reason: e.to_string(),
                })?
        }
    };

    debug!(segments = segments.len(), language, "Fetched subtitle track");
    Ok(Transcript::new(language, &track.display_name, segments))
}

/// Sets `fmt=json3` on the track URL, replacing any existing format selector.
pub fn json3_url(source_url: &str) -> Result<Url> {
    let mut url = Url::parse(source_url).map_err(|e| KratkoError::FetchFailed {
        reason: format!("invalid track url: {e}"),
    })?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "fmt")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("fmt", "json3");

    Ok(url)
}

async fn fetch_json3(client: &reqwest::Client, source_url: &str) -> Result<Vec<SubtitleSegment>> {
    let url = json3_url(source_url)?;
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(KratkoError::FetchFailed {
            reason: format!("HTTP error! status: {}", status.as_u16()),
        });
    }

    let body = response.text().await?;
    parse_json3(&body)
}

/// The body is parsed whatever the status; an error page simply yields no
/// segments.
async fn fetch_markup(client: &reqwest::Client, source_url: &str) -> Result<Vec<SubtitleSegment>> {
    let response = client.get(source_url).send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        debug!(status = status.as_u16(), "Markup subtitles returned an error status");
    }
    Ok(parse_markup(&body))
}

/// Parses a `json3` event list. Every event carrying text segments becomes
/// one segment; times are converted from milliseconds to seconds.
pub fn parse_json3(body: &str) -> Result<Vec<SubtitleSegment>> {
    let response: Json3Response = serde_json::from_str(body)?;

    Ok(response
        .events
        .into_iter()
        .filter_map(|event| {
            let segs = event.segs.filter(|s| !s.is_empty())?;
            let text: String = segs.iter().map(|s| s.utf8.as_str()).collect();
            Some(SubtitleSegment {
                start_seconds: event.t_start_ms / 1000.0,
                duration_seconds: event.d_duration_ms / 1000.0,
                text: text.trim().to_string(),
            })
        })
        .filter(|seg| !seg.text.is_empty())
        .collect())
}

/// Parses `<text start=".." dur="..">` markup. Missing or unreadable
/// numeric attributes count as 0.
pub fn parse_markup(body: &str) -> Vec<SubtitleSegment> {
    let fragment = Html::parse_fragment(body);
    fragment
        .select(&selector("text"))
        .map(|el| SubtitleSegment {
            start_seconds: numeric_attribute(el, "start"),
            duration_seconds: numeric_attribute(el, "dur"),
            text: own_text(el).trim().to_string(),
        })
        .filter(|seg| !seg.text.is_empty())
        .collect()
}

/// Text of `el` without that of nested `text` elements, which an unclosed
/// `<text/>` would otherwise swallow.
fn own_text(el: ElementRef) -> String {
    el.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let owner = node
                .ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.value().name() == "text")?;
            (owner.id() == el.id()).then_some(&**text)
        })
        .collect()
}

fn numeric_attribute(el: ElementRef, name: &str) -> f64 {
    el.value()
        .attr(name)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}
