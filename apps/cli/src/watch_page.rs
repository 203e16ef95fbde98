use anyhow::{Context, Result, bail};
use kratko_core::PageState;
use reqwest::Url;
use tracing::debug;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")
}

/// Rewrites short and embed links to the `watch?v=` form the page reader expects.
pub fn normalize_video_url(input: &str) -> Result<String> {
    let url = Url::parse(input.trim()).with_context(|| format!("Invalid URL: {input}"))?;
    let host = url.host_str().unwrap_or_default().trim_start_matches("www.");

    let id = match host {
        "youtu.be" => url.path_segments().and_then(|mut s| s.next()).map(str::to_string),
        "youtube.com" | "m.youtube.com" => {
            let mut segments = url.path_segments().into_iter().flatten();
            match (segments.next(), segments.next()) {
                (Some("watch"), _) => return Ok(url.to_string()),
                (Some("shorts" | "embed" | "live"), Some(id)) => Some(id.to_string()),
                _ => None,
            }
        }
        _ => bail!("Not a YouTube URL: {input}"),
    };

    match id.filter(|id| !id.is_empty()) {
        Some(id) => Ok(format!("https://www.youtube.com/watch?v={id}")),
        None => bail!("No video id in {input}"),
    }
}

/// Downloads the server-rendered watch page and snapshots it.
pub async fn fetch_watch_page(client: &reqwest::Client, url: &str) -> Result<PageState> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
        .send()
        .await
        .with_context(|| format!("Failed to load {url}"))?;
    if !response.status().is_success() {
        bail!("Watch page returned HTTP {}", response.status());
    }

    let html = response.text().await?;
    let page = PageState::from_html(url, &html);
    debug!(
        bytes = html.len(),
        scripts = page.inline_scripts.len(),
        "Watch page loaded"
    );
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_links_become_watch_urls() {
        assert_eq!(
            normalize_video_url("https://youtu.be/abc123?t=10").unwrap(),
            "https://www.youtube.com/watch?v=abc123"
        );
        assert_eq!(
            normalize_video_url("https://www.youtube.com/shorts/xyz").unwrap(),
            "https://www.youtube.com/watch?v=xyz"
        );
    }

    #[test]
    fn watch_urls_are_kept() {
        let url = "https://www.youtube.com/watch?v=abc123&list=PL1";
        assert_eq!(normalize_video_url(url).unwrap(), url);
    }

    #[test]
    fn other_hosts_are_rejected() {
        assert!(normalize_video_url("https://vimeo.com/123").is_err());
        assert!(normalize_video_url("not a url").is_err());
        assert!(normalize_video_url("https://youtu.be/").is_err());
    }
}
