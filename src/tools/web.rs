//! Web access tools: search and fetch URLs.
//!
//! Web search scrapes DuckDuckGo HTML and falls back to the Brave Search API
//! when `BRAVE_SEARCH_API_KEY` is set.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{required_str, Tool, ToolExecutionContext};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; agentcorp/0.3)";
const MAX_FETCH_CHARS: usize = 20_000;

/// One normalized search hit.
#[derive(Debug, Clone, PartialEq)]
struct SearchHit {
    title: String,
    url: String,
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Search the web.
pub struct WebSearch;

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for real-time information. Returns titles, URLs and snippets for the top results."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Number of results to return (default: 5, max: 10)",
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let query = required_str(&args, "query")?;
        let num_results = args["num_results"].as_u64().unwrap_or(5).clamp(1, 10) as usize;

        tracing::info!("Web search [{}]", query);
        let ddg_failure = match search_duckduckgo(query, num_results).await {
            Ok(hits) if !hits.is_empty() => {
                return Ok(format_results(query, &hits, "DuckDuckGo"));
            }
            Ok(_) => "no results".to_string(),
            Err(e) => e.to_string(),
        };
        tracing::debug!("DuckDuckGo search failed: {}", ddg_failure);

        match std::env::var("BRAVE_SEARCH_API_KEY") {
            Ok(key) if !key.is_empty() => match search_brave(query, num_results, &key).await {
                Ok(hits) => Ok(format_results(query, &hits, "Brave Search")),
                Err(e) => Ok(format!(
                    "Error performing web search for '{}': {}",
                    query, e
                )),
            },
            _ => Ok(format!(
                "Search failed for query: '{}'\n\nDuckDuckGo: {}\nSet BRAVE_SEARCH_API_KEY to enable the Brave Search fallback.",
                query, ddg_failure
            )),
        }
    }
}

async fn search_duckduckgo(query: &str, limit: usize) -> anyhow::Result<Vec<SearchHit>> {
    let url = format!(
        "https://html.duckduckgo.com/html/?q={}",
        urlencoding::encode(query)
    );
    let html = http_client(Duration::from_secs(10))?
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    if html.contains("anomaly-modal") || html.contains("Unfortunately, bots") {
        anyhow::bail!("DuckDuckGo blocked the request with a CAPTCHA");
    }
    Ok(extract_ddg_results(&html, limit))
}

async fn search_brave(query: &str, limit: usize, api_key: &str) -> anyhow::Result<Vec<SearchHit>> {
    let count = limit.to_string();
    let response: BraveResponse = http_client(Duration::from_secs(10))?
        .get("https://api.search.brave.com/res/v1/web/search")
        .header("Accept", "application/json")
        .header("X-Subscription-Token", api_key)
        .query(&[
            ("q", query),
            ("count", count.as_str()),
            ("safesearch", "moderate"),
            ("search_lang", "en"),
        ])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(response
        .web
        .map(|web| web.results)
        .unwrap_or_default()
        .into_iter()
        .take(limit)
        .map(|r| SearchHit {
            title: r.title.unwrap_or_else(|| "No title".to_string()),
            url: r.url.unwrap_or_default(),
            snippet: r
                .description
                .unwrap_or_else(|| "No description available".to_string()),
        })
        .collect())
}

/// Pull result blocks out of DuckDuckGo's HTML endpoint.
fn extract_ddg_results(html: &str, limit: usize) -> Vec<SearchHit> {
    fn field<'a>(chunk: &'a str, class: &str) -> Option<&'a str> {
        chunk
            .split(class)
            .nth(1)
            .and_then(|s| s.split('>').nth(1))
            .and_then(|s| s.split('<').next())
            .map(str::trim)
    }

    html.split("class=\"result__body\"")
        .skip(1)
        .filter_map(|chunk| {
            let title = field(chunk, "class=\"result__a\"").filter(|t| !t.is_empty())?;
            Some(SearchHit {
                title: html_decode(title),
                url: field(chunk, "class=\"result__url\"").unwrap_or("").to_string(),
                snippet: html_decode(field(chunk, "class=\"result__snippet\"").unwrap_or("")),
            })
        })
        .take(limit)
        .collect()
}

fn format_results(query: &str, hits: &[SearchHit], source: &str) -> String {
    if hits.is_empty() {
        return format!("No search results found for query: {}", query);
    }
    let mut out = format!("Search results for '{}' (via {}):\n\n", query, source);
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!("{}. **{}**\n", i + 1, hit.title));
        if !hit.url.is_empty() {
            out.push_str(&format!("   URL: {}\n", hit.url));
        }
        out.push_str(&format!("   {}\n\n", hit.snippet));
    }
    out.trim_end().to_string()
}

fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

/// Fetch a URL and return its readable text.
pub struct WebFetch;

#[async_trait]
impl Tool for WebFetch {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch the content of a URL. HTML pages are reduced to their readable text. Long pages are truncated."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolExecutionContext) -> anyhow::Result<String> {
        let raw = required_str(&args, "url")?;
        let url = match url::Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => return Ok(format!("Error: Unsupported URL scheme '{}'", url.scheme())),
            Err(e) => return Ok(format!("Error fetching URL {}: {}", raw, e)),
        };

        tracing::info!("Fetching [{}]", url);
        match fetch_text(url).await {
            Ok(text) => Ok(truncate_chars(&text, MAX_FETCH_CHARS)),
            Err(e) => Ok(format!("Error fetching URL {}: {}", raw, e)),
        }
    }
}

async fn fetch_text(url: url::Url) -> anyhow::Result<String> {
    let response = http_client(Duration::from_secs(30))?
        .get(url)
        .send()
        .await?
        .error_for_status()?;

    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/html"));
    let body = response.text().await?;

    Ok(if is_html {
        extract_text_from_html(&body)
    } else {
        body
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n\n[Content truncated at {} characters]", &text[..cut], max),
        None => text.to_string(),
    }
}

/// Strip scripts, styles and tags, collapsing whitespace.
fn extract_text_from_html(html: &str) -> String {
    let mut text = html.to_string();
    for (open, close) in [("<script", "</script>"), ("<style", "</style>")] {
        while let Some(start) = text.find(open) {
            match text[start..].find(close) {
                Some(end) => text.replace_range(start..start + end + close.len(), ""),
                None => break,
            }
        }
    }

    let mut stripped = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                stripped.push(' ');
            }
            _ if !in_tag => stripped.push(c),
            _ => {}
        }
    }

    html_decode(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ddg_results_are_extracted() {
        let html = r#"
            <div class="result__body">
              <a class="result__a" href="x">Rust &amp; Tokio</a>
              <a class="result__url" href="x"> tokio.rs </a>
              <a class="result__snippet">An async runtime</a>
            </div>
            <div class="result__body">
              <a class="result__a" href="y">Second</a>
            </div>"#;
        let hits = extract_ddg_results(html, 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Rust & Tokio");
        assert_eq!(hits[0].url, "tokio.rs");
        assert_eq!(hits[0].snippet, "An async runtime");
        assert_eq!(extract_ddg_results(html, 1).len(), 1);
    }

    #[test]
    fn results_format_with_source() {
        let hits = vec![SearchHit {
            title: "Title".into(),
            url: "https://example.com".into(),
            snippet: "Snippet".into(),
        }];
        assert_eq!(
            format_results("q", &hits, "DuckDuckGo"),
            "Search results for 'q' (via DuckDuckGo):\n\n1. **Title**\n   URL: https://example.com\n   Snippet"
        );
        assert_eq!(format_results("q", &[], "x"), "No search results found for query: q");
    }

    #[test]
    fn html_is_reduced_to_text() {
        let html = "<html><head><style>p{}</style><script>alert(1)</script></head>\
                    <body><p>Hello&nbsp;<b>world</b></p></body></html>";
        assert_eq!(extract_text_from_html(html), "Hello world");
    }

    #[test]
    fn long_content_is_truncated() {
        let text = "é".repeat(25);
        let cut = truncate_chars(&text, 20);
        assert!(cut.starts_with(&"é".repeat(20)));
        assert!(cut.ends_with("[Content truncated at 20 characters]"));
        assert_eq!(truncate_chars("short", 20), "short");
    }

    #[tokio::test]
    async fn non_http_urls_are_rejected() {
        let out = WebFetch
            .execute(json!({"url": "file:///etc/passwd"}), &ToolExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(out, "Error: Unsupported URL scheme 'file'");
    }
}
