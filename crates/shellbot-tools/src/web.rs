//! `web_search` and `scrape` tools: fetch HTML and reduce it to readable text
//! plus a short list of links.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::{json, Value};
use shellbot_core::config::WebConfig;
use shellbot_core::error::BotError;
use shellbot_core::tool_registry::Tool;
use tracing::{debug, warn};
use url::Url;

pub const WEB_SEARCH_TOOL: &str = "web_search";

pub const NO_QUERY: &str = "Please provide a non-empty search query.";
pub const SEARCH_UNAVAILABLE: &str =
    "I couldn't retrieve search results at the moment. Please try again later.";

/// Search pages serve a reduced layout to unknown agents.
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Elements whose text is never shown.
const HIDDEN_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "select", "option", "head", "title",
];

const INTERNAL_HOSTS: &[&str] = &["localhost", "metadata.google.internal"];
const INTERNAL_SUFFIXES: &[&str] = &[".local", ".internal", ".localhost"];

#[derive(Debug, Clone, Copy)]
struct TextLimits {
    /// Stop collecting once this many characters were gathered.
    total: usize,
    /// Longer text nodes are cut at a word boundary.
    snippet: usize,
}

const SEARCH_TEXT: TextLimits = TextLimits {
    total: 1500,
    snippet: 160,
};
const PAGE_TEXT: TextLimits = TextLimits {
    total: 2000,
    snippet: 200,
};

const SEARCH_LINKS_SHOWN: usize = 12;
const SEARCH_LINK_MAX_LEN: usize = 280;
const PAGE_LINKS: usize = 20;
const PAGE_LINK_MAX_LEN: usize = 80;

/// HTTP client shared by the search and scrape tools.
pub struct WebClient {
    client: reqwest::Client,
    search_url: Url,
    lite_search_url: Url,
    block_private: bool,
}

impl WebClient {
    pub fn new(config: &WebConfig) -> Result<Self, BotError> {
        let parse = |field: &str, raw: &str| {
            Url::parse(raw).map_err(|e| BotError::Config(format!("invalid web {}: {}", field, e)))
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(BROWSER_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            search_url: parse("search_url", &config.search_url)?,
            lite_search_url: parse("lite_search_url", &config.lite_search_url)?,
            block_private: config.block_private_addresses,
        })
    }

    async fn get_html(&self, url: Url) -> Result<String, BotError> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BotError::ToolExecution {
                tool_name: "web".into(),
                message: format!("Received status code {} for {}", status.as_u16(), url),
            });
        }
        Ok(response.text().await?)
    }

    /// Search the primary endpoint, then the lite one. Always answers with
    /// text; failures become [`SEARCH_UNAVAILABLE`].
    pub async fn search(&self, query: &str) -> String {
        let query = query.trim();
        if query.is_empty() {
            return NO_QUERY.to_string();
        }
        debug!("Performing web search for query: {}", query);

        for endpoint in [&self.search_url, &self.lite_search_url] {
            let mut url = endpoint.clone();
            url.query_pairs_mut().append_pair("q", query);
            match self.get_html(url).await {
                Ok(html) => {
                    let (summary, links) = search_results(&html);
                    if !summary.is_empty() || !links.is_empty() {
                        return format_search_result(&summary, &links);
                    }
                    debug!("No results from {} for {:?}", endpoint, query);
                }
                Err(e) => warn!("Search via {} failed for {:?}: {}", endpoint, query, e),
            }
        }
        SEARCH_UNAVAILABLE.to_string()
    }

    /// Title, visible body text and links of one page. A URL without a
    /// scheme gets https.
    pub async fn scrape(&self, raw_url: &str) -> Result<String, BotError> {
        let raw_url = raw_url.trim();
        let with_scheme = if raw_url.contains("://") {
            raw_url.to_string()
        } else {
            format!("https://{}", raw_url)
        };
        let url = self.checked_url(&with_scheme).await?;
        debug!("Scraping {}", url);
        let html = self.get_html(url).await?;
        Ok(page_report(&html))
    }

    /// Reject non-http schemes and, unless disabled, hosts that name or
    /// resolve to internal addresses.
    async fn checked_url(&self, raw: &str) -> Result<Url, BotError> {
        let url = Url::parse(raw).map_err(|e| scrape_error(format!("Invalid URL {}: {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(scrape_error(format!(
                "Scheme '{}' is not allowed (only http/https)",
                url.scheme()
            )));
        }
        if !self.block_private {
            return Ok(url);
        }

        let host = url.host_str().unwrap_or_default().to_lowercase();
        if INTERNAL_HOSTS.contains(&host.as_str())
            || INTERNAL_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
        {
            return Err(scrape_error(format!("Host '{}' is blocked (internal address)", host)));
        }

        let port = url.port_or_known_default().unwrap_or(80);
        let private = match url.host() {
            Some(url::Host::Ipv4(ip)) => is_private_ip(&IpAddr::V4(ip)).then(|| ip.to_string()),
            Some(url::Host::Ipv6(ip)) => is_private_ip(&IpAddr::V6(ip)).then(|| ip.to_string()),
            Some(url::Host::Domain(domain)) => match tokio::net::lookup_host((domain, port)).await {
                Ok(mut addrs) => addrs
                    .find(|addr| is_private_ip(&addr.ip()))
                    .map(|addr| format!("{} ({})", domain, addr.ip())),
                Err(e) => {
                    debug!("Could not resolve {}: {}", domain, e);
                    None
                }
            },
            None => None,
        };
        if let Some(target) = private {
            return Err(scrape_error(format!("{} is a private/internal address", target)));
        }
        Ok(url)
    }
}

fn scrape_error(message: String) -> BotError {
    BotError::ToolExecution {
        tool_name: "scrape".into(),
        message,
    }
}

/// Loopback, RFC 1918, link-local, CGN, unique-local and unspecified ranges.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [first, second, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (first == 100 && (second & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || matches!(v6.to_ipv4_mapped(), Some(v4) if is_private_ip(&IpAddr::V4(v4)))
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

fn body(document: &Html) -> ElementRef<'_> {
    Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element())
}

fn hrefs(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|anchor| anchor.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// Trimmed visible text nodes under `root`, each cut to the snippet limit,
/// until the total limit is reached.
fn text_snippets(root: ElementRef<'_>, limits: TextLimits) -> Vec<String> {
    let mut snippets = Vec::new();
    let mut total = 0;
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|parent| {
                parent
                    .value()
                    .as_element()
                    .map(|element| HIDDEN_ELEMENTS.contains(&element.name()))
            })
            .unwrap_or(false);
        let text = text.trim();
        if hidden || text.is_empty() {
            continue;
        }
        let snippet = shorten(text, limits.snippet);
        total += snippet.chars().count();
        snippets.push(snippet);
        if total >= limits.total {
            break;
        }
    }
    snippets
}

/// First `max` characters, cut back to the last space, with an ellipsis.
fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max).collect();
    let cut = prefix.rsplit_once(' ').map_or(prefix.as_str(), |(head, _)| head);
    format!("{}…", cut)
}

fn truncate_words(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max).collect();
    let cut = prefix.rsplit_once(' ').map_or(prefix.as_str(), |(head, _)| head);
    format!("{}\n\n[Output truncated]", cut)
}

/// Summary text and cleaned result links from a DuckDuckGo HTML page.
fn search_results(html: &str) -> (String, Vec<String>) {
    let document = Html::parse_document(html);
    let snippets: Vec<String> = text_snippets(body(&document), SEARCH_TEXT)
        .into_iter()
        // Result timestamps end in `.0000000`; use them as separators.
        .map(|snippet| snippet.replace(".0000000", "\n --- \n"))
        .collect();
    let summary = truncate_words(snippets.join(" ").trim(), SEARCH_TEXT.total);

    let mut links: Vec<String> = Vec::new();
    for href in hrefs(&document) {
        if href.len() > SEARCH_LINK_MAX_LEN {
            continue;
        }
        let Some(link) = clean_link(&href) else {
            continue;
        };
        if !links.contains(&link) {
            links.push(link);
            if links.len() >= SEARCH_LINKS_SHOWN * 2 {
                break;
            }
        }
    }
    (summary, links)
}

/// Drop search-engine navigation links and strip scheme and `www.`.
fn clean_link(link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty()
        || link.ends_with("/html/")
        || link.starts_with("/html/?")
        || link.starts_with("html/?")
    {
        return None;
    }
    let link = link
        .replace("https://", "")
        .replace("http://", "")
        .replace("//", "");
    let link = link.strip_prefix("www.").unwrap_or(&link).to_string();
    (!link.is_empty()).then_some(link)
}

fn format_search_result(summary: &str, links: &[String]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let summary = summary.trim();
    if !summary.is_empty() {
        parts.push(summary.to_string());
    }
    if !links.is_empty() {
        if !parts.is_empty() {
            parts.push(String::new());
        }
        parts.push("**Links:**".to_string());
        parts.extend(links.iter().take(SEARCH_LINKS_SHOWN).map(|link| format!("- {}", link)));
    }
    let text = parts.join("\n");
    let text = text.trim();
    if text.is_empty() {
        "No results found.".to_string()
    } else {
        text.to_string()
    }
}

/// `title`, body text and short links, separated by blank lines.
fn page_report(html: &str) -> String {
    let document = Html::parse_document(html);
    let title = Selector::parse("title")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|title| title.text().collect::<String>())
        })
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| "(No title)".to_string());

    let text = text_snippets(body(&document), PAGE_TEXT).join(" \n");

    let links: Vec<String> = hrefs(&document)
        .into_iter()
        .filter(|href| href.len() <= PAGE_LINK_MAX_LEN)
        .take(PAGE_LINKS)
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect();

    format!("{}\n{}\n\n{}", title, text.trim(), links.join("\n"))
}

pub struct WebSearchTool {
    web: Arc<WebClient>,
}

impl WebSearchTool {
    pub fn new(web: Arc<WebClient>) -> Self {
        Self { web }
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    #[serde(default)]
    query: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Perform a web search and return textual results and links."
    }

    fn aliases(&self) -> &[&str] {
        &["search"]
    }

    fn triggers(&self) -> &[&str] {
        &["web search", "search", "online", "web"]
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query string"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, BotError> {
        let args: SearchArgs = serde_json::from_value(args)?;
        Ok(self.web.search(&args.query).await)
    }
}

pub struct ScrapeTool {
    web: Arc<WebClient>,
}

impl ScrapeTool {
    pub fn new(web: Arc<WebClient>) -> Self {
        Self { web }
    }
}

#[derive(Deserialize)]
struct ScrapeArgs {
    url: String,
}

#[async_trait]
impl Tool for ScrapeTool {
    fn name(&self) -> &str {
        "scrape"
    }

    fn description(&self) -> &str {
        "Scrape a given URL and return title, body text and links."
    }

    fn aliases(&self) -> &[&str] {
        &["search_and_scrape", "scraper"]
    }

    fn triggers(&self) -> &[&str] {
        &["scrape", "scraper"]
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to scrape"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, BotError> {
        let args: ScrapeArgs = serde_json::from_value(args)?;
        match self.web.scrape(&args.url).await {
            Ok(report) => Ok(report),
            Err(BotError::ToolExecution { message, .. }) => Ok(format!("Error: {}", message)),
            Err(e) => Ok(format!("Error: HTTP error while fetching {}: {}", args.url, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const RESULTS_PAGE: &str = r#"<html><head><title>ddg</title><style>.x{}</style></head>
        <body>
          <form><select name="kl"><option>All regions</option></select></form>
          <div class="result">
            <a href="https://www.rust-lang.org/learn">The Rust Book</a>
            <span>Learn Rust with the official book.</span>
          </div>
          <div class="result">
            <a href="http://docs.rs/tokio">tokio docs</a>
            <a href="https://www.rust-lang.org/learn">duplicate</a>
          </div>
          <a href="/html/?q=rust&amp;s=30">Next page</a>
          <script>var tracking = 1;</script>
        </body></html>"#;

    /// Serves one canned response per connection, in order, and records each request line.
    async fn serve(
        responses: Vec<(&'static str, &'static str)>,
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap();
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                requests.push(request.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
            }
            requests
        });
        (format!("http://{}", addr), handle)
    }

    fn client(base: &str, block_private: bool) -> Arc<WebClient> {
        Arc::new(
            WebClient::new(&WebConfig {
                enabled: true,
                search_url: format!("{}/html/", base),
                lite_search_url: format!("{}/lite/", base),
                timeout_secs: 5,
                block_private_addresses: block_private,
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_search_results_skip_hidden_text_and_navigation() {
        let (summary, links) = search_results(RESULTS_PAGE);
        assert_eq!(
            summary,
            "The Rust Book Learn Rust with the official book. tokio docs duplicate Next page"
        );
        assert_eq!(links, ["rust-lang.org/learn", "docs.rs/tokio"]);
    }

    #[test]
    fn test_format_search_result() {
        let links = vec!["a.example".to_string(), "b.example".to_string()];
        assert_eq!(
            format_search_result("Some text", &links),
            "Some text\n\n**Links:**\n- a.example\n- b.example"
        );
        assert_eq!(format_search_result("", &links), "**Links:**\n- a.example\n- b.example");
        assert_eq!(format_search_result("  ", &[]), "No results found.");

        let many: Vec<String> = (0..30).map(|i| format!("site{i}.example")).collect();
        let text = format_search_result("", &many);
        assert_eq!(text.lines().count(), 1 + SEARCH_LINKS_SHOWN);
    }

    #[test]
    fn test_clean_link() {
        assert_eq!(clean_link("https://www.example.com/a").as_deref(), Some("example.com/a"));
        assert_eq!(clean_link("//duckduckgo.com/l/?x").as_deref(), Some("duckduckgo.com/l/?x"));
        assert_eq!(clean_link("/html/?q=next"), None);
        assert_eq!(clean_link("https://html.duckduckgo.com/html/"), None);
        assert_eq!(clean_link("   "), None);
    }

    #[test]
    fn test_shorten_and_truncate_cut_at_words() {
        assert_eq!(shorten("short", 10), "short");
        assert_eq!(shorten("alpha beta gamma", 12), "alpha beta…");
        assert_eq!(truncate_words("alpha beta gamma", 12), "alpha beta\n\n[Output truncated]");
        assert_eq!(shorten("ééééé", 3), "ééé…");
    }

    #[test]
    fn test_page_report() {
        let html = r#"<html><head><title> Example Domain </title></head><body>
            <h1>Example</h1><p>This domain is for use in examples.</p>
            <script>ignored()</script>
            <a href="https://www.iana.org/domains/example">More information</a>
            </body></html>"#;
        assert_eq!(
            page_report(html),
            "Example Domain\nExample \nThis domain is for use in examples. \nMore information\n\nhttps://www.iana.org/domains/example"
        );
        assert!(page_report("<p>bare</p>").starts_with("(No title)\nbare"));
    }

    #[test]
    fn test_private_ranges() {
        assert!(is_private_ip(&IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(is_private_ip(&IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))));
        assert!(is_private_ip(&IpAddr::V4(Ipv4Addr::new(100, 64, 0, 1))));
        assert!(is_private_ip(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(is_private_ip(&IpAddr::V6("::ffff:192.168.0.1".parse().unwrap())));
        assert!(!is_private_ip(&IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9))));
    }

    #[tokio::test]
    async fn test_search_falls_back_to_lite_endpoint() {
        let (base, requests) =
            serve(vec![("503 Service Unavailable", "busy"), ("200 OK", RESULTS_PAGE)]).await;
        let tool = WebSearchTool::new(client(&base, false));

        let text = tool.execute(json!({"query": "rust book"})).await.unwrap();
        assert!(text.starts_with("The Rust Book"));
        assert!(text.contains("**Links:**\n- rust-lang.org/learn\n- docs.rs/tokio"));

        let requests = requests.await.unwrap();
        assert_eq!(requests[0], "GET /html/?q=rust+book HTTP/1.1");
        assert_eq!(requests[1], "GET /lite/?q=rust+book HTTP/1.1");
    }

    #[tokio::test]
    async fn test_search_reports_unavailable() {
        let (base, _requests) =
            serve(vec![("500 Internal Server Error", ""), ("200 OK", "<html></html>")]).await;
        let tool = WebSearchTool::new(client(&base, false));
        let text = tool.execute(json!({"query": "anything"})).await.unwrap();
        assert_eq!(text, SEARCH_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_empty_query() {
        let tool = WebSearchTool::new(client("http://127.0.0.1:9", false));
        assert_eq!(tool.execute(json!({"query": "  "})).await.unwrap(), NO_QUERY);
        assert_eq!(tool.execute(json!({})).await.unwrap(), NO_QUERY);
    }

    #[tokio::test]
    async fn test_scrape_reports_page() {
        let (base, requests) = serve(vec![(
            "200 OK",
            "<html><head><title>Status</title></head><body><p>All systems go</p></body></html>",
        )])
        .await;
        let tool = ScrapeTool::new(client(&base, false));
        let text = tool
            .execute(json!({"url": format!("{}/status", base)}))
            .await
            .unwrap();
        assert_eq!(text, "Status\nAll systems go\n\n");
        assert_eq!(requests.await.unwrap()[0], "GET /status HTTP/1.1");
    }

    #[tokio::test]
    async fn test_scrape_errors_are_text() {
        let (base, _requests) = serve(vec![("404 Not Found", "")]).await;
        let tool = ScrapeTool::new(client(&base, false));
        let text = tool
            .execute(json!({"url": format!("{}/missing", base)}))
            .await
            .unwrap();
        assert!(text.starts_with("Error: Received status code 404"), "{text}");
    }

    #[tokio::test]
    async fn test_scrape_blocks_internal_targets() {
        let tool = ScrapeTool::new(client("http://127.0.0.1:9", true));
        for (url, reason) in [
            ("http://127.0.0.1:8080/", "private"),
            ("http://[::1]/", "private"),
            ("localhost/admin", "blocked"),
            ("http://printer.local/", "blocked"),
            ("file:///etc/passwd", "not allowed"),
        ] {
            let text = tool.execute(json!({"url": url})).await.unwrap();
            assert!(text.starts_with("Error: "), "{url}: {text}");
            assert!(text.contains(reason), "{url}: {text}");
        }
    }
}
