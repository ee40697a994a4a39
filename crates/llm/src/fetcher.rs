//! Article fetching for content and article input nodes.
//!
//! URLs come from user-authored graphs, so every hop is resolved first and
//! refused unless all of its addresses are publicly routable.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, Response, Url};

use pipeline::{ContentFetcher, ExternalContent, FetchError};

use crate::TRACING_TARGET_FETCH;

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// Settings for [`HttpContentFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Bodies are read up to this many bytes; the rest is never downloaded.
    pub max_body_bytes: usize,
    /// Permits loopback, private and link-local targets. Off outside tests.
    pub allow_private_hosts: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: concat!("flowdispatch/", env!("CARGO_PKG_VERSION")).to_owned(),
            max_body_bytes: 2 * 1024 * 1024,
            allow_private_hosts: false,
        }
    }
}

/// Downloads a page and reduces it to title and visible text.
#[derive(Debug, Clone)]
pub struct HttpContentFetcher {
    http: Client,
    max_body_bytes: usize,
    allow_private_hosts: bool,
    html: HtmlText,
}

impl HttpContentFetcher {
    /// Builds a fetcher. Redirects are followed by hand so each hop is checked.
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .redirect(Policy::none())
            .build()
            .map_err(transport)?;
        Ok(Self {
            http,
            max_body_bytes: config.max_body_bytes,
            allow_private_hosts: config.allow_private_hosts,
            html: HtmlText::new()?,
        })
    }

    /// Refuses non-http(s) URLs and, unless allowed, hosts that resolve to
    /// any non-public address.
    async fn check_target(&self, url: &Url) -> Result<(), FetchError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedUrl(url.to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::UnsupportedUrl(url.to_string()))?;
        if self.allow_private_hosts {
            return Ok(());
        }

        let literal = host.trim_start_matches('[').trim_end_matches(']');
        let addresses: Vec<IpAddr> = match literal.parse::<IpAddr>() {
            Ok(ip) => vec![ip],
            Err(_) => {
                let port = url.port_or_known_default().unwrap_or(80);
                tokio::net::lookup_host((host, port))
                    .await
                    .map_err(|err| FetchError::Transport(format!("cannot resolve {host}: {err}")))?
                    .map(|address| address.ip())
                    .collect()
            }
        };
        if addresses.is_empty() {
            return Err(FetchError::Transport(format!("{host} has no addresses")));
        }

        if let Some(ip) = addresses.iter().copied().find(|ip| !is_public(*ip)) {
            tracing::warn!(
                target: TRACING_TARGET_FETCH,
                host,
                %ip,
                "refusing content URL with a non-public address"
            );
            return Err(FetchError::ForbiddenHost(format!("{host} ({ip})")));
        }
        Ok(())
    }

    /// Sends the request, following at most [`MAX_REDIRECTS`] checked hops.
    async fn get(&self, mut target: Url) -> Result<Response, FetchError> {
        for _ in 0..=MAX_REDIRECTS {
            self.check_target(&target).await?;
            let response = self
                .http
                .get(target.clone())
                .send()
                .await
                .map_err(transport)?;
            if !response.status().is_redirection() {
                return Ok(response);
            }
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let Some(location) = location else {
                return Ok(response);
            };

            let next = target
                .join(&location)
                .map_err(|_| FetchError::UnsupportedUrl(location))?;
            tracing::debug!(
                target: TRACING_TARGET_FETCH,
                from = %target,
                to = %next,
                "following redirect"
            );
            target = next;
        }
        Err(FetchError::Transport(format!("more than {MAX_REDIRECTS} redirects")))
    }

    /// Reads at most `max_body_bytes` of the body.
    async fn read_capped(&self, mut response: Response) -> Result<Vec<u8>, FetchError> {
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(transport)? {
            let room = self.max_body_bytes - body.len();
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                tracing::debug!(
                    target: TRACING_TARGET_FETCH,
                    limit = self.max_body_bytes,
                    "body cut at the size limit"
                );
                break;
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, url: &str) -> Result<ExternalContent, FetchError> {
        let target = Url::parse(url).map_err(|_| FetchError::UnsupportedUrl(url.to_owned()))?;
        let response = self.get(target).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map_or(true, |value| value.contains("html"));
        let bytes = self.read_capped(response).await?;
        let body = String::from_utf8_lossy(&bytes);

        let content = if is_html {
            ExternalContent {
                url: url.to_owned(),
                title: self.html.title(&body),
                text: self.html.visible_text(&body),
            }
        } else {
            ExternalContent {
                url: url.to_owned(),
                title: None,
                text: collapse_whitespace(&body),
            }
        };

        tracing::debug!(
            target: TRACING_TARGET_FETCH,
            url,
            chars = content.text.len(),
            has_title = content.title.is_some(),
            "content fetched"
        );
        Ok(content)
    }
}

fn transport(err: reqwest::Error) -> FetchError {
    FetchError::Transport(err.to_string())
}

// ---------------------------------------------------------------------------
// Address classification
// ---------------------------------------------------------------------------

/// `true` for globally routable unicast addresses.
fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let reserved = a == 0
        || a >= 240
        // 100.64.0.0/10 shared address space
        || (a == 100 && (64..128).contains(&b))
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b == 18 || b == 19));
    !(reserved
        || ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast())
}

fn is_public_v6(ip: Ipv6Addr) -> bool {
    let [first, second, ..] = ip.segments();
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    let documentation = first == 0x2001 && second == 0x0db8;
    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || unique_local
        || link_local
        || documentation)
}

// ---------------------------------------------------------------------------
// HTML reduction
// ---------------------------------------------------------------------------

/// Regex-based HTML reducer. Good enough for article bodies; not a parser.
#[derive(Debug, Clone)]
struct HtmlText {
    title: Regex,
    invisible: Regex,
    block_end: Regex,
    tag: Regex,
}

impl HtmlText {
    fn new() -> Result<Self, FetchError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| FetchError::Transport(err.to_string()))
        };
        Ok(Self {
            title: compile(r"(?is)<title[^>]*>(.*?)</title>")?,
            invisible: compile(
                r"(?is)<(script|style|noscript|svg|head|nav|footer|aside)\b[^>]*>.*?</(script|style|noscript|svg|head|nav|footer|aside)>|<!--.*?-->",
            )?,
            block_end: compile(r"(?i)</(p|div|h[1-6]|li|section|article|tr)>|<br\s*/?>")?,
            tag: compile(r"(?s)<[^>]*>")?,
        })
    }

    fn title(&self, html: &str) -> Option<String> {
        self.title
            .captures(html)
            .and_then(|captures| captures.get(1))
            .map(|title| collapse_whitespace(&decode_entities(title.as_str())))
            .filter(|title| !title.is_empty())
    }

    fn visible_text(&self, html: &str) -> String {
        let text = self.invisible.replace_all(html, " ");
        let text = self.block_end.replace_all(&text, "\n");
        let text = self.tag.replace_all(&text, " ");
        let text = decode_entities(&text);
        text.lines()
            .map(collapse_whitespace)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
