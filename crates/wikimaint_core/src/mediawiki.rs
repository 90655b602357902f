use std::env;
use std::io::Write;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::WikiConfig;

pub const NS_MAIN: i32 = 0;
pub const NS_FILE: i32 = 6;

/// Outcome of a successful `action=edit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditResult {
    pub title: String,
    pub nochange: bool,
    pub new_revision_id: Option<i64>,
}

pub trait WikiReadApi {
    fn get_all_pages(&mut self, namespace: i32) -> Result<Vec<String>>;
    /// Members of `category`, restricted to `namespace` when given.
    fn get_category_members(
        &mut self,
        category: &str,
        namespace: Option<i32>,
    ) -> Result<Vec<String>>;
    /// Current wikitext, or `None` when the page does not exist.
    fn get_page_text(&mut self, title: &str) -> Result<Option<String>>;
    fn page_exists(&mut self, title: &str) -> Result<bool>;
    /// Original upload URL of a file page, or `None` when there is no file.
    fn get_file_url(&mut self, file_name: &str) -> Result<Option<String>>;
    /// Stream the body of an arbitrary URL into `sink`, returning the byte count.
    fn fetch_url(&mut self, url: &str, sink: &mut dyn Write) -> Result<u64>;
    fn request_count(&self) -> usize;
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn logout(&mut self) -> Result<()>;
    fn edit_page(&mut self, title: &str, content: &str, summary: &str) -> Result<EditResult>;
    fn move_page(&mut self, from: &str, to: &str, reason: &str, no_redirect: bool) -> Result<()>;
    fn delete_page(&mut self, title: &str, reason: &str) -> Result<()>;
    /// POST a token-bearing action that has no dedicated method.
    fn post_action(&mut self, action: &str, params: &[(&str, String)]) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    /// Sent as `Referer` on every request, file downloads included.
    pub referer: Option<String>,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: u32,
    pub max_write_retries: u32,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &WikiConfig) -> Self {
        Self {
            api_url: config.api_url_owned(),
            user_agent: config.user_agent(),
            referer: Some(format!("{}/", config.wiki_url().trim_end_matches('/'))),
            timeout_ms: env_number("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_number("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_number("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_number("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_number("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_number("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

/// Credentials read from `WIKI_BOT_USER` / `WIKI_BOT_PASS`.
#[derive(Debug, Clone)]
pub struct BotCredentials {
    pub username: String,
    pub password: String,
}

impl BotCredentials {
    pub fn from_env() -> Result<Self> {
        let username = env::var("WIKI_BOT_USER").unwrap_or_default();
        let password = env::var("WIKI_BOT_PASS").unwrap_or_default();
        if username.trim().is_empty() || password.is_empty() {
            bail!("WIKI_BOT_USER and WIKI_BOT_PASS must be set for write commands");
        }
        Ok(Self {
            username: username.trim().to_string(),
            password,
        })
    }
}

pub struct MediaWikiClient {
    http: Client,
    config: MediaWikiClientConfig,
    last_sent: Option<Instant>,
    requests: usize,
    csrf_token: Option<String>,
    logged_in: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Read,
    Write,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("wiki API URL is not configured (set WIKI_API_URL or [wiki].api_url)");
        }
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .default_headers(default_headers(config.referer.as_deref())?)
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            http,
            config,
            last_sent: None,
            requests: 0,
            csrf_token: None,
            logged_in: false,
        })
    }

    pub fn from_config(config: &WikiConfig) -> Result<Self> {
        Self::new(MediaWikiClientConfig::from_config(config))
    }

    /// Build a client and log in with the bot credentials from the environment.
    pub fn login_from_env(config: &WikiConfig) -> Result<Self> {
        let credentials = BotCredentials::from_env()?;
        let mut client = Self::from_config(config)?;
        client.login(&credentials.username, &credentials.password)?;
        Ok(client)
    }

    /// Send the request built by `build`, retrying transient failures.
    fn send_with_retry<F>(&mut self, kind: RequestKind, what: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let budget = match kind {
            RequestKind::Read => self.config.max_retries,
            RequestKind::Write => self.config.max_write_retries,
        };
        let mut attempt = 0;
        loop {
            self.throttle(kind);
            match build(&self.http).send() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    if attempt >= budget || !is_retryable_status(status) {
                        bail!("{what} failed with HTTP {status}");
                    }
                }
                Err(error) => {
                    if attempt >= budget || !is_retryable_error(&error) {
                        return Err(error).with_context(|| format!("{what} failed"));
                    }
                }
            }
            self.backoff(attempt, kind);
            attempt += 1;
        }
    }

    fn api_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let endpoint = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let pairs = api_pairs(params);
        let response = self.send_with_retry(RequestKind::Read, "MediaWiki API request", |http| {
            http.get(endpoint.clone()).query(&pairs)
        })?;
        decode_api_response(response)
    }

    fn api_post(&mut self, params: &[(&str, String)], kind: RequestKind) -> Result<Value> {
        let endpoint = self.config.api_url.clone();
        let pairs = api_pairs(params);
        let response = self.send_with_retry(kind, "MediaWiki API request", |http| {
            http.post(endpoint.as_str()).form(&pairs)
        })?;
        decode_api_response(response)
    }

    fn throttle(&mut self, kind: RequestKind) {
        let spacing = Duration::from_millis(match kind {
            RequestKind::Read => self.config.rate_limit_read_ms,
            RequestKind::Write => self.config.rate_limit_write_ms,
        });
        if let Some(remaining) = self
            .last_sent
            .and_then(|last| spacing.checked_sub(last.elapsed()))
        {
            sleep(remaining);
        }
        self.last_sent = Some(Instant::now());
        self.requests += 1;
    }

    fn backoff(&self, attempt: u32, kind: RequestKind) {
        let factor = if kind == RequestKind::Write { 2 } else { 1 };
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|now| u64::from(now.subsec_millis() % 100))
            .unwrap_or(0);
        let delay_ms = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.min(16)))
            .saturating_mul(factor)
            .saturating_add(jitter);
        warn!(attempt, delay_ms, "retrying MediaWiki request");
        sleep(Duration::from_millis(delay_ms));
    }

    /// `meta=tokens` for the given token type (`login`, `csrf`).
    fn fetch_token(&mut self, token_type: &str) -> Result<String> {
        let response = self.api_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", token_type.to_string()),
        ])?;
        response
            .pointer(&format!("/query/tokens/{token_type}token"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .with_context(|| format!("MediaWiki returned no {token_type} token"))
    }

    fn csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let token = self.fetch_token("csrf")?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    /// Follow `{prefix}continue` until a `list=` query is exhausted.
    fn list_titles(
        &mut self,
        list: &str,
        prefix: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<String>> {
        let limit_key = format!("{prefix}limit");
        let continue_key = format!("{prefix}continue");
        let mut titles = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", list.to_string()),
                (limit_key.as_str(), "max".to_string()),
            ];
            params.extend(filters.iter().map(|(key, value)| (*key, value.clone())));
            if let Some(cursor) = &cursor {
                params.push((continue_key.as_str(), cursor.clone()));
            }

            let response = self.api_get(&params)?;
            titles.extend(list_entry_titles(&response, list));
            cursor = continuation(&response, &continue_key);
            if cursor.is_none() {
                break;
            }
        }

        debug!(list, count = titles.len(), "listed titles");
        Ok(titles)
    }

    fn query_page(&mut self, params: Vec<(&str, String)>) -> Result<Option<PageInfo>> {
        let response = self.api_get(&params)?;
        let parsed: PageQuery =
            serde_json::from_value(response).context("failed to decode page query response")?;
        Ok(parsed
            .query
            .pages
            .into_iter()
            .next()
            .filter(|page| !page.missing && !page.invalid))
    }
}

impl WikiReadApi for MediaWikiClient {
    fn get_all_pages(&mut self, namespace: i32) -> Result<Vec<String>> {
        self.list_titles("allpages", "ap", &[("apnamespace", namespace.to_string())])
    }

    fn get_category_members(
        &mut self,
        category: &str,
        namespace: Option<i32>,
    ) -> Result<Vec<String>> {
        let category = category.trim();
        let title = if category.starts_with("Category:") {
            category.to_string()
        } else {
            format!("Category:{category}")
        };
        let scope = match namespace {
            Some(namespace) => ("cmnamespace", namespace.to_string()),
            None => ("cmtype", "page|file".to_string()),
        };
        self.list_titles("categorymembers", "cm", &[("cmtitle", title), scope])
    }

    fn get_page_text(&mut self, title: &str) -> Result<Option<String>> {
        let page = self.query_page(vec![
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        Ok(page.and_then(|page| {
            page.revisions
                .into_iter()
                .next()
                .and_then(|revision| revision.slots.main)
                .map(|slot| slot.content)
        }))
    }

    fn page_exists(&mut self, title: &str) -> Result<bool> {
        let page = self.query_page(vec![
            ("action", "query".to_string()),
            ("titles", title.to_string()),
        ])?;
        Ok(page.is_some())
    }

    fn get_file_url(&mut self, file_name: &str) -> Result<Option<String>> {
        let page = self.query_page(vec![
            ("action", "query".to_string()),
            ("titles", file_title(file_name)),
            ("prop", "imageinfo".to_string()),
            ("iiprop", "url".to_string()),
        ])?;
        Ok(page.and_then(|page| page.imageinfo.into_iter().next().map(|info| info.url)))
    }

    fn fetch_url(&mut self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        let target = Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
        let mut response = self.send_with_retry(
            RequestKind::Read,
            &format!("download of {url}"),
            |http| http.get(target.clone()),
        )?;
        response
            .copy_to(sink)
            .with_context(|| format!("failed to read body of {url}"))
    }

    fn request_count(&self) -> usize {
        self.requests
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let login_token = self.fetch_token("login")?;
        let response = self.api_post(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            RequestKind::Write,
        )?;
        let result = response.pointer("/login/result").and_then(Value::as_str);
        if result != Some("Success") {
            let reason = response
                .pointer("/login/reason")
                .and_then(Value::as_str)
                .or(result)
                .unwrap_or("unknown error");
            bail!("MediaWiki login failed: {reason}");
        }
        self.csrf_token = None;
        self.logged_in = true;
        debug!(user = username, "logged in");
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        if !self.logged_in {
            return Ok(());
        }
        let token = self.csrf_token()?;
        self.api_post(
            &[("action", "logout".to_string()), ("token", token)],
            RequestKind::Write,
        )?;
        self.csrf_token = None;
        self.logged_in = false;
        Ok(())
    }

    fn edit_page(&mut self, title: &str, content: &str, summary: &str) -> Result<EditResult> {
        let token = self.csrf_token()?;
        let response = self.api_post(
            &[
                ("action", "edit".to_string()),
                ("title", title.to_string()),
                ("text", content.to_string()),
                ("summary", summary.to_string()),
                ("bot", "1".to_string()),
                ("token", token),
            ],
            RequestKind::Write,
        )?;
        edit_result(title, response)
    }

    fn move_page(&mut self, from: &str, to: &str, reason: &str, no_redirect: bool) -> Result<()> {
        let token = self.csrf_token()?;
        let mut params = vec![
            ("action", "move".to_string()),
            ("from", from.to_string()),
            ("to", to.to_string()),
            ("reason", reason.to_string()),
            ("movetalk", "1".to_string()),
        ];
        if no_redirect {
            params.push(("noredirect", "1".to_string()));
        }
        params.push(("token", token));
        self.api_post(&params, RequestKind::Write)
            .with_context(|| format!("failed to move {from} to {to}"))?;
        Ok(())
    }

    fn delete_page(&mut self, title: &str, reason: &str) -> Result<()> {
        let token = self.csrf_token()?;
        let outcome = self.api_post(
            &[
                ("action", "delete".to_string()),
                ("title", title.to_string()),
                ("reason", reason.to_string()),
                ("token", token),
            ],
            RequestKind::Write,
        );
        match outcome {
            Err(error) if error.to_string().contains("[missingtitle]") => {
                debug!(title, "already deleted");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    fn post_action(&mut self, action: &str, params: &[(&str, String)]) -> Result<Value> {
        let token = self.csrf_token()?;
        let mut pairs = vec![("action", action.to_string())];
        pairs.extend(params.iter().map(|(key, value)| (*key, value.clone())));
        pairs.push(("token", token));
        self.api_post(&pairs, RequestKind::Write)
            .with_context(|| format!("action={action} failed"))
    }
}

fn default_headers(referer: Option<&str>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(referer) = referer.map(str::trim).filter(|value| !value.is_empty()) {
        let value = HeaderValue::from_str(referer)
            .with_context(|| format!("invalid Referer header value: {referer}"))?;
        headers.insert(REFERER, value);
    }
    Ok(headers)
}

/// Prefix a bare file name with `File:`.
pub fn file_title(file_name: &str) -> String {
    let trimmed = file_name.trim();
    if trimmed.starts_with("File:") || trimmed.starts_with("Image:") {
        trimmed.to_string()
    } else {
        format!("File:{trimmed}")
    }
}

/// Request pairs with `format=json&formatversion=2`; empty values are dropped.
fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    [("format", "json"), ("formatversion", "2")]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .chain(
            params
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(key, value)| ((*key).to_string(), value.clone())),
        )
        .collect()
}

fn decode_api_response(response: Response) -> Result<Value> {
    let payload: Value = response
        .json()
        .context("failed to decode MediaWiki API JSON response")?;
    check_api_error(payload)
}

fn check_api_error(payload: Value) -> Result<Value> {
    let Some(error) = payload.get("error") else {
        return Ok(payload);
    };
    let code = error
        .get("code")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error");
    let info = error
        .get("info")
        .and_then(Value::as_str)
        .unwrap_or("unknown info");
    bail!("MediaWiki API error [{code}]: {info}")
}

fn list_entry_titles(response: &Value, list: &str) -> Vec<String> {
    response
        .pointer(&format!("/query/{list}"))
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("title").and_then(Value::as_str))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn continuation(response: &Value, key: &str) -> Option<String> {
    response
        .get("continue")
        .and_then(|cont| cont.get(key))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn edit_result(title: &str, response: Value) -> Result<EditResult> {
    let Some(edit) = response.get("edit") else {
        bail!("edit response for {title} has no `edit` payload");
    };
    let result = edit.get("result").and_then(Value::as_str).unwrap_or("unknown");
    if result != "Success" {
        bail!("MediaWiki edit failed for {title}: {result}");
    }
    Ok(EditResult {
        title: edit
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(title)
            .to_string(),
        nochange: edit.get("nochange").and_then(Value::as_bool).unwrap_or(false),
        new_revision_id: edit.get("newrevid").and_then(Value::as_i64),
    })
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct PageQuery {
    #[serde(default)]
    query: PageQueryBody,
}

#[derive(Debug, Deserialize, Default)]
struct PageQueryBody {
    #[serde(default)]
    pages: Vec<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    revisions: Vec<Revision>,
    #[serde(default)]
    imageinfo: Vec<ImageInfo>,
}

#[derive(Debug, Deserialize)]
struct Revision {
    #[serde(default)]
    slots: RevisionSlots,
}

#[derive(Debug, Deserialize, Default)]
struct RevisionSlots {
    main: Option<MainSlot>,
}

#[derive(Debug, Deserialize)]
struct MainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ImageInfo {
    url: String,
}
