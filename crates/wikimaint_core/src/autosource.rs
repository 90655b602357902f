use std::collections::BTreeSet;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::blocking::multipart::{Form, Part};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::batch::RowError;
use crate::cleanup::{PageAction, PageResult, Reviewer};
use crate::config::{AutoSourceSection, PageLinker};
use crate::diff::preview_diff;
use crate::download::local_file_name;
use crate::episodes::EpisodeRef;
use crate::mediawiki::{NS_FILE, WikiWriteApi};
use crate::normalize::replace_summary;

const CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(120);

/// Raw top-ranked answer from a frame classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prediction {
    pub season: String,
    pub episode: String,
}

/// Identifies which episode a screenshot comes from.
pub trait FrameClassifier {
    /// `image` holds the file bytes as fetched through the wiki client.
    fn classify(&mut self, file_name: &str, image: &[u8]) -> Result<Prediction>;
}

/// Calls a Gradio app through its REST queue API.
pub struct GradioClassifier {
    client: Client,
    base_url: String,
    api_name: String,
}

impl GradioClassifier {
    pub fn new(base_url: &str, api_name: &str, user_agent: &str) -> Result<Self> {
        if base_url.trim().is_empty() {
            bail!("classifier URL is not configured ([autosource].classifier_url)");
        }
        let client = Client::builder()
            .timeout(CLASSIFIER_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .context("failed to build classifier HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_name: api_name.trim().trim_start_matches('/').to_string(),
        })
    }

    pub fn from_config(section: &AutoSourceSection, user_agent: &str) -> Result<Self> {
        Self::new(&section.classifier_url, &section.api_name, user_agent)
    }

    fn call_url(&self) -> String {
        format!("{}/gradio_api/call/{}", self.base_url, self.api_name)
    }

    /// Upload the image into the app's temp storage and return its server path.
    fn upload(&self, file_name: &str, image: &[u8]) -> Result<String> {
        let upload_url = format!("{}/gradio_api/upload", self.base_url);
        let part = Part::bytes(image.to_vec()).file_name(file_name.to_string());
        let response = self
            .client
            .post(&upload_url)
            .multipart(Form::new().part("files", part))
            .send()
            .with_context(|| format!("failed to upload {file_name} to {upload_url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("classifier upload failed with HTTP {status}");
        }
        let paths: Value = response
            .json()
            .context("failed to decode classifier upload response")?;
        uploaded_path(&paths)
    }
}

impl FrameClassifier for GradioClassifier {
    fn classify(&mut self, file_name: &str, image: &[u8]) -> Result<Prediction> {
        let server_path = self.upload(file_name, image)?;
        debug!(file_name, server_path = %server_path, "uploaded frame");
        let body = json!({
            "data": [
                {
                    "path": server_path,
                    "orig_name": file_name,
                    "meta": {"_type": "gradio.FileData"}
                },
                1,
                ""
            ]
        });
        let call_url = self.call_url();
        let response = self
            .client
            .post(&call_url)
            .json(&body)
            .send()
            .with_context(|| format!("failed to call {call_url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("classifier request failed with HTTP {status}");
        }
        let queued: Value = response
            .json()
            .context("failed to decode classifier queue response")?;
        let event_id = queued
            .get("event_id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("classifier response has no event_id"))?
            .to_string();
        debug!(event_id = %event_id, "classifier job queued");

        let result_url = format!("{call_url}/{event_id}");
        let stream = self
            .client
            .get(&result_url)
            .send()
            .with_context(|| format!("failed to read {result_url}"))?
            .text()
            .context("failed to read classifier event stream")?;
        let data = parse_event_stream(&stream)?;
        prediction_from_outputs(&data)
    }
}

/// First server path from the JSON list returned by `/gradio_api/upload`.
pub fn uploaded_path(response: &Value) -> Result<String> {
    response
        .as_array()
        .and_then(|paths| paths.first())
        .and_then(Value::as_str)
        .filter(|path| !path.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("classifier upload returned no file path: {response}"))
}

/// Extract the `data:` payload of the `complete` event from a Gradio event stream.
pub fn parse_event_stream(stream: &str) -> Result<Value> {
    let mut event = "";
    for line in stream.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            event = name.trim();
            continue;
        }
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        match event {
            "complete" => {
                return serde_json::from_str(data.trim())
                    .context("failed to decode classifier result");
            }
            "error" => bail!("classifier reported an error: {}", data.trim()),
            _ => {}
        }
    }
    bail!("classifier stream ended without a result")
}

/// First two outputs of the classifier as season and episode text.
pub fn prediction_from_outputs(outputs: &Value) -> Result<Prediction> {
    let items = outputs
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("classifier result is not a list"))?;
    if items.len() < 2 {
        bail!("classifier returned {} outputs, expected at least 2", items.len());
    }
    Ok(Prediction {
        season: output_text(&items[0]),
        episode: output_text(&items[1]),
    })
}

fn output_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Season code is the first token before a colon or whitespace, narrowed to
/// `[A-Za-z0-9_+-]`; episode is the first digit run.
pub fn parse_prediction(prediction: &Prediction) -> Option<EpisodeRef> {
    let first = prediction
        .season
        .trim()
        .split(|ch: char| ch == ':' || ch == '：' || ch.is_whitespace())
        .next()
        .unwrap_or_default();
    let code_len = first
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || matches!(ch, '_' | '+' | '-')))
        .unwrap_or(first.len());
    let season = if code_len == 0 { first } else { &first[..code_len] };

    let episode = prediction
        .episode
        .split(|ch: char| !ch.is_ascii_digit())
        .find(|run| !run.is_empty())?;

    if season.is_empty() {
        return None;
    }
    Some(EpisodeRef {
        season: season.to_string(),
        number: episode.to_string(),
    })
}

pub fn source_summary(episode: &EpisodeRef, source_flag: &str) -> String {
    format!("{{{{fi|s={episode}|sflag={source_flag}}}}}")
}

#[derive(Debug, Clone)]
pub struct AutoSourceOptions {
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub delay: Duration,
}

impl Default for AutoSourceOptions {
    fn default() -> Self {
        Self {
            limit: None,
            dry_run: false,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoSourceReport {
    pub candidates: usize,
    pub processed: usize,
    pub saved: usize,
    pub dry_run: bool,
    pub pages: Vec<PageResult>,
    pub errors: Vec<RowError>,
    pub request_count: usize,
}

/// File pages in both categories, sorted by title.
pub fn source_candidates<A: WikiWriteApi>(
    api: &mut A,
    settings: &AutoSourceSection,
) -> Result<Vec<String>> {
    let first: BTreeSet<String> = api
        .get_category_members(&settings.category_a, Some(NS_FILE))
        .with_context(|| format!("failed to list {}", settings.category_a))?
        .into_iter()
        .collect();
    let second: BTreeSet<String> = api
        .get_category_members(&settings.category_b, Some(NS_FILE))
        .with_context(|| format!("failed to list {}", settings.category_b))?
        .into_iter()
        .collect();
    Ok(first.intersection(&second).cloned().collect())
}

/// Fill the Summary of unsourced screenshots with the classifier's episode guess.
pub fn run_auto_source<A, C, R>(
    api: &mut A,
    classifier: &mut C,
    settings: &AutoSourceSection,
    linker: &PageLinker,
    options: &AutoSourceOptions,
    reviewer: &mut R,
) -> Result<AutoSourceReport>
where
    A: WikiWriteApi,
    C: FrameClassifier,
    R: Reviewer,
{
    let mut titles = source_candidates(api, settings)?;
    let mut report = AutoSourceReport {
        candidates: titles.len(),
        dry_run: options.dry_run,
        ..AutoSourceReport::default()
    };
    info!(candidates = titles.len(), "found file pages in intersection");
    if let Some(limit) = options.limit {
        titles.truncate(limit);
    }

    for title in titles {
        report.processed += 1;
        let url = linker.url(&title);
        let result = match source_page(api, classifier, settings, &title, &url, options, reviewer)
        {
            Ok(result) => result,
            Err(error) => {
                warn!(title = %title, "auto-source failed: {error:#}");
                report.errors.push(RowError {
                    item: title.clone(),
                    error: format!("{error:#}"),
                });
                PageResult {
                    title,
                    url,
                    action: PageAction::Failed,
                    rule: None,
                    message: format!("{error:#}"),
                }
            }
        };
        if result.action == PageAction::Fixed {
            report.saved += 1;
            if !options.delay.is_zero() {
                sleep(options.delay);
            }
        }
        reviewer.record(&result);
        report.pages.push(result);
    }

    report.request_count = api.request_count();
    Ok(report)
}

fn source_page<A, C, R>(
    api: &mut A,
    classifier: &mut C,
    settings: &AutoSourceSection,
    title: &str,
    url: &str,
    options: &AutoSourceOptions,
    reviewer: &mut R,
) -> Result<PageResult>
where
    A: WikiWriteApi,
    C: FrameClassifier,
    R: Reviewer,
{
    let page_result = |action: PageAction, message: String| PageResult {
        title: title.to_string(),
        url: url.to_string(),
        action,
        rule: None,
        message,
    };

    let Some(text) = api.get_page_text(title)? else {
        return Ok(page_result(PageAction::Missing, "does not exist".to_string()));
    };
    let is_file_page = title
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("file:"));
    if !is_file_page {
        return Ok(page_result(PageAction::Excluded, "not a file page".to_string()));
    }

    let Some(file_url) = api.get_file_url(title)? else {
        return Ok(page_result(
            PageAction::Missing,
            "could not resolve the file URL".to_string(),
        ));
    };
    let mut image = Vec::new();
    let bytes = api
        .fetch_url(&file_url, &mut image)
        .with_context(|| format!("failed to fetch {file_url}"))?;
    debug!(title, file_url = %file_url, bytes, "classifying frame");

    let file_name = local_file_name(title)?;
    let prediction = classifier
        .classify(&file_name, &image)
        .with_context(|| format!("classifier failed for {file_name}"))?;
    let Some(episode) = parse_prediction(&prediction) else {
        return Ok(page_result(
            PageAction::Manual,
            format!(
                "cannot parse season/episode from `{}` / `{}`",
                prediction.season, prediction.episode
            ),
        ));
    };

    let replacement = replace_summary(&text, &source_summary(&episode, &settings.source_flag));
    if !replacement.changed {
        return Ok(page_result(PageAction::Unchanged, episode.to_string()));
    }
    if options.dry_run {
        return Ok(page_result(PageAction::WouldFix, episode.to_string()));
    }

    let diff = preview_diff(&text, &replacement.text);
    if !reviewer.approve(title, url, &diff)? {
        return Ok(page_result(PageAction::Declined, episode.to_string()));
    }
    api.edit_page(title, &replacement.text, &settings.edit_summary)?;
    Ok(page_result(PageAction::Fixed, episode.to_string()))
}
