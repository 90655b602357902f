use anyhow::Result;
use serde::Serialize;
use tracing::{debug, warn};

use crate::batch::RowError;
use crate::config::PageLinker;
use crate::diff::{DiffPreview, preview_diff};
use crate::mediawiki::{NS_FILE, WikiWriteApi};
use crate::normalize::{Classification, FixRule, classify_and_rewrite};
use crate::rules::NormalizerRules;

/// Human decisions during a batch run.
pub trait Reviewer {
    /// Whether to save the proposed edit shown by `diff`.
    fn approve(&mut self, title: &str, url: &str, diff: &DiffPreview) -> Result<bool>;
    /// Show a page that needs manual attention and wait until it has been seen.
    fn acknowledge(&mut self, title: &str, url: &str, message: &str) -> Result<()>;
    /// Called once per processed page with its final result.
    fn record(&mut self, _result: &PageResult) {}
}

/// Approves every edit and never waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

impl Reviewer for AutoApprove {
    fn approve(&mut self, _title: &str, _url: &str, _diff: &DiffPreview) -> Result<bool> {
        Ok(true)
    }

    fn acknowledge(&mut self, _title: &str, _url: &str, _message: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    /// Explicit titles; all File pages when `None`.
    pub titles: Option<Vec<String>>,
    pub limit: Option<usize>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageAction {
    Fixed,
    WouldFix,
    Declined,
    Unchanged,
    Compliant,
    Excluded,
    Manual,
    Blank,
    Missing,
    Failed,
}

impl PageAction {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Fixed => "FIXED",
            Self::WouldFix => "DRY-RUN",
            Self::Declined => "SKIPPED",
            Self::Unchanged | Self::Compliant => "OK",
            Self::Excluded | Self::Missing => "SKIP",
            Self::Manual => "MANUAL",
            Self::Blank => "BLANK",
            Self::Failed => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageResult {
    pub title: String,
    pub url: String,
    pub action: PageAction,
    pub rule: Option<FixRule>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub scanned: usize,
    pub fixed: usize,
    pub would_fix: usize,
    pub declined: usize,
    pub compliant: usize,
    pub manual: usize,
    pub blank: usize,
    pub missing: usize,
    pub dry_run: bool,
    pub pages: Vec<PageResult>,
    pub errors: Vec<RowError>,
    pub request_count: usize,
}

impl CleanupReport {
    fn push(&mut self, result: PageResult) {
        match result.action {
            PageAction::Fixed => self.fixed += 1,
            PageAction::WouldFix => self.would_fix += 1,
            PageAction::Declined => self.declined += 1,
            PageAction::Unchanged | PageAction::Compliant | PageAction::Excluded => {
                self.compliant += 1
            }
            PageAction::Manual => self.manual += 1,
            PageAction::Blank => self.blank += 1,
            PageAction::Missing => self.missing += 1,
            PageAction::Failed => {}
        }
        self.pages.push(result);
    }
}

/// Classify File pages one at a time and apply fixes the reviewer accepts.
pub fn run_file_cleanup<A, R>(
    api: &mut A,
    rules: &NormalizerRules,
    linker: &PageLinker,
    options: &CleanupOptions,
    reviewer: &mut R,
) -> Result<CleanupReport>
where
    A: WikiWriteApi,
    R: Reviewer,
{
    let mut titles = match &options.titles {
        Some(titles) => titles.clone(),
        None => api.get_all_pages(NS_FILE)?,
    };
    if let Some(limit) = options.limit {
        titles.truncate(limit);
    }

    let mut report = CleanupReport {
        dry_run: options.dry_run,
        ..CleanupReport::default()
    };

    for title in titles {
        report.scanned += 1;
        let url = linker.url(&title);
        let result = match clean_page(api, rules, &title, &url, options.dry_run, reviewer) {
            Ok(result) => result,
            Err(error) => {
                warn!(title = %title, "cleanup failed: {error:#}");
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
        reviewer.record(&result);
        report.push(result);
    }

    report.request_count = api.request_count();
    Ok(report)
}

fn clean_page<A, R>(
    api: &mut A,
    rules: &NormalizerRules,
    title: &str,
    url: &str,
    dry_run: bool,
    reviewer: &mut R,
) -> Result<PageResult>
where
    A: WikiWriteApi,
    R: Reviewer,
{
    let page_result = |action: PageAction, rule: Option<FixRule>, message: String| PageResult {
        title: title.to_string(),
        url: url.to_string(),
        action,
        rule,
        message,
    };

    let Some(text) = api.get_page_text(title)? else {
        return Ok(page_result(
            PageAction::Missing,
            None,
            "does not exist".to_string(),
        ));
    };

    let outcome = classify_and_rewrite(title, &text, rules);
    let classification = outcome.classification;
    debug!(title, classification = classification.as_str(), "classified");

    match classification {
        Classification::Blank => {
            let message =
                "empty file description. No automatic fix; please check manually.".to_string();
            reviewer.acknowledge(title, url, &message)?;
            Ok(page_result(PageAction::Blank, None, message))
        }
        Classification::Manual => {
            let message = format!(
                "{}. No automatic fix; please check manually.",
                outcome.describe_issues()
            );
            reviewer.acknowledge(title, url, &message)?;
            Ok(page_result(PageAction::Manual, None, message))
        }
        Classification::Compliant if outcome.excluded => Ok(page_result(
            PageAction::Excluded,
            None,
            "has been cleaned already".to_string(),
        )),
        Classification::Compliant => Ok(page_result(
            PageAction::Compliant,
            None,
            "fully compliant".to_string(),
        )),
        Classification::Fixable => {
            let (Some(rule), Some(new_text)) = (outcome.rule, outcome.new_text) else {
                return Ok(page_result(
                    PageAction::Unchanged,
                    None,
                    "no change needed".to_string(),
                ));
            };
            if !outcome.changed {
                return Ok(page_result(
                    PageAction::Unchanged,
                    Some(rule),
                    "no change needed".to_string(),
                ));
            }
            if dry_run {
                return Ok(page_result(
                    PageAction::WouldFix,
                    Some(rule),
                    rule.edit_summary().to_string(),
                ));
            }
            if rule.needs_review() {
                let diff = preview_diff(&text, &new_text);
                if !reviewer.approve(title, url, &diff)? {
                    return Ok(page_result(
                        PageAction::Declined,
                        Some(rule),
                        "edit declined".to_string(),
                    ));
                }
            }
            api.edit_page(title, &new_text, rule.edit_summary())?;
            Ok(page_result(
                PageAction::Fixed,
                Some(rule),
                rule.edit_summary().to_string(),
            ))
        }
    }
}
