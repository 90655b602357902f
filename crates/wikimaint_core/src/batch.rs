use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, warn};

use crate::lists::format_csv_row;
use crate::mediawiki::{WikiReadApi, WikiWriteApi};

pub const DEFAULT_MOVE_REASON: &str = "Batch move from CSV";
pub const DEFAULT_DELETE_REASON: &str = "Batch delete from CSV (delete to re-import)";
pub const DEFAULT_RATE_REASON: &str = "Batch rating gallery articles";
pub const RATING_CODES: &[&str] = &["UR", "ST", "UF", "FN", "CD", "LS", "GR"];
pub const PAGE_LIST_HEADER: &str = "Page title";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub item: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    pub item: String,
    pub reason: String,
}

/// Per-row outcome of a batch write operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub operation: &'static str,
    pub processed: usize,
    pub succeeded: Vec<String>,
    pub skipped: Vec<SkippedRow>,
    pub errors: Vec<RowError>,
    pub request_count: usize,
}

impl BatchReport {
    pub(crate) fn new(operation: &'static str) -> Self {
        Self {
            operation,
            processed: 0,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
            request_count: 0,
        }
    }

    pub(crate) fn skip(&mut self, item: impl Into<String>, reason: impl Into<String>) {
        let item = item.into();
        let reason = reason.into();
        debug!(operation = self.operation, item = %item, reason = %reason, "skipped row");
        self.skipped.push(SkippedRow { item, reason });
    }

    pub(crate) fn fail(&mut self, item: impl Into<String>, error: &anyhow::Error) {
        let item = item.into();
        warn!(operation = self.operation, item = %item, "row failed: {error:#}");
        self.errors.push(RowError {
            item,
            error: format!("{error:#}"),
        });
    }
}

#[derive(Debug, Clone)]
pub struct MoveOptions {
    pub no_redirect: bool,
    pub reason: String,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            no_redirect: true,
            reason: DEFAULT_MOVE_REASON.to_string(),
        }
    }
}

/// Move pages listed as `old,new` rows.
pub fn move_pages<A: WikiWriteApi>(
    api: &mut A,
    rows: &[Vec<String>],
    options: &MoveOptions,
) -> Result<BatchReport> {
    require_reason(&options.reason)?;
    let mut report = BatchReport::new("move");

    for row in rows {
        let (Some(from), Some(to)) = (non_blank_cell(row, 0), non_blank_cell(row, 1)) else {
            report.skip(row.join(","), "row needs an old and a new title");
            continue;
        };
        report.processed += 1;
        let label = format!("{from} -> {to}");
        match api.move_page(from, to, &options.reason, options.no_redirect) {
            Ok(()) => report.succeeded.push(label),
            Err(error) => report.fail(label, &error),
        }
    }

    report.request_count = api.request_count();
    Ok(report)
}

/// Delete the listed pages; titles that no longer exist are reported as skipped.
pub fn delete_pages<A: WikiWriteApi>(
    api: &mut A,
    titles: &[String],
    reason: &str,
) -> Result<BatchReport> {
    require_reason(reason)?;
    let mut report = BatchReport::new("delete");

    for title in titles.iter().map(|title| title.trim()) {
        if title.is_empty() {
            continue;
        }
        report.processed += 1;
        let result = api.page_exists(title).and_then(|exists| {
            if exists {
                api.delete_page(title, reason).map(|()| true)
            } else {
                Ok(false)
            }
        });
        match result {
            Ok(true) => report.succeeded.push(title.to_string()),
            Ok(false) => report.skip(title, "page does not exist"),
            Err(error) => report.fail(title, &error),
        }
    }

    report.request_count = api.request_count();
    Ok(report)
}

pub fn redirect_text(target: &str) -> String {
    format!("#REDIRECT [[{target}]]")
}

pub fn redirect_summary(target: &str) -> String {
    format!("Creating redirect to [[{target}]]")
}

/// Create redirects from `source,target` rows. Existing source pages are left alone.
pub fn create_redirects<A: WikiWriteApi>(api: &mut A, rows: &[Vec<String>]) -> Result<BatchReport> {
    let mut report = BatchReport::new("redirect");

    for row in rows {
        let (Some(source), Some(target)) = (non_blank_cell(row, 0), non_blank_cell(row, 1)) else {
            report.skip(row.join(","), "row needs a source and a target title");
            continue;
        };
        report.processed += 1;
        let label = format!("{source} -> {target}");
        let result = api.page_exists(source).and_then(|exists| {
            if exists {
                return Ok(false);
            }
            api.edit_page(source, &redirect_text(target), &redirect_summary(target))
                .map(|_| true)
        });
        match result {
            Ok(true) => report.succeeded.push(label),
            Ok(false) => report.skip(label, "source page already exists"),
            Err(error) => report.fail(label, &error),
        }
    }

    report.request_count = api.request_count();
    Ok(report)
}

/// Upper-cased rating code, if it is one the wiki accepts.
pub fn validate_rating(code: &str) -> Result<String> {
    let normalized = code.trim().to_uppercase();
    if !RATING_CODES.contains(&normalized.as_str()) {
        bail!(
            "unknown rating code `{}` (expected one of {})",
            code.trim(),
            RATING_CODES.join("/")
        );
    }
    Ok(normalized)
}

/// Change the article rating of each listed page via `action=change-rating`.
pub fn rate_pages<A: WikiWriteApi>(
    api: &mut A,
    titles: &[String],
    rating: &str,
    reason: &str,
) -> Result<BatchReport> {
    let rating = validate_rating(rating)?;
    require_reason(reason)?;
    let mut report = BatchReport::new("rate");

    for title in titles.iter().map(|title| title.trim()) {
        if title.is_empty() {
            continue;
        }
        report.processed += 1;
        let result = api.post_action(
            "change-rating",
            &[
                ("title", title.to_string()),
                ("rating-to", rating.clone()),
                ("reason", reason.to_string()),
            ],
        );
        match result {
            Ok(_) => report.succeeded.push(format!("{title} -> {rating}")),
            Err(error) => report.fail(title, &error),
        }
    }

    report.request_count = api.request_count();
    Ok(report)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageListReport {
    pub path: PathBuf,
    pub namespaces: Vec<i32>,
    pub count: usize,
    pub request_count: usize,
}

/// Write every title in `namespaces` to a one-column CSV.
pub fn export_page_list<A: WikiReadApi>(
    api: &mut A,
    namespaces: &[i32],
    output: &Path,
) -> Result<PageListReport> {
    let mut rendered = format_csv_row(&[PAGE_LIST_HEADER]);
    let mut count = 0usize;
    for namespace in namespaces {
        let titles = api
            .get_all_pages(*namespace)
            .with_context(|| format!("failed to list pages in namespace {namespace}"))?;
        for title in &titles {
            rendered.push_str(&format_csv_row(&[title]));
        }
        count += titles.len();
    }

    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(output, rendered).with_context(|| format!("failed to write {}", output.display()))?;

    Ok(PageListReport {
        path: output.to_path_buf(),
        namespaces: namespaces.to_vec(),
        count,
        request_count: api.request_count(),
    })
}

fn non_blank_cell(row: &[String], index: usize) -> Option<&str> {
    row.get(index)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn require_reason(reason: &str) -> Result<()> {
    if reason.trim().is_empty() {
        bail!("a non-empty reason is required");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{
        MoveOptions, create_redirects, delete_pages, export_page_list, move_pages, rate_pages,
        validate_rating,
    };
    use crate::testing::MockApi;

    fn rows(items: &[&[&str]]) -> Vec<Vec<String>> {
        items
            .iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect()
    }

    #[test]
    fn move_pages_skips_incomplete_rows_and_continues_after_errors() {
        let mut api = MockApi::default()
            .with_page("Alpha", 0, "a")
            .with_page("Beta", 0, "b")
            .fail_on("Beta");
        let report = move_pages(
            &mut api,
            &rows(&[&["Alpha", "Alpha (episode)"], &["", "Nothing"], &["Beta", "Gamma"]]),
            &MoveOptions::default(),
        )
        .expect("move");

        assert_eq!(report.processed, 2);
        assert_eq!(report.succeeded, vec!["Alpha -> Alpha (episode)"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].item, "Beta -> Gamma");
        assert_eq!(
            api.moves,
            vec![(
                "Alpha".to_string(),
                "Alpha (episode)".to_string(),
                "Batch move from CSV".to_string(),
                true
            )]
        );
        assert!(!api.pages.contains_key("Alpha"));
    }

    #[test]
    fn delete_pages_reports_missing_titles() {
        let mut api = MockApi::default().with_page("File:Old.png", 6, "x");
        let titles = vec!["File:Old.png".to_string(), "File:Gone.png".to_string()];
        let report =
            delete_pages(&mut api, &titles, super::DEFAULT_DELETE_REASON).expect("delete");

        assert_eq!(report.succeeded, vec!["File:Old.png"]);
        assert_eq!(report.skipped[0].item, "File:Gone.png");
        assert!(report.errors.is_empty());
        assert_eq!(
            api.deletes,
            vec![(
                "File:Old.png".to_string(),
                "Batch delete from CSV (delete to re-import)".to_string()
            )]
        );
    }

    #[test]
    fn delete_requires_reason() {
        let mut api = MockApi::default();
        let error = delete_pages(&mut api, &["A".to_string()], "  ").expect_err("must fail");
        assert!(error.to_string().contains("reason"));
    }

    #[test]
    fn redirects_skip_existing_sources() {
        let mut api = MockApi::default().with_page("Weslie", 0, "article");
        let report = create_redirects(
            &mut api,
            &rows(&[&["Weslie", "Weslie (character)"], &["Wes", "Weslie (character)"]]),
        )
        .expect("redirect");

        assert_eq!(report.succeeded, vec!["Wes -> Weslie (character)"]);
        assert_eq!(report.skipped[0].reason, "source page already exists");
        assert_eq!(
            api.edits,
            vec![(
                "Wes".to_string(),
                "#REDIRECT [[Weslie (character)]]".to_string(),
                "Creating redirect to [[Weslie (character)]]".to_string()
            )]
        );
    }

    #[test]
    fn rating_codes_are_validated_before_any_request() {
        assert_eq!(validate_rating(" gr ").expect("valid"), "GR");
        let mut api = MockApi::default();
        let error = rate_pages(&mut api, &["A".to_string()], "XX", "r").expect_err("must fail");
        assert!(error.to_string().contains("UR/ST/UF/FN/CD/LS/GR"));
        assert!(api.actions.is_empty());
    }

    #[test]
    fn rate_pages_posts_change_rating() {
        let mut api = MockApi::default();
        let report = rate_pages(
            &mut api,
            &["Gallery:Xh1".to_string(), " ".to_string()],
            "gr",
            super::DEFAULT_RATE_REASON,
        )
        .expect("rate");

        assert_eq!(report.processed, 1);
        assert_eq!(report.succeeded, vec!["Gallery:Xh1 -> GR"]);
        let (action, params) = &api.actions[0];
        assert_eq!(action, "change-rating");
        assert!(params.contains(&("rating-to".to_string(), "GR".to_string())));
        assert!(params.contains(&(
            "reason".to_string(),
            "Batch rating gallery articles".to_string()
        )));
    }

    #[test]
    fn export_page_list_writes_header_and_titles() {
        let temp = tempdir().expect("tempdir");
        let output = temp.path().join("out").join("pages_list.csv");
        let mut api = MockApi::default()
            .with_page("Main Page", 0, "")
            .with_page("Weslie, Jr.", 0, "")
            .with_page("File:A.png", 6, "");

        let report = export_page_list(&mut api, &[0], &output).expect("export");
        assert_eq!(report.count, 2);
        assert_eq!(
            fs::read_to_string(&output).expect("read"),
            "Page title\nMain Page\n\"Weslie, Jr.\"\n"
        );
    }
}
