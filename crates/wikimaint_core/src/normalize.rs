use std::fmt;

use serde::Serialize;

use crate::rules::NormalizerRules;
use crate::sections::{LICENSING_TITLE, SUMMARY_TITLE, Section, SegmentedPage, segment};
use crate::templates::{TemplateAllowList, TemplateCheck, classify_section};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Compliant,
    Fixable,
    Manual,
    Blank,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::Fixable => "fixable",
            Self::Manual => "manual",
            Self::Blank => "blank",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixRule {
    /// No headers: wrap the body into a default Summary and Licensing pair.
    DefaultSections,
    /// Licensing only: put a generated Summary above it.
    SummaryAboveLicensing,
    /// Text before the first header and no Summary: move it into one.
    LeadingTextToSummary,
}

impl FixRule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DefaultSections => "default_sections",
            Self::SummaryAboveLicensing => "summary_above_licensing",
            Self::LeadingTextToSummary => "leading_text_to_summary",
        }
    }

    pub fn edit_summary(self) -> &'static str {
        match self {
            Self::DefaultSections => "autofix file description: default sections",
            Self::SummaryAboveLicensing => "autofix file description: default summary section",
            Self::LeadingTextToSummary => "autofix file description: add summary section",
        }
    }

    /// Rewrites that move free text around get a human look first; the
    /// generated summary above an existing licensing block does not.
    pub fn needs_review(self) -> bool {
        !matches!(self, Self::SummaryAboveLicensing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    EmptyBody,
    ExtraSections { titles: Vec<String> },
    StructuralMismatch { detail: String },
    MalformedTemplate { section: String },
    NotSingleTemplate { section: String, found: Option<String> },
    ExcessBlankLines { section: String, lines: usize },
    TrailingBlankLines { section: String, lines: usize },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyBody => write!(f, "empty file description"),
            Self::ExtraSections { titles } => {
                write!(f, "contains extra sections [{}]", titles.join(", "))
            }
            Self::StructuralMismatch { detail } => write!(f, "unusual structure: {detail}"),
            Self::MalformedTemplate { section } => {
                write!(f, "{section} section has unbalanced or nameless template braces")
            }
            Self::NotSingleTemplate {
                section,
                found: Some(name),
            } => write!(f, "{section} section uses unrecognized template `{name}`"),
            Self::NotSingleTemplate {
                section,
                found: None,
            } => write!(f, "{section} section is not a single template"),
            Self::ExcessBlankLines { section, lines } => {
                write!(f, "{section} section has {lines} blank lines after its header")
            }
            Self::TrailingBlankLines { section, lines } => {
                write!(f, "{section} section ends with {lines} extra blank lines")
            }
        }
    }
}

/// Result of [`classify_and_rewrite`]. `new_text` is only set for fixable
/// pages; `changed` is false whenever there is nothing to save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub classification: Classification,
    pub rule: Option<FixRule>,
    pub excluded: bool,
    pub issues: Vec<Issue>,
    pub new_text: Option<String>,
    pub changed: bool,
}

impl Outcome {
    fn compliant() -> Self {
        Self {
            classification: Classification::Compliant,
            rule: None,
            excluded: false,
            issues: Vec::new(),
            new_text: None,
            changed: false,
        }
    }

    fn manual(issues: Vec<Issue>) -> Self {
        Self {
            classification: Classification::Manual,
            issues,
            ..Self::compliant()
        }
    }

    fn fixable(rule: FixRule, old_text: &str, new_text: String) -> Self {
        let changed = !texts_equivalent(&new_text, old_text);
        Self {
            classification: Classification::Fixable,
            rule: Some(rule),
            new_text: Some(new_text),
            changed,
            ..Self::compliant()
        }
    }

    pub fn edit_summary(&self) -> Option<&'static str> {
        self.rule.map(FixRule::edit_summary)
    }

    pub fn describe_issues(&self) -> String {
        self.issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Classify a file-description page and propose a rewrite when a known rule
/// applies. Pure: the same title, text and rules always give the same result.
pub fn classify_and_rewrite(title: &str, text: &str, rules: &NormalizerRules) -> Outcome {
    if text.trim().is_empty() {
        return Outcome {
            classification: Classification::Blank,
            issues: vec![Issue::EmptyBody],
            ..Outcome::compliant()
        };
    }
    if rules.is_skipped_title(title) {
        return Outcome {
            excluded: true,
            ..Outcome::compliant()
        };
    }

    let page = segment(text);
    let extras = extra_section_titles(&page);
    if !extras.is_empty() {
        return Outcome::manual(vec![Issue::ExtraSections { titles: extras }]);
    }

    if !page.has_headers() {
        return Outcome::fixable(
            FixRule::DefaultSections,
            text,
            render_default_sections(text, rules),
        );
    }

    let sections = page.section_map();
    let summary = sections.get(SUMMARY_TITLE);
    let licensing = sections.get(LICENSING_TITLE);

    match (summary, licensing) {
        (None, Some(licensing)) => Outcome::fixable(
            FixRule::SummaryAboveLicensing,
            text,
            render_summary_above_licensing(title, licensing, rules),
        ),
        (None, None) if !page.leading.trim().is_empty() => Outcome::fixable(
            FixRule::LeadingTextToSummary,
            text,
            render_leading_text_summary(&page),
        ),
        (Some(summary), Some(licensing)) => {
            let issues = compliance_issues(summary, licensing, rules);
            if issues.is_empty() {
                Outcome::compliant()
            } else {
                Outcome::manual(issues)
            }
        }
        (Some(_), None) => Outcome::manual(vec![Issue::StructuralMismatch {
            detail: "summary section without licensing".to_string(),
        }]),
        (None, None) => Outcome::manual(vec![Issue::StructuralMismatch {
            detail: "no recognizable sections".to_string(),
        }]),
    }
}

/// Equal, or equal after dropping one trailing `\n` from either side.
pub fn texts_equivalent(left: &str, right: &str) -> bool {
    left == right
        || left.strip_suffix('\n') == Some(right)
        || right.strip_suffix('\n') == Some(left)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryReplacement {
    pub text: String,
    pub changed: bool,
}

/// Replace the body of the first Summary section with `content`, or insert a
/// Summary section above the first header (at the top when there is none).
pub fn replace_summary(text: &str, content: &str) -> SummaryReplacement {
    let content = content.trim();
    let page = segment(text);

    let new_text = if let Some(summary) = page
        .sections
        .iter()
        .find(|section| section.key() == SUMMARY_TITLE)
    {
        let section_end = summary.header.end + summary.content.len();
        format!(
            "{}\n{content}\n{}",
            &text[..summary.header.end],
            &text[section_end..]
        )
    } else if let Some(first) = page.sections.first() {
        let insert_at = first.header.start;
        format!(
            "{}== Summary ==\n{content}\n\n{}",
            &text[..insert_at],
            &text[insert_at..]
        )
    } else {
        format!("== Summary ==\n{content}\n\n{text}")
    };

    let changed = new_text.trim() != text.trim();
    SummaryReplacement {
        text: new_text,
        changed,
    }
}

fn extra_section_titles(page: &SegmentedPage<'_>) -> Vec<String> {
    let mut extras: Vec<String> = Vec::new();
    for key in page.keys() {
        if key != SUMMARY_TITLE && key != LICENSING_TITLE && !extras.contains(&key) {
            extras.push(key);
        }
    }
    extras
}

fn compliance_issues(
    summary: &Section<'_>,
    licensing: &Section<'_>,
    rules: &NormalizerRules,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    template_issue(summary, &rules.summary_templates, &mut issues);
    template_issue(licensing, &rules.license_templates, &mut issues);

    for section in [summary, licensing] {
        let lines = section.blank_lines_after_header();
        if lines > 1 {
            issues.push(Issue::ExcessBlankLines {
                section: section.key(),
                lines,
            });
        }
    }

    let trailing = licensing.trailing_blank_lines();
    if trailing > 0 {
        issues.push(Issue::TrailingBlankLines {
            section: licensing.key(),
            lines: trailing,
        });
    }

    issues
}

fn template_issue(section: &Section<'_>, allowed: &TemplateAllowList, issues: &mut Vec<Issue>) {
    match classify_section(section.content, allowed) {
        TemplateCheck::Single { .. } => {}
        TemplateCheck::Unlisted { name } => issues.push(Issue::NotSingleTemplate {
            section: section.key(),
            found: Some(name),
        }),
        TemplateCheck::NotTemplate => issues.push(Issue::NotSingleTemplate {
            section: section.key(),
            found: None,
        }),
        TemplateCheck::Malformed => issues.push(Issue::MalformedTemplate {
            section: section.key(),
        }),
    }
}

fn render_default_sections(text: &str, rules: &NormalizerRules) -> String {
    format!(
        "== Summary ==\n{{{{fi|d={}|s=}}}}\n\n== Licensing ==\n{}\n",
        text.trim_end_matches('\n'),
        rules.default_license
    )
}

fn render_summary_above_licensing(
    title: &str,
    licensing: &Section<'_>,
    rules: &NormalizerRules,
) -> String {
    let summary = match rules.seasons.episode_for_file(title) {
        Some(episode) => {
            format!("== Summary ==\n{{{{fi|d=Title card of {episode}.|s={episode}}}}}\n")
        }
        None => "== Summary ==\n{{fi|s=}}\n".to_string(),
    };
    format!(
        "{summary}{}\n{}",
        licensing.header.full_text,
        licensing.body().trim_start_matches('\n')
    )
}

fn render_leading_text_summary(page: &SegmentedPage<'_>) -> String {
    let blocks = page
        .sections
        .iter()
        .map(|section| {
            format!(
                "{}\n{}",
                section.header.full_text,
                section.body().trim_start_matches('\n')
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "== Summary ==\n{{{{fi|d={}|s=}}}}\n\n{}",
        page.leading.trim_end_matches('\n'),
        blocks.trim_start_matches('\n')
    )
}

#[cfg(test)]
mod tests {
    use super::{
        Classification, FixRule, Issue, classify_and_rewrite, render_leading_text_summary,
        replace_summary, texts_equivalent,
    };
    use crate::rules::NormalizerRules;
    use crate::sections::segment;

    fn rules() -> NormalizerRules {
        NormalizerRules::default()
    }

    #[test]
    fn licensing_only_page_gets_episode_summary() {
        let outcome = classify_and_rewrite(
            "File:Xh101.png",
            "Some text\n\n== Licensing ==\n{{Fairuse}}\n",
            &rules(),
        );
        assert_eq!(outcome.classification, Classification::Fixable);
        assert_eq!(outcome.rule, Some(FixRule::SummaryAboveLicensing));
        assert_eq!(
            outcome.new_text.as_deref(),
            Some(
                "== Summary ==\n{{fi|d=Title card of {{ep|xh1|1}}.|s={{ep|xh1|1}}}}\n== Licensing ==\n{{Fairuse}}\n"
            )
        );
        assert!(outcome.changed);
        assert_eq!(
            outcome.edit_summary(),
            Some("autofix file description: default summary section")
        );
    }

    #[test]
    fn licensing_only_page_without_episode_gets_empty_source() {
        let outcome = classify_and_rewrite(
            "File:Poster.jpg",
            "== Licensing ==  \n\n\n{{Pd}}\n",
            &rules(),
        );
        assert_eq!(
            outcome.new_text.as_deref(),
            Some("== Summary ==\n{{fi|s=}}\n== Licensing ==\n{{Pd}}\n")
        );
    }

    #[test]
    fn compliant_page_is_left_alone() {
        let outcome = classify_and_rewrite(
            "File:Poster.jpg",
            "== Summary ==\n{{fi|s=}}\n\n== Licensing ==\n{{Pd}}\n",
            &rules(),
        );
        assert_eq!(outcome.classification, Classification::Compliant);
        assert!(outcome.issues.is_empty());
        assert_eq!(outcome.new_text, None);
        assert!(!outcome.changed);
    }

    #[test]
    fn empty_body_is_blank() {
        for text in ["", "  \n\t\n"] {
            let outcome = classify_and_rewrite("File:Empty.png", text, &rules());
            assert_eq!(outcome.classification, Classification::Blank);
            assert_eq!(outcome.issues, vec![Issue::EmptyBody]);
            assert_eq!(outcome.new_text, None);
            assert!(!outcome.changed);
        }
    }

    #[test]
    fn extra_sections_force_manual_review() {
        let outcome = classify_and_rewrite(
            "File:Poster.jpg",
            "== Summary ==\n{{fi|s=}}\n\n== Licensing ==\n{{Pd}}\n== Trivia ==\nfoo",
            &rules(),
        );
        assert_eq!(outcome.classification, Classification::Manual);
        assert_eq!(
            outcome.issues,
            vec![Issue::ExtraSections {
                titles: vec!["trivia".to_string()]
            }]
        );
        assert_eq!(outcome.new_text, None);
    }

    #[test]
    fn excluded_titles_are_always_compliant() {
        let outcome = classify_and_rewrite("File:Act 0109 frame.png", "loose text", &rules());
        assert_eq!(outcome.classification, Classification::Compliant);
        assert!(outcome.excluded);
    }

    #[test]
    fn blank_check_runs_before_exclusion() {
        let outcome = classify_and_rewrite("File:Act 0109 x.png", "  \n\t", &rules());
        assert_eq!(outcome.classification, Classification::Blank);
        assert!(!outcome.excluded);
        assert_eq!(outcome.issues, vec![Issue::EmptyBody]);
        assert_eq!(outcome.rule, None);
    }

    #[test]
    fn later_duplicate_summary_decides_compliance() {
        let licensing = "== Licensing ==\n{{Fairuse}}\n";
        let later_valid = format!("== Summary ==\nloose\n== Summary ==\n{{{{fi|s=}}}}\n{licensing}");
        let outcome = classify_and_rewrite("File:Poster.jpg", &later_valid, &rules());
        assert_eq!(outcome.classification, Classification::Compliant);

        let later_loose = format!("== Summary ==\n{{{{fi|s=}}}}\n== Summary ==\nloose\n{licensing}");
        let outcome = classify_and_rewrite("File:Poster.jpg", &later_loose, &rules());
        assert_eq!(outcome.classification, Classification::Manual);
    }

    #[test]
    fn blank_or_all_equals_headers_need_manual_review() {
        let outcome = classify_and_rewrite("File:Poster.jpg", "a\n=====\nb\n== ==\nc", &rules());
        assert_eq!(outcome.classification, Classification::Manual);
        assert_eq!(
            outcome.issues,
            vec![Issue::ExtraSections {
                titles: vec!["=".to_string(), String::new()],
            }]
        );
        assert!(!outcome.changed);
    }

    #[test]
    fn headerless_page_is_wrapped_in_default_sections() {
        let outcome = classify_and_rewrite("File:Poster.jpg", "A poster.\n\n", &rules());
        assert_eq!(outcome.rule, Some(FixRule::DefaultSections));
        assert_eq!(
            outcome.new_text.as_deref(),
            Some("== Summary ==\n{{fi|d=A poster.|s=}}\n\n== Licensing ==\n{{Fairuse}}\n")
        );
        assert!(outcome.changed);
        assert!(FixRule::DefaultSections.needs_review());
    }

    #[test]
    fn rewrites_settle_after_one_pass() {
        let inputs = [
            ("File:Poster.jpg", "A poster.\n"),
            ("File:Xh101.png", "Some text\n\n== Licensing ==\n{{Fairuse}}\n"),
            ("File:Poster.jpg", "== Licensing ==\n{{Cc-by-sa-4.0}}"),
        ];
        for (title, text) in inputs {
            let first = classify_and_rewrite(title, text, &rules());
            let rewritten = first.new_text.expect("rewrite proposed");
            let second = classify_and_rewrite(title, &rewritten, &rules());
            assert_eq!(second.classification, Classification::Compliant, "{rewritten:?}");
            assert!(!second.changed);
        }
    }

    #[test]
    fn template_problems_are_reported_per_section() {
        let outcome = classify_and_rewrite(
            "File:Poster.jpg",
            "== Summary ==\nA caption\n== Licensing ==\n{{Copyrighted}}\n",
            &rules(),
        );
        assert_eq!(outcome.classification, Classification::Manual);
        assert_eq!(
            outcome.issues,
            vec![
                Issue::NotSingleTemplate {
                    section: "summary".to_string(),
                    found: None,
                },
                Issue::NotSingleTemplate {
                    section: "licensing".to_string(),
                    found: Some("copyrighted".to_string()),
                },
            ]
        );
    }

    #[test]
    fn unbalanced_template_is_manual_not_error() {
        let outcome = classify_and_rewrite(
            "File:Poster.jpg",
            "== Summary ==\n{{fi|d={{ep|xh1|1}}\n== Licensing ==\n{{Pd}}\n",
            &rules(),
        );
        assert_eq!(outcome.classification, Classification::Manual);
        assert_eq!(
            outcome.issues,
            vec![Issue::MalformedTemplate {
                section: "summary".to_string()
            }]
        );
    }

    #[test]
    fn blank_line_limits_apply_to_both_sections() {
        let one_blank = "== Summary ==\n\n{{fi|s=}}\n== Licensing ==\n\n{{Pd}}\n";
        assert_eq!(
            classify_and_rewrite("File:A.png", one_blank, &rules()).classification,
            Classification::Compliant
        );

        let outcome = classify_and_rewrite(
            "File:A.png",
            "== Summary ==\n\n\n{{fi|s=}}\n== Licensing ==\n{{Pd}}\n\n",
            &rules(),
        );
        assert_eq!(outcome.classification, Classification::Manual);
        assert_eq!(
            outcome.issues,
            vec![
                Issue::ExcessBlankLines {
                    section: "summary".to_string(),
                    lines: 2,
                },
                Issue::TrailingBlankLines {
                    section: "licensing".to_string(),
                    lines: 1,
                },
            ]
        );
    }

    #[test]
    fn summary_without_licensing_is_manual() {
        let outcome = classify_and_rewrite("File:A.png", "== Summary ==\n{{fi|s=}}\n", &rules());
        assert_eq!(outcome.classification, Classification::Manual);
        assert!(matches!(
            outcome.issues.as_slice(),
            [Issue::StructuralMismatch { .. }]
        ));
    }

    #[test]
    fn leading_text_moves_into_summary() {
        let page = segment("Drawn by the crew.\n\n== Licensing ==\n\n{{Pd}}\n");
        assert_eq!(
            render_leading_text_summary(&page),
            "== Summary ==\n{{fi|d=Drawn by the crew.|s=}}\n\n== Licensing ==\n{{Pd}}\n"
        );
    }

    #[test]
    fn equivalence_ignores_one_trailing_newline() {
        assert!(texts_equivalent("abc", "abc"));
        assert!(texts_equivalent("abc\n", "abc"));
        assert!(texts_equivalent("abc", "abc\n"));
        assert!(!texts_equivalent("abc\n\n", "abc"));
        assert!(!texts_equivalent("abc ", "abc"));
    }

    #[test]
    fn replace_summary_swaps_existing_body() {
        let result = replace_summary(
            "== Summary ==\n{{fi|s=}}\n\n== Licensing ==\n{{Fairuse}}\n",
            "{{fi|s={{ep|TV23|51}}|sflag=WeslieSearch-Vision}}",
        );
        assert_eq!(
            result.text,
            "== Summary ==\n{{fi|s={{ep|TV23|51}}|sflag=WeslieSearch-Vision}}\n== Licensing ==\n{{Fairuse}}\n"
        );
        assert!(result.changed);
    }

    #[test]
    fn replace_summary_inserts_before_first_header_or_at_top() {
        let with_header = replace_summary("intro\n== Licensing ==\n{{Pd}}", "{{fi}}");
        assert_eq!(
            with_header.text,
            "intro\n== Summary ==\n{{fi}}\n\n== Licensing ==\n{{Pd}}"
        );

        let bare = replace_summary("just text", "  {{fi}}  ");
        assert_eq!(bare.text, "== Summary ==\n{{fi}}\n\njust text");
        assert!(bare.changed);
    }

    #[test]
    fn replace_summary_reports_no_change_for_identical_content() {
        let text = "== Summary ==\n{{fi|s=x}}\n== Licensing ==\n{{Pd}}\n";
        let result = replace_summary(text, "{{fi|s=x}}");
        assert_eq!(result.text, text);
        assert!(!result.changed);
    }
}
