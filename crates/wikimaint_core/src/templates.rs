use std::collections::BTreeSet;

use serde::Serialize;

pub const DEFAULT_SUMMARY_TEMPLATES: &[&str] = &["fi", "file_information", "file information"];

pub const DEFAULT_LICENSE_TEMPLATES: &[&str] = &[
    "cc-by-sa-3.0",
    "cc-by-sa-4.0",
    "fairuse",
    "fairuse-photoscan",
    "fairuse-screenshot",
    "fairuse-webarchive",
    "from wikimedia",
    "other free",
    "pd",
    "pd-shape",
    "pd-textlogo",
    "pd-webarchive",
    "permission",
    "self",
];

/// Case-insensitive set of accepted template names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateAllowList {
    names: BTreeSet<String>,
}

impl TemplateAllowList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|name| name.as_ref().trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    pub fn summary_defaults() -> Self {
        Self::new(DEFAULT_SUMMARY_TEMPLATES)
    }

    pub fn license_defaults() -> Self {
        Self::new(DEFAULT_LICENSE_TEMPLATES)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateCheck {
    /// One balanced invocation of an allowed template.
    Single { name: String },
    /// One balanced invocation, but the name is not on the allow-list.
    Unlisted { name: String },
    /// Wrapped in braces but without a usable name or with unbalanced braces.
    Malformed,
    /// Blank, or not wrapped in `{{ ... }}` at all.
    NotTemplate,
}

impl TemplateCheck {
    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single { .. })
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Single { name } | Self::Unlisted { name } => Some(name),
            Self::Malformed | Self::NotTemplate => None,
        }
    }
}

/// Decide whether `content` is exactly one template invocation from `allowed`.
pub fn classify_section(content: &str, allowed: &TemplateAllowList) -> TemplateCheck {
    let trimmed = content.trim();
    if trimmed.is_empty() || !trimmed.starts_with("{{") || !trimmed.ends_with("}}") {
        return TemplateCheck::NotTemplate;
    }
    if !closes_at_end(trimmed) {
        return TemplateCheck::Malformed;
    }
    let Some(name) = template_name(trimmed) else {
        return TemplateCheck::Malformed;
    };

    if allowed.contains(&name) {
        TemplateCheck::Single { name }
    } else {
        TemplateCheck::Unlisted { name }
    }
}

/// Lower-cased name of the invocation starting at the beginning of `text`:
/// everything after `{{` up to the first `|` or `}}`.
pub fn template_name(text: &str) -> Option<String> {
    let rest = text.trim_start().strip_prefix("{{")?;
    let pipe = rest.find('|');
    let close = rest.find("}}");
    let end = match (pipe, close) {
        (Some(pipe), Some(close)) => pipe.min(close),
        (Some(pipe), None) => pipe,
        (None, Some(close)) => close,
        (None, None) => return None,
    };

    let name = rest[..end].trim();
    if name.is_empty() || name.contains('{') || name.contains('}') {
        return None;
    }
    Some(name.to_lowercase())
}

/// True when the `{{` at the start of `text` is closed by the `}}` at its very
/// end, with every brace pair in between balanced. Braces are counted in pairs,
/// so triple-brace parameters like `{{fi|d={{{1}}}}}` come out unbalanced.
fn closes_at_end(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut cursor = 0usize;

    while cursor + 1 < bytes.len() {
        match (bytes[cursor], bytes[cursor + 1]) {
            (b'{', b'{') => {
                depth += 1;
                cursor += 2;
            }
            (b'}', b'}') => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
                cursor += 2;
                if depth == 0 {
                    return cursor == bytes.len();
                }
            }
            _ => cursor += 1,
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::{TemplateAllowList, TemplateCheck, classify_section, template_name};

    fn summary() -> TemplateAllowList {
        TemplateAllowList::summary_defaults()
    }

    #[test]
    fn single_template_accepts_multiline_invocations() {
        let content = "\n{{fi\n|d=A still from the opening\n|s={{ep|xh1|3}}\n}}\n\n";
        assert_eq!(
            classify_section(content, &summary()),
            TemplateCheck::Single {
                name: "fi".to_string()
            }
        );
    }

    #[test]
    fn single_template_rejects_text_around_braces() {
        assert_eq!(
            classify_section("Caption {{fi}}", &summary()),
            TemplateCheck::NotTemplate
        );
        assert_eq!(
            classify_section("{{fi}} trailing", &summary()),
            TemplateCheck::NotTemplate
        );
        assert_eq!(classify_section("   \n", &summary()), TemplateCheck::NotTemplate);
    }

    #[test]
    fn two_adjacent_templates_are_not_single() {
        assert_eq!(
            classify_section("{{fi|s=}}\n{{Pd}}", &summary()),
            TemplateCheck::Malformed
        );
    }

    #[test]
    fn unbalanced_or_nameless_invocations_are_malformed() {
        assert_eq!(
            classify_section("{{fi|d={{ep|xh1|1}}", &summary()),
            TemplateCheck::Malformed
        );
        assert_eq!(classify_section("{{|x}}", &summary()), TemplateCheck::Malformed);
        assert_eq!(classify_section("{{}}", &summary()), TemplateCheck::Malformed);
    }

    #[test]
    fn triple_brace_parameters_count_as_malformed() {
        assert_eq!(
            classify_section("{{fi|d={{{1}}}}}", &summary()),
            TemplateCheck::Malformed
        );
    }

    #[test]
    fn names_compare_case_insensitively_and_keep_spaces() {
        let licenses = TemplateAllowList::license_defaults();
        assert_eq!(licenses.len(), 14);
        assert!(classify_section("{{Fairuse}}", &licenses).is_single());
        assert!(classify_section("{{ From Wikimedia |x}}", &licenses).is_single());
        assert!(classify_section("{{File information|d=}}", &summary()).is_single());

        let unlisted = classify_section("{{Copyrighted}}", &licenses);
        assert_eq!(unlisted.name(), Some("copyrighted"));
        assert!(!unlisted.is_single());
    }

    #[test]
    fn template_name_stops_at_pipe_or_close() {
        assert_eq!(template_name("{{ Fi |s=}}").as_deref(), Some("fi"));
        assert_eq!(template_name("{{Pd-shape}}").as_deref(), Some("pd-shape"));
        assert_eq!(template_name("{{fi\n|d=x}}").as_deref(), Some("fi"));
        assert_eq!(template_name("plain"), None);
        assert_eq!(template_name("{{{{x}}}}"), None);
    }
}
