use crate::config::CleanupSection;
use crate::episodes::SeasonTable;
use crate::templates::TemplateAllowList;

/// Pages under these prefixes were cleaned by hand and are always compliant.
pub const DEFAULT_SKIP_TITLE_PREFIXES: &[&str] = &["File:Act 0109"];

pub const DEFAULT_LICENSE_BLOCK: &str = "{{Fairuse}}";

/// Static data the normalizer consults. Everything else it decides from the
/// page text alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizerRules {
    pub summary_templates: TemplateAllowList,
    pub license_templates: TemplateAllowList,
    pub seasons: SeasonTable,
    pub skip_title_prefixes: Vec<String>,
    pub default_license: String,
}

impl Default for NormalizerRules {
    fn default() -> Self {
        Self {
            summary_templates: TemplateAllowList::summary_defaults(),
            license_templates: TemplateAllowList::license_defaults(),
            seasons: SeasonTable::default(),
            skip_title_prefixes: DEFAULT_SKIP_TITLE_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
            default_license: DEFAULT_LICENSE_BLOCK.to_string(),
        }
    }
}

impl NormalizerRules {
    /// Defaults with any list present in `[cleanup]` replacing its built-in
    /// counterpart.
    pub fn from_config(section: &CleanupSection) -> Self {
        let mut rules = Self::default();
        if let Some(names) = &section.summary_templates {
            rules.summary_templates = TemplateAllowList::new(names);
        }
        if let Some(names) = &section.license_templates {
            rules.license_templates = TemplateAllowList::new(names);
        }
        if let Some(seasons) = &section.seasons {
            rules.seasons = SeasonTable::new(seasons);
        }
        if let Some(prefixes) = &section.skip_title_prefixes {
            rules.skip_title_prefixes = prefixes
                .iter()
                .map(|prefix| prefix.trim().to_string())
                .filter(|prefix| !prefix.is_empty())
                .collect();
        }
        if let Some(license) = &section.default_license
            && !license.trim().is_empty()
        {
            rules.default_license = license.trim().to_string();
        }
        rules
    }

    pub fn is_skipped_title(&self, title: &str) -> bool {
        self.skip_title_prefixes
            .iter()
            .any(|prefix| title.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::NormalizerRules;
    use crate::config::CleanupSection;

    #[test]
    fn config_lists_replace_defaults() {
        let rules = NormalizerRules::from_config(&CleanupSection {
            license_templates: Some(vec!["PD".to_string()]),
            seasons: Some(vec!["xh1".to_string()]),
            skip_title_prefixes: Some(vec!["  ".to_string(), "File:Done".to_string()]),
            ..CleanupSection::default()
        });
        assert_eq!(rules.license_templates.len(), 1);
        assert!(rules.license_templates.contains("pd"));
        assert_eq!(rules.summary_templates.len(), 3);
        assert_eq!(rules.seasons.len(), 1);
        assert_eq!(rules.skip_title_prefixes, vec!["File:Done".to_string()]);
        assert_eq!(rules.default_license, "{{Fairuse}}");
    }

    #[test]
    fn skip_prefix_is_case_sensitive() {
        let rules = NormalizerRules::default();
        assert!(rules.is_skipped_title("File:Act 0109 still.png"));
        assert!(!rules.is_skipped_title("File:act 0109 still.png"));
    }
}
