use std::fmt;

use similar::TextDiff;

/// Lines of each side fed into the diff.
pub const MAX_LINES_PER_SIDE: usize = 200;
/// Diff lines kept for display.
pub const MAX_DIFF_LINES: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffPreview {
    pub lines: Vec<String>,
    pub truncated: bool,
}

impl DiffPreview {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl fmt::Display for DiffPreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        if self.truncated {
            writeln!(f, "...")?;
        }
        Ok(())
    }
}

/// Unified diff of the heads of `old` and `new`, capped for console output.
pub fn preview_diff(old: &str, new: &str) -> DiffPreview {
    let old_head = head_lines(old, MAX_LINES_PER_SIDE);
    let new_head = head_lines(new, MAX_LINES_PER_SIDE);
    let diff = TextDiff::from_lines(old_head, new_head);
    let rendered = diff
        .unified_diff()
        .context_radius(3)
        .header("current", "proposed")
        .to_string();

    let mut iter = rendered.lines();
    let lines = iter
        .by_ref()
        .take(MAX_DIFF_LINES)
        .map(ToString::to_string)
        .collect();
    let truncated = iter.next().is_some();
    DiffPreview { lines, truncated }
}

fn head_lines(text: &str, limit: usize) -> &str {
    let end = text
        .split_inclusive('\n')
        .take(limit)
        .map(str::len)
        .sum::<usize>();
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::{MAX_DIFF_LINES, head_lines, preview_diff};

    #[test]
    fn identical_texts_have_empty_preview() {
        let preview = preview_diff("a\nb\n", "a\nb\n");
        assert!(preview.is_empty());
        assert!(!preview.truncated);
        assert_eq!(preview.to_string(), "");
    }

    #[test]
    fn preview_shows_removed_and_added_lines() {
        let preview = preview_diff(
            "Some text\n\n== Licensing ==\n{{Fairuse}}\n",
            "== Summary ==\n{{fi|s=}}\n== Licensing ==\n{{Fairuse}}\n",
        );
        assert_eq!(preview.lines[0], "--- current");
        assert_eq!(preview.lines[1], "+++ proposed");
        assert!(preview.lines.iter().any(|line| line == "-Some text"));
        assert!(preview.lines.iter().any(|line| line == "+== Summary =="));
        assert!(preview.lines.iter().any(|line| line == " == Licensing =="));
    }

    #[test]
    fn long_diffs_are_truncated() {
        let old = (0..150).map(|n| format!("old {n}\n")).collect::<String>();
        let new = (0..150).map(|n| format!("new {n}\n")).collect::<String>();
        let preview = preview_diff(&old, &new);
        assert_eq!(preview.lines.len(), MAX_DIFF_LINES);
        assert!(preview.truncated);
        assert!(preview.to_string().ends_with("...\n"));
    }

    #[test]
    fn head_lines_keeps_whole_lines() {
        assert_eq!(head_lines("a\nb\nc", 2), "a\nb\n");
        assert_eq!(head_lines("a\nb", 5), "a\nb");
        assert_eq!(head_lines("", 5), "");
    }
}
