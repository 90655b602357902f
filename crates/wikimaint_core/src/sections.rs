use std::collections::HashMap;

pub const SUMMARY_TITLE: &str = "summary";
pub const LICENSING_TITLE: &str = "licensing";

/// A `== Title ==` line recognized by [`scan_headers`].
///
/// `start..end` covers `full_text` only; whatever follows the closing `=` run on
/// the same line (spaces, `\r`, the line break) belongs to the section content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderMarker<'a> {
    pub start: usize,
    pub end: usize,
    pub full_text: &'a str,
    pub title: &'a str,
}

impl HeaderMarker<'_> {
    /// Lower-cased, trimmed title used for lookups.
    pub fn key(&self) -> String {
        self.title.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section<'a> {
    pub header: HeaderMarker<'a>,
    pub content: &'a str,
}

impl<'a> Section<'a> {
    pub fn key(&self) -> String {
        self.header.key()
    }

    /// Content with the rest of the header line removed.
    pub fn body(&self) -> &'a str {
        let rest = self
            .content
            .trim_start_matches(|ch: char| ch == ' ' || ch == '\t' || ch == '\r');
        rest.strip_prefix('\n').unwrap_or(rest)
    }

    /// Number of whitespace-only lines between the header line and the first
    /// line with text.
    pub fn blank_lines_after_header(&self) -> usize {
        self.body()
            .split_inclusive('\n')
            .take_while(|line| line.ends_with('\n') && line.trim().is_empty())
            .count()
    }

    /// Blank lines at the end of the section beyond its terminating newline.
    pub fn trailing_blank_lines(&self) -> usize {
        let tail = &self.content[self.content.trim_end().len()..];
        tail.matches('\n').count().saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentedPage<'a> {
    pub leading: &'a str,
    pub sections: Vec<Section<'a>>,
}

impl<'a> SegmentedPage<'a> {
    pub fn has_headers(&self) -> bool {
        !self.sections.is_empty()
    }

    /// Sections keyed by lower-cased title. A repeated title maps to its last
    /// occurrence.
    pub fn section_map(&self) -> HashMap<String, Section<'a>> {
        let mut map = HashMap::with_capacity(self.sections.len());
        for section in &self.sections {
            map.insert(section.key(), *section);
        }
        map
    }

    /// Lower-cased titles in source order.
    pub fn keys(&self) -> Vec<String> {
        self.sections.iter().map(Section::key).collect()
    }

    /// Reassemble the page; equals the segmented input byte for byte.
    pub fn reconstruct(&self) -> String {
        let mut out = String::from(self.leading);
        for section in &self.sections {
            out.push_str(section.header.full_text);
            out.push_str(section.content);
        }
        out
    }
}

/// Find header lines in source order.
///
/// A header starts at column 0 with two or more `=`, ends (ignoring trailing
/// whitespace) with two or more `=`, and has at least one character in between.
/// The title is that middle part trimmed, so `== ==` has an empty title and a
/// bare run of five or more `=` has the title `=`. Lines inside template bodies
/// are not treated specially.
pub fn scan_headers(text: &str) -> Vec<HeaderMarker<'_>> {
    let mut out = Vec::new();
    let mut line_start = 0usize;

    for line in text.split_inclusive('\n') {
        if let Some(marker) = parse_header_line(line, line_start) {
            out.push(marker);
        }
        line_start += line.len();
    }

    out
}

/// Split a page into its leading text and header-owned sections.
pub fn segment(text: &str) -> SegmentedPage<'_> {
    let headers = scan_headers(text);
    let Some(first) = headers.first() else {
        return SegmentedPage {
            leading: text,
            sections: Vec::new(),
        };
    };

    let leading = &text[..first.start];
    let mut sections = Vec::with_capacity(headers.len());
    for (index, header) in headers.iter().enumerate() {
        let content_end = headers
            .get(index + 1)
            .map(|next| next.start)
            .unwrap_or(text.len());
        sections.push(Section {
            header: *header,
            content: &text[header.end..content_end],
        });
    }

    SegmentedPage { leading, sections }
}

fn parse_header_line(line: &str, line_start: usize) -> Option<HeaderMarker<'_>> {
    let marker = line.trim_end();
    if marker.len() < 5 || !marker.starts_with("==") || !marker.ends_with("==") {
        return None;
    }

    let leading = marker.bytes().take_while(|byte| *byte == b'=').count();
    let title = if leading == marker.len() {
        &marker[..1]
    } else {
        let trailing = marker.bytes().rev().take_while(|byte| *byte == b'=').count();
        marker[leading..marker.len() - trailing].trim()
    };

    Some(HeaderMarker {
        start: line_start,
        end: line_start + marker.len(),
        full_text: marker,
        title,
    })
}

#[cfg(test)]
mod tests {
    use super::{LICENSING_TITLE, SUMMARY_TITLE, scan_headers, segment};

    #[test]
    fn text_without_headers_is_all_leading() {
        let text = "Just a description\n\nwith {{fi}} inside\n= not a header =\n";
        let page = segment(text);
        assert_eq!(page.leading, text);
        assert!(page.sections.is_empty());
        assert!(!page.has_headers());
    }

    #[test]
    fn segmentation_reconstructs_original_text() {
        let samples = [
            "",
            "plain",
            "== Summary ==\n{{fi|s=}}\n\n== Licensing ==\n{{Pd}}\n",
            "intro\r\n==Summary==  \r\n{{fi}}\r\n=== Nested ===\nx",
            "lead\n\n== A ==\n== B ==\n\n\n",
            "==Trailing==",
        ];
        for sample in samples {
            assert_eq!(segment(sample).reconstruct(), sample, "sample {sample:?}");
        }
    }

    #[test]
    fn scan_headers_records_offsets_and_titles() {
        let text = "lead\n==  Summary  ==\nbody\n=== Licensing ===   \nmore";
        let headers = scan_headers(text);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].title, "Summary");
        assert_eq!(headers[0].full_text, "==  Summary  ==");
        assert_eq!(&text[headers[0].start..headers[0].end], "==  Summary  ==");
        assert_eq!(headers[1].title, "Licensing");
        assert_eq!(headers[1].full_text, "=== Licensing ===");
    }

    #[test]
    fn scan_headers_requires_whole_line_match() {
        let text = " == Indented ==\ntext == Inline ==\n==\n===\n====\n==Ok==\n";
        let headers = scan_headers(text);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].title, "Ok");
    }

    #[test]
    fn blank_and_all_equals_lines_are_headers() {
        let page = segment("a\n=====\nb\n== ==\nc\n==  ===\n");
        assert_eq!(page.keys(), vec!["=", "", ""]);
        assert_eq!(page.leading, "a\n");
        assert_eq!(page.sections[0].header.full_text, "=====");
        assert_eq!(page.sections[1].content, "\nc\n");
    }

    #[test]
    fn section_map_prefers_later_duplicates() {
        let text = "== Summary ==\nfirst\n== summary ==\nsecond\n";
        let page = segment(text);
        assert_eq!(page.sections.len(), 2);
        let map = page.section_map();
        assert_eq!(map[SUMMARY_TITLE].content, "\nsecond\n");
        assert!(!map.contains_key(LICENSING_TITLE));
        assert_eq!(page.keys(), vec!["summary", "summary"]);
    }

    #[test]
    fn section_body_and_blank_line_counts() {
        let page = segment("== Summary ==  \n\n{{fi}}\n== Licensing ==\n{{Pd}}\n\n\n");
        let summary = &page.sections[0];
        assert_eq!(summary.body(), "\n{{fi}}\n");
        assert_eq!(summary.blank_lines_after_header(), 1);
        assert_eq!(summary.trailing_blank_lines(), 0);

        let licensing = &page.sections[1];
        assert_eq!(licensing.blank_lines_after_header(), 0);
        assert_eq!(licensing.trailing_blank_lines(), 2);
    }

    #[test]
    fn headers_inside_template_bodies_still_split() {
        let text = "== Summary ==\n{{fi|d=\n== Fake ==\n}}\n";
        let page = segment(text);
        assert_eq!(page.keys(), vec!["summary", "fake"]);
    }
}
