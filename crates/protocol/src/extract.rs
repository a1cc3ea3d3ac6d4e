//! Candidate line extraction from raw page text

use std::collections::HashSet;

use crate::PROTOCOL_MARKERS;

const CODE_FENCE: &str = "```";

/// Pulls protocol candidate lines out of opaque text blocks.
///
/// Lines are trimmed, blank lines and code-fence delimiters are dropped, and only lines
/// containing one of the configured markers survive. Identical lines collapse to their
/// first occurrence within a single pass.
#[derive(Clone, Debug)]
pub struct LineExtractor {
    markers: Vec<String>,
}

impl Default for LineExtractor {
    fn default() -> Self {
        Self::new(PROTOCOL_MARKERS.iter().map(|m| m.to_string()))
    }
}

impl LineExtractor {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let markers = markers
            .into_iter()
            .map(Into::into)
            .filter(|m: &String| !m.is_empty())
            .collect();
        Self { markers }
    }

    /// Add an extra marker, e.g. the workflow handshake prefix.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        if !marker.is_empty() && !self.markers.contains(&marker) {
            self.markers.push(marker);
        }
        self
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// Extract from a single block.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut pass = self.pass();
        pass.feed(text);
        pass.finish()
    }

    /// Extract from several blocks sharing one dedup pass, in block order.
    pub fn extract_blocks<'a, I>(&self, blocks: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut pass = self.pass();
        for block in blocks {
            pass.feed(block);
        }
        pass.finish()
    }

    pub fn pass(&self) -> ExtractionPass<'_> {
        ExtractionPass {
            extractor: self,
            lines: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn is_candidate(&self, line: &str) -> bool {
        self.markers.iter().any(|marker| line.contains(marker.as_str()))
    }
}

/// One extraction pass; identical lines are only emitted once per pass.
pub struct ExtractionPass<'a> {
    extractor: &'a LineExtractor,
    lines: Vec<String>,
    seen: HashSet<String>,
}

impl ExtractionPass<'_> {
    pub fn feed(&mut self, text: &str) {
        for chunk in text.lines() {
            let trimmed = chunk.trim();
            if trimmed.is_empty() || trimmed.starts_with(CODE_FENCE) {
                continue;
            }
            if !self.extractor.is_candidate(trimmed) {
                continue;
            }
            if self.seen.insert(trimmed.to_string()) {
                self.lines.push(trimmed.to_string());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn finish(self) -> Vec<String> {
        self.lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keeps_marker_lines_in_order() {
        let text = "hello\n  !baiact000002 {\"a\":\"click\"}  \r\nnoise\n!baisession {\"session_key\":\"k\"}\n";
        let lines = LineExtractor::default().extract(text);
        assert_eq!(
            lines,
            vec![
                "!baiact000002 {\"a\":\"click\"}".to_string(),
                "!baisession {\"session_key\":\"k\"}".to_string(),
            ]
        );
    }

    #[test]
    fn drops_fences_blanks_and_duplicates() {
        let text = "```\n\n!baiact000001del\n```text\n!baiact000001del\n   \n";
        let lines = LineExtractor::default().extract(text);
        assert_eq!(lines, vec!["!baiact000001del".to_string()]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(LineExtractor::default().extract("").is_empty());
    }

    #[test]
    fn blocks_share_one_pass() {
        let lines = LineExtractor::default().extract_blocks([
            "!baiact000001 {}\n",
            "!baiact000002 {}\n!baiact000001 {}",
        ]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "!baiact000002 {}");
    }

    #[test]
    fn extra_markers_are_honoured() {
        let extractor = LineExtractor::default().with_marker("!baiack");
        let lines = extractor.extract("!baiack {\"state\":\"x\"}\nplain");
        assert_eq!(lines.len(), 1);
    }
}
