//! Citation markers (`[1]`, `[2]`, ...) in model replies and their quote list.
//!
//! The model is asked to keep markers and citation entries in step but
//! nothing forces it to. `reconcile` runs on every cited reply so that every
//! kept quote is referenced; markers without a quote render as plain text.

use log::warn;
use std::collections::HashSet;
use std::ops::Range;

use crate::models::chat::Citation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Citation {
        marker: &'a str,
        citation: &'a Citation,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub citations: Vec<Citation>,
    /// Marker numbers inside the cited range that no entry backs. They stay in
    /// the text and render as plain text.
    pub unmatched_markers: Vec<u32>,
    /// Entry numbers discarded because no marker used them, or because they repeated.
    pub dropped_citations: Vec<u32>,
}

/// Byte ranges and numbers of every `[digits]` marker in `text`.
pub fn find_markers(text: &str) -> Vec<(Range<usize>, u32)> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            let digits_start = i + 1;
            let mut j = digits_start;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > digits_start && j < bytes.len() && bytes[j] == b']' {
                if let Ok(number) = text[digits_start..j].parse::<u32>() {
                    found.push((i..j + 1, number));
                    i = j + 1;
                    continue;
                }
            }
        }
        i += 1;
    }
    found
}

pub fn split_segments<'a>(text: &'a str, citations: &'a [Citation]) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    let mut cursor = 0;
    for (range, number) in find_markers(text) {
        let Some(citation) = citations.iter().find(|c| c.index == number) else {
            continue;
        };
        if range.start > cursor {
            segments.push(Segment::Text(&text[cursor..range.start]));
        }
        segments.push(Segment::Citation { marker: &text[range.clone()], citation });
        cursor = range.end;
    }
    if cursor < text.len() {
        segments.push(Segment::Text(&text[cursor..]));
    }
    segments
}

/// Filters `citations` down to entries the text actually references. The text
/// itself is never rewritten: brackets such as `arr[0]` or `[2015]` are not
/// necessarily markers.
pub fn reconcile(text: &str, citations: Vec<Citation>) -> Reconciled {
    let markers = find_markers(text);
    let referenced: HashSet<u32> = markers
        .iter()
        .map(|(_, n)| *n)
        .collect();

    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut dropped_citations = Vec::new();
    for citation in citations {
        if referenced.contains(&citation.index) && seen.insert(citation.index) {
            kept.push(citation);
        } else {
            dropped_citations.push(citation.index);
        }
    }

    let highest = kept
        .iter()
        .map(|c| c.index)
        .max()
        .unwrap_or(0);
    let mut unmatched_markers: Vec<u32> = markers
        .into_iter()
        .map(|(_, n)| n)
        .filter(|n| (1..=highest).contains(n) && !seen.contains(n))
        .collect();
    unmatched_markers.sort_unstable();
    unmatched_markers.dedup();

    if !unmatched_markers.is_empty() || !dropped_citations.is_empty() {
        warn!(
            "Citation mismatch: unbacked markers {:?}, discarded entries {:?}",
            unmatched_markers,
            dropped_citations
        );
    }

    Reconciled {
        citations: kept,
        unmatched_markers,
        dropped_citations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn cite(index: u32, text: &str) -> Citation {
        Citation { index, text: text.to_string() }
    }

    #[rstest]
    #[case("no markers", vec![])]
    #[case("one [1] two [22]", vec![1, 22])]
    #[case("[] [a] [3", vec![])]
    #[case("[[4]]", vec![4])]
    fn finds_markers(#[case] text: &str, #[case] expected: Vec<u32>) {
        let numbers: Vec<u32> = find_markers(text)
            .into_iter()
            .map(|(_, n)| n)
            .collect();
        assert_eq!(numbers, expected);
    }

    #[test]
    fn matched_markers_are_kept() {
        let result = reconcile("Blue sky [1].", vec![cite(1, "the sky is blue")]);
        assert_eq!(result.citations, vec![cite(1, "the sky is blue")]);
        assert!(result.unmatched_markers.is_empty());
        assert!(result.dropped_citations.is_empty());
    }

    #[test]
    fn unbacked_markers_inside_cited_range_are_flagged() {
        let result = reconcile(
            "Blue sky [1]. Green grass [2]. Red sun [3].",
            vec![cite(1, "sky"), cite(3, "sun")]
        );
        assert_eq!(result.unmatched_markers, vec![2]);
        assert_eq!(result.citations.len(), 2);
    }

    #[test]
    fn brackets_beyond_cited_range_are_not_markers() {
        let result = reconcile("Read arr[0], shipped in [2015] [1].", vec![cite(1, "q")]);
        assert!(result.unmatched_markers.is_empty());
        assert_eq!(result.citations, vec![cite(1, "q")]);
    }

    #[test]
    fn unreferenced_and_duplicate_entries_are_dropped() {
        let result = reconcile("Fact [1].", vec![cite(1, "a"), cite(1, "b"), cite(3, "c")]);
        assert_eq!(result.citations, vec![cite(1, "a")]);
        assert_eq!(result.dropped_citations, vec![1, 3]);
    }

    #[test]
    fn segments_resolve_markers_to_quotes() {
        let citations = vec![cite(1, "exact quote")];
        let segments = split_segments("Summary here [1] and [2].", &citations);
        assert_eq!(segments, vec![
            Segment::Text("Summary here "),
            Segment::Citation { marker: "[1]", citation: &citations[0] },
            Segment::Text(" and [2]."),
        ]);
    }
}
