use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Citation, Reference};

pub const MARKER_PREFIX: &str = "CITATION_";

pub(crate) static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[CITATION_(\d+)\]").expect("valid regex"));

/// A citation that survived filtering, with its marker index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedCitation<'a> {
    pub marker_index: usize,
    pub citation: &'a Citation,
}

impl IndexedCitation<'_> {
    /// Number shown to the reader, starting at 1.
    pub fn number(&self) -> usize {
        self.marker_index + 1
    }

    pub fn marker(&self) -> String {
        format!("[{MARKER_PREFIX}{}]", self.marker_index)
    }
}

/// Filters out-of-range citations and numbers the rest by position.
///
/// Positions count chars of `content`. The sort is stable, so citations
/// sharing a position keep their original order. Insertion and resolution
/// both call this; they agree only because it is deterministic.
pub fn index_citations<'a>(content: &str, citations: &'a [Citation]) -> Vec<IndexedCitation<'a>> {
    let length = content.chars().count();

    let mut valid = citations
        .iter()
        .filter(|citation| citation.position <= length)
        .collect::<Vec<_>>();
    valid.sort_by_key(|citation| citation.position);

    valid
        .into_iter()
        .enumerate()
        .map(|(marker_index, citation)| IndexedCitation {
            marker_index,
            citation,
        })
        .collect()
}

/// Splices `[CITATION_<n>]` into a copy of `content` at each position.
///
/// Markers go in from the highest position down so pending offsets never
/// shift; at a shared position the lower index ends up first.
pub fn insert_markers(content: &str, indexed: &[IndexedCitation<'_>]) -> String {
    let mut ordered = indexed.iter().collect::<Vec<_>>();
    ordered.sort_by(|a, b| {
        b.citation
            .position
            .cmp(&a.citation.position)
            .then(b.marker_index.cmp(&a.marker_index))
    });

    let mut output = content.to_string();
    for entry in ordered {
        let offset = byte_offset(&output, entry.citation.position);
        output.insert_str(offset, &entry.marker());
    }
    output
}

/// Index then insert; content without valid citations comes back as is.
pub fn annotate(content: &str, citations: &[Citation]) -> String {
    let indexed = index_citations(content, citations);
    if indexed.is_empty() {
        return content.to_string();
    }
    insert_markers(content, &indexed)
}

/// Marker index to resolved reference, for the resolver.
pub fn reference_map(content: &str, citations: &[Citation]) -> HashMap<usize, CitationRef> {
    index_citations(content, citations)
        .into_iter()
        .map(|entry| (entry.marker_index, CitationRef::from(&entry)))
        .collect()
}

fn byte_offset(text: &str, char_position: usize) -> usize {
    text.char_indices()
        .nth(char_position)
        .map_or(text.len(), |(offset, _)| offset)
}

/// What selecting a citation reference opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CitationTarget {
    /// Resolved through the download endpoint so the link never expires.
    File { id: String },
    DirectLink { url: String },
    None,
}

impl CitationTarget {
    pub fn href(&self) -> Option<String> {
        match self {
            Self::File { id } => Some(format!("/files/{id}/download")),
            Self::DirectLink { url } => Some(url.clone()),
            Self::None => None,
        }
    }
}

/// A resolved, interactive citation reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationRef {
    pub number: usize,
    pub references: Vec<Reference>,
}

impl CitationRef {
    /// Acts on the first reference's file, preferring its stable id.
    pub fn target(&self) -> CitationTarget {
        let Some(first) = self.references.first() else {
            return CitationTarget::None;
        };

        if let Some(id) = first.file.id.as_deref().filter(|id| !id.is_empty()) {
            return CitationTarget::File { id: id.to_string() };
        }
        match first.file.signed_url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => CitationTarget::DirectLink {
                url: url.to_string(),
            },
            None => CitationTarget::None,
        }
    }

    /// One line per reference: file name, sorted pages, excerpt.
    pub fn summary(&self) -> String {
        self.references
            .iter()
            .map(|reference| {
                let mut line = if reference.file.name.is_empty() {
                    "untitled".to_string()
                } else {
                    reference.file.name.clone()
                };

                let pages = reference.sorted_pages();
                if !pages.is_empty() {
                    let pages = pages
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    line.push_str(&format!(" (p. {pages})"));
                }
                if let Some(highlight) = &reference.highlight {
                    line.push_str(&format!(": \"{}\"", highlight.trim()));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<&IndexedCitation<'_>> for CitationRef {
    fn from(entry: &IndexedCitation<'_>) -> Self {
        Self {
            number: entry.number(),
            references: entry.citation.references.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::citation::{
        CitationRef, CitationTarget, annotate, index_citations, insert_markers, reference_map,
    };
    use crate::model::{Citation, FileRef, Reference};

    fn at(position: usize) -> Citation {
        Citation {
            position,
            references: Vec::new(),
        }
    }

    fn tagged(position: usize, name: &str) -> Citation {
        Citation {
            position,
            references: vec![Reference {
                file: FileRef {
                    id: None,
                    name: name.to_string(),
                    signed_url: None,
                },
                pages: Vec::new(),
                highlight: None,
            }],
        }
    }

    #[test]
    fn ties_keep_original_order() {
        let citations = vec![tagged(5, "first"), tagged(2, "early"), tagged(5, "second")];
        let indexed = index_citations("0123456789", &citations);

        let summary = indexed
            .iter()
            .map(|entry| {
                (
                    entry.marker_index,
                    entry.citation.position,
                    entry.citation.references[0].file.name.as_str(),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![(0, 2, "early"), (1, 5, "first"), (2, 5, "second")]
        );
    }

    #[test]
    fn out_of_range_positions_are_dropped() {
        let citations = vec![at(0), at(2), at(3)];
        let indexed = index_citations("hi", &citations);
        let positions = indexed
            .iter()
            .map(|entry| entry.citation.position)
            .collect::<Vec<_>>();
        assert_eq!(positions, vec![0, 2]);
    }

    #[test]
    fn markers_are_inserted_without_shifting_offsets() {
        let citations = vec![at(11), at(5), at(0)];
        let annotated = annotate("Hello world", &citations);
        assert_eq!(
            annotated,
            "[CITATION_0]Hello[CITATION_1] world[CITATION_2]"
        );
    }

    #[test]
    fn shared_position_markers_stay_in_index_order() {
        let citations = vec![at(2), at(2)];
        let indexed = index_citations("abcd", &citations);
        assert_eq!(
            insert_markers("abcd", &indexed),
            "ab[CITATION_0][CITATION_1]cd"
        );
    }

    #[test]
    fn positions_count_chars_not_bytes() {
        let citations = vec![at(4)];
        assert_eq!(annotate("caf\u{e9}!", &citations), "caf\u{e9}[CITATION_0]!");
    }

    #[test]
    fn no_valid_citations_leaves_content_unmodified() {
        assert_eq!(annotate("hi", &[at(9)]), "hi");
        assert_eq!(annotate("hi", &[]), "hi");
    }

    #[test]
    fn reference_map_uses_one_based_numbers() {
        let citations = vec![tagged(1, "b"), tagged(0, "a")];
        let map = reference_map("xy", &citations);
        assert_eq!(map[&0].number, 1);
        assert_eq!(map[&0].references[0].file.name, "a");
        assert_eq!(map[&1].number, 2);
    }

    #[test]
    fn target_prefers_stable_file_id() {
        let mut reference = Reference {
            file: FileRef {
                id: Some("file-1".to_string()),
                name: "a.pdf".to_string(),
                signed_url: Some("https://signed/a".to_string()),
            },
            pages: vec![3, 1, 3],
            highlight: Some(" quoted ".to_string()),
        };
        let citation = CitationRef {
            number: 1,
            references: vec![reference.clone()],
        };
        assert_eq!(
            citation.target(),
            CitationTarget::File {
                id: "file-1".to_string()
            }
        );
        assert_eq!(
            citation.target().href().as_deref(),
            Some("/files/file-1/download")
        );
        assert_eq!(citation.summary(), "a.pdf (p. 1, 3): \"quoted\"");

        reference.file.id = None;
        let citation = CitationRef {
            number: 1,
            references: vec![reference],
        };
        assert_eq!(
            citation.target().href().as_deref(),
            Some("https://signed/a")
        );

        let empty = CitationRef {
            number: 2,
            references: Vec::new(),
        };
        assert_eq!(empty.target(), CitationTarget::None);
    }

    #[test]
    fn summary_lists_every_reference() {
        let citation = CitationRef {
            number: 1,
            references: vec![
                tagged(0, "a.pdf").references[0].clone(),
                tagged(0, "").references[0].clone(),
            ],
        };
        assert_eq!(citation.summary(), "a.pdf\nuntitled");
    }
}
