use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::guard::{MATERIALS_CONTEXT_END, MATERIALS_CONTEXT_START};
use crate::text::{char_len, truncate_chars};

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "if", "then", "else", "when", "where", "what", "why",
    "how", "who", "is", "are", "was", "were", "be", "been", "being", "do", "does", "did", "i",
    "me", "my", "mine", "you", "your", "yours", "we", "our", "they", "their", "to", "of", "in",
    "on", "at", "for", "with", "about", "as", "by", "from", "into", "over", "under", "this",
    "that", "these", "those", "it", "its", "can", "could", "should", "would", "will", "just",
    "please", "give", "answer", "solve", "help", "explain",
];

const INSTRUCTIONAL_CUES: &[&str] = &[
    "definition",
    "example",
    "formula",
    "theorem",
    "rule",
    "step",
    "procedure",
    "concept",
    "overview",
    "lecture",
    "chapter",
];

const INSTRUCTIONAL_BONUS: f32 = 0.5;
const MIN_KEYWORD_CHARS: usize = 3;
const MIN_PARAGRAPHS: usize = 4;

const EXTRACTION_MARKERS: &[&str] = &["[PDF EXTRACTION WARNING:", "[PDF EXTRACTION ERROR:"];
const WARNING_EXCERPT_CHARS: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageSegment {
    pub page_number: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "pageMetadata")]
    pub page_segments: Vec<PageSegment>,
}

impl Material {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            page_segments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialChunk {
    pub text: String,
    pub source_name: String,
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalLimits {
    pub max_chunks: usize,
    pub max_total_chars: usize,
    pub max_chunk_chars: usize,
    pub max_keywords: usize,
}

impl Default for RetrievalLimits {
    fn default() -> Self {
        Self {
            max_chunks: 10,
            max_total_chars: 6500,
            max_chunk_chars: 2000,
            max_keywords: 12,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalSelection {
    pub chunks: Vec<MaterialChunk>,
    pub total_chars: usize,
}

impl RetrievalSelection {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Renders the selection between the materials-context sentinels, one
    /// labelled block per chunk.
    pub fn render_context(&self) -> String {
        let blocks: Vec<String> = self
            .chunks
            .iter()
            .map(|chunk| match chunk.page_number {
                Some(page) => format!("[{}, page {page}]\n{}", chunk.source_name, chunk.text),
                None => format!("[{}]\n{}", chunk.source_name, chunk.text),
            })
            .collect();
        format!(
            "{MATERIALS_CONTEXT_START}\n{}\n{MATERIALS_CONTEXT_END}",
            blocks.join("\n\n")
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: MaterialChunk,
    pub score: f32,
}

/// A material whose extracted text carries extractor warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionWarning {
    pub source_name: String,
    pub excerpt: String,
}

pub fn normalize_text(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            c if c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() => c,
            _ => ' ',
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn query_keywords(query: &str, max_keywords: usize) -> Vec<String> {
    let normalized = normalize_text(query);
    let mut seen = HashSet::new();
    normalized
        .split(' ')
        .filter(|token| token.len() >= MIN_KEYWORD_CHARS && !STOP_WORDS.contains(token))
        .filter(|token| seen.insert(*token))
        .take(max_keywords)
        .map(ToString::to_string)
        .collect()
}

fn paragraphs(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                out.extend(text.get(s..end));
            }
        } else {
            if start.is_none() {
                start = Some(offset);
            }
            end = offset + line.len();
        }
        offset += line.len();
    }
    if let Some(s) = start {
        out.extend(text.get(s..end));
    }
    out
}

/// Splits free text into paragraphs, or into lines when the text has too few
/// paragraphs to rank meaningfully.
pub fn split_into_chunks(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let mut pieces = paragraphs(trimmed);
    if pieces.len() < MIN_PARAGRAPHS {
        pieces = trimmed.lines().collect();
    }
    pieces
        .into_iter()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(ToString::to_string)
        .collect()
}

pub fn chunk_materials(materials: &[Material]) -> Vec<MaterialChunk> {
    let mut chunks = Vec::new();
    for material in materials {
        if material.page_segments.is_empty() {
            chunks.extend(
                split_into_chunks(&material.content)
                    .into_iter()
                    .map(|text| MaterialChunk {
                        text,
                        source_name: material.name.clone(),
                        page_number: None,
                    }),
            );
            continue;
        }
        chunks.extend(
            material
                .page_segments
                .iter()
                .filter(|segment| !segment.text.trim().is_empty())
                .map(|segment| MaterialChunk {
                    text: segment.text.clone(),
                    source_name: material.name.clone(),
                    page_number: Some(segment.page_number),
                }),
        );
    }
    chunks
}

/// Scores every chunk against the keywords and keeps the ones with at least
/// one hit, best first. Ties keep their material order.
pub fn score_chunks(chunks: Vec<MaterialChunk>, keywords: &[String]) -> Vec<ScoredChunk> {
    if keywords.is_empty() {
        return Vec::new();
    }
    let mut scored: Vec<ScoredChunk> = chunks
        .into_iter()
        .filter_map(|chunk| {
            let normalized = normalize_text(&chunk.text);
            let hits = keywords
                .iter()
                .filter(|kw| normalized.contains(kw.as_str()))
                .count();
            if hits == 0 {
                return None;
            }
            let lowered = chunk.text.to_lowercase();
            let bonus = if INSTRUCTIONAL_CUES.iter().any(|cue| lowered.contains(cue)) {
                INSTRUCTIONAL_BONUS
            } else {
                0.0
            };
            #[allow(clippy::cast_precision_loss)]
            let score = hits as f32 + bonus;
            Some(ScoredChunk { chunk, score })
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored
}

pub fn rank(query: &str, materials: &[Material], limits: &RetrievalLimits) -> RetrievalSelection {
    let keywords = query_keywords(query, limits.max_keywords);
    let scored = score_chunks(chunk_materials(materials), &keywords);

    let mut selection = RetrievalSelection::default();
    for ScoredChunk { chunk, .. } in scored {
        if selection.chunks.len() >= limits.max_chunks {
            break;
        }
        let text = truncate_chars(chunk.text.trim(), limits.max_chunk_chars).to_string();
        let len = char_len(&text);
        if selection.total_chars + len > limits.max_total_chars {
            break;
        }
        selection.total_chars += len;
        selection.chunks.push(MaterialChunk { text, ..chunk });
    }
    selection
}

pub fn extraction_warnings(materials: &[Material]) -> Vec<ExtractionWarning> {
    materials
        .iter()
        .filter(|m| EXTRACTION_MARKERS.iter().any(|marker| m.content.contains(marker)))
        .map(|m| ExtractionWarning {
            source_name: m.name.clone(),
            excerpt: truncate_chars(&m.content, WARNING_EXCERPT_CHARS).to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_punctuation_and_case() {
        assert_eq!(normalize_text("  Cell-Division: PHASES!\n\tof  Mitosis "), "cell division phases of mitosis");
        assert_eq!(normalize_text("Newton’s law"), "newton s law");
    }

    #[test]
    fn keywords_drop_stop_words_and_duplicates() {
        let kws = query_keywords("Please explain the mitosis phases, mitosis PHASES and why", 12);
        assert_eq!(kws, vec!["mitosis", "phases"]);
        let many = query_keywords("alpha bravo charlie delta echo foxtrot", 3);
        assert_eq!(many, vec!["alpha", "bravo", "charlie"]);
        assert!(query_keywords("help me do it", 12).is_empty());
    }

    #[test]
    fn short_texts_split_on_lines() {
        let chunks = split_into_chunks("one\ntwo\n\nthree");
        assert_eq!(chunks, vec!["one", "two", "three"]);

        let chunks = split_into_chunks("p1 a\np1 b\n\np2\n  \np3\n\n\np4");
        assert_eq!(chunks, vec!["p1 a\np1 b", "p2", "p3", "p4"]);
        assert!(split_into_chunks("   \n ").is_empty());
    }

    #[test]
    fn page_segments_take_precedence() {
        let material = Material {
            name: "notes.pdf".into(),
            content: "ignored body".into(),
            page_segments: vec![
                PageSegment { page_number: 1, text: "first page".into() },
                PageSegment { page_number: 2, text: "   ".into() },
                PageSegment { page_number: 3, text: "third page".into() },
            ],
        };
        let chunks = chunk_materials(&[material]);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].page_number, Some(3));
    }

    #[test]
    fn mitosis_query_selects_only_matching_chunk() {
        let materials = vec![
            Material::new("bio", "The mitosis process has four phases."),
            Material::new("geo", "Unrelated trivia about rivers."),
        ];
        let selection = rank("explain mitosis phases", &materials, &RetrievalLimits::default());
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.chunks[0].text, "The mitosis process has four phases.");
        assert_eq!(selection.chunks[0].source_name, "bio");
    }

    #[test]
    fn zero_matches_yield_empty_selection() {
        let materials = vec![Material::new("geo", "Rivers flow downhill.")];
        let selection = rank("quantum entanglement", &materials, &RetrievalLimits::default());
        assert!(selection.is_empty());
        assert_eq!(selection.total_chars, 0);
    }

    #[test]
    fn instructional_cue_breaks_ties() {
        let materials = vec![
            Material::new("a", "Osmosis moves water."),
            Material::new("b", "Definition: osmosis is diffusion of water."),
        ];
        let selection = rank("osmosis", &materials, &RetrievalLimits::default());
        assert_eq!(selection.chunks[0].source_name, "b");
        assert_eq!(selection.chunks[1].source_name, "a");
    }

    #[test]
    fn budget_and_count_caps_hold() {
        let body: Vec<String> = (0..30).map(|i| format!("enzyme fact {i} {}", "x".repeat(900))).collect();
        let materials = vec![Material::new("big", body.join("\n\n"))];
        let limits = RetrievalLimits::default();
        let selection = rank("enzyme", &materials, &limits);
        assert!(selection.total_chars <= limits.max_total_chars);
        assert!(selection.len() <= limits.max_chunks);
        assert_eq!(selection.len(), 7);

        let tight = RetrievalLimits { max_chunks: 2, ..limits };
        assert_eq!(rank("enzyme", &materials, &tight).len(), 2);
    }

    #[test]
    fn oversized_chunk_is_truncated_to_chunk_cap() {
        let materials = vec![Material::new("long", format!("photosynthesis {}", "y".repeat(5000)))];
        let selection = rank("photosynthesis", &materials, &RetrievalLimits::default());
        assert_eq!(selection.len(), 1);
        assert_eq!(char_len(&selection.chunks[0].text), 2000);
        assert_eq!(selection.total_chars, 2000);
    }

    #[test]
    fn rendered_context_is_sentinel_wrapped() {
        let selection = RetrievalSelection {
            chunks: vec![MaterialChunk {
                text: "Cells divide.".into(),
                source_name: "bio.pdf".into(),
                page_number: Some(4),
            }],
            total_chars: 13,
        };
        let rendered = selection.render_context();
        assert!(rendered.starts_with("MATERIALS_CONTEXT:\n[bio.pdf, page 4]\nCells divide."));
        assert!(rendered.ends_with("END_MATERIALS_CONTEXT"));
    }

    #[test]
    fn extraction_markers_are_reported() {
        let materials = vec![
            Material::new("ok", "clean text"),
            Material::new("scan.pdf", "[PDF EXTRACTION WARNING: low text density]\nbody"),
        ];
        let warnings = extraction_warnings(&materials);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].source_name, "scan.pdf");
    }
}
