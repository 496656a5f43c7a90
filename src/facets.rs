// Rich-text facets — byte-range annotations over post text.
//
// `extract` turns inline markdown links (`[label](url)`) into plain labels
// plus link facets. The `detect_*` helpers find bare links, hashtags and
// @mentions in already-plain text for posts sent with facet resolution on.
//
// All offsets are UTF-8 byte offsets into the final text, which is what the
// app.bsky.richtext.facet lexicon expects.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A link annotation produced by [`extract`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facet {
    pub byte_start: usize,
    pub byte_end: usize,
    pub uri: String,
}

/// What a facet means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FacetFeature {
    Link { uri: String },
    Mention { did: String },
    Tag { tag: String },
}

/// A facet of any kind, ready to be written into a post record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RichFacet {
    pub byte_start: usize,
    pub byte_end: usize,
    pub feature: FacetFeature,
}

impl From<Facet> for RichFacet {
    fn from(facet: Facet) -> Self {
        RichFacet {
            byte_start: facet.byte_start,
            byte_end: facet.byte_end,
            feature: FacetFeature::Link { uri: facet.uri },
        }
    }
}

fn markdown_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Label: word characters and spaces only, so nested brackets never match.
    RE.get_or_init(|| {
        Regex::new(r"\[([\w ]+)\]\(([\w\-.~:/?#@!$&*+,;=%]+)\)").expect("markdown link pattern")
    })
}

fn bare_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"'`]+"#).expect("bare link pattern"))
}

fn hashtag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)(#[\w]+)").expect("hashtag pattern"))
}

fn mention() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|\s)(@[a-zA-Z0-9][a-zA-Z0-9.-]*\.[a-zA-Z][a-zA-Z0-9-]*)")
            .expect("mention pattern")
    })
}

/// Rewrite `[label](url)` links to `label` and return one facet per link.
///
/// Scanning resumes right after each inserted label, so every link is
/// rewritten once and earlier facets are never revisited. Earlier facets are
/// also never shifted: each rewrite only changes bytes after the facets
/// already emitted. Text with no match comes back unchanged.
pub fn extract(input: &str) -> (String, Vec<Facet>) {
    let re = markdown_link();
    let mut text = input.to_string();
    let mut facets = Vec::new();
    let mut pos = 0;

    while let Some(caps) = re.captures_at(&text, pos) {
        let (Some(whole), Some(label), Some(url)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            break;
        };

        let label = label.as_str().to_string();
        let uri = url.as_str().to_string();
        let start = whole.start();
        let end = whole.end();

        text.replace_range(start..end, &label);

        let byte_end = start + label.len();
        facets.push(Facet {
            byte_start: start,
            byte_end,
            uri,
        });
        pos = byte_end;
    }

    (text, facets)
}

/// Bare `http(s)://` links. Trailing sentence punctuation is not part of the link.
pub fn detect_links(text: &str) -> Vec<RichFacet> {
    bare_link()
        .find_iter(text)
        .filter_map(|m| {
            let trimmed = m
                .as_str()
                .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | ')'));
            if trimmed.len() <= "https://".len() {
                return None;
            }
            Some(RichFacet {
                byte_start: m.start(),
                byte_end: m.start() + trimmed.len(),
                feature: FacetFeature::Link {
                    uri: trimmed.to_string(),
                },
            })
        })
        .collect()
}

/// `#hashtags`. Purely numeric tags are not tags.
pub fn detect_tags(text: &str) -> Vec<RichFacet> {
    hashtag()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| {
            let tag = &m.as_str()[1..];
            if tag.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            Some(RichFacet {
                byte_start: m.start(),
                byte_end: m.end(),
                feature: FacetFeature::Tag {
                    tag: tag.to_string(),
                },
            })
        })
        .collect()
}

/// `@handle` spans as `(byte_start, byte_end, handle)`. Handles still need
/// resolving to DIDs before they can become mention facets.
pub fn detect_mentions(text: &str) -> Vec<(usize, usize, String)> {
    mention()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            let handle = m.as_str()[1..].trim_end_matches(|c: char| c == '.' || c == '-');
            (m.start(), m.start() + 1 + handle.len(), handle.to_string())
        })
        .collect()
}

/// Add `extra` facets to `base`, skipping any that overlap a facet already
/// present. The result is sorted by `byte_start`.
pub fn merge(mut base: Vec<RichFacet>, extra: Vec<RichFacet>) -> Vec<RichFacet> {
    for facet in extra {
        let overlaps = base
            .iter()
            .any(|f| facet.byte_start < f.byte_end && f.byte_start < facet.byte_end);
        if !overlaps {
            base.push(facet);
        }
    }
    base.sort_by_key(|f| f.byte_start);
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keeps_surrounding_text() {
        let (text, facets) = extract("see [my site](https://example.com/a?b=1) now");
        assert_eq!(text, "see my site now");
        assert_eq!(facets.len(), 1);
        assert_eq!(&text[facets[0].byte_start..facets[0].byte_end], "my site");
        assert_eq!(facets[0].uri, "https://example.com/a?b=1");
    }

    #[test]
    fn test_extract_unterminated_passes_through() {
        let input = "[broken](https://example.com";
        let (text, facets) = extract(input);
        assert_eq!(text, input);
        assert!(facets.is_empty());
    }

    #[test]
    fn test_extract_nested_brackets_do_not_match() {
        let input = "[[x]](https://example.com)";
        let (text, facets) = extract(input);
        assert_eq!(text, input);
        assert!(facets.is_empty());
    }

    #[test]
    fn test_detect_links_trims_punctuation() {
        let facets = detect_links("go to https://example.com/page.");
        assert_eq!(facets.len(), 1);
        assert_eq!(
            facets[0].feature,
            FacetFeature::Link {
                uri: "https://example.com/page".to_string()
            }
        );
    }

    #[test]
    fn test_detect_tags_skips_numbers() {
        let text = "live now #rustlang #1 #日本";
        let tags: Vec<_> = detect_tags(text)
            .into_iter()
            .map(|f| &text[f.byte_start..f.byte_end])
            .collect();
        assert_eq!(tags, vec!["#rustlang", "#日本"]);
    }

    #[test]
    fn test_detect_mentions() {
        let mentions = detect_mentions("thanks @alice.bsky.social. and @bob");
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].2, "alice.bsky.social");
        assert_eq!(mentions[0].0, 7);
        assert_eq!(mentions[0].1, 7 + 1 + "alice.bsky.social".len());
    }

    #[test]
    fn test_merge_drops_overlaps_and_sorts() {
        let base: Vec<RichFacet> = vec![RichFacet {
            byte_start: 10,
            byte_end: 20,
            feature: FacetFeature::Tag { tag: "a".into() },
        }];
        let extra = vec![
            RichFacet {
                byte_start: 15,
                byte_end: 25,
                feature: FacetFeature::Tag { tag: "b".into() },
            },
            RichFacet {
                byte_start: 0,
                byte_end: 5,
                feature: FacetFeature::Tag { tag: "c".into() },
            },
        ];
        let merged = merge(base, extra);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].byte_start, 0);
        assert_eq!(merged[1].byte_start, 10);
    }
}
