// Facet extraction tests — markdown links to plain text plus byte ranges.

use skybridge::facets::{extract, Facet};

fn facet(byte_start: usize, byte_end: usize, uri: &str) -> Facet {
    Facet {
        byte_start,
        byte_end,
        uri: uri.to_string(),
    }
}

#[test]
fn text_without_links_is_unchanged() {
    assert_eq!(extract("no links here"), ("no links here".to_string(), vec![]));
}

#[test]
fn single_link_becomes_label() {
    assert_eq!(
        extract("[Go](http://example.com)"),
        ("Go".to_string(), vec![facet(0, 2, "http://example.com")])
    );
}

#[test]
fn multibyte_label_uses_byte_length() {
    let (text, facets) = extract("[日](http://x.io)");
    assert_eq!(text, "日");
    assert_eq!(facets.len(), 1);
    assert_eq!(facets[0].byte_end - facets[0].byte_start, 3);
    assert_eq!(facets[0].uri, "http://x.io");
}

#[test]
fn every_link_is_replaced_once_and_located_in_output() {
    let input = "Watch [my stream](https://twitch.tv/streamer) and read [the blog](https://blog.example/post-1) today, [日本語 ok](https://example.jp/a?b=c)!";
    let (text, facets) = extract(input);

    assert_eq!(
        text,
        "Watch my stream and read the blog today, 日本語 ok!"
    );
    assert_eq!(facets.len(), 3);

    let labels: Vec<&str> = facets
        .iter()
        .map(|f| &text[f.byte_start..f.byte_end])
        .collect();
    assert_eq!(labels, vec!["my stream", "the blog", "日本語 ok"]);

    let uris: Vec<&str> = facets.iter().map(|f| f.uri.as_str()).collect();
    assert_eq!(
        uris,
        vec![
            "https://twitch.tv/streamer",
            "https://blog.example/post-1",
            "https://example.jp/a?b=c",
        ]
    );
}

#[test]
fn facets_are_sorted_and_non_overlapping() {
    let (_, facets) = extract("[a](http://a.io)[b](http://b.io) [c](http://c.io)");
    for pair in facets.windows(2) {
        assert!(pair[0].byte_end <= pair[1].byte_start);
    }
    assert_eq!(facets.len(), 3);
}

#[test]
fn link_text_that_looks_like_a_link_is_not_rescanned() {
    // The rewritten label would not match again, and scanning resumes after it.
    let (text, facets) = extract("[x](http://x.io)(http://y.io)");
    assert_eq!(text, "x(http://y.io)");
    assert_eq!(facets, vec![facet(0, 1, "http://x.io")]);
}

#[test]
fn malformed_markup_passes_through() {
    for input in [
        "[unterminated](http://example.com",
        "[](http://example.com)",
        "[label] (http://example.com)",
        "[label](not a url)",
    ] {
        let (text, facets) = extract(input);
        assert_eq!(text, input, "input {input:?} should pass through");
        assert!(facets.is_empty());
    }
}
