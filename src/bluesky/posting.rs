// Posting — compose posts, replies and likes from the primitive record calls.
//
// A post goes through: markdown link rewriting, optional facet detection
// (bare links, #tags, @mentions), embed upload (link card or images), an
// optional split into a self-reply thread, and finally an optional
// threadgate on the first post.

use std::ops::Range;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::try_join_all;
use tracing::{debug, info, warn};

use super::client::AccountClient;
use super::records::{self, AtUri, EmbeddedImage, ExternalCard, ReplyGate, POST_COLLECTION};
use super::types::{BlobRef, Post, StrongRef};
use crate::facets::{self, FacetFeature, RichFacet};

/// Longest post text the platform accepts, in characters.
pub const MAX_POST_CHARS: usize = 300;

/// Most images a single post can embed.
pub const MAX_IMAGES: usize = 4;

/// A link card to attach to a post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalLink {
    pub uri: String,
    pub title: String,
    pub description: String,
    pub thumb_url: Option<String>,
}

/// An image to download and attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub url: String,
    pub alt: String,
}

/// What to post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostPayload {
    pub text: String,
    pub external_link: Option<ExternalLink>,
    pub images: Vec<ImageAttachment>,
    pub reply_gate: ReplyGate,
}

impl PostPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reply_gate: ReplyGate::EVERYONE,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostOptions {
    /// Detect bare links, hashtags and mentions in addition to markdown links.
    pub resolve_facets: bool,
    /// Split text over the length limit into a thread instead of failing.
    pub split_long_post: bool,
}

impl Default for PostOptions {
    fn default() -> Self {
        Self {
            resolve_facets: true,
            split_long_post: false,
        }
    }
}

/// Posts on behalf of one logged-in account.
pub struct Poster {
    client: Arc<dyn AccountClient>,
    http: reqwest::Client,
}

impl Poster {
    pub fn new(client: Arc<dyn AccountClient>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("skybridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, http })
    }

    /// Publish a new top-level post. Returns the first post of the thread.
    pub async fn post(&self, payload: &PostPayload, opts: &PostOptions) -> Result<StrongRef> {
        self.publish(payload, opts, None).await
    }

    /// Reply to `parent`, keeping its thread root.
    pub async fn reply(
        &self,
        parent: &Post,
        payload: &PostPayload,
        opts: &PostOptions,
    ) -> Result<StrongRef> {
        let parent_ref = parent.strong_ref();
        let root = parent
            .reply
            .as_ref()
            .map(|r| r.root.clone())
            .unwrap_or_else(|| parent_ref.clone());
        self.publish(payload, opts, Some((root, parent_ref))).await
    }

    /// Like the post at `subject`.
    pub async fn like(&self, subject: &StrongRef) -> Result<StrongRef> {
        let record = records::like_record(subject, Utc::now());
        let like = self
            .client
            .create_record(records::LIKE_COLLECTION, record)
            .await?;
        info!(subject = %subject.uri, "Liked post");
        Ok(like)
    }

    async fn publish(
        &self,
        payload: &PostPayload,
        opts: &PostOptions,
        reply: Option<(StrongRef, StrongRef)>,
    ) -> Result<StrongRef> {
        if payload.text.trim().is_empty() && payload.images.is_empty() {
            anyhow::bail!("Refusing to publish an empty post");
        }

        let (text, facets) = rich_text(self.client.as_ref(), &payload.text, opts.resolve_facets).await;

        let chunks = if opts.split_long_post {
            split_text(&text, MAX_POST_CHARS)
        } else {
            let count = text.chars().count();
            if count > MAX_POST_CHARS {
                anyhow::bail!("Post is {count} characters, the limit is {MAX_POST_CHARS}");
            }
            vec![0..text.len()]
        };

        // The embed belongs to the first post of a split thread only.
        let mut embed = self.build_embed(payload).await?;
        let mut thread: Option<(StrongRef, StrongRef)> = reply;
        let mut first: Option<StrongRef> = None;

        for chunk in &chunks {
            let chunk_facets = rebase_facets(&facets, chunk);
            let record = records::post_record(
                &text[chunk.clone()],
                &chunk_facets,
                embed.take(),
                thread.as_ref().map(|(root, parent)| (root, parent)),
                Utc::now(),
            );
            let created = self.client.create_record(POST_COLLECTION, record).await?;
            debug!(uri = %created.uri, "Created post");

            let root = match &thread {
                Some((root, _)) => root.clone(),
                None => created.clone(),
            };
            thread = Some((root, created.clone()));
            if first.is_none() {
                first = Some(created);
            }
        }

        let first = first.context("Post produced no records")?;

        if let Some(gate) = records::threadgate_record(&first.uri, payload.reply_gate, Utc::now()) {
            let rkey = AtUri::parse(&first.uri)?.rkey;
            self.client
                .put_record(records::THREADGATE_COLLECTION, &rkey, gate)
                .await
                .context("Failed to write threadgate")?;
        }

        info!(uri = %first.uri, posts = chunks.len(), "Published to Bluesky");
        Ok(first)
    }

    async fn build_embed(&self, payload: &PostPayload) -> Result<Option<serde_json::Value>> {
        if !payload.images.is_empty() {
            if payload.images.len() > MAX_IMAGES {
                warn!(
                    count = payload.images.len(),
                    "Too many images, only the first {MAX_IMAGES} are attached"
                );
            }
            let uploads = payload.images.iter().take(MAX_IMAGES).map(|image| async move {
                let blob = upload_from_url(self.client.as_ref(), &self.http, &image.url).await?;
                Ok::<_, anyhow::Error>(EmbeddedImage {
                    blob,
                    alt: image.alt.clone(),
                })
            });
            let images = try_join_all(uploads).await?;
            return Ok(Some(records::images_embed(&images)));
        }

        let Some(link) = &payload.external_link else {
            return Ok(None);
        };

        let thumb = match &link.thumb_url {
            Some(url) => match upload_from_url(self.client.as_ref(), &self.http, url).await {
                Ok(blob) => Some(blob),
                Err(e) => {
                    warn!(url = %url, error = %e, "Link card thumbnail failed, posting without it");
                    None
                }
            },
            None => None,
        };

        let card = ExternalCard {
            uri: link.uri.clone(),
            title: link.title.clone(),
            description: link.description.clone(),
            thumb,
        };
        Ok(Some(card.to_embed()))
    }
}

/// Download `url` and upload it as a blob.
pub async fn upload_from_url(
    client: &dyn AccountClient,
    http: &reqwest::Client,
    url: &str,
) -> Result<BlobRef> {
    let response = http
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download {url}"))?
        .error_for_status()
        .with_context(|| format!("Download of {url} was not OK"))?;

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/jpeg")
        .to_string();

    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read body of {url}"))?;

    client.upload_blob(bytes.to_vec(), &content_type).await
}

/// Rewrite markdown links and, with `resolve`, add link, tag and mention
/// facets. Mentions whose handle does not resolve are left as plain text.
pub async fn rich_text(
    client: &dyn AccountClient,
    input: &str,
    resolve: bool,
) -> (String, Vec<RichFacet>) {
    let (text, links) = facets::extract(input);
    let mut rich: Vec<RichFacet> = links.into_iter().map(RichFacet::from).collect();

    if !resolve {
        return (text, rich);
    }

    rich = facets::merge(rich, facets::detect_links(&text));
    rich = facets::merge(rich, facets::detect_tags(&text));

    let mut mentions = Vec::new();
    for (byte_start, byte_end, handle) in facets::detect_mentions(&text) {
        match client.resolve_handle(&handle).await {
            Ok(did) => mentions.push(RichFacet {
                byte_start,
                byte_end,
                feature: FacetFeature::Mention { did },
            }),
            Err(e) => debug!(handle = %handle, error = %e, "Mention did not resolve"),
        }
    }
    rich = facets::merge(rich, mentions);

    (text, rich)
}

/// Split `text` into byte ranges of at most `max_chars` characters, breaking
/// at whitespace where possible. Whitespace at a break is dropped.
pub fn split_text(text: &str, max_chars: usize) -> Vec<Range<usize>> {
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let rest = &text[start..];
        let skipped = rest.len() - rest.trim_start().len();
        start += skipped;
        let rest = &text[start..];
        if rest.is_empty() {
            break;
        }

        let limit = match rest.char_indices().nth(max_chars) {
            Some((idx, _)) => idx,
            None => {
                chunks.push(start..start + rest.trim_end().len());
                break;
            }
        };

        // Break after the last whitespace that still fits; the character at
        // `limit` itself counts, so a word ending exactly at the limit stays whole.
        let window = &rest[..limit + rest[limit..].chars().next().map_or(0, char::len_utf8)];
        let cut = window
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .map(|(idx, _)| idx)
            .filter(|&idx| idx > 0)
            .last()
            .unwrap_or(limit);

        let chunk = &rest[..cut];
        chunks.push(start..start + chunk.trim_end().len());
        start += cut;
    }

    if chunks.is_empty() {
        chunks.push(0..0);
    }
    chunks
}

/// Facets wholly inside `chunk`, shifted to chunk-relative offsets.
pub fn rebase_facets(facets: &[RichFacet], chunk: &Range<usize>) -> Vec<RichFacet> {
    facets
        .iter()
        .filter(|f| f.byte_start >= chunk.start && f.byte_end <= chunk.end)
        .map(|f| RichFacet {
            byte_start: f.byte_start - chunk.start,
            byte_end: f.byte_end - chunk.start,
            feature: f.feature.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(start: usize, end: usize) -> RichFacet {
        RichFacet {
            byte_start: start,
            byte_end: end,
            feature: FacetFeature::Link {
                uri: "https://example.com".to_string(),
            },
        }
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(split_text("hello world", 300), vec![0..11]);
    }

    #[test]
    fn test_split_at_whitespace() {
        let text = "aaaa bbbb cccc";
        let chunks: Vec<&str> = split_text(text, 9).into_iter().map(|r| &text[r]).collect();
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc"]);
    }

    #[test]
    fn test_split_hard_cut_without_whitespace() {
        let text = "abcdefghij";
        let chunks: Vec<&str> = split_text(text, 4).into_iter().map(|r| &text[r]).collect();
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_split_counts_characters_not_bytes() {
        let text = "日本語 日本語";
        let chunks: Vec<&str> = split_text(text, 3).into_iter().map(|r| &text[r]).collect();
        assert_eq!(chunks, vec!["日本語", "日本語"]);
    }

    #[test]
    fn test_rebase_drops_straddling_facets() {
        let facets = vec![link(0, 4), link(3, 7), link(10, 14)];
        let rebased = rebase_facets(&facets, &(5..15));
        assert_eq!(rebased, vec![link(5, 9)]);

        let first = rebase_facets(&facets, &(0..5));
        assert_eq!(first, vec![link(0, 4)]);
    }

    #[test]
    fn test_payload_text_defaults() {
        let payload = PostPayload::text("hi");
        assert_eq!(payload.reply_gate, ReplyGate::EVERYONE);
        assert!(payload.images.is_empty());
        assert!(payload.external_link.is_none());
    }
}
