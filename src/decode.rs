use std::str::FromStr;

use futures::future::try_join_all;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::blocks::Block;
use crate::error::{DecodeError, TransformError};
use crate::source::{ImageLookup, RawBlock};

/// Block type tags used by the legacy CMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Text,
    Review,
    Sidebar,
    Quotation,
    Image,
    BookReview,
    FilmReview,
}

impl FromStr for BlockType {
    type Err = DecodeError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "text" => Ok(BlockType::Text),
            "review" => Ok(BlockType::Review),
            "sidebar" => Ok(BlockType::Sidebar),
            "quotation" => Ok(BlockType::Quotation),
            "image" => Ok(BlockType::Image),
            "book-review" => Ok(BlockType::BookReview),
            "film-review" => Ok(BlockType::FilmReview),
            _ => Err(DecodeError::UnsupportedType),
        }
    }
}

#[derive(Deserialize)]
struct HtmlPayload {
    #[serde(default, deserialize_with = "lenient_text")]
    html: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    title: Option<String>,
}

#[derive(Deserialize)]
struct ReviewPayload {
    #[serde(default, deserialize_with = "lenient_text")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    what: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    when: Option<String>,
    #[serde(default, rename = "where", deserialize_with = "lenient_text")]
    venue: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    cost: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    author: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    year: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    director: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    starring: Option<String>,
    #[serde(default)]
    stars: Option<Value>,
}

#[derive(Deserialize)]
struct ImagePayload {
    #[serde(default, deserialize_with = "lenient_text")]
    float: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    width: Option<String>,
}

/// Text fields in stored payloads are sometimes numbers (years, prices).
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(other) => {
            return Err(de::Error::custom(format!("expected text, found {}", other)));
        }
    })
}

/// Decode one raw record into a block, resolving its image when it has one.
pub async fn decode<L>(record: &RawBlock, images: &L) -> Result<Block, DecodeError>
where
    L: ImageLookup + ?Sized,
{
    let kind: BlockType = record.tag.parse()?;
    let content: Value = serde_json::from_str(&record.content)?;

    let block = match kind {
        // Empty text blocks are stored as a bare `null`.
        BlockType::Text if content.is_null() => Block::Text {
            html: String::new(),
        },
        BlockType::Text => {
            let p: HtmlPayload = serde_json::from_value(content)?;
            Block::Text {
                html: p.html.unwrap_or_default(),
            }
        }
        BlockType::Quotation => {
            let p: HtmlPayload = serde_json::from_value(content)?;
            Block::Quotation {
                html: p.html.unwrap_or_default(),
            }
        }
        BlockType::Sidebar => {
            let p: HtmlPayload = serde_json::from_value(content)?;
            Block::Sidebar {
                html: p.html.unwrap_or_default(),
                title: p.title,
            }
        }
        BlockType::Review => {
            let p: ReviewPayload = serde_json::from_value(content)?;
            Block::Review {
                title: p.title,
                what: p.what,
                when: p.when,
                venue: p.venue,
                cost: p.cost,
                stars: p.stars,
            }
        }
        BlockType::BookReview => {
            let p: ReviewPayload = serde_json::from_value(content)?;
            Block::BookReview {
                stars: p.stars,
                title: p.title,
                author: p.author,
            }
        }
        BlockType::FilmReview => {
            let p: ReviewPayload = serde_json::from_value(content)?;
            Block::FilmReview {
                stars: p.stars,
                year: p.year,
                title: p.title,
                director: p.director,
                starring: p.starring,
            }
        }
        BlockType::Image => {
            let p: ImagePayload = serde_json::from_value(content)?;
            let image = match record.media_id {
                Some(media_id) => Some(images.image(media_id).await.map_err(|e| {
                    DecodeError::ImageLookup {
                        media_id,
                        source: e.into(),
                    }
                })?),
                None => None,
            };
            Block::Image {
                image,
                float: p.float,
                width: p.width,
            }
        }
    };

    Ok(block)
}

/// Decode an article's records concurrently. The result is in ascending
/// position order whatever order the lookups complete in; the first failure
/// aborts the whole article.
pub async fn decode_all<L>(
    mut records: Vec<RawBlock>,
    images: &L,
) -> Result<Vec<(i64, Block)>, TransformError>
where
    L: ImageLookup + ?Sized,
{
    records.sort_by_key(|r| r.position);
    debug!("Decoding {} blocks", records.len());

    try_join_all(records.iter().map(|record| async move {
        decode(record, images)
            .await
            .map(|block| (record.position, block))
            .map_err(|source| TransformError::Decode {
                position: record.position,
                tag: record.tag.clone(),
                source,
            })
    }))
    .await
}
