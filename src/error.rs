use std::any::Any;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A raw block record could not be turned into a [`crate::blocks::Block`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported block type")]
    UnsupportedType,
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("image {media_id} could not be resolved: {source}")]
    ImageLookup {
        media_id: i64,
        #[source]
        source: BoxError,
    },
}

/// A decoded block whose stored fields cannot be formatted.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid star rating {0}")]
    InvalidStars(String),
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("document could not be parsed: {0}")]
    Parse(String),
}

/// Failure of the block → HTML pipeline for one article.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("block {position} ({tag}): {source}")]
    Decode {
        position: i64,
        tag: String,
        #[source]
        source: DecodeError,
    },
    #[error("block {position} ({tag}): {source}")]
    Render {
        position: i64,
        tag: String,
        #[source]
        source: RenderError,
    },
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

impl TransformError {
    /// Position of the offending block, if the failure is tied to one.
    pub fn position(&self) -> Option<i64> {
        match self {
            TransformError::Decode { position, .. } | TransformError::Render { position, .. } => {
                Some(*position)
            }
            TransformError::Normalize(_) => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            TransformError::Decode { tag, .. } | TransformError::Render { tag, .. } => Some(tag),
            TransformError::Normalize(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ArticleErrorKind {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("source query failed: {0}")]
    Source(BoxError),
    #[error("assembly panicked: {0}")]
    Panicked(String),
}

/// An article that was dropped from the export, and why.
#[derive(Debug, Error)]
#[error("article {article_id}: {kind}")]
pub struct ArticleError {
    pub article_id: i64,
    #[source]
    pub kind: ArticleErrorKind,
}

impl ArticleError {
    pub fn source_failure(article_id: i64, err: anyhow::Error) -> Self {
        ArticleError {
            article_id,
            kind: ArticleErrorKind::Source(err.into()),
        }
    }

    pub fn transform(article_id: i64, err: TransformError) -> Self {
        ArticleError {
            article_id,
            kind: ArticleErrorKind::Transform(err),
        }
    }

    pub fn panicked(article_id: i64, payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        ArticleError {
            article_id,
            kind: ArticleErrorKind::Panicked(message),
        }
    }
}
