use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;

/// A media record from the legacy `medias` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub id: i64,
    pub uuid: String,
    pub width: i64,
    pub height: i64,
    pub filename: String,
    pub alt_text: Option<String>,
    pub credit: Option<String>,
    pub caption: Option<String>,
}

/// One row of the `blocks` table, joined with its media when it is an image.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub position: i64,
    pub tag: String,
    pub content: String,
    pub media_id: Option<i64>,
}

/// A published article with its section and issue.
#[derive(Debug, Clone)]
pub struct ArticleRow {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub section_name: String,
    pub section_slug: String,
    pub section_description: Option<String>,
    pub issue: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub published_at: Option<NaiveDateTime>,
    pub lede: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Author {
    pub name: String,
    pub slug: String,
    pub bio: Option<String>,
}

#[async_trait]
pub trait ImageLookup: Send + Sync {
    /// Resolve a media id; a missing or deleted media is an error.
    async fn image(&self, media_id: i64) -> Result<ImageRef>;
}

/// Everything the exporter reads from the legacy database.
#[async_trait]
pub trait ArticleSource: ImageLookup {
    async fn articles(&self) -> Result<Vec<ArticleRow>>;

    /// Current writers of an article, in byline order.
    async fn authors(&self, article_id: i64) -> Result<Vec<Author>>;

    async fn feature_image(&self, article_id: i64) -> Result<Option<ImageRef>>;

    /// Block records of an article ordered by position.
    async fn blocks(&self, article_id: i64) -> Result<Vec<RawBlock>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::time::Duration;

    use anyhow::anyhow;
    use chrono::NaiveDate;

    use super::*;

    /// In-memory source with optional per-media lookup delays.
    #[derive(Default)]
    pub struct MemorySource {
        pub articles: Vec<ArticleRow>,
        pub authors: HashMap<i64, Vec<Author>>,
        pub feature_images: HashMap<i64, ImageRef>,
        pub blocks: HashMap<i64, Vec<RawBlock>>,
        images: HashMap<i64, ImageRef>,
        delays: HashMap<i64, u64>,
    }

    impl MemorySource {
        pub fn with_image(mut self, image: ImageRef) -> Self {
            self.images.insert(image.id, image);
            self
        }

        pub fn with_delay(mut self, media_id: i64, millis: u64) -> Self {
            self.delays.insert(media_id, millis);
            self
        }

        pub fn with_article(mut self, article: ArticleRow, blocks: Vec<RawBlock>) -> Self {
            self.blocks.insert(article.id, blocks);
            self.articles.push(article);
            self
        }
    }

    #[async_trait]
    impl ImageLookup for MemorySource {
        async fn image(&self, media_id: i64) -> Result<ImageRef> {
            if let Some(millis) = self.delays.get(&media_id) {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
            }
            self.images
                .get(&media_id)
                .cloned()
                .ok_or_else(|| anyhow!("Image with ID {} not found", media_id))
        }
    }

    #[async_trait]
    impl ArticleSource for MemorySource {
        async fn articles(&self) -> Result<Vec<ArticleRow>> {
            Ok(self.articles.clone())
        }

        async fn authors(&self, article_id: i64) -> Result<Vec<Author>> {
            Ok(self.authors.get(&article_id).cloned().unwrap_or_default())
        }

        async fn feature_image(&self, article_id: i64) -> Result<Option<ImageRef>> {
            Ok(self.feature_images.get(&article_id).cloned())
        }

        async fn blocks(&self, article_id: i64) -> Result<Vec<RawBlock>> {
            Ok(self.blocks.get(&article_id).cloned().unwrap_or_default())
        }
    }

    pub fn image_ref(id: i64) -> ImageRef {
        ImageRef {
            id,
            uuid: format!("uuid-{}", id),
            width: 1200,
            height: 800,
            filename: format!("{}.jpg", id),
            alt_text: None,
            credit: None,
            caption: None,
        }
    }

    pub fn article_row(id: i64) -> ArticleRow {
        let ts = NaiveDate::from_ymd_opt(2019, 3, 14)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .unwrap();
        ArticleRow {
            id,
            title: format!("Article {}", id),
            slug: format!("article-{}", id),
            section_name: "News".into(),
            section_slug: "news".into(),
            section_description: Some("Campus news".into()),
            issue: None,
            created_at: ts,
            updated_at: ts,
            published_at: Some(ts),
            lede: None,
        }
    }

    pub fn text_block(position: i64, html: &str) -> RawBlock {
        RawBlock {
            position,
            tag: "text".into(),
            content: serde_json::json!({ "html": html }).to_string(),
            media_id: None,
        }
    }
}
