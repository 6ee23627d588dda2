use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDateTime;
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::blocks::{image_url, Block, CardRenderer, ImageCard, RenderContext};
use crate::decode::decode_all;
use crate::error::{ArticleError, TransformError};
use crate::normalize::Normalizer;
use crate::sanitize::Sanitizer;
use crate::source::{ArticleRow, ArticleSource, Author, ImageLookup, RawBlock};

const EXCERPT_LIMIT: usize = 300;
const ABOUT_SECTION: &str = "about";

/// Blocks → sanitized HTML body.
pub struct Pipeline {
    base_url: String,
    cards: Box<dyn CardRenderer>,
    normalizer: Normalizer,
    sanitizer: Sanitizer,
}

impl Pipeline {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_cards(base_url, Box::new(ImageCard))
    }

    pub fn with_cards(base_url: impl Into<String>, cards: Box<dyn CardRenderer>) -> Self {
        let base_url = base_url.into();
        Pipeline {
            normalizer: Normalizer::new(base_url.clone()),
            sanitizer: Sanitizer::new(),
            base_url,
            cards,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Transform an article's block records into its publishable body.
    /// Nothing is returned unless every block decodes and renders.
    pub async fn transform<L>(&self, records: Vec<RawBlock>, images: &L) -> Result<String, TransformError>
    where
        L: ImageLookup + ?Sized,
    {
        let blocks = decode_all(records, images).await?;
        let html = self.render(&blocks)?;
        let normalized = self.normalizer.normalize(&html)?;
        Ok(self.sanitizer.sanitize(&normalized))
    }

    /// Render blocks in the order given and join the fragments.
    pub fn render(&self, blocks: &[(i64, Block)]) -> Result<String, TransformError> {
        let ctx = RenderContext {
            base_url: &self.base_url,
            cards: self.cards.as_ref(),
        };
        let fragments = blocks
            .iter()
            .map(|(position, block)| {
                block.render(&ctx).map_err(|source| TransformError::Render {
                    position: *position,
                    tag: block.tag().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fragments.join("\n"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Post,
    Page,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureImage {
    pub url: String,
    pub alt: Option<String>,
    pub caption: Option<String>,
}

/// One fully assembled post, ready for the import file.
#[derive(Debug, Clone, Serialize)]
pub struct PostRecord {
    pub source_id: i64,
    pub title: String,
    pub slug: String,
    pub visibility: &'static str,
    pub status: &'static str,
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub published_at: Option<NaiveDateTime>,
    pub custom_excerpt: Option<String>,
    pub tags: Vec<Tag>,
    pub authors: Vec<Author>,
    pub feature_image: Option<FeatureImage>,
    pub html: String,
}

/// Builds a [`PostRecord`] for each source article.
pub struct Assembler {
    pipeline: Pipeline,
    default_author: Author,
}

impl Assembler {
    pub fn new(pipeline: Pipeline, default_author: Author) -> Self {
        Assembler {
            pipeline,
            default_author,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn assemble(
        &self,
        source: &dyn ArticleSource,
        article: &ArticleRow,
    ) -> Result<PostRecord, ArticleError> {
        let id = article.id;
        let source_err = |e| ArticleError::source_failure(id, e);

        // Only published articles are selected, so every post is public.
        let post_type = if article.section_slug == ABOUT_SECTION {
            PostType::Page
        } else {
            PostType::Post
        };

        let custom_excerpt = article.lede.as_deref().map(excerpt);

        let mut tags = vec![Tag {
            name: article.section_name.clone(),
            slug: article.section_slug.clone(),
            description: article.section_description.clone(),
        }];
        if let Some(issue) = article.issue {
            tags.push(issue_tag(issue));
        }

        let mut authors = source.authors(id).await.map_err(source_err)?;
        if authors.is_empty() {
            debug!(article = id, "No current writers, crediting default author");
            authors.push(self.default_author.clone());
        }

        let feature_image = source
            .feature_image(id)
            .await
            .map_err(source_err)?
            .map(|image| FeatureImage {
                url: image_url(self.pipeline.base_url(), &image),
                alt: image.alt_text,
                caption: image.caption,
            });

        let records = source.blocks(id).await.map_err(source_err)?;
        let block_count = records.len();
        let html = self
            .pipeline
            .transform(records, source)
            .await
            .map_err(|e| ArticleError::transform(id, e))?;
        debug!(article = id, blocks = block_count, "Assembled body");

        Ok(PostRecord {
            source_id: id,
            title: article.title.clone(),
            slug: article.slug.clone(),
            visibility: "public",
            status: "published",
            post_type,
            created_at: article.created_at,
            updated_at: article.updated_at,
            published_at: article.published_at,
            custom_excerpt,
            tags,
            authors,
            feature_image,
            html,
        })
    }
}

/// Posts that assembled, in source order, and the articles that did not.
pub struct ExportReport {
    pub posts: Vec<PostRecord>,
    pub failures: Vec<ArticleError>,
}

/// Assemble every published article, at most `concurrency` at a time.
pub async fn export_all(
    assembler: Arc<Assembler>,
    source: Arc<dyn ArticleSource>,
    concurrency: usize,
) -> Result<ExportReport> {
    let articles = source.articles().await?;
    let total = articles.len();
    let concurrency = concurrency.max(1);
    info!("Exporting {} articles ({} at a time)", total, concurrency);

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = mpsc::channel::<(usize, Result<PostRecord, ArticleError>)>(concurrency * 2);

    for (index, article) in articles.into_iter().enumerate() {
        let assembler = Arc::clone(&assembler);
        let source = Arc::clone(&source);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else {
                return;
            };
            // A panicking article is reported like any other failure.
            let result = AssertUnwindSafe(assembler.assemble(source.as_ref(), &article))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(ArticleError::panicked(article.id, payload)));
            let _ = tx.send((index, result)).await;
        });
    }

    // Channel closes once every task has reported.
    drop(tx);

    let mut posts = Vec::with_capacity(total);
    let mut failures = Vec::new();
    while let Some((index, result)) = rx.recv().await {
        match result {
            Ok(post) => posts.push((index, post)),
            Err(e) => {
                warn!("Skipping {}", e);
                failures.push(e);
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    posts.sort_by_key(|(index, _)| *index);
    info!(
        "Exported {} posts ({} articles failed)",
        posts.len(),
        failures.len()
    );

    Ok(ExportReport {
        posts: posts.into_iter().map(|(_, post)| post).collect(),
        failures,
    })
}

/// Ghost caps custom excerpts at 300 characters.
pub fn excerpt(lede: &str) -> String {
    if lede.chars().count() > EXCERPT_LIMIT {
        let mut truncated: String = lede.chars().take(EXCERPT_LIMIT - 1).collect();
        truncated.push('…');
        truncated
    } else {
        lede.to_string()
    }
}

fn issue_tag(issue: i64) -> Tag {
    Tag {
        name: format!("Issue {}", issue),
        slug: format!("issue-{}", issue),
        description: None,
    }
}
