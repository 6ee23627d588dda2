use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::source::{ArticleRow, ArticleSource, Author, ImageLookup, ImageRef, RawBlock};

/// The legacy CMS database, loaded into SQLite.
pub struct SqliteSource {
    conn: Mutex<Connection>,
}

impl SqliteSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Database {:?} not found", path);
        }
        let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        SqliteSource {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection poisoned"))
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    /// Create the legacy tables if they are missing.
    pub fn init_schema(&self) -> Result<()> {
        self.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS issues (
                id    INTEGER PRIMARY KEY,
                issue INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sections (
                id          INTEGER PRIMARY KEY,
                title       TEXT NOT NULL,
                description TEXT,
                published   BOOLEAN NOT NULL DEFAULT 1,
                deleted_at  TEXT
            );

            CREATE TABLE IF NOT EXISTS section_slugs (
                id         INTEGER PRIMARY KEY,
                section_id INTEGER NOT NULL REFERENCES sections(id),
                slug       TEXT NOT NULL,
                active     BOOLEAN NOT NULL DEFAULT 1,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS articles (
                id                 INTEGER PRIMARY KEY,
                section_id         INTEGER REFERENCES sections(id),
                issue_id           INTEGER REFERENCES issues(id),
                headline           TEXT NOT NULL,
                lede               TEXT,
                published          BOOLEAN NOT NULL DEFAULT 0,
                publish_start_date TEXT,
                created_at         TEXT NOT NULL,
                updated_at         TEXT NOT NULL,
                deleted_at         TEXT
            );

            CREATE TABLE IF NOT EXISTS article_slugs (
                id         INTEGER PRIMARY KEY,
                article_id INTEGER NOT NULL REFERENCES articles(id),
                slug       TEXT NOT NULL,
                active     BOOLEAN NOT NULL DEFAULT 1,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_article_slugs_article ON article_slugs(article_id);

            CREATE TABLE IF NOT EXISTS writers (
                id         INTEGER PRIMARY KEY,
                name       TEXT NOT NULL,
                role       TEXT,
                bio        TEXT,
                current    BOOLEAN NOT NULL DEFAULT 1,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS writer_slugs (
                id         INTEGER PRIMARY KEY,
                writer_id  INTEGER NOT NULL REFERENCES writers(id),
                slug       TEXT NOT NULL,
                active     BOOLEAN NOT NULL DEFAULT 1,
                deleted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS article_writer (
                article_id INTEGER NOT NULL REFERENCES articles(id),
                writer_id  INTEGER NOT NULL REFERENCES writers(id),
                position   INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS medias (
                id         INTEGER PRIMARY KEY,
                uuid       TEXT NOT NULL,
                width      INTEGER NOT NULL,
                height     INTEGER NOT NULL,
                filename   TEXT NOT NULL,
                alt_text   TEXT,
                credit     TEXT,
                caption    TEXT,
                deleted_at TEXT
            );

            -- Polymorphic link from articles and image blocks to medias.
            CREATE TABLE IF NOT EXISTS mediables (
                id            INTEGER PRIMARY KEY,
                media_id      INTEGER NOT NULL REFERENCES medias(id),
                mediable_id   INTEGER NOT NULL,
                mediable_type TEXT NOT NULL,
                deleted_at    TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_mediables_target ON mediables(mediable_type, mediable_id);

            CREATE TABLE IF NOT EXISTS blocks (
                id             INTEGER PRIMARY KEY,
                blockable_id   INTEGER NOT NULL,
                blockable_type TEXT NOT NULL,
                position       INTEGER NOT NULL,
                type           TEXT NOT NULL,
                content        TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_blocks_owner ON blocks(blockable_type, blockable_id);
            ",
        )
    }

    /// Published article count and block counts by type tag.
    pub fn stats(&self) -> Result<SourceStats> {
        let conn = self.lock()?;
        let articles: i64 = conn.query_row(
            "SELECT COUNT(*) FROM articles WHERE deleted_at IS NULL AND published = 1",
            [],
            |row| row.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT type, COUNT(*) FROM blocks
             WHERE blockable_type = 'articles'
             GROUP BY type ORDER BY COUNT(*) DESC, type",
        )?;
        let blocks = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SourceStats { articles, blocks })
    }
}

pub struct SourceStats {
    pub articles: i64,
    pub blocks: Vec<(String, i64)>,
}

#[async_trait]
impl ImageLookup for SqliteSource {
    async fn image(&self, media_id: i64) -> Result<ImageRef> {
        let conn = self.lock()?;
        query_image(&conn, media_id)?.ok_or_else(|| anyhow!("Image with ID {} not found", media_id))
    }
}

#[async_trait]
impl ArticleSource for SqliteSource {
    async fn articles(&self) -> Result<Vec<ArticleRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT articles.id,
                    articles.headline,
                    article_slugs.slug,
                    sections.title,
                    section_slugs.slug,
                    sections.description,
                    issues.issue,
                    articles.created_at,
                    articles.updated_at,
                    articles.publish_start_date,
                    articles.lede
             FROM articles
                      LEFT JOIN article_slugs ON articles.id = article_slugs.article_id
                      LEFT JOIN issues ON articles.issue_id = issues.id
                      LEFT JOIN sections ON articles.section_id = sections.id
                      LEFT JOIN section_slugs ON sections.id = section_slugs.section_id
             WHERE articles.deleted_at IS NULL
               AND articles.published = 1
               AND article_slugs.deleted_at IS NULL
               AND article_slugs.active = 1
               AND sections.deleted_at IS NULL
               AND sections.published = 1
               AND section_slugs.deleted_at IS NULL
               AND section_slugs.active = 1
             ORDER BY articles.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ArticleRow {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    slug: row.get(2)?,
                    section_name: row.get(3)?,
                    section_slug: row.get(4)?,
                    section_description: row.get(5)?,
                    issue: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                    published_at: row.get(9)?,
                    lede: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn authors(&self, article_id: i64) -> Result<Vec<Author>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT writers.name, writers.role, writers.bio, writer_slugs.slug
             FROM article_writer
                      JOIN writers ON article_writer.writer_id = writers.id
                      JOIN writer_slugs ON writers.id = writer_slugs.writer_id
             WHERE article_writer.article_id = ?1
               AND writers.deleted_at IS NULL
               AND writers.current = 1
               AND writer_slugs.deleted_at IS NULL
               AND writer_slugs.active = 1
             ORDER BY article_writer.position",
        )?;
        let rows = stmt
            .query_map(params![article_id], |row| {
                let role: Option<String> = row.get(1)?;
                let bio: Option<String> = row.get(2)?;
                Ok(Author {
                    name: row.get(0)?,
                    bio: join_bio(role, bio),
                    slug: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn feature_image(&self, article_id: i64) -> Result<Option<ImageRef>> {
        let conn = self.lock()?;
        let media_id: Option<i64> = conn
            .query_row(
                "SELECT media_id FROM mediables
                 WHERE deleted_at IS NULL
                   AND mediable_id = ?1
                   AND mediable_type = 'articles'
                 ORDER BY id
                 LIMIT 1",
                params![article_id],
                |row| row.get(0),
            )
            .optional()?;

        match media_id {
            Some(id) => query_image(&conn, id)?
                .map(Some)
                .ok_or_else(|| anyhow!("Image with ID {} not found", id)),
            None => Ok(None),
        }
    }

    async fn blocks(&self, article_id: i64) -> Result<Vec<RawBlock>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT blocks.position, blocks.type, blocks.content, mediables.media_id
             FROM blocks
                      LEFT JOIN mediables ON blocks.type = 'image'
                 AND blocks.id = mediables.mediable_id
                 AND mediables.mediable_type = 'blocks'
                 AND mediables.deleted_at IS NULL
             WHERE blocks.blockable_id = ?1
               AND blocks.blockable_type = 'articles'
             ORDER BY blocks.position",
        )?;
        let rows = stmt
            .query_map(params![article_id], |row| {
                let content: Option<String> = row.get(2)?;
                Ok(RawBlock {
                    position: row.get(0)?,
                    tag: row.get(1)?,
                    content: content.unwrap_or_else(|| "null".to_string()),
                    media_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn query_image(conn: &Connection, media_id: i64) -> Result<Option<ImageRef>> {
    let image = conn
        .query_row(
            "SELECT id, uuid, width, height, filename, alt_text, credit, caption
             FROM medias
             WHERE id = ?1
               AND deleted_at IS NULL",
            params![media_id],
            |row| {
                Ok(ImageRef {
                    id: row.get(0)?,
                    uuid: row.get(1)?,
                    width: row.get(2)?,
                    height: row.get(3)?,
                    filename: row.get(4)?,
                    alt_text: row.get(5)?,
                    credit: row.get(6)?,
                    caption: row.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(image)
}

/// Writer bios are shown as "role - bio", skipping whichever is missing.
fn join_bio(role: Option<String>, bio: Option<String>) -> Option<String> {
    let parts: Vec<String> = [role, bio].into_iter().flatten().collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" - "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::{Assembler, Pipeline};

    const SEED: &str = r#"
        INSERT INTO issues (id, issue) VALUES (1, 1701);
        INSERT INTO sections (id, title, description, published) VALUES
            (1, 'News', 'Campus news', 1),
            (2, 'About', NULL, 1),
            (3, 'Archive', NULL, 0);
        INSERT INTO section_slugs (section_id, slug, active) VALUES
            (1, 'news', 1), (2, 'about', 1), (3, 'archive', 1);
        INSERT INTO articles (id, section_id, issue_id, headline, lede, published, publish_start_date, created_at, updated_at, deleted_at) VALUES
            (1, 1, 1, 'Union elections', 'Turnout was up.', 1, '2019-03-14 10:00:00', '2019-03-13 09:00:00', '2019-03-14 11:00:00', NULL),
            (2, 2, NULL, 'About Felix', NULL, 1, NULL, '2015-01-01 00:00:00', '2015-01-01 00:00:00', NULL),
            (3, 1, NULL, 'Draft', NULL, 0, NULL, '2019-01-01 00:00:00', '2019-01-01 00:00:00', NULL),
            (4, 3, NULL, 'Hidden section', NULL, 1, NULL, '2019-01-01 00:00:00', '2019-01-01 00:00:00', NULL),
            (5, 1, NULL, 'Deleted', NULL, 1, NULL, '2019-01-01 00:00:00', '2019-01-01 00:00:00', '2019-02-01 00:00:00');
        INSERT INTO article_slugs (article_id, slug, active) VALUES
            (1, 'union-elections', 1), (2, 'about', 1), (3, 'draft', 1), (4, 'hidden', 1), (5, 'deleted', 1);
        INSERT INTO writers (id, name, role, bio, current) VALUES
            (1, 'Ada', 'News Editor', 'Physics, third year', 1),
            (2, 'Bob', NULL, NULL, 1),
            (3, 'Old Timer', 'Editor', NULL, 0);
        INSERT INTO writer_slugs (writer_id, slug, active) VALUES (1, 'ada', 1), (2, 'bob', 1), (3, 'old-timer', 1);
        INSERT INTO article_writer (article_id, writer_id, position) VALUES (1, 2, 1), (1, 1, 0), (1, 3, 2);
        INSERT INTO medias (id, uuid, width, height, filename, alt_text, credit, caption) VALUES
            (10, 'feature-uuid', 1600, 900, 'union.jpg', 'Ballot box', 'Felix', 'Counting'),
            (11, 'block-uuid', 800, 600, 'crowd.jpg', NULL, 'Jo', NULL);
        INSERT INTO mediables (media_id, mediable_id, mediable_type) VALUES
            (10, 1, 'articles'),
            (11, 102, 'blocks');
        INSERT INTO blocks (id, blockable_id, blockable_type, position, type, content) VALUES
            (103, 1, 'articles', 2, 'text', '{"html":"<p>See <a href=\"https://felixonline.co.uk/news/2\">results</a>.</p>"}'),
            (101, 1, 'articles', 0, 'text', '{"html":"<p>Voting closed on Friday.</p>"}'),
            (102, 1, 'articles', 1, 'image', '{"float":null,"width":100}'),
            (104, 1, 'articles', 3, 'text', NULL);
    "#;

    fn seeded() -> SqliteSource {
        let src = SqliteSource::open_in_memory().unwrap();
        src.init_schema().unwrap();
        src.execute_batch(SEED).unwrap();
        src
    }

    #[tokio::test]
    async fn selects_only_published_live_articles() {
        let src = seeded();
        let articles = src.articles().await.unwrap();
        let ids: Vec<i64> = articles.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2]);

        let first = &articles[0];
        assert_eq!(first.slug, "union-elections");
        assert_eq!(first.section_slug, "news");
        assert_eq!(first.issue, Some(1701));
        assert!(first.published_at.is_some());
        assert!(articles[1].published_at.is_none());
    }

    #[tokio::test]
    async fn authors_in_byline_order() {
        let src = seeded();
        let authors = src.authors(1).await.unwrap();
        assert_eq!(authors.len(), 2);
        assert_eq!(authors[0].name, "Ada");
        assert_eq!(authors[0].bio.as_deref(), Some("News Editor - Physics, third year"));
        assert_eq!(authors[1].name, "Bob");
        assert!(authors[1].bio.is_none());
        assert!(src.authors(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocks_ordered_with_media() {
        let src = seeded();
        let blocks = src.blocks(1).await.unwrap();
        let positions: Vec<i64> = blocks.iter().map(|b| b.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert_eq!(blocks[1].media_id, Some(11));
        assert_eq!(blocks[0].media_id, None);
        assert_eq!(blocks[3].content, "null");
    }

    #[tokio::test]
    async fn image_lookup() {
        let src = seeded();
        assert_eq!(src.image(11).await.unwrap().uuid, "block-uuid");
        assert!(src.image(99).await.is_err());
        assert_eq!(
            src.feature_image(1).await.unwrap().map(|i| i.uuid),
            Some("feature-uuid".to_string())
        );
        assert!(src.feature_image(2).await.unwrap().is_none());
    }

    #[test]
    fn stats_counts_blocks_by_type() {
        let src = seeded();
        let stats = src.stats().unwrap();
        // Counts published rows regardless of section.
        assert_eq!(stats.articles, 3);
        assert_eq!(
            stats.blocks,
            vec![("text".to_string(), 3), ("image".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn assembles_from_database() {
        let src = seeded();
        let article = src.articles().await.unwrap().remove(0);
        let assembler = Assembler::new(
            Pipeline::new("https://felixonline.co.uk"),
            Author {
                name: "Felix".into(),
                slug: "felix".into(),
                bio: None,
            },
        );

        let post = assembler.assemble(&src, &article).await.unwrap();
        assert_eq!(
            post.html,
            concat!(
                "<p>Voting closed on Friday.</p>",
                r#"<figure class="kg-card kg-image-card kg-card-hascaption">"#,
                r#"<img src="https://felixonline.co.uk/img/block-uuid" class="kg-image" alt="">"#,
                "<figcaption>Credit: Jo</figcaption></figure>",
                r#"<p>See <a href="/news/2">results</a>.</p>"#,
            )
        );
        assert_eq!(post.tags[1].slug, "issue-1701");
        assert_eq!(post.feature_image.unwrap().caption.as_deref(), Some("Counting"));
    }
}
