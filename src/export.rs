use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::assemble::{PostRecord, PostType, Tag};
use crate::source::Author;

const GHOST_VERSION: &str = "5.0.0";

#[derive(Debug, Serialize)]
pub struct ImportFile {
    pub db: Vec<Database>,
}

#[derive(Debug, Serialize)]
pub struct Database {
    pub meta: Meta,
    pub data: Data,
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub exported_on: i64,
    pub version: &'static str,
}

#[derive(Debug, Default, Serialize)]
pub struct Data {
    pub posts: Vec<GhostPost>,
    pub tags: Vec<GhostTag>,
    pub users: Vec<GhostUser>,
    pub posts_tags: Vec<PostTag>,
    pub posts_authors: Vec<PostAuthor>,
}

#[derive(Debug, Serialize)]
pub struct GhostPost {
    pub id: u64,
    pub title: String,
    pub slug: String,
    pub html: String,
    #[serde(rename = "type")]
    pub post_type: PostType,
    pub status: &'static str,
    pub visibility: &'static str,
    pub created_at: String,
    pub updated_at: String,
    pub published_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_excerpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_image_alt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_image_caption: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GhostTag {
    pub id: u64,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GhostUser {
    pub id: u64,
    pub name: String,
    pub slug: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostTag {
    pub post_id: u64,
    pub tag_id: u64,
    pub sort_order: usize,
}

#[derive(Debug, Serialize)]
pub struct PostAuthor {
    pub post_id: u64,
    pub author_id: u64,
    pub sort_order: usize,
}

/// Tags and users are shared between posts, keyed by slug.
#[derive(Default)]
struct Collector {
    data: Data,
    tag_ids: HashMap<String, u64>,
    user_ids: HashMap<String, u64>,
}

impl Collector {
    fn tag_id(&mut self, tag: &Tag) -> u64 {
        if let Some(id) = self.tag_ids.get(&tag.slug) {
            return *id;
        }
        let id = self.data.tags.len() as u64 + 1;
        self.data.tags.push(GhostTag {
            id,
            name: tag.name.clone(),
            slug: tag.slug.clone(),
            description: tag.description.clone(),
        });
        self.tag_ids.insert(tag.slug.clone(), id);
        id
    }

    fn user_id(&mut self, author: &Author) -> u64 {
        if let Some(id) = self.user_ids.get(&author.slug) {
            return *id;
        }
        let id = self.data.users.len() as u64 + 1;
        self.data.users.push(GhostUser {
            id,
            name: author.name.clone(),
            slug: author.slug.clone(),
            email: format!("{}@example.com", author.slug),
            bio: author.bio.clone(),
        });
        self.user_ids.insert(author.slug.clone(), id);
        id
    }

    fn add_post(&mut self, post: &PostRecord) {
        let post_id = self.data.posts.len() as u64 + 1;

        for (sort_order, tag) in post.tags.iter().enumerate() {
            let tag_id = self.tag_id(tag);
            self.data.posts_tags.push(PostTag {
                post_id,
                tag_id,
                sort_order,
            });
        }
        for (sort_order, author) in post.authors.iter().enumerate() {
            let author_id = self.user_id(author);
            self.data.posts_authors.push(PostAuthor {
                post_id,
                author_id,
                sort_order,
            });
        }

        let feature = post.feature_image.as_ref();
        self.data.posts.push(GhostPost {
            id: post_id,
            title: post.title.clone(),
            slug: post.slug.clone(),
            html: post.html.clone(),
            post_type: post.post_type,
            status: post.status,
            visibility: post.visibility,
            created_at: timestamp(&post.created_at),
            updated_at: timestamp(&post.updated_at),
            published_at: post.published_at.as_ref().map(timestamp),
            custom_excerpt: post.custom_excerpt.clone(),
            feature_image: feature.map(|f| f.url.clone()),
            feature_image_alt: feature.and_then(|f| f.alt.clone()),
            feature_image_caption: feature.and_then(|f| f.caption.clone()),
        });
    }
}

/// Build a Ghost import document from assembled posts.
pub fn build(posts: &[PostRecord], exported_on: DateTime<Utc>) -> ImportFile {
    let mut collector = Collector::default();
    for post in posts {
        collector.add_post(post);
    }
    ImportFile {
        db: vec![Database {
            meta: Meta {
                exported_on: exported_on.timestamp_millis(),
                version: GHOST_VERSION,
            },
            data: collector.data,
        }],
    }
}

pub fn write(path: &Path, file: &ImportFile) -> Result<()> {
    let out = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(out);
    serde_json::to_writer_pretty(&mut writer, file)?;
    writer.flush()?;
    Ok(())
}

/// Legacy timestamps are stored in UTC without an offset.
fn timestamp(ts: &NaiveDateTime) -> String {
    ts.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::FeatureImage;
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    fn post(source_id: i64, tags: Vec<Tag>, authors: Vec<Author>) -> PostRecord {
        let ts = NaiveDate::from_ymd_opt(2020, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .unwrap();
        PostRecord {
            source_id,
            title: format!("Post {}", source_id),
            slug: format!("post-{}", source_id),
            visibility: "public",
            status: "published",
            post_type: PostType::Post,
            created_at: ts,
            updated_at: ts,
            published_at: None,
            custom_excerpt: None,
            tags,
            authors,
            feature_image: None,
            html: "<p>x</p>".into(),
        }
    }

    fn tag(slug: &str) -> Tag {
        Tag {
            name: slug.to_uppercase(),
            slug: slug.into(),
            description: None,
        }
    }

    fn author(slug: &str) -> Author {
        Author {
            name: slug.into(),
            slug: slug.into(),
            bio: None,
        }
    }

    #[test]
    fn shares_tags_and_users_between_posts() {
        let posts = vec![
            post(1, vec![tag("news"), tag("issue-1")], vec![author("ada")]),
            post(2, vec![tag("news")], vec![author("bob"), author("ada")]),
        ];
        let file = build(&posts, Utc.timestamp_opt(0, 0).unwrap());
        let data = &file.db[0].data;

        assert_eq!(data.posts.len(), 2);
        assert_eq!(data.tags.len(), 2);
        assert_eq!(data.users.len(), 2);
        assert_eq!(data.posts_tags.len(), 3);
        assert_eq!(data.posts_tags[2].tag_id, 1);
        let second: Vec<(u64, usize)> = data
            .posts_authors
            .iter()
            .filter(|pa| pa.post_id == 2)
            .map(|pa| (pa.author_id, pa.sort_order))
            .collect();
        assert_eq!(second, vec![(2, 0), (1, 1)]);
    }

    #[test]
    fn serializes_post_fields() {
        let mut p = post(1, vec![tag("news")], vec![author("ada")]);
        p.feature_image = Some(FeatureImage {
            url: "https://felixonline.co.uk/img/u".into(),
            alt: None,
            caption: Some("Cap".into()),
        });
        let file = build(&[p], Utc.timestamp_opt(1_600_000_000, 0).unwrap());
        let value = serde_json::to_value(&file).unwrap();
        let db = &value["db"][0];

        assert_eq!(db["meta"]["exported_on"], json!(1_600_000_000_000i64));
        let post = &db["data"]["posts"][0];
        assert_eq!(post["type"], "post");
        assert_eq!(post["created_at"], "2020-01-02T03:04:05.000Z");
        assert_eq!(post["published_at"], json!(null));
        assert_eq!(post["feature_image"], "https://felixonline.co.uk/img/u");
        assert_eq!(post["feature_image_caption"], "Cap");
        assert!(post.get("feature_image_alt").is_none());
        assert!(post.get("custom_excerpt").is_none());
        assert_eq!(db["data"]["users"][0]["email"], "ada@example.com");
    }
}
