use html_escape::encode_double_quoted_attribute;
use serde_json::Value;

use crate::error::RenderError;
use crate::source::ImageRef;

const STAR: &str = "★";
/// Upper bound on rendered glyphs; larger ratings are corrupt data.
pub const MAX_STARS: u64 = 1_000_000;

/// One unit of article content, as stored in the legacy `blocks` table.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text {
        html: String,
    },
    Quotation {
        html: String,
    },
    Sidebar {
        html: String,
        title: Option<String>,
    },
    Review {
        title: Option<String>,
        what: Option<String>,
        when: Option<String>,
        venue: Option<String>,
        cost: Option<String>,
        stars: Option<Value>,
    },
    BookReview {
        stars: Option<Value>,
        title: Option<String>,
        author: Option<String>,
    },
    FilmReview {
        stars: Option<Value>,
        year: Option<String>,
        title: Option<String>,
        director: Option<String>,
        starring: Option<String>,
    },
    Image {
        image: Option<ImageRef>,
        float: Option<String>,
        width: Option<String>,
    },
}

/// What the image card receives: everything it needs to build its markup.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub src: String,
    pub alt: Option<String>,
    pub caption: Option<String>,
}

/// Renders rich-media cards in the target platform's markup.
pub trait CardRenderer: Send + Sync {
    fn image(&self, payload: &ImagePayload) -> String;
}

/// Ghost's default image card.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCard;

impl CardRenderer for ImageCard {
    fn image(&self, payload: &ImagePayload) -> String {
        let mut class = String::from("kg-card kg-image-card");
        if payload.caption.is_some() {
            class.push_str(" kg-card-hascaption");
        }

        let mut html = format!(
            r#"<figure class="{}"><img src="{}" class="kg-image" alt="{}" loading="lazy">"#,
            class,
            encode_double_quoted_attribute(&payload.src),
            encode_double_quoted_attribute(payload.alt.as_deref().unwrap_or("")),
        );
        // Ghost inserts captions as raw HTML sections.
        if let Some(caption) = &payload.caption {
            html.push_str("<figcaption>");
            html.push_str(caption);
            html.push_str("</figcaption>");
        }
        html.push_str("</figure>");
        html
    }
}

/// Shared inputs for rendering every block of an article.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub base_url: &'a str,
    pub cards: &'a dyn CardRenderer,
}

impl Block {
    /// The type tag this block is stored under.
    pub fn tag(&self) -> &'static str {
        match self {
            Block::Text { .. } => "text",
            Block::Quotation { .. } => "quotation",
            Block::Sidebar { .. } => "sidebar",
            Block::Review { .. } => "review",
            Block::BookReview { .. } => "book-review",
            Block::FilmReview { .. } => "film-review",
            Block::Image { .. } => "image",
        }
    }

    pub fn render(&self, ctx: &RenderContext<'_>) -> Result<String, RenderError> {
        let html = match self {
            Block::Text { html } => html.clone(),
            Block::Quotation { html } => format!("<blockquote>{}</blockquote>", html),
            Block::Sidebar { html, title } => {
                let heading = title
                    .as_deref()
                    .map(|t| format!("<h2>{}</h2>", t))
                    .unwrap_or_default();
                format!(r#"<section class="sidebar">{}{}</section>"#, heading, html)
            }
            Block::Review {
                title,
                what,
                when,
                venue,
                cost,
                stars,
            } => {
                let details: String = [
                    ("What", what),
                    ("Where", venue),
                    ("When", when),
                    ("Cost", cost),
                ]
                .into_iter()
                .filter_map(|(label, value)| {
                    value.as_deref().map(|v| format!("<li>{}: {}</li>", label, v))
                })
                .collect();

                format!(
                    r#"<section class="review">{}<ul>{}</ul></section>"#,
                    review_header(title, stars)?,
                    details
                )
            }
            Block::BookReview {
                stars,
                title,
                author,
            } => format!(
                r#"<section class="review">{}<dl>{}</dl></section>"#,
                review_header(title, stars)?,
                definition("Author", author.as_deref().unwrap_or("")),
            ),
            Block::FilmReview {
                stars,
                year,
                title,
                director,
                starring,
            } => {
                let mut entries = definition("Director", director.as_deref().unwrap_or(""));
                if let Some(year) = year {
                    entries.push_str(&definition("Year", year));
                }
                if let Some(starring) = starring {
                    entries.push_str(&definition("Starring", starring));
                }
                format!(
                    r#"<section class="review">{}<dl>{}</dl></section>"#,
                    review_header(title, stars)?,
                    entries
                )
            }
            Block::Image { image, .. } => match image {
                Some(image) => ctx.cards.image(&image_payload(ctx.base_url, image)),
                None => String::new(),
            },
        };
        Ok(html)
    }
}

/// Public URL of a legacy media on the old site.
pub fn image_url(base_url: &str, image: &ImageRef) -> String {
    format!("{}/img/{}", base_url.trim_end_matches('/'), image.uuid)
}

pub fn image_payload(base_url: &str, image: &ImageRef) -> ImagePayload {
    ImagePayload {
        src: image_url(base_url, image),
        alt: image.alt_text.clone(),
        caption: compose_caption(image.caption.as_deref(), image.credit.as_deref()),
    }
}

pub fn compose_caption(caption: Option<&str>, credit: Option<&str>) -> Option<String> {
    match (caption, credit) {
        (Some(caption), Some(credit)) => Some(format!("{} / Photo: {}", caption, credit)),
        (Some(caption), None) => Some(caption.to_string()),
        (None, Some(credit)) => Some(format!("Credit: {}", credit)),
        (None, None) => None,
    }
}

/// Number of stars for a stored rating. Ratings are free-form JSON in the
/// legacy CMS, so numeric strings and fractional values are accepted.
pub fn star_count(stars: Option<&Value>) -> Result<usize, RenderError> {
    let invalid = || RenderError::InvalidStars(stars.map(|v| v.to_string()).unwrap_or_default());

    let count = match stars {
        // Falsy ratings are unrated.
        None | Some(Value::Null) | Some(Value::Bool(false)) => 0,
        Some(Value::String(s)) if s.trim().is_empty() => 0,
        Some(Value::Number(n)) => match n.as_u64() {
            Some(n) => n,
            None => match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 => f.floor() as u64,
                _ => return Err(invalid()),
            },
        },
        Some(Value::String(s)) => s.trim().parse::<u64>().map_err(|_| invalid())?,
        Some(_) => return Err(invalid()),
    };

    if count > MAX_STARS {
        return Err(RenderError::InvalidStars(count.to_string()));
    }
    Ok(count as usize)
}

fn review_header(title: &Option<String>, stars: &Option<Value>) -> Result<String, RenderError> {
    Ok(format!(
        r#"<h2>{}</h2><div class="stars">{}</div>"#,
        title.as_deref().unwrap_or(""),
        STAR.repeat(star_count(stars.as_ref())?)
    ))
}

fn definition(term: &str, value: &str) -> String {
    format!("<dt>{}</dt><dd>{}</dd>", term, value)
}
