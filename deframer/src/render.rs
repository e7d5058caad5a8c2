//! RSS 2.0 serialization of a reassembled feed.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{DeframeError, Result};
use crate::ingestion::{Author, Image};

const CONTENT_NS: &str = "http://purl.org/rss/1.0/modules/content/";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputFeed {
    pub title: String,
    pub link: String,
    /// Upstream format ("rss", "atom", "json"); RSS 2.0 has no element for it.
    pub link_type: String,
    pub description: String,
    pub copyright: String,
    pub author: Option<Author>,
    pub image: Option<Image>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub items: Vec<OutputItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub content: String,
    pub guid: String,
    pub author: Option<Author>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl OutputFeed {
    pub fn add(&mut self, item: OutputItem) {
        self.items.push(item);
    }

    /// Serialize as an RSS 2.0 document.
    pub fn to_rss(&self) -> Result<String> {
        let mut w = Writer::new_with_indent(Vec::new(), b' ', 2);

        emit(&mut w, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut rss = BytesStart::new("rss");
        rss.push_attribute(("version", "2.0"));
        rss.push_attribute(("xmlns:content", CONTENT_NS));
        emit(&mut w, Event::Start(rss))?;
        emit(&mut w, Event::Start(BytesStart::new("channel")))?;

        text_element(&mut w, "title", &self.title)?;
        text_element(&mut w, "link", &self.link)?;
        text_element(&mut w, "description", &self.description)?;
        optional_element(&mut w, "copyright", &self.copyright)?;
        if let Some(author) = &self.author {
            optional_element(&mut w, "managingEditor", &format_author(author))?;
        }
        if let Some(published) = self.published {
            text_element(&mut w, "pubDate", &published.to_rfc2822())?;
        }
        if let Some(updated) = self.updated {
            text_element(&mut w, "lastBuildDate", &updated.to_rfc2822())?;
        }
        if let Some(image) = &self.image {
            emit(&mut w, Event::Start(BytesStart::new("image")))?;
            text_element(&mut w, "url", &image.url)?;
            text_element(&mut w, "title", &image.title)?;
            text_element(&mut w, "link", &self.link)?;
            emit(&mut w, Event::End(BytesEnd::new("image")))?;
        }

        for item in &self.items {
            write_item(&mut w, item)?;
        }

        emit(&mut w, Event::End(BytesEnd::new("channel")))?;
        emit(&mut w, Event::End(BytesEnd::new("rss")))?;

        String::from_utf8(w.into_inner()).map_err(|e| DeframeError::Render(e.to_string()))
    }
}

fn write_item(w: &mut Writer<Vec<u8>>, item: &OutputItem) -> Result<()> {
    emit(w, Event::Start(BytesStart::new("item")))?;
    text_element(w, "title", &item.title)?;
    optional_element(w, "link", &item.link)?;
    text_element(w, "description", &item.description)?;
    optional_element(w, "content:encoded", &item.content)?;
    if let Some(author) = &item.author {
        optional_element(w, "author", &format_author(author))?;
    }
    if !item.guid.is_empty() {
        let mut guid = BytesStart::new("guid");
        // feed-rs ids are not necessarily URLs
        guid.push_attribute(("isPermaLink", "false"));
        emit(w, Event::Start(guid))?;
        emit(w, Event::Text(BytesText::new(&item.guid)))?;
        emit(w, Event::End(BytesEnd::new("guid")))?;
    }
    if let Some(date) = item.published.or(item.updated) {
        text_element(w, "pubDate", &date.to_rfc2822())?;
    }
    emit(w, Event::End(BytesEnd::new("item")))
}

/// "email (name)" as RSS wants it, or whichever half is known.
fn format_author(author: &Author) -> String {
    match author.email.as_deref().filter(|e| !e.is_empty()) {
        Some(email) if !author.name.is_empty() => format!("{} ({})", email, author.name),
        Some(email) => email.to_string(),
        None => author.name.clone(),
    }
}

fn text_element(w: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<()> {
    emit(w, Event::Start(BytesStart::new(name)))?;
    emit(w, Event::Text(BytesText::new(value)))?;
    emit(w, Event::End(BytesEnd::new(name)))
}

fn optional_element(w: &mut Writer<Vec<u8>>, name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Ok(());
    }
    text_element(w, name, value)
}

fn emit(w: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    w.write_event(event).map_err(|e| DeframeError::Render(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::{FeedParser, FeedRsParser};
    use chrono::TimeZone;

    fn sample() -> OutputFeed {
        let mut feed = OutputFeed {
            title: "[Deframed] Example & Co".into(),
            link: "https://example.com/".into(),
            link_type: "rss".into(),
            description: "News <daily>".into(),
            copyright: "(c) Example".into(),
            author: Some(Author {
                name: "Desk".into(),
                email: Some("desk@example.com".into()),
            }),
            image: Some(Image {
                url: "https://example.com/logo.png".into(),
                title: "Logo".into(),
            }),
            published: Some(Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap()),
            updated: None,
            items: Vec::new(),
        };
        feed.add(OutputItem {
            title: "Framing: 0.8 - Storm passes".into(),
            link: "https://example.com/a".into(),
            description: "A storm passed through.".into(),
            content: "Original title: Shocking storm <br/> Reason: loaded <br/> <p>Text</p>".into(),
            guid: "a-1".into(),
            author: None,
            published: Some(Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()),
            updated: None,
        });
        feed.add(OutputItem {
            title: "Council meets".into(),
            guid: "b-2".into(),
            ..Default::default()
        });
        feed
    }

    #[test]
    fn escapes_markup_in_text() {
        let xml = sample().to_rss().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<rss version=\"2.0\""));
        assert!(xml.contains("<title>[Deframed] Example &amp; Co</title>"));
        assert!(xml.contains("<description>News &lt;daily&gt;</description>"));
        assert!(xml.contains("<managingEditor>desk@example.com (Desk)</managingEditor>"));
        assert!(xml.contains("<pubDate>Mon, 6 Jan 2025 10:00:00 +0000</pubDate>"));
    }

    #[test]
    fn rendered_feed_parses_back_in_order() {
        let xml = sample().to_rss().unwrap();
        let parsed = FeedRsParser.parse(xml.as_bytes()).expect("valid rss");

        assert_eq!(parsed.title, "[Deframed] Example & Co");
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].title, "Framing: 0.8 - Storm passes");
        assert_eq!(parsed.items[0].guid, "a-1");
        assert!(parsed.items[0].content.contains("<p>Text</p>"));
        assert_eq!(parsed.items[1].title, "Council meets");
    }

    #[test]
    fn author_formats() {
        let both = Author { name: "N".into(), email: Some("e@x".into()) };
        let name_only = Author { name: "N".into(), email: None };
        let email_only = Author { name: String::new(), email: Some("e@x".into()) };
        assert_eq!(format_author(&both), "e@x (N)");
        assert_eq!(format_author(&name_only), "N");
        assert_eq!(format_author(&email_only), "e@x");
    }
}
