//! Streaming RSS/Atom parser.
//!
//! One pass over `quick-xml` events. Every open element pushes a frame that
//! collects its direct text; the element is interpreted when it closes,
//! using its parent to tell a channel `<title>` from an item `<title>` or an
//! `<image><title>`. Item state lives in a draft that is reset on each
//! `item`/`entry` open tag and flushed on its close tag.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use url::Url;

use crate::util::{clean_text, decode_entities};

/// Title used when a feed does not name itself.
const UNTITLED_FEED: &str = "Untitled Feed";

/// Errors that stop a feed document from being parsed at all.
///
/// Problems with individual items never surface here; those items are
/// dropped and counted in [`ParsedFeed::skipped`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// The input was empty or only whitespace.
    #[error("empty feed document")]
    Empty,
    /// The XML itself is broken.
    #[error("malformed XML at byte {position}: {context}")]
    Malformed { position: u64, context: String },
    /// Well-formed XML whose root is not `rss`, `feed` or `rdf:RDF`.
    #[error("document is not an RSS or Atom feed")]
    NotAFeed,
}

/// A feed document after parsing, before anything is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub site_url: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    /// Items in document order.
    pub articles: Vec<ParsedArticle>,
    /// Items dropped for lacking a usable link or title.
    pub skipped: usize,
}

/// One item/entry of a [`ParsedFeed`].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArticle {
    /// Feed-supplied guid/id, or the resolved link when there is none.
    pub external_id: String,
    pub title: String,
    pub author: Option<String>,
    /// Rich body HTML, falling back to the summary.
    pub content: String,
    pub summary: Option<String>,
    pub url: String,
    pub published: DateTime<Utc>,
}

/// Parse a raw RSS 2.0, RSS 1.0 (RDF) or Atom document.
///
/// # Errors
///
/// - [`ParseError::Empty`] for empty or whitespace-only input
/// - [`ParseError::Malformed`] when the XML is not well-formed
/// - [`ParseError::NotAFeed`] when the root element is not a feed root
pub fn parse(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ParseError::Empty);
    }

    let mut reader = Reader::from_reader(bytes);
    let mut walker = Walker::new(Utc::now());
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::Malformed {
                position: reader.buffer_position() as u64,
                context: e.to_string(),
            })?;

        match event {
            Event::Start(e) => walker.open(&e, false)?,
            Event::Empty(e) => walker.open(&e, true)?,
            Event::End(e) => walker.close(&String::from_utf8_lossy(e.name().as_ref())),
            Event::Text(e) => walker.text(&String::from_utf8_lossy(&e.into_inner())),
            Event::CData(e) => walker.cdata(&String::from_utf8_lossy(&e.into_inner())),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !walker.stack.is_empty() || walker.xhtml.is_some() {
        return Err(ParseError::Malformed {
            position: reader.buffer_position() as u64,
            context: "unexpected end of document".to_owned(),
        });
    }

    walker.finish()
}

/// An open element and the text directly inside it.
struct Frame {
    name: String,
    text: String,
}

/// Atom `type="xhtml"` content is markup, not text: child elements are
/// re-serialised verbatim until the enclosing `<content>` closes.
struct XhtmlCapture {
    depth: usize,
    html: String,
}

#[derive(Default)]
struct ItemDraft {
    title: String,
    /// Best link so far, ranked 0 (alternate) or 1 (self).
    link: Option<(u8, String)>,
    guid: String,
    content: String,
    summary: String,
    author: String,
    date: Option<String>,
}

#[derive(Default)]
struct FeedDraft {
    title: String,
    site_url: Option<(u8, String)>,
    description: String,
    image_url: Option<String>,
}

struct Walker {
    now: DateTime<Utc>,
    root_seen: bool,
    stack: Vec<Frame>,
    feed: FeedDraft,
    item: Option<ItemDraft>,
    articles: Vec<ParsedArticle>,
    skipped: usize,
    xhtml: Option<XhtmlCapture>,
}

impl Walker {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            root_seen: false,
            stack: Vec::new(),
            feed: FeedDraft::default(),
            item: None,
            articles: Vec::new(),
            skipped: 0,
            xhtml: None,
        }
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), ParseError> {
        if let Some(capture) = self.xhtml.as_mut() {
            capture.html.push('<');
            capture.html.push_str(&String::from_utf8_lossy(e));
            capture.html.push_str(if empty { "/>" } else { ">" });
            if !empty {
                capture.depth += 1;
            }
            return Ok(());
        }

        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();

        if !self.root_seen {
            self.root_seen = true;
            if !matches!(local_name(&name), "rss" | "feed" | "RDF") {
                return Err(ParseError::NotAFeed);
            }
        }

        match (name.as_str(), self.item.is_some()) {
            ("item" | "entry", _) => self.item = Some(ItemDraft::default()),
            (n, in_item) if local_name(n) == "link" => {
                if let Some(href) = attr(e, "href") {
                    let rank = match attr(e, "rel").as_deref() {
                        None | Some("alternate") => Some(0),
                        Some("self") if in_item => Some(1),
                        _ => None,
                    };
                    if let Some(rank) = rank {
                        match self.item.as_mut() {
                            Some(item) => offer_link(&mut item.link, rank, href),
                            None => offer_link(&mut self.feed.site_url, rank, href),
                        }
                    }
                }
            }
            ("enclosure" | "media:content" | "media:thumbnail", false) => {
                self.offer_image(attr(e, "url"));
            }
            ("itunes:image", false) => self.offer_image(attr(e, "href")),
            ("content", true) if !empty && attr(e, "type").as_deref() == Some("xhtml") => {
                self.xhtml = Some(XhtmlCapture {
                    depth: 0,
                    html: String::new(),
                });
                return Ok(());
            }
            _ => {}
        }

        if !empty {
            self.stack.push(Frame {
                name,
                text: String::new(),
            });
        }
        Ok(())
    }

    fn text(&mut self, raw: &str) {
        if let Some(capture) = self.xhtml.as_mut() {
            capture.html.push_str(raw);
        } else if let Some(frame) = self.stack.last_mut() {
            frame.text.push_str(&decode_entities(raw));
        }
    }

    fn cdata(&mut self, raw: &str) {
        if let Some(capture) = self.xhtml.as_mut() {
            capture.html.push_str(raw);
        } else if let Some(frame) = self.stack.last_mut() {
            frame.text.push_str(raw);
        }
    }

    fn close(&mut self, name: &str) {
        if let Some(capture) = self.xhtml.as_mut() {
            if capture.depth > 0 {
                capture.depth -= 1;
                capture.html.push_str("</");
                capture.html.push_str(name);
                capture.html.push('>');
                return;
            }
            let html = std::mem::take(&mut capture.html);
            self.xhtml = None;
            if let Some(item) = self.item.as_mut() {
                item.content = html;
            }
            return;
        }

        let Some(frame) = self.stack.pop() else {
            return;
        };
        let parent = self.stack.last().map(|f| f.name.as_str()).unwrap_or("");
        let text = frame.text;

        if let Some(item) = self.item.as_mut() {
            let direct = matches!(parent, "item" | "entry");
            match name {
                "item" | "entry" => {
                    if let Some(draft) = self.item.take() {
                        self.finish_item(draft);
                    }
                }
                "title" if direct => item.title = text,
                n if direct && local_name(n) == "link" => {
                    let link = text.trim();
                    if !link.is_empty() {
                        offer_link(&mut item.link, 0, link.to_owned());
                    }
                }
                "guid" | "id" if direct => item.guid = text,
                "description" | "summary" if direct => item.summary = text,
                "content:encoded" | "content" if direct => item.content = text,
                "author" | "dc:creator" if direct && item.author.trim().is_empty() => {
                    item.author = text;
                }
                "name" if parent == "author" => item.author = text,
                "pubDate" | "published" | "dc:date" if direct => item.date = Some(text),
                "updated" if direct && item.date.is_none() => item.date = Some(text),
                _ => {}
            }
            return;
        }

        let channel = matches!(parent, "channel" | "feed");
        match name {
            "title" if channel => self.feed.title = text,
            n if parent == "channel" && local_name(n) == "link" => {
                let link = text.trim();
                if !link.is_empty() {
                    offer_link(&mut self.feed.site_url, 0, link.to_owned());
                }
            }
            "description" | "subtitle" if channel => self.feed.description = text,
            "url" if parent == "image" => self.offer_image(Some(text)),
            "logo" | "icon" if parent == "feed" => self.offer_image(Some(text)),
            _ => {}
        }
    }

    fn offer_image(&mut self, url: Option<String>) {
        if self.feed.image_url.is_some() {
            return;
        }
        self.feed.image_url = url
            .map(|u| u.trim().to_owned())
            .filter(|u| !u.is_empty());
    }

    fn finish_item(&mut self, draft: ItemDraft) {
        let title = clean_text(&draft.title);
        let site = self.feed.site_url.as_ref().map(|(_, url)| url.as_str());
        let url = draft
            .link
            .as_ref()
            .and_then(|(_, link)| resolve_link(link, site));

        let (Some(url), false) = (url, title.is_empty()) else {
            tracing::debug!(title = %title, "Dropping feed item without title or usable link");
            self.skipped += 1;
            return;
        };

        let guid = draft.guid.trim();
        let external_id = if guid.is_empty() {
            url.clone()
        } else {
            guid.to_owned()
        };

        let summary = Some(clean_text(&draft.summary)).filter(|s| !s.is_empty());
        let content = if draft.content.trim().is_empty() {
            draft.summary.trim().to_owned()
        } else {
            draft.content.trim().to_owned()
        };
        let author = Some(clean_text(&draft.author)).filter(|a| !a.is_empty());
        let published = draft
            .date
            .as_deref()
            .and_then(parse_date)
            .unwrap_or(self.now);

        self.articles.push(ParsedArticle {
            external_id,
            title,
            author,
            content,
            summary,
            url,
            published,
        });
    }

    fn finish(self) -> Result<ParsedFeed, ParseError> {
        if !self.root_seen {
            return Err(ParseError::NotAFeed);
        }

        let title = clean_text(&self.feed.title);
        Ok(ParsedFeed {
            title: if title.is_empty() {
                UNTITLED_FEED.to_owned()
            } else {
                title
            },
            site_url: self.feed.site_url.map(|(_, url)| url),
            description: Some(clean_text(&self.feed.description)).filter(|d| !d.is_empty()),
            image_url: self.feed.image_url,
            articles: self.articles,
            skipped: self.skipped,
        })
    }
}

/// `atom:link` and `link` are the same element for our purposes.
fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// Keep the lowest-ranked link; among equal ranks the first one wins.
fn offer_link(slot: &mut Option<(u8, String)>, rank: u8, href: String) {
    if slot.as_ref().map_or(true, |(current, _)| rank < *current) {
        *slot = Some((rank, href));
    }
}

/// Attribute value with XML and HTML entities decoded and whitespace trimmed.
fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    let attr = e.try_get_attribute(name).ok().flatten()?;
    let raw = String::from_utf8_lossy(&attr.value);
    Some(decode_entities(&raw).trim().to_owned())
}

/// Absolute http(s) links pass through; relative ones are joined onto the
/// feed's site URL when there is one.
fn resolve_link(link: &str, site_url: Option<&str>) -> Option<String> {
    let link = link.trim();
    let url = match Url::parse(link) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(site_url?.trim()).ok()?.join(link).ok()?
        }
        Err(_) => return None,
    };

    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Some(url.to_string()),
        _ => None,
    }
}

/// Timestamps in the shapes feeds actually use.
///
/// Tried in order: ISO-8601/RFC-3339, RFC-2822 (`Mon, 02 Jan 2006 15:04:05
/// -0700`, named zones included), then zone-less and date-only variants read
/// as UTC.
pub(crate) fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/"
     xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Example &amp; Co</title>
    <link>https://example.com/</link>
    <description>Things about &lt;stuff&gt;</description>
    <image>
      <url>https://example.com/logo.png</url>
      <title>Logo title</title>
      <link>https://example.com/logo</link>
    </image>
    <item>
      <title>First &amp;amp; best</title>
      <link>https://example.com/posts/1</link>
      <guid isPermaLink="false">post-1</guid>
      <description>Short &lt;b&gt;summary&lt;/b&gt;</description>
      <content:encoded><![CDATA[<p>Full <em>body</em></p>]]></content:encoded>
      <dc:creator>Ada Lovelace</dc:creator>
      <pubDate>Mon, 01 Jan 2024 12:30:00 GMT</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>/posts/2</link>
      <description>Only a description</description>
      <pubDate>Tue, 02 Jan 2024 08:00:00 +0200</pubDate>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <subtitle>An Atom feed</subtitle>
  <link href="https://atom.example.com/feed.xml" rel="self"/>
  <link href="https://atom.example.com/" rel="alternate"/>
  <logo>https://atom.example.com/logo.svg</logo>
  <entry>
    <title>Entry One</title>
    <id>urn:uuid:1</id>
    <link href="https://atom.example.com/1/comments" rel="replies"/>
    <link href="https://atom.example.com/1" rel="alternate"/>
    <author><name>Grace</name><email>grace@example.com</email></author>
    <published>2024-03-01T10:00:00Z</published>
    <updated>2024-03-05T10:00:00Z</updated>
    <summary>Entry summary</summary>
    <content type="xhtml"><div xmlns="http://www.w3.org/1999/xhtml"><p>Hi &amp; bye<br/></p></div></content>
  </entry>
  <entry>
    <title>Entry Two</title>
    <link href="https://atom.example.com/2"/>
    <updated>2024-03-02T10:00:00+01:00</updated>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_channel_metadata() {
        let feed = parse(RSS.as_bytes()).unwrap();
        assert_eq!(feed.title, "Example & Co");
        assert_eq!(feed.site_url.as_deref(), Some("https://example.com/"));
        assert_eq!(feed.description.as_deref(), Some("Things about <stuff>"));
        assert_eq!(feed.image_url.as_deref(), Some("https://example.com/logo.png"));
        assert_eq!(feed.skipped, 0);
    }

    #[test]
    fn test_parse_rss_items() {
        let feed = parse(RSS.as_bytes()).unwrap();
        assert_eq!(feed.articles.len(), 2);

        let first = &feed.articles[0];
        assert_eq!(first.external_id, "post-1");
        assert_eq!(first.title, "First & best");
        assert_eq!(first.url, "https://example.com/posts/1");
        assert_eq!(first.content, "<p>Full <em>body</em></p>");
        assert_eq!(first.summary.as_deref(), Some("Short <b>summary</b>"));
        assert_eq!(first.author.as_deref(), Some("Ada Lovelace"));
        assert_eq!(
            first.published,
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_rss_relative_link_and_fallbacks() {
        let feed = parse(RSS.as_bytes()).unwrap();
        let second = &feed.articles[1];

        assert_eq!(second.url, "https://example.com/posts/2");
        // no guid: the link is the identity
        assert_eq!(second.external_id, "https://example.com/posts/2");
        assert_eq!(second.content, "Only a description");
        assert_eq!(
            second.published,
            Utc.with_ymd_and_hms(2024, 1, 2, 6, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse(ATOM.as_bytes()).unwrap();
        assert_eq!(feed.title, "Atom Example");
        assert_eq!(feed.description.as_deref(), Some("An Atom feed"));
        assert_eq!(feed.site_url.as_deref(), Some("https://atom.example.com/"));
        assert_eq!(
            feed.image_url.as_deref(),
            Some("https://atom.example.com/logo.svg")
        );

        let one = &feed.articles[0];
        assert_eq!(one.external_id, "urn:uuid:1");
        assert_eq!(one.url, "https://atom.example.com/1");
        assert_eq!(one.author.as_deref(), Some("Grace"));
        assert_eq!(
            one.published,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
        assert!(one.content.contains("<p>Hi &amp; bye<br/></p>"));
        assert_eq!(one.summary.as_deref(), Some("Entry summary"));

        let two = &feed.articles[1];
        assert_eq!(two.external_id, "https://atom.example.com/2");
        assert_eq!(
            two.published,
            Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_atom_self_link_used_when_no_alternate() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>F</title>
            <entry><title>T</title><link rel="self" href="https://x.example.com/self"/></entry>
        </feed>"#;
        let feed = parse(xml.as_bytes()).unwrap();
        assert_eq!(feed.articles[0].url, "https://x.example.com/self");
        assert_eq!(feed.site_url, None);
    }

    #[test]
    fn test_rdf_root_accepted() {
        let xml = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <channel><title>RDF Feed</title><link>https://rdf.example.com/</link></channel>
  <item><title>One</title><link>https://rdf.example.com/1</link>
    <dc:date xmlns:dc="http://purl.org/dc/elements/1.1/">2024-05-06</dc:date></item>
</rdf:RDF>"#;
        let feed = parse(xml.as_bytes()).unwrap();
        assert_eq!(feed.title, "RDF Feed");
        assert_eq!(feed.articles.len(), 1);
        assert_eq!(
            feed.articles[0].published,
            Utc.with_ymd_and_hms(2024, 5, 6, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_items_without_link_or_title_are_dropped() {
        let xml = r#"<rss version="2.0"><channel><title>Drops</title>
            <item><title>Kept</title><link>https://d.example.com/1</link></item>
            <item><title>No link</title></item>
            <item><title></title><link>https://d.example.com/3</link></item>
            <item><title>Relative, no site</title><link>/4</link></item>
            <item><title>Bad scheme</title><link>javascript:alert(1)</link></item>
        </channel></rss>"#;
        let feed = parse(xml.as_bytes()).unwrap();
        assert_eq!(feed.articles.len(), 1);
        assert_eq!(feed.articles[0].title, "Kept");
        assert_eq!(feed.skipped, 4);
    }

    #[test]
    fn test_bad_date_falls_back_to_now() {
        let xml = r#"<rss version="2.0"><channel><title>Dates</title>
            <item><title>T</title><link>https://d.example.com/1</link>
            <pubDate>sometime last week</pubDate></item>
        </channel></rss>"#;
        let before = Utc::now();
        let feed = parse(xml.as_bytes()).unwrap();
        assert!(feed.articles[0].published >= before - chrono::Duration::seconds(1));
    }

    #[test]
    fn test_empty_channel_is_valid() {
        let feed = parse(br#"<rss version="2.0"><channel></channel></rss>"#).unwrap();
        assert_eq!(feed.title, UNTITLED_FEED);
        assert!(feed.articles.is_empty());
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(parse(b""), Err(ParseError::Empty)));
        assert!(matches!(parse(b"  \n\t "), Err(ParseError::Empty)));
    }

    #[test]
    fn test_malformed_input_reports_position() {
        let result = parse(b"<rss><channel><title>x</channel></rss>");
        assert!(matches!(result, Err(ParseError::Malformed { .. })));

        let truncated = parse(b"<rss version=\"2.0\"><channel><title>x</title>");
        assert!(matches!(truncated, Err(ParseError::Malformed { .. })));
    }

    #[test]
    fn test_html_is_not_a_feed() {
        let html = b"<!DOCTYPE html><html><head><title>Hi</title></head><body></body></html>";
        assert!(matches!(parse(html), Err(ParseError::NotAFeed)));
        assert!(matches!(parse(b"just some text"), Err(ParseError::NotAFeed)));
    }

    #[test]
    fn test_feed_image_from_itunes_and_media() {
        let xml = r#"<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"
                xmlns:media="http://search.yahoo.com/mrss/">
            <channel><title>Pod</title>
            <itunes:image href="https://pod.example.com/cover.jpg"/>
            <item><title>Ep</title><link>https://pod.example.com/1</link>
              <media:thumbnail url="https://pod.example.com/ep1.jpg"/></item>
        </channel></rss>"#;
        let feed = parse(xml.as_bytes()).unwrap();
        assert_eq!(
            feed.image_url.as_deref(),
            Some("https://pod.example.com/cover.jpg")
        );
    }

    #[test]
    fn test_item_media_does_not_set_feed_image() {
        let xml = r#"<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
            <channel><title>News</title>
            <item><title>A</title><link>https://n.example.com/a</link>
              <media:content url="https://n.example.com/a.jpg"/></item>
        </channel></rss>"#;
        assert_eq!(parse(xml.as_bytes()).unwrap().image_url, None);
    }

    #[test]
    fn test_title_controls_stripped() {
        let xml = "<rss version=\"2.0\"><channel><title>Evil\x1b[31m Feed</title></channel></rss>";
        let feed = parse(xml.as_bytes()).unwrap();
        assert_eq!(feed.title, "Evil Feed");
    }

    #[test]
    fn test_custom_entities_are_not_expanded() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE rss [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<rss version="2.0"><channel><title>&xxe;</title></channel></rss>"#;
        match parse(xml.as_bytes()) {
            Ok(feed) => assert_eq!(feed.title, "&xxe;"),
            // rejecting the DOCTYPE outright is also fine
            Err(ParseError::Malformed { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_parse_date_variants() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_date("2024-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_date("2024-01-02T03:04:05.000+00:00"), Some(expected));
        assert_eq!(parse_date("Tue, 02 Jan 2024 03:04:05 +0000"), Some(expected));
        assert_eq!(parse_date("Tue, 02 Jan 2024 03:04:05 GMT"), Some(expected));
        assert_eq!(parse_date("Mon, 01 Jan 2024 22:04:05 EST"), Some(expected));
        assert_eq!(parse_date("2024-01-02 03:04:05 +0000"), Some(expected));
        assert_eq!(parse_date("2024-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = parse(&bytes);
        }

        #[test]
        fn prop_item_titles_survive(title in "[A-Za-z0-9 ]{1,40}") {
            prop_assume!(!title.trim().is_empty());
            let xml = format!(
                "<rss version=\"2.0\"><channel><item><title>{title}</title>\
                 <link>https://p.example.com/x</link></item></channel></rss>"
            );
            let feed = parse(xml.as_bytes()).unwrap();
            prop_assert_eq!(feed.articles.len(), 1);
            prop_assert_eq!(&feed.articles[0].title, title.trim());
        }
    }
}
