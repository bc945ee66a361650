use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use chrono::Utc;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::discovery::FeedLocator;
use super::sync::{feed_metadata, new_articles};
use crate::storage::{Database, DatabaseError, Feed, FeedQuery, FeedSort, Folder};

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents resource exhaustion from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

const EXPORT_TITLE: &str = "tidings subscriptions";

/// Errors that can occur during OPML import and export.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// Serialising the export failed.
    #[error("Failed to write OPML: {0}")]
    Write(String),

    /// File I/O error.
    #[error("OPML file error: {0}")]
    Io(#[from] std::io::Error),

    /// Folder or feed bookkeeping in the store failed.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// One `<outline>` node.
///
/// A node with an `xmlUrl` is a feed leaf; anything else is a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outline {
    /// Display name, from `text`, falling back to `title`, then the URL.
    pub text: String,
    pub xml_url: Option<String>,
    pub html_url: Option<String>,
    pub description: Option<String>,
    pub children: Vec<Outline>,
}

impl Outline {
    pub fn is_feed(&self) -> bool {
        self.xml_url.is_some()
    }
}

/// A feed leaf that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    pub url: String,
    pub error: String,
}

/// What an import did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportResult {
    pub folders_created: usize,
    pub folders_reused: usize,
    pub feeds_added: usize,
    /// Leaves whose URL was already stored anywhere.
    pub feeds_skipped: usize,
    pub failures: Vec<ImportFailure>,
    /// The import stopped early because it was cancelled.
    pub cancelled: bool,
}

/// Parses OPML into its outline tree.
///
/// The tree is built with an explicit stack, so nesting depth costs heap,
/// not call stack; it is still capped at [`MAX_OPML_DEPTH`].
///
/// # Security
///
/// XXE (XML External Entity) attacks are mitigated because `quick-xml`
/// (0.37) does not parse `<!ENTITY>` declarations. Custom entities in
/// attribute values cause an `UnrecognizedEntity` error, which surfaces as
/// [`OpmlError::XmlParse`].
pub fn parse_outlines(bytes: &[u8]) -> Result<Vec<Outline>, OpmlError> {
    // SEC-002: XXE protection. Entity resolution is handled solely by the
    // escape layer, which only resolves the 5 XML builtins. Keep using
    // `decode_and_unescape_value()` (not `_with()`) to stay on that default.
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut roots = Vec::new();
    let mut open: Vec<Outline> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                // SEC-003: Reject excessively nested OPMLs
                if open.len() + 1 > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                open.push(outline_from_attributes(&e, &reader)?);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let leaf = outline_from_attributes(&e, &reader)?;
                match open.last_mut() {
                    Some(parent) => parent.children.push(leaf),
                    None => roots.push(leaf),
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                if let Some(done) = open.pop() {
                    match open.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => roots.push(done),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !open.is_empty() {
        return Err(OpmlError::XmlParse("unclosed outline element".to_owned()));
    }

    Ok(roots)
}

/// Reads the attributes of one outline element.
fn outline_from_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Outline, OpmlError> {
    let mut outline = Outline::default();
    let mut title = None;
    let decoder = reader.decoder();

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| OpmlError::XmlParse(e.to_string()))?
            .trim()
            .to_owned();
        if value.is_empty() {
            continue;
        }
        match attr.key.as_ref() {
            b"text" => outline.text = value,
            b"title" => title = Some(value),
            b"xmlUrl" => outline.xml_url = Some(value),
            b"htmlUrl" => outline.html_url = Some(value),
            b"description" => outline.description = Some(value),
            _ => {}
        }
    }

    if outline.text.is_empty() {
        outline.text = title
            .or_else(|| outline.xml_url.clone())
            .unwrap_or_default();
    }
    Ok(outline)
}

/// OPML import and export against the store.
#[derive(Clone)]
pub struct OpmlInterchange {
    db: Database,
    locator: FeedLocator,
}

impl OpmlInterchange {
    pub fn new(db: Database, locator: FeedLocator) -> Self {
        Self { db, locator }
    }

    /// Import an OPML document.
    ///
    /// Outlines are walked in document order from an explicit work stack of
    /// `(outline, parent folder)` pairs. Folders are reused by name or
    /// created. Feed leaves whose URL is already stored are skipped; new ones
    /// are fetched, parsed and inserted with their articles under the current
    /// folder, one at a time. A failing leaf is recorded and the walk goes on.
    /// Once `cancel` fires no further fetches start.
    ///
    /// # Errors
    ///
    /// Only document-level problems (malformed XML, excessive depth) and
    /// store failures while resolving folders or checking URLs are returned
    /// as errors.
    pub async fn import_document(
        &self,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ImportResult, OpmlError> {
        let roots = parse_outlines(bytes)?;
        let mut result = ImportResult::default();

        let mut work: Vec<(&Outline, Option<i64>)> =
            roots.iter().rev().map(|outline| (outline, None)).collect();

        while let Some((outline, parent)) = work.pop() {
            let Some(raw_url) = outline.xml_url.as_deref() else {
                let folder_id = self.resolve_folder(&outline.text, &mut result).await?;
                work.extend(
                    outline
                        .children
                        .iter()
                        .rev()
                        .map(|child| (child, Some(folder_id))),
                );
                continue;
            };

            let url = match Url::parse(raw_url) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(url = %raw_url, error = %e, "Skipping OPML feed with invalid URL");
                    result.failures.push(ImportFailure {
                        url: raw_url.to_owned(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if self.db.feed_exists(url.as_str()).await? {
                tracing::debug!(feed = %url, "Feed already subscribed, skipping");
                result.feeds_skipped += 1;
                continue;
            }

            if cancel.is_cancelled() {
                tracing::info!(added = result.feeds_added, "OPML import cancelled");
                result.cancelled = true;
                break;
            }

            match self.import_feed(&url, parent).await {
                Ok(feed) => {
                    tracing::debug!(feed = %url, feed_id = feed.id, "Imported feed");
                    result.feeds_added += 1;
                }
                Err(error) => {
                    tracing::warn!(feed = %url, error = %error, "Failed to import feed");
                    result.failures.push(ImportFailure {
                        url: url.to_string(),
                        error,
                    });
                }
            }
        }

        tracing::info!(
            added = result.feeds_added,
            skipped = result.feeds_skipped,
            failed = result.failures.len(),
            folders_created = result.folders_created,
            "OPML import finished"
        );
        Ok(result)
    }

    async fn resolve_folder(
        &self,
        name: &str,
        result: &mut ImportResult,
    ) -> Result<i64, OpmlError> {
        if let Some(existing) = self.db.folder_by_name(name).await? {
            result.folders_reused += 1;
            return Ok(existing.id);
        }
        let created = self.db.create_folder(name).await?;
        result.folders_created += 1;
        Ok(created.id)
    }

    /// Fetch, parse and insert one leaf. Errors come back as messages since
    /// they are only ever reported.
    async fn import_feed(&self, url: &Url, folder_id: Option<i64>) -> Result<Feed, String> {
        let parsed = self
            .locator
            .fetch_feed(url)
            .await
            .map_err(|e| e.to_string())?;
        self.db
            .insert_feed(
                &feed_metadata(&parsed, url.as_str(), folder_id),
                &new_articles(&parsed),
            )
            .await
            .map_err(|e| e.to_string())
    }

    /// Export everything in the store as OPML.
    pub async fn export_store(&self) -> Result<String, OpmlError> {
        let feeds = self
            .db
            .query_feeds(&FeedQuery::all().sorted(FeedSort::Title))
            .await?;
        let folders = self.db.folders().await?;
        export_document(&feeds, &folders)
    }
}

/// Serialise folders and feeds as an OPML 2.0 document.
///
/// Folders come first, by sort order then name, each holding its feeds
/// alphabetically; feeds without a (known) folder follow at the top level.
/// Attribute escaping is left to the XML writer.
pub fn export_document(feeds: &[Feed], folders: &[Folder]) -> Result<String, OpmlError> {
    let mut folders: Vec<&Folder> = folders.iter().collect();
    folders.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut by_folder: HashMap<Option<i64>, Vec<&Feed>> = HashMap::new();
    for feed in feeds {
        let known = feed
            .folder_id
            .filter(|id| folders.iter().any(|folder| folder.id == *id));
        by_folder.entry(known).or_default().push(feed);
    }
    for group in by_folder.values_mut() {
        group.sort_by_key(|feed| feed.title.to_lowercase());
    }

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    let write_err = |e: std::io::Error| OpmlError::Write(e.to_string());

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(write_err)?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(opml)).map_err(write_err)?;

    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .map_err(write_err)?;
    write_text_element(&mut writer, "title", EXPORT_TITLE)?;
    write_text_element(&mut writer, "dateCreated", &Utc::now().to_rfc2822())?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .map_err(write_err)?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .map_err(write_err)?;

    for folder in folders {
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("text", folder.name.as_str()));
        outline.push_attribute(("title", folder.name.as_str()));

        match by_folder.get(&Some(folder.id)) {
            Some(members) => {
                writer.write_event(Event::Start(outline)).map_err(write_err)?;
                for feed in members {
                    write_feed_outline(&mut writer, feed)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new("outline")))
                    .map_err(write_err)?;
            }
            None => writer.write_event(Event::Empty(outline)).map_err(write_err)?,
        }
    }

    for feed in by_folder.get(&None).into_iter().flatten() {
        write_feed_outline(&mut writer, feed)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .map_err(write_err)?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .map_err(write_err)?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).map_err(|e| OpmlError::Write(e.to_string()))
}

fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> Result<(), OpmlError> {
    let write_err = |e: std::io::Error| OpmlError::Write(e.to_string());
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(write_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(write_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(write_err)?;
    Ok(())
}

fn write_feed_outline(writer: &mut Writer<Cursor<Vec<u8>>>, feed: &Feed) -> Result<(), OpmlError> {
    let mut outline = BytesStart::new("outline");
    outline.push_attribute(("type", "rss"));
    outline.push_attribute(("text", feed.title.as_str()));
    outline.push_attribute(("title", feed.title.as_str()));
    outline.push_attribute(("xmlUrl", feed.url.as_str()));
    if let Some(ref html_url) = feed.site_url {
        outline.push_attribute(("htmlUrl", html_url.as_str()));
    }
    if let Some(ref description) = feed.description {
        outline.push_attribute(("description", description.as_str()));
    }
    writer
        .write_event(Event::Empty(outline))
        .map_err(|e| OpmlError::Write(e.to_string()))
}

/// Writes `bytes` to `path` atomically.
///
/// Writes to a temporary file in the same directory, syncs to disk, then
/// renames over the final path, so the destination is never left in a
/// partial state.
pub fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), OpmlError> {
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};

    // SEC-009: Randomized temp filename to prevent TOCTOU race conditions
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)?;

    let written = file
        .write_all(bytes)
        .and_then(|()| file.sync_all())
        .and_then(|()| std::fs::rename(&temp_path, path));

    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}
