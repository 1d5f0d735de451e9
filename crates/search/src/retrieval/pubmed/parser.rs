//! E-utilities XML parsing
//!
//! Streaming parse with quick-xml. Absent fields fall back to the record
//! sentinels; only an unusable body fails, and always as `SourceUnavailable`.

use paperscout_common::errors::{AppError, Result};
use paperscout_common::models::{DocumentRecord, Source};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;

/// Root elements that mark an HTML page rather than an E-utilities reply
const HTML_TAGS: &[&str] = &["html", "head", "body", "title", "h1", "h2", "div", "p", "pre"];

/// Roots an ESearch reply may carry
const ESEARCH_ROOTS: &[&str] = &["eSearchResult"];

/// Roots an EFetch reply may carry
const EFETCH_ROOTS: &[&str] = &["PubmedArticleSet", "eFetchResult"];

fn unavailable(message: impl Into<String>) -> AppError {
    AppError::SourceUnavailable {
        message: message.into(),
    }
}

/// Reject bodies that cannot be an E-utilities XML document
pub fn ensure_xml(body: &str) -> Result<()> {
    let head = body.trim_start_matches('\u{feff}').trim_start();
    if head.is_empty() {
        return Err(unavailable("Empty response body"));
    }
    if !head.starts_with('<') {
        return Err(unavailable("Response body is not XML"));
    }

    let prefix: String = head.chars().take(64).collect::<String>().to_ascii_lowercase();
    if prefix.starts_with("<!doctype html")
        || HTML_TAGS.iter().any(|tag| starts_with_tag(&prefix, tag))
    {
        return Err(unavailable("Received an HTML page instead of XML"));
    }
    Ok(())
}

fn starts_with_tag(prefix: &str, tag: &str) -> bool {
    prefix
        .strip_prefix('<')
        .and_then(|rest| rest.strip_prefix(tag))
        .and_then(|rest| rest.chars().next())
        .map_or(false, |c| c == '>' || c == '/' || c.is_whitespace())
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn text_of(e: &BytesText<'_>) -> String {
    match e.unescape() {
        Ok(text) => text.into_owned(),
        Err(_) => String::from_utf8_lossy(e).into_owned(),
    }
}

/// Validates element names as they open.
///
/// The first element must be one of the reply's expected roots, and no
/// `html` element may appear anywhere. Catches XHTML error pages that
/// carry an XML declaration and so pass `ensure_xml`.
struct RootGuard {
    expected: &'static [&'static str],
    root: Option<String>,
}

impl RootGuard {
    fn new(expected: &'static [&'static str]) -> Self {
        Self { expected, root: None }
    }

    fn check(&mut self, e: &BytesStart<'_>) -> Result<()> {
        let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        if local.eq_ignore_ascii_case("html") {
            return Err(unavailable("Received an HTML page instead of XML"));
        }
        if self.root.is_none() {
            if !self.expected.contains(&local.as_str()) {
                return Err(unavailable(format!(
                    "Unexpected root element <{}>, expected one of {:?}",
                    local, self.expected
                )));
            }
            self.root = Some(local);
        }
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        match self.root {
            Some(_) => Ok(()),
            None => Err(unavailable("Response has no root element")),
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_error(e: quick_xml::Error, position: u64) -> AppError {
    unavailable(format!("Malformed XML at byte {}: {}", position, e))
}

/// Ordered PMIDs from an ESearch reply
pub fn parse_id_list(xml: &str) -> Result<Vec<String>> {
    ensure_xml(xml)?;

    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut ids = Vec::new();
    let mut error_text: Option<String> = None;
    let mut guard = RootGuard::new(ESEARCH_ROOTS);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                guard.check(e)?;
                let name = element_name(e);
                if name == "ERROR" {
                    error_text.get_or_insert_with(String::new);
                }
                path.push(name);
            }
            Ok(Event::Empty(ref e)) => guard.check(e)?,
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(ref e)) => {
                let text = text_of(e);
                match path.last().map(String::as_str) {
                    Some("Id") if path.iter().any(|p| p == "IdList") => {
                        let id = text.trim();
                        if !id.is_empty() {
                            ids.push(id.to_string());
                        }
                    }
                    Some("ERROR") => {
                        if let Some(message) = error_text.as_mut() {
                            message.push_str(&text);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(e, reader.buffer_position() as u64)),
            _ => {}
        }
        buf.clear();
    }

    guard.finish()?;
    if let Some(message) = error_text {
        return Err(unavailable(format!("ESearch error: {}", collapse_whitespace(&message))));
    }
    Ok(ids)
}

/// Fields gathered for one `PubmedArticle`
#[derive(Default)]
struct ArticleBuilder {
    pmid: Option<String>,
    title: String,
    sections: Vec<String>,
    section_label: Option<String>,
    section_text: String,
    authors: Vec<String>,
    fore_name: String,
    last_name: String,
    collective_name: String,
    year: Option<String>,
    medline_date: String,
}

impl ArticleBuilder {
    fn finish_author(&mut self) {
        let collective = collapse_whitespace(&self.collective_name);
        let name = if collective.is_empty() {
            collapse_whitespace(&format!("{} {}", self.fore_name, self.last_name))
        } else {
            collective
        };
        if !name.is_empty() {
            self.authors.push(name);
        }
        self.fore_name.clear();
        self.last_name.clear();
        self.collective_name.clear();
    }

    fn finish_section(&mut self) {
        let text = collapse_whitespace(&self.section_text);
        if !text.is_empty() {
            match self.section_label.take() {
                Some(label) if !label.is_empty() => {
                    self.sections.push(format!("{}: {}", label, text))
                }
                _ => self.sections.push(text),
            }
        }
        self.section_label = None;
        self.section_text.clear();
    }

    fn build(self, fallback_id: Option<&String>) -> DocumentRecord {
        let year = self.year.or_else(|| first_year(&self.medline_date)).unwrap_or_default();
        let id = self.pmid.or_else(|| fallback_id.cloned()).unwrap_or_default();

        DocumentRecord::new(
            id,
            collapse_whitespace(&self.title),
            self.authors,
            year,
            self.sections.join(" "),
            Source::External,
        )
    }
}

/// First run of four digits, e.g. the year of `1998 Dec-1999 Jan`
fn first_year(text: &str) -> Option<String> {
    text.as_bytes()
        .windows(4)
        .position(|w| w.iter().all(u8::is_ascii_digit))
        .map(|start| text[start..start + 4].to_string())
}

fn has_parent(path: &[String], parent: &str) -> bool {
    path.len() >= 2 && path[path.len() - 2] == parent
}

/// Records from an EFetch `rettype=abstract` reply.
///
/// `requested` supplies ids for articles that carry no PMID element.
pub fn parse_articles(xml: &str, requested: &[String]) -> Result<Vec<DocumentRecord>> {
    ensure_xml(xml)?;

    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut records = Vec::new();
    let mut current: Option<ArticleBuilder> = None;
    let mut error_text: Option<String> = None;
    let mut guard = RootGuard::new(EFETCH_ROOTS);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                guard.check(e)?;
                let name = element_name(e);
                match name.as_str() {
                    "PubmedArticle" => current = Some(ArticleBuilder::default()),
                    "ERROR" => {
                        error_text.get_or_insert_with(String::new);
                    }
                    "AbstractText" if path.last().map(String::as_str) == Some("Abstract") => {
                        if let Some(article) = current.as_mut() {
                            article.section_label = e
                                .try_get_attribute("Label")
                                .ok()
                                .flatten()
                                .and_then(|a| {
                                    a.unescape_value().ok().map(|v| v.trim().to_string())
                                });
                        }
                    }
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Empty(ref e)) => guard.check(e)?,
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                path.pop();
                match name.as_str() {
                    "PubmedArticle" => {
                        if let Some(article) = current.take() {
                            records.push(article.build(requested.get(records.len())));
                        }
                    }
                    "Author" if path.last().map(String::as_str) == Some("AuthorList") => {
                        if let Some(article) = current.as_mut() {
                            article.finish_author();
                        }
                    }
                    "AbstractText" if path.last().map(String::as_str) == Some("Abstract") => {
                        if let Some(article) = current.as_mut() {
                            article.finish_section();
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = text_of(e);
                if path.last().map(String::as_str) == Some("ERROR") {
                    if let Some(message) = error_text.as_mut() {
                        message.push_str(&text);
                    }
                }
                if let Some(article) = current.as_mut() {
                    collect_text(article, &path, text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(parse_error(e, reader.buffer_position() as u64)),
            _ => {}
        }
        buf.clear();
    }

    guard.finish()?;
    if let Some(message) = error_text {
        return Err(unavailable(format!("EFetch error: {}", collapse_whitespace(&message))));
    }
    Ok(records)
}

/// Route a text node to the article field its element path names
fn collect_text(article: &mut ArticleBuilder, path: &[String], text: String) {
    let in_element = |name: &str| path.iter().any(|p| p == name);
    let leaf = path.last().map(String::as_str).unwrap_or("");

    if in_element("ArticleTitle") {
        article.title.push_str(&text);
    } else if in_element("AbstractText") && in_element("Abstract") && !in_element("OtherAbstract") {
        article.section_text.push_str(&text);
    } else if in_element("AuthorList") {
        match leaf {
            "ForeName" => article.fore_name.push_str(&text),
            "LastName" => article.last_name.push_str(&text),
            "CollectiveName" => article.collective_name.push_str(&text),
            _ => {}
        }
    } else if leaf == "PMID" && has_parent(path, "MedlineCitation") && article.pmid.is_none() {
        article.pmid = Some(text.trim().to_string());
    } else if has_parent(path, "PubDate") && in_element("JournalIssue") {
        match leaf {
            "Year" if article.year.is_none() => article.year = Some(text.trim().to_string()),
            "MedlineDate" => article.medline_date.push_str(&text),
            _ => {}
        }
    }
}
