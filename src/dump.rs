//! DBLP XML dump reader.
//!
//! The dump (`dblp.xml`) is several gigabytes, so it is streamed with
//! quick-xml and only the requested records are materialized. The record API
//! (`/rec/{key}.xml`) returns the same element shape and goes through
//! [`parse_records`] as well.

use crate::dblp::{clean_title, parse_pages, strip_cite_key_prefix, PublicationResult, CITE_KEY_PREFIX};
use crate::error::{Result, SokError};
use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Elements that denote a record in `dblp.dtd`
pub const RECORD_ELEMENTS: &[&[u8]] = &[
    b"article",
    b"inproceedings",
    b"proceedings",
    b"book",
    b"incollection",
    b"phdthesis",
    b"mastersthesis",
    b"www",
    b"person",
    b"data",
];

/// ISO-8859-1 character entities declared by `dblp.dtd`
const LATIN1_ENTITIES: &[(&str, &str)] = &[
    ("nbsp", "\u{a0}"), ("reg", "®"), ("copy", "©"), ("micro", "µ"),
    ("Agrave", "À"), ("Aacute", "Á"), ("Acirc", "Â"), ("Atilde", "Ã"),
    ("Auml", "Ä"), ("Aring", "Å"), ("AElig", "Æ"), ("Ccedil", "Ç"),
    ("Egrave", "È"), ("Eacute", "É"), ("Ecirc", "Ê"), ("Euml", "Ë"),
    ("Igrave", "Ì"), ("Iacute", "Í"), ("Icirc", "Î"), ("Iuml", "Ï"),
    ("ETH", "Ð"), ("Ntilde", "Ñ"), ("Ograve", "Ò"), ("Oacute", "Ó"),
    ("Ocirc", "Ô"), ("Otilde", "Õ"), ("Ouml", "Ö"), ("times", "×"),
    ("Oslash", "Ø"), ("Ugrave", "Ù"), ("Uacute", "Ú"), ("Ucirc", "Û"),
    ("Uuml", "Ü"), ("Yacute", "Ý"), ("THORN", "Þ"), ("szlig", "ß"),
    ("agrave", "à"), ("aacute", "á"), ("acirc", "â"), ("atilde", "ã"),
    ("auml", "ä"), ("aring", "å"), ("aelig", "æ"), ("ccedil", "ç"),
    ("egrave", "è"), ("eacute", "é"), ("ecirc", "ê"), ("euml", "ë"),
    ("igrave", "ì"), ("iacute", "í"), ("icirc", "î"), ("iuml", "ï"),
    ("eth", "ð"), ("ntilde", "ñ"), ("ograve", "ò"), ("oacute", "ó"),
    ("ocirc", "ô"), ("otilde", "õ"), ("ouml", "ö"), ("divide", "÷"),
    ("oslash", "ø"), ("ugrave", "ù"), ("uacute", "ú"), ("ucirc", "û"),
    ("uuml", "ü"), ("yacute", "ý"), ("thorn", "þ"), ("yuml", "ÿ"),
];

fn resolve_entity(name: &str) -> Option<&'static str> {
    resolve_predefined_entity(name).or_else(|| {
        LATIN1_ENTITIES
            .iter()
            .find(|(entity, _)| *entity == name)
            .map(|(_, value)| *value)
    })
}

/// Resolve XML and Latin-1 entities; unknown entities are left as written.
pub fn unescape(raw: &str) -> String {
    match unescape_with(raw, resolve_entity) {
        Ok(text) => text.into_owned(),
        Err(_) => raw.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Author,
    Editor,
    Title,
    Year,
    Pages,
    Ee,
    Venue,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"author" => Some(Field::Author),
            b"editor" => Some(Field::Editor),
            b"title" => Some(Field::Title),
            b"year" => Some(Field::Year),
            b"pages" => Some(Field::Pages),
            b"ee" => Some(Field::Ee),
            b"journal" | b"booktitle" => Some(Field::Venue),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RecordBuilder {
    key: String,
    title: Option<String>,
    year: Option<u16>,
    pages: Option<(u32, u32)>,
    authors: Vec<String>,
    editors: Vec<String>,
    urls: Vec<String>,
    venue: Option<String>,
}

impl RecordBuilder {
    fn set(&mut self, field: Field, text: String) -> Result<()> {
        let text = text.trim().to_string();
        match field {
            Field::Author => self.authors.push(text),
            Field::Editor => self.editors.push(text),
            Field::Title => self.title = Some(clean_title(&text)),
            Field::Year => {
                let year = text
                    .parse()
                    .map_err(|_| SokError::Parse(format!("{}: invalid year {text:?}", self.key)))?;
                self.year = Some(year);
            }
            Field::Pages => match parse_pages(&text) {
                Ok(pages) => self.pages = Some(pages),
                Err(e) => warn!(key = %self.key, error = %e, "Ignoring pages"),
            },
            Field::Ee => self.urls.push(text),
            Field::Venue => {
                if self.venue.is_none() {
                    self.venue = Some(text);
                }
            }
        }
        Ok(())
    }

    fn build(self) -> Result<PublicationResult> {
        let title = self
            .title
            .ok_or_else(|| SokError::Parse(format!("{}: record without <title>", self.key)))?;
        let year = self
            .year
            .ok_or_else(|| SokError::Parse(format!("{}: record without <year>", self.key)))?;
        // Proceedings volumes only list editors.
        let authors = if self.authors.is_empty() { self.editors } else { self.authors };
        if authors.is_empty() {
            return Err(SokError::Parse(format!("{}: record without <author>", self.key)));
        }
        Ok(PublicationResult {
            key: self.key,
            title,
            year,
            venue: self.venue,
            pages: self.pages,
            authors,
            urls: self.urls,
        })
    }
}

fn record_key(e: &quick_xml::events::BytesStart<'_>) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| SokError::Xml(e.to_string()))?;
        if attr.key.as_ref() == b"key" {
            let value = std::str::from_utf8(&attr.value)
                .map_err(|e| SokError::Xml(e.to_string()))?;
            return Ok(Some(unescape(value)));
        }
    }
    Ok(None)
}

/// Parse the records whose DBLP key (without prefix) is in `keys`.
///
/// Stops reading as soon as every requested key has been found.
pub fn parse_records<R: BufRead>(reader: R, keys: &BTreeSet<String>) -> Result<Vec<PublicationResult>> {
    let mut reader = Reader::from_reader(reader);
    let mut remaining = keys.clone();
    let mut results = Vec::new();
    let mut buf = Vec::new();

    let mut current: Option<RecordBuilder> = None;
    let mut field: Option<(Field, Vec<u8>)> = None;
    let mut text = String::new();

    while !remaining.is_empty() {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.name();
                if current.is_none() {
                    if RECORD_ELEMENTS.contains(&name.as_ref()) {
                        if let Some(key) = record_key(&e)? {
                            if remaining.contains(&key) {
                                current = Some(RecordBuilder { key, ..Default::default() });
                            }
                        }
                    }
                } else if field.is_none() {
                    if let Some(f) = Field::from_name(name.as_ref()) {
                        field = Some((f, name.as_ref().to_vec()));
                        text.clear();
                    }
                }
            }
            Event::Text(e) => {
                if field.is_some() {
                    let raw = std::str::from_utf8(e.as_ref())
                        .map_err(|e| SokError::Xml(e.to_string()))?;
                    text.push_str(&unescape(raw));
                }
            }
            Event::CData(e) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::End(e) => {
                let name = e.name();
                let closes_field = matches!(&field, Some((_, open)) if open.as_slice() == name.as_ref());
                if closes_field {
                    if let (Some((f, _)), Some(record)) = (field.take(), current.as_mut()) {
                        record.set(f, std::mem::take(&mut text))?;
                    }
                } else if field.is_none() && RECORD_ELEMENTS.contains(&name.as_ref()) {
                    if let Some(record) = current.take() {
                        remaining.remove(&record.key);
                        debug!(key = %record.key, "Parsed DBLP record");
                        results.push(record.build()?);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(results)
}

/// Every record key in a dump, without prefix.
fn scan_keys<R: BufRead>(reader: R) -> Result<BTreeSet<String>> {
    let mut reader = Reader::from_reader(reader);
    let mut keys = BTreeSet::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => {
                if RECORD_ELEMENTS.contains(&e.name().as_ref()) {
                    if let Some(key) = record_key(&e)? {
                        keys.insert(key);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(keys)
}

/// A local DBLP XML dump
#[derive(Debug, Clone)]
pub struct DumpReader {
    path: PathBuf,
}

impl DumpReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar file caching the key set, e.g. `dblp.keys.json` for `dblp.xml`.
    pub fn keys_cache_path(&self) -> PathBuf {
        self.path.with_extension("keys.json")
    }

    fn open(&self) -> Result<BufReader<File>> {
        let file = File::open(&self.path).map_err(|e| {
            SokError::Config(format!("cannot open DBLP dump {}: {}", self.path.display(), e))
        })?;
        Ok(BufReader::new(file))
    }

    /// Look up records by cite key; prefixed and bare keys are both accepted.
    pub fn records<S: AsRef<str>>(&self, cite_keys: &[S]) -> Result<Vec<PublicationResult>> {
        let keys: BTreeSet<String> = cite_keys
            .iter()
            .map(|k| strip_cite_key_prefix(k.as_ref()).to_string())
            .collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        info!(path = %self.path.display(), keys = keys.len(), "Parsing DBLP dump");
        parse_records(self.open()?, &keys)
    }

    /// The sidecar is usable unless the dump was modified after it.
    fn cache_is_fresh(&self, cache: &Path) -> bool {
        let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
        match (modified(cache), modified(&self.path)) {
            (Some(cache), Some(dump)) => cache >= dump,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// All cite keys in the dump, with the `DBLP:` prefix.
    pub fn all_cite_keys(&self) -> Result<BTreeSet<String>> {
        let cache = self.keys_cache_path();
        let keys: BTreeSet<String> = if self.cache_is_fresh(&cache) {
            debug!(path = %cache.display(), "Loading cached DBLP keys");
            serde_json::from_str(&std::fs::read_to_string(&cache)?)?
        } else {
            info!(path = %self.path.display(), "Scanning DBLP dump for keys");
            let keys = scan_keys(self.open()?)?;
            std::fs::write(&cache, serde_json::to_string(&keys)?)?;
            info!(path = %cache.display(), keys = keys.len(), "Cached DBLP keys");
            keys
        };
        Ok(keys
            .into_iter()
            .map(|key| format!("{CITE_KEY_PREFIX}{key}"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<!DOCTYPE dblp SYSTEM "dblp.dtd">
<dblp>
<www mdate="2020-01-01" key="homepages/1/Egele">
<author>Manuel Egele</author>
<title>Home Page</title>
</www>
<inproceedings mdate="2019-06-01" key="conf/ccs/EgeleBFK13">
<author>Manuel Egele</author>
<author>David Brumley</author>
<author>Yanick Fratantonio</author>
<author>Christopher Kruegel</author>
<title>An empirical study of cryptographic misuse in <i>Android</i> applications.</title>
<pages>73-84</pages>
<year>2013</year>
<booktitle>CCS</booktitle>
<ee>https://doi.org/10.1145/2508859.2516693</ee>
</inproceedings>
<article mdate="2021-01-01" key="journals/tse/M&uuml;ller21">
<author>J&ouml;rg M&uuml;ller</author>
<title>Caf&eacute; &amp; Crypto.</title>
<pages>16:1-16:10</pages>
<year>2021</year>
<journal>IEEE TSE</journal>
</article>
<proceedings key="conf/ccs/2013">
<editor>Ahmad-Reza Sadeghi</editor>
<title>CCS 2013.</title>
<year>2013</year>
</proceedings>
<article key="journals/x/Broken">
<title>No year.</title>
<author>Someone</author>
</article>
</dblp>
"#;

    fn keys(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_parse_selected_records() {
        let records = parse_records(
            DUMP.as_bytes(),
            &keys(&["conf/ccs/EgeleBFK13", "journals/tse/Müller21"]),
        )
        .unwrap();
        assert_eq!(records.len(), 2);

        let ccs = &records[0];
        assert_eq!(ccs.key, "conf/ccs/EgeleBFK13");
        assert_eq!(ccs.title, "An empirical study of cryptographic misuse in Android applications");
        assert_eq!(ccs.authors.len(), 4);
        assert_eq!(ccs.authors[1], "David Brumley");
        assert_eq!(ccs.pages, Some((73, 84)));
        assert_eq!(ccs.venue.as_deref(), Some("CCS"));
        assert_eq!(ccs.doi().as_deref(), Some("10.1145/2508859.2516693"));

        let tse = &records[1];
        assert_eq!(tse.title, "Café & Crypto");
        assert_eq!(tse.authors, vec!["Jörg Müller"]);
        assert_eq!(tse.pages, Some((1, 10)));
    }

    #[test]
    fn test_proceedings_fall_back_to_editors() {
        let records = parse_records(DUMP.as_bytes(), &keys(&["conf/ccs/2013"])).unwrap();
        assert_eq!(records[0].authors, vec!["Ahmad-Reza Sadeghi"]);
    }

    #[test]
    fn test_stops_after_last_requested_key() {
        // The broken record comes later and would fail if it were reached.
        let records = parse_records(DUMP.as_bytes(), &keys(&["conf/ccs/EgeleBFK13"])).unwrap();
        assert_eq!(records.len(), 1);
        assert!(parse_records(DUMP.as_bytes(), &keys(&["journals/x/Broken"])).is_err());
    }

    #[test]
    fn test_unknown_keys_yield_nothing() {
        let records = parse_records(DUMP.as_bytes(), &keys(&["conf/none/X"])).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("K&ouml;nig &amp; S&oslash;n"), "König & Søn");
        assert_eq!(unescape("&bogus; text"), "&bogus; text");
    }

    #[test]
    fn test_dump_reader_with_cached_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dblp.xml");
        std::fs::write(&path, DUMP).unwrap();
        let reader = DumpReader::new(&path);

        let found = reader.records(&["DBLP:conf/ccs/EgeleBFK13"]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].cite_key(), "DBLP:conf/ccs/EgeleBFK13");

        let all = reader.all_cite_keys().unwrap();
        assert_eq!(all.len(), 5);
        assert!(all.contains("DBLP:homepages/1/Egele"));
        assert!(all.contains("DBLP:journals/tse/Müller21"));
        assert!(reader.keys_cache_path().exists());
        assert_eq!(reader.keys_cache_path(), dir.path().join("dblp.keys.json"));

        // Served from the sidecar once the dump is gone.
        std::fs::remove_file(&path).unwrap();
        assert_eq!(reader.all_cite_keys().unwrap(), all);
    }

    #[test]
    fn test_missing_dump_is_config_error() {
        let reader = DumpReader::new("/nonexistent/dblp.xml");
        assert!(matches!(reader.records(&["DBLP:a/b"]), Err(SokError::Config(_))));
    }
}
