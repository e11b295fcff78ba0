//! Archive and markup extraction.
//!
//! Each section archive is a ZIP holding one XML file per legal act. For every
//! markup entry the extractor records the act's category (the first
//! `artCategory` attribute found anywhere in the tree, `"N/A"` otherwise) and
//! the text of every `<article>` element, tags stripped, joined by a single
//! space.
//!
//! Failure is contained: a bad archive skips that section, a bad entry skips
//! that entry. Nothing here aborts the batch.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use tracing::{debug, info, warn};

use crate::download::is_valid_archive;
use crate::error::ExtractError;
use crate::models::{Archive, Document, SectionCode};

/// Extension of markup entries inside an archive.
pub const MARKUP_EXTENSION: &str = ".xml";
/// Attribute holding an act's category.
pub const CATEGORY_ATTRIBUTE: &[u8] = b"artCategory";
/// Category used when no element carries [`CATEGORY_ATTRIBUTE`].
pub const DEFAULT_CATEGORY: &str = "N/A";

const ARTICLE_ELEMENT: &[u8] = b"article";
/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_MARKUP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Result of extracting a batch of archives.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Documents in archive order, then entry order.
    pub documents: Vec<Document>,
    /// Markup entries seen, including ones that yielded no document.
    pub markup_files: usize,
}

/// Extract documents from every archive, in section order.
pub fn extract(archives: &BTreeMap<SectionCode, Archive>) -> Extraction {
    let mut out = Extraction::default();

    for archive in archives.values() {
        match extract_archive(archive) {
            Ok(extraction) => {
                out.markup_files += extraction.markup_files;
                out.documents.extend(extraction.documents);
            }
            Err(e) => warn!(error = %e, "skipping archive"),
        }
    }

    info!(
        documents = out.documents.len(),
        markup_files = out.markup_files,
        "extraction completed"
    );
    out
}

/// Open one archive and parse each of its markup entries.
pub fn extract_archive(archive: &Archive) -> Result<Extraction, ExtractError> {
    let section = archive.request.section;
    let malformed = |reason: String| ExtractError::MalformedArchive {
        section: section.to_string(),
        reason,
    };

    if !is_valid_archive(&archive.bytes) {
        return Err(malformed("missing ZIP signature".to_string()));
    }
    let mut zip = zip::ZipArchive::new(Cursor::new(archive.bytes.as_slice()))
        .map_err(|e| malformed(e.to_string()))?;

    let entries: Vec<(usize, String)> = (0..zip.len())
        .filter_map(|i| {
            zip.name_for_index(i)
                .filter(|name| is_markup(name))
                .map(|name| (i, name.to_string()))
        })
        .collect();

    info!(
        section = %section,
        bytes = archive.bytes.len(),
        entries = entries.len(),
        "processing archive"
    );
    if entries.is_empty() {
        warn!(section = %section, "archive holds no markup entries");
        return Ok(Extraction::default());
    }

    let mut out = Extraction {
        documents: Vec::new(),
        markup_files: entries.len(),
    };
    for (index, name) in entries {
        let parsed = read_entry_bounded(&mut zip, index, &name, MAX_MARKUP_ENTRY_BYTES)
            .and_then(|xml| parse_markup(section, &name, &xml));
        match parsed {
            Ok(Some(doc)) => {
                debug!(section = %section, entry = %name, "document extracted");
                out.documents.push(doc);
            }
            Ok(None) => warn!(section = %section, entry = %name, "no article text in entry"),
            Err(e) => warn!(section = %section, error = %e, "skipping markup entry"),
        }
    }
    Ok(out)
}

fn is_markup(name: &str) -> bool {
    !name.ends_with('/') && name.to_ascii_lowercase().ends_with(MARKUP_EXTENSION)
}

fn read_entry_bounded(
    zip: &mut zip::ZipArchive<Cursor<&[u8]>>,
    index: usize,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let malformed = |reason: String| ExtractError::MalformedDocument {
        entry: name.to_string(),
        reason,
    };
    let entry = zip.by_index(index).map_err(|e| malformed(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| malformed(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(malformed(format!(
            "entry exceeds size limit ({} bytes)",
            max_bytes
        )));
    }
    Ok(out)
}

/// Parse one markup entry into a [`Document`].
///
/// Returns `Ok(None)` for well-formed markup whose articles hold no text.
pub fn parse_markup(
    section: SectionCode,
    entry: &str,
    xml: &[u8],
) -> Result<Option<Document>, ExtractError> {
    let malformed = |reason: String| ExtractError::MalformedDocument {
        entry: entry.to_string(),
        reason,
    };

    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut category: Option<String> = None;
    // Depth of the outermost open <article>; nested articles add text once.
    let mut article_depth: Option<usize> = None;
    let mut current = String::new();
    let mut parts: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if depth == 0 && seen_root {
                    return Err(malformed("more than one root element".to_string()));
                }
                seen_root = true;
                depth += 1;
                if category.is_none() {
                    category = category_of(&e).map_err(malformed)?;
                }
                if article_depth.is_none() && e.local_name().as_ref() == ARTICLE_ELEMENT {
                    article_depth = Some(depth);
                    current.clear();
                }
            }
            Ok(Event::Empty(e)) => {
                if depth == 0 && seen_root {
                    return Err(malformed("more than one root element".to_string()));
                }
                seen_root = true;
                if category.is_none() {
                    category = category_of(&e).map_err(malformed)?;
                }
            }
            Ok(Event::End(_)) => {
                if article_depth == Some(depth) {
                    let text = current.trim();
                    if !text.is_empty() {
                        parts.push(text.to_string());
                    }
                    article_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| malformed(e.to_string()))?;
                if depth == 0 {
                    if !text.trim().is_empty() {
                        return Err(malformed("text outside the root element".to_string()));
                    }
                } else if article_depth.is_some() {
                    current.push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if article_depth.is_some() {
                    let text = std::str::from_utf8(&c).map_err(|e| malformed(e.to_string()))?;
                    current.push_str(text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !seen_root {
        return Err(malformed("no root element".to_string()));
    }
    if depth != 0 {
        return Err(malformed("unclosed element at end of input".to_string()));
    }

    let text = parts.join(" ");
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    Ok(Some(Document {
        section,
        filename: entry.to_string(),
        category: category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        text: text.to_string(),
    }))
}

fn category_of(element: &BytesStart) -> Result<Option<String>, String> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.local_name().as_ref() == CATEGORY_ATTRIBUTE {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SectionRequest;
    use chrono::NaiveDate;
    use std::io::Write;

    fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    fn archive(section: SectionCode, bytes: Vec<u8>) -> Archive {
        Archive {
            request: SectionRequest::new(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(), section),
            bytes,
        }
    }

    fn parse(xml: &str) -> Result<Option<Document>, ExtractError> {
        parse_markup(SectionCode::Do1, "act.xml", xml.as_bytes())
    }

    #[test]
    fn articles_joined_by_single_space() {
        let doc = parse(
            "<xml><article><p>Edital 123 de licitação</p></article>\
             <article>  Contrato administrativo firmado </article></xml>",
        )
        .unwrap()
        .unwrap();
        assert_eq!(doc.text, "Edital 123 de licitação Contrato administrativo firmado");
        assert_eq!(doc.category, "N/A");
        assert_eq!(doc.filename, "act.xml");
    }

    #[test]
    fn category_is_first_attribute_in_document_order() {
        let doc = parse(
            r#"<xml><meta/><article artCategory="Portaria"><body artCategory="Outro">texto</body></article></xml>"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(doc.category, "Portaria");
    }

    #[test]
    fn category_on_empty_element_counts() {
        let doc = parse(r#"<xml><info artCategory="Aviso"/><article>x</article></xml>"#)
            .unwrap()
            .unwrap();
        assert_eq!(doc.category, "Aviso");
    }

    #[test]
    fn text_outside_articles_is_ignored() {
        let doc = parse("<xml><header>Cabeçalho</header><article>corpo</article></xml>")
            .unwrap()
            .unwrap();
        assert_eq!(doc.text, "corpo");
    }

    #[test]
    fn cdata_and_entities_are_text() {
        let doc = parse("<xml><article>A &amp; B <t><![CDATA[<p>C</p>]]></t></article></xml>")
            .unwrap()
            .unwrap();
        assert_eq!(doc.text, "A & B <p>C</p>");
    }

    #[test]
    fn nested_articles_contribute_once() {
        let doc = parse("<xml><article>outer <article>inner</article></article></xml>")
            .unwrap()
            .unwrap();
        assert_eq!(doc.text, "outer inner");
    }

    #[test]
    fn empty_articles_yield_no_document() {
        assert!(parse("<xml><article>   </article><article/></xml>").unwrap().is_none());
        assert!(parse("<xml><p>no articles here</p></xml>").unwrap().is_none());
    }

    #[test]
    fn malformed_markup_is_an_error() {
        assert!(matches!(
            parse("<xml><article>open</xml>"),
            Err(ExtractError::MalformedDocument { .. })
        ));
        assert!(parse("<xml><article>unclosed").is_err());
        assert!(parse("").is_err());
        assert!(parse("<a/><b/>").is_err());
    }

    #[test]
    fn bad_entry_does_not_sink_the_archive() {
        let bytes = zip_of(&[
            ("1.xml", "<xml><article>primeiro</article></xml>"),
            ("2.xml", "<xml><article>quebrado</xml>"),
            ("3.XML", "<xml><article>terceiro</article></xml>"),
            ("readme.txt", "ignored"),
        ]);
        let out = extract_archive(&archive(SectionCode::Do2, bytes)).unwrap();
        assert_eq!(out.markup_files, 3);
        let texts: Vec<&str> = out.documents.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["primeiro", "terceiro"]);
        assert!(out.documents.iter().all(|d| d.section == SectionCode::Do2));
    }

    #[test]
    fn archive_without_markup_is_empty() {
        let bytes = zip_of(&[("notes.txt", "nothing")]);
        let out = extract_archive(&archive(SectionCode::Do1, bytes)).unwrap();
        assert_eq!(out.markup_files, 0);
        assert!(out.documents.is_empty());
    }

    #[test]
    fn corrupt_archive_is_malformed() {
        let err = extract_archive(&archive(SectionCode::Do1, b"PK\x03\x04garbage".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ExtractError::MalformedArchive { .. }));
    }

    #[test]
    fn batch_skips_bad_archives_and_keeps_section_order() {
        let mut archives = BTreeMap::new();
        archives.insert(
            SectionCode::Do3,
            archive(SectionCode::Do3, zip_of(&[("c.xml", "<r><article>três</article></r>")])),
        );
        archives.insert(
            SectionCode::Do2,
            archive(SectionCode::Do2, b"PKnot a zip".to_vec()),
        );
        archives.insert(
            SectionCode::Do1,
            archive(SectionCode::Do1, zip_of(&[("a.xml", "<r><article>um</article></r>")])),
        );

        let out = extract(&archives);

        let sections: Vec<SectionCode> = out.documents.iter().map(|d| d.section).collect();
        assert_eq!(sections, vec![SectionCode::Do1, SectionCode::Do3]);
        assert_eq!(out.markup_files, 2);
    }
}
