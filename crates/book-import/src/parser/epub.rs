//! EPUB container parsing: container.xml → OPF package → spine documents.

use std::collections::HashMap;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::document::{ExtractedImage, ParsedDocument};
use crate::job::ImportType;
use crate::parser::archive::{self, Archive};
use crate::parser::xhtml::{self, attr_value, first_element_text, parent_dir, resolve_href};
use crate::parser::{fallback_title, run_blocking, FormatParser, ParseError, ParserInput};

const CONTAINER_PATH: &str = "META-INF/container.xml";
const OPF_MEDIA_TYPE: &str = "application/oebps-package+xml";

pub struct EpubParser;

impl EpubParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EpubParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FormatParser for EpubParser {
    fn supports(&self, import_type: ImportType) -> bool {
        matches!(import_type, ImportType::Epub)
    }

    async fn parse(&self, input: ParserInput) -> Result<ParsedDocument, ParseError> {
        let (filename, bytes) = input.into_file("EPUB")?;
        run_blocking(move || parse_epub(&bytes, &filename)).await
    }
}

#[derive(Debug, Clone)]
struct ManifestItem {
    href: String,
    media_type: Option<String>,
}

#[derive(Debug, Default)]
struct Package {
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
}

fn malformed(message: impl Into<String>) -> ParseError {
    ParseError::MalformedContainer(message.into())
}

/// Parses an EPUB archive held in memory.
pub fn parse_epub(bytes: &[u8], filename: &str) -> Result<ParsedDocument, ParseError> {
    let mut archive = archive::open(bytes).map_err(malformed)?;

    let container = archive::read_text_entry(&mut archive, CONTAINER_PATH)
        .map_err(malformed)?
        .ok_or_else(|| malformed(format!("missing {}", CONTAINER_PATH)))?;
    let opf_path = rootfile_path(&container)
        .map_err(|e| malformed(format!("unreadable {}: {}", CONTAINER_PATH, e)))?;

    let opf = archive::read_text_entry(&mut archive, &opf_path)
        .map_err(malformed)?
        .ok_or_else(|| malformed(format!("package document '{}' is missing", opf_path)))?;
    let package =
        parse_package(&opf).map_err(|e| malformed(format!("unreadable '{}': {}", opf_path, e)))?;
    let title = first_element_text(&opf, b"title").map_err(malformed)?;
    let description = first_element_text(&opf, b"description").map_err(malformed)?;

    let opf_dir = parent_dir(&opf_path);
    let media_types: HashMap<String, String> = package
        .manifest
        .values()
        .filter_map(|item| {
            let path = resolve_href(opf_dir, &item.href)?;
            item.media_type.clone().map(|m| (path, m))
        })
        .collect();

    let mut doc = ParsedDocument {
        title: fallback_title(title.as_deref(), filename),
        description,
        ..Default::default()
    };
    let mut image_refs: Vec<String> = Vec::new();

    for idref in &package.spine {
        let item = package
            .manifest
            .get(idref)
            .ok_or_else(|| malformed(format!("spine references unknown manifest item '{}'", idref)))?;
        let path = resolve_href(opf_dir, &item.href)
            .ok_or_else(|| malformed(format!("spine item '{}' has no local path", idref)))?;
        let content = archive::read_text_entry(&mut archive, &path)
            .map_err(malformed)?
            .ok_or_else(|| malformed(format!("content document '{}' is missing", path)))?;
        let body = xhtml::extract_body(&content, &path)
            .map_err(|e| malformed(format!("content document '{}' is not well-formed: {}", path, e)))?;

        for reference in body.image_refs {
            if !image_refs.contains(&reference) {
                image_refs.push(reference);
            }
        }
        doc.chapters.push(body.html);
    }

    for reference in image_refs {
        collect_image(&mut archive, &media_types, reference, &mut doc)?;
    }

    Ok(doc)
}

fn collect_image(
    archive: &mut Archive<'_>,
    media_types: &HashMap<String, String>,
    reference: String,
    doc: &mut ParsedDocument,
) -> Result<(), ParseError> {
    match archive::read_entry(archive, &reference) {
        Ok(Some(bytes)) => {
            let mime_type = media_types.get(&reference).cloned().unwrap_or_else(|| {
                mime_guess::from_path(&reference)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });
            doc.push_image(ExtractedImage {
                original_reference: reference,
                bytes,
                mime_type,
            });
        }
        Ok(None) => {
            tracing::debug!(reference = %reference, "Image resource missing from archive");
            doc.push_unresolved(reference);
        }
        Err(e) => {
            tracing::warn!(reference = %reference, error = %e, "Image resource unreadable");
            doc.push_unresolved(reference);
        }
    }
    Ok(())
}

/// Path of the OPF package named by `META-INF/container.xml`.
fn rootfile_path(container: &str) -> Result<String, String> {
    let mut reader = Reader::from_str(container);
    let mut fallback: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"rootfile" =>
            {
                let Some(path) = attr_value(e, b"full-path")? else {
                    continue;
                };
                let media_type = attr_value(e, b"media-type")?;
                if media_type.as_deref() == Some(OPF_MEDIA_TYPE) {
                    return Ok(path);
                }
                fallback.get_or_insert(path);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
    }

    fallback.ok_or_else(|| "no rootfile declared".to_string())
}

fn parse_package(opf: &str) -> Result<Package, String> {
    let mut reader = Reader::from_str(opf);
    let mut package = Package::default();
    let mut saw_manifest = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"manifest" => saw_manifest = true,
                b"item" => add_item(&mut package, e)?,
                b"itemref" => {
                    if let Some(idref) = attr_value(e, b"idref")? {
                        package.spine.push(idref);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("{} at byte {}", e, reader.buffer_position())),
            _ => {}
        }
    }

    if !saw_manifest {
        return Err("package has no manifest".to_string());
    }
    Ok(package)
}

fn add_item(package: &mut Package, e: &BytesStart<'_>) -> Result<(), String> {
    let (Some(id), Some(href)) = (attr_value(e, b"id")?, attr_value(e, b"href")?) else {
        return Ok(());
    };
    let media_type = attr_value(e, b"media-type")?;
    package.manifest.insert(id, ManifestItem { href, media_type });
    Ok(())
}
