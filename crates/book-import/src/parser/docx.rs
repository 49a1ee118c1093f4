//! WordprocessingML (`.docx`) to XHTML chapters.

use std::collections::HashMap;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::document::{ExtractedImage, ParsedDocument};
use crate::job::ImportType;
use crate::parser::archive;
use crate::parser::segment::{wrap_styles, Segmenter};
use crate::parser::xhtml::{attr_value, escape_text, first_element_text, resolve_href};
use crate::parser::{fallback_title, run_blocking, FormatParser, ParseError, ParserInput};

const DOCUMENT_PATH: &str = "word/document.xml";
const RELS_PATH: &str = "word/_rels/document.xml.rels";
const CORE_PATH: &str = "docProps/core.xml";

pub struct DocxParser;

impl DocxParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DocxParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FormatParser for DocxParser {
    fn supports(&self, import_type: ImportType) -> bool {
        matches!(import_type, ImportType::Word)
    }

    async fn parse(&self, input: ParserInput) -> Result<ParsedDocument, ParseError> {
        let (filename, bytes) = input.into_file("Word")?;
        run_blocking(move || parse_docx(&bytes, &filename)).await
    }
}

fn unparsable(message: impl Into<String>) -> ParseError {
    ParseError::UnparsableDocument(message.into())
}

/// Parses a Word document held in memory.
pub fn parse_docx(bytes: &[u8], filename: &str) -> Result<ParsedDocument, ParseError> {
    let mut archive = archive::open(bytes).map_err(unparsable)?;

    let document = archive::read_text_entry(&mut archive, DOCUMENT_PATH)
        .map_err(unparsable)?
        .ok_or_else(|| unparsable(format!("missing {}", DOCUMENT_PATH)))?;

    // Relationships and core properties are optional parts.
    let relationships = match archive::read_text_entry(&mut archive, RELS_PATH) {
        Ok(Some(xml)) => parse_relationships(&xml).map_err(unparsable)?,
        Ok(None) => HashMap::new(),
        Err(e) => return Err(unparsable(e)),
    };
    let (title, description) = match archive::read_text_entry(&mut archive, CORE_PATH) {
        Ok(Some(xml)) => (
            first_element_text(&xml, b"title").unwrap_or(None),
            first_element_text(&xml, b"description").unwrap_or(None),
        ),
        _ => (None, None),
    };

    let body = convert_document(&document, &relationships)
        .map_err(|e| unparsable(format!("{} is not well-formed: {}", DOCUMENT_PATH, e)))?;

    let mut doc = ParsedDocument {
        title: fallback_title(title.as_deref(), filename),
        description,
        chapters: body.chapters,
        ..Default::default()
    };

    for reference in body.image_refs {
        match archive::read_entry(&mut archive, &reference) {
            Ok(Some(bytes)) => {
                let mime_type = mime_guess::from_path(&reference)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string();
                doc.push_image(ExtractedImage {
                    original_reference: reference,
                    bytes,
                    mime_type,
                });
            }
            Ok(None) | Err(_) => doc.push_unresolved(reference),
        }
    }
    Ok(doc)
}

/// `rId` → archive path for internal relationships.
fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut rels = HashMap::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if attr_value(e, b"TargetMode")?.as_deref() == Some("External") {
                    continue;
                }
                let (Some(id), Some(target)) = (attr_value(e, b"Id")?, attr_value(e, b"Target")?)
                else {
                    continue;
                };
                if let Some(path) = resolve_href("word", &target) {
                    rels.insert(id, path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
    }

    Ok(rels)
}

struct ConvertedBody {
    chapters: Vec<String>,
    image_refs: Vec<String>,
}

#[derive(Default)]
struct Paragraph {
    style: Option<String>,
    html: String,
}

#[derive(Default)]
struct Run {
    bold: bool,
    italic: bool,
    underline: bool,
    html: String,
}

impl Run {
    fn into_html(self) -> String {
        wrap_styles(self.html, self.bold, self.italic, self.underline)
    }
}

/// Heading level for a paragraph style id.
pub(crate) fn heading_level(style: &str) -> Option<u8> {
    let lower = style.to_ascii_lowercase();
    match lower.as_str() {
        "title" => Some(1),
        "subtitle" => Some(2),
        _ => lower
            .strip_prefix("heading")
            .and_then(|n| n.trim().parse::<u8>().ok())
            .filter(|n| (1..=6).contains(n)),
    }
}

fn toggle_on(e: &BytesStart<'_>) -> Result<bool, String> {
    Ok(!matches!(
        attr_value(e, b"val")?.as_deref(),
        Some("0") | Some("false") | Some("off") | Some("none")
    ))
}

#[derive(Default)]
struct BodyWriter<'a> {
    relationships: Option<&'a HashMap<String, String>>,
    segmenter: Segmenter,
    paragraph: Option<Paragraph>,
    run: Option<Run>,
    // Text boxes nest paragraphs and runs inside a run; only the outermost
    // level opens and closes a block.
    paragraph_depth: usize,
    run_depth: usize,
    table_depth: usize,
    in_text: bool,
    in_run_props: bool,
    image_refs: Vec<String>,
}

impl BodyWriter<'_> {
    fn inline(&mut self, html: &str) {
        if let Some(run) = self.run.as_mut() {
            run.html.push_str(html);
        } else if let Some(paragraph) = self.paragraph.as_mut() {
            paragraph.html.push_str(html);
        }
    }

    fn start(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), String> {
        match e.local_name().as_ref() {
            b"p" if !empty => {
                self.paragraph_depth += 1;
                if self.paragraph_depth == 1 {
                    self.paragraph = Some(Paragraph::default());
                }
            }
            b"r" if !empty => {
                self.run_depth += 1;
                if self.run_depth == 1 {
                    self.run = Some(Run::default());
                }
            }
            b"rPr" if !empty => self.in_run_props = true,
            b"t" if !empty => self.in_text = true,
            b"pStyle" => {
                if let Some(paragraph) = self.paragraph.as_mut() {
                    paragraph.style = attr_value(e, b"val")?;
                }
            }
            b"b" | b"i" | b"u" if self.in_run_props => {
                let on = toggle_on(e)?;
                if let Some(run) = self.run.as_mut() {
                    match e.local_name().as_ref() {
                        b"b" => run.bold = on,
                        b"i" => run.italic = on,
                        _ => run.underline = on,
                    }
                }
            }
            b"br" if self.run.is_some() => self.inline("<br/>"),
            b"tab" if self.run.is_some() && !self.in_run_props => self.inline("\t"),
            b"blip" => {
                let id = attr_value(e, b"embed")?;
                self.image(id);
            }
            b"imagedata" => {
                let id = attr_value(e, b"id")?;
                self.image(id);
            }
            b"tbl" if !empty => {
                self.table_depth += 1;
                self.segmenter.push("<table>");
            }
            b"tr" if !empty => self.segmenter.push("<tr>"),
            b"tc" if !empty => self.segmenter.push("<td>"),
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self, local: &[u8]) {
        match local {
            b"t" => self.in_text = false,
            b"rPr" => self.in_run_props = false,
            b"r" => {
                self.run_depth = self.run_depth.saturating_sub(1);
                if self.run_depth > 0 {
                    return;
                }
                if let Some(run) = self.run.take() {
                    let html = run.into_html();
                    if let Some(paragraph) = self.paragraph.as_mut() {
                        paragraph.html.push_str(&html);
                    }
                }
            }
            b"p" => {
                self.paragraph_depth = self.paragraph_depth.saturating_sub(1);
                if self.paragraph_depth == 0 {
                    self.finish_paragraph();
                }
            }
            b"tc" => self.segmenter.push("</td>"),
            b"tr" => self.segmenter.push("</tr>"),
            b"tbl" => {
                self.table_depth = self.table_depth.saturating_sub(1);
                self.segmenter.push("</table>");
            }
            _ => {}
        }
    }

    fn text(&mut self, raw: &str) {
        if self.in_text {
            self.inline(raw);
        }
    }

    fn image(&mut self, id: Option<String>) {
        let Some(id) = id else { return };
        let Some(path) = self.relationships.and_then(|rels| rels.get(&id)).cloned() else {
            tracing::debug!(relationship = %id, "Image relationship not found");
            return;
        };
        self.inline(&format!(r#"<img src="{}" alt=""/>"#, escape_text(&path)));
        if !self.image_refs.contains(&path) {
            self.image_refs.push(path);
        }
    }

    fn finish_paragraph(&mut self) {
        let Some(paragraph) = self.paragraph.take() else {
            return;
        };
        if paragraph.html.trim().is_empty() {
            return;
        }
        let level = paragraph.style.as_deref().and_then(heading_level);
        if level == Some(1) && self.table_depth == 0 {
            self.segmenter.break_chapter();
        }
        let tag = match level {
            Some(n) => format!("h{}", n),
            None => "p".to_string(),
        };
        self.segmenter
            .push(&format!("<{tag}>{}</{tag}>", paragraph.html));
    }
}

fn convert_document(
    xml: &str,
    relationships: &HashMap<String, String>,
) -> Result<ConvertedBody, String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = BodyWriter {
        relationships: Some(relationships),
        ..Default::default()
    };
    let mut saw_body = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if e.local_name().as_ref() == b"body" {
                    saw_body = true;
                }
                writer.start(e, false)?;
            }
            Ok(Event::Empty(ref e)) => writer.start(e, true)?,
            Ok(Event::End(ref e)) => writer.end(e.local_name().as_ref()),
            Ok(Event::Text(ref t)) => {
                writer.text(std::str::from_utf8(t).map_err(|e| e.to_string())?);
            }
            Ok(Event::GeneralRef(ref r)) => {
                let name = std::str::from_utf8(r).map_err(|e| e.to_string())?;
                writer.text(&format!("&{};", name));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("{} at byte {}", e, reader.buffer_position())),
            _ => {}
        }
    }

    if !saw_body {
        return Err("document has no body".to_string());
    }

    Ok(ConvertedBody {
        chapters: writer.segmenter.finish(),
        image_refs: writer.image_refs,
    })
}
