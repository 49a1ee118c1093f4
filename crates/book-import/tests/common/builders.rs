//! Builders for EPUB and Word fixtures.
//!
//! Archives are produced in memory with the `zip` crate so each test states
//! exactly the structure it depends on.

#![allow(dead_code)]

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;

/// A PNG signature followed by filler, `len` bytes in total.
pub fn png_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    bytes.resize(len.max(8), 0x42);
    bytes
}

/// A JPEG start-of-image marker followed by filler.
pub fn jpeg_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0xff, 0xd8, 0xff, 0xe0];
    bytes.resize(len.max(4), 0x24);
    bytes
}

fn zip_entries(entries: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(name.as_str(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

// ─── EPUB ───────────────────────────────────────────────────────────────────

struct EpubChapter {
    title: String,
    body: String,
    /// Listed in the manifest and spine but left out of the archive.
    missing: bool,
}

struct EpubImage {
    name: String,
    media_type: String,
    bytes: Vec<u8>,
}

/// Builder for EPUB 3 packages rooted at `OEBPS/content.opf`.
///
/// Chapter bodies reference images as `../images/<name>`.
pub struct EpubBuilder {
    title: String,
    description: Option<String>,
    chapters: Vec<EpubChapter>,
    images: Vec<EpubImage>,
}

impl EpubBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            description: None,
            chapters: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn chapter(mut self, title: &str, body: &str) -> Self {
        self.chapters.push(EpubChapter {
            title: title.to_string(),
            body: body.to_string(),
            missing: false,
        });
        self
    }

    pub fn missing_chapter(mut self, title: &str) -> Self {
        self.chapters.push(EpubChapter {
            title: title.to_string(),
            body: String::new(),
            missing: true,
        });
        self
    }

    pub fn image(mut self, name: &str, media_type: &str, bytes: Vec<u8>) -> Self {
        self.images.push(EpubImage {
            name: name.to_string(),
            media_type: media_type.to_string(),
            bytes,
        });
        self
    }

    /// `<img>` markup pointing at an image added with [`image`](Self::image).
    pub fn img_tag(name: &str) -> String {
        format!(r#"<p><img src="../images/{}" alt="{}"/></p>"#, name, name)
    }

    pub fn build(self) -> Vec<u8> {
        let mut manifest = String::new();
        let mut spine = String::new();
        let mut entries = vec![
            ("mimetype".to_string(), b"application/epub+zip".to_vec()),
            (
                "META-INF/container.xml".to_string(),
                br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#
                    .to_vec(),
            ),
        ];

        for (i, chapter) in self.chapters.iter().enumerate() {
            let id = format!("ch{}", i + 1);
            let href = format!("text/{}.xhtml", id);
            manifest.push_str(&format!(
                r#"<item id="{id}" href="{href}" media-type="application/xhtml+xml"/>"#
            ));
            spine.push_str(&format!(r#"<itemref idref="{id}"/>"#));
            if !chapter.missing {
                let xhtml = format!(
                    r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml"><head><title>{title}</title></head>
<body><h1>{title}</h1>{body}</body></html>"#,
                    title = chapter.title,
                    body = chapter.body
                );
                entries.push((format!("OEBPS/{}", href), xhtml.into_bytes()));
            }
        }

        for (i, image) in self.images.iter().enumerate() {
            manifest.push_str(&format!(
                r#"<item id="img{}" href="images/{}" media-type="{}"/>"#,
                i + 1,
                image.name,
                image.media_type
            ));
            entries.push((format!("OEBPS/images/{}", image.name), image.bytes.clone()));
        }

        let description = self
            .description
            .as_ref()
            .map(|d| format!("<dc:description>{}</dc:description>", d))
            .unwrap_or_default();
        let opf = format!(
            r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>{}</dc:title>{}
  </metadata>
  <manifest>{}</manifest>
  <spine>{}</spine>
</package>"#,
            self.title, description, manifest, spine
        );
        entries.push(("OEBPS/content.opf".to_string(), opf.into_bytes()));

        zip_entries(&entries)
    }
}

// ─── DOCX ───────────────────────────────────────────────────────────────────

const W_NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships""#;

/// Builder for minimal WordprocessingML packages.
pub struct DocxBuilder {
    title: Option<String>,
    body: String,
    relationships: Vec<(String, String)>,
    media: Vec<(String, Vec<u8>)>,
}

impl DocxBuilder {
    pub fn new() -> Self {
        Self {
            title: None,
            body: String::new(),
            relationships: Vec::new(),
            media: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn heading(mut self, level: u8, text: &str) -> Self {
        self.body.push_str(&format!(
            r#"<w:p><w:pPr><w:pStyle w:val="Heading{}"/></w:pPr><w:r><w:t>{}</w:t></w:r></w:p>"#,
            level, text
        ));
        self
    }

    pub fn paragraph(mut self, text: &str) -> Self {
        self.body.push_str(&format!(
            r#"<w:p><w:r><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
            text
        ));
        self
    }

    /// An inline picture stored at `word/media/<name>`.
    pub fn image(mut self, name: &str, bytes: Vec<u8>) -> Self {
        let rel_id = format!("rId{}", 100 + self.relationships.len());
        self.body.push_str(&format!(
            r#"<w:p><w:r><w:drawing><a:graphic><a:graphicData><a:blip r:embed="{}"/></a:graphicData></a:graphic></w:drawing></w:r></w:p>"#,
            rel_id
        ));
        self.relationships
            .push((rel_id, format!("media/{}", name)));
        self.media.push((format!("word/media/{}", name), bytes));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let document = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document {W_NS}><w:body>{}</w:body></w:document>"#,
            self.body
        );
        let rels: String = self
            .relationships
            .iter()
            .map(|(id, target)| {
                format!(
                    r#"<Relationship Id="{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="{}"/>"#,
                    id, target
                )
            })
            .collect();

        let mut entries = vec![
            ("word/document.xml".to_string(), document.into_bytes()),
            (
                "word/_rels/document.xml.rels".to_string(),
                format!(
                    r#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{}</Relationships>"#,
                    rels
                )
                .into_bytes(),
            ),
        ];
        if let Some(title) = &self.title {
            entries.push((
                "docProps/core.xml".to_string(),
                format!(
                    r#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>{}</dc:title></cp:coreProperties>"#,
                    title
                )
                .into_bytes(),
            ));
        }
        entries.extend(self.media);

        zip_entries(&entries)
    }
}

impl Default for DocxBuilder {
    fn default() -> Self {
        Self::new()
    }
}
