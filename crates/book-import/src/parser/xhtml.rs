//! XML/XHTML helpers shared by the archive-based parsers.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

/// The inner markup of a content document's `<body>`, with local image
/// references rewritten to canonical archive paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterBody {
    pub html: String,
    /// Canonical archive paths of referenced images, first-seen order.
    pub image_refs: Vec<String>,
}

/// Decodes XML entities, leaving the input untouched if it contains
/// references the XML spec does not define (e.g. `&nbsp;`).
pub fn decode_text(raw: &str) -> String {
    quick_xml::escape::unescape(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

pub fn escape_text(raw: &str) -> String {
    quick_xml::escape::escape(raw).into_owned()
}

/// Directory part of an archive path (`"OEBPS/text/ch1.xhtml"` → `"OEBPS/text"`).
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// URLs with a scheme (`http:`, `data:`, `mailto:` ...) or protocol-relative.
pub fn is_external(href: &str) -> bool {
    if href.starts_with("//") {
        return true;
    }
    match href.find(':') {
        Some(colon) => !href[..colon].contains('/'),
        None => false,
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Resolves `href` against `base_dir` into a normalized archive path.
///
/// Returns `None` for external URLs and for hrefs that are only a fragment
/// or query.
pub fn resolve_href(base_dir: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if is_external(href) {
        return None;
    }
    let path = href.split(['#', '?']).next().unwrap_or("");
    if path.is_empty() {
        return None;
    }
    let decoded = percent_decode(path);

    let mut segments: Vec<&str> = if decoded.starts_with('/') {
        Vec::new()
    } else {
        base_dir.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Value of the attribute whose local name is `name`, entity-decoded.
pub fn attr_value(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        if attr.key.local_name().as_ref() == name {
            let raw = std::str::from_utf8(&attr.value).map_err(|err| err.to_string())?;
            return Ok(Some(decode_text(raw)));
        }
    }
    Ok(None)
}

/// Text content of the first element with local name `local`.
pub fn first_element_text(xml: &str, local: &[u8]) -> Result<Option<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut capturing = false;
    let mut raw = String::new();

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) if !capturing && e.local_name().as_ref() == local => {
                capturing = true;
            }
            Event::Text(t) if capturing => {
                raw.push_str(std::str::from_utf8(&t).map_err(|e| e.to_string())?);
            }
            Event::GeneralRef(r) if capturing => {
                raw.push('&');
                raw.push_str(std::str::from_utf8(&r).map_err(|e| e.to_string())?);
                raw.push(';');
            }
            Event::CData(c) if capturing => {
                let text = std::str::from_utf8(&c).map_err(|e| e.to_string())?;
                raw.push_str(&escape_text(text));
            }
            Event::End(e) if capturing && e.local_name().as_ref() == local => {
                let text = decode_text(raw.trim());
                return Ok(if text.is_empty() { None } else { Some(text) });
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

/// Extracts the inner markup of `<body>` from an XHTML content document
/// located at `doc_path` inside the archive.
///
/// `<img src>` and SVG `<image href>` values pointing inside the archive are
/// replaced by their resolved archive path. Fails if the document is not
/// well-formed or has no body.
pub fn extract_body(xhtml: &str, doc_path: &str) -> Result<ChapterBody, String> {
    let base_dir = parent_dir(doc_path);
    let mut reader = Reader::from_str(xhtml);
    let mut writer = Writer::new(Vec::new());
    let mut image_refs = Vec::new();
    let mut in_body = false;
    let mut saw_body = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("{} at byte {}", e, reader.buffer_position()))?;
        let written = match event {
            Event::Eof => break,
            Event::Start(e) if !in_body => {
                if e.local_name().as_ref() == b"body" {
                    in_body = true;
                    saw_body = true;
                }
                Ok(())
            }
            Event::Empty(e) if !in_body => {
                if e.local_name().as_ref() == b"body" {
                    saw_body = true;
                }
                Ok(())
            }
            Event::End(e) if in_body && e.local_name().as_ref() == b"body" => {
                in_body = false;
                Ok(())
            }
            Event::Start(e) if in_body => {
                let e = rewrite_image_ref(&e, base_dir, &mut image_refs)?;
                writer.write_event(Event::Start(e))
            }
            Event::Empty(e) if in_body => {
                let e = rewrite_image_ref(&e, base_dir, &mut image_refs)?;
                writer.write_event(Event::Empty(e))
            }
            other if in_body => writer.write_event(other),
            _ => Ok(()),
        };
        written.map_err(|e| e.to_string())?;
    }

    if !saw_body {
        return Err("document has no <body> element".to_string());
    }

    let html = String::from_utf8(writer.into_inner()).map_err(|e| e.to_string())?;
    Ok(ChapterBody {
        html: html.trim().to_string(),
        image_refs,
    })
}

fn rewrite_image_ref(
    e: &BytesStart<'_>,
    base_dir: &str,
    image_refs: &mut Vec<String>,
) -> Result<BytesStart<'static>, String> {
    let target: &[u8] = match e.local_name().as_ref() {
        b"img" => b"src",
        b"image" => b"href",
        _ => return Ok(e.clone().into_owned()),
    };

    let name = std::str::from_utf8(e.name().as_ref())
        .map_err(|err| err.to_string())?
        .to_string();
    let mut rewritten = BytesStart::new(name);

    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        if attr.key.local_name().as_ref() == target {
            let raw = std::str::from_utf8(&attr.value).map_err(|err| err.to_string())?;
            if let Some(resolved) = resolve_href(base_dir, &decode_text(raw)) {
                let key = std::str::from_utf8(attr.key.as_ref()).map_err(|err| err.to_string())?;
                rewritten.push_attribute((key, resolved.as_str()));
                if !image_refs.contains(&resolved) {
                    image_refs.push(resolved);
                }
                continue;
            }
        }
        rewritten.push_attribute(attr);
    }

    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_href_relative_paths() {
        assert_eq!(
            resolve_href("OEBPS/text", "../images/cover.png").as_deref(),
            Some("OEBPS/images/cover.png")
        );
        assert_eq!(
            resolve_href("OEBPS", "./img/a%20b.jpg#frag").as_deref(),
            Some("OEBPS/img/a b.jpg")
        );
        assert_eq!(
            resolve_href("", "images/x.gif").as_deref(),
            Some("images/x.gif")
        );
        assert_eq!(
            resolve_href("word", "/word/media/image1.png").as_deref(),
            Some("word/media/image1.png")
        );
    }

    #[test]
    fn test_resolve_href_skips_external_and_fragments() {
        assert_eq!(resolve_href("OEBPS", "https://example.com/a.png"), None);
        assert_eq!(resolve_href("OEBPS", "data:image/png;base64,AAAA"), None);
        assert_eq!(resolve_href("OEBPS", "//cdn.example.com/a.png"), None);
        assert_eq!(resolve_href("OEBPS", "#top"), None);
    }

    #[test]
    fn test_extract_body_rewrites_images() {
        let xhtml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head><title>One</title></head>
<body>
  <h1>Chapter One</h1>
  <p>Fish &amp; chips<img src="../images/fish.png" alt="A fish"/></p>
  <p><img src="https://example.com/remote.png"/></p>
</body>
</html>"#;

        let body = extract_body(xhtml, "OEBPS/text/ch1.xhtml").unwrap();
        assert!(body.html.starts_with("<h1>Chapter One</h1>"));
        assert!(body.html.contains("Fish &amp; chips"));
        assert!(body.html.contains(r#"src="OEBPS/images/fish.png""#));
        assert!(body.html.contains(r#"alt="A fish""#));
        assert!(body.html.contains(r#"src="https://example.com/remote.png""#));
        assert_eq!(body.image_refs, vec!["OEBPS/images/fish.png"]);
        assert!(!body.html.contains("<body"));
    }

    #[test]
    fn test_extract_body_handles_svg_image() {
        let xhtml = r#"<html xmlns="http://www.w3.org/1999/xhtml" xmlns:xlink="http://www.w3.org/1999/xlink"><body>
<svg xmlns="http://www.w3.org/2000/svg"><image xlink:href="cover.jpg" width="10" height="10"/></svg>
</body></html>"#;

        let body = extract_body(xhtml, "OEBPS/cover.xhtml").unwrap();
        assert_eq!(body.image_refs, vec!["OEBPS/cover.jpg"]);
        assert!(body.html.contains(r#"xlink:href="OEBPS/cover.jpg""#));
    }

    #[test]
    fn test_extract_body_rejects_malformed_markup() {
        let xhtml = "<html><body><p>unclosed</div></body></html>";
        assert!(extract_body(xhtml, "ch.xhtml").is_err());
    }

    #[test]
    fn test_extract_body_requires_body() {
        assert!(extract_body("<html><head/></html>", "ch.xhtml").is_err());
        let empty = extract_body("<html><body/></html>", "ch.xhtml").unwrap();
        assert_eq!(empty.html, "");
    }

    #[test]
    fn test_first_element_text_decodes_entities() {
        let xml = r#"<package><metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
<dc:title> Tom &amp; Jerry </dc:title></metadata></package>"#;
        assert_eq!(
            first_element_text(xml, b"title").unwrap().as_deref(),
            Some("Tom & Jerry")
        );
        assert_eq!(first_element_text(xml, b"description").unwrap(), None);
    }

    #[test]
    fn test_decode_text_keeps_unknown_entities() {
        assert_eq!(decode_text("a &lt; b"), "a < b");
        assert_eq!(decode_text("a&nbsp;b"), "a&nbsp;b");
    }
}
