//! Google Docs adapter: fetches a document over the Docs REST API and
//! converts its structural JSON into chapters.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GoogleDocsConfig;
use crate::document::{ExtractedImage, ParsedDocument};
use crate::job::ImportType;
use crate::parser::segment::{wrap_styles, Segmenter};
use crate::parser::xhtml::escape_text;
use crate::parser::{fallback_title, FormatParser, ParseError, ParserInput};
use crate::retry::RetryPolicy;

/// Scheme used for inline object references inside converted markup.
pub const INLINE_REFERENCE_PREFIX: &str = "gdoc-inline:";

pub fn inline_reference(object_id: &str) -> String {
    format!("{}{}", INLINE_REFERENCE_PREFIX, object_id)
}

/// Extracts the document id from a bare id or a `docs.google.com` URL.
pub fn document_id(handle: &str) -> Option<String> {
    let handle = handle.trim();
    let candidate = if let Some((_, rest)) = handle.split_once("/document/d/") {
        rest.split(['/', '?', '#']).next().unwrap_or("")
    } else if handle.contains("://") {
        return None;
    } else {
        handle
    };

    let valid = !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| candidate.to_string())
}

/// Outcome of a single HTTP call, split by whether retrying can help.
#[derive(Debug)]
enum CallError {
    Transient(String),
    Fatal(ParseError),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Transient(msg) => write!(f, "{}", msg),
            CallError::Fatal(err) => write!(f, "{}", err),
        }
    }
}

impl CallError {
    fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }

    fn into_parse_error(self) -> ParseError {
        match self {
            CallError::Transient(msg) => ParseError::ExternalService(msg),
            CallError::Fatal(err) => err,
        }
    }
}

fn classify_status(status: StatusCode, what: &str) -> CallError {
    match status {
        StatusCode::UNAUTHORIZED => {
            CallError::Fatal(ParseError::AuthRequired(format!("{} returned 401", what)))
        }
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => CallError::Fatal(
            ParseError::DocumentUnavailable(format!("{} returned {}", what, status.as_u16())),
        ),
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
            CallError::Transient(format!("{} returned {}", what, s.as_u16()))
        }
        s => CallError::Fatal(ParseError::ExternalService(format!(
            "{} returned unexpected status {}",
            what,
            s.as_u16()
        ))),
    }
}

fn classify_transport(err: reqwest::Error, what: &str) -> CallError {
    if err.is_timeout() {
        CallError::Transient(format!("{} timed out", what))
    } else {
        CallError::Transient(format!("{} failed: {}", what, err))
    }
}

fn create_http_client(config: &GoogleDocsConfig) -> Result<Client, ParseError> {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| ParseError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Hosts that serve Docs image content. Subdomains match too.
const GOOGLE_CONTENT_HOSTS: &[&str] = &["googleusercontent.com", "googleapis.com", "google.com"];

pub struct GoogleDocAdapter {
    client: Client,
    api_base_url: String,
    api_base: Option<Url>,
    retry: RetryPolicy,
}

impl GoogleDocAdapter {
    pub fn new(config: &GoogleDocsConfig) -> Result<Self, ParseError> {
        Ok(Self {
            client: create_http_client(config)?,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_base: Url::parse(&config.api_base_url).ok(),
            retry: RetryPolicy::new(config.max_attempts, config.retry_backoff()),
        })
    }

    /// Whether the access token may accompany a request to `uri`: https on a
    /// Google content host, or the configured API origin itself.
    fn may_receive_token(&self, uri: &str) -> bool {
        let Ok(url) = Url::parse(uri) else {
            return false;
        };
        if self
            .api_base
            .as_ref()
            .is_some_and(|base| base.origin() == url.origin())
        {
            return true;
        }
        let google_host = url.host_str().is_some_and(|host| {
            GOOGLE_CONTENT_HOSTS.iter().any(|domain| {
                host == *domain
                    || host
                        .strip_suffix(domain)
                        .is_some_and(|prefix| prefix.ends_with('.'))
            })
        });
        url.scheme() == "https" && google_host
    }

    async fn fetch_document(
        &self,
        document_id: &str,
        token: &SecretString,
    ) -> Result<GDocument, ParseError> {
        let url = format!("{}/v1/documents/{}", self.api_base_url, document_id);
        let url = url.as_str();
        self.retry
            .run(
                "fetch document",
                move || self.fetch_document_once(url, token),
                CallError::is_transient,
            )
            .await
            .map_err(CallError::into_parse_error)
    }

    async fn fetch_document_once(
        &self,
        url: &str,
        token: &SecretString,
    ) -> Result<GDocument, CallError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| classify_transport(e, "document request"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "document request"));
        }

        response.json::<GDocument>().await.map_err(|e| {
            if e.is_timeout() {
                CallError::Transient("document body timed out".to_string())
            } else {
                CallError::Fatal(ParseError::ExternalService(format!(
                    "invalid document payload: {}",
                    e
                )))
            }
        })
    }

    async fn download_image(
        &self,
        url: &str,
        token: &SecretString,
    ) -> Result<(Vec<u8>, String), ParseError> {
        self.retry
            .run(
                "download inline image",
                move || self.download_image_once(url, token),
                CallError::is_transient,
            )
            .await
            .map_err(CallError::into_parse_error)
    }

    async fn download_image_once(
        &self,
        url: &str,
        token: &SecretString,
    ) -> Result<(Vec<u8>, String), CallError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| classify_transport(e, "image request"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "image request"));
        }

        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty() && v != "application/octet-stream");

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_transport(e, "image body"))?;

        let mime_type = header_mime.unwrap_or_else(|| {
            mime_guess::from_path(url.split('?').next().unwrap_or(url))
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
        Ok((bytes.to_vec(), mime_type))
    }
}

#[async_trait]
impl FormatParser for GoogleDocAdapter {
    fn supports(&self, import_type: ImportType) -> bool {
        matches!(import_type, ImportType::GoogleDoc)
    }

    async fn parse(&self, input: ParserInput) -> Result<ParsedDocument, ParseError> {
        let ParserInput::Remote {
            document_handle,
            access_token,
        } = input
        else {
            return Err(ParseError::UnsupportedSource(
                "Google Docs import needs a document reference".to_string(),
            ));
        };

        let id = document_id(&document_handle).ok_or_else(|| {
            ParseError::DocumentUnavailable("not a Google document reference".to_string())
        })?;

        let document = self.fetch_document(&id, &access_token).await?;
        debug!(
            elements = document.body.content.len(),
            inline_objects = document.inline_objects.len(),
            "Fetched Google document"
        );

        let rendered = render_document(&document);
        let mut doc = ParsedDocument {
            title: fallback_title(Some(document.title.as_str()), ""),
            description: None,
            chapters: rendered.chapters,
            ..Default::default()
        };

        for object_id in rendered.inline_objects {
            let reference = inline_reference(&object_id);
            let Some(uri) = document.content_uri(&object_id) else {
                debug!(object_id = %object_id, "Inline object has no image content");
                doc.push_unresolved(reference);
                continue;
            };
            if !self.may_receive_token(uri) {
                warn!(
                    object_id = %object_id,
                    "Inline image is not served over https by Google, skipping"
                );
                doc.push_unresolved(reference);
                continue;
            }
            match self.download_image(uri, &access_token).await {
                Ok((bytes, mime_type)) => {
                    doc.push_image(ExtractedImage {
                        original_reference: reference,
                        bytes,
                        mime_type,
                    });
                }
                Err(e) => {
                    warn!(object_id = %object_id, error = %e, "Inline image download failed");
                    doc.push_unresolved(reference);
                }
            }
        }

        Ok(doc)
    }
}

// Subset of the Docs API `Document` resource that the converter reads.

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GDocument {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: GBody,
    #[serde(default)]
    inline_objects: HashMap<String, InlineObject>,
}

impl GDocument {
    fn content_uri(&self, object_id: &str) -> Option<&str> {
        self.inline_objects
            .get(object_id)?
            .inline_object_properties
            .as_ref()?
            .embedded_object
            .as_ref()?
            .image_properties
            .as_ref()?
            .content_uri
            .as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
struct GBody {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuralElement {
    paragraph: Option<Paragraph>,
    table: Option<Table>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paragraph {
    #[serde(default)]
    elements: Vec<ParagraphElement>,
    paragraph_style: Option<ParagraphStyle>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParagraphStyle {
    named_style_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParagraphElement {
    text_run: Option<TextRun>,
    inline_object_element: Option<InlineObjectElement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextRun {
    #[serde(default)]
    content: String,
    #[serde(default)]
    text_style: TextStyle,
}

#[derive(Debug, Default, Deserialize)]
struct TextStyle {
    #[serde(default)]
    bold: bool,
    #[serde(default)]
    italic: bool,
    #[serde(default)]
    underline: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineObjectElement {
    inline_object_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    #[serde(default)]
    table_rows: Vec<TableRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableRow {
    #[serde(default)]
    table_cells: Vec<TableCell>,
}

#[derive(Debug, Default, Deserialize)]
struct TableCell {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineObject {
    inline_object_properties: Option<InlineObjectProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineObjectProperties {
    embedded_object: Option<EmbeddedObject>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmbeddedObject {
    image_properties: Option<ImageProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageProperties {
    content_uri: Option<String>,
}

fn named_style_level(style: &str) -> Option<u8> {
    match style {
        "TITLE" => Some(1),
        "SUBTITLE" => Some(2),
        _ => style
            .strip_prefix("HEADING_")
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| (1..=6).contains(n)),
    }
}

struct Rendered {
    chapters: Vec<String>,
    /// Inline object ids in first-seen order.
    inline_objects: Vec<String>,
}

#[derive(Default)]
struct Renderer {
    segmenter: Segmenter,
    inline_objects: Vec<String>,
}

fn render_document(document: &GDocument) -> Rendered {
    let mut renderer = Renderer::default();
    renderer.elements(&document.body.content, false);
    Rendered {
        chapters: renderer.segmenter.finish(),
        inline_objects: renderer.inline_objects,
    }
}

impl Renderer {
    fn elements(&mut self, elements: &[StructuralElement], in_table: bool) {
        for element in elements {
            if let Some(paragraph) = &element.paragraph {
                self.paragraph(paragraph, in_table);
            }
            if let Some(table) = &element.table {
                self.table(table);
            }
        }
    }

    fn table(&mut self, table: &Table) {
        self.segmenter.push("<table>");
        for row in &table.table_rows {
            self.segmenter.push("<tr>");
            for cell in &row.table_cells {
                self.segmenter.push("<td>");
                self.elements(&cell.content, true);
                self.segmenter.push("</td>");
            }
            self.segmenter.push("</tr>");
        }
        self.segmenter.push("</table>");
    }

    fn paragraph(&mut self, paragraph: &Paragraph, in_table: bool) {
        let mut html = String::new();
        for element in &paragraph.elements {
            if let Some(run) = &element.text_run {
                let text = run.content.trim_end_matches('\n');
                let escaped = escape_text(text).replace('\u{000b}', "<br/>");
                html.push_str(&wrap_styles(
                    escaped,
                    run.text_style.bold,
                    run.text_style.italic,
                    run.text_style.underline,
                ));
            }
            if let Some(object) = &element.inline_object_element {
                let reference = inline_reference(&object.inline_object_id);
                html.push_str(&format!(r#"<img src="{}" alt=""/>"#, escape_text(&reference)));
                if !self.inline_objects.contains(&object.inline_object_id) {
                    self.inline_objects.push(object.inline_object_id.clone());
                }
            }
        }

        if html.trim().is_empty() {
            return;
        }

        let level = paragraph
            .paragraph_style
            .as_ref()
            .and_then(|s| s.named_style_type.as_deref())
            .and_then(named_style_level);
        if level == Some(1) && !in_table {
            self.segmenter.break_chapter();
        }
        let tag = match level {
            Some(n) => format!("h{}", n),
            None => "p".to_string(),
        };
        self.segmenter.push(&format!("<{tag}>{}</{tag}>", html));
    }
}
