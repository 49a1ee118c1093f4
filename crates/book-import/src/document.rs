//! In-memory result of parsing a source document.

/// An image pulled out of a source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedImage {
    /// The reference exactly as it appears inside the chapter markup.
    pub original_reference: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Normalized document produced by a format parser and consumed by the
/// assembler within one job execution. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDocument {
    pub title: String,
    pub description: Option<String>,
    /// XHTML fragments in source order.
    pub chapters: Vec<String>,
    /// Unique by `original_reference`.
    pub images: Vec<ExtractedImage>,
    /// References present in the markup whose bytes could not be extracted.
    pub unresolved_references: Vec<String>,
}

impl ParsedDocument {
    pub fn image(&self, reference: &str) -> Option<&ExtractedImage> {
        self.images
            .iter()
            .find(|img| img.original_reference == reference)
    }

    /// Adds an image unless one with the same reference is already present.
    pub fn push_image(&mut self, image: ExtractedImage) -> bool {
        if self.image(&image.original_reference).is_some() {
            return false;
        }
        self.images.push(image);
        true
    }

    pub fn push_unresolved(&mut self, reference: String) {
        if !self.unresolved_references.contains(&reference) {
            self.unresolved_references.push(reference);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(reference: &str) -> ExtractedImage {
        ExtractedImage {
            original_reference: reference.to_string(),
            bytes: vec![1, 2, 3],
            mime_type: "image/png".to_string(),
        }
    }

    #[test]
    fn test_push_image_keeps_references_unique() {
        let mut doc = ParsedDocument::default();
        assert!(doc.push_image(image("OEBPS/a.png")));
        assert!(!doc.push_image(image("OEBPS/a.png")));
        assert!(doc.push_image(image("OEBPS/b.png")));
        assert_eq!(doc.images.len(), 2);
        assert!(doc.image("OEBPS/b.png").is_some());
    }

    #[test]
    fn test_push_unresolved_dedupes() {
        let mut doc = ParsedDocument::default();
        doc.push_unresolved("x.png".to_string());
        doc.push_unresolved("x.png".to_string());
        assert_eq!(doc.unresolved_references, vec!["x.png"]);
    }
}
