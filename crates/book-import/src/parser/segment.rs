/// Accumulates XHTML blocks into chapters, splitting at top-level headings.
#[derive(Debug, Default)]
pub struct Segmenter {
    chapters: Vec<String>,
    current: String,
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: &str) {
        if !self.current.is_empty() {
            self.current.push('\n');
        }
        self.current.push_str(block);
    }

    /// Starts a new chapter. Content collected so far becomes its own
    /// chapter unless it is empty.
    pub fn break_chapter(&mut self) {
        if !self.current.trim().is_empty() {
            self.chapters.push(std::mem::take(&mut self.current));
        }
        self.current.clear();
    }

    pub fn finish(mut self) -> Vec<String> {
        self.break_chapter();
        self.chapters
    }
}

/// Wraps inline markup in the emphasis tags for the given run style.
pub fn wrap_styles(html: String, bold: bool, italic: bool, underline: bool) -> String {
    if html.is_empty() {
        return html;
    }
    let mut html = html;
    if underline {
        html = format!("<u>{}</u>", html);
    }
    if italic {
        html = format!("<em>{}</em>", html);
    }
    if bold {
        html = format!("<strong>{}</strong>", html);
    }
    html
}
