pub mod test_helpers {
    use crate::book::{Book, Dir, PageSpread, Rendition, Section, ViewportHint};
    use crate::geometry::Size;
    use crate::progress::TocItem;

    /// Viewport that fits four lines per page with the default style.
    pub const SMALL_VIEWPORT: Size = Size::new(400.0, 200.0);

    /// Body markup with `count` one-line paragraphs `p0`, `p1`, ...
    pub fn paragraphs(count: usize) -> String {
        let body: String = (0..count)
            .map(|i| format!("<p id=\"p{i}\">Paragraph {i} of the chapter.</p>"))
            .collect();
        format!("<html><head><title>t</title></head><body>{body}</body></html>")
    }

    /// An SVG page with the given intrinsic size.
    pub fn svg_page(width: u32, height: u32) -> String {
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 {width} {height}\">\
             <text x=\"10\" y=\"20\">page</text></svg>"
        )
    }

    /// Builder for books used across unit and integration tests
    pub struct BookBuilder {
        sections: Vec<Section>,
        toc: Vec<TocItem>,
        page_list: Vec<TocItem>,
        dir: Dir,
        rendition: Rendition,
        language: Option<String>,
    }

    impl Default for BookBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl BookBuilder {
        pub fn new() -> Self {
            Self {
                sections: Vec::new(),
                toc: Vec::new(),
                page_list: Vec::new(),
                dir: Dir::Ltr,
                rendition: Rendition::default(),
                language: None,
            }
        }

        /// Adds a section with id `s{n}.xhtml`.
        pub fn section(mut self, markup: impl Into<String>) -> Self {
            let id = format!("s{}.xhtml", self.sections.len());
            self.sections.push(Section::html(id, markup));
            self
        }

        pub fn sections(mut self, count: usize, paragraphs_each: usize) -> Self {
            for _ in 0..count {
                self = self.section(paragraphs(paragraphs_each));
            }
            self
        }

        /// Adds a section whose progress weight is `size`.
        pub fn sized(mut self, size: u64) -> Self {
            let id = format!("s{}.xhtml", self.sections.len());
            self.sections
                .push(Section::html(id, paragraphs(2)).with_size(size));
            self
        }

        pub fn non_linear(mut self, markup: impl Into<String>) -> Self {
            let id = format!("s{}.xhtml", self.sections.len());
            self.sections.push(Section::html(id, markup).non_linear());
            self
        }

        /// Adds a fixed-layout page.
        pub fn page(mut self, spread: Option<PageSpread>) -> Self {
            let id = format!("p{}.svg", self.sections.len());
            let mut section = Section::html(id, svg_page(600, 800));
            section.page_spread = spread;
            self.sections.push(section);
            self.rendition.layout = Some("pre-paginated".into());
            self
        }

        pub fn push(mut self, section: Section) -> Self {
            self.sections.push(section);
            self
        }

        pub fn toc(mut self, toc: Vec<TocItem>) -> Self {
            self.toc = toc;
            self
        }

        pub fn page_list(mut self, page_list: Vec<TocItem>) -> Self {
            self.page_list = page_list;
            self
        }

        pub fn rtl(mut self) -> Self {
            self.dir = Dir::Rtl;
            self
        }

        pub fn spread(mut self, spread: &str) -> Self {
            self.rendition.spread = Some(spread.to_string());
            self
        }

        pub fn viewport(mut self, viewport: ViewportHint) -> Self {
            self.rendition.viewport = Some(viewport);
            self
        }

        pub fn language(mut self, language: &str) -> Self {
            self.language = Some(language.to_string());
            self
        }

        pub fn build(self) -> Book {
            let mut book = Book::new(self.sections)
                .with_toc(self.toc)
                .with_page_list(self.page_list)
                .with_dir(self.dir)
                .with_rendition(self.rendition);
            book.metadata.title = "Test Book".to_string();
            book.metadata.language = self.language;
            book
        }
    }
}
