//! Reflow engine.
//!
//! Lays a section document out into line boxes so the renderers can answer the
//! questions a browser would: which page shows a given point, which content is
//! visible on a page, and where the client rects of a range are. Text is broken
//! into word fragments and wrapped with textwrap's first-fit algorithm; widths
//! come from `unicode-width` scaled to the font size.
//!
//! All rects are in *content* coordinates. In paginated flow page `p` covers
//! `x ∈ [p * width, (p + 1) * width)`; in scrolled flow it covers
//! `y ∈ [p * height, (p + 1) * height)`.

use std::cmp::Ordering;

use log::debug;
use serde::{Deserialize, Serialize};
use textwrap::core::Fragment;
use textwrap::wrap_algorithms::wrap_first_fit;
use unicode_width::UnicodeWidthChar;

use crate::dom::{Document, NodeId, Point, Range};
use crate::geometry::{Rect, Size};

/// Advance of one narrow character as a fraction of the font size; wide
/// characters take two.
const ADVANCE_RATIO: f64 = 0.5;
const DEFAULT_IMAGE_SIZE: f64 = 100.0;
const EPSILON: f64 = 1e-6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    #[default]
    Paginated,
    Scrolled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutStyle {
    pub flow: Flow,
    /// Font size in px.
    pub font_size: f64,
    /// Line height as a multiple of the font size.
    pub line_height: f64,
    /// Column gap as a fraction of the viewport width.
    pub gap: f64,
    /// Block margin in px.
    pub margin: f64,
    pub max_inline_size: f64,
    pub max_block_size: f64,
    pub max_column_count: usize,
}

impl Default for LayoutStyle {
    fn default() -> Self {
        Self {
            flow: Flow::Paginated,
            font_size: 16.0,
            line_height: 1.4,
            gap: 0.06,
            margin: 48.0,
            max_inline_size: 720.0,
            max_block_size: 1440.0,
            max_column_count: 2,
        }
    }
}

impl LayoutStyle {
    fn line_box_height(&self) -> f64 {
        self.font_size * self.line_height
    }

    fn char_advance(&self, c: char) -> f64 {
        c.width().unwrap_or(0) as f64 * self.font_size * ADVANCE_RATIO
    }
}

#[derive(Clone, Debug)]
struct Word {
    node: NodeId,
    start: usize,
    end: usize,
    width: f64,
    space: f64,
}

impl Fragment for Word {
    fn width(&self) -> f64 {
        self.width
    }

    fn whitespace_width(&self) -> f64 {
        self.space
    }

    fn penalty_width(&self) -> f64 {
        0.0
    }
}

enum Block {
    Text(Vec<Word>),
    Image { node: NodeId, width: f64, height: f64 },
}

#[derive(Clone, Debug, PartialEq)]
enum Item {
    Text {
        node: NodeId,
        start: usize,
        end: usize,
        rect: Rect,
    },
    Image {
        node: NodeId,
        rect: Rect,
    },
}

impl Item {
    fn rect(&self) -> Rect {
        match self {
            Item::Text { rect, .. } | Item::Image { rect, .. } => *rect,
        }
    }

    fn start_point(&self, doc: &Document) -> Option<Point> {
        match self {
            Item::Text { node, start, .. } => Some(Point::new(*node, *start)),
            Item::Image { node, .. } => Point::before(doc, *node),
        }
    }

    fn end_point(&self, doc: &Document) -> Option<Point> {
        match self {
            Item::Text { node, end, .. } => Some(Point::new(*node, *end)),
            Item::Image { node, .. } => Point::after(doc, *node),
        }
    }
}

#[derive(Clone, Debug)]
struct Line {
    page: usize,
    items: Vec<Item>,
}

/// A laid out section.
#[derive(Clone, Debug)]
pub struct Layout {
    style: LayoutStyle,
    viewport: Size,
    columns_per_view: usize,
    column_width: f64,
    column_height: f64,
    lines: Vec<Line>,
    page_count: usize,
    content_extent: f64,
}

impl Layout {
    pub fn new(doc: &Document, style: &LayoutStyle, viewport: Size) -> Self {
        let width = viewport.width.max(1.0);
        let height = viewport.height.max(1.0);
        let line_height = style.line_box_height();

        let (columns_per_view, column_width, column_height) = match style.flow {
            Flow::Paginated => {
                let divisor = (width / style.max_inline_size.max(1.0)).ceil() as usize;
                let cols = divisor.clamp(1, style.max_column_count.max(1));
                let slot = width / cols as f64;
                let column_width = (slot - style.gap * width).min(style.max_inline_size);
                let column_height =
                    (height - 2.0 * style.margin).min(style.max_block_size).max(line_height);
                (cols, column_width.max(style.font_size), column_height)
            }
            Flow::Scrolled => {
                let column_width = (width - 2.0 * style.margin).min(style.max_inline_size);
                (1, column_width.max(style.font_size), f64::INFINITY)
            }
        };

        let mut layout = Self {
            style: style.clone(),
            viewport: Size::new(width, height),
            columns_per_view,
            column_width,
            column_height,
            lines: Vec::new(),
            page_count: 1,
            content_extent: 0.0,
        };
        let blocks = collect_blocks(doc, style);
        layout.place(blocks);
        debug!(
            "Laid out {} lines over {} pages ({} columns per view)",
            layout.lines.len(),
            layout.page_count,
            layout.columns_per_view
        );
        layout
    }

    fn place(&mut self, blocks: Vec<Block>) {
        let style = self.style.clone();
        let line_height = style.line_box_height();
        let slot = self.viewport.width / self.columns_per_view as f64;
        let scrolled_left = (self.viewport.width - self.column_width) / 2.0;
        let column_height = self.column_height;
        let paginated = style.flow == Flow::Paginated;

        let mut column = 0usize;
        let mut cursor = 0.0f64;

        // Reserves `height` in the current column, breaking to the next one
        // when a paginated column is full. Returns the top of the box.
        let allocate = move |height: f64, column: &mut usize, cursor: &mut f64| -> f64 {
            if paginated && *cursor > 0.0 && *cursor + height > column_height + EPSILON {
                *column += 1;
                *cursor = 0.0;
            }
            let top = *cursor;
            *cursor += height;
            top
        };

        let mut lines = Vec::new();
        for block in blocks {
            match block {
                Block::Text(words) => {
                    for line in wrap_first_fit(&words, &[self.column_width]) {
                        let top = allocate(line_height, &mut column, &mut cursor);
                        let (origin_x, origin_y, page) =
                            self.origin(column, top, slot, scrolled_left);
                        let mut x = 0.0;
                        let mut items = Vec::with_capacity(line.len());
                        for word in line {
                            items.push(Item::Text {
                                node: word.node,
                                start: word.start,
                                end: word.end,
                                rect: Rect::new(origin_x + x, origin_y, word.width, line_height),
                            });
                            x += word.width + word.space;
                        }
                        lines.push(Line { page, items });
                    }
                }
                Block::Image {
                    node,
                    width,
                    height,
                } => {
                    let mut scale = (self.column_width / width).min(1.0);
                    if style.flow == Flow::Paginated {
                        scale = scale.min(self.column_height / height);
                    }
                    let (width, height) = (width * scale, height * scale);
                    let top = allocate(height, &mut column, &mut cursor);
                    let (origin_x, origin_y, page) = self.origin(column, top, slot, scrolled_left);
                    lines.push(Line {
                        page,
                        items: vec![Item::Image {
                            node,
                            rect: Rect::new(origin_x, origin_y, width, height),
                        }],
                    });
                }
            }
        }
        self.page_count = match style.flow {
            Flow::Paginated => column / self.columns_per_view + 1,
            Flow::Scrolled => ((cursor + 2.0 * style.margin) / self.viewport.height - EPSILON)
                .ceil()
                .max(1.0) as usize,
        };
        self.content_extent = match style.flow {
            Flow::Paginated => self.page_count as f64 * self.viewport.width,
            Flow::Scrolled => cursor + 2.0 * style.margin,
        };
        self.lines = lines;
    }

    fn origin(&self, column: usize, top: f64, slot: f64, scrolled_left: f64) -> (f64, f64, usize) {
        match self.style.flow {
            Flow::Paginated => {
                let page = column / self.columns_per_view;
                let in_view = column % self.columns_per_view;
                let left = page as f64 * self.viewport.width
                    + in_view as f64 * slot
                    + (slot - self.column_width) / 2.0;
                (left, self.style.margin + top, page)
            }
            Flow::Scrolled => {
                let y = self.style.margin + top;
                let page = (y / self.viewport.height).floor() as usize;
                (scrolled_left, y, page)
            }
        }
    }

    pub fn style(&self) -> &LayoutStyle {
        &self.style
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn columns_per_view(&self) -> usize {
        self.columns_per_view
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Total scrollable length along the flow axis.
    pub fn scroll_extent(&self) -> f64 {
        self.content_extent
    }

    /// The window of content coordinates shown when `page` is current.
    pub fn view_rect(&self, page: usize) -> Rect {
        let Size { width, height } = self.viewport;
        match self.style.flow {
            Flow::Paginated => Rect::new(page as f64 * width, 0.0, width, height),
            Flow::Scrolled => Rect::new(0.0, page as f64 * height, width, height),
        }
    }

    /// Client rects covered by `range`, one per line fragment.
    pub fn rects_for_range(&self, doc: &Document, range: &Range) -> Vec<Rect> {
        let mut rects = Vec::new();
        for line in &self.lines {
            let mut run: Option<Rect> = None;
            for item in &line.items {
                let rect = match item {
                    Item::Text {
                        node,
                        start,
                        end,
                        rect,
                    } => self.text_rect(doc, range, *node, *start, *end, *rect),
                    Item::Image { node, rect } => {
                        range.intersects_node(doc, *node).then_some(*rect)
                    }
                };
                match (rect, run) {
                    (Some(rect), Some(current)) => {
                        run = Some(Rect::new(
                            current.left,
                            current.top,
                            rect.right() - current.left,
                            current.height.max(rect.height),
                        ));
                    }
                    (Some(rect), None) => run = Some(rect),
                    (None, Some(current)) => {
                        rects.push(current);
                        run = None;
                    }
                    (None, None) => {}
                }
            }
            rects.extend(run);
        }
        rects
    }

    fn text_rect(
        &self,
        doc: &Document,
        range: &Range,
        node: NodeId,
        start: usize,
        end: usize,
        rect: Rect,
    ) -> Option<Rect> {
        let (lo, hi) = node_span(doc, range, node)?;
        let from = start.max(lo);
        let to = end.min(hi);
        if from >= to {
            return None;
        }
        let text = doc.text(node)?;
        let mut x = rect.left;
        let mut left = x;
        for (i, c) in text.chars().enumerate().take(to).skip(start) {
            if i == from {
                left = x;
            }
            x += self.style.char_advance(c);
        }
        Some(Rect::new(left, rect.top, x - left, rect.height))
    }

    /// Page showing `point`, or the last page when the point lies after all
    /// laid out content.
    pub fn page_of_point(&self, doc: &Document, point: Point) -> usize {
        for line in &self.lines {
            for item in &line.items {
                let Some(end) = item.end_point(doc) else {
                    continue;
                };
                if doc.compare_points(end, point) != Ordering::Less {
                    return line.page;
                }
            }
        }
        self.page_count.saturating_sub(1)
    }

    pub fn page_of_range(&self, doc: &Document, range: &Range) -> usize {
        self.page_of_point(doc, range.start)
    }

    pub fn page_of_node(&self, doc: &Document, node: NodeId) -> usize {
        match Point::before(doc, node) {
            Some(point) => self.page_of_point(doc, point),
            None => 0,
        }
    }

    /// Range from the first to the last content shown on `page`.
    pub fn visible_range(&self, doc: &Document, page: usize) -> Option<Range> {
        let mut items = self
            .lines
            .iter()
            .filter(|line| line.page == page)
            .flat_map(|line| line.items.iter());
        let first = items.next()?;
        let last = items.last().unwrap_or(first);
        Some(Range::new(first.start_point(doc)?, last.end_point(doc)?))
    }

    /// Every rect laid out on `page`, used for hit-testing content.
    pub fn rects_on_page(&self, page: usize) -> Vec<Rect> {
        self.lines
            .iter()
            .filter(|line| line.page == page)
            .flat_map(|line| line.items.iter().map(Item::rect))
            .collect()
    }
}

/// The char span of `node` that `range` covers.
fn node_span(doc: &Document, range: &Range, node: NodeId) -> Option<(usize, usize)> {
    let len = doc.node_length(node);
    let lo = if range.start.node == node {
        range.start.offset
    } else if doc.compare_points(Point::new(node, 0), range.start) != Ordering::Less {
        0
    } else {
        return None;
    };
    let hi = if range.end.node == node {
        range.end.offset
    } else if doc.compare_points(Point::new(node, len), range.end) != Ordering::Greater {
        len
    } else {
        return None;
    };
    Some((lo, hi))
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "address"
            | "article"
            | "aside"
            | "blockquote"
            | "body"
            | "dd"
            | "div"
            | "dl"
            | "dt"
            | "figcaption"
            | "figure"
            | "footer"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "header"
            | "hr"
            | "li"
            | "main"
            | "nav"
            | "ol"
            | "p"
            | "pre"
            | "section"
            | "table"
            | "td"
            | "th"
            | "tr"
            | "ul"
    )
}

fn is_hidden(name: &str) -> bool {
    matches!(
        name,
        "head" | "script" | "style" | "title" | "template" | "noscript"
    )
}

fn parse_length(value: Option<&str>) -> Option<f64> {
    value?
        .trim()
        .trim_end_matches("px")
        .parse::<f64>()
        .ok()
        .filter(|v| *v > 0.0)
}

struct BlockCollector<'a> {
    style: &'a LayoutStyle,
    blocks: Vec<Block>,
    words: Vec<Word>,
}

impl BlockCollector<'_> {
    fn flush(&mut self) {
        if !self.words.is_empty() {
            self.blocks.push(Block::Text(std::mem::take(&mut self.words)));
        }
    }

    fn visit(&mut self, doc: &Document, node: NodeId) {
        if let Some(text) = doc.text(node) {
            self.push_text(node, text);
            return;
        }
        let Some(name) = doc.local_name(node) else {
            for &child in doc.children(node) {
                self.visit(doc, child);
            }
            return;
        };
        if is_hidden(name) {
            return;
        }
        match name {
            "img" | "image" => {
                self.flush();
                let width = parse_length(doc.attr(node, "width")).unwrap_or(DEFAULT_IMAGE_SIZE);
                let height = parse_length(doc.attr(node, "height")).unwrap_or(DEFAULT_IMAGE_SIZE);
                self.blocks.push(Block::Image {
                    node,
                    width,
                    height,
                });
            }
            "br" => self.flush(),
            _ => {
                let block = is_block(name);
                if block {
                    self.flush();
                }
                for &child in doc.children(node) {
                    self.visit(doc, child);
                }
                if block {
                    self.flush();
                }
            }
        }
    }

    fn push_text(&mut self, node: NodeId, text: &str) {
        let space = self.style.char_advance(' ');
        let mut start: Option<usize> = None;
        let mut width = 0.0;
        let mut count = 0;
        for (i, c) in text.chars().enumerate() {
            count = i + 1;
            if c.is_whitespace() {
                if let Some(s) = start.take() {
                    self.words.push(Word {
                        node,
                        start: s,
                        end: i,
                        width,
                        space,
                    });
                } else if let Some(last) = self.words.last_mut() {
                    last.space = space;
                }
                width = 0.0;
            } else {
                start.get_or_insert(i);
                width += self.style.char_advance(c);
            }
        }
        if let Some(s) = start {
            self.words.push(Word {
                node,
                start: s,
                end: count,
                width,
                space: 0.0,
            });
        }
    }
}

fn collect_blocks(doc: &Document, style: &LayoutStyle) -> Vec<Block> {
    let mut collector = BlockCollector {
        style,
        blocks: Vec::new(),
        words: Vec::new(),
    };
    if let Some(root) = doc.body() {
        collector.visit(doc, root);
    }
    collector.flush();
    collector.blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_html;

    fn style() -> LayoutStyle {
        LayoutStyle {
            margin: 0.0,
            gap: 0.0,
            max_column_count: 1,
            max_inline_size: 1000.0,
            ..LayoutStyle::default()
        }
    }

    fn paragraphs(count: usize) -> Document {
        let body: String = (0..count)
            .map(|i| format!("<p id=\"p{i}\">paragraph number {i} with a few words</p>"))
            .collect();
        parse_html(&format!("<html><body>{body}</body></html>")).unwrap()
    }

    #[test]
    fn test_words_wrap_to_column_width() {
        // 8px per ascii char; a 100px column holds 12 chars
        let doc = parse_html("<p>aaaa bbbb cccc dddd</p>").unwrap();
        let layout = Layout::new(&doc, &style(), Size::new(100.0, 1000.0));
        assert_eq!(layout.line_count(), 2);
        assert_eq!(layout.page_count(), 1);
    }

    #[test]
    fn test_lines_flow_into_pages() {
        let doc = paragraphs(40);
        // 22.4px lines, 224px columns -> 10 lines per page
        let layout = Layout::new(&doc, &style(), Size::new(1000.0, 224.0));
        assert_eq!(layout.line_count(), 40);
        assert_eq!(layout.page_count(), 4);

        let p25 = doc.element_by_id("p25").unwrap();
        assert_eq!(layout.page_of_node(&doc, p25), 2);
    }

    #[test]
    fn test_visible_range_covers_page_content() {
        let doc = paragraphs(40);
        let layout = Layout::new(&doc, &style(), Size::new(1000.0, 224.0));
        let range = layout.visible_range(&doc, 1).unwrap();
        let text = range.to_text(&doc);
        assert!(text.starts_with("paragraph number 10"));
        assert!(text.ends_with("few words"));
        assert!(layout.visible_range(&doc, 9).is_none());
    }

    #[test]
    fn test_rects_for_partial_range() {
        let doc = parse_html("<p>hello world</p>").unwrap();
        let layout = Layout::new(&doc, &style(), Size::new(1000.0, 1000.0));
        let text = doc.descendants(doc.root()).find(|&n| doc.is_text(n)).unwrap();
        let range = Range::new(Point::new(text, 6), Point::new(text, 11));
        let rects = layout.rects_for_range(&doc, &range);
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].left, 48.0);
        assert_eq!(rects[0].width, 40.0);
    }

    #[test]
    fn test_adjacent_words_merge_into_one_rect() {
        let doc = parse_html("<p>one two three</p>").unwrap();
        let layout = Layout::new(&doc, &style(), Size::new(1000.0, 1000.0));
        let p = doc.first_element_by_name("p").unwrap();
        let rects = layout.rects_for_range(&doc, &Range::select_node_contents(&doc, p));
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].width, 13.0 * 8.0);
    }

    #[test]
    fn test_two_columns_per_view() {
        let style = LayoutStyle {
            max_column_count: 2,
            max_inline_size: 400.0,
            ..style()
        };
        let doc = paragraphs(40);
        let layout = Layout::new(&doc, &style, Size::new(800.0, 224.0));
        assert_eq!(layout.columns_per_view(), 2);
        assert_eq!(layout.page_count(), 2);
    }

    #[test]
    fn test_scrolled_flow_extent() {
        let style = LayoutStyle {
            flow: Flow::Scrolled,
            ..style()
        };
        let doc = paragraphs(40);
        let layout = Layout::new(&doc, &style, Size::new(1000.0, 224.0));
        assert!((layout.scroll_extent() - 40.0 * 22.4).abs() < 1e-6);
        assert_eq!(layout.page_count(), 4);
        assert_eq!(layout.view_rect(2).top, 448.0);
    }

    #[test]
    fn test_images_scale_to_column() {
        let doc = parse_html(r#"<body><img src="a.png" width="2000" height="1000"/></body>"#)
            .unwrap();
        let layout = Layout::new(&doc, &style(), Size::new(1000.0, 1000.0));
        let img = doc.first_element_by_name("img").unwrap();
        let rects = layout.rects_for_range(&doc, &Range::select_node(&doc, img).unwrap());
        assert_eq!(rects.len(), 1);
        assert_eq!(rects[0].width, 1000.0);
        assert_eq!(rects[0].height, 500.0);
    }
}
