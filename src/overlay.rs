//! Keyed vector overlays (highlights, search hits) anchored to ranges.
//!
//! Entries keep their live [`Range`] and only cache the rectangles, so a
//! reflow is handled by [`Overlayer::redraw`] against the new geometry.

use std::fmt;
use std::rc::Rc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::dom::{Document, Range};
use crate::geometry::Rect;

/// Supplies client rectangles for ranges of one section document.
pub trait RangeGeometry {
    fn document(&self) -> &Document;
    fn client_rects(&self, range: &Range) -> Vec<Rect>;
}

/// A minimal SVG element tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SvgElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<SvgElement>,
}

impl SvgElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, key: &str, value: impl ToString) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn set_attr(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key.to_string(), value)),
        }
    }

    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(mut self, child: SvgElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn to_svg(&self) -> String {
        let mut out = String::new();
        self.write_svg(&mut out);
        out
    }

    fn write_svg(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.tag);
        for (key, value) in &self.attrs {
            out.push_str(&format!(" {key}=\"{}\"", escape_attr(value)));
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write_svg(out);
        }
        out.push_str(&format!("</{}>", self.tag));
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<f64>,
    /// `vertical-rl` / `vertical-lr` turn line decorations sideways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writing_mode: Option<String>,
}

impl DrawOptions {
    pub fn color(color: impl Into<String>) -> Self {
        Self {
            color: Some(color.into()),
            ..Default::default()
        }
    }

    fn is_vertical(&self) -> bool {
        self.writing_mode
            .as_deref()
            .is_some_and(|mode| mode.starts_with("vertical"))
    }
}

pub type DrawFn = Rc<dyn Fn(&[Rect], &DrawOptions) -> SvgElement>;

/// A range given directly, or resolved lazily against the document when the
/// entry is added.
pub enum RangeSource {
    Range(Range),
    Lazy(Box<dyn Fn(&Document) -> Option<Range>>),
}

impl From<Range> for RangeSource {
    fn from(range: Range) -> Self {
        Self::Range(range)
    }
}

struct Entry {
    range: Range,
    draw: DrawFn,
    options: DrawOptions,
    element: SvgElement,
    rects: Vec<Rect>,
}

/// One overlay surface per section document.
#[derive(Default)]
pub struct Overlayer {
    entries: Vec<(String, Entry)>,
}

impl fmt::Debug for Overlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlayer")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Overlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry for `key`. A lazy range that cannot be
    /// resolved leaves the overlay without an entry for `key`.
    pub fn add(
        &mut self,
        key: &str,
        range: RangeSource,
        draw: DrawFn,
        options: DrawOptions,
        geometry: &dyn RangeGeometry,
    ) -> bool {
        self.remove(key);
        let range = match range {
            RangeSource::Range(range) => range,
            RangeSource::Lazy(resolve) => match resolve(geometry.document()) {
                Some(range) => range,
                None => {
                    debug!("Overlay range for {key} did not resolve; skipping");
                    return false;
                }
            },
        };
        let rects = geometry.client_rects(&range);
        let element = draw(&rects, &options);
        self.entries.push((
            key.to_string(),
            Entry {
                range,
                draw,
                options,
                element,
                rects,
            },
        ));
        true
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    /// Recomputes every entry's rectangles and drawing after a reflow.
    pub fn redraw(&mut self, geometry: &dyn RangeGeometry) {
        for (_, entry) in &mut self.entries {
            entry.rects = geometry.client_rects(&entry.range);
            entry.element = (entry.draw)(&entry.rects, &entry.options);
        }
    }

    /// Topmost entry whose rectangles contain the point.
    pub fn hit_test(&self, x: f64, y: f64) -> Option<(&str, Range)> {
        self.entries
            .iter()
            .rev()
            .find(|(_, entry)| entry.rects.iter().any(|r| r.contains(x, y)))
            .map(|(key, entry)| (key.as_str(), entry.range))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn range_of(&self, key: &str) -> Option<Range> {
        self.find(key).map(|e| e.range)
    }

    pub fn rects_of(&self, key: &str) -> Option<&[Rect]> {
        self.find(key).map(|e| e.rects.as_slice())
    }

    pub fn element_of(&self, key: &str) -> Option<&SvgElement> {
        self.find(key).map(|e| &e.element)
    }

    fn find(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    /// The surface as an absolutely positioned, click-through `<svg>`.
    pub fn element(&self) -> SvgElement {
        let mut svg = SvgElement::new("svg")
            .attr("xmlns", "http://www.w3.org/2000/svg")
            .attr(
                "style",
                "position: absolute; top: 0; left: 0; width: 100%; height: 100%; pointer-events: none",
            );
        svg.children = self.entries.iter().map(|(_, e)| e.element.clone()).collect();
        svg
    }

    pub fn to_svg(&self) -> String {
        self.element().to_svg()
    }
}

fn rect_element(rect: &Rect) -> SvgElement {
    SvgElement::new("rect")
        .attr("x", rect.left)
        .attr("y", rect.top)
        .attr("height", rect.height)
        .attr("width", rect.width)
}

pub fn highlight(rects: &[Rect], options: &DrawOptions) -> SvgElement {
    let color = options.color.as_deref().unwrap_or("red");
    let mut g = SvgElement::new("g").attr("fill", color).attr(
        "style",
        "opacity: var(--overlayer-highlight-opacity, .3); \
         mix-blend-mode: var(--overlayer-highlight-blend-mode, normal)",
    );
    g.children = rects.iter().map(rect_element).collect();
    g
}

pub fn outline(rects: &[Rect], options: &DrawOptions) -> SvgElement {
    let color = options.color.as_deref().unwrap_or("blue");
    let width = options.width.unwrap_or(2.0);
    let mut g = SvgElement::new("g")
        .attr("stroke", color)
        .attr("stroke-width", width)
        .attr("fill", "none");
    g.children = rects.iter().map(rect_element).collect();
    g
}

pub fn underline(rects: &[Rect], options: &DrawOptions) -> SvgElement {
    let color = options.color.as_deref().unwrap_or("red");
    let stroke = options.width.unwrap_or(2.0);
    let padding = options.padding.unwrap_or(0.0);
    let mut g = SvgElement::new("g").attr("fill", color);
    g.children = rects
        .iter()
        .map(|r| {
            let bar = if options.is_vertical() {
                Rect::new(r.left - stroke / 2.0 - padding, r.top, stroke, r.height)
            } else {
                Rect::new(r.left, r.bottom() - stroke / 2.0 + padding, r.width, stroke)
            };
            rect_element(&bar)
        })
        .collect();
    g
}

pub fn strikethrough(rects: &[Rect], options: &DrawOptions) -> SvgElement {
    let color = options.color.as_deref().unwrap_or("red");
    let stroke = options.width.unwrap_or(2.0);
    let mut g = SvgElement::new("g").attr("fill", color);
    g.children = rects
        .iter()
        .map(|r| {
            let bar = if options.is_vertical() {
                Rect::new(r.left + r.width / 2.0 - stroke / 2.0, r.top, stroke, r.height)
            } else {
                Rect::new(r.left, r.top + r.height / 2.0 - stroke / 2.0, r.width, stroke)
            };
            rect_element(&bar)
        })
        .collect();
    g
}

pub fn squiggly(rects: &[Rect], options: &DrawOptions) -> SvgElement {
    let color = options.color.as_deref().unwrap_or("red");
    let stroke = options.width.unwrap_or(2.0);
    let block = stroke * 1.5;
    let wave = stroke * 3.0;
    let mut g = SvgElement::new("g")
        .attr("fill", "none")
        .attr("stroke", color)
        .attr("stroke-width", stroke);
    g.children = rects
        .iter()
        .map(|r| {
            let vertical = options.is_vertical();
            let length = if vertical { r.height } else { r.width };
            let n = ((length / wave / 1.5).round() as usize).max(1);
            let step = length / n as f64;
            let points: Vec<String> = (0..n)
                .flat_map(|i| {
                    let a = step * i as f64;
                    let b = a + step / 2.0;
                    if vertical {
                        let x = r.left - block / 2.0;
                        [
                            format!("{},{}", x + block, r.top + a),
                            format!("{},{}", x, r.top + b),
                        ]
                    } else {
                        [
                            format!("{},{}", r.left + a, r.bottom() - block),
                            format!("{},{}", r.left + b, r.bottom()),
                        ]
                    }
                })
                .collect();
            SvgElement::new("polyline").attr("points", points.join(" "))
        })
        .collect();
    g
}

/// Built-in draw function by name.
pub fn draw_fn(name: &str) -> Option<DrawFn> {
    let draw: DrawFn = match name {
        "highlight" => Rc::new(highlight),
        "outline" => Rc::new(outline),
        "underline" => Rc::new(underline),
        "strikethrough" => Rc::new(strikethrough),
        "squiggly" => Rc::new(squiggly),
        _ => return None,
    };
    Some(draw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{NodeId, Point, parse_html};

    /// Lays every text node out as one 10px-tall row, 10px per character.
    struct RowGeometry {
        doc: Document,
        scale: f64,
    }

    impl RangeGeometry for RowGeometry {
        fn document(&self) -> &Document {
            &self.doc
        }

        fn client_rects(&self, range: &Range) -> Vec<Rect> {
            let texts: Vec<NodeId> = self
                .doc
                .descendants(self.doc.root())
                .filter(|&n| self.doc.is_text(n))
                .collect();
            range
                .text_nodes(&self.doc)
                .into_iter()
                .map(|node| {
                    let row = texts.iter().position(|&t| t == node).unwrap_or(0) as f64;
                    let len = self.doc.node_length(node);
                    let from = if node == range.start.node { range.start.offset } else { 0 };
                    let to = if node == range.end.node { range.end.offset } else { len };
                    Rect::new(from as f64 * 10.0, row * 10.0, (to - from) as f64 * 10.0, 10.0)
                        .scale(self.scale)
                })
                .collect()
        }
    }

    fn geometry() -> RowGeometry {
        RowGeometry {
            doc: parse_html("<body><p>first line</p><p>second line</p></body>").unwrap(),
            scale: 1.0,
        }
    }

    fn text_range(geo: &RowGeometry, row: usize, from: usize, to: usize) -> Range {
        let node = geo
            .doc
            .descendants(geo.doc.root())
            .filter(|&n| geo.doc.is_text(n))
            .nth(row)
            .unwrap();
        Range::new(Point::new(node, from), Point::new(node, to))
    }

    #[test]
    fn test_add_same_key_replaces() {
        let geo = geometry();
        let mut overlayer = Overlayer::new();
        let draw = draw_fn("highlight").unwrap();
        let r1 = text_range(&geo, 0, 0, 5);
        let r2 = text_range(&geo, 1, 0, 6);
        overlayer.add("k", r1.into(), draw.clone(), DrawOptions::default(), &geo);
        overlayer.add("k", r2.into(), draw, DrawOptions::default(), &geo);
        assert_eq!(overlayer.len(), 1);
        assert_eq!(overlayer.range_of("k"), Some(r2));
        assert_eq!(overlayer.element().children.len(), 1);
        assert_eq!(overlayer.rects_of("k").unwrap()[0].top, 10.0);
    }

    #[test]
    fn test_hit_test_prefers_latest() {
        let geo = geometry();
        let mut overlayer = Overlayer::new();
        let draw = draw_fn("highlight").unwrap();
        overlayer.add("a", text_range(&geo, 0, 0, 10).into(), draw.clone(), DrawOptions::default(), &geo);
        overlayer.add("b", text_range(&geo, 0, 2, 6).into(), draw, DrawOptions::default(), &geo);
        assert_eq!(overlayer.hit_test(30.0, 5.0).map(|(k, _)| k), Some("b"));
        assert_eq!(overlayer.hit_test(80.0, 5.0).map(|(k, _)| k), Some("a"));
        // right and bottom edges are exclusive
        assert_eq!(overlayer.hit_test(100.0, 5.0), None);
        assert_eq!(overlayer.hit_test(5.0, 10.0), None);
    }

    #[test]
    fn test_lazy_range_and_redraw() {
        let mut geo = geometry();
        let mut overlayer = Overlayer::new();
        let lazy = RangeSource::Lazy(Box::new(|doc: &Document| -> Option<Range> {
            let p = doc.elements_by_name("p").nth(1)?;
            Some(Range::select_node_contents(doc, p))
        }));
        assert!(overlayer.add("lazy", lazy, draw_fn("outline").unwrap(), DrawOptions::default(), &geo));
        let missing = RangeSource::Lazy(Box::new(|_: &Document| -> Option<Range> { None }));
        assert!(!overlayer.add("missing", missing, draw_fn("outline").unwrap(), DrawOptions::default(), &geo));
        assert!(!overlayer.contains("missing"));

        assert_eq!(overlayer.rects_of("lazy").unwrap()[0].width, 110.0);
        geo.scale = 2.0;
        overlayer.redraw(&geo);
        assert_eq!(overlayer.rects_of("lazy").unwrap()[0].width, 220.0);
        let rect = &overlayer.element_of("lazy").unwrap().children[0];
        assert_eq!(rect.get_attr("width"), Some("220"));
    }

    #[test]
    fn test_builtin_shapes() {
        let rects = [Rect::new(10.0, 20.0, 30.0, 12.0)];
        let g = highlight(&rects, &DrawOptions::default());
        assert_eq!(
            g.to_svg(),
            "<g fill=\"red\" style=\"opacity: var(--overlayer-highlight-opacity, .3); \
             mix-blend-mode: var(--overlayer-highlight-blend-mode, normal)\">\
             <rect x=\"10\" y=\"20\" height=\"12\" width=\"30\"/></g>"
        );
        let g = outline(&rects, &DrawOptions::color("green"));
        assert_eq!(g.get_attr("stroke"), Some("green"));
        assert_eq!(g.get_attr("stroke-width"), Some("2"));
        assert_eq!(g.get_attr("fill"), Some("none"));

        let bar = &underline(&rects, &DrawOptions::default()).children[0];
        assert_eq!(bar.get_attr("y"), Some("31"));
        let bar = &strikethrough(&rects, &DrawOptions::default()).children[0];
        assert_eq!(bar.get_attr("y"), Some("25"));
        let wave = &squiggly(&rects, &DrawOptions::default()).children[0];
        assert_eq!(wave.tag, "polyline");
        assert!(wave.get_attr("points").unwrap().starts_with("10,29 "));
        assert!(draw_fn("sparkle").is_none());
    }

    #[test]
    fn test_remove_missing_key_is_noop() {
        let mut overlayer = Overlayer::new();
        overlayer.remove("nothing");
        assert!(overlayer.is_empty());
        assert_eq!(
            overlayer.to_svg(),
            "<svg xmlns=\"http://www.w3.org/2000/svg\" style=\"position: absolute; top: 0; left: 0; \
             width: 100%; height: 100%; pointer-events: none\"/>"
        );
    }
}
