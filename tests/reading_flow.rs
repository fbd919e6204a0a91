use std::cell::RefCell;
use std::rc::Rc;

use pagewright::book::PageSpread;
use pagewright::dom::parse_html;
use pagewright::events::{Detail, EventKind, Reason};
use pagewright::fixed_layout::{Spread, build_spreads};
use pagewright::progress::TocItem;
use pagewright::search::{SearchMatcher, SearchOptions};
use pagewright::test_utils::test_helpers::{BookBuilder, SMALL_VIEWPORT, paragraphs};
use pagewright::view::SearchUpdate;
use pagewright::{Book, Target, View, ViewOptions};

fn open(book: Book) -> View {
    let mut view = View::new(ViewOptions {
        viewport: SMALL_VIEWPORT,
        ..Default::default()
    });
    view.open(book);
    view
}

#[test]
fn middle_of_three_equal_sections() {
    let book = BookBuilder::new().sized(1000).sized(1000).sized(1000).build();
    let mut view = open(book);
    let resolved = view.go_to_fraction(0.5).unwrap();
    assert_eq!(resolved.index, 1);
    assert_eq!(view.last_location().unwrap().index, 1);
    let fractions = view.get_section_fractions();
    assert!((fractions[1] - 1.0 / 3.0).abs() < 1e-9);
}

#[test]
fn paging_through_the_book_only_moves_forward() {
    let mut view = open(BookBuilder::new().sections(3, 10).build());
    let fractions = Rc::new(RefCell::new(Vec::new()));
    let log = fractions.clone();
    view.on(EventKind::Relocate, move |event| {
        if let Detail::Relocate(location) = &event.detail {
            log.borrow_mut().push((location.index, location.fraction));
        }
    });
    view.init(None, false);
    for _ in 0..20 {
        view.next();
    }
    let seen = fractions.borrow();
    // Three sections of three pages each.
    assert_eq!(seen.len(), 9);
    assert!(seen.windows(2).all(|w| w[0].1 < w[1].1));
    assert_eq!(seen.last().map(|s| s.0), Some(2));

    drop(seen);
    for _ in 0..20 {
        view.prev();
    }
    assert_eq!(view.last_location().unwrap().index, 0);
    assert_eq!(view.last_location().unwrap().fraction, 0.0);
}

#[test]
fn cfi_of_a_location_leads_back_to_it() {
    let mut view = open(BookBuilder::new().sections(2, 10).build());
    view.go_to("s1.xhtml#p6");
    let location = view.last_location().unwrap().clone();
    assert_eq!(location.reason, Some(Reason::Goto));

    view.go_to(0);
    let back = view.go_to(Target::link(location.cfi.clone())).unwrap();
    assert_eq!(back.index, 1);
    let again = view.last_location().unwrap();
    assert_eq!(again.index, 1);
    assert!((again.fraction - location.fraction).abs() < 1e-9);
}

/// Section and whole-book fraction shown after going to `href`.
fn position_of(book: Book, href: &str) -> (usize, f64) {
    let mut view = open(book);
    view.go_to(href).unwrap();
    let location = view.last_location().unwrap();
    (location.index, location.fraction)
}

fn position(view: &View) -> (usize, f64) {
    let location = view.last_location().unwrap();
    (location.index, location.fraction)
}

fn assert_at(actual: (usize, f64), expected: (usize, f64)) {
    assert_eq!(actual.0, expected.0, "section of {actual:?} vs {expected:?}");
    assert!((actual.1 - expected.1).abs() < 1e-9, "{actual:?} vs {expected:?}");
}

#[test]
fn left_and_right_follow_reading_direction() {
    // Ten paragraphs lay out as three pages: p0-p3, p4-p7, p8-p9.
    let book = || BookBuilder::new().sections(2, 10).rtl().build();
    let second_page = position_of(book(), "s0.xhtml#p5");
    let third_page = position_of(book(), "s0.xhtml#p9");
    let next_section = position_of(book(), "s1.xhtml");
    assert_eq!(next_section.0, 1);
    assert!(0.0 < second_page.1 && second_page.1 < third_page.1 && third_page.1 < next_section.1);

    let mut rtl = open(book());
    rtl.init(None, false);
    assert_at(position(&rtl), (0, 0.0));
    rtl.go_left();
    assert_at(position(&rtl), second_page);
    rtl.go_left();
    assert_at(position(&rtl), third_page);
    rtl.go_left();
    assert_at(position(&rtl), next_section);
    rtl.go_right();
    assert_at(position(&rtl), third_page);
    rtl.go_right();
    rtl.go_right();
    assert_at(position(&rtl), (0, 0.0));

    let mut ltr = open(BookBuilder::new().sections(2, 10).build());
    ltr.init(None, false);
    ltr.go_right();
    assert_at(
        position(&ltr),
        position_of(BookBuilder::new().sections(2, 10).build(), "s0.xhtml#p5"),
    );
    ltr.go_left();
    assert_at(position(&ltr), (0, 0.0));
}

#[test]
fn toc_entry_tracks_headings_inside_a_section() {
    let markup = format!(
        "<html><body><h1 id=\"a\">A</h1>{}<h1 id=\"b\">B</h1>{}</body></html>",
        "<p>Filler line for the first part.</p>".repeat(8),
        "<p>Filler line for the second part.</p>".repeat(8),
    );
    let book = BookBuilder::new()
        .section(paragraphs(2))
        .section(markup)
        .toc(vec![
            TocItem::new("Intro", "s0.xhtml"),
            TocItem::new("Part A", "s1.xhtml#a"),
            TocItem::new("Part B", "s1.xhtml#b"),
        ])
        .build();
    let mut view = open(book);
    view.go_to("s1.xhtml#b");
    let label = |view: &View| view.last_location().and_then(|l| l.toc_item.clone()).map(|t| t.label);
    assert_eq!(label(&view).as_deref(), Some("Part B"));
    view.go_to("s1.xhtml#a");
    assert_eq!(label(&view).as_deref(), Some("Part A"));
    view.go_to("s0.xhtml");
    assert_eq!(label(&view).as_deref(), Some("Intro"));
}

#[test]
fn search_is_case_insensitive_by_default() {
    let doc = parse_html("<p>The quick brown fox jumps</p>").unwrap();
    let matcher = SearchMatcher::new(SearchOptions::default());

    let results = matcher.find(&doc, "quick");
    assert_eq!(results.len(), 1);
    let excerpt = &results[0].excerpt;
    assert_eq!(excerpt.matched, "quick");
    assert_eq!(excerpt.pre, "The ");
    assert_eq!(excerpt.post, " brown fox jumps");

    assert_eq!(matcher.find(&doc, "FOX").len(), 1);
    let strict = SearchMatcher::new(SearchOptions {
        match_case: true,
        ..Default::default()
    });
    assert!(strict.find(&doc, "FOX").is_empty());
}

#[test]
fn book_search_reports_every_section() {
    let mut view = open(BookBuilder::new().sections(3, 4).build());
    let updates: Vec<SearchUpdate> = view.search("PARAGRAPH 2", SearchOptions::default(), None).collect();
    let hits: usize = updates
        .iter()
        .map(|u| match u {
            SearchUpdate::Section { subitems, .. } => subitems.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(hits, 3);
    let progress: Vec<f64> = updates
        .iter()
        .filter_map(|u| match u {
            SearchUpdate::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn spreads_mirror_with_direction() {
    let hints = [None, None, None];
    assert_eq!(
        build_spreads(&hints, false, None),
        vec![Spread::right(0), Spread::pair(1, 2)]
    );
    let rtl = build_spreads(&hints, true, None);
    assert_eq!(rtl[0].left, Some(0));
    assert_eq!((rtl[1].right, rtl[1].left), (Some(1), Some(2)));

    let hinted = build_spreads(&[Some(PageSpread::Center), None, None], false, None);
    assert_eq!(hinted[0].center, Some(0));
}

#[test]
fn fixed_layout_book_pages_by_spread() {
    let book = BookBuilder::new().page(None).page(None).page(None).page(None).build();
    let mut view = open(book);
    view.init(None, false);
    let mut indices = vec![view.last_location().unwrap().index];
    for _ in 0..5 {
        view.next();
        indices.push(view.last_location().unwrap().index);
    }
    indices.dedup();
    assert_eq!(indices.first(), Some(&0));
    assert_eq!(indices.last(), Some(&3));
    assert!(indices.windows(2).all(|w| w[0] < w[1]));
}
