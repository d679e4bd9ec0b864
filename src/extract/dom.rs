//! Document-order helpers over a parsed `scraper::Html` tree.
//!
//! Everything here walks the tree explicitly (ancestors, siblings, pre-order
//! descendants) so results depend only on document order.

use scraper::{ElementRef, Html};

/// Nearest ancestor whose tag is one of `names`.
pub fn find_ancestor<'a>(element: ElementRef<'a>, names: &[&str]) -> Option<ElementRef<'a>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| names.contains(&el.value().name()))
}

/// First following sibling element with tag `name`.
pub fn next_sibling_named<'a>(element: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    element
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == name)
}

/// Whether any descendant of `element` is a `name` element.
pub fn has_descendant_named(element: ElementRef<'_>, name: &str) -> bool {
    element
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .any(|el| el.value().name() == name)
}

/// First element after `start` in pre-order document order (descendants of
/// `start` included) matching `pred`.
pub fn find_following<'a>(
    document: &'a Html,
    start: ElementRef<'a>,
    pred: impl Fn(ElementRef<'a>) -> bool,
) -> Option<ElementRef<'a>> {
    let start_id = start.id();
    document
        .tree
        .root()
        .descendants()
        .skip_while(|node| node.id() != start_id)
        .skip(1)
        .filter_map(ElementRef::wrap)
        .find(|el| pred(*el))
}

/// Whether `element` carries class `class`.
pub fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

/// Text content with `<br>` treated as a break and all whitespace runs
/// collapsed to single spaces.
pub fn normalized_text(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    for node in element.descendants() {
        if let Some(text) = node.value().as_text() {
            raw.push_str(text);
        } else if let Some(el) = node.value().as_element()
            && el.name() == "br"
        {
            raw.push('\n');
        }
    }
    collapse_whitespace(&raw)
}

/// Collapse whitespace runs (line breaks and non-breaking spaces included)
/// into single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
