use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use log::debug;
use markup5ever_rcdom::{Handle, NodeData as RcNodeData, RcDom};

use super::{Document, NodeId};
use crate::error::{ReaderError, Result};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Parses section markup, picking the XML parser for SVG documents and the
/// HTML parser for everything else.
pub fn parse_markup(markup: &str) -> Result<Document> {
    if root_is_svg(markup) {
        parse_xml(markup)
    } else {
        parse_html(markup)
    }
}

fn root_is_svg(markup: &str) -> bool {
    let mut rest = markup.trim_start();
    loop {
        if let Some(stripped) = rest.strip_prefix("<?") {
            rest = stripped.split_once("?>").map(|(_, r)| r).unwrap_or("").trim_start();
        } else if let Some(stripped) = rest.strip_prefix("<!--") {
            rest = stripped.split_once("-->").map(|(_, r)| r).unwrap_or("").trim_start();
        } else if rest.starts_with("<!") {
            rest = rest.split_once('>').map(|(_, r)| r).unwrap_or("").trim_start();
        } else {
            break;
        }
    }
    rest.starts_with("<svg")
}

pub fn parse_html(markup: &str) -> Result<Document> {
    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut markup.as_bytes())?;

    let mut doc = Document::new();
    let root = doc.root();
    for child in dom.document.children.borrow().iter() {
        convert_rc_node(child, &mut doc, root);
    }
    debug!("Parsed HTML section into {} nodes", doc.len());
    Ok(doc)
}

fn convert_rc_node(handle: &Handle, doc: &mut Document, parent: NodeId) {
    match &handle.data {
        RcNodeData::Element { name, attrs, .. } => {
            let id = doc.create_element(&name.local.to_ascii_lowercase());
            for attr in attrs.borrow().iter() {
                let key = match &attr.name.prefix {
                    Some(prefix) => format!("{}:{}", &**prefix, &*attr.name.local),
                    None => attr.name.local.to_string(),
                };
                doc.set_attr(id, &key, &attr.value);
            }
            doc.append_child(parent, id);
            for child in handle.children.borrow().iter() {
                convert_rc_node(child, doc, id);
            }
        }
        RcNodeData::Text { contents } => {
            let text = contents.borrow();
            doc.append_text(parent, &text);
        }
        RcNodeData::Comment { contents } => {
            let id = doc.create_comment(contents);
            doc.append_child(parent, id);
        }
        RcNodeData::Document => {
            for child in handle.children.borrow().iter() {
                convert_rc_node(child, doc, parent);
            }
        }
        RcNodeData::Doctype { .. } | RcNodeData::ProcessingInstruction { .. } => {}
    }
}

/// Parses well-formed XML (SVG pages, XHTML served as XML).
pub fn parse_xml(markup: &str) -> Result<Document> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let xml = roxmltree::Document::parse_with_options(markup, options)
        .map_err(|e| ReaderError::Document(e.to_string()))?;

    let mut doc = Document::new();
    let root = doc.root();
    for child in xml.root().children() {
        convert_xml_node(child, &mut doc, root);
    }
    Ok(doc)
}

fn convert_xml_node(node: roxmltree::Node<'_, '_>, doc: &mut Document, parent: NodeId) {
    if node.is_element() {
        let id = doc.create_element(node.tag_name().name());
        for attr in node.attributes() {
            let key = match attr.namespace() {
                Some(XML_NAMESPACE) => format!("xml:{}", attr.name()),
                _ => attr.name().to_string(),
            };
            doc.set_attr(id, &key, attr.value());
        }
        doc.append_child(parent, id);
        for child in node.children() {
            convert_xml_node(child, doc, id);
        }
    } else if node.is_text() {
        if let Some(text) = node.text() {
            doc.append_text(parent, text);
        }
    } else if node.is_comment() {
        let id = doc.create_comment(node.text().unwrap_or_default());
        doc.append_child(parent, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_gets_body_and_ids() {
        let doc = parse_markup(
            r#"<html lang="fr"><body><h1 id="c1">Titre</h1><p>Un <b>deux</b></p></body></html>"#,
        )
        .unwrap();
        assert_eq!(doc.lang(), Some("fr"));
        let h1 = doc.element_by_id("c1").unwrap();
        assert_eq!(doc.local_name(h1), Some("h1"));
        let body = doc.body().unwrap();
        assert_eq!(doc.text_content(body), "TitreUn deux");
    }

    #[test]
    fn test_svg_root_uses_xml_parser() {
        let markup = r#"<?xml version="1.0"?>
<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 600 800"><image width="600" height="800"/></svg>"#;
        let doc = parse_markup(markup).unwrap();
        let root = doc.document_element().unwrap();
        assert_eq!(doc.local_name(root), Some("svg"));
        assert_eq!(doc.attr(root, "viewBox"), Some("0 0 600 800"));
    }

    #[test]
    fn test_malformed_xml_is_document_error() {
        let err = parse_xml("<svg><g></svg>").unwrap_err();
        assert!(matches!(err, ReaderError::Document(_)));
    }
}
