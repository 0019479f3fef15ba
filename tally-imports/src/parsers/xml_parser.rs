//! XML parser: repeated flat elements become records
//!
//! The record element is the element name that occurs most often among
//! elements whose children are all leaves (`<Movimiento><Fecha>..</Fecha>
//! <Importe>..</Importe></Movimiento>`). Attributes of the record element
//! are kept as fields too. On malformed input the elements closed before
//! the error are still returned, together with a parse error.

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::{vocabulary, DocumentParser, FileInput, ParseError, ParseResult, RawRecord};

pub struct XmlParser;

impl XmlParser {
    pub const ID: &'static str = "xml";
}

#[async_trait]
impl DocumentParser for XmlParser {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["xml"]
    }

    async fn parse(&self, file: &FileInput) -> ParseResult {
        parse_xml(&file.bytes)
    }
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<usize>,
    closed: bool,
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

fn attributes(start: &BytesStart<'_>) -> Vec<(String, String)> {
    start
        .attributes()
        .flatten()
        .map(|a| {
            (
                String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned(),
                a.unescape_value().map(|v| v.into_owned()).unwrap_or_default(),
            )
        })
        .collect()
}

fn open_node(nodes: &mut Vec<Node>, stack: &[usize], start: &BytesStart<'_>) -> usize {
    let id = nodes.len();
    nodes.push(Node {
        name: local_name(start),
        attrs: attributes(start),
        ..Default::default()
    });
    if let Some(parent) = stack.last() {
        nodes[*parent].children.push(id);
    }
    id
}

/// Parse XML bytes into a flat arena of nodes; returns the arena and the
/// error that stopped parsing, if any
fn build_tree(bytes: &[u8]) -> (Vec<Node>, Option<String>) {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut nodes: Vec<Node> = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                let id = open_node(&mut nodes, &stack, &start);
                stack.push(id);
            }
            Ok(Event::Empty(start)) => {
                let id = open_node(&mut nodes, &stack, &start);
                nodes[id].closed = true;
            }
            Ok(Event::End(_)) => {
                if let Some(id) = stack.pop() {
                    nodes[id].closed = true;
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(id) = stack.last() {
                    match text.unescape() {
                        Ok(t) => nodes[*id].text.push_str(&t),
                        Err(e) => {
                            return (nodes, Some(format!("Bad text at byte {}: {}", reader.buffer_position(), e)))
                        }
                    }
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(id) = stack.last() {
                    nodes[*id].text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::Eof) => {
                if !stack.is_empty() {
                    return (nodes, Some("Unexpected end of document (unclosed elements)".to_string()));
                }
                return (nodes, None);
            }
            Ok(_) => {}
            Err(e) => {
                return (
                    nodes,
                    Some(format!("Malformed XML at byte {}: {}", reader.error_position(), e)),
                )
            }
        }
        buf.clear();
    }
}

fn is_flat_record(nodes: &[Node], node: &Node) -> bool {
    !node.children.is_empty() && node.children.iter().all(|c| nodes[*c].children.is_empty())
}

fn record_fields(nodes: &[Node], node: &Node) -> Map<String, Value> {
    let mut fields = Map::new();
    for (key, value) in &node.attrs {
        fields.insert(key.clone(), Value::String(value.clone()));
    }
    for child in &node.children {
        let child = &nodes[*child];
        let mut key = child.name.clone();
        let mut suffix = 2;
        while fields.contains_key(&key) {
            key = format!("{}_{}", child.name, suffix);
            suffix += 1;
        }
        let value = child.text.trim();
        fields.insert(
            key,
            if value.is_empty() { Value::Null } else { Value::String(value.to_string()) },
        );
    }
    fields
}

pub(crate) fn parse_xml(bytes: &[u8]) -> ParseResult {
    let (nodes, error) = build_tree(bytes);
    let mut result = ParseResult::default();

    // Most frequent flat element name; first seen wins ties
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, node) in nodes.iter().enumerate() {
        if node.closed && is_flat_record(&nodes, node) {
            let entry = counts.entry(node.name.as_str()).or_insert((0, pos));
            entry.0 += 1;
        }
    }
    let record_name = counts
        .iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))
        .map(|(name, _)| name.to_string());

    if let Some(name) = &record_name {
        for node in nodes.iter().filter(|n| n.closed && &n.name == name && is_flat_record(&nodes, n)) {
            let idx = result.records.len();
            result.records.push(RawRecord {
                idx,
                fields: record_fields(&nodes, node),
            });
        }
        result.metadata.insert("record_element".into(), Value::String(name.clone()));
    }

    if let Some(message) = error {
        result.errors.push(ParseError::file(message));
    }

    let headers: Vec<String> = result
        .records
        .iter()
        .flat_map(|r| r.fields.keys().cloned())
        .collect();
    result.detected_doc_type = vocabulary::detect_doc_type(headers.iter().map(String::as_str));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repeated_elements_become_records() {
        let xml = br#"<?xml version="1.0"?>
            <Extracto cuenta="ES12">
              <Titular>ACME</Titular>
              <Movimientos>
                <Movimiento id="1"><Fecha>2024-03-01</Fecha><Importe>10,00</Importe><Saldo>10</Saldo></Movimiento>
                <Movimiento id="2"><Fecha>2024-03-02</Fecha><Importe>-2,50</Importe><Saldo>7.5</Saldo></Movimiento>
              </Movimientos>
            </Extracto>"#;
        let result = parse_xml(xml);
        assert!(result.errors.is_empty());
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.records[1].fields["Importe"], json!("-2,50"));
        assert_eq!(result.records[1].fields["id"], json!("2"));
        assert_eq!(result.metadata["record_element"], json!("Movimiento"));
    }

    #[test]
    fn test_malformed_keeps_closed_records() {
        let xml = b"<rows><row><a>1</a></row><row><a>2</a></row><row><a>3</b></row></rows>";
        let result = parse_xml(xml);
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_escaped_text() {
        let xml = b"<r><i><name>Fish &amp; Chips</name></i></r>";
        let result = parse_xml(xml);
        assert_eq!(result.records[0].fields["name"], json!("Fish & Chips"));
    }
}
