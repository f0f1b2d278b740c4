//! XML response flattening.
//!
//! TeamCity answers XML requests with documents such as
//! `<build id="1" href="..."><properties><property .../></properties></build>`.
//! They are flattened into a `serde_json::Value` so that callers can look
//! fields up the same way for XML and JSON responses.

use indexmap::IndexMap;
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;

/// Key under which element text is kept when the element also has children
/// or attributes.
pub const TEXT_KEY: &str = "#text";

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    Attr(#[from] AttrError),

    #[error("Invalid UTF-8 in XML: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Malformed XML document: {0}")]
    Malformed(String),
}

#[derive(Debug)]
struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<Element>,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self, XmlError> {
        let tag = std::str::from_utf8(start.name().as_ref())?.to_owned();

        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            tag,
            attributes,
            text: None,
            children: Vec::new(),
        })
    }

    /// Only text preceding the first child element is kept.
    fn push_text(&mut self, text: &str) {
        if self.children.is_empty() {
            self.text.get_or_insert_with(String::new).push_str(text);
        }
    }

    fn flatten(self) -> Value {
        let has_children = !self.children.is_empty();
        let has_attributes = !self.attributes.is_empty();
        let mut map = Map::new();

        if has_children {
            let mut grouped: IndexMap<String, Vec<Value>> = IndexMap::new();
            for child in self.children {
                let tag = child.tag.clone();
                grouped.entry(tag).or_default().push(child.flatten());
            }

            for (tag, mut values) in grouped {
                let value = if values.len() == 1 {
                    values.remove(0)
                } else {
                    Value::Array(values)
                };
                map.insert(tag, value);
            }
        }

        for (key, value) in self.attributes {
            map.insert(key, Value::String(value));
        }

        let text = self.text.map(|text| text.trim().to_owned());

        if has_children || has_attributes {
            if let Some(text) = text.filter(|text| !text.is_empty()) {
                map.insert(TEXT_KEY.to_owned(), Value::String(text));
            }
            Value::Object(map)
        } else {
            text.map_or(Value::Null, Value::String)
        }
    }
}

/// Parses an XML document into `{root_tag: flattened_root}`.
///
/// Flattening rules:
/// - child elements become keys of the parent mapping; a tag repeated among
///   siblings becomes an ordered list of the children's values
/// - attributes are merged into the same mapping as plain keys
/// - text is stored under [`TEXT_KEY`] when the element also has children or
///   attributes, otherwise it replaces the value entirely
/// - an element with neither text, attributes nor children becomes `null`
pub fn parse_document(input: &str) -> Result<Value, XmlError> {
    let mut reader = Reader::from_str(input);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err(XmlError::Malformed("multiple root elements".into()));
                }
                stack.push(Element::open(&start)?);
            }
            Event::Empty(start) => {
                let element = Element::open(&start)?;
                close_element(element, &mut stack, &mut root)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| XmlError::Malformed("unexpected closing tag".into()))?;
                close_element(element, &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                append_text(&mut stack, &text)?;
            }
            Event::CData(data) => {
                let data = data.into_inner();
                append_text(&mut stack, std::str::from_utf8(&data)?)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(XmlError::Malformed(format!("unclosed element <{}>", open.tag)));
    }

    let root = root.ok_or_else(|| XmlError::Malformed("document has no root element".into()))?;

    let mut document = Map::new();
    let tag = root.tag.clone();
    document.insert(tag, root.flatten());
    Ok(Value::Object(document))
}

fn close_element(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), XmlError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        return Ok(());
    }

    if root.is_some() {
        return Err(XmlError::Malformed("multiple root elements".into()));
    }
    *root = Some(element);
    Ok(())
}

fn append_text(stack: &mut [Element], text: &str) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(current) => {
            current.push_text(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(XmlError::Malformed("text outside the root element".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const QUEUED_BUILD: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<build id="4711" buildTypeId="Cfg1" state="queued" href="/app/rest/buildQueue/id:4711" webUrl="https://tc.example.com/viewQueued.html?itemId=4711">
  <buildType id="Cfg1" name="Config One"/>
  <lastChanges count="2">
    <change id="30" version="abc" personal="false"/>
    <change id="10" version="def" personal="false"/>
  </lastChanges>
  <properties count="1">
    <property name="a" value="1"/>
  </properties>
  <comment><text>rerun of 4710</text></comment>
</build>"#;

    #[test]
    fn test_repeated_siblings_collapse_into_list() {
        let doc = parse_document(QUEUED_BUILD).unwrap();

        let changes = &doc["build"]["lastChanges"]["change"];
        let changes = changes.as_array().expect("two changes should become a list");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0]["id"], "30");
        assert_eq!(changes[1]["id"], "10");
        assert_eq!(doc["build"]["lastChanges"]["count"], "2");
    }

    #[test]
    fn test_single_child_is_not_wrapped() {
        let doc = parse_document(QUEUED_BUILD).unwrap();

        let property = &doc["build"]["properties"]["property"];
        assert!(property.is_object());
        assert_eq!(property["name"], "a");
        assert_eq!(property["value"], "1");
    }

    #[test]
    fn test_attributes_merge_with_children() {
        let doc = parse_document(QUEUED_BUILD).unwrap();
        let build = &doc["build"];

        assert_eq!(build["id"], "4711");
        assert_eq!(build["href"], "/app/rest/buildQueue/id:4711");
        assert_eq!(
            build["webUrl"],
            "https://tc.example.com/viewQueued.html?itemId=4711"
        );
        assert_eq!(build["buildType"]["name"], "Config One");
    }

    #[test]
    fn test_leaf_text_replaces_value() {
        let doc = parse_document(QUEUED_BUILD).unwrap();
        assert_eq!(doc["build"]["comment"]["text"], "rerun of 4710");
    }

    #[test]
    fn test_text_with_attributes_uses_sentinel_key() {
        let doc = parse_document(r#"<status code="ok">  all good  </status>"#).unwrap();
        assert_eq!(doc, json!({"status": {"code": "ok", "#text": "all good"}}));
    }

    #[test]
    fn test_whitespace_text_beside_children_is_dropped() {
        let doc = parse_document("<a>\n  <b>x</b>\n</a>").unwrap();
        assert_eq!(doc, json!({"a": {"b": "x"}}));
    }

    #[test]
    fn test_empty_element_is_null() {
        assert_eq!(parse_document("<empty/>").unwrap(), json!({"empty": null}));
        assert_eq!(
            parse_document(r#"<empty flag="true"/>"#).unwrap(),
            json!({"empty": {"flag": "true"}})
        );
    }

    #[test]
    fn test_escaped_content_is_unescaped() {
        let doc = parse_document(r#"<p name="a&amp;b">x &lt; y</p>"#).unwrap();
        assert_eq!(doc, json!({"p": {"name": "a&b", "#text": "x < y"}}));
    }

    #[test]
    fn test_malformed_documents_are_rejected() {
        assert!(parse_document("").is_err());
        assert!(parse_document("<a><b></a>").is_err());
        assert!(parse_document("<a>").is_err());
        assert!(parse_document("<a/><b/>").is_err());
        assert!(parse_document("not xml at all").is_err());
    }
}
