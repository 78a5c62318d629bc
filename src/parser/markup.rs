use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::core::{MapperError, Result};

/// A node of a parsed mapping unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Character data, entities already decoded. CDATA sections land here too.
    Text(String),
}

/// An owned markup element with its attributes in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn required_attr(&self, name: &str) -> Result<&str> {
        self.attr(name)
            .ok_or_else(|| MapperError::missing_attribute(&self.name, name))
    }

    pub fn attr_bool(&self, name: &str) -> Result<Option<bool>> {
        self.attr(name)
            .map(|v| match v.trim() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(MapperError::InvalidAttribute {
                    attribute: name.to_string(),
                    value: other.to_string(),
                }),
            })
            .transpose()
    }

    pub fn attr_u32(&self, name: &str) -> Result<Option<u32>> {
        self.attr(name)
            .map(|v| {
                v.trim().parse().map_err(|_| MapperError::InvalidAttribute {
                    attribute: name.to_string(),
                    value: v.to_string(),
                })
            })
            .transpose()
    }

    pub fn set_attr(&mut self, name: &str, value: String) {
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn elements_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements().filter(move |e| e.name == name)
    }

    pub fn first_named(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    /// Concatenated text of direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// `<property name=".." value=".."/>` children as pairs.
    pub fn properties(&self) -> Vec<(String, String)> {
        self.elements_named("property")
            .filter_map(|p| Some((p.attr("name")?.to_string(), p.attr("value")?.to_string())))
            .collect()
    }

    /// Identifier derived from this element's position: `mapper_resultMap[x]_collection[y]`.
    pub fn value_based_identifier(&self, parent_path: &str) -> String {
        let own = match self.attr("id").or_else(|| self.attr("value")).or_else(|| self.attr("property")) {
            Some(value) => format!("{}[{}]", self.name, value.replace('.', "_")),
            None => self.name.clone(),
        };
        if parent_path.is_empty() {
            own
        } else {
            format!("{parent_path}_{own}")
        }
    }
}

fn markup_error(resource: &str, message: impl ToString) -> MapperError {
    MapperError::Markup {
        resource: resource.to_string(),
        message: message.to_string(),
    }
}

fn open_element(resource: &str, start: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| markup_error(resource, e))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| markup_error(resource, e))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn push_text(parent: Option<&mut Element>, text: String) {
    let Some(parent) = parent else { return };
    if let Some(Node::Text(last)) = parent.children.last_mut() {
        last.push_str(&text);
    } else {
        parent.children.push(Node::Text(text));
    }
}

/// Parses a whole mapping unit and returns its root element.
///
/// Declarations, doctype, comments and processing instructions are dropped.
pub fn parse_document(resource: &str, source: &str) -> Result<Element> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader.read_event().map_err(|e| markup_error(resource, e))?;
        match event {
            Event::Start(start) => stack.push(open_element(resource, &start)?),
            Event::Empty(start) => {
                let element = open_element(resource, &start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None => root = Some(element),
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| markup_error(resource, "unbalanced closing tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None => root = Some(element),
                }
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| markup_error(resource, e))?;
                push_text(stack.last_mut(), text.into_owned());
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                push_text(stack.last_mut(), text);
            }
            Event::Eof => break,
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
        }
    }

    if !stack.is_empty() {
        return Err(markup_error(resource, "unexpected end of document"));
    }
    root.ok_or_else(|| markup_error(resource, "document has no root element"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<!DOCTYPE mapper SYSTEM "mapper.dtd">
<mapper namespace="ns">
  <!-- comment is dropped -->
  <select id="find" resultType="map">
    SELECT * FROM t WHERE a &lt; #{a} <![CDATA[AND b > 1]]>
  </select>
  <cache/>
</mapper>"#;

    #[test]
    fn test_parse_document_tree() {
        let root = parse_document("unit.xml", UNIT).unwrap();
        assert_eq!(root.name, "mapper");
        assert_eq!(root.attr("namespace"), Some("ns"));

        let select = root.first_named("select").unwrap();
        assert_eq!(select.attr("resultType"), Some("map"));
        let text = select.text();
        assert!(text.contains("a < #{a}"));
        assert!(text.contains("AND b > 1"));
        assert!(root.first_named("cache").is_some());
    }

    #[test]
    fn test_attribute_helpers() {
        let root = parse_document("u", r#"<a flag="true" n="12" bad="x"/>"#).unwrap();
        assert_eq!(root.attr_bool("flag").unwrap(), Some(true));
        assert_eq!(root.attr_u32("n").unwrap(), Some(12));
        assert!(root.attr_u32("bad").is_err());
        assert!(root.required_attr("missing").is_err());
    }

    #[test]
    fn test_value_based_identifier() {
        let mut e = Element::new("collection");
        e.set_attr("property", "order.lines".to_string());
        assert_eq!(
            e.value_based_identifier("mapper_resultMap[r]"),
            "mapper_resultMap[r]_collection[order_lines]"
        );
    }

    #[test]
    fn test_malformed_document() {
        let err = parse_document("bad.xml", "<mapper><select></mapper>").unwrap_err();
        assert!(matches!(err, MapperError::Markup { .. }));
    }
}
