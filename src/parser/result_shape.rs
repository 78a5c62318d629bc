use indexmap::IndexMap;
use nom::{
    IResult,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    combinator::{all_consuming, opt},
    multi::separated_list1,
    sequence::{delimited, separated_pair, tuple},
};

use super::apply_namespace;
use super::markup::Element;
use crate::config::Settings;
use crate::core::{MapperError, Result};
use crate::mapping::{Discriminator, MappingKind, ResultMapping, ResultShape, ValueType};
use crate::registry::PendingShape;

/// Elements that may declare an inline nested shape.
const NESTED_ELEMENTS: [&str; 3] = ["association", "collection", "case"];

fn column_token(input: &str) -> IResult<&str, &str> {
    delimited(
        multispace0,
        take_while1(|c: char| !matches!(c, '{' | '}' | '=' | ',') && !c.is_whitespace()),
        multispace0,
    )(input)
}

/// `{prop=col, prop2=col2}`; the braces are optional.
fn composite_columns(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
    let pairs = separated_list1(char(','), separated_pair(column_token, char('='), column_token));
    let (input, (_, _, pairs, _, _)) = tuple((
        multispace0,
        opt(char('{')),
        pairs,
        opt(char('}')),
        multispace0,
    ))(input)?;
    Ok((input, pairs))
}

/// Splits a column attribute into a plain column or composite pairs.
fn parse_column(shape_id: &str, column: &str) -> Result<(Option<String>, Vec<(String, String)>)> {
    if !column.contains('=') && !column.contains(',') {
        return Ok((Some(column.trim().to_string()), Vec::new()));
    }
    let (_, pairs) = all_consuming(composite_columns)(column).map_err(|e| MapperError::MalformedShape {
        id: shape_id.to_string(),
        message: format!("invalid composite column '{column}': {e}"),
    })?;
    let pairs = pairs
        .into_iter()
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .collect();
    Ok((None, pairs))
}

fn declared_type(element: &Element) -> Option<ValueType> {
    ["type", "ofType", "resultType", "javaType"]
        .iter()
        .find_map(|a| element.attr(a))
        .map(ValueType::resolve)
}

/// Turns `<resultMap>` (and the inline shapes nested in it) into drafts.
pub(super) struct ShapeParser<'a> {
    pub resource: &'a str,
    pub namespace: &'a str,
    pub settings: &'a Settings,
}

impl ShapeParser<'_> {
    /// Drafts for `element` and every inline shape below it, innermost first.
    pub fn drafts(
        &self,
        element: &Element,
        parent_path: &str,
        enclosing_type: Option<&ValueType>,
        inherited: &[ResultMapping],
    ) -> Result<Vec<PendingShape>> {
        let path = element.value_based_identifier(parent_path);
        let local_id = element.attr("id").map_or_else(|| path.clone(), str::to_string);
        let id = apply_namespace(self.namespace, &local_id, false)?;
        let result_type = declared_type(element)
            .or_else(|| enclosing_type.cloned())
            .unwrap_or(ValueType::Map);
        let extends = element
            .attr("extends")
            .map(|parent| apply_namespace(self.namespace, parent, true))
            .transpose()?;
        let auto_mapping = element.attr_bool("autoMapping")?;

        let mut drafts = Vec::new();
        let mut mappings: Vec<ResultMapping> = inherited.to_vec();
        let mut discriminator = None;

        for child in element.elements() {
            match child.name.as_str() {
                "constructor" => {
                    for arg in child.elements() {
                        let mut mapping = self.mapping(arg, &id, &path, true, &mut drafts)?;
                        mapping.id = arg.name == "idArg";
                        mappings.push(mapping);
                    }
                }
                "discriminator" => {
                    discriminator = Some(self.discriminator(child, &path, &result_type, &mappings, &mut drafts)?);
                }
                "id" | "result" | "association" | "collection" => {
                    let mut mapping = self.mapping(child, &id, &path, false, &mut drafts)?;
                    mapping.id = child.name == "id";
                    mappings.push(mapping);
                }
                _ => {}
            }
        }

        let shape = ResultShape::new(id, result_type, mappings, discriminator, auto_mapping)?;
        drafts.push(PendingShape {
            resource: self.resource.to_string(),
            shape,
            extends,
        });
        Ok(drafts)
    }

    fn mapping(
        &self,
        element: &Element,
        shape_id: &str,
        path: &str,
        constructor: bool,
        drafts: &mut Vec<PendingShape>,
    ) -> Result<ResultMapping> {
        let property = if constructor {
            element.attr("name")
        } else {
            element.attr("property")
        };
        let (column, composites) = match element.attr("column") {
            Some(column) => parse_column(shape_id, column)?,
            None => (None, Vec::new()),
        };
        let nested_select = element
            .attr("select")
            .map(|s| apply_namespace(self.namespace, s, true))
            .transpose()?;
        let nested_result_map = match element.attr("resultMap") {
            Some(reference) => Some(apply_namespace(self.namespace, reference, true)?),
            None if NESTED_ELEMENTS.contains(&element.name.as_str()) && nested_select.is_none() => {
                let mut inline = self.drafts(element, path, None, &[])?;
                let inline_id = inline.last().map(|d| d.shape.id.clone());
                drafts.append(&mut inline);
                inline_id
            }
            None => None,
        };
        let lazy = match element.attr("fetchType") {
            Some("lazy") => true,
            Some("eager") => false,
            Some(other) => {
                return Err(MapperError::InvalidAttribute {
                    attribute: "fetchType".to_string(),
                    value: other.to_string(),
                });
            }
            None => self.settings.lazy_loading_enabled,
        };
        let kind = match element.name.as_str() {
            "association" => MappingKind::Association,
            "collection" => MappingKind::Collection,
            _ => MappingKind::Result,
        };
        Ok(ResultMapping {
            property: property.map(str::to_string),
            column,
            composites,
            value_type: element.attr("javaType").map(ValueType::resolve),
            of_type: element.attr("ofType").map(ValueType::resolve),
            jdbc_type: element.attr("jdbcType").map(str::to_string),
            nested_select,
            nested_result_map,
            column_prefix: element.attr("columnPrefix").map(str::to_string),
            not_null_columns: element
                .attr("notNullColumn")
                .map(|c| c.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default(),
            id: false,
            constructor,
            kind,
            lazy,
            result_set: element.attr("resultSet").map(str::to_string),
            foreign_column: element.attr("foreignColumn").map(str::to_string),
        })
    }

    fn discriminator(
        &self,
        element: &Element,
        path: &str,
        enclosing_type: &ValueType,
        mappings_so_far: &[ResultMapping],
        drafts: &mut Vec<PendingShape>,
    ) -> Result<Discriminator> {
        let column = element.required_attr("column")?.to_string();
        let disc_path = element.value_based_identifier(path);
        let mut cases = IndexMap::new();
        for case in element.elements_named("case") {
            let value = case.required_attr("value")?;
            let target = match case.attr("resultMap") {
                Some(reference) => apply_namespace(self.namespace, reference, true)?,
                None => {
                    let mut inline = self.drafts(case, &disc_path, Some(enclosing_type), mappings_so_far)?;
                    let inline_id = inline
                        .last()
                        .map(|d| d.shape.id.clone())
                        .unwrap_or_default();
                    drafts.append(&mut inline);
                    inline_id
                }
            };
            cases.insert(value.to_string(), target);
        }
        Ok(Discriminator {
            column,
            value_type: element.attr("javaType").map(ValueType::resolve),
            cases,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::markup::parse_document;

    fn parse(source: &str) -> Vec<PendingShape> {
        let root = parse_document("t.xml", source).unwrap();
        let settings = Settings::default();
        let parser = ShapeParser {
            resource: "t.xml",
            namespace: "ns",
            settings: &settings,
        };
        parser.drafts(root.first_named("resultMap").unwrap(), "mapper", None, &[]).unwrap()
    }

    #[test]
    fn test_composite_columns() {
        let (_, pairs) = composite_columns("{id=author_id, name = author_name}").unwrap();
        assert_eq!(pairs, vec![("id", "author_id"), ("name", "author_name")]);
        let (column, composites) = parse_column("s", "plain").unwrap();
        assert_eq!(column.as_deref(), Some("plain"));
        assert!(composites.is_empty());
        assert!(parse_column("s", "{id=}").is_err());
    }

    #[test]
    fn test_inline_nested_shapes_come_first() {
        let drafts = parse(
            r#"<mapper><resultMap id="blog" type="Blog">
                 <id property="id" column="blog_id"/>
                 <association property="author" javaType="Author" columnPrefix="author_">
                   <id property="id" column="id"/>
                 </association>
                 <collection property="posts" ofType="Post">
                   <id property="id" column="post_id"/>
                 </collection>
               </resultMap></mapper>"#,
        );
        let ids: Vec<_> = drafts.iter().map(|d| d.shape.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "ns.mapper_resultMap[blog]_association[author]",
                "ns.mapper_resultMap[blog]_collection[posts]",
                "ns.blog",
            ]
        );
        let blog = &drafts[2].shape;
        assert!(blog.has_nested_result_maps);
        assert_eq!(blog.mappings[1].column_prefix.as_deref(), Some("author_"));
        assert_eq!(drafts[1].shape.result_type, ValueType::Object("Post".into()));
    }

    #[test]
    fn test_discriminator_case_inherits_earlier_mappings() {
        let drafts = parse(
            r#"<mapper><resultMap id="vehicle" type="Vehicle" extends="base">
                 <id property="id" column="id"/>
                 <discriminator javaType="int" column="kind">
                   <case value="1" resultMap="carResult"/>
                   <case value="2"><result property="wheels" column="wheels"/></case>
                 </discriminator>
               </resultMap></mapper>"#,
        );
        let vehicle = drafts.last().unwrap();
        assert_eq!(vehicle.extends.as_deref(), Some("ns.base"));
        let discriminator = vehicle.shape.discriminator.as_ref().unwrap();
        assert_eq!(discriminator.cases["1"], "ns.carResult");
        let inline = &drafts[0].shape;
        assert_eq!(discriminator.cases["2"], inline.id);
        assert_eq!(inline.result_type, ValueType::Object("Vehicle".into()));
        assert_eq!(inline.mappings.len(), 2);
    }

    #[test]
    fn test_select_and_result_map_together_is_rejected() {
        let root = parse_document(
            "t.xml",
            r#"<mapper><resultMap id="r"><association property="a" select="q" resultMap="m"/></resultMap></mapper>"#,
        )
        .unwrap();
        let settings = Settings::default();
        let parser = ShapeParser {
            resource: "t.xml",
            namespace: "ns",
            settings: &settings,
        };
        let err = parser
            .drafts(root.first_named("resultMap").unwrap(), "mapper", None, &[])
            .unwrap_err();
        assert!(matches!(err, MapperError::MalformedShape { .. }));
    }
}
