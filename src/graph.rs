//! Content graph: the GraphQL view of the space's content types.
//!
//! Each content type becomes a node carrying its GraphQL type name, the names
//! of its two root query fields and the GraphQL shape of every field.

use crate::cms::{ContentType, ContentTypeField, Validation};
use std::collections::HashMap;

/// Type names the schema defines itself
pub const RESERVED_TYPE_NAMES: &[&str] = &[
    "Query", "Sys", "Asset", "Entry", "JSON", "String", "Int", "Float", "Boolean", "ID",
];

/// Root query fields the schema defines itself
pub const RESERVED_QUERY_NAMES: &[&str] = &["_locale"];

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Content type '{content_type}' field '{field}' has unsupported type '{field_type}'")]
    UnsupportedFieldType {
        content_type: String,
        field: String,
        field_type: String,
    },

    #[error("Content type '{0}' cannot be mapped to a GraphQL type name")]
    InvalidTypeName(String),

    #[error("Content type '{content_type}' field '{field}' is not a valid GraphQL field name")]
    InvalidFieldName { content_type: String, field: String },

    #[error("Content type '{0}' defines a field named 'sys', which is reserved")]
    ReservedField(String),

    #[error("GraphQL name '{name}' is claimed by both '{first}' and '{second}'")]
    Conflict {
        name: String,
        first: String,
        second: String,
    },
}

/// GraphQL shape of a content type field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Int,
    Float,
    Boolean,
    Json,
    Asset,
    /// Link to an entry; the content type ids the link is restricted to
    Entry { link_content_types: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphField {
    pub id: String,
    pub kind: FieldKind,
    pub is_list: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeNode {
    pub id: String,
    pub name: String,
    pub type_name: String,
    pub query_name: String,
    pub list_query_name: String,
    pub fields: Vec<GraphField>,
}

#[derive(Debug, Clone, Default)]
pub struct ContentGraph {
    pub nodes: Vec<ContentTypeNode>,
}

impl ContentGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// GraphQL type name of a content type, if it is part of the graph
    pub fn type_name_for(&self, content_type_id: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|node| node.id == content_type_id)
            .map(|node| node.type_name.as_str())
    }

    /// Content type id to GraphQL type name, for every node
    pub fn type_names(&self) -> HashMap<String, String> {
        self.nodes
            .iter()
            .map(|node| (node.id.clone(), node.type_name.clone()))
            .collect()
    }
}

/// Build the content graph of a space from its content types
pub fn prepare_space_graph(types: &[ContentType]) -> Result<ContentGraph, GraphError> {
    let mut type_owners: HashMap<String, String> = RESERVED_TYPE_NAMES
        .iter()
        .map(|name| (name.to_string(), "built-in".to_string()))
        .collect();
    let mut query_owners: HashMap<String, String> = RESERVED_QUERY_NAMES
        .iter()
        .map(|name| (name.to_string(), "built-in".to_string()))
        .collect();

    let mut nodes = Vec::with_capacity(types.len());

    for content_type in types {
        let id = content_type.sys.id.clone();
        let type_name = pascal_case(&id);
        if !is_graphql_name(&type_name) {
            return Err(GraphError::InvalidTypeName(id));
        }
        let query_name = camel_case(&id);
        let list_query_name = pluralize(&query_name);

        claim(&mut type_owners, &type_name, &id)?;
        claim(&mut query_owners, &query_name, &id)?;
        claim(&mut query_owners, &list_query_name, &id)?;

        let mut fields = Vec::with_capacity(content_type.fields.len());
        for field in &content_type.fields {
            if field.omitted || field.disabled {
                continue;
            }
            fields.push(graph_field(&id, field)?);
        }

        nodes.push(ContentTypeNode {
            name: if content_type.name.is_empty() {
                id.clone()
            } else {
                content_type.name.clone()
            },
            id,
            type_name,
            query_name,
            list_query_name,
            fields,
        });
    }

    Ok(ContentGraph { nodes })
}

fn claim(owners: &mut HashMap<String, String>, name: &str, owner: &str) -> Result<(), GraphError> {
    if let Some(first) = owners.get(name) {
        return Err(GraphError::Conflict {
            name: name.to_string(),
            first: first.clone(),
            second: owner.to_string(),
        });
    }
    owners.insert(name.to_string(), owner.to_string());
    Ok(())
}

fn graph_field(content_type: &str, field: &ContentTypeField) -> Result<GraphField, GraphError> {
    if field.id == "sys" {
        return Err(GraphError::ReservedField(content_type.to_string()));
    }
    if !is_graphql_name(&field.id) || field.id.starts_with("__") {
        return Err(GraphError::InvalidFieldName {
            content_type: content_type.to_string(),
            field: field.id.clone(),
        });
    }

    let unsupported = |field_type: &str| GraphError::UnsupportedFieldType {
        content_type: content_type.to_string(),
        field: field.id.clone(),
        field_type: field_type.to_string(),
    };

    let (kind, is_list) = if field.field_type == "Array" {
        let items = field.items.as_ref().ok_or_else(|| unsupported("Array"))?;
        let kind = field_kind(&items.item_type, items.link_type.as_deref(), &items.validations)
            .ok_or_else(|| unsupported(&format!("Array<{}>", items.item_type)))?;
        (kind, true)
    } else {
        let kind = field_kind(&field.field_type, field.link_type.as_deref(), &field.validations)
            .ok_or_else(|| unsupported(&field.field_type))?;
        (kind, false)
    };

    Ok(GraphField {
        id: field.id.clone(),
        kind,
        is_list,
    })
}

fn field_kind(field_type: &str, link_type: Option<&str>, validations: &[Validation]) -> Option<FieldKind> {
    match field_type {
        "Symbol" | "Text" | "Date" => Some(FieldKind::String),
        "Integer" => Some(FieldKind::Int),
        "Number" => Some(FieldKind::Float),
        "Boolean" => Some(FieldKind::Boolean),
        "Location" | "Object" | "RichText" => Some(FieldKind::Json),
        "Link" => match link_type? {
            "Asset" => Some(FieldKind::Asset),
            "Entry" => Some(FieldKind::Entry {
                link_content_types: validations
                    .iter()
                    .filter_map(|v| v.link_content_type.as_ref())
                    .flatten()
                    .cloned()
                    .collect(),
            }),
            _ => None,
        },
        _ => None,
    }
}

fn words(id: &str) -> impl Iterator<Item = &str> {
    id.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
}

fn upper_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn lower_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// `blog-post` and `blogPost` both become `BlogPost`
pub fn pascal_case(id: &str) -> String {
    words(id).map(upper_first).collect()
}

/// `blog-post` and `BlogPost` both become `blogPost`
pub fn camel_case(id: &str) -> String {
    lower_first(&pascal_case(id))
}

/// English plural of a camelCase name
pub fn pluralize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if let Some(stem) = name.strip_suffix('y') {
        let before = stem.chars().last().map(|c| c.to_ascii_lowercase());
        if before.is_some_and(|c| !"aeiou".contains(c)) {
            return format!("{}ies", stem);
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| lower.ends_with(suffix)) {
        return format!("{}es", name);
    }
    format!("{}s", name)
}

fn is_graphql_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
