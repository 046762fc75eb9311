//! Per-locale GraphQL schema built from the content graph.
//!
//! The schema is dynamic: one object type per content type, resolved lazily
//! against the CMS delivery API with the locale-bound client stored in the
//! schema data.

use crate::cms::{Asset, CmsClient, CmsError, Entry, EntryQuery, Link, Sys, Timeline};
use crate::config::GraphQlOptions;
use crate::graph::{prepare_space_graph, ContentGraph, ContentTypeNode, FieldKind, GraphError, GraphField};
use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputValue, Interface, InterfaceField, Object, Scalar, Schema,
    TypeRef,
};
use async_graphql::http::GraphiQLSource;
use async_graphql::{ErrorExtensions, Value};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

const QUERY_TYPE: &str = "Query";
const SYS_TYPE: &str = "Sys";
const ASSET_TYPE: &str = "Asset";
const ENTRY_INTERFACE: &str = "Entry";
const JSON_SCALAR: &str = "JSON";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to fetch content types: {0}")]
    Cms(#[from] CmsError),

    #[error("Failed to build content graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Failed to compile GraphQL schema: {0}")]
    Schema(String),
}

/// Compiled schema of one locale together with the client it resolves with
pub struct LocaleSchema {
    pub locale: String,
    pub client: CmsClient,
    pub schema: Schema,
}

/// Fetch content types and compile the schema for `locale`
pub async fn create_locale_schema(client: &CmsClient, locale: &str) -> Result<LocaleSchema, BuildError> {
    let client = client.for_locale(locale);

    let types = client.get_content_types().await?;
    let graph = prepare_space_graph(&types)?;
    let schema = create_schema(&graph, client.clone())?;

    info!(
        "[{}] ✓ Schema ready ({} content types)",
        locale,
        graph.nodes.len()
    );

    Ok(LocaleSchema {
        locale: locale.to_string(),
        client,
        schema,
    })
}

/// Compile an executable schema from a content graph
pub fn create_schema(graph: &ContentGraph, client: CmsClient) -> Result<Schema, BuildError> {
    let type_names = Arc::new(graph.type_names());

    let mut query = Object::new(QUERY_TYPE).field(Field::new(
        "_locale",
        TypeRef::named_nn(TypeRef::STRING),
        |ctx| {
            FieldFuture::new(async move {
                let client = ctx.data::<CmsClient>()?;
                Ok(Some(Value::from(client.locale().unwrap_or_default())))
            })
        },
    ));

    let mut builder = Schema::build(QUERY_TYPE, None, None)
        .register(sys_type())
        .register(asset_type())
        .register(Scalar::new(JSON_SCALAR));

    if !graph.is_empty() {
        builder = builder.register(
            Interface::new(ENTRY_INTERFACE)
                .field(InterfaceField::new("sys", TypeRef::named_nn(SYS_TYPE))),
        );
    }

    for node in &graph.nodes {
        query = query
            .field(single_query_field(node))
            .field(collection_query_field(node));
        builder = builder.register(content_type_object(node, graph, &type_names));
    }

    builder
        .register(query)
        .data(client)
        .finish()
        .map_err(|e| BuildError::Schema(e.to_string()))
}

/// Execute a request with the response options of the endpoint
pub async fn execute(
    locale_schema: &LocaleSchema,
    request: async_graphql::Request,
    options: GraphQlOptions,
) -> async_graphql::Response {
    let timeline = options.timeline.then(Timeline::default);
    let request = match &timeline {
        Some(timeline) => request.data(timeline.clone()),
        None => request,
    };

    let mut response = locale_schema.schema.execute(request).await;

    if options.version {
        response.extensions.insert(
            "version".to_string(),
            Value::from(env!("CARGO_PKG_VERSION")),
        );
    }
    if let Some(timeline) = timeline {
        if let Ok(value) = serde_json::to_value(timeline.entries()).and_then(Value::from_json) {
            response.extensions.insert("timeline".to_string(), value);
        }
    }
    if !options.detailed_errors {
        for error in &mut response.errors {
            error.extensions = None;
        }
    }

    response
}

// ==================== GraphiQL ====================

/// A ready-to-send GraphiQL page
#[derive(Debug, Clone)]
pub struct GraphiqlPage {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: String,
}

/// Render a GraphiQL page querying `url`
pub fn graphiql(title: &str, url: &str) -> GraphiqlPage {
    GraphiqlPage {
        status: StatusCode::OK,
        headers: vec![(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )],
        body: GraphiQLSource::build().endpoint(url).title(title).finish(),
    }
}

// ==================== Built-in Types ====================

/// Message clients see for any CMS failure; the details go to the log and `extensions`
pub const CMS_ERROR_MESSAGE: &str = "Failed to fetch content from the CMS";

fn cms_error(err: CmsError) -> async_graphql::Error {
    warn!("CMS request failed while resolving: {}", err);
    let detail = err.to_string();
    async_graphql::Error::new(CMS_ERROR_MESSAGE).extend_with(|_, e| {
        e.set("code", "CMS_ERROR");
        e.set("detail", detail.as_str());
    })
}

fn sys_field(name: &str, ty: TypeRef, get: fn(&Sys) -> Option<String>) -> Field {
    Field::new(name, ty, move |ctx| {
        FieldFuture::new(async move {
            let sys = ctx.parent_value.try_downcast_ref::<Sys>()?;
            Ok(get(sys).map(Value::from))
        })
    })
}

fn sys_type() -> Object {
    Object::new(SYS_TYPE)
        .field(sys_field("id", TypeRef::named_nn(TypeRef::ID), |sys| {
            Some(sys.id.clone())
        }))
        .field(sys_field("createdAt", TypeRef::named(TypeRef::STRING), |sys| {
            sys.created_at.clone()
        }))
        .field(sys_field("updatedAt", TypeRef::named(TypeRef::STRING), |sys| {
            sys.updated_at.clone()
        }))
        .field(sys_field(
            "contentTypeId",
            TypeRef::named(TypeRef::STRING),
            |sys| sys.content_type.as_ref().map(|ct| ct.sys.id.clone()),
        ))
}

fn asset_field(name: &str, get: fn(&Asset) -> Option<String>) -> Field {
    Field::new(name, TypeRef::named(TypeRef::STRING), move |ctx| {
        FieldFuture::new(async move {
            let asset = ctx.parent_value.try_downcast_ref::<Asset>()?;
            Ok(get(asset).map(Value::from))
        })
    })
}

fn asset_type() -> Object {
    Object::new(ASSET_TYPE)
        .field(Field::new("sys", TypeRef::named_nn(SYS_TYPE), |ctx| {
            FieldFuture::new(async move {
                let asset = ctx.parent_value.try_downcast_ref::<Asset>()?;
                Ok(Some(FieldValue::owned_any(asset.sys.clone())))
            })
        }))
        .field(asset_field("title", |a| a.fields.title.clone()))
        .field(asset_field("description", |a| a.fields.description.clone()))
        .field(asset_field("url", |a| {
            a.fields.file.as_ref().and_then(|f| f.url.clone())
        }))
        .field(asset_field("contentType", |a| {
            a.fields.file.as_ref().and_then(|f| f.content_type.clone())
        }))
        .field(asset_field("fileName", |a| {
            a.fields.file.as_ref().and_then(|f| f.file_name.clone())
        }))
}

// ==================== Content Types ====================

/// Where an entry link points to in the schema
#[derive(Debug, Clone)]
enum LinkTarget {
    /// A single content type; the field has that object type
    Concrete { content_type: String, type_name: String },
    /// Any content type; the field has the `Entry` interface type
    Interface,
}

impl LinkTarget {
    fn for_field(kind: &FieldKind, graph: &ContentGraph) -> Option<LinkTarget> {
        let FieldKind::Entry { link_content_types } = kind else {
            return None;
        };
        match link_content_types.as_slice() {
            [only] => match graph.type_name_for(only) {
                Some(type_name) => Some(LinkTarget::Concrete {
                    content_type: only.clone(),
                    type_name: type_name.to_string(),
                }),
                None => Some(LinkTarget::Interface),
            },
            _ => Some(LinkTarget::Interface),
        }
    }

    fn type_name(&self) -> &str {
        match self {
            LinkTarget::Concrete { type_name, .. } => type_name,
            LinkTarget::Interface => ENTRY_INTERFACE,
        }
    }
}

fn field_type_ref(field: &GraphField, target: Option<&LinkTarget>) -> TypeRef {
    let name = match (&field.kind, target) {
        (FieldKind::String, _) => TypeRef::STRING,
        (FieldKind::Int, _) => TypeRef::INT,
        (FieldKind::Float, _) => TypeRef::FLOAT,
        (FieldKind::Boolean, _) => TypeRef::BOOLEAN,
        (FieldKind::Json, _) => JSON_SCALAR,
        (FieldKind::Asset, _) => ASSET_TYPE,
        (FieldKind::Entry { .. }, Some(target)) => target.type_name(),
        (FieldKind::Entry { .. }, None) => ENTRY_INTERFACE,
    };
    if field.is_list {
        TypeRef::named_nn_list(name)
    } else {
        TypeRef::named(name)
    }
}

/// Everything a link resolver needs, borrowed for one field resolution
struct Links<'c> {
    client: &'c CmsClient,
    timeline: Option<&'c Timeline>,
    type_names: &'c HashMap<String, String>,
    target: Option<&'c LinkTarget>,
}

impl Links<'_> {
    /// Wrap an entry for output, or drop it when it does not fit the field
    fn entry_value<'a>(&self, entry: Entry) -> Option<FieldValue<'a>> {
        let content_type = entry.content_type_id()?.to_string();
        match self.target {
            Some(LinkTarget::Concrete { content_type: expected, .. }) => {
                (content_type == *expected).then(|| FieldValue::owned_any(entry))
            }
            _ => {
                let type_name = self.type_names.get(&content_type)?.clone();
                Some(FieldValue::owned_any(entry).with_type(type_name))
            }
        }
    }

    async fn resolve_single<'a>(
        &self,
        value: &serde_json::Value,
        kind: &FieldKind,
    ) -> async_graphql::Result<Option<FieldValue<'a>>> {
        match kind {
            FieldKind::Asset => {
                let Some(link) = Link::from_value(value) else {
                    return Ok(None);
                };
                let asset = self
                    .client
                    .get_asset(&link.sys.id, self.timeline)
                    .await
                    .map_err(cms_error)?;
                Ok(asset.map(FieldValue::owned_any))
            }
            FieldKind::Entry { .. } => {
                let Some(link) = Link::from_value(value) else {
                    return Ok(None);
                };
                let entry = self
                    .client
                    .get_entry(&link.sys.id, self.timeline)
                    .await
                    .map_err(cms_error)?;
                Ok(entry.and_then(|e| self.entry_value(e)))
            }
            _ => Ok(Some(FieldValue::value(Value::from_json(value.clone())?))),
        }
    }

    async fn resolve<'a>(
        &self,
        value: &serde_json::Value,
        kind: &FieldKind,
        is_list: bool,
    ) -> async_graphql::Result<Option<FieldValue<'a>>> {
        if !is_list {
            return self.resolve_single(value, kind).await;
        }
        let Some(items) = value.as_array() else {
            return Ok(None);
        };

        let resolved = try_join_all(items.iter().map(|item| self.resolve_single(item, kind))).await?;
        // Unresolvable links are dropped from lists
        Ok(Some(FieldValue::list(resolved.into_iter().flatten())))
    }
}

fn content_field(field: &GraphField, graph: &ContentGraph, type_names: &Arc<HashMap<String, String>>) -> Field {
    let target = LinkTarget::for_field(&field.kind, graph);
    let type_ref = field_type_ref(field, target.as_ref());
    let field_id = field.id.clone();
    let kind = field.kind.clone();
    let is_list = field.is_list;
    let type_names = Arc::clone(type_names);

    Field::new(field.id.clone(), type_ref, move |ctx| {
        let field_id = field_id.clone();
        let kind = kind.clone();
        let target = target.clone();
        let type_names = Arc::clone(&type_names);

        FieldFuture::new(async move {
            let entry = ctx.parent_value.try_downcast_ref::<Entry>()?;
            let Some(value) = entry.fields.get(&field_id) else {
                return Ok(None);
            };
            let links = Links {
                client: ctx.data::<CmsClient>()?,
                timeline: ctx.data_opt::<Timeline>(),
                type_names: &type_names,
                target: target.as_ref(),
            };
            links.resolve(value, &kind, is_list).await
        })
    })
}

fn content_type_object(node: &ContentTypeNode, graph: &ContentGraph, type_names: &Arc<HashMap<String, String>>) -> Object {
    let mut object = Object::new(node.type_name.clone())
        .description(node.name.clone())
        .implement(ENTRY_INTERFACE)
        .field(Field::new("sys", TypeRef::named_nn(SYS_TYPE), |ctx| {
            FieldFuture::new(async move {
                let entry = ctx.parent_value.try_downcast_ref::<Entry>()?;
                Ok(Some(FieldValue::owned_any(entry.sys.clone())))
            })
        }));

    for field in &node.fields {
        object = object.field(content_field(field, graph, type_names));
    }
    object
}

fn single_query_field(node: &ContentTypeNode) -> Field {
    let content_type = node.id.clone();

    Field::new(node.query_name.clone(), TypeRef::named(node.type_name.clone()), move |ctx| {
        let content_type = content_type.clone();

        FieldFuture::new(async move {
            let id = ctx.args.try_get("id")?.string()?.to_string();
            let client = ctx.data::<CmsClient>()?;
            let entry = client
                .get_entry(&id, ctx.data_opt::<Timeline>())
                .await
                .map_err(cms_error)?;

            Ok(entry
                .filter(|e| e.content_type_id() == Some(content_type.as_str()))
                .map(FieldValue::owned_any))
        })
    })
    .argument(InputValue::new("id", TypeRef::named_nn(TypeRef::ID)))
}

fn collection_query_field(node: &ContentTypeNode) -> Field {
    let content_type = node.id.clone();

    Field::new(
        node.list_query_name.clone(),
        TypeRef::named_nn_list_nn(node.type_name.clone()),
        move |ctx| {
            let content_type = content_type.clone();

            FieldFuture::new(async move {
                let arg = |name: &str| ctx.args.get(name).filter(|v| !v.is_null());
                let query = EntryQuery {
                    content_type: Some(content_type),
                    skip: arg("skip").map(|v| v.u64()).transpose()?,
                    limit: arg("limit").map(|v| v.u64()).transpose()?,
                    filter: arg("q").map(|v| v.string().map(str::to_string)).transpose()?,
                };
                let client = ctx.data::<CmsClient>()?;
                let entries = client
                    .get_entries(&query, ctx.data_opt::<Timeline>())
                    .await
                    .map_err(cms_error)?;

                Ok(Some(FieldValue::list(
                    entries.items.into_iter().map(FieldValue::owned_any),
                )))
            })
        },
    )
    .argument(InputValue::new("skip", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("limit", TypeRef::named(TypeRef::INT)))
    .argument(InputValue::new("q", TypeRef::named(TypeRef::STRING)))
}
