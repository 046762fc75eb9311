//! HTTP surface: the root metadata endpoint and the per-locale endpoints.
//!
//! The axum router is fixed at startup; per-locale endpoints dispatch through
//! a [`RouteTable`] that the bootstrap fills in as locale schemas complete.
//! A locale that is not (yet) mounted answers 404.

use crate::config::GraphQlOptions;
use crate::locales::SpaceLocaleMeta;
use crate::passthrough;
use crate::schema::{self, LocaleSchema};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get, MethodRouter},
    Json, Router,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Headers clients may send cross-origin
pub const ALLOWED_HEADERS: &str = "Origin, X-Requested-With, Content-Type, Accept";

/// Locale short code to mounted schema
#[derive(Clone, Default)]
pub struct RouteTable {
    inner: Arc<RwLock<HashMap<String, Arc<LocaleSchema>>>>,
}

impl RouteTable {
    /// Mount a locale schema, returning the schema it replaced
    pub fn mount(&self, schema: LocaleSchema) -> Option<Arc<LocaleSchema>> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(schema.locale.clone(), Arc::new(schema))
    }

    pub fn get(&self, locale: &str) -> Option<Arc<LocaleSchema>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(locale)
            .cloned()
    }

    /// Mounted locales, sorted
    pub fn locales(&self) -> Vec<String> {
        let mut locales: Vec<String> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        locales.sort();
        locales
    }
}

pub fn graphql_path(locale: &str) -> String {
    format!("/{}/graphql", locale)
}

pub fn graphiql_title(locale: &str) -> String {
    format!("GraphQL - {}", locale)
}

#[derive(Clone)]
pub struct AppState {
    pub metas: Arc<Vec<SpaceLocaleMeta>>,
    pub routes: RouteTable,
    pub options: GraphQlOptions,
}

/// Build the HTTP router over the given state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/:locale", get(graphiql_handler))
        .route("/:locale/", get(graphiql_handler))
        .route("/:locale/graphql", graphql_route())
        .route("/:locale/graphql/", graphql_route())
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .layer(TraceLayer::new_for_http())
}

fn graphql_route() -> MethodRouter<AppState> {
    any(graphql_handler).layer(middleware::from_fn(passthrough::response_hook))
}

async fn root_handler(State(state): State<AppState>) -> Json<Vec<SpaceLocaleMeta>> {
    Json(state.metas.as_ref().clone())
}

async fn graphiql_handler(State(state): State<AppState>, Path(locale): Path<String>) -> Response {
    if state.routes.get(&locale).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let page = schema::graphiql(&graphiql_title(&locale), &graphql_path(&locale));
    let mut response = (page.status, page.body).into_response();
    for (name, value) in page.headers {
        response.headers_mut().insert(name, value);
    }
    response
}

/// GraphQL-over-HTTP query string parameters
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlParams {
    pub query: Option<String>,
    pub variables: Option<String>,
    pub operation_name: Option<String>,
}

fn graphql_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({ "errors": [{ "message": message }] })),
    )
        .into_response()
}

/// Turn an HTTP request into a GraphQL request, or the error response to send
fn parse_request(method: &Method, params: GraphQlParams, body: &[u8]) -> Result<async_graphql::Request, Response> {
    if method == Method::POST && !body.is_empty() {
        return serde_json::from_slice::<async_graphql::Request>(body).map_err(|e| {
            graphql_error(StatusCode::BAD_REQUEST, &format!("Invalid GraphQL request body: {}", e))
        });
    }

    let query = params
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| graphql_error(StatusCode::BAD_REQUEST, "Must provide query string."))?;

    let mut request = async_graphql::Request::new(query);
    if let Some(variables) = params.variables.filter(|v| !v.trim().is_empty()) {
        let variables: serde_json::Value = serde_json::from_str(&variables)
            .map_err(|_| graphql_error(StatusCode::BAD_REQUEST, "Variables are invalid JSON."))?;
        request = request.variables(async_graphql::Variables::from_json(variables));
    }
    if let Some(operation_name) = params.operation_name {
        request = request.operation_name(operation_name);
    }
    Ok(request)
}

async fn graphql_handler(
    State(state): State<AppState>,
    Path(locale): Path<String>,
    method: Method,
    Query(params): Query<GraphQlParams>,
    body: Bytes,
) -> Response {
    let Some(locale_schema) = state.routes.get(&locale) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if method != Method::GET && method != Method::POST {
        let mut response = graphql_error(
            StatusCode::METHOD_NOT_ALLOWED,
            "GraphQL only supports GET and POST requests.",
        );
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET, POST"));
        return response;
    }

    let request = match parse_request(&method, params, &body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let response = schema::execute(&locale_schema, request, state.options).await;
    (response_status(&response), Json(response)).into_response()
}

/// HTTP status of an executed GraphQL response.
///
/// Errors without a path come from parsing or validation and are the client's
/// fault (400); errors with a path were raised during execution. Only a
/// response without data is an HTTP failure.
pub fn response_status(response: &async_graphql::Response) -> StatusCode {
    if response.errors.is_empty() || response.data != async_graphql::Value::Null {
        StatusCode::OK
    } else if response.errors.iter().any(|e| !e.path.is_empty()) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::CmsClient;
    use crate::config::Config;
    use crate::graph::ContentGraph;
    use axum::body::{to_bytes, Body};
    use tower::ServiceExt;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    // ==================== Helper Functions ====================

    fn create_test_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            space_id: "space-id".to_string(),
            environment: None,
            cda_token: "cda-token".to_string(),
            cma_token: None,
            cda_url: "http://127.0.0.1:9".to_string(),
            cma_url: "http://127.0.0.1:9".to_string(),
            graphql: GraphQlOptions::default(),
        }
    }

    fn create_test_client() -> CmsClient {
        CmsClient::new(&create_test_config())
    }

    fn locale_schema(locale: &str) -> LocaleSchema {
        let client = create_test_client().for_locale(locale);
        LocaleSchema {
            locale: locale.to_string(),
            schema: schema::create_schema(&ContentGraph::default(), client.clone())
                .expect("Should compile empty schema"),
            client,
        }
    }

    fn create_state(locales: &[&str], options: GraphQlOptions) -> AppState {
        let metas = locales
            .iter()
            .map(|l| {
                let fields = serde_json::json!({ "title": format!("Site {}", l) });
                SpaceLocaleMeta::new(l, fields.as_object().unwrap().clone())
            })
            .collect();
        let routes = RouteTable::default();
        for locale in locales {
            routes.mount(locale_schema(locale));
        }
        AppState {
            metas: Arc::new(metas),
            routes,
            options,
        }
    }

    async fn send(app: Router, method: &str, uri: &str, body: Body) -> Response {
        app.oneshot(
            axum::http::Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).expect("Body should be JSON")
    }

    fn assert_cors(response: &Response) {
        assert_eq!(
            response.headers().get("access-control-allow-origin"),
            Some(&HeaderValue::from_static("*"))
        );
        assert_eq!(
            response.headers().get("access-control-allow-headers"),
            Some(&HeaderValue::from_static(ALLOWED_HEADERS))
        );
    }

    // ==================== RouteTable Tests ====================

    #[test]
    fn test_route_table_mount_and_get() {
        let routes = RouteTable::default();
        assert!(routes.get("en").is_none());

        assert!(routes.mount(locale_schema("en")).is_none());
        assert!(routes.mount(locale_schema("de")).is_none());

        assert_eq!(routes.get("en").unwrap().locale, "en");
        assert_eq!(routes.locales(), vec!["de", "en"]);
    }

    #[test]
    fn test_route_table_overwrite_is_observable() {
        let routes = RouteTable::default();
        routes.mount(locale_schema("en"));

        let replaced = routes.mount(locale_schema("en"));

        assert!(replaced.is_some());
        assert_eq!(routes.locales(), vec!["en"]);
    }

    #[test]
    fn test_paths() {
        assert_eq!(graphql_path("de"), "/de/graphql");
        assert_eq!(graphiql_title("de"), "GraphQL - de");
    }

    // ==================== Root Tests ====================

    #[tokio::test]
    async fn test_root_returns_metas() {
        let app = router(create_state(&["en", "de"], GraphQlOptions::default()));

        let response = send(app, "GET", "/", Body::empty()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_cors(&response);
        assert_eq!(
            body_json(response).await,
            serde_json::json!([
                { "locale": "en", "title": "Site en" },
                { "locale": "de", "title": "Site de" }
            ])
        );
    }

    #[tokio::test]
    async fn test_root_is_independent_of_mounted_locales() {
        let mut state = create_state(&["en", "de"], GraphQlOptions::default());
        state.routes = RouteTable::default();

        let response = send(router(state), "GET", "/", Body::empty()).await;
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
    }

    // ==================== GraphiQL Tests ====================

    #[tokio::test]
    async fn test_graphiql_page_for_mounted_locale() {
        let app = router(create_state(&["de"], GraphQlOptions::default()));

        let response = send(app, "GET", "/de", Body::empty()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_cors(&response);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(html.contains("GraphQL - de"));
        assert!(html.contains("/de/graphql"));
    }

    #[tokio::test]
    async fn test_graphiql_page_for_unmounted_locale() {
        let app = router(create_state(&["en"], GraphQlOptions::default()));

        let response = send(app, "GET", "/de", Body::empty()).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_cors(&response);
    }

    // ==================== GraphQL Tests ====================

    #[tokio::test]
    async fn test_graphql_post_typename() {
        let app = router(create_state(&["en"], GraphQlOptions::default()));

        let response = send(
            app,
            "POST",
            "/en/graphql",
            Body::from(r#"{"query":"{ __typename }"}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_cors(&response);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "data": { "__typename": "Query" } })
        );
    }

    #[tokio::test]
    async fn test_graphql_get_with_variables() {
        let app = router(create_state(&["en"], GraphQlOptions::default()));

        let response = send(
            app,
            "GET",
            "/en/graphql?query=query%20Q%28%24x%3A%20Boolean%21%29%20%7B%20_locale%20%40include%28if%3A%20%24x%29%20%7D&variables=%7B%22x%22%3Atrue%7D&operationName=Q",
            Body::empty(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "data": { "_locale": "en" } })
        );
    }

    #[tokio::test]
    async fn test_graphql_version_extension_when_enabled() {
        let options = GraphQlOptions {
            version: true,
            ..Default::default()
        };
        let app = router(create_state(&["en"], options));

        let response = send(app, "POST", "/en/graphql", Body::from(r#"{"query":"{ _locale }"}"#)).await;

        let json = body_json(response).await;
        assert_eq!(json["extensions"]["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_graphql_missing_query() {
        let app = router(create_state(&["en"], GraphQlOptions::default()));

        let response = send(app, "GET", "/en/graphql", Body::empty()).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_cors(&response);
        let json = body_json(response).await;
        assert_eq!(json["errors"][0]["message"], "Must provide query string.");
    }

    #[tokio::test]
    async fn test_graphql_invalid_body() {
        let app = router(create_state(&["en"], GraphQlOptions::default()));

        let response = send(app, "POST", "/en/graphql", Body::from("{not json")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_graphql_validation_error() {
        let app = router(create_state(&["en"], GraphQlOptions::default()));

        let response = send(app, "POST", "/en/graphql", Body::from(r#"{"query":"{ nope }"}"#)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["errors"][0]["message"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_graphql_unsupported_method() {
        let app = router(create_state(&["en"], GraphQlOptions::default()));

        let response = send(app, "PUT", "/en/graphql", Body::empty()).await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()["allow"], "GET, POST");
        assert_cors(&response);
    }

    #[tokio::test]
    async fn test_graphql_unmounted_locale() {
        let app = router(create_state(&["en"], GraphQlOptions::default()));

        let response = send(
            app,
            "POST",
            "/fr/graphql",
            Body::from(r#"{"query":"{ __typename }"}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_cors(&response);
    }

    #[tokio::test]
    async fn test_unknown_path_carries_cors_headers() {
        let app = router(create_state(&["en"], GraphQlOptions::default()));

        let response = send(app, "GET", "/en/graphql/extra", Body::empty()).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_cors(&response);
    }

    #[tokio::test]
    async fn test_trailing_slash_paths() {
        let app = router(create_state(&["de"], GraphQlOptions::default()));

        let response = send(app.clone(), "GET", "/de/", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(
            app,
            "POST",
            "/de/graphql/",
            Body::from(r#"{"query":"{ _locale }"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "data": { "_locale": "de" } })
        );
    }

    // ==================== Status Code Tests ====================

    #[test]
    fn test_response_status() {
        use async_graphql::{PathSegment, ServerError};

        let ok = async_graphql::Response::new(async_graphql::Value::Null);
        assert_eq!(response_status(&ok), StatusCode::OK);

        let invalid = async_graphql::Response::from_errors(vec![ServerError::new("Unknown field", None)]);
        assert_eq!(response_status(&invalid), StatusCode::BAD_REQUEST);

        let mut failed = ServerError::new("Failed to fetch content from the CMS", None);
        failed.path = vec![PathSegment::Field("posts".to_string())];
        let execution = async_graphql::Response::from_errors(vec![failed.clone()]);
        assert_eq!(response_status(&execution), StatusCode::INTERNAL_SERVER_ERROR);

        let mut partial = async_graphql::Response::new(async_graphql::Value::from_json(
            serde_json::json!({ "post": null }),
        )
        .unwrap());
        partial.errors = vec![failed];
        assert_eq!(response_status(&partial), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_graphql_cms_failure_is_server_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/spaces/space-id/content_types"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{
                    "sys": { "id": "post" },
                    "name": "Post",
                    "fields": [{ "id": "title", "type": "Symbol" }]
                }]
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/spaces/space-id/entries"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&mock_server)
            .await;

        let config = Config {
            cda_url: mock_server.uri(),
            cma_url: mock_server.uri(),
            ..create_test_config()
        };
        let client = CmsClient::new(&config);
        let locale_schema = schema::create_locale_schema(&client, "en")
            .await
            .expect("Should build schema");

        let state = create_state(&[], GraphQlOptions::default());
        state.routes.mount(locale_schema);

        let response = send(
            router(state),
            "POST",
            "/en/graphql",
            Body::from(r#"{"query":"{ posts { title } }"}"#),
        )
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_cors(&response);
        let json = body_json(response).await;
        assert_eq!(json["data"], serde_json::Value::Null);
        assert_eq!(json["errors"][0]["message"], schema::CMS_ERROR_MESSAGE);
        assert!(!json.to_string().contains("down"));
    }
}
