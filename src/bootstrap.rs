//! Startup: discover locales, start listening, then mount locales as they build.

use crate::cms::CmsClient;
use crate::config::Config;
use crate::locales::{fetch_space_locale_metas, SpaceLocaleMeta};
use crate::routes::{self, AppState, RouteTable};
use crate::schema::{create_locale_schema, BuildError, LocaleSchema};
use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Outcome of mounting every discovered locale
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MountReport {
    /// Locales mounted, in completion order
    pub mounted: Vec<String>,
    /// Locales whose build failed, with the error message
    pub failed: Vec<(String, String)>,
    /// Locales mounted more than once; the last build wins
    pub replaced: Vec<String>,
}

/// Build every locale concurrently and mount each one as soon as it is ready.
///
/// A failed build leaves its locale unmounted and does not affect the others.
pub async fn mount_locales<F, Fut>(locales: Vec<String>, routes: RouteTable, build: F) -> MountReport
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<LocaleSchema, BuildError>>,
{
    let mut pending: FuturesUnordered<_> = locales
        .into_iter()
        .map(|locale| {
            let build = build(locale.clone());
            async move { (locale, build.await) }
        })
        .collect();

    let mut report = MountReport::default();
    while let Some((locale, result)) = pending.next().await {
        match result {
            Ok(schema) => {
                if routes.mount(schema).is_some() {
                    warn!("[{}] Locale mounted twice, replacing previous schema", locale);
                    report.replaced.push(locale.clone());
                }
                info!("[{}] Mounted at {}", locale, routes::graphql_path(&locale));
                report.mounted.push(locale);
            }
            Err(e) => {
                error!("[{}] ✗ Failed to build schema: {}", locale, e);
                report.failed.push((locale, e.to_string()));
            }
        }
    }

    info!(
        "Locale mounting finished: {} mounted, {} failed",
        report.mounted.len(),
        report.failed.len()
    );
    report
}

/// A running gateway
pub struct Gateway {
    local_addr: SocketAddr,
    metas: Arc<Vec<SpaceLocaleMeta>>,
    routes: RouteTable,
    server: JoinHandle<std::io::Result<()>>,
    mounting: Option<JoinHandle<MountReport>>,
}

impl Gateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metas(&self) -> &[SpaceLocaleMeta] {
        &self.metas
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Wait until every locale build has settled
    pub async fn wait_for_locales(&mut self) -> Result<MountReport> {
        match self.mounting.take() {
            Some(handle) => handle.await.context("Locale mounting task panicked"),
            None => Ok(MountReport::default()),
        }
    }

    /// Stop serving and abandon any pending locale builds
    pub fn shutdown(&self) {
        self.server.abort();
        if let Some(mounting) = &self.mounting {
            mounting.abort();
        }
    }

    /// Run until the server stops
    pub async fn serve(self) -> Result<()> {
        self.server
            .await
            .context("Server task panicked")?
            .context("Server error")
    }
}

/// Start the gateway.
///
/// Locale discovery must succeed before anything binds: on failure the error
/// is returned and no port is opened. Per-locale schemas are then built in
/// the background and mounted while the server is already answering.
pub async fn start(config: &Config) -> Result<Gateway> {
    let client = CmsClient::new(config);

    info!("Fetching space settings for space {}", config.space_id);
    let metas = fetch_space_locale_metas(&client)
        .await
        .context("Failed to fetch space settings")?;
    let metas = Arc::new(metas);
    let locales: Vec<String> = metas.iter().map(|meta| meta.locale.clone()).collect();

    let routes = RouteTable::default();
    let app = routes::router(AppState {
        metas: metas.clone(),
        routes: routes.clone(),
        options: config.graphql,
    });

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    let local_addr = listener.local_addr()?;
    info!("Listening on http://{}", local_addr);

    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let mounting = tokio::spawn({
        let routes = routes.clone();
        async move {
            mount_locales(locales, routes, |locale| {
                let client = client.clone();
                async move { create_locale_schema(&client, &locale).await }
            })
            .await
        }
    });

    Ok(Gateway {
        local_addr,
        metas,
        routes,
        server,
        mounting: Some(mounting),
    })
}
