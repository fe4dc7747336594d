//! Handler units, packages of units, and the immutable set the engine binds.

use std::sync::Arc;

use axum::{Json, Router, routing::get};
use runner_protocol::{DESCRIPTION_DOCUMENT, Url};
use serde_json::json;

/// A named unit of request-handling logic.
///
/// Routes are relative to the server's base path; the engine mounts every
/// unit under that prefix.
pub trait HandlerUnit: Send + Sync + 'static {
    /// Unique name of the unit (used for duplicate detection and the description document).
    fn name(&self) -> &str;

    /// Build the unit's routes.
    fn routes(&self) -> Router;
}

/// An explicit discovery plugin: a named, fixed collection of handler units.
pub trait HandlerPackage: Send + Sync {
    fn name(&self) -> &str;

    fn units(&self) -> Vec<Arc<dyn HandlerUnit>>;
}

/// A handler unit backed by a prebuilt router.
#[derive(Clone)]
pub struct RouterUnit {
    name: String,
    router: Router,
}

impl RouterUnit {
    pub fn new(name: impl Into<String>, router: Router) -> Self {
        Self {
            name: name.into(),
            router,
        }
    }
}

impl HandlerUnit for RouterUnit {
    fn name(&self) -> &str {
        &self.name
    }

    fn routes(&self) -> Router {
        self.router.clone()
    }
}

impl std::fmt::Debug for RouterUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterUnit").field("name", &self.name).finish()
    }
}

/// Immutable snapshot of the registered units, taken when the engine binds.
#[derive(Clone, Default)]
pub struct HandlerSet {
    units: Vec<Arc<dyn HandlerUnit>>,
}

impl HandlerSet {
    pub fn new(units: Vec<Arc<dyn HandlerUnit>>) -> Self {
        Self { units }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name().to_string()).collect()
    }

    /// Merge every unit into one router mounted under the base URI's path,
    /// plus the description document.
    ///
    /// Two units declaring the same route is a programming error and panics
    /// inside axum, as any overlapping merge does.
    pub fn into_router(self, base_uri: &Url) -> Router {
        let description = json!({
            "baseUri": base_uri.as_str(),
            "units": self.names(),
        });

        let mut app = Router::new();
        for unit in &self.units {
            app = app.merge(unit.routes());
        }
        app = app.route(
            &format!("/{DESCRIPTION_DOCUMENT}"),
            get(move || {
                let description = description.clone();
                async move { Json(description) }
            }),
        );

        let prefix = base_uri.path().trim_end_matches('/');
        if prefix.is_empty() {
            app
        } else {
            Router::new().nest(prefix, app)
        }
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet").field("units", &self.names()).finish()
    }
}
