//! Application state shared across request handlers.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::db::Database;
use crate::lifecycle::Lifecycle;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    lifecycle: Lifecycle,
    catalog: Arc<Catalog>,
    /// Present when the registry is database-backed; readiness checks use it.
    db: Option<Database>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(lifecycle: Lifecycle, catalog: Arc<Catalog>, db: Option<Database>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                lifecycle,
                catalog,
                db,
            }),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn db(&self) -> Option<&Database> {
        self.inner.db.as_ref()
    }
}
