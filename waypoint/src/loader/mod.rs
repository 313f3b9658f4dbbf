//! The lazy-configuration loader seam.
//!
//! Routes with `load_children` defer their child table to a
//! [`RouteLoader`]. A successful load yields a [`LoadedRouterConfig`]: the
//! child routes plus the token resolver scoped to them. The result is
//! memoized on the route; the loader is asked at most once per route for
//! the lifetime of the configuration.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use anyhow::anyhow;
use futures::future::LocalBoxFuture;

use crate::config::validation::validate_config;
use crate::config::Route;
use crate::guards::{TokenRegistry, TokenResolver};

/// A lazily loaded child configuration: routes plus their scoped token
/// resolver.
#[derive(Clone)]
pub struct LoadedRouterConfig {
    /// The loaded child routes.
    pub routes: Vec<Rc<Route>>,
    /// Token resolver scoped to the loaded configuration. Guards below the
    /// lazy boundary resolve through it.
    pub resolver: Rc<dyn TokenResolver>,
}

impl LoadedRouterConfig {
    /// Bundles routes with their scoped resolver.
    pub fn new(routes: Vec<Rc<Route>>, resolver: Rc<dyn TokenResolver>) -> LoadedRouterConfig {
        LoadedRouterConfig { routes, resolver }
    }
}

impl fmt::Debug for LoadedRouterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedRouterConfig")
            .field("routes", &self.routes.len())
            .finish()
    }
}

/// The deferred result of a lazy configuration load.
pub type LoadFuture = LocalBoxFuture<'static, anyhow::Result<LoadedRouterConfig>>;

/// Supplies child configurations for routes with `load_children`.
pub trait RouteLoader {
    /// Loads the child configuration for `route`. `parent_resolver` is the
    /// token resolver in scope at the lazy boundary; implementations
    /// usually chain the loaded scope onto it.
    fn load(&self, parent_resolver: Rc<dyn TokenResolver>, route: Rc<Route>) -> LoadFuture;
}

/// An in-memory loader serving preregistered bundles, keyed by the route's
/// `load_children` value. Counts loads, which makes memoization observable
/// in tests.
#[derive(Default)]
pub struct StaticLoader {
    bundles: RefCell<HashMap<String, StaticBundle>>,
    load_counts: RefCell<HashMap<String, usize>>,
}

struct StaticBundle {
    routes: Vec<Rc<Route>>,
    resolver: Option<Rc<dyn TokenResolver>>,
}

impl StaticLoader {
    /// An empty loader.
    pub fn new() -> StaticLoader {
        StaticLoader::default()
    }

    /// Registers a bundle of routes under a key.
    pub fn register(&self, key: impl Into<String>, routes: Vec<Route>) {
        self.bundles.borrow_mut().insert(
            key.into(),
            StaticBundle {
                routes: routes.into_iter().map(Rc::new).collect(),
                resolver: None,
            },
        );
    }

    /// Registers a bundle with its own scoped token resolver.
    pub fn register_with_resolver(
        &self,
        key: impl Into<String>,
        routes: Vec<Route>,
        resolver: Rc<dyn TokenResolver>,
    ) {
        self.bundles.borrow_mut().insert(
            key.into(),
            StaticBundle {
                routes: routes.into_iter().map(Rc::new).collect(),
                resolver: Some(resolver),
            },
        );
    }

    /// How many times the bundle under `key` has been loaded.
    pub fn load_count(&self, key: &str) -> usize {
        self.load_counts.borrow().get(key).copied().unwrap_or(0)
    }
}

impl RouteLoader for StaticLoader {
    fn load(&self, parent_resolver: Rc<dyn TokenResolver>, route: Rc<Route>) -> LoadFuture {
        let key = route.load_children.clone().unwrap_or_default();
        let result = (|| {
            let bundles = self.bundles.borrow();
            let bundle = bundles
                .get(&key)
                .ok_or_else(|| anyhow!("no lazy bundle registered for key '{key}'"))?;
            validate_config(&bundle.routes).map_err(anyhow::Error::from)?;

            *self.load_counts.borrow_mut().entry(key.clone()).or_insert(0) += 1;
            log::debug!("loaded lazy bundle `{key}` ({} routes)", bundle.routes.len());

            let resolver = match &bundle.resolver {
                Some(own) => own.clone(),
                None => Rc::new(TokenRegistry::with_parent(parent_resolver))
                    as Rc<dyn TokenResolver>,
            };
            Ok(LoadedRouterConfig::new(bundle.routes.clone(), resolver))
        })();
        Box::pin(futures::future::ready(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn serves_registered_bundles() {
        let loader = StaticLoader::new();
        loader.register("admin", vec![Route::path("").component("AdminCmp")]);

        let route = Rc::new(Route::path("admin").load_children("admin"));
        let resolver: Rc<dyn TokenResolver> = Rc::new(TokenRegistry::new());
        let config = block_on(loader.load(resolver, route)).unwrap();
        assert_eq!(config.routes.len(), 1);
        assert_eq!(loader.load_count("admin"), 1);
    }

    #[test]
    fn unknown_keys_fail() {
        let loader = StaticLoader::new();
        let route = Rc::new(Route::path("admin").load_children("missing"));
        let resolver: Rc<dyn TokenResolver> = Rc::new(TokenRegistry::new());
        assert!(block_on(loader.load(resolver, route)).is_err());
    }

    #[test]
    fn loaded_bundles_are_validated() {
        let loader = StaticLoader::new();
        loader.register("broken", vec![Route::path("/bad").component("X")]);
        let route = Rc::new(Route::path("admin").load_children("broken"));
        let resolver: Rc<dyn TokenResolver> = Rc::new(TokenRegistry::new());
        assert!(block_on(loader.load(resolver, route)).is_err());
        assert_eq!(loader.load_count("broken"), 0);
    }
}
