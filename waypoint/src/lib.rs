//! Waypoint &ndash; a client-side router core.
//!
//! Waypoint maps URL strings into a hierarchical activated-route state,
//! reconciles that state with the previous navigation, and drives guards
//! and resolvers through a serialized, cancelable transition pipeline. It
//! renders nothing itself: the view layer, browser location, and lazy
//! module loading are collaborators behind traits ([`outlet`], [`location`],
//! [`loader`]), which keeps the core headless and testable.
//!
//! The pieces, bottom up:
//!
//! - [`url`]: the URL tree model, its grammar (secondary outlets in
//!   parentheses, matrix and query parameters, fragment), parsing,
//!   serialization, and command-list tree derivation.
//! - [`config`]: the route table and its matching rules.
//! - [`guards`]: guard/resolver traits and the token registry.
//! - [`state`]: activated route snapshots and their live, stream-carrying
//!   counterparts.
//! - [`Router`]: the facade: install a configuration, navigate, observe
//!   [`events::Event`]s.
//!
//! ```
//! use waypoint::{Route, Router, RouterConfig};
//!
//! let router = Router::new(
//!     vec![
//!         Route::path("team/:id").component("TeamCmp").children(vec![
//!             Route::path("user/:name").component("UserCmp"),
//!         ]),
//!     ],
//!     RouterConfig::new().root_component("AppCmp"),
//! )
//! .unwrap();
//!
//! let committed = futures::executor::block_on(
//!     router.navigate_by_url("/team/33/user/bob", Default::default()),
//! )
//! .unwrap();
//! assert!(committed);
//! assert_eq!(router.url(), "/team/33/user/bob");
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub(crate) mod expansion;
pub mod guards;
pub mod loader;
pub mod location;
pub mod outlet;
pub(crate) mod preactivation;
pub(crate) mod recognition;
pub mod router;
pub mod state;
pub mod strategies;
pub mod url;

pub use crate::config::{
    default_url_matcher, ComponentId, DataMap, PathMatch, Route, RouteTitle,
    RunGuardsAndResolvers, UrlMatchResult, UrlMatcher,
};
pub use crate::error::{ConfigError, ParseError, Result, RouterError};
pub use crate::events::{Event, NavigationSource};
pub use crate::guards::{
    CanActivate, CanActivateChild, CanDeactivate, CanLoad, CanMatch, GuardDecision, GuardFuture,
    GuardHandle, ResolveData, ResolveFuture, TokenRegistry, TokenResolver,
};
pub use crate::loader::{LoadFuture, LoadedRouterConfig, RouteLoader, StaticLoader};
pub use crate::location::{LocationAdapter, LocationChange, LocationOp, MemoryLocation};
pub use crate::outlet::{
    ComponentHandle, DetachedRouteHandle, OutletContext, OutletContexts, RecordingOutlet,
    RouterOutlet,
};
pub use crate::router::{
    ActiveNavigation, InitialNavigation, NavigationExtras, NavigationHook, QueryParamsHandling,
    Router, RouterConfig,
};
pub use crate::state::{
    ActivatedRoute, ActivatedRouteSnapshot, ParamsInheritance, RouterState, RouterStateSnapshot,
};
pub use crate::state::watch::Watch;
pub use crate::strategies::{
    DefaultRouteReuseStrategy, DefaultUrlHandlingStrategy, RouteReuseStrategy, UrlHandlingStrategy,
};
pub use crate::url::creation::Command;
pub use crate::url::serializer::{DefaultUrlSerializer, UrlSerializer};
pub use crate::url::{
    contains_tree, ParamMap, Params, QueryParams, QueryValue, UrlSegment, UrlSegmentGroup, UrlTree,
    PRIMARY_OUTLET,
};
