//! The router facade: configuration install, the navigation API, and the
//! shared state the transition pipeline operates on.

mod activation;
pub(crate) mod transition;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::future::LocalBoxFuture;

use crate::config::validation::validate_config;
use crate::config::{ComponentId, Route};
use crate::error::{Result, RouterError};
use crate::events::{Event, NavigationSource};
use crate::guards::{TokenRegistry, TokenResolver};
use crate::loader::RouteLoader;
use crate::location::{LocationAdapter, MemoryLocation};
use crate::outlet::OutletContexts;
use crate::state::{create_empty_state, ActivatedRoute, ParamsInheritance, RouterState,
    RouterStateSnapshot};
use crate::strategies::{
    DefaultRouteReuseStrategy, DefaultUrlHandlingStrategy, RouteReuseStrategy, UrlHandlingStrategy,
};
use crate::url::creation::{create_url_tree, Command};
use crate::url::serializer::{DefaultUrlSerializer, UrlSerializer};
use crate::url::{contains_tree, QueryParams, UrlTree};

use self::transition::{PendingNavigation, SharedCompletion};

/// When the router performs its first navigation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InitialNavigation {
    /// Navigate to the current location when `initialize` is called, and
    /// hold initialization until the navigation settles.
    #[default]
    Enabled,
    /// Only subscribe to location changes; no initial navigation.
    Disabled,
    /// Navigate on initialization without holding it open. In this
    /// headless core this behaves like `Enabled`; the distinction matters
    /// only to platform bootstrap integrations.
    LegacyEnabled,
    /// Like `Disabled`.
    LegacyDisabled,
}

/// How per-navigation query parameters combine with the current ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueryParamsHandling {
    /// The provided parameters replace the current ones.
    #[default]
    Replace,
    /// The provided parameters are merged over the current ones.
    Merge,
    /// The current parameters are kept; provided ones are ignored.
    Preserve,
}

/// Options for a single navigation.
#[derive(Clone, Default)]
pub struct NavigationExtras {
    /// Resolve relative commands against this route instead of the root.
    pub relative_to: Option<Rc<ActivatedRoute>>,
    /// Query parameters for the target URL.
    pub query_params: Option<QueryParams>,
    /// Fragment for the target URL.
    pub fragment: Option<String>,
    /// How `query_params` combines with the current URL's parameters.
    pub query_params_handling: QueryParamsHandling,
    /// Keep the current fragment instead of `fragment`.
    pub preserve_fragment: bool,
    /// Commit the navigation without touching the location.
    pub skip_location_change: bool,
    /// Replace the current history entry instead of pushing.
    pub replace_url: bool,
}

/// An asynchronous hook run inside the navigation pipeline.
pub trait NavigationHook {
    /// Runs with the target snapshot; an error fails the navigation.
    fn run(&self, snapshot: &RouterStateSnapshot) -> LocalBoxFuture<'static, anyhow::Result<()>>;
}

impl<F> NavigationHook for F
where
    F: Fn(&RouterStateSnapshot) -> LocalBoxFuture<'static, anyhow::Result<()>>,
{
    fn run(&self, snapshot: &RouterStateSnapshot) -> LocalBoxFuture<'static, anyhow::Result<()>> {
        self(snapshot)
    }
}

/// Maps a navigation error to the navigation's promised outcome. The
/// default propagates the error.
pub type ErrorHandler = Rc<dyn Fn(RouterError) -> Result<bool>>;

/// Router construction options: behavior switches plus collaborator
/// overrides. Unset collaborators fall back to the defaults (in-memory
/// location, empty token registry, default serializer and strategies).
#[derive(Default)]
pub struct RouterConfig {
    pub(crate) enable_tracing: bool,
    pub(crate) initial_navigation: InitialNavigation,
    pub(crate) params_inheritance: ParamsInheritance,
    pub(crate) root_component: Option<ComponentId>,
    pub(crate) error_handler: Option<ErrorHandler>,
    pub(crate) before_preactivation: Option<Rc<dyn NavigationHook>>,
    pub(crate) after_preactivation: Option<Rc<dyn NavigationHook>>,
    pub(crate) serializer: Option<Box<dyn UrlSerializer>>,
    pub(crate) location: Option<Rc<dyn LocationAdapter>>,
    pub(crate) loader: Option<Rc<dyn RouteLoader>>,
    pub(crate) resolver: Option<Rc<dyn TokenResolver>>,
    pub(crate) reuse_strategy: Option<Rc<dyn RouteReuseStrategy>>,
    pub(crate) url_handling: Option<Rc<dyn UrlHandlingStrategy>>,
}

impl RouterConfig {
    /// Options with every default.
    pub fn new() -> RouterConfig {
        RouterConfig::default()
    }

    /// Logs every emitted event.
    pub fn enable_tracing(mut self, on: bool) -> Self {
        self.enable_tracing = on;
        self
    }

    /// Selects the initial navigation mode.
    pub fn initial_navigation(mut self, mode: InitialNavigation) -> Self {
        self.initial_navigation = mode;
        self
    }

    /// Selects the params/data inheritance mode.
    pub fn params_inheritance(mut self, mode: ParamsInheritance) -> Self {
        self.params_inheritance = mode;
        self
    }

    /// Identifies the root component in the state tree.
    pub fn root_component(mut self, id: &'static str) -> Self {
        self.root_component = Some(ComponentId(id));
        self
    }

    /// Installs a navigation error handler.
    pub fn error_handler(
        mut self,
        handler: impl Fn(RouterError) -> Result<bool> + 'static,
    ) -> Self {
        self.error_handler = Some(Rc::new(handler));
        self
    }

    /// Hook run after recognition, before guards.
    pub fn before_preactivation(mut self, hook: impl NavigationHook + 'static) -> Self {
        self.before_preactivation = Some(Rc::new(hook));
        self
    }

    /// Hook run after resolvers, before activation.
    pub fn after_preactivation(mut self, hook: impl NavigationHook + 'static) -> Self {
        self.after_preactivation = Some(Rc::new(hook));
        self
    }

    /// Overrides the URL serializer.
    pub fn serializer(mut self, serializer: impl UrlSerializer + 'static) -> Self {
        self.serializer = Some(Box::new(serializer));
        self
    }

    /// Installs the location collaborator.
    pub fn location(mut self, location: Rc<dyn LocationAdapter>) -> Self {
        self.location = Some(location);
        self
    }

    /// Installs the lazy-route loader collaborator.
    pub fn loader(mut self, loader: Rc<dyn RouteLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Installs the root token resolver.
    pub fn resolver(mut self, resolver: Rc<dyn TokenResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Overrides the route reuse strategy.
    pub fn reuse_strategy(mut self, strategy: Rc<dyn RouteReuseStrategy>) -> Self {
        self.reuse_strategy = Some(strategy);
        self
    }

    /// Overrides the URL handling strategy.
    pub fn url_handling(mut self, strategy: Rc<dyn UrlHandlingStrategy>) -> Self {
        self.url_handling = Some(strategy);
        self
    }
}

/// The in-flight navigation, for introspection.
#[derive(Clone)]
pub struct ActiveNavigation {
    /// Navigation id.
    pub id: u64,
    /// What triggered it.
    pub source: NavigationSource,
    /// The raw requested URL.
    pub url: String,
    /// The extras it was requested with.
    pub extras: NavigationExtras,
}

pub(crate) struct RouterData {
    pub(crate) config: RefCell<Vec<Rc<Route>>>,
    pub(crate) enable_tracing: bool,
    pub(crate) initial_navigation: InitialNavigation,
    pub(crate) params_inheritance: ParamsInheritance,
    pub(crate) root_component: Option<ComponentId>,
    pub(crate) error_handler: Option<ErrorHandler>,
    pub(crate) before_preactivation: Option<Rc<dyn NavigationHook>>,
    pub(crate) after_preactivation: Option<Rc<dyn NavigationHook>>,
    pub(crate) serializer: Box<dyn UrlSerializer>,
    pub(crate) location: Rc<dyn LocationAdapter>,
    pub(crate) loader: Option<Rc<dyn RouteLoader>>,
    pub(crate) resolver: Rc<dyn TokenResolver>,
    pub(crate) reuse_strategy: Rc<dyn RouteReuseStrategy>,
    pub(crate) url_handling: Rc<dyn UrlHandlingStrategy>,
    pub(crate) root_contexts: Rc<OutletContexts>,
    pub(crate) current_url_tree: RefCell<UrlTree>,
    pub(crate) raw_url_tree: RefCell<UrlTree>,
    pub(crate) router_state: RefCell<RouterState>,
    pub(crate) navigation_id: Cell<u64>,
    pub(crate) navigated: Cell<bool>,
    pub(crate) event_senders: RefCell<Vec<UnboundedSender<Event>>>,
    pub(crate) queue: RefCell<VecDeque<PendingNavigation>>,
    pub(crate) processing: Cell<bool>,
    pub(crate) active: RefCell<Option<ActiveNavigation>>,
    pub(crate) active_completion: RefCell<Option<SharedCompletion>>,
}

/// The client-side router: maps URL strings into an activated route state
/// through a serialized, cancelable navigation pipeline.
#[derive(Clone)]
pub struct Router {
    pub(crate) data: Rc<RouterData>,
}

impl Router {
    /// Builds a router over `routes`, validating them first.
    pub fn new(routes: Vec<Route>, config: RouterConfig) -> Result<Router> {
        let routes: Vec<Rc<Route>> = routes.into_iter().map(Rc::new).collect();
        validate_config(&routes)?;

        let root_component = config.root_component;
        let empty_tree = UrlTree::empty();
        let data = Rc::new(RouterData {
            config: RefCell::new(routes),
            enable_tracing: config.enable_tracing,
            initial_navigation: config.initial_navigation,
            params_inheritance: config.params_inheritance,
            root_component,
            error_handler: config.error_handler,
            before_preactivation: config.before_preactivation,
            after_preactivation: config.after_preactivation,
            serializer: config
                .serializer
                .unwrap_or_else(|| Box::new(DefaultUrlSerializer)),
            location: config
                .location
                .unwrap_or_else(|| MemoryLocation::new() as Rc<dyn LocationAdapter>),
            loader: config.loader,
            resolver: config
                .resolver
                .unwrap_or_else(|| Rc::new(TokenRegistry::new())),
            reuse_strategy: config
                .reuse_strategy
                .unwrap_or_else(|| Rc::new(DefaultRouteReuseStrategy)),
            url_handling: config
                .url_handling
                .unwrap_or_else(|| Rc::new(DefaultUrlHandlingStrategy)),
            root_contexts: OutletContexts::new(),
            current_url_tree: RefCell::new(empty_tree.clone()),
            raw_url_tree: RefCell::new(empty_tree.clone()),
            router_state: RefCell::new(create_empty_state(&empty_tree, root_component)),
            navigation_id: Cell::new(0),
            navigated: Cell::new(false),
            event_senders: RefCell::new(Vec::new()),
            queue: RefCell::new(VecDeque::new()),
            processing: Cell::new(false),
            active: RefCell::new(None),
            active_completion: RefCell::new(None),
        });
        Ok(Router { data })
    }

    /// Replaces the route configuration; the next navigation uses it.
    pub fn reset_config(&self, routes: Vec<Route>) -> Result<()> {
        let routes: Vec<Rc<Route>> = routes.into_iter().map(Rc::new).collect();
        validate_config(&routes)?;
        *self.data.config.borrow_mut() = routes;
        self.data.navigated.set(false);
        Ok(())
    }

    /// A stream of lifecycle events. Every call returns an independent
    /// subscription.
    pub fn events(&self) -> UnboundedReceiver<Event> {
        let (tx, rx) = unbounded();
        self.data.event_senders.borrow_mut().push(tx);
        rx
    }

    /// The current URL, serialized.
    pub fn url(&self) -> String {
        self.data
            .serializer
            .serialize(&self.data.current_url_tree.borrow())
    }

    /// The current URL tree.
    pub fn url_tree(&self) -> UrlTree {
        self.data.current_url_tree.borrow().clone()
    }

    /// The current live router state.
    pub fn router_state(&self) -> RouterState {
        self.data.router_state.borrow().clone()
    }

    /// The in-flight navigation, if any.
    pub fn current_navigation(&self) -> Option<ActiveNavigation> {
        self.data.active.borrow().clone()
    }

    /// True once at least one navigation has committed since the current
    /// configuration was installed.
    pub fn navigated(&self) -> bool {
        self.data.navigated.get()
    }

    /// The root outlet context map; the view layer registers its outlets
    /// here.
    pub fn root_outlet_contexts(&self) -> Rc<OutletContexts> {
        self.data.root_contexts.clone()
    }

    /// The location collaborator.
    pub fn location(&self) -> Rc<dyn LocationAdapter> {
        self.data.location.clone()
    }

    /// True when `url` is contained in the current URL (`exact` requires
    /// structural equality).
    pub fn is_active(&self, url: &str, exact: bool) -> Result<bool> {
        let tree = self.data.serializer.parse(url)?;
        Ok(contains_tree(
            &self.data.current_url_tree.borrow(),
            &tree,
            exact,
        ))
    }

    /// Builds a URL tree from navigation commands and extras, resolved
    /// against the current state.
    pub fn create_url_tree(
        &self,
        commands: Vec<Command>,
        extras: &NavigationExtras,
    ) -> Result<UrlTree> {
        let relative = extras
            .relative_to
            .clone()
            .unwrap_or_else(|| self.data.router_state.borrow().root());
        let snapshot = relative.snapshot();
        let current = self.data.current_url_tree.borrow().clone();

        let query_params = match extras.query_params_handling {
            QueryParamsHandling::Merge => {
                let mut merged = current.query_params.clone();
                if let Some(provided) = &extras.query_params {
                    for (k, v) in provided.iter() {
                        merged.insert(k.clone(), v.clone());
                    }
                }
                merged
            }
            QueryParamsHandling::Preserve => current.query_params.clone(),
            QueryParamsHandling::Replace => extras.query_params.clone().unwrap_or_default(),
        };
        let fragment = if extras.preserve_fragment {
            current.fragment.clone()
        } else {
            extras.fragment.clone()
        };

        create_url_tree(&snapshot, &current, commands, query_params, fragment)
    }

    /// Navigates to a URL string. The returned future resolves `Ok(true)`
    /// on commit, `Ok(false)` on cancellation, and an error when the
    /// pipeline fails without an error handler.
    pub fn navigate_by_url(
        &self,
        url: &str,
        extras: NavigationExtras,
    ) -> LocalBoxFuture<'static, Result<bool>> {
        match self.data.serializer.parse(url) {
            Ok(tree) => self.navigate_by_url_tree(tree, extras),
            Err(e) => Box::pin(futures::future::ready(Err(e.into()))),
        }
    }

    /// Navigates to an already-built URL tree.
    pub fn navigate_by_url_tree(
        &self,
        tree: UrlTree,
        extras: NavigationExtras,
    ) -> LocalBoxFuture<'static, Result<bool>> {
        let router = self.clone();
        let completion =
            self.schedule_navigation(tree, NavigationSource::Imperative, extras);
        Box::pin(async move { router.drive_until(completion).await })
    }

    /// Applies a command list relative to `extras.relative_to` and
    /// navigates to the result.
    pub fn navigate(
        &self,
        commands: Vec<Command>,
        extras: NavigationExtras,
    ) -> LocalBoxFuture<'static, Result<bool>> {
        match self.create_url_tree(commands, &extras) {
            Ok(tree) => self.navigate_by_url_tree(tree, extras),
            Err(e) => Box::pin(futures::future::ready(Err(e))),
        }
    }

    /// Subscribes to the location collaborator and, depending on the
    /// configured mode, performs the initial navigation.
    pub async fn initialize(&self) -> Result<bool> {
        let weak = Rc::downgrade(&self.data);
        self.data.location.subscribe(Box::new(move |change| {
            if let Some(data) = Weak::upgrade(&weak) {
                Router { data }.enqueue_location_change(&change.url, change.source);
            }
        }));

        match self.data.initial_navigation {
            InitialNavigation::Enabled | InitialNavigation::LegacyEnabled => {
                let path = self.data.location.path();
                self.navigate_by_url(&path, NavigationExtras::default())
                    .await
            }
            InitialNavigation::Disabled | InitialNavigation::LegacyDisabled => Ok(false),
        }
    }

    /// Runs any queued navigations (for example, ones enqueued by
    /// location events) to completion.
    pub async fn process_pending(&self) {
        self.drive_queue().await;
    }

    fn enqueue_location_change(&self, url: &str, source: NavigationSource) {
        match self.data.serializer.parse(url) {
            Ok(tree) => {
                self.schedule_navigation(tree, source, NavigationExtras::default());
            }
            Err(e) => {
                log::error!("ignoring unparsable location change `{url}`: {e}");
            }
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        if self.data.enable_tracing {
            log::info!(
                "[{}] {}: {:?}",
                event.id().unwrap_or(self.data.navigation_id.get()),
                event.kind(),
                event
            );
        } else {
            log::trace!(
                "[{}] {}",
                event.id().unwrap_or(self.data.navigation_id.get()),
                event.kind()
            );
        }
        self.data
            .event_senders
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    pub(crate) fn schedule_navigation(
        &self,
        raw_url: UrlTree,
        source: NavigationSource,
        extras: NavigationExtras,
    ) -> SharedCompletion {
        let raw_string = self.data.serializer.serialize(&raw_url);

        // Browser-replayed pop/hash events collide with the in-flight or
        // most recently queued navigation; fold them into its outcome.
        if let Some(active) = self.data.active.borrow().as_ref() {
            if active.source == source && active.url == raw_string {
                if let Some(completion) = self.data.active_completion.borrow().clone() {
                    log::debug!(
                        "[{}] absorbing duplicate {source:?} navigation to `{raw_string}`",
                        active.id
                    );
                    return completion;
                }
            }
        }
        if let Some(last) = self.data.queue.borrow().back() {
            if last.source == source && last.raw_string == raw_string {
                log::debug!(
                    "[{}] absorbing duplicate {source:?} navigation to `{raw_string}`",
                    last.id
                );
                return last.completion.clone();
            }
        }

        let id = self.data.navigation_id.get() + 1;
        self.data.navigation_id.set(id);
        log::debug!("[{id}] scheduled navigation to `{raw_string}` ({source:?})");

        let completion = SharedCompletion::new();
        self.data.queue.borrow_mut().push_back(PendingNavigation {
            id,
            source,
            raw_url,
            raw_string,
            extras,
            completion: completion.clone(),
        });
        completion
    }
}
