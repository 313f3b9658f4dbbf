//! Redirect expansion: rewriting a URL tree against the configuration
//! until it is in canonical, directly recognizable form.
//!
//! The walk mirrors recognition but is asynchronous: along the way it
//! realizes lazily loaded child configurations (gated by `canLoad`), runs
//! `canMatch` guards, and applies `redirectTo` rules. Relative redirects
//! re-enter matching with redirects disabled for the rewritten portion;
//! an absolute redirect restarts matching from the top exactly once.

use std::cell::Cell;
use std::rc::Rc;

use anyhow::anyhow;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use linked_hash_map::LinkedHashMap;

use crate::config::{match_route, PathMatch, Route};
use crate::error::RouterError;
use crate::guards::{
    resolve_token, run_guards, GuardDecision, GuardFuture, GuardHandle, TokenResolver,
};
use crate::loader::{LoadedRouterConfig, RouteLoader};
use crate::url::serializer::{serialize_paths, UrlSerializer};
use crate::url::{QueryParams, QueryValue, UrlSegment, UrlSegmentGroup, UrlTree, PRIMARY_OUTLET};

/// Lifecycle notification for lazy-configuration loads, forwarded to the
/// event stream by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoadPhase {
    Start,
    End,
}

/// How redirect expansion can end short of a canonical tree.
pub(crate) enum ExpandError {
    /// A `canLoad`/`canMatch` guard asked for a different URL.
    GuardRedirect(UrlTree),
    /// A terminal failure, surfaced as a navigation outcome.
    Router(RouterError),
}

impl From<RouterError> for ExpandError {
    fn from(e: RouterError) -> ExpandError {
        ExpandError::Router(e)
    }
}

/// Internal expansion signal; `NoMatch` backtracks to the next candidate,
/// the rest abort.
enum Expand {
    NoMatch(Rc<UrlSegmentGroup>),
    AbsoluteRedirect(UrlTree),
    GuardRedirect(UrlTree),
    Fatal(RouterError),
}

pub(crate) struct RedirectApplier<'a> {
    pub(crate) serializer: &'a dyn UrlSerializer,
    pub(crate) loader: Option<Rc<dyn RouteLoader>>,
    pub(crate) emit_load: &'a dyn Fn(LoadPhase, &Rc<Route>),
    /// The actual URL being navigated; redirect targets substitute query
    /// parameters from here.
    pub(crate) url_tree: &'a UrlTree,
    allow_redirects: Cell<bool>,
}

/// Expands `url_tree` against `config`, returning the canonical tree.
pub(crate) async fn apply_redirects(
    serializer: &dyn UrlSerializer,
    loader: Option<Rc<dyn RouteLoader>>,
    resolver: Rc<dyn TokenResolver>,
    emit_load: &dyn Fn(LoadPhase, &Rc<Route>),
    url_tree: &UrlTree,
    config: &[Rc<Route>],
) -> Result<UrlTree, ExpandError> {
    let applier = RedirectApplier {
        serializer,
        loader,
        emit_load,
        url_tree,
        allow_redirects: Cell::new(true),
    };

    match applier.expand(config, &resolver, url_tree).await {
        Ok(tree) => Ok(tree),
        Err(Expand::AbsoluteRedirect(tree)) => {
            // Re-enter matching once with redirects disabled, which keeps
            // mutually-absolute redirects from looping forever.
            log::trace!(" absolute redirect to `{tree}`; matching without redirects");
            applier.allow_redirects.set(false);
            match applier.expand(config, &resolver, &tree).await {
                Ok(tree) => Ok(tree),
                Err(e) => Err(applier.finalize_error(e)),
            }
        }
        Err(e) => Err(applier.finalize_error(e)),
    }
}

impl RedirectApplier<'_> {
    fn finalize_error(&self, e: Expand) -> ExpandError {
        match e {
            Expand::NoMatch(group) => ExpandError::Router(RouterError::NoMatch {
                segments: serialize_paths(&group),
            }),
            Expand::AbsoluteRedirect(_) => ExpandError::Router(RouterError::cancellation(
                "a second absolute redirect occurred while redirects were disabled",
            )),
            Expand::GuardRedirect(tree) => ExpandError::GuardRedirect(tree),
            Expand::Fatal(e) => ExpandError::Router(e),
        }
    }

    async fn expand(
        &self,
        config: &[Rc<Route>],
        resolver: &Rc<dyn TokenResolver>,
        tree: &UrlTree,
    ) -> Result<UrlTree, Expand> {
        let root = self
            .expand_segment_group(
                config.to_vec(),
                resolver.clone(),
                tree.root.clone(),
                PRIMARY_OUTLET.to_owned(),
            )
            .await?;
        Ok(finalize_tree(
            root,
            tree.query_params.clone(),
            tree.fragment.clone(),
        ))
    }

    fn expand_segment_group(
        &self,
        config: Vec<Rc<Route>>,
        resolver: Rc<dyn TokenResolver>,
        group: Rc<UrlSegmentGroup>,
        outlet: String,
    ) -> LocalBoxFuture<'_, Result<Rc<UrlSegmentGroup>, Expand>> {
        async move {
            if group.segments.is_empty() && group.has_children() {
                let children = self.expand_children(config, resolver, &group).await?;
                Ok(UrlSegmentGroup::new(Vec::new(), children))
            } else {
                let segments = group.segments.clone();
                self.expand_segment(config, resolver, group, segments, outlet, true)
                    .await
            }
        }
        .boxed_local()
    }

    /// Expands each child outlet, primary first, then insertion order.
    async fn expand_children(
        &self,
        config: Vec<Rc<Route>>,
        resolver: Rc<dyn TokenResolver>,
        group: &Rc<UrlSegmentGroup>,
    ) -> Result<LinkedHashMap<String, Rc<UrlSegmentGroup>>, Expand> {
        let mut ordered: Vec<(String, Rc<UrlSegmentGroup>)> = Vec::new();
        if let Some(primary) = group.child(PRIMARY_OUTLET) {
            ordered.push((PRIMARY_OUTLET.to_owned(), primary.clone()));
        }
        for (outlet, child) in group.children().iter() {
            if outlet != PRIMARY_OUTLET {
                ordered.push((outlet.clone(), child.clone()));
            }
        }

        let mut children = LinkedHashMap::new();
        for (outlet, child) in ordered {
            let expanded = self
                .expand_segment_group(config.clone(), resolver.clone(), child, outlet.clone())
                .await?;
            children.insert(outlet, expanded);
        }
        Ok(children)
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_segment(
        &self,
        routes: Vec<Rc<Route>>,
        resolver: Rc<dyn TokenResolver>,
        group: Rc<UrlSegmentGroup>,
        segments: Vec<UrlSegment>,
        outlet: String,
        allow_redirects: bool,
    ) -> LocalBoxFuture<'_, Result<Rc<UrlSegmentGroup>, Expand>> {
        async move {
            for route in &routes {
                match self
                    .expand_segment_against_route(
                        routes.clone(),
                        resolver.clone(),
                        route.clone(),
                        group.clone(),
                        segments.clone(),
                        outlet.clone(),
                        allow_redirects,
                    )
                    .await
                {
                    Err(Expand::NoMatch(_)) => continue,
                    other => return other,
                }
            }
            if no_leftovers_in_url(&group, &segments, &outlet) {
                return Ok(UrlSegmentGroup::empty());
            }
            Err(Expand::NoMatch(group))
        }
        .boxed_local()
    }

    #[allow(clippy::too_many_arguments)]
    async fn expand_segment_against_route(
        &self,
        routes: Vec<Rc<Route>>,
        resolver: Rc<dyn TokenResolver>,
        route: Rc<Route>,
        group: Rc<UrlSegmentGroup>,
        segments: Vec<UrlSegment>,
        outlet: String,
        allow_redirects: bool,
    ) -> Result<Rc<UrlSegmentGroup>, Expand> {
        if route.outlet != outlet {
            return Err(Expand::NoMatch(group));
        }

        if route.redirect_to.is_none() {
            return self
                .match_segment_against_route(resolver, route, group, segments)
                .await;
        }

        if allow_redirects && self.allow_redirects.get() {
            self.expand_redirect(routes, resolver, route, group, segments, outlet)
                .await
        } else {
            Err(Expand::NoMatch(group))
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn expand_redirect(
        &self,
        routes: Vec<Rc<Route>>,
        resolver: Rc<dyn TokenResolver>,
        route: Rc<Route>,
        group: Rc<UrlSegmentGroup>,
        segments: Vec<UrlSegment>,
        outlet: String,
    ) -> Result<Rc<UrlSegmentGroup>, Expand> {
        self.check_can_match(&resolver, &route, &segments).await?;

        let redirect_to = route
            .redirect_to
            .clone()
            .expect("caller checked redirect_to");

        if route.is_wildcard() {
            let new_tree =
                self.apply_redirect_commands(&[], &redirect_to, &LinkedHashMap::new())?;
            if redirect_to.starts_with('/') {
                return Err(Expand::AbsoluteRedirect(new_tree));
            }
            let new_segments = self.lineralize_segments(&redirect_to, new_tree)?;
            let new_group = UrlSegmentGroup::new(new_segments.clone(), LinkedHashMap::new());
            return self
                .expand_segment(routes, resolver, new_group, new_segments, outlet, false)
                .await;
        }

        let m = match_route(&group, &route, &segments)
            .ok_or_else(|| Expand::NoMatch(group.clone()))?;
        let new_tree = self.apply_redirect_commands(&m.consumed, &redirect_to, &m.pos_params)?;
        if redirect_to.starts_with('/') {
            return Err(Expand::AbsoluteRedirect(new_tree));
        }

        let mut new_segments = self.lineralize_segments(&redirect_to, new_tree)?;
        new_segments.extend_from_slice(&segments[m.last_child..]);
        self.expand_segment(routes, resolver, group, new_segments, outlet, false)
            .await
    }

    async fn match_segment_against_route(
        &self,
        resolver: Rc<dyn TokenResolver>,
        route: Rc<Route>,
        group: Rc<UrlSegmentGroup>,
        segments: Vec<UrlSegment>,
    ) -> Result<Rc<UrlSegmentGroup>, Expand> {
        self.check_can_match(&resolver, &route, &segments).await?;

        if route.is_wildcard() {
            // Realize the lazy configuration even on a wildcard, so the
            // recognizer sees the loaded routes.
            if route.load_children.is_some() {
                self.child_config(&resolver, &route, &segments).await?;
            }
            return Ok(UrlSegmentGroup::new(segments, LinkedHashMap::new()));
        }

        let m = match_route(&group, &route, &segments)
            .ok_or_else(|| Expand::NoMatch(group.clone()))?;
        let raw_sliced = segments[m.last_child..].to_vec();
        let loaded = self.child_config(&resolver, &route, &segments).await?;
        let child_config = loaded.routes;
        let child_resolver = loaded.resolver;

        let (split_group, sliced) = split(&group, &m.consumed, &raw_sliced, &child_config);

        if sliced.is_empty() && split_group.has_children() {
            let children = self
                .expand_children(child_config, child_resolver, &split_group)
                .await?;
            return Ok(UrlSegmentGroup::new(m.consumed, children));
        }

        if child_config.is_empty() && sliced.is_empty() {
            return Ok(UrlSegmentGroup::new(m.consumed, LinkedHashMap::new()));
        }

        let expanded = self
            .expand_segment(
                child_config,
                child_resolver,
                split_group,
                sliced,
                PRIMARY_OUTLET.to_owned(),
                true,
            )
            .await?;
        let mut all_segments = m.consumed;
        all_segments.extend(expanded.segments.iter().cloned());
        Ok(UrlSegmentGroup::new(
            all_segments,
            expanded.children().clone(),
        ))
    }

    /// Resolves the child configuration: eager children, the memoized lazy
    /// load, or a fresh load gated by `canLoad`.
    async fn child_config(
        &self,
        resolver: &Rc<dyn TokenResolver>,
        route: &Rc<Route>,
        segments: &[UrlSegment],
    ) -> Result<LoadedRouterConfig, Expand> {
        if !route.children.is_empty() {
            return Ok(LoadedRouterConfig::new(
                route.children.clone(),
                resolver.clone(),
            ));
        }

        if route.load_children.is_none() {
            return Ok(LoadedRouterConfig::new(Vec::new(), resolver.clone()));
        }

        if let Some(config) = route.loaded_config() {
            return Ok(config);
        }

        match self.run_load_guards(resolver, route, segments).await? {
            GuardDecision::Allow => {}
            GuardDecision::Redirect(tree) => return Err(Expand::GuardRedirect(tree)),
            GuardDecision::Forbid => {
                let path = route.path.as_deref().unwrap_or("");
                return Err(Expand::Fatal(RouterError::cancellation(format!(
                    "cannot load children because the guard of the route 'path: {path}' returned false"
                ))));
            }
        }

        let loader = self.loader.clone().ok_or_else(|| {
            Expand::Fatal(RouterError::runtime(anyhow!(
                "route 'path: {}' has load_children but no loader collaborator is installed",
                route.path.as_deref().unwrap_or("")
            )))
        })?;

        (self.emit_load)(LoadPhase::Start, route);
        let loaded = loader
            .load(resolver.clone(), route.clone())
            .await
            .map_err(|e| Expand::Fatal(RouterError::runtime(e)))?;
        (self.emit_load)(LoadPhase::End, route);

        *route.loaded_config.borrow_mut() = Some(loaded.clone());
        Ok(loaded)
    }

    async fn run_load_guards(
        &self,
        resolver: &Rc<dyn TokenResolver>,
        route: &Rc<Route>,
        segments: &[UrlSegment],
    ) -> Result<GuardDecision, Expand> {
        let mut futures: Vec<GuardFuture> = Vec::new();
        for token in &route.can_load {
            let handle = resolve_token(resolver, token)
                .map_err(|e| Expand::Fatal(RouterError::runtime(e)))?;
            match handle {
                GuardHandle::CanLoad(guard) => {
                    futures.push(guard.can_load(route.clone(), segments.to_vec()));
                }
                _ => {
                    return Err(Expand::Fatal(RouterError::runtime(anyhow!(
                        "token '{token}' does not resolve to a canLoad guard"
                    ))));
                }
            }
        }
        run_guards(futures)
            .await
            .map_err(|e| Expand::Fatal(RouterError::runtime(e)))
    }

    /// Runs `canMatch` guards; a veto cancels the navigation.
    async fn check_can_match(
        &self,
        resolver: &Rc<dyn TokenResolver>,
        route: &Rc<Route>,
        segments: &[UrlSegment],
    ) -> Result<(), Expand> {
        if route.can_match.is_empty() {
            return Ok(());
        }
        let mut futures: Vec<GuardFuture> = Vec::new();
        for token in &route.can_match {
            let handle = resolve_token(resolver, token)
                .map_err(|e| Expand::Fatal(RouterError::runtime(e)))?;
            match handle {
                GuardHandle::CanMatch(guard) => {
                    futures.push(guard.can_match(route.clone(), segments.to_vec()));
                }
                _ => {
                    return Err(Expand::Fatal(RouterError::runtime(anyhow!(
                        "token '{token}' does not resolve to a canMatch guard"
                    ))));
                }
            }
        }
        match run_guards(futures)
            .await
            .map_err(|e| Expand::Fatal(RouterError::runtime(e)))?
        {
            GuardDecision::Allow => Ok(()),
            GuardDecision::Redirect(tree) => Err(Expand::GuardRedirect(tree)),
            GuardDecision::Forbid => {
                let path = route.path.as_deref().unwrap_or("");
                Err(Expand::Fatal(RouterError::cancellation(format!(
                    "the guard of the route 'path: {path}' returned false"
                ))))
            }
        }
    }

    /// Builds the redirect target tree, substituting positional parameters
    /// and reusing actual segments (with their matrix parameters) for
    /// literals that appear in the consumed prefix.
    fn apply_redirect_commands(
        &self,
        consumed: &[UrlSegment],
        redirect_to: &str,
        pos_params: &LinkedHashMap<String, UrlSegment>,
    ) -> Result<UrlTree, Expand> {
        let target = self
            .serializer
            .parse(redirect_to)
            .map_err(|e| Expand::Fatal(e.into()))?;
        let new_root =
            self.create_segment_group(redirect_to, &target.root, consumed, pos_params)?;
        Ok(UrlTree::new(
            new_root,
            create_query_params(&target.query_params, &self.url_tree.query_params),
            target.fragment,
        ))
    }

    fn create_segment_group(
        &self,
        redirect_to: &str,
        group: &Rc<UrlSegmentGroup>,
        consumed: &[UrlSegment],
        pos_params: &LinkedHashMap<String, UrlSegment>,
    ) -> Result<Rc<UrlSegmentGroup>, Expand> {
        let segments = self.create_segments(redirect_to, &group.segments, consumed, pos_params)?;
        let mut children = LinkedHashMap::new();
        for (outlet, child) in group.children().iter() {
            children.insert(
                outlet.clone(),
                self.create_segment_group(redirect_to, child, consumed, pos_params)?,
            );
        }
        Ok(UrlSegmentGroup::new(segments, children))
    }

    fn create_segments(
        &self,
        redirect_to: &str,
        target_segments: &[UrlSegment],
        actual_segments: &[UrlSegment],
        pos_params: &LinkedHashMap<String, UrlSegment>,
    ) -> Result<Vec<UrlSegment>, Expand> {
        target_segments
            .iter()
            .map(|segment| {
                if let Some(name) = segment.path.strip_prefix(':') {
                    pos_params.get(name).cloned().ok_or_else(|| {
                        Expand::Fatal(RouterError::runtime(anyhow!(
                            "cannot redirect to '{redirect_to}': cannot find ':{name}'"
                        )))
                    })
                } else {
                    Ok(actual_segments
                        .iter()
                        .find(|actual| actual.path == segment.path)
                        .cloned()
                        .unwrap_or_else(|| segment.clone()))
                }
            })
            .collect()
    }

    /// Flattens a redirect target into a plain segment list; only absolute
    /// redirects may carry named outlets.
    fn lineralize_segments(
        &self,
        redirect_to: &str,
        tree: UrlTree,
    ) -> Result<Vec<UrlSegment>, Expand> {
        let mut res = Vec::new();
        let mut current = tree.root;
        loop {
            res.extend(current.segments.iter().cloned());
            if current.num_children() == 0 {
                return Ok(res);
            }
            if current.num_children() > 1 || current.child(PRIMARY_OUTLET).is_none() {
                return Err(Expand::Fatal(RouterError::runtime(anyhow!(
                    "only absolute redirects can have named outlets. redirectTo: '{redirect_to}'"
                ))));
            }
            let next = current
                .child(PRIMARY_OUTLET)
                .cloned()
                .expect("primary child checked above");
            current = next;
        }
    }
}

fn finalize_tree(
    root_candidate: Rc<UrlSegmentGroup>,
    query_params: QueryParams,
    fragment: Option<String>,
) -> UrlTree {
    let root = if root_candidate.segments.is_empty() {
        root_candidate
    } else {
        let mut children = LinkedHashMap::new();
        children.insert(PRIMARY_OUTLET.to_owned(), root_candidate);
        UrlSegmentGroup::new(Vec::new(), children)
    };
    UrlTree::new(root, query_params, fragment)
}

/// Substitutes `:name` query values in a redirect target from the actual
/// query parameters.
fn create_query_params(redirect_params: &QueryParams, actual: &QueryParams) -> QueryParams {
    let mut res = QueryParams::new();
    for (k, v) in redirect_params.iter() {
        let substituted = match v {
            QueryValue::One(value) => match value.strip_prefix(':') {
                Some(name) => actual.get(name).cloned(),
                None => Some(v.clone()),
            },
            QueryValue::Many(_) => Some(v.clone()),
        };
        if let Some(value) = substituted {
            res.insert(k.clone(), value);
        }
    }
    res
}

fn no_leftovers_in_url(group: &Rc<UrlSegmentGroup>, segments: &[UrlSegment], outlet: &str) -> bool {
    segments.is_empty() && group.child(outlet).is_none()
}

/// The redirect-expansion variant of the empty-path split: creates empty
/// child groups for empty-path *redirect* routes, then folds a trivial
/// lone primary child back into its parent.
fn split(
    group: &Rc<UrlSegmentGroup>,
    consumed: &[UrlSegment],
    sliced: &[UrlSegment],
    config: &[Rc<Route>],
) -> (Rc<UrlSegmentGroup>, Vec<UrlSegment>) {
    if !sliced.is_empty() && contains_empty_path_redirects_with_named_outlets(group, sliced, config)
    {
        let mut children = LinkedHashMap::new();
        children.insert(
            PRIMARY_OUTLET.to_owned(),
            UrlSegmentGroup::new(sliced.to_vec(), group.children().clone()),
        );
        for route in config {
            if route.path.as_deref() == Some("") && route.outlet != PRIMARY_OUTLET {
                children.insert(route.outlet.clone(), UrlSegmentGroup::empty());
            }
        }
        let s = UrlSegmentGroup::new(consumed.to_vec(), children);
        return (merge_trivial_children(&s), Vec::new());
    }

    if sliced.is_empty() && contains_empty_path_redirects(group, sliced, config) {
        let mut children = group.children().clone();
        for route in config {
            if empty_path_redirect(group, sliced, route) && !children.contains_key(&route.outlet) {
                children.insert(route.outlet.clone(), UrlSegmentGroup::empty());
            }
        }
        let s = UrlSegmentGroup::new(group.segments.clone(), children);
        return (merge_trivial_children(&s), sliced.to_vec());
    }

    (group.clone(), sliced.to_vec())
}

fn merge_trivial_children(group: &Rc<UrlSegmentGroup>) -> Rc<UrlSegmentGroup> {
    if group.num_children() == 1 {
        if let Some(primary) = group.child(PRIMARY_OUTLET) {
            let mut segments = group.segments.clone();
            segments.extend(primary.segments.iter().cloned());
            return UrlSegmentGroup::new(segments, primary.children().clone());
        }
    }
    group.clone()
}

fn contains_empty_path_redirects_with_named_outlets(
    group: &Rc<UrlSegmentGroup>,
    sliced: &[UrlSegment],
    routes: &[Rc<Route>],
) -> bool {
    routes
        .iter()
        .any(|r| empty_path_redirect(group, sliced, r) && r.outlet != PRIMARY_OUTLET)
}

fn contains_empty_path_redirects(
    group: &Rc<UrlSegmentGroup>,
    sliced: &[UrlSegment],
    routes: &[Rc<Route>],
) -> bool {
    routes.iter().any(|r| empty_path_redirect(group, sliced, r))
}

fn empty_path_redirect(
    group: &Rc<UrlSegmentGroup>,
    sliced: &[UrlSegment],
    route: &Rc<Route>,
) -> bool {
    if (group.has_children() || !sliced.is_empty()) && route.path_match_mode() == PathMatch::Full {
        return false;
    }
    route.path.as_deref() == Some("") && route.redirect_to.is_some()
}
