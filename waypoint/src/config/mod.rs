//! The user-supplied route table.
//!
//! A [`Route`] describes one node of the configuration: how it matches URL
//! segments, what it activates, and which guards and resolvers gate it.
//! Routes are installed wrapped in `Rc`; the `Rc` identity is the config
//! identity used by state reuse and recognition.

pub mod validation;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use linked_hash_map::LinkedHashMap;
use serde_json::Value;

use crate::loader::LoadedRouterConfig;
use crate::url::{Params, UrlSegment, UrlSegmentGroup, PRIMARY_OUTLET};

/// Ordered map of arbitrary data attached to a route or produced by
/// resolvers.
pub type DataMap = LinkedHashMap<String, Value>;

/// Opaque identity of a renderable component. The core never interprets
/// it; the outlet collaborator does.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComponentId(pub &'static str);

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// How much of the remaining URL a route's `path` must account for.
///
/// On a [`Route`] the field is optional so that validation can tell an
/// explicit `Prefix` apart from the default; matching treats absence as
/// `Prefix`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PathMatch {
    /// The path may match a prefix of the remaining segments.
    #[default]
    Prefix,
    /// The path must consume every remaining segment, and the group may
    /// have no children left over.
    Full,
}

/// When guards and resolvers of a reused route run again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunGuardsAndResolvers {
    /// Re-run when the matched params or consumed URL changed.
    #[default]
    ParamsChange,
    /// Re-run when params, consumed URL or query params changed.
    ParamsOrQueryParamsChange,
    /// Re-run on every navigation.
    Always,
}

/// A route's title: fixed text, or produced by a resolver token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteTitle {
    /// The title is this string.
    Static(String),
    /// The title comes from the resolver registered under this token.
    Resolved(String),
}

/// The result of a successful URL match: the consumed segments and the
/// positional parameters bound along the way.
#[derive(Clone, Debug)]
pub struct UrlMatchResult {
    /// Segments consumed from the front of the remaining list.
    pub consumed: Vec<UrlSegment>,
    /// Positional parameters, name to the segment that bound it.
    pub pos_params: LinkedHashMap<String, UrlSegment>,
}

/// Custom URL matching logic for a route, replacing path matching.
pub trait UrlMatcher {
    /// Attempts to consume a prefix of `segments`. `None` means no match.
    fn matches(
        &self,
        segments: &[UrlSegment],
        group: &UrlSegmentGroup,
        route: &Route,
    ) -> Option<UrlMatchResult>;
}

impl<F> UrlMatcher for F
where
    F: Fn(&[UrlSegment], &UrlSegmentGroup, &Route) -> Option<UrlMatchResult>,
{
    fn matches(
        &self,
        segments: &[UrlSegment],
        group: &UrlSegmentGroup,
        route: &Route,
    ) -> Option<UrlMatchResult> {
        self(segments, group, route)
    }
}

/// Matches a route's `path` pattern against URL segments: literal parts
/// must be equal, `:name` parts bind the segment as a positional parameter.
pub fn default_url_matcher(
    segments: &[UrlSegment],
    group: &UrlSegmentGroup,
    route: &Route,
) -> Option<UrlMatchResult> {
    let path = route.path.as_deref().unwrap_or("");
    let parts: Vec<&str> = path.split('/').collect();

    if parts.len() > segments.len() {
        return None;
    }
    if route.path_match_mode() == PathMatch::Full
        && (group.has_children() || parts.len() < segments.len())
    {
        return None;
    }

    let mut pos_params = LinkedHashMap::new();
    for (part, segment) in parts.iter().zip(segments.iter()) {
        if let Some(name) = part.strip_prefix(':') {
            pos_params.insert(name.to_owned(), segment.clone());
        } else if *part != segment.path {
            return None;
        }
    }

    Some(UrlMatchResult {
        consumed: segments[..parts.len()].to_vec(),
        pos_params,
    })
}

/// One node of the route configuration.
///
/// Built with the fluent constructors; installed into the router as a
/// `Vec<Route>`. The structural invariants are enforced when the
/// configuration is installed, not at construction.
pub struct Route {
    /// The path pattern, without a leading `/`. Exclusive with `matcher`.
    pub path: Option<String>,
    /// Custom matcher replacing path matching. Exclusive with `path`.
    pub matcher: Option<Rc<dyn UrlMatcher>>,
    /// Prefix or full matching of `path`. `None` behaves as `Prefix`.
    pub path_match: Option<PathMatch>,
    /// The component mounted into the outlet when this route activates.
    pub component: Option<ComponentId>,
    /// Redirect target, absolute (leading `/`) or relative.
    pub redirect_to: Option<String>,
    /// The outlet this route fills. Defaults to `primary`.
    pub outlet: String,
    /// Tokens of guards gating activation.
    pub can_activate: Vec<String>,
    /// Tokens of guards gating activation of any child.
    pub can_activate_child: Vec<String>,
    /// Tokens of guards gating deactivation.
    pub can_deactivate: Vec<String>,
    /// Tokens of guards gating the lazy load of `load_children`.
    pub can_load: Vec<String>,
    /// Tokens of guards gating whether this route may match at all.
    pub can_match: Vec<String>,
    /// Resolver tokens keyed by the data key they populate.
    pub resolve: LinkedHashMap<String, String>,
    /// Static data merged into the activated snapshot.
    pub data: DataMap,
    /// The route's title, static or resolved.
    pub title: Option<RouteTitle>,
    /// Re-run policy for guards and resolvers on reused routes.
    pub run_guards_and_resolvers: RunGuardsAndResolvers,
    /// Eagerly configured child routes. Exclusive with `load_children`.
    pub children: Vec<Rc<Route>>,
    /// Key handed to the loader collaborator for lazily loaded children.
    pub load_children: Option<String>,
    pub(crate) loaded_config: RefCell<Option<LoadedRouterConfig>>,
}

impl Route {
    fn empty() -> Route {
        Route {
            path: None,
            matcher: None,
            path_match: None,
            component: None,
            redirect_to: None,
            outlet: PRIMARY_OUTLET.to_owned(),
            can_activate: Vec::new(),
            can_activate_child: Vec::new(),
            can_deactivate: Vec::new(),
            can_load: Vec::new(),
            can_match: Vec::new(),
            resolve: LinkedHashMap::new(),
            data: DataMap::new(),
            title: None,
            run_guards_and_resolvers: RunGuardsAndResolvers::default(),
            children: Vec::new(),
            load_children: None,
            loaded_config: RefCell::new(None),
        }
    }

    /// A route matching the given path pattern (no leading `/`).
    pub fn path(path: impl Into<String>) -> Route {
        Route {
            path: Some(path.into()),
            ..Route::empty()
        }
    }

    /// A route using a custom matcher instead of a path pattern.
    pub fn with_matcher(matcher: impl UrlMatcher + 'static) -> Route {
        Route {
            matcher: Some(Rc::new(matcher)),
            ..Route::empty()
        }
    }

    /// Sets the component this route mounts.
    pub fn component(mut self, id: &'static str) -> Route {
        self.component = Some(ComponentId(id));
        self
    }

    /// Sets the redirect target.
    pub fn redirect_to(mut self, target: impl Into<String>) -> Route {
        self.redirect_to = Some(target.into());
        self
    }

    /// Requires the path to consume all remaining segments.
    pub fn path_match_full(mut self) -> Route {
        self.path_match = Some(PathMatch::Full);
        self
    }

    /// Sets the path-match mode explicitly.
    pub fn path_match(mut self, mode: PathMatch) -> Route {
        self.path_match = Some(mode);
        self
    }

    /// The effective path-match mode (`Prefix` when unset).
    pub fn path_match_mode(&self) -> PathMatch {
        self.path_match.unwrap_or_default()
    }

    /// Places this route in a named outlet.
    pub fn outlet(mut self, name: impl Into<String>) -> Route {
        self.outlet = name.into();
        self
    }

    /// Adds eagerly configured child routes.
    pub fn children(mut self, children: Vec<Route>) -> Route {
        self.children = children.into_iter().map(Rc::new).collect();
        self
    }

    /// Defers children to the loader collaborator under the given key.
    pub fn load_children(mut self, key: impl Into<String>) -> Route {
        self.load_children = Some(key.into());
        self
    }

    /// Adds a `canActivate` guard token.
    pub fn can_activate(mut self, token: impl Into<String>) -> Route {
        self.can_activate.push(token.into());
        self
    }

    /// Adds a `canActivateChild` guard token.
    pub fn can_activate_child(mut self, token: impl Into<String>) -> Route {
        self.can_activate_child.push(token.into());
        self
    }

    /// Adds a `canDeactivate` guard token.
    pub fn can_deactivate(mut self, token: impl Into<String>) -> Route {
        self.can_deactivate.push(token.into());
        self
    }

    /// Adds a `canLoad` guard token.
    pub fn can_load(mut self, token: impl Into<String>) -> Route {
        self.can_load.push(token.into());
        self
    }

    /// Adds a `canMatch` guard token.
    pub fn can_match(mut self, token: impl Into<String>) -> Route {
        self.can_match.push(token.into());
        self
    }

    /// Registers a resolver token under a data key.
    pub fn resolve(mut self, key: impl Into<String>, token: impl Into<String>) -> Route {
        self.resolve.insert(key.into(), token.into());
        self
    }

    /// Attaches static data.
    pub fn data(mut self, key: impl Into<String>, value: Value) -> Route {
        self.data.insert(key.into(), value);
        self
    }

    /// Sets a static title.
    pub fn title(mut self, title: impl Into<String>) -> Route {
        self.title = Some(RouteTitle::Static(title.into()));
        self
    }

    /// Sets a resolver token producing the title.
    pub fn title_resolver(mut self, token: impl Into<String>) -> Route {
        self.title = Some(RouteTitle::Resolved(token.into()));
        self
    }

    /// Sets the guard/resolver re-run policy.
    pub fn run_guards_and_resolvers(mut self, mode: RunGuardsAndResolvers) -> Route {
        self.run_guards_and_resolvers = mode;
        self
    }

    /// True when the path pattern is the wildcard `**`.
    pub fn is_wildcard(&self) -> bool {
        self.path.as_deref() == Some("**")
    }

    pub(crate) fn loaded_config(&self) -> Option<LoadedRouterConfig> {
        self.loaded_config.borrow().clone()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Route");
        d.field("path", &self.path)
            .field("outlet", &self.outlet)
            .field("component", &self.component)
            .field("redirect_to", &self.redirect_to)
            .field("children", &self.children.len());
        if self.matcher.is_some() {
            d.field("matcher", &"<fn>");
        }
        if let Some(key) = &self.load_children {
            d.field("load_children", key);
        }
        d.finish()
    }
}

/// Compares route configs by `Rc` identity, treating two absent configs as
/// equal. This is the notion of "same route" used for reuse decisions.
pub(crate) fn same_config(a: Option<&Rc<Route>>, b: Option<&Rc<Route>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// A successful prefix match of a route against a segment list.
#[derive(Clone, Debug)]
pub(crate) struct RouteMatch {
    pub(crate) consumed: Vec<UrlSegment>,
    pub(crate) last_child: usize,
    pub(crate) pos_params: LinkedHashMap<String, UrlSegment>,
}

/// Runs route matching: the empty path short-circuit, then the route's own
/// matcher or the default one.
pub(crate) fn match_route(
    group: &UrlSegmentGroup,
    route: &Rc<Route>,
    segments: &[UrlSegment],
) -> Option<RouteMatch> {
    if route.path.as_deref() == Some("") {
        if route.path_match_mode() == PathMatch::Full && (group.has_children() || !segments.is_empty()) {
            return None;
        }
        return Some(RouteMatch {
            consumed: Vec::new(),
            last_child: 0,
            pos_params: LinkedHashMap::new(),
        });
    }

    let result = match &route.matcher {
        Some(matcher) => matcher.matches(segments, group, route),
        None => default_url_matcher(segments, group, route),
    }?;

    Some(RouteMatch {
        last_child: result.consumed.len(),
        pos_params: result.pos_params,
        consumed: result.consumed,
    })
}

/// Merges a match's positional parameters (as strings) with the matrix
/// parameters of the last consumed segment.
pub(crate) fn matched_parameters(m: &RouteMatch) -> Params {
    let mut params = Params::new();
    for (name, segment) in m.pos_params.iter() {
        params.insert(name.clone(), segment.path.clone());
    }
    if let Some(last) = m.consumed.last() {
        for (k, v) in last.parameters.iter() {
            params.insert(k.clone(), v.clone());
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::serializer::parse_url;

    fn segments(url: &str) -> Vec<UrlSegment> {
        parse_url(url)
            .unwrap()
            .root
            .child(PRIMARY_OUTLET)
            .map(|g| g.segments.clone())
            .unwrap_or_default()
    }

    #[test]
    fn literal_paths_must_be_equal() {
        let route = Rc::new(Route::path("team/archive"));
        let group = UrlSegmentGroup::empty();
        assert!(match_route(&group, &route, &segments("/team/archive")).is_some());
        assert!(match_route(&group, &route, &segments("/team/current")).is_none());
    }

    #[test]
    fn parameters_bind_segments() {
        let route = Rc::new(Route::path("team/:id"));
        let group = UrlSegmentGroup::empty();
        let m = match_route(&group, &route, &segments("/team/33/user")).unwrap();
        assert_eq!(m.consumed.len(), 2);
        assert_eq!(m.pos_params.get("id").unwrap().path, "33");
    }

    #[test]
    fn full_match_rejects_leftovers() {
        let route = Rc::new(Route::path("team").path_match_full());
        let group = UrlSegmentGroup::empty();
        assert!(match_route(&group, &route, &segments("/team")).is_some());
        assert!(match_route(&group, &route, &segments("/team/33")).is_none());
    }

    #[test]
    fn empty_path_consumes_nothing() {
        let route = Rc::new(Route::path(""));
        let group = UrlSegmentGroup::empty();
        let m = match_route(&group, &route, &segments("/team")).unwrap();
        assert!(m.consumed.is_empty());
        assert_eq!(m.last_child, 0);
    }

    #[test]
    fn empty_path_full_match_requires_exhaustion() {
        let route = Rc::new(Route::path("").path_match_full());
        let group = UrlSegmentGroup::empty();
        assert!(match_route(&group, &route, &[]).is_some());
        assert!(match_route(&group, &route, &segments("/team")).is_none());
    }

    #[test]
    fn matched_parameters_overlay_matrix_params_of_last_segment() {
        let route = Rc::new(Route::path("user/:name"));
        let group = UrlSegmentGroup::empty();
        let m = match_route(&group, &route, &segments("/user/bob;role=admin")).unwrap();
        let params = matched_parameters(&m);
        assert_eq!(params.get("name"), Some(&"bob".to_owned()));
        assert_eq!(params.get("role"), Some(&"admin".to_owned()));
    }

    #[test]
    fn custom_matchers_replace_path_matching() {
        let matcher = |segments: &[UrlSegment], _: &UrlSegmentGroup, _: &Route| {
            if segments.first().map(|s| s.path.starts_with("u-")).unwrap_or(false) {
                Some(UrlMatchResult {
                    consumed: segments[..1].to_vec(),
                    pos_params: LinkedHashMap::new(),
                })
            } else {
                None
            }
        };
        let route = Rc::new(Route::with_matcher(matcher));
        let group = UrlSegmentGroup::empty();
        assert!(match_route(&group, &route, &segments("/u-42")).is_some());
        assert!(match_route(&group, &route, &segments("/team")).is_none());
    }
}
