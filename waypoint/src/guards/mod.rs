//! Guards, resolvers and the token registry that supplies them.
//!
//! Route configurations reference guards by *token* (a plain string); the
//! router resolves a token at call time through a [`TokenResolver`], using
//! the resolver of the nearest lazily-loaded ancestor configuration. A
//! token resolves to a [`GuardHandle`], which names the capability the
//! registered value provides.
//!
//! Guards come in two spellings: a type implementing the matching trait, or
//! a bare closure with the trait's signature (covered by blanket impls).

use std::collections::HashMap;
use std::rc::Rc;

use anyhow::anyhow;
use futures::future::LocalBoxFuture;
use serde_json::Value;

use crate::config::Route;
use crate::state::{ActivatedRouteSnapshot, RouterStateSnapshot};
use crate::url::{UrlSegment, UrlTree};

/// What a guard decided.
#[derive(Clone, Debug)]
pub enum GuardDecision {
    /// Continue the navigation.
    Allow,
    /// Cancel the navigation without error.
    Forbid,
    /// Cancel the navigation and schedule a new one to this tree.
    Redirect(UrlTree),
}

impl GuardDecision {
    /// True for [`GuardDecision::Allow`].
    pub fn is_allow(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

impl From<bool> for GuardDecision {
    fn from(allowed: bool) -> GuardDecision {
        if allowed {
            GuardDecision::Allow
        } else {
            GuardDecision::Forbid
        }
    }
}

/// The deferred result of a guard.
pub type GuardFuture = LocalBoxFuture<'static, anyhow::Result<GuardDecision>>;

/// The deferred result of a data resolver.
pub type ResolveFuture = LocalBoxFuture<'static, anyhow::Result<Value>>;

/// An immediately-ready guard future.
pub fn ready(decision: GuardDecision) -> GuardFuture {
    Box::pin(futures::future::ready(Ok(decision)))
}

/// Gates activation of the route it is registered on.
pub trait CanActivate {
    /// Decides whether `route` may activate within `state`.
    fn can_activate(
        &self,
        route: Rc<ActivatedRouteSnapshot>,
        state: RouterStateSnapshot,
    ) -> GuardFuture;
}

/// Gates activation of any descendant of the route it is registered on.
pub trait CanActivateChild {
    /// Decides whether `child` may activate below the guarded route.
    fn can_activate_child(
        &self,
        child: Rc<ActivatedRouteSnapshot>,
        state: RouterStateSnapshot,
    ) -> GuardFuture;
}

/// Gates deactivation of the route it is registered on.
pub trait CanDeactivate {
    /// Decides whether `route` may be torn down when moving from
    /// `current` to `next`.
    fn can_deactivate(
        &self,
        route: Rc<ActivatedRouteSnapshot>,
        current: RouterStateSnapshot,
        next: RouterStateSnapshot,
    ) -> GuardFuture;
}

/// Gates the lazy load of a route's children.
pub trait CanLoad {
    /// Decides whether the deferred children of `route` may be loaded for
    /// the given segments.
    fn can_load(&self, route: Rc<Route>, segments: Vec<UrlSegment>) -> GuardFuture;
}

/// Gates whether a route may participate in matching at all.
pub trait CanMatch {
    /// Decides whether `route` may be considered for the given segments.
    fn can_match(&self, route: Rc<Route>, segments: Vec<UrlSegment>) -> GuardFuture;
}

/// Produces data required before a route activates.
pub trait ResolveData {
    /// Produces the value stored under the resolver's data key.
    fn resolve(&self, route: Rc<ActivatedRouteSnapshot>, state: RouterStateSnapshot)
        -> ResolveFuture;
}

impl<F> CanActivate for F
where
    F: Fn(Rc<ActivatedRouteSnapshot>, RouterStateSnapshot) -> GuardFuture,
{
    fn can_activate(
        &self,
        route: Rc<ActivatedRouteSnapshot>,
        state: RouterStateSnapshot,
    ) -> GuardFuture {
        self(route, state)
    }
}

impl<F> CanActivateChild for F
where
    F: Fn(Rc<ActivatedRouteSnapshot>, RouterStateSnapshot) -> GuardFuture,
{
    fn can_activate_child(
        &self,
        child: Rc<ActivatedRouteSnapshot>,
        state: RouterStateSnapshot,
    ) -> GuardFuture {
        self(child, state)
    }
}

impl<F> CanDeactivate for F
where
    F: Fn(Rc<ActivatedRouteSnapshot>, RouterStateSnapshot, RouterStateSnapshot) -> GuardFuture,
{
    fn can_deactivate(
        &self,
        route: Rc<ActivatedRouteSnapshot>,
        current: RouterStateSnapshot,
        next: RouterStateSnapshot,
    ) -> GuardFuture {
        self(route, current, next)
    }
}

impl<F> CanLoad for F
where
    F: Fn(Rc<Route>, Vec<UrlSegment>) -> GuardFuture,
{
    fn can_load(&self, route: Rc<Route>, segments: Vec<UrlSegment>) -> GuardFuture {
        self(route, segments)
    }
}

impl<F> CanMatch for F
where
    F: Fn(Rc<Route>, Vec<UrlSegment>) -> GuardFuture,
{
    fn can_match(&self, route: Rc<Route>, segments: Vec<UrlSegment>) -> GuardFuture {
        self(route, segments)
    }
}

impl<F> ResolveData for F
where
    F: Fn(Rc<ActivatedRouteSnapshot>, RouterStateSnapshot) -> ResolveFuture,
{
    fn resolve(
        &self,
        route: Rc<ActivatedRouteSnapshot>,
        state: RouterStateSnapshot,
    ) -> ResolveFuture {
        self(route, state)
    }
}

/// A value a token resolved to, tagged with the capability it provides.
#[derive(Clone)]
pub enum GuardHandle {
    /// An activation guard.
    CanActivate(Rc<dyn CanActivate>),
    /// A child-activation guard.
    CanActivateChild(Rc<dyn CanActivateChild>),
    /// A deactivation guard.
    CanDeactivate(Rc<dyn CanDeactivate>),
    /// A lazy-load guard.
    CanLoad(Rc<dyn CanLoad>),
    /// A match guard.
    CanMatch(Rc<dyn CanMatch>),
    /// A data resolver.
    Resolver(Rc<dyn ResolveData>),
}

/// Looks up guard and resolver instances by token.
///
/// Lazily loaded configurations carry their own resolver scoped over the
/// parent's; the router always resolves a token through the resolver of the
/// nearest ancestor that was lazily loaded.
pub trait TokenResolver {
    /// Resolves a token to a registered value, if any.
    fn get(&self, token: &str) -> Option<GuardHandle>;
}

/// A plain map-backed [`TokenResolver`], optionally chained to a parent.
#[derive(Clone, Default)]
pub struct TokenRegistry {
    entries: HashMap<String, GuardHandle>,
    parent: Option<Rc<dyn TokenResolver>>,
}

impl TokenRegistry {
    /// An empty registry with no parent.
    pub fn new() -> TokenRegistry {
        TokenRegistry::default()
    }

    /// An empty registry that falls back to `parent` for unknown tokens.
    pub fn with_parent(parent: Rc<dyn TokenResolver>) -> TokenRegistry {
        TokenRegistry {
            entries: HashMap::new(),
            parent: Some(parent),
        }
    }

    /// Registers an activation guard.
    pub fn can_activate(mut self, token: impl Into<String>, g: impl CanActivate + 'static) -> Self {
        self.entries
            .insert(token.into(), GuardHandle::CanActivate(Rc::new(g)));
        self
    }

    /// Registers a child-activation guard.
    pub fn can_activate_child(
        mut self,
        token: impl Into<String>,
        g: impl CanActivateChild + 'static,
    ) -> Self {
        self.entries
            .insert(token.into(), GuardHandle::CanActivateChild(Rc::new(g)));
        self
    }

    /// Registers a deactivation guard.
    pub fn can_deactivate(
        mut self,
        token: impl Into<String>,
        g: impl CanDeactivate + 'static,
    ) -> Self {
        self.entries
            .insert(token.into(), GuardHandle::CanDeactivate(Rc::new(g)));
        self
    }

    /// Registers a lazy-load guard.
    pub fn can_load(mut self, token: impl Into<String>, g: impl CanLoad + 'static) -> Self {
        self.entries
            .insert(token.into(), GuardHandle::CanLoad(Rc::new(g)));
        self
    }

    /// Registers a match guard.
    pub fn can_match(mut self, token: impl Into<String>, g: impl CanMatch + 'static) -> Self {
        self.entries
            .insert(token.into(), GuardHandle::CanMatch(Rc::new(g)));
        self
    }

    /// Registers a data resolver.
    pub fn resolver(mut self, token: impl Into<String>, r: impl ResolveData + 'static) -> Self {
        self.entries
            .insert(token.into(), GuardHandle::Resolver(Rc::new(r)));
        self
    }
}

impl TokenResolver for TokenRegistry {
    fn get(&self, token: &str) -> Option<GuardHandle> {
        self.entries
            .get(token)
            .cloned()
            .or_else(|| self.parent.as_ref().and_then(|p| p.get(token)))
    }
}

/// Resolves a token or fails with a descriptive runtime error.
pub(crate) fn resolve_token(
    resolver: &Rc<dyn TokenResolver>,
    token: &str,
) -> anyhow::Result<GuardHandle> {
    resolver
        .get(token)
        .ok_or_else(|| anyhow!("no provider registered for token '{token}'"))
}

/// Awaits every guard, then applies the verdicts in list order: the first
/// non-allow outcome wins no matter which guard finished first.
pub(crate) async fn run_guards(futures: Vec<GuardFuture>) -> anyhow::Result<GuardDecision> {
    if futures.is_empty() {
        return Ok(GuardDecision::Allow);
    }
    let results = futures::future::join_all(futures).await;
    for result in results {
        match result? {
            GuardDecision::Allow => continue,
            other => return Ok(other),
        }
    }
    Ok(GuardDecision::Allow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::cell::Cell;

    #[test]
    fn empty_guard_list_allows() {
        let decision = block_on(run_guards(Vec::new())).unwrap();
        assert!(decision.is_allow());
    }

    #[test]
    fn first_non_allow_in_list_order_wins() {
        // The forbidding guard is listed after the redirecting one, so the
        // redirect must win even though both resolve.
        let redirect = crate::url::serializer::parse_url("/login").unwrap();
        let futures = vec![
            ready(GuardDecision::Allow),
            ready(GuardDecision::Redirect(redirect)),
            ready(GuardDecision::Forbid),
        ];
        let decision = block_on(run_guards(futures)).unwrap();
        assert!(matches!(decision, GuardDecision::Redirect(_)));
    }

    #[test]
    fn errors_take_their_place_in_list_order() {
        let futures = vec![
            ready(GuardDecision::Forbid),
            Box::pin(futures::future::ready(Err(anyhow!("boom")))) as GuardFuture,
        ];
        let decision = block_on(run_guards(futures)).unwrap();
        assert!(matches!(decision, GuardDecision::Forbid));

        let futures = vec![
            Box::pin(futures::future::ready(Err(anyhow!("boom")))) as GuardFuture,
            ready(GuardDecision::Forbid),
        ];
        assert!(block_on(run_guards(futures)).is_err());
    }

    #[test]
    fn all_guards_are_polled_even_after_a_veto() {
        let polled = Rc::new(Cell::new(0));
        let make = |decision: GuardDecision| {
            let polled = polled.clone();
            Box::pin(async move {
                polled.set(polled.get() + 1);
                Ok(decision)
            }) as GuardFuture
        };
        let futures = vec![make(GuardDecision::Forbid), make(GuardDecision::Allow)];
        let decision = block_on(run_guards(futures)).unwrap();
        assert!(matches!(decision, GuardDecision::Forbid));
        assert_eq!(polled.get(), 2);
    }

    #[test]
    fn registry_falls_back_to_parent() {
        let parent: Rc<dyn TokenResolver> = Rc::new(TokenRegistry::new().can_load(
            "outer",
            |_route: Rc<Route>, _segments: Vec<UrlSegment>| ready(GuardDecision::Allow),
        ));
        let child = TokenRegistry::with_parent(parent).can_load(
            "inner",
            |_route: Rc<Route>, _segments: Vec<UrlSegment>| ready(GuardDecision::Forbid),
        );
        assert!(child.get("inner").is_some());
        assert!(child.get("outer").is_some());
        assert!(child.get("missing").is_none());
    }
}
