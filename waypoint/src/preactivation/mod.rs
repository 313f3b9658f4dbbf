//! Preactivation: diffing the future state against the current one into
//! deactivation and activation check lists, then running guards and
//! resolvers in pipeline order.
//!
//! Deactivation checks collect child-before-parent; activation checks
//! collect depth-first, parent-before-child, each carrying the path from
//! the root so `canActivateChild` guards of every ancestor can run. Guard
//! lists resolve concurrently but verdicts apply in list order.

use std::collections::HashMap;
use std::rc::Rc;

use anyhow::anyhow;
use serde_json::Value;

use crate::config::{same_config, DataMap, RouteTitle, RunGuardsAndResolvers};
use crate::error::RouterError;
use crate::events::Event;
use crate::guards::{
    resolve_token, run_guards, GuardDecision, GuardFuture, GuardHandle, TokenResolver,
};
use crate::state::{
    equal_params_and_url_segments, inherited_params_data_resolve, ActivatedRouteSnapshot,
    ParamsInheritance, RouterStateSnapshot,
};

struct CanActivateCheck {
    /// Snapshots from the root to the route being activated.
    path: Vec<Rc<ActivatedRouteSnapshot>>,
}

struct CanDeactivateCheck {
    route: Rc<ActivatedRouteSnapshot>,
}

/// The collected checks of one navigation's guard/resolve phases.
pub(crate) struct Preactivation {
    future: RouterStateSnapshot,
    curr: RouterStateSnapshot,
    root_resolver: Rc<dyn TokenResolver>,
    can_activate_checks: Vec<CanActivateCheck>,
    can_deactivate_checks: Vec<CanDeactivateCheck>,
}

impl Preactivation {
    /// Diffs `future` against `curr` and collects both check lists.
    pub(crate) fn new(
        future: RouterStateSnapshot,
        curr: RouterStateSnapshot,
        root_resolver: Rc<dyn TokenResolver>,
    ) -> Preactivation {
        let mut pre = Preactivation {
            future,
            curr,
            root_resolver,
            can_activate_checks: Vec::new(),
            can_deactivate_checks: Vec::new(),
        };
        let future_root = pre.future.root();
        let curr_root = pre.curr.root();
        let root_path = vec![future_root.clone()];
        pre.setup_child_route_guards(&future_root, Some(curr_root), &root_path);
        pre
    }

    fn setup_child_route_guards(
        &mut self,
        future_node: &Rc<ActivatedRouteSnapshot>,
        curr_node: Option<Rc<ActivatedRouteSnapshot>>,
        future_path: &[Rc<ActivatedRouteSnapshot>],
    ) {
        let mut prev_children: HashMap<String, Rc<ActivatedRouteSnapshot>> = curr_node
            .map(|node| {
                node.children()
                    .into_iter()
                    .map(|c| (c.outlet().to_owned(), c))
                    .collect()
            })
            .unwrap_or_default();

        for child in future_node.children() {
            let mut path = future_path.to_vec();
            path.push(child.clone());
            let prev = prev_children.remove(child.outlet());
            self.setup_route_guards(&child, prev, path);
        }
        for (_, removed) in prev_children {
            self.deactivate_route_and_its_children(&removed);
        }
    }

    fn setup_route_guards(
        &mut self,
        future: &Rc<ActivatedRouteSnapshot>,
        curr: Option<Rc<ActivatedRouteSnapshot>>,
        future_path: Vec<Rc<ActivatedRouteSnapshot>>,
    ) {
        let reused = curr
            .as_ref()
            .map(|c| same_config(future.route_config().as_ref(), c.route_config().as_ref()))
            .unwrap_or(false);

        if let (Some(curr), true) = (&curr, reused) {
            let mode = future
                .route_config()
                .map(|c| c.run_guards_and_resolvers)
                .unwrap_or_default();
            let should_run = should_run_guards_and_resolvers(curr, future, mode);
            if should_run {
                self.can_activate_checks.push(CanActivateCheck {
                    path: future_path.clone(),
                });
            } else {
                // Carry the previous navigation's resolved data forward.
                future.set_data(curr.data());
                *future.resolved_data.borrow_mut() = curr.resolved_data.borrow().clone();
            }
            self.setup_child_route_guards(future, Some(curr.clone()), &future_path);
            if should_run {
                self.can_deactivate_checks.push(CanDeactivateCheck {
                    route: curr.clone(),
                });
            }
        } else {
            if let Some(curr) = &curr {
                self.deactivate_route_and_its_children(curr);
            }
            self.can_activate_checks.push(CanActivateCheck {
                path: future_path.clone(),
            });
            self.setup_child_route_guards(future, None, &future_path);
        }
    }

    fn deactivate_route_and_its_children(&mut self, route: &Rc<ActivatedRouteSnapshot>) {
        for child in route.children() {
            self.deactivate_route_and_its_children(&child);
        }
        self.can_deactivate_checks.push(CanDeactivateCheck {
            route: route.clone(),
        });
    }

    /// Runs all deactivation checks, then all activation checks, stopping
    /// at the first non-allow verdict.
    pub(crate) async fn check_guards(
        &self,
        emit: &dyn Fn(Event),
    ) -> Result<GuardDecision, RouterError> {
        let decision = self.run_can_deactivate_checks().await?;
        if !decision.is_allow() {
            return Ok(decision);
        }
        self.run_can_activate_checks(emit).await
    }

    async fn run_can_deactivate_checks(&self) -> Result<GuardDecision, RouterError> {
        for check in &self.can_deactivate_checks {
            let decision = self.run_can_deactivate(&check.route).await?;
            if !decision.is_allow() {
                return Ok(decision);
            }
        }
        Ok(GuardDecision::Allow)
    }

    async fn run_can_deactivate(
        &self,
        route: &Rc<ActivatedRouteSnapshot>,
    ) -> Result<GuardDecision, RouterError> {
        let tokens = route
            .route_config()
            .map(|c| c.can_deactivate.clone())
            .unwrap_or_default();
        if tokens.is_empty() {
            return Ok(GuardDecision::Allow);
        }

        let mut futures: Vec<GuardFuture> = Vec::new();
        for token in &tokens {
            match self.token(route, token)? {
                GuardHandle::CanDeactivate(guard) => futures.push(guard.can_deactivate(
                    route.clone(),
                    self.curr.clone(),
                    self.future.clone(),
                )),
                _ => {
                    return Err(RouterError::runtime(anyhow!(
                        "token '{token}' does not resolve to a canDeactivate guard"
                    )))
                }
            }
        }
        run_guards(futures).await.map_err(RouterError::runtime)
    }

    async fn run_can_activate_checks(
        &self,
        emit: &dyn Fn(Event),
    ) -> Result<GuardDecision, RouterError> {
        for check in &self.can_activate_checks {
            let target = check.path.last().expect("check paths are never empty");
            if let Some(parent) = target.parent() {
                emit(Event::ChildActivationStart { snapshot: parent });
            }
            emit(Event::ActivationStart {
                snapshot: target.clone(),
            });

            let decision = self.run_can_activate_child(&check.path).await?;
            if !decision.is_allow() {
                return Ok(decision);
            }
            let decision = self.run_can_activate(target).await?;
            if !decision.is_allow() {
                return Ok(decision);
            }
        }
        Ok(GuardDecision::Allow)
    }

    /// `canActivateChild` of every ancestor, nearest first.
    async fn run_can_activate_child(
        &self,
        path: &[Rc<ActivatedRouteSnapshot>],
    ) -> Result<GuardDecision, RouterError> {
        let target = path.last().expect("check paths are never empty");
        for ancestor in path[..path.len() - 1].iter().rev() {
            let tokens = ancestor
                .route_config()
                .map(|c| c.can_activate_child.clone())
                .unwrap_or_default();
            if tokens.is_empty() {
                continue;
            }

            let mut futures: Vec<GuardFuture> = Vec::new();
            for token in &tokens {
                match self.token(ancestor, token)? {
                    GuardHandle::CanActivateChild(guard) => {
                        futures.push(guard.can_activate_child(target.clone(), self.future.clone()));
                    }
                    _ => {
                        return Err(RouterError::runtime(anyhow!(
                            "token '{token}' does not resolve to a canActivateChild guard"
                        )))
                    }
                }
            }
            let decision = run_guards(futures).await.map_err(RouterError::runtime)?;
            if !decision.is_allow() {
                return Ok(decision);
            }
        }
        Ok(GuardDecision::Allow)
    }

    async fn run_can_activate(
        &self,
        route: &Rc<ActivatedRouteSnapshot>,
    ) -> Result<GuardDecision, RouterError> {
        let tokens = route
            .route_config()
            .map(|c| c.can_activate.clone())
            .unwrap_or_default();
        if tokens.is_empty() {
            return Ok(GuardDecision::Allow);
        }

        let mut futures: Vec<GuardFuture> = Vec::new();
        for token in &tokens {
            match self.token(route, token)? {
                GuardHandle::CanActivate(guard) => {
                    futures.push(guard.can_activate(route.clone(), self.future.clone()));
                }
                _ => {
                    return Err(RouterError::runtime(anyhow!(
                        "token '{token}' does not resolve to a canActivate guard"
                    )))
                }
            }
        }
        run_guards(futures).await.map_err(RouterError::runtime)
    }

    /// Runs the resolver map of every activation check, storing results on
    /// the snapshots and folding inherited resolved data into `data`.
    pub(crate) async fn resolve_data(
        &self,
        inheritance: ParamsInheritance,
    ) -> Result<(), RouterError> {
        for check in &self.can_activate_checks {
            let target = check.path.last().expect("check paths are never empty");
            self.run_resolve(target, inheritance).await?;
        }
        Ok(())
    }

    async fn run_resolve(
        &self,
        route: &Rc<ActivatedRouteSnapshot>,
        inheritance: ParamsInheritance,
    ) -> Result<(), RouterError> {
        let mut keys: Vec<String> = Vec::new();
        let mut futures = Vec::new();
        for (key, token) in route.resolve_map().iter() {
            match self.token(route, token)? {
                GuardHandle::Resolver(resolver) => {
                    keys.push(key.clone());
                    futures.push(resolver.resolve(route.clone(), self.future.clone()));
                }
                _ => {
                    return Err(RouterError::runtime(anyhow!(
                        "token '{token}' does not resolve to a data resolver"
                    )))
                }
            }
        }

        let results = futures::future::join_all(futures).await;
        let mut resolved = DataMap::new();
        for (key, result) in keys.into_iter().zip(results) {
            resolved.insert(key, result.map_err(RouterError::runtime)?);
        }
        *route.resolved_data.borrow_mut() = resolved;

        self.resolve_title(route).await?;

        let mut data = route.data();
        for (k, v) in inherited_params_data_resolve(route, inheritance).resolve.iter() {
            data.insert(k.clone(), v.clone());
        }
        route.set_data(data);
        Ok(())
    }

    /// The route title is a reserved resolver slot: static text is taken
    /// as-is, a token runs like any other resolver.
    async fn resolve_title(&self, route: &Rc<ActivatedRouteSnapshot>) -> Result<(), RouterError> {
        let title = match route.route_config().and_then(|c| c.title.clone()) {
            None => return Ok(()),
            Some(RouteTitle::Static(text)) => Some(text),
            Some(RouteTitle::Resolved(token)) => {
                let value = match self.token(route, &token)? {
                    GuardHandle::Resolver(resolver) => resolver
                        .resolve(route.clone(), self.future.clone())
                        .await
                        .map_err(RouterError::runtime)?,
                    _ => {
                        return Err(RouterError::runtime(anyhow!(
                            "token '{token}' does not resolve to a title resolver"
                        )))
                    }
                };
                match value {
                    Value::String(text) => Some(text),
                    Value::Null => None,
                    other => Some(other.to_string()),
                }
            }
        };
        route.set_title(title);
        Ok(())
    }

    /// Resolves a guard token in the scope of `node`: the resolver of the
    /// nearest lazily-loaded ancestor configuration, or the root resolver.
    /// The scope lookup is cached on the snapshot.
    fn token(
        &self,
        node: &Rc<ActivatedRouteSnapshot>,
        token: &str,
    ) -> Result<GuardHandle, RouterError> {
        let resolver = self.scoped_resolver(node);
        resolve_token(&resolver, token).map_err(RouterError::runtime)
    }

    fn scoped_resolver(&self, node: &Rc<ActivatedRouteSnapshot>) -> Rc<dyn TokenResolver> {
        if let Some(cached) = node.scoped_resolver.borrow().clone() {
            return cached;
        }
        let mut resolver = self.root_resolver.clone();
        let mut current = node.parent();
        while let Some(ancestor) = current {
            if let Some(loaded) = ancestor.route_config().and_then(|c| c.loaded_config()) {
                resolver = loaded.resolver;
                break;
            }
            current = ancestor.parent();
        }
        *node.scoped_resolver.borrow_mut() = Some(resolver.clone());
        resolver
    }
}

fn should_run_guards_and_resolvers(
    curr: &Rc<ActivatedRouteSnapshot>,
    future: &Rc<ActivatedRouteSnapshot>,
    mode: RunGuardsAndResolvers,
) -> bool {
    match mode {
        RunGuardsAndResolvers::Always => true,
        RunGuardsAndResolvers::ParamsOrQueryParamsChange => {
            !equal_params_and_url_segments(curr, future)
                || curr.query_params() != future.query_params()
        }
        RunGuardsAndResolvers::ParamsChange => !equal_params_and_url_segments(curr, future),
    }
}
