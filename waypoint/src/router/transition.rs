//! The navigation transition pipeline.
//!
//! Navigations queue in arrival order and run one at a time; whichever
//! caller awaits first drives the queue for everyone. Each pipeline step
//! ends with a supersession check: scheduling a newer navigation bumps the
//! router's navigation id, and an in-flight transition that notices its id
//! is stale cancels quietly at the next boundary.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::error::{Result, RouterError};
use crate::events::{Event, NavigationSource};
use crate::expansion::{apply_redirects, ExpandError, LoadPhase};
use crate::guards::GuardDecision;
use crate::preactivation::Preactivation;
use crate::recognition::recognize;
use crate::router::activation::ActivateRoutes;
use crate::router::{ActiveNavigation, NavigationExtras, Router};
use crate::state::builder::{create_router_state, TreeNode};
use crate::url::UrlTree;

/// A queued navigation request.
pub(crate) struct PendingNavigation {
    pub(crate) id: u64,
    pub(crate) source: NavigationSource,
    pub(crate) raw_url: UrlTree,
    pub(crate) raw_string: String,
    pub(crate) extras: NavigationExtras,
    pub(crate) completion: SharedCompletion,
}

/// A navigation outcome that any number of callers can await. Duplicate
/// (source, URL) requests attach to the original's completion.
#[derive(Clone)]
pub(crate) struct SharedCompletion {
    inner: Rc<RefCell<CompletionInner>>,
}

struct CompletionInner {
    done: Option<Result<bool>>,
    waiters: Vec<oneshot::Sender<Result<bool>>>,
}

impl SharedCompletion {
    pub(crate) fn new() -> SharedCompletion {
        SharedCompletion {
            inner: Rc::new(RefCell::new(CompletionInner {
                done: None,
                waiters: Vec::new(),
            })),
        }
    }

    pub(crate) fn complete(&self, result: Result<bool>) {
        let mut inner = self.inner.borrow_mut();
        if inner.done.is_some() {
            return;
        }
        inner.done = Some(result.clone());
        for waiter in inner.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    pub(crate) fn peek(&self) -> Option<Result<bool>> {
        self.inner.borrow().done.clone()
    }

    pub(crate) fn subscribe(&self) -> oneshot::Receiver<Result<bool>> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.borrow_mut();
        match &inner.done {
            Some(result) => {
                let _ = tx.send(result.clone());
            }
            None => inner.waiters.push(tx),
        }
        rx
    }
}

/// How a single transition ended.
enum Outcome {
    Committed,
    Cancelled {
        reason: String,
        restore: bool,
        redirect: Option<UrlTree>,
    },
    Failed(RouterError),
}

impl Router {
    /// Awaits `completion`, driving the queue whenever no other caller is.
    pub(crate) async fn drive_until(&self, completion: SharedCompletion) -> Result<bool> {
        if completion.peek().is_none() {
            if self.data.processing.get() {
                // Another caller drives; it covers our transition and any
                // follow-ups.
                return match completion.subscribe().await {
                    Ok(result) => result,
                    Err(_) => Err(RouterError::cancellation("the router was dropped")),
                };
            }
            self.drive_queue().await;
        } else {
            // Already settled, but follow-up navigations (guard redirects)
            // may still be queued; finish them before reporting.
            self.drive_queue().await;
        }

        match completion.peek() {
            Some(result) => result,
            None => match completion.subscribe().await {
                Ok(result) => result,
                Err(_) => Err(RouterError::cancellation("the router was dropped")),
            },
        }
    }

    /// Processes queued navigations in arrival order until none remain.
    /// Re-entrant calls return immediately; the existing driver covers
    /// them.
    pub(crate) async fn drive_queue(&self) {
        if self.data.processing.get() {
            return;
        }
        self.data.processing.set(true);
        loop {
            let next = self.data.queue.borrow_mut().pop_front();
            match next {
                Some(nav) => self.run_transition(nav).await,
                None => break,
            }
        }
        self.data.processing.set(false);
    }

    async fn run_transition(&self, nav: PendingNavigation) {
        let data = &self.data;
        *data.active.borrow_mut() = Some(ActiveNavigation {
            id: nav.id,
            source: nav.source,
            url: nav.raw_string.clone(),
            extras: nav.extras.clone(),
        });
        *data.active_completion.borrow_mut() = Some(nav.completion.clone());

        let stored_state = data.router_state.borrow().clone();
        let stored_url = data.current_url_tree.borrow().clone();
        let stored_raw = data.raw_url_tree.borrow().clone();

        let outcome = self.execute(&nav).await;

        match outcome {
            Outcome::Committed => {
                nav.completion.complete(Ok(true));
            }
            Outcome::Cancelled {
                reason,
                restore,
                redirect,
            } => {
                if restore {
                    *data.router_state.borrow_mut() = stored_state;
                    *data.current_url_tree.borrow_mut() = stored_url;
                    *data.raw_url_tree.borrow_mut() = stored_raw.clone();
                    data.location
                        .replace_state(&data.serializer.serialize(&stored_raw));
                }
                self.emit(Event::NavigationCancel {
                    id: nav.id,
                    url: nav.raw_string.clone(),
                    reason,
                });
                nav.completion.complete(Ok(false));
                if let Some(tree) = redirect {
                    self.schedule_navigation(
                        tree,
                        NavigationSource::Imperative,
                        NavigationExtras::default(),
                    );
                }
            }
            Outcome::Failed(error) => {
                *data.router_state.borrow_mut() = stored_state;
                *data.current_url_tree.borrow_mut() = stored_url;
                *data.raw_url_tree.borrow_mut() = stored_raw.clone();
                data.location
                    .replace_state(&data.serializer.serialize(&stored_raw));
                self.emit(Event::NavigationError {
                    id: nav.id,
                    url: nav.raw_string.clone(),
                    error: error.clone(),
                });
                match &data.error_handler {
                    Some(handler) => nav.completion.complete(handler(error)),
                    None => nav.completion.complete(Err(error)),
                }
            }
        }

        *data.active.borrow_mut() = None;
        *data.active_completion.borrow_mut() = None;
    }

    async fn execute(&self, nav: &PendingNavigation) -> Outcome {
        let data = &self.data;
        let id = nav.id;

        self.emit(Event::NavigationStart {
            id,
            url: nav.raw_string.clone(),
        });

        // Step 2: extract the routable portion.
        if !data.url_handling.should_process_url(&nav.raw_url) {
            log::debug!("[{id}] URL not processed by this router; committing raw");
            *data.raw_url_tree.borrow_mut() = nav.raw_url.clone();
            if !nav.extras.skip_location_change {
                self.write_url(&nav.raw_string, nav.extras.replace_url);
            }
            self.emit(Event::NavigationEnd {
                id,
                url: nav.raw_string.clone(),
                url_after_redirects: nav.raw_string.clone(),
            });
            return Outcome::Committed;
        }
        let extracted = data.url_handling.extract(&nav.raw_url);

        // The platform microtask between extraction and redirects keeps
        // re-entrant location events out of this stack frame.
        yield_now().await;
        if let Some(outcome) = self.superseded(id) {
            return outcome;
        }

        // Step 3: apply redirects, realizing lazy configurations.
        let config = data.config.borrow().clone();
        let emit_load = |phase: LoadPhase, route: &Rc<crate::config::Route>| {
            let route_path = route.path.clone().unwrap_or_default();
            match phase {
                LoadPhase::Start => self.emit(Event::RouteConfigLoadStart { id, route_path }),
                LoadPhase::End => self.emit(Event::RouteConfigLoadEnd { id, route_path }),
            }
        };
        let url_after = match apply_redirects(
            &*data.serializer,
            data.loader.clone(),
            data.resolver.clone(),
            &emit_load,
            &extracted,
            &config,
        )
        .await
        {
            Ok(tree) => tree,
            Err(ExpandError::GuardRedirect(tree)) => {
                return Outcome::Cancelled {
                    reason: "a route guard redirected the navigation".to_owned(),
                    restore: true,
                    redirect: Some(tree),
                }
            }
            Err(ExpandError::Router(e)) if e.is_cancellation() => {
                return Outcome::Cancelled {
                    reason: e.to_string(),
                    restore: true,
                    redirect: None,
                }
            }
            Err(ExpandError::Router(e)) => return Outcome::Failed(e),
        };
        log::trace!("[{id}] applied redirects");
        if let Some(outcome) = self.superseded(id) {
            return outcome;
        }

        // Step 4: recognize.
        let url_after_str = data.serializer.serialize(&url_after);
        let snapshot = match recognize(
            data.root_component,
            &config,
            &url_after,
            url_after_str.clone(),
            data.params_inheritance,
        ) {
            Ok(snapshot) => snapshot,
            Err(e) => return Outcome::Failed(e),
        };
        self.emit(Event::RoutesRecognized {
            id,
            url: nav.raw_string.clone(),
            url_after_redirects: url_after_str.clone(),
            state: snapshot.clone(),
        });

        // Step 5: pre-guards hook.
        if let Some(hook) = &data.before_preactivation {
            if let Err(e) = hook.run(&snapshot).await {
                return Outcome::Failed(RouterError::runtime(e));
            }
        }
        if let Some(outcome) = self.superseded(id) {
            return outcome;
        }

        // Step 6: build the future live state (unwired until commit).
        let current_state = data.router_state.borrow().clone();
        let future_state =
            match create_router_state(&data.reuse_strategy, &snapshot, &current_state) {
                Ok(state) => state,
                Err(e) if e.is_cancellation() => {
                    return Outcome::Cancelled {
                        reason: e.to_string(),
                        restore: true,
                        redirect: None,
                    }
                }
                Err(e) => return Outcome::Failed(e),
            };

        // Steps 7-8: guards.
        let pre = Preactivation::new(
            snapshot.clone(),
            current_state.snapshot().clone(),
            data.resolver.clone(),
        );
        self.emit(Event::GuardsCheckStart {
            id,
            url: nav.raw_string.clone(),
            url_after_redirects: url_after_str.clone(),
            state: snapshot.clone(),
        });
        let emit_event = |event: Event| self.emit(event);
        let decision = match pre.check_guards(&emit_event).await {
            Ok(decision) => decision,
            Err(e) => return Outcome::Failed(e),
        };
        self.emit(Event::GuardsCheckEnd {
            id,
            url: nav.raw_string.clone(),
            url_after_redirects: url_after_str.clone(),
            state: snapshot.clone(),
            should_activate: decision.is_allow(),
        });
        match decision {
            GuardDecision::Allow => {}
            GuardDecision::Forbid => {
                return Outcome::Cancelled {
                    reason: "a route guard returned false".to_owned(),
                    restore: true,
                    redirect: None,
                }
            }
            GuardDecision::Redirect(tree) => {
                return Outcome::Cancelled {
                    reason: "a route guard redirected the navigation".to_owned(),
                    restore: true,
                    redirect: Some(tree),
                }
            }
        }
        if let Some(outcome) = self.superseded(id) {
            return outcome;
        }

        // Step 9: resolvers.
        self.emit(Event::ResolveStart {
            id,
            url: nav.raw_string.clone(),
            url_after_redirects: url_after_str.clone(),
            state: snapshot.clone(),
        });
        if let Err(e) = pre.resolve_data(data.params_inheritance).await {
            return Outcome::Failed(e);
        }
        self.emit(Event::ResolveEnd {
            id,
            url: nav.raw_string.clone(),
            url_after_redirects: url_after_str.clone(),
            state: snapshot.clone(),
        });

        // Step 10: post-resolve hook.
        if let Some(hook) = &data.after_preactivation {
            if let Err(e) = hook.run(&snapshot).await {
                return Outcome::Failed(RouterError::runtime(e));
            }
        }
        if let Some(outcome) = self.superseded(id) {
            return outcome;
        }

        // Steps 11-12: commit, activate outlets, write the URL. The old
        // wiring is captured first; committing rewires reused routes.
        let old_tree = TreeNode::capture(&current_state.root());
        let new_state = future_state.commit();
        *data.router_state.borrow_mut() = new_state;
        *data.current_url_tree.borrow_mut() = url_after.clone();
        *data.raw_url_tree.borrow_mut() = data.url_handling.merge(&url_after, &nav.raw_url);
        data.navigated.set(true);

        ActivateRoutes {
            strategy: &data.reuse_strategy,
            future: &future_state.tree,
            curr: &old_tree,
            root_resolver: &data.resolver,
            emit: &emit_event,
        }
        .activate(&data.root_contexts);
        log::trace!("[{id}] activated routes");

        if !nav.extras.skip_location_change {
            let path = data.serializer.serialize(&data.raw_url_tree.borrow());
            self.write_url(&path, nav.extras.replace_url);
        }

        self.emit(Event::NavigationEnd {
            id,
            url: nav.raw_string.clone(),
            url_after_redirects: url_after_str,
        });
        Outcome::Committed
    }

    fn write_url(&self, path: &str, replace: bool) {
        if self.data.location.is_current_path_equal_to(path) || replace {
            self.data.location.replace_state(path);
        } else {
            self.data.location.go(path);
        }
    }

    /// A newer navigation bumped the id; this one stands down quietly.
    fn superseded(&self, id: u64) -> Option<Outcome> {
        let current = self.data.navigation_id.get();
        if current != id {
            log::debug!("[{id}] superseded by navigation {current}");
            Some(Outcome::Cancelled {
                reason: format!(
                    "navigation id {id} is not equal to the current navigation id {current}"
                ),
                restore: false,
                redirect: None,
            })
        } else {
            None
        }
    }
}

/// Suspends once, letting already-queued platform work run before the
/// pipeline continues.
pub(crate) fn yield_now() -> impl Future<Output = ()> {
    YieldNow { polled: false }
}

struct YieldNow {
    polled: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.polled {
            Poll::Ready(())
        } else {
            self.polled = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn completions_fan_out_to_every_subscriber() {
        let completion = SharedCompletion::new();
        let early = completion.subscribe();
        completion.complete(Ok(true));
        let late = completion.subscribe();
        assert_eq!(block_on(early).unwrap().unwrap(), true);
        assert_eq!(block_on(late).unwrap().unwrap(), true);
        // A second completion is ignored.
        completion.complete(Ok(false));
        assert_eq!(completion.peek().unwrap().unwrap(), true);
    }

    #[test]
    fn yield_now_suspends_exactly_once() {
        block_on(async {
            yield_now().await;
        });
    }
}
