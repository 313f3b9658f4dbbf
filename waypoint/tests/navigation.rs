//! End-to-end navigation scenarios driving the full pipeline: redirects,
//! lazy loads, guards, resolvers, state reuse, outlet activation and
//! location writes.

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::mpsc::UnboundedReceiver;
use futures::executor::block_on;
use serde_json::json;
use waypoint::{
    ActivatedRouteSnapshot, Command, Event, GuardDecision, LocationOp, MemoryLocation,
    NavigationExtras, RecordingOutlet, Route, Router, RouterConfig, RouterError,
    RouterStateSnapshot, StaticLoader, TokenRegistry, UrlSegment,
};

fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = rx.try_next() {
        events.push(event);
    }
    events
}

fn kinds(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::kind).collect()
}

fn allow() -> waypoint::GuardFuture {
    waypoint::guards::ready(GuardDecision::Allow)
}

#[test]
fn a_plain_navigation_commits_state_url_and_events() {
    let location = MemoryLocation::new();
    let router = Router::new(
        vec![Route::path("team/:id")
            .component("TeamCmp")
            .children(vec![Route::path("user/:name").component("UserCmp")])],
        RouterConfig::new()
            .root_component("AppCmp")
            .location(location.clone()),
    )
    .unwrap();
    let mut events = router.events();

    let committed = block_on(router.navigate_by_url("/team/33/user/bob", Default::default()))
        .unwrap();
    assert!(committed);
    assert_eq!(router.url(), "/team/33/user/bob");

    let team = router.router_state().root().first_child().unwrap();
    assert_eq!(team.snapshot().params().get("id"), Some(&"33".to_owned()));
    let user = team.first_child().unwrap();
    assert_eq!(user.snapshot().params().get("name"), Some(&"bob".to_owned()));

    assert_eq!(location.ops(), vec![LocationOp::Go("/team/33/user/bob".to_owned())]);

    let events = drain(&mut events);
    let kinds = kinds(&events);
    assert_eq!(kinds.first(), Some(&"NavigationStart"));
    assert_eq!(kinds.last(), Some(&"NavigationEnd"));
    // Strict phase order within the navigation.
    let order = ["NavigationStart", "RoutesRecognized", "GuardsCheckStart",
        "GuardsCheckEnd", "ResolveStart", "ResolveEnd", "NavigationEnd"];
    let mut last = 0;
    for marker in order {
        let at = kinds.iter().position(|k| *k == marker)
            .unwrap_or_else(|| panic!("missing {marker}"));
        assert!(at >= last, "{marker} fired out of order in {kinds:?}");
        last = at;
    }
    assert_eq!(kinds.iter().filter(|k| **k == "NavigationStart").count(), 1);
}

#[test]
fn wildcard_with_lazy_load_realizes_the_bundle_once() {
    let loader = Rc::new(StaticLoader::new());
    loader.register("fallback", vec![Route::path("**").component("MissingCmp")]);
    let router = Router::new(
        vec![Route::path("**").load_children("fallback")],
        RouterConfig::new().loader(loader.clone()),
    )
    .unwrap();
    let mut events = router.events();

    let committed = block_on(router.navigate_by_url("/anything/here", Default::default()))
        .unwrap();
    assert!(committed);
    assert_eq!(loader.load_count("fallback"), 1);

    // The terminal snapshot consumed both segments.
    let node = router.router_state().root().first_child().unwrap();
    assert_eq!(
        node.snapshot()
            .url()
            .iter()
            .map(|s: &UrlSegment| s.path.clone())
            .collect::<Vec<_>>(),
        vec!["anything", "here"]
    );

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, Event::RouteConfigLoadStart { .. })));
    assert!(events.iter().any(|e| matches!(e, Event::RouteConfigLoadEnd { .. })));
    assert!(events.iter().any(
        |e| matches!(e, Event::NavigationEnd { url, .. } if url == "/anything/here")
    ));

    // Navigating again serves the memoized configuration.
    block_on(router.navigate_by_url("/anything/else", Default::default())).unwrap();
    assert_eq!(loader.load_count("fallback"), 1);
}

#[test]
fn relative_navigation_resolves_against_the_active_route() {
    let router = Router::new(
        vec![Route::path("team/:id")
            .component("TeamCmp")
            .children(vec![Route::path("user/:name").component("UserCmp")])],
        RouterConfig::new(),
    )
    .unwrap();
    block_on(router.navigate_by_url("/team/33/user/bob", Default::default())).unwrap();

    let user = router
        .router_state()
        .root()
        .first_child()
        .unwrap()
        .first_child()
        .unwrap();
    let extras = NavigationExtras {
        relative_to: Some(user),
        ..Default::default()
    };
    let committed = block_on(router.navigate(vec![Command::from("../22")], extras)).unwrap();
    assert!(committed);
    assert_eq!(router.url(), "/team/33/user/22");
}

#[test]
fn a_guard_redirect_cancels_then_navigates_to_the_target() {
    let registry = TokenRegistry::new().can_activate(
        "require-login",
        |_route: Rc<ActivatedRouteSnapshot>, _state: RouterStateSnapshot| {
            waypoint::guards::ready(GuardDecision::Redirect(
                waypoint::url::serializer::parse_url("/login").unwrap(),
            ))
        },
    );
    let router = Router::new(
        vec![
            Route::path("a").component("ACmp").can_activate("require-login"),
            Route::path("login").component("LoginCmp"),
        ],
        RouterConfig::new().resolver(Rc::new(registry)),
    )
    .unwrap();
    let mut events = router.events();

    let committed = block_on(router.navigate_by_url("/a", Default::default())).unwrap();
    assert!(!committed, "the original navigation reports cancellation");
    assert_eq!(router.url(), "/login");

    let events = drain(&mut events);
    let cancel_at = events
        .iter()
        .position(|e| matches!(e, Event::NavigationCancel { .. }))
        .expect("first navigation cancels");
    let second_start_at = events
        .iter()
        .rposition(|e| matches!(e, Event::NavigationStart { .. }))
        .expect("redirect navigation starts");
    assert!(cancel_at < second_start_at);
    assert!(matches!(
        events.last(),
        Some(Event::NavigationEnd { url_after_redirects, .. }) if url_after_redirects == "/login"
    ));
}

#[test]
fn a_guard_veto_cancels_and_keeps_state() {
    let registry = TokenRegistry::new().can_activate(
        "deny",
        |_: Rc<ActivatedRouteSnapshot>, _: RouterStateSnapshot| {
            waypoint::guards::ready(GuardDecision::Forbid)
        },
    );
    let router = Router::new(
        vec![
            Route::path("open").component("OpenCmp"),
            Route::path("locked").component("LockedCmp").can_activate("deny"),
        ],
        RouterConfig::new().resolver(Rc::new(registry)),
    )
    .unwrap();
    block_on(router.navigate_by_url("/open", Default::default())).unwrap();

    let mut events = router.events();
    let committed = block_on(router.navigate_by_url("/locked", Default::default())).unwrap();
    assert!(!committed);
    assert_eq!(router.url(), "/open");
    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, Event::NavigationCancel { .. })));
    assert!(!events.iter().any(|e| matches!(e, Event::NavigationEnd { .. })));
}

#[test]
fn duplicate_empty_path_outlets_error_the_navigation() {
    let router = Router::new(
        vec![
            Route::path("x").component("XCmp"),
            Route::path("").component("ACmp").outlet("aux"),
            Route::path("").component("BCmp").outlet("aux"),
        ],
        RouterConfig::new(),
    )
    .unwrap();
    let mut events = router.events();

    let err = block_on(router.navigate_by_url("/x", Default::default())).unwrap_err();
    assert!(matches!(err, RouterError::DuplicateOutlet { .. }));
    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, Event::NavigationError { .. })));
}

#[test]
fn an_error_handler_converts_failures_into_outcomes() {
    let router = Router::new(
        vec![Route::path("present").component("P")],
        RouterConfig::new().error_handler(|_| Ok(false)),
    )
    .unwrap();
    let committed = block_on(router.navigate_by_url("/absent", Default::default())).unwrap();
    assert!(!committed);
}

#[test]
fn resolvers_feed_data_into_the_activated_route() {
    let registry = TokenRegistry::new().resolver(
        "user-loader",
        |route: Rc<ActivatedRouteSnapshot>, _: RouterStateSnapshot| {
            let name = route.params().get("name").cloned().unwrap_or_default();
            Box::pin(futures::future::ready(Ok(json!({ "name": name }))))
                as waypoint::ResolveFuture
        },
    );
    let router = Router::new(
        vec![Route::path("user/:name")
            .component("UserCmp")
            .resolve("user", "user-loader")
            .title("People")],
        RouterConfig::new().resolver(Rc::new(registry)),
    )
    .unwrap();

    block_on(router.navigate_by_url("/user/bob", Default::default())).unwrap();
    let user = router.router_state().root().first_child().unwrap();
    assert_eq!(user.data.get().get("user"), Some(&json!({"name": "bob"})));
    assert_eq!(user.snapshot().title(), Some("People".to_owned()));
}

#[test]
fn reused_routes_keep_identity_and_push_param_changes() {
    let router = Router::new(
        vec![Route::path("team/:id").component("TeamCmp")],
        RouterConfig::new(),
    )
    .unwrap();
    block_on(router.navigate_by_url("/team/33", Default::default())).unwrap();

    let team = router.router_state().root().first_child().unwrap();
    let mut params_rx = team.params.subscribe();

    block_on(router.navigate_by_url("/team/44", Default::default())).unwrap();
    let team_after = router.router_state().root().first_child().unwrap();
    assert!(Rc::ptr_eq(&team, &team_after), "the route instance is reused");

    // Seeded value then the change.
    let first = block_on(futures::StreamExt::next(&mut params_rx)).unwrap();
    assert_eq!(first.get("id"), Some(&"33".to_owned()));
    let second = block_on(futures::StreamExt::next(&mut params_rx)).unwrap();
    assert_eq!(second.get("id"), Some(&"44".to_owned()));
}

#[test]
fn outlets_see_activations_and_deactivations() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let router = Router::new(
        vec![
            Route::path("a").component("ACmp"),
            Route::path("b").component("BCmp"),
        ],
        RouterConfig::new(),
    )
    .unwrap();
    router
        .root_outlet_contexts()
        .register_outlet("primary", RecordingOutlet::new("root", log.clone()));

    block_on(router.navigate_by_url("/a", Default::default())).unwrap();
    block_on(router.navigate_by_url("/b", Default::default())).unwrap();

    let log = log.borrow();
    assert_eq!(
        log.as_slice(),
        &[
            "root:activate:ACmp".to_owned(),
            "root:deactivate:ACmp".to_owned(),
            "root:activate:BCmp".to_owned(),
        ]
    );
}

#[test]
fn location_writes_push_then_replace_on_same_path() {
    let location = MemoryLocation::new();
    let router = Router::new(
        vec![
            Route::path("a").component("ACmp"),
            Route::path("b").component("BCmp"),
        ],
        RouterConfig::new().location(location.clone()),
    )
    .unwrap();

    block_on(router.navigate_by_url("/a", Default::default())).unwrap();
    block_on(router.navigate_by_url(
        "/b",
        NavigationExtras {
            replace_url: true,
            ..Default::default()
        },
    ))
    .unwrap();
    block_on(router.navigate_by_url(
        "/a",
        NavigationExtras {
            skip_location_change: true,
            ..Default::default()
        },
    ))
    .unwrap();

    assert_eq!(
        location.ops(),
        vec![
            LocationOp::Go("/a".to_owned()),
            LocationOp::Replace("/b".to_owned()),
        ]
    );
    // The router still moved despite the skipped location write.
    assert_eq!(router.url(), "/a");
}

#[test]
fn query_params_merge_and_fragment_preservation() {
    let router = Router::new(
        vec![Route::path("search").component("SearchCmp")],
        RouterConfig::new(),
    )
    .unwrap();

    let mut q = waypoint::QueryParams::new();
    q.insert("page".to_owned(), "1".into());
    block_on(router.navigate_by_url_tree(
        router
            .create_url_tree(
                vec!["/search".into()],
                &NavigationExtras {
                    query_params: Some(q),
                    fragment: Some("top".to_owned()),
                    ..Default::default()
                },
            )
            .unwrap(),
        Default::default(),
    ))
    .unwrap();
    assert_eq!(router.url(), "/search?page=1#top");

    let mut q2 = waypoint::QueryParams::new();
    q2.insert("sort".to_owned(), "asc".into());
    let tree = router
        .create_url_tree(
            vec!["/search".into()],
            &NavigationExtras {
                query_params: Some(q2),
                query_params_handling: waypoint::QueryParamsHandling::Merge,
                preserve_fragment: true,
                ..Default::default()
            },
        )
        .unwrap();
    block_on(router.navigate_by_url_tree(tree, Default::default())).unwrap();
    assert_eq!(router.url(), "/search?page=1&sort=asc#top");

    assert!(router.is_active("/search", false).unwrap());
    assert!(!router.is_active("/search?page=2", false).unwrap());
}

#[test]
fn queued_navigations_run_in_order_and_newer_supersedes_inflight() {
    let router = Router::new(
        vec![
            Route::path("a").component("ACmp"),
            Route::path("b").component("BCmp"),
        ],
        RouterConfig::new(),
    )
    .unwrap();
    let mut events = router.events();

    // Scheduling both before driving: the second supersedes the first at
    // its first suspension point.
    let first = router.navigate_by_url("/a", Default::default());
    let second = router.navigate_by_url("/b", Default::default());
    let (first, second) = block_on(futures::future::join(first, second));
    assert!(!first.unwrap());
    assert!(second.unwrap());
    assert_eq!(router.url(), "/b");

    let events = drain(&mut events);
    // One terminal event per navigation, and navigation 2 starts only
    // after navigation 1 terminated.
    let cancel_at = events
        .iter()
        .position(|e| matches!(e, Event::NavigationCancel { id: 1, .. }))
        .expect("navigation 1 cancelled");
    let start2_at = events
        .iter()
        .position(|e| matches!(e, Event::NavigationStart { id: 2, .. }))
        .expect("navigation 2 started");
    assert!(cancel_at < start2_at);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::NavigationEnd { id: 2, .. })));
}

#[test]
fn sequential_navigations_both_commit() {
    let router = Router::new(
        vec![
            Route::path("a").component("ACmp"),
            Route::path("b").component("BCmp"),
        ],
        RouterConfig::new(),
    )
    .unwrap();
    assert!(block_on(router.navigate_by_url("/a", Default::default())).unwrap());
    assert!(block_on(router.navigate_by_url("/b", Default::default())).unwrap());
    assert_eq!(router.url(), "/b");
}

#[test]
fn replayed_location_events_are_absorbed() {
    let location = MemoryLocation::new();
    let router = Router::new(
        vec![
            Route::path("a").component("ACmp"),
            Route::path("").component("HomeCmp").path_match(waypoint::PathMatch::Full),
        ],
        RouterConfig::new().location(location.clone()),
    )
    .unwrap();
    block_on(router.initialize()).unwrap();

    // The platform replays the same popstate twice; only one navigation
    // may result.
    location.simulate_pop("/a");
    location.simulate_pop("/a");
    let mut events = router.events();
    block_on(router.process_pending());

    let events = drain(&mut events);
    let starts = events
        .iter()
        .filter(|e| matches!(e, Event::NavigationStart { .. }))
        .count();
    assert_eq!(starts, 1, "duplicate popstate produced extra navigations");
    assert_eq!(router.url(), "/a");
}

#[test]
fn initial_navigation_modes() {
    let location = MemoryLocation::starting_at("/team/7");
    let router = Router::new(
        vec![Route::path("team/:id").component("TeamCmp")],
        RouterConfig::new().location(location),
    )
    .unwrap();
    assert!(block_on(router.initialize()).unwrap());
    assert_eq!(router.url(), "/team/7");

    let location = MemoryLocation::starting_at("/team/7");
    let router = Router::new(
        vec![Route::path("team/:id").component("TeamCmp")],
        RouterConfig::new()
            .location(location)
            .initial_navigation(waypoint::InitialNavigation::Disabled),
    )
    .unwrap();
    assert!(!block_on(router.initialize()).unwrap());
    assert_eq!(router.url(), "/");
}

#[test]
fn redirects_expand_before_recognition() {
    let router = Router::new(
        vec![
            Route::path("")
                .redirect_to("/inbox")
                .path_match(waypoint::PathMatch::Full),
            Route::path("inbox").component("InboxCmp"),
            Route::path("old-inbox").redirect_to("inbox"),
        ],
        RouterConfig::new(),
    )
    .unwrap();

    assert!(block_on(router.navigate_by_url("/", Default::default())).unwrap());
    assert_eq!(router.url(), "/inbox");

    assert!(block_on(router.navigate_by_url("/old-inbox", Default::default())).unwrap());
    assert_eq!(router.url(), "/inbox");
}

#[test]
fn can_deactivate_vetoes_leaving() {
    let registry = TokenRegistry::new().can_deactivate(
        "confirm",
        |_: Rc<ActivatedRouteSnapshot>, _: RouterStateSnapshot, _: RouterStateSnapshot| {
            waypoint::guards::ready(GuardDecision::Forbid)
        },
    );
    let router = Router::new(
        vec![
            Route::path("form").component("FormCmp").can_deactivate("confirm"),
            Route::path("away").component("AwayCmp"),
        ],
        RouterConfig::new().resolver(Rc::new(registry)),
    )
    .unwrap();
    block_on(router.navigate_by_url("/form", Default::default())).unwrap();
    let committed = block_on(router.navigate_by_url("/away", Default::default())).unwrap();
    assert!(!committed);
    assert_eq!(router.url(), "/form");
}

#[test]
fn can_load_veto_blocks_the_lazy_bundle() {
    let loader = Rc::new(StaticLoader::new());
    loader.register("admin", vec![Route::path("").component("AdminCmp")]);
    let registry = TokenRegistry::new().can_load(
        "admins-only",
        |_: Rc<Route>, _: Vec<UrlSegment>| waypoint::guards::ready(GuardDecision::Forbid),
    );
    let router = Router::new(
        vec![Route::path("admin")
            .load_children("admin")
            .can_load("admins-only")],
        RouterConfig::new()
            .loader(loader.clone())
            .resolver(Rc::new(registry)),
    )
    .unwrap();
    let mut events = router.events();

    let committed = block_on(router.navigate_by_url("/admin", Default::default())).unwrap();
    assert!(!committed);
    assert_eq!(loader.load_count("admin"), 0);
    let events = drain(&mut events);
    assert!(events.iter().any(
        |e| matches!(e, Event::NavigationCancel { reason, .. } if reason.contains("returned false"))
    ));
}

#[test]
fn hooks_run_between_recognition_and_activation() {
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let before_log = order.clone();
    let after_log = order.clone();

    let router = Router::new(
        vec![Route::path("a").component("ACmp")],
        RouterConfig::new()
            .before_preactivation(move |_: &RouterStateSnapshot| {
                before_log.borrow_mut().push("before");
                Box::pin(futures::future::ready(Ok(())))
                    as futures::future::LocalBoxFuture<'static, anyhow::Result<()>>
            })
            .after_preactivation(move |_: &RouterStateSnapshot| {
                after_log.borrow_mut().push("after");
                Box::pin(futures::future::ready(Ok(())))
                    as futures::future::LocalBoxFuture<'static, anyhow::Result<()>>
            }),
    )
    .unwrap();

    block_on(router.navigate_by_url("/a", Default::default())).unwrap();
    assert_eq!(order.borrow().as_slice(), &["before", "after"]);
}

#[test]
fn activation_events_wrap_the_commit() {
    let registry = TokenRegistry::new().can_activate(
        "pass",
        |_: Rc<ActivatedRouteSnapshot>, _: RouterStateSnapshot| allow(),
    );
    let router = Router::new(
        vec![Route::path("a").component("ACmp").can_activate("pass")],
        RouterConfig::new().resolver(Rc::new(registry)),
    )
    .unwrap();
    let mut events = router.events();
    block_on(router.navigate_by_url("/a", Default::default())).unwrap();

    let events = drain(&mut events);
    let kinds = kinds(&events);
    let activation_start = kinds.iter().position(|k| *k == "ActivationStart").unwrap();
    let guards_end = kinds.iter().position(|k| *k == "GuardsCheckEnd").unwrap();
    let activation_end = kinds.iter().position(|k| *k == "ActivationEnd").unwrap();
    let nav_end = kinds.iter().position(|k| *k == "NavigationEnd").unwrap();
    assert!(activation_start < guards_end);
    assert!(guards_end < activation_end);
    assert!(activation_end < nav_end);
}
