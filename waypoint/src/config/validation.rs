//! Structural validation of the route table, run once per config install.
//!
//! The walk computes each node's full path so every failure names the
//! offending route. Component types are never inspected here.

use std::rc::Rc;

use crate::config::Route;
use crate::error::ConfigError;
use crate::url::PRIMARY_OUTLET;

/// Validates a full route configuration, failing fast on the first
/// violated invariant.
pub fn validate_config(routes: &[Rc<Route>]) -> Result<(), ConfigError> {
    validate_level(routes, "")
}

fn validate_level(routes: &[Rc<Route>], parent: &str) -> Result<(), ConfigError> {
    for route in routes {
        let path = full_path(parent, route);
        validate_node(route, &path)?;
        validate_level(&route.children, &path)?;
    }
    Ok(())
}

fn validate_node(route: &Route, path: &str) -> Result<(), ConfigError> {
    if route.redirect_to.is_some() && !route.children.is_empty() {
        return Err(ConfigError::new(
            path,
            "redirect_to and children cannot be used together",
        ));
    }
    if route.redirect_to.is_some() && route.load_children.is_some() {
        return Err(ConfigError::new(
            path,
            "redirect_to and load_children cannot be used together",
        ));
    }
    if route.redirect_to.is_some() && route.component.is_some() {
        return Err(ConfigError::new(
            path,
            "redirect_to and component cannot be used together",
        ));
    }
    if route.redirect_to.is_some() && !route.can_activate.is_empty() {
        return Err(ConfigError::new(
            path,
            "redirect_to and can_activate cannot be used together; activation guards never run on a redirecting route",
        ));
    }
    if !route.children.is_empty() && route.load_children.is_some() {
        return Err(ConfigError::new(
            path,
            "children and load_children cannot be used together",
        ));
    }
    if route.path.is_some() && route.matcher.is_some() {
        return Err(ConfigError::new(
            path,
            "path and matcher cannot be used together",
        ));
    }
    if route.path.is_none() && route.matcher.is_none() {
        return Err(ConfigError::new(
            path,
            "routes must have either a path or a matcher specified",
        ));
    }
    if route.path.as_deref().map(|p| p.starts_with('/')).unwrap_or(false) {
        return Err(ConfigError::new(path, "path cannot start with a slash"));
    }
    if route.outlet != PRIMARY_OUTLET
        && route.component.is_none()
        && route.children.is_empty()
        && route.load_children.is_none()
    {
        return Err(ConfigError::new(
            path,
            "a componentless route cannot have a named outlet set",
        ));
    }
    if route.path.as_deref() == Some("") && route.redirect_to.is_some() && route.path_match.is_none()
    {
        let redirect = route.redirect_to.as_deref().unwrap_or("");
        return Err(ConfigError::new(
            path,
            format!(
                "please provide 'path_match'; the default value of 'path_match' is 'prefix', \
                 but often the intent is to use 'full', as every URL starts with the empty \
                 path (redirect target: '{redirect}')"
            ),
        ));
    }
    Ok(())
}

fn full_path(parent: &str, route: &Route) -> String {
    let own = route.path.as_deref().unwrap_or("<matcher>");
    if parent.is_empty() {
        own.to_owned()
    } else if own.is_empty() {
        parent.to_owned()
    } else {
        format!("{parent}/{own}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathMatch;

    fn install(routes: Vec<Route>) -> Result<(), ConfigError> {
        let routes: Vec<Rc<Route>> = routes.into_iter().map(Rc::new).collect();
        validate_config(&routes)
    }

    #[test]
    fn accepts_a_reasonable_config() {
        install(vec![
            Route::path("team/:id")
                .component("TeamCmp")
                .children(vec![Route::path("user/:name").component("UserCmp")]),
            Route::path("").redirect_to("/team/1").path_match_full(),
            Route::path("**").component("NotFoundCmp"),
        ])
        .unwrap();
    }

    #[test]
    fn rejects_redirect_with_children() {
        let err = install(vec![Route::path("a")
            .redirect_to("/b")
            .children(vec![Route::path("c").component("C")])])
        .unwrap_err();
        assert!(err.reason.contains("children"));
        assert_eq!(err.path, "a");
    }

    #[test]
    fn rejects_redirect_with_component_or_guard() {
        assert!(install(vec![Route::path("a").redirect_to("/b").component("A")]).is_err());
        assert!(install(vec![Route::path("a").redirect_to("/b").can_activate("g")]).is_err());
    }

    #[test]
    fn rejects_leading_slash_paths() {
        let err = install(vec![Route::path("/a").component("A")]).unwrap_err();
        assert!(err.reason.contains("slash"));
    }

    #[test]
    fn rejects_empty_redirect_without_explicit_path_match() {
        let err = install(vec![Route::path("").redirect_to("/b")]).unwrap_err();
        assert!(err.reason.contains("path_match"));
        install(vec![Route::path("").redirect_to("/b").path_match_full()]).unwrap();
    }

    #[test]
    fn rejects_componentless_named_outlet() {
        let err = install(vec![Route::path("a").outlet("left")]).unwrap_err();
        assert!(err.reason.contains("named outlet"));
        install(vec![Route::path("a").outlet("left").component("A")]).unwrap();
    }

    #[test]
    fn rejects_pathless_matcherless_routes() {
        let mut route = Route::path("x").component("X");
        route.path = None;
        assert!(install(vec![route]).is_err());
    }

    #[test]
    fn names_the_full_path_of_nested_offenders() {
        let err = install(vec![Route::path("a").children(vec![
            Route::path("b").children(vec![Route::path("/c").component("C")]),
        ])])
        .unwrap_err();
        assert_eq!(err.path, "a/b//c");
    }

    #[test]
    fn explicit_prefix_match_is_accepted_for_empty_redirects() {
        install(vec![Route::path("")
            .redirect_to("/b")
            .path_match(PathMatch::Prefix)]) // explicit, so valid
        .unwrap();
    }
}
