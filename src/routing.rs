//! The route table: a sorted list of prefixes matched longest-first, held
//! behind a snapshot pointer so a reload never mutates state a request is
//! mid-flight against.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ssrf::ResolvedTarget;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub prefix: String,
    pub upstream: String,
    #[serde(default)]
    pub strip_path: bool,
}

/// A route paired with the addresses its upstream resolved to when the
/// snapshot was built.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub route: Route,
    pub target: ResolvedTarget,
}

/// An immutable, queryable view of the installed route table. Built once per
/// reload and shared by `Arc` so in-flight requests keep using the snapshot
/// they started with.
#[derive(Debug, Clone, Default)]
pub struct RouteSnapshot {
    routes: Vec<ResolvedRoute>,
}

impl RouteSnapshot {
    /// Sorts by prefix length descending with a stable sort, so routes of
    /// equal prefix length keep their original (insertion) order — the
    /// documented tie-break rule.
    pub fn from_resolved(mut routes: Vec<ResolvedRoute>) -> Self {
        routes.sort_by_key(|r| std::cmp::Reverse(r.route.prefix.len()));
        Self { routes }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Longest-prefix match against a request path. `None` means no route
    /// claims this path.
    pub fn matches(&self, path: &str) -> Option<&ResolvedRoute> {
        self.routes.iter().find(|r| path.starts_with(&r.route.prefix))
    }

    pub fn routes(&self) -> &[ResolvedRoute] {
        &self.routes
    }
}

pub type SharedSnapshot = Arc<tokio::sync::RwLock<Arc<RouteSnapshot>>>;

pub fn new_shared(snapshot: RouteSnapshot) -> SharedSnapshot {
    Arc::new(tokio::sync::RwLock::new(Arc::new(snapshot)))
}

/// Rewrite `path` for forwarding: strips the matched prefix when the route
/// asks for it, otherwise forwards the path unchanged.
pub fn forwarded_path<'a>(route: &Route, path: &'a str) -> String {
    if !route.strip_path {
        return path.to_string();
    }
    let rest = path.strip_prefix(&route.prefix).unwrap_or(path);
    if rest.is_empty() {
        "/".to_string()
    } else if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssrf::ResolvedTarget;

    fn route(prefix: &str) -> ResolvedRoute {
        ResolvedRoute {
            route: Route {
                prefix: prefix.to_string(),
                upstream: "http://upstream.internal".to_string(),
                strip_path: false,
            },
            target: ResolvedTarget { addrs: vec![] },
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let snap = RouteSnapshot::from_resolved(vec![route("/api"), route("/api/v2")]);
        let matched = snap.matches("/api/v2/users").unwrap();
        assert_eq!(matched.route.prefix, "/api/v2");
    }

    #[test]
    fn tie_break_keeps_insertion_order() {
        let snap = RouteSnapshot::from_resolved(vec![route("/a"), route("/b")]);
        // Both equal length; "/a" was inserted first, so it is the stable
        // winner for any path that happens to match both (paths can only
        // match one or the other here, but the sort order itself is what
        // matters for determinism).
        assert_eq!(snap.routes()[0].route.prefix, "/a");
        assert_eq!(snap.routes()[1].route.prefix, "/b");
    }

    #[test]
    fn no_match_returns_none() {
        let snap = RouteSnapshot::from_resolved(vec![route("/api")]);
        assert!(snap.matches("/other").is_none());
    }

    #[test]
    fn strip_path_rewrites_prefix_away() {
        let mut r = route("/api");
        r.route.strip_path = true;
        assert_eq!(forwarded_path(&r.route, "/api/users"), "/users");
        assert_eq!(forwarded_path(&r.route, "/api"), "/");
    }

    #[test]
    fn no_strip_keeps_full_path() {
        let r = route("/api");
        assert_eq!(forwarded_path(&r.route, "/api/users"), "/api/users");
    }
}
