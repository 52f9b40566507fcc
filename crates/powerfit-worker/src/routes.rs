//! Route table: which strategy answers which URL.

use powerfit_net::{Request, Url};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::strategy::Strategy;

/// URL pattern for matching.
///
/// Patterns starting with `/` are matched against the URL path; anything else is
/// matched against the full URL string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPattern {
    /// Pattern type.
    #[serde(rename = "match")]
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Exact,
    Prefix,
    /// Suffix match (e.g., file extension).
    Suffix,
    Contains,
}

impl UrlPattern {
    pub fn exact(pattern: &str) -> Self {
        Self::new(PatternType::Exact, pattern)
    }

    pub fn prefix(pattern: &str) -> Self {
        Self::new(PatternType::Prefix, pattern)
    }

    pub fn suffix(pattern: &str) -> Self {
        Self::new(PatternType::Suffix, pattern)
    }

    pub fn contains(pattern: &str) -> Self {
        Self::new(PatternType::Contains, pattern)
    }

    fn new(pattern_type: PatternType, pattern: &str) -> Self {
        Self {
            pattern_type,
            pattern: pattern.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let subject = if self.pattern.starts_with('/') {
            url.path()
        } else {
            url.as_str()
        };
        match self.pattern_type {
            PatternType::Exact => subject == self.pattern,
            PatternType::Prefix => subject.starts_with(&self.pattern),
            PatternType::Suffix => subject.ends_with(&self.pattern),
            PatternType::Contains => subject.contains(&self.pattern),
        }
    }
}

/// A pattern bound to a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(flatten)]
    pub pattern: UrlPattern,
    pub strategy: Strategy,
    /// Priority (higher = first).
    #[serde(default)]
    pub priority: i32,
}

impl Route {
    pub fn new(pattern: UrlPattern, strategy: Strategy) -> Self {
        Self {
            pattern,
            strategy,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Ordered set of routes with a fallback strategy.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    default_strategy: Strategy,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from configured routes.
    pub fn from_routes(routes: impl IntoIterator<Item = Route>) -> Self {
        let mut table = Self::new();
        for route in routes {
            table.add(route);
        }
        table
    }

    /// Add a route. Among equal priorities the earlier route wins.
    pub fn add(&mut self, route: Route) {
        self.routes.push(route);
        // Stable sort keeps insertion order within a priority.
        self.routes.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Pick the strategy for a request.
    pub fn strategy_for(&self, request: &Request) -> Strategy {
        for route in &self.routes {
            if route.pattern.matches(&request.url) {
                trace!(url = %request.url, strategy = %route.strategy, "Route matched");
                return route.strategy;
            }
        }
        self.default_strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn request(s: &str) -> Request {
        Request::get(url(s))
    }

    #[test]
    fn test_path_patterns() {
        assert!(UrlPattern::exact("/").matches(&url("https://powerfit.example/")));
        assert!(!UrlPattern::exact("/").matches(&url("https://powerfit.example/classes")));
        assert!(UrlPattern::prefix("/api/").matches(&url("https://powerfit.example/api/classes")));
        assert!(UrlPattern::suffix(".png").matches(&url("https://powerfit.example/icons/a.png")));
        assert!(UrlPattern::contains("icon").matches(&url("https://powerfit.example/icons/a.png")));
    }

    #[test]
    fn test_full_url_patterns() {
        let fonts = UrlPattern::prefix("https://fonts.example/");
        assert!(fonts.matches(&url("https://fonts.example/inter.woff2")));
        assert!(!fonts.matches(&url("https://powerfit.example/inter.woff2")));
    }

    #[test]
    fn test_priority_order() {
        let mut table = RouteTable::new();
        table.add(Route::new(UrlPattern::prefix("/api/"), Strategy::NetworkFirst));
        table.add(
            Route::new(UrlPattern::exact("/api/schedule"), Strategy::StaleWhileRevalidate)
                .with_priority(10),
        );

        assert_eq!(
            table.strategy_for(&request("https://powerfit.example/api/schedule")),
            Strategy::StaleWhileRevalidate
        );
        assert_eq!(
            table.strategy_for(&request("https://powerfit.example/api/classes")),
            Strategy::NetworkFirst
        );
        assert_eq!(
            table.strategy_for(&request("https://powerfit.example/styles.css")),
            Strategy::OfflineFirst
        );
    }

    #[test]
    fn test_route_from_json() {
        let routes: Vec<Route> = serde_json::from_str(
            r#"[{ "match": "suffix", "pattern": ".png", "strategy": "cache-first" }]"#,
        )
        .unwrap();
        let table = RouteTable::from_routes(routes);
        assert_eq!(
            table.strategy_for(&request("https://powerfit.example/icons/icon-72x72.png")),
            Strategy::CacheFirst
        );
    }
}
