use crate::config::{GatewayConfig, ServicesConfig};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Users,
    Data,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Users => f.write_str("users-service"),
            Service::Data => f.write_str("data-service"),
        }
    }
}

pub const USERS_PREFIX: &str = "/api/v1/users";
pub const FAVORITES_PREFIX: &str = "/api/v1/favorites";
pub const DATA_PREFIX: &str = "/api/v1/data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: String,
    pub service: Service,
    upstream: String,
}

impl Route {
    pub fn new(prefix: &str, service: Service, upstream: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            service,
            upstream: upstream.trim_end_matches('/').to_string(),
        }
    }

    /// Prefix match on a path-segment boundary: `/api/v1/data` matches
    /// `/api/v1/data` and `/api/v1/data/latest` but not `/api/v1/database`.
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(&self.prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Ordered prefix table; the first matching route wins.
#[derive(Debug, Clone)]
pub struct RouteTable {
    strip_prefix: String,
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(strip_prefix: &str, routes: Vec<Route>) -> Self {
        Self {
            strip_prefix: strip_prefix.trim_end_matches('/').to_string(),
            routes,
        }
    }

    pub fn from_config(gateway: &GatewayConfig, services: &ServicesConfig) -> Self {
        Self::new(
            &gateway.normalized_strip_prefix(),
            vec![
                Route::new(USERS_PREFIX, Service::Users, &services.users_url),
                Route::new(FAVORITES_PREFIX, Service::Users, &services.users_url),
                Route::new(DATA_PREFIX, Service::Data, &services.data_url),
            ],
        )
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn find(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(path))
    }

    /// Backend URL for an inbound path and query string.
    pub fn upstream_url(&self, route: &Route, path: &str, query: Option<&str>) -> String {
        let forwarded = if self.strip_prefix.is_empty() {
            path
        } else {
            match path.strip_prefix(&self.strip_prefix) {
                Some(rest) if rest.is_empty() => "/",
                Some(rest) if rest.starts_with('/') => rest,
                _ => path,
            }
        };

        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", route.upstream, forwarded, q),
            _ => format!("{}{}", route.upstream, forwarded),
        }
    }
}
