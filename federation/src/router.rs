//! Route table
//!
//! Routes are matched in order and the first match wins, so specific paths
//! must be listed before the generic `/:index/...` patterns they overlap
//! with. Requests matching no route go to the fallback handler.
//!
//! Pattern segments:
//! - `name` matches the literal segment
//! - `:name` matches any single segment and captures it
//! - `*` matches all remaining segments (possibly none), last segment only
//! - `*text*` matches any segment containing `text`

use http::Method;
use std::sync::Arc;

use crate::handler::Handler;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(&'static str),
    Param(&'static str),
    Rest,
    Contains(&'static str),
}

/// A parsed path pattern such as `/:index/_update/:id`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(pattern: &'static str) -> Self {
        let segments = split_path(pattern)
            .map(|segment| {
                if segment == "*" {
                    Segment::Rest
                } else if let Some(name) = segment.strip_prefix(':') {
                    Segment::Param(name)
                } else if segment.len() > 2 && segment.starts_with('*') && segment.ends_with('*') {
                    Segment::Contains(&segment[1..segment.len() - 1])
                } else {
                    Segment::Literal(segment)
                }
            })
            .collect();

        Self { segments }
    }

    /// Returns the captured parameters when `path` matches.
    pub fn matches(&self, path: &str) -> Option<RouteParams> {
        let mut params = RouteParams::default();
        let mut path_segments = split_path(path);

        for segment in &self.segments {
            if *segment == Segment::Rest {
                return Some(params);
            }

            let value = path_segments.next()?;
            match segment {
                Segment::Literal(literal) if *literal == value => {}
                Segment::Param(name) => params.0.push((*name, value.to_string())),
                Segment::Contains(text) if value.contains(text) => {}
                _ => return None,
            }
        }

        path_segments.next().is_none().then_some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Path parameters captured by a route
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteParams(Vec<(&'static str, String)>);

impl RouteParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(param, _)| *param == name)
            .map(|(_, value)| value.as_str())
    }
}

pub struct Route {
    /// `None` matches every method
    method: Option<Method>,
    pattern: Pattern,
    handler: Arc<dyn Handler>,
}

impl Route {
    pub fn new(method: Option<Method>, pattern: &'static str, handler: Arc<dyn Handler>) -> Self {
        Self {
            method,
            pattern: Pattern::parse(pattern),
            handler,
        }
    }
}

/// Ordered route table, built once at startup
pub struct Router {
    routes: Vec<Route>,
    fallback: Arc<dyn Handler>,
}

impl Router {
    pub fn new(routes: Vec<Route>, fallback: Arc<dyn Handler>) -> Self {
        Self { routes, fallback }
    }

    /// Finds the handler for a request, falling back when nothing matches.
    pub fn find(&self, method: &Method, path: &str) -> (Arc<dyn Handler>, RouteParams) {
        for route in &self.routes {
            if route.method.as_ref().is_some_and(|m| m != method) {
                continue;
            }
            if let Some(params) = route.pattern.matches(path) {
                tracing::debug!(handler = route.handler.name(), path, "Matched route");
                return (route.handler.clone(), params);
            }
        }

        (self.fallback.clone(), RouteParams::default())
    }
}
