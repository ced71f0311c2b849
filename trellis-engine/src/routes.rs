//! In-code route table
//!
//! Resolves `METHOD /path/{capture}` patterns and builds a fresh handler
//! per request. Applications that discover routes elsewhere implement
//! [`RouteResolver`] and [`HandlerFactory`] themselves.

use crate::collaborators::{Handler, HandlerFactory, RouteConfig, RouteMatch, RouteResolver};
use crate::failure::{Failure, FailureClass};
use std::fmt;
use std::sync::Arc;
use trellis_common::Parameters;

type MakeHandler = Box<dyn Fn() -> Box<dyn Handler> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
    Literal(String),
    Capture(String),
}

struct RouteEntry {
    method: String,
    pattern: Vec<PatternSegment>,
    config: Arc<RouteConfig>,
    make: MakeHandler,
}

impl RouteEntry {
    fn matches(&self, method: &str, segments: &[&str]) -> Option<Parameters> {
        if self.method != "*" && !self.method.eq_ignore_ascii_case(method) {
            return None;
        }
        if self.pattern.len() != segments.len() {
            return None;
        }

        let mut captured = Parameters::new();
        for (expected, actual) in self.pattern.iter().zip(segments) {
            match expected {
                PatternSegment::Literal(literal) if literal == actual => {}
                PatternSegment::Literal(_) => return None,
                PatternSegment::Capture(name) => captured.append(name.as_str(), *actual),
            }
        }
        Some(captured)
    }
}

/// Ordered route list; the first matching entry wins
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route; `method` may be `*` to match any method
    pub fn add<H, F>(&mut self, method: &str, pattern: &str, config: RouteConfig, make: F)
    where
        H: Handler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.routes.push(RouteEntry {
            method: method.to_string(),
            pattern: parse_pattern(pattern),
            config: Arc::new(config),
            make: Box::new(move || Box::new(make()) as Box<dyn Handler>),
        });
    }

    /// Builder-style [`RouteTable::add`]
    pub fn route<H, F>(mut self, method: &str, pattern: &str, config: RouteConfig, make: F) -> Self
    where
        H: Handler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.add(method, pattern, config, make);
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteResolver for RouteTable {
    fn lookup(&self, method: &str, uri: &str) -> Option<RouteMatch> {
        let segments = path_segments(uri);
        self.routes.iter().find_map(|entry| {
            entry.matches(method, &segments).map(|uri_parameters| RouteMatch {
                config: Arc::clone(&entry.config),
                uri_parameters,
            })
        })
    }
}

impl HandlerFactory for RouteTable {
    fn create(&self, route: &RouteConfig) -> Result<Box<dyn Handler>, Failure> {
        self.routes
            .iter()
            .find(|entry| entry.config.name == route.name)
            .map(|entry| (entry.make)())
            .ok_or_else(|| {
                Failure::new(
                    FailureClass::CONFIGURATION,
                    format!("no handler registered for route '{}'", route.name),
                )
            })
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.routes
                    .iter()
                    .map(|r| format!("{} {:?} -> {}", r.method, r.pattern, r.config.name)),
            )
            .finish()
    }
}

fn path_segments(uri: &str) -> Vec<&str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn parse_pattern(pattern: &str) -> Vec<PatternSegment> {
    path_segments(pattern)
        .into_iter()
        .map(|segment| {
            match segment
                .strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
            {
                Some(name) => PatternSegment::Capture(name.to_string()),
                None => PatternSegment::Literal(segment.to_string()),
            }
        })
        .collect()
}
