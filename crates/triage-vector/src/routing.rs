//! Category → support team routing.

use tracing::warn;

use triage_core::config::{ClassifierConfig, RouteConfig};

/// Immutable category → team map with a catch-all team.
///
/// Routes keep their registration order so the advertised category list is
/// stable between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    routes: Vec<(String, String)>,
    default_team: String,
}

impl RoutingTable {
    /// Build from `(category, team)` pairs. A repeated category keeps its
    /// first team.
    pub fn new<I, C, T>(routes: I, default_team: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (C, T)>,
        C: Into<String>,
        T: Into<String>,
    {
        let mut table = Self {
            routes: Vec::new(),
            default_team: default_team.into(),
        };
        for (category, team) in routes {
            let category = category.into();
            if table.routes.iter().any(|(c, _)| *c == category) {
                warn!(category = %category, "Duplicate route ignored");
                continue;
            }
            table.routes.push((category, team.into()));
        }
        table
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(
            config
                .routes
                .iter()
                .map(|RouteConfig { category, team }| (category.clone(), team.clone())),
            config.default_team.clone(),
        )
    }

    /// Team for `category`, or the default team when it has no route.
    pub fn resolve(&self, category: &str) -> &str {
        self.routes
            .iter()
            .find(|(c, _)| c == category)
            .map(|(_, team)| team.as_str())
            .unwrap_or(&self.default_team)
    }

    /// Routed categories in registration order.
    pub fn categories(&self) -> Vec<String> {
        self.routes.iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn default_team(&self) -> &str {
        &self.default_team
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }
}
