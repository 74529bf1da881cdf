//! Navigation service used for redirects on authentication failures.

use std::sync::Mutex;

use tracing::info;

/// A navigation target: a path plus query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Location {
    pub fn new(path: impl Into<String>) -> Self {
        Location {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub trait Navigator: Send + Sync {
    /// Full path (with query) of the currently displayed route, if any.
    fn current_path(&self) -> Option<String>;
    fn navigate(&self, location: Location);
}

/// Keeps the navigation history in memory.
#[derive(Debug, Default)]
pub struct HistoryNavigator {
    history: Mutex<Vec<Location>>,
}

impl HistoryNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the history at `path`.
    pub fn starting_at(path: &str) -> Self {
        HistoryNavigator {
            history: Mutex::new(vec![Location::new(path)]),
        }
    }

    pub fn history(&self) -> Vec<Location> {
        match self.history.lock() {
            Ok(history) => history.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last(&self) -> Option<Location> {
        self.history().pop()
    }
}

impl Navigator for HistoryNavigator {
    fn current_path(&self) -> Option<String> {
        self.last().map(|location| {
            if location.query.is_empty() {
                location.path
            } else {
                let query: Vec<String> = location
                    .query
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                format!("{}?{}", location.path, query.join("&"))
            }
        })
    }

    fn navigate(&self, location: Location) {
        info!(path = %location.path, "Navigating");
        match self.history.lock() {
            Ok(mut history) => history.push(location),
            Err(poisoned) => poisoned.into_inner().push(location),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_path_includes_query() {
        let navigator = HistoryNavigator::starting_at("/forecast");
        assert_eq!(navigator.current_path().as_deref(), Some("/forecast"));
        navigator.navigate(Location::new("/login").with_query("redirect", "/forecast"));
        assert_eq!(
            navigator.current_path().as_deref(),
            Some("/login?redirect=/forecast")
        );
        assert_eq!(navigator.history().len(), 2);
    }

    #[test]
    fn empty_history_has_no_current_path() {
        assert_eq!(HistoryNavigator::new().current_path(), None);
    }
}
