//! Endpoint classification

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Decision on how to serve a data request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Submit through the consensus log
    Write,

    /// Serve from the local replica
    Read,
}

/// Decides which endpoints mutate executor state
pub trait Classifier: Send + Sync + 'static {
    fn is_write(&self, endpoint: &str) -> bool;

    fn route(&self, endpoint: &str) -> Route {
        if self.is_write(endpoint) {
            Route::Write
        } else {
            Route::Read
        }
    }
}

impl<F> Classifier for F
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    fn is_write(&self, endpoint: &str) -> bool {
        self(endpoint)
    }
}

/// Fixed set of mutating endpoints, matched exactly
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteEndpoints(BTreeSet<String>);

impl WriteEndpoints {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(endpoints.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.0.contains(endpoint)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Classifier for WriteEndpoints {
    fn is_write(&self, endpoint: &str) -> bool {
        self.contains(endpoint)
    }
}

impl<S: Into<String>> FromIterator<S> for WriteEndpoints {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_table() {
        let endpoints = WriteEndpoints::new(["upsert", "delete"]);
        let cases = [
            ("upsert", Route::Write),
            ("delete", Route::Write),
            ("search", Route::Read),
            ("get", Route::Read),
            ("Upsert", Route::Read),
            ("upsert ", Route::Read),
            ("", Route::Read),
        ];
        for (endpoint, expected) in cases {
            assert_eq!(endpoints.route(endpoint), expected, "endpoint {:?}", endpoint);
        }
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |endpoint: &str| endpoint.starts_with("put");
        assert_eq!(classifier.route("put_doc"), Route::Write);
        assert_eq!(classifier.route("search"), Route::Read);
    }

    #[test]
    fn test_empty_set_reads_everything() {
        let endpoints = WriteEndpoints::default();
        assert!(endpoints.is_empty());
        assert_eq!(endpoints.route("upsert"), Route::Read);
    }
}
