//! Release listing: filtering, sorting and cursor pagination

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{KubeError, Result};
use crate::release::{Release, ReleaseStatus};

pub const DEFAULT_LIST_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    #[default]
    Name,
    LastReleased,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    /// Regex matched against release names
    pub filter: Option<String>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    /// Name to start from (inclusive), as returned in `ListResponse::next`
    pub offset: Option<String>,
    /// Page size; 0 means [`DEFAULT_LIST_LIMIT`]
    pub limit: usize,
    /// Only releases whose latest version has one of these statuses; empty means any
    pub status_codes: Vec<ReleaseStatus>,
    /// `None` lists every namespace
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListResponse {
    pub releases: Vec<Release>,
    /// Name to pass as `offset` to fetch the next page; `None` on the last page
    pub next: Option<String>,
    /// Releases in this page
    pub count: usize,
    /// Releases matching the request across all pages
    pub total: usize,
}

impl ListRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_sort(mut self, sort_by: SortBy, sort_order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.sort_order = sort_order;
        self
    }

    pub fn with_offset(mut self, offset: impl Into<String>) -> Self {
        self.offset = Some(offset.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_status(mut self, status: ReleaseStatus) -> Self {
        self.status_codes.push(status);
        self
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn effective_limit(&self) -> usize {
        if self.limit == 0 { DEFAULT_LIST_LIMIT } else { self.limit }
    }

    /// Reduce raw records (all versions) to one page of latest versions
    pub fn apply(&self, records: Vec<Release>) -> Result<ListResponse> {
        let pattern = self
            .filter
            .as_deref()
            .filter(|f| !f.is_empty())
            .map(Regex::new)
            .transpose()
            .map_err(|e| KubeError::Validation(format!("invalid list filter: {}", e)))?;

        let mut latest: BTreeMap<(String, String), Release> = BTreeMap::new();
        for release in records {
            let key = (release.namespace.clone(), release.name.clone());
            match latest.get(&key) {
                Some(existing) if existing.version >= release.version => {}
                _ => {
                    latest.insert(key, release);
                }
            }
        }

        let mut releases: Vec<Release> = latest
            .into_values()
            .filter(|r| self.status_codes.is_empty() || self.status_codes.contains(&r.status()))
            .filter(|r| pattern.as_ref().is_none_or(|p| p.is_match(&r.name)))
            .collect();

        releases.sort_by(|a, b| {
            let ordering = match self.sort_by {
                SortBy::Name => compare_names(a, b),
                SortBy::LastReleased => a
                    .info
                    .last_deployed
                    .cmp(&b.info.last_deployed)
                    .then_with(|| compare_names(a, b)),
            };
            match self.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        let total = releases.len();

        let start = match self.offset.as_deref().filter(|o| !o.is_empty()) {
            Some(offset) => releases
                .iter()
                .position(|r| r.name == offset)
                .ok_or_else(|| KubeError::Validation(format!("list offset '{}' not found", offset)))?,
            None => 0,
        };

        let mut page: Vec<Release> = releases.into_iter().skip(start).collect();
        let limit = self.effective_limit();
        let next = page.get(limit).map(|r| r.name.clone());
        page.truncate(limit);

        Ok(ListResponse {
            count: page.len(),
            releases: page,
            next,
            total,
        })
    }
}

fn compare_names(a: &Release, b: &Release) -> Ordering {
    a.name.cmp(&b.name).then_with(|| a.namespace.cmp(&b.namespace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::fixtures;
    use chrono::{Duration, Utc};

    fn deployed(names: &[&str]) -> Vec<Release> {
        names
            .iter()
            .map(|n| fixtures::release(n, 1, ReleaseStatus::Deployed))
            .collect()
    }

    fn names(response: &ListResponse) -> Vec<&str> {
        response.releases.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_limit_sets_next_cursor() {
        let records = deployed(&["g", "c", "a", "e", "b", "f", "d"]);

        let response = ListRequest::new()
            .with_limit(6)
            .with_sort(SortBy::Name, SortOrder::Asc)
            .apply(records.clone())
            .unwrap();

        assert_eq!(names(&response), vec!["a", "b", "c", "d", "e", "f"]);
        assert_eq!(response.next.as_deref(), Some("g"));
        assert_eq!(response.count, 6);
        assert_eq!(response.total, 7);

        let rest = ListRequest::new()
            .with_limit(6)
            .with_offset("g")
            .apply(records)
            .unwrap();
        assert_eq!(names(&rest), vec!["g"]);
        assert!(rest.next.is_none());
    }

    #[test]
    fn test_regex_filter() {
        let records = deployed(&[
            "axon",
            "dendrite",
            "neuron",
            "neuroglia",
            "synapse",
            "nucleus",
            "organelles",
        ]);

        let response = ListRequest::new()
            .with_filter("neuro[a-z]+")
            .apply(records)
            .unwrap();

        assert_eq!(names(&response), vec!["neuroglia", "neuron"]);
    }

    #[test]
    fn test_bad_regex_is_validation_error() {
        let err = ListRequest::new().with_filter("(").apply(Vec::new()).unwrap_err();
        assert!(matches!(err, KubeError::Validation(_)));
    }

    #[test]
    fn test_latest_version_only() {
        let records = vec![
            fixtures::release("web", 1, ReleaseStatus::Superseded),
            fixtures::release("web", 3, ReleaseStatus::Failed),
            fixtures::release("web", 2, ReleaseStatus::Superseded),
        ];

        let response = ListRequest::new().apply(records.clone()).unwrap();
        assert_eq!(response.releases.len(), 1);
        assert_eq!(response.releases[0].version, 3);

        let deployed_only = ListRequest::new()
            .with_status(ReleaseStatus::Deployed)
            .apply(records)
            .unwrap();
        assert!(deployed_only.releases.is_empty());
    }

    #[test]
    fn test_sort_by_last_released_desc() {
        let mut records = deployed(&["old", "new", "mid"]);
        let now = Utc::now();
        records[0].info.last_deployed = now - Duration::hours(2);
        records[1].info.last_deployed = now;
        records[2].info.last_deployed = now - Duration::hours(1);

        let response = ListRequest::new()
            .with_sort(SortBy::LastReleased, SortOrder::Desc)
            .apply(records)
            .unwrap();

        assert_eq!(names(&response), vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_unknown_offset() {
        let err = ListRequest::new()
            .with_offset("missing")
            .apply(deployed(&["a"]))
            .unwrap_err();
        assert!(matches!(err, KubeError::Validation(_)));
    }
}
