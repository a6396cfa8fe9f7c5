//! Query surface types for browsing persisted records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::decision::{Decision, Destination};

/// Category selector for listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFilter {
    #[default]
    All,
    Relevant,
    Uncategorized,
}

impl CategoryFilter {
    pub fn includes(&self, destination: Destination) -> bool {
        match self {
            Self::All => true,
            Self::Relevant => destination == Destination::Relevant,
            Self::Uncategorized => destination == Destination::Uncategorized,
        }
    }

    /// Destinations this filter selects.
    pub fn destinations(&self) -> Vec<Destination> {
        Destination::ALL
            .into_iter()
            .filter(|d| self.includes(*d))
            .collect()
    }
}

/// Filter over persisted records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub category: CategoryFilter,

    /// Only these sources (empty = all sources).
    #[serde(default)]
    pub sources: Vec<String>,

    /// Posted on or after this date.
    pub from: Option<NaiveDate>,

    /// Posted on or before this date.
    pub to: Option<NaiveDate>,

    /// Case-insensitive match against message text and source.
    pub search: Option<String>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: CategoryFilter) -> Self {
        self.category = category;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Accepts the dashboard's comma-separated multi-select form.
    pub fn with_sources_csv(mut self, csv: &str) -> Self {
        self.sources.extend(
            csv.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty() && *s != "all")
                .map(String::from),
        );
        self
    }

    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        self.search = if search.trim().is_empty() {
            None
        } else {
            Some(search)
        };
        self
    }

    pub fn matches(&self, record: &Decision) -> bool {
        let meta = record.meta();

        if !self.category.includes(record.destination()) {
            return false;
        }
        if !self.sources.is_empty() && !self.sources.iter().any(|s| s == &meta.source) {
            return false;
        }

        let day = meta.posted_on();
        if self.from.is_some_and(|from| day < from) || self.to.is_some_and(|to| day > to) {
            return false;
        }

        match &self.search {
            Some(needle) => {
                let needle = needle.to_lowercase();
                record.text().to_lowercase().contains(&needle)
                    || meta.source.to_lowercase().contains(&needle)
            }
            None => true,
        }
    }
}

/// 1-based page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub per_page: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl PageRequest {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1).saturating_mul(self.per_page)
    }
}

/// One page of matching records, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPage {
    pub records: Vec<Decision>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

impl RecordPage {
    pub fn new(records: Vec<Decision>, total: usize, request: PageRequest) -> Self {
        Self {
            records,
            total,
            page: request.page,
            per_page: request.per_page,
            total_pages: total.div_ceil(request.per_page.max(1)),
        }
    }

    /// Sort newest first and cut one page out of an already filtered set.
    pub fn paginate(mut records: Vec<Decision>, request: PageRequest) -> Self {
        sort_newest_first(&mut records);
        let total = records.len();
        let records = records
            .into_iter()
            .skip(request.offset())
            .take(request.per_page)
            .collect();
        Self::new(records, total, request)
    }
}

/// Newest post first; ties broken by key for a stable order.
pub fn sort_newest_first(records: &mut [Decision]) {
    records.sort_by(|a, b| {
        b.meta()
            .posted_at
            .cmp(&a.meta().posted_at)
            .then_with(|| a.key().cmp(b.key()))
    });
}

/// Message count for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCount {
    pub name: String,
    pub count: usize,
}

/// Aggregate counts for the dashboard header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total: usize,
    pub relevant: usize,
    pub uncategorized: usize,
    pub today: usize,

    /// Five busiest sources
    pub top_sources: Vec<SourceCount>,

    /// Seven most recent posting dates with counts, newest first
    pub recent_dates: Vec<(NaiveDate, usize)>,
}

impl DashboardStats {
    /// Compute from the full record set.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Decision>, today: NaiveDate) -> Self {
        let mut stats = Self::default();
        let mut sources: indexmap::IndexMap<String, usize> = indexmap::IndexMap::new();
        let mut dates: std::collections::BTreeMap<NaiveDate, usize> = Default::default();

        for record in records {
            stats.total += 1;
            match record.destination() {
                Destination::Relevant => stats.relevant += 1,
                Destination::Uncategorized => stats.uncategorized += 1,
            }

            let meta = record.meta();
            let day = meta.posted_on();
            if day == today {
                stats.today += 1;
            }
            *sources.entry(meta.source.clone()).or_insert(0) += 1;
            *dates.entry(day).or_insert(0) += 1;
        }

        let mut top: Vec<_> = sources
            .into_iter()
            .map(|(name, count)| SourceCount { name, count })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count));
        top.truncate(5);
        stats.top_sources = top;

        stats.recent_dates = dates.into_iter().rev().take(7).collect();
        stats
    }
}
