//! Categorization payloads and the pending records built from them.
//!
//! A payload describes one search results page after its organic and
//! sponsored domains were mapped to topic categories. The scheduler keeps
//! one [`PendingRecord`] per page until it is reported.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PayloadError;

/// Highest category id present in the domain-to-category mappings
pub const MAX_CATEGORY_ID: u16 = 32;

/// Identifies a page for as long as it stays open
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Topic category id. `0` is reserved for results that could not be decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(pub u16);

impl Category {
    pub const INCONCLUSIVE: Self = Self(0);

    #[must_use]
    pub const fn is_known(self) -> bool {
        self.0 <= MAX_CATEGORY_ID
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category outcome for one kind of result (organic or sponsored)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultCounts {
    pub category: Category,
    pub num_domains: u32,
    pub num_inconclusive: u32,
    pub num_unknown: u32,
}

impl ResultCounts {
    fn validate(&self, side: &'static str) -> Result<(), PayloadError> {
        if !self.category.is_known() {
            return Err(PayloadError::CategoryOutOfRange {
                side,
                category: self.category,
                max: MAX_CATEGORY_ID,
            });
        }
        let undecided = u64::from(self.num_inconclusive) + u64::from(self.num_unknown);
        if undecided > u64::from(self.num_domains) {
            return Err(PayloadError::DomainCountsInconsistent {
                side,
                domains: self.num_domains,
                inconclusive: self.num_inconclusive,
                unknown: self.num_unknown,
            });
        }
        Ok(())
    }
}

/// Search provider the page belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub provider: String,
    #[serde(default)]
    pub partner_code: String,
    #[serde(default)]
    pub tagged: bool,
}

/// Ad interaction counters observed on the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdCounts {
    #[serde(default)]
    pub clicked: u32,
    #[serde(default)]
    pub hidden: u32,
    #[serde(default)]
    pub loaded: u32,
    #[serde(default)]
    pub visible: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorizationPayload {
    pub organic: ResultCounts,
    pub sponsored: ResultCounts,
    pub mappings_version: u32,
    pub provider: ProviderInfo,
    #[serde(default)]
    pub ads: AdCounts,
    #[serde(default)]
    pub is_shopping_page: bool,
}

impl CategorizationPayload {
    /// Check that the payload is fully formed.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found: an unknown category id, more
    /// undecided domains than domains, a missing mappings version or provider,
    /// or hidden/visible ad counts above the loaded count.
    pub fn validate(&self) -> Result<(), PayloadError> {
        self.organic.validate("organic")?;
        self.sponsored.validate("sponsored")?;

        if self.mappings_version == 0 {
            return Err(PayloadError::MissingMappingsVersion);
        }
        if self.provider.provider.trim().is_empty() {
            return Err(PayloadError::MissingProvider);
        }

        for (field, count) in [("hidden", self.ads.hidden), ("visible", self.ads.visible)] {
            if count > self.ads.loaded {
                return Err(PayloadError::AdCountsInconsistent {
                    field,
                    count,
                    loaded: self.ads.loaded,
                });
            }
        }
        Ok(())
    }
}

/// A categorization waiting to be reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub page: PageId,
    pub payload: CategorizationPayload,
    pub categorized_at: DateTime<Utc>,
}

impl PendingRecord {
    #[must_use]
    pub fn new(page: PageId, payload: CategorizationPayload, categorized_at: DateTime<Utc>) -> Self {
        Self {
            page,
            payload,
            categorized_at,
        }
    }

    /// Milliseconds between categorization and `now`; negative if the clock went backwards
    #[must_use]
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.categorized_at).num_milliseconds()
    }
}

#[cfg(test)]
pub(crate) fn sample_payload() -> CategorizationPayload {
    CategorizationPayload {
        organic: ResultCounts {
            category: Category(3),
            num_domains: 1,
            num_inconclusive: 0,
            num_unknown: 0,
        },
        sponsored: ResultCounts {
            category: Category(4),
            num_domains: 2,
            num_inconclusive: 0,
            num_unknown: 0,
        },
        mappings_version: 1,
        provider: ProviderInfo {
            provider: "example".to_string(),
            partner_code: "ff".to_string(),
            tagged: true,
        },
        ads: AdCounts {
            clicked: 0,
            hidden: 0,
            loaded: 2,
            visible: 2,
        },
        is_shopping_page: false,
    }
}
