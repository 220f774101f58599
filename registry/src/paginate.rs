//! Pagination cursors for catalog and tag listings.

use serde::Deserialize;

use crate::error::{Error, RegistryResult};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// A `(last, n)` listing cursor.
///
/// Listings return entries with keys strictly greater than `last`, in
/// lexicographic order, at most `n` of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    /// Exclusive lower bound on returned keys.
    pub last: Option<String>,

    /// Page size limit.
    pub n: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            last: None,
            n: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    n: Option<usize>,
    last: Option<String>,
}

impl Pagination {
    /// Create a cursor from explicit parts.
    pub fn new(last: Option<String>, n: usize) -> Self {
        Self {
            last,
            n: n.min(MAX_LIMIT),
        }
    }

    /// Parse the `?n=&last=` query parameters.
    pub fn from_query(query: Option<&str>) -> RegistryResult<Self> {
        let Some(query) = query else {
            return Ok(Self::default());
        };
        let parsed: PageQuery = serde_urlencoded::from_str(query)
            .map_err(|err| Error::Malformed(format!("query string: {err}")))?;
        Ok(Self::new(parsed.last, parsed.n.unwrap_or(DEFAULT_LIMIT)))
    }

    /// Apply the cursor to an unsorted listing: sort, de-duplicate, drop
    /// everything at or below `last`, and truncate to the page size.
    pub fn window<I>(&self, entries: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut entries: Vec<String> = entries
            .into_iter()
            .filter(|entry| match &self.last {
                Some(last) => entry.as_str() > last.as_str(),
                None => true,
            })
            .collect();
        entries.sort();
        entries.dedup();
        entries.truncate(self.n);
        entries
    }
}
