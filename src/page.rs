use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::Error;
use crate::filter::compare_values;

/// Page size meaning "everything on one page"
pub const UNPAGED: i64 = -1;

/// Ordering requested for a page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    /// Serialized field name
    pub field: String,
    /// `1` ascending, `-1` descending
    pub direction: i32,
}

impl SortField {
    /// Ascending by `field`
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: 1,
        }
    }

    /// Descending by `field`
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: -1,
        }
    }
}

/// 1-based page selection
///
/// ```
/// use dynamo_repository::PageRequest;
///
/// let request: PageRequest = serde_json::from_str(r#"{"page": 2, "size": 10}"#).unwrap();
/// assert_eq!(request, PageRequest::new(2, 10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Page number, starting at 1
    pub page: i64,
    /// Page size, or [`UNPAGED`]
    pub size: i64,
    /// Optional ordering; recency order when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortField>,
}

impl PageRequest {
    /// Page `page` of `size` items
    pub fn new(page: i64, size: i64) -> Self {
        Self {
            page,
            size,
            sort: None,
        }
    }

    /// Everything on a single page
    pub fn unpaged() -> Self {
        Self::new(1, UNPAGED)
    }

    /// Order items before slicing
    pub fn with_sort(mut self, sort: SortField) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Reject requests with no meaningful slice
    pub fn validate(&self) -> Result<(), Error> {
        if self.page < 1 {
            return Err(Error::InvalidPageRequest(format!(
                "page must be at least 1, got {}",
                self.page
            )));
        }
        if self.size == 0 || self.size < UNPAGED {
            return Err(Error::InvalidPageRequest(format!(
                "size must be positive or {}, got {}",
                UNPAGED, self.size
            )));
        }
        if let Some(sort) = &self.sort {
            if sort.direction != 1 && sort.direction != -1 {
                return Err(Error::InvalidPageRequest(format!(
                    "sort direction must be 1 or -1, got {}",
                    sort.direction
                )));
            }
        }
        Ok(())
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::unpaged()
    }
}

/// One page of results with totals over the whole result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse<T> {
    /// Items on this page
    #[serde(rename = "content")]
    pub contents: Vec<T>,
    /// Items on this page
    pub number_of_elements: usize,
    /// The request that produced the page
    pub pageable: PageRequest,
    /// Pages in the whole result set
    pub total_pages: usize,
    /// Items in the whole result set
    pub total_elements: usize,
}

impl<T> PageResponse<T> {
    /// Convert every item, keeping the totals
    pub fn try_map<U, F>(self, f: F) -> Result<PageResponse<U>, Error>
    where
        F: FnMut(T) -> Result<U, Error>,
    {
        Ok(PageResponse {
            contents: self.contents.into_iter().map(f).collect::<Result<_, _>>()?,
            number_of_elements: self.number_of_elements,
            pageable: self.pageable,
            total_pages: self.total_pages,
            total_elements: self.total_elements,
        })
    }
}

/// Slice an already materialized, ordered result set
///
/// A page past the end is empty but still reports accurate totals.
pub fn paginate<T>(items: Vec<T>, request: &PageRequest) -> Result<PageResponse<T>, Error> {
    request.validate()?;
    let total_elements = items.len();

    let contents = if request.size == UNPAGED {
        items
    } else {
        let size = usize::try_from(request.size).unwrap_or(usize::MAX);
        let start = usize::try_from(request.page - 1)
            .unwrap_or(usize::MAX)
            .saturating_mul(size);
        items.into_iter().skip(start).take(size).collect()
    };

    Ok(PageResponse {
        number_of_elements: contents.len(),
        contents,
        pageable: request.clone(),
        total_pages: total_pages(total_elements, request.size),
        total_elements,
    })
}

/// `ceil(total / size)`, or 1 for [`UNPAGED`]
pub fn total_pages(total_elements: usize, size: i64) -> usize {
    if size == UNPAGED {
        return 1;
    }
    let size = usize::try_from(size).unwrap_or(usize::MAX).max(1);
    total_elements.div_ceil(size)
}

/// Stable sort of rows by a field of their serialized form
///
/// Values order by kind (numbers, strings, booleans) and then by value. Rows where
/// the field is missing or holds a composite value go last in either direction.
pub fn sort_by_field<T, F>(rows: &mut [T], sort: &SortField, document: F)
where
    F: Fn(&T) -> &Value,
{
    rows.sort_by(|a, b| {
        let a = document(a).get(&sort.field).filter(|value| kind_rank(value).is_some());
        let b = document(b).get(&sort.field).filter(|value| kind_rank(value).is_some());
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => {
                let ordering = kind_rank(a)
                    .cmp(&kind_rank(b))
                    .then_with(|| compare_values(a, b).unwrap_or(Ordering::Equal));
                if sort.direction < 0 {
                    ordering.reverse()
                } else {
                    ordering
                }
            }
        }
    });
}

fn kind_rank(value: &Value) -> Option<u8> {
    match value {
        Value::Number(_) => Some(0),
        Value::String(_) => Some(1),
        Value::Bool(_) => Some(2),
        _ => None,
    }
}
