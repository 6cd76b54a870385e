use serde_json::Value;
use std::time::SystemTime;

use super::Repository;
use crate::engine::{Engine, Item, QueryRequest};
use crate::envelope::{epoch_seconds, Envelope, ENTITY_ID_ATTRIBUTE, PK_ATTRIBUTE};
use crate::error::Error;
use crate::filter::{Filter, Filters};
use crate::keys::{partition_key, partition_prefix, Entity};
use crate::page::{paginate, sort_by_field, PageRequest, PageResponse};
use crate::schema::{CREATED_AT_INDEX, ENTITY_ID_INDEX};

/// Live envelope with its decoded payload
struct Row {
    envelope: Envelope,
    document: Value,
}

impl Row {
    fn decode<T: Entity>(self) -> Result<T, Error> {
        Ok(serde_json::from_value(self.document)?)
    }
}

fn live_rows(items: Vec<Item>, now: i64) -> Result<Vec<Row>, Error> {
    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let envelope = Envelope::from_item(item)?;
        if envelope.is_expired(now) {
            continue;
        }
        rows.push(Row {
            document: envelope.decode_value()?,
            envelope,
        });
    }
    Ok(rows)
}

fn decode_all<T: Entity>(rows: Vec<Row>) -> Result<Vec<T>, Error> {
    rows.into_iter().map(|row| row.decode()).collect()
}

impl<T: Entity, E: Engine> Repository<T, E> {
    /// Newest entity in `scope` matching `filter`
    pub async fn find_one_by(&self, filter: Filter, scope: &str) -> Result<T, Error> {
        self.find_one_by_filters(&Filters::from(filter), scope).await
    }

    /// Newest entity in `scope` matching every filter
    ///
    /// An empty result is [`Error::NoMatch`].
    pub async fn find_one_by_filters(&self, filters: &Filters, scope: &str) -> Result<T, Error> {
        let limit = self.config.timeouts.listing;
        let row = self
            .bounded("Query", limit, self.matching_rows(filters, scope))
            .await?
            .into_iter()
            .next();

        match row {
            Some(row) => row.decode(),
            None => Err(Error::NoMatch {
                entity: T::ENTITY_TYPE,
                scope: scope.to_string(),
            }),
        }
    }

    /// Entities in `scope` matching `filter`, newest first
    pub async fn find_by(&self, filter: Filter, scope: &str) -> Result<Vec<T>, Error> {
        self.find_by_filters(&Filters::from(filter), scope).await
    }

    /// Entities in `scope` matching every filter, newest first
    pub async fn find_by_filters(&self, filters: &Filters, scope: &str) -> Result<Vec<T>, Error> {
        let limit = self.config.timeouts.listing;
        let rows = self
            .bounded("Query", limit, self.matching_rows(filters, scope))
            .await?;
        decode_all(rows)
    }

    /// Every entity in `scope`, newest first
    pub async fn find_all(&self, scope: &str) -> Result<Vec<T>, Error> {
        self.find_by_filters(&Filters::new(), scope).await
    }

    /// One page of the entities in `scope`
    ///
    /// The whole partition is read before slicing, so the cost grows with the
    /// partition rather than the page.
    pub async fn find_all_paginated(
        &self,
        request: &PageRequest,
        scope: &str,
    ) -> Result<PageResponse<T>, Error> {
        self.find_by_paginated(request, &Filters::new(), scope)
            .await
    }

    /// One page of the entities in `scope` matching every filter
    pub async fn find_by_paginated(
        &self,
        request: &PageRequest,
        filters: &Filters,
        scope: &str,
    ) -> Result<PageResponse<T>, Error> {
        request.validate()?;

        let limit = self.config.timeouts.listing;
        let mut rows = self
            .bounded("Query", limit, self.matching_rows(filters, scope))
            .await?;

        if let Some(sort) = &request.sort {
            sort_by_field(&mut rows, sort, |row| &row.document);
        }

        paginate(rows, request)?.try_map(|row| row.decode())
    }

    /// Number of entities in `scope` matching `filter`
    pub async fn count_by(&self, filter: Filter, scope: &str) -> Result<usize, Error> {
        self.count_by_filters(&Filters::from(filter), scope).await
    }

    /// Number of entities in `scope` matching every filter
    pub async fn count_by_filters(&self, filters: &Filters, scope: &str) -> Result<usize, Error> {
        let limit = self.config.timeouts.listing;
        let rows = self
            .bounded("Query", limit, self.matching_rows(filters, scope))
            .await?;
        Ok(rows.len())
    }

    /// Whether any entity in `scope` matches `filter`
    pub async fn exists_by(&self, filter: Filter, scope: &str) -> Result<bool, Error> {
        Ok(self.count_by(filter, scope).await? > 0)
    }

    /// Whether any entity in `scope` matches every filter
    pub async fn exists_by_filters(&self, filters: &Filters, scope: &str) -> Result<bool, Error> {
        Ok(self.count_by_filters(filters, scope).await? > 0)
    }

    /// Entities of this type with identifier `id`, in any scope, newest first
    pub async fn find_by_entity_id(&self, id: &str) -> Result<Vec<T>, Error> {
        let request = QueryRequest::index(self.table(), ENTITY_ID_INDEX, ENTITY_ID_ATTRIBUTE, id);
        let limit = self.config.timeouts.listing;
        let items = self
            .bounded("Query", limit, self.engine.query_all(request))
            .await?;

        let prefix = partition_prefix::<T>();
        let mut rows = live_rows(items, epoch_seconds(SystemTime::now()))?;
        // The index is shared by every entity type in the table
        rows.retain(|row| row.envelope.pk.starts_with(&prefix));
        rows.sort_by(|a, b| b.envelope.created_at.cmp(&a.envelope.created_at));
        decode_all(rows)
    }

    /// Live rows of the partition, newest first
    async fn partition_rows(&self, scope: &str) -> Result<Vec<Row>, Error> {
        let pk = partition_key::<T>(scope)?;

        let request = if self.config.recency_index {
            QueryRequest::index(self.table(), CREATED_AT_INDEX, PK_ATTRIBUTE, pk.clone())
                .scan_forward(false)
        } else {
            QueryRequest::partition(self.table(), pk.clone())
        };

        let items = self.engine.query_all(request).await?;
        let fetched = items.len();
        let mut rows = live_rows(items, epoch_seconds(SystemTime::now()))?;

        if !self.config.recency_index {
            rows.sort_by(|a, b| b.envelope.created_at.cmp(&a.envelope.created_at));
        }

        tracing::debug!(%pk, fetched, live = rows.len(), "Loaded partition");
        Ok(rows)
    }

    async fn matching_rows(&self, filters: &Filters, scope: &str) -> Result<Vec<Row>, Error> {
        let mut rows = self.partition_rows(scope).await?;
        if !filters.is_empty() {
            rows.retain(|row| filters.matches(&row.document));
        }
        Ok(rows)
    }
}
