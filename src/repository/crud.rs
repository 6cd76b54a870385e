use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use super::Repository;
use crate::engine::{Engine, PrimaryKey, PutCondition, WriteOp, BATCH_READ_SIZE, BATCH_WRITE_SIZE};
use crate::envelope::{epoch_seconds, Envelope};
use crate::error::Error;
use crate::keys::{entity_id, partition_key, Entity};

impl<T: Entity, E: Engine> Repository<T, E> {
    /// Raw envelope at `(pk, sk)`
    ///
    /// Expired envelopes read as [`Error::NotFound`].
    pub async fn get(&self, pk: &str, sk: &str) -> Result<Envelope, Error> {
        let limit = self.config.timeouts.single;
        let key = PrimaryKey::new(pk, sk);
        let envelope = self.bounded("GetItem", limit, self.read_envelope(&key)).await?;

        match envelope {
            Some(envelope) if !envelope.is_expired(epoch_seconds(SystemTime::now())) => Ok(envelope),
            _ => Err(Error::NotFound {
                entity: T::ENTITY_TYPE,
                id: sk.to_string(),
            }),
        }
    }

    /// Entity `id` in the partition `scope`
    pub async fn find_by_id(&self, id: &str, scope: &str) -> Result<T, Error> {
        let pk = partition_key::<T>(scope)?;
        self.get(&pk, id).await?.decode()
    }

    /// Entities with the given ids in `scope`, newest first
    ///
    /// Missing and expired ids are skipped. Keys are read in sequential batches of
    /// at most 100.
    pub async fn find_all_by_id<I, S>(&self, ids: I, scope: &str) -> Result<Vec<T>, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pk = partition_key::<T>(scope)?;
        let keys = unique_ids(ids)
            .into_iter()
            .map(|id| PrimaryKey::new(pk.clone(), id))
            .collect();

        let limit = self.config.timeouts.listing;
        let mut envelopes = self
            .bounded("BatchGetItem", limit, self.read_envelopes(keys))
            .await?;

        let now = epoch_seconds(SystemTime::now());
        envelopes.retain(|envelope| !envelope.is_expired(now));
        envelopes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        envelopes.iter().map(|envelope| envelope.decode()).collect()
    }

    /// Insert or replace `entity` in `scope`
    ///
    /// The write is conditional on the version read just before it. When another
    /// writer got in between, [`Error::Conflict`] is returned and nothing is written.
    pub async fn save(&self, entity: &T, scope: &str) -> Result<Envelope, Error> {
        let limit = self.config.timeouts.single;
        self.bounded("PutItem", limit, self.write_one(entity, scope))
            .await
    }

    /// Same as [`Repository::save`]
    pub async fn save_or_update(&self, entity: &T, scope: &str) -> Result<Envelope, Error> {
        self.save(entity, scope).await
    }

    /// Same as [`Repository::save`]
    pub async fn update(&self, entity: &T, scope: &str) -> Result<Envelope, Error> {
        self.save(entity, scope).await
    }

    /// Write many entities in sequential batches of at most 25
    ///
    /// Batches that completed before a failing one stay written. Batch writes carry
    /// no version condition, so a concurrent writer can be overwritten. When an id
    /// repeats, the last entity with that id is written.
    pub async fn save_all(&self, entities: &[T], scope: &str) -> Result<(), Error> {
        let limit = self.config.timeouts.batch;
        self.bounded("BatchWriteItem", limit, self.write_many(entities, scope))
            .await
    }

    /// Remove entity `id` from `scope`; removing a missing entity succeeds
    pub async fn delete(&self, id: &str, scope: &str) -> Result<(), Error> {
        let key = PrimaryKey::new(partition_key::<T>(scope)?, id);
        let limit = self.config.timeouts.single;
        self.bounded("DeleteItem", limit, self.engine.delete_item(self.table(), &key))
            .await
    }

    /// Remove many entities in sequential batches of at most 25
    pub async fn delete_all<I, S>(&self, ids: I, scope: &str) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pk = partition_key::<T>(scope)?;
        let ops = unique_ids(ids)
            .into_iter()
            .map(|id| WriteOp::Delete(PrimaryKey::new(pk.clone(), id)))
            .collect();

        let limit = self.config.timeouts.batch;
        self.bounded("BatchWriteItem", limit, self.write_batches(ops))
            .await
    }

    async fn read_envelope(&self, key: &PrimaryKey) -> Result<Option<Envelope>, Error> {
        self.engine
            .get_item(self.table(), key)
            .await?
            .map(Envelope::from_item)
            .transpose()
    }

    /// Physical envelopes for `keys`, expired ones included
    async fn read_envelopes(&self, keys: Vec<PrimaryKey>) -> Result<Vec<Envelope>, Error> {
        let mut envelopes = Vec::with_capacity(keys.len());
        let batches = keys.len().div_ceil(BATCH_READ_SIZE);

        for (index, chunk) in keys.chunks(BATCH_READ_SIZE).enumerate() {
            tracing::debug!(table = %self.table(), batch = index + 1, of = batches, keys = chunk.len(), "Reading batch");
            let output = self
                .engine
                .batch_get_item(self.table(), chunk.to_vec())
                .await?;

            if !output.unprocessed.is_empty() {
                tracing::warn!(table = %self.table(), count = output.unprocessed.len(), "BatchGetItem left keys unprocessed");
                return Err(Error::Unprocessed {
                    operation: "BatchGetItem",
                    count: output.unprocessed.len(),
                });
            }

            for item in output.items {
                envelopes.push(Envelope::from_item(item)?);
            }
        }

        Ok(envelopes)
    }

    async fn write_one(&self, entity: &T, scope: &str) -> Result<Envelope, Error> {
        let pk = partition_key::<T>(scope)?;
        let sk = entity_id(entity)?;
        let key = PrimaryKey::new(pk.clone(), sk.clone());

        let previous = self.read_envelope(&key).await?;
        let envelope = Envelope::next(
            entity,
            pk,
            sk,
            previous.as_ref(),
            SystemTime::now(),
            self.config.ttl,
        )?;

        let expected_version = previous.as_ref().map(|previous| previous.version);
        let condition = match expected_version {
            Some(version) => PutCondition::VersionEquals(version),
            None => PutCondition::NotExists,
        };

        match self
            .engine
            .put_item(self.table(), envelope.to_item()?, condition)
            .await
        {
            Ok(()) => Ok(envelope),
            Err(e) if e.is_conditional_check_failed() => {
                tracing::warn!(pk = %key.pk, sk = %key.sk, ?expected_version, "Conflicting write");
                Err(Error::Conflict {
                    pk: key.pk,
                    sk: key.sk,
                    expected_version,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn write_many(&self, entities: &[T], scope: &str) -> Result<(), Error> {
        let pk = partition_key::<T>(scope)?;

        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut unique: Vec<(String, &T)> = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = entity_id(entity)?;
            match positions.get(&id) {
                Some(&position) => unique[position].1 = entity,
                None => {
                    let _ = positions.insert(id.clone(), unique.len());
                    unique.push((id, entity));
                }
            }
        }

        let keys = unique
            .iter()
            .map(|(id, _)| PrimaryKey::new(pk.clone(), id.clone()))
            .collect();
        let previous: HashMap<String, Envelope> = self
            .read_envelopes(keys)
            .await?
            .into_iter()
            .map(|envelope| (envelope.sk.clone(), envelope))
            .collect();

        let now = SystemTime::now();
        let ops = unique
            .into_iter()
            .map(|(id, entity)| {
                let envelope = Envelope::next(
                    entity,
                    pk.clone(),
                    id.clone(),
                    previous.get(&id),
                    now,
                    self.config.ttl,
                )?;
                Ok::<_, Error>(WriteOp::Put(envelope.to_item()?))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        self.write_batches(ops).await
    }

    async fn write_batches(&self, ops: Vec<WriteOp>) -> Result<(), Error> {
        let batches = ops.len().div_ceil(BATCH_WRITE_SIZE);
        let mut ops = ops.into_iter();

        for index in 0..batches {
            let chunk: Vec<WriteOp> = ops.by_ref().take(BATCH_WRITE_SIZE).collect();
            tracing::debug!(table = %self.table(), batch = index + 1, of = batches, requests = chunk.len(), "Writing batch");

            let unprocessed = self.engine.batch_write_item(self.table(), chunk).await?;
            if !unprocessed.is_empty() {
                tracing::warn!(table = %self.table(), count = unprocessed.len(), "BatchWriteItem left requests unprocessed");
                return Err(Error::Unprocessed {
                    operation: "BatchWriteItem",
                    count: unprocessed.len(),
                });
            }
        }

        Ok(())
    }
}

/// Ids in first-seen order without repeats
fn unique_ids<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    ids.into_iter()
        .map(|id| id.as_ref().to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_ids_keeps_first_occurrence_order() {
        assert_eq!(unique_ids(["b", "a", "b", "c", "a"]), vec!["b", "a", "c"]);
        assert!(unique_ids(Vec::<String>::new()).is_empty());
    }
}
