//! In-memory backend.

use crate::backend::{
    BackendError, BackendResult, ItemStamp, ModifyOptions, ModifyOutcome, RemoveOutcome,
    SyncBackend,
};
use airsync_codec::tags::{airsyncbase, calendar};
use airsync_codec::Tag;
use airsync_protocol::{
    ApplicationData, Change, ChangeKind, ChangeSet, CollectionClass, ConflictPolicy, FilterType,
    Property, PropertyValue,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone)]
struct Item {
    data: ApplicationData,
    created: u64,
    stamp: u64,
    age_days: u32,
    last: ChangeKind,
}

impl Item {
    /// Replaces the exception of one occurrence.
    fn set_exception(&mut self, instance_id: &str, mut properties: Vec<Property>) {
        let mut list = match self.data.get(calendar::EXCEPTIONS) {
            Some(PropertyValue::Nested(list)) => list.clone(),
            _ => Vec::new(),
        };
        list.retain(|exception| match &exception.value {
            PropertyValue::Nested(fields) => !fields.iter().any(|f| {
                f.tag == airsyncbase::INSTANCE_ID
                    && f.value == PropertyValue::Text(instance_id.to_string())
            }),
            _ => true,
        });
        properties.insert(0, Property::text(airsyncbase::INSTANCE_ID, instance_id));
        list.push(Property {
            tag: calendar::EXCEPTION,
            value: PropertyValue::Nested(properties),
        });
        self.data.set(calendar::EXCEPTIONS, PropertyValue::Nested(list));
    }

    fn visible(&self, filter: FilterType) -> bool {
        filter.max_age_days().map_or(true, |max| self.age_days <= max)
    }
}

#[derive(Debug, Clone)]
struct Tombstone {
    server_id: String,
    created: u64,
    stamp: u64,
}

#[derive(Debug)]
struct Folder {
    class: CollectionClass,
    items: BTreeMap<String, Item>,
    tombstones: Vec<Tombstone>,
}

impl Folder {
    fn changes_since(&self, baseline: u64, filter: FilterType) -> Vec<Change> {
        let mut changes = Vec::new();
        for (id, item) in &self.items {
            if item.stamp <= baseline {
                continue;
            }
            let visible = item.visible(filter);
            if item.created > baseline {
                if visible {
                    changes.push(Change::add(id.clone(), item.data.clone(), item.stamp));
                }
            } else if !visible {
                changes.push(Change::soft_delete(id.clone(), item.stamp));
            } else {
                let mut change = Change::change(id.clone(), item.data.clone(), item.stamp);
                if item.last == ChangeKind::Flags {
                    change.kind = ChangeKind::Flags;
                }
                changes.push(change);
            }
        }
        changes.extend(
            self.tombstones
                .iter()
                .filter(|t| t.stamp > baseline && t.created <= baseline)
                .map(|t| Change::delete(t.server_id.clone(), t.stamp)),
        );
        changes.sort_by_key(|c| c.stamp);
        changes
    }
}

#[derive(Debug, Default)]
struct Inner {
    folders: HashMap<String, Folder>,
    modseq: u64,
    next_id: u64,
    waste_baskets: HashMap<CollectionClass, String>,
    failures: HashMap<String, BackendError>,
    add_failure: Option<(usize, BackendError)>,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.modseq += 1;
        self.modseq
    }

    fn folder(&self, id: &str) -> BackendResult<&Folder> {
        if let Some(error) = self.failures.get(id) {
            return Err(error.clone());
        }
        self.folders
            .get(id)
            .ok_or_else(|| BackendError::FolderGone(id.to_string()))
    }

    fn folder_mut(&mut self, id: &str) -> BackendResult<&mut Folder> {
        if let Some(error) = self.failures.get(id) {
            return Err(error.clone());
        }
        self.folders
            .get_mut(id)
            .ok_or_else(|| BackendError::FolderGone(id.to_string()))
    }

    fn insert(&mut self, folder: &str, data: ApplicationData, age_days: u32) -> BackendResult<ItemStamp> {
        self.folder(folder)?;
        self.next_id += 1;
        let server_id = format!("{folder}:{}", self.next_id);
        let stamp = self.tick();
        self.folder_mut(folder)?.items.insert(
            server_id.clone(),
            Item {
                data,
                created: stamp,
                stamp,
                age_days,
                last: ChangeKind::Add,
            },
        );
        Ok(ItemStamp { server_id, stamp })
    }

    fn touch(
        &mut self,
        folder: &str,
        server_id: &str,
        kind: ChangeKind,
        update: impl FnOnce(&mut Item),
    ) -> BackendResult<u64> {
        self.folder(folder)?
            .items
            .get(server_id)
            .ok_or_else(|| BackendError::NotFound(server_id.to_string()))?;
        let stamp = self.tick();
        let item = self
            .folder_mut(folder)?
            .items
            .get_mut(server_id)
            .ok_or_else(|| BackendError::NotFound(server_id.to_string()))?;
        update(item);
        item.stamp = stamp;
        item.last = kind;
        Ok(stamp)
    }

    fn remove(&mut self, folder: &str, server_id: &str) -> BackendResult<Option<(Item, u64)>> {
        if !self.folder(folder)?.items.contains_key(server_id) {
            return Ok(None);
        }
        let stamp = self.tick();
        let folder = self.folder_mut(folder)?;
        let Some(item) = folder.items.remove(server_id) else {
            return Ok(None);
        };
        folder.tombstones.push(Tombstone {
            server_id: server_id.to_string(),
            created: item.created,
            stamp,
        });
        Ok(Some((item, stamp)))
    }
}

/// A [`SyncBackend`] keeping folders in memory.
///
/// Every write draws a stamp from one modification sequence. Items carry
/// an age in days that filter types are checked against, and folders can
/// be set to fail for exercising error paths.
///
/// # Example
///
/// ```rust
/// use airsync_codec::tags::email;
/// use airsync_engine::{MemoryBackend, SyncBackend};
/// use airsync_protocol::{ApplicationData, CollectionClass, FilterType};
///
/// let backend = MemoryBackend::new();
/// backend.add_folder("inbox", CollectionClass::Email);
/// backend
///     .insert("inbox", ApplicationData::new(CollectionClass::Email).with_text(email::SUBJECT, "Hi"))
///     .unwrap();
/// assert_eq!(backend.change_count("inbox", 0, FilterType::ALL).unwrap(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a folder.
    pub fn add_folder(&self, id: impl Into<String>, class: CollectionClass) {
        self.inner.write().folders.insert(
            id.into(),
            Folder {
                class,
                items: BTreeMap::new(),
                tombstones: Vec::new(),
            },
        );
    }

    /// Deletes a folder and everything in it.
    pub fn remove_folder(&self, id: &str) {
        self.inner.write().folders.remove(id);
    }

    /// Sets the folder deleted items of `class` are moved to.
    pub fn set_waste_basket(&self, class: CollectionClass, folder: impl Into<String>) {
        self.inner.write().waste_baskets.insert(class, folder.into());
    }

    /// Makes every access to a folder fail with `error`.
    pub fn fail_folder(&self, id: impl Into<String>, error: BackendError) {
        self.inner.write().failures.insert(id.into(), error);
    }

    /// Lets a failing folder succeed again.
    pub fn clear_failure(&self, id: &str) {
        self.inner.write().failures.remove(id);
    }

    /// Lets `successes` more device adds through, then fails every add
    /// with `error`.
    pub fn fail_adds_after(&self, successes: usize, error: BackendError) {
        self.inner.write().add_failure = Some((successes, error));
    }

    /// Lets device adds succeed again.
    pub fn clear_add_failure(&self) {
        self.inner.write().add_failure = None;
    }

    /// Creates an item on the server side.
    pub fn insert(&self, folder: &str, data: ApplicationData) -> BackendResult<String> {
        self.insert_aged(folder, data, 0)
    }

    /// Creates an item that is `age_days` old.
    pub fn insert_aged(
        &self,
        folder: &str,
        data: ApplicationData,
        age_days: u32,
    ) -> BackendResult<String> {
        let created = self.inner.write().insert(folder, data, age_days)?;
        Ok(created.server_id)
    }

    /// Replaces an item on the server side.
    pub fn update(&self, folder: &str, server_id: &str, data: ApplicationData) -> BackendResult<u64> {
        self.inner
            .write()
            .touch(folder, server_id, ChangeKind::Change, |item| item.data = data)
    }

    /// Changes a flag property only.
    pub fn set_flag(
        &self,
        folder: &str,
        server_id: &str,
        tag: Tag,
        value: impl Into<String>,
    ) -> BackendResult<u64> {
        let value = PropertyValue::Text(value.into());
        self.inner
            .write()
            .touch(folder, server_id, ChangeKind::Flags, |item| {
                item.data.set(tag, value)
            })
    }

    /// Sets the age of an item.
    pub fn set_age(&self, folder: &str, server_id: &str, age_days: u32) -> BackendResult<u64> {
        self.inner
            .write()
            .touch(folder, server_id, ChangeKind::Change, |item| {
                item.age_days = age_days
            })
    }

    /// Deletes an item on the server side.
    pub fn remove(&self, folder: &str, server_id: &str) -> BackendResult<u64> {
        self.inner
            .write()
            .remove(folder, server_id)?
            .map(|(_, stamp)| stamp)
            .ok_or_else(|| BackendError::NotFound(server_id.to_string()))
    }

    /// Returns an item.
    pub fn item(&self, folder: &str, server_id: &str) -> Option<ApplicationData> {
        let inner = self.inner.read();
        inner
            .folders
            .get(folder)?
            .items
            .get(server_id)
            .map(|item| item.data.clone())
    }

    /// Returns the ids of a folder's items.
    pub fn item_ids(&self, folder: &str) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .folders
            .get(folder)
            .map(|f| f.items.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the current modification sequence.
    pub fn stamp(&self) -> u64 {
        self.inner.read().modseq
    }
}

impl SyncBackend for MemoryBackend {
    fn collection_class(&self, collection_id: &str) -> BackendResult<CollectionClass> {
        Ok(self.inner.read().folder(collection_id)?.class)
    }

    fn add_item(&self, collection_id: &str, data: &ApplicationData) -> BackendResult<ItemStamp> {
        let mut inner = self.inner.write();
        if data.properties.is_empty() {
            return Err(BackendError::Rejected("item has no content".into()));
        }
        if let Some((successes, error)) = &mut inner.add_failure {
            if *successes == 0 {
                return Err(error.clone());
            }
            *successes -= 1;
        }
        let created = inner.insert(collection_id, data.clone(), 0)?;
        debug!(collection = collection_id, server_id = %created.server_id, "device add stored");
        Ok(created)
    }

    fn modify_item(
        &self,
        collection_id: &str,
        server_id: &str,
        data: &ApplicationData,
        options: &ModifyOptions<'_>,
    ) -> BackendResult<ModifyOutcome> {
        let mut inner = self.inner.write();
        let current = inner
            .folder(collection_id)?
            .items
            .get(server_id)
            .ok_or_else(|| BackendError::NotFound(server_id.to_string()))?;
        if options.conflict == ConflictPolicy::OverwriteClient && current.stamp > options.baseline
        {
            return Err(BackendError::Conflict(server_id.to_string()));
        }
        if let Some(instance_id) = options.instance_id {
            let exception = data.properties.clone();
            let stamp = inner.touch(collection_id, server_id, ChangeKind::Change, |item| {
                item.set_exception(instance_id, exception)
            })?;
            debug!(collection = collection_id, server_id, instance_id, "occurrence modified");
            return Ok(ModifyOutcome {
                stamp,
                server_modified: false,
            });
        }
        let merged = current.data.apply_change(data, options.supported);
        let server_modified = merged.properties != data.properties;
        let stamp = inner.touch(collection_id, server_id, ChangeKind::Change, |item| {
            item.data = merged
        })?;
        Ok(ModifyOutcome {
            stamp,
            server_modified,
        })
    }

    fn delete_items(
        &self,
        collection_id: &str,
        server_ids: &[String],
    ) -> BackendResult<RemoveOutcome> {
        let mut inner = self.inner.write();
        let mut outcome = RemoveOutcome::default();
        for server_id in server_ids {
            match inner.remove(collection_id, server_id)? {
                Some((_, stamp)) => outcome.removed.push(ItemStamp {
                    server_id: server_id.clone(),
                    stamp,
                }),
                None => outcome.missing.push(server_id.clone()),
            }
        }
        Ok(outcome)
    }

    fn move_items(
        &self,
        collection_id: &str,
        server_ids: &[String],
        destination: &str,
    ) -> BackendResult<RemoveOutcome> {
        let mut inner = self.inner.write();
        if !inner.folders.contains_key(destination) {
            return Err(BackendError::Rejected(format!(
                "destination {destination} does not exist"
            )));
        }
        let mut outcome = RemoveOutcome::default();
        for server_id in server_ids {
            match inner.remove(collection_id, server_id)? {
                Some((item, stamp)) => {
                    inner.insert(destination, item.data, item.age_days)?;
                    outcome.removed.push(ItemStamp {
                        server_id: server_id.clone(),
                        stamp,
                    });
                }
                None => outcome.missing.push(server_id.clone()),
            }
        }
        Ok(outcome)
    }

    fn delete_instance(
        &self,
        collection_id: &str,
        server_id: &str,
        instance_id: &str,
    ) -> BackendResult<u64> {
        let deleted = vec![Property::text(calendar::DELETED, "1")];
        self.inner
            .write()
            .touch(collection_id, server_id, ChangeKind::Change, |item| {
                item.set_exception(instance_id, deleted)
            })
    }

    fn waste_basket(&self, class: CollectionClass) -> Option<String> {
        self.inner.read().waste_baskets.get(&class).cloned()
    }

    fn fetch_item(&self, collection_id: &str, server_id: &str) -> BackendResult<ApplicationData> {
        self.inner
            .read()
            .folder(collection_id)?
            .items
            .get(server_id)
            .map(|item| item.data.clone())
            .ok_or_else(|| BackendError::NotFound(server_id.to_string()))
    }

    fn change_count(
        &self,
        collection_id: &str,
        baseline: u64,
        filter: FilterType,
    ) -> BackendResult<usize> {
        Ok(self
            .inner
            .read()
            .folder(collection_id)?
            .changes_since(baseline, filter)
            .len())
    }

    fn changes_since(
        &self,
        collection_id: &str,
        baseline: u64,
        filter: FilterType,
    ) -> BackendResult<ChangeSet> {
        let inner = self.inner.read();
        let changes = inner.folder(collection_id)?.changes_since(baseline, filter);
        Ok(ChangeSet::new(changes, inner.modseq))
    }
}
