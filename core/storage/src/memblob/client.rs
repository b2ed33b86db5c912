//! In-process object service and its native request/response shapes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use cloudblob_common::{BlobKey, Error, Result};

use crate::driver::ListObject;

/// Upload request, mutable from `before_write` hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutObjectInput {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub content_language: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Response to a head request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadObjectOutput {
    pub content_type: String,
    pub content_language: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: HashMap<String, String>,
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
    pub e_tag: String,
}

/// Response to a get request. The body is streamed separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetObjectOutput {
    pub content_type: String,
    pub content_language: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Length of the returned range.
    pub content_length: u64,
    /// `bytes start-end/total` for ranged requests; `None` when the range is
    /// empty or covers the whole object.
    pub content_range: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub e_tag: String,
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    head: HeadObjectOutput,
}

type Objects = BTreeMap<String, StoredObject>;

/// Handle on an in-process object service holding named buckets.
///
/// Clones share state. This is the value memblob exposes through
/// [`crate::Bucket::as_native`].
#[derive(Debug, Clone)]
pub struct MemClient {
    region: String,
    buckets: Arc<RwLock<HashMap<String, Objects>>>,
}

impl MemClient {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Objects>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Objects>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// # Postconditions
    /// - The bucket exists and holds no objects
    ///
    /// # Errors
    /// - `AlreadyExists` if the bucket exists
    pub fn create_bucket(&self, name: &str) -> Result<()> {
        let mut buckets = self.write();
        if buckets.contains_key(name) {
            return Err(Error::AlreadyExists(format!("Bucket already exists: {}", name)));
        }
        buckets.insert(name.to_string(), Objects::new());
        Ok(())
    }

    /// # Errors
    /// - `NotFound` if the bucket does not exist
    /// - `PreconditionFailed` if it still holds objects
    pub fn delete_bucket(&self, name: &str) -> Result<()> {
        let mut buckets = self.write();
        match buckets.get(name) {
            None => Err(Error::NotFound(format!("Bucket not found: {}", name))),
            Some(objects) if !objects.is_empty() => Err(Error::PreconditionFailed(format!(
                "Bucket not empty: {}",
                name
            ))),
            Some(_) => {
                buckets.remove(name);
                Ok(())
            }
        }
    }

    pub fn has_bucket(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Store `body` as described by `input`.
    ///
    /// # Errors
    /// - `NotFound` if the bucket does not exist
    /// - `PreconditionFailed` if `if_match` is set and does not equal the
    ///   current ETag (or the object does not exist)
    pub fn put_object(
        &self,
        input: &PutObjectInput,
        body: Bytes,
        if_match: Option<&str>,
    ) -> Result<HeadObjectOutput> {
        let mut buckets = self.write();
        let objects = buckets
            .get_mut(&input.bucket)
            .ok_or_else(|| Error::NotFound(format!("Bucket not found: {}", input.bucket)))?;

        if let Some(expected) = if_match {
            let current = objects.get(&input.key).map(|o| o.head.e_tag.as_str());
            if current != Some(expected) {
                return Err(Error::PreconditionFailed(format!(
                    "ETag mismatch for {}: expected {}, found {}",
                    input.key,
                    expected,
                    current.unwrap_or("<absent>")
                )));
            }
        }

        let head = HeadObjectOutput {
            content_type: input.content_type.clone(),
            content_language: input.content_language.clone(),
            cache_control: input.cache_control.clone(),
            metadata: input.metadata.clone(),
            content_length: body.len() as u64,
            last_modified: Utc::now(),
            e_tag: Uuid::new_v4().simple().to_string(),
        };
        objects.insert(
            input.key.clone(),
            StoredObject {
                body,
                head: head.clone(),
            },
        );
        Ok(head)
    }

    /// # Errors
    /// - `NotFound` if the bucket or key does not exist
    pub fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectOutput> {
        let buckets = self.read();
        let object = Self::lookup(&buckets, bucket, key)?;
        Ok(object.head.clone())
    }

    /// Fetch `length` bytes from `offset`, clamped to the object end.
    ///
    /// # Errors
    /// - `NotFound` if the bucket or key does not exist
    /// - `InvalidRange` if `offset` is past the end of the object
    pub fn get_object(
        &self,
        bucket: &str,
        key: &str,
        offset: u64,
        length: Option<u64>,
    ) -> Result<(GetObjectOutput, Bytes, u64)> {
        let buckets = self.read();
        let object = Self::lookup(&buckets, bucket, key)?;
        let size = object.body.len() as u64;
        if offset > size {
            return Err(Error::InvalidRange(format!(
                "offset {} beyond size {} of {}",
                offset, size, key
            )));
        }
        let end = match length {
            Some(len) => offset.saturating_add(len).min(size),
            None => size,
        };
        let body = object.body.slice(offset as usize..end as usize);
        let ranged = (offset > 0 || end < size) && end > offset;
        let head = &object.head;
        let output = GetObjectOutput {
            content_type: head.content_type.clone(),
            content_language: head.content_language.clone(),
            cache_control: head.cache_control.clone(),
            metadata: head.metadata.clone(),
            content_length: end - offset,
            content_range: ranged.then(|| {
                format!("bytes {}-{}/{}", offset, end.saturating_sub(1), size)
            }),
            last_modified: head.last_modified,
            e_tag: head.e_tag.clone(),
        };
        Ok((output, body, size))
    }

    /// # Errors
    /// - `NotFound` if the bucket or key does not exist
    pub fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.write();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::NotFound(format!("Bucket not found: {}", bucket)))?;
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))
    }

    /// List up to `max_keys` objects under `prefix` whose key sorts after
    /// `start_after`. The second value is the last returned key when more
    /// objects remain.
    pub fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
        max_keys: usize,
    ) -> Result<(Vec<ListObject>, Option<String>)> {
        let buckets = self.read();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| Error::NotFound(format!("Bucket not found: {}", bucket)))?;

        let lower = match start_after {
            Some(token) if token >= prefix => Bound::Excluded(token.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };
        let mut matching = objects
            .range::<String, _>((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix));

        let mut page = Vec::new();
        for (key, object) in matching.by_ref().take(max_keys) {
            page.push(ListObject {
                key: BlobKey::parse(key.as_str())?,
                size: object.head.content_length,
                modified: object.head.last_modified,
            });
        }
        let more = matching.next().is_some();
        let next = if more {
            page.last().map(|o| o.key.to_string())
        } else {
            None
        };
        Ok((page, next))
    }

    fn lookup<'a>(
        buckets: &'a HashMap<String, Objects>,
        bucket: &str,
        key: &str,
    ) -> Result<&'a StoredObject> {
        buckets
            .get(bucket)
            .ok_or_else(|| Error::NotFound(format!("Bucket not found: {}", bucket)))?
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))
    }
}

impl Default for MemClient {
    fn default() -> Self {
        Self::new("local")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(client: &MemClient, key: &str, body: &'static [u8]) -> HeadObjectOutput {
        let input = PutObjectInput {
            bucket: "b".to_string(),
            key: key.to_string(),
            content_type: "text/plain".to_string(),
            ..Default::default()
        };
        client.put_object(&input, Bytes::from_static(body), None).unwrap()
    }

    fn client() -> MemClient {
        let client = MemClient::new("us-east-2");
        client.create_bucket("b").unwrap();
        client
    }

    #[test]
    fn test_bucket_management() {
        let client = client();
        assert!(client.create_bucket("b").is_err());
        assert_eq!(client.bucket_names(), vec!["b".to_string()]);

        put(&client, "k", b"1");
        assert!(client.delete_bucket("b").is_err());
        client.delete_object("b", "k").unwrap();
        client.delete_bucket("b").unwrap();
        assert!(!client.has_bucket("b"));
        assert!(client.delete_bucket("b").unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_object_ranges() {
        let client = client();
        put(&client, "k", b"0123456789");

        let (out, body, size) = client.get_object("b", "k", 2, Some(3)).unwrap();
        assert_eq!(&body[..], b"234");
        assert_eq!(size, 10);
        assert_eq!(out.content_range.as_deref(), Some("bytes 2-4/10"));

        let (_, body, _) = client.get_object("b", "k", 8, Some(100)).unwrap();
        assert_eq!(&body[..], b"89");

        let (out, body, _) = client.get_object("b", "k", 10, None).unwrap();
        assert!(body.is_empty());
        assert_eq!(out.content_length, 0);
        assert_eq!(out.content_range, None);

        let (out, body, _) = client.get_object("b", "k", 5, Some(0)).unwrap();
        assert!(body.is_empty());
        assert_eq!(out.content_range, None);

        let (out, _, _) = client.get_object("b", "k", 0, None).unwrap();
        assert_eq!(out.content_range, None);

        let err = client.get_object("b", "k", 11, None).unwrap_err();
        assert!(matches!(err, Error::InvalidRange(_)));
    }

    #[test]
    fn test_put_if_match() {
        let client = client();
        let head = put(&client, "k", b"v1");
        let input = PutObjectInput {
            bucket: "b".to_string(),
            key: "k".to_string(),
            ..Default::default()
        };

        let err = client
            .put_object(&input, Bytes::from_static(b"v2"), Some("stale"))
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));

        client
            .put_object(&input, Bytes::from_static(b"v2"), Some(&head.e_tag))
            .unwrap();
        let (_, body, _) = client.get_object("b", "k", 0, None).unwrap();
        assert_eq!(&body[..], b"v2");
    }

    #[test]
    fn test_list_objects_pages() {
        let client = client();
        for key in ["a/1", "a/2", "a/3", "b/1"] {
            put(&client, key, b"x");
        }

        let (page, next) = client.list_objects("b", "a/", None, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(next.as_deref(), Some("a/2"));

        let (page, next) = client.list_objects("b", "a/", next.as_deref(), 2).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key.as_str(), "a/3");
        assert!(next.is_none());
    }
}
