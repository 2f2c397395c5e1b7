use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, AppResult};

use super::{ListPage, ObjectData, ObjectStore, StorageObject};

/// In-memory store with folder-style listing, paging and failure injection.
pub struct MemoryBackend {
    bucket: String,
    page_size: usize,
    objects: Mutex<BTreeMap<(String, String), (Vec<u8>, String)>>,
    failing_gets: Mutex<HashSet<String>>,
    failing_puts: Mutex<HashSet<String>>,
    puts: Mutex<Vec<String>>,
}

enum Entry {
    Object(StorageObject),
    Prefix(String),
}

impl Entry {
    fn name(&self) -> &str {
        match self {
            Entry::Object(o) => &o.key,
            Entry::Prefix(p) => p,
        }
    }
}

impl MemoryBackend {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            page_size: 1000,
            objects: Mutex::new(BTreeMap::new()),
            failing_gets: Mutex::new(HashSet::new()),
            failing_puts: Mutex::new(HashSet::new()),
            puts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn insert(&self, bucket: &str, key: &str, data: &[u8], content_type: &str) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            (data.to_vec(), content_type.to_string()),
        );
    }

    pub fn fail_get(&self, key: &str) {
        self.failing_gets.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_put(&self, key: &str) {
        self.failing_puts.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_gets.lock().unwrap().clear();
        self.failing_puts.lock().unwrap().clear();
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn data(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(d, _)| d.clone())
    }

    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(_, ct)| ct.clone())
    }

    /// Every key passed to `put`, in call order.
    pub fn put_log(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> AppResult<ListPage> {
        let objects = self.objects.lock().unwrap();

        let mut folders = BTreeSet::new();
        let mut entries = Vec::new();
        for ((b, key), (data, content_type)) in objects.iter() {
            if b != bucket || !key.starts_with(prefix) {
                continue;
            }
            let rest = &key[prefix.len()..];
            match rest.find('/') {
                Some(idx) => {
                    folders.insert(format!("{}{}", prefix, &rest[..=idx]));
                }
                None => entries.push(Entry::Object(StorageObject {
                    bucket: b.clone(),
                    key: key.clone(),
                    size_bytes: data.len() as u64,
                    content_type: Some(content_type.clone()),
                })),
            }
        }
        entries.extend(folders.into_iter().map(Entry::Prefix));
        entries.sort_by(|a, b| a.name().cmp(b.name()));

        let remaining: Vec<Entry> = entries
            .into_iter()
            .filter(|e| page_token.as_deref().map_or(true, |t| e.name() > t))
            .collect();
        let has_more = remaining.len() > self.page_size;

        let mut page = ListPage::default();
        for entry in remaining.into_iter().take(self.page_size) {
            if has_more {
                page.next_token = Some(entry.name().to_string());
            }
            match entry {
                Entry::Object(o) => page.objects.push(o),
                Entry::Prefix(p) => page.prefixes.push(p),
            }
        }
        Ok(page)
    }

    async fn get(&self, bucket: &str, key: &str) -> AppResult<ObjectData> {
        if self.failing_gets.lock().unwrap().contains(key) {
            return Err(AppError::NotFound(format!("{}/{}", bucket, key)));
        }
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(data, content_type)| ObjectData {
                bytes: data.clone(),
                content_type: Some(content_type.clone()),
            })
            .ok_or_else(|| AppError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8], content_type: &str) -> AppResult<()> {
        self.puts.lock().unwrap().push(key.to_string());
        if self.failing_puts.lock().unwrap().contains(key) {
            return Err(AppError::Transient(format!("simulated 503 for {}", key)));
        }
        self.insert(bucket, key, data, content_type);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> AppResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        super::public_url("https://storage.test", None, true, bucket, key)
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
