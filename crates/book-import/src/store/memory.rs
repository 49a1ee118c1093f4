use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{join_url, validate_key, ObjectStore, StoreError};

/// In-process object store. With the `test-util` feature it also supports
/// injected failures and latency so retry and timeout paths can be driven
/// deterministically.
pub struct MemoryObjectStore {
    public_base_url: String,
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    failing_puts: AtomicU32,
    stalling_puts: AtomicU32,
    put_delay: Mutex<Option<Duration>>,
    get_delay: Mutex<Option<Duration>>,
    delete_delay: Mutex<Option<Duration>>,
    put_calls: AtomicU32,
}

impl MemoryObjectStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
            objects: Mutex::new(HashMap::new()),
            failing_puts: AtomicU32::new(0),
            stalling_puts: AtomicU32::new(0),
            put_delay: Mutex::new(None),
            get_delay: Mutex::new(None),
            delete_delay: Mutex::new(None),
            put_calls: AtomicU32::new(0),
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn mime_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).map(|(_, mime)| mime.clone()))
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn pause(delay: &Mutex<Option<Duration>>) {
        let delay = delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
impl MemoryObjectStore {
    /// The next `n` puts fail with [`StoreError::Unavailable`].
    pub fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// The next `n` puts create an empty object under the key and then never
    /// finish, like a write cut off between create and flush.
    pub fn stall_next_puts_after_create(&self, n: u32) {
        self.stalling_puts.store(n, Ordering::SeqCst);
    }

    /// Every put sleeps for `delay` before completing.
    pub fn set_put_delay(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.put_delay.lock() {
            *guard = delay;
        }
    }

    pub fn set_get_delay(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.get_delay.lock() {
            *guard = delay;
        }
    }

    pub fn set_delete_delay(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.delete_delay.lock() {
            *guard = delay;
        }
    }

    pub fn put_calls(&self) -> u32 {
        self.put_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], mime_type: &str) -> Result<String, StoreError> {
        validate_key(key)?;
        self.put_calls.fetch_add(1, Ordering::SeqCst);

        Self::pause(&self.put_delay).await;

        if Self::take_one(&self.failing_puts) {
            return Err(StoreError::Unavailable("injected put failure".to_string()));
        }

        {
            let mut objects = self.objects.lock().map_err(|_| Self::poisoned())?;
            if objects.contains_key(key) {
                return Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                });
            }
            if Self::take_one(&self.stalling_puts) {
                objects.insert(key.to_string(), (Vec::new(), mime_type.to_string()));
            } else {
                objects.insert(key.to_string(), (bytes.to_vec(), mime_type.to_string()));
                return Ok(self.url_for(key));
            }
        }
        std::future::pending::<()>().await;
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        Self::pause(&self.get_delay).await;
        let objects = self.objects.lock().map_err(|_| Self::poisoned())?;
        objects
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        Self::pause(&self.delete_delay).await;
        let mut objects = self.objects.lock().map_err(|_| Self::poisoned())?;
        objects.remove(key);
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        join_url(&self.public_base_url, key)
    }
}
