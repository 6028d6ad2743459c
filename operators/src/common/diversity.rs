use lru::LruCache;
use std::{hash::Hash, num::NonZeroUsize, sync::Mutex};

/// 方案缓存的容量。
///
/// 一个层的归一化维度固定，方案种类只随数据类型变化，默认容量很小。
#[derive(Clone, Copy, Debug)]
pub struct SchemeCacheSize(pub usize);

impl Default for SchemeCacheSize {
    fn default() -> Self {
        Self(4)
    }
}

impl SchemeCacheSize {
    pub(crate) fn new_cache<K: Hash + Eq, V>(self) -> Mutex<LruCache<K, V>> {
        Mutex::new(LruCache::new(
            NonZeroUsize::new(self.0).unwrap_or(NonZeroUsize::MIN),
        ))
    }
}
