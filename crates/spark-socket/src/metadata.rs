use dashmap::DashMap;
use std::{any::Any, fmt, sync::Arc};

/// 连接级的临时公共数据，调用方可在其中挂载任意线程安全的值。
///
/// # 教案式注释
/// - **意图 (Why)**：为上层（鉴权、会话、路由）提供“跟随连接”的键值存储，避免额外维护
///   `连接 ID -> 数据` 的外部映射；
/// - **契约 (What)**：键为 `String`，值为 `Arc<dyn Any + Send + Sync>`，通过 [`Metadata::get`]
///   按具体类型取回；所有方法只需 `&self`，可以被多个线程同时调用；
/// - **风险 (Trade-offs)**：底层 `DashMap` 按分片加锁，持有 [`Metadata::get`] 返回的 `Arc`
///   不会阻塞写入，但类型不匹配时返回 `None` 而非报错。
#[derive(Default)]
pub struct Metadata {
    entries: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个值，返回被覆盖的旧值。
    pub fn insert<T>(&self, key: impl Into<String>, value: T) -> Option<Arc<dyn Any + Send + Sync>>
    where
        T: Any + Send + Sync,
    {
        self.entries.insert(key.into(), Arc::new(value))
    }

    /// 按类型读取一个值。
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.entries.get(key)?.value().clone();
        value.downcast::<T>().ok()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("len", &self.entries.len())
            .finish()
    }
}
