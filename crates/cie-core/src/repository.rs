//! 持久化抽象
//!
//! 引擎的所有组件都通过 [`Repository`] 访问实体，内存实现基于 `DashMap`，
//! 更新操作在分片写锁内完成，保证同一实体键上的读-改-写是原子的。

use crate::error::{IntegrationError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// 可持久化实体
pub trait Entity: Clone + Send + Sync + 'static {
    /// 实体类别名称，用于错误信息
    const KIND: &'static str;

    fn id(&self) -> &str;
}

/// 实体补丁：在原子更新中应用于实体副本，返回错误时放弃本次修改
pub type Patch<T> = Box<dyn FnOnce(&mut T) -> Result<()> + Send>;

/// 持久化接口
///
/// 数据库实现可以替换内存实现，只要保证 `update` 对同一实体是原子的。
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<T>>;

    async fn list(&self, predicate: &(dyn for<'p> Fn(&'p T) -> bool + Send + Sync)) -> Result<Vec<T>>;

    /// 插入新实体，ID已存在时失败
    async fn create(&self, entity: T) -> Result<T>;

    /// 原子地应用补丁并返回更新后的实体
    async fn update(&self, id: &str, patch: Patch<T>) -> Result<T>;

    /// 硬删除并返回被删除的实体
    async fn delete(&self, id: &str) -> Result<T>;

    /// 获取实体，不存在时返回 `NotFound`
    async fn require(&self, id: &str) -> Result<T> {
        self.get(id)
            .await?
            .ok_or_else(|| IntegrationError::not_found(T::KIND, id))
    }
}

/// 基于DashMap的内存实现
#[derive(Debug)]
pub struct InMemoryRepository<T: Entity> {
    data: DashMap<String, T>,
}

impl<T: Entity> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl<T: Entity> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for InMemoryRepository<T> {
    async fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.data.get(id).map(|entry| entry.value().clone()))
    }

    async fn list(&self, predicate: &(dyn for<'p> Fn(&'p T) -> bool + Send + Sync)) -> Result<Vec<T>> {
        Ok(self
            .data
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn create(&self, entity: T) -> Result<T> {
        match self.data.entry(entity.id().to_string()) {
            Entry::Occupied(_) => Err(IntegrationError::BadRequest(format!(
                "{} already exists: {}",
                T::KIND,
                entity.id()
            ))),
            Entry::Vacant(slot) => {
                debug!("Created {} {}", T::KIND, entity.id());
                slot.insert(entity.clone());
                Ok(entity)
            }
        }
    }

    async fn update(&self, id: &str, patch: Patch<T>) -> Result<T> {
        let mut entry = self
            .data
            .get_mut(id)
            .ok_or_else(|| IntegrationError::not_found(T::KIND, id))?;

        let mut candidate = entry.value().clone();
        patch(&mut candidate)?;
        *entry.value_mut() = candidate.clone();
        Ok(candidate)
    }

    async fn delete(&self, id: &str) -> Result<T> {
        self.data
            .remove(id)
            .map(|(_, entity)| entity)
            .ok_or_else(|| IntegrationError::not_found(T::KIND, id))
    }
}
