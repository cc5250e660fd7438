//! # CIE Core
//!
//! 临床消息集成引擎的核心模块，提供基础数据结构、错误定义、持久化抽象和通用工具。

pub mod error;
pub mod models;
pub mod repository;
pub mod utils;

pub use error::{IntegrationError, Result};
pub use models::*;
pub use repository::{Entity, InMemoryRepository, Repository};
