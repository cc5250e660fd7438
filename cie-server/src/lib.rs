//! # CIE服务器
//!
//! 通过REST API暴露集成引擎的全部操作。

pub mod api;
pub mod error;
pub mod state;

pub use api::create_app;
pub use error::ApiError;
pub use state::AppState;
