//! 规则持久化引擎
//!
//! 提供分类规则的存储与去重能力，支持：
//! - 规则的规范化落库与分页重建
//! - 基于签名的相等 / 包含 / 特异性代数
//! - 表格数据的批量 upsert 装载
//! - 选定列的 CSV 导出

pub mod export;
pub mod loader;
pub mod models;
pub mod repository;
pub mod store;

pub use export::export_user_profiles;
pub use loader::{ConflictPolicy, ListParseError, copy_from_buffer, parse_list_literal};
pub use miner_shared::error::{MinerError, Result};
pub use models::{Condition, ConditionValue, Rule, RuleSignature, RuleWithId};
pub use repository::RuleRepository;
pub use store::RuleStore;
