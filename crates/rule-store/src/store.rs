//! 规则存储门面
//!
//! 由应用组合根显式构造并持有的存储引擎：拥有连接池，组合批量装载、
//! 规则仓储与导出操作。不提供进程级单例，需要它的组件以引用获得。

use sqlx::PgPool;
use tracing::instrument;

use miner_shared::config::DatabaseConfig;
use miner_shared::database::Database;
use miner_shared::error::Result;

use crate::export;
use crate::loader::{self, ConflictPolicy};
use crate::models::{Rule, RuleWithId};
use crate::repository::RuleRepository;

/// 按目标值查询时的默认分页窗口
pub const DEFAULT_PAGE_SIZE: i64 = 500;

/// 规则存储引擎
pub struct RuleStore {
    db: Database,
    repository: RuleRepository,
}

impl RuleStore {
    /// 连接数据库并构造存储引擎
    ///
    /// 连接参数缺失立即失败，见 [`Database::connect`]。
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let db = Database::connect(config).await?;
        Ok(Self::new(db))
    }

    /// 从既有连接构造
    pub fn new(db: Database) -> Self {
        let repository = RuleRepository::new(db.pool().clone());
        Self { db, repository }
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    /// 从 CSV 缓冲批量装载数据到目标表
    ///
    /// 返回 `Ok(false)` 表示缓冲没有可用行、存储未被触碰。
    pub async fn bulk_load(
        &self,
        buffer: &[u8],
        table: &str,
        policy: ConflictPolicy,
    ) -> Result<bool> {
        loader::copy_from_buffer(self.db.pool(), buffer, table, policy).await
    }

    /// 批量持久化规则
    pub async fn persist(&self, rules: &[Rule]) -> Result<()> {
        self.repository.persist(rules).await
    }

    /// 按目标值查询规则（默认窗口：offset 0 / limit 500）
    pub async fn rules_by_target(&self, target_value: i64) -> Result<Vec<RuleWithId>> {
        self.rules_by_target_page(target_value, 0, DEFAULT_PAGE_SIZE)
            .await
    }

    /// 按目标值分页查询规则
    ///
    /// 调用方以递增 offset 翻页，直到一页返回的数量少于 limit。
    pub async fn rules_by_target_page(
        &self,
        target_value: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<RuleWithId>> {
        self.repository
            .fetch_by_target(target_value, offset, limit)
            .await
    }

    /// 存量规则数不超过 max_rules 的目标值
    pub async fn sparse_targets(&self, max_rules: i64) -> Result<Vec<i64>> {
        self.repository.sparse_targets(max_rules).await
    }

    /// 导出用户档案为 CSV 缓冲
    pub async fn export_user_profiles(&self) -> Result<Vec<u8>> {
        export::export_user_profiles(self.db.pool()).await
    }

    /// 健康检查
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        self.db.health_check().await
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.db.close().await;
    }
}
