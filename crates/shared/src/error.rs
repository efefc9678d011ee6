//! 统一错误处理模块
//!
//! 定义系统中所有共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum MinerError {
    // ==================== 配置错误 ====================
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    #[error("无效的配置项: {field} - {message}")]
    InvalidConfig { field: String, message: String },

    // ==================== 数据库错误 ====================
    // 连接失败和查询失败统一走这一类，原始错误保留在内部
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== 输入数据错误 ====================
    #[error("CSV 解析失败: {0}")]
    Csv(#[from] csv::Error),

    #[error("数据重建失败: rule_id={rule_id} - {reason}")]
    Decode { rule_id: String, reason: String },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, MinerError>;

impl MinerError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Csv(_) => "CSV_ERROR",
            Self::Decode { .. } => "DECODE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 配置错误和完整性冲突不可重试；临时的连接类故障由上游自行决定重试策略。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => !Self::sqlx_is_integrity_violation(e),
            _ => false,
        }
    }

    /// 是否为数据库完整性约束冲突（SQLSTATE 23xxx）
    pub fn is_integrity_violation(&self) -> bool {
        match self {
            Self::Database(e) => Self::sqlx_is_integrity_violation(e),
            _ => false,
        }
    }

    fn sqlx_is_integrity_violation(e: &sqlx::Error) -> bool {
        match e {
            sqlx::Error::Database(db) => db
                .code()
                .map(|code| code.starts_with("23"))
                .unwrap_or(false),
            _ => false,
        }
    }
}
