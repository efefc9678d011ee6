//! CSV 导出
//!
//! 把 user_details 表的选定列导出为 CSV 缓冲，附带派生的主页 URL，
//! 供下游采集器消费。

use sqlx::PgPool;
use tracing::{info, instrument};

use miner_shared::error::{MinerError, Result};

/// 用户主页 URL 前缀
const PROFILE_URL_BASE: &str = "https://myanimelist.net/profile";

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    mal_id: i64,
    username: String,
}

fn profile_url(username: &str) -> String {
    format!("{}/{}", PROFILE_URL_BASE, username)
}

fn write_profile_csv(rows: &[UserRow]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["mal_id", "username", "user_url"])?;

    for row in rows {
        writer.write_record([
            row.mal_id.to_string(),
            row.username.clone(),
            profile_url(&row.username),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| MinerError::Internal(format!("CSV 缓冲写出失败: {}", e)))
}

/// 导出用户档案为 CSV 缓冲
///
/// 列固定为 mal_id、username 和派生出的 user_url。
#[instrument(skip(pool))]
pub async fn export_user_profiles(pool: &PgPool) -> Result<Vec<u8>> {
    let rows: Vec<UserRow> =
        sqlx::query_as("SELECT mal_id, username FROM user_details ORDER BY mal_id")
            .fetch_all(pool)
            .await?;

    info!("导出 {} 个用户档案", rows.len());
    write_profile_csv(&rows)
}
