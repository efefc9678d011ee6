//! 规则仓储层
//!
//! 负责规则在规范化结构（rules 头表 + rule_conditions 条件表）上的
//! 写入与重建。写入在单事务内完成两次批量插入；读取用一条 LEFT JOIN
//! 查询按 rule_id 重组条件块，窗口化参数支持分页。

use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use miner_shared::error::Result;

use crate::models::{Condition, ConditionValue, Rule, RuleWithId};

/// 用户域条件的 table_name 标签
pub const USER_CONDITIONS_TABLE: &str = "user_details";

/// 动画域条件的 table_name 标签
pub const OTHER_CONDITIONS_TABLE: &str = "anime_dataset";

/// rules LEFT JOIN rule_conditions 的一行
///
/// 条件列允许全空：规则头可以没有任何条件行。
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct RuleConditionRow {
    pub rule_id: Uuid,
    pub target_value: i64,
    pub table_name: Option<String>,
    pub column_name: Option<String>,
    pub operator: Option<String>,
    pub value_text: Option<String>,
    pub value_numeric: Option<f64>,
}

/// 规则仓储
///
/// 封装规则持久化与按目标值查询的全部数据库操作。
pub struct RuleRepository {
    pool: PgPool,
}

impl RuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 批量持久化规则
    ///
    /// 每条规则现场铸造 rule_id，每个条件铸造 condition_id。头行与
    /// 条件行作为两条批量插入在同一事务内提交，任一失败整体回滚并
    /// 上抛，不存在半条规则落库的状态。
    #[instrument(skip(self, rules), fields(count = rules.len()))]
    pub async fn persist(&self, rules: &[Rule]) -> Result<()> {
        if rules.is_empty() {
            return Ok(());
        }

        let mut headers: Vec<(Uuid, i64)> = Vec::with_capacity(rules.len());
        let mut conditions: Vec<(Uuid, Uuid, &'static str, &Condition)> = Vec::new();

        for rule in rules {
            let rule_id = Uuid::new_v4();
            headers.push((rule_id, rule.target));

            for cond in &rule.user_conditions {
                conditions.push((Uuid::new_v4(), rule_id, USER_CONDITIONS_TABLE, cond));
            }
            for cond in &rule.other_conditions {
                conditions.push((Uuid::new_v4(), rule_id, OTHER_CONDITIONS_TABLE, cond));
            }
        }

        let mut tx = self.pool.begin().await?;

        let mut insert_rules: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO rules (rule_id, target_value) ");
        insert_rules.push_values(headers.iter(), |mut b, (rule_id, target)| {
            b.push_bind(*rule_id).push_bind(*target);
        });
        insert_rules.build().execute(&mut *tx).await?;

        if !conditions.is_empty() {
            let mut insert_conditions: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO rule_conditions \
                 (condition_id, rule_id, table_name, column_name, operator, \
                  value_text, value_numeric) ",
            );
            insert_conditions.push_values(
                conditions.iter(),
                |mut b, (condition_id, rule_id, table_name, cond)| {
                    let (value_text, value_numeric) = match &cond.value {
                        ConditionValue::Numeric(n) => (None, Some(*n)),
                        ConditionValue::Text(s) => (Some(s.clone()), None),
                    };
                    b.push_bind(*condition_id)
                        .push_bind(*rule_id)
                        .push_bind(*table_name)
                        .push_bind(cond.column.clone())
                        .push_bind(cond.operator.clone())
                        .push_bind(value_text)
                        .push_bind(value_numeric);
                },
            );
            insert_conditions.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;

        info!("已保存 {} 条规则，共 {} 个条件", rules.len(), conditions.len());
        Ok(())
    }

    /// 按目标值分页查询规则
    ///
    /// OFFSET / LIMIT 作用于 JOIN 后的行集，一条多条件规则的行可能
    /// 被页边界切开；并发写入同一 target_value 时分页可能漏读或重
    /// 读，这是已接受的一致性缺口，调用方以"返回行数少于 limit"作
    /// 为翻页终止条件。
    #[instrument(skip(self))]
    pub async fn fetch_by_target(
        &self,
        target_value: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<RuleWithId>> {
        let rows: Vec<RuleConditionRow> = sqlx::query_as(
            r#"
            SELECT
                r.rule_id,
                r.target_value,
                rc.table_name,
                rc.column_name,
                rc.operator,
                rc.value_text,
                rc.value_numeric
            FROM rules r
            LEFT JOIN rule_conditions rc ON r.rule_id = rc.rule_id
            WHERE r.target_value = $1
            ORDER BY r.rule_id, rc.condition_id
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(target_value)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(group_condition_rows(rows))
    }

    /// 存量规则数不超过 max_rules 的目标值
    ///
    /// 供挖掘侧挑选尚未充分覆盖的目标。
    #[instrument(skip(self))]
    pub async fn sparse_targets(&self, max_rules: i64) -> Result<Vec<i64>> {
        let targets = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT target_value
            FROM rules
            GROUP BY target_value
            HAVING COUNT(*) <= $1
            ORDER BY target_value
            "#,
        )
        .bind(max_rules)
        .fetch_all(&self.pool)
        .await?;

        Ok(targets)
    }
}

/// 把 JOIN 行集按 rule_id 重组为规则对象
///
/// 分组顺序取行集中首次出现的顺序。条件按 table_name 标签拆回两个
/// 块，值优先取 value_numeric。条件行残缺（operator 缺失或两个值列
/// 全空）的规则整组跳过并记录告警，页内其余规则照常返回。
pub(crate) fn group_condition_rows(rows: Vec<RuleConditionRow>) -> Vec<RuleWithId> {
    struct Group {
        rule_id: Uuid,
        target: i64,
        user_conditions: Vec<Condition>,
        other_conditions: Vec<Condition>,
        malformed: bool,
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();

    for row in rows {
        let slot = *index.entry(row.rule_id).or_insert_with(|| {
            groups.push(Group {
                rule_id: row.rule_id,
                target: row.target_value,
                user_conditions: Vec::new(),
                other_conditions: Vec::new(),
                malformed: false,
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];

        // LEFT JOIN：没有条件行的规则头，条件列全为 NULL
        let Some(column) = row.column_name else {
            continue;
        };

        let value = match (row.value_numeric, row.value_text) {
            (Some(n), _) => ConditionValue::Numeric(n),
            (None, Some(s)) => ConditionValue::Text(s),
            (None, None) => {
                warn!(
                    rule_id = %row.rule_id,
                    column = %column,
                    "条件行缺少取值，跳过该规则"
                );
                group.malformed = true;
                continue;
            }
        };

        let Some(operator) = row.operator else {
            warn!(
                rule_id = %row.rule_id,
                column = %column,
                "条件行缺少 operator，跳过该规则"
            );
            group.malformed = true;
            continue;
        };

        let condition = Condition {
            column,
            operator,
            value,
        };

        if row.table_name.as_deref() == Some(USER_CONDITIONS_TABLE) {
            group.user_conditions.push(condition);
        } else {
            group.other_conditions.push(condition);
        }
    }

    groups
        .into_iter()
        .filter(|g| !g.malformed)
        .map(|g| RuleWithId {
            rule_id: g.rule_id,
            rule: Rule::new(g.user_conditions, g.other_conditions, g.target),
        })
        .collect()
}
