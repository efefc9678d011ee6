//! 规则领域模型
//!
//! 规则由两个条件块（用户域 / 动画域）加一个目标值组成。相等性与哈希
//! 只看每个条件块的 (column, operator) 集合和目标值，不看比较值、顺序
//! 和重复项。这是挖掘侧刻意采用的去重口径，不是缺陷，实现必须保持。

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 条件比较值
///
/// 在构造时一次性确定数值 / 文本分支，落库时分别路由到
/// value_numeric / value_text 列。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Numeric(f64),
    Text(String),
}

impl From<f64> for ConditionValue {
    fn from(v: f64) -> Self {
        Self::Numeric(v)
    }
}

impl From<i64> for ConditionValue {
    fn from(v: i64) -> Self {
        Self::Numeric(v as f64)
    }
}

impl From<i32> for ConditionValue {
    fn from(v: i32) -> Self {
        Self::Numeric(v as f64)
    }
}

impl From<&str> for ConditionValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for ConditionValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// 原子条件
///
/// operator 是不透明的比较记号（"=="、">"、"in" 等），本层只存储和
/// 结构化比较，从不求值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub operator: String,
    pub value: ConditionValue,
}

impl Condition {
    pub fn new(
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<ConditionValue>,
    ) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    /// 条件的签名键：(column, operator)
    fn key(&self) -> (String, String) {
        (self.column.clone(), self.operator.clone())
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.operator, self.value)
    }
}

/// 规则签名
///
/// 每个条件块化为 (column, operator) 的集合，加上目标值。
/// 相等、哈希和包含判断都以它为准。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleSignature {
    pub user: BTreeSet<(String, String)>,
    pub other: BTreeSet<(String, String)>,
    pub target: i64,
}

/// 分类规则
///
/// `user_conditions` 作用于用户属性域，`other_conditions` 作用于
/// 动画属性域，两个域互不相交。规则落库后不再修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub user_conditions: Vec<Condition>,
    pub other_conditions: Vec<Condition>,
    pub target: i64,
}

impl Rule {
    pub fn new(
        user_conditions: Vec<Condition>,
        other_conditions: Vec<Condition>,
        target: i64,
    ) -> Self {
        Self {
            user_conditions,
            other_conditions,
            target,
        }
    }

    /// 规则签名：两个条件块的 (column, operator) 集合加目标值
    pub fn signature(&self) -> RuleSignature {
        RuleSignature {
            user: Self::key_set(&self.user_conditions),
            other: Self::key_set(&self.other_conditions),
            target: self.target,
        }
    }

    fn key_set(conditions: &[Condition]) -> BTreeSet<(String, String)> {
        conditions.iter().map(Condition::key).collect()
    }

    /// 原始条件总数
    ///
    /// 按两个序列的长度求和，重复的 (column, operator) 也计入。
    /// 与签名的集合口径刻意不同，特异性比较依赖这一差别。
    pub fn condition_count(&self) -> usize {
        self.user_conditions.len() + self.other_conditions.len()
    }

    /// 本规则是否为另一条规则的子集
    ///
    /// 目标值不同直接为 false；否则要求两个块的签名分别被包含。
    pub fn is_subset_of(&self, other: &Rule) -> bool {
        if self.target != other.target {
            return false;
        }
        let lhs = self.signature();
        let rhs = other.signature();
        lhs.user.is_subset(&rhs.user) && lhs.other.is_subset(&rhs.other)
    }

    /// 本规则是否比另一条规则更特异
    ///
    /// 子集关系成立且原始条件总数严格更多。计数按原始序列，
    /// 包含判断按集合，两者口径不同。
    pub fn is_more_specific_than(&self, other: &Rule) -> bool {
        if !self.is_subset_of(other) {
            return false;
        }
        self.condition_count() > other.condition_count()
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.signature() == other.signature()
    }
}

impl Eq for Rule {}

impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature().hash(state);
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IF ")?;
        let mut first = true;
        for cond in self.user_conditions.iter().chain(&self.other_conditions) {
            if !first {
                write!(f, " AND ")?;
            }
            write!(f, "{}", cond)?;
            first = false;
        }
        write!(f, " THEN target = {}", self.target)
    }
}

/// 已落库规则：存储侧 rule_id 与重建出的规则对象的配对
#[derive(Debug, Clone)]
pub struct RuleWithId {
    pub rule_id: Uuid,
    pub rule: Rule,
}
