//! 表格数据批量装载
//!
//! 把带表头的 CSV 缓冲整体 upsert 进目标表。行数据以 jsonb 记录集
//! 形式一次性送入 PostgreSQL，由库本身的输入函数完成类型转换；
//! 冲突处理完全交给表上的约束和 ON CONFLICT 子句。

use miner_shared::error::Result;
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, instrument};

/// CSV 中表示 SQL NULL 的哨兵值
pub const NULL_SENTINEL: &str = "\\N";

/// 取值为列表字面量的列，装载时重编码为 PostgreSQL 数组字面量
const LIST_COLUMNS: [&str; 3] = ["genres", "keywords", "producers"];

/// 冲突处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// 冲突时用新行覆盖所有非键列（DO UPDATE）
    Update,
    /// 冲突时静默跳过该行（DO NOTHING）
    Skip,
}

/// 各表的冲突键列
///
/// 未登记的表没有冲突键，退化为普通插入。
fn conflict_columns(table: &str) -> &'static [&'static str] {
    match table {
        "user_score" => &["user_id", "anime_id"],
        "anime_dataset" => &["anime_id"],
        "user_details" => &["mal_id"],
        _ => &[],
    }
}

/// 列表字面量解析错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListParseError {
    #[error("不是列表字面量")]
    NotAList,
    #[error("字符串未闭合")]
    UnterminatedString,
    #[error("列表元素为空")]
    EmptyElement,
    #[error("意外的字符: {0:?}")]
    UnexpectedChar(char),
}

/// 解析文本形式的列表字面量
///
/// 接受 `['a', "b", 42]` 这类写法：元素可为单引号 / 双引号字符串
/// （反斜杠转义）或裸标记。是否在解析失败时回退到原文由调用方决定，
/// 本函数只报告结果。
pub fn parse_list_literal(text: &str) -> std::result::Result<Vec<String>, ListParseError> {
    let inner = text
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or(ListParseError::NotAList)?;

    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        match chars.peek() {
            None => break,
            Some(&quote) if quote == '\'' || quote == '"' => {
                chars.next();
                let mut item = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some(esc) => item.push(esc),
                            None => return Err(ListParseError::UnterminatedString),
                        },
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => item.push(c),
                    }
                }
                if !closed {
                    return Err(ListParseError::UnterminatedString);
                }
                items.push(item);

                while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                    chars.next();
                }
                match chars.next() {
                    None => break,
                    Some(',') => {}
                    Some(c) => return Err(ListParseError::UnexpectedChar(c)),
                }
            }
            Some(_) => {
                let mut item = String::new();
                let mut more = false;
                while let Some(&c) = chars.peek() {
                    chars.next();
                    if c == ',' {
                        more = true;
                        break;
                    }
                    item.push(c);
                }
                let item = item.trim().to_string();
                if item.is_empty() {
                    return Err(ListParseError::EmptyElement);
                }
                items.push(item);
                if !more {
                    break;
                }
            }
        }
    }

    Ok(items)
}

/// 编码为 PostgreSQL 数组字面量
///
/// 元素内的 `\` 和 `"` 转义；含分隔敏感字符（逗号、空格、花括号、
/// 引号）的元素加双引号。
pub fn to_pg_array(items: &[String]) -> String {
    let escaped: Vec<String> = items
        .iter()
        .map(|el| {
            let el = el.replace('\\', "\\\\").replace('"', "\\\"");
            if el
                .chars()
                .any(|c| matches!(c, ',' | ' ' | '{' | '}' | '"'))
            {
                format!("\"{}\"", el)
            } else {
                el
            }
        })
        .collect();
    format!("{{{}}}", escaped.join(","))
}

/// 规范化单个单元格
///
/// 哨兵值映射为 NULL；列表列尝试重编码为数组字面量，解析失败时
/// 显式选择保留原文（容错装载，不做校验）。
fn normalize_cell(column: &str, raw: &str) -> Value {
    if raw == NULL_SENTINEL {
        return Value::Null;
    }
    if LIST_COLUMNS.contains(&column) && !raw.is_empty() {
        return match parse_list_literal(raw) {
            Ok(items) => Value::String(to_pg_array(&items)),
            Err(_) => Value::String(raw.to_string()),
        };
    }
    Value::String(raw.to_string())
}

/// 解析 CSV 缓冲为列名加 jsonb 行集
fn parse_buffer(buffer: &[u8]) -> Result<(Vec<String>, Vec<Value>)> {
    let mut reader = csv::Reader::from_reader(buffer);
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut object = serde_json::Map::with_capacity(columns.len());
        for (column, raw) in columns.iter().zip(record.iter()) {
            object.insert(column.clone(), normalize_cell(column, raw));
        }
        rows.push(Value::Object(object));
    }

    Ok((columns, rows))
}

/// 构造带冲突子句的批量插入语句
///
/// 行集作为唯一参数 $1 绑定，经 jsonb_populate_recordset 展开成
/// 目标表的记录，文本值由各列的输入函数转换成列类型。
fn build_insert_sql(table: &str, columns: &[String], policy: ConflictPolicy) -> String {
    let column_list = columns.join(", ");
    let mut sql = format!(
        "INSERT INTO {table} ({column_list}) \
         SELECT {column_list} FROM jsonb_populate_recordset(NULL::{table}, $1)"
    );

    let keys = conflict_columns(table);
    if !keys.is_empty() {
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !keys.contains(&c.as_str()))
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();

        match policy {
            // 全部列都是键列时没有可覆盖的内容，退化为 DO NOTHING
            ConflictPolicy::Update if !updates.is_empty() => {
                sql.push_str(&format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    keys.join(", "),
                    updates.join(", ")
                ));
            }
            _ => {
                sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", keys.join(", ")));
            }
        }
    }

    sql
}

/// 从 CSV 缓冲批量装载数据到目标表
///
/// 整批作为单条参数化语句执行，约束冲突使整批失败并上抛；
/// 缓冲解析后没有可用行时返回 `Ok(false)`，不触碰存储。
#[instrument(skip(pool, buffer), fields(table = %table))]
pub async fn copy_from_buffer(
    pool: &PgPool,
    buffer: &[u8],
    table: &str,
    policy: ConflictPolicy,
) -> Result<bool> {
    let (columns, rows) = parse_buffer(buffer)?;

    if rows.is_empty() {
        info!("未装载任何数据（缓冲为空或所有行被跳过）");
        return Ok(false);
    }

    let row_count = rows.len();
    let sql = build_insert_sql(table, &columns, policy);

    sqlx::query(&sql)
        .bind(Value::Array(rows))
        .execute(pool)
        .await?;

    info!("批量装载完成: {} 行 -> {}", row_count, table);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_list_literal_quoted() {
        assert_eq!(
            parse_list_literal("['Action', 'Sci-Fi']").unwrap(),
            vec!["Action", "Sci-Fi"]
        );
        assert_eq!(
            parse_list_literal(r#"["Comedy", "Slice of Life"]"#).unwrap(),
            vec!["Comedy", "Slice of Life"]
        );
    }

    #[test]
    fn test_parse_list_literal_escapes() {
        assert_eq!(
            parse_list_literal(r"['It\'s a Trap', 'a\\b']").unwrap(),
            vec!["It's a Trap", r"a\b"]
        );
    }

    #[test]
    fn test_parse_list_literal_bare_tokens() {
        assert_eq!(
            parse_list_literal("[1, 2, 3]").unwrap(),
            vec!["1", "2", "3"]
        );
    }

    #[test]
    fn test_parse_list_literal_empty_and_trailing_comma() {
        assert_eq!(parse_list_literal("[]").unwrap(), Vec::<String>::new());
        assert_eq!(parse_list_literal("['a',]").unwrap(), vec!["a"]);
    }

    #[test]
    fn test_parse_list_literal_failures() {
        assert_eq!(
            parse_list_literal("not a list").unwrap_err(),
            ListParseError::NotAList
        );
        assert_eq!(
            parse_list_literal("['oops").unwrap_err(),
            ListParseError::NotAList
        );
        assert_eq!(
            parse_list_literal("['oops]").unwrap_err(),
            ListParseError::UnterminatedString
        );
        assert_eq!(
            parse_list_literal("['a' 'b']").unwrap_err(),
            ListParseError::UnexpectedChar('\'')
        );
    }

    #[test]
    fn test_to_pg_array_plain() {
        assert_eq!(
            to_pg_array(&["Action".to_string(), "Drama".to_string()]),
            "{Action,Drama}"
        );
    }

    #[test]
    fn test_to_pg_array_quoting_and_escaping() {
        assert_eq!(
            to_pg_array(&["Slice of Life".to_string()]),
            r#"{"Slice of Life"}"#
        );
        assert_eq!(to_pg_array(&[r#"say "hi""#.to_string()]), r#"{"say \"hi\""}"#);
        assert_eq!(to_pg_array(&[r"a\b".to_string()]), r#"{a\\b}"#);
    }

    #[test]
    fn test_normalize_cell_null_sentinel() {
        assert_eq!(normalize_cell("name", "\\N"), Value::Null);
        assert_eq!(normalize_cell("name", "Foo"), json!("Foo"));
    }

    #[test]
    fn test_normalize_cell_list_column() {
        assert_eq!(
            normalize_cell("genres", "['Action', 'Drama']"),
            json!("{Action,Drama}")
        );
        // 解析失败保留原文
        assert_eq!(
            normalize_cell("genres", "Action, Drama"),
            json!("Action, Drama")
        );
        // 非列表列不做重编码
        assert_eq!(
            normalize_cell("name", "['Action']"),
            json!("['Action']")
        );
    }

    #[test]
    fn test_parse_buffer() {
        let buffer = b"anime_id,name,genres\n1,Foo,\"['Action', 'Drama']\"\n2,\\N,\\N\n";
        let (columns, rows) = parse_buffer(buffer).unwrap();

        assert_eq!(columns, vec!["anime_id", "name", "genres"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            json!({"anime_id": "1", "name": "Foo", "genres": "{Action,Drama}"})
        );
        assert_eq!(
            rows[1],
            json!({"anime_id": "2", "name": null, "genres": null})
        );
    }

    #[test]
    fn test_build_insert_sql_update_policy() {
        let sql = build_insert_sql(
            "anime_dataset",
            &["anime_id".to_string(), "name".to_string()],
            ConflictPolicy::Update,
        );
        assert_eq!(
            sql,
            "INSERT INTO anime_dataset (anime_id, name) \
             SELECT anime_id, name FROM jsonb_populate_recordset(NULL::anime_dataset, $1) \
             ON CONFLICT (anime_id) DO UPDATE SET name = EXCLUDED.name"
        );
    }

    #[test]
    fn test_build_insert_sql_skip_policy() {
        let sql = build_insert_sql(
            "user_score",
            &[
                "user_id".to_string(),
                "anime_id".to_string(),
                "rating".to_string(),
            ],
            ConflictPolicy::Skip,
        );
        assert!(sql.ends_with("ON CONFLICT (user_id, anime_id) DO NOTHING"));
    }

    #[test]
    fn test_build_insert_sql_unknown_table() {
        let sql = build_insert_sql(
            "staging_table",
            &["a".to_string(), "b".to_string()],
            ConflictPolicy::Update,
        );
        assert!(!sql.contains("ON CONFLICT"));
    }

    #[test]
    fn test_build_insert_sql_all_key_columns() {
        // 没有非键列可覆盖，Update 退化为 DO NOTHING
        let sql = build_insert_sql(
            "user_score",
            &["user_id".to_string(), "anime_id".to_string()],
            ConflictPolicy::Update,
        );
        assert!(sql.ends_with("ON CONFLICT (user_id, anime_id) DO NOTHING"));
    }

    #[tokio::test]
    async fn test_empty_buffer_is_noop() {
        // 惰性连接池不会真正建立连接，空缓冲在触碰存储之前就返回
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();

        let loaded = copy_from_buffer(&pool, b"anime_id,name\n", "anime_dataset", ConflictPolicy::Update)
            .await
            .unwrap();
        assert!(!loaded);

        let loaded = copy_from_buffer(&pool, b"", "anime_dataset", ConflictPolicy::Update)
            .await
            .unwrap();
        assert!(!loaded);
    }
}
