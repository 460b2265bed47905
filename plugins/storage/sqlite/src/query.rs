use sync_api::{quote_sql_ident, Timestamp};

use crate::config::SqliteTableConfig;

/// SQL-текст + позиционные параметры (`?1`, `?2`, ...).
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<i64>,
}

/// Значение колонки в наносекундах, вычисленное так же, как при чтении:
/// INTEGER умножается точно, REAL округляется до целой наносекунды.
fn scaled_column(cfg: &SqliteTableConfig) -> String {
    let column = quote_sql_ident(&cfg.timestamp_column);
    let n = cfg.timestamp_unit.nanos_per_unit();
    format!("(CASE typeof({column}) WHEN 'integer' THEN {column} * {n} ELSE ROUND({column} * {n}) END)")
}

/// WHERE по фильтру таблицы и границам `[start, end]` в наносекундах.
///
/// Каждая граница даёт два условия: грубое по самой колонке (с запасом
/// в одну единицу, чтобы работал индекс) и точное по наносекундам.
fn where_clause(
    cfg: &SqliteTableConfig,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
) -> (String, Vec<i64>) {
    let column = quote_sql_ident(&cfg.timestamp_column);
    let scaled = scaled_column(cfg);
    let unit = cfg.timestamp_unit;
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(filter) = cfg.where_condition.as_deref().map(str::trim) {
        if !filter.is_empty() {
            conditions.push(format!("({filter})"));
        }
    }
    if let Some(start) = start {
        params.push(unit.upper_bound(start).saturating_sub(1));
        conditions.push(format!("{column} >= ?{}", params.len()));
        params.push(start.as_nanos());
        conditions.push(format!("{scaled} >= ?{}", params.len()));
    }
    if let Some(end) = end {
        params.push(unit.lower_bound(end).saturating_add(1));
        conditions.push(format!("{column} <= ?{}", params.len()));
        params.push(end.as_nanos());
        conditions.push(format!("{scaled} <= ?{}", params.len()));
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

fn projection(cfg: &SqliteTableConfig) -> String {
    match &cfg.columns {
        None => "*".to_string(),
        Some(columns) => {
            let mut quoted: Vec<String> = columns.iter().map(|c| quote_sql_ident(c)).collect();
            if !columns.contains(&cfg.timestamp_column) {
                quoted.push(quote_sql_ident(&cfg.timestamp_column));
            }
            quoted.join(", ")
        }
    }
}

pub(crate) fn select(table: &str, cfg: &SqliteTableConfig, start: Option<Timestamp>) -> Statement {
    let (condition, params) = where_clause(cfg, start, None);
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY {} ASC",
        projection(cfg),
        quote_sql_ident(table),
        condition,
        quote_sql_ident(&cfg.timestamp_column),
    );
    Statement { sql, params }
}

pub(crate) fn delete(
    table: &str,
    cfg: &SqliteTableConfig,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
) -> Statement {
    let (condition, params) = where_clause(cfg, start, end);
    Statement {
        sql: format!("DELETE FROM {}{}", quote_sql_ident(table), condition),
        params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_api::TimeUnit;

    const SCALED_NS: &str =
        r#"(CASE typeof("timestamp") WHEN 'integer' THEN "timestamp" * 1 ELSE ROUND("timestamp" * 1) END)"#;

    fn ts(ns: i64) -> Option<Timestamp> {
        Some(Timestamp::from_nanos(ns))
    }

    #[test]
    fn select_without_start_reads_everything() {
        let stmt = select("weather", &SqliteTableConfig::default(), None);
        assert_eq!(stmt.sql, r#"SELECT * FROM "weather" ORDER BY "timestamp" ASC"#);
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn select_with_start_is_inclusive() {
        let stmt = select("weather", &SqliteTableConfig::default(), ts(42));
        assert_eq!(
            stmt.sql,
            format!(
                r#"SELECT * FROM "weather" WHERE "timestamp" >= ?1 AND {SCALED_NS} >= ?2 ORDER BY "timestamp" ASC"#
            )
        );
        assert_eq!(stmt.params, vec![41, 42]);
    }

    #[test]
    fn projection_appends_timestamp_column() {
        let cfg = SqliteTableConfig {
            timestamp_column: "ts".into(),
            timestamp_unit: TimeUnit::Seconds,
            columns: Some(vec!["station".into(), "temp".into()]),
            where_condition: None,
        };
        let stmt = select("weather", &cfg, ts(1_500_000_000));
        assert!(stmt.sql.starts_with(r#"SELECT "station", "temp", "ts" FROM "weather" WHERE "#));
        assert!(stmt.sql.contains(r#"ROUND("ts" * 1000000000)"#));
        // Coarse bound one second below, exact bound in nanoseconds.
        assert_eq!(stmt.params, vec![0, 1_500_000_000]);
    }

    #[test]
    fn delete_bounds() {
        let cfg = SqliteTableConfig::default();
        assert_eq!(delete("t", &cfg, None, None).sql, r#"DELETE FROM "t""#);

        let both = delete("t", &cfg, ts(10), ts(30));
        assert_eq!(
            both.sql,
            format!(
                r#"DELETE FROM "t" WHERE "timestamp" >= ?1 AND {SCALED_NS} >= ?2 AND "timestamp" <= ?3 AND {SCALED_NS} <= ?4"#
            )
        );
        assert_eq!(both.params, vec![9, 10, 31, 30]);

        let end_only = delete("t", &cfg, None, ts(30));
        assert_eq!(
            end_only.sql,
            format!(r#"DELETE FROM "t" WHERE "timestamp" <= ?1 AND {SCALED_NS} <= ?2"#)
        );
        assert_eq!(end_only.params, vec![31, 30]);
    }

    #[test]
    fn coarse_bounds_leave_a_unit_of_slack() {
        let cfg = SqliteTableConfig { timestamp_unit: TimeUnit::Millis, ..Default::default() };
        let stmt = delete("t", &cfg, ts(1_500_001), ts(2_999_999));
        assert_eq!(stmt.params, vec![0, 1_500_001, 4, 2_999_999]);
    }

    #[test]
    fn where_condition_applies_to_select_and_delete() {
        let cfg = SqliteTableConfig {
            where_condition: Some(" station = 'north' ".into()),
            ..Default::default()
        };

        let read_all = select("weather", &cfg, None);
        assert_eq!(
            read_all.sql,
            r#"SELECT * FROM "weather" WHERE (station = 'north') ORDER BY "timestamp" ASC"#
        );

        let read = select("weather", &cfg, ts(5));
        assert!(read.sql.contains(r#"WHERE (station = 'north') AND "timestamp" >= ?1"#));
        assert_eq!(read.params, vec![4, 5]);

        let purge = delete("weather", &cfg, None, ts(30));
        assert!(purge.sql.starts_with(r#"DELETE FROM "weather" WHERE (station = 'north') AND "#));
        assert_eq!(purge.params, vec![31, 30]);

        let purge_all = delete("weather", &cfg, None, None);
        assert_eq!(purge_all.sql, r#"DELETE FROM "weather" WHERE (station = 'north')"#);
    }

    #[test]
    fn blank_where_condition_is_ignored() {
        let cfg = SqliteTableConfig { where_condition: Some("  ".into()), ..Default::default() };
        assert_eq!(delete("t", &cfg, None, None).sql, r#"DELETE FROM "t""#);
    }
}
