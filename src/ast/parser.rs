/// Generated SQL validation.
///
/// Re-parses compiled statements with `sqlparser` using the PostgreSQL
/// dialect. Plan lowering never goes through text, so this is only a guard
/// that what we hand to the server is syntactically sound.
use anyhow::{anyhow, Result};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser as SqlParser;

/// Parse `sql` and return the number of statements it contains.
pub fn check_sql(sql: &str) -> Result<usize> {
    let dialect = PostgreSqlDialect {};
    let statements =
        SqlParser::parse_sql(&dialect, sql).map_err(|e| anyhow!("SQL parse error: {}", e))?;
    if statements.is_empty() {
        return Err(anyhow!("no SQL statement found"));
    }
    Ok(statements.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_valid_select() {
        assert_eq!(check_sql("SELECT id FROM cust_user WHERE id = $1").unwrap(), 1);
    }

    #[test]
    fn test_check_rejects_garbage() {
        assert!(check_sql("SELECT id FROM cust_user WHERE").is_err());
    }

    #[test]
    fn test_check_rejects_empty_input() {
        assert!(check_sql("   ").is_err());
    }
}
