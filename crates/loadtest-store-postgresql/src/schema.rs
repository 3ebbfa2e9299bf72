//! DDL and statements for the workload tables.

use loadtest_engine::{IsolationLevel, Table};

/// Generate CREATE TABLE statement.
pub fn create_table(table: Table) -> String {
    match table {
        Table::Account => format!(
            "CREATE TABLE \"{}\" (\"id\" UUID NOT NULL PRIMARY KEY, \"balance\" DECIMAL NOT NULL)",
            table.name()
        ),
        Table::Product => format!(
            "CREATE TABLE \"{}\" (\"id\" UUID NOT NULL PRIMARY KEY, \"name\" TEXT NOT NULL, \"price\" DECIMAL NOT NULL)",
            table.name()
        ),
    }
}

/// Generate DROP TABLE statement.
pub fn drop_table(table: Table) -> String {
    format!("DROP TABLE IF EXISTS \"{}\"", table.name())
}

pub fn begin(isolation: IsolationLevel) -> String {
    format!("BEGIN TRANSACTION ISOLATION LEVEL {}", isolation.as_sql())
}

/// Multi-row INSERT for `rows` rows, parameters numbered from `$1`.
pub fn insert(table: Table, rows: usize) -> String {
    let columns: &[&str] = match table {
        Table::Account => &["id", "balance"],
        Table::Product => &["id", "name", "price"],
    };

    let mut param_idx = 1;
    let placeholders: Vec<String> = (0..rows)
        .map(|_| {
            let row: Vec<String> = columns
                .iter()
                .map(|_| {
                    let p = format!("${param_idx}");
                    param_idx += 1;
                    p
                })
                .collect();
            format!("({})", row.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO \"{}\" ({}) VALUES {}",
        table.name(),
        columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", "),
        placeholders.join(", ")
    )
}

pub fn sample_keys(table: Table) -> String {
    format!(
        "SELECT \"id\" FROM \"{}\" ORDER BY random() LIMIT $1",
        table.name()
    )
}

pub fn all_keys(table: Table) -> String {
    format!("SELECT \"id\" FROM \"{}\"", table.name())
}

pub const FETCH_BALANCE: &str = "SELECT \"balance\" FROM \"account\" WHERE \"id\" = $1";

pub const UPDATE_BALANCE: &str = "UPDATE \"account\" SET \"balance\" = $1 WHERE \"id\" = $2";

pub const FETCH_PRODUCT: &str = "SELECT \"name\", \"price\" FROM \"product\" WHERE \"id\" = $1";

pub const UPDATE_PRODUCT: &str =
    "UPDATE \"product\" SET \"name\" = $1, \"price\" = $2 WHERE \"id\" = $3";

pub const SUM_BALANCES: &str =
    "SELECT COALESCE(SUM(\"balance\"), 0) FROM \"account\" WHERE \"id\" = ANY($1)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table() {
        let sql = create_table(Table::Account);
        assert!(sql.starts_with("CREATE TABLE \"account\""));
        assert!(sql.contains("\"balance\" DECIMAL NOT NULL"));

        let sql = create_table(Table::Product);
        assert!(sql.contains("\"name\" TEXT NOT NULL"));
        assert!(sql.contains("\"price\" DECIMAL NOT NULL"));
    }

    #[test]
    fn test_drop_table() {
        assert_eq!(drop_table(Table::Account), "DROP TABLE IF EXISTS \"account\"");
    }

    #[test]
    fn test_begin_names_isolation() {
        assert_eq!(
            begin(IsolationLevel::ReadCommitted),
            "BEGIN TRANSACTION ISOLATION LEVEL READ COMMITTED"
        );
    }

    #[test]
    fn test_insert_numbers_parameters_across_rows() {
        assert_eq!(
            insert(Table::Product, 2),
            "INSERT INTO \"product\" (\"id\", \"name\", \"price\") VALUES ($1, $2, $3), ($4, $5, $6)"
        );
    }
}
