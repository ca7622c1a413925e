//! Direct access to the database: ad-hoc statements and the change log

use anyhow::Result;
use serde_json::Value;

use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, statement: &str, json: bool) -> Result<()> {
    let store = super::store(ctx)?;
    let result = store.query(statement)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if !result.is_query() {
        ui::success(&format!("{} row(s) changed", result.changes));
        return Ok(());
    }

    let rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(cell).collect())
        .collect();
    ui::print_table(&result.columns, &rows);
    ui::dim(&format!("{} row(s)", rows.len()));
    Ok(())
}

pub fn audit(ctx: &Context, limit: usize, table: Option<&str>, json: bool) -> Result<()> {
    let store = super::store(ctx)?;
    let entries = store.audit_log(limit, table)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        ui::info("No recorded changes");
        return Ok(());
    }

    let columns = ["ID", "CHANGED AT", "TABLE", "OP", "ROW"].map(String::from);
    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            let row = e.new_row.as_ref().or(e.old_row.as_ref());
            vec![
                e.id.to_string(),
                e.changed_at.clone(),
                e.table_name.clone(),
                e.operation.clone(),
                row.map(Value::to_string).unwrap_or_default(),
            ]
        })
        .collect();
    ui::header("Recorded Changes");
    ui::print_table(&columns, &rows);
    Ok(())
}

/// Render one value for a text table
fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell() {
        assert_eq!(cell(&Value::Null), "NULL");
        assert_eq!(cell(&json!("main")), "main");
        assert_eq!(cell(&json!(251)), "251");
    }
}
