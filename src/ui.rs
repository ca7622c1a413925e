use colored::Colorize;
use converge::{Action, ModuleInfo, Plan};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Plans
// ============================================================================

/// Print a plan grouped by table
pub fn display_plan(title: &str, plan: &Plan) {
    if plan.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    header(title);
    let report = plan.report();
    let mut tables: Vec<&str> = Vec::new();
    for row in &report.rows {
        if !tables.contains(&row.table_name.as_str()) {
            tables.push(&row.table_name);
        }
    }

    for table in tables {
        section(table);
        for row in report.rows.iter().filter(|r| r.table_name == table) {
            let symbol = match row.action {
                Action::Create => row.action.symbol().green(),
                Action::Update => row.action.symbol().yellow(),
                Action::Replace => row.action.symbol().magenta(),
                Action::Delete => row.action.symbol().red(),
            };
            let id = if row.id.is_empty() {
                String::new()
            } else {
                format!(" (#{})", row.id).dimmed().to_string()
            };
            println!("  {symbol} {} {}{id}", row.action, row.description);
        }
    }

    println!();
    println!("  {}", plan_summary(plan).bold());
}

/// `2 to create, 1 to delete`
pub fn plan_summary(plan: &Plan) -> String {
    let parts: Vec<String> = [
        (Action::Create, "create"),
        (Action::Update, "update"),
        (Action::Replace, "replace"),
        (Action::Delete, "delete"),
    ]
    .iter()
    .filter_map(|(action, verb)| {
        let count = plan.count(*action);
        (count > 0).then(|| format!("{count} to {verb}"))
    })
    .collect();

    if parts.is_empty() {
        "no changes".to_string()
    } else {
        parts.join(", ")
    }
}

// ============================================================================
// Tables
// ============================================================================

/// Print rows under aligned column headings
pub fn print_table(columns: &[String], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
    };

    println!("  {}", line(columns).bold());
    for row in rows {
        println!("  {}", line(row).trim_end());
    }
}

/// Print module listings
pub fn display_modules(modules: &[ModuleInfo], installed: &[String]) {
    let columns = ["MODULE", "VERSION", "TABLES", "DEPENDS ON", ""].map(String::from);
    let rows: Vec<Vec<String>> = modules
        .iter()
        .map(|m| {
            let qualified = converge::qualify(&m.name, &m.version);
            vec![
                m.name.clone(),
                m.version.clone(),
                m.tables.join(", "),
                m.dependencies.join(", "),
                if installed.contains(&qualified) {
                    "installed".to_string()
                } else {
                    String::new()
                },
            ]
        })
        .collect();
    print_table(&columns, &rows);
}

// ============================================================================
// Tests
// ============================================================================
