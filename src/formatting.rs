//! formatting prints out collected result rows and stored tables nicely.

use streaming_iterator::StreamingIterator;

use crate::table::Table;
use crate::table_traits::TableMeta;
use crate::typed_row::Row;

fn header(col_names: &[&str]) -> String {
    format!(
        "   | {} |\n",
        col_names
            .iter()
            .map(|x| format!("{:15}", x))
            .collect::<Vec<String>>()
            .join(" | ")
    )
}

fn push_row(out: &mut String, i: usize, row: &Row) {
    out.push_str(&format!("{:2} |", i));
    for d in &row.items {
        out.push_str(&format!(" {:15} |", d));
    }
    out.push('\n');
}

/// Formats rows as a table, one line per row, with the column names on top.
/// In the future, also csv output, etc.
pub fn format_rows(col_names: &[&str], rows: &[Row], detailed: bool) -> String {
    let mut out = header(col_names);
    for (i, row) in rows.iter().enumerate() {
        push_row(&mut out, i, row);
    }
    if detailed {
        out.push_str(&format!("({} rows)\n", rows.len()));
    }
    out
}

/// Printing out rows nicely.
pub fn print_rows(col_names: &[&str], rows: &[Row], detailed: bool) {
    print!("{}", format_rows(col_names, rows, detailed));
}

/// Formats the rows of `table` visible in `branch`, read straight from storage.
pub fn format_table(table: &Table, branch: usize) -> String {
    let names = table.column_names();
    let names: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    let mut out = header(&names);
    let mut it = table.streaming_iterator(branch);
    let mut n = 0;
    while let Some(row) = it.next() {
        push_row(&mut out, n, row);
        n += 1;
    }
    out.push_str(&format!("({} rows)\n", n));
    out
}

pub fn print_table(table: &Table, branch: usize) {
    print!("{}", format_table(table, branch));
}

#[test]
fn test_format_rows() {
    use crate::datum::Datum;
    let rows = vec![
        Row::new(vec![Datum::Integer(1), Datum::Varchar("x".to_string())]),
        Row::new(vec![Datum::Integer(22), Datum::Null]),
    ];
    let s = format_rows(&["a", "b"], &rows, true);
    let lines: Vec<&str> = s.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], format!("   | {:15} | {:15} |", "a", "b"));
    assert_eq!(lines[2], format!(" 1 | {:15} | {:15} |", 22, "NULL"));
    assert_eq!(lines[3], "(2 rows)");
}

#[test]
fn test_format_table_skips_rows_of_other_branches() {
    use crate::datum::Datum;
    use crate::sql_type::SqlType;
    use crate::table::MASTER_BRANCH;
    let mut t = Table::create("t", &[("a", SqlType::integer()), ("b", SqlType::varchar(4).as_nullable())]).unwrap();
    t.add_row(&[Datum::Integer(1), Datum::Varchar("x".to_string())]).unwrap();
    t.add_row(&[Datum::Integer(2), Datum::Null]).unwrap();
    t.copy_visibility(MASTER_BRANCH, 1).unwrap();
    t.delete_row(0, 1).unwrap();

    let s = format_table(&t, MASTER_BRANCH);
    let lines: Vec<&str> = s.lines().collect();
    assert_eq!(lines[0], format!("   | {:15} | {:15} |", "a", "b"));
    assert_eq!(lines[1], format!(" 0 | {:15} | {:15} |", 1, "x"));
    assert_eq!(lines[3], "(2 rows)");

    let s = format_table(&t, 1);
    let lines: Vec<&str> = s.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1], format!(" 0 | {:15} | {:15} |", 2, "NULL"));
}
