//! Terminal summaries for runs, configurations and the category tree.

use std::fmt::Write as _;

use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use survey_model::{PipelineRun, RunErrorEntry, RunErrorKind, RunStatus};
use survey_pipeline::Engine;
use survey_taxonomy::TaxonomyTree;

pub fn print_run_summary(run: &PipelineRun, fingerprint: Option<&str>) {
    println!("Run: {}", run.id);
    println!("Pipeline: {}", run.pipeline_id);
    println!("Status: {}", run.status);
    if let Some(fingerprint) = fingerprint {
        println!("Output fingerprint: {fingerprint}");
    }
    println!("{}", run_table(run));
    if let Some(table) = error_table(run) {
        println!();
        println!("Errors:");
        println!("{table}");
    }
    if run.errors_truncated > 0 {
        eprintln!(
            "{} further failed records were not kept in the run log",
            run.errors_truncated
        );
    }
}

/// One-row table of run counters.
pub fn run_table(run: &PipelineRun) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Status"),
        header_cell("Batch"),
        header_cell("Processed"),
        header_cell("Failed"),
        header_cell("Accepted"),
        header_cell("Warned"),
        header_cell("Skipped"),
        header_cell("Shadowed"),
        header_cell("Duration (ms)"),
    ]);
    apply_summary_table_style(&mut table);
    for index in 1..9 {
        align_column(&mut table, index, CellAlignment::Right);
    }
    table.add_row(vec![
        status_cell(run.status),
        Cell::new(run.batch_size),
        Cell::new(run.records_processed),
        count_cell(run.records_failed, Color::Red),
        Cell::new(metric(run, "records_accepted")),
        count_cell(metric(run, "records_warned"), Color::Yellow),
        count_cell(metric(run, "records_skipped"), Color::Yellow),
        count_cell(metric(run, "rules_shadowed"), Color::DarkGrey),
        Cell::new(metric(run, "duration_ms")),
    ]);
    table
}

/// The run's error log, run-level entries first.
pub fn error_table(run: &PipelineRun) -> Option<Table> {
    if run.error_log.is_empty() {
        return None;
    }
    let mut entries: Vec<&RunErrorEntry> = run.error_log.iter().collect();
    entries.sort_by_key(|entry| (entry.kind.is_record_level(), entry.record_index));
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Kind"),
        header_cell("Record"),
        header_cell("Rule"),
        header_cell("Attribute"),
        header_cell("Message"),
    ]);
    apply_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Right);
    for entry in entries {
        table.add_row(vec![
            kind_cell(entry.kind),
            optional_cell(entry.record_index.map(|index| index.to_string())),
            optional_cell(entry.rule_id.as_ref().map(ToString::to_string)),
            optional_cell(entry.attribute.clone()),
            Cell::new(&entry.message),
        ]);
    }
    Some(table)
}

pub fn print_check_summary(engine: &Engine) {
    println!("{}", check_table(engine));
}

/// Counts of everything a configuration registered.
pub fn check_table(engine: &Engine) -> Table {
    let taxonomy = engine.taxonomy();
    let inactive = taxonomy
        .categories()
        .filter(|category| !category.is_active)
        .count();
    let mut table = Table::new();
    table.set_header(vec![header_cell("Item"), header_cell("Count")]);
    apply_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Right);
    table.add_row(vec![Cell::new("Categories"), Cell::new(taxonomy.category_count())]);
    table.add_row(vec![
        Cell::new("Inactive categories"),
        count_cell(inactive, Color::Yellow),
    ]);
    table.add_row(vec![Cell::new("Attributes"), Cell::new(taxonomy.attribute_count())]);
    table.add_row(vec![
        Cell::new("Mapping rules"),
        Cell::new(engine.mapping_rules().len()),
    ]);
    table.add_row(vec![
        Cell::new("Pipelines"),
        Cell::new(engine.pipelines().count()),
    ]);
    table.add_row(vec![
        Cell::new("Validation rules"),
        Cell::new(engine.validation_rules().len()),
    ]);
    table
}

pub fn print_taxonomy(tree: &TaxonomyTree) {
    print!("{}", render_taxonomy(tree));
}

/// Indented category tree with each category's attributes under it.
pub fn render_taxonomy(tree: &TaxonomyTree) -> String {
    let mut out = String::new();
    for (depth, category) in tree.walk() {
        let indent = "  ".repeat(depth);
        let status = if category.is_active { "" } else { " [inactive]" };
        let _ = writeln!(out, "{indent}{} ({}){status}", category.code, category.name);
        for attribute in tree.attributes_of(&category.code) {
            let required = if attribute.is_required {
                " (required)"
            } else {
                ""
            };
            let _ = writeln!(
                out,
                "{indent}  - {}: {}{required}",
                attribute.code, attribute.data_type
            );
        }
    }
    out
}

fn metric(run: &PipelineRun, name: &str) -> usize {
    let value = run.metric(name);
    if value.is_finite() && value > 0.0 {
        value.round() as usize
    } else {
        0
    }
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(140);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}

fn status_cell(status: RunStatus) -> Cell {
    let cell = Cell::new(status).add_attribute(Attribute::Bold);
    match status {
        RunStatus::Completed => cell.fg(Color::Green),
        RunStatus::Failed => cell.fg(Color::Red),
        RunStatus::Pending | RunStatus::Running => cell.fg(Color::Yellow),
    }
}

fn kind_cell(kind: RunErrorKind) -> Cell {
    match kind {
        RunErrorKind::RecordFailed => Cell::new(kind).fg(Color::Red),
        RunErrorKind::RecordWarning => Cell::new(kind).fg(Color::Yellow),
        RunErrorKind::Truncated => dim_cell(kind),
        RunErrorKind::AggregateViolation
        | RunErrorKind::Cancelled
        | RunErrorKind::TimedOut
        | RunErrorKind::Infrastructure => Cell::new(kind)
            .fg(Color::Red)
            .add_attribute(Attribute::Bold),
    }
}

fn count_cell(count: usize, color: Color) -> Cell {
    if count > 0 {
        Cell::new(count).fg(color).add_attribute(Attribute::Bold)
    } else {
        dim_cell(count)
    }
}

fn optional_cell(value: Option<String>) -> Cell {
    match value {
        Some(value) => Cell::new(value),
        None => dim_cell("-"),
    }
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use survey_model::{AttributeConstraints, DataType, PipelineId, RuleId};

    use super::*;

    fn tree() -> TaxonomyTree {
        let mut tree = TaxonomyTree::new();
        tree.add_category(None, "demo", "Demographics").unwrap();
        tree.add_category(Some("demo"), "household", "Household").unwrap();
        tree.add_category(None, "media", "Media use").unwrap();
        tree.add_attribute(
            "demo",
            "generation",
            DataType::ClosedSet,
            AttributeConstraints::closed_set(["Gen Z", "Millennials"]),
            true,
        )
        .unwrap();
        tree.add_attribute(
            "demo",
            "age",
            DataType::Number,
            AttributeConstraints::default(),
            false,
        )
        .unwrap();
        tree.add_attribute(
            "household",
            "size",
            DataType::Number,
            AttributeConstraints::default(),
            false,
        )
        .unwrap();
        tree.deactivate("media").unwrap();
        tree
    }

    #[test]
    fn taxonomy_renders_depth_first() {
        insta::assert_snapshot!(render_taxonomy(&tree()), @r"
        demo (Demographics)
          - age: number
          - generation: closed_set (required)
          household (Household)
            - size: number
        media (Media use) [inactive]
        ");
    }

    #[test]
    fn error_table_lists_run_level_entries_first() {
        let mut run = PipelineRun::new(PipelineId::new("weekly").unwrap(), Utc::now());
        run.error_log.push(
            RunErrorEntry::new(RunErrorKind::RecordFailed, "value 15 outside all ranges")
                .with_record(3)
                .with_attribute("demo.generation"),
        );
        run.error_log.push(
            RunErrorEntry::new(RunErrorKind::AggregateViolation, "duplicate rate 0.06")
                .with_rule(RuleId::new("dup-rate").unwrap()),
        );
        let mut table = error_table(&run).unwrap();
        table.force_no_tty();
        let rendered = table.to_string();
        let aggregate = rendered.find("aggregate_violation").unwrap();
        let record = rendered.find("record_failed").unwrap();
        assert!(aggregate < record);
        assert!(rendered.contains("dup-rate"));
        assert!(rendered.contains("demo.generation"));
    }

    #[test]
    fn empty_error_log_has_no_table() {
        let run = PipelineRun::new(PipelineId::new("weekly").unwrap(), Utc::now());
        assert!(error_table(&run).is_none());
    }

    #[test]
    fn run_table_reads_metrics() {
        let mut run = PipelineRun::new(PipelineId::new("weekly").unwrap(), Utc::now());
        run.batch_size = 100;
        run.records_processed = 97;
        run.records_failed = 3;
        run.metrics.insert("records_accepted".into(), 97.0);
        run.metrics.insert("rules_shadowed".into(), 2.0);
        let mut table = run_table(&run);
        table.force_no_tty();
        let rendered = table.to_string();
        assert!(rendered.contains("PENDING"));
        assert!(rendered.contains("97"));
        assert!(rendered.contains("100"));
    }
}
