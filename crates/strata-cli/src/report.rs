use strata_db::{Direction, MigrationReport, UnitState, UnitStatus};

pub fn print_report(report: &MigrationReport) {
    if report.is_empty() {
        println!("{}", empty_message(report.direction));
        return;
    }
    let verb = match report.direction {
        Direction::Up => "applied",
        Direction::Down => "reverted",
    };
    for transition in &report.transitions {
        println!("  {verb:<9} {}", transition.unit);
    }
    println!(
        "{} migration{} {verb}",
        report.len(),
        if report.len() == 1 { "" } else { "s" }
    );
}

fn empty_message(direction: Direction) -> &'static str {
    match direction {
        Direction::Up => "nothing applied, schema is up to date",
        Direction::Down => "nothing reverted, no applied migrations above the target",
    }
}

pub fn print_status(rows: &[UnitStatus]) {
    if rows.is_empty() {
        println!("no migrations found");
        return;
    }
    let width = rows
        .iter()
        .map(|r| r.unit.to_string().len())
        .max()
        .unwrap_or(0)
        .max("MIGRATION".len());

    println!("{:<width$}  {:<26}  REVERSIBLE", "MIGRATION", "STATE");
    for row in rows {
        println!(
            "{:<width$}  {:<26}  {}",
            row.unit.to_string(),
            state_label(row),
            if row.reversible { "yes" } else { "no" }
        );
    }
}

fn state_label(row: &UnitStatus) -> String {
    match (row.state, row.applied_at) {
        (UnitState::Applied, Some(at)) => format!("applied {}", at.format("%Y-%m-%d %H:%M:%S")),
        (UnitState::Pending, _) if row.out_of_order => "pending (out of order)".to_string(),
        (UnitState::Pending, _) => "pending".to_string(),
        (state, _) => format!("{state:?}").to_lowercase(),
    }
}
