use memkeep_domain::ManagedTable;

const MANAGED_TABLE_TEMPLATE: &str = include_str!("../../../sql/tables/001_managed_table.sql");

pub fn render_schema() -> String {
	let init = include_str!("../../../sql/init.sql");

	expand_includes(init)
}

/// DDL for one managed table: soft-delete columns, the ordering invariant, partial indexes and
/// the active view.
pub fn render_managed_table(table: ManagedTable) -> String {
	MANAGED_TABLE_TEMPLATE.replace("<TABLE>", table.name())
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"00_extensions.sql" => out.push_str(include_str!("../../../sql/00_extensions.sql")),
				"managed_tables" =>
					for table in ManagedTable::ALL {
						out.push_str(&render_managed_table(table));
						out.push('\n');
					},
				"tables/010_memory_maintenance_log.sql" => out
					.push_str(include_str!("../../../sql/tables/010_memory_maintenance_log.sql")),
				"tables/011_memory_maintenance_config.sql" => out.push_str(include_str!(
					"../../../sql/tables/011_memory_maintenance_config.sql"
				)),
				"tables/012_memory_maintenance_run_locks.sql" => out.push_str(include_str!(
					"../../../sql/tables/012_memory_maintenance_run_locks.sql"
				)),
				"functions/020_record_maintenance_operation.sql" => out.push_str(include_str!(
					"../../../sql/functions/020_record_maintenance_operation.sql"
				)),
				"functions/021_memory_maintenance_log_guard.sql" => out.push_str(include_str!(
					"../../../sql/functions/021_memory_maintenance_log_guard.sql"
				)),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
