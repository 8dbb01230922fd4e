//! In-process implementation of the storage seams.
//!
//! Mirrors the Postgres semantics closely enough for the service tests: batches are all or
//! nothing, reads skip soft-deleted rows, terminal log entries never change, and run locks are
//! leases. Faults can be injected per table to exercise retry and failure paths.

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::{Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
	BoxFuture, Error, Result,
	models::{ConfigEntry, LogFinish, LogQuery, MaintenanceLogEntry, Record, RecordOperation},
	store::{MaintenanceLogger, PurgeScope, RecordStore, RunLockKey, SoftDeleteScope},
};
use memkeep_domain::{ManagedTable, OperationStatus, PolicyKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
	/// Surfaces as [`Error::Unavailable`], which callers retry.
	Unavailable,
	/// Surfaces as [`Error::ConstraintViolation`], which callers do not retry.
	Constraint,
}

#[derive(Debug)]
struct Fault {
	kind: FaultKind,
	/// Calls allowed to succeed before the fault fires.
	skip: u32,
	remaining: u32,
}

#[derive(Debug)]
struct Lease {
	holder: Uuid,
	expires_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct State {
	tables: HashMap<ManagedTable, Vec<Record>>,
	config: BTreeMap<String, ConfigEntry>,
	log: Vec<MaintenanceLogEntry>,
	locks: HashMap<RunLockKey, Lease>,
	/// Row ids locked by another session; batches skip them, counts still see them.
	held: HashSet<String>,
	faults: HashMap<ManagedTable, Fault>,
	unavailable: bool,
	batch_calls: u64,
}
impl State {
	fn take_fault(&mut self, table: ManagedTable) -> Result<()> {
		let Some(fault) = self.faults.get_mut(&table) else { return Ok(()) };

		if fault.skip > 0 {
			fault.skip -= 1;

			return Ok(());
		}
		if fault.remaining == 0 {
			return Ok(());
		}

		fault.remaining -= 1;

		let kind = fault.kind;

		if fault.remaining == 0 {
			self.faults.remove(&table);
		}

		Err(match kind {
			FaultKind::Unavailable =>
				Error::Unavailable(format!("Injected outage on {}.", table.name())),
			FaultKind::Constraint => Error::ConstraintViolation(format!(
				"Injected constraint failure on {}.",
				table.name()
			)),
		})
	}

	fn ensure_available(&self) -> Result<()> {
		if self.unavailable {
			return Err(Error::Unavailable("Memory store is marked unavailable.".to_string()));
		}

		Ok(())
	}
}

#[derive(Debug)]
pub struct MemoryStore {
	state: Mutex<State>,
}
impl MemoryStore {
	/// An empty store whose policy table holds the built-in defaults.
	pub fn new() -> Self {
		let now = OffsetDateTime::now_utc();
		let config = PolicyKey::ALL
			.iter()
			.map(|key| {
				let entry = ConfigEntry {
					key: key.as_str().to_string(),
					value: key.default_value().to_string(),
					description: Some(key.description().to_string()),
					updated_at: now,
					updated_by: Some("bootstrap".to_string()),
				};

				(entry.key.clone(), entry)
			})
			.collect();

		Self { state: Mutex::new(State { config, ..State::default() }) }
	}

	/// A store with no policy rows at all.
	pub fn without_config() -> Self {
		Self { state: Mutex::new(State::default()) }
	}

	pub fn insert(&self, table: ManagedTable, user_id: &str, created_at: OffsetDateTime) -> String {
		let record = Record {
			id: Uuid::new_v4().to_string(),
			user_id: user_id.to_string(),
			created_at,
			deleted_at: None,
		};
		let id = record.id.clone();

		self.state().tables.entry(table).or_default().push(record);

		id
	}

	/// Every row of `table`, soft-deleted or not, oldest first.
	pub fn all_records(&self, table: ManagedTable) -> Vec<Record> {
		let mut records = self.state().tables.get(&table).cloned().unwrap_or_default();

		records.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

		records
	}

	pub fn soft_deleted(&self, table: ManagedTable) -> Vec<Record> {
		self.all_records(table).into_iter().filter(|record| record.deleted_at.is_some()).collect()
	}

	/// Fails the next `times` batch calls against `table` before they change anything.
	pub fn fail_next(&self, table: ManagedTable, kind: FaultKind, times: u32) {
		self.fail_after(table, 0, kind, times);
	}

	/// Lets `successes` batch calls against `table` through, then fails the next `times`.
	pub fn fail_after(&self, table: ManagedTable, successes: u32, kind: FaultKind, times: u32) {
		self.state().faults.insert(table, Fault { kind, skip: successes, remaining: times });
	}

	/// Makes every call fail as unavailable until reset.
	pub fn set_unavailable(&self, unavailable: bool) {
		self.state().unavailable = unavailable;
	}

	/// Keeps a row out of every batch until released, like a row lock held elsewhere.
	pub fn hold_row(&self, id: &str) {
		self.state().held.insert(id.to_string());
	}

	pub fn release_row(&self, id: &str) {
		self.state().held.remove(id);
	}

	/// Number of batch calls seen so far, including failed ones.
	pub fn batch_calls(&self) -> u64 {
		self.state().batch_calls
	}

	pub fn log_entries(&self) -> Vec<MaintenanceLogEntry> {
		self.state().log.clone()
	}

	fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}
impl RecordStore for MemoryStore {
	fn load_config(&self) -> BoxFuture<'_, Result<Vec<ConfigEntry>>> {
		Box::pin(async move {
			let state = self.state();

			state.ensure_available()?;

			Ok(state.config.values().cloned().collect())
		})
	}

	fn upsert_config<'a>(
		&'a self,
		key: &'a str,
		value: &'a str,
		description: Option<&'a str>,
		updated_by: Option<&'a str>,
	) -> BoxFuture<'a, Result<ConfigEntry>> {
		Box::pin(async move {
			let mut state = self.state();

			state.ensure_available()?;

			let previous = state.config.get(key).and_then(|entry| entry.description.clone());
			let entry = ConfigEntry {
				key: key.to_string(),
				value: value.to_string(),
				description: description.map(str::to_string).or(previous),
				updated_at: OffsetDateTime::now_utc(),
				updated_by: updated_by.map(str::to_string),
			};

			state.config.insert(entry.key.clone(), entry.clone());

			Ok(entry)
		})
	}

	fn count_soft_delete_candidates<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a SoftDeleteScope,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let state = self.state();

			state.ensure_available()?;

			let count = state
				.tables
				.get(&table)
				.map(|rows| rows.iter().filter(|row| soft_delete_matches(row, scope)).count())
				.unwrap_or(0);

			Ok(count as u64)
		})
	}

	fn soft_delete_batch<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a SoftDeleteScope,
		limit: u32,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let mut state = self.state();

			state.batch_calls += 1;

			state.ensure_available()?;
			state.take_fault(table)?;

			let State { tables, held, .. } = &mut *state;
			let Some(rows) = tables.get_mut(&table) else { return Ok(0) };
			let mut picked = rows
				.iter_mut()
				.filter(|row| !held.contains(&row.id) && soft_delete_matches(row, scope))
				.collect::<Vec<_>>();

			picked.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
			picked.truncate(limit as usize);

			for row in &mut picked {
				row.deleted_at = Some(now.max(row.created_at));
			}

			Ok(picked.len() as u64)
		})
	}

	fn count_purge_candidates<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a PurgeScope,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let state = self.state();

			state.ensure_available()?;

			let count = state
				.tables
				.get(&table)
				.map(|rows| rows.iter().filter(|row| purge_matches(row, scope)).count())
				.unwrap_or(0);

			Ok(count as u64)
		})
	}

	fn purge_batch<'a>(
		&'a self,
		table: ManagedTable,
		scope: &'a PurgeScope,
		limit: u32,
	) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			let mut state = self.state();

			state.batch_calls += 1;

			state.ensure_available()?;
			state.take_fault(table)?;

			let State { tables, held, .. } = &mut *state;
			let Some(rows) = tables.get_mut(&table) else { return Ok(0) };
			let mut picked = rows
				.iter()
				.filter(|row| !held.contains(&row.id) && purge_matches(row, scope))
				.map(|row| (row.deleted_at, row.id.clone()))
				.collect::<Vec<_>>();

			picked.sort();
			picked.truncate(limit as usize);

			rows.retain(|row| !picked.iter().any(|(_, id)| *id == row.id));

			Ok(picked.len() as u64)
		})
	}

	fn active_records<'a>(
		&'a self,
		table: ManagedTable,
		user_id: Option<&'a str>,
	) -> BoxFuture<'a, Result<Vec<Record>>> {
		Box::pin(async move {
			self.state().ensure_available()?;

			Ok(self
				.all_records(table)
				.into_iter()
				.filter(|row| row.deleted_at.is_none())
				.filter(|row| user_id.is_none_or(|user| row.user_id == user))
				.collect())
		})
	}

	fn try_acquire_run_lock<'a>(
		&'a self,
		key: &'a RunLockKey,
		holder: Uuid,
		lease: Duration,
		now: OffsetDateTime,
	) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut state = self.state();

			state.ensure_available()?;

			let held_by_other = state
				.locks
				.get(key)
				.is_some_and(|lease| lease.holder != holder && lease.expires_at > now);

			if held_by_other {
				return Ok(false);
			}

			state.locks.insert(key.clone(), Lease { holder, expires_at: now + lease });

			Ok(true)
		})
	}

	fn release_run_lock<'a>(
		&'a self,
		key: &'a RunLockKey,
		holder: Uuid,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			let mut state = self.state();

			if state.locks.get(key).is_some_and(|lease| lease.holder == holder) {
				state.locks.remove(key);
			}

			Ok(())
		})
	}

	fn ping(&self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move { self.state().ensure_available() })
	}
}
impl MaintenanceLogger for MemoryStore {
	fn record<'a>(&'a self, op: &'a RecordOperation) -> BoxFuture<'a, Result<Uuid>> {
		Box::pin(async move {
			op.validate()?;

			let mut state = self.state();

			state.ensure_available()?;

			let started_at = OffsetDateTime::now_utc();
			let terminal = op.status.is_terminal();
			let entry = MaintenanceLogEntry {
				log_id: Uuid::new_v4(),
				operation_type: op.operation_type,
				table_name: op.table_name.clone(),
				user_id: op.user_id.clone(),
				records_affected: op.records_affected,
				parameters: Value::Object(op.parameters.clone()),
				status: op.status,
				error_message: op.error_message.clone(),
				started_at,
				completed_at: terminal.then_some(started_at),
				duration_ms: terminal.then_some(0),
				pipeline_id: op.pipeline.pipeline_id.clone(),
				pipeline_version: op.pipeline.pipeline_version.clone(),
			};
			let log_id = entry.log_id;

			state.log.push(entry);

			Ok(log_id)
		})
	}

	fn finish<'a>(&'a self, log_id: Uuid, finish: &'a LogFinish) -> BoxFuture<'a, Result<bool>> {
		Box::pin(async move {
			let mut state = self.state();

			state.ensure_available()?;

			let Some(entry) = state.log.iter_mut().find(|entry| entry.log_id == log_id) else {
				return Err(Error::NotFound(format!("Maintenance log entry {log_id}.")));
			};

			if entry.status != OperationStatus::Running {
				return Ok(false);
			}

			entry.status = finish.status;
			entry.records_affected = finish.records_affected;
			entry.error_message = finish.error_message.clone();
			entry.completed_at = Some(finish.completed_at);
			entry.duration_ms = Some(finish.duration_ms);

			if let Value::Object(existing) = &mut entry.parameters {
				existing.extend(finish.parameters.clone());
			}

			Ok(true)
		})
	}

	fn get(&self, log_id: Uuid) -> BoxFuture<'_, Result<Option<MaintenanceLogEntry>>> {
		Box::pin(async move {
			let state = self.state();

			state.ensure_available()?;

			Ok(state.log.iter().find(|entry| entry.log_id == log_id).cloned())
		})
	}

	fn query<'a>(
		&'a self,
		query: &'a LogQuery,
	) -> BoxFuture<'a, Result<Vec<MaintenanceLogEntry>>> {
		Box::pin(async move {
			let state = self.state();

			state.ensure_available()?;

			// Reverse insertion order first so the stable sort keeps later writes ahead on ties.
			let mut entries = state
				.log
				.iter()
				.rev()
				.filter(|entry| query.matches(entry))
				.cloned()
				.collect::<Vec<_>>();

			entries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
			entries.truncate(query.effective_limit() as usize);

			Ok(entries)
		})
	}
}

fn soft_delete_matches(row: &Record, scope: &SoftDeleteScope) -> bool {
	row.deleted_at.is_none()
		&& match scope {
			SoftDeleteScope::CreatedBefore(cutoff) => row.created_at < *cutoff,
			SoftDeleteScope::User(user_id) => row.user_id == *user_id,
		}
}

fn purge_matches(row: &Record, scope: &PurgeScope) -> bool {
	match (row.deleted_at, scope) {
		(Some(deleted_at), PurgeScope::DeletedBefore(cutoff)) => deleted_at < *cutoff,
		(Some(_), PurgeScope::User(user_id)) => row.user_id == *user_id,
		(None, _) => false,
	}
}
