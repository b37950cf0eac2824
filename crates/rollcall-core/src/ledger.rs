//! Attendance ledger: one row per identity, one column per date.
//!
//! ```text
//! S.no,Name,2024-01-01,2024-01-02
//! 1,Alice,P,P
//! 2,Bob,P
//! ```
//!
//! The header row maps columns to dates. A row shorter than the header is
//! simply not yet marked for the trailing dates. The table is loaded on the
//! first update of a run, kept in memory, and rewritten wholesale whenever a
//! row changes. Each recognition event therefore costs O(rows).
//!
//! Cells are kept as raw bytes and the file's line terminator is reused on
//! write, so rows nobody touched come back byte for byte.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Cell value recording that an identity was present.
pub const PRESENT_MARK: &str = "P";
pub const SERIAL_HEADER: &str = "S.no";
pub const NAME_HEADER: &str = "Name";

const NAME_COLUMN: usize = 1;
const LEADING_COLUMNS: usize = 2;

/// One ledger line, cell by cell. Cells need not be UTF-8.
pub type Row = Vec<Vec<u8>>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("ledger {0} already exists")]
    AlreadyExists(PathBuf),
    #[error("date must not be empty")]
    EmptyDate,
    #[error("ledger is recording {resolved}, cannot switch to {requested} in the same run")]
    DateChanged { resolved: String, requested: String },
}

impl LedgerError {
    /// True for read/write failures of the persisted table.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Write { .. })
    }
}

/// A ledger row that cannot be interpreted. Logged and passed through unchanged.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RowAnomaly {
    #[error("row has {cells} cell(s), no name column")]
    MissingName { cells: usize },
}

/// Result of [`Ledger::ensure_present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The identity's row was changed to present.
    Marked,
    /// The identity was already present for the date; nothing changed.
    AlreadyPresent,
    /// No row carries this identity's name.
    NotOnRoster,
}

/// Persistence for the whole ledger table.
pub trait LedgerStore {
    fn load(&self) -> Result<Vec<Row>, LedgerError>;
    /// Replace the persisted table with `rows`.
    fn save(&self, rows: &[Row]) -> Result<(), LedgerError>;
}

/// CSV file store. Writes go to a sibling temporary file which is then
/// renamed over the ledger, so readers never see a half-written table.
#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
    /// Line ending seen on load; `\n` until a file with CRLF lines is read.
    terminator: Cell<csv::Terminator>,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            terminator: Cell::new(csv::Terminator::Any(b'\n')),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ledger.csv".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    fn write_err(&self, source: impl Into<csv::Error>) -> LedgerError {
        LedgerError::Write {
            path: self.path.clone(),
            source: source.into(),
        }
    }
}

impl LedgerStore for CsvStore {
    fn load(&self) -> Result<Vec<Row>, LedgerError> {
        let read_err = |source: csv::Error| LedgerError::Read {
            path: self.path.clone(),
            source,
        };

        let bytes = std::fs::read(&self.path).map_err(|e| read_err(e.into()))?;
        if let Some(end) = bytes.iter().position(|&b| b == b'\n') {
            self.terminator.set(if end > 0 && bytes[end - 1] == b'\r' {
                csv::Terminator::CRLF
            } else {
                csv::Terminator::Any(b'\n')
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes.as_slice());

        let mut rows = Vec::new();
        for record in reader.byte_records() {
            let record = record.map_err(read_err)?;
            rows.push(record.iter().map(<[u8]>::to_vec).collect());
        }

        tracing::debug!(path = %self.path.display(), rows = rows.len(), "ledger loaded");
        Ok(rows)
    }

    fn save(&self, rows: &[Row]) -> Result<(), LedgerError> {
        let tmp = self.temp_path();

        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .terminator(self.terminator.get())
            .from_path(&tmp)
            .map_err(|e| self.write_err(e))?;
        for row in rows {
            writer.write_record(row).map_err(|e| self.write_err(e))?;
        }
        writer.flush().map_err(|e| self.write_err(e))?;
        drop(writer);

        std::fs::rename(&tmp, &self.path).map_err(|e| self.write_err(e))?;
        tracing::debug!(path = %self.path.display(), rows = rows.len(), "ledger written");
        Ok(())
    }
}

/// Date column bookkeeping, resolved once per run.
#[derive(Debug, Clone)]
enum DateColumn {
    Unresolved,
    Resolved { date: String, index: usize },
}

/// In-memory attendance table bound to a store.
pub struct Ledger<S: LedgerStore = CsvStore> {
    store: S,
    rows: Vec<Row>,
    column: DateColumn,
    /// Row changes not yet persisted (a failed write is retried on the next update).
    unsaved: bool,
}

impl Ledger<CsvStore> {
    /// Bind to a CSV ledger file. Nothing is read until the first update.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_store(CsvStore::new(path))
    }
}

impl<S: LedgerStore> Ledger<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            store,
            rows: Vec::new(),
            column: DateColumn::Unresolved,
            unsaved: false,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loaded table, header first. Empty until the first update.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Column index of this run's date, once resolved.
    pub fn date_column(&self) -> Option<usize> {
        match &self.column {
            DateColumn::Unresolved => None,
            DateColumn::Resolved { index, .. } => Some(*index),
        }
    }

    /// Mark `name` present for `date`.
    ///
    /// The first call of a run loads the table and resolves the date column:
    /// the header's last cell is reused when it already equals `date`,
    /// otherwise `date` is appended as a new column. Later calls must pass the
    /// same date. The table is written only when some row changed.
    pub fn ensure_present(&mut self, name: &str, date: &str) -> Result<MarkOutcome, LedgerError> {
        let column = self.resolve(date)?;

        let mut outcome = MarkOutcome::NotOnRoster;
        for (index, row) in self.rows.iter_mut().enumerate().skip(1) {
            match mark_row(row, name, column) {
                Ok(RowUpdate::Untouched) => {}
                Ok(RowUpdate::AlreadyPresent) => {
                    if outcome == MarkOutcome::NotOnRoster {
                        outcome = MarkOutcome::AlreadyPresent;
                    }
                }
                Ok(RowUpdate::Marked) => {
                    outcome = MarkOutcome::Marked;
                    self.unsaved = true;
                }
                Err(anomaly) => {
                    tracing::debug!(row = index, %anomaly, "leaving malformed ledger row as-is");
                }
            }
        }

        if self.unsaved {
            self.store.save(&self.rows)?;
            self.unsaved = false;
            tracing::info!(name, date, "attendance recorded");
        } else if outcome == MarkOutcome::NotOnRoster {
            tracing::warn!(name, "identity has no row in the ledger");
        }

        Ok(outcome)
    }

    fn resolve(&mut self, date: &str) -> Result<usize, LedgerError> {
        if let DateColumn::Resolved { date: resolved, index } = &self.column {
            if resolved != date {
                return Err(LedgerError::DateChanged {
                    resolved: resolved.clone(),
                    requested: date.to_string(),
                });
            }
            return Ok(*index);
        }

        if date.is_empty() {
            return Err(LedgerError::EmptyDate);
        }

        let mut rows = self.store.load()?;
        if rows.is_empty() {
            rows.push(default_header());
        }

        let header = &mut rows[0];
        if header.first().map(Vec::as_slice) != Some(SERIAL_HEADER.as_bytes()) {
            let first = header.first().map(|c| String::from_utf8_lossy(c).into_owned());
            tracing::warn!(?first, "ledger header does not start with S.no");
        }
        let present = header.len();
        if present < LEADING_COLUMNS {
            header.extend(default_header().into_iter().skip(present));
        }

        let reuse = header.len() > LEADING_COLUMNS
            && header.last().map(Vec::as_slice) == Some(date.as_bytes());
        let index = if reuse {
            tracing::info!(date, column = header.len() - 1, "reusing existing date column");
            header.len() - 1
        } else {
            if header[LEADING_COLUMNS..].iter().any(|d| d.as_slice() == date.as_bytes()) {
                tracing::warn!(date, "date already in an earlier column; appending a new one");
            }
            header.push(date.as_bytes().to_vec());
            tracing::info!(date, column = header.len() - 1, "added date column");
            header.len() - 1
        };

        self.rows = rows;
        self.column = DateColumn::Resolved {
            date: date.to_string(),
            index,
        };
        Ok(index)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RowUpdate {
    Untouched,
    AlreadyPresent,
    Marked,
}

/// Update one identity row in place. Missing cells before `column` are filled
/// as absent so the mark lands under its own date.
fn mark_row(row: &mut Row, name: &str, column: usize) -> Result<RowUpdate, RowAnomaly> {
    let row_name = row
        .get(NAME_COLUMN)
        .ok_or(RowAnomaly::MissingName { cells: row.len() })?;
    if row_name.as_slice() != name.as_bytes() {
        return Ok(RowUpdate::Untouched);
    }

    let mark = PRESENT_MARK.as_bytes();
    match row.get_mut(column) {
        Some(cell) if cell.as_slice() == mark => Ok(RowUpdate::AlreadyPresent),
        Some(cell) => {
            *cell = mark.to_vec();
            Ok(RowUpdate::Marked)
        }
        None => {
            row.resize(column, Vec::new());
            row.push(mark.to_vec());
            Ok(RowUpdate::Marked)
        }
    }
}

fn default_header() -> Row {
    vec![SERIAL_HEADER.as_bytes().to_vec(), NAME_HEADER.as_bytes().to_vec()]
}

/// Write a fresh ledger with one numbered row per identity.
pub fn create_roster(path: &Path, names: &[String]) -> Result<(), LedgerError> {
    if path.exists() {
        return Err(LedgerError::AlreadyExists(path.to_path_buf()));
    }
    let store = CsvStore::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| store.write_err(e))?;
    }

    let mut rows = vec![default_header()];
    rows.extend(
        names
            .iter()
            .enumerate()
            .map(|(i, name)| vec![(i + 1).to_string().into_bytes(), name.as_bytes().to_vec()]),
    );
    store.save(&rows)?;
    tracing::info!(path = %path.display(), identities = names.len(), "roster created");
    Ok(())
}
