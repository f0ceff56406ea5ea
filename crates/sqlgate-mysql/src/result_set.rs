//! Result set materialization, cursor, and row mutation.
//!
//! Rows are fully buffered at construction; the cursor is an index into the
//! buffer, with 0 meaning before-first and N+1 after-last. Updatable sets
//! lazily build companion UPDATE/INSERT/DELETE/refresh-SELECT statements
//! keyed by the primary-key values captured when the rows were fetched.

use std::net::TcpStream;
use std::sync::Arc;

use sqlgate_core::{ColumnInfo, Error, Result, Row, UsageErrorKind, Value};

use crate::connection::{ConnectStream, ExecuteOutcome, RawResultSet, SharedConnection};
use crate::field::{Field, FieldType};
use crate::statement::PreparedStatement;

/// Cursor capabilities of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultSetType {
    /// Only `next()` is legal
    ForwardOnly,
    /// Free positioning over the buffered rows
    #[default]
    ScrollInsensitive,
}

/// Whether the rows may be mutated through the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    #[default]
    ReadOnly,
    Updatable,
}

/// Per-column staging for an in-place edit or an insert row.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingCell {
    Untouched,
    Set(Option<Vec<u8>>),
}

/// Lazily built companion statements for row mutation.
struct Companions<S: ConnectStream> {
    update: Option<PreparedStatement<S>>,
    insert: Option<PreparedStatement<S>>,
    delete: Option<PreparedStatement<S>>,
    refresh: Option<PreparedStatement<S>>,
}

impl<S: ConnectStream> Default for Companions<S> {
    fn default() -> Self {
        Self {
            update: None,
            insert: None,
            delete: None,
            refresh: None,
        }
    }
}

/// A buffered, scrollable, optionally updatable result set.
pub struct ResultSet<S: ConnectStream = TcpStream> {
    conn: SharedConnection<S>,
    fields: Vec<Field>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
    column_info: Arc<ColumnInfo>,
    cursor: usize,
    rs_type: ResultSetType,
    updatable: bool,
    table: String,
    pk_indices: Vec<usize>,
    quote: Option<char>,
    capitalize_types: bool,
    pending: Vec<PendingCell>,
    on_insert_row: bool,
    insert_cells: Vec<PendingCell>,
    companions: Companions<S>,
    closed: bool,
}

impl<S: ConnectStream> std::fmt::Debug for ResultSet<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("rows", &self.rows.len())
            .field("columns", &self.fields.len())
            .field("cursor", &self.cursor)
            .field("rs_type", &self.rs_type)
            .field("updatable", &self.updatable)
            .finish_non_exhaustive()
    }
}

impl<S: ConnectStream> ResultSet<S> {
    pub(crate) fn from_raw(
        conn: SharedConnection<S>,
        raw: RawResultSet,
        rs_type: ResultSetType,
        concurrency: Concurrency,
    ) -> Result<Self> {
        let RawResultSet { fields, rows } = raw;
        let column_count = fields.len();
        let column_info = Arc::new(ColumnInfo::new(
            fields.iter().map(|f| f.name.clone()).collect(),
        ));

        let table = fields.first().map(|f| f.table.clone()).unwrap_or_default();
        let single_table =
            !fields.is_empty() && fields.iter().all(|f| f.table == table);
        let pk_indices: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_primary_key())
            .map(|(i, _)| i)
            .collect();
        let updatable = concurrency == Concurrency::Updatable
            && single_table
            && !table.is_empty()
            && !pk_indices.is_empty();

        let quote = conn.identifier_quote();
        let capitalize_types = conn.capitalize_type_names();

        Ok(Self {
            conn,
            fields,
            rows,
            column_info,
            cursor: 0,
            rs_type,
            updatable,
            table,
            pk_indices,
            quote,
            capitalize_types,
            pending: vec![PendingCell::Untouched; column_count],
            on_insert_row: false,
            insert_cells: vec![PendingCell::Untouched; column_count],
            companions: Companions::default(),
            closed: false,
        })
    }

    // ---- metadata -------------------------------------------------------

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.column_info)
    }

    pub fn result_set_type(&self) -> ResultSetType {
        self.rs_type
    }

    pub fn is_updatable(&self) -> bool {
        self.updatable
    }

    /// Declared type name of a column, cased per the connection option.
    pub fn column_type_name(&self, column: usize) -> Result<String> {
        self.field_at(column)
            .map(|f| f.type_name(self.capitalize_types))
    }

    fn field_at(&self, column: usize) -> Result<&Field> {
        self.fields.get(column).ok_or_else(|| {
            Error::usage(
                UsageErrorKind::TypeConversion,
                format!(
                    "column index {column} out of range ({} columns)",
                    self.fields.len()
                ),
            )
        })
    }

    // ---- cursor ---------------------------------------------------------

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::usage(
                UsageErrorKind::InvalidState,
                "result set is closed",
            ));
        }
        Ok(())
    }

    fn check_scrollable(&self) -> Result<()> {
        if self.rs_type == ResultSetType::ForwardOnly {
            return Err(Error::usage(
                UsageErrorKind::Positioning,
                "result set is forward-only",
            ));
        }
        Ok(())
    }

    fn check_not_inserting(&self) -> Result<()> {
        if self.on_insert_row {
            return Err(Error::usage(
                UsageErrorKind::InvalidState,
                "cursor is on the insert row",
            ));
        }
        Ok(())
    }

    fn on_row(&self) -> bool {
        self.cursor >= 1 && self.cursor <= self.rows.len()
    }

    /// Buffer index of the current row, or a positioning error.
    fn current_index(&self) -> Result<usize> {
        if !self.on_row() {
            let position = if self.cursor == 0 {
                "before the first row"
            } else {
                "after the last row"
            };
            return Err(Error::usage(
                UsageErrorKind::Positioning,
                format!("cursor is {position}"),
            ));
        }
        Ok(self.cursor - 1)
    }

    pub fn is_before_first(&self) -> bool {
        self.cursor == 0
    }

    pub fn is_after_last(&self) -> bool {
        self.cursor > self.rows.len()
    }

    /// 1-based row number, 0 when not on a row.
    pub fn row_number(&self) -> usize {
        if self.on_row() { self.cursor } else { 0 }
    }

    /// Advance one row. The only motion a forward-only set allows.
    pub fn next(&mut self) -> Result<bool> {
        self.check_open()?;
        self.check_not_inserting()?;
        if self.cursor <= self.rows.len() {
            self.cursor += 1;
        }
        Ok(self.on_row())
    }

    pub fn previous(&mut self) -> Result<bool> {
        self.check_open()?;
        self.check_scrollable()?;
        self.check_not_inserting()?;
        self.cursor = self.cursor.saturating_sub(1);
        Ok(self.on_row())
    }

    /// Position on an absolute row: positive counts from the front,
    /// negative from the back; out-of-range clamps to the boundary rows.
    /// `absolute(0)` is rejected.
    pub fn absolute(&mut self, position: i64) -> Result<bool> {
        self.check_open()?;
        self.check_scrollable()?;
        self.check_not_inserting()?;
        self.cursor = clamp_absolute(position, self.rows.len()).ok_or_else(|| {
            Error::usage(UsageErrorKind::Positioning, "absolute(0) is not a row")
        })?;
        Ok(self.on_row())
    }

    /// Move relative to the current position, clamping at the boundaries.
    /// `relative(0)` is a no-op.
    pub fn relative(&mut self, offset: i64) -> Result<bool> {
        self.check_open()?;
        self.check_scrollable()?;
        self.check_not_inserting()?;
        self.cursor = clamp_relative(self.cursor, offset, self.rows.len());
        Ok(self.on_row())
    }

    pub fn first(&mut self) -> Result<bool> {
        self.absolute(1)
    }

    pub fn last(&mut self) -> Result<bool> {
        self.absolute(-1)
    }

    pub fn before_first(&mut self) -> Result<()> {
        self.check_open()?;
        self.check_scrollable()?;
        self.check_not_inserting()?;
        self.cursor = 0;
        Ok(())
    }

    pub fn after_last(&mut self) -> Result<()> {
        self.check_open()?;
        self.check_scrollable()?;
        self.check_not_inserting()?;
        self.cursor = self.rows.len() + 1;
        Ok(())
    }

    // ---- row access -----------------------------------------------------

    /// The current row as a shared-metadata [`Row`].
    pub fn row(&self) -> Result<Row> {
        self.check_open()?;
        self.check_not_inserting()?;
        let idx = self.current_index()?;
        Ok(Row::new(
            Arc::clone(&self.column_info),
            self.rows[idx].clone(),
        ))
    }

    pub fn get_bytes(&self, column: usize) -> Result<Option<&[u8]>> {
        self.check_open()?;
        self.check_not_inserting()?;
        let idx = self.current_index()?;
        self.field_at(column)?;
        Ok(self.rows[idx][column].as_deref())
    }

    pub fn get_str(&self, column: usize) -> Result<Option<String>> {
        Ok(self
            .get_bytes(column)?
            .map(|b| String::from_utf8_lossy(b).into_owned()))
    }

    pub fn get_i64(&self, column: usize) -> Result<Option<i64>> {
        self.parse_column(column, "an integer")
    }

    pub fn get_f64(&self, column: usize) -> Result<Option<f64>> {
        self.parse_column(column, "a number")
    }

    pub fn is_null(&self, column: usize) -> Result<bool> {
        Ok(self.get_bytes(column)?.is_none())
    }

    fn parse_column<T: std::str::FromStr>(
        &self,
        column: usize,
        wanted: &str,
    ) -> Result<Option<T>> {
        match self.get_str(column)? {
            None => Ok(None),
            Some(text) => text.trim().parse::<T>().map(Some).map_err(|_| {
                Error::usage(
                    UsageErrorKind::TypeConversion,
                    format!("column {column} value {text:?} is not {wanted}"),
                )
            }),
        }
    }

    // ---- mutation -------------------------------------------------------

    fn check_updatable(&self) -> Result<()> {
        if !self.updatable {
            return Err(Error::usage(
                UsageErrorKind::NotUpdatable,
                "result set is not updatable",
            ));
        }
        Ok(())
    }

    /// Stage a new cell value for the current row (or the insert row).
    pub fn update_value(&mut self, column: usize, cell: Option<Vec<u8>>) -> Result<()> {
        self.check_open()?;
        self.check_updatable()?;
        self.field_at(column)?;
        if self.on_insert_row {
            self.insert_cells[column] = PendingCell::Set(cell);
        } else {
            self.current_index()?;
            self.pending[column] = PendingCell::Set(cell);
        }
        Ok(())
    }

    pub fn update_str(&mut self, column: usize, value: &str) -> Result<()> {
        self.update_value(column, Some(value.as_bytes().to_vec()))
    }

    pub fn update_i64(&mut self, column: usize, value: i64) -> Result<()> {
        self.update_value(column, Some(value.to_string().into_bytes()))
    }

    pub fn update_null(&mut self, column: usize) -> Result<()> {
        self.update_value(column, None)
    }

    /// Stage by column name.
    pub fn update_str_by_name(&mut self, name: &str, value: &str) -> Result<()> {
        let column = self.column_info.index_of(name).ok_or_else(|| {
            Error::usage(
                UsageErrorKind::TypeConversion,
                format!("no column named {name:?}"),
            )
        })?;
        self.update_str(column, value)
    }

    /// Push staged edits to the server, then refresh the row from it.
    ///
    /// The WHERE clause is keyed by the primary-key values captured at
    /// fetch time, so editing a key column before this call still targets
    /// the original row.
    pub fn update_row(&mut self) -> Result<()> {
        self.check_open()?;
        self.check_updatable()?;
        self.check_not_inserting()?;
        let idx = self.current_index()?;

        let mut stmt = match self.companions.update.take() {
            Some(s) => s,
            None => self.build_update_companion()?,
        };
        let bound = self.bind_update(&mut stmt, idx);
        let executed = bound.and_then(|()| stmt.execute_update());
        self.companions.update = Some(stmt);
        executed?;

        self.refresh_row()
    }

    fn bind_update(&self, stmt: &mut PreparedStatement<S>, idx: usize) -> Result<()> {
        for (c, field) in self.fields.iter().enumerate() {
            let cell = match &self.pending[c] {
                PendingCell::Set(v) => v.clone(),
                PendingCell::Untouched => self.rows[idx][c].clone(),
            };
            bind_cell(stmt, c, field, cell.as_deref())?;
        }
        let offset = self.fields.len();
        for (k, &pk) in self.pk_indices.iter().enumerate() {
            bind_cell(stmt, offset + k, &self.fields[pk], self.rows[idx][pk].as_deref())?;
        }
        Ok(())
    }

    /// Re-read the current row from the server, overwriting the buffer.
    ///
    /// An empty refresh result means the row was concurrently deleted or
    /// re-keyed.
    pub fn refresh_row(&mut self) -> Result<()> {
        self.check_open()?;
        self.check_updatable()?;
        self.check_not_inserting()?;
        let idx = self.current_index()?;

        let mut stmt = match self.companions.refresh.take() {
            Some(s) => s,
            None => self.build_refresh_companion()?,
        };
        let bound = self.bind_pk(&mut stmt, 0, idx);
        let executed = bound.and_then(|()| stmt.execute());
        self.companions.refresh = Some(stmt);

        match executed? {
            ExecuteOutcome::Rows(raw) => match raw.rows.into_iter().next() {
                Some(fresh) => {
                    self.rows[idx] = fresh;
                    for cell in &mut self.pending {
                        *cell = PendingCell::Untouched;
                    }
                    Ok(())
                }
                None => Err(Error::usage(
                    UsageErrorKind::InvalidState,
                    "row to refresh was concurrently deleted or re-keyed",
                )),
            },
            ExecuteOutcome::Update(_) => {
                Err(Error::protocol("refresh query returned no result set"))
            }
        }
    }

    /// Delete the current row on the server and drop it from the buffer.
    pub fn delete_row(&mut self) -> Result<()> {
        self.check_open()?;
        self.check_updatable()?;
        self.check_not_inserting()?;
        let idx = self.current_index()?;

        let mut stmt = match self.companions.delete.take() {
            Some(s) => s,
            None => self.build_delete_companion()?,
        };
        let bound = self.bind_pk(&mut stmt, 0, idx);
        let executed = bound.and_then(|()| stmt.execute_update());
        self.companions.delete = Some(stmt);
        executed?;

        self.rows.remove(idx);
        for cell in &mut self.pending {
            *cell = PendingCell::Untouched;
        }
        Ok(())
    }

    /// Enter insert-row mode. The cursor position is kept for
    /// [`ResultSet::move_to_current_row`].
    pub fn move_to_insert_row(&mut self) -> Result<()> {
        self.check_open()?;
        self.check_updatable()?;
        self.on_insert_row = true;
        Ok(())
    }

    /// Leave insert-row mode without inserting.
    pub fn move_to_current_row(&mut self) -> Result<()> {
        self.check_open()?;
        self.on_insert_row = false;
        Ok(())
    }

    /// Insert the staged row, append the synthesized row to the buffer,
    /// and leave insert-row mode.
    ///
    /// When the table has exactly one primary-key column and it is
    /// auto-increment and was left unset, the server-generated id is
    /// substituted into the synthesized row.
    pub fn insert_row(&mut self) -> Result<()> {
        self.check_open()?;
        self.check_updatable()?;
        if !self.on_insert_row {
            return Err(Error::usage(
                UsageErrorKind::InvalidState,
                "not on the insert row",
            ));
        }

        let mut stmt = match self.companions.insert.take() {
            Some(s) => s,
            None => self.build_insert_companion()?,
        };
        let mut bound = Ok(());
        for (c, field) in self.fields.iter().enumerate() {
            let cell = match &self.insert_cells[c] {
                PendingCell::Set(v) => v.clone(),
                PendingCell::Untouched => None,
            };
            bound = bound.and_then(|()| bind_cell(&mut stmt, c, field, cell.as_deref()));
        }
        let executed = bound.and_then(|()| stmt.execute_update());
        // staging slots revert to null for the next insert
        for c in 0..self.fields.len() {
            let _ = stmt.set_null(c);
        }
        self.companions.insert = Some(stmt);
        let update = executed?;

        let mut cells: Vec<Option<Vec<u8>>> = self
            .insert_cells
            .iter()
            .map(|cell| match cell {
                PendingCell::Set(v) => v.clone(),
                PendingCell::Untouched => None,
            })
            .collect();
        if let [pk] = self.pk_indices.as_slice() {
            if self.fields[*pk].is_auto_increment()
                && cells[*pk].is_none()
                && update.last_insert_id != 0
            {
                cells[*pk] = Some(update.last_insert_id.to_string().into_bytes());
            }
        }
        self.rows.push(cells);

        for cell in &mut self.insert_cells {
            *cell = PendingCell::Untouched;
        }
        self.on_insert_row = false;
        Ok(())
    }

    // ---- companion statements -------------------------------------------

    fn quoted(&self, identifier: &str) -> String {
        match self.quote {
            Some(q) => format!("{q}{identifier}{q}"),
            None => identifier.to_string(),
        }
    }

    fn where_clause(&self) -> String {
        let conditions: Vec<String> = self
            .pk_indices
            .iter()
            .map(|&pk| format!("{}=?", self.quoted(&self.fields[pk].name)))
            .collect();
        conditions.join(" AND ")
    }

    fn prepare_companion(&self, sql: &str) -> Result<PreparedStatement<S>> {
        self.conn
            .prepare(sql, ResultSetType::ForwardOnly, Concurrency::ReadOnly)
    }

    fn build_update_companion(&self) -> Result<PreparedStatement<S>> {
        let assignments: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{}=?", self.quoted(&f.name)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.quoted(&self.table),
            assignments.join(","),
            self.where_clause()
        );
        self.prepare_companion(&sql)
    }

    fn build_insert_companion(&self) -> Result<PreparedStatement<S>> {
        let columns: Vec<String> = self
            .fields
            .iter()
            .map(|f| self.quoted(&f.name))
            .collect();
        let placeholders: Vec<&str> = self.fields.iter().map(|_| "?").collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted(&self.table),
            columns.join(","),
            placeholders.join(",")
        );
        self.prepare_companion(&sql)
    }

    fn build_refresh_companion(&self) -> Result<PreparedStatement<S>> {
        let columns: Vec<String> = self
            .fields
            .iter()
            .map(|f| self.quoted(&f.name))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            columns.join(","),
            self.quoted(&self.table),
            self.where_clause()
        );
        self.prepare_companion(&sql)
    }

    fn build_delete_companion(&self) -> Result<PreparedStatement<S>> {
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.quoted(&self.table),
            self.where_clause()
        );
        self.prepare_companion(&sql)
    }

    fn bind_pk(
        &self,
        stmt: &mut PreparedStatement<S>,
        offset: usize,
        idx: usize,
    ) -> Result<()> {
        for (k, &pk) in self.pk_indices.iter().enumerate() {
            bind_cell(stmt, offset + k, &self.fields[pk], self.rows[idx][pk].as_deref())?;
        }
        Ok(())
    }

    /// Release the row buffer. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.rows.clear();
        self.rows.shrink_to_fit();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Bind one buffered cell to a companion statement slot, as a numeric
/// literal when the column type is numeric, quoted otherwise.
fn bind_cell<S: ConnectStream>(
    stmt: &mut PreparedStatement<S>,
    index: usize,
    field: &Field,
    cell: Option<&[u8]>,
) -> Result<()> {
    match cell {
        None => stmt.set_null(index),
        Some(bytes) => {
            let t = field.field_type;
            if t.is_integer() || t.is_float() || matches!(t, FieldType::Decimal | FieldType::NewDecimal)
            {
                stmt.set_value(
                    index,
                    &Value::Decimal(String::from_utf8_lossy(bytes).into_owned()),
                )
            } else {
                stmt.set_bytes(index, bytes)
            }
        }
    }
}

/// Cursor position for `absolute(pos)` over `n` rows; `None` for the
/// rejected `absolute(0)`.
fn clamp_absolute(position: i64, n: usize) -> Option<usize> {
    let n = n as i64;
    match position {
        0 => None,
        p if p > 0 => Some(p.min(n + 1) as usize),
        p => Some((n + 1 + p).max(0) as usize),
    }
}

/// Cursor position for `relative(offset)` from `cursor` over `n` rows.
fn clamp_relative(cursor: usize, offset: i64, n: usize) -> usize {
    (cursor as i64 + offset).clamp(0, n as i64 + 1) as usize
}
