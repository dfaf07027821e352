//! Table row storage, shared by both engines through the table actors.
//!
//! Rows are positional in declaration order. Simple rows hold exact values;
//! match rows hold value/mask pairs and start with an all-ones mask. Lookup
//! is a linear scan in row order — declaration order is priority — and a
//! match row matches when every column satisfies `stored == probe & mask`.

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::ir::{Field, Mask, MatchKind, Size, Table, TableFields, TableId, Value};

/// One table-row cell as exchanged with the controller bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryValue {
    pub value: i64,
    pub size: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub mask: Option<i64>,
}

/// One table row as exchanged with the controller bridge, in declaration
/// order. `add_entry` accepts a subset of the declared fields; `query_entry`
/// returns all of them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub fields: Vec<(String, EntryValue)>,
}

impl TableEntry {
    pub fn new() -> Self {
        TableEntry::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: i64) -> Self {
        self.fields.push((
            field.into(),
            EntryValue {
                value,
                size: 0,
                mask: None,
            },
        ));
        self
    }

    pub fn set_masked(mut self, field: impl Into<String>, value: i64, mask: i64) -> Self {
        self.fields.push((
            field.into(),
            EntryValue {
                value,
                size: 0,
                mask: Some(mask),
            },
        ));
        self
    }

    pub fn get(&self, field: &str) -> Option<&EntryValue> {
        self.fields.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }
}

/// The instantiated rows of one table.
#[derive(Clone, Debug)]
pub enum Rows {
    Simple {
        fields: Vec<(Field, Size)>,
        rows: Vec<Vec<Value>>,
    },
    Match {
        fields: Vec<(Field, Size, MatchKind)>,
        rows: Vec<Vec<(Value, Mask)>>,
    },
}

impl Rows {
    /// Instantiate zeroed rows from a declaration. Match rows start with an
    /// all-ones mask so an unpopulated row only matches a zero probe.
    pub fn from_decl(table: &Table) -> Self {
        match &table.fields {
            TableFields::Simple(fields) => Rows::Simple {
                fields: fields.clone(),
                rows: (0..table.entries)
                    .map(|_| fields.iter().map(|(_, size)| Value::new(0, *size)).collect())
                    .collect(),
            },
            TableFields::Match(fields) => Rows::Match {
                fields: fields.clone(),
                rows: (0..table.entries)
                    .map(|_| {
                        fields
                            .iter()
                            .map(|(_, size, _)| (Value::new(0, *size), Mask(-1)))
                            .collect()
                    })
                    .collect(),
            },
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Rows::Simple { rows, .. } => rows.len(),
            Rows::Match { rows, .. } => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn arity(&self) -> usize {
        match self {
            Rows::Simple { fields, .. } => fields.len(),
            Rows::Match { fields, .. } => fields.len(),
        }
    }

    fn check_index(&self, table: &TableId, index: i64) -> Result<usize, RuntimeError> {
        if index < 0 || index as usize >= self.len() {
            return Err(RuntimeError::TableIndexOutOfRange {
                table: table.clone(),
                index,
                len: self.len(),
            });
        }
        Ok(index as usize)
    }

    /// Controller-facing: update the named fields of one row. Values keep
    /// their declared sizes; unnamed fields are left alone.
    pub fn add_entry(
        &mut self,
        table: &TableId,
        index: i64,
        entry: &TableEntry,
    ) -> Result<(), RuntimeError> {
        let i = self.check_index(table, index)?;
        for (name, cell) in &entry.fields {
            let field = Field::new(name.clone());
            match self {
                Rows::Simple { fields, rows } => {
                    if cell.mask.is_some() {
                        return Err(RuntimeError::OperandKind {
                            detail: format!("masked entry for simple-field table '{}'", table),
                        });
                    }
                    let pos = fields
                        .iter()
                        .position(|(f, _)| f == &field)
                        .ok_or(RuntimeError::MissingField(field))?;
                    rows[i][pos].value = cell.value;
                }
                Rows::Match { fields, rows } => {
                    let pos = fields
                        .iter()
                        .position(|(f, _, _)| f == &field)
                        .ok_or(RuntimeError::MissingField(field))?;
                    rows[i][pos].0.value = cell.value;
                    rows[i][pos].1 = Mask(cell.mask.unwrap_or(-1));
                }
            }
        }
        Ok(())
    }

    /// Controller-facing: reset one row to its fresh contents.
    pub fn del_entry(&mut self, table: &TableId, index: i64) -> Result<(), RuntimeError> {
        let i = self.check_index(table, index)?;
        match self {
            Rows::Simple { rows, .. } => {
                for value in &mut rows[i] {
                    value.value = 0;
                }
            }
            Rows::Match { rows, .. } => {
                for (value, mask) in &mut rows[i] {
                    value.value = 0;
                    *mask = Mask(-1);
                }
            }
        }
        Ok(())
    }

    /// Controller-facing: read one full row.
    pub fn query_entry(&self, table: &TableId, index: i64) -> Result<TableEntry, RuntimeError> {
        let i = self.check_index(table, index)?;
        let mut entry = TableEntry::new();
        match self {
            Rows::Simple { fields, rows } => {
                for ((field, size), value) in fields.iter().zip(&rows[i]) {
                    entry.fields.push((
                        field.as_str().to_string(),
                        EntryValue {
                            value: value.value,
                            size: size.0,
                            mask: None,
                        },
                    ));
                }
            }
            Rows::Match { fields, rows } => {
                for ((field, size, _), (value, mask)) in fields.iter().zip(&rows[i]) {
                    entry.fields.push((
                        field.as_str().to_string(),
                        EntryValue {
                            value: value.value,
                            size: size.0,
                            mask: Some(mask.0),
                        },
                    ));
                }
            }
        }
        Ok(entry)
    }

    /// Engine-facing: the row's values, positionally (mask dropped for match
    /// rows).
    pub fn read_values(&self, table: &TableId, index: i64) -> Result<Vec<Value>, RuntimeError> {
        let i = self.check_index(table, index)?;
        Ok(match self {
            Rows::Simple { rows, .. } => rows[i].clone(),
            Rows::Match { rows, .. } => rows[i].iter().map(|(v, _)| *v).collect(),
        })
    }

    /// Engine-facing: overwrite the row's values, positionally. Stored cells
    /// keep their declared sizes; match rows take the instruction's masks.
    pub fn write_values(
        &mut self,
        table: &TableId,
        index: i64,
        values: &[Value],
        masks: Option<&[Mask]>,
    ) -> Result<(), RuntimeError> {
        let i = self.check_index(table, index)?;
        if values.len() != self.arity() {
            return Err(RuntimeError::OperandKind {
                detail: format!(
                    "table '{}' row has {} fields but {} values were written",
                    table,
                    self.arity(),
                    values.len()
                ),
            });
        }
        match (self, masks) {
            (Rows::Simple { rows, .. }, None) => {
                for (cell, incoming) in rows[i].iter_mut().zip(values) {
                    cell.value = incoming.value;
                }
            }
            (Rows::Match { rows, .. }, Some(masks)) => {
                for ((cell, incoming), mask) in rows[i].iter_mut().zip(values).zip(masks) {
                    cell.0.value = incoming.value;
                    cell.1 = *mask;
                }
            }
            _ => {
                return Err(RuntimeError::OperandKind {
                    detail: format!("source kind does not fit table '{}'", table),
                })
            }
        }
        Ok(())
    }

    /// Engine-facing: bump every column of one row.
    pub fn increment(&mut self, table: &TableId, index: i64) -> Result<(), RuntimeError> {
        let i = self.check_index(table, index)?;
        match self {
            Rows::Simple { rows, .. } => {
                for value in &mut rows[i] {
                    value.value = value.value.wrapping_add(1);
                }
            }
            Rows::Match { rows, .. } => {
                for (value, _) in &mut rows[i] {
                    value.value = value.value.wrapping_add(1);
                }
            }
        }
        Ok(())
    }

    /// Engine-facing: first matching row in declaration order, or NoMatch.
    pub fn lookup(&self, table: &TableId, probes: &[Value]) -> Result<usize, RuntimeError> {
        if probes.len() != self.arity() {
            return Err(RuntimeError::OperandKind {
                detail: format!(
                    "table '{}' row has {} fields but {} probes were given",
                    table,
                    self.arity(),
                    probes.len()
                ),
            });
        }
        match self {
            Rows::Simple { rows, .. } => {
                for (i, row) in rows.iter().enumerate() {
                    if row
                        .iter()
                        .zip(probes)
                        .all(|(cell, probe)| cell.value == probe.value)
                    {
                        return Ok(i);
                    }
                }
            }
            Rows::Match { rows, .. } => {
                for (i, row) in rows.iter().enumerate() {
                    if row
                        .iter()
                        .zip(probes)
                        .all(|((cell, mask), probe)| cell.value == probe.value & mask.0)
                    {
                        return Ok(i);
                    }
                }
            }
        }
        Err(RuntimeError::NoMatch)
    }
}
