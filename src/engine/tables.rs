//! Table actors: one task per declared table, owning its rows for the
//! policy's lifetime. Engine workers and the controller facade talk to it
//! through a request channel; every request carries its own oneshot reply
//! sender, so concurrent callers always receive the response to their own
//! request. Per-table serialization is the whole concurrency story — no
//! locks anywhere.

use std::collections::HashMap;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::RuntimeError;
use crate::ir::{Decls, Instruction, Mask, TableId, Value};
use crate::runtime::exec::{apply_row, execute_simple, operand_value, resolve_row};
use crate::runtime::{Rows, State, TableEntry};

pub(crate) enum TableRequest {
    AddEntry {
        index: i64,
        entry: TableEntry,
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
    DelEntry {
        index: i64,
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
    QueryEntry {
        index: i64,
        reply: oneshot::Sender<Result<TableEntry, RuntimeError>>,
    },
    ReadRow {
        index: i64,
        reply: oneshot::Sender<Result<Vec<Value>, RuntimeError>>,
    },
    WriteRow {
        index: i64,
        values: Vec<Value>,
        masks: Option<Vec<Mask>>,
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Increment {
        index: i64,
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
    Lookup {
        probes: Vec<Value>,
        reply: oneshot::Sender<Result<usize, RuntimeError>>,
    },
    Shutdown,
}

fn actor_gone() -> RuntimeError {
    RuntimeError::Internal("table actor is gone".to_string())
}

/// A client handle to one table actor. Cheap to clone; every instruction
/// worker touching the table holds one.
#[derive(Clone)]
pub(crate) struct TableHandle {
    tx: mpsc::UnboundedSender<TableRequest>,
}

impl TableHandle {
    pub(crate) async fn add_entry(
        &self,
        index: i64,
        entry: TableEntry,
    ) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TableRequest::AddEntry {
                index,
                entry,
                reply,
            })
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())?
    }

    pub(crate) async fn del_entry(&self, index: i64) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TableRequest::DelEntry { index, reply })
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())?
    }

    pub(crate) async fn query_entry(&self, index: i64) -> Result<TableEntry, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TableRequest::QueryEntry { index, reply })
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())?
    }

    pub(crate) async fn read_row(&self, index: i64) -> Result<Vec<Value>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TableRequest::ReadRow { index, reply })
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())?
    }

    pub(crate) async fn write_row(
        &self,
        index: i64,
        values: Vec<Value>,
        masks: Option<Vec<Mask>>,
    ) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TableRequest::WriteRow {
                index,
                values,
                masks,
                reply,
            })
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())?
    }

    pub(crate) async fn increment(&self, index: i64) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TableRequest::Increment { index, reply })
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())?
    }

    pub(crate) async fn lookup(&self, probes: Vec<Value>) -> Result<usize, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TableRequest::Lookup { probes, reply })
            .map_err(|_| actor_gone())?;
        rx.await.map_err(|_| actor_gone())?
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(TableRequest::Shutdown);
    }
}

/// Instantiate every declared table as an actor on `rt`.
pub(crate) fn spawn_tables(
    rt: &Handle,
    decls: &Decls,
) -> (HashMap<TableId, TableHandle>, Vec<JoinHandle<()>>) {
    let mut handles = HashMap::new();
    let mut tasks = Vec::new();
    for (id, decl) in &decls.tables {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rows = Rows::from_decl(decl);
        let table_id = id.clone();
        tasks.push(rt.spawn(async move {
            while let Some(request) = rx.recv().await {
                match request {
                    TableRequest::AddEntry {
                        index,
                        entry,
                        reply,
                    } => {
                        let _ = reply.send(rows.add_entry(&table_id, index, &entry));
                    }
                    TableRequest::DelEntry { index, reply } => {
                        let _ = reply.send(rows.del_entry(&table_id, index));
                    }
                    TableRequest::QueryEntry { index, reply } => {
                        let _ = reply.send(rows.query_entry(&table_id, index));
                    }
                    TableRequest::ReadRow { index, reply } => {
                        let _ = reply.send(rows.read_values(&table_id, index));
                    }
                    TableRequest::WriteRow {
                        index,
                        values,
                        masks,
                        reply,
                    } => {
                        let _ =
                            reply.send(rows.write_values(&table_id, index, &values, masks.as_deref()));
                    }
                    TableRequest::Increment { index, reply } => {
                        let _ = reply.send(rows.increment(&table_id, index));
                    }
                    TableRequest::Lookup { probes, reply } => {
                        let _ = reply.send(rows.lookup(&table_id, &probes));
                    }
                    TableRequest::Shutdown => break,
                }
            }
        }));
        handles.insert(id.clone(), TableHandle { tx });
    }
    (handles, tasks)
}

/// Execute one non-composite instruction, routing table access through the
/// actors. Shared by the sequential interpreter and the pipeline workers.
pub(crate) async fn dispatch(
    instr: &Instruction,
    tables: &HashMap<TableId, TableHandle>,
    state: &mut State,
) -> Result<(), RuntimeError> {
    use crate::ir::Label;

    let handle_for = |table: &TableId| {
        tables
            .get(table)
            .ok_or_else(|| RuntimeError::UnknownTable(table.clone()))
    };

    match instr {
        Instruction::Ldt { dsts, table, index } => {
            let index = operand_value(&state.header, index)?.value;
            let row = handle_for(table)?.read_row(index).await?;
            apply_row(&mut state.header, dsts, &row)?;
            state.label = Label::fall_through();
        }
        Instruction::Stt { table, index, srcs } => {
            let index = operand_value(&state.header, index)?.value;
            let (values, masks) = resolve_row(&state.header, srcs)?;
            handle_for(table)?.write_row(index, values, masks).await?;
            state.label = Label::fall_through();
        }
        Instruction::Inct { table, index } => {
            let index = operand_value(&state.header, index)?.value;
            handle_for(table)?.increment(index).await?;
            state.label = Label::fall_through();
        }
        Instruction::Lkt { dst, table, srcs } => {
            let probes = srcs
                .iter()
                .map(|s| operand_value(&state.header, s))
                .collect::<Result<Vec<_>, _>>()?;
            let found = match handle_for(table)?.lookup(probes).await {
                Ok(i) => i as i64,
                // A miss is the documented −1 sentinel, not a fault.
                Err(RuntimeError::NoMatch) => -1,
                Err(e) => return Err(e),
            };
            let slot = state
                .header
                .get_mut(dst)
                .ok_or_else(|| RuntimeError::MissingField(dst.clone()))?;
            slot.value = found;
            state.label = Label::fall_through();
        }
        other => execute_simple(other, state)?,
    }
    Ok(())
}
