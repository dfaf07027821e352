//! The sequential interpreter: one worker task drains the input queue and
//! walks each state through the policy with a program counter, resolving
//! branch targets by linear label lookup. Composite instructions recurse
//! into their nested code with header projection, implementing lexical
//! scoping; concurrent branches run in declaration order, which is
//! observationally equivalent under the disjoint-write discipline. Table
//! access goes through the same table actors as the pipelined engine.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::error::{EngineError, RuntimeError, RuntimeFault};
use crate::ir::{Code, Instruction, Label, Policy, TableId};
use crate::runtime::exec::{project_header, restore_header};
use crate::runtime::{State, TableEntry};

use super::tables::{dispatch, spawn_tables, TableHandle};
use super::{lock, mark_fault, Engine, Gate, DEFAULT_MAX_IN_FLIGHT};

struct Running {
    in_tx: UnboundedSender<Option<State>>,
    worker: JoinHandle<()>,
    tables: HashMap<TableId, TableHandle>,
    table_tasks: Vec<JoinHandle<()>>,
}

/// Strategy (a): one packet fully processed before the next is dequeued.
pub struct SequentialEngine {
    runtime: Runtime,
    policy: Arc<Policy>,
    gate: Arc<Gate>,
    running: Mutex<Option<Running>>,
    out_rx: Mutex<Option<UnboundedReceiver<State>>>,
    fault_rx: Mutex<Option<UnboundedReceiver<RuntimeFault>>>,
}

impl SequentialEngine {
    pub fn new(policy: Policy) -> Result<Self, EngineError> {
        Self::with_capacity(policy, DEFAULT_MAX_IN_FLIGHT)
    }

    /// Build with an explicit in-flight cap (the `put` admission limit).
    pub fn with_capacity(policy: Policy, max_in_flight: usize) -> Result<Self, EngineError> {
        policy.validate().map_err(EngineError::Invalid)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .build()
            .map_err(|e| EngineError::RuntimeInit(e.to_string()))?;
        Ok(SequentialEngine {
            runtime,
            policy: Arc::new(policy),
            gate: Arc::new(Gate::new(max_in_flight)),
            running: Mutex::new(None),
            out_rx: Mutex::new(None),
            fault_rx: Mutex::new(None),
        })
    }

    fn table_handle(&self, table: &TableId) -> Result<TableHandle, EngineError> {
        let running = lock(&self.running);
        let running = running.as_ref().ok_or(EngineError::NotStarted)?;
        running
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| EngineError::Table(RuntimeError::UnknownTable(table.clone())))
    }
}

impl Engine for SequentialEngine {
    fn start(&self) -> Result<(), EngineError> {
        let mut running = lock(&self.running);
        if running.is_some() {
            return Err(EngineError::AlreadyStarted);
        }
        let handle = self.runtime.handle();
        let (tables, table_tasks) = spawn_tables(handle, &self.policy.decls);
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let worker = handle.spawn(worker_loop(
            self.policy.clone(),
            tables.clone(),
            in_rx,
            out_tx,
            fault_tx,
            self.gate.clone(),
        ));
        *lock(&self.out_rx) = Some(out_rx);
        *lock(&self.fault_rx) = Some(fault_rx);
        *running = Some(Running {
            in_tx,
            worker,
            tables,
            table_tasks,
        });
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        let running = lock(&self.running).take().ok_or(EngineError::NotStarted)?;
        self.gate.wait_idle();
        let _ = running.in_tx.send(None);
        self.runtime.block_on(async {
            let _ = running.worker.await;
            for handle in running.tables.values() {
                handle.shutdown();
            }
            for task in running.table_tasks {
                let _ = task.await;
            }
        });
        Ok(())
    }

    fn put(&self, state: State) -> Result<(), EngineError> {
        let in_tx = {
            let running = lock(&self.running);
            running
                .as_ref()
                .ok_or(EngineError::NotStarted)?
                .in_tx
                .clone()
        };
        self.gate.acquire();
        if in_tx.send(Some(state)).is_err() {
            self.gate.release();
            return Err(EngineError::Stopped);
        }
        Ok(())
    }

    fn get(&self) -> Result<State, EngineError> {
        let mut guard = lock(&self.out_rx);
        let rx = guard.as_mut().ok_or(EngineError::NotStarted)?;
        rx.blocking_recv().ok_or(EngineError::Stopped)
    }

    fn add_table_entry(
        &self,
        table: &TableId,
        index: i64,
        entry: &TableEntry,
    ) -> Result<(), EngineError> {
        let handle = self.table_handle(table)?;
        self.runtime
            .block_on(handle.add_entry(index, entry.clone()))
            .map_err(EngineError::Table)
    }

    fn del_table_entry(&self, table: &TableId, index: i64) -> Result<(), EngineError> {
        let handle = self.table_handle(table)?;
        self.runtime
            .block_on(handle.del_entry(index))
            .map_err(EngineError::Table)
    }

    fn query_table_entry(&self, table: &TableId, index: i64) -> Result<TableEntry, EngineError> {
        let handle = self.table_handle(table)?;
        self.runtime
            .block_on(handle.query_entry(index))
            .map_err(EngineError::Table)
    }

    fn query_table_list(&self) -> Vec<TableId> {
        self.policy.decls.ids()
    }

    fn take_faults(&self) -> Vec<RuntimeFault> {
        let mut guard = lock(&self.fault_rx);
        let mut faults = Vec::new();
        if let Some(rx) = guard.as_mut() {
            while let Ok(fault) = rx.try_recv() {
                faults.push(fault);
            }
        }
        faults
    }
}

async fn worker_loop(
    policy: Arc<Policy>,
    tables: HashMap<TableId, TableHandle>,
    mut in_rx: UnboundedReceiver<Option<State>>,
    out_tx: UnboundedSender<State>,
    fault_tx: UnboundedSender<RuntimeFault>,
    gate: Arc<Gate>,
) {
    while let Some(message) = in_rx.recv().await {
        let Some(mut state) = message else { break };
        if let Err(fault) = run_code(&policy.code, &tables, &mut state).await {
            mark_fault(&mut state, &fault.error);
            let _ = fault_tx.send(fault);
        }
        let _ = out_tx.send(state);
        gate.release();
    }
}

fn fault_at(instr: &Instruction, error: RuntimeError) -> RuntimeFault {
    RuntimeFault {
        context: instr.to_string(),
        error,
    }
}

/// Recursive program-counter walk over one code block.
fn run_code<'a>(
    code: &'a Code,
    tables: &'a HashMap<TableId, TableHandle>,
    state: &'a mut State,
) -> Pin<Box<dyn Future<Output = Result<(), RuntimeFault>> + Send + 'a>> {
    Box::pin(async move {
        let mut pc = 0usize;
        loop {
            let instr = code.instructions.get(pc).ok_or_else(|| RuntimeFault {
                context: format!("pc {}", pc),
                error: RuntimeError::Internal("program counter ran past the end".to_string()),
            })?;
            match instr {
                Instruction::Hlt => {
                    state.label = Label::fall_through();
                    break;
                }
                Instruction::Atm(inner) | Instruction::Seq(inner) => {
                    run_scoped(inner, tables, state).await?;
                }
                Instruction::Cnc(codes) => {
                    for inner in codes {
                        run_scoped(inner, tables, state).await?;
                    }
                }
                _ => dispatch(instr, tables, state)
                    .await
                    .map_err(|e| fault_at(instr, e))?,
            }
            if state.label.is_fall_through() {
                pc += 1;
            } else {
                // Jumps land on the LBL itself; executing it is a no-op.
                let target = code.find_label(&state.label).ok_or_else(|| {
                    fault_at(instr, RuntimeError::UnknownLabel(state.label.clone()))
                })?;
                pc = target;
                state.label = Label::fall_through();
            }
        }
        Ok(())
    })
}

/// Run a nested code block under header projection: the inner scope sees its
/// argument fields plus the reserved fields, and commits the same set back.
async fn run_scoped(
    inner: &Code,
    tables: &HashMap<TableId, TableHandle>,
    state: &mut State,
) -> Result<(), RuntimeFault> {
    let scope_fault = |error: RuntimeError| RuntimeFault {
        context: "scope projection".to_string(),
        error,
    };
    let projected = project_header(&state.header, &inner.argument_fields).map_err(scope_fault)?;
    let outer = std::mem::replace(&mut state.header, projected);
    let result = run_code(inner, tables, state).await;
    let inner_header = std::mem::replace(&mut state.header, outer);
    match result {
        Ok(()) => {
            restore_header(&mut state.header, &inner_header, &inner.argument_fields, false)
                .map_err(scope_fault)?;
            state.label = Label::fall_through();
            Ok(())
        }
        Err(fault) => {
            // Best-effort restore around an already-faulted state.
            let _ =
                restore_header(&mut state.header, &inner_header, &inner.argument_fields, true);
            Err(fault)
        }
    }
}
