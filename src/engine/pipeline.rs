//! The pipelined actor interpreter: the CFG compiled into a persistent
//! network with one worker task per instruction, each owning an input
//! channel and a set of output channels keyed by the label that selects the
//! edge. A state moves stage to stage by ownership transfer; many states
//! occupy different stages simultaneously while one state's path through a
//! linear chain stays strictly ordered.
//!
//! Composite instructions become group stages realizing the three
//! composition disciplines:
//!
//! - **ATM** — one wrapper owns an inner sub-pipeline, projects the header,
//!   forwards the state, blocks for the result, restores, and only then
//!   accepts its next input.
//! - **SEQ** — the same projection split across separate ingress and egress
//!   stages linked by a side channel of saved outer headers, so the inner
//!   pipeline can hold several states at once. Saved headers are keyed by
//!   ticket, which keeps pairing exact even when a faulted state leaves the
//!   inner pipeline early.
//! - **CNC** — the state is projected independently into one sub-pipeline
//!   per branch; the egress merges results back by writing only the fields,
//!   reserved fields, and packet spans each branch is statically known to
//!   modify. Overlapping writes across branches are a caller bug by
//!   construction.
//!
//! A worker that faults stamps the state and sends it straight to its
//! pipeline's output; ticket-keyed pairing at the group egresses absorbs the
//! resulting reordering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use petgraph::visit::EdgeRef;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::cfg::Cfg;
use crate::error::{EngineError, PolicyError, RuntimeError, RuntimeFault};
use crate::ir::{
    modified_fields, modified_locations, modified_reserved_fields, Code, Field, Instruction,
    Label, Policy, TableId,
};
use crate::runtime::exec::{project_header, restore_header};
use crate::runtime::{Header, State, TableEntry};

use super::tables::{dispatch, spawn_tables, TableHandle};
use super::{lock, mark_fault, Engine, Gate, DEFAULT_MAX_IN_FLIGHT};

// ─── Messages ──────────────────────────────────────────────────────

/// The unit handed between stages. Tickets are pushed by SEQ/CNC ingresses
/// and popped by the matching egress, one level per nesting depth.
#[derive(Clone, Debug)]
struct Envelope {
    state: State,
    tickets: Vec<u64>,
    failed: bool,
}

impl Envelope {
    fn new(state: State) -> Box<Self> {
        Box::new(Envelope {
            state,
            tickets: Vec::new(),
            failed: false,
        })
    }

    fn fail(&mut self, error: &RuntimeError) {
        mark_fault(&mut self.state, error);
        self.failed = true;
    }
}

/// `None` is the poison message requesting worker termination.
type Msg = Option<Box<Envelope>>;

type Outputs = HashMap<Label, UnboundedSender<Msg>>;

// ─── Network assembly ──────────────────────────────────────────────

/// One compiled sub-network: its ingress, its egress (owned by whoever
/// consumes results), and the handles needed to poison and join it.
struct Net {
    input: UnboundedSender<Msg>,
    out_rx: UnboundedReceiver<Msg>,
    stage_txs: Vec<UnboundedSender<Msg>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Poison every stage of a sub-network and join its workers. Group stages
/// shut their own inner networks down before their task completes.
async fn shutdown_net(stage_txs: Vec<UnboundedSender<Msg>>, tasks: Vec<JoinHandle<()>>) {
    for tx in &stage_txs {
        let _ = tx.send(None);
    }
    for task in tasks {
        let _ = task.await;
    }
}

/// Compile `code`'s CFG into a persistent worker network.
fn build_net(
    rt: &Handle,
    code: &Code,
    tables: Arc<HashMap<TableId, TableHandle>>,
    fault_tx: UnboundedSender<RuntimeFault>,
) -> Result<Net, PolicyError> {
    let cfg = Cfg::build(code)?;
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Msg>();

    // One channel per materialized instruction.
    let mut txs: HashMap<usize, UnboundedSender<Msg>> = HashMap::new();
    let mut rxs: HashMap<usize, UnboundedReceiver<Msg>> = HashMap::new();
    for &node in &cfg.blocks {
        for &i in &cfg.graph[node].instrs {
            let (tx, rx) = mpsc::unbounded_channel();
            txs.insert(i, tx);
            rxs.insert(i, rx);
        }
    }

    // Wiring: within a block each worker feeds the next through the
    // fall-through label; a block's last worker feeds the CFG edges, keyed
    // by their selecting labels; the $exit edge feeds the network output.
    let mut outputs: HashMap<usize, Outputs> = HashMap::new();
    for &node in &cfg.blocks {
        let instrs = &cfg.graph[node].instrs;
        for pair in instrs.windows(2) {
            outputs
                .entry(pair[0])
                .or_default()
                .insert(Label::fall_through(), txs[&pair[1]].clone());
        }
        if let Some(&last) = instrs.last() {
            for edge in cfg.graph.edges(node) {
                let tx = if edge.target() == cfg.exit {
                    out_tx.clone()
                } else {
                    txs[&cfg.graph[edge.target()].instrs[0]].clone()
                };
                outputs.entry(last).or_default().insert(edge.weight().clone(), tx);
            }
        }
    }

    let first_block = cfg
        .graph
        .edges(cfg.entry)
        .next()
        .map(|e| e.target())
        .ok_or(PolicyError::EmptyCode)?;
    let input = txs[&cfg.graph[first_block].instrs[0]].clone();

    let mut stage_txs = Vec::new();
    let mut tasks = Vec::new();
    for &node in &cfg.blocks {
        for &i in &cfg.graph[node].instrs {
            let rx = match rxs.remove(&i) {
                Some(rx) => rx,
                None => continue,
            };
            stage_txs.push(txs[&i].clone());
            let outs = outputs.remove(&i).unwrap_or_default();
            match code.instructions[i].clone() {
                Instruction::Atm(inner) => spawn_atomic(
                    rt,
                    *inner,
                    rx,
                    outs,
                    out_tx.clone(),
                    fault_tx.clone(),
                    tables.clone(),
                    &mut tasks,
                )?,
                Instruction::Seq(inner) => spawn_sequential_group(
                    rt,
                    *inner,
                    rx,
                    outs,
                    out_tx.clone(),
                    fault_tx.clone(),
                    tables.clone(),
                    &mut tasks,
                )?,
                Instruction::Cnc(codes) => spawn_concurrent_group(
                    rt,
                    codes,
                    rx,
                    outs,
                    out_tx.clone(),
                    fault_tx.clone(),
                    tables.clone(),
                    &mut tasks,
                )?,
                instr => {
                    tasks.push(rt.spawn(instruction_worker(
                        instr,
                        tables.clone(),
                        rx,
                        outs,
                        out_tx.clone(),
                        fault_tx.clone(),
                    )));
                }
            }
        }
    }

    Ok(Net {
        input,
        out_rx,
        stage_txs,
        tasks,
    })
}

// ─── Stage workers ─────────────────────────────────────────────────

/// The per-instruction worker: receive, execute, route by the taken label.
/// On a fault the state is stamped and escapes to the network output.
async fn instruction_worker(
    instr: Instruction,
    tables: Arc<HashMap<TableId, TableHandle>>,
    mut rx: UnboundedReceiver<Msg>,
    outputs: Outputs,
    exit_tx: UnboundedSender<Msg>,
    fault_tx: UnboundedSender<RuntimeFault>,
) {
    while let Some(message) = rx.recv().await {
        let Some(mut env) = message else { break };
        match dispatch(&instr, &tables, &mut env.state).await {
            Ok(()) => {
                let label = std::mem::replace(&mut env.state.label, Label::fall_through());
                match outputs.get(&label) {
                    Some(tx) => {
                        let _ = tx.send(Some(env));
                    }
                    None => {
                        let error = RuntimeError::UnknownLabel(label);
                        let _ = fault_tx.send(RuntimeFault {
                            context: instr.to_string(),
                            error: error.clone(),
                        });
                        env.fail(&error);
                        let _ = exit_tx.send(Some(env));
                    }
                }
            }
            Err(error) => {
                let _ = fault_tx.send(RuntimeFault {
                    context: instr.to_string(),
                    error: error.clone(),
                });
                env.fail(&error);
                let _ = exit_tx.send(Some(env));
            }
        }
    }
}

/// Route a finished group result: failed states escape to the network
/// output, everything else takes the fall-through edge.
fn route_group_result(
    mut env: Box<Envelope>,
    outputs: &Outputs,
    exit_tx: &UnboundedSender<Msg>,
    fault_tx: &UnboundedSender<RuntimeFault>,
    context: &str,
) {
    env.state.label = Label::fall_through();
    if env.failed {
        let _ = exit_tx.send(Some(env));
        return;
    }
    match outputs.get(&Label::fall_through()) {
        Some(tx) => {
            let _ = tx.send(Some(env));
        }
        None => {
            let error = RuntimeError::Internal(format!("{}: no fall-through channel", context));
            let _ = fault_tx.send(RuntimeFault {
                context: context.to_string(),
                error: error.clone(),
            });
            env.fail(&error);
            let _ = exit_tx.send(Some(env));
        }
    }
}

/// ATM: indivisible from the outer network's view — the wrapper holds its
/// next input until the inner network has fully finished the current state.
#[allow(clippy::too_many_arguments)]
fn spawn_atomic(
    rt: &Handle,
    code: Code,
    mut rx: UnboundedReceiver<Msg>,
    outputs: Outputs,
    exit_tx: UnboundedSender<Msg>,
    fault_tx: UnboundedSender<RuntimeFault>,
    tables: Arc<HashMap<TableId, TableHandle>>,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Result<(), PolicyError> {
    let net = build_net(rt, &code, tables, fault_tx.clone())?;
    let Net {
        input: inner_input,
        mut out_rx,
        stage_txs,
        tasks: inner_tasks,
    } = net;
    let args = code.argument_fields;

    tasks.push(rt.spawn(async move {
        while let Some(message) = rx.recv().await {
            let Some(mut env) = message else { break };
            let projected = match project_header(&env.state.header, &args) {
                Ok(header) => header,
                Err(error) => {
                    let _ = fault_tx.send(RuntimeFault {
                        context: "ATM ingress".to_string(),
                        error: error.clone(),
                    });
                    env.fail(&error);
                    let _ = exit_tx.send(Some(env));
                    continue;
                }
            };
            let outer = std::mem::replace(&mut env.state.header, projected);
            let _ = inner_input.send(Some(env));
            let Some(Some(mut result)) = out_rx.recv().await else {
                // The inner network died under us; nothing sane to emit.
                break;
            };
            let inner_header = std::mem::replace(&mut result.state.header, outer);
            if result.failed {
                let _ = restore_header(&mut result.state.header, &inner_header, &args, true);
            } else if let Err(error) =
                restore_header(&mut result.state.header, &inner_header, &args, false)
            {
                let _ = fault_tx.send(RuntimeFault {
                    context: "ATM egress".to_string(),
                    error: error.clone(),
                });
                result.fail(&error);
            }
            route_group_result(result, &outputs, &exit_tx, &fault_tx, "ATM");
        }
        shutdown_net(stage_txs, inner_tasks).await;
    }));
    Ok(())
}

/// SEQ ingress/egress pair around one inner network. The side channel
/// carries `(ticket, saved outer header)`; the egress restores by ticket.
#[allow(clippy::too_many_arguments)]
fn spawn_sequential_group(
    rt: &Handle,
    code: Code,
    mut rx: UnboundedReceiver<Msg>,
    outputs: Outputs,
    exit_tx: UnboundedSender<Msg>,
    fault_tx: UnboundedSender<RuntimeFault>,
    tables: Arc<HashMap<TableId, TableHandle>>,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Result<(), PolicyError> {
    let net = build_net(rt, &code, tables, fault_tx.clone())?;
    let Net {
        input: inner_input,
        out_rx: mut inner_out,
        stage_txs,
        tasks: inner_tasks,
    } = net;
    let args = code.argument_fields;
    let (meta_tx, mut meta_rx) = mpsc::unbounded_channel::<(u64, Header)>();

    // Ingress: save the outer header, project, feed the inner network.
    let ingress_fault = fault_tx.clone();
    let ingress_exit = exit_tx.clone();
    let ingress_args = args.clone();
    tasks.push(rt.spawn(async move {
        let mut next_ticket = 0u64;
        while let Some(message) = rx.recv().await {
            let Some(mut env) = message else { break };
            match project_header(&env.state.header, &ingress_args) {
                Ok(projected) => {
                    let outer = std::mem::replace(&mut env.state.header, projected);
                    let ticket = next_ticket;
                    next_ticket += 1;
                    env.tickets.push(ticket);
                    let _ = meta_tx.send((ticket, outer));
                    let _ = inner_input.send(Some(env));
                }
                Err(error) => {
                    let _ = ingress_fault.send(RuntimeFault {
                        context: "SEQ ingress".to_string(),
                        error: error.clone(),
                    });
                    env.fail(&error);
                    let _ = ingress_exit.send(Some(env));
                }
            }
        }
        drop(meta_tx);
        shutdown_net(stage_txs, inner_tasks).await;
    }));

    // Egress: pair inner results with their saved headers and restore.
    tasks.push(rt.spawn(async move {
        let mut saved: HashMap<u64, Header> = HashMap::new();
        while let Some(message) = inner_out.recv().await {
            let Some(mut env) = message else { continue };
            let outer = match env.tickets.pop() {
                Some(ticket) => loop {
                    if let Some(header) = saved.remove(&ticket) {
                        break Some(header);
                    }
                    match meta_rx.recv().await {
                        Some((t, header)) => {
                            saved.insert(t, header);
                        }
                        None => break None,
                    }
                },
                None => None,
            };
            let Some(outer) = outer else {
                let error =
                    RuntimeError::Internal("SEQ egress lost its saved header".to_string());
                let _ = fault_tx.send(RuntimeFault {
                    context: "SEQ egress".to_string(),
                    error: error.clone(),
                });
                env.fail(&error);
                let _ = exit_tx.send(Some(env));
                continue;
            };
            let inner_header = std::mem::replace(&mut env.state.header, outer);
            if env.failed {
                let _ = restore_header(&mut env.state.header, &inner_header, &args, true);
            } else if let Err(error) =
                restore_header(&mut env.state.header, &inner_header, &args, false)
            {
                let _ = fault_tx.send(RuntimeFault {
                    context: "SEQ egress".to_string(),
                    error: error.clone(),
                });
                env.fail(&error);
            }
            route_group_result(env, &outputs, &exit_tx, &fault_tx, "SEQ");
        }
    }));
    Ok(())
}

/// What one concurrent branch is statically allowed to write back.
struct MergePlan {
    fields: Vec<Field>,
    reserved: Vec<Field>,
    locations: Vec<(usize, u16)>,
}

struct PendingMerge {
    base: Box<Envelope>,
    remaining: usize,
}

/// CNC ingress fan-out plus a merging egress over one network per branch.
#[allow(clippy::too_many_arguments)]
fn spawn_concurrent_group(
    rt: &Handle,
    codes: Vec<Code>,
    mut rx: UnboundedReceiver<Msg>,
    outputs: Outputs,
    exit_tx: UnboundedSender<Msg>,
    fault_tx: UnboundedSender<RuntimeFault>,
    tables: Arc<HashMap<TableId, TableHandle>>,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Result<(), PolicyError> {
    let branch_count = codes.len();
    let mut plans = Vec::with_capacity(branch_count);
    let mut branch_args = Vec::with_capacity(branch_count);
    let mut inner_inputs = Vec::with_capacity(branch_count);
    let mut all_stage_txs = Vec::new();
    let mut all_inner_tasks = Vec::new();
    let (merged_tx, mut merged_rx) = mpsc::unbounded_channel::<(usize, Box<Envelope>)>();

    for (branch, code) in codes.into_iter().enumerate() {
        plans.push(MergePlan {
            fields: modified_fields(&code.instructions, &code.argument_fields),
            reserved: modified_reserved_fields(&code.instructions),
            locations: modified_locations(&code.instructions),
        });
        branch_args.push(code.argument_fields.clone());
        let net = build_net(rt, &code, tables.clone(), fault_tx.clone())?;
        let Net {
            input,
            mut out_rx,
            stage_txs,
            tasks: inner_tasks,
        } = net;
        inner_inputs.push(input);
        all_stage_txs.extend(stage_txs);
        all_inner_tasks.extend(inner_tasks);

        // Pump this branch's results into the shared merge channel.
        let branch_tx = merged_tx.clone();
        tasks.push(rt.spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Some(env) = message {
                    let _ = branch_tx.send((branch, env));
                }
            }
        }));
    }
    drop(merged_tx);

    let (meta_tx, mut meta_rx) = mpsc::unbounded_channel::<(u64, Box<Envelope>)>();

    // Ingress: project the same state independently into every branch.
    let ingress_fault = fault_tx.clone();
    let ingress_exit = exit_tx.clone();
    tasks.push(rt.spawn(async move {
        let mut next_ticket = 0u64;
        while let Some(message) = rx.recv().await {
            let Some(mut env) = message else { break };
            let ticket = next_ticket;
            next_ticket += 1;
            let mut clones = Vec::with_capacity(branch_args.len());
            let mut projection_error = None;
            for args in &branch_args {
                match project_header(&env.state.header, args) {
                    Ok(header) => {
                        let mut clone = env.clone();
                        clone.state.header = header;
                        clone.tickets.push(ticket);
                        clones.push(clone);
                    }
                    Err(error) => {
                        projection_error = Some(error);
                        break;
                    }
                }
            }
            if let Some(error) = projection_error {
                let _ = ingress_fault.send(RuntimeFault {
                    context: "CNC ingress".to_string(),
                    error: error.clone(),
                });
                env.fail(&error);
                let _ = ingress_exit.send(Some(env));
                continue;
            }
            let _ = meta_tx.send((ticket, env));
            for (input, clone) in inner_inputs.iter().zip(clones) {
                let _ = input.send(Some(clone));
            }
        }
        drop(meta_tx);
        shutdown_net(all_stage_txs, all_inner_tasks).await;
    }));

    // Egress: merge each branch's statically-declared writes into the saved
    // base state; release it once every branch has reported.
    tasks.push(rt.spawn(async move {
        let mut pending: HashMap<u64, PendingMerge> = HashMap::new();
        while let Some((branch, env)) = merged_rx.recv().await {
            let Some(&ticket) = env.tickets.last() else {
                let _ = fault_tx.send(RuntimeFault {
                    context: "CNC egress".to_string(),
                    error: RuntimeError::Internal("branch result without a ticket".to_string()),
                });
                continue;
            };
            // The saved base may still be in the side channel; pull until
            // its ticket shows up.
            let available = loop {
                if pending.contains_key(&ticket) {
                    break true;
                }
                match meta_rx.recv().await {
                    Some((t, base)) => {
                        pending.insert(
                            t,
                            PendingMerge {
                                base,
                                remaining: branch_count,
                            },
                        );
                    }
                    None => break false,
                }
            };
            if !available {
                continue;
            }
            let entry = match pending.get_mut(&ticket) {
                Some(entry) => entry,
                None => continue,
            };

            let plan = &plans[branch];
            if env.failed {
                // The fault was stamped on the branch clone; carry the drop
                // marker over to the merged state.
                entry.base.state.reason = env.state.reason.clone();
                entry.base.failed = true;
                let drp = Field::new("DRP");
                if let Some(slot) = entry.base.state.header.get_mut(&drp) {
                    slot.value = 1;
                }
            }
            for field in &plan.fields {
                if let Some(value) = env.state.header.get(field) {
                    entry.base.state.header.insert(field.clone(), *value);
                }
            }
            for field in &plan.reserved {
                if let Some(value) = env.state.header.get(field) {
                    entry.base.state.header.insert(field.clone(), *value);
                }
            }
            for &(offset, bits) in &plan.locations {
                if let Ok(span) = env.state.packet.read_bits(offset, bits as usize) {
                    let _ = entry
                        .base
                        .state
                        .packet
                        .write_bits(offset, bits as usize, span);
                }
            }

            entry.remaining -= 1;
            if entry.remaining == 0 {
                if let Some(done) = pending.remove(&ticket) {
                    route_group_result(done.base, &outputs, &exit_tx, &fault_tx, "CNC");
                }
            }
        }
    }));
    Ok(())
}

// ─── Engine facade ─────────────────────────────────────────────────

struct RunningNet {
    in_tx: UnboundedSender<Msg>,
    stage_txs: Vec<UnboundedSender<Msg>>,
    tasks: Vec<JoinHandle<()>>,
    pump: JoinHandle<()>,
    tables: HashMap<TableId, TableHandle>,
    table_tasks: Vec<JoinHandle<()>>,
}

/// Strategy (b): the policy compiled once into a persistent actor network
/// serving a stream of states.
pub struct PipelineEngine {
    runtime: Runtime,
    policy: Arc<Policy>,
    gate: Arc<Gate>,
    running: Mutex<Option<RunningNet>>,
    out_rx: Mutex<Option<UnboundedReceiver<State>>>,
    fault_rx: Mutex<Option<UnboundedReceiver<RuntimeFault>>>,
}

impl PipelineEngine {
    pub fn new(policy: Policy) -> Result<Self, EngineError> {
        Self::with_capacity(policy, DEFAULT_MAX_IN_FLIGHT)
    }

    /// Build with an explicit in-flight cap (the `put` admission limit).
    pub fn with_capacity(policy: Policy, max_in_flight: usize) -> Result<Self, EngineError> {
        policy.validate().map_err(EngineError::Invalid)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .build()
            .map_err(|e| EngineError::RuntimeInit(e.to_string()))?;
        Ok(PipelineEngine {
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

impl Engine for PipelineEngine {
    fn start(&self) -> Result<(), EngineError> {
        let mut running = lock(&self.running);
        if running.is_some() {
            return Err(EngineError::AlreadyStarted);
        }
        let handle = self.runtime.handle();
        let (tables, table_tasks) = spawn_tables(handle, &self.policy.decls);
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let net = build_net(
            handle,
            &self.policy.code,
            Arc::new(tables.clone()),
            fault_tx,
        )
        .map_err(|e| EngineError::Invalid(vec![e]))?;
        let Net {
            input,
            mut out_rx,
            stage_txs,
            tasks,
        } = net;

        // The egress pump unwraps envelopes and releases admission slots.
        let (final_tx, final_rx) = mpsc::unbounded_channel::<State>();
        let gate = self.gate.clone();
        let pump = handle.spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Some(env) = message {
                    let _ = final_tx.send(env.state);
                    gate.release();
                }
            }
        });

        *lock(&self.out_rx) = Some(final_rx);
        *lock(&self.fault_rx) = Some(fault_rx);
        *running = Some(RunningNet {
            in_tx: input,
            stage_txs,
            tasks,
            pump,
            tables,
            table_tasks,
        });
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        let running = lock(&self.running).take().ok_or(EngineError::NotStarted)?;
        self.gate.wait_idle();
        self.runtime.block_on(async {
            for tx in &running.stage_txs {
                let _ = tx.send(None);
            }
            for task in running.tasks {
                let _ = task.await;
            }
            // All workers are gone, so the output channel has closed and the
            // pump drains to completion.
            let _ = running.pump.await;
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
        if in_tx.send(Some(Envelope::new(state))).is_err() {
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
