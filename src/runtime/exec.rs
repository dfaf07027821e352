//! Per-instruction execution semantics shared by both engines.
//!
//! Everything here operates on one [`State`] and leaves the
//! control-transfer decision in `state.label`: the empty label means fall
//! through, anything else is the taken branch target. Table and composite
//! instructions are dispatched by the engines themselves (they need table
//! actors and nested pipelines); [`execute_simple`] handles the rest.

use crate::error::RuntimeError;
use crate::ir::{
    reserved_fields, AluOp, CmpOp, Field, Instruction, Label, LdSource, Location, Operand, Value,
    WriteSources,
};

use super::{Header, State};

/// Resolve a general operand against the header.
pub(crate) fn operand_value(header: &Header, op: &Operand) -> Result<Value, RuntimeError> {
    match op {
        Operand::Value(value) => Ok(*value),
        Operand::Field(field) => header.lookup(field),
    }
}

/// Resolve a location's offset to a non-negative bit position.
pub(crate) fn location_offset(header: &Header, loc: &Location) -> Result<usize, RuntimeError> {
    let offset = operand_value(header, &loc.offset)?;
    usize::try_from(offset.value).map_err(|_| RuntimeError::OperandKind {
        detail: format!("negative packet offset {}", offset.value),
    })
}

fn store_into(header: &mut Header, dst: &Field, value: Value) -> Result<(), RuntimeError> {
    let slot = header
        .get_mut(dst)
        .ok_or_else(|| RuntimeError::MissingField(dst.clone()))?;
    if value.size > slot.size {
        return Err(RuntimeError::SizeMismatch {
            dst: dst.clone(),
            dst_bits: slot.size.0,
            src_bits: value.size.0,
        });
    }
    slot.value = value.value;
    Ok(())
}

fn alu(lhs: Value, op: AluOp, rhs: Value) -> Result<Value, RuntimeError> {
    let value = match op {
        AluOp::Add => lhs.value.wrapping_add(rhs.value),
        AluOp::Sub => lhs.value.wrapping_sub(rhs.value),
        AluOp::Mul => lhs.value.wrapping_mul(rhs.value),
        AluOp::Div => {
            if rhs.value == 0 {
                return Err(RuntimeError::DivideByZero);
            }
            lhs.value.wrapping_div(rhs.value)
        }
        AluOp::And => lhs.value & rhs.value,
        AluOp::Or => lhs.value | rhs.value,
        AluOp::Xor => lhs.value ^ rhs.value,
    };
    Ok(Value::new(value, lhs.size.max(rhs.size)))
}

fn compare(lhs: Value, op: CmpOp, rhs: Value) -> bool {
    match op {
        CmpOp::Eq => lhs.value == rhs.value,
        CmpOp::Neq => lhs.value != rhs.value,
        CmpOp::Lt => lhs.value < rhs.value,
        CmpOp::Gt => lhs.value > rhs.value,
        CmpOp::Le => lhs.value <= rhs.value,
        CmpOp::Ge => lhs.value >= rhs.value,
    }
}

/// Concatenate sized values MSB-first into a byte buffer (zero-padded tail).
/// Bits above the 64 a value can carry are its sign extension.
fn concat_bits(values: &[Value]) -> Vec<u8> {
    let total: usize = values.iter().map(|v| v.size.0 as usize).sum();
    let mut bytes = vec![0u8; total.div_ceil(8)];
    let mut pos = 0usize;
    for value in values {
        let len = value.size.0 as usize;
        for k in 0..len {
            let shift = len - 1 - k;
            let bit = if shift >= 64 {
                value.value < 0
            } else {
                value.value >> shift & 1 != 0
            };
            if bit {
                bytes[pos / 8] |= 1 << (7 - pos % 8);
            }
            pos += 1;
        }
    }
    bytes
}

/// CRC-16/ARC, reflected polynomial 0xA001.
pub(crate) fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in bytes {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
        }
    }
    crc
}

fn digest64(bytes: &[u8]) -> i64 {
    let hash = blake3::hash(bytes);
    let mut word = [0u8; 8];
    word.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(word) & i64::MAX as u64) as i64
}

/// Raise a special field (DRP/CTR) to one.
fn raise(header: &mut Header, name: &str) -> Result<(), RuntimeError> {
    let field = Field::new(name);
    let slot = header
        .get_mut(&field)
        .ok_or(RuntimeError::MissingField(field))?;
    slot.value = 1;
    Ok(())
}

/// Execute one non-table, non-composite instruction against `state`.
pub(crate) fn execute_simple(instr: &Instruction, state: &mut State) -> Result<(), RuntimeError> {
    state.label = Label::fall_through();
    match instr {
        Instruction::Id | Instruction::Lbl(_) | Instruction::Hlt => {}
        Instruction::Drp(reason) => {
            state.reason = reason.clone();
            raise(&mut state.header, "DRP")?;
        }
        Instruction::Ctr(reason) => {
            state.reason = reason.clone();
            raise(&mut state.header, "CTR")?;
        }
        Instruction::Add(field, size) => {
            state.header.insert(field.clone(), Value::new(0, *size));
        }
        Instruction::Rmv(field) => {
            state
                .header
                .remove(field)
                .ok_or_else(|| RuntimeError::MissingField(field.clone()))?;
        }
        Instruction::Ld { dst, src } => {
            let incoming = match src {
                LdSource::Value(value) => *value,
                LdSource::Field(field) => state.header.lookup(field)?,
                LdSource::Location(loc) => {
                    let offset = location_offset(&state.header, loc)?;
                    let len = state.header.lookup(dst)?.size;
                    let bits = state.packet.read_bits(offset, len.0 as usize)?;
                    Value::new(bits, len)
                }
            };
            store_into(&mut state.header, dst, incoming)?;
        }
        Instruction::St { loc, src } => {
            let value = operand_value(&state.header, src)?;
            let offset = location_offset(&state.header, loc)?;
            state
                .packet
                .write_bits(offset, value.size.0 as usize, value.value)?;
        }
        Instruction::Op { dst, lhs, op, rhs } => {
            let lhs = operand_value(&state.header, lhs)?;
            let rhs = operand_value(&state.header, rhs)?;
            // OP re-types the destination: the computed value lands with the
            // wider operand's size.
            state.header.insert(dst.clone(), alu(lhs, *op, rhs)?);
        }
        Instruction::Push { loc, src } => {
            let value = operand_value(&state.header, src)?;
            let offset = location_offset(&state.header, loc)?;
            let len = value.size.0 as usize;
            state.packet.insert_bits(offset, len)?;
            state.packet.write_bits(offset, len, value.value)?;
        }
        Instruction::Pop { dst, loc } => {
            let offset = location_offset(&state.header, loc)?;
            let len = state.header.lookup(dst)?.size;
            let bits = state.packet.read_bits(offset, len.0 as usize)?;
            store_into(&mut state.header, dst, Value::new(bits, len))?;
            state.packet.remove_bits(offset, len.0 as usize)?;
        }
        Instruction::Br {
            lhs,
            op,
            rhs,
            target,
        } => {
            let lhs = operand_value(&state.header, lhs)?;
            let rhs = operand_value(&state.header, rhs)?;
            if compare(lhs, *op, rhs) {
                state.label = target.clone();
            }
        }
        Instruction::Jmp(target) => {
            state.label = target.clone();
        }
        Instruction::Crc { dst, srcs } => {
            let values = srcs
                .iter()
                .map(|s| operand_value(&state.header, s))
                .collect::<Result<Vec<_>, _>>()?;
            let crc = crc16(&concat_bits(&values)) as i64;
            let slot = state
                .header
                .get_mut(dst)
                .ok_or_else(|| RuntimeError::MissingField(dst.clone()))?;
            slot.value = crc;
        }
        Instruction::Hsh { dst, srcs } => {
            let values = srcs
                .iter()
                .map(|s| operand_value(&state.header, s))
                .collect::<Result<Vec<_>, _>>()?;
            let digest = digest64(&concat_bits(&values));
            let slot = state
                .header
                .get_mut(dst)
                .ok_or_else(|| RuntimeError::MissingField(dst.clone()))?;
            slot.value = digest;
        }
        other => {
            return Err(RuntimeError::Internal(format!(
                "'{}' is not a simple instruction",
                other
            )))
        }
    }
    Ok(())
}

// ─── Table-instruction halves ──────────────────────────────────────

/// LDt: spread a fetched row into the destination fields, positionally.
pub(crate) fn apply_row(
    header: &mut Header,
    dsts: &[Field],
    row: &[Value],
) -> Result<(), RuntimeError> {
    if dsts.len() != row.len() {
        return Err(RuntimeError::OperandKind {
            detail: format!(
                "{} destinations against a row of {} values",
                dsts.len(),
                row.len()
            ),
        });
    }
    for (dst, value) in dsts.iter().zip(row) {
        let slot = header
            .get_mut(dst)
            .ok_or_else(|| RuntimeError::MissingField(dst.clone()))?;
        slot.value = value.value;
    }
    Ok(())
}

/// STt: resolve the instruction's sources into row values (and masks, for a
/// match table).
pub(crate) fn resolve_row(
    header: &Header,
    srcs: &WriteSources,
) -> Result<(Vec<Value>, Option<Vec<crate::ir::Mask>>), RuntimeError> {
    match srcs {
        WriteSources::Plain(ops) => {
            let values = ops
                .iter()
                .map(|op| operand_value(header, op))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((values, None))
        }
        WriteSources::Masked(ops) => {
            let mut values = Vec::with_capacity(ops.len());
            let mut masks = Vec::with_capacity(ops.len());
            for (op, mask) in ops {
                values.push(operand_value(header, op)?);
                masks.push(*mask);
            }
            Ok((values, Some(masks)))
        }
    }
}

// ─── Nested-scope projection ───────────────────────────────────────

/// Build the header a nested scope sees: its argument fields plus the
/// reserved fields, copied from the outer header.
pub(crate) fn project_header(outer: &Header, args: &[Field]) -> Result<Header, RuntimeError> {
    let mut inner = Header::new();
    for field in args {
        inner.insert(field.clone(), outer.lookup(field)?);
    }
    for field in reserved_fields() {
        inner.insert(field.clone(), outer.lookup(&field)?);
    }
    Ok(inner)
}

/// Commit a nested scope's argument and reserved fields back into the outer
/// header. With `best_effort`, fields the scope dropped are skipped instead
/// of faulting (used when restoring around an already-faulted state).
pub(crate) fn restore_header(
    outer: &mut Header,
    inner: &Header,
    args: &[Field],
    best_effort: bool,
) -> Result<(), RuntimeError> {
    for field in args.iter().cloned().chain(reserved_fields()) {
        match inner.get(&field) {
            Some(value) => outer.insert(field, *value),
            None if best_effort => {}
            None => return Err(RuntimeError::MissingField(field)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Reason, Size};
    use crate::runtime::Packet;

    fn fresh_state() -> State {
        State::new(Header::new(), Packet::from_bytes(&[0u8; 8]))
    }

    fn field(name: &str) -> Field {
        Field::new(name)
    }

    #[test]
    fn test_crc16_reference_vector() {
        // CRC-16/ARC of "123456789".
        assert_eq!(crc16(b"123456789"), 0xBB3D);
    }

    #[test]
    fn test_op_xor_retypes_destination() {
        let mut state = fresh_state();
        state
            .header
            .insert(field("inport_bitmap"), Value::new(0x1, Size(16)));
        execute_simple(
            &Instruction::Op {
                dst: field("outport_bitmap"),
                lhs: Operand::Field(field("inport_bitmap")),
                op: AluOp::Xor,
                rhs: Operand::Value(Value::new(0xFFFF, Size(16))),
            },
            &mut state,
        )
        .unwrap();
        assert_eq!(
            state.header.get(&field("outport_bitmap")),
            Some(&Value::new(0xFFFE, Size(16)))
        );
        assert!(state.label.is_fall_through());
    }

    #[test]
    fn test_ld_checks_the_destination_width() {
        let mut state = fresh_state();
        state.header.insert(field("narrow"), Value::new(0, Size(8)));
        let err = execute_simple(
            &Instruction::Ld {
                dst: field("narrow"),
                src: LdSource::Value(Value::new(0x1234, Size(16))),
            },
            &mut state,
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::SizeMismatch { .. }));
    }

    #[test]
    fn test_indirect_ld_reads_the_payload() {
        let mut state = State::new(Header::new(), Packet::from_bytes(&[0xAB, 0xCD]));
        state.header.insert(field("x"), Value::new(0, Size(8)));
        execute_simple(
            &Instruction::Ld {
                dst: field("x"),
                src: LdSource::Location(Location::new(Operand::Value(Value::new(8, Size(8))))),
            },
            &mut state,
        )
        .unwrap();
        assert_eq!(state.header.get(&field("x")).unwrap().value, 0xCD);
    }

    #[test]
    fn test_st_writes_the_payload() {
        let mut state = fresh_state();
        execute_simple(
            &Instruction::St {
                loc: Location::new(Operand::Value(Value::new(8, Size(8)))),
                src: Operand::Value(Value::new(0x5A, Size(8))),
            },
            &mut state,
        )
        .unwrap();
        assert_eq!(state.packet.to_bytes()[1], 0x5A);
    }

    #[test]
    fn test_push_then_pop_round_trips() {
        let mut state = fresh_state();
        let before = state.packet.clone();
        state.header.insert(field("tag"), Value::new(0, Size(16)));
        execute_simple(
            &Instruction::Push {
                loc: Location::new(Operand::Value(Value::new(0, Size(8)))),
                src: Operand::Value(Value::new(0xBEEF, Size(16))),
            },
            &mut state,
        )
        .unwrap();
        assert_eq!(state.packet.bit_len(), before.bit_len() + 16);
        execute_simple(
            &Instruction::Pop {
                dst: field("tag"),
                loc: Location::new(Operand::Value(Value::new(0, Size(8)))),
            },
            &mut state,
        )
        .unwrap();
        assert_eq!(state.header.get(&field("tag")).unwrap().value, 0xBEEF);
        assert_eq!(state.packet, before);
    }

    #[test]
    fn test_branch_taken_and_not_taken() {
        let mut state = fresh_state();
        let br = Instruction::Br {
            lhs: Operand::Value(Value::new(3, Size(8))),
            op: CmpOp::Lt,
            rhs: Operand::Value(Value::new(5, Size(8))),
            target: Label::new("yes"),
        };
        execute_simple(&br, &mut state).unwrap();
        assert_eq!(state.label, Label::new("yes"));

        let br = Instruction::Br {
            lhs: Operand::Value(Value::new(7, Size(8))),
            op: CmpOp::Lt,
            rhs: Operand::Value(Value::new(5, Size(8))),
            target: Label::new("yes"),
        };
        execute_simple(&br, &mut state).unwrap();
        assert!(state.label.is_fall_through());
    }

    #[test]
    fn test_drp_raises_flag_and_reason() {
        let mut state = fresh_state();
        execute_simple(
            &Instruction::Drp(Reason::new("POLICY_DROP", "rate limited")),
            &mut state,
        )
        .unwrap();
        assert_eq!(state.header.get(&field("DRP")).unwrap().value, 1);
        assert_eq!(state.reason.code, "POLICY_DROP");
    }

    #[test]
    fn test_rmv_of_missing_field_faults() {
        let mut state = fresh_state();
        assert_eq!(
            execute_simple(&Instruction::Rmv(field("ghost")), &mut state).unwrap_err(),
            RuntimeError::MissingField(field("ghost"))
        );
    }

    #[test]
    fn test_divide_by_zero_faults() {
        let mut state = fresh_state();
        let err = execute_simple(
            &Instruction::Op {
                dst: field("outport_bitmap"),
                lhs: Operand::Value(Value::new(4, Size(8))),
                op: AluOp::Div,
                rhs: Operand::Value(Value::new(0, Size(8))),
            },
            &mut state,
        )
        .unwrap_err();
        assert_eq!(err, RuntimeError::DivideByZero);
    }

    #[test]
    fn test_projection_and_restore() {
        let mut outer = Header::new();
        outer.insert(field("a"), Value::new(7, Size(8)));
        outer.insert(field("hidden"), Value::new(9, Size(8)));
        for f in reserved_fields() {
            outer.insert(f, Value::new(0, Size(16)));
        }

        let mut inner = project_header(&outer, &[field("a")]).unwrap();
        assert!(inner.contains(&field("a")));
        assert!(!inner.contains(&field("hidden")));
        assert!(inner.contains(&field("outport_bitmap")));

        inner.get_mut(&field("a")).unwrap().value = 42;
        restore_header(&mut outer, &inner, &[field("a")], false).unwrap();
        assert_eq!(outer.get(&field("a")).unwrap().value, 42);
        assert_eq!(outer.get(&field("hidden")).unwrap().value, 9);
    }

    #[test]
    fn test_hsh_is_deterministic() {
        let mut a = fresh_state();
        a.header.insert(field("h"), Value::new(0, Size(16)));
        let hsh = Instruction::Hsh {
            dst: field("h"),
            srcs: vec![Operand::Value(Value::new(0xAB, Size(8)))],
        };
        execute_simple(&hsh, &mut a).unwrap();
        let first = a.header.get(&field("h")).unwrap().value;
        execute_simple(&hsh, &mut a).unwrap();
        assert_eq!(a.header.get(&field("h")).unwrap().value, first);
        assert!(first >= 0);
    }
}
