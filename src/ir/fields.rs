//! Field-level static helpers: reserved-field predicates, port bitmap
//! conversions, per-instruction operand walks, and the modified-set
//! computations the concurrent merge is planned from.

use super::*;

/// Fields raised by DRP/CTR outcomes.
pub const SPECIAL_FIELDS: [&str; 2] = ["DRP", "CTR"];

/// Fields visible in every scope without an ADD: the port bitmaps, the
/// payload bit length, and the special fields.
pub const RESERVED_FIELDS: [&str; 5] = ["inport_bitmap", "outport_bitmap", "bit_length", "DRP", "CTR"];

pub fn is_special_field(field: &Field) -> bool {
    SPECIAL_FIELDS.contains(&field.as_str())
}

pub fn is_reserved_field(field: &Field) -> bool {
    RESERVED_FIELDS.contains(&field.as_str())
}

pub fn reserved_fields() -> Vec<Field> {
    RESERVED_FIELDS.iter().copied().map(Field::new).collect()
}

pub(crate) fn is_reserved_or_argument(field: &Field, argument_fields: &[Field]) -> bool {
    is_reserved_field(field) || argument_fields.contains(field)
}

// Port numbers start from 1.
pub fn ports_to_bitmap(ports: &[u32]) -> i64 {
    let mut bitmap = 0i64;
    for &port in ports {
        bitmap |= 1 << (port - 1);
    }
    bitmap
}

pub fn bitmap_to_ports(bitmap: i64) -> Vec<u32> {
    (0..63).filter(|i| bitmap & (1 << i) != 0).map(|i| i + 1).collect()
}

// ─── Operand walks ─────────────────────────────────────────────────

fn push_operand(out: &mut Vec<Field>, op: &Operand) {
    if let Operand::Field(field) = op {
        out.push(field.clone());
    }
}

fn push_location(out: &mut Vec<Field>, loc: &Location) {
    push_operand(out, &loc.offset);
}

fn nested_argument_fields(instr: &Instruction) -> Vec<Field> {
    match instr {
        Instruction::Cnc(codes) => codes
            .iter()
            .flat_map(|c| c.argument_fields.iter().cloned())
            .collect(),
        Instruction::Atm(code) | Instruction::Seq(code) => code.argument_fields.clone(),
        _ => Vec::new(),
    }
}

impl Instruction {
    /// Every field this instruction mentions, in operand order. Composite
    /// instructions contribute their nested argument-field sets as a proxy,
    /// since their bodies have private scope.
    pub(crate) fn referenced_fields(&self) -> Vec<Field> {
        let mut out = Vec::new();
        match self {
            Instruction::Id
            | Instruction::Drp(_)
            | Instruction::Ctr(_)
            | Instruction::Jmp(_)
            | Instruction::Lbl(_)
            | Instruction::Hlt => {}
            Instruction::Add(field, _) | Instruction::Rmv(field) => out.push(field.clone()),
            Instruction::Ld { dst, src } => {
                match src {
                    LdSource::Field(field) => out.push(field.clone()),
                    LdSource::Value(_) => {}
                    LdSource::Location(loc) => push_location(&mut out, loc),
                }
                out.push(dst.clone());
            }
            Instruction::St { loc, src } => {
                push_operand(&mut out, src);
                push_location(&mut out, loc);
            }
            Instruction::Op { dst, lhs, rhs, .. } => {
                push_operand(&mut out, lhs);
                push_operand(&mut out, rhs);
                out.push(dst.clone());
            }
            Instruction::Push { loc, src } => {
                push_location(&mut out, loc);
                push_operand(&mut out, src);
            }
            Instruction::Pop { dst, loc } => {
                push_location(&mut out, loc);
                out.push(dst.clone());
            }
            Instruction::Br { lhs, rhs, .. } => {
                push_operand(&mut out, lhs);
                push_operand(&mut out, rhs);
            }
            Instruction::Ldt { dsts, index, .. } => {
                push_operand(&mut out, index);
                out.extend(dsts.iter().cloned());
            }
            Instruction::Stt { index, srcs, .. } => {
                push_operand(&mut out, index);
                match srcs {
                    WriteSources::Plain(ops) => {
                        for op in ops {
                            push_operand(&mut out, op);
                        }
                    }
                    WriteSources::Masked(ops) => {
                        for (op, _) in ops {
                            push_operand(&mut out, op);
                        }
                    }
                }
            }
            Instruction::Inct { index, .. } => push_operand(&mut out, index),
            Instruction::Lkt { dst, srcs, .. } => {
                for op in srcs {
                    push_operand(&mut out, op);
                }
                out.push(dst.clone());
            }
            Instruction::Crc { dst, srcs } | Instruction::Hsh { dst, srcs } => {
                for op in srcs {
                    push_operand(&mut out, op);
                }
                out.push(dst.clone());
            }
            Instruction::Cnc(_) | Instruction::Atm(_) | Instruction::Seq(_) => {
                out.extend(nested_argument_fields(self));
            }
        }
        out
    }

    /// Fields this instruction reads (sources, offsets, and indices).
    pub(crate) fn read_fields(&self) -> Vec<Field> {
        let mut out = Vec::new();
        match self {
            Instruction::Ld { src, .. } => match src {
                LdSource::Field(field) => out.push(field.clone()),
                LdSource::Value(_) => {}
                LdSource::Location(loc) => push_location(&mut out, loc),
            },
            Instruction::St { loc, src } => {
                push_operand(&mut out, src);
                push_location(&mut out, loc);
            }
            Instruction::Op { lhs, rhs, .. } => {
                push_operand(&mut out, lhs);
                push_operand(&mut out, rhs);
            }
            Instruction::Push { loc, src } => {
                push_location(&mut out, loc);
                push_operand(&mut out, src);
            }
            Instruction::Pop { loc, .. } => push_location(&mut out, loc),
            Instruction::Br { lhs, rhs, .. } => {
                push_operand(&mut out, lhs);
                push_operand(&mut out, rhs);
            }
            Instruction::Ldt { index, .. } | Instruction::Inct { index, .. } => {
                push_operand(&mut out, index)
            }
            Instruction::Stt { index, srcs, .. } => {
                push_operand(&mut out, index);
                match srcs {
                    WriteSources::Plain(ops) => {
                        for op in ops {
                            push_operand(&mut out, op);
                        }
                    }
                    WriteSources::Masked(ops) => {
                        for (op, _) in ops {
                            push_operand(&mut out, op);
                        }
                    }
                }
            }
            Instruction::Lkt { srcs, .. } => {
                for op in srcs {
                    push_operand(&mut out, op);
                }
            }
            Instruction::Crc { srcs, .. } | Instruction::Hsh { srcs, .. } => {
                for op in srcs {
                    push_operand(&mut out, op);
                }
            }
            Instruction::Cnc(_) | Instruction::Atm(_) | Instruction::Seq(_) => {
                out.extend(nested_argument_fields(self));
            }
            _ => {}
        }
        out
    }

    /// Fields this instruction defines or removes.
    pub(crate) fn written_fields(&self) -> Vec<Field> {
        let mut out = Vec::new();
        match self {
            Instruction::Add(field, _) | Instruction::Rmv(field) => out.push(field.clone()),
            Instruction::Ld { dst, .. }
            | Instruction::Op { dst, .. }
            | Instruction::Pop { dst, .. }
            | Instruction::Lkt { dst, .. }
            | Instruction::Crc { dst, .. }
            | Instruction::Hsh { dst, .. } => out.push(dst.clone()),
            Instruction::Ldt { dsts, .. } => out.extend(dsts.iter().cloned()),
            Instruction::Cnc(_) | Instruction::Atm(_) | Instruction::Seq(_) => {
                out.extend(nested_argument_fields(self));
            }
            _ => {}
        }
        out
    }
}

// ─── Modified sets for the concurrent merge ────────────────────────

/// Destination fields within `scope` that `instructions` may write, recursing
/// into nested bodies. The concurrent egress copies exactly these back.
pub(crate) fn modified_fields(instructions: &[Instruction], scope: &[Field]) -> Vec<Field> {
    let mut out = Vec::new();
    for instr in instructions {
        match instr {
            Instruction::Ld { dst, .. }
            | Instruction::Op { dst, .. }
            | Instruction::Lkt { dst, .. }
            | Instruction::Crc { dst, .. }
            | Instruction::Hsh { dst, .. } => {
                if scope.contains(dst) && !out.contains(dst) {
                    out.push(dst.clone());
                }
            }
            Instruction::Ldt { dsts, .. } => {
                for dst in dsts {
                    if scope.contains(dst) && !out.contains(dst) {
                        out.push(dst.clone());
                    }
                }
            }
            Instruction::Atm(code) | Instruction::Seq(code) => {
                for field in modified_fields(&code.instructions, scope) {
                    if !out.contains(&field) {
                        out.push(field);
                    }
                }
            }
            Instruction::Cnc(codes) => {
                for code in codes {
                    for field in modified_fields(&code.instructions, scope) {
                        if !out.contains(&field) {
                            out.push(field);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// Reserved fields that `instructions` may write, recursing into nested
/// bodies. DRP/CTR instructions raise their special fields.
pub(crate) fn modified_reserved_fields(instructions: &[Instruction]) -> Vec<Field> {
    let mut out = Vec::new();
    let mut push = |field: &Field, out: &mut Vec<Field>| {
        if is_reserved_field(field) && !out.contains(field) {
            out.push(field.clone());
        }
    };
    for instr in instructions {
        match instr {
            Instruction::Drp(_) => push(&Field::new("DRP"), &mut out),
            Instruction::Ctr(_) => push(&Field::new("CTR"), &mut out),
            Instruction::Ld { dst, .. }
            | Instruction::Op { dst, .. }
            | Instruction::Lkt { dst, .. }
            | Instruction::Crc { dst, .. }
            | Instruction::Hsh { dst, .. } => push(dst, &mut out),
            Instruction::Ldt { dsts, .. } => {
                for dst in dsts {
                    push(dst, &mut out);
                }
            }
            Instruction::Atm(code) | Instruction::Seq(code) => {
                for field in modified_reserved_fields(&code.instructions) {
                    if !out.contains(&field) {
                        out.push(field);
                    }
                }
            }
            Instruction::Cnc(codes) => {
                for code in codes {
                    for field in modified_reserved_fields(&code.instructions) {
                        if !out.contains(&field) {
                            out.push(field);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// Statically-resolvable packet spans that `instructions` may store to,
/// recursing into nested bodies: `(bit offset, bit length)` per ST with an
/// immediate offset and source. Validation rejects anything else inside a
/// concurrent branch, so the merge plan is complete.
pub(crate) fn modified_locations(instructions: &[Instruction]) -> Vec<(usize, u16)> {
    let mut out = Vec::new();
    for instr in instructions {
        match instr {
            Instruction::St { loc, src } => {
                if let (Operand::Value(offset), Operand::Value(value)) = (&loc.offset, src) {
                    if offset.value >= 0 {
                        out.push((offset.value as usize, value.size.0));
                    }
                }
            }
            Instruction::Atm(code) | Instruction::Seq(code) => {
                out.extend(modified_locations(&code.instructions));
            }
            Instruction::Cnc(codes) => {
                for code in codes {
                    out.extend(modified_locations(&code.instructions));
                }
            }
            _ => {}
        }
    }
    out
}

/// Number of ADD instructions for `field` in the flat list.
pub(crate) fn add_instruction_count(instructions: &[Instruction], field: &Field) -> usize {
    instructions
        .iter()
        .filter(|i| matches!(i, Instruction::Add(f, _) if f == field))
        .count()
}

/// Number of RMV instructions for `field` in the flat list.
pub(crate) fn rmv_instruction_count(instructions: &[Instruction], field: &Field) -> usize {
    instructions
        .iter()
        .filter(|i| matches!(i, Instruction::Rmv(f) if f == field))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_predicates() {
        assert!(is_reserved_field(&Field::new("inport_bitmap")));
        assert!(is_reserved_field(&Field::new("DRP")));
        assert!(is_special_field(&Field::new("CTR")));
        assert!(!is_special_field(&Field::new("outport_bitmap")));
        assert!(!is_reserved_field(&Field::new("eth_src")));
    }

    #[test]
    fn test_port_bitmap_round_trip() {
        assert_eq!(ports_to_bitmap(&[1]), 0x1);
        assert_eq!(ports_to_bitmap(&[1, 2, 5]), 0b10011);
        assert_eq!(bitmap_to_ports(0b10011), vec![1, 2, 5]);
        assert_eq!(bitmap_to_ports(0), Vec::<u32>::new());
    }

    #[test]
    fn test_read_write_walks() {
        let op = Instruction::Op {
            dst: Field::new("c"),
            lhs: Operand::Field(Field::new("a")),
            op: AluOp::Add,
            rhs: Operand::Value(Value::new(1, Size(8))),
        };
        assert_eq!(op.read_fields(), vec![Field::new("a")]);
        assert_eq!(op.written_fields(), vec![Field::new("c")]);
        assert_eq!(
            op.referenced_fields(),
            vec![Field::new("a"), Field::new("c")]
        );
    }

    #[test]
    fn test_composite_fields_proxy_through_arguments() {
        let inner = Code::new(
            vec![Field::new("x"), Field::new("y")],
            vec![Instruction::Hlt],
        );
        let atm = Instruction::Atm(Box::new(inner));
        assert_eq!(
            atm.referenced_fields(),
            vec![Field::new("x"), Field::new("y")]
        );
        assert_eq!(atm.read_fields(), atm.written_fields());
    }

    #[test]
    fn test_modified_sets() {
        let branch = Code::new(
            vec![Field::new("a")],
            vec![
                Instruction::Ld {
                    dst: Field::new("a"),
                    src: LdSource::Value(Value::new(7, Size(8))),
                },
                Instruction::Drp(Reason::default()),
                Instruction::St {
                    loc: Location::new(Operand::Value(Value::new(16, Size(16)))),
                    src: Operand::Value(Value::new(3, Size(8))),
                },
                Instruction::Hlt,
            ],
        );
        assert_eq!(
            modified_fields(&branch.instructions, &branch.argument_fields),
            vec![Field::new("a")]
        );
        assert_eq!(
            modified_reserved_fields(&branch.instructions),
            vec![Field::new("DRP")]
        );
        assert_eq!(modified_locations(&branch.instructions), vec![(16, 8)]);
    }

    #[test]
    fn test_add_rmv_counts() {
        let instrs = vec![
            Instruction::Add(Field::new("x"), Size(8)),
            Instruction::Add(Field::new("x"), Size(8)),
            Instruction::Rmv(Field::new("x")),
            Instruction::Hlt,
        ];
        assert_eq!(add_instruction_count(&instrs, &Field::new("x")), 2);
        assert_eq!(rmv_instruction_count(&instrs, &Field::new("x")), 1);
        assert_eq!(add_instruction_count(&instrs, &Field::new("y")), 0);
    }
}
