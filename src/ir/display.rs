//! Rendering of IR nodes, one instruction per line. Nested bodies render as
//! summaries (`ATM(code=5)`); use [`Code`]'s Display for a full listing.

use std::fmt;

use super::*;

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.value, self.size)
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "('{}', '{}')", self.code, self.description)
    }
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AluOp::Add => "Add",
            AluOp::Sub => "Sub",
            AluOp::Mul => "Mul",
            AluOp::Div => "Div",
            AluOp::And => "And",
            AluOp::Or => "Or",
            AluOp::Xor => "Xor",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CmpOp::Eq => "Eq",
            CmpOp::Neq => "Neq",
            CmpOp::Lt => "Lt",
            CmpOp::Gt => "Gt",
            CmpOp::Le => "Le",
            CmpOp::Ge => "Ge",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Field(field) => write!(f, "{}", field),
            Operand::Value(value) => write!(f, "{}", value),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.offset)
    }
}

impl fmt::Display for LdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LdSource::Field(field) => write!(f, "{}", field),
            LdSource::Value(value) => write!(f, "{}", value),
            LdSource::Location(loc) => write!(f, "{}", loc),
        }
    }
}

fn write_operands(f: &mut fmt::Formatter<'_>, ops: &[Operand]) -> fmt::Result {
    write!(f, "(")?;
    for (i, op) in ops.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", op)?;
    }
    write!(f, ")")
}

impl fmt::Display for WriteSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteSources::Plain(ops) => write_operands(f, ops),
            WriteSources::Masked(ops) => {
                write!(f, "(")?;
                for (i, (op, mask)) in ops.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} & {}", op, mask)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Id => write!(f, "ID"),
            Instruction::Drp(reason) if reason.is_empty() => write!(f, "DRP"),
            Instruction::Drp(reason) => write!(f, "DRP {}", reason),
            Instruction::Ctr(reason) if reason.is_empty() => write!(f, "CTR"),
            Instruction::Ctr(reason) => write!(f, "CTR {}", reason),
            Instruction::Add(field, size) => write!(f, "ADD {}, {}", field, size),
            Instruction::Rmv(field) => write!(f, "RMV {}", field),
            Instruction::Ld { dst, src } => write!(f, "LD {}, {}", dst, src),
            Instruction::St { loc, src } => write!(f, "ST {}, {}", loc, src),
            Instruction::Op { dst, lhs, op, rhs } => {
                write!(f, "OP {}, {}, {}, {}", dst, lhs, op, rhs)
            }
            Instruction::Push { loc, src } => write!(f, "PUSH {}, {}", loc, src),
            Instruction::Pop { dst, loc } => write!(f, "POP {}, {}", dst, loc),
            Instruction::Br {
                lhs,
                op,
                rhs,
                target,
            } => write!(f, "BR {}, {}, {}, {}", lhs, op, rhs, target),
            Instruction::Jmp(label) => write!(f, "JMP {}", label),
            Instruction::Lbl(label) => write!(f, "LBL {}", label),
            Instruction::Ldt { dsts, table, index } => {
                write!(f, "LDt (")?;
                for (i, d) in dsts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", d)?;
                }
                write!(f, "), {}, {}", table, index)
            }
            Instruction::Stt { table, index, srcs } => {
                write!(f, "STt {}, {}, {}", table, index, srcs)
            }
            Instruction::Inct { table, index } => write!(f, "INCt {}, {}", table, index),
            Instruction::Lkt { dst, table, srcs } => {
                write!(f, "LKt {}, {}, ", dst, table)?;
                write_operands(f, srcs)
            }
            Instruction::Crc { dst, srcs } => {
                write!(f, "CRC {}, ", dst)?;
                write_operands(f, srcs)
            }
            Instruction::Hsh { dst, srcs } => {
                write!(f, "HSH {}, ", dst)?;
                write_operands(f, srcs)
            }
            Instruction::Hlt => write!(f, "HLT"),
            Instruction::Cnc(codes) => write!(f, "CNC(codes={})", codes.len()),
            Instruction::Atm(code) => write!(f, "ATM(code={})", code.instructions.len()),
            Instruction::Seq(code) => write!(f, "SEQ(code={})", code.instructions.len()),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "args: [")?;
        for (i, field) in self.argument_fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", field)?;
        }
        writeln!(f, "]")?;
        for instr in &self.instructions {
            writeln!(f, "  {}", instr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_display() {
        insta::assert_snapshot!(
            format!("{}", Instruction::Add(Field::new("eth_src"), Size(48))),
            @"ADD eth_src, 48"
        );
        insta::assert_snapshot!(
            format!(
                "{}",
                Instruction::Op {
                    dst: Field::new("outport_bitmap"),
                    lhs: Operand::Field(Field::new("inport_bitmap")),
                    op: AluOp::Xor,
                    rhs: Operand::Value(Value::new(0xFFFF, Size(16))),
                }
            ),
            @"OP outport_bitmap, inport_bitmap, Xor, 65535:16"
        );
        insta::assert_snapshot!(
            format!(
                "{}",
                Instruction::Br {
                    lhs: Operand::Field(Field::new("index")),
                    op: CmpOp::Neq,
                    rhs: Operand::Value(Value::new(-1, Size(16))),
                    target: Label::new("LBL_PT_0"),
                }
            ),
            @"BR index, Neq, -1:16, LBL_PT_0"
        );
        insta::assert_snapshot!(
            format!(
                "{}",
                Instruction::Lkt {
                    dst: Field::new("index"),
                    table: TableId::new("match_table"),
                    srcs: vec![Operand::Field(Field::new("eth_src"))],
                }
            ),
            @"LKt index, match_table, (eth_src)"
        );
    }

    #[test]
    fn test_indirect_load_display() {
        let ld = Instruction::Ld {
            dst: Field::new("eth_src"),
            src: LdSource::Location(Location::new(Operand::Value(Value::new(48, Size(16))))),
        };
        assert_eq!(format!("{}", ld), "LD eth_src, [48:16]");
    }

    #[test]
    fn test_code_display() {
        let code = Code::new(
            vec![Field::new("a")],
            vec![
                Instruction::Add(Field::new("x"), Size(16)),
                Instruction::Hlt,
            ],
        );
        assert_eq!(format!("{}", code), "args: [a]\n  ADD x, 16\n  HLT\n");
    }
}
