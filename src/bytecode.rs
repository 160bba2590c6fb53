//! `Code` attribute instruction decoding.

use crate::constant_pool::{ConstValue, ConstantPool, MemberRef};
use crate::error::ClassFileError;
use crate::reader::Reader;

type Result<T> = std::result::Result<T, ClassFileError>;

pub mod opcodes {
    pub const ICONST_M1: u8 = 0x02;
    pub const ICONST_5: u8 = 0x08;
    pub const LCONST_0: u8 = 0x09;
    pub const LCONST_1: u8 = 0x0a;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD: u8 = 0x15;
    pub const ALOAD: u8 = 0x19;
    pub const ILOAD_0: u8 = 0x1a;
    pub const ALOAD_3: u8 = 0x2d;
    pub const ISTORE: u8 = 0x36;
    pub const ASTORE: u8 = 0x3a;
    pub const ISTORE_0: u8 = 0x3b;
    pub const ASTORE_3: u8 = 0x4e;
    pub const IINC: u8 = 0x84;
    pub const IFEQ: u8 = 0x99;
    pub const JSR: u8 = 0xa8;
    pub const RET: u8 = 0xa9;
    pub const TABLESWITCH: u8 = 0xaa;
    pub const LOOKUPSWITCH: u8 = 0xab;
    pub const IRETURN: u8 = 0xac;
    pub const RETURN: u8 = 0xb1;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const INVOKEINTERFACE: u8 = 0xb9;
    pub const INVOKEDYNAMIC: u8 = 0xba;
    pub const NEW: u8 = 0xbb;
    pub const NEWARRAY: u8 = 0xbc;
    pub const ANEWARRAY: u8 = 0xbd;
    pub const ATHROW: u8 = 0xbf;
    pub const CHECKCAST: u8 = 0xc0;
    pub const INSTANCEOF: u8 = 0xc1;
    pub const WIDE: u8 = 0xc4;
    pub const MULTIANEWARRAY: u8 = 0xc5;
    pub const IFNULL: u8 = 0xc6;
    pub const IFNONNULL: u8 = 0xc7;
    pub const GOTO_W: u8 = 0xc8;
    pub const JSR_W: u8 = 0xc9;
}

use opcodes::*;

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: u8,
    pub operand: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int(i32),
    Constant(ConstValue),
    Local(u16),
    Iinc { index: u16, delta: i16 },
    Jump(i32),
    Switch {
        default: i32,
        keys: Vec<i32>,
        targets: Vec<i32>,
    },
    Field(MemberRef),
    Method(MemberRef),
    InvokeDynamic { name: String, descriptor: String },
    Type(String),
    NewArray(u8),
    MultiANewArray { class: String, dims: u8 },
}

impl Instruction {
    pub fn is_field_write(&self) -> bool {
        matches!(self.opcode, PUTFIELD | PUTSTATIC)
    }

    pub fn is_field_read(&self) -> bool {
        matches!(self.opcode, GETFIELD | GETSTATIC)
    }

    /// Instructions after which the operand stack no longer feeds an
    /// immediately following field store.
    pub fn ends_value_run(&self) -> bool {
        matches!(self.operand, Operand::Method(_) | Operand::Jump(_) | Operand::Switch { .. })
            || (IRETURN..=RETURN).contains(&self.opcode)
            || self.opcode == ATHROW
            || self.is_field_write()
    }
}

pub(crate) fn decode(code: &[u8], cp: &ConstantPool) -> Result<Vec<Instruction>> {
    let mut reader = Reader::new(code);
    let mut out = Vec::with_capacity(code.len() / 2);

    while reader.remaining() > 0 {
        let offset = reader.position() as u32;
        let mut opcode = reader.read_u1()?;
        let operand = match opcode {
            0x00..=0x0f => Operand::None,
            BIPUSH => Operand::Int(reader.read_i1()? as i32),
            SIPUSH => Operand::Int(reader.read_i2()? as i32),
            LDC => Operand::Constant(cp.get_constant(reader.read_u1()? as u16)?),
            LDC_W | LDC2_W => Operand::Constant(cp.get_constant(reader.read_u2()?)?),
            ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Operand::Local(reader.read_u1()? as u16),
            ILOAD_0..=ALOAD_3 => Operand::Local(((opcode - ILOAD_0) % 4) as u16),
            ISTORE_0..=ASTORE_3 => Operand::Local(((opcode - ISTORE_0) % 4) as u16),
            0x2e..=0x35 | 0x4f..=0x83 | 0x85..=0x98 => Operand::None,
            IINC => Operand::Iinc {
                index: reader.read_u1()? as u16,
                delta: reader.read_i1()? as i16,
            },
            IFEQ..=JSR | IFNULL | IFNONNULL => Operand::Jump(reader.read_i2()? as i32),
            GOTO_W | JSR_W => Operand::Jump(reader.read_i4()?),
            TABLESWITCH => {
                skip_switch_padding(&mut reader, offset)?;
                let default = reader.read_i4()?;
                let low = reader.read_i4()?;
                let high = reader.read_i4()?;
                if high < low {
                    return Err(ClassFileError::MalformedAttribute("Code"));
                }
                let count = (high as i64 - low as i64 + 1) as usize;
                let mut keys = Vec::with_capacity(count);
                let mut targets = Vec::with_capacity(count);
                for i in 0..count {
                    keys.push(low.wrapping_add(i as i32));
                    targets.push(reader.read_i4()?);
                }
                Operand::Switch {
                    default,
                    keys,
                    targets,
                }
            }
            LOOKUPSWITCH => {
                skip_switch_padding(&mut reader, offset)?;
                let default = reader.read_i4()?;
                let pairs = reader.read_i4()?;
                if pairs < 0 {
                    return Err(ClassFileError::MalformedAttribute("Code"));
                }
                let mut keys = Vec::with_capacity(pairs as usize);
                let mut targets = Vec::with_capacity(pairs as usize);
                for _ in 0..pairs {
                    keys.push(reader.read_i4()?);
                    targets.push(reader.read_i4()?);
                }
                Operand::Switch {
                    default,
                    keys,
                    targets,
                }
            }
            IRETURN..=RETURN => Operand::None,
            GETSTATIC..=PUTFIELD => Operand::Field(cp.get_member_ref(reader.read_u2()?)?),
            INVOKEVIRTUAL..=INVOKESTATIC => Operand::Method(cp.get_member_ref(reader.read_u2()?)?),
            INVOKEINTERFACE => {
                let target = cp.get_member_ref(reader.read_u2()?)?;
                reader.skip(2)?;
                Operand::Method(target)
            }
            INVOKEDYNAMIC => {
                let (name, descriptor) = cp.get_invoke_dynamic(reader.read_u2()?)?;
                reader.skip(2)?;
                Operand::InvokeDynamic { name, descriptor }
            }
            NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
                Operand::Type(cp.get_class_name(reader.read_u2()?)?)
            }
            NEWARRAY => Operand::NewArray(reader.read_u1()?),
            0xbe | ATHROW | 0xc2 | 0xc3 => Operand::None,
            WIDE => {
                opcode = reader.read_u1()?;
                match opcode {
                    IINC => Operand::Iinc {
                        index: reader.read_u2()?,
                        delta: reader.read_i2()?,
                    },
                    ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Operand::Local(reader.read_u2()?),
                    other => {
                        return Err(ClassFileError::UnknownOpcode {
                            opcode: other,
                            offset,
                        });
                    }
                }
            }
            MULTIANEWARRAY => Operand::MultiANewArray {
                class: cp.get_class_name(reader.read_u2()?)?,
                dims: reader.read_u1()?,
            },
            other => {
                return Err(ClassFileError::UnknownOpcode {
                    opcode: other,
                    offset,
                });
            }
        };

        out.push(Instruction {
            offset,
            opcode,
            operand,
        });
    }

    Ok(out)
}

fn skip_switch_padding(reader: &mut Reader<'_>, opcode_offset: u32) -> Result<()> {
    let pad = (4 - ((opcode_offset as usize + 1) % 4)) % 4;
    reader.skip(pad)
}

/// Maps a bytecode offset to the index of the instruction starting at or
/// after it; offsets past the end map to the instruction count.
pub fn insn_index_at(insns: &[Instruction], offset: u32) -> usize {
    insns.partition_point(|i| i.offset < offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_pool() -> ConstantPool {
        let bytes = 1u16.to_be_bytes();
        ConstantPool::parse(&mut Reader::new(&bytes)).unwrap()
    }

    #[test]
    fn decodes_simple_sequence() {
        // iload_1; bipush -3; iadd; ireturn
        let code = [0x1b, 0x10, 0xfd, 0x60, 0xac];
        let insns = decode(&code, &empty_pool()).unwrap();
        assert_eq!(insns.len(), 4);
        assert_eq!(insns[0].operand, Operand::Local(1));
        assert_eq!(insns[1].operand, Operand::Int(-3));
        assert_eq!(insns[1].offset, 1);
        assert_eq!(insns[3].opcode, IRETURN);
    }

    #[test]
    fn tableswitch_honours_alignment() {
        // iconst_0 at 0, tableswitch at 1, padding 2 bytes, then default/low/high + 2 targets
        let mut code = vec![0x03, TABLESWITCH, 0, 0];
        for v in [20i32, 0, 1, 10, 12] {
            code.extend_from_slice(&v.to_be_bytes());
        }
        code.push(0xb1);
        let insns = decode(&code, &empty_pool()).unwrap();
        assert_eq!(insns.len(), 3);
        assert_eq!(
            insns[1].operand,
            Operand::Switch {
                default: 20,
                keys: vec![0, 1],
                targets: vec![10, 12]
            }
        );
        assert_eq!(insns[2].opcode, RETURN);
    }

    #[test]
    fn wide_iinc_uses_inner_opcode() {
        let code = [WIDE, IINC, 0x01, 0x00, 0xff, 0xfe];
        let insns = decode(&code, &empty_pool()).unwrap();
        assert_eq!(insns[0].opcode, IINC);
        assert_eq!(
            insns[0].operand,
            Operand::Iinc {
                index: 256,
                delta: -2
            }
        );
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let err = decode(&[0xfe], &empty_pool()).unwrap_err();
        assert_eq!(
            err,
            ClassFileError::UnknownOpcode {
                opcode: 0xfe,
                offset: 0
            }
        );
    }
}
