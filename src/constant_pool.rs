use crate::error::ClassFileError;
use crate::reader::{Reader, decode_modified_utf8};

type Result<T> = std::result::Result<T, ClassFileError>;

#[derive(Debug, Clone)]
pub(crate) enum CpEntry {
    /// Unused slot (index 0 and the second half of long/double entries).
    Empty,
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    Fieldref { class: u16, name_and_type: u16 },
    Methodref { class: u16, name_and_type: u16 },
    InterfaceMethodref { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

impl CpEntry {
    fn kind(&self) -> &'static str {
        match self {
            CpEntry::Empty => "empty",
            CpEntry::Utf8(_) => "Utf8",
            CpEntry::Integer(_) => "Integer",
            CpEntry::Float(_) => "Float",
            CpEntry::Long(_) => "Long",
            CpEntry::Double(_) => "Double",
            CpEntry::Class(_) => "Class",
            CpEntry::String(_) => "String",
            CpEntry::Fieldref { .. } => "Fieldref",
            CpEntry::Methodref { .. } => "Methodref",
            CpEntry::InterfaceMethodref { .. } => "InterfaceMethodref",
            CpEntry::NameAndType { .. } => "NameAndType",
            CpEntry::MethodHandle { .. } => "MethodHandle",
            CpEntry::MethodType(_) => "MethodType",
            CpEntry::Dynamic { .. } => "Dynamic",
            CpEntry::InvokeDynamic { .. } => "InvokeDynamic",
            CpEntry::Module(_) => "Module",
            CpEntry::Package(_) => "Package",
        }
    }
}

/// A symbolic member reference as it appears in the constant pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub interface: bool,
}

/// Loadable constants (`ldc`, `ConstantValue`).
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(String),
    MethodType(String),
    MethodHandle(MemberRef),
    Dynamic { name: String, descriptor: String },
}

#[derive(Debug, Clone)]
pub(crate) struct ConstantPool {
    entries: Vec<CpEntry>,
}

impl ConstantPool {
    pub(crate) fn parse(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.read_u2()? as usize;
        let mut entries = Vec::with_capacity(count.max(1));
        entries.push(CpEntry::Empty);

        while entries.len() < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                1 => {
                    let len = reader.read_u2()? as usize;
                    CpEntry::Utf8(decode_modified_utf8(reader.read_bytes(len)?)?)
                }
                3 => CpEntry::Integer(reader.read_i4()?),
                4 => CpEntry::Float(reader.read_u4()?),
                5 => CpEntry::Long(reader.read_u8()? as i64),
                6 => CpEntry::Double(reader.read_u8()?),
                7 => CpEntry::Class(reader.read_u2()?),
                8 => CpEntry::String(reader.read_u2()?),
                9 => CpEntry::Fieldref {
                    class: reader.read_u2()?,
                    name_and_type: reader.read_u2()?,
                },
                10 => CpEntry::Methodref {
                    class: reader.read_u2()?,
                    name_and_type: reader.read_u2()?,
                },
                11 => CpEntry::InterfaceMethodref {
                    class: reader.read_u2()?,
                    name_and_type: reader.read_u2()?,
                },
                12 => CpEntry::NameAndType {
                    name: reader.read_u2()?,
                    descriptor: reader.read_u2()?,
                },
                15 => CpEntry::MethodHandle {
                    kind: reader.read_u1()?,
                    reference: reader.read_u2()?,
                },
                16 => CpEntry::MethodType(reader.read_u2()?),
                17 => CpEntry::Dynamic {
                    bootstrap: reader.read_u2()?,
                    name_and_type: reader.read_u2()?,
                },
                18 => CpEntry::InvokeDynamic {
                    bootstrap: reader.read_u2()?,
                    name_and_type: reader.read_u2()?,
                },
                19 => CpEntry::Module(reader.read_u2()?),
                20 => CpEntry::Package(reader.read_u2()?),
                other => return Err(ClassFileError::InvalidConstantPoolTag(other)),
            };

            let wide = matches!(entry, CpEntry::Long(_) | CpEntry::Double(_));
            entries.push(entry);
            if wide {
                entries.push(CpEntry::Empty);
            }
        }

        if entries.len() != count.max(1) {
            return Err(ClassFileError::InvalidConstantPoolIndex(count as u16));
        }

        Ok(Self { entries })
    }

    fn get(&self, index: u16) -> Result<&CpEntry> {
        match self.entries.get(index as usize) {
            Some(CpEntry::Empty) | None => Err(ClassFileError::InvalidConstantPoolIndex(index)),
            Some(entry) => Ok(entry),
        }
    }

    fn mismatch(&self, index: u16, expected: &'static str) -> ClassFileError {
        let found = self.entries.get(index as usize).map(CpEntry::kind).unwrap_or("missing");
        ClassFileError::ConstantPoolTypeMismatch {
            index,
            expected,
            found,
        }
    }

    pub(crate) fn get_utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            CpEntry::Utf8(s) => Ok(s.as_str()),
            _ => Err(self.mismatch(index, "Utf8")),
        }
    }

    pub(crate) fn get_class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            CpEntry::Class(name) => Ok(self.get_utf8(*name)?.to_string()),
            _ => Err(self.mismatch(index, "Class")),
        }
    }

    pub(crate) fn get_name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.get(index)? {
            CpEntry::NameAndType { name, descriptor } => Ok((
                self.get_utf8(*name)?.to_string(),
                self.get_utf8(*descriptor)?.to_string(),
            )),
            _ => Err(self.mismatch(index, "NameAndType")),
        }
    }

    pub(crate) fn get_member_ref(&self, index: u16) -> Result<MemberRef> {
        let (class, nat, interface) = match self.get(index)? {
            CpEntry::Fieldref {
                class,
                name_and_type,
            }
            | CpEntry::Methodref {
                class,
                name_and_type,
            } => (*class, *name_and_type, false),
            CpEntry::InterfaceMethodref {
                class,
                name_and_type,
            } => (*class, *name_and_type, true),
            _ => return Err(self.mismatch(index, "Fieldref/Methodref")),
        };
        let (name, descriptor) = self.get_name_and_type(nat)?;
        Ok(MemberRef {
            owner: self.get_class_name(class)?,
            name,
            descriptor,
            interface,
        })
    }

    pub(crate) fn get_invoke_dynamic(&self, index: u16) -> Result<(String, String)> {
        match self.get(index)? {
            CpEntry::InvokeDynamic { name_and_type, .. } => self.get_name_and_type(*name_and_type),
            _ => Err(self.mismatch(index, "InvokeDynamic")),
        }
    }

    pub(crate) fn get_constant(&self, index: u16) -> Result<ConstValue> {
        Ok(match self.get(index)? {
            CpEntry::Integer(v) => ConstValue::Int(*v),
            CpEntry::Float(bits) => ConstValue::Float(f32::from_bits(*bits)),
            CpEntry::Long(v) => ConstValue::Long(*v),
            CpEntry::Double(bits) => ConstValue::Double(f64::from_bits(*bits)),
            CpEntry::String(utf8) => ConstValue::String(self.get_utf8(*utf8)?.to_string()),
            CpEntry::Class(name) => ConstValue::Class(self.get_utf8(*name)?.to_string()),
            CpEntry::MethodType(desc) => ConstValue::MethodType(self.get_utf8(*desc)?.to_string()),
            CpEntry::MethodHandle { reference, .. } => {
                ConstValue::MethodHandle(self.get_member_ref(*reference)?)
            }
            CpEntry::Dynamic { name_and_type, .. } => {
                let (name, descriptor) = self.get_name_and_type(*name_and_type)?;
                ConstValue::Dynamic { name, descriptor }
            }
            _ => return Err(self.mismatch(index, "loadable constant")),
        })
    }
}
