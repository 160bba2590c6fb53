//! Class file parsing into an owned, constant-pool-free representation.

use crate::bytecode::{self, Instruction};
use crate::constant_pool::{ConstValue, ConstantPool};
use crate::error::ClassFileError;
use crate::reader::Reader;

type Result<T> = std::result::Result<T, ClassFileError>;

pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const VOLATILE: u16 = 0x0040;
    pub const BRIDGE: u16 = 0x0040;
    pub const TRANSIENT: u16 = 0x0080;
    pub const VARARGS: u16 = 0x0080;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const STRICT: u16 = 0x0800;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
    pub const ENUM: u16 = 0x4000;
}

#[derive(Debug, Clone, Default)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub access_flags: u16,
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<ClassMember>,
    pub methods: Vec<ClassMember>,
    pub signature: Option<String>,
    pub source_file: Option<String>,
    pub inner_classes: Vec<InnerClassInfo>,
    pub enclosing_class: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassMember {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub constant_value: Option<ConstValue>,
    pub parameter_names: Vec<Option<String>>,
    pub code: Option<Code>,
}

#[derive(Debug, Clone, Default)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub instructions: Vec<Instruction>,
    pub local_variables: Vec<LocalVariable>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name: String,
    pub descriptor: String,
    pub index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClassInfo {
    pub inner_class: String,
    pub outer_class: Option<String>,
    pub inner_name: Option<String>,
    pub access_flags: u16,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let magic = reader.read_u4()?;
        if magic != 0xCAFEBABE {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let minor_version = reader.read_u2()?;
        let major_version = reader.read_u2()?;
        let cp = ConstantPool::parse(&mut reader)?;

        let access_flags = reader.read_u2()?;
        let this_class = cp.get_class_name(reader.read_u2()?)?;
        let super_class_idx = reader.read_u2()?;
        let super_class = if super_class_idx == 0 {
            None
        } else {
            Some(cp.get_class_name(super_class_idx)?)
        };

        let interfaces_count = reader.read_u2()? as usize;
        let mut interfaces = Vec::with_capacity(interfaces_count);
        for _ in 0..interfaces_count {
            interfaces.push(cp.get_class_name(reader.read_u2()?)?);
        }

        let fields_count = reader.read_u2()? as usize;
        let mut fields = Vec::with_capacity(fields_count);
        for _ in 0..fields_count {
            fields.push(parse_member(&mut reader, &cp)?);
        }

        let methods_count = reader.read_u2()? as usize;
        let mut methods = Vec::with_capacity(methods_count);
        for _ in 0..methods_count {
            methods.push(parse_member(&mut reader, &cp)?);
        }

        let attrs = parse_attributes(&mut reader, &cp, AttributeTarget::Class)?;
        reader.ensure_empty("class")?;

        Ok(Self {
            minor_version,
            major_version,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            signature: attrs.signature,
            source_file: attrs.source_file,
            inner_classes: attrs.inner_classes,
            enclosing_class: attrs.enclosing_class,
        })
    }

    /// The directly enclosing class, from `InnerClasses` or `EnclosingMethod`.
    pub fn outer_class(&self) -> Option<&str> {
        self.inner_classes
            .iter()
            .find(|ic| ic.inner_class == self.this_class)
            .and_then(|ic| ic.outer_class.as_deref())
            .or(self.enclosing_class.as_deref())
    }
}

fn parse_member(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<ClassMember> {
    let access_flags = reader.read_u2()?;
    let name = cp.get_utf8(reader.read_u2()?)?.to_string();
    let descriptor = cp.get_utf8(reader.read_u2()?)?.to_string();

    let attrs = parse_attributes(reader, cp, AttributeTarget::Member)?;
    Ok(ClassMember {
        access_flags,
        name,
        descriptor,
        signature: attrs.signature,
        constant_value: attrs.constant_value,
        parameter_names: attrs.parameter_names,
        code: attrs.code,
    })
}

#[derive(Default)]
struct ParsedAttributes {
    signature: Option<String>,
    source_file: Option<String>,
    inner_classes: Vec<InnerClassInfo>,
    enclosing_class: Option<String>,
    constant_value: Option<ConstValue>,
    parameter_names: Vec<Option<String>>,
    code: Option<Code>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AttributeTarget {
    Class,
    Member,
    Code,
}

fn parse_attributes(
    reader: &mut Reader<'_>,
    cp: &ConstantPool,
    target: AttributeTarget,
) -> Result<ParsedAttributes> {
    let attributes_count = reader.read_u2()? as usize;
    let mut parsed = ParsedAttributes::default();
    for _ in 0..attributes_count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        let info = reader.read_bytes(length)?;
        let name = cp.get_utf8(name_index)?;

        let mut sub = Reader::new(info);
        match (name, target) {
            ("Signature", AttributeTarget::Class | AttributeTarget::Member) => {
                parsed.signature = Some(cp.get_utf8(sub.read_u2()?)?.to_string());
                sub.ensure_empty("Signature")?;
            }
            ("SourceFile", AttributeTarget::Class) => {
                parsed.source_file = Some(cp.get_utf8(sub.read_u2()?)?.to_string());
                sub.ensure_empty("SourceFile")?;
            }
            ("InnerClasses", AttributeTarget::Class) => {
                let num = sub.read_u2()? as usize;
                for _ in 0..num {
                    let inner_class = cp.get_class_name(sub.read_u2()?)?;
                    let outer_idx = sub.read_u2()?;
                    let name_idx = sub.read_u2()?;
                    let access_flags = sub.read_u2()?;
                    parsed.inner_classes.push(InnerClassInfo {
                        inner_class,
                        outer_class: if outer_idx == 0 {
                            None
                        } else {
                            Some(cp.get_class_name(outer_idx)?)
                        },
                        inner_name: if name_idx == 0 {
                            None
                        } else {
                            Some(cp.get_utf8(name_idx)?.to_string())
                        },
                        access_flags,
                    });
                }
                sub.ensure_empty("InnerClasses")?;
            }
            ("EnclosingMethod", AttributeTarget::Class) => {
                parsed.enclosing_class = Some(cp.get_class_name(sub.read_u2()?)?);
                sub.skip(2)?;
                sub.ensure_empty("EnclosingMethod")?;
            }
            ("ConstantValue", AttributeTarget::Member) => {
                parsed.constant_value = Some(cp.get_constant(sub.read_u2()?)?);
                sub.ensure_empty("ConstantValue")?;
            }
            ("MethodParameters", AttributeTarget::Member) => {
                let num = sub.read_u1()? as usize;
                for _ in 0..num {
                    let name_idx = sub.read_u2()?;
                    sub.skip(2)?;
                    parsed.parameter_names.push(if name_idx == 0 {
                        None
                    } else {
                        Some(cp.get_utf8(name_idx)?.to_string())
                    });
                }
                sub.ensure_empty("MethodParameters")?;
            }
            ("Code", AttributeTarget::Member) => {
                parsed.code = Some(parse_code(&mut sub, cp)?);
                sub.ensure_empty("Code")?;
            }
            ("LocalVariableTable", AttributeTarget::Code) => {
                let num = sub.read_u2()? as usize;
                let mut vars = Vec::with_capacity(num);
                for _ in 0..num {
                    vars.push(LocalVariable {
                        start_pc: sub.read_u2()?,
                        length: sub.read_u2()?,
                        name: cp.get_utf8(sub.read_u2()?)?.to_string(),
                        descriptor: cp.get_utf8(sub.read_u2()?)?.to_string(),
                        index: sub.read_u2()?,
                    });
                }
                sub.ensure_empty("LocalVariableTable")?;
                parsed
                    .code
                    .get_or_insert_with(Code::default)
                    .local_variables
                    .extend(vars);
            }
            _ => {}
        }
    }

    Ok(parsed)
}

fn parse_code(reader: &mut Reader<'_>, cp: &ConstantPool) -> Result<Code> {
    let max_stack = reader.read_u2()?;
    let max_locals = reader.read_u2()?;
    let code_length = reader.read_u4()? as usize;
    let instructions = bytecode::decode(reader.read_bytes(code_length)?, cp)?;

    let exception_count = reader.read_u2()? as usize;
    reader.skip(exception_count * 8)?;

    let attrs = parse_attributes(reader, cp, AttributeTarget::Code)?;
    let mut local_variables = attrs.code.map(|c| c.local_variables).unwrap_or_default();
    local_variables.sort_by_key(|lv| (lv.index, lv.start_pc));

    Ok(Code {
        max_stack,
        max_locals,
        instructions,
        local_variables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let err = ClassFile::parse(&[0, 0, 0, 0]).unwrap_err();
        assert_eq!(err, ClassFileError::InvalidMagic(0));
    }

    #[test]
    fn truncated_file_is_eof() {
        let err = ClassFile::parse(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0]).unwrap_err();
        assert_eq!(err, ClassFileError::UnexpectedEof);
    }

    #[test]
    fn outer_class_prefers_inner_classes_entry() {
        let cf = ClassFile {
            this_class: "a/B$C".to_string(),
            inner_classes: vec![InnerClassInfo {
                inner_class: "a/B$C".to_string(),
                outer_class: Some("a/B".to_string()),
                inner_name: Some("C".to_string()),
                access_flags: 0,
            }],
            enclosing_class: Some("a/Other".to_string()),
            ..ClassFile::default()
        };
        assert_eq!(cf.outer_class(), Some("a/B"));
    }
}
