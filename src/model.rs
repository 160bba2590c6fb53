//! Entities of one program: classes, methods, fields and method variables.
//!
//! Entities live in per-side arenas owned by [`crate::env::ClassEnv`] and are
//! addressed by typed index handles. Relations between entities (super
//! classes, call graph, owners) are stored as handles, never as references,
//! and match links are kept outside the entities in [`crate::graph`].

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::classfile::access;

/// The two programs being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Side::A => "a",
            Side::B => "b",
        }
    }

    pub fn from_label(label: &str) -> Option<Side> {
        match label {
            "a" => Some(Side::A),
            "b" => Some(Side::B),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityKind {
    Class,
    Method,
    Field,
    MethodArg,
    MethodVar,
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_usize(index: usize) -> Self {
                Self(index as u32)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

handle!(
    /// Handle of a class within one side's arena.
    ClassId
);
handle!(
    /// Handle of a method within one side's arena.
    MethodId
);
handle!(
    /// Handle of a field within one side's arena.
    FieldId
);
handle!(
    /// Handle of a method argument or local variable within one side's arena.
    VarId
);

/// Numeric constant with a total order, floats compared bitwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NumConst {
    Int(i32),
    Long(i64),
    Float(u32),
    Double(u64),
}

/// Instruction with operands resolved against the owning environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Insn {
    pub opcode: u8,
    pub operand: InsnOperand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsnOperand {
    None,
    Num(NumConst),
    Str(String),
    Class(ClassId),
    Method(MethodId),
    Field(FieldId),
    Local(u16),
    Jump(i32),
    Switch(usize),
    Dynamic(String),
    /// Member reference that could not be resolved in this environment.
    Unresolved(String),
}

#[derive(Debug, Clone)]
pub struct ClassInstance {
    pub id: String,
    pub name: String,
    pub access: u16,
    pub array_dims: u8,
    pub element: Option<ClassId>,
    pub arrays: Vec<ClassId>,
    pub real: bool,
    pub input: bool,
    pub name_obfuscated: bool,
    pub super_class: Option<ClassId>,
    pub interfaces: Vec<ClassId>,
    pub children: Vec<ClassId>,
    pub implementers: Vec<ClassId>,
    pub outer: Option<ClassId>,
    pub inner: Vec<ClassId>,
    pub methods: Vec<MethodId>,
    pub fields: Vec<FieldId>,
    pub signature: Option<String>,
    pub source_file: Option<String>,
    pub strings: BTreeSet<String>,
    pub numbers: BTreeSet<NumConst>,
}

impl ClassInstance {
    pub(crate) fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            access: 0,
            array_dims: 0,
            element: None,
            arrays: Vec::new(),
            real: false,
            input: false,
            name_obfuscated: false,
            super_class: None,
            interfaces: Vec::new(),
            children: Vec::new(),
            implementers: Vec::new(),
            outer: None,
            inner: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            signature: None,
            source_file: None,
            strings: BTreeSet::new(),
            numbers: BTreeSet::new(),
        }
    }

    pub fn is_array(&self) -> bool {
        self.array_dims > 0
    }

    pub fn is_interface(&self) -> bool {
        self.access & access::INTERFACE != 0
    }

    /// Name without package and enclosing class prefixes.
    pub fn simple_name(&self) -> &str {
        let tail = self.name.rsplit('/').next().unwrap_or(&self.name);
        tail.rsplit('$').next().unwrap_or(tail)
    }
}

#[derive(Debug, Clone)]
pub struct MethodInstance {
    pub id: String,
    pub name: String,
    pub desc: String,
    pub owner: ClassId,
    pub position: usize,
    pub access: u16,
    pub real: bool,
    pub name_obfuscated: bool,
    pub signature: Option<String>,
    pub ret_type: ClassId,
    pub args: Vec<VarId>,
    pub vars: Vec<VarId>,
    pub code: Vec<Insn>,
    pub refs_out: Vec<MethodId>,
    pub refs_in: Vec<MethodId>,
    /// Relative position (0..=1) of each call to this method inside its caller.
    pub in_ref_sites: Vec<(MethodId, f64)>,
    pub field_reads: Vec<FieldId>,
    pub field_writes: Vec<FieldId>,
    pub class_refs: Vec<ClassId>,
    pub strings: BTreeSet<String>,
    pub numbers: BTreeSet<NumConst>,
    pub group: usize,
}

impl MethodInstance {
    pub(crate) fn new(name: &str, desc: &str, owner: ClassId, ret_type: ClassId) -> Self {
        Self {
            id: method_id(name, desc),
            name: name.to_string(),
            desc: desc.to_string(),
            owner,
            position: 0,
            access: 0,
            real: false,
            name_obfuscated: false,
            signature: None,
            ret_type,
            args: Vec::new(),
            vars: Vec::new(),
            code: Vec::new(),
            refs_out: Vec::new(),
            refs_in: Vec::new(),
            in_ref_sites: Vec::new(),
            field_reads: Vec::new(),
            field_writes: Vec::new(),
            class_refs: Vec::new(),
            strings: BTreeSet::new(),
            numbers: BTreeSet::new(),
            group: 0,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    pub fn is_constructor_or_initializer(&self) -> bool {
        self.name.starts_with('<')
    }

    /// Participates in virtual dispatch and thus in hierarchy groups.
    pub fn is_virtual(&self) -> bool {
        self.access & (access::STATIC | access::PRIVATE) == 0 && !self.is_constructor_or_initializer()
    }
}

#[derive(Debug, Clone)]
pub struct FieldInstance {
    pub id: String,
    pub name: String,
    pub desc: String,
    pub owner: ClassId,
    pub position: usize,
    pub access: u16,
    pub real: bool,
    pub name_obfuscated: bool,
    pub signature: Option<String>,
    pub field_type: ClassId,
    pub read_refs: Vec<MethodId>,
    pub write_refs: Vec<MethodId>,
    pub read_sites: Vec<(MethodId, f64)>,
    pub write_sites: Vec<(MethodId, f64)>,
    pub init_value: Option<InitValue>,
    pub init_strings: BTreeSet<String>,
    pub init_numbers: BTreeSet<NumConst>,
    pub init_code: Vec<Insn>,
    pub record_accessor: Option<MethodId>,
}

impl FieldInstance {
    pub(crate) fn new(name: &str, desc: &str, owner: ClassId, field_type: ClassId) -> Self {
        Self {
            id: field_id(name, desc),
            name: name.to_string(),
            desc: desc.to_string(),
            owner,
            position: 0,
            access: 0,
            real: false,
            name_obfuscated: false,
            signature: None,
            field_type,
            read_refs: Vec::new(),
            write_refs: Vec::new(),
            read_sites: Vec::new(),
            write_sites: Vec::new(),
            init_value: None,
            init_strings: BTreeSet::new(),
            init_numbers: BTreeSet::new(),
            init_code: Vec::new(),
            record_accessor: None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }
}

/// `ConstantValue` attribute payload in comparable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InitValue {
    Num(NumConst),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct MethodVarInstance {
    pub method: MethodId,
    pub is_arg: bool,
    pub index: usize,
    pub lv_index: u16,
    pub var_type: ClassId,
    pub name: Option<String>,
    pub start_insn: usize,
    pub end_insn: usize,
    pub name_obfuscated: bool,
}

impl MethodVarInstance {
    pub fn kind(&self) -> EntityKind {
        if self.is_arg {
            EntityKind::MethodArg
        } else {
            EntityKind::MethodVar
        }
    }
}

pub fn method_id(name: &str, desc: &str) -> String {
    format!("{name}{desc}")
}

pub fn field_id(name: &str, desc: &str) -> String {
    format!("{name};;{desc}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_ids_follow_name_and_descriptor() {
        assert_eq!(method_id("run", "(I)V"), "run(I)V");
        assert_eq!(field_id("count", "J"), "count;;J");
    }

    #[test]
    fn simple_name_strips_package_and_outer() {
        let cls = ClassInstance::new("La/b/Outer$In;".into(), "a/b/Outer$In".into());
        assert_eq!(cls.simple_name(), "In");
    }

    #[test]
    fn side_labels_round_trip() {
        for side in [Side::A, Side::B] {
            assert_eq!(Side::from_label(side.label()), Some(side));
            assert_eq!(side.other().other(), side);
        }
        assert_eq!(Side::from_label("c"), None);
    }
}
