//! Builds a [`ClassEnv`] from parsed class files: resolves references into
//! handles, derives reverse relations, hierarchy groups and name
//! obfuscation flags.

use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

use crate::bytecode::{Instruction, Operand, insn_index_at, opcodes};
use crate::classfile::{ClassFile, ClassMember, Code};
use crate::config::NamePatterns;
use crate::constant_pool::ConstValue;
use crate::descriptor::{
    array_dimensions, class_id_from_internal_name, element_descriptor, internal_name_from_class_id,
    parse_field_descriptor, parse_method_descriptor, slot_size,
};
use crate::env::ClassEnv;
use crate::error::ClassFileError;
use crate::hierarchy::{ancestors, compute_groups};
use crate::model::{
    ClassId, ClassInstance, FieldId, FieldInstance, InitValue, Insn, InsnOperand, MethodId,
    MethodInstance, MethodVarInstance, NumConst, Side, VarId, field_id, method_id,
};

const RECORD_CLASS: &str = "java/lang/Record";

pub struct ClassEnvBuilder {
    side: Side,
    pending: Vec<(ClassFile, bool)>,
    seen: HashSet<String>,
}

impl ClassEnvBuilder {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            pending: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Queues a class; the first class added under a name wins. Returns
    /// whether the class was accepted.
    pub fn add_class(&mut self, cf: ClassFile, input: bool) -> bool {
        if !self.seen.insert(cf.this_class.clone()) {
            trace!(class = %cf.this_class, "duplicate class ignored");
            return false;
        }
        self.pending.push((cf, input));
        true
    }

    pub fn build(mut self, patterns: &NamePatterns) -> Result<ClassEnv, ClassFileError> {
        self.pending.sort_by(|a, b| a.0.this_class.cmp(&b.0.this_class));

        let mut arena = Arena::default();
        let mut real = Vec::with_capacity(self.pending.len());
        for (cf, input) in self.pending {
            let id = arena.class_for_name(&cf.this_class);
            let cls = &mut arena.classes[id.index()];
            cls.real = true;
            cls.input = input;
            cls.access = cf.access_flags;
            cls.signature = cf.signature.clone();
            cls.source_file = cf.source_file.clone();
            real.push((id, cf));
        }

        for (id, cf) in &real {
            let super_class = cf.super_class.as_deref().map(|s| arena.class_for_name(s));
            let interfaces: Vec<ClassId> = cf.interfaces.iter().map(|i| arena.class_for_name(i)).collect();
            let outer = cf.outer_class().map(|o| arena.class_for_name(o));
            let cls = &mut arena.classes[id.index()];
            cls.super_class = super_class;
            cls.interfaces = interfaces;
            cls.outer = outer;
        }

        for (id, cf) in &real {
            for member in &cf.fields {
                arena.add_real_field(*id, member)?;
            }
            for member in &cf.methods {
                arena.add_real_method(*id, member)?;
            }
        }

        for (id, cf) in &real {
            for member in &cf.methods {
                if let Some(code) = &member.code {
                    let key = (*id, method_id(&member.name, &member.descriptor));
                    if let Some(&m) = arena.method_index.get(&key) {
                        arena.process_code(m, code);
                    }
                }
            }
        }

        arena.link_reverse_relations();
        arena.link_record_accessors();
        arena.collect_class_constants();

        let groups = compute_groups(&arena.classes, &mut arena.methods);
        arena.mark_obfuscated(patterns, &groups);

        debug!(
            side = self.side.label(),
            classes = arena.classes.len(),
            methods = arena.methods.len(),
            fields = arena.fields.len(),
            groups = groups.len(),
            "class environment built"
        );

        Ok(ClassEnv {
            side: self.side,
            classes: arena.classes,
            methods: arena.methods,
            fields: arena.fields,
            vars: arena.vars,
            groups,
            by_id: arena.by_id,
        })
    }
}

#[derive(Default)]
struct Arena {
    classes: Vec<ClassInstance>,
    methods: Vec<MethodInstance>,
    fields: Vec<FieldInstance>,
    vars: Vec<MethodVarInstance>,
    by_id: HashMap<String, ClassId>,
    method_index: HashMap<(ClassId, String), MethodId>,
    field_index: HashMap<(ClassId, String), FieldId>,
}

impl Arena {
    fn class_for_name(&mut self, internal_name: &str) -> ClassId {
        self.class_for_id(&class_id_from_internal_name(internal_name))
    }

    /// Existing class for a descriptor-form id, or a new placeholder,
    /// primitive or array class.
    fn class_for_id(&mut self, id: &str) -> ClassId {
        if let Some(&existing) = self.by_id.get(id) {
            return existing;
        }

        let dims = array_dimensions(id);
        let element = (dims > 0).then(|| self.class_for_id(element_descriptor(id)));

        let handle = ClassId::from_usize(self.classes.len());
        let mut cls = ClassInstance::new(id.to_string(), internal_name_from_class_id(id).to_string());
        cls.array_dims = dims;
        cls.element = element;
        self.classes.push(cls);
        self.by_id.insert(id.to_string(), handle);
        if let Some(element) = element {
            self.classes[element.index()].arrays.push(handle);
        }
        handle
    }

    fn new_method(&mut self, owner: ClassId, name: &str, desc: &str, access: u16, real: bool) -> Result<MethodId, ClassFileError> {
        let parsed = parse_method_descriptor(desc)?;
        let ret_type = self.class_for_id(parsed.return_type);

        let handle = MethodId::from_usize(self.methods.len());
        let mut method = MethodInstance::new(name, desc, owner, ret_type);
        method.access = access;
        method.real = real;
        method.position = self.classes[owner.index()].methods.len();

        let mut lv_index: u16 = if method.is_static() { 0 } else { 1 };
        for (index, param) in parsed.params.iter().enumerate() {
            let var_type = self.class_for_id(param);
            method.args.push(self.push_var(MethodVarInstance {
                method: handle,
                is_arg: true,
                index,
                lv_index,
                var_type,
                name: None,
                start_insn: 0,
                end_insn: 0,
                name_obfuscated: false,
            }));
            lv_index += slot_size(param);
        }

        self.methods.push(method);
        self.classes[owner.index()].methods.push(handle);
        self.method_index.insert((owner, method_id(name, desc)), handle);
        Ok(handle)
    }

    fn push_var(&mut self, var: MethodVarInstance) -> VarId {
        let handle = VarId::from_usize(self.vars.len());
        self.vars.push(var);
        handle
    }

    fn add_real_method(&mut self, owner: ClassId, member: &ClassMember) -> Result<(), ClassFileError> {
        let handle = self.new_method(owner, &member.name, &member.descriptor, member.access_flags, true)?;
        self.methods[handle.index()].signature = member.signature.clone();

        let code = member.code.as_ref();
        let code_len = code.map_or(0, |c| c.instructions.len());
        let lvt = code.map(|c| c.local_variables.as_slice()).unwrap_or_default();

        let args = self.methods[handle.index()].args.clone();
        let mut first_local = if self.methods[handle.index()].is_static() { 0 } else { 1 };
        for (pos, &arg) in args.iter().enumerate() {
            let var = &mut self.vars[arg.index()];
            var.end_insn = code_len;
            var.name = lvt
                .iter()
                .find(|lv| lv.index == var.lv_index && lv.start_pc == 0)
                .map(|lv| lv.name.clone())
                .or_else(|| member.parameter_names.get(pos).cloned().flatten());
            first_local = var.lv_index + slot_size(&self.classes[var.var_type.index()].id);
        }

        let Some(code) = code else { return Ok(()) };
        let mut locals = Vec::new();
        for (index, lv) in lvt.iter().filter(|lv| lv.index >= first_local).enumerate() {
            parse_field_descriptor(&lv.descriptor)?;
            let var_type = self.class_for_id(&lv.descriptor);
            locals.push(self.push_var(MethodVarInstance {
                method: handle,
                is_arg: false,
                index,
                lv_index: lv.index,
                var_type,
                name: Some(lv.name.clone()),
                start_insn: insn_index_at(&code.instructions, lv.start_pc as u32),
                end_insn: insn_index_at(&code.instructions, lv.start_pc as u32 + lv.length as u32),
                name_obfuscated: false,
            }));
        }
        self.methods[handle.index()].vars = locals;
        Ok(())
    }

    fn new_field(&mut self, owner: ClassId, name: &str, desc: &str, access: u16, real: bool) -> Result<FieldId, ClassFileError> {
        parse_field_descriptor(desc)?;
        let field_type = self.class_for_id(desc);
        let handle = FieldId::from_usize(self.fields.len());
        let mut field = FieldInstance::new(name, desc, owner, field_type);
        field.access = access;
        field.real = real;
        field.position = self.classes[owner.index()].fields.len();
        self.fields.push(field);
        self.classes[owner.index()].fields.push(handle);
        self.field_index.insert((owner, field_id(name, desc)), handle);
        Ok(handle)
    }

    fn add_real_field(&mut self, owner: ClassId, member: &ClassMember) -> Result<(), ClassFileError> {
        let handle = self.new_field(owner, &member.name, &member.descriptor, member.access_flags, true)?;
        let field = &mut self.fields[handle.index()];
        field.signature = member.signature.clone();
        field.init_value = member.constant_value.as_ref().and_then(|v| match v {
            ConstValue::Int(i) => Some(InitValue::Num(NumConst::Int(*i))),
            ConstValue::Long(l) => Some(InitValue::Num(NumConst::Long(*l))),
            ConstValue::Float(f) => Some(InitValue::Num(NumConst::Float(f.to_bits()))),
            ConstValue::Double(d) => Some(InitValue::Num(NumConst::Double(d.to_bits()))),
            ConstValue::String(s) => Some(InitValue::Str(s.clone())),
            _ => None,
        });
        Ok(())
    }

    /// Looks a method up on `owner` and its ancestors. Misses on
    /// placeholder owners synthesise a non-real member there.
    fn resolve_method(&mut self, owner: ClassId, name: &str, desc: &str) -> Option<MethodId> {
        let id = method_id(name, desc);
        if let Some(&m) = self.method_index.get(&(owner, id.clone())) {
            return Some(m);
        }
        for ancestor in ancestors(&self.classes, owner) {
            if let Some(&m) = self.method_index.get(&(ancestor, id.clone())) {
                return Some(m);
            }
        }
        if self.classes[owner.index()].real {
            trace!(owner = %self.classes[owner.index()].name, method = %id, "unresolved method reference");
            return None;
        }
        self.new_method(owner, name, desc, 0, false).ok()
    }

    fn resolve_field(&mut self, owner: ClassId, name: &str, desc: &str) -> Option<FieldId> {
        let id = field_id(name, desc);
        if let Some(&f) = self.field_index.get(&(owner, id.clone())) {
            return Some(f);
        }
        for ancestor in ancestors(&self.classes, owner) {
            if let Some(&f) = self.field_index.get(&(ancestor, id.clone())) {
                return Some(f);
            }
        }
        if self.classes[owner.index()].real {
            trace!(owner = %self.classes[owner.index()].name, field = %id, "unresolved field reference");
            return None;
        }
        self.new_field(owner, name, desc, 0, false).ok()
    }

    fn process_code(&mut self, method: MethodId, code: &Code) {
        let insns = &code.instructions;
        let len = insns.len().max(1) as f64;
        let owner = self.methods[method.index()].owner;
        let initializer = self.methods[method.index()].is_constructor_or_initializer();

        let mut resolved = Vec::with_capacity(insns.len());
        let mut run: Vec<Insn> = Vec::new();
        for (idx, insn) in insns.iter().enumerate() {
            let operand = self.resolve_operand(method, insns, idx, insn, idx as f64 / len);
            let current = Insn {
                opcode: insn.opcode,
                operand,
            };

            if insn.is_field_write()
                && initializer
                && let InsnOperand::Field(target) = current.operand
                && self.fields[target.index()].owner == owner
            {
                let field = &mut self.fields[target.index()];
                for prior in &run {
                    match &prior.operand {
                        InsnOperand::Str(s) => {
                            field.init_strings.insert(s.clone());
                        }
                        InsnOperand::Num(n) => {
                            field.init_numbers.insert(*n);
                        }
                        _ => {}
                    }
                }
                if field.init_code.is_empty() {
                    field.init_code = run.clone();
                }
            }

            if insn.ends_value_run() {
                run.clear();
            } else {
                run.push(current.clone());
            }
            resolved.push(current);
        }

        let m = &mut self.methods[method.index()];
        for insn in &resolved {
            match &insn.operand {
                InsnOperand::Str(s) => {
                    m.strings.insert(s.clone());
                }
                InsnOperand::Num(n) if !is_implicit_constant(insn.opcode) => {
                    m.numbers.insert(*n);
                }
                _ => {}
            }
        }
        m.code = resolved;
    }

    fn resolve_operand(&mut self, method: MethodId, insns: &[Instruction], idx: usize, insn: &Instruction, site: f64) -> InsnOperand {
        match &insn.operand {
            Operand::None => implicit_constant(insn.opcode).map_or(InsnOperand::None, InsnOperand::Num),
            Operand::Int(v) => InsnOperand::Num(NumConst::Int(*v)),
            Operand::Constant(value) => self.resolve_constant(method, value),
            Operand::Local(index) | Operand::Iinc { index, .. } => InsnOperand::Local(*index),
            Operand::Jump(delta) => {
                let target = (insn.offset as i64 + *delta as i64).max(0) as u32;
                InsnOperand::Jump(insn_index_at(insns, target) as i32 - idx as i32)
            }
            Operand::Switch { keys, .. } => InsnOperand::Switch(keys.len()),
            Operand::Field(r) => {
                let owner = self.class_for_name(&r.owner);
                let Some(field) = self.resolve_field(owner, &r.name, &r.descriptor) else {
                    return InsnOperand::Unresolved(format!("{}.{}", r.owner, r.name));
                };
                let f = &mut self.fields[field.index()];
                if insn.is_field_write() {
                    f.write_refs.push(method);
                    f.write_sites.push((method, site));
                    self.methods[method.index()].field_writes.push(field);
                } else {
                    f.read_refs.push(method);
                    f.read_sites.push((method, site));
                    self.methods[method.index()].field_reads.push(field);
                }
                InsnOperand::Field(field)
            }
            Operand::Method(r) => {
                let owner = self.class_for_name(&r.owner);
                let Some(callee) = self.resolve_method(owner, &r.name, &r.descriptor) else {
                    return InsnOperand::Unresolved(format!("{}.{}{}", r.owner, r.name, r.descriptor));
                };
                self.link_call(method, callee, site);
                InsnOperand::Method(callee)
            }
            Operand::InvokeDynamic { name, descriptor } => InsnOperand::Dynamic(format!("{name}{descriptor}")),
            Operand::Type(name) | Operand::MultiANewArray { class: name, .. } => {
                let cls = self.class_for_name(name);
                self.methods[method.index()].class_refs.push(cls);
                InsnOperand::Class(cls)
            }
            Operand::NewArray(atype) => {
                let element = match atype {
                    4 => "Z",
                    5 => "C",
                    6 => "F",
                    7 => "D",
                    8 => "B",
                    9 => "S",
                    10 => "I",
                    _ => "J",
                };
                InsnOperand::Class(self.class_for_id(&format!("[{element}")))
            }
        }
    }

    fn resolve_constant(&mut self, method: MethodId, value: &ConstValue) -> InsnOperand {
        match value {
            ConstValue::Int(v) => InsnOperand::Num(NumConst::Int(*v)),
            ConstValue::Long(v) => InsnOperand::Num(NumConst::Long(*v)),
            ConstValue::Float(v) => InsnOperand::Num(NumConst::Float(v.to_bits())),
            ConstValue::Double(v) => InsnOperand::Num(NumConst::Double(v.to_bits())),
            ConstValue::String(s) => InsnOperand::Str(s.clone()),
            ConstValue::Class(name) => {
                let cls = self.class_for_name(name);
                self.methods[method.index()].class_refs.push(cls);
                InsnOperand::Class(cls)
            }
            ConstValue::MethodType(desc) => InsnOperand::Dynamic(desc.clone()),
            ConstValue::MethodHandle(r) => {
                let owner = self.class_for_name(&r.owner);
                if r.descriptor.starts_with('(')
                    && let Some(target) = self.resolve_method(owner, &r.name, &r.descriptor)
                {
                    InsnOperand::Method(target)
                } else {
                    InsnOperand::Unresolved(format!("{}.{}{}", r.owner, r.name, r.descriptor))
                }
            }
            ConstValue::Dynamic { name, descriptor } => InsnOperand::Dynamic(format!("{name}{descriptor}")),
        }
    }

    fn link_call(&mut self, caller: MethodId, callee: MethodId, site: f64) {
        self.methods[caller.index()].refs_out.push(callee);
        let target = &mut self.methods[callee.index()];
        target.refs_in.push(caller);
        target.in_ref_sites.push((caller, site));
    }

    fn link_reverse_relations(&mut self) {
        for idx in 0..self.classes.len() {
            let id = ClassId::from_usize(idx);
            let (super_class, interfaces, outer) = {
                let cls = &self.classes[idx];
                (cls.super_class, cls.interfaces.clone(), cls.outer)
            };
            if let Some(parent) = super_class {
                self.classes[parent.index()].children.push(id);
            }
            for iface in interfaces {
                self.classes[iface.index()].implementers.push(id);
            }
            if let Some(outer) = outer {
                self.classes[outer.index()].inner.push(id);
            }
        }

        for m in &mut self.methods {
            sort_dedup(&mut m.refs_out);
            sort_dedup(&mut m.refs_in);
            sort_dedup(&mut m.field_reads);
            sort_dedup(&mut m.field_writes);
            sort_dedup(&mut m.class_refs);
        }
        for f in &mut self.fields {
            sort_dedup(&mut f.read_refs);
            sort_dedup(&mut f.write_refs);
        }
    }

    fn link_record_accessors(&mut self) {
        for idx in 0..self.classes.len() {
            let cls = &self.classes[idx];
            let is_record = cls.real
                && cls
                    .super_class
                    .is_some_and(|s| self.classes[s.index()].name == RECORD_CLASS);
            if !is_record {
                continue;
            }
            let owner = ClassId::from_usize(idx);
            for field in cls.fields.clone() {
                let f = &self.fields[field.index()];
                if f.is_static() {
                    continue;
                }
                let accessor_id = method_id(&f.name, &format!("(){}", f.desc));
                let accessor = self.method_index.get(&(owner, accessor_id)).copied();
                self.fields[field.index()].record_accessor = accessor;
            }
        }
    }

    fn collect_class_constants(&mut self) {
        for idx in 0..self.classes.len() {
            let mut strings = std::collections::BTreeSet::new();
            let mut numbers = std::collections::BTreeSet::new();
            for &m in &self.classes[idx].methods {
                let method = &self.methods[m.index()];
                strings.extend(method.strings.iter().cloned());
                numbers.extend(method.numbers.iter().copied());
            }
            for &f in &self.classes[idx].fields {
                match &self.fields[f.index()].init_value {
                    Some(InitValue::Str(s)) => {
                        strings.insert(s.clone());
                    }
                    Some(InitValue::Num(n)) => {
                        numbers.insert(*n);
                    }
                    None => {}
                }
            }
            let cls = &mut self.classes[idx];
            cls.strings = strings;
            cls.numbers = numbers;
        }
    }

    fn mark_obfuscated(&mut self, patterns: &NamePatterns, groups: &[Vec<MethodId>]) {
        for cls in &mut self.classes {
            cls.name_obfuscated = cls.real
                && cls.input
                && match &patterns.class {
                    Some(p) => !p.matches(&cls.name),
                    None => {
                        cls.source_file.as_deref().is_none_or(|s| s.is_empty() || s == "SourceFile")
                            || cls.simple_name().len() <= 2
                    }
                };
        }

        let local = |classes: &[ClassInstance], c: ClassId| {
            let cls = &classes[c.index()];
            cls.real && cls.input
        };

        let group_is_local: Vec<bool> = groups
            .iter()
            .map(|g| g.iter().all(|m| local(&self.classes, self.methods[m.index()].owner)))
            .collect();

        for m in &mut self.methods {
            let owner = &self.classes[m.owner.index()];
            m.name_obfuscated = local(&self.classes, m.owner)
                && !m.is_constructor_or_initializer()
                && group_is_local[m.group]
                && member_obfuscated(patterns, owner, &m.name);
        }

        for f in &mut self.fields {
            let owner = &self.classes[f.owner.index()];
            f.name_obfuscated = local(&self.classes, f.owner) && member_obfuscated(patterns, owner, &f.name);
        }

        for v in &mut self.vars {
            let owner = self.methods[v.method.index()].owner;
            v.name_obfuscated = local(&self.classes, owner) && v.name.is_none();
        }
    }
}

fn member_obfuscated(patterns: &NamePatterns, owner: &ClassInstance, name: &str) -> bool {
    match &patterns.member {
        Some(p) => !p.matches(name),
        None => owner.name_obfuscated || name.len() <= 2,
    }
}

/// Constant pushed by `iconst_*`, `lconst_*`, `fconst_*` and `dconst_*`.
fn implicit_constant(opcode: u8) -> Option<NumConst> {
    match opcode {
        opcodes::ICONST_M1..=opcodes::ICONST_5 => Some(NumConst::Int(opcode as i32 - 3)),
        opcodes::LCONST_0 | opcodes::LCONST_1 => Some(NumConst::Long((opcode - opcodes::LCONST_0) as i64)),
        0x0b..=0x0d => Some(NumConst::Float(((opcode - 0x0b) as f32).to_bits())),
        0x0e | 0x0f => Some(NumConst::Double(((opcode - 0x0e) as f64).to_bits())),
        _ => None,
    }
}

fn is_implicit_constant(opcode: u8) -> bool {
    (opcodes::ICONST_M1..=0x0f).contains(&opcode)
}

fn sort_dedup<T: Ord>(v: &mut Vec<T>) {
    v.sort_unstable();
    v.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Instruction;
    use crate::classfile::{LocalVariable, access};
    use crate::config::NamePattern;
    use crate::constant_pool::MemberRef;

    fn insn(offset: u32, opcode: u8, operand: Operand) -> Instruction {
        Instruction {
            offset,
            opcode,
            operand,
        }
    }

    fn member(name: &str, desc: &str, flags: u16, code: Option<Code>) -> ClassMember {
        ClassMember {
            access_flags: flags,
            name: name.to_string(),
            descriptor: desc.to_string(),
            code,
            ..ClassMember::default()
        }
    }

    fn class(name: &str, super_class: &str) -> ClassFile {
        ClassFile {
            this_class: name.to_string(),
            super_class: Some(super_class.to_string()),
            ..ClassFile::default()
        }
    }

    fn sample() -> ClassEnv {
        let mut holder = class("a", "java/lang/Object");
        holder.fields.push(member("b", "Ljava/lang/String;", access::STATIC, None));
        holder.methods.push(member(
            "<clinit>",
            "()V",
            access::STATIC,
            Some(Code {
                instructions: vec![
                    insn(0, opcodes::LDC, Operand::Constant(ConstValue::String("hello".into()))),
                    insn(
                        2,
                        opcodes::PUTSTATIC,
                        Operand::Field(MemberRef {
                            owner: "a".into(),
                            name: "b".into(),
                            descriptor: "Ljava/lang/String;".into(),
                            interface: false,
                        }),
                    ),
                    insn(5, opcodes::RETURN, Operand::None),
                ],
                ..Code::default()
            }),
        ));
        holder.methods.push(member(
            "run",
            "(IJ)V",
            0,
            Some(Code {
                instructions: vec![
                    insn(
                        0,
                        opcodes::INVOKEVIRTUAL,
                        Operand::Method(MemberRef {
                            owner: "java/io/PrintStream".into(),
                            name: "flush".into(),
                            descriptor: "()V".into(),
                            interface: false,
                        }),
                    ),
                    insn(3, opcodes::RETURN, Operand::None),
                ],
                local_variables: vec![
                    LocalVariable {
                        start_pc: 0,
                        length: 4,
                        name: "count".into(),
                        descriptor: "I".into(),
                        index: 1,
                    },
                    LocalVariable {
                        start_pc: 3,
                        length: 1,
                        name: "tmp".into(),
                        descriptor: "Ljava/lang/Object;".into(),
                        index: 4,
                    },
                ],
                ..Code::default()
            }),
        ));

        let mut builder = ClassEnvBuilder::new(Side::A);
        assert!(builder.add_class(holder, true));
        assert!(!builder.add_class(class("a", "java/lang/Object"), false));
        builder.build(&NamePatterns::default()).unwrap()
    }

    #[test]
    fn builds_members_args_and_locals() {
        let env = sample();
        let cls = env.class_by_name("a").unwrap();
        let run = env.method_by_id(cls, "run(IJ)V").unwrap();
        let m = env.method(run);
        assert_eq!(m.args.len(), 2);
        let first = env.var(m.args[0]);
        assert_eq!((first.lv_index, first.name.as_deref()), (1, Some("count")));
        let second = env.var(m.args[1]);
        assert_eq!((second.lv_index, second.name.as_deref()), (2, None));
        assert!(second.name_obfuscated);

        assert_eq!(m.vars.len(), 1);
        let tmp = env.var(m.vars[0]);
        assert_eq!((tmp.lv_index, tmp.start_insn, tmp.end_insn), (4, 1, 2));
    }

    #[test]
    fn placeholder_owners_receive_synthetic_members() {
        let env = sample();
        let stream = env.class_by_name("java/io/PrintStream").unwrap();
        assert!(!env.class(stream).real);
        let flush = env.method_by_id(stream, "flush()V").unwrap();
        assert!(!env.method(flush).real);
        assert_eq!(env.method(flush).refs_in.len(), 1);
        assert!(!env.method(flush).name_obfuscated);
    }

    #[test]
    fn field_initialiser_constants_are_recorded() {
        let env = sample();
        let cls = env.class_by_name("a").unwrap();
        let field = env.field(env.field_by_id(cls, "b;;Ljava/lang/String;").unwrap());
        assert!(field.init_strings.contains("hello"));
        assert_eq!(field.init_code.len(), 1);
        assert_eq!(field.write_refs.len(), 1);
        assert!(env.class(cls).strings.contains("hello"));
    }

    #[test]
    fn obfuscation_follows_source_file_and_patterns() {
        let env = sample();
        let cls = env.class_by_name("a").unwrap();
        assert!(env.class(cls).name_obfuscated);
        let clinit = env.method_by_id(cls, "<clinit>()V").unwrap();
        assert!(!env.method(clinit).name_obfuscated);

        let mut named = class("com/example/Service", "java/lang/Object");
        named.source_file = Some("Service.java".into());
        named.methods.push(member("go", "()V", 0, None));
        named.methods.push(member("process", "()V", 0, None));
        let mut builder = ClassEnvBuilder::new(Side::B);
        builder.add_class(named, true);
        let patterns = NamePatterns {
            class: None,
            member: Some(NamePattern::new("go").unwrap()),
        };
        let env = builder.build(&patterns).unwrap();
        let cls = env.class_by_name("com/example/Service").unwrap();
        assert!(!env.class(cls).name_obfuscated);
        let go = env.method_by_id(cls, "go()V").unwrap();
        let process = env.method_by_id(cls, "process()V").unwrap();
        assert!(!env.method(go).name_obfuscated);
        assert!(env.method(process).name_obfuscated);
    }

    #[test]
    fn array_classes_link_to_their_element() {
        let mut holder = class("a", "java/lang/Object");
        holder.fields.push(member("c", "[[La;", 0, None));
        let mut builder = ClassEnvBuilder::new(Side::A);
        builder.add_class(holder, true);
        let env = builder.build(&NamePatterns::default()).unwrap();

        let arr = env.class_by_id("[[La;").unwrap();
        let elem = env.class_by_id("La;").unwrap();
        assert_eq!(env.class(arr).array_dims, 2);
        assert_eq!(env.class(arr).element, Some(elem));
        assert!(env.class(elem).arrays.contains(&arr));
    }
}
