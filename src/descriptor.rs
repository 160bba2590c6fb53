//! Field and method descriptor helpers.
//!
//! Classes are identified by their descriptor form throughout the model
//! (`Lpkg/Name;`, `I`, `[[Lpkg/Name;`), so most helpers here work on
//! descriptor slices rather than building a type tree.

use crate::error::ClassFileError;

type Result<T> = std::result::Result<T, ClassFileError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor<'a> {
    pub params: Vec<&'a str>,
    pub return_type: &'a str,
}

/// Splits `(ILjava/lang/String;)[I` into its parameter and return type
/// descriptors. `V` is returned verbatim for void methods.
pub fn parse_method_descriptor(desc: &str) -> Result<MethodDescriptor<'_>> {
    let invalid = || ClassFileError::InvalidDescriptor(desc.to_string());
    let body = desc.strip_prefix('(').ok_or_else(invalid)?;
    let close = body.find(')').ok_or_else(invalid)?;
    let (mut args, ret) = (&body[..close], &body[close + 1..]);

    let mut params = Vec::new();
    while !args.is_empty() {
        let end = field_type_len(args).ok_or_else(invalid)?;
        params.push(&args[..end]);
        args = &args[end..];
    }

    if ret != "V" && field_type_len(ret) != Some(ret.len()) {
        return Err(invalid());
    }

    Ok(MethodDescriptor {
        params,
        return_type: ret,
    })
}

/// Validates a complete field descriptor.
pub fn parse_field_descriptor(desc: &str) -> Result<&str> {
    if field_type_len(desc) == Some(desc.len()) {
        Ok(desc)
    } else {
        Err(ClassFileError::InvalidDescriptor(desc.to_string()))
    }
}

fn field_type_len(input: &str) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut idx = 0usize;
    while bytes.get(idx) == Some(&b'[') {
        idx += 1;
    }
    match bytes.get(idx)? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(idx + 1),
        b'L' => {
            let end = input[idx..].find(';')?;
            if end <= 1 {
                return None;
            }
            Some(idx + end + 1)
        }
        _ => None,
    }
}

/// Local variable slots occupied by a value of the given type.
pub fn slot_size(desc: &str) -> u16 {
    match desc {
        "J" | "D" => 2,
        _ => 1,
    }
}

pub fn array_dimensions(desc: &str) -> u8 {
    desc.bytes().take_while(|b| *b == b'[').count().min(u8::MAX as usize) as u8
}

/// Descriptor of the innermost element type of an array descriptor.
pub fn element_descriptor(desc: &str) -> &str {
    desc.trim_start_matches('[')
}

/// Converts an internal name as found in `CONSTANT_Class` (`pkg/Name` or
/// an array descriptor) to the class id form.
pub fn class_id_from_internal_name(name: &str) -> String {
    if name.starts_with('[') {
        name.to_string()
    } else {
        format!("L{name};")
    }
}

/// Inverse of [`class_id_from_internal_name`] for object types; primitive
/// and array ids are returned unchanged.
pub fn internal_name_from_class_id(id: &str) -> &str {
    id.strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .unwrap_or(id)
}

pub fn is_primitive(desc: &str) -> bool {
    matches!(desc, "B" | "C" | "D" | "F" | "I" | "J" | "S" | "Z" | "V")
}
