use crate::datatype::Datatype;

#[derive(Debug, Clone, PartialEq)]
enum ExternalValue {
    Empty,
    I32(i32),
    I64(i64),
    Bool(bool),
    /// Tuple elements or struct fields, in declaration order.
    Composite(Vec<ExternalVMValue>),
    List(Vec<ExternalVMValue>),
    Enum {
        variant: usize,
        params: Vec<ExternalVMValue>,
    },
    /// A raw tagged function reference.
    Function(i64),
}

/// A host-side view of a VM value.
///
/// Wrapping reads the VM's flattened byte layout (following heap pointers for
/// lists) and materialises everything into host memory, so a wrapped value
/// stays valid across later collections. [ExternalVMValue::to_stack_value]
/// is the inverse for every type that lives purely on the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalVMValue {
    datatype: Datatype,
    value: ExternalValue,
}

impl ExternalVMValue {
    pub fn wrap_int32(value: i32) -> Self {
        Self {
            datatype: Datatype::I32,
            value: ExternalValue::I32(value),
        }
    }
    pub fn wrap_int64(value: i64) -> Self {
        Self {
            datatype: Datatype::I64,
            value: ExternalValue::I64(value),
        }
    }
    pub fn wrap_bool(value: bool) -> Self {
        Self {
            datatype: Datatype::Bool,
            value: ExternalValue::Bool(value),
        }
    }
    pub fn wrap_empty_tuple() -> Self {
        Self {
            datatype: Datatype::empty_tuple(),
            value: ExternalValue::Composite(Vec::new()),
        }
    }
    pub fn wrap_tuple(children: Vec<ExternalVMValue>) -> Self {
        let datatype = Datatype::Tuple(children.iter().map(|c| c.datatype.clone()).collect());
        Self {
            datatype,
            value: ExternalValue::Composite(children),
        }
    }

    pub fn datatype(&self) -> &Datatype {
        &self.datatype
    }

    pub fn as_i32(&self) -> Option<i32> {
        match &self.value {
            ExternalValue::I32(value) => Some(*value),
            _ => None,
        }
    }
    pub fn as_i64(&self) -> Option<i64> {
        match &self.value {
            ExternalValue::I64(value) => Some(*value),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match &self.value {
            ExternalValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
    pub fn elements(&self) -> Option<&[ExternalVMValue]> {
        match &self.value {
            ExternalValue::Composite(children) | ExternalValue::List(children) => Some(children),
            ExternalValue::Enum { params, .. } => Some(params),
            _ => None,
        }
    }

    /// Flatten to the VM's stack byte layout. Heap-backed values (lists)
    /// can't be flattened from the host side; they need an allocation inside
    /// the VM.
    pub fn to_stack_value(&self) -> Vec<u8> {
        match &self.value {
            ExternalValue::Empty => Vec::new(),
            ExternalValue::I32(value) => (*value as i64).to_le_bytes().to_vec(),
            ExternalValue::I64(value) => value.to_le_bytes().to_vec(),
            ExternalValue::Bool(value) => (*value as i64).to_le_bytes().to_vec(),
            ExternalValue::Function(value) => value.to_le_bytes().to_vec(),
            ExternalValue::Composite(children) => {
                // Element 0 sits on top of the value's stack region, so the
                // flattened form lists the children in reverse.
                let mut bytes = Vec::new();
                for child in children.iter().rev() {
                    bytes.extend(child.to_stack_value());
                }
                bytes
            }
            ExternalValue::Enum { variant, params } => {
                let total = self.datatype.size_on_stack();
                let mut bytes = (*variant as i64).to_le_bytes().to_vec();
                let mut payload = Vec::new();
                for param in params.iter().rev() {
                    payload.extend(param.to_stack_value());
                }
                bytes.resize(total - payload.len(), 0);
                bytes.extend(payload);
                bytes
            }
            ExternalValue::List(_) => {
                panic!("A list can't be marshalled into the VM from the host side")
            }
        }
    }

    /// Read a value of the given type from raw VM memory (a stack slot or a
    /// heap block). Lists are followed through the heap and copied out.
    ///
    /// # Safety
    /// `ptr` must point at a live value of exactly `datatype`'s layout, and
    /// any heap pointers inside it must still be valid.
    pub unsafe fn wrap_from_ptr(datatype: &Datatype, ptr: *const u8) -> Self {
        let value = match datatype {
            Datatype::I32 => ExternalValue::I32(read_i64(ptr) as i32),
            Datatype::I64 => ExternalValue::I64(read_i64(ptr)),
            Datatype::Bool => ExternalValue::Bool(read_i64(ptr) != 0),
            Datatype::Function(..) => ExternalValue::Function(read_i64(ptr)),
            Datatype::Tuple(types) => {
                let mut children = Vec::with_capacity(types.len());
                let mut cursor = ptr;
                for child_type in types.iter().rev() {
                    children.push(Self::wrap_from_ptr(child_type, cursor));
                    cursor = cursor.add(child_type.size_on_stack());
                }
                children.reverse();
                ExternalValue::Composite(children)
            }
            Datatype::Struct(info) => {
                let mut children = Vec::with_capacity(info.fields.len());
                let mut offset = datatype.size_on_stack();
                for index in 0..info.fields.len() {
                    let field_type = info.field_type(index);
                    offset -= field_type.size_on_stack();
                    children.push(Self::wrap_from_ptr(&field_type, ptr.add(offset)));
                }
                ExternalValue::Composite(children)
            }
            Datatype::Enum(info) => {
                let variant = read_i64(ptr) as usize;
                let params_types = &info.variants[variant].params;
                let mut offset = info.largest_field_size_plus_index();
                let mut params = Vec::with_capacity(params_types.len());
                for index in 0..params_types.len() {
                    let param_type = info.variant_param_type(variant, index);
                    offset -= param_type.size_on_stack();
                    params.push(Self::wrap_from_ptr(&param_type, ptr.add(offset)));
                }
                ExternalValue::Enum { variant, params }
            }
            Datatype::List(base) => {
                let mut children = Vec::new();
                let mut current = read_i64(ptr) as *const u8;
                while !current.is_null() {
                    children.push(Self::wrap_from_ptr(base, current.add(8)));
                    current = read_i64(current) as *const u8;
                }
                ExternalValue::List(children)
            }
            Datatype::UndeterminedIdentifier(_) => {
                let completed = datatype.complete_with_saved_template_parameters();
                return Self::wrap_from_ptr(&completed, ptr);
            }
            _ => ExternalValue::Empty,
        };
        Self {
            datatype: datatype.clone(),
            value,
        }
    }

    pub fn dump(&self) -> String {
        match &self.value {
            ExternalValue::Empty => "<unknown>".to_string(),
            ExternalValue::I32(value) => value.to_string(),
            ExternalValue::I64(value) => value.to_string(),
            ExternalValue::Bool(value) => value.to_string(),
            ExternalValue::Function(value) => format!("{:#x}", value),
            ExternalValue::Composite(children) => {
                let rendered: Vec<String> = children.iter().map(|c| c.dump()).collect();
                match &self.datatype {
                    Datatype::Struct(info) => {
                        let fields: Vec<String> = info
                            .fields
                            .iter()
                            .zip(&rendered)
                            .map(|(field, value)| format!("{}: {}", field.name, value))
                            .collect();
                        format!("{}{{{}}}", info.name, fields.join(", "))
                    }
                    _ => format!("({})", rendered.join(", ")),
                }
            }
            ExternalValue::List(children) => {
                let rendered: Vec<String> = children.iter().map(|c| c.dump()).collect();
                format!("[{}]", rendered.join(", "))
            }
            ExternalValue::Enum { variant, params } => {
                let rendered: Vec<String> = params.iter().map(|p| p.dump()).collect();
                let variant_name = match &self.datatype {
                    Datatype::Enum(info) => info.variants[*variant].name.clone(),
                    _ => variant.to_string(),
                };
                format!("{}({})", variant_name, rendered.join(", "))
            }
        }
    }
}

unsafe fn read_i64(ptr: *const u8) -> i64 {
    let mut bytes = [0u8; 8];
    std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), 8);
    i64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let value = ExternalVMValue::wrap_int32(-7);
        let bytes = value.to_stack_value();
        assert_eq!(bytes.len(), 8);
        let back = unsafe { ExternalVMValue::wrap_from_ptr(&Datatype::I32, bytes.as_ptr()) };
        assert_eq!(back.as_i32(), Some(-7));
    }

    #[test]
    fn tuple_layout_keeps_first_element_on_top() {
        let value = ExternalVMValue::wrap_tuple(vec![
            ExternalVMValue::wrap_int32(1),
            ExternalVMValue::wrap_int32(2),
        ]);
        let bytes = value.to_stack_value();
        assert_eq!(bytes.len(), 16);
        // Element 0 occupies the top (the last eight bytes).
        assert_eq!(i64::from_le_bytes(bytes[8..16].try_into().unwrap()), 1);
        assert_eq!(i64::from_le_bytes(bytes[0..8].try_into().unwrap()), 2);
        let datatype = value.datatype().clone();
        let back = unsafe { ExternalVMValue::wrap_from_ptr(&datatype, bytes.as_ptr()) };
        assert_eq!(back, value);
        assert_eq!(back.dump(), "(1, 2)");
    }

    #[test]
    fn list_wrapping_follows_cons_cells() {
        // Two hand-built cons cells: [next][value], head -> 1 -> 2.
        let mut second = Vec::new();
        second.extend(0i64.to_le_bytes());
        second.extend(2i64.to_le_bytes());
        let mut first = Vec::new();
        first.extend((second.as_ptr() as i64).to_le_bytes());
        first.extend(1i64.to_le_bytes());
        let head = (first.as_ptr() as i64).to_le_bytes();

        let datatype = Datatype::list(Datatype::I32);
        let value = unsafe { ExternalVMValue::wrap_from_ptr(&datatype, head.as_ptr()) };
        assert_eq!(value.dump(), "[1, 2]");
    }
}
