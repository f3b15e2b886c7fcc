use crate::error::CompilationError;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// A mapping from template parameter names to the concrete types they stand
/// for, e.g. `T => i32` when instantiating `fib<i32>`.
pub type TemplateParamMap = BTreeMap<String, Datatype>;

/// A structural datatype of the samal language.
///
/// Equality is structural. Struct and enum types may be incomplete: their
/// field types can mention template parameters that are resolved lazily
/// through the map captured by
/// [Datatype::complete_with_template_parameters].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datatype {
    I32,
    I64,
    F32,
    F64,
    Char,
    Bool,
    Byte,
    /// Modelled at runtime as a list of characters.
    Str,
    Tuple(Vec<Datatype>),
    List(Box<Datatype>),
    Function(Box<Datatype>, Vec<Datatype>),
    Struct(StructInfo),
    Enum(EnumInfo),
    Pointer(Box<Datatype>),
    /// A name that has not been bound yet, typically a template parameter.
    UndeterminedIdentifier(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub datatype: Datatype,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructInfo {
    pub name: String,
    /// Sorted by field name at construction so equal structs stay equal
    /// regardless of declaration order.
    pub fields: Vec<StructField>,
    pub template_params: Vec<String>,
    pub saved_template_params: Option<TemplateParamMap>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumVariant {
    pub name: String,
    pub params: Vec<Datatype>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumInfo {
    pub name: String,
    pub variants: Vec<EnumVariant>,
    pub template_params: Vec<String>,
    pub saved_template_params: Option<TemplateParamMap>,
}

impl StructInfo {
    /// A field's type with the captured template environment applied.
    pub fn field_type(&self, index: usize) -> Datatype {
        match &self.saved_template_params {
            Some(map) => self.fields[index].datatype.complete_with_template_parameters(map),
            None => self.fields[index].datatype.clone(),
        }
    }
}

impl EnumInfo {
    pub fn variant_param_type(&self, variant: usize, param: usize) -> Datatype {
        let datatype = &self.variants[variant].params[param];
        match &self.saved_template_params {
            Some(map) => datatype.complete_with_template_parameters(map),
            None => datatype.clone(),
        }
    }

    /// The stack footprint of an enum value: the 8-byte discriminant plus the
    /// payload of its largest variant.
    pub fn largest_field_size_plus_index(&self) -> usize {
        let largest = self
            .variants
            .iter()
            .map(|variant| {
                variant
                    .params
                    .iter()
                    .map(|p| {
                        match &self.saved_template_params {
                            Some(map) => p.complete_with_template_parameters(map),
                            None => p.clone(),
                        }
                        .size_on_stack()
                    })
                    .sum::<usize>()
            })
            .max()
            .unwrap_or(0);
        largest + 8
    }
}

impl Datatype {
    pub fn empty_tuple() -> Self {
        Datatype::Tuple(Vec::new())
    }
    pub fn function(return_type: Datatype, params: Vec<Datatype>) -> Self {
        Datatype::Function(Box::new(return_type), params)
    }
    pub fn list(base: Datatype) -> Self {
        Datatype::List(Box::new(base))
    }
    pub fn pointer(base: Datatype) -> Self {
        Datatype::Pointer(Box::new(base))
    }
    pub fn undetermined(name: impl Into<String>) -> Self {
        Datatype::UndeterminedIdentifier(name.into())
    }
    pub fn struct_type(
        name: impl Into<String>,
        mut fields: Vec<StructField>,
        template_params: Vec<String>,
    ) -> Self {
        fields.sort_by(|a, b| a.name.cmp(&b.name));
        Datatype::Struct(StructInfo {
            name: name.into(),
            fields,
            template_params,
            saved_template_params: None,
        })
    }
    pub fn enum_type(
        name: impl Into<String>,
        variants: Vec<EnumVariant>,
        template_params: Vec<String>,
    ) -> Self {
        Datatype::Enum(EnumInfo {
            name: name.into(),
            variants,
            template_params,
            saved_template_params: None,
        })
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Datatype::I32 | Datatype::I64)
    }

    pub fn function_type_info(&self) -> (&Datatype, &[Datatype]) {
        match self {
            Datatype::Function(return_type, params) => (return_type, params),
            _ => panic!("'{}' is not a function type", self),
        }
    }

    pub fn tuple_info(&self) -> &[Datatype] {
        match self {
            Datatype::Tuple(types) => types,
            _ => panic!("'{}' is not a tuple type", self),
        }
    }

    pub fn list_contained_type(&self) -> &Datatype {
        match self {
            Datatype::List(base) => base,
            Datatype::Str => &Datatype::Char,
            _ => panic!("'{}' is not a list type", self),
        }
    }

    /// The number of bytes a value of this type occupies on the value stack.
    /// Every scalar and pointer-like value takes one full 8-byte slot; tuples
    /// and structs are flattened field sums, enums carry their discriminant
    /// plus the largest variant payload.
    pub fn size_on_stack(&self) -> usize {
        match self {
            Datatype::I32
            | Datatype::I64
            | Datatype::F32
            | Datatype::F64
            | Datatype::Char
            | Datatype::Bool
            | Datatype::Byte
            | Datatype::Str
            | Datatype::List(_)
            | Datatype::Function(..)
            | Datatype::Pointer(_) => 8,
            Datatype::Tuple(types) => types.iter().map(|t| t.size_on_stack()).sum(),
            Datatype::Struct(info) => (0..info.fields.len())
                .map(|i| info.field_type(i).size_on_stack())
                .sum(),
            Datatype::Enum(info) => info.largest_field_size_plus_index(),
            Datatype::UndeterminedIdentifier(name) => {
                panic!("The size of the undetermined type '{}' is not known", name)
            }
        }
    }

    /// Recursively substitute every undetermined identifier with its binding
    /// from `map`. Structs and enums don't resolve their members eagerly;
    /// they capture the map so member access later resolves in this template
    /// environment.
    pub fn complete_with_template_parameters(&self, map: &TemplateParamMap) -> Datatype {
        match self {
            Datatype::I32
            | Datatype::I64
            | Datatype::F32
            | Datatype::F64
            | Datatype::Char
            | Datatype::Bool
            | Datatype::Byte
            | Datatype::Str => self.clone(),
            Datatype::UndeterminedIdentifier(name) => match map.get(name) {
                Some(replacement) => {
                    // The replacement may itself be templated (a struct or
                    // enum naming further parameters); keep substituting.
                    if matches!(replacement, Datatype::Struct(_) | Datatype::Enum(_)) {
                        replacement.complete_with_template_parameters(map)
                    } else {
                        replacement.clone()
                    }
                }
                None => self.clone(),
            },
            Datatype::Tuple(types) => Datatype::Tuple(
                types
                    .iter()
                    .map(|t| t.complete_with_template_parameters(map))
                    .collect(),
            ),
            Datatype::List(base) => {
                Datatype::list(base.complete_with_template_parameters(map))
            }
            Datatype::Function(return_type, params) => Datatype::function(
                return_type.complete_with_template_parameters(map),
                params
                    .iter()
                    .map(|p| p.complete_with_template_parameters(map))
                    .collect(),
            ),
            Datatype::Pointer(base) => {
                Datatype::pointer(base.complete_with_template_parameters(map))
            }
            Datatype::Struct(info) => {
                let mut info = info.clone();
                info.saved_template_params = Some(map.clone());
                Datatype::Struct(info)
            }
            Datatype::Enum(info) => {
                let mut info = info.clone();
                info.saved_template_params = Some(map.clone());
                Datatype::Enum(info)
            }
        }
    }

    /// Resolve this type using the template environment it captured earlier.
    pub fn complete_with_saved_template_parameters(&self) -> Datatype {
        match self {
            Datatype::Struct(info) => match &info.saved_template_params {
                Some(map) => self.complete_with_template_parameters(&map.clone()),
                None => self.clone(),
            },
            Datatype::Enum(info) => match &info.saved_template_params {
                Some(map) => self.complete_with_template_parameters(&map.clone()),
                None => self.clone(),
            },
            _ => self.clone(),
        }
    }

    pub fn has_undetermined_template_types(&self) -> bool {
        match self {
            Datatype::I32
            | Datatype::I64
            | Datatype::F32
            | Datatype::F64
            | Datatype::Char
            | Datatype::Bool
            | Datatype::Byte
            | Datatype::Str => false,
            Datatype::UndeterminedIdentifier(_) => true,
            Datatype::Tuple(types) => types.iter().any(|t| t.has_undetermined_template_types()),
            Datatype::List(base) | Datatype::Pointer(base) => {
                base.has_undetermined_template_types()
            }
            Datatype::Function(return_type, params) => {
                return_type.has_undetermined_template_types()
                    || params.iter().any(|p| p.has_undetermined_template_types())
            }
            Datatype::Struct(info) => {
                !info.template_params.is_empty() && info.saved_template_params.is_none()
            }
            Datatype::Enum(info) => {
                !info.template_params.is_empty() && info.saved_template_params.is_none()
            }
        }
    }

    /// Unify this (possibly incomplete) pattern against a fully-known type,
    /// extending `map` with the template parameter bindings that make the two
    /// equal. Fails when the shapes disagree or a parameter would need two
    /// different bindings.
    pub fn infer_template_types(
        &self,
        full_type: &Datatype,
        map: &mut TemplateParamMap,
    ) -> Result<(), CompilationError> {
        match (self, full_type) {
            (Datatype::UndeterminedIdentifier(name), _) => {
                if let Some(previous) = map.get(name) {
                    if previous != full_type {
                        return Err(CompilationError::new(format!(
                            "Template parameter '{}' can't be both '{}' and '{}'",
                            name, previous, full_type
                        )));
                    }
                } else {
                    map.insert(name.clone(), full_type.clone());
                }
                Ok(())
            }
            (Datatype::Tuple(lhs), Datatype::Tuple(rhs)) => {
                if lhs.len() != rhs.len() {
                    return Err(CompilationError::new(format!(
                        "Can't unify the tuple '{}' with '{}': they have different arities",
                        self, full_type
                    )));
                }
                for (l, r) in lhs.iter().zip(rhs) {
                    l.infer_template_types(r, map)?;
                }
                Ok(())
            }
            (Datatype::List(lhs), Datatype::List(rhs)) => lhs.infer_template_types(rhs, map),
            (Datatype::Pointer(lhs), Datatype::Pointer(rhs)) => lhs.infer_template_types(rhs, map),
            (Datatype::Function(lhs_ret, lhs_params), Datatype::Function(rhs_ret, rhs_params)) => {
                if lhs_params.len() != rhs_params.len() {
                    return Err(CompilationError::new(format!(
                        "Can't unify the function type '{}' with '{}': they have different arities",
                        self, full_type
                    )));
                }
                lhs_ret.infer_template_types(rhs_ret, map)?;
                for (l, r) in lhs_params.iter().zip(rhs_params) {
                    l.infer_template_types(r, map)?;
                }
                Ok(())
            }
            (lhs, rhs) if lhs == rhs => Ok(()),
            _ => Err(CompilationError::new(format!(
                "Can't unify '{}' with '{}'",
                self, full_type
            ))),
        }
    }
}

impl Display for Datatype {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Datatype::I32 => write!(f, "i32"),
            Datatype::I64 => write!(f, "i64"),
            Datatype::F32 => write!(f, "f32"),
            Datatype::F64 => write!(f, "f64"),
            Datatype::Char => write!(f, "char"),
            Datatype::Bool => write!(f, "bool"),
            Datatype::Byte => write!(f, "byte"),
            Datatype::Str => write!(f, "string"),
            Datatype::Tuple(types) => {
                write!(f, "(")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ")")
            }
            Datatype::List(base) => write!(f, "[{}]", base),
            Datatype::Function(return_type, params) => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", return_type)
            }
            Datatype::Struct(info) => write!(f, "<struct {}>", info.name),
            Datatype::Enum(info) => write!(f, "<enum {}>", info.name),
            Datatype::Pointer(base) => write!(f, "*{}", base),
            Datatype::UndeterminedIdentifier(name) => write!(f, "<undetermined '{}'>", name),
        }
    }
}
