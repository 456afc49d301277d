use crate::WordSize;

/// One field of a [`Type::Record`], in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordField {
    /// Field name, unique within its record.
    pub name: String,
    /// Field type.
    pub ty: Type,
}

/// The language's type model.
///
/// Composite types own their children outright: there is no sharing of
/// `Type` subgraphs across bindings, so cloning a composite type deep-clones
/// it and destroying one recursively frees everything under it. This mirrors
/// the ownership discipline the reference implementation enforced manually
/// with `destroy_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// Signed integer of the given width.
    Int(WordSize),
    /// Unsigned integer of the given width.
    UInt(WordSize),
    /// Raw bit pattern of the given width, no arithmetic semantics.
    Word(WordSize),
    /// IEEE float, 32 or 64 bit (only `W32`/`W64` are meaningful).
    Float(WordSize),
    /// Fixed-arity ordered product of types.
    Tuple(Vec<Type>),
    /// Named-field ordered product of types.
    Record(Vec<RecordField>),
    /// Homogeneous, runtime-sized, reference-counted array of one element type.
    Array(Box<Type>),
    /// A procedure signature: ordered input types to ordered output types.
    Procedure {
        /// Parameter types, in declaration order.
        inputs: Vec<Type>,
        /// Return types, in declaration order (empty or singleton in practice).
        outputs: Vec<Type>,
    },
}

impl Type {
    /// The canonical 64-bit signed integer type used for all literals today.
    pub fn int64() -> Type {
        Type::Int(WordSize::W64)
    }

    /// `{}`, the empty tuple — the starting type of an in-progress struct literal.
    pub fn empty_tuple() -> Type {
        Type::Tuple(Vec::new())
    }

    /// `{:}` in spirit: a record with no fields yet, used while a struct
    /// literal is still being classified as record-vs-tuple during compilation.
    pub fn empty_record() -> Type {
        Type::Record(Vec::new())
    }

    /// Construct `[T]` from `T`.
    pub fn array_of(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    /// Construct a procedure type from parameter and return type lists.
    pub fn procedure(inputs: Vec<Type>, outputs: Vec<Type>) -> Type {
        Type::Procedure { inputs, outputs }
    }

    /// Total size in bytes this type occupies when stored by value.
    ///
    /// Arrays occupy one shared-buffer descriptor (pointer + length) rather
    /// than their element count times element size, since the backing
    /// storage is heap-allocated and refcounted separately.
    pub fn total_size(&self) -> usize {
        match self {
            Type::Int(w) | Type::UInt(w) | Type::Word(w) | Type::Float(w) => w.bytes(),
            Type::Tuple(elems) => elems.iter().map(Type::total_size).sum(),
            Type::Record(fields) => fields.iter().map(|f| f.ty.total_size()).sum(),
            Type::Array(_) => 2 * WordSize::W64.bytes(),
            Type::Procedure { .. } => WordSize::W64.bytes(),
        }
    }

    /// True if this is one of the scalar connectives (`Int`/`UInt`/`Word`/`Float`).
    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Int(_) | Type::UInt(_) | Type::Word(_) | Type::Float(_))
    }

    /// True if a value of this type owns heap-refcounted storage (an array,
    /// or an aggregate that embeds one).
    pub fn is_refcounted(&self) -> bool {
        match self {
            Type::Array(_) => true,
            Type::Tuple(elems) => elems.iter().any(Type::is_refcounted),
            Type::Record(fields) => fields.iter().any(|f| f.ty.is_refcounted),
            _ => false,
        }
    }

    /// Look up a record field by name, returning its index and type.
    pub fn lookup_field(&self, name: &str) -> Option<(usize, &Type)> {
        match self {
            Type::Record(fields) => fields
                .iter()
                .enumerate()
                .find(|(_, f)| f.name == name)
                .map(|(i, f)| (i, &f.ty)),
            _ => None,
        }
    }

    /// Byte offset of the given tuple/record element index.
    pub fn element_offset(&self, index: usize) -> usize {
        match self {
            Type::Tuple(elems) => elems[..index].iter().map(Type::total_size).sum(),
            Type::Record(fields) => fields[..index].iter().map(|f| f.ty.total_size()).sum(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_total_size_is_descriptor_sized() {
        let arr = Type::array_of(Type::int64());
        assert_eq!(arr.total_size(), 16);
    }

    #[test]
    fn record_field_lookup() {
        let rec = Type::Record(vec![
            RecordField { name: "x".into(), ty: Type::int64() },
            RecordField { name: "y".into(), ty: Type::int64() },
        ]);
        let (idx, ty) = rec.lookup_field("y").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(*ty, Type::int64());
        assert_eq!(rec.element_offset(1), 8);
    }

    #[test]
    fn tuple_with_array_is_refcounted() {
        let t = Type::Tuple(vec![Type::int64(), Type::array_of(Type::int64())]);
        assert!(t.is_refcounted());
        assert!(!Type::int64().is_refcounted());
    }
}
