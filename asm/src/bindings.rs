use crate::Type;

/// One name-to-type entry in a [`Bindings`] table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Source-level name.
    pub name: String,
    /// Its type.
    pub ty: Type,
}

/// Append-only record table partitioned into a global prefix and a local
/// suffix.
///
/// Lookup scans backward so that the most recently pushed binding with a
/// matching name wins, which is what gives inner scopes (procedure
/// parameters) shadowing over outer ones (globals, or an enclosing
/// procedure's earlier parameters).
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    entries: Vec<Binding>,
    global_count: usize,
}

impl Bindings {
    /// An empty table.
    pub fn new() -> Bindings {
        Bindings { entries: Vec::new(), global_count: 0 }
    }

    /// Number of bindings in the global prefix.
    pub fn global_count(&self) -> usize {
        self.global_count
    }

    /// Total number of bindings (global prefix + local suffix).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no bindings at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Push a binding onto the global prefix. Must only be called while no
    /// local bindings are in scope.
    pub fn push_global(&mut self, name: impl Into<String>, ty: Type) -> usize {
        debug_assert_eq!(self.entries.len(), self.global_count, "cannot push a global while locals are in scope");
        let index = self.entries.len();
        self.entries.push(Binding { name: name.into(), ty });
        self.global_count += 1;
        index
    }

    /// Push a binding onto the local suffix (a procedure parameter or a
    /// local `:=` target).
    pub fn push_local(&mut self, name: impl Into<String>, ty: Type) -> usize {
        let index = self.entries.len();
        self.entries.push(Binding { name: name.into(), ty });
        index
    }

    /// Truncate the local suffix back down to `count` entries. Used when a
    /// procedure body finishes compiling and its parameter bindings go out
    /// of scope.
    pub fn truncate_locals(&mut self, count: usize) {
        debug_assert!(count >= self.global_count, "cannot truncate into the global prefix");
        self.entries.truncate(count);
    }

    /// Look up a name, scanning from the most recently pushed binding
    /// backward. Returns the binding's index and type.
    pub fn lookup(&self, name: &str) -> Option<(usize, &Type)> {
        self.entries.iter().enumerate().rev().find(|(_, b)| b.name == name).map(|(i, b)| (i, &b.ty))
    }

    /// Binding at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Binding> {
        self.entries.get(index)
    }

    /// True if `index` addresses the global prefix rather than the local suffix.
    pub fn is_global(&self, index: usize) -> bool {
        index < self.global_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backward_scan_shadows_outer_bindings() {
        let mut b = Bindings::new();
        b.push_global("x", Type::int64());
        let mark = b.len();
        b.push_local("x", Type::array_of(Type::int64()));
        let (idx, ty) = b.lookup("x").unwrap();
        assert_eq!(idx, 1);
        assert!(matches!(ty, Type::Array(_)));
        b.truncate_locals(mark);
        let (idx, ty) = b.lookup("x").unwrap();
        assert_eq!(idx, 0);
        assert_eq!(*ty, Type::int64());
    }

    #[test]
    fn global_local_partition() {
        let mut b = Bindings::new();
        b.push_global("a", Type::int64());
        b.push_global("b", Type::int64());
        b.push_local("c", Type::int64());
        assert_eq!(b.global_count(), 2);
        assert!(b.is_global(1));
        assert!(!b.is_global(2));
    }
}
