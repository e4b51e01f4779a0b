use std::collections::HashMap;

/// Scope classification of a resolved symbol: where the VM finds its
/// value at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    /// A slot in the globals slab.
    Global,
    /// A slot in the current frame's local region.
    Local,
    /// A slot in the current closure's captured free vector.
    Free,
}

/// A named binding: its scope kind and its slot index within that scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

/// Lexical scope of named bindings.
///
/// Tables form a parent-linked chain; the root table (no outer) defines
/// globals, every enclosed table defines locals. Resolving a name that
/// lives in an enclosing *function* scope lazily records it as a free
/// symbol here, in first-use order, so the compiler knows which values
/// to capture when it emits the closure.
#[derive(Debug, Default)]
pub struct SymbolTable {
    outer: Option<Box<SymbolTable>>,
    store: HashMap<String, Symbol>,

    /// Free symbols in first-use order, as seen from the *enclosing*
    /// scope. The enclosing compilation pushes these values before
    /// OpClosure; index `n` here matches `OpGetFree n` inside.
    pub free_symbols: Vec<Symbol>,

    /// Definitions made directly in this scope, parameters included.
    pub num_definitions: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Wrap `outer` in a fresh inner scope.
    pub fn enclosed(outer: SymbolTable) -> Self {
        SymbolTable {
            outer: Some(Box::new(outer)),
            ..SymbolTable::default()
        }
    }

    /// Detach and return the enclosing table, if any.
    pub fn take_outer(&mut self) -> Option<SymbolTable> {
        self.outer.take().map(|outer| *outer)
    }

    /// True for the root table, the one defining globals.
    #[allow(dead_code)]
    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    /// Bind `name` to the next index of this scope.
    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.outer.is_none() {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };

        let symbol = Symbol {
            name: name.to_string(),
            scope,
            index: self.num_definitions,
        };
        self.num_definitions += 1;
        self.store.insert(name.to_string(), symbol.clone());

        symbol
    }

    /// Record a symbol of an enclosing function scope as captured here.
    ///
    /// Keeps the original symbol in `free_symbols` (the capture site
    /// needs its outer coordinates) and shadows the name locally with a
    /// Free symbol pointing at the matching capture slot.
    fn define_free(&mut self, original: Symbol) -> Symbol {
        self.free_symbols.push(original.clone());

        let symbol = Symbol {
            name: original.name,
            scope: SymbolScope::Free,
            index: self.free_symbols.len() - 1,
        };
        self.store.insert(symbol.name.clone(), symbol.clone());

        symbol
    }

    /// Look up `name` here or in any enclosing scope.
    ///
    /// Globals resolve unchanged from any depth. A Local or Free symbol
    /// of an enclosing scope is lifted: every scope between the
    /// definition and the reference gains a free entry, so each level
    /// captures from the one above it. Resolving the same name twice
    /// reuses the entry made the first time.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.store.get(name) {
            return Some(symbol.clone());
        }

        let outer_symbol = self.outer.as_mut()?.resolve(name)?;
        if outer_symbol.scope == SymbolScope::Global {
            return Some(outer_symbol);
        }

        Some(self.define_free(outer_symbol))
    }
}
