//! Scopes, symbols and the per-module scope table

use indexmap::IndexMap;

use crate::ast::ScopeId;

/// The kind of scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Lambda,
    Comprehension,
    Class,
}

impl ScopeKind {
    /// Function-like scopes keep their bindings in frame slots
    #[must_use]
    pub const fn is_function_like(self) -> bool {
        matches!(self, Self::Function | Self::Lambda | Self::Comprehension)
    }
}

/// Flags describing how a name is used in one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolFlags(u16);

impl SymbolFlags {
    pub const NONE: SymbolFlags = SymbolFlags(0);
    /// Bound in this scope
    pub const DEF: SymbolFlags = SymbolFlags(1 << 0);
    /// Read in this scope
    pub const USE: SymbolFlags = SymbolFlags(1 << 1);
    pub const PARAM: SymbolFlags = SymbolFlags(1 << 2);
    /// Declared `global`
    pub const GLOBAL: SymbolFlags = SymbolFlags(1 << 3);
    /// Declared `nonlocal`
    pub const NONLOCAL: SymbolFlags = SymbolFlags(1 << 4);
    /// Captured from an enclosing function scope
    pub const FREE: SymbolFlags = SymbolFlags(1 << 5);
    /// Bound here and captured by an inner scope
    pub const CELL: SymbolFlags = SymbolFlags(1 << 6);

    #[inline]
    #[must_use]
    pub const fn contains(self, other: SymbolFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    #[must_use]
    pub const fn union(self, other: SymbolFlags) -> SymbolFlags {
        SymbolFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for SymbolFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for SymbolFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A name as seen from one scope
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub flags: SymbolFlags,
}

impl Symbol {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: SymbolFlags::NONE,
        }
    }

    /// Bound here without a `global`/`nonlocal` declaration
    #[must_use]
    pub fn is_local_binding(&self) -> bool {
        self.flags.contains(SymbolFlags::DEF)
            && !self.flags.contains(SymbolFlags::GLOBAL)
            && !self.flags.contains(SymbolFlags::NONLOCAL)
    }
}

/// Where the compiler should load and store a name from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameClass {
    /// Frame slot: `LoadFast`/`StoreFast`
    Fast,
    /// Cell or free variable: `LoadDeref`/`StoreDeref`
    Deref,
    /// Module namespace: `LoadGlobal`/`StoreGlobal`
    Global,
    /// Never bound in the module: `LoadBuiltin`
    Builtin,
    /// Class body namespace: `LoadName`/`StoreName`
    ClassName,
}

/// One module, function, lambda, comprehension or class body scope
#[derive(Debug, Clone)]
pub struct Scope {
    pub id: ScopeId,
    pub kind: ScopeKind,
    pub name: String,
    pub parent: Option<ScopeId>,
    pub symbols: IndexMap<String, Symbol>,
    /// Parameter names in slot order
    pub params: Vec<String>,
    pub is_generator: bool,
    /// Frame slot names: parameters first, then other locals
    pub varnames: Vec<String>,
    /// Names bound here that inner scopes capture
    pub cellvars: Vec<String>,
    /// Names captured from enclosing scopes
    pub freevars: Vec<String>,
}

impl Scope {
    #[must_use]
    pub fn new(id: ScopeId, kind: ScopeKind, name: impl Into<String>, parent: Option<ScopeId>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            parent,
            symbols: IndexMap::new(),
            params: Vec::new(),
            is_generator: false,
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
        }
    }

    pub(crate) fn flag(&mut self, name: &str, flags: SymbolFlags) -> &mut Symbol {
        let symbol = self
            .symbols
            .entry(name.to_string())
            .or_insert_with(|| Symbol::new(name));
        symbol.flags |= flags;
        symbol
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    fn has(&self, name: &str, flags: SymbolFlags) -> bool {
        self.lookup(name).is_some_and(|s| s.flags.contains(flags))
    }

    /// Fill `varnames`, `cellvars` and `freevars` from the final flags
    pub(crate) fn finish(&mut self) {
        self.cellvars = self
            .symbols
            .values()
            .filter(|s| s.flags.contains(SymbolFlags::CELL))
            .map(|s| s.name.clone())
            .collect();
        self.freevars = self
            .symbols
            .values()
            .filter(|s| s.flags.contains(SymbolFlags::FREE))
            .map(|s| s.name.clone())
            .collect();
        if self.kind.is_function_like() {
            let mut varnames = self.params.clone();
            varnames.extend(
                self.symbols
                    .values()
                    .filter(|s| {
                        s.is_local_binding()
                            && !s.flags.contains(SymbolFlags::PARAM)
                            && !s.flags.contains(SymbolFlags::CELL)
                    })
                    .map(|s| s.name.clone()),
            );
            self.varnames = varnames;
        }
    }

    /// Classify `name` for code compiled in this scope
    #[must_use]
    pub fn classify(&self, name: &str, module: &Scope) -> NameClass {
        let Some(symbol) = self.lookup(name) else {
            return implicit(name, module);
        };
        let flags = symbol.flags;
        if flags.contains(SymbolFlags::GLOBAL) {
            return NameClass::Global;
        }
        if flags.contains(SymbolFlags::NONLOCAL) {
            return NameClass::Deref;
        }
        if self.kind == ScopeKind::Class && flags.contains(SymbolFlags::DEF) {
            return NameClass::ClassName;
        }
        if flags.contains(SymbolFlags::FREE) || flags.contains(SymbolFlags::CELL) {
            return NameClass::Deref;
        }
        if flags.contains(SymbolFlags::DEF) {
            return match self.kind {
                ScopeKind::Module => NameClass::Global,
                ScopeKind::Class => NameClass::ClassName,
                _ => NameClass::Fast,
            };
        }
        implicit(name, module)
    }

    /// Index of `name` in the frame's cell array (cells, then frees)
    #[must_use]
    pub fn deref_index(&self, name: &str) -> Option<usize> {
        self.cellvars
            .iter()
            .position(|n| n == name)
            .or_else(|| {
                self.freevars
                    .iter()
                    .position(|n| n == name)
                    .map(|i| i + self.cellvars.len())
            })
    }

    /// Parameters captured by inner scopes, as (local slot, cell index)
    #[must_use]
    pub fn captured_params(&self) -> Vec<(usize, usize)> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| self.has(p, SymbolFlags::CELL))
            .filter_map(|(slot, p)| self.cellvars.iter().position(|c| c == p).map(|c| (slot, c)))
            .collect()
    }
}

/// Unbound names are globals if the module binds them, otherwise builtins
fn implicit(name: &str, module: &Scope) -> NameClass {
    if module.lookup(name).is_some_and(|s| s.flags.contains(SymbolFlags::DEF)) {
        NameClass::Global
    } else {
        NameClass::Builtin
    }
}

/// Every scope of one module, indexed by [`ScopeId`]
#[derive(Debug, Clone)]
pub struct ScopeTable {
    pub scopes: Vec<Scope>,
}

impl ScopeTable {
    #[must_use]
    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    #[must_use]
    pub fn module(&self) -> &Scope {
        self.get(ScopeId::MODULE)
    }

    /// Classify `name` as referenced from scope `id`
    #[must_use]
    pub fn classify(&self, id: ScopeId, name: &str) -> NameClass {
        self.get(id).classify(name, self.module())
    }
}

impl std::ops::Index<ScopeId> for ScopeTable {
    type Output = Scope;

    fn index(&self, id: ScopeId) -> &Scope {
        self.get(id)
    }
}
