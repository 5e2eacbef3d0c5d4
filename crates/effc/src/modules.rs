//! The module graph: modules own term/type maps and an import list, and
//! resolve references through scoped lookup (§4.2).

use indexmap::IndexMap;

use crate::{
    names::Word,
    symbols::SymbolId,
};

/// A module's provenance: either a root or nested under a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// A root module compiled directly from a source file.
    SourceModule,
    /// A module nested under another (namespace-introducing block, object).
    UserModule,
}

/// Opaque identity for a module in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u32);

/// A module: a `types` map (unique per word), a `terms` map (overloads
/// permitted), and an ordered `imports` list.
#[derive(Debug, Clone)]
pub struct Module {
    pub kind: ModuleKind,
    pub parent: Option<ModuleId>,
    types: IndexMap<Word, SymbolId>,
    terms: IndexMap<Word, Vec<SymbolId>>,
    children: IndexMap<Word, ModuleId>,
    /// Import list in declaration order; later entries shadow earlier ones
    /// once walked in reverse (§4.2).
    imports: Vec<ModuleId>,
}

impl Module {
    #[must_use]
    pub fn new(kind: ModuleKind, parent: Option<ModuleId>) -> Self {
        Self {
            kind,
            parent,
            types: IndexMap::new(),
            terms: IndexMap::new(),
            children: IndexMap::new(),
            imports: Vec::new(),
        }
    }

    pub fn define_type(&mut self, word: Word, symbol: SymbolId) {
        self.types.insert(word, symbol);
    }

    pub fn define_term(&mut self, word: Word, symbol: SymbolId) {
        self.terms.entry(word).or_default().push(symbol);
    }

    pub fn define_child(&mut self, word: Word, module: ModuleId) {
        self.children.insert(word, module);
    }

    pub fn add_import(&mut self, module: ModuleId) {
        self.imports.push(module);
    }

    #[must_use]
    pub fn own_type(&self, word: Word) -> Option<SymbolId> {
        self.types.get(&word).copied()
    }

    #[must_use]
    pub fn own_terms(&self, word: Word) -> &[SymbolId] {
        self.terms.get(&word).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn own_child(&self, word: Word) -> Option<ModuleId> {
        self.children.get(&word).copied()
    }

    #[must_use]
    pub fn imports(&self) -> &[ModuleId] {
        &self.imports
    }
}

/// Owns every [`Module`] and performs scoped lookups and dependency-closure
/// computation.
#[derive(Debug, Default, Clone)]
pub struct ModuleGraph {
    modules: Vec<Module>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, module: Module) -> ModuleId {
        let id = ModuleId(u32::try_from(self.modules.len()).expect("too many modules"));
        self.modules.push(module);
        id
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0 as usize]
    }

    /// Reverse-postorder dependency closure of `root`'s imports: each
    /// import's own dependency closure appears before the import itself,
    /// and `root` is not included.
    #[must_use]
    pub fn dependencies(&self, root: ModuleId) -> Vec<ModuleId> {
        let mut order = Vec::new();
        let mut visiting = std::collections::HashSet::new();
        self.postorder(root, &mut order, &mut visiting, true);
        order
    }

    fn postorder(
        &self,
        module: ModuleId,
        order: &mut Vec<ModuleId>,
        visiting: &mut std::collections::HashSet<ModuleId>,
        is_root: bool,
    ) {
        if !visiting.insert(module) {
            return;
        }
        for &import in self.get(module).imports() {
            self.postorder(import, order, visiting, false);
        }
        if !is_root && !order.contains(&module) {
            order.push(module);
        }
    }

    /// `typ(w)`: own types first, then dependencies walked in reverse so
    /// later imports shadow earlier ones.
    #[must_use]
    pub fn lookup_type(&self, module: ModuleId, word: Word) -> Option<SymbolId> {
        if let Some(sym) = self.get(module).own_type(word) {
            return Some(sym);
        }
        for &dep in self.dependencies(module).iter().rev() {
            if let Some(sym) = self.get(dep).own_type(word) {
                return Some(sym);
            }
        }
        None
    }

    /// `trm(w)`: accumulates all overloads across the module and its
    /// dependencies, order-insensitive.
    #[must_use]
    pub fn lookup_terms(&self, module: ModuleId, word: Word) -> Vec<SymbolId> {
        let mut found = self.get(module).own_terms(word).to_vec();
        for dep in self.dependencies(module) {
            found.extend_from_slice(self.get(dep).own_terms(word));
        }
        found
    }

    /// `mod(a·b)`: threads both segments through module children.
    #[must_use]
    pub fn lookup_module(&self, module: ModuleId, word: Word) -> Option<ModuleId> {
        self.get(module).own_child(word)
    }

    /// Qualified `typ(a·b)`: resolve `a` as a module, then recurse `typ(b)`
    /// inside it.
    #[must_use]
    pub fn lookup_qualified_type(&self, module: ModuleId, parent: Word, child: Word) -> Option<SymbolId> {
        let sub = self.lookup_module(module, parent)?;
        self.get(sub).own_type(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{names::Name, symbols::{SymbolTable, Universe}};

    fn term_symbol(table: &mut SymbolTable) -> SymbolId {
        table.fresh(Name::Blk, Universe::Block).id
    }

    #[test]
    fn own_definitions_shadow_dependencies() {
        let mut table = SymbolTable::new();
        let mut words = crate::names::WordInterner::new();
        let w = words.intern("f");

        let mut graph = ModuleGraph::new();
        let base = graph.insert(Module::new(ModuleKind::SourceModule, None));
        let base_sym = term_symbol(&mut table);
        graph.get_mut(base).define_type(w, base_sym);

        let mut user = Module::new(ModuleKind::SourceModule, None);
        let user_sym = term_symbol(&mut table);
        user.define_type(w, user_sym);
        user.add_import(base);
        let user_id = graph.insert(user);

        assert_eq!(graph.lookup_type(user_id, w), Some(user_sym));
    }

    #[test]
    fn later_import_shadows_earlier_import() {
        let mut table = SymbolTable::new();
        let mut words = crate::names::WordInterner::new();
        let w = words.intern("f");

        let mut graph = ModuleGraph::new();
        let early = graph.insert(Module::new(ModuleKind::SourceModule, None));
        let early_sym = term_symbol(&mut table);
        graph.get_mut(early).define_type(w, early_sym);

        let late = graph.insert(Module::new(ModuleKind::SourceModule, None));
        let late_sym = term_symbol(&mut table);
        graph.get_mut(late).define_type(w, late_sym);

        let mut root = Module::new(ModuleKind::SourceModule, None);
        root.add_import(early);
        root.add_import(late);
        let root_id = graph.insert(root);

        assert_eq!(graph.lookup_type(root_id, w), Some(late_sym));
    }

    #[test]
    fn term_lookup_accumulates_overloads() {
        let mut table = SymbolTable::new();
        let mut words = crate::names::WordInterner::new();
        let w = words.intern("log");

        let mut graph = ModuleGraph::new();
        let dep = graph.insert(Module::new(ModuleKind::SourceModule, None));
        let dep_sym = term_symbol(&mut table);
        graph.get_mut(dep).define_term(w, dep_sym);

        let mut root = Module::new(ModuleKind::SourceModule, None);
        let root_sym1 = term_symbol(&mut table);
        let root_sym2 = term_symbol(&mut table);
        root.define_term(w, root_sym1);
        root.define_term(w, root_sym2);
        root.add_import(dep);
        let root_id = graph.insert(root);

        let mut overloads = graph.lookup_terms(root_id, w);
        overloads.sort();
        let mut expected = vec![dep_sym, root_sym1, root_sym2];
        expected.sort();
        assert_eq!(overloads, expected);
    }
}
