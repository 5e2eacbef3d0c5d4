//! Thin JSON-RPC adapter around [`effc::session::SessionManager`]: each
//! method parses JSON arguments, delegates to a `CompileSession`'s
//! indexing queries, and serializes the result back to JSON. One session
//! per open document, keyed by name.

use effc::annotations::Identity;
use effc::captures::CaptureSet;
use effc::core_ir;
use effc::session::{CompileSession, SessionManager, resolve_session_id};
use effc::surface::NodeId;
use effc::symbols::{Symbol, SymbolId, Universe};
use effc::transform::{CaptureAnn, SymbolCaptureAnn, SymbolRoleAnn};
use serde::Deserialize;
use serde_json::{Value, json};

/// Static tool metadata exposed by `tools/list`/`initialize`.
#[derive(Debug, Clone)]
pub struct OperationDefinition {
    pub name: &'static str,
    pub description: &'static str,
}

/// Owns every open document's [`CompileSession`] and answers the fixed set
/// of query operations a language client asks of them.
pub struct LspHandler {
    manager: SessionManager,
}

impl Default for LspHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl LspHandler {
    #[must_use]
    pub fn new() -> Self {
        Self { manager: SessionManager::new() }
    }

    #[must_use]
    pub fn operations() -> Vec<OperationDefinition> {
        vec![
            OperationDefinition { name: "getDefinition", description: "Resolve the definition site of the symbol at a node." },
            OperationDefinition { name: "getSymbolAt", description: "Resolve the symbol an occurrence node names." },
            OperationDefinition { name: "getSymbols", description: "List every symbol defined in a session." },
            OperationDefinition { name: "getReferences", description: "List every occurrence of the symbol at a node." },
            OperationDefinition { name: "getHover", description: "Summarize the symbol at a node." },
            OperationDefinition { name: "getCodeActions", description: "List pending diagnostics as code actions." },
            OperationDefinition { name: "executeCommand", description: "Run a named command, e.g. inferredCaptures." },
        ]
    }

    /// Registers a fresh, empty session under `id`, so a client can open a
    /// new document without going through the permanent default session.
    pub fn open_document(&mut self, id: &str) -> Result<(), String> {
        self.manager.create_session(id).map(|_| ()).map_err(|e| e.to_string())
    }

    pub fn close_document(&mut self, id: &str) -> Result<(), String> {
        self.manager.destroy_session(id).map_err(|e| e.to_string())
    }

    /// Lets a caller feed a top-level tree into a session directly, since
    /// there is no external parser wired up here.
    pub fn define(&mut self, session_id: Option<&str>, tree: effc::surface::Expr) -> Result<Value, String> {
        let session = self.session_mut(session_id)?;
        session.define(tree).map(|symbol| symbol_json(session, symbol.id)).map_err(|d| format!("{d:?}"))
    }

    /// Mints a fresh symbol in a session's own table, for callers building
    /// a surface tree to feed into [`Self::define`] — mirrors how the
    /// unit tests in `effc::session` build trees directly against a
    /// session's `SymbolTable` rather than a standalone one, since a
    /// `SymbolId` only means anything relative to the table that issued it.
    pub fn fresh_symbol(&mut self, session_id: Option<&str>, name: effc::names::Name, universe: Universe) -> Result<SymbolId, String> {
        let session = self.session_mut(session_id)?;
        Ok(session.symbols.fresh(name, universe).id)
    }

    fn session(&self, session_id: Option<&str>) -> Result<&CompileSession, String> {
        let id = resolve_session_id(session_id);
        self.manager.get(id).ok_or_else(|| format!("no session named `{id}`"))
    }

    fn session_mut(&mut self, session_id: Option<&str>) -> Result<&mut CompileSession, String> {
        let id = resolve_session_id(session_id).to_string();
        self.manager.get_mut(&id).ok_or(format!("no session named `{id}`"))
    }

    pub fn get_symbols(&self, session_id: Option<&str>) -> Result<Value, String> {
        let session = self.session(session_id)?;
        let symbols: Vec<Value> = session.symbols_defined().iter().map(|s| symbol_json(session, s.id)).collect();
        Ok(Value::Array(symbols))
    }

    pub fn get_symbol_at(&self, session_id: Option<&str>, node: u32) -> Result<Value, String> {
        let session = self.session(session_id)?;
        Ok(match session.find_symbol_at(NodeId::from_raw(node)) {
            Some(symbol) => symbol_json(session, symbol),
            None => Value::Null,
        })
    }

    pub fn get_definition(&self, session_id: Option<&str>, node: u32) -> Result<Value, String> {
        let session = self.session(session_id)?;
        let Some(symbol) = session.find_symbol_at(NodeId::from_raw(node)) else {
            return Ok(Value::Null);
        };
        Ok(match session.definition_site(symbol) {
            Some(def_node) => json!({ "node": def_node.as_raw() }),
            None => Value::Null,
        })
    }

    pub fn get_references(&self, session_id: Option<&str>, node: u32) -> Result<Value, String> {
        let session = self.session(session_id)?;
        let Some(symbol) = session.find_symbol_at(NodeId::from_raw(node)) else {
            return Ok(Value::Array(Vec::new()));
        };
        let nodes: Vec<Value> = session.references_to(symbol).into_iter().map(|n| json!(n.as_raw())).collect();
        Ok(Value::Array(nodes))
    }

    pub fn get_hover(&self, session_id: Option<&str>, node: u32) -> Result<Value, String> {
        self.get_symbol_at(session_id, node)
    }

    /// Surfaces every currently queued diagnostic as a code action; this
    /// toy implementation doesn't scope actions to a node range since
    /// `Diagnostic` carries a `Span`, not a `NodeId` (§4.7 leaves spans
    /// independent of the surface-tree stand-in).
    pub fn get_code_actions(&self, session_id: Option<&str>) -> Result<Value, String> {
        let session = self.session(session_id)?;
        let actions: Vec<Value> = session
            .diagnostics
            .clone()
            .take_sorted("")
            .into_iter()
            .map(|diagnostic| json!({ "title": format!("{diagnostic:?}") }))
            .collect();
        Ok(Value::Array(actions))
    }

    pub fn execute_command(&self, session_id: Option<&str>, command: &str, params: Value) -> Result<Value, String> {
        match command {
            "inferredCaptures" => self.inferred_captures(session_id, params),
            other => Err(format!("unknown command `{other}`")),
        }
    }

    fn inferred_captures(&self, session_id: Option<&str>, params: Value) -> Result<Value, String> {
        #[derive(Deserialize)]
        struct Params {
            node: u32,
        }
        let params: Params = serde_json::from_value(params).map_err(|e| format!("invalid inferredCaptures params: {e}"))?;
        let session = self.session(session_id)?;
        let node = NodeId::from_raw(params.node);
        let node_captures = session.annotations.get::<CaptureAnn>(node).cloned();
        let symbol_captures = session
            .find_symbol_at(node)
            .and_then(|symbol| session.annotations.get::<SymbolCaptureAnn>(symbol).cloned());
        Ok(json!({
            "node": captures_json(node_captures.as_ref()),
            "symbol": captures_json(symbol_captures.as_ref()),
        }))
    }
}

fn captures_json(captures: Option<&CaptureSet>) -> Value {
    let Some(captures) = captures else {
        return Value::Null;
    };
    json!({
        "isEmpty": captures.is_empty(),
        "isPure": captures.is_pure(),
        "isPureOrIo": captures.is_pure_or_io(),
        "members": captures.members().len(),
    })
}

fn symbol_json(session: &CompileSession, symbol: SymbolId) -> Value {
    let name = symbol_name(session, symbol);
    let role = session.annotations.get::<SymbolRoleAnn>(symbol).map(|r| format!("{r:?}"));
    json!({
        "id": symbol.identity(),
        "name": name,
        "universe": universe_name(session.symbols.universe_of(symbol)),
        "role": role,
    })
}

fn symbol_name(session: &CompileSession, symbol: SymbolId) -> Option<String> {
    session
        .symbols_defined()
        .into_iter()
        .find(|s: &Symbol| s.id == symbol)
        .map(|s| s.name.render(&session.words))
}

fn universe_name(universe: Universe) -> &'static str {
    match universe {
        Universe::Type => "type",
        Universe::Value => "value",
        Universe::Block => "block",
    }
}

/// Re-exported so `main.rs` can build a throwaway module for smoke-testing
/// the interpreter-free query operations without a real build step.
pub type CoreModule = core_ir::Module;
