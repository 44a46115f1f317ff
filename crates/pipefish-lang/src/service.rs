//! The service façade: the embedding API.
//!
//! A `Service` binds a parser arena, a compiler and a VM into a reloadable
//! unit. It is reconstructed from scratch whenever live-reload detects that
//! any source file it depends on has changed; the environment store is
//! passed back in so `$_env` survives the rebuild.

use crate::compiler::{Compiler, Ctx};
use crate::highlight::{self, Theme};
use crate::initializer::{self, ExternalResolver, NoExternals};
use crate::parser::{ParseRun, ParserArena};
use crate::relexer;
use indexmap::IndexMap;
use pipefish_foundation::error::{Error, ErrorFormatter};
use pipefish_vm::values::{self, AbstractType};
use pipefish_vm::{InputHandler, Op, OutputHandler, Payload, Value, Vm};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error as ThisError;
use tracing::info;

/// Failures of the service machinery itself, as opposed to diagnostics in
/// the hosted code.
#[derive(Debug, ThisError)]
pub enum ServiceError {
    #[error("couldn't read script: {0}")]
    Io(#[from] std::io::Error),
    #[error("the service failed to compile")]
    Broken,
}

/// A compiled, runnable script plus its REPL environment.
pub struct Service {
    pub vm: Vm,
    pub arena: ParserArena,
    pub compiler: Compiler,
    /// Source name → source text, for error formatting.
    pub sources: IndexMap<String, String>,
    script_path: Option<PathBuf>,
    base_dir: PathBuf,
    last_mod: IndexMap<PathBuf, SystemTime>,
    /// The user-visible environment, preserved across rebuilds.
    env: IndexMap<String, String>,
    /// Resolves `external` declarations; the default reports them
    /// unreachable. Preserved across rebuilds.
    externals: Box<dyn ExternalResolver>,
    /// Turns on tracking instrumentation at the next initialization.
    pub tracking: bool,
}

impl Default for Service {
    fn default() -> Self {
        Self::new()
    }
}

impl Service {
    /// A fresh service: builtins installed, no script.
    pub fn new() -> Self {
        let mut vm = Vm::new();
        let mut arena = ParserArena::new();
        let mut compiler = Compiler::new(&mut vm);
        initializer::install_builtins(&mut arena.parsers[0], &mut compiler, &mut vm);
        let mut service = Service {
            vm,
            arena,
            compiler,
            sources: IndexMap::new(),
            script_path: None,
            base_dir: PathBuf::from("."),
            last_mod: IndexMap::new(),
            env: IndexMap::new(),
            externals: Box::new(NoExternals),
            tracking: false,
        };
        service.install_env_global();
        service
    }

    /// Set the environment mapping exposed as `$_env`. Takes effect at the
    /// next initialization.
    pub fn with_env(mut self, env: IndexMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn install_env_global(&mut self) {
        let map: indexmap::IndexMap<Value, Value> = self
            .env
            .iter()
            .map(|(k, v)| (Value::string(k.clone()), Value::string(v.clone())))
            .collect();
        let value = Value::new(values::MAP, Payload::Map(Arc::new(map)));
        let slot = crate::compiler::push_global(&mut self.vm, value);
        self.compiler.globals.insert(
            "$_env".to_string(),
            crate::compiler::GlobalInfo {
                slot,
                types: AbstractType::single(values::MAP),
                constant: false,
            },
        );
    }

    /// Load and compile a script. Compilation diagnostics are reachable
    /// through `get_errors`; only I/O failures are `Err`.
    pub fn initialize_from_filepath(&mut self, path: impl AsRef<Path>) -> Result<(), ServiceError> {
        let path = path.as_ref().to_path_buf();
        let code = std::fs::read_to_string(&path)?;
        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        self.script_path = Some(path.clone());
        self.base_dir = base_dir;
        self.initialize_from_source(&name, &code);
        self.record_mtimes();
        Ok(())
    }

    /// Compile source text into this service, rebuilding from scratch.
    pub fn initialize_from_source(&mut self, name: &str, code: &str) {
        info!(source = name, "building service");
        let env = std::mem::take(&mut self.env);
        let externals = std::mem::replace(&mut self.externals, Box::new(NoExternals));
        let tracking = self.tracking;
        let base_dir = self.base_dir.clone();
        let script_path = self.script_path.clone();
        *self = Service::new().with_env(env);
        self.install_env_global();
        self.base_dir = base_dir;
        self.script_path = script_path;
        self.externals = externals;
        self.compiler.tracking_on = tracking;
        self.tracking = tracking;
        let mut sources = std::mem::take(&mut self.sources);
        initializer::initialize(
            &mut self.vm,
            &mut self.arena,
            &mut self.compiler,
            0,
            name,
            code,
            &self.base_dir.clone(),
            &mut sources,
            self.externals.as_mut(),
        );
        self.sources = sources;
    }

    fn record_mtimes(&mut self) {
        self.last_mod.clear();
        for name in self.sources.keys() {
            let candidate = if Path::new(name).is_absolute() {
                PathBuf::from(name)
            } else if self
                .script_path
                .as_ref()
                .map(|p| p.file_name().map(|f| f.to_string_lossy() == *name).unwrap_or(false))
                .unwrap_or(false)
            {
                match &self.script_path {
                    Some(p) => p.clone(),
                    None => self.base_dir.join(name),
                }
            } else {
                self.base_dir.join(name)
            };
            if let Ok(meta) = std::fs::metadata(&candidate) {
                if let Ok(modified) = meta.modified() {
                    self.last_mod.insert(candidate, modified);
                }
            }
        }
    }

    /// Has any source file changed on disk since compilation?
    pub fn needs_update(&self) -> bool {
        self.last_mod.iter().any(|(path, recorded)| {
            match std::fs::metadata(path).and_then(|m| m.modified()) {
                Ok(current) => current != *recorded,
                Err(_) => true,
            }
        })
    }

    /// Rebuild from the recorded script path.
    pub fn rebuild(&mut self) -> Result<(), ServiceError> {
        match self.script_path.clone() {
            Some(path) => self.initialize_from_filepath(path),
            None => Ok(()),
        }
    }

    pub fn get_errors(&self) -> &[Error] {
        &self.compiler.errors
    }

    pub fn is_broken(&self) -> bool {
        self.compiler.errors_exist()
    }

    /// Render accumulated diagnostics with source context.
    pub fn format_errors(&self) -> String {
        ErrorFormatter::new(&self.sources).format_all(&self.compiler.errors)
    }

    /// Parse, compile and run one line in the REPL environment.
    pub fn do_line(&mut self, line: &str) -> Value {
        self.compiler.errors.clear();
        self.vm.post_happened = false;
        self.sources.insert("REPL input".to_string(), line.to_string());
        let (tokens, lex_errors) = relexer::tokenize("REPL input", line);
        if let Some(first) = lex_errors.first() {
            return Value::error(first.clone());
        }
        let mut run = ParseRun::new(&self.arena, 0, tokens);
        run.record_instances = false;
        let node = run.parse_tokenized_chunk();
        if let Some(first) = run.errors.first() {
            self.compiler.errors.extend(run.errors.clone());
            return Value::error(first.clone());
        }
        let node = match node {
            Some(n) => n,
            None => return Value::undefined(),
        };
        let mut ctx = Ctx::new("");
        ctx.allow_new_globals = true;
        ctx.cmd = true;
        let entry = self.vm.code.len();
        let functions_before = self.vm.functions.len();
        let (result, _) = self
            .compiler
            .compile_expression(&mut self.vm, &mut ctx, &node);
        self.vm.code.push(Op::Ret { src: result });
        if let Some(first) = self.compiler.errors.first() {
            let value = Value::error(first.clone());
            if self.vm.functions.len() == functions_before {
                self.vm.code.truncate(entry);
            }
            return value;
        }
        let outcome = self.vm.run(entry, ctx.frame_size(), Vec::new());
        // Roll the line's code back, unless it defined functions whose
        // bodies live in the emitted region.
        if self.vm.functions.len() == functions_before {
            self.vm.code.truncate(entry);
        }
        outcome
    }

    /// Invoke the `main` command if the script defines one; the sentinel
    /// undefined value otherwise.
    pub fn call_main(&mut self) -> Value {
        let def = self
            .compiler
            .functions
            .get("main")
            .and_then(|defs| defs.iter().find(|d| d.cmd))
            .cloned();
        match def {
            Some(def) => {
                let info = self.vm.functions[def.func_ix].clone();
                self.vm.post_happened = false;
                self.vm.run(info.addr, info.frame_size, Vec::new())
            }
            None => Value::undefined(),
        }
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        let info = self.compiler.globals.get(name)?;
        self.vm.globals.get(info.slot as usize).cloned()
    }

    /// Set a global, creating it if absent.
    pub fn set_variable(&mut self, name: &str, value: Value) {
        match self.compiler.globals.get(name) {
            Some(info) => {
                self.vm.globals[info.slot as usize] = value;
            }
            None => {
                let types = AbstractType::single(value.ty);
                let slot = crate::compiler::push_global(&mut self.vm, value);
                self.compiler.globals.insert(
                    name.to_string(),
                    crate::compiler::GlobalInfo {
                        slot,
                        types,
                        constant: false,
                    },
                );
            }
        }
    }

    /// Round-trippable printing.
    pub fn to_literal(&self, value: &Value) -> String {
        self.vm.literal(value)
    }

    /// User-facing printing.
    pub fn describe(&self, value: &Value) -> String {
        self.vm.describe(value)
    }

    /// ANSI syntax highlighting of one line.
    pub fn highlight(&self, line: &str, theme: &Theme) -> String {
        highlight::highlight(line, self.arena.root(), theme)
    }

    pub fn set_out_handler(&mut self, handler: Box<dyn OutputHandler>) {
        self.vm.out = handler;
    }

    pub fn set_in_handler(&mut self, handler: Box<dyn InputHandler>) {
        self.vm.input = handler;
    }

    /// Install a resolver for `external` declarations. Takes effect at the
    /// next initialization.
    pub fn set_external_resolver(&mut self, resolver: Box<dyn ExternalResolver>) {
        self.externals = resolver;
    }

    /// Render the tracking log accumulated so far.
    pub fn tracking_log(&self) -> String {
        let data = self.vm.tracking.clone();
        self.vm.tracking_to_string(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_service_evaluates_arithmetic() {
        let mut service = Service::new();
        let v = service.do_line("2 + 2");
        assert_eq!(service.to_literal(&v), "4");
    }

    #[test]
    fn test_blank_service_division_produces_float() {
        let mut service = Service::new();
        let v = service.do_line("5 / 2");
        assert_eq!(service.to_literal(&v), "2.5");
    }

    #[test]
    fn test_repl_assignment_and_recall() {
        let mut service = Service::new();
        let ok = service.do_line("x = 42");
        assert_eq!(service.to_literal(&ok), "OK");
        let v = service.do_line("x + 1");
        assert_eq!(service.to_literal(&v), "43");
    }

    #[test]
    fn test_runtime_error_is_a_value() {
        let mut service = Service::new();
        let v = service.do_line("1 / 0");
        assert_eq!(v.as_error().map(|e| e.error.id.as_str()), Some("vm/div/zero"));
    }

    #[test]
    fn test_call_main_without_main_is_sentinel() {
        let mut service = Service::new();
        let v = service.call_main();
        assert_eq!(v.ty, values::UNDEFINED);
    }

    #[test]
    fn test_set_and_get_variable() {
        let mut service = Service::new();
        service.set_variable("answer", Value::int(42));
        assert_eq!(service.get_variable("answer"), Some(Value::int(42)));
        let v = service.do_line("answer * 2");
        assert_eq!(service.to_literal(&v), "84");
    }

    #[test]
    fn test_input_reads_through_in_handler() {
        let mut service = Service::new();
        service.set_in_handler(Box::new(pipefish_vm::ScriptedHandler::new(&["Pipefish"])));
        let v = service.do_line("input \"name? \"");
        assert_eq!(service.to_literal(&v), "\"Pipefish\"");
    }

    #[test]
    fn test_env_survives_explicitly() {
        let mut env = IndexMap::new();
        env.insert("greeting".to_string(), "hello".to_string());
        let mut service = Service::new().with_env(env);
        service.install_env_global();
        let v = service.do_line("$_env[\"greeting\"]");
        assert_eq!(service.to_literal(&v), "\"hello\"");
    }
}
