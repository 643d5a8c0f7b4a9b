//! Module loading

use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::info;

use crate::bytecode::{Module, Namespace, Value};

use super::error::{RuntimeErrorKind, RuntimeResult};
use super::frame::{Frame, ReturnAction};
use super::math;
use super::Vm;

const SOURCE_EXTENSIONS: &[&str] = &["pa", "py"];

fn import_error<T>(message: String) -> RuntimeResult<T> {
    Err(RuntimeErrorKind::ImportError(message).into())
}

impl Vm {
    /// Start importing `name`.
    ///
    /// Returns the module when it is cached or built in. Otherwise the
    /// module body is pushed as a frame and `None` is returned; the module
    /// value arrives when that frame returns.
    pub(crate) fn import_module(&mut self, name: &str) -> RuntimeResult<Option<Value>> {
        if let Some(module) = self.modules.get(name) {
            return Ok(Some(Value::Module(Rc::clone(module))));
        }
        if name == "math" {
            let module = math::module();
            self.modules.insert(name.to_string(), Rc::clone(&module));
            info!(module = name, "imported built-in module");
            return Ok(Some(Value::Module(module)));
        }

        let Some(path) = self.find_module(name) else {
            return import_error(format!("No module named '{name}'"));
        };
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) => return import_error(format!("cannot read module '{name}' ({}): {err}", path.display())),
        };
        let filename = path.display().to_string();
        let code = match crate::compile_source(&source, &filename) {
            Ok(code) => code,
            Err(failure) => return import_error(format!("cannot compile module '{name}': {failure}")),
        };

        let namespace = Namespace::new(name);
        namespace.set("__name__", Value::str(name));
        let module = Rc::new(Module {
            name: name.to_string(),
            path: Some(filename.clone()),
            namespace: Rc::clone(&namespace),
        });
        // a circular import sees the partially initialised module
        self.modules.insert(name.to_string(), Rc::clone(&module));
        info!(module = name, path = %filename, "importing module");

        let frame = Frame::new(code, namespace, &[], ReturnAction::FinishImport { module });
        if let Err(err) = self.push_frame(frame) {
            self.modules.remove(name);
            return Err(err);
        }
        Ok(None)
    }

    /// Drop a module whose body raised, so a later import retries it
    pub(crate) fn forget_module(&mut self, module: &Module) {
        self.modules.remove(&module.name);
    }

    /// Directories searched for source modules: the importing file's
    /// directory, then the configured search paths
    fn find_module(&self, name: &str) -> Option<PathBuf> {
        let relative: PathBuf = name.split('.').collect();
        let relative = &relative;
        let importer_dir = self
            .frames
            .last()
            .and_then(|frame| Path::new(&*frame.code.filename).parent().map(Path::to_path_buf))
            .map(|dir| if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir });

        importer_dir
            .into_iter()
            .chain(self.search_paths.iter().cloned())
            .flat_map(|dir| {
                SOURCE_EXTENSIONS
                    .iter()
                    .map(move |ext| dir.join(relative).with_extension(ext))
            })
            .find(|candidate| candidate.is_file())
    }
}
