use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::evaluator::{describe, RuntimeError, Value};

/// A scope frame. Frames are shared: the block or call that created one holds
/// it, and so does every closure created while it was current.
///
/// A binding may hold no value, e.g. the result of `print` or of a bare `return`.
#[derive(Default)]
pub struct Environment {
    bindings: HashMap<String, Option<Value>>,
    parent: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parent(parent: Rc<RefCell<Environment>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            bindings: HashMap::new(),
            parent: Some(parent),
        }))
    }

    /// Binds `name` in this frame only, replacing any binding it already holds here.
    pub fn define(&mut self, name: impl Into<String>, val: Option<Value>) {
        self.bindings.insert(name.into(), val);
    }

    pub fn get(&self, name: &str) -> Result<Option<Value>, RuntimeError> {
        if let Some(val) = self.bindings.get(name) {
            return Ok(val.clone());
        }
        match &self.parent {
            Some(parent) => parent.borrow().get(name),
            None => Err(RuntimeError::UndefinedVariable {
                name: name.to_string(),
            }),
        }
    }

    /// Overwrites the nearest existing binding of `name`.
    pub fn assign(&mut self, name: &str, val: Option<Value>) -> Result<(), RuntimeError> {
        if let Some(slot) = self.bindings.get_mut(name) {
            *slot = val;
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.borrow_mut().assign(name, val),
            None => Err(RuntimeError::UndefinedVariable {
                name: name.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.bindings.keys().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("names", &names)
            .field("global", &self.parent.is_none())
            .finish()
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parent {
            None => write!(f, "<Global Frame>"),
            Some(parent) => {
                let mut entries: Vec<_> = self
                    .bindings
                    .iter()
                    .map(|(key, val)| format!("{}: {}", key, describe(val.as_ref())))
                    .collect();
                entries.sort();

                write!(f, "<{{{}}} -> {}>", entries.join(", "), parent.borrow())
            }
        }
    }
}
