//! Ownership signatures and the shared write-once signature table.
//!
//! Each function's signature is written exactly once, when its analysis
//! unit finishes. Callers read it, blocking until it is available. This is
//! the only state shared between worker threads.

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::fmt;
use verso_ir::FunctionId;

use crate::error::SignatureTableError;
use crate::mode::OwnershipMode;

/// One mode per parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<OwnershipMode>,
    /// False when the recursive fixed point hit its iteration bound
    pub resolved: bool,
}

impl Signature {
    pub fn new(params: Vec<OwnershipMode>) -> Self {
        Self {
            params,
            resolved: true,
        }
    }

    /// Conservative signature for functions that could not be analyzed.
    pub fn all_moved(arity: usize) -> Self {
        Self {
            params: vec![OwnershipMode::Moved; arity],
            resolved: false,
        }
    }

    pub fn param(&self, index: usize) -> Option<OwnershipMode> {
        self.params.get(index).copied()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.params.iter().map(|m| m.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

enum Slot {
    Pending,
    Final(Signature),
    /// The unit was cancelled; readers get `None`
    Abandoned,
}

/// Single-writer/many-reader table of finalized signatures.
pub struct SignatureTable {
    slots: Mutex<FxHashMap<FunctionId, Slot>>,
    finalized: Condvar,
    names: FxHashMap<FunctionId, SmolStr>,
}

impl SignatureTable {
    /// Create a table with a pending slot for every function.
    pub fn new(functions: impl IntoIterator<Item = (FunctionId, SmolStr)>) -> Self {
        let names: FxHashMap<FunctionId, SmolStr> = functions.into_iter().collect();
        let slots = names.keys().map(|id| (*id, Slot::Pending)).collect();
        Self {
            slots: Mutex::new(slots),
            finalized: Condvar::new(),
            names,
        }
    }

    fn name(&self, function: FunctionId) -> SmolStr {
        self.names
            .get(&function)
            .cloned()
            .unwrap_or_else(|| SmolStr::new(function.to_string()))
    }

    /// Publish a function's signature. Fails if it was already written.
    pub fn finalize(
        &self,
        function: FunctionId,
        signature: Signature,
    ) -> Result<(), SignatureTableError> {
        let mut slots = self.slots.lock();
        match slots.get_mut(&function) {
            Some(slot @ Slot::Pending) => {
                *slot = Slot::Final(signature);
            }
            Some(_) => {
                return Err(SignatureTableError::AlreadyFinalized {
                    function: self.name(function),
                })
            }
            None => {
                return Err(SignatureTableError::UnknownFunction {
                    function: self.name(function),
                })
            }
        }
        drop(slots);
        self.finalized.notify_all();
        Ok(())
    }

    /// Mark a function whose unit will never run. Readers stop waiting.
    pub fn abandon(&self, function: FunctionId) {
        let mut slots = self.slots.lock();
        if let Some(slot @ Slot::Pending) = slots.get_mut(&function) {
            *slot = Slot::Abandoned;
        }
        drop(slots);
        self.finalized.notify_all();
    }

    /// The signature if it has been finalized, without blocking.
    pub fn get(&self, function: FunctionId) -> Option<Signature> {
        match self.slots.lock().get(&function) {
            Some(Slot::Final(sig)) => Some(sig.clone()),
            _ => None,
        }
    }

    pub fn is_finalized(&self, function: FunctionId) -> bool {
        matches!(self.slots.lock().get(&function), Some(Slot::Final(_)))
    }

    /// Block until the signature is finalized.
    ///
    /// Returns `None` for unknown or abandoned functions.
    pub fn wait(&self, function: FunctionId) -> Option<Signature> {
        let mut slots = self.slots.lock();
        loop {
            match slots.get(&function) {
                Some(Slot::Final(sig)) => return Some(sig.clone()),
                Some(Slot::Pending) => {}
                Some(Slot::Abandoned) | None => return None,
            }
            self.finalized.wait(&mut slots);
        }
    }

    /// Snapshot of every finalized signature.
    pub fn snapshot(&self) -> FxHashMap<FunctionId, Signature> {
        self.slots
            .lock()
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Final(sig) => Some((*id, sig.clone())),
                _ => None,
            })
            .collect()
    }
}
