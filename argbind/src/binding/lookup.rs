use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::parameter::{CommandParameter, ParameterId};
use crate::value::Value;

struct Entry {
    parameter: Arc<CommandParameter>,
    value: Option<Value>,
    supplied: bool,
}

/// Bound values keyed by parameter identity.
///
/// An entry with no value is an explicit null. Entries remember whether
/// their value came from the command line so that supplied values win over
/// derived ones when several parameters share one backing property.
#[derive(Default)]
pub struct CommandValueLookup {
    entries: Vec<Entry>,
}

impl CommandValueLookup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, id: ParameterId) -> Option<usize> {
        self.entries.iter().position(|e| e.parameter.id() == id)
    }

    pub fn contains(&self, id: ParameterId) -> bool {
        self.position(id).is_some()
    }

    /// The bound value; `None` when unbound or null.
    pub fn get(&self, id: ParameterId) -> Option<&Value> {
        self.position(id).and_then(|i| self.entries[i].value.as_ref())
    }

    pub(crate) fn set_value(&mut self, parameter: &Arc<CommandParameter>, value: Option<Value>, supplied: bool) {
        trace!("Bound {} = {:?} (supplied: {})", parameter.display_name(), value, supplied);
        match self.position(parameter.id()) {
            Some(i) => {
                let entry = &mut self.entries[i];
                entry.value = value;
                entry.supplied |= supplied;
            }
            None => self.entries.push(Entry {
                parameter: Arc::clone(parameter),
                value,
                supplied,
            }),
        }
    }

    /// Whether any bound parameter has the logical name `name`, ignoring case.
    pub fn has_parameter_with_name(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.parameter.property_name().eq_ignore_ascii_case(name))
    }

    /// The effective entry for a logical name: the last one in binding
    /// order.
    pub fn try_get_parameter_with_name(&self, name: &str) -> Option<(&Arc<CommandParameter>, Option<&Value>)> {
        self.iter()
            .filter(|(p, _)| p.property_name().eq_ignore_ascii_case(name))
            .last()
    }

    /// Entries in binding order: derived values first, then values supplied
    /// on the command line, each in insertion (root to leaf) order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<CommandParameter>, Option<&Value>)> + '_ {
        let derived = self.entries.iter().filter(|e| !e.supplied);
        let supplied = self.entries.iter().filter(|e| e.supplied);
        derived
            .chain(supplied)
            .map(|e| (&e.parameter, e.value.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CommandValueLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (e.parameter.property_name(), &e.value)))
            .finish()
    }
}
