use std::collections::HashMap;

use crate::core::{MapperError, Result};

#[derive(Debug, Clone)]
enum Slot<V> {
    Entry { full_id: String, value: V },
    Ambiguous(Vec<String>),
}

/// Map keyed by full id that also answers to the short (local) id.
///
/// Two full ids sharing a short id make the short id ambiguous; registering
/// the same full id twice is an error.
#[derive(Debug, Clone)]
pub struct StrictMap<V> {
    name: &'static str,
    slots: HashMap<String, Slot<V>>,
}

fn short_id(id: &str) -> Option<&str> {
    id.rsplit_once('.').map(|(_, short)| short)
}

impl<V: Clone> StrictMap<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: HashMap::new(),
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn insert(&mut self, id: &str, value: V) -> Result<()> {
        if matches!(self.slots.get(id), Some(Slot::Entry { full_id, .. }) if full_id == id) {
            return Err(MapperError::Duplicate {
                collection: self.name,
                id: id.to_string(),
            });
        }
        if let Some(short) = short_id(id) {
            let slot = match self.slots.remove(short) {
                None => Slot::Entry {
                    full_id: id.to_string(),
                    value: value.clone(),
                },
                Some(Slot::Entry { full_id, .. }) => Slot::Ambiguous(vec![full_id, id.to_string()]),
                Some(Slot::Ambiguous(mut candidates)) => {
                    candidates.push(id.to_string());
                    Slot::Ambiguous(candidates)
                }
            };
            self.slots.insert(short.to_string(), slot);
        }
        self.slots.insert(
            id.to_string(),
            Slot::Entry {
                full_id: id.to_string(),
                value,
            },
        );
        Ok(())
    }

    /// `Ok(None)` when absent, an error when the short id is ambiguous.
    pub fn get(&self, id: &str) -> Result<Option<&V>> {
        match self.slots.get(id) {
            None => Ok(None),
            Some(Slot::Entry { value, .. }) => Ok(Some(value)),
            Some(Slot::Ambiguous(candidates)) => Err(MapperError::Ambiguous {
                collection: self.name,
                id: id.to_string(),
                candidates: candidates.clone(),
            }),
        }
    }

    pub fn contains_key(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Every value once, under its full id.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &V)> {
        self.slots.iter().filter_map(|(key, slot)| match slot {
            Slot::Entry { full_id, value } if full_id == key => Some((key.as_str(), value)),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
