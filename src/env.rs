/// Session variables set by `read` and `$name = value`.
///
/// This is an ordered association list: a later `set` shadows earlier ones for
/// the same key, and `get` always returns the most recent value. Keys carry
/// their leading `$` (`read name` stores under `$name`) so that lookups can use
/// the word exactly as typed.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    entries: Vec<(String, String)>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or override a variable.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        // Dropping the shadowed entry keeps the list from growing on re-assignment.
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, value.into()));
    }

    /// Get the value of a variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Variables in assignment order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
