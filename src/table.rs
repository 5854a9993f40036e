/// Ordered string-keyed table used for headers and server-wide options.
///
/// Behavior is selected at construction: unique keys (a later insertion of an
/// existing name replaces the earlier value in place) or multi keys (every
/// insertion appends), with case-sensitive or case-insensitive name matching.
/// Iteration always follows insertion order. Lookups return the most recently
/// inserted match.
#[derive(Debug, Clone)]
pub struct ListTable {
    entries: Vec<Entry>,
    unique: bool,
    case_insensitive: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TableOptions {
    pub unique: bool,
    pub case_insensitive: bool,
}

impl ListTable {
    pub fn new(options: TableOptions) -> Self {
        Self {
            entries: Vec::new(),
            unique: options.unique,
            case_insensitive: options.case_insensitive,
        }
    }

    /// Preset for HTTP header maps: unique keys, case-insensitive names.
    pub fn headers() -> Self {
        Self::new(TableOptions {
            unique: true,
            case_insensitive: true,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a name/value pair. In unique mode an existing entry keeps its
    /// position and only its value (and stored name spelling) is replaced.
    pub fn put(&mut self, name: &str, value: &str) {
        if self.unique {
            if let Some(entry) = self.find_mut(name) {
                entry.name = name.to_string();
                entry.value = value.to_string();
                return;
            }
        }
        self.entries.push(Entry {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    /// The most recently inserted value under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| self.matches(&e.name, name))
            .map(|e| e.value.as_str())
    }

    /// All values under `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| self.matches(&e.name, name))
            .map(|e| e.value.as_str())
            .collect()
    }

    /// Removes all entries under `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        let case_insensitive = self.case_insensitive;
        self.entries
            .retain(|e| !name_match(&e.name, name, case_insensitive));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Name/value pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
    }

    fn matches(&self, a: &str, b: &str) -> bool {
        name_match(a, b, self.case_insensitive)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Entry> {
        let case_insensitive = self.case_insensitive;
        self.entries
            .iter_mut()
            .find(|e| name_match(&e.name, name, case_insensitive))
    }
}

fn name_match(a: &str, b: &str, case_insensitive: bool) -> bool {
    if case_insensitive {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}
