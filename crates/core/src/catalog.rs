//! Acceleration function catalog (§3 `AccelerationFunction`, invariant I1).

use std::collections::HashMap;

/// Sentinel for "no function assigned / not in catalog" (`ACCELFUNC_UNKNOWN`).
pub const FUNC_UNKNOWN: i32 = -1;

#[derive(Debug, Clone)]
pub struct AccelerationFunction {
    pub name: String,
    pub description: String,
}

/// Dense, insertion-ordered catalog of acceleration functions.
///
/// Lookups are case-insensitive; `FUNC_UNKNOWN` is returned for anything not
/// registered. Immutable once built from the configuration document.
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    functions: Vec<AccelerationFunction>,
    by_lower_name: HashMap<String, i32>,
}

impl FunctionCatalog {
    pub fn builder() -> FunctionCatalogBuilder {
        FunctionCatalogBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn name_to_index(&self, name: &str) -> i32 {
        self.by_lower_name
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or(FUNC_UNKNOWN)
    }

    pub fn index_to_name(&self, index: i32) -> &str {
        if index >= 0 {
            if let Some(function) = self.functions.get(index as usize) {
                return &function.name;
            }
        }
        ""
    }

    pub fn get(&self, index: i32) -> Option<&AccelerationFunction> {
        if index < 0 {
            return None;
        }
        self.functions.get(index as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &AccelerationFunction)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (i as i32, f))
    }
}

#[derive(Debug, Default)]
pub struct FunctionCatalogBuilder {
    functions: Vec<AccelerationFunction>,
}

impl FunctionCatalogBuilder {
    /// Appends a function, skipping it (with a warning) if its name
    /// duplicates one already present (invariant I1).
    pub fn push(&mut self, name: impl Into<String>, description: impl Into<String>) -> &mut Self {
        let name = name.into();
        let lower = name.to_ascii_lowercase();
        if self
            .functions
            .iter()
            .any(|f| f.name.to_ascii_lowercase() == lower)
        {
            tracing::warn!(function = %name, "duplicate acceleration function name: ignored");
            return self;
        }
        self.functions.push(AccelerationFunction {
            name,
            description: description.into(),
        });
        self
    }

    pub fn build(self) -> FunctionCatalog {
        let mut by_lower_name = HashMap::with_capacity(self.functions.len());
        for (i, function) in self.functions.iter().enumerate() {
            by_lower_name.insert(function.name.to_ascii_lowercase(), i as i32);
        }
        FunctionCatalog {
            functions: self.functions,
            by_lower_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_to_index_roundtrips_and_is_case_insensitive() {
        let catalog = FunctionCatalog::builder()
            .push("gzip", "gzip compression")
            .push("sha512", "sha512 hashing")
            .build();

        assert_eq!(catalog.len(), 2);
        for (idx, function) in catalog.iter() {
            assert_eq!(catalog.name_to_index(&function.name), idx);
            assert_eq!(catalog.name_to_index(&function.name.to_uppercase()), idx);
            assert_eq!(catalog.index_to_name(idx), function.name);
        }
    }

    #[test]
    fn unknown_name_returns_sentinel() {
        let catalog = FunctionCatalog::builder().push("gzip", "").build();
        assert_eq!(catalog.name_to_index("sha512"), FUNC_UNKNOWN);
        assert_eq!(catalog.index_to_name(FUNC_UNKNOWN), "");
    }

    #[test]
    fn duplicate_names_are_deduplicated_case_insensitively() {
        let catalog = FunctionCatalog::builder()
            .push("gzip", "first")
            .push("GZIP", "second")
            .build();
        assert_eq!(catalog.len(), 1);
    }
}
