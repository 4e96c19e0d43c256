//! Ordered, case-insensitively unique collection of output fields.

use crate::error::SchemaError;
use expression_engine::{CompiledField, FieldRef};
use indexmap::IndexMap;
use model::core::{
    data_type::DataType,
    field::{Field, FieldAttributes},
    identifiers::Alias,
};
use tracing::{debug, warn};

pub const NEW_FIELD_NAME: &str = "NewField";

/// One output column: its descriptor, the alias it was taken from (if any)
/// and its compiled expression.
#[derive(Debug, Clone)]
pub struct OutputField {
    pub field: Field,
    pub source: Option<Alias>,
    compiled: CompiledField,
}

impl OutputField {
    /// Compiles `field.value` as the field's expression.
    pub fn new(field: Field, source: Option<Alias>) -> Self {
        let compiled = CompiledField::compile(&field.value);
        OutputField {
            field,
            source,
            compiled,
        }
    }

    /// Output field copying an input column of `alias` unchanged.
    pub fn from_input(alias: &Alias, input: &Field) -> Self {
        let field = Field::new(&input.name, input.attributes.clone())
            .with_value(Field::reference_token(alias.as_str(), &input.name));
        Self::new(field, Some(alias.clone()))
    }

    pub fn name(&self) -> &str {
        &self.field.name
    }

    pub fn expression(&self) -> &str {
        &self.field.value
    }

    pub fn compiled(&self) -> &CompiledField {
        &self.compiled
    }

    pub fn refs(&self) -> &[FieldRef] {
        self.compiled.refs()
    }

    pub fn data_type(&self) -> DataType {
        self.field.data_type()
    }

    pub fn set_value(&mut self, value: &str) {
        self.field.value = value.to_string();
        self.compiled = CompiledField::compile(value);
    }
}

fn key(name: &str) -> String {
    name.to_lowercase()
}

fn truncate(name: &str, limit: Option<usize>) -> String {
    match limit {
        Some(limit) => name.chars().take(limit).collect(),
        None => name.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutputSchema {
    fields: IndexMap<String, OutputField>,
    name_limit: Option<usize>,
}

impl OutputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputField> {
        self.fields.values()
    }

    pub fn get(&self, index: usize) -> Option<&OutputField> {
        self.fields.get_index(index).map(|(_, f)| f)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut OutputField> {
        self.fields.get_index_mut(index).map(|(_, f)| f)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&OutputField> {
        self.fields.get(&key(name))
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.get_index_of(&key(name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.values().map(OutputField::name).collect()
    }

    /// Field descriptors in output order, as declared to a sink.
    pub fn fields(&self) -> Vec<Field> {
        self.fields.values().map(|f| f.field.clone()).collect()
    }

    pub fn name_limit(&self) -> Option<usize> {
        self.name_limit
    }

    /// Applies the destination's name length limit, renaming fields that
    /// no longer fit or now collide. A zero limit is rejected.
    pub fn set_name_limit(&mut self, limit: Option<usize>) -> Result<(), SchemaError> {
        if limit == Some(0) {
            return Err(SchemaError::ZeroNameLimit);
        }
        if self.name_limit == limit {
            return Ok(());
        }
        self.name_limit = limit;

        let fields: Vec<OutputField> = self.fields.drain(..).map(|(_, f)| f).collect();
        for field in fields {
            self.add_field(field);
        }
        Ok(())
    }

    /// Appends `field`, renaming it if its name is taken. Returns its index.
    pub fn add_field(&mut self, mut field: OutputField) -> usize {
        let name = self.unique_name(&field.field.original_name, None);
        if name != field.field.name {
            debug!(requested = %field.field.name, name = %name, "Renamed output field");
        }
        field.field.name = name;
        self.fields.insert_full(key(&field.field.name), field).0
    }

    /// Appends an empty, computed text field.
    pub fn add_new_field(&mut self) -> usize {
        let field = Field::new(NEW_FIELD_NAME, FieldAttributes::typed(DataType::String));
        self.add_field(OutputField::new(field, None))
    }

    pub fn remove_field(&mut self, index: usize) -> Result<OutputField, SchemaError> {
        self.check(index)?;
        self.fields
            .shift_remove_index(index)
            .map(|(_, f)| f)
            .ok_or(SchemaError::IndexOutOfRange {
                index,
                len: self.fields.len(),
            })
    }

    /// Removes every field taken from `alias`.
    pub fn remove_source(&mut self, alias: &Alias) -> Vec<OutputField> {
        let mut removed = Vec::new();
        self.fields.retain(|_, field| {
            if field.source.as_ref() == Some(alias) {
                removed.push(field.clone());
                false
            } else {
                true
            }
        });
        debug!(alias = %alias, removed = removed.len(), "Removed output fields of alias");
        removed
    }

    pub fn move_field(&mut self, index: usize, new_index: usize) -> Result<(), SchemaError> {
        self.check(index)?;
        self.check(new_index)?;
        self.fields.move_index(index, new_index);
        Ok(())
    }

    /// Moves the selection to the front, keeping its relative order.
    /// Returns the new indices of the selection.
    pub fn move_top(&mut self, selection: &[usize]) -> Result<Vec<usize>, SchemaError> {
        let selected = self.sorted_selection(selection)?;
        for (target, &index) in selected.iter().enumerate() {
            self.fields.move_index(index, target);
        }
        Ok((0..selected.len()).collect())
    }

    /// Moves the selection to the back, keeping its relative order.
    pub fn move_bottom(&mut self, selection: &[usize]) -> Result<Vec<usize>, SchemaError> {
        let selected = self.sorted_selection(selection)?;
        let last = self.fields.len() - 1;
        for (offset, &index) in selected.iter().rev().enumerate() {
            self.fields.move_index(index, last - offset);
        }
        let start = self.fields.len() - selected.len();
        Ok((start..self.fields.len()).collect())
    }

    /// Moves each selected field one place up. A field blocked by the top
    /// or by another selected field stays put.
    pub fn move_up(&mut self, selection: &[usize]) -> Result<Vec<usize>, SchemaError> {
        let selected = self.sorted_selection(selection)?;
        let mut moved = Vec::with_capacity(selected.len());
        for &index in &selected {
            if index > 0 && !moved.contains(&(index - 1)) {
                self.fields.swap_indices(index, index - 1);
                moved.push(index - 1);
            } else {
                moved.push(index);
            }
        }
        Ok(moved)
    }

    /// Mirror of [`OutputSchema::move_up`].
    pub fn move_down(&mut self, selection: &[usize]) -> Result<Vec<usize>, SchemaError> {
        let selected = self.sorted_selection(selection)?;
        let last = self.fields.len() - 1;
        let mut moved = Vec::with_capacity(selected.len());
        for &index in selected.iter().rev() {
            if index < last && !moved.contains(&(index + 1)) {
                self.fields.swap_indices(index, index + 1);
                moved.push(index + 1);
            } else {
                moved.push(index);
            }
        }
        moved.reverse();
        Ok(moved)
    }

    /// Renames a field. A taken name gets a numeric suffix. Returns the name
    /// actually applied.
    pub fn rename(&mut self, index: usize, new_name: &str) -> Result<String, SchemaError> {
        self.check(index)?;
        let requested = new_name.trim();
        if requested.is_empty() {
            return Err(SchemaError::EmptyName);
        }

        let name = self.unique_name(requested, Some(index));
        let (_, mut field) = self
            .fields
            .shift_remove_index(index)
            .ok_or(SchemaError::IndexOutOfRange {
                index,
                len: self.fields.len(),
            })?;
        field.field.original_name = requested.to_string();
        field.field.name = name.clone();
        self.fields.shift_insert(index, key(&name), field);
        Ok(name)
    }

    pub fn set_value(&mut self, index: usize, value: &str) -> Result<(), SchemaError> {
        let len = self.fields.len();
        let field = self
            .get_mut(index)
            .ok_or(SchemaError::IndexOutOfRange { index, len })?;
        field.set_value(value);
        Ok(())
    }

    /// `original`, or `original` with the first numeric suffix that makes it
    /// unique, truncated to the name limit. `skip` excludes one index from
    /// the comparison.
    fn unique_name(&self, original: &str, skip: Option<usize>) -> String {
        let original = if original.trim().is_empty() {
            NEW_FIELD_NAME
        } else {
            original.trim()
        };
        let taken = |candidate: &str| {
            self.fields
                .get_index_of(&key(candidate))
                .is_some_and(|i| Some(i) != skip)
        };

        let candidate = truncate(original, self.name_limit);
        if !taken(&candidate) {
            return candidate;
        }

        let mut n: u64 = 1;
        loop {
            let suffix = n.to_string();
            let candidate = match self.name_limit {
                // Only the suffix fits; keep its trailing digits. Once every
                // digit name within the limit has been tried, give up on it.
                Some(limit) if suffix.len() > limit => {
                    if n >= 10u64.saturating_pow(limit as u32).saturating_mul(2) {
                        warn!(name = %original, limit, "No unique name fits the length limit");
                        format!("{original}{suffix}")
                    } else {
                        suffix[suffix.len() - limit..].to_string()
                    }
                }
                Some(limit) => {
                    format!("{}{suffix}", truncate(original, Some(limit - suffix.len())))
                }
                None => format!("{original}{suffix}"),
            };
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn check(&self, index: usize) -> Result<(), SchemaError> {
        if index < self.fields.len() {
            Ok(())
        } else {
            Err(SchemaError::IndexOutOfRange {
                index,
                len: self.fields.len(),
            })
        }
    }

    fn sorted_selection(&self, selection: &[usize]) -> Result<Vec<usize>, SchemaError> {
        let mut selected = selection.to_vec();
        selected.sort_unstable();
        selected.dedup();
        for &index in &selected {
            self.check(index)?;
        }
        Ok(selected)
    }
}
