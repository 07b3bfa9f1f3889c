//! Parameters and parameter types
//!
//! A [`ParamType`] describes one named, typed slot of a device class (or of a
//! plugin's configuration). A [`ParamList`] carries the values. Validation
//! of a list against its types lives here so the catalog, the runtime and
//! plugins all agree on the rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ThingError, ThingResult};
use crate::ids::ParamTypeId;

/// The value type of a param or state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Uint,
    Double,
    String,
    /// Any JSON value, no type check
    Variant,
}

impl ValueType {
    /// Check whether a JSON value is acceptable for this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueType::Bool => value.is_boolean(),
            ValueType::Int => value.is_i64() || value.is_u64(),
            ValueType::Uint => value.is_u64(),
            ValueType::Double => value.is_number(),
            ValueType::String => value.is_string(),
            ValueType::Variant => true,
        }
    }
}

/// Description of one parameter slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamType {
    pub id: ParamTypeId,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    pub value_type: ValueType,
    /// Value used when the caller omits the param; `None` makes it required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub read_only: bool,
}

impl ParamType {
    pub fn new(id: ParamTypeId, name: impl Into<String>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            id,
            display_name: name.clone(),
            name,
            value_type,
            default_value: None,
            allowed_values: Vec::new(),
            min_value: None,
            max_value: None,
            read_only: false,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = values;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default_value.is_none()
    }

    /// Validate a single value against this type's constraints
    pub fn validate(&self, value: &Value) -> ThingResult<()> {
        if !self.value_type.accepts(value) {
            return Err(ThingError::InvalidParameter);
        }
        if !self.allowed_values.is_empty() && !self.allowed_values.contains(value) {
            return Err(ThingError::InvalidParameter);
        }
        if let Some(number) = value.as_f64() {
            if self.min_value.is_some_and(|min| number < min) {
                return Err(ThingError::InvalidParameter);
            }
            if self.max_value.is_some_and(|max| number > max) {
                return Err(ThingError::InvalidParameter);
            }
        }
        Ok(())
    }
}

/// One param value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub param_type_id: ParamTypeId,
    pub value: Value,
}

impl Param {
    pub fn new(param_type_id: ParamTypeId, value: impl Into<Value>) -> Self {
        Self {
            param_type_id,
            value: value.into(),
        }
    }
}

/// Ordered list of param values, at most one per param type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamList(Vec<Param>);

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, param_type_id: ParamTypeId, value: impl Into<Value>) -> Self {
        self.set(param_type_id, value);
        self
    }

    pub fn get(&self, param_type_id: &ParamTypeId) -> Option<&Value> {
        self.0
            .iter()
            .find(|p| &p.param_type_id == param_type_id)
            .map(|p| &p.value)
    }

    pub fn contains(&self, param_type_id: &ParamTypeId) -> bool {
        self.get(param_type_id).is_some()
    }

    /// Set a value, replacing any existing one for the same type.
    ///
    /// Returns the previous value.
    pub fn set(&mut self, param_type_id: ParamTypeId, value: impl Into<Value>) -> Option<Value> {
        let value = value.into();
        match self.0.iter_mut().find(|p| p.param_type_id == param_type_id) {
            Some(existing) => Some(std::mem::replace(&mut existing.value, value)),
            None => {
                self.0.push(Param::new(param_type_id, value));
                None
            }
        }
    }

    pub fn remove(&mut self, param_type_id: &ParamTypeId) -> Option<Value> {
        let index = self.0.iter().position(|p| &p.param_type_id == param_type_id)?;
        Some(self.0.remove(index).value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay `other` on top of this list
    pub fn merged(&self, other: &ParamList) -> ParamList {
        let mut merged = self.clone();
        for param in other.iter() {
            merged.set(param.param_type_id, param.value.clone());
        }
        merged
    }

    /// Validate this list against `types` and return the completed list.
    ///
    /// Missing params are filled from defaults in type order; a missing
    /// param without a default yields `MissingParameter`. Params whose type
    /// is not declared, or whose value violates the type's constraints,
    /// yield `InvalidParameter`.
    pub fn verified(&self, types: &[ParamType]) -> ThingResult<ParamList> {
        for param in self.iter() {
            if !types.iter().any(|t| t.id == param.param_type_id) {
                return Err(ThingError::InvalidParameter);
            }
        }

        let mut completed = ParamList::new();
        for param_type in types {
            match (self.get(&param_type.id), &param_type.default_value) {
                (Some(value), _) => {
                    param_type.validate(value)?;
                    completed.set(param_type.id, value.clone());
                }
                (None, Some(default)) => {
                    completed.set(param_type.id, default.clone());
                }
                (None, None) => return Err(ThingError::MissingParameter),
            }
        }
        Ok(completed)
    }
}

impl FromIterator<Param> for ParamList {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        let mut list = ParamList::new();
        for param in iter {
            list.set(param.param_type_id, param.value);
        }
        list
    }
}

impl<'a> IntoIterator for &'a ParamList {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hours_type() -> ParamType {
        ParamType::new(ParamTypeId::generate(), "hours", ValueType::Int).with_range(0.0, 23.0)
    }

    #[test]
    fn test_value_type_accepts() {
        assert!(ValueType::Bool.accepts(&json!(true)));
        assert!(!ValueType::Bool.accepts(&json!(1)));
        assert!(ValueType::Int.accepts(&json!(-3)));
        assert!(!ValueType::Uint.accepts(&json!(-3)));
        assert!(ValueType::Double.accepts(&json!(7)));
        assert!(ValueType::String.accepts(&json!("x")));
        assert!(ValueType::Variant.accepts(&json!({"a": 1})));
    }

    #[test]
    fn test_verified_fills_defaults() {
        let monday = ParamType::new(ParamTypeId::generate(), "monday", ValueType::Bool)
            .with_default(false);
        let hours = hours_type();
        let params = ParamList::new().with(hours.id, 7);

        let completed = params.verified(&[monday.clone(), hours.clone()]).unwrap();
        assert_eq!(completed.get(&monday.id), Some(&json!(false)));
        assert_eq!(completed.get(&hours.id), Some(&json!(7)));
        assert_eq!(completed.len(), 2);
    }

    #[test]
    fn test_verified_missing_required() {
        let hours = hours_type();
        assert_eq!(
            ParamList::new().verified(&[hours]),
            Err(ThingError::MissingParameter)
        );
    }

    #[test]
    fn test_verified_rejects_out_of_range_and_unknown() {
        let hours = hours_type();
        let too_late = ParamList::new().with(hours.id, 24);
        assert_eq!(
            too_late.verified(&[hours.clone()]),
            Err(ThingError::InvalidParameter)
        );

        let unknown = ParamList::new()
            .with(hours.id, 3)
            .with(ParamTypeId::generate(), "stray");
        assert_eq!(
            unknown.verified(&[hours]),
            Err(ThingError::InvalidParameter)
        );
    }

    #[test]
    fn test_allowed_values() {
        let mode = ParamType::new(ParamTypeId::generate(), "time type", ValueType::String)
            .with_allowed_values(vec![json!("time"), json!("sunrise"), json!("sunset")]);
        assert!(mode.validate(&json!("sunrise")).is_ok());
        assert_eq!(
            mode.validate(&json!("noon")),
            Err(ThingError::InvalidParameter)
        );
    }

    #[test]
    fn test_set_replaces_and_merges() {
        let id = ParamTypeId::generate();
        let mut list = ParamList::new().with(id, 1);
        assert_eq!(list.set(id, 2), Some(json!(1)));
        assert_eq!(list.len(), 1);

        let other = ParamList::new().with(id, 5);
        assert_eq!(list.merged(&other).get(&id), Some(&json!(5)));
    }
}
