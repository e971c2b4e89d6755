//! Binding of flat configuration keys into typed structures
//!
//! Configuration snapshots are flat maps of `Section:Sub:Key` paths to string
//! values. Binding expands the paths into a tree of sections and deserializes
//! the target type straight from that tree:
//!
//! - path segments match field names case-insensitively
//! - a section holds its own value and its children side by side; scalar
//!   targets read the value, structs and maps read the children
//! - list targets read the integer-indexed children, ordered by index
//! - keys with no matching field are ignored, missing fields keep their default
//! - scalars are parsed from their string form (`"true"`, `"42"`, ...)

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use serde::de::{self, DeserializeOwned, IntoDeserializer, Visitor};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Separator between configuration path segments
pub const KEY_DELIMITER: char = ':';

#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to bind configuration into {target}: {source}")]
    Deserialize {
        target: &'static str,
        #[source]
        source: SectionError,
    },
}

/// Deserialization failure at a configuration path
#[derive(Debug)]
pub struct SectionError {
    path: Vec<String>,
    message: String,
}

impl SectionError {
    /// Path of the section that failed, e.g. `Inputs:0:Required`
    pub fn path(&self) -> String {
        self.path.join(&KEY_DELIMITER.to_string())
    }

    fn at(mut self, segment: &str) -> Self {
        self.path.insert(0, segment.to_string());
        self
    }
}

impl fmt::Display for SectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path(), self.message)
        }
    }
}

impl std::error::Error for SectionError {}

impl de::Error for SectionError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self {
            path: Vec::new(),
            message: msg.to_string(),
        }
    }
}

/// Bind flat configuration entries into `T`
pub fn bind<T: DeserializeOwned>(entries: &BTreeMap<String, String>) -> Result<T, BindError> {
    T::deserialize(Section::from_entries(entries)).map_err(|source| BindError::Deserialize {
        target: std::any::type_name::<T>(),
        source,
    })
}

/// One node of the key tree
#[derive(Debug, Default)]
struct Section {
    /// Segment as first spelled in the configuration
    key: String,
    value: Option<String>,
    /// Keyed by lower-cased segment
    children: BTreeMap<String, Section>,
}

impl Section {
    fn from_entries(entries: &BTreeMap<String, String>) -> Self {
        let mut root = Section::default();
        for (key, value) in entries {
            root.insert(key, value);
        }
        root
    }

    fn insert(&mut self, key: &str, value: &str) {
        let mut current = self;
        let mut segments = key.split(KEY_DELIMITER).filter(|s| !s.is_empty()).peekable();
        if segments.peek().is_none() {
            return;
        }
        for segment in segments {
            current = current
                .children
                .entry(segment.to_lowercase())
                .or_insert_with(|| Section {
                    key: segment.to_string(),
                    ..Default::default()
                });
        }
        current.value = Some(value.to_string());
    }

    fn scalar(self) -> String {
        self.value.unwrap_or_default()
    }

    fn parse<T: FromStr>(self, expected: &str) -> Result<T, SectionError> {
        let raw = self.scalar();
        raw.trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid {} `{}`", expected, raw)))
    }

    /// Integer-indexed children in index order
    fn into_items(self) -> Vec<Section> {
        let mut items: Vec<(usize, Section)> = self
            .children
            .into_values()
            .filter_map(|child| child.key.parse::<usize>().ok().map(|i| (i, child)))
            .collect();
        items.sort_by_key(|(i, _)| *i);
        items.into_iter().map(|(_, child)| child).collect()
    }

    fn is_list(&self) -> bool {
        !self.children.is_empty() && self.children.values().all(|c| c.key.parse::<usize>().is_ok())
    }
}

macro_rules! deserialize_parsed {
    ($($method:ident => $visit:ident($ty:ty, $expected:literal),)*) => {
        $(
            fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, SectionError> {
                visitor.$visit(self.parse::<$ty>($expected)?)
            }
        )*
    };
}

impl<'de> Deserializer<'de> for Section {
    type Error = SectionError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, SectionError> {
        if self.is_list() {
            self.deserialize_seq(visitor)
        } else if !self.children.is_empty() {
            self.deserialize_map(visitor)
        } else {
            match self.value {
                Some(value) => visitor.visit_string(value),
                None => visitor.visit_unit(),
            }
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, SectionError> {
        let raw = self.scalar();
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" => visitor.visit_bool(true),
            "false" => visitor.visit_bool(false),
            _ => Err(de::Error::custom(format!("invalid boolean `{}`", raw))),
        }
    }

    deserialize_parsed! {
        deserialize_i8 => visit_i8(i8, "integer"),
        deserialize_i16 => visit_i16(i16, "integer"),
        deserialize_i32 => visit_i32(i32, "integer"),
        deserialize_i64 => visit_i64(i64, "integer"),
        deserialize_u8 => visit_u8(u8, "unsigned integer"),
        deserialize_u16 => visit_u16(u16, "unsigned integer"),
        deserialize_u32 => visit_u32(u32, "unsigned integer"),
        deserialize_u64 => visit_u64(u64, "unsigned integer"),
        deserialize_f32 => visit_f32(f32, "number"),
        deserialize_f64 => visit_f64(f64, "number"),
        deserialize_char => visit_char(char, "character"),
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, SectionError> {
        visitor.visit_string(self.scalar())
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, SectionError> {
        visitor.visit_string(self.scalar())
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, SectionError> {
        if self.value.is_none() && self.children.is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, SectionError> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, SectionError> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, SectionError> {
        visitor.visit_seq(ItemAccess {
            items: self.into_items().into_iter(),
        })
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value, SectionError> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, SectionError> {
        let entries = self
            .children
            .into_values()
            .map(|child| (child.key.clone(), child))
            .collect();
        visitor.visit_map(ChildAccess { entries })
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, SectionError> {
        let entries = self
            .children
            .into_values()
            .map(|child| {
                let field = fields
                    .iter()
                    .find(|f| f.eq_ignore_ascii_case(&child.key))
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| child.key.clone());
                (field, child)
            })
            .collect();
        visitor.visit_map(ChildAccess { entries })
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, SectionError> {
        let raw = self.scalar();
        let variant = variants
            .iter()
            .find(|v| v.eq_ignore_ascii_case(raw.trim()))
            .map(|v| v.to_string())
            .unwrap_or(raw);
        visitor.visit_enum(variant.into_deserializer())
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, SectionError> {
        visitor.visit_string(self.scalar())
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, SectionError> {
        visitor.visit_unit()
    }

    serde::forward_to_deserialize_any! {
        i128 u128 bytes byte_buf unit_struct tuple_struct
    }
}

struct ItemAccess {
    items: std::vec::IntoIter<Section>,
}

impl<'de> de::SeqAccess<'de> for ItemAccess {
    type Error = SectionError;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>, SectionError>
    where
        T: de::DeserializeSeed<'de>,
    {
        match self.items.next() {
            Some(item) => {
                let key = item.key.clone();
                seed.deserialize(item).map(Some).map_err(|e| e.at(&key))
            }
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.items.len())
    }
}

/// Children of a section, keyed by the name presented to the visitor
struct ChildAccess {
    entries: VecDeque<(String, Section)>,
}

impl<'de> de::MapAccess<'de> for ChildAccess {
    type Error = SectionError;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>, SectionError>
    where
        K: de::DeserializeSeed<'de>,
    {
        match self.entries.front() {
            Some((name, _)) => seed.deserialize(name.clone().into_deserializer()).map(Some),
            None => Ok(None),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value, SectionError>
    where
        V: de::DeserializeSeed<'de>,
    {
        let Some((_, section)) = self.entries.pop_front() else {
            return Err(de::Error::custom("value requested before key"));
        };
        let key = section.key.clone();
        seed.deserialize(section).map_err(|e| e.at(&key))
    }
}

/// Accepts either a boolean or its string form (`"true"`, `"False"`, ...)
///
/// Lets documents that store booleans as strings, such as JSON exports,
/// deserialize into the same types the binder fills.
pub fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Bool(bool),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Bool(b) => Ok(b),
        Repr::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            other => Err(de::Error::custom(format!("invalid boolean `{}`", other))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::AgentDefinition;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn binds_top_level_name() {
        let def: AgentDefinition = bind(&entries(&[("Name", "demo-agent")])).unwrap();
        assert_eq!(def.name.as_deref(), Some("demo-agent"));
        assert_eq!(def.instructions, None);
    }

    #[test]
    fn nested_sections_and_arrays() {
        let def: AgentDefinition = bind(&entries(&[
            ("Model:Id", "gpt-4o"),
            ("Model:Connection:ServiceId", "azure-openai"),
            ("Model:Options:temperature", "0.2"),
            ("Tools:1:Name", "second"),
            ("Tools:0:Name", "first"),
            ("Tools:10:Name", "eleventh"),
            ("Metadata:Tags:0", "support"),
        ]))
        .unwrap();

        let model = def.model.unwrap();
        assert_eq!(model.id.as_deref(), Some("gpt-4o"));
        assert_eq!(model.options.get("temperature").map(String::as_str), Some("0.2"));
        assert_eq!(
            model.connection.unwrap().service_id.as_deref(),
            Some("azure-openai")
        );

        let names: Vec<_> = def.tools.iter().filter_map(|t| t.name.as_deref()).collect();
        assert_eq!(names, vec!["first", "second", "eleventh"]);
        assert_eq!(def.metadata.unwrap().tags, vec!["support".to_string()]);
    }

    #[test]
    fn keys_match_fields_in_any_case() {
        let def: AgentDefinition = bind(&entries(&[
            ("NAME", "upper"),
            ("model:ID", "m1"),
            ("Model:Connection:SERVICEID", "svc"),
            ("inputs:0:required", "TRUE"),
        ]))
        .unwrap();

        assert_eq!(def.name.as_deref(), Some("upper"));
        let model = def.model.unwrap();
        assert_eq!(model.id.as_deref(), Some("m1"));
        assert_eq!(model.connection.unwrap().service_id.as_deref(), Some("svc"));
        assert!(def.inputs[0].required);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let def: AgentDefinition =
            bind(&entries(&[("Name", "a"), ("Nope:Deep:Key", "x")])).unwrap();
        assert_eq!(def.name.as_deref(), Some("a"));
    }

    #[test]
    fn child_keys_under_a_scalar_are_ignored() {
        let def: AgentDefinition =
            bind(&entries(&[("Name", "demo-agent"), ("Name:Locale", "en")])).unwrap();
        assert_eq!(def.name.as_deref(), Some("demo-agent"));
    }

    #[test]
    fn non_index_keys_under_a_list_are_ignored() {
        let def: AgentDefinition = bind(&entries(&[
            ("Name", "demo-agent"),
            ("Tools:0:Name", "lookup"),
            ("Tools:Comment", "not a tool"),
        ]))
        .unwrap();
        assert_eq!(def.tools.len(), 1);
        assert_eq!(def.tools[0].name.as_deref(), Some("lookup"));
    }

    #[test]
    fn section_value_is_ignored_for_struct_targets() {
        let def: AgentDefinition =
            bind(&entries(&[("Model", "flat"), ("Model:Id", "nested")])).unwrap();
        assert_eq!(def.model.unwrap().id.as_deref(), Some("nested"));
    }

    #[test]
    fn invalid_boolean_names_its_path() {
        let result: Result<AgentDefinition, _> =
            bind(&entries(&[("Inputs:0:Required", "maybe")]));
        let BindError::Deserialize { source, .. } = result.unwrap_err();
        assert_eq!(source.path(), "Inputs:0:Required");
        assert!(source.to_string().contains("invalid boolean `maybe`"));
    }

    #[test]
    fn parses_numbers_from_strings() {
        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Limits {
            max_tokens: u32,
            temperature: f64,
        }

        let limits: Limits =
            bind(&entries(&[("maxTokens", " 512 "), ("Temperature", "0.5")])).unwrap();
        assert_eq!(limits.max_tokens, 512);
        assert_eq!(limits.temperature, 0.5);

        let err = bind::<Limits>(&entries(&[("MaxTokens", "many"), ("Temperature", "1")]))
            .unwrap_err();
        assert!(err.to_string().contains("MaxTokens: invalid unsigned integer `many`"));
    }

    #[test]
    fn empty_entries_bind_to_default() {
        let def: AgentDefinition = bind(&BTreeMap::new()).unwrap();
        assert_eq!(def, AgentDefinition::default());
    }
}
