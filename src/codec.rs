// JSON forms of the canonical tree, processing snapshots and fact tables
use crate::contexts::ContextDictionary;
use crate::model::{FactTable, FactTree, FactValue};
use crate::prefixes::PrefixSet;
use crate::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub fn tree_to_json(tree: &FactTree) -> Result<String> {
    Ok(serde_json::to_string_pretty(tree)?)
}

pub fn tree_from_json(json: &str) -> Result<FactTree> {
    Ok(serde_json::from_str(json)?)
}

pub fn write_tree<P: AsRef<Path>>(tree: &FactTree, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, tree)?;
    writer.flush()?;
    Ok(())
}

pub fn read_tree<P: AsRef<Path>>(path: P) -> Result<FactTree> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Everything extraction needs, so a cached filing can skip merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tree: FactTree,
    pub contexts: ContextDictionary,
    pub prefixes: PrefixSet,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// `{ ticker: { concept: { date: value, "<date>_attrib": {..}, axis: { member: { date: value } } } } }`
pub fn table_to_value(table: &FactTable) -> Value {
    let mut concepts = Map::new();

    for (name, facts) in &table.concepts {
        let mut concept = Map::new();
        if let Some(prefix) = &facts.prefix {
            concept.insert("prefix".to_string(), Value::String(prefix.to_string()));
        }

        for (key, record) in &facts.facts {
            let path: Vec<&str> = key.dimensions.iter().flat_map(|d| d.keys()).collect();
            let date = key.date.as_str();
            insert_at(&mut concept, &path, name, |leaf| {
                leaf.insert(date.to_string(), value_json(&record.value));
                let attributes = record
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
                    .collect();
                leaf.insert(format!("{}_attrib", date), Value::Object(attributes));
            });
        }

        if !facts.labels.is_empty() {
            let labels = facts
                .labels
                .iter()
                .map(|(role, text)| (role.to_string(), Value::String(text.clone())))
                .collect();
            concept.insert("label".to_string(), Value::Object(labels));
        }
        if !facts.values.is_empty() {
            let values = facts.values.iter().cloned().map(Value::String).collect();
            concept.insert("values".to_string(), Value::Array(values));
        }

        concepts.insert(name.to_string(), Value::Object(concept));
    }

    let mut root = Map::new();
    root.insert(table.ticker.clone(), Value::Object(concepts));
    Value::Object(root)
}

pub fn table_to_json(table: &FactTable) -> Result<String> {
    Ok(serde_json::to_string_pretty(&table_to_value(table))?)
}

fn value_json(value: &FactValue) -> Value {
    match value {
        FactValue::Single(v) => Value::String(v.clone()),
        FactValue::Conflicting(values) => {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        }
    }
}

fn insert_at(
    map: &mut Map<String, Value>,
    keys: &[&str],
    concept: &str,
    leaf: impl FnOnce(&mut Map<String, Value>),
) {
    let Some((key, rest)) = keys.split_first() else {
        leaf(map);
        return;
    };
    let slot = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    match slot {
        Value::Object(inner) => insert_at(inner, rest, concept, leaf),
        _ => warn!("{}: dimension key {} collides with a value", concept, key),
    }
}
