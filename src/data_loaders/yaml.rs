// ~/src/data_loaders/yaml.rs

use std::{collections::HashMap, fs, path::Path};

use serde_yaml::Value;

/// Universal YAML loader
pub fn load_yaml(path: &Path) -> Option<Value> {
    let txt = fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&txt).ok()
}

/// Flattens a top-level YAML mapping into lower-cased `key -> value` strings.
/// Nested mappings and sequences are ignored.
pub fn load_yaml_map(path: &Path) -> Option<HashMap<String, String>> {
    yaml_to_map(&load_yaml(path)?)
}

pub fn yaml_to_map(root: &Value) -> Option<HashMap<String, String>> {
    let map = root.as_mapping()?;
    let mut out = HashMap::new();

    for (k, v) in map.iter() {
        let Some(key) = k.as_str() else {
            continue;
        };

        let value = match v {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
            _ => continue,
        };
        out.insert(key.trim().to_ascii_lowercase(), value);
    }

    Some(out)
}
