//! Flat dotted-key runtime parameters.
//!
//! Every tunable in the pipeline is addressed by a dotted key path such as
//! `precond.coarsening.aggr.block_size` or `solver.tol`. Values come from a
//! JSON parameter file (nested objects are flattened into dotted keys) and
//! from repeated `key=value` command-line tokens; later insertions override
//! earlier ones.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default)]
pub struct Params {
    map: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    /// Merge a JSON file; nested objects flatten into dotted keys.
    pub fn merge_json_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        let root: Value = serde_json::from_str(&text)
            .map_err(|e| Error::parse(&path.display().to_string(), e.to_string()))?;
        match root {
            Value::Object(_) => {
                flatten("", &root, &mut self.map);
                Ok(())
            }
            _ => Err(Error::parse(&path.display().to_string(), "expected a JSON object")),
        }
    }

    /// Insert one `key=value` token. The value is parsed as JSON when it is a
    /// number or boolean and kept as a string otherwise.
    pub fn insert_pair(&mut self, pair: &str) -> Result<()> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("expected key=value, got `{pair}`")))?;
        if key.is_empty() {
            return Err(Error::Config(format!("empty key in `{pair}`")));
        }
        let parsed = match serde_json::from_str::<Value>(value) {
            Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
            _ => Value::String(value.to_string()),
        };
        self.map.insert(key.to_string(), parsed);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.map.get(key) {
            Some(v) => v.as_f64().unwrap_or(default),
            None => default,
        }
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        match self.map.get(key) {
            Some(v) => v.as_u64().map(|v| v as usize).unwrap_or(default),
            None => default,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.map.get(key).and_then(Value::as_str)
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(obj) => {
            for (k, v) in obj {
                let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten(&key, v, out);
            }
        }
        _ => {
            out.insert(prefix.to_string(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_parse_and_override() {
        let mut p = Params::new();
        p.insert_pair("solver.tol=1e-3").unwrap();
        p.insert_pair("precond.coarsening.aggr.block_size=3").unwrap();
        p.insert_pair("partition.type=balance").unwrap();
        assert_eq!(p.get_f64("solver.tol", 1e-8), 1e-3);
        assert_eq!(p.get_usize("precond.coarsening.aggr.block_size", 1), 3);
        assert_eq!(p.get_str("partition.type"), Some("balance"));

        // later keys win
        p.insert_pair("solver.tol=1e-6").unwrap();
        assert_eq!(p.get_f64("solver.tol", 1e-8), 1e-6);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let p = Params::new();
        assert_eq!(p.get_f64("solver.tol", 1e-8), 1e-8);
        assert_eq!(p.get_usize("solver.maxiter", 100), 100);
        assert_eq!(p.get_str("partition.type"), None);
    }

    #[test]
    fn malformed_pair_is_a_config_error() {
        let mut p = Params::new();
        assert!(matches!(p.insert_pair("no-equals-sign"), Err(Error::Config(_))));
        assert!(matches!(p.insert_pair("=5"), Err(Error::Config(_))));
    }

    #[test]
    fn json_file_flattens_to_dotted_keys() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("parmg-params-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"solver": {"tol": 1e-4, "maxiter": 50}, "precond": {"coarse_enough": 300}}"#)
            .unwrap();
        let mut p = Params::new();
        p.merge_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(p.get_f64("solver.tol", 0.0), 1e-4);
        assert_eq!(p.get_usize("solver.maxiter", 0), 50);
        assert_eq!(p.get_usize("precond.coarse_enough", 0), 300);
    }
}
