//! Layered configuration: args > env > file > defaults.
//!
//! Each layer is a YAML mapping. Layers are deep-merged from lowest to
//! highest precedence and the result is deserialized into [`Settings`].

use super::parser;
use super::types::Settings;
use serde_yaml_ng::{Mapping, Value};
use std::path::Path;

/// Environment variables with this prefix form the env layer.
pub const ENV_PREFIX: &str = "STRETCH_";

/// Separator for nested keys in environment variable names.
pub const ENV_NESTING: &str = "__";

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yml";

/// Where the file layer comes from.
#[derive(Debug, Clone)]
pub enum FileSource<'a> {
    /// `config.yml` in the working directory; skipped when absent.
    Default,
    /// A path the user asked for; must exist.
    Explicit(&'a Path),
    /// No file layer.
    None,
}

/// Inputs to [`load_settings`].
#[derive(Debug, Clone)]
pub struct ConfigSources<'a> {
    pub file: FileSource<'a>,
    /// Environment as `(name, value)` pairs
    pub env: Vec<(String, String)>,
    /// Dotted-key overrides from the command line
    pub overrides: Vec<(String, Value)>,
}

impl<'a> ConfigSources<'a> {
    /// Sources with the process environment and no overrides.
    pub fn from_process_env(file: FileSource<'a>) -> Self {
        Self {
            file,
            env: std::env::vars().collect(),
            overrides: Vec::new(),
        }
    }
}

/// Merge all layers and deserialize.
pub fn load_settings(sources: &ConfigSources) -> Result<Settings, String> {
    let merged = merged_value(sources)?;
    serde_yaml_ng::from_value(merged).map_err(|e| format!("invalid configuration: {}", e))
}

/// The merged configuration tree before deserialization.
pub fn merged_value(sources: &ConfigSources) -> Result<Value, String> {
    let mut merged = serde_yaml_ng::to_value(Settings::default())
        .map_err(|e| format!("serialize defaults: {}", e))?;

    if let Some(file) = file_layer(&sources.file)? {
        tracing::debug!(keys = file.len(), "merging config file layer");
        merge(&mut merged, Value::Mapping(file));
    }

    let env = env_layer(sources.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    if !env.is_empty() {
        tracing::debug!(keys = env.len(), "merging environment layer");
        merge(&mut merged, Value::Mapping(env));
    }

    let mut args = Mapping::new();
    for (key, value) in &sources.overrides {
        set_path(&mut args, key, value.clone())?;
    }
    merge(&mut merged, Value::Mapping(args));

    Ok(merged)
}

fn file_layer(source: &FileSource) -> Result<Option<Mapping>, String> {
    match source {
        FileSource::None => Ok(None),
        FileSource::Explicit(path) => parser::parse_config_file(path).map(Some),
        FileSource::Default => {
            let path = Path::new(DEFAULT_CONFIG_FILE);
            if path.exists() {
                parser::parse_config_file(path).map(Some)
            } else {
                Ok(None)
            }
        }
    }
}

/// Build the env layer from `STRETCH_*` variables.
///
/// `STRETCH_BACKEND__API_KEY=abc` becomes `backend: {api_key: abc}`.
pub fn env_layer<'a, I>(vars: I) -> Mapping
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut layer = Mapping::new();
    for (name, raw) in vars {
        let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key = rest.to_lowercase().replace(ENV_NESTING, ".");
        if key.is_empty() || key.split('.').any(str::is_empty) {
            continue;
        }
        // set_path only fails on empty segments, which are filtered above
        let _ = set_path(&mut layer, &key, parse_scalar(raw));
    }
    layer
}

/// Parse `key=value` from `--set`.
pub fn parse_override(arg: &str) -> Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got \"{}\"", arg))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in \"{}\"", arg));
    }
    Ok((key.to_string(), parse_scalar(raw)))
}

/// Interpret a string the way YAML would (`true`, `16`, `~`), falling back to
/// a plain string. Collections stay strings. Numbers and booleans are typed
/// only in their canonical spelling, so text fields can recover the literal.
pub fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    match serde_yaml_ng::from_str::<Value>(raw) {
        Ok(Value::Null) => Value::Null,
        Ok(Value::Bool(b)) if raw == b.to_string() => Value::Bool(b),
        Ok(Value::Number(n)) if !n.is_f64() && raw == n.to_string() => Value::Number(n),
        Ok(v @ Value::String(_)) => v,
        _ => Value::String(raw.to_string()),
    }
}

/// Set a dotted key inside a mapping, creating intermediate mappings and
/// replacing non-mapping values in the way.
pub fn set_path(map: &mut Mapping, dotted: &str, value: Value) -> Result<(), String> {
    let segments: Vec<&str> = dotted.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(format!("invalid config key \"{}\"", dotted));
    }

    let mut current = map;
    for segment in &segments[..segments.len() - 1] {
        let key = Value::String((*segment).to_string());
        let entry = current
            .entry(key)
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if !entry.is_mapping() {
            *entry = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(next) = entry else {
            return Err(format!("cannot descend into \"{}\"", segment));
        };
        current = next;
    }

    let last = segments[segments.len() - 1];
    current.insert(Value::String(last.to_string()), value);
    Ok(())
}

/// Deep merge `overlay` into `base`. Mappings merge per key; anything else
/// replaces.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
