#![allow(dead_code)]

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::options::{OptionMap, is_flag_key, parse_bool, uniform_key_data};

/// Option name that switches disallowed options from an error to a no-op.
pub const SLOPPY_MOUNT: &str = "sloppy_mount";

/// Policy and resolved values for one option namespace.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigDetails {
    /// Names a caller may set.
    pub allowed: Vec<String>,
    /// Names that must resolve from some source.
    pub mandatory: Vec<String>,
    /// Operator defaults for names callers may not set.
    pub forced: IndexMap<String, String>,
    /// Values resolved from operator defaults and caller input.
    pub options: IndexMap<String, String>,
}

impl ConfigDetails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load operator policy.
    ///
    /// `allowed` is a comma list of names. `defaults` is a comma list of
    /// `name:value` pairs; a default for an allowed name seeds `options`,
    /// any other default becomes `forced`.
    pub fn read_conf(&mut self, allowed: &str, defaults: &str, mandatory: &[String]) {
        if !allowed.is_empty() {
            self.allowed = allowed
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if !defaults.is_empty() {
            self.options.clear();
            self.forced.clear();
            for (key, value) in parse_defaults(defaults) {
                if self.is_allowed(&key) {
                    self.options.insert(key, value);
                } else {
                    self.forced.insert(key, value);
                }
            }
        }

        if !mandatory.is_empty() {
            self.mandatory = mandatory.to_vec();
        }
    }

    pub fn is_allowed(&self, key: &str) -> bool {
        self.allowed.iter().any(|k| k == key)
    }

    /// Allow `key` for callers unless the operator forced its value.
    pub fn allow(&mut self, key: &str) {
        if !self.is_allowed(key) && !self.forced.contains_key(key) {
            self.allowed.push(key.to_string());
        }
    }

    /// Mandatory names present in neither `options` nor `forced`.
    pub fn check_mandatory(&self) -> Vec<String> {
        self.mandatory
            .iter()
            .filter(|k| !self.options.contains_key(*k) && !self.forced.contains_key(*k))
            .cloned()
            .collect()
    }

    /// Resolved value for `key`, if any.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .or_else(|| self.forced.get(key))
            .map(String::as_str)
    }

    /// Remove `sloppy_mount` from both maps and return its boolean value.
    fn take_sloppy_mount(&mut self) -> bool {
        let mut value = self.options.shift_remove(SLOPPY_MOUNT);
        if let Some(forced) = self.forced.shift_remove(SLOPPY_MOUNT) {
            value = Some(forced);
        }
        value.and_then(|v| parse_bool(&v)).unwrap_or(false)
    }

    /// Record allowed caller entries; return the disallowed names in order.
    fn parse_map(&mut self, entries: &OptionMap, ignore: &[&str]) -> Vec<String> {
        let mut violations = Vec::new();
        for (key, value) in entries {
            let value = uniform_key_data(key, value);
            if value.is_empty() || key.is_empty() || ignore.contains(&key.as_str()) {
                continue;
            }
            if self.is_allowed(key) {
                self.options.insert(key.clone(), value);
            } else {
                violations.push(key.clone());
            }
        }
        violations
    }

    /// Record allowed `key=value` pairs from the share's query string.
    fn parse_url(&mut self, share: &str, ignore: &[&str]) -> Vec<String> {
        let Some((_, query)) = share.split_once('?') else {
            return Vec::new();
        };
        let mut violations = Vec::new();
        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            if key.is_empty() || value.is_empty() || ignore.contains(&key) {
                continue;
            }
            if self.is_allowed(key) {
                self.options.insert(key.to_string(), value.to_string());
            } else {
                violations.push(key.to_string());
            }
        }
        violations
    }

    /// `options` followed by `forced`.
    fn make_config(&self) -> IndexMap<String, String> {
        self.options
            .iter()
            .chain(self.forced.iter())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn make_params(&self, prefix: &str, except: &[&str]) -> Vec<String> {
        self.make_config()
            .iter()
            .filter(|(k, _)| k.as_str() != SLOPPY_MOUNT && !except.contains(&k.as_str()))
            .filter_map(|(k, v)| render_param(prefix, k, v))
            .collect()
    }
}

/// Render one parameter. Flag keys become a bare `<prefix><key>` when true
/// and disappear when false; integers are written in canonical form.
fn render_param(prefix: &str, key: &str, value: &str) -> Option<String> {
    if is_flag_key(key) {
        match parse_bool(value) {
            Some(true) => return Some(format!("{prefix}{key}")),
            Some(false) => return None,
            None => {}
        }
    }
    if value.is_empty() {
        return Some(format!("{prefix}{key}"));
    }
    if let Ok(n) = value.parse::<i64>() {
        return Some(format!("{prefix}{key}={n}"));
    }
    Some(format!("{prefix}{key}={value}"))
}

fn parse_defaults(defaults: &str) -> Vec<(String, String)> {
    defaults
        .split(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once(':').unwrap_or((entry, ""));
            let key = key.trim();
            if key.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

/// Operator template for the share-URL (`source`) and caller-map (`mount`)
/// namespaces.
///
/// A live mount never touches the template: clone it and merge into the
/// clone, so one volume's resolved values cannot leak into another.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Config {
    source: ConfigDetails,
    mount: ConfigDetails,
    sloppy_mount: bool,
}

impl Config {
    pub fn new(source: ConfigDetails, mount: ConfigDetails) -> Self {
        Self {
            source,
            mount,
            sloppy_mount: false,
        }
    }

    pub fn source(&self) -> &ConfigDetails {
        &self.source
    }

    pub fn mount_details(&self) -> &ConfigDetails {
        &self.mount
    }

    pub fn sloppy_mount(&self) -> bool {
        self.sloppy_mount
    }

    /// Allow extra caller-map names for this copy only.
    pub fn allow_mount(&mut self, keys: &[&str]) {
        for key in keys {
            self.mount.allow(key);
        }
    }

    /// Merge caller options and the share's query string into this copy.
    ///
    /// Disallowed names fail the merge unless `sloppy_mount` resolves to
    /// true. Missing mandatory names always fail.
    pub fn set_entries(&mut self, share: &str, opts: &OptionMap, ignore: &[&str]) -> Result<()> {
        let mut violations = self.mount.parse_map(opts, ignore);
        violations.extend(self.source.parse_url(share, ignore));
        self.sloppy_mount = self.mount.take_sloppy_mount();

        if !violations.is_empty() && !self.sloppy_mount {
            return Err(Error::NotAllowedOptions(violations));
        }

        let mut missing = self.source.check_mandatory();
        missing.extend(self.mount.check_mandatory());
        if !missing.is_empty() {
            return Err(Error::MissingMandatoryOptions(missing));
        }

        Ok(())
    }

    /// `share` with its query string replaced by the resolved source options.
    pub fn share(&self, share: &str) -> String {
        let base = share.split_once('?').map_or(share, |(base, _)| base);
        let params = self.source.make_params("", &[]);
        if params.is_empty() {
            base.to_string()
        } else {
            format!("{base}?{}", params.join("&"))
        }
    }

    /// Resolved mount options as `--key[=value]` flags.
    pub fn mount(&self) -> Vec<String> {
        self.mount.make_params("--", &[])
    }

    /// Like [`Config::mount`], leaving out `except`.
    pub fn mount_except(&self, except: &[&str]) -> Vec<String> {
        self.mount.make_params("--", except)
    }

    /// Resolved mount options as a key/value map.
    pub fn mount_config(&self) -> IndexMap<String, String> {
        let mut config = self.mount.make_config();
        config.shift_remove(SLOPPY_MOUNT);
        config
    }

    /// Resolved value for `key`, looking at the mount namespace first.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.mount.lookup(key).or_else(|| self.source.lookup(key))
    }
}
