//! Replacement suggestions for well-known legacy packages.

use std::collections::BTreeMap;

const BUILT_IN: &[(&str, &str)] = &[
    // npm
    ("request", "undici"),
    ("request-promise", "undici"),
    ("left-pad", "String.prototype.padStart"),
    ("moment", "date-fns"),
    ("node-sass", "sass"),
    ("tslint", "eslint"),
    ("querystring", "URLSearchParams"),
    ("uuid-js", "uuid"),
    ("mkdirp", "fs.mkdir (recursive)"),
    ("rimraf", "fs.rm (recursive)"),
    // pip
    ("nose", "pytest"),
    ("pycrypto", "pycryptodome"),
    ("mock", "unittest.mock"),
    ("simplejson", "json"),
    ("python-dateutil", "datetime"),
    // Go
    ("github.com/pkg/errors", "errors"),
    ("github.com/golang/protobuf", "google.golang.org/protobuf"),
    ("github.com/dgrijalva/jwt-go", "github.com/golang-jwt/jwt/v5"),
    ("github.com/satori/go.uuid", "github.com/google/uuid"),
];

/// `package -> recommended alternative` lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestions {
    table: BTreeMap<String, String>,
}

impl Default for Suggestions {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

impl Suggestions {
    /// Built-ins overlaid with `extra` (extra entries win).
    pub fn new(extra: &BTreeMap<String, String>) -> Self {
        let mut table: BTreeMap<String, String> = BUILT_IN
            .iter()
            .map(|(name, alt)| (name.to_string(), alt.to_string()))
            .collect();
        for (name, alt) in extra {
            table.insert(name.to_lowercase(), alt.clone());
        }
        Self { table }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.table
            .get(name)
            .or_else(|| self.table.get(&name.to_lowercase()))
            .map(String::as_str)
    }
}
