//! EPPO code to class id mapping.

use std::collections::HashMap;

use crate::error::{ExtractError, Result};

pub const MONOCOT_CODE: &str = "PPPMM";
pub const DICOT_CODE: &str = "PPPDD";
const MONOCOT_COTYLEDON: i64 = -100;
const DICOT_COTYLEDON: i64 = -101;

/// Class list built from the configured `eppo_codes`.
#[derive(Debug, Clone)]
pub struct ClassMap {
    codes: Vec<String>,
    index: HashMap<String, usize>,
}

impl ClassMap {
    pub fn new(eppo_codes: &[String]) -> Result<Self> {
        let mut index = HashMap::with_capacity(eppo_codes.len());
        for (id, code) in eppo_codes.iter().enumerate() {
            if index.insert(code.clone(), id).is_some() {
                return Err(ExtractError::Configuration(format!(
                    "duplicate EPPO code '{}' in eppo_codes",
                    code
                )));
            }
        }
        Ok(Self {
            codes: eppo_codes.to_vec(),
            index,
        })
    }

    pub fn class_id(&self, eppo_code: &str) -> Option<usize> {
        self.index.get(eppo_code).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Map a raw database code onto a configured class.
    ///
    /// Growth-stage suffixes are stripped (`SOLTU1` becomes `SOLTU`); codes
    /// that match no class fall back to the monocot/dicot classes when the
    /// cotyledon marker says so.
    pub fn resolve(&self, raw_code: &str, cotyledon: Option<i64>) -> Option<&str> {
        let mut resolved = None;
        for code in &self.codes {
            if raw_code.starts_with(code.as_str()) {
                resolved = Some(code.as_str());
            }
        }
        if resolved.is_some() {
            return resolved;
        }

        let fallback = match cotyledon {
            Some(MONOCOT_COTYLEDON) => MONOCOT_CODE,
            Some(DICOT_COTYLEDON) => DICOT_CODE,
            _ => return None,
        };
        self.index
            .get_key_value(fallback)
            .map(|(code, _)| code.as_str())
    }
}
