//! Spreadsheet column addressing.
//!
//! Columns are written either as a zero-based integer or as spreadsheet
//! letters, which count in base 26 with no zero digit:
//!
//! ```text
//! A → 0    Z → 25    AA → 26    AZ → 51    BA → 52    ZZ → 701    AAA → 702
//! ```

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{TableError, TableResult};

/// Convert spreadsheet letters into a zero-based column index.
pub fn letters_to_index(letters: &str) -> TableResult<usize> {
    let trimmed = letters.trim();
    if trimmed.is_empty() {
        return Err(TableError::InvalidColumn(letters.to_string()));
    }

    let mut total: usize = 0;
    for c in trimmed.chars() {
        if !c.is_ascii_alphabetic() {
            return Err(TableError::InvalidColumn(letters.to_string()));
        }
        let digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        total = total
            .checked_mul(26)
            .and_then(|t| t.checked_add(digit))
            .ok_or_else(|| TableError::InvalidColumn(letters.to_string()))?;
    }

    Ok(total - 1)
}

/// Convert a zero-based column index into spreadsheet letters.
pub fn index_to_letters(index: usize) -> String {
    let mut n = index;
    let mut letters = Vec::new();

    loop {
        letters.push((b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }

    letters.iter().rev().collect()
}

/// A column reference that deserializes from either `3` or `"D"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnIndex(pub usize);

impl ColumnIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

impl From<usize> for ColumnIndex {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl fmt::Display for ColumnIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", index_to_letters(self.0))
    }
}

impl Serialize for ColumnIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0 as u64)
    }
}

impl<'de> Deserialize<'de> for ColumnIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Letters(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(ColumnIndex(n as usize)),
            Raw::Letters(s) => letters_to_index(&s)
                .map(ColumnIndex)
                .map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_letters() {
        assert_eq!(letters_to_index("A").unwrap(), 0);
        assert_eq!(letters_to_index("Z").unwrap(), 25);
        assert_eq!(letters_to_index("AA").unwrap(), 26);
        assert_eq!(letters_to_index("az").unwrap(), 51);
        assert_eq!(letters_to_index("ZZ").unwrap(), 701);
        assert_eq!(letters_to_index("AAA").unwrap(), 702);
    }

    #[test]
    fn test_known_indices() {
        assert_eq!(index_to_letters(0), "A");
        assert_eq!(index_to_letters(25), "Z");
        assert_eq!(index_to_letters(26), "AA");
        assert_eq!(index_to_letters(52), "BA");
        assert_eq!(index_to_letters(701), "ZZ");
    }

    #[test]
    fn test_largest_index() {
        let letters = index_to_letters(usize::MAX);
        assert!(letters.chars().all(|c| c.is_ascii_uppercase()));
        assert_eq!(index_to_letters(usize::MAX - 1).len(), letters.len());
    }

    #[test]
    fn test_round_trip() {
        for n in 0..20_000 {
            let letters = index_to_letters(n);
            assert_eq!(letters_to_index(&letters).unwrap(), n, "{}", letters);
            assert_eq!(index_to_letters(letters_to_index(&letters).unwrap()), letters);
        }
    }

    #[test]
    fn test_invalid_letters() {
        assert!(letters_to_index("").is_err());
        assert!(letters_to_index("A1").is_err());
    }

    #[test]
    fn test_deserialize_either_form() {
        let a: ColumnIndex = serde_json::from_str("\"AB\"").unwrap();
        let b: ColumnIndex = serde_json::from_str("27").unwrap();
        assert_eq!(a, b);
        assert!(serde_json::from_str::<ColumnIndex>("\"1B\"").is_err());
    }
}
