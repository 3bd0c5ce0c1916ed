//! Serde helpers encoding field elements as canonical decimal strings.
//!
//! Use with `#[serde(with = "serde_field")]` on an `Fr`, or the nested
//! modules for vectors.

use crate::*;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<S>(value: &Fr, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&fr_to_decimal(value))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Fr, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    fr_from_decimal(&s).map_err(D::Error::custom)
}

pub mod vec {
    use super::*;

    pub fn serialize<S>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let strings: Vec<String> = values.iter().map(fr_to_decimal).collect();
        strings.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Fr>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .iter()
            .map(|s| fr_from_decimal(s).map_err(D::Error::custom))
            .collect()
    }
}

pub mod vec2 {
    use super::*;

    pub fn serialize<S>(values: &[Vec<Fr>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let strings: Vec<Vec<String>> = values
            .iter()
            .map(|row| row.iter().map(fr_to_decimal).collect())
            .collect();
        strings.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<Fr>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strings = Vec::<Vec<String>>::deserialize(deserializer)?;
        strings
            .iter()
            .map(|row| {
                row.iter()
                    .map(|s| fr_from_decimal(s).map_err(D::Error::custom))
                    .collect()
            })
            .collect()
    }
}

/// Subgroup scalars, also as decimal strings
pub mod scalar {
    use super::*;

    pub fn serialize<S>(value: &Scalar, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&fr_to_decimal(&scalar_to_fr(value)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Scalar, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = fr_from_decimal(&s).map_err(D::Error::custom)?;
        if !fr_is_canonical_scalar(&value) {
            return Err(D::Error::custom("maci: scalar is not below the subgroup order"));
        }
        Ok(fr_to_scalar(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Holder {
        #[serde(with = "serde_field")]
        single: Fr,

        #[serde(with = "serde_field::vec")]
        many: Vec<Fr>,
    }

    #[test]
    fn test_decimal_strings() {
        let holder = Holder {
            single: Fr::from(7u64),
            many: vec![Fr::from(1u64), -Fr::from(1u64)],
        };

        let json = serde_json::to_string(&holder).unwrap();
        assert!(json.contains("\"single\":\"7\""));
        assert!(json.contains(&fr_to_decimal(&-Fr::from(1u64))));

        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);

        let too_big = format!("{{\"single\":\"{}\",\"many\":[]}}", fr_modulus());
        assert!(serde_json::from_str::<Holder>(&too_big).is_err());
    }
}
