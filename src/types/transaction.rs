//! Transaction feature vectors for the mobile-money fraud model

use crate::error::InputShapeError;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Number of model features.
pub const FEATURE_COUNT: usize = 32;

/// Feature names in the exact column order used for scaling, classification
/// and explanation.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // Account
    "aon",
    "daily_decr30",
    "daily_decr90",
    "rental30",
    "rental90",
    "last_rech_date_ma",
    "last_rech_date_da",
    "last_rech_amt_ma",
    // Main account recharges
    "cnt_ma_rech30",
    "fr_ma_rech30",
    "sumamnt_ma_rech30",
    "medianamnt_ma_rech30",
    "medianmarechprebal30",
    "cnt_ma_rech90",
    "fr_ma_rech90",
    "sumamnt_ma_rech90",
    "medianamnt_ma_rech90",
    "medianmarechprebal90",
    // Data account recharges
    "cnt_da_rech30",
    "fr_da_rech30",
    "cnt_da_rech90",
    "fr_da_rech90",
    // Loans
    "cnt_loans30",
    "amnt_loans30",
    "maxamnt_loans30",
    "medianamnt_loans30",
    "cnt_loans90",
    "amnt_loans90",
    "maxamnt_loans90",
    "medianamnt_loans90",
    "payback30",
    "payback90",
];

/// Position of a feature in [`FEATURE_NAMES`].
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|&n| n == name)
}

/// A validated transaction: one finite value per model feature, in
/// [`FEATURE_NAMES`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    /// Build from values already in feature order.
    pub fn from_slice(values: &[f64]) -> Result<Self, InputShapeError> {
        if values.len() != FEATURE_COUNT {
            return Err(InputShapeError::Arity {
                expected: FEATURE_COUNT,
                found: values.len(),
            });
        }

        let mut out = [0.0; FEATURE_COUNT];
        for (i, &v) in values.iter().enumerate() {
            if !v.is_finite() {
                return Err(InputShapeError::NonFinite(FEATURE_NAMES[i].to_string()));
            }
            out[i] = v;
        }
        Ok(Self { values: out })
    }

    /// Build from `(name, value)` pairs. Every feature must be present;
    /// unknown names are ignored.
    pub fn from_named<I, S>(pairs: I) -> Result<Self, InputShapeError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut slots: [Option<f64>; FEATURE_COUNT] = [None; FEATURE_COUNT];
        for (name, value) in pairs {
            if let Some(i) = feature_index(name.as_ref()) {
                slots[i] = Some(value);
            }
        }

        let mut values = [0.0; FEATURE_COUNT];
        for (i, slot) in slots.iter().enumerate() {
            match slot {
                Some(v) if v.is_finite() => values[i] = *v,
                Some(_) => return Err(InputShapeError::NonFinite(FEATURE_NAMES[i].to_string())),
                None => return Err(InputShapeError::MissingFeature(FEATURE_NAMES[i].to_string())),
            }
        }
        Ok(Self { values })
    }

    /// Build from a JSON object keyed by feature name. Values must be JSON
    /// numbers.
    pub fn from_json(value: &Value) -> Result<Self, InputShapeError> {
        match value {
            Value::Object(map) => Self::from_json_map(map),
            _ => Err(InputShapeError::NotAnObject),
        }
    }

    fn from_json_map(map: &Map<String, Value>) -> Result<Self, InputShapeError> {
        let mut values = [0.0; FEATURE_COUNT];
        for (i, name) in FEATURE_NAMES.iter().enumerate() {
            let raw = map
                .get(*name)
                .ok_or_else(|| InputShapeError::MissingFeature(name.to_string()))?;
            values[i] = raw.as_f64().ok_or_else(|| InputShapeError::NonNumeric {
                feature: name.to_string(),
                value: raw.to_string(),
            })?;
        }
        Self::from_slice(&values)
    }

    /// All-zero vector.
    pub fn zeros() -> Self {
        Self {
            values: [0.0; FEATURE_COUNT],
        }
    }

    /// Value of a named feature.
    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|i| self.values[i])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// `(name, value)` pairs in feature order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FEATURE_COUNT))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FeatureVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_json_map(&map).map_err(de::Error::custom)
    }
}

/// A feature vector with its known class.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSample {
    pub features: FeatureVector,
    pub is_fraud: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_json(value: f64) -> Value {
        let map: Map<String, Value> = FEATURE_NAMES
            .iter()
            .map(|n| (n.to_string(), json!(value)))
            .collect();
        Value::Object(map)
    }

    #[test]
    fn test_feature_names_unique() {
        for (i, name) in FEATURE_NAMES.iter().enumerate() {
            assert_eq!(feature_index(name), Some(i));
        }
    }

    #[test]
    fn test_from_json_complete() {
        let vector = FeatureVector::from_json(&full_json(1.5)).unwrap();
        assert_eq!(vector.get("aon"), Some(1.5));
        assert_eq!(vector.as_slice().len(), FEATURE_COUNT);
    }

    #[test]
    fn test_from_json_missing_feature() {
        let mut value = full_json(0.0);
        value.as_object_mut().unwrap().remove("payback90");

        let err = FeatureVector::from_json(&value).unwrap_err();
        assert_eq!(err, InputShapeError::MissingFeature("payback90".to_string()));
    }

    #[test]
    fn test_from_json_non_numeric() {
        let mut value = full_json(0.0);
        value["rental30"] = json!("abc");

        let err = FeatureVector::from_json(&value).unwrap_err();
        assert!(matches!(err, InputShapeError::NonNumeric { ref feature, .. } if feature == "rental30"));
    }

    #[test]
    fn test_from_json_ignores_extra_fields() {
        let mut value = full_json(2.0);
        value["transaction_id"] = json!("tx_1");
        assert!(FeatureVector::from_json(&value).is_ok());
    }

    #[test]
    fn test_from_slice_wrong_arity() {
        let err = FeatureVector::from_slice(&[1.0; 31]).unwrap_err();
        assert_eq!(
            err,
            InputShapeError::Arity {
                expected: 32,
                found: 31
            }
        );
    }

    #[test]
    fn test_from_slice_rejects_nan() {
        let mut values = [0.0; FEATURE_COUNT];
        values[3] = f64::NAN;
        assert!(matches!(
            FeatureVector::from_slice(&values),
            Err(InputShapeError::NonFinite(_))
        ));
    }

    #[test]
    fn test_serde_uses_feature_names() {
        let vector = FeatureVector::zeros();
        let json = serde_json::to_value(&vector).unwrap();
        assert_eq!(json["cnt_loans30"], json!(0.0));

        let back: FeatureVector = serde_json::from_value(json).unwrap();
        assert_eq!(back, vector);
    }
}
