use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(SymptomKind {
    Fatigue => "fatigue",
    Pain => "pain",
    Nausea => "nausea",
    Headache => "headache",
    Mood => "mood",
    SleepQuality => "sleep_quality",
    Appetite => "appetite",
    Energy => "energy",
});

impl SymptomKind {
    /// Capitalised label used in alert summaries.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Fatigue => "Fatigue",
            Self::Pain => "Pain",
            Self::Nausea => "Nausea",
            Self::Headache => "Headache",
            Self::Mood => "Mood",
            Self::SleepQuality => "Sleep quality",
            Self::Appetite => "Appetite",
            Self::Energy => "Energy",
        }
    }
}

str_enum!(TreatmentType {
    Medication => "medication",
    Supplement => "supplement",
    Exercise => "exercise",
    Therapy => "therapy",
    Lifestyle => "lifestyle",
    Diet => "diet",
    Other => "other",
});

str_enum!(AlertType {
    Spike => "spike",
    PostTreatment => "post_treatment",
    CoOccurrence => "co_occurrence",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn symptom_kind_round_trip() {
        for (variant, s) in [
            (SymptomKind::Fatigue, "fatigue"),
            (SymptomKind::Pain, "pain"),
            (SymptomKind::Nausea, "nausea"),
            (SymptomKind::Headache, "headache"),
            (SymptomKind::Mood, "mood"),
            (SymptomKind::SleepQuality, "sleep_quality"),
            (SymptomKind::Appetite, "appetite"),
            (SymptomKind::Energy, "energy"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(SymptomKind::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn alert_type_round_trip() {
        for (variant, s) in [
            (AlertType::Spike, "spike"),
            (AlertType::PostTreatment, "post_treatment"),
            (AlertType::CoOccurrence, "co_occurrence"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(AlertType::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn serde_uses_storage_names() {
        let json = serde_json::to_string(&SymptomKind::SleepQuality).unwrap();
        assert_eq!(json, "\"sleep_quality\"");
        let back: TreatmentType = serde_json::from_str("\"supplement\"").unwrap();
        assert_eq!(back, TreatmentType::Supplement);
    }

    #[test]
    fn display_name_is_capitalised() {
        assert_eq!(SymptomKind::SleepQuality.display_name(), "Sleep quality");
        assert_eq!(SymptomKind::Headache.display_name(), "Headache");
    }

    #[test]
    fn invalid_enum_returns_error() {
        assert!(SymptomKind::from_str("migraine").is_err());
        assert!(TreatmentType::from_str("").is_err());
        assert!(AlertType::from_str("gap").is_err());
    }
}
