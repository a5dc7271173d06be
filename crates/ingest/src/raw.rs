//! Raw per-source record shapes.
//!
//! Every field is optional and defaulted so that decoding never fails on
//! absent or `null` keys; only type mismatches reject a record.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::MappingError;
use crate::trial::Source;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawRecord {
    ClinicalTrials(CtStudy),
    Who(WhoRecord),
}

impl RawRecord {
    pub fn source(&self) -> Source {
        match self {
            RawRecord::ClinicalTrials(_) => Source::ClinicalTrials,
            RawRecord::Who(_) => Source::Who,
        }
    }

    /// Decode one JSON object as a record of the given registry.
    pub fn from_value(value: Value, source: Source) -> Result<Self, MappingError> {
        let malformed = |e: serde_json::Error| MappingError::Malformed {
            registry: source,
            message: e.to_string(),
        };
        match source {
            Source::ClinicalTrials => serde_json::from_value(value)
                .map(RawRecord::ClinicalTrials)
                .map_err(malformed),
            Source::Who => serde_json::from_value(value)
                .map(RawRecord::Who)
                .map_err(malformed),
        }
    }
}

/// Treats an explicit `null` like an absent key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// ClinicalTrials.gov (API v2 study document)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CtStudy {
    #[serde(deserialize_with = "null_as_default")]
    pub protocol_section: ProtocolSection,
    #[serde(deserialize_with = "null_as_default")]
    pub derived_section: DerivedSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolSection {
    #[serde(deserialize_with = "null_as_default")]
    pub identification_module: IdentificationModule,
    #[serde(deserialize_with = "null_as_default")]
    pub description_module: DescriptionModule,
    #[serde(deserialize_with = "null_as_default")]
    pub status_module: StatusModule,
    #[serde(deserialize_with = "null_as_default")]
    pub conditions_module: ConditionsModule,
    #[serde(deserialize_with = "null_as_default")]
    pub design_module: DesignModule,
    #[serde(deserialize_with = "null_as_default")]
    pub arms_interventions_module: ArmsInterventionsModule,
    #[serde(deserialize_with = "null_as_default")]
    pub outcomes_module: OutcomesModule,
    #[serde(deserialize_with = "null_as_default")]
    pub references_module: ReferencesModule,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentificationModule {
    pub nct_id: Option<String>,
    pub brief_title: Option<String>,
    pub official_title: Option<String>,
    #[serde(alias = "secondaryIds", deserialize_with = "null_as_default")]
    pub secondary_id_infos: Vec<CtSecondaryId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CtSecondaryId {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub id_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescriptionModule {
    pub brief_summary: Option<String>,
    pub detailed_description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusModule {
    pub overall_status: Option<String>,
    pub why_stopped: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub start_date_struct: DateStruct,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateStruct {
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub date_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionsModule {
    #[serde(deserialize_with = "null_as_default")]
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DesignModule {
    pub study_type: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub phases: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub design_info: CtDesignInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CtDesignInfo {
    pub primary_purpose: Option<String>,
    pub allocation: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub masking_info: MaskingInfo,
    pub intervention_model: Option<String>,
    pub observational_model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingInfo {
    pub masking: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmsInterventionsModule {
    #[serde(deserialize_with = "null_as_default")]
    pub interventions: Vec<CtIntervention>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CtIntervention {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub intervention_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutcomesModule {
    #[serde(deserialize_with = "null_as_default")]
    pub primary_outcomes: Vec<CtOutcome>,
    #[serde(deserialize_with = "null_as_default")]
    pub secondary_outcomes: Vec<CtOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CtOutcome {
    pub measure: Option<String>,
    #[serde(alias = "timeframe")]
    pub time_frame: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferencesModule {
    #[serde(deserialize_with = "null_as_default")]
    pub references: Vec<CtReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CtReference {
    pub pmid: Option<String>,
    #[serde(rename = "type")]
    pub reference_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DerivedSection {
    #[serde(deserialize_with = "null_as_default")]
    pub condition_browse_module: BrowseModule,
    #[serde(deserialize_with = "null_as_default")]
    pub intervention_browse_module: BrowseModule,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseModule {
    #[serde(deserialize_with = "null_as_default")]
    pub meshes: Vec<MeshTerm>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshTerm {
    pub id: Option<String>,
    pub term: Option<String>,
}

// ---------------------------------------------------------------------------
// WHO ICTRP (flattened export row)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhoRecord {
    pub curie: Option<String>,
    #[serde(alias = "TrialID")]
    pub trial_id: Option<String>,
    #[serde(alias = "public_title")]
    pub name: Option<String>,
    #[serde(rename = "type", alias = "study_type")]
    pub study_type: Option<String>,
    pub phase: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub design: TextList,
    #[serde(deserialize_with = "null_as_default")]
    pub countries: TextList,
    #[serde(deserialize_with = "null_as_default")]
    pub conditions: TextList,
    #[serde(deserialize_with = "null_as_default")]
    pub interventions: TextList,
    pub primary_outcome: Option<String>,
    pub secondary_outcome: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub secondary_ids: TextList,
    #[serde(deserialize_with = "null_as_default")]
    pub mappings: TextList,
}

/// A list field that some exports flatten into one `;`-separated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextList {
    Many(Vec<String>),
    One(String),
}

impl Default for TextList {
    fn default() -> Self {
        TextList::Many(Vec::new())
    }
}

impl TextList {
    /// Trimmed, non-empty entries in source order.
    pub fn items(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            TextList::Many(values) => values.iter().map(String::as_str).collect(),
            TextList::One(value) => value.split(';').collect(),
        };
        raw.into_iter()
            .map(|v| v.replace("<br>", " ").trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ct_study_tolerates_missing_sections() {
        let value = json!({
            "protocolSection": {
                "identificationModule": { "nctId": "NCT001" }
            }
        });
        let record = RawRecord::from_value(value, Source::ClinicalTrials).unwrap();
        match record {
            RawRecord::ClinicalTrials(study) => {
                let ids = &study.protocol_section.identification_module;
                assert_eq!(ids.nct_id.as_deref(), Some("NCT001"));
                assert!(study.protocol_section.conditions_module.conditions.is_empty());
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_type_mismatch_is_malformed() {
        let value = json!({ "protocolSection": { "conditionsModule": { "conditions": 7 } } });
        let err = RawRecord::from_value(value, Source::ClinicalTrials).unwrap_err();
        assert!(matches!(err, MappingError::Malformed { registry: Source::ClinicalTrials, .. }));
    }

    #[test]
    fn test_text_list_accepts_string_or_array() {
        let value = json!({
            "curie": "who:1",
            "conditions": "Asthma; COPD ;",
            "interventions": ["Drug: Salbutamol", " "]
        });
        let record = RawRecord::from_value(value, Source::Who).unwrap();
        let RawRecord::Who(who) = record else {
            panic!("expected WHO record");
        };
        assert_eq!(who.conditions.items(), vec!["Asthma", "COPD"]);
        assert_eq!(who.interventions.items(), vec!["Drug: Salbutamol"]);
        assert!(who.mappings.items().is_empty());
    }

    #[test]
    fn test_null_lists_decode_as_empty() {
        let value = json!({
            "protocolSection": {
                "identificationModule": { "nctId": "NCT002", "secondaryIdInfos": null },
                "conditionsModule": { "conditions": null },
                "designModule": { "phases": null, "designInfo": null },
                "armsInterventionsModule": { "interventions": null },
                "referencesModule": null
            },
            "derivedSection": null
        });
        let RawRecord::ClinicalTrials(study) =
            RawRecord::from_value(value, Source::ClinicalTrials).unwrap()
        else {
            panic!("expected ClinicalTrials record");
        };
        let protocol = &study.protocol_section;
        assert_eq!(protocol.identification_module.nct_id.as_deref(), Some("NCT002"));
        assert!(protocol.conditions_module.conditions.is_empty());
        assert!(protocol.design_module.phases.is_empty());
        assert!(protocol.arms_interventions_module.interventions.is_empty());
        assert!(study.derived_section.condition_browse_module.meshes.is_empty());
    }

    #[test]
    fn test_null_text_lists_decode_as_empty() {
        let value = json!({
            "curie": "who:123",
            "name": "Null lists",
            "conditions": "Asthma",
            "interventions": null,
            "secondary_ids": null,
            "mappings": null,
            "countries": null,
            "design": null
        });
        let RawRecord::Who(who) = RawRecord::from_value(value, Source::Who).unwrap() else {
            panic!("expected WHO record");
        };
        assert_eq!(who.conditions.items(), vec!["Asthma"]);
        assert!(who.interventions.items().is_empty());
        assert!(who.secondary_ids.items().is_empty());
        assert!(who.mappings.items().is_empty());
    }
}
