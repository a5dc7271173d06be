//! Field Mapper: raw per-source records into the common `TrialRecord`.

use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::MappingError;
use crate::raw::{CtStudy, MeshTerm, RawRecord, WhoRecord};
use crate::registry;
use crate::trial::{DesignInfo, EntityKind, Mention, Outcome, Source, TrialRecord};

const MESH_NAMESPACE: &str = "MESH";

/// Map one raw record from `source` into a `TrialRecord`.
///
/// Pure and total apart from the primary identifier: absent fields become
/// empty strings or lists.
pub fn map(raw: &RawRecord, source: Source) -> Result<TrialRecord, MappingError> {
    if raw.source() != source {
        return Err(MappingError::SourceMismatch {
            expected: source,
            found: raw.source(),
        });
    }
    match raw {
        RawRecord::ClinicalTrials(study) => map_clinical_trials(study),
        RawRecord::Who(record) => map_who(record),
    }
}

pub fn map_clinical_trials(study: &CtStudy) -> Result<TrialRecord, MappingError> {
    let protocol = &study.protocol_section;
    let ids = &protocol.identification_module;

    let nct_id = text(&ids.nct_id);
    if nct_id.is_empty() {
        return Err(MappingError::MissingIdentifier {
            registry: Source::ClinicalTrials,
            field: "nctId",
        });
    }

    let mut trial = TrialRecord::new(
        Source::ClinicalTrials,
        registry::CLINICALTRIALS_PREFIX,
        &nct_id,
    );
    trial.title = text(&ids.brief_title);
    trial.official_title = text(&ids.official_title);
    trial.brief_summary = text(&protocol.description_module.brief_summary);

    // Study type e.g. "INTERVENTIONAL"; phases e.g. ["PHASE2", "PHASE3"]
    let design = &protocol.design_module;
    trial.study_type = lower(&design.study_type);
    trial.phase = design
        .phases
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(";");

    let info = &design.design_info;
    trial.design = DesignInfo {
        purpose: lower(&info.primary_purpose),
        allocation: lower(&info.allocation),
        masking: lower(&info.masking_info.masking),
        assignment: if text(&info.intervention_model).is_empty() {
            lower(&info.observational_model)
        } else {
            lower(&info.intervention_model)
        },
        fallback: None,
    };

    let status = &protocol.status_module;
    trial.status = lower(&status.overall_status);
    trial.why_stopped = text(&status.why_stopped);
    trial.start_year = status.start_date_struct.date.as_deref().and_then(parse_year);

    trial.conditions = protocol
        .conditions_module
        .conditions
        .iter()
        .filter(|c| !registry::is_null_marker(c))
        .map(|c| Mention::new(c.trim(), EntityKind::Condition))
        .collect();
    trial.conditions.extend(mesh_mentions(
        &study.derived_section.condition_browse_module.meshes,
        EntityKind::Condition,
    ));

    trial.interventions = protocol
        .arms_interventions_module
        .interventions
        .iter()
        .filter_map(|i| {
            let name = text(&i.name);
            if registry::is_null_marker(&name) {
                return None;
            }
            Some(
                Mention::new(name, EntityKind::Intervention)
                    .with_label(Some(lower(&i.intervention_type))),
            )
        })
        .collect();
    trial.interventions.extend(mesh_mentions(
        &study.derived_section.intervention_browse_module.meshes,
        EntityKind::Intervention,
    ));

    let outcomes = &protocol.outcomes_module;
    trial.primary_outcomes = outcomes
        .primary_outcomes
        .iter()
        .map(|o| Outcome {
            measure: text(&o.measure),
            time_frame: text(&o.time_frame),
        })
        .filter(|o| !o.measure.is_empty())
        .collect();
    trial.secondary_outcomes = outcomes
        .secondary_outcomes
        .iter()
        .map(|o| Outcome {
            measure: text(&o.measure),
            time_frame: text(&o.time_frame),
        })
        .filter(|o| !o.measure.is_empty())
        .collect();

    trial.secondary_ids = ids
        .secondary_id_infos
        .iter()
        .map(|s| text(&s.id))
        .filter(|s| !s.is_empty())
        .collect();

    trial.references = protocol
        .references_module
        .references
        .iter()
        .map(|r| text(&r.pmid))
        .filter(|pmid| !pmid.is_empty())
        .collect();

    Ok(trial)
}

pub fn map_who(record: &WhoRecord) -> Result<TrialRecord, MappingError> {
    let raw_id = match text(&record.curie) {
        id if !id.is_empty() => id,
        _ => text(&record.trial_id),
    };
    let Some((prefix, native_id)) = registry::qualify(&raw_id) else {
        return Err(MappingError::MissingIdentifier {
            registry: Source::Who,
            field: "curie",
        });
    };
    let mut trial = TrialRecord::new(Source::Who, &prefix, &native_id);

    trial.title = text(&record.name);
    trial.study_type = lower(&record.study_type);
    trial.phase = lower(&record.phase);
    trial.status = lower(&record.status);
    trial.design = parse_who_design(&record.design.items());
    trial.countries = record.countries.items();

    trial.conditions = record
        .conditions
        .items()
        .into_iter()
        .filter(|c| !registry::is_null_marker(c))
        .map(|c| Mention::new(c, EntityKind::Condition))
        .collect();

    // "Drug: Metformin" -> term "Metformin", label "drug"
    trial.interventions = record
        .interventions
        .items()
        .into_iter()
        .filter_map(|entry| {
            let (label, term) = match entry.rsplit_once(':') {
                Some((kind, term)) => (Some(kind.trim().to_lowercase()), term.trim().to_string()),
                None => (None, entry.clone()),
            };
            if registry::is_null_marker(&term) {
                return None;
            }
            Some(Mention::new(term, EntityKind::Intervention).with_label(label))
        })
        .collect();

    let primary = text(&record.primary_outcome);
    if !primary.is_empty() {
        trial.primary_outcomes.push(Outcome {
            measure: primary,
            time_frame: String::new(),
        });
    }
    let secondary = text(&record.secondary_outcome);
    if !secondary.is_empty() {
        trial.secondary_outcomes.push(Outcome {
            measure: secondary,
            time_frame: String::new(),
        });
    }

    trial.secondary_ids = record
        .secondary_ids
        .items()
        .into_iter()
        .filter(|s| !registry::is_null_marker(s))
        .collect();

    for mapping in record.mappings.items() {
        match registry::cross_reference_id(&mapping) {
            Some(id) if id != trial.id => trial.cross_references.push(id),
            Some(_) => {}
            None => debug!(record_id = %trial.id, mapping = %mapping, "Ignoring unrecognised mapping"),
        }
    }

    Ok(trial)
}

/// WHO design text is a list of `key: value` attributes. Anything that does
/// not follow that shape is kept verbatim as the fallback.
fn parse_who_design(entries: &[String]) -> DesignInfo {
    if entries.is_empty() {
        return DesignInfo::default();
    }

    let mut design = DesignInfo::default();
    for entry in entries {
        let Some((key, value)) = entry.split_once(':') else {
            return DesignInfo {
                fallback: Some(entries.join("; ")),
                ..Default::default()
            };
        };
        let value = value.trim().to_lowercase();
        match key.trim().to_lowercase().as_str() {
            "allocation" => design.allocation = value,
            "intervention model" | "assignment" => design.assignment = value,
            "masking" => design.masking = value,
            "primary purpose" | "purpose" => design.purpose = value,
            _ => {}
        }
    }
    design
}

fn mesh_mentions(meshes: &[MeshTerm], kind: EntityKind) -> Vec<Mention> {
    meshes
        .iter()
        .filter_map(|mesh| {
            let id = text(&mesh.id);
            let term = text(&mesh.term);
            if id.is_empty() || term.is_empty() {
                return None;
            }
            Some(Mention::new(term, kind).with_preset(MESH_NAMESPACE, &id))
        })
        .collect()
}

fn parse_year(date: &str) -> Option<i32> {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    let re = YEAR.get_or_init(|| Regex::new(r"\d{4}").expect("valid year pattern"));
    re.find(date).and_then(|m| m.as_str().parse().ok())
}

fn text(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn lower(value: &Option<String>) -> String {
    text(value).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ct(value: serde_json::Value) -> RawRecord {
        RawRecord::from_value(value, Source::ClinicalTrials).unwrap()
    }

    fn who(value: serde_json::Value) -> RawRecord {
        RawRecord::from_value(value, Source::Who).unwrap()
    }

    #[test]
    fn test_map_clinical_trials_study() {
        let raw = ct(json!({
            "protocolSection": {
                "identificationModule": {
                    "nctId": "NCT001",
                    "briefTitle": " Metformin in T2D ",
                    "secondaryIdInfos": [{ "id": "ISRCTN123", "type": "REGISTRY" }]
                },
                "statusModule": {
                    "overallStatus": "COMPLETED",
                    "startDateStruct": { "date": "2019-03", "type": "ACTUAL" }
                },
                "conditionsModule": { "conditions": ["Type 2 Diabetes"] },
                "designModule": {
                    "studyType": "INTERVENTIONAL",
                    "phases": ["PHASE2", "PHASE3"],
                    "designInfo": {
                        "primaryPurpose": "TREATMENT",
                        "allocation": "RANDOMIZED",
                        "maskingInfo": { "masking": "DOUBLE" },
                        "interventionModel": "PARALLEL"
                    }
                },
                "armsInterventionsModule": {
                    "interventions": [{ "name": "Metformin", "type": "DRUG" }, { "type": "DRUG" }]
                },
                "outcomesModule": {
                    "primaryOutcomes": [{ "measure": "HbA1c", "timeFrame": "12 weeks" }]
                }
            },
            "derivedSection": {
                "conditionBrowseModule": {
                    "meshes": [{ "id": "D003924", "term": "Diabetes Mellitus, Type 2" }]
                }
            }
        }));

        let trial = map(&raw, Source::ClinicalTrials).unwrap();
        assert_eq!(trial.id, "clinicaltrials:NCT001");
        assert_eq!(trial.title, "Metformin in T2D");
        assert_eq!(trial.study_type, "interventional");
        assert_eq!(trial.phase, "phase2;phase3");
        assert_eq!(trial.status, "completed");
        assert_eq!(trial.start_year, Some(2019));
        assert_eq!(trial.design.masking, "double");
        assert_eq!(trial.design.assignment, "parallel");
        assert_eq!(trial.conditions.len(), 2);
        assert!(trial.conditions[0].preset.is_none());
        assert_eq!(
            trial.conditions[1].preset.as_ref().map(|p| p.id.as_str()),
            Some("D003924")
        );
        assert_eq!(trial.interventions.len(), 1);
        assert_eq!(trial.interventions[0].label.as_deref(), Some("drug"));
        assert_eq!(trial.secondary_ids, vec!["ISRCTN123"]);
        assert_eq!(trial.primary_outcomes[0].time_frame, "12 weeks");
    }

    #[test]
    fn test_missing_nct_id_is_mapping_error() {
        let raw = ct(json!({ "protocolSection": { "identificationModule": { "briefTitle": "x" } } }));
        let err = map(&raw, Source::ClinicalTrials).unwrap_err();
        assert_eq!(
            err,
            MappingError::MissingIdentifier {
                registry: Source::ClinicalTrials,
                field: "nctId"
            }
        );
    }

    #[test]
    fn test_map_who_record() {
        let raw = who(json!({
            "curie": "who:123",
            "name": "Diabetes study",
            "type": "Interventional",
            "design": ["Allocation: Randomized", "Masking: None (Open Label)"],
            "countries": ["Germany"],
            "conditions": ["Diabetes Mellitus Type 2", "NULL"],
            "interventions": "Drug: Metformin;Other: Diet",
            "primary_outcome": "HbA1c",
            "mappings": ["NCT001", "nil known"]
        }));

        let trial = map(&raw, Source::Who).unwrap();
        assert_eq!(trial.id, "who:123");
        assert_eq!(trial.study_type, "interventional");
        assert_eq!(trial.design.allocation, "randomized");
        assert_eq!(trial.design.masking, "none (open label)");
        assert_eq!(trial.conditions.len(), 1);
        assert_eq!(trial.interventions[0].text, "Metformin");
        assert_eq!(trial.interventions[0].label.as_deref(), Some("drug"));
        assert_eq!(trial.interventions[1].text, "Diet");
        assert_eq!(trial.cross_references, vec!["clinicaltrials:NCT001"]);
        assert_eq!(trial.countries, vec!["Germany"]);
    }

    #[test]
    fn test_who_bare_trial_id_is_qualified() {
        let raw = who(json!({ "trial_id": "ISRCTN12345678" }));
        let trial = map(&raw, Source::Who).unwrap();
        assert_eq!(trial.id, "isrctn:ISRCTN12345678");
        assert_eq!(trial.source, Source::Who);
        assert!(trial.title.is_empty());
        assert!(trial.design.is_empty());
    }

    #[test]
    fn test_who_unparseable_design_falls_back() {
        let raw = who(json!({ "curie": "who:9", "design": "Single arm study" }));
        let trial = map(&raw, Source::Who).unwrap();
        assert_eq!(trial.design.fallback.as_deref(), Some("Single arm study"));
    }

    #[test]
    fn test_missing_who_identifier() {
        let raw = who(json!({ "name": "untitled" }));
        assert!(matches!(
            map(&raw, Source::Who),
            Err(MappingError::MissingIdentifier { registry: Source::Who, .. })
        ));
    }

    #[test]
    fn test_who_prefix_without_native_id_is_missing() {
        let raw = who(json!({ "curie": "who:", "name": "untitled" }));
        assert!(matches!(
            map(&raw, Source::Who),
            Err(MappingError::MissingIdentifier { registry: Source::Who, field: "curie" })
        ));
    }

    #[test]
    fn test_source_mismatch() {
        let raw = who(json!({ "curie": "who:1" }));
        assert!(matches!(
            map(&raw, Source::ClinicalTrials),
            Err(MappingError::SourceMismatch { .. })
        ));
    }
}
