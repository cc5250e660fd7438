//! FHIR资源结构校验
//!
//! 只做浅层校验：声明类型与文档类型一致，外加少数资源的必填元素。
//! 不做完整的FHIR Profile一致性检查。

use cie_core::{ErrorSeverity, FhirResourceType, FhirValidationIssue};
use serde_json::Value;
use tracing::debug;

/// FHIR资源校验器
#[derive(Debug, Clone, Default)]
pub struct FhirValidator;

impl FhirValidator {
    pub fn new() -> Self {
        Self
    }

    /// 校验资源文档，返回全部问题
    ///
    /// 类型不一致时立即返回，不再检查必填元素。
    pub fn validate(
        &self,
        declared: FhirResourceType,
        resource: &Value,
    ) -> Result<(), Vec<FhirValidationIssue>> {
        let Some(document) = resource.as_object() else {
            return Err(vec![issue(
                "resource",
                declared.as_str().to_string(),
                "json-object",
                "Resource must be a JSON object".to_string(),
            )]);
        };

        let actual = document
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if actual.is_empty() {
            return Err(vec![issue(
                "resourceType",
                format!("{}.resourceType", declared),
                "required",
                "Resource is missing resourceType".to_string(),
            )]);
        }
        if actual != declared.as_str() {
            return Err(vec![issue(
                "resourceType",
                format!("{}.resourceType", declared),
                "type-match",
                format!(
                    "Resource type mismatch: declared {} but document is {}",
                    declared, actual
                ),
            )]);
        }

        let mut issues = Vec::new();
        match declared {
            FhirResourceType::Patient => {
                if !document.get("identifier").map_or(false, Value::is_array) {
                    issues.push(required(declared, "identifier", "Patient must have an identifier array"));
                }
            }
            FhirResourceType::Observation => {
                if !present(document.get("subject")) {
                    issues.push(required(declared, "subject", "Observation must have a subject"));
                }
            }
            FhirResourceType::Condition => {
                if !present(document.get("subject")) {
                    issues.push(required(declared, "subject", "Condition must have a subject"));
                }
                if !present(document.get("code")) {
                    issues.push(required(declared, "code", "Condition must have a code"));
                }
            }
            _ => {}
        }

        if issues.is_empty() {
            debug!("FHIR {} resource passed structural validation", declared);
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn present(value: Option<&Value>) -> bool {
    !matches!(value, None | Some(Value::Null))
}

fn required(resource_type: FhirResourceType, element: &str, message: &str) -> FhirValidationIssue {
    issue(
        element,
        format!("{}.{}", resource_type, element),
        "required",
        message.to_string(),
    )
}

fn issue(element: &str, path: String, constraint: &str, message: String) -> FhirValidationIssue {
    FhirValidationIssue {
        element: element.to_string(),
        path,
        constraint: constraint.to_string(),
        severity: ErrorSeverity::Error,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_mismatch_always_fails() {
        let validator = FhirValidator::new();
        for declared in FhirResourceType::ALL {
            for actual in FhirResourceType::ALL {
                if declared == actual {
                    continue;
                }
                let resource = json!({
                    "resourceType": actual.as_str(),
                    "identifier": [],
                    "subject": {"reference": "Patient/1"},
                    "code": {"text": "x"}
                });
                let issues = validator.validate(declared, &resource).unwrap_err();
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].constraint, "type-match");
                assert!(issues[0].message.contains("Resource type mismatch"));
            }
        }
    }

    #[test]
    fn test_patient_requires_identifier() {
        let validator = FhirValidator::new();
        let issues = validator
            .validate(FhirResourceType::Patient, &json!({"resourceType": "Patient"}))
            .unwrap_err();
        assert_eq!(issues[0].path, "Patient.identifier");
        assert_eq!(issues[0].severity, ErrorSeverity::Error);

        let not_array = json!({"resourceType": "Patient", "identifier": {"value": "1"}});
        assert!(validator.validate(FhirResourceType::Patient, &not_array).is_err());

        let ok = json!({"resourceType": "Patient", "identifier": [{"value": "MRN001"}]});
        assert!(validator.validate(FhirResourceType::Patient, &ok).is_ok());
    }

    #[test]
    fn test_condition_reports_every_missing_element() {
        let issues = FhirValidator::new()
            .validate(FhirResourceType::Condition, &json!({"resourceType": "Condition"}))
            .unwrap_err();
        let elements: Vec<&str> = issues.iter().map(|i| i.element.as_str()).collect();
        assert_eq!(elements, vec!["subject", "code"]);
    }

    #[test]
    fn test_observation_subject_and_shallow_types() {
        let validator = FhirValidator::new();
        assert!(validator
            .validate(
                FhirResourceType::Observation,
                &json!({"resourceType": "Observation", "subject": null})
            )
            .is_err());
        assert!(validator
            .validate(
                FhirResourceType::Encounter,
                &json!({"resourceType": "Encounter"})
            )
            .is_ok());
        assert!(validator
            .validate(FhirResourceType::Encounter, &json!({"resourceType": ""}))
            .is_err());
        assert!(validator
            .validate(FhirResourceType::Encounter, &json!(["Encounter"]))
            .is_err());
    }
}
