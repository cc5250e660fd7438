//! FHIR资源模型

use super::{ErrorSeverity, ProcessingStatus};
use crate::error::IntegrationError;
use crate::repository::Entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// 支持的FHIR资源类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FhirResourceType {
    Patient,
    Observation,
    Condition,
    Procedure,
    Medication,
    Encounter,
    DiagnosticReport,
    Organization,
    Practitioner,
    ServiceRequest,
}

impl FhirResourceType {
    pub const ALL: [FhirResourceType; 10] = [
        Self::Patient,
        Self::Observation,
        Self::Condition,
        Self::Procedure,
        Self::Medication,
        Self::Encounter,
        Self::DiagnosticReport,
        Self::Organization,
        Self::Practitioner,
        Self::ServiceRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "Patient",
            Self::Observation => "Observation",
            Self::Condition => "Condition",
            Self::Procedure => "Procedure",
            Self::Medication => "Medication",
            Self::Encounter => "Encounter",
            Self::DiagnosticReport => "DiagnosticReport",
            Self::Organization => "Organization",
            Self::Practitioner => "Practitioner",
            Self::ServiceRequest => "ServiceRequest",
        }
    }
}

impl std::fmt::Display for FhirResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FhirResourceType {
    type Err = IntegrationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == value)
            .ok_or_else(|| {
                IntegrationError::BadRequest(format!("Unsupported FHIR resource type: {}", value))
            })
    }
}

/// 资源校验状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
}

/// FHIR结构校验问题
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FhirValidationIssue {
    pub element: String,
    pub path: String,
    pub constraint: String,
    pub severity: ErrorSeverity,
    pub message: String,
}

/// 已接收的FHIR资源
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FhirResource {
    pub id: String,
    pub resource_type: FhirResourceType,
    pub fhir_version: String,
    pub api_endpoint: String,
    pub resource_id: String,
    pub version_id: Option<String>,
    pub source_system: String,
    pub processing_status: ProcessingStatus,
    pub validation_status: ValidationStatus,
    pub resource: Value,
    #[serde(default)]
    pub extensions: Vec<Value>,
    #[serde(default)]
    pub identifiers: Vec<Value>,
    pub raw_resource: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FhirValidationIssue>,
    pub received_at: DateTime<Utc>,
}

impl Entity for FhirResource {
    const KIND: &'static str = "FHIRResource";

    fn id(&self) -> &str {
        &self.id
    }
}

/// FHIR资源接收请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestFhirRequest {
    pub resource_type: FhirResourceType,
    #[serde(default)]
    pub fhir_version: Option<String>,
    pub api_endpoint: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub version_id: Option<String>,
    pub source_system: String,
    pub resource: Value,
    #[serde(default)]
    pub extensions: Option<Vec<Value>>,
    #[serde(default)]
    pub identifiers: Option<Vec<Value>>,
}

/// 资源查询过滤器
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceFilter {
    pub resource_type: Option<FhirResourceType>,
    pub status: Option<ProcessingStatus>,
    pub validation_status: Option<ValidationStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ResourceFilter {
    pub fn matches(&self, resource: &FhirResource) -> bool {
        self.resource_type.map_or(true, |t| resource.resource_type == t)
            && self.status.map_or(true, |s| resource.processing_status == s)
            && self
                .validation_status
                .map_or(true, |v| resource.validation_status == v)
            && self.from.map_or(true, |from| resource.received_at >= from)
            && self.to.map_or(true, |to| resource.received_at <= to)
    }
}
