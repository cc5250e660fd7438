//! 消息与资源接入服务
//!
//! 单条消息的处理顺序固定为：解析、校验、统计更新、事件记录。
//! 解析或校验失败的实体以 `error` 状态保存，不会中断调用方。

use chrono::Utc;
use cie_core::utils::{generate_control_id, generate_id};
use cie_core::{
    BatchResult, FhirResource, Hl7Message, Hl7MessageMetadata, IngestFhirRequest,
    IngestHl7Request, IntegrationError, IntegrationEventType, MessageFilter, ParsedData,
    ProcessingOutcome, ProcessingStatus, Repository, ResourceFilter, Result, ValidationStatus,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::events::EventLogger;
use crate::fhir::FhirValidator;
use crate::hl7::{build_ack, Hl7Parser, Hl7Validator, MshHeader};
use crate::registry::SystemRegistry;

const DEFAULT_FHIR_VERSION: &str = "4.0.1";

/// 集成接入服务
pub struct IntegrationService {
    registry: Arc<SystemRegistry>,
    events: Arc<EventLogger>,
    messages: Arc<dyn Repository<Hl7Message>>,
    resources: Arc<dyn Repository<FhirResource>>,
    parser: Hl7Parser,
    hl7_validator: Hl7Validator,
    fhir_validator: FhirValidator,
}

impl IntegrationService {
    pub fn new(
        registry: Arc<SystemRegistry>,
        events: Arc<EventLogger>,
        messages: Arc<dyn Repository<Hl7Message>>,
        resources: Arc<dyn Repository<FhirResource>>,
    ) -> Self {
        Self {
            registry,
            events,
            messages,
            resources,
            parser: Hl7Parser::new(),
            hl7_validator: Hl7Validator::new(),
            fhir_validator: FhirValidator::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SystemRegistry> {
        &self.registry
    }

    /// 接收一条HL7消息
    pub async fn ingest_hl7(&self, request: IngestHl7Request) -> Result<Hl7Message> {
        let segments = self.parser.parse(&request.raw_message);
        let header = MshHeader::from_segments(&segments);

        let (processing_status, parsed_data, errors) = match self.hl7_validator.validate(&segments) {
            Ok(parsed) => (ProcessingStatus::Completed, parsed, Vec::new()),
            Err(e) => {
                warn!("HL7 message from {} failed validation: {}", request.sender, e);
                (
                    ProcessingStatus::Error,
                    ParsedData::new(),
                    vec![e.to_processing_error()],
                )
            }
        };

        let now = Utc::now();
        let message_type = non_empty(Some(request.message_type))
            .or(header.message_type)
            .unwrap_or_default();
        let message = Hl7Message {
            id: generate_id(),
            message_type,
            trigger_event: non_empty(request.trigger_event)
                .or(header.trigger_event)
                .unwrap_or_default(),
            message_control_id: non_empty(request.message_control_id)
                .or(header.message_control_id)
                .unwrap_or_else(generate_control_id),
            timestamp: header.timestamp.unwrap_or(now),
            sender: request.sender,
            receiver: request.receiver,
            processing_status,
            segments,
            parsed_data,
            raw_message: request.raw_message,
            errors,
            metadata: Hl7MessageMetadata {
                processing_id: non_empty(request.processing_id).or(header.processing_id),
                version_id: non_empty(request.version_id).or(header.version_id),
                sequence_number: request.sequence_number,
                acceptance_acknowledgement: request.acceptance_acknowledgement,
                application_acknowledgement: request.application_acknowledgement,
                received_at: Some(now),
            },
        };

        let message = self.messages.create(message).await?;
        let failure = message.errors.first().map(|e| e.error_message.clone());
        self.record_outcome(&message.sender, message.processing_status, failure)
            .await;

        self.events
            .log(
                IntegrationEventType::MessageReceived,
                &message.sender,
                Some(&message.id),
            )
            .await;
        if message.processing_status == ProcessingStatus::Error {
            self.events
                .log(
                    IntegrationEventType::ValidationFailed,
                    &message.sender,
                    Some(&message.id),
                )
                .await;
        }

        info!(
            "Stored HL7 {}^{} message {} from {} ({:?})",
            message.message_type,
            message.trigger_event,
            message.id,
            message.sender,
            message.processing_status
        );
        Ok(message)
    }

    /// 批量接收HL7消息，单条失败不影响其余消息
    pub async fn ingest_hl7_batch(
        &self,
        requests: Vec<IngestHl7Request>,
    ) -> BatchResult<Hl7Message> {
        let mut batch = BatchResult::default();
        for request in requests {
            batch.processed += 1;
            match self.ingest_hl7(request).await {
                Ok(message) => {
                    if message.processing_status == ProcessingStatus::Completed {
                        batch.successful += 1;
                    } else {
                        batch.failed += 1;
                    }
                    batch.results.push(message);
                }
                Err(e) => {
                    warn!("HL7 batch item {} could not be stored: {}", batch.processed, e);
                    batch.failed += 1;
                }
            }
        }
        info!(
            "HL7 batch processed: {} total, {} successful, {} failed",
            batch.processed, batch.successful, batch.failed
        );
        batch
    }

    /// 接收一个FHIR资源
    pub async fn ingest_fhir(&self, request: IngestFhirRequest) -> Result<FhirResource> {
        let raw_resource = serde_json::to_string(&request.resource)?;

        let (processing_status, validation_status, errors) =
            match self.fhir_validator.validate(request.resource_type, &request.resource) {
                Ok(()) => (ProcessingStatus::Completed, ValidationStatus::Valid, Vec::new()),
                Err(issues) => {
                    warn!(
                        "FHIR {} resource from {} failed validation: {}",
                        request.resource_type,
                        request.source_system,
                        issues[0].message
                    );
                    (ProcessingStatus::Error, ValidationStatus::Invalid, issues)
                }
            };

        let resource_id = non_empty(request.resource_id)
            .or_else(|| {
                request
                    .resource
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(generate_id);
        let identifiers = request
            .identifiers
            .unwrap_or_else(|| array_at(&request.resource, "identifier"));
        let extensions = request
            .extensions
            .unwrap_or_else(|| array_at(&request.resource, "extension"));

        let resource = FhirResource {
            id: generate_id(),
            resource_type: request.resource_type,
            fhir_version: non_empty(request.fhir_version)
                .unwrap_or_else(|| DEFAULT_FHIR_VERSION.to_string()),
            api_endpoint: request.api_endpoint,
            resource_id,
            version_id: request.version_id,
            source_system: request.source_system,
            processing_status,
            validation_status,
            resource: request.resource,
            extensions,
            identifiers,
            raw_resource,
            errors,
            received_at: Utc::now(),
        };

        let resource = self.resources.create(resource).await?;
        let failure = resource.errors.first().map(|e| e.message.clone());
        self.record_outcome(&resource.source_system, resource.processing_status, failure)
            .await;

        self.events
            .log(
                IntegrationEventType::ResourceReceived,
                &resource.source_system,
                Some(&resource.id),
            )
            .await;
        if resource.validation_status == ValidationStatus::Invalid {
            self.events
                .log(
                    IntegrationEventType::ValidationFailed,
                    &resource.source_system,
                    Some(&resource.id),
                )
                .await;
        }

        info!(
            "Stored FHIR {} resource {} from {} ({:?})",
            resource.resource_type, resource.id, resource.source_system, resource.validation_status
        );
        Ok(resource)
    }

    /// 批量接收FHIR资源
    pub async fn ingest_fhir_batch(
        &self,
        requests: Vec<IngestFhirRequest>,
    ) -> BatchResult<FhirResource> {
        let mut batch = BatchResult::default();
        for request in requests {
            batch.processed += 1;
            match self.ingest_fhir(request).await {
                Ok(resource) => {
                    if resource.validation_status == ValidationStatus::Valid {
                        batch.successful += 1;
                    } else {
                        batch.failed += 1;
                    }
                    batch.results.push(resource);
                }
                Err(e) => {
                    warn!("FHIR batch item {} could not be stored: {}", batch.processed, e);
                    batch.failed += 1;
                }
            }
        }
        info!(
            "FHIR batch processed: {} total, {} successful, {} failed",
            batch.processed, batch.successful, batch.failed
        );
        batch
    }

    pub async fn get_message(&self, id: &str) -> Result<Hl7Message> {
        self.messages.require(id).await
    }

    pub async fn list_messages(&self, filter: MessageFilter) -> Result<Vec<Hl7Message>> {
        let mut messages = self
            .messages
            .list(&move |message: &Hl7Message| filter.matches(message))
            .await?;
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(messages)
    }

    pub async fn get_resource(&self, id: &str) -> Result<FhirResource> {
        self.resources.require(id).await
    }

    pub async fn list_resources(&self, filter: ResourceFilter) -> Result<Vec<FhirResource>> {
        let mut resources = self
            .resources
            .list(&move |resource: &FhirResource| filter.matches(resource))
            .await?;
        resources.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        Ok(resources)
    }

    /// 为已存储的消息生成ACK
    pub async fn acknowledge(&self, id: &str) -> Result<String> {
        let message = self.get_message(id).await?;
        Ok(build_ack(&message))
    }

    /// 更新发送方统计；发送方未注册时跳过
    async fn record_outcome(&self, system_id: &str, status: ProcessingStatus, error: Option<String>) {
        let outcome = match status {
            ProcessingStatus::Completed => ProcessingOutcome::Completed,
            _ => ProcessingOutcome::Error,
        };
        match self.registry.record_outcome(system_id, outcome, error).await {
            Ok(_) => debug!("Updated statistics for system {}", system_id),
            Err(IntegrationError::NotFound { .. }) => {
                warn!("System {} is not registered, statistics not updated", system_id)
            }
            Err(e) => warn!("Failed to update statistics for system {}: {}", system_id, e),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn array_at(resource: &Value, key: &str) -> Vec<Value> {
    resource
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
