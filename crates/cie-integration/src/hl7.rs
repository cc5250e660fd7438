//! HL7 v2.x 段解析与结构校验
//!
//! 解析阶段从不失败：无法识别的结构退化为普通字符串字段，
//! 所有硬性错误都由 [`Hl7Validator`] 给出。

use chrono::{DateTime, TimeZone, Utc};
use cie_core::utils::{format_hl7_timestamp, generate_control_id};
use cie_core::{
    ErrorSeverity, FieldType, Hl7Field, Hl7Message, Hl7ProcessingError, Hl7Segment,
    IntegrationError, ParsedData, ProcessingStatus,
};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// 校验失败统一使用的错误码
pub const PARSE_ERROR: &str = "PARSE_ERROR";

/// MSH段内的字段位置（按 `|` 切分，段类型位于0）
const MSH_TIMESTAMP: usize = 6;
const MSH_MESSAGE_TYPE: usize = 8;
const MSH_CONTROL_ID: usize = 9;
const MSH_PROCESSING_ID: usize = 10;
const MSH_VERSION_ID: usize = 11;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Hl7Error {
    #[error("Message contains no MSH segment")]
    MissingMsh,
    #[error("Message contains {0} MSH segments, expected exactly one")]
    MultipleMsh(usize),
    #[error("Missing required field: Message Type (MSH-9)")]
    MissingMessageType,
}

impl Hl7Error {
    pub fn code(&self) -> &'static str {
        PARSE_ERROR
    }

    pub fn to_processing_error(&self) -> Hl7ProcessingError {
        Hl7ProcessingError {
            error_code: self.code().to_string(),
            error_message: self.to_string(),
            severity: ErrorSeverity::Error,
        }
    }
}

impl From<Hl7Error> for IntegrationError {
    fn from(err: Hl7Error) -> Self {
        IntegrationError::Validation(err.to_string())
    }
}

/// HL7段解析器
#[derive(Debug, Clone)]
pub struct Hl7Parser {
    field_separator: char,
}

impl Default for Hl7Parser {
    fn default() -> Self {
        Self {
            field_separator: '|',
        }
    }
}

impl Hl7Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 检测段终止符：只要出现 `\r` 就按 `\r` 拆分，否则按 `\n`
    pub fn detect_terminator(raw: &str) -> char {
        if raw.contains('\r') {
            '\r'
        } else {
            '\n'
        }
    }

    /// 将原始消息拆分为有序的段列表
    ///
    /// 按 `\r` 拆分时，每段开头的一个 `\n` 属于 `\r\n` 终止符，不计入段文本。
    /// 中间的空段保留。
    pub fn parse(&self, raw: &str) -> Vec<Hl7Segment> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        let terminator = Self::detect_terminator(trimmed);

        let segments: Vec<Hl7Segment> = trimmed
            .split(terminator)
            .map(|line| line.strip_prefix('\n').unwrap_or(line))
            .map(|line| self.parse_segment(line))
            .collect();

        debug!(
            "Parsed HL7 message into {} segments ({:?} terminated)",
            segments.len(),
            terminator
        );
        segments
    }

    fn parse_segment(&self, line: &str) -> Hl7Segment {
        let parts: Vec<&str> = line.split(self.field_separator).collect();
        let segment_type = parts.first().copied().unwrap_or_default().to_string();

        let fields = parts
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let (field_type, description) = describe_field(&segment_type, index);
                Hl7Field {
                    index,
                    value: value.to_string(),
                    field_type,
                    description,
                }
            })
            .collect();

        Hl7Segment {
            segment_type,
            fields,
            raw_segment: line.to_string(),
        }
    }
}

/// 字段语义表：(段类型, 字段位置) -> (类型, 描述)
///
/// MSH的位置比标准编号小1，因为MSH-1就是字段分隔符本身。
pub fn describe_field(segment_type: &str, index: usize) -> (FieldType, String) {
    use FieldType::{Datetime, String as Text};

    let known = match (segment_type, index) {
        (_, 0) => Some((Text, "Segment Type")),

        ("MSH", 1) => Some((Text, "Encoding Characters")),
        ("MSH", 2) => Some((Text, "Sending Application")),
        ("MSH", 3) => Some((Text, "Sending Facility")),
        ("MSH", 4) => Some((Text, "Receiving Application")),
        ("MSH", 5) => Some((Text, "Receiving Facility")),
        ("MSH", 6) => Some((Datetime, "Date/Time of Message")),
        ("MSH", 7) => Some((Text, "Security")),
        ("MSH", 8) => Some((Text, "Message Type")),
        ("MSH", 9) => Some((Text, "Message Control ID")),
        ("MSH", 10) => Some((Text, "Processing ID")),
        ("MSH", 11) => Some((Text, "Version ID")),
        ("MSH", 12) => Some((Text, "Sequence Number")),

        ("EVN", 1) => Some((Text, "Event Type Code")),
        ("EVN", 2) => Some((Datetime, "Recorded Date/Time")),
        ("EVN", 6) => Some((Datetime, "Event Occurred")),

        ("PID", 1) => Some((Text, "Set ID")),
        ("PID", 2) => Some((Text, "Patient ID")),
        ("PID", 3) => Some((Text, "Patient Identifier List")),
        ("PID", 5) => Some((Text, "Patient Name")),
        ("PID", 7) => Some((Datetime, "Date/Time of Birth")),
        ("PID", 8) => Some((Text, "Administrative Sex")),
        ("PID", 11) => Some((Text, "Patient Address")),
        ("PID", 13) => Some((Text, "Phone Number - Home")),
        ("PID", 18) => Some((Text, "Patient Account Number")),

        ("PV1", 2) => Some((Text, "Patient Class")),
        ("PV1", 3) => Some((Text, "Assigned Patient Location")),
        ("PV1", 7) => Some((Text, "Attending Doctor")),
        ("PV1", 19) => Some((Text, "Visit Number")),
        ("PV1", 44) => Some((Datetime, "Admit Date/Time")),
        ("PV1", 45) => Some((Datetime, "Discharge Date/Time")),

        ("ORC", 1) => Some((Text, "Order Control")),
        ("ORC", 2) => Some((Text, "Placer Order Number")),
        ("ORC", 3) => Some((Text, "Filler Order Number")),
        ("ORC", 5) => Some((Text, "Order Status")),
        ("ORC", 9) => Some((Datetime, "Date/Time of Transaction")),
        ("ORC", 12) => Some((Text, "Ordering Provider")),

        ("OBR", 2) => Some((Text, "Placer Order Number")),
        ("OBR", 3) => Some((Text, "Filler Order Number")),
        ("OBR", 4) => Some((Text, "Universal Service Identifier")),
        ("OBR", 7) => Some((Datetime, "Observation Date/Time")),
        ("OBR", 16) => Some((Text, "Ordering Provider")),
        ("OBR", 22) => Some((Datetime, "Results Rpt/Status Chng - Date/Time")),
        ("OBR", 25) => Some((Text, "Result Status")),

        ("OBX", 1) => Some((Text, "Set ID")),
        ("OBX", 2) => Some((Text, "Value Type")),
        ("OBX", 3) => Some((Text, "Observation Identifier")),
        ("OBX", 5) => Some((Text, "Observation Value")),
        ("OBX", 6) => Some((Text, "Units")),
        ("OBX", 8) => Some((Text, "Abnormal Flags")),
        ("OBX", 11) => Some((Text, "Observation Result Status")),
        ("OBX", 14) => Some((Datetime, "Date/Time of the Observation")),

        _ => None,
    };

    match known {
        Some((field_type, description)) => (field_type, description.to_string()),
        None => (Text, format!("Field {}", index)),
    }
}

/// HL7结构校验器
#[derive(Debug, Clone, Default)]
pub struct Hl7Validator;

impl Hl7Validator {
    pub fn new() -> Self {
        Self
    }

    /// 校验段列表并生成 `parsedData`
    ///
    /// 要求恰好一个MSH段且MSH-9非空；同类型的段重复出现时后出现的覆盖先出现的。
    pub fn validate(&self, segments: &[Hl7Segment]) -> Result<ParsedData, Hl7Error> {
        let msh = single_msh(segments)?;

        let message_type = msh.field(MSH_MESSAGE_TYPE).unwrap_or_default();
        if message_type.trim().is_empty() {
            return Err(Hl7Error::MissingMessageType);
        }

        let mut parsed = ParsedData::new();
        for segment in segments.iter().filter(|s| !s.segment_type.is_empty()) {
            let values = segment
                .fields
                .iter()
                .map(|field| (field.index, field.value.clone()))
                .collect();
            parsed.insert(segment.segment_type.clone(), values);
        }
        Ok(parsed)
    }
}

fn single_msh(segments: &[Hl7Segment]) -> Result<&Hl7Segment, Hl7Error> {
    let mut headers = segments.iter().filter(|s| s.segment_type == "MSH");
    match (headers.next(), headers.count()) {
        (None, _) => Err(Hl7Error::MissingMsh),
        (Some(msh), 0) => Ok(msh),
        (Some(_), extra) => Err(Hl7Error::MultipleMsh(extra + 1)),
    }
}

/// 从MSH段提取的消息头
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MshHeader {
    pub sending_application: Option<String>,
    pub receiving_application: Option<String>,
    pub message_type: Option<String>,
    pub trigger_event: Option<String>,
    pub message_control_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub processing_id: Option<String>,
    pub version_id: Option<String>,
}

impl MshHeader {
    /// 读取第一个MSH段；没有MSH时返回空头
    pub fn from_segments(segments: &[Hl7Segment]) -> Self {
        let Some(msh) = segments.iter().find(|s| s.segment_type == "MSH") else {
            return Self::default();
        };

        let non_empty = |index: usize| {
            msh.field(index)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let (message_type, trigger_event) = match msh.field(MSH_MESSAGE_TYPE) {
            Some(value) => {
                let mut components = value.split('^');
                let message_type = components.next().filter(|c| !c.is_empty()).map(str::to_string);
                let trigger_event = components.next().filter(|c| !c.is_empty()).map(str::to_string);
                (message_type, trigger_event)
            }
            None => (None, None),
        };

        Self {
            sending_application: non_empty(2),
            receiving_application: non_empty(4),
            message_type,
            trigger_event,
            message_control_id: non_empty(MSH_CONTROL_ID),
            timestamp: msh.field(MSH_TIMESTAMP).and_then(parse_hl7_timestamp),
            processing_id: non_empty(MSH_PROCESSING_ID),
            version_id: non_empty(MSH_VERSION_ID),
        }
    }
}

fn timestamp_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})(?:(\d{2})(\d{2})(\d{2})?)?").ok())
        .as_ref()
}

/// 解析HL7时间 `YYYYMMDD[HHMM[SS]]`，忽略小数秒和时区后缀
pub fn parse_hl7_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let captures = timestamp_pattern()?.captures(value.trim())?;
    let number = |i: usize| -> Option<u32> {
        match captures.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };

    let year: i32 = captures.get(1)?.as_str().parse().ok()?;
    Utc.with_ymd_and_hms(year, number(2)?, number(3)?, number(4)?, number(5)?, number(6)?)
        .single()
}

fn escape_text(text: &str) -> String {
    text.replace('\\', "\\E\\")
        .replace('|', "\\F\\")
        .replace('^', "\\S\\")
        .replace('\r', " ")
        .replace('\n', " ")
}

/// 为已处理的消息生成ACK：完成为 `AA`，失败为 `AE`
pub fn build_ack(message: &Hl7Message) -> String {
    let (code, text) = match message.processing_status {
        ProcessingStatus::Completed => ("AA", String::new()),
        _ => (
            "AE",
            message
                .errors
                .first()
                .map(|e| escape_text(&e.error_message))
                .unwrap_or_default(),
        ),
    };

    let trigger = if message.trigger_event.is_empty() {
        String::new()
    } else {
        format!("^{}", message.trigger_event)
    };

    format!(
        "MSH|^~\\&|{sender}||{receiver}||{timestamp}||ACK{trigger}|{control_id}|{processing}|{version}\rMSA|{code}|{original}|{text}",
        sender = escape_text(&message.receiver),
        receiver = escape_text(&message.sender),
        timestamp = format_hl7_timestamp(&Utc::now()),
        trigger = trigger,
        control_id = generate_control_id(),
        processing = message.metadata.processing_id.as_deref().unwrap_or("P"),
        version = message.metadata.version_id.as_deref().unwrap_or("2.5"),
        code = code,
        original = escape_text(&message.message_control_id),
        text = text,
    )
}
