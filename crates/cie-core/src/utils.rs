//! 通用工具函数

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 生成实体唯一标识符
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// 生成HL7消息控制ID（MSH-10最长20字符）
pub fn generate_control_id() -> String {
    Uuid::new_v4().simple().to_string().chars().take(20).collect()
}

/// 格式化为HL7时间戳 YYYYMMDDHHMMSS
pub fn format_hl7_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%Y%m%d%H%M%S").to_string()
}

/// 计算两个时间点之间的毫秒数，负值按0处理
pub fn millis_between(start: &DateTime<Utc>, end: &DateTime<Utc>) -> u64 {
    (*end - *start).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_id_is_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_generate_control_id() {
        let id = generate_control_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_format_hl7_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 10, 30, 12, 5, 9).unwrap();
        assert_eq!(format_hl7_timestamp(&ts), "20241030120509");
    }

    #[test]
    fn test_millis_between() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::milliseconds(1500);
        assert_eq!(millis_between(&start, &end), 1500);
        assert_eq!(millis_between(&end, &start), 0);
    }
}
