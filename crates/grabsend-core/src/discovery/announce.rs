//! 广播报文格式
//!
//! ```json
//! {"name": "GestureTransfer_host", "port": 12345}
//! ```
//!
//! IP 永远取自报文的源地址，报文中的 `ip` 字段 (旧版本会带) 被忽略。

use serde::{Deserialize, Serialize};

use crate::discovery::DiscoveryError;

/// 设备名称最大长度 (字符数)
pub const MAX_NAME_CHARS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub name: String,
    /// 传输端口，缺省时使用默认端口
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Announcement {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port: Some(port),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, DiscoveryError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// 严格解码：名称必须非空且不超过 64 个字符，端口不能为 0
    pub fn decode(data: &[u8]) -> Result<Self, DiscoveryError> {
        let mut announcement: Announcement = serde_json::from_slice(data)?;

        let name = announcement.name.trim();
        if name.is_empty() {
            return Err(DiscoveryError::Invalid("empty name".to_string()));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(DiscoveryError::Invalid(format!(
                "name longer than {} characters",
                MAX_NAME_CHARS
            )));
        }
        if announcement.port == Some(0) {
            return Err(DiscoveryError::Invalid("port 0".to_string()));
        }

        announcement.name = name.to_string();
        Ok(announcement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_legacy_payload() {
        // 旧版节点会带上自己声称的 ip，必须忽略
        let a = Announcement::decode(br#"{"name":"GestureTransfer_lab","ip":"10.0.0.9"}"#).unwrap();
        assert_eq!(a.name, "GestureTransfer_lab");
        assert_eq!(a.port, None);
    }

    #[test]
    fn test_encode_decode() {
        let a = Announcement::new("desk", 40000);
        let json = String::from_utf8(a.encode().unwrap()).unwrap();
        assert_eq!(json, r#"{"name":"desk","port":40000}"#);
        assert_eq!(Announcement::decode(json.as_bytes()).unwrap(), a);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Announcement::decode(b"\x00\xffnot json"),
            Err(DiscoveryError::Parse(_))
        ));
        assert!(matches!(
            Announcement::decode(br#"{"port":1}"#),
            Err(DiscoveryError::Parse(_))
        ));
        assert!(matches!(
            Announcement::decode(br#"{"name":42}"#),
            Err(DiscoveryError::Parse(_))
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_fields() {
        assert!(matches!(
            Announcement::decode(br#"{"name":"   "}"#),
            Err(DiscoveryError::Invalid(_))
        ));
        assert!(matches!(
            Announcement::decode(br#"{"name":"a","port":0}"#),
            Err(DiscoveryError::Invalid(_))
        ));
        let long = format!(r#"{{"name":"{}"}}"#, "x".repeat(65));
        assert!(matches!(
            Announcement::decode(long.as_bytes()),
            Err(DiscoveryError::Invalid(_))
        ));
    }

    #[test]
    fn test_decode_trims_name() {
        let a = Announcement::decode(br#"{"name":"  kitchen  "}"#).unwrap();
        assert_eq!(a.name, "kitchen");
    }
}
