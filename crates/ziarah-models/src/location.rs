use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Latest known position of one account inside a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Capture time in unix milliseconds.
    pub timestamp: i64,
}

/// Frame a client sends over the tracking socket.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LocationPayload {
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "longitude", alias = "lon")]
    pub long: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_accepts_short_and_long_names() {
        let short: LocationPayload = serde_json::from_str(r#"{"lat":21.42,"long":39.82}"#).unwrap();
        let long: LocationPayload =
            serde_json::from_str(r#"{"latitude":21.42,"longitude":39.82}"#).unwrap();
        assert_eq!(short.lat, long.lat);
        assert_eq!(short.long, long.long);
    }

    #[test]
    fn sample_omits_missing_directory_fields() {
        let sample = LocationSample {
            user_id: Uuid::nil(),
            full_name: None,
            role: None,
            latitude: 1.0,
            longitude: 2.0,
            timestamp: 3,
        };
        let value = serde_json::to_value(&sample).unwrap();
        assert!(value.get("full_name").is_none());
        assert!(value.get("role").is_none());
    }
}
