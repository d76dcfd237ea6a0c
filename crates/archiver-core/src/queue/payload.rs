use serde::{Deserialize, Serialize};

pub const QUEUE_EXIFTOOL: &str = "exiftool";
pub const QUEUE_THUMBNAIL: &str = "thumbnail";
pub const QUEUE_VIDEO_PROXY: &str = "video-proxy";
pub const QUEUE_BAGIT: &str = "bagit";
pub const QUEUE_GPS_ENRICHMENT: &str = "gps-enrichment";
pub const QUEUE_LOCATION_STATS: &str = "location-stats";

pub const ALL_QUEUES: [&str; 6] = [
    QUEUE_EXIFTOOL,
    QUEUE_THUMBNAIL,
    QUEUE_GPS_ENRICHMENT,
    QUEUE_LOCATION_STATS,
    QUEUE_BAGIT,
    QUEUE_VIDEO_PROXY,
];

/// Work scheduled after an import commits. Serialized into the job row with
/// a `type` tag so each queue's handler can decode its own variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobPayload {
    /// Read embedded metadata from an archived file.
    Exiftool {
        fingerprint: String,
        archive_path: String,
        kind: String,
    },
    Thumbnail {
        fingerprint: String,
        archive_path: String,
        kind: String,
    },
    /// Low-resolution playback copy of a video.
    VideoProxy {
        fingerprint: String,
        archive_path: String,
    },
    /// Integrity manifest over everything a session added to a location.
    Bagit {
        session_id: String,
        location_id: String,
        asset_count: u64,
    },
    /// Fill in location coordinates from the GPS tags extracted for a session.
    GpsEnrichment {
        session_id: String,
        location_id: String,
    },
    /// Recount a location's per-kind totals and date range.
    LocationStats {
        session_id: String,
        location_id: String,
    },
}

impl JobPayload {
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobPayload::Exiftool { .. } => QUEUE_EXIFTOOL,
            JobPayload::Thumbnail { .. } => QUEUE_THUMBNAIL,
            JobPayload::VideoProxy { .. } => QUEUE_VIDEO_PROXY,
            JobPayload::Bagit { .. } => QUEUE_BAGIT,
            JobPayload::GpsEnrichment { .. } => QUEUE_GPS_ENRICHMENT,
            JobPayload::LocationStats { .. } => QUEUE_LOCATION_STATS,
        }
    }

    /// Lower runs first: metadata before previews, transcoding last.
    pub fn default_priority(&self) -> i64 {
        match self {
            JobPayload::Exiftool { .. } => 0,
            JobPayload::Thumbnail { .. } => 10,
            JobPayload::GpsEnrichment { .. } => 20,
            JobPayload::LocationStats { .. } => 30,
            JobPayload::Bagit { .. } => 50,
            JobPayload::VideoProxy { .. } => 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_tagged() {
        let payload = JobPayload::VideoProxy {
            fingerprint: "0011223344556677".into(),
            archive_path: "/a/00/0011223344556677.mov".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "video-proxy");
        assert_eq!(serde_json::from_value::<JobPayload>(json).unwrap(), payload);
        assert_eq!(payload.queue_name(), QUEUE_VIDEO_PROXY);
    }

    #[test]
    fn test_location_jobs_use_their_own_queues() {
        let gps = JobPayload::GpsEnrichment {
            session_id: "s1".into(),
            location_id: "loc".into(),
        };
        assert_eq!(serde_json::to_value(&gps).unwrap()["type"], "gps-enrichment");
        assert_eq!(gps.queue_name(), QUEUE_GPS_ENRICHMENT);
        let stats = JobPayload::LocationStats {
            session_id: "s1".into(),
            location_id: "loc".into(),
        };
        assert_eq!(stats.queue_name(), QUEUE_LOCATION_STATS);
        assert!(gps.default_priority() < stats.default_priority());
        assert!(ALL_QUEUES.contains(&stats.queue_name()));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let bad = serde_json::json!({ "type": "transcode-4k", "fingerprint": "x" });
        assert!(serde_json::from_value::<JobPayload>(bad).is_err());
    }
}
