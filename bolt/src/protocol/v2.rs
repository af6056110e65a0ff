use crate::protocol::{self, BoltProtocol};
use crate::protocol::v1::ProtocolV1;

/// Version 2: version 1 plus the spatial and temporal structures, both
/// readable and writable. Everything else delegates to v1.
pub struct ProtocolV2 {
    v1: ProtocolV1,
}

impl ProtocolV2 {
    pub fn new() -> ProtocolV2 {
        ProtocolV2 { v1: ProtocolV1 }
    }

    fn is_v2_struct(signature: u8) -> bool {
        match signature {
            protocol::STRUCT_POINT_2D
            | protocol::STRUCT_POINT_3D
            | protocol::STRUCT_LOCAL_DATE
            | protocol::STRUCT_LOCAL_TIME
            | protocol::STRUCT_LOCAL_DATE_TIME
            | protocol::STRUCT_OFFSET_TIME
            | protocol::STRUCT_OFFSET_DATE_TIME
            | protocol::STRUCT_ZONED_DATE_TIME
            | protocol::STRUCT_DURATION => true,
            _ => false,
        }
    }
}

impl BoltProtocol for ProtocolV2 {
    fn version(&self) -> u32 {
        2
    }

    fn message_name(&self, signature: u8) -> Option<&'static str> {
        self.v1.message_name(signature)
    }

    fn structure_name(&self, signature: u8) -> Option<&'static str> {
        match signature {
            protocol::STRUCT_POINT_2D => Some("Point2D"),
            protocol::STRUCT_POINT_3D => Some("Point3D"),
            protocol::STRUCT_LOCAL_DATE => Some("LocalDate"),
            protocol::STRUCT_LOCAL_TIME => Some("LocalTime"),
            protocol::STRUCT_LOCAL_DATE_TIME => Some("LocalDateTime"),
            protocol::STRUCT_OFFSET_TIME => Some("OffsetTime"),
            protocol::STRUCT_OFFSET_DATE_TIME => Some("OffsetDateTime"),
            protocol::STRUCT_ZONED_DATE_TIME => Some("ZonedDateTime"),
            protocol::STRUCT_DURATION => Some("Duration"),
            _ => self.v1.structure_name(signature),
        }
    }

    fn check_readable_struct(&self, signature: u8) -> bool {
        Self::is_v2_struct(signature) || self.v1.check_readable_struct(signature)
    }

    fn check_writable_struct(&self, signature: u8) -> bool {
        Self::is_v2_struct(signature) || self.v1.check_writable_struct(signature)
    }
}
