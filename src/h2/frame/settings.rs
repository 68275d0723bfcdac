use super::{FrameError, FrameSize, Head, Kind, StreamId, HEADER_LEN};

/// The default value of SETTINGS_HEADER_TABLE_SIZE.
pub const DEFAULT_SETTINGS_HEADER_TABLE_SIZE: usize = 4_096;

/// The default value of SETTINGS_INITIAL_WINDOW_SIZE.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// The default value of SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: FrameSize = 16_384;

/// SETTINGS_INITIAL_WINDOW_SIZE upper bound (RFC 7540 §6.9.1).
pub const MAX_INITIAL_WINDOW_SIZE: u32 = (1 << 31) - 1;

/// SETTINGS_MAX_FRAME_SIZE upper bound (RFC 7540 §6.5.2).
pub const MAX_MAX_FRAME_SIZE: FrameSize = (1 << 24) - 1;

const ACK_FLAG: u8 = 0x1;

const HEADER_TABLE_SIZE: u16 = 0x1;
const ENABLE_PUSH: u16 = 0x2;
const MAX_CONCURRENT_STREAMS: u16 = 0x3;
const INITIAL_WINDOW_SIZE: u16 = 0x4;
const MAX_FRAME_SIZE: u16 = 0x5;
const MAX_HEADER_LIST_SIZE: u16 = 0x6;

/// A parsed SETTINGS frame (RFC 7540 §6.5).
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Settings {
    ack: bool,
    header_table_size: Option<u32>,
    enable_push: Option<u32>,
    max_concurrent_streams: Option<u32>,
    initial_window_size: Option<u32>,
    max_frame_size: Option<u32>,
    max_header_list_size: Option<u32>,
}

impl Settings {
    pub fn ack() -> Settings {
        Settings {
            ack: true,
            ..Settings::default()
        }
    }

    pub fn is_ack(&self) -> bool {
        self.ack
    }

    pub fn header_table_size(&self) -> Option<u32> {
        self.header_table_size
    }

    pub fn set_header_table_size(&mut self, size: Option<u32>) {
        self.header_table_size = size;
    }

    pub fn is_push_enabled(&self) -> Option<bool> {
        self.enable_push.map(|v| v != 0)
    }

    pub fn set_enable_push(&mut self, enabled: bool) {
        self.enable_push = Some(enabled as u32);
    }

    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent_streams = max;
    }

    pub fn initial_window_size(&self) -> Option<u32> {
        self.initial_window_size
    }

    pub fn set_initial_window_size(&mut self, size: Option<u32>) {
        self.initial_window_size = size;
    }

    pub fn max_frame_size(&self) -> Option<u32> {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, size: Option<u32>) {
        if let Some(val) = size {
            assert!((DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&val));
        }
        self.max_frame_size = size;
    }

    pub fn max_header_list_size(&self) -> Option<u32> {
        self.max_header_list_size
    }

    pub fn set_max_header_list_size(&mut self, size: Option<u32>) {
        self.max_header_list_size = size;
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Settings, FrameError> {
        debug_assert_eq!(head.kind(), Kind::Settings);

        if !head.stream_id().is_zero() {
            return Err(FrameError::InvalidStreamId);
        }

        if head.flag() & ACK_FLAG == ACK_FLAG {
            if !payload.is_empty() {
                return Err(FrameError::InvalidPayloadLength);
            }
            return Ok(Settings::ack());
        }

        if payload.len() % 6 != 0 {
            return Err(FrameError::InvalidPayloadLength);
        }

        let mut settings = Settings::default();
        for chunk in payload.chunks(6) {
            let id = u16::from_be_bytes([chunk[0], chunk[1]]);
            let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
            match id {
                HEADER_TABLE_SIZE => settings.header_table_size = Some(value),
                ENABLE_PUSH => {
                    if value > 1 {
                        return Err(FrameError::InvalidSettingValue);
                    }
                    settings.enable_push = Some(value);
                }
                MAX_CONCURRENT_STREAMS => settings.max_concurrent_streams = Some(value),
                INITIAL_WINDOW_SIZE => {
                    if value > MAX_INITIAL_WINDOW_SIZE {
                        return Err(FrameError::InvalidSettingValue);
                    }
                    settings.initial_window_size = Some(value);
                }
                MAX_FRAME_SIZE => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                        return Err(FrameError::InvalidSettingValue);
                    }
                    settings.max_frame_size = Some(value);
                }
                MAX_HEADER_LIST_SIZE => settings.max_header_list_size = Some(value),
                // Unknown settings are ignored per RFC 7540 §6.5.2.
                _ => {}
            }
        }

        Ok(settings)
    }

    pub fn encode(&self, dst: &mut Vec<u8>) {
        let head = Head::new(
            Kind::Settings,
            if self.ack { ACK_FLAG } else { 0 },
            StreamId::ZERO,
        );

        if self.ack {
            let mut header = [0u8; HEADER_LEN];
            head.encode_len(0, &mut header);
            dst.extend_from_slice(&header);
            return;
        }

        let mut payload = Vec::new();
        self.push(&mut payload, HEADER_TABLE_SIZE, self.header_table_size);
        self.push(&mut payload, ENABLE_PUSH, self.enable_push);
        self.push(
            &mut payload,
            MAX_CONCURRENT_STREAMS,
            self.max_concurrent_streams,
        );
        self.push(&mut payload, INITIAL_WINDOW_SIZE, self.initial_window_size);
        self.push(&mut payload, MAX_FRAME_SIZE, self.max_frame_size);
        self.push(
            &mut payload,
            MAX_HEADER_LIST_SIZE,
            self.max_header_list_size,
        );

        let mut header = [0u8; HEADER_LEN];
        head.encode_len(payload.len(), &mut header);
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&payload);
    }

    fn push(&self, dst: &mut Vec<u8>, id: u16, value: Option<u32>) {
        if let Some(value) = value {
            dst.extend_from_slice(&id.to_be_bytes());
            dst.extend_from_slice(&value.to_be_bytes());
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut b = f.debug_struct("Settings");
        b.field("ack", &self.ack);
        if let Some(v) = self.header_table_size {
            b.field("header_table_size", &v);
        }
        if let Some(v) = self.enable_push {
            b.field("enable_push", &v);
        }
        if let Some(v) = self.max_concurrent_streams {
            b.field("max_concurrent_streams", &v);
        }
        if let Some(v) = self.initial_window_size {
            b.field("initial_window_size", &v);
        }
        if let Some(v) = self.max_frame_size {
            b.field("max_frame_size", &v);
        }
        if let Some(v) = self.max_header_list_size {
            b.field("max_header_list_size", &v);
        }
        b.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_format() {
        let mut settings = Settings::default();
        settings.set_initial_window_size(Some(1_000_000));
        settings.set_max_frame_size(Some(20_000));

        let mut buf = Vec::new();
        settings.encode(&mut buf);

        let head = Head::parse(&buf[..HEADER_LEN]);
        let decoded = Settings::load(head, &buf[HEADER_LEN..]).unwrap();
        assert_eq!(decoded.initial_window_size(), Some(1_000_000));
        assert_eq!(decoded.max_frame_size(), Some(20_000));
        assert!(!decoded.is_ack());
    }

    #[test]
    fn ack_frame_has_empty_payload() {
        let mut buf = Vec::new();
        Settings::ack().encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);
    }

    #[test]
    fn rejects_oversized_max_frame_size() {
        let head = Head::new(Kind::Settings, 0, StreamId::ZERO);
        let mut payload = Vec::new();
        payload.extend_from_slice(&MAX_FRAME_SIZE.to_be_bytes());
        payload.extend_from_slice(&(MAX_MAX_FRAME_SIZE + 1).to_be_bytes());
        assert_eq!(
            Settings::load(head, &payload),
            Err(FrameError::InvalidSettingValue)
        );
    }
}
