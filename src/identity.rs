use byteorder::{ByteOrder, LittleEndian};
use heapless::String;

/// Characters of the serial number string descriptor
pub const SERIAL_CHARS: usize = 12;
/// bLength + bDescriptorType + UTF-16LE characters
pub const SERIAL_DESC_LEN: usize = 2 + 2 * SERIAL_CHARS;
/// Placeholder shown when the chip has no readable unique id
pub const SERIAL_PLACEHOLDER: &str = "DFU-BOOT-001";
/// Offset of the first id byte. The id replaces the first two
/// UTF-16 code units of the string.
const ID_OFFSET: usize = 2;

const DESC_TYPE_STRING: u8 = 0x03;

/// The serial number as text, 3 UTF-8 bytes per character at most
pub type SerialText = String<{ 3 * SERIAL_CHARS }>;

/// USB string descriptor carrying the device serial number.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SerialDescriptor {
    buf: [u8; SERIAL_DESC_LEN],
}

impl SerialDescriptor {
    /// Descriptor holding `text` (ASCII, padded with spaces or cut to
    /// [`SERIAL_CHARS`]).
    pub fn new(text: &str) -> Self {
        let mut buf = [0; SERIAL_DESC_LEN];
        buf[0] = SERIAL_DESC_LEN as u8;
        buf[1] = DESC_TYPE_STRING;
        let mut chars = text.bytes();
        for unit in buf[2..].chunks_mut(2) {
            let c = chars.next().unwrap_or(b' ');
            LittleEndian::write_u16(unit, u16::from(c));
        }
        SerialDescriptor { buf }
    }

    /// Builds the serial descriptor for a device with hardware id
    /// `unique_id`. An id of zero means "unavailable" and leaves the
    /// placeholder untouched.
    pub fn for_device(unique_id: u32) -> Self {
        let mut desc = SerialDescriptor::new(SERIAL_PLACEHOLDER);
        desc.apply_unique_id(unique_id);
        desc
    }

    /// Writes `unique_id` little-endian over bytes 2..6. Returns
    /// whether the buffer changed.
    fn apply_unique_id(&mut self, unique_id: u32) -> bool {
        if unique_id == 0 {
            return false;
        }
        LittleEndian::write_u32(&mut self.buf[ID_OFFSET..ID_OFFSET + 4], unique_id);
        true
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// The descriptor's characters, for USB stacks that take the
    /// serial number as text. Unpaired surrogates produced by the raw
    /// id bytes come out as U+FFFD.
    pub fn to_text(&self) -> SerialText {
        let units = self.buf[2..].chunks(2).map(LittleEndian::read_u16);
        let mut text = String::new();
        for c in core::char::decode_utf16(units) {
            let c = c.unwrap_or(core::char::REPLACEMENT_CHARACTER);
            // 3 bytes per char always fits
            let _ = text.push(c);
        }
        text
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn placeholder_layout() {
        let desc = SerialDescriptor::new(SERIAL_PLACEHOLDER);
        let bytes = desc.as_bytes();
        assert_eq!(bytes.len(), SERIAL_DESC_LEN);
        assert_eq!(bytes[0], SERIAL_DESC_LEN as u8);
        assert_eq!(bytes[1], 0x03);
        assert_eq!(&bytes[2..6], &[b'D', 0, b'F', 0]);
        assert_eq!(desc.to_text().as_str(), SERIAL_PLACEHOLDER);
    }

    #[test]
    fn short_text_is_padded() {
        let desc = SerialDescriptor::new("AB");
        assert_eq!(desc.to_text().as_str(), "AB          ");
    }

    #[test]
    fn unique_id_lands_little_endian() {
        let placeholder = SerialDescriptor::new(SERIAL_PLACEHOLDER);
        let desc = SerialDescriptor::for_device(0x1234_5678);
        let (before, after) = (placeholder.as_bytes(), desc.as_bytes());
        assert_eq!(&after[2..6], &[0x78, 0x56, 0x34, 0x12]);
        for i in (0..SERIAL_DESC_LEN).filter(|i| !(2..6).contains(i)) {
            assert_eq!(before[i], after[i], "byte {}", i);
        }
    }

    #[test]
    fn zero_id_keeps_placeholder() {
        let placeholder = SerialDescriptor::new(SERIAL_PLACEHOLDER);
        assert_eq!(SerialDescriptor::for_device(0), placeholder);
        assert_eq!(SerialDescriptor::for_device(0), SerialDescriptor::for_device(0));
    }

    #[test]
    fn raw_id_still_renders_as_text() {
        // 0xD800 alone is an unpaired surrogate
        let desc = SerialDescriptor::for_device(0x0041_D800);
        let text = desc.to_text();
        let mut chars = text.chars();
        assert_eq!(chars.next(), Some(core::char::REPLACEMENT_CHARACTER));
        assert_eq!(chars.next(), Some('A'));
        assert_eq!(chars.as_str(), &SERIAL_PLACEHOLDER[2..]);
    }
}
