//! Turns raw characteristic payloads into text for the data log.
//!
//! Which decoder applies is decided by a fragment of the characteristic identifier: its uuid,
//! prefixed with its name when the device reports one. The defaults know the standard GATT
//! temperature (0x2A6E) and humidity (0x2A6F) characteristics, plus names containing "temp" or
//! "hum". Add a [`PayloadDecoder`] per device family.

pub trait PayloadDecoder: Send + Sync {
    /// Whether this decoder handles the characteristic.
    fn matches(&self, characteristic: &str) -> bool;

    /// `None` when the payload does not have the expected shape.
    fn decode(&self, payload: &[u8]) -> Option<String>;
}

fn contains_any_ignore_case(haystack: &str, fragments: &[&str]) -> bool {
    let haystack = haystack.to_lowercase();
    fragments.iter().any(|fragment| haystack.contains(&fragment.to_lowercase()))
}

/// Little-endian 16 bit integer, multiplied by `scale` and shown with `precision` decimals.
pub struct FixedPointDecoder {
    pub fragments: &'static [&'static str],
    pub label: &'static str,
    pub unit: &'static str,
    pub signed: bool,
    pub scale: f32,
    pub precision: usize,
}

impl PayloadDecoder for FixedPointDecoder {
    fn matches(&self, characteristic: &str) -> bool {
        contains_any_ignore_case(characteristic, self.fragments)
    }

    fn decode(&self, payload: &[u8]) -> Option<String> {
        let bytes: [u8; 2] = payload.try_into().ok()?;
        let raw = if self.signed {
            f32::from(i16::from_le_bytes(bytes))
        } else {
            f32::from(u16::from_le_bytes(bytes))
        };
        Some(format!("{}: {:.*}{}", self.label, self.precision, raw * self.scale, self.unit))
    }
}

/// First byte is a percentage.
pub struct PercentByteDecoder {
    pub fragments: &'static [&'static str],
    pub label: &'static str,
}

impl PayloadDecoder for PercentByteDecoder {
    fn matches(&self, characteristic: &str) -> bool {
        contains_any_ignore_case(characteristic, self.fragments)
    }

    fn decode(&self, payload: &[u8]) -> Option<String> {
        payload.first().map(|percent| format!("{}: {}%", self.label, percent))
    }
}

pub fn hex_string(payload: &[u8]) -> String {
    payload.iter().map(|byte| format!("{:02x}", byte)).collect()
}

pub struct PayloadParser {
    decoders: Vec<Box<dyn PayloadDecoder>>,
}

impl PayloadParser {
    pub fn empty() -> Self {
        PayloadParser { decoders: Vec::new() }
    }

    pub fn with_decoder(mut self, decoder: impl PayloadDecoder + 'static) -> Self {
        self.decoders.push(Box::new(decoder));
        self
    }

    /// Never fails: anything no decoder understands is rendered as hex.
    pub fn parse(&self, characteristic: &str, payload: &[u8]) -> String {
        self.decoders.iter()
            .filter(|decoder| decoder.matches(characteristic))
            .find_map(|decoder| decoder.decode(payload))
            .unwrap_or_else(|| {
                if payload.is_empty() {
                    "Raw: (empty)".to_string()
                } else {
                    format!("Raw: {}", hex_string(payload))
                }
            })
    }
}

impl Default for PayloadParser {
    fn default() -> Self {
        // standard characteristics first, a named one may also contain "temp" or "hum"
        PayloadParser::empty()
            .with_decoder(FixedPointDecoder {
                fragments: &["00002a6e-0000-1000-8000-00805f9b34fb"],
                label: "Temperature",
                unit: "°C",
                signed: true,
                scale: 0.01,
                precision: 2,
            })
            .with_decoder(FixedPointDecoder {
                fragments: &["00002a6f-0000-1000-8000-00805f9b34fb"],
                label: "Humidity",
                unit: "%",
                signed: false,
                scale: 0.01,
                precision: 2,
            })
            .with_decoder(FixedPointDecoder {
                fragments: &["temp"],
                label: "Temperature",
                unit: "°C",
                signed: true,
                scale: 0.1,
                precision: 1,
            })
            .with_decoder(PercentByteDecoder {
                fragments: &["hum"],
                label: "Humidity",
            })
    }
}
