use std::collections::HashMap;

use alloy_primitives::{keccak256, U256};
use serde::Deserialize;
use serde_json::{Map, Value};

/// One `inputs[]` element of an event ABI entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AbiInput {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub components: Vec<AbiInput>,
}

#[derive(Debug, Clone, Deserialize)]
struct AbiEntry {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    inputs: Vec<AbiInput>,
    #[serde(default)]
    anonymous: bool,
}

#[derive(Debug, Clone)]
pub struct AbiEvent {
    pub name: String,
    pub inputs: Vec<AbiInput>,
}

impl AbiEvent {
    fn indexed_count(&self) -> usize {
        self.inputs.iter().filter(|input| input.indexed).count()
    }
}

#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub name: String,
    /// Keyed by input name, in ABI declaration order.
    pub params: Map<String, Value>,
}

/// Decodes raw logs against one contract ABI. Events are selected by the
/// keccak256 of their canonical signature; anonymous events carry no
/// signature topic and are skipped.
pub struct EventDecoder {
    events: HashMap<String, Vec<AbiEvent>>,
}

impl EventDecoder {
    pub fn from_json(abi_json: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<AbiEntry> = serde_json::from_str(abi_json)?;
        let mut events: HashMap<String, Vec<AbiEvent>> = HashMap::new();
        for entry in entries {
            if entry.kind != "event" || entry.anonymous {
                continue;
            }
            let event = AbiEvent {
                name: entry.name,
                inputs: entry.inputs,
            };
            events.entry(topic0_of(&event)).or_default().push(event);
        }
        Ok(Self { events })
    }

    /// `None` on any failure: unknown signature, malformed topics. Signatures
    /// shared by several events (ERC-20 vs ERC-721 `Transfer`) are
    /// disambiguated by the number of indexed inputs.
    pub fn decode(&self, topics: &[String], data: &str) -> Option<DecodedEvent> {
        let topic0 = topics.first()?;
        let candidates = self.events.get(&topic0.to_lowercase())?;
        let event = candidates
            .iter()
            .find(|event| event.indexed_count() == topics.len() - 1)
            .or_else(|| candidates.first())?;
        decode_event(event, topics, data)
    }
}

fn decode_event(event: &AbiEvent, topics: &[String], data: &str) -> Option<DecodedEvent> {
    let mut topic_iter = topics.iter().skip(1);

    // data is decoded slot-wise; when it is shorter than the declared
    // non-indexed inputs (dynamic types, pruned payloads) the data params
    // degrade to an empty map and the indexed params are still reported
    let data_digits = data.strip_prefix("0x").unwrap_or(data);
    let slot_count = event.inputs.iter().filter(|input| !input.indexed).count();
    let mut data_words = if data_digits.len() >= slot_count * 64 {
        (0..slot_count)
            .map(|i| &data_digits[i * 64..(i + 1) * 64])
            .collect::<Vec<_>>()
            .into_iter()
    } else {
        Vec::new().into_iter()
    };

    let mut params = Map::new();
    for input in &event.inputs {
        if input.indexed {
            let topic = topic_iter.next()?;
            let digits = topic.strip_prefix("0x").unwrap_or(topic);
            params.insert(input.name.clone(), decode_indexed_word(input, digits)?);
        } else if let Some(word) = data_words.next() {
            params.insert(input.name.clone(), decode_word(&input.kind, word)?);
        }
    }

    Some(DecodedEvent {
        name: event.name.clone(),
        params,
    })
}

fn decode_indexed_word(input: &AbiInput, digits: &str) -> Option<Value> {
    let kind = input.kind.as_str();
    if kind.contains('[') || matches!(kind, "string" | "bytes" | "tuple") {
        // the topic holds the keccak hash of the value, not the value itself
        if digits.len() != 64 {
            return None;
        }
        return Some(Value::String(format!("0x{}", digits.to_lowercase())));
    }
    decode_word(kind, digits)
}

/// Decode one 32-byte slot according to a static ABI type. Unrecognized and
/// fixed-bytes types come back as the raw hex word.
fn decode_word(kind: &str, digits: &str) -> Option<Value> {
    if digits.len() != 64 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    match kind {
        "address" => crate::hex::topic_to_address(digits).map(Value::String),
        "bool" => Some(Value::Bool(digits.bytes().any(|b| b != b'0'))),
        _ if kind.starts_with("uint") && !kind.contains('[') => {
            let value = U256::from_str_radix(digits, 16).ok()?;
            Some(uint_to_json(value))
        }
        _ if kind.starts_with("int") && !kind.contains('[') => {
            let value = U256::from_str_radix(digits, 16).ok()?;
            Some(int_to_json(value))
        }
        _ => Some(Value::String(format!("0x{}", digits.to_lowercase()))),
    }
}

/// Values that fit a u64 stay JSON numbers; wider ones become decimal
/// strings so 256-bit amounts survive JSON round-trips.
fn uint_to_json(value: U256) -> Value {
    match u64::try_from(value) {
        Ok(small) => Value::from(small),
        Err(_) => Value::String(value.to_string()),
    }
}

/// Two's complement over the full 256-bit slot; the encoder sign-extends
/// narrower ints, so the slot's top bit is the sign bit for every `intN`.
fn int_to_json(value: U256) -> Value {
    if !value.bit(255) {
        return uint_to_json(value);
    }
    let magnitude = (!value).wrapping_add(U256::from(1u8));
    match u64::try_from(magnitude) {
        Ok(small) if small <= i64::MAX as u64 + 1 => Value::from(-(small as i128) as i64),
        _ => Value::String(format!("-{magnitude}")),
    }
}

/// `Name(type1,type2,…)` with no spaces; tuples expand to their component
/// types recursively.
pub fn canonical_signature(event: &AbiEvent) -> String {
    let types = event
        .inputs
        .iter()
        .map(canonical_type)
        .collect::<Vec<_>>()
        .join(",");
    format!("{}({})", event.name, types)
}

fn canonical_type(input: &AbiInput) -> String {
    if let Some(bracket) = input.kind.find('[') {
        let (base, suffix) = input.kind.split_at(bracket);
        if base == "tuple" {
            return format!("{}{}", tuple_signature(&input.components), suffix);
        }
        return input.kind.clone();
    }
    if input.kind == "tuple" {
        return tuple_signature(&input.components);
    }
    input.kind.clone()
}

fn tuple_signature(components: &[AbiInput]) -> String {
    let inner = components
        .iter()
        .map(canonical_type)
        .collect::<Vec<_>>()
        .join(",");
    format!("({inner})")
}

fn topic0_of(event: &AbiEvent) -> String {
    format!(
        "0x{}",
        hex::encode(keccak256(canonical_signature(event).as_bytes()))
    )
}
