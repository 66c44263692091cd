use std::sync::LazyLock;

use super::decoder::EventDecoder;

/// Decoder over a curated ABI of ubiquitous event signatures, used when a
/// contract has no resolvable ABI. ERC-20 and ERC-721 share `Transfer` and
/// `Approval` signatures; the decoder tells them apart by topic count.
pub static KNOWN_EVENTS: LazyLock<EventDecoder> = LazyLock::new(|| {
    EventDecoder::from_json(KNOWN_EVENTS_ABI).expect("known events abi is valid json")
});

const KNOWN_EVENTS_ABI: &str = r#"[
  {"type":"event","name":"Transfer","inputs":[
    {"name":"from","type":"address","indexed":true},
    {"name":"to","type":"address","indexed":true},
    {"name":"value","type":"uint256","indexed":false}]},
  {"type":"event","name":"Transfer","inputs":[
    {"name":"from","type":"address","indexed":true},
    {"name":"to","type":"address","indexed":true},
    {"name":"tokenId","type":"uint256","indexed":true}]},
  {"type":"event","name":"Approval","inputs":[
    {"name":"owner","type":"address","indexed":true},
    {"name":"spender","type":"address","indexed":true},
    {"name":"value","type":"uint256","indexed":false}]},
  {"type":"event","name":"Approval","inputs":[
    {"name":"owner","type":"address","indexed":true},
    {"name":"approved","type":"address","indexed":true},
    {"name":"tokenId","type":"uint256","indexed":true}]},
  {"type":"event","name":"ApprovalForAll","inputs":[
    {"name":"owner","type":"address","indexed":true},
    {"name":"operator","type":"address","indexed":true},
    {"name":"approved","type":"bool","indexed":false}]},
  {"type":"event","name":"TransferSingle","inputs":[
    {"name":"operator","type":"address","indexed":true},
    {"name":"from","type":"address","indexed":true},
    {"name":"to","type":"address","indexed":true},
    {"name":"id","type":"uint256","indexed":false},
    {"name":"value","type":"uint256","indexed":false}]},
  {"type":"event","name":"TransferBatch","inputs":[
    {"name":"operator","type":"address","indexed":true},
    {"name":"from","type":"address","indexed":true},
    {"name":"to","type":"address","indexed":true},
    {"name":"ids","type":"uint256[]","indexed":false},
    {"name":"values","type":"uint256[]","indexed":false}]},
  {"type":"event","name":"Deposit","inputs":[
    {"name":"dst","type":"address","indexed":true},
    {"name":"wad","type":"uint256","indexed":false}]},
  {"type":"event","name":"Withdrawal","inputs":[
    {"name":"src","type":"address","indexed":true},
    {"name":"wad","type":"uint256","indexed":false}]},
  {"type":"event","name":"Swap","inputs":[
    {"name":"sender","type":"address","indexed":true},
    {"name":"amount0In","type":"uint256","indexed":false},
    {"name":"amount1In","type":"uint256","indexed":false},
    {"name":"amount0Out","type":"uint256","indexed":false},
    {"name":"amount1Out","type":"uint256","indexed":false},
    {"name":"to","type":"address","indexed":true}]},
  {"type":"event","name":"Sync","inputs":[
    {"name":"reserve0","type":"uint112","indexed":false},
    {"name":"reserve1","type":"uint112","indexed":false}]},
  {"type":"event","name":"OwnershipTransferred","inputs":[
    {"name":"previousOwner","type":"address","indexed":true},
    {"name":"newOwner","type":"address","indexed":true}]}
]"#;

#[cfg(test)]
mod tests {
    use super::KNOWN_EVENTS;

    const TRANSFER_TOPIC0: &str =
        "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

    fn pad(address: &str) -> String {
        format!("0x{:0>64}", address.trim_start_matches("0x"))
    }

    #[test]
    fn erc20_transfer_resolves_by_topic_count() {
        let topics = vec![
            TRANSFER_TOPIC0.to_string(),
            pad("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            pad("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
        ];
        let data = format!("0x{:0>64}", "3e8");

        let decoded = KNOWN_EVENTS.decode(&topics, &data).unwrap();
        assert_eq!(decoded.name, "Transfer");
        assert_eq!(decoded.params.get("value").unwrap(), 1000u64);
    }

    #[test]
    fn erc721_transfer_resolves_to_the_indexed_variant() {
        let topics = vec![
            TRANSFER_TOPIC0.to_string(),
            pad("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            pad("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            pad("0x2a"),
        ];

        let decoded = KNOWN_EVENTS.decode(&topics, "0x").unwrap();
        assert_eq!(decoded.name, "Transfer");
        assert_eq!(decoded.params.get("tokenId").unwrap(), 42u64);
        assert!(!decoded.params.contains_key("value"));
    }

    #[test]
    fn weth_deposit_decodes() {
        // keccak256("Deposit(address,uint256)")
        let topics = vec![
            "0xe1fffcc4923d04b559f4d29a8bfc6cda04eb5b0d3c460751c2402c5c5cc9109c".to_string(),
            pad("0xcccccccccccccccccccccccccccccccccccccccc"),
        ];
        let data = format!("0x{:0>64}", "de0b6b3a7640000");

        let decoded = KNOWN_EVENTS.decode(&topics, &data).unwrap();
        assert_eq!(decoded.name, "Deposit");
        assert_eq!(
            decoded.params.get("wad").unwrap(),
            1_000_000_000_000_000_000u64
        );
    }
}
