use collector_core::constants::limits::MAX_MINT_LINES_PER_REQUEST;
use collector_core::transport::batching::{divide_into_batches, divide_into_chunks};
use proptest::prelude::*;

proptest! {
    /// Property: batching never reorders, drops or duplicates items.
    #[test]
    fn batches_preserve_order_and_content(
        lines in prop::collection::vec("[a-z0-9.]{1,40}", 0..500),
        max in 64usize..4096,
    ) {
        let batches = divide_into_batches(&lines, max, Some("\n")).unwrap();
        let rejoined: Vec<String> = batches
            .iter()
            .flat_map(|batch| batch.split('\n').map(str::to_string))
            .collect();
        prop_assert_eq!(rejoined, lines);
    }

    /// Property: when no single item exceeds the ceiling, neither does any batch.
    #[test]
    fn batches_respect_the_ceiling(lines in prop::collection::vec("[a-z]{1,20}", 1..300)) {
        let max = 64usize;
        let batches = divide_into_batches(&lines, max, Some("\n")).unwrap();
        prop_assert!(!batches.is_empty());
        for batch in &batches {
            prop_assert!(batch.len() <= max, "batch of {} bytes exceeds ceiling", batch.len());
        }
    }

    /// Property: JSON-array batching always yields parseable arrays covering
    /// every input event.
    #[test]
    fn json_batches_parse_and_cover_input(count in 0usize..2000) {
        let events: Vec<serde_json::Value> = (0..count)
            .map(|i| serde_json::json!({"content": format!("event {i}")}))
            .collect();
        let batches = divide_into_batches(&events, 4096, None).unwrap();
        let mut total = 0usize;
        for batch in &batches {
            let parsed: Vec<serde_json::Value> = serde_json::from_str(batch).unwrap();
            total += parsed.len();
        }
        prop_assert_eq!(total, count);
    }

    /// Property: count-chunking covers every item, with only the final chunk
    /// allowed to be short.
    #[test]
    fn chunking_covers_all_items(count in 0usize..5000, chunk_size in 1usize..1500) {
        let items: Vec<usize> = (0..count).collect();
        let chunks: Vec<&[usize]> = divide_into_chunks(&items, chunk_size).collect();
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        prop_assert_eq!(total, count);
        for chunk in chunks.iter().rev().skip(1) {
            prop_assert_eq!(chunk.len(), chunk_size);
        }
    }
}

#[test]
fn mint_line_cap_splits_1400_lines_into_1000_and_400() {
    let lines: Vec<String> = (0..1400).map(|i| format!("metric.{i} gauge,1")).collect();
    let chunks: Vec<&[String]> = divide_into_chunks(&lines, MAX_MINT_LINES_PER_REQUEST).collect();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].len(), 1000);
    assert_eq!(chunks[1].len(), 400);
}
